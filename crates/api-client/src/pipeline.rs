//! Authenticated request pipeline
//!
//! Every outbound call goes through `RequestPipeline::send`:
//! 1. Attach the stored access token as a bearer token (or nothing)
//! 2. Dispatch with the client timeout
//! 3. On a first-attempt 401, ask the `RefreshCoordinator` for a fresh token
//!    and replay once with it; if none comes back, the coordinator has already
//!    ended the session and the original 401 is returned
//!
//! Statuses other than 401, transport errors and timeouts pass through
//! untouched. A request is dispatched at most twice.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use session_auth::{CredentialStore, TokenKind, endpoint};
use tracing::{debug, instrument, warn};

use crate::classify::ResponseClass;
use crate::error::{Error, Result};
use crate::metrics;
use crate::refresh::RefreshCoordinator;
use crate::request::{ApiResponse, Attempt, OutboundRequest};

pub struct RequestPipeline {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl RequestPipeline {
    pub(crate) fn new(
        client: reqwest::Client,
        base_url: String,
        timeout: Duration,
        store: Arc<dyn CredentialStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            client,
            base_url,
            timeout,
            store,
            coordinator,
        }
    }

    /// Send `request`, refreshing and replaying once on a 401.
    ///
    /// HTTP statuses are `Ok`; only failures to get a response at all are
    /// `Err`.
    pub async fn send(&self, request: &OutboundRequest) -> Result<ApiResponse> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        self.send_with_id(request, request_id).await
    }

    #[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.path()))]
    async fn send_with_id(
        &self,
        request: &OutboundRequest,
        request_id: String,
    ) -> Result<ApiResponse> {
        let mut attempt = Attempt::First;
        let mut token = self.store.get(TokenKind::Access).await;

        loop {
            let response = self.dispatch(request, token.as_deref(), attempt).await?;
            if response.class() != ResponseClass::Unauthorized {
                return Ok(response);
            }

            let Some(next) = attempt.next() else {
                debug!("replayed request still unauthorized");
                return Ok(response);
            };
            attempt = next;

            match self.coordinator.ensure_fresh_access_token().await {
                Some(fresh) => {
                    debug!("replaying with refreshed access token");
                    token = Some(fresh);
                }
                None => {
                    debug!("no fresh access token, returning original 401");
                    return Ok(response);
                }
            }
        }
    }

    async fn dispatch(
        &self,
        request: &OutboundRequest,
        token: Option<&str>,
        attempt: Attempt,
    ) -> Result<ApiResponse> {
        let mut headers = request.headers().clone();
        headers.remove(AUTHORIZATION);
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::InvalidRequest(format!("unusable access token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = self
            .client
            .request(
                request.method().clone(),
                endpoint(&self.base_url, request.path()),
            )
            .headers(headers)
            .timeout(self.timeout);
        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }

        let method = request.method().as_str();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_request(method, "error");
                warn!(attempt = attempt.label(), error = %e, "request failed");
                return Err(Error::from_reqwest(e));
            }
        };

        let status = response.status();
        metrics::record_request(method, status.as_str());
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Error::from_reqwest)?;
        debug!(
            attempt = attempt.label(),
            status = status.as_u16(),
            "response received"
        );
        Ok(ApiResponse::new(status, headers, body, attempt))
    }
}
