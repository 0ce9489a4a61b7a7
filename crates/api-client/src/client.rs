//! `AuthClient`: the application-facing handle
//!
//! One instance per signed-in user context. It owns the HTTP client, the
//! credential store handle, the refresh coordinator, the broadcaster and the
//! request pipeline, and wires them to each other.

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use session_auth::{CredentialStore, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, TokenKind};
use tracing::{info, warn};

use crate::broadcast::AuthStateBroadcaster;
use crate::error::{Error, Result};
use crate::pipeline::RequestPipeline;
use crate::refresh::{RefreshCoordinator, WriteLock};
use crate::request::{ApiResponse, OutboundRequest};
use crate::session::{SessionEvent, SessionState};

/// Connection settings for `AuthClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root including the version prefix, e.g. `https://host/api/v1`
    pub base_url: String,
    /// Applied to every call, the refresh call included
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct AuthClient {
    config: ClientConfig,
    http: reqwest::Client,
    store: Arc<dyn CredentialStore>,
    writes: WriteLock,
    broadcaster: Arc<AuthStateBroadcaster>,
    coordinator: RefreshCoordinator,
    pipeline: RequestPipeline,
}

impl AuthClient {
    /// Build a client over `store`.
    ///
    /// The session starts `Authenticated` if the store already holds a token
    /// from a previous run, `Unauthenticated` otherwise.
    pub async fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;

        let signed_in = store.get(TokenKind::Access).await.is_some()
            || store.get(TokenKind::Refresh).await.is_some();
        let initial = if signed_in {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        info!(
            base_url = %config.base_url,
            session = initial.label(),
            "API client ready"
        );

        let writes = WriteLock::default();
        let broadcaster = Arc::new(AuthStateBroadcaster::new(
            store.clone(),
            writes.clone(),
            initial,
        ));
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            http.clone(),
            config.base_url.clone(),
            config.timeout,
            writes.clone(),
            broadcaster.clone(),
        );
        let pipeline = RequestPipeline::new(
            http.clone(),
            config.base_url.clone(),
            config.timeout,
            store.clone(),
            coordinator.clone(),
        );

        Ok(Self {
            config,
            http,
            store,
            writes,
            broadcaster,
            coordinator,
            pipeline,
        })
    }

    /// Send a request through the authenticated pipeline.
    pub async fn send(&self, request: &OutboundRequest) -> Result<ApiResponse> {
        self.pipeline.send(request).await
    }

    /// Exchange email + password for a token pair and store it.
    ///
    /// Does not notify the auth state subscriber; only session ends do.
    pub async fn login(&self, email: &str, password: &Secret<String>) -> Result<()> {
        let credentials = session_auth::obtain_token(
            &self.http,
            &self.config.base_url,
            email,
            password,
            self.config.timeout,
        )
        .await?;

        {
            let _writes = self.writes.lock().await;
            self.store.set(credentials).await?;
            self.broadcaster.record(SessionEvent::LoggedIn).await?;
        }
        info!("logged in");
        Ok(())
    }

    /// End the session.
    ///
    /// Tells the server first (best effort, failures only logged), then
    /// clears local credentials and notifies the subscriber. Errors only if
    /// the local clear failed.
    pub async fn logout(&self) -> Result<()> {
        let access = self.store.get(TokenKind::Access).await;
        if let Err(e) = session_auth::revoke_session(
            &self.http,
            &self.config.base_url,
            access.as_deref(),
            self.config.timeout,
        )
        .await
        {
            warn!(error = %e, "server-side logout failed, clearing local session anyway");
        }

        self.broadcaster.record(SessionEvent::LoggedOut).await?;
        info!("logged out");
        Ok(())
    }

    /// Ask the server whether the current session is still good.
    ///
    /// A rejected or missing access token goes through the same refresh path
    /// as a 401 on a regular request, so `Ok(false)` means the session has
    /// ended.
    pub async fn verify_session(&self) -> Result<bool> {
        let accepted = match self.store.get(TokenKind::Access).await {
            Some(access) => {
                session_auth::verify_token(
                    &self.http,
                    &self.config.base_url,
                    &access,
                    self.config.timeout,
                )
                .await?
            }
            None => false,
        };
        if accepted {
            return Ok(true);
        }
        Ok(self.coordinator.ensure_fresh_access_token().await.is_some())
    }

    /// Replace the auth state subscriber. It is called with `false` when the
    /// session ends; registering does not call it.
    pub fn register_auth_state_subscriber<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.broadcaster.register(Arc::new(callback));
    }

    pub fn unregister_auth_state_subscriber(&self) {
        self.broadcaster.unregister();
    }

    pub async fn get_access_token(&self) -> Option<String> {
        self.store.get(TokenKind::Access).await
    }

    pub fn session_state(&self) -> SessionState {
        self.broadcaster.state()
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// GET `path` and decode a successful JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(&OutboundRequest::get(path))
            .await?
            .error_for_status()?
            .json()
    }

    /// POST `body` as JSON to `path` and decode a successful JSON body.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(&OutboundRequest::post(path).json(body)?)
            .await?
            .error_for_status()?
            .json()
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(&OutboundRequest::patch(path).json(body)?)
            .await?
            .error_for_status()?
            .json()
    }

    /// DELETE `path`, ignoring any response body.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(&OutboundRequest::delete(path))
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Attempt;
    use crate::test_support::{MockApi, RefreshMode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use reqwest::StatusCode;
    use session_auth::{Credentials, FileCredentialStore, MemoryCredentialStore};
    use std::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn config(api: &MockApi) -> ClientConfig {
        ClientConfig {
            base_url: api.url.clone(),
            timeout: TIMEOUT,
        }
    }

    fn recording_subscriber(client: &AuthClient) -> Arc<Mutex<Vec<bool>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        client.register_auth_state_subscriber(move |authenticated| {
            seen_clone.lock().unwrap().push(authenticated);
        });
        seen
    }

    #[test]
    fn default_config_points_at_production() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn initial_state_follows_stored_tokens() {
        let api = MockApi::start(RefreshMode::Reject).await;

        let empty = AuthClient::new(config(&api), Arc::new(MemoryCredentialStore::new()))
            .await
            .unwrap();
        assert_eq!(empty.session_state(), SessionState::Unauthenticated);

        let stored = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "at_1", "rt_1",
        )));
        let signed_in = AuthClient::new(config(&api), stored).await.unwrap();
        assert_eq!(signed_in.session_state(), SessionState::Authenticated);
        assert_eq!(signed_in.base_url(), api.url);
    }

    #[tokio::test]
    async fn login_stores_pair_without_notifying() {
        let api = MockApi::start(RefreshMode::Reject).await;
        let client = AuthClient::new(config(&api), Arc::new(MemoryCredentialStore::new()))
            .await
            .unwrap();
        let seen = recording_subscriber(&client);

        client
            .login("client@example.com", &Secret::from("correct"))
            .await
            .unwrap();

        assert_eq!(client.get_access_token().await.as_deref(), Some("at_login"));
        assert_eq!(client.session_state(), SessionState::Authenticated);
        assert!(seen.lock().unwrap().is_empty());

        let body: serde_json::Value = client.get_json("/profile/").await.unwrap();
        assert_eq!(body["path"], "/api/v1/profile/");
    }

    #[tokio::test]
    async fn wrong_password_is_login_error() {
        let api = MockApi::start(RefreshMode::Reject).await;
        let client = AuthClient::new(config(&api), Arc::new(MemoryCredentialStore::new()))
            .await
            .unwrap();

        let err = client
            .login("client@example.com", &Secret::from("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Login(_)), "got {err:?}");
        assert!(client.get_access_token().await.is_none());
        assert_eq!(client.session_state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn logout_clears_and_notifies_without_prior_401() {
        let api = MockApi::start(RefreshMode::Reject).await;
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "at_valid", "rt_1",
        )));
        let client = AuthClient::new(config(&api), store.clone()).await.unwrap();
        let seen = recording_subscriber(&client);

        client.logout().await.unwrap();

        assert_eq!(api.logout_calls(), 1);
        assert!(store.get(TokenKind::Access).await.is_none());
        assert!(store.get(TokenKind::Refresh).await.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![false]);
        assert_eq!(client.session_state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn logout_survives_unreachable_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "at_1", "rt_1",
        )));
        let client = AuthClient::new(
            ClientConfig {
                base_url: format!("http://{addr}/api/v1"),
                timeout: TIMEOUT,
            },
            store.clone(),
        )
        .await
        .unwrap();
        let seen = recording_subscriber(&client);

        client.logout().await.unwrap();
        assert!(store.get(TokenKind::Refresh).await.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn unregistered_subscriber_misses_logout() {
        let api = MockApi::start(RefreshMode::Reject).await;
        let client = AuthClient::new(config(&api), Arc::new(MemoryCredentialStore::new()))
            .await
            .unwrap();
        let seen = recording_subscriber(&client);
        client.unregister_auth_state_subscriber();

        client.logout().await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn typed_helpers_map_statuses() {
        let api = MockApi::start(RefreshMode::Reject).await;
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "at_valid", "rt_1",
        )));
        let client = AuthClient::new(config(&api), store).await.unwrap();

        let created: serde_json::Value = client
            .post_json("/matters/", &serde_json::json!({"title": "Tenancy"}))
            .await
            .unwrap();
        assert_eq!(created["method"], "POST");
        assert_eq!(created["body"]["title"], "Tenancy");

        let patched: serde_json::Value = client
            .patch_json("/matters/7/", &serde_json::json!({"status": "closed"}))
            .await
            .unwrap();
        assert_eq!(patched["method"], "PATCH");

        client.delete("/matters/7/").await.unwrap();

        let err = client
            .get_json::<serde_json::Value>("/status/500/")
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn rejected_session_surfaces_unauthorized() {
        let api = MockApi::start(RefreshMode::Reject).await;
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "at_1", "rt_1",
        )));
        let client = AuthClient::new(config(&api), store).await.unwrap();
        let seen = recording_subscriber(&client);

        let err = client
            .get_json::<serde_json::Value>("/profile/")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }), "got {err:?}");
        assert_eq!(*seen.lock().unwrap(), vec![false]);

        // Session is over: the next 401 fails fast without a refresh call
        let response = client.send(&OutboundRequest::get("/profile/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn verify_session_refreshes_rejected_token() {
        let api = MockApi::start(RefreshMode::issue("at_2", None)).await;
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "at_1", "rt_1",
        )));
        let client = AuthClient::new(config(&api), store).await.unwrap();

        assert!(client.verify_session().await.unwrap());
        assert_eq!(client.get_access_token().await.as_deref(), Some("at_2"));
        assert!(client.verify_session().await.unwrap());
        assert_eq!(api.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn verify_session_with_only_refresh_token_refreshes() {
        let api = MockApi::start(RefreshMode::issue("at_2", None)).await;
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "", "rt_1",
        )));
        let client = AuthClient::new(config(&api), store).await.unwrap();
        assert_eq!(client.session_state(), SessionState::Authenticated);

        assert!(client.verify_session().await.unwrap());
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(api.refresh_tokens_seen(), vec!["rt_1".to_string()]);
        assert_eq!(client.get_access_token().await.as_deref(), Some("at_2"));
        assert_eq!(client.session_state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn verify_session_without_tokens_is_false() {
        let api = MockApi::start(RefreshMode::issue("at_2", None)).await;
        let client = AuthClient::new(config(&api), Arc::new(MemoryCredentialStore::new()))
            .await
            .unwrap();
        assert!(!client.verify_session().await.unwrap());
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn session_survives_restart_with_file_store() {
        let api = MockApi::start(RefreshMode::issue("at_2", Some("rt_2"))).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        {
            let store = Arc::new(FileCredentialStore::open(path.clone()).await);
            let client = AuthClient::new(config(&api), store).await.unwrap();
            client
                .login("client@example.com", &Secret::from("correct"))
                .await
                .unwrap();
            // Server expires the login token; the next call refreshes
            api.set_valid_access("at_expired_elsewhere");
            let response = client.send(&OutboundRequest::get("/inbox/")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.attempt(), Attempt::Replayed);
        }

        let store = Arc::new(FileCredentialStore::open(path).await);
        let client = AuthClient::new(config(&api), store).await.unwrap();
        assert_eq!(client.session_state(), SessionState::Authenticated);
        assert_eq!(client.get_access_token().await.as_deref(), Some("at_2"));
        let response = client.send(&OutboundRequest::get("/inbox/")).await.unwrap();
        assert_eq!(response.attempt(), Attempt::First);
        assert_eq!(api.refresh_tokens_seen(), vec!["rt_login".to_string()]);
    }

    #[tokio::test]
    async fn refresh_cycle_is_counted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let api = MockApi::start(RefreshMode::issue("at_2", None)).await;
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "at_1", "rt_1",
        )));
        let client = AuthClient::new(config(&api), store).await.unwrap();
        client.send(&OutboundRequest::get("/inbox/")).await.unwrap();

        let output = handle.render();
        assert!(output.contains("api_client_refresh_total{outcome=\"refreshed\"} 1"));
        assert!(output.contains("status=\"401\""));
        assert!(output.contains("status=\"200\""));
    }
}
