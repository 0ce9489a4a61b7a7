//! Token endpoint calls
//!
//! Four interactions with the remote API's JWT endpoints:
//! 1. Login: email + password for an access/refresh pair
//! 2. Refresh: refresh token for a new access token, plus a rotated refresh
//!    token when the server rotates
//! 3. Verify: ask the server whether an access token is still accepted
//! 4. Logout: best-effort server-side session termination
//!
//! All calls carry an explicit per-call timeout; a timeout surfaces as
//! `Error::Timeout` so callers can tell it apart from a rejected token.

use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, VERIFY_PATH, endpoint};
use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Response from the refresh endpoint.
///
/// `refresh` is only present when the server rotates refresh tokens.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

/// Exchange email + password for a token pair.
///
/// 400/401 from the endpoint means the credentials were wrong (or the email
/// is unverified) and maps to `InvalidCredentials`.
pub async fn obtain_token(
    client: &reqwest::Client,
    base_url: &str,
    email: &str,
    password: &Secret<String>,
    timeout: Duration,
) -> Result<Credentials> {
    let response = client
        .post(endpoint(base_url, LOGIN_PATH))
        .timeout(timeout)
        .json(&LoginBody {
            email,
            password: password.expose(),
        })
        .send()
        .await
        .map_err(|e| Error::from_reqwest("login request failed", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(Error::InvalidCredentials(format!(
                "login rejected ({status}): {body}"
            )));
        }
        return Err(Error::TokenExchange(format!(
            "login endpoint returned {status}: {body}"
        )));
    }

    let credentials = response
        .json::<Credentials>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid login response: {e}")))?;
    if credentials.access.is_empty() || credentials.refresh.is_empty() {
        return Err(Error::TokenExchange(
            "login response is missing a token".into(),
        ));
    }
    Ok(credentials)
}

/// Trade a refresh token for a new access token.
///
/// 401/403 means the refresh token is expired, revoked or malformed and maps
/// to `InvalidCredentials`. Anything else non-2xx is `TokenExchange`.
pub async fn refresh_token(
    client: &reqwest::Client,
    base_url: &str,
    refresh: &str,
    timeout: Duration,
) -> Result<RefreshResponse> {
    let response = client
        .post(endpoint(base_url, REFRESH_PATH))
        .timeout(timeout)
        .json(&serde_json::json!({ "refresh": refresh }))
        .send()
        .await
        .map_err(|e| Error::from_reqwest("token refresh request failed", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    let refreshed = response
        .json::<RefreshResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;
    if refreshed.access.is_empty() {
        return Err(Error::TokenExchange(
            "refresh response has an empty access token".into(),
        ));
    }
    Ok(refreshed)
}

/// Ask the server whether `token` is currently accepted.
///
/// `Ok(false)` for a 401 (expired or invalid); transport failures and other
/// statuses are errors so a flaky network is never mistaken for a logout.
pub async fn verify_token(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    timeout: Duration,
) -> Result<bool> {
    let response = client
        .post(endpoint(base_url, VERIFY_PATH))
        .timeout(timeout)
        .json(&serde_json::json!({ "token": token }))
        .send()
        .await
        .map_err(|e| Error::from_reqwest("token verify request failed", e))?;

    match response.status().as_u16() {
        200..=299 => Ok(true),
        401 => Ok(false),
        _ => {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            Err(Error::TokenExchange(format!(
                "token verify returned {status}: {body}"
            )))
        }
    }
}

/// Tell the server the session is over.
///
/// Sent with the current access token when there is one. The caller clears
/// local credentials regardless of the outcome.
pub async fn revoke_session(
    client: &reqwest::Client,
    base_url: &str,
    access: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    let mut request = client.post(endpoint(base_url, LOGOUT_PATH)).timeout(timeout);
    if let Some(token) = access {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::from_reqwest("logout request failed", e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::TokenExchange(format!(
            "logout endpoint returned {status}"
        )));
    }
    debug!("server-side logout acknowledged");
    Ok(())
}
