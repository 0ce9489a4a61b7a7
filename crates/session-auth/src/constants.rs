//! Remote API endpoints and client defaults
//!
//! Paths are relative to the API base URL, which already carries the
//! `/api/v1` prefix. The trailing slashes are significant to the server.

use std::time::Duration;

/// Production API base URL, used when no override is configured
pub const DEFAULT_BASE_URL: &str = "https://api.legalconnectapp.com/api/v1";

/// Exchange email + password for an access/refresh pair
pub const LOGIN_PATH: &str = "/auth/token/";

/// Exchange a refresh token for a new access token (optionally a rotated refresh token)
pub const REFRESH_PATH: &str = "/auth/token/refresh/";

/// Check whether an access token is still accepted
pub const VERIFY_PATH: &str = "/auth/token/verify/";

/// Server-side session termination
pub const LOGOUT_PATH: &str = "/auth/logout/";

/// Per-call timeout applied to business calls and the refresh call alike
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Join a base URL and an endpoint path without doubling the slash.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
