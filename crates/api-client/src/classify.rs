//! Response classification
//!
//! The pipeline only ever intervenes on `Unauthorized`. The other classes
//! exist for metrics labels and for mapping final outcomes to `Error` in the
//! typed helpers.

use reqwest::StatusCode;

/// Coarse outcome of a single HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// 401: access token missing, expired or rejected. Triggers refresh + replay.
    Unauthorized,
    /// Other 4xx: validation errors, 403 permission denials, 404, 429.
    ClientError,
    /// 5xx and anything unexpected.
    ServerError,
}

impl ResponseClass {
    pub fn label(&self) -> &'static str {
        match self {
            ResponseClass::Success => "success",
            ResponseClass::Unauthorized => "unauthorized",
            ResponseClass::ClientError => "client_error",
            ResponseClass::ServerError => "server_error",
        }
    }
}

/// Classify a response status.
///
/// 403 is a `ClientError`: the server answers it to authenticated users who
/// lack permission (a client opening an attorney-only endpoint), and a fresh
/// token does not change that.
pub fn classify_status(status: StatusCode) -> ResponseClass {
    match status.as_u16() {
        200..=399 => ResponseClass::Success,
        401 => ResponseClass::Unauthorized,
        400..=499 => ResponseClass::ClientError,
        _ => ResponseClass::ServerError,
    }
}
