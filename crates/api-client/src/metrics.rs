//! Client-side metrics
//!
//! Emitted through the `metrics` facade; the embedding application decides
//! whether a recorder is installed.
//!
//! - `api_client_requests_total` (counter): labels `method`, `status`
//! - `api_client_refresh_total` (counter): label `outcome`
//! - `api_client_sessions_ended_total` (counter): label `reason`

use crate::session::EndReason;

/// How a refresh cycle settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New access token persisted and handed to waiters
    Refreshed,
    /// Server rejected the refresh token
    Rejected,
    /// Network failure or unexpected status
    Transport,
    /// No response within the client timeout
    Timeout,
    /// Token obtained but the credential store refused the write
    StoreFailed,
    /// Credentials changed (logout or login) while the refresh was running
    Superseded,
    /// Nothing to refresh with
    NoRefreshToken,
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Refreshed => "refreshed",
            RefreshOutcome::Rejected => "rejected",
            RefreshOutcome::Transport => "transport",
            RefreshOutcome::Timeout => "timeout",
            RefreshOutcome::StoreFailed => "store_failed",
            RefreshOutcome::Superseded => "superseded",
            RefreshOutcome::NoRefreshToken => "no_refresh_token",
        }
    }
}

/// Record one dispatch to the API. `status` is the HTTP status code, or
/// `"error"` when no response arrived.
pub fn record_request(method: &str, status: &str) {
    metrics::counter!(
        "api_client_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_refresh(outcome: RefreshOutcome) {
    metrics::counter!("api_client_refresh_total", "outcome" => outcome.label()).increment(1);
}

pub fn record_session_ended(reason: EndReason) {
    metrics::counter!("api_client_sessions_ended_total", "reason" => reason.label())
        .increment(1);
}
