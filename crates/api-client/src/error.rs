//! Error types for authenticated API calls

use reqwest::StatusCode;

/// Errors surfaced to callers of the authenticated client.
///
/// Only `Unauthorized` is ever produced after a refresh-and-replay attempt;
/// everything else passes through from the first dispatch unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("not authorized: {body}")]
    Unauthorized { body: String },

    #[error("API returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("credential storage error: {0}")]
    Storage(String),

    #[error("login failed: {0}")]
    Login(String),
}

impl Error {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }

    /// Metrics/log label for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Timeout(_) => "timeout",
            Error::Unauthorized { .. } => "unauthorized",
            Error::Status { .. } => "status",
            Error::Decode(_) => "decode",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Storage(_) => "storage",
            Error::Login(_) => "login",
        }
    }
}

impl From<session_auth::Error> for Error {
    fn from(err: session_auth::Error) -> Self {
        match err {
            session_auth::Error::Io(msg) | session_auth::Error::CredentialParse(msg) => {
                Error::Storage(msg)
            }
            session_auth::Error::Timeout(msg) => Error::Timeout(msg),
            session_auth::Error::Http(msg) => Error::Transport(msg),
            session_auth::Error::InvalidCredentials(msg)
            | session_auth::Error::TokenExchange(msg) => Error::Login(msg),
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
