//! Authenticated client for the Legal Connect API
//!
//! Wraps every outbound call with bearer-token handling:
//!
//! 1. `RequestPipeline` attaches the stored access token and dispatches
//! 2. A 401 on the first dispatch goes to `RefreshCoordinator`, which runs at
//!    most one refresh call at a time and shares its result with every caller
//!    waiting on it
//! 3. With a fresh token the request is replayed once; without one the
//!    session ends
//! 4. `AuthStateBroadcaster` clears the stored credentials and tells the one
//!    registered subscriber that the user is signed out
//!
//! `AuthClient` owns all of the above and is what applications use.

pub mod broadcast;
pub mod classify;
pub mod client;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod refresh;
pub mod request;
pub mod session;

#[cfg(test)]
mod test_support;

pub use reqwest::{Method, StatusCode};

pub use broadcast::{AuthStateBroadcaster, AuthStateCallback};
pub use classify::{ResponseClass, classify_status};
pub use client::{AuthClient, ClientConfig};
pub use error::{Error, Result};
pub use crate::metrics::RefreshOutcome;
pub use pipeline::RequestPipeline;
pub use refresh::RefreshCoordinator;
pub use request::{ApiResponse, Attempt, OutboundRequest};
pub use session::{EndReason, SessionAction, SessionEvent, SessionState, handle_event};
