//! Session credentials for the Legal Connect API
//!
//! Owns the two pieces of auth state the client keeps between runs (the
//! access/refresh token pair) and the three token-endpoint calls that create,
//! renew and end it. Nothing here knows about request replay or refresh
//! coordination; that lives in `api-client`.
//!
//! Credential flow:
//! 1. `token::obtain_token()` exchanges email + password for a pair
//! 2. The pair is persisted via `CredentialStore::set()`
//! 3. On a 401, `token::refresh_token()` trades the refresh token for a new
//!    access token (and possibly a rotated refresh token)
//! 4. `token::revoke_session()` + `CredentialStore::clear()` on logout

pub mod constants;
pub mod credentials;
pub mod error;
pub mod memory;
pub mod token;

pub use constants::*;
pub use credentials::{CredentialStore, Credentials, FileCredentialStore, StoreFuture, TokenKind};
pub use error::{Error, Result};
pub use memory::MemoryCredentialStore;
pub use token::{RefreshResponse, obtain_token, refresh_token, revoke_session, verify_token};
