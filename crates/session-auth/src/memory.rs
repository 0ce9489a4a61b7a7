//! Process-local credential store
//!
//! Nothing outlives the process. Used for ephemeral sessions and in tests
//! where a file on disk adds nothing.

use tokio::sync::Mutex;

use crate::credentials::{CredentialStore, Credentials, StoreFuture, TokenKind};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a pair already stored, as if a login had happened.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            state: Mutex::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, kind: TokenKind) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state
                .as_ref()
                .and_then(|c| c.token(kind))
                .map(str::to_owned)
        })
    }

    fn set(&self, credentials: Credentials) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.lock().await = Some(credentials);
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.lock().await = None;
            Ok(())
        })
    }
}
