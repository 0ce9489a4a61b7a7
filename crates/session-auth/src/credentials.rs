//! Credential storage for the signed-in session
//!
//! The store holds exactly one access/refresh pair. Both tokens are written
//! together: a reader sees the previous pair, the new pair, or nothing, never
//! one token from each. Reads never fail; a backend that cannot be read is
//! reported as "no credentials" and logged.
//!
//! `FileCredentialStore` keeps the pair in a JSON file written via temp file +
//! rename, so a crash mid-write leaves the old file intact.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Boxed future returned by `CredentialStore` methods.
///
/// `Pin<Box<dyn Future>>` keeps the trait usable as `Arc<dyn CredentialStore>`.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An access/refresh token pair as issued by the token endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Short-lived bearer token attached to API calls
    pub access: String,
    /// Longer-lived token used only to obtain a new access token
    pub refresh: String,
}

impl Credentials {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    /// Read one token of the pair. Empty strings count as absent.
    pub fn token(&self, kind: TokenKind) -> Option<&str> {
        let token = match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        };
        (!token.is_empty()).then_some(token.as_str())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access", &"[REDACTED]")
            .field("refresh", &"[REDACTED]")
            .finish()
    }
}

/// Which half of the pair to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn label(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Durable storage for the session's token pair.
pub trait CredentialStore: Send + Sync {
    /// Read one token. Backend failures read as `None`.
    fn get(&self, kind: TokenKind) -> StoreFuture<'_, Option<String>>;

    /// Persist both tokens as one unit, replacing any previous pair.
    fn set(&self, credentials: Credentials) -> StoreFuture<'_, Result<()>>;

    /// Delete both tokens. Clearing an empty store succeeds.
    fn clear(&self) -> StoreFuture<'_, Result<()>>;
}

/// JSON-file credential store.
///
/// The Mutex serializes writers. The in-memory copy is replaced only after the
/// file write succeeds, so a failed `set` leaves the previous pair readable.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Option<Credentials>>,
}

impl FileCredentialStore {
    /// Open the store at `path`.
    ///
    /// A missing file is an empty store. An unreadable or corrupt file is
    /// logged and also treated as empty: the user simply has to log in again.
    pub async fn open(path: PathBuf) -> Self {
        let state = match read_credentials(&path).await {
            Ok(Some(credentials)) => {
                info!(path = %path.display(), "loaded stored credentials");
                Some(credentials)
            }
            Ok(None) => {
                info!(path = %path.display(), "no stored credentials");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable credential file");
                None
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
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
            let mut state = self.state.lock().await;
            write_atomic(&self.path, &credentials).await?;
            *state = Some(credentials);
            debug!(path = %self.path.display(), "stored credentials");
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => debug!(path = %self.path.display(), "removed credential file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(format!("removing credential file: {e}"))),
            }
            *state = None;
            Ok(())
        })
    }
}

/// Read the credential file. `Ok(None)` when it does not exist.
async fn read_credentials(path: &Path) -> Result<Option<Credentials>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(format!("reading credential file: {e}"))),
    };
    let credentials: Credentials = serde_json::from_str(&contents)
        .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
    Ok(Some(credentials))
}

/// Write the pair to a uniquely named temp file beside `path`, restrict it to
/// 0600, then rename it over the target. The temp file is removed if any step
/// fails.
async fn write_atomic(path: &Path, credentials: &Credentials) -> Result<()> {
    let json = serde_json::to_string_pretty(credentials)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;
    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;
    }

    let tmp_path = dir.join(format!(
        ".credentials.tmp.{}",
        uuid::Uuid::new_v4().as_simple()
    ));
    if let Err(e) = replace_with(&tmp_path, path, json.as_bytes()).await {
        match tokio::fs::remove_file(&tmp_path).await {
            Ok(()) => {}
            Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
            Err(cleanup) => {
                warn!(path = %tmp_path.display(), error = %cleanup, "failed to remove temp credential file");
            }
        }
        return Err(e);
    }
    Ok(())
}

async fn replace_with(tmp_path: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(tmp_path, contents)
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    Ok(())
}
