//! Single-flight access token refresh
//!
//! At most one refresh call is in flight per client. The first caller that
//! needs a fresh token creates a `PendingRefresh`; every caller that arrives
//! while it is live awaits the same shared future and gets the same answer.
//!
//! The cycle runs in a spawned task. A caller that is cancelled while waiting
//! cancels neither the refresh nor its consequences: the task itself moves the
//! session to `RefreshInFlight`, reports the outcome to the broadcaster (which
//! ends the session on failure) and clears the slot when it settles.
//!
//! Before persisting, the task re-reads the stored refresh token under the
//! store write lock. If a logout or a new login replaced it meanwhile, the
//! result is thrown away so a late refresh cannot bring a session back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use session_auth::{CredentialStore, Credentials, TokenKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::broadcast::AuthStateBroadcaster;
use crate::metrics::{self, RefreshOutcome};
use crate::session::SessionEvent;

/// Serializes credential writes between refresh, login and logout.
pub(crate) type WriteLock = Arc<Mutex<()>>;

type SharedRefresh = Shared<BoxFuture<'static, Option<String>>>;

/// The live refresh cycle, if any.
struct PendingRefresh {
    id: u64,
    future: SharedRefresh,
}

/// Coordinates token refreshes so concurrent 401s share one network call.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    writes: WriteLock,
    broadcaster: Arc<AuthStateBroadcaster>,
    pending: Mutex<Option<PendingRefresh>>,
    next_id: AtomicU64,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        store: Arc<dyn CredentialStore>,
        client: reqwest::Client,
        base_url: String,
        timeout: Duration,
        writes: WriteLock,
        broadcaster: Arc<AuthStateBroadcaster>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                base_url,
                timeout,
                writes,
                broadcaster,
                pending: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Get a newly refreshed access token, joining an in-flight refresh when
    /// there is one.
    ///
    /// `None` means no token could be obtained: nothing to refresh with, the
    /// server refused, the call failed or timed out, the new pair could not be
    /// stored, or the session was ended while the call was running. By the time
    /// `None` is returned the session-ended procedure has already run.
    pub async fn ensure_fresh_access_token(&self) -> Option<String> {
        let future = {
            let mut pending = self.inner.pending.lock().await;
            match pending.as_ref() {
                Some(live) => {
                    debug!(refresh_id = live.id, "joining in-flight refresh");
                    live.future.clone()
                }
                None => match self.inner.store.get(TokenKind::Refresh).await {
                    Some(refresh) => {
                        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                        let future = self.start(id, refresh);
                        *pending = Some(PendingRefresh {
                            id,
                            future: future.clone(),
                        });
                        future
                    }
                    None => {
                        debug!("no refresh token stored, nothing to refresh");
                        metrics::record_refresh(RefreshOutcome::NoRefreshToken);
                        self.end_without_refresh()
                    }
                },
            }
        };
        future.await
    }

    /// Whether a refresh cycle is currently live.
    pub async fn is_refreshing(&self) -> bool {
        self.inner.pending.lock().await.is_some()
    }

    /// Spawn refresh cycle `id` and wrap its handle in a shareable future.
    fn start(&self, id: u64, refresh: String) -> SharedRefresh {
        let generation = self.inner.broadcaster.begin_refresh();
        let task_inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let token = task_inner.run(id, refresh).await;
            task_inner.report(generation, token.is_some()).await;
            task_inner.settle(id).await;
            token
        });

        let inner = self.inner.clone();
        async move {
            match handle.await {
                Ok(token) => token,
                Err(e) => {
                    error!(refresh_id = id, error = %e, "refresh task failed");
                    inner.report(generation, false).await;
                    inner.settle(id).await;
                    None
                }
            }
        }
        .boxed()
        .shared()
    }

    /// End the session for a 401 that has nothing to refresh with. No cycle is
    /// registered, so nobody joins this; the spawned task still finishes if the
    /// caller goes away.
    fn end_without_refresh(&self) -> SharedRefresh {
        let generation = self.inner.broadcaster.begin_refresh();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.report(generation, false).await });
        async move {
            if let Err(e) = handle.await {
                error!(error = %e, "session end task failed");
            }
            None
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn run(&self, id: u64, refresh: String) -> Option<String> {
        info!(refresh_id = id, "refreshing access token");
        let result =
            session_auth::refresh_token(&self.client, &self.base_url, &refresh, self.timeout)
                .await;

        let _writes = self.writes.lock().await;
        let current = self.store.get(TokenKind::Refresh).await;
        if current.as_deref() != Some(refresh.as_str()) {
            metrics::record_refresh(RefreshOutcome::Superseded);
            let access = match current {
                Some(_) => self.store.get(TokenKind::Access).await,
                None => None,
            };
            info!(
                refresh_id = id,
                signed_in = access.is_some(),
                "credentials changed during refresh, discarding result"
            );
            return access;
        }

        match result {
            Ok(response) => {
                let rotated = response.refresh.is_some();
                let credentials =
                    Credentials::new(response.access, response.refresh.unwrap_or(refresh));
                let access = credentials.access.clone();
                match self.store.set(credentials).await {
                    Ok(()) => {
                        metrics::record_refresh(RefreshOutcome::Refreshed);
                        info!(refresh_id = id, rotated, "access token refreshed");
                        Some(access)
                    }
                    Err(e) => {
                        metrics::record_refresh(RefreshOutcome::StoreFailed);
                        error!(refresh_id = id, error = %e, "failed to persist refreshed token");
                        None
                    }
                }
            }
            Err(session_auth::Error::InvalidCredentials(msg)) => {
                metrics::record_refresh(RefreshOutcome::Rejected);
                warn!(refresh_id = id, error = %msg, "refresh token rejected");
                None
            }
            Err(session_auth::Error::Timeout(msg)) => {
                metrics::record_refresh(RefreshOutcome::Timeout);
                warn!(refresh_id = id, error = %msg, "token refresh timed out");
                None
            }
            Err(e) => {
                metrics::record_refresh(RefreshOutcome::Transport);
                warn!(refresh_id = id, error = %e, "token refresh failed");
                None
            }
        }
    }

    /// Hand the cycle outcome to the broadcaster. Clear failures are logged
    /// there.
    async fn report(&self, generation: u64, refreshed: bool) {
        let event = if refreshed {
            SessionEvent::RefreshSucceeded
        } else {
            SessionEvent::RefreshFailed
        };
        let _ = self.broadcaster.finish_refresh(generation, event).await;
    }

    /// Clear the slot if it still holds cycle `id`.
    async fn settle(&self, id: u64) {
        let mut pending = self.pending.lock().await;
        if pending.as_ref().is_some_and(|live| live.id == id) {
            *pending = None;
            debug!(refresh_id = id, "refresh settled");
        }
    }
}
