//! Auth state broadcasting
//!
//! Holds the session state and the single auth-state subscriber. Events go
//! through `record`, which applies `session::handle_event` under a lock and
//! then performs the resulting action outside it.
//!
//! Every login and logout starts a new session generation. A refresh cycle
//! remembers the generation it began in, and its outcome is dropped if the
//! session was replaced meanwhile. Clearing credentials re-checks the
//! generation under the store write lock, so a session end that lost the race
//! against a new login leaves the new credentials alone.

use std::sync::{Arc, Mutex, MutexGuard};

use session_auth::CredentialStore;
use tracing::{debug, error, info};

use crate::metrics;
use crate::refresh::WriteLock;
use crate::session::{EndReason, SessionAction, SessionEvent, SessionState, handle_event};

/// Callback invoked with `false` when the session ends.
pub type AuthStateCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct Session {
    state: SessionState,
    generation: u64,
}

/// Single-subscriber notifier for "session ended" transitions.
///
/// Registering replaces the previous subscriber without calling either one.
/// Nothing is queued: a transition with no subscriber registered is simply
/// not observed by anyone.
pub struct AuthStateBroadcaster {
    store: Arc<dyn CredentialStore>,
    writes: WriteLock,
    session: Mutex<Session>,
    subscriber: Mutex<Option<AuthStateCallback>>,
}

impl AuthStateBroadcaster {
    pub(crate) fn new(
        store: Arc<dyn CredentialStore>,
        writes: WriteLock,
        initial: SessionState,
    ) -> Self {
        Self {
            store,
            writes,
            session: Mutex::new(Session {
                state: initial,
                generation: 0,
            }),
            subscriber: Mutex::new(None),
        }
    }

    /// Install `callback` as the only subscriber.
    pub fn register(&self, callback: AuthStateCallback) {
        let previous = lock(&self.subscriber).replace(callback);
        debug!(replaced = previous.is_some(), "auth state subscriber registered");
    }

    /// Drop the current subscriber, if any.
    pub fn unregister(&self) {
        if lock(&self.subscriber).take().is_some() {
            debug!("auth state subscriber unregistered");
        }
    }

    pub fn has_subscriber(&self) -> bool {
        lock(&self.subscriber).is_some()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.session).state
    }

    /// Apply `event` to the session state and carry out the resulting action.
    ///
    /// Returns the action taken. An `Err` means the credential store could not
    /// be cleared; the subscriber has still been notified in that case.
    pub async fn record(&self, event: SessionEvent) -> session_auth::Result<SessionAction> {
        let Some((action, generation)) = self.transition(event, None) else {
            return Ok(SessionAction::None);
        };
        self.perform(action, generation).await?;
        Ok(action)
    }

    /// Mark the start of a refresh cycle and return the session generation
    /// its outcome belongs to.
    pub(crate) fn begin_refresh(&self) -> u64 {
        let mut session = lock(&self.session);
        let (to, _) = handle_event(session.state, SessionEvent::UnauthorizedSeen);
        if session.state != to {
            debug!(from = session.state.label(), to = to.label(), "session state changed");
        }
        session.state = to;
        session.generation
    }

    /// Apply the outcome of a refresh cycle begun in `generation`.
    ///
    /// Outcomes from a session that a login or logout has since replaced are
    /// dropped.
    pub(crate) async fn finish_refresh(
        &self,
        generation: u64,
        event: SessionEvent,
    ) -> session_auth::Result<SessionAction> {
        let Some((action, generation)) = self.transition(event, Some(generation)) else {
            return Ok(SessionAction::None);
        };
        self.perform(action, generation).await?;
        Ok(action)
    }

    /// Session-ended procedure: clear credentials, then tell the subscriber.
    ///
    /// The subscriber runs even when clearing fails; the clear error is
    /// returned afterwards.
    pub async fn notify_session_ended(&self, reason: EndReason) -> session_auth::Result<()> {
        let generation = lock(&self.session).generation;
        self.end_session(reason, generation).await
    }

    /// Move the state machine. `None` when `expected` names a generation that
    /// is no longer current.
    fn transition(
        &self,
        event: SessionEvent,
        expected: Option<u64>,
    ) -> Option<(SessionAction, u64)> {
        let mut session = lock(&self.session);
        if expected.is_some_and(|generation| generation != session.generation) {
            debug!(event = ?event, "session replaced since refresh began, ignoring outcome");
            return None;
        }

        let from = session.state;
        let (to, action) = handle_event(from, event);
        session.state = to;
        if matches!(event, SessionEvent::LoggedIn | SessionEvent::LoggedOut) {
            session.generation += 1;
        }
        if from != to {
            debug!(
                event = ?event,
                from = from.label(),
                to = to.label(),
                "session state changed"
            );
        }
        Some((action, session.generation))
    }

    async fn perform(&self, action: SessionAction, generation: u64) -> session_auth::Result<()> {
        match action {
            SessionAction::EndSession(reason) => self.end_session(reason, generation).await,
            SessionAction::ClearOnly => self.clear_credentials(generation).await,
            SessionAction::None => Ok(()),
        }
    }

    async fn end_session(&self, reason: EndReason, generation: u64) -> session_auth::Result<()> {
        let cleared = self.clear_credentials(generation).await;
        metrics::record_session_ended(reason);

        let subscriber = lock(&self.subscriber).clone();
        match subscriber {
            Some(callback) => {
                info!(reason = reason.label(), "session ended, notifying subscriber");
                callback(false);
            }
            None => info!(reason = reason.label(), "session ended, no subscriber registered"),
        }
        cleared
    }

    async fn clear_credentials(&self, generation: u64) -> session_auth::Result<()> {
        let _writes = self.writes.lock().await;
        if lock(&self.session).generation != generation {
            debug!("new session stored before clear, keeping its credentials");
            return Ok(());
        }
        self.store.clear().await.inspect_err(|e| {
            error!(error = %e, "failed to clear stored credentials");
        })
    }
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Both guarded values are plain data that stay valid across a panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
