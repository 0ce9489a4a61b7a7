//! Session state machine
//!
//! Pure state machine: receives events, returns (new_state, action). The
//! broadcaster executes the I/O implied by each action (clearing credentials,
//! invoking the subscriber).
//!
//! ```text
//! Authenticated   --UnauthorizedSeen-->  RefreshInFlight
//! RefreshInFlight --RefreshSucceeded-->  Authenticated
//! RefreshInFlight --RefreshFailed----->  Unauthenticated   (EndSession)
//! any             --LoggedOut--------->  Unauthenticated   (EndSession)
//! Unauthenticated --LoggedIn---------->  Authenticated
//! ```
//!
//! `Unauthenticated` is terminal until a login. Each refresh cycle reports its
//! outcome once. A later cycle that finds nothing to refresh reports
//! `RefreshFailed` again, which only clears, so the subscriber hears about a
//! session end exactly once.

/// Where the client stands with respect to the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Holding credentials that have not (yet) been rejected.
    Authenticated,
    /// A 401 was seen and a refresh is being attempted.
    RefreshInFlight,
    /// No usable credentials. Requests go out unauthenticated and 401s fail
    /// fast until the next login.
    Unauthenticated,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Authenticated => "authenticated",
            SessionState::RefreshInFlight => "refresh_in_flight",
            SessionState::Unauthenticated => "unauthenticated",
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, SessionState::Unauthenticated)
    }
}

/// Events that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh cycle started after a 401 or a rejected verify
    UnauthorizedSeen,
    /// The coordinator produced a fresh access token
    RefreshSucceeded,
    /// The coordinator produced no token (rejected, unreachable, or no refresh token)
    RefreshFailed,
    /// Credentials from a successful login were stored
    LoggedIn,
    /// Explicit logout
    LoggedOut,
}

/// Why a session ended, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    RefreshFailed,
    Logout,
}

impl EndReason {
    pub fn label(&self) -> &'static str {
        match self {
            EndReason::RefreshFailed => "refresh_failed",
            EndReason::Logout => "logout",
        }
    }
}

/// Actions the caller should execute after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Clear credentials, then notify the subscriber with `false`
    EndSession(EndReason),
    /// Clear credentials without notifying (already unauthenticated)
    ClearOnly,
    /// No-op
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: SessionState, event: SessionEvent) -> (SessionState, SessionAction) {
    use SessionAction as A;
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Authenticated, E::UnauthorizedSeen) => (S::RefreshInFlight, A::None),
        (S::RefreshInFlight, E::RefreshSucceeded) => (S::Authenticated, A::None),

        (S::Authenticated | S::RefreshInFlight, E::RefreshFailed) => (
            S::Unauthenticated,
            A::EndSession(EndReason::RefreshFailed),
        ),
        (S::Unauthenticated, E::RefreshFailed) => (S::Unauthenticated, A::ClearOnly),

        (_, E::LoggedOut) => (S::Unauthenticated, A::EndSession(EndReason::Logout)),
        (_, E::LoggedIn) => (S::Authenticated, A::None),

        // Joiners of an in-flight refresh, late reports after the state already
        // moved, and 401s while unauthenticated change nothing.
        (state, _) => (state, A::None),
    }
}
