//! Session snapshot, the events that move it, and the single-writer store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{domain::UserRecord, error::ErrorInfo};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SignIn,
    UpdateProfile,
    DeleteAccount,
}

/// Where the last action stands. Replaces separate loading/error flags so a
/// pending action can never also carry an error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Pending(ActionKind),
    Resolved,
    Rejected(ErrorInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub current_user: Option<UserRecord>,
    pub status: SessionStatus,
}

impl SessionSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn current_user(&self) -> Option<&UserRecord> {
        self.current_user.as_ref()
    }

    pub fn loading(&self) -> bool {
        matches!(self.status, SessionStatus::Pending(_))
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match &self.status {
            SessionStatus::Rejected(error) => Some(error),
            _ => None,
        }
    }
}

/// Wire form is `{"type": ..., "payload": ...}` with snake_case tags. Decoding
/// goes through [`RawSessionEvent`] so an unknown tag becomes
/// [`SessionEvent::Unrecognized`] whatever payload it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    try_from = "RawSessionEvent"
)]
pub enum SessionEvent {
    SignInStart,
    SignInSuccess(UserRecord),
    SignInFailure(ErrorInfo),
    UpdateUserStart,
    UpdateUserSuccess(UserRecord),
    UpdateUserFailure(ErrorInfo),
    DeleteUserStart,
    DeleteUserSuccess,
    DeleteUserFailure(ErrorInfo),
    SignOut,
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct RawSessionEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl TryFrom<RawSessionEvent> for SessionEvent {
    type Error = serde_json::Error;

    fn try_from(raw: RawSessionEvent) -> Result<Self, Self::Error> {
        let RawSessionEvent { kind, payload } = raw;
        let event = match kind.as_str() {
            "sign_in_start" => Self::SignInStart,
            "sign_in_success" => Self::SignInSuccess(serde_json::from_value(payload)?),
            "sign_in_failure" => Self::SignInFailure(ErrorInfo::from(payload)),
            "update_user_start" => Self::UpdateUserStart,
            "update_user_success" => Self::UpdateUserSuccess(serde_json::from_value(payload)?),
            "update_user_failure" => Self::UpdateUserFailure(ErrorInfo::from(payload)),
            "delete_user_start" => Self::DeleteUserStart,
            "delete_user_success" => Self::DeleteUserSuccess,
            "delete_user_failure" => Self::DeleteUserFailure(ErrorInfo::from(payload)),
            "sign_out" => Self::SignOut,
            _ => Self::Unrecognized,
        };
        Ok(event)
    }
}

impl SessionEvent {
    pub fn started(action: ActionKind) -> Self {
        match action {
            ActionKind::SignIn => Self::SignInStart,
            ActionKind::UpdateProfile => Self::UpdateUserStart,
            ActionKind::DeleteAccount => Self::DeleteUserStart,
        }
    }

    pub fn failed(action: ActionKind, error: ErrorInfo) -> Self {
        match action {
            ActionKind::SignIn => Self::SignInFailure(error),
            ActionKind::UpdateProfile => Self::UpdateUserFailure(error),
            ActionKind::DeleteAccount => Self::DeleteUserFailure(error),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SignInStart => "sign_in_start",
            Self::SignInSuccess(_) => "sign_in_success",
            Self::SignInFailure(_) => "sign_in_failure",
            Self::UpdateUserStart => "update_user_start",
            Self::UpdateUserSuccess(_) => "update_user_success",
            Self::UpdateUserFailure(_) => "update_user_failure",
            Self::DeleteUserStart => "delete_user_start",
            Self::DeleteUserSuccess => "delete_user_success",
            Self::DeleteUserFailure(_) => "delete_user_failure",
            Self::SignOut => "sign_out",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Pure transition function. Same inputs always give the same snapshot.
pub fn reduce(snapshot: &SessionSnapshot, event: &SessionEvent) -> SessionSnapshot {
    let pending = |action| SessionSnapshot {
        current_user: snapshot.current_user.clone(),
        status: SessionStatus::Pending(action),
    };
    let rejected = |error: &ErrorInfo| SessionSnapshot {
        current_user: snapshot.current_user.clone(),
        status: SessionStatus::Rejected(error.clone()),
    };
    let resolved = |user: Option<&UserRecord>| SessionSnapshot {
        current_user: user.cloned(),
        status: SessionStatus::Resolved,
    };

    match event {
        SessionEvent::SignInStart => pending(ActionKind::SignIn),
        SessionEvent::UpdateUserStart => pending(ActionKind::UpdateProfile),
        SessionEvent::DeleteUserStart => pending(ActionKind::DeleteAccount),
        SessionEvent::SignInSuccess(user) | SessionEvent::UpdateUserSuccess(user) => {
            resolved(Some(user))
        }
        SessionEvent::DeleteUserSuccess => resolved(None),
        SessionEvent::SignInFailure(error)
        | SessionEvent::UpdateUserFailure(error)
        | SessionEvent::DeleteUserFailure(error) => rejected(error),
        SessionEvent::SignOut => SessionSnapshot::empty(),
        SessionEvent::Unrecognized => snapshot.clone(),
    }
}

/// Shared session context. Cloning hands out another handle to the same
/// state; the only way to change it is [`SessionStore::dispatch`].
#[derive(Clone)]
pub struct SessionStore {
    state: Arc<watch::Sender<SessionSnapshot>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_snapshot(SessionSnapshot::empty())
    }

    pub fn with_snapshot(snapshot: SessionSnapshot) -> Self {
        let (state, _) = watch::channel(snapshot);
        Self {
            state: Arc::new(state),
        }
    }

    /// Applies `event` through [`reduce`] under the channel lock and returns
    /// the resulting snapshot.
    pub fn dispatch(&self, event: SessionEvent) -> SessionSnapshot {
        let mut next = SessionSnapshot::empty();
        self.state.send_modify(|current| {
            *current = reduce(current, &event);
            next = current.clone();
        });
        debug!(
            event = event.name(),
            loading = next.loading(),
            signed_in = next.current_user.is_some(),
            "session event applied"
        );
        next
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Change notifications for views and the route guard.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
