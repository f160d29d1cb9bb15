//! View controllers: local input buffers plus the start → request → terminal
//! event sequence against the session store.

use std::future::Future;

use shared::error::ErrorInfo;
use tracing::warn;

use crate::{
    error::ClientError,
    session::{ActionKind, SessionEvent, SessionStore},
};

pub mod profile;
pub mod sign_in;
pub mod sign_up;

pub use profile::{ProfileController, ProfileField, UploadStatus};
pub use sign_in::{SignInController, SignInField};
pub use sign_up::{FormStatus, SignUpController, SignUpField};

pub const LOADING_LABEL: &str = "Loading...";

/// Dispatches the start event, awaits `call`, then dispatches exactly one
/// terminal event. `call` is lazy, so nothing goes out before the start event.
pub(crate) async fn run_action<T, Fut>(
    store: &SessionStore,
    action: ActionKind,
    call: Fut,
    on_success: impl FnOnce(&T) -> SessionEvent,
) -> Result<T, ErrorInfo>
where
    Fut: Future<Output = Result<T, ClientError>>,
{
    store.dispatch(SessionEvent::started(action));
    match call.await {
        Ok(value) => {
            store.dispatch(on_success(&value));
            Ok(value)
        }
        Err(err) => {
            warn!(?action, error = %err, "account action failed");
            let info = ErrorInfo::from(&err);
            store.dispatch(SessionEvent::failed(action, info.clone()));
            Err(info)
        }
    }
}

#[cfg(test)]
#[path = "../tests/controller_tests.rs"]
mod tests;
