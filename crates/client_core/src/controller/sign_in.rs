use std::sync::Arc;

use shared::{domain::UserRecord, error::ErrorInfo, protocol::SignInRequest};

use super::{run_action, LOADING_LABEL};
use crate::{
    api::AccountApi,
    session::{ActionKind, SessionEvent, SessionStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInField {
    Email,
    Password,
}

pub struct SignInController {
    api: Arc<dyn AccountApi>,
    store: SessionStore,
    form: SignInRequest,
}

impl SignInController {
    pub fn new(api: Arc<dyn AccountApi>, store: SessionStore) -> Self {
        Self {
            api,
            store,
            form: SignInRequest::default(),
        }
    }

    pub fn set_field(&mut self, field: SignInField, value: impl Into<String>) {
        match field {
            SignInField::Email => self.form.email = value.into(),
            SignInField::Password => self.form.password = value.into(),
        }
    }

    /// On success the caller navigates home.
    pub async fn submit(&self) -> Result<UserRecord, ErrorInfo> {
        run_action(
            &self.store,
            ActionKind::SignIn,
            self.api.sign_in(&self.form),
            |user: &UserRecord| SessionEvent::SignInSuccess(user.clone()),
        )
        .await
    }

    pub fn can_submit(&self) -> bool {
        !self.store.snapshot().loading()
    }

    pub fn submit_label(&self) -> &'static str {
        if self.store.snapshot().loading() {
            LOADING_LABEL
        } else {
            "Sign In"
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.store
            .snapshot()
            .error()
            .map(|error| error.message.clone())
    }
}
