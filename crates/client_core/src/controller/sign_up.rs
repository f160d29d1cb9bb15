use std::sync::Arc;

use shared::{error::ErrorInfo, protocol::SignUpRequest};
use tracing::warn;

use super::LOADING_LABEL;
use crate::{api::AccountApi, error::ClientError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpField {
    Username,
    Email,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormStatus {
    #[default]
    Idle,
    Submitting,
    Succeeded,
    Failed(ErrorInfo),
}

/// Account creation does not sign the user in, so this controller keeps its
/// own status instead of going through the session store.
pub struct SignUpController {
    api: Arc<dyn AccountApi>,
    form: SignUpRequest,
    status: FormStatus,
}

impl SignUpController {
    pub fn new(api: Arc<dyn AccountApi>) -> Self {
        Self {
            api,
            form: SignUpRequest::default(),
            status: FormStatus::Idle,
        }
    }

    pub fn set_field(&mut self, field: SignUpField, value: impl Into<String>) {
        match field {
            SignUpField::Username => self.form.username = value.into(),
            SignUpField::Email => self.form.email = value.into(),
            SignUpField::Password => self.form.password = value.into(),
        }
    }

    /// On success the caller navigates to sign-in.
    pub async fn submit(&mut self) -> Result<(), ErrorInfo> {
        self.status = FormStatus::Submitting;
        let outcome = match self.validate() {
            Ok(()) => self.api.sign_up(&self.form).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                self.status = FormStatus::Succeeded;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "sign-up failed");
                let info = ErrorInfo::from(&err);
                self.status = FormStatus::Failed(info.clone());
                Err(info)
            }
        }
    }

    fn validate(&self) -> Result<(), ClientError> {
        let missing = [
            &self.form.username,
            &self.form.email,
            &self.form.password,
        ]
        .iter()
        .any(|value| value.trim().is_empty());
        if missing {
            return Err(ClientError::Validation(
                "Username, email and password are required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn status(&self) -> &FormStatus {
        &self.status
    }

    pub fn submit_label(&self) -> &'static str {
        if self.status == FormStatus::Submitting {
            LOADING_LABEL
        } else {
            "Sign Up"
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            FormStatus::Failed(error) => Some(&error.message),
            _ => None,
        }
    }
}
