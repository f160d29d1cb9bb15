use std::sync::Arc;

use futures::StreamExt;
use shared::{
    domain::{UserId, UserRecord},
    error::ErrorInfo,
    protocol::UpdateUserRequest,
};
use tracing::{info, warn};
use url::Url;

use super::{run_action, LOADING_LABEL};
use crate::{
    api::AccountApi,
    error::ClientError,
    session::{ActionKind, SessionEvent, SessionStore},
    upload::{UploadCoordinator, UploadError, UploadEvent, UploadRequest, UploadTask},
};

const NOT_SIGNED_IN: &str = "You must be signed in";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Username,
    Email,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UploadStatus {
    #[default]
    Idle,
    InProgress(u8),
    Completed,
    Failed(String),
}

pub fn upload_failure_message(err: &UploadError) -> String {
    match err {
        UploadError::TooLarge { .. } => format!("Error uploading image ({err})"),
        _ => "Error uploading image".to_string(),
    }
}

pub struct ProfileController {
    api: Arc<dyn AccountApi>,
    store: SessionStore,
    uploads: UploadCoordinator,
    form: UpdateUserRequest,
    upload_status: UploadStatus,
    active_upload: Option<u64>,
    update_succeeded: bool,
}

impl ProfileController {
    pub fn new(api: Arc<dyn AccountApi>, store: SessionStore, uploads: UploadCoordinator) -> Self {
        Self {
            api,
            store,
            uploads,
            form: UpdateUserRequest::default(),
            upload_status: UploadStatus::Idle,
            active_upload: None,
            update_succeeded: false,
        }
    }

    /// A blank value drops the pending change for that field.
    pub fn set_field(&mut self, field: ProfileField, value: impl Into<String>) {
        let value = value.into();
        let value = (!value.trim().is_empty()).then_some(value);
        match field {
            ProfileField::Username => self.form.username = value,
            ProfileField::Email => self.form.email = value,
            ProfileField::Password => self.form.password = value,
        }
    }

    pub fn pending_changes(&self) -> &UpdateUserRequest {
        &self.form
    }

    /// Starts an avatar transfer and makes it the one whose events count.
    /// Events from an older task passed to [`Self::apply_upload_event`] are
    /// ignored.
    pub async fn begin_avatar_upload(
        &mut self,
        payload: Vec<u8>,
        original_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Result<UploadTask, UploadError> {
        let request = UploadRequest {
            payload,
            original_name: original_name.into(),
            content_type: content_type.into(),
        };
        match self.uploads.start(request).await {
            Ok(task) => {
                self.active_upload = Some(task.id());
                self.upload_status = UploadStatus::InProgress(0);
                Ok(task)
            }
            Err(err) => {
                warn!(error = %err, "avatar upload rejected");
                self.upload_status = UploadStatus::Failed(upload_failure_message(&err));
                Err(err)
            }
        }
    }

    /// Folds one upload event into the local status. Returns the outcome once
    /// the active task reaches its terminal event.
    pub fn apply_upload_event(
        &mut self,
        upload_id: u64,
        event: UploadEvent,
    ) -> Option<Result<Url, UploadError>> {
        if self.active_upload != Some(upload_id) {
            return None;
        }
        match event {
            UploadEvent::Progress(progress) => {
                let previous = match self.upload_status {
                    UploadStatus::InProgress(pct) => pct,
                    _ => 0,
                };
                self.upload_status =
                    UploadStatus::InProgress(progress.percentage().max(previous));
                None
            }
            UploadEvent::Completed(url) => {
                self.active_upload = None;
                self.form.profile_picture = Some(url.to_string());
                self.upload_status = UploadStatus::Completed;
                Some(Ok(url))
            }
            UploadEvent::Failed(err) => {
                self.active_upload = None;
                self.upload_status = UploadStatus::Failed(upload_failure_message(&err));
                Some(Err(err))
            }
        }
    }

    /// Uploads the avatar and drives the transfer to its terminal event. The
    /// resulting URL is sent with the next profile update.
    pub async fn upload_avatar(
        &mut self,
        payload: Vec<u8>,
        original_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Result<Url, UploadError> {
        let mut task = self
            .begin_avatar_upload(payload, original_name, content_type)
            .await?;
        let upload_id = task.id();
        while let Some(event) = task.next().await {
            if let Some(outcome) = self.apply_upload_event(upload_id, event) {
                return outcome;
            }
        }
        self.active_upload = None;
        self.upload_status =
            UploadStatus::Failed(upload_failure_message(&UploadError::Cancelled));
        Err(UploadError::Cancelled)
    }

    pub fn upload_status(&self) -> &UploadStatus {
        &self.upload_status
    }

    pub fn upload_status_text(&self) -> Option<String> {
        match &self.upload_status {
            UploadStatus::Failed(message) => Some(message.clone()),
            UploadStatus::InProgress(pct) if *pct > 0 => Some(format!("Uploading: {pct} %")),
            UploadStatus::Completed => Some("Image upload successfully".to_string()),
            _ => None,
        }
    }

    /// Freshly uploaded avatar first, then the stored one.
    pub fn avatar_url(&self) -> Option<String> {
        self.form.profile_picture.clone().or_else(|| {
            self.store
                .snapshot()
                .current_user
                .map(|user| user.avatar_url)
                .filter(|url| !url.is_empty())
        })
    }

    fn signed_in_user_id(&self) -> Result<UserId, ClientError> {
        self.store
            .snapshot()
            .current_user
            .map(|user| user.id)
            .ok_or_else(|| ClientError::Validation(NOT_SIGNED_IN.to_string()))
    }

    pub async fn submit_update(&mut self) -> Result<UserRecord, ErrorInfo> {
        self.update_succeeded = false;
        let api = Arc::clone(&self.api);
        let changes = self.form.clone();
        let user_id = self.signed_in_user_id();
        let call = async move {
            let user_id = user_id?;
            api.update_user(&user_id, &changes).await
        };

        let user = run_action(
            &self.store,
            ActionKind::UpdateProfile,
            call,
            |user: &UserRecord| SessionEvent::UpdateUserSuccess(user.clone()),
        )
        .await?;

        self.form = UpdateUserRequest::default();
        self.update_succeeded = true;
        Ok(user)
    }

    pub async fn delete_account(&mut self) -> Result<(), ErrorInfo> {
        let api = Arc::clone(&self.api);
        let user_id = self.signed_in_user_id();
        let call = async move {
            let user_id = user_id?;
            api.delete_user(&user_id).await
        };

        run_action(&self.store, ActionKind::DeleteAccount, call, |_: &()| {
            SessionEvent::DeleteUserSuccess
        })
        .await?;

        self.reset_local_state();
        Ok(())
    }

    /// Fire-and-forget by policy: the local session is cleared whatever the
    /// server answers, and a failed request is only logged.
    pub async fn sign_out(&mut self) {
        match self.api.sign_out().await {
            Ok(()) => info!("signed out"),
            Err(err) => warn!(error = %err, "sign-out request failed; clearing local session"),
        }
        self.store.dispatch(SessionEvent::SignOut);
        self.reset_local_state();
    }

    fn reset_local_state(&mut self) {
        self.form = UpdateUserRequest::default();
        self.upload_status = UploadStatus::Idle;
        self.active_upload = None;
        self.update_succeeded = false;
    }

    pub fn update_succeeded(&self) -> bool {
        self.update_succeeded
    }

    pub fn submit_label(&self) -> &'static str {
        if self.store.snapshot().loading() {
            LOADING_LABEL
        } else {
            "Update"
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.store
            .snapshot()
            .error()
            .map(|error| error.message.clone())
    }
}
