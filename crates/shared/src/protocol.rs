use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ErrorInfo;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Partial profile update; only populated fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(
        rename = "profilePicture",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_picture: Option<String>,
}

impl UpdateUserRequest {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password.is_none()
            && self.profile_picture.is_none()
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("{0}")]
    Rejected(ErrorInfo),
    #[error("malformed response payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// True when the body is an object whose `success` flag is explicitly false.
/// A missing flag is not a failure.
pub fn is_rejected(body: &Value) -> bool {
    body.get("success").and_then(Value::as_bool) == Some(false)
}

/// Opens a `{success, ...}` envelope. The envelope's own flag decides the
/// outcome; the transport status is the caller's concern.
pub fn open_envelope<T: DeserializeOwned>(body: Value) -> Result<T, EnvelopeError> {
    if is_rejected(&body) {
        return Err(EnvelopeError::Rejected(ErrorInfo::from_payload(&body)));
    }
    Ok(serde_json::from_value(body)?)
}
