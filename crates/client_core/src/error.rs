use reqwest::StatusCode;
use shared::{error::ErrorInfo, protocol::EnvelopeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(StatusCode),
    #[error("{message}")]
    Application { message: String },
    #[error("malformed response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<EnvelopeError> for ClientError {
    fn from(value: EnvelopeError) -> Self {
        match value {
            EnvelopeError::Rejected(info) => Self::Application {
                message: info.message,
            },
            EnvelopeError::Malformed(err) => Self::Decode(err),
        }
    }
}

impl From<&ClientError> for ErrorInfo {
    fn from(value: &ClientError) -> Self {
        ErrorInfo::new(value.to_string())
    }
}

impl From<ClientError> for ErrorInfo {
    fn from(value: ClientError) -> Self {
        ErrorInfo::from(&value)
    }
}
