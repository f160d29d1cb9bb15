use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";

/// Displayable failure. Failure payloads arrive either as a bare string or as
/// an object carrying `message`; both normalize into this shape, anything else
/// becomes the generic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct ErrorInfo {
    pub message: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            return Self::generic();
        }
        Self { message }
    }

    pub fn generic() -> Self {
        Self {
            message: GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::String(message) => Self::new(message.as_str()),
            Value::Object(fields) => match fields.get("message") {
                Some(Value::String(message)) => Self::new(message.as_str()),
                _ => Self::generic(),
            },
            _ => Self::generic(),
        }
    }
}

impl From<Value> for ErrorInfo {
    fn from(value: Value) -> Self {
        Self::from_payload(&value)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
