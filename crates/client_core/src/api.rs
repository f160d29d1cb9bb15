use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{UserId, UserRecord},
    error::ErrorInfo,
    protocol::{is_rejected, open_envelope, SignInRequest, SignUpRequest, UpdateUserRequest},
};
use tracing::info;

use crate::error::ClientError;

/// Remote account API. Every call reports the envelope's own verdict: a body
/// with `success: false` is an error even on a 2xx response.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn sign_in(&self, credentials: &SignInRequest) -> Result<UserRecord, ClientError>;
    async fn sign_up(&self, request: &SignUpRequest) -> Result<(), ClientError>;
    async fn sign_out(&self) -> Result<(), ClientError>;
    async fn update_user(
        &self,
        user_id: &UserId,
        changes: &UpdateUserRequest,
    ) -> Result<UserRecord, ClientError>;
    async fn delete_user(&self, user_id: &UserId) -> Result<(), ClientError>;
}

pub struct HttpAccountApi {
    http: Client,
    base_url: String,
}

impl HttpAccountApi {
    /// The client keeps a cookie store: the backend authenticates update and
    /// delete through the session cookie issued on sign-in.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder().cookie_store(true).build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AccountApi for HttpAccountApi {
    async fn sign_in(&self, credentials: &SignInRequest) -> Result<UserRecord, ClientError> {
        let res = self
            .http
            .post(format!("{}/api/auth/signin", self.base_url))
            .json(credentials)
            .send()
            .await?;
        let user: UserRecord = read_envelope(res).await?;
        info!(user_id = %user.id, "signed in");
        Ok(user)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<(), ClientError> {
        let res = self
            .http
            .post(format!("{}/api/auth/signup", self.base_url))
            .json(request)
            .send()
            .await?;
        let _: Value = read_envelope(res).await?;
        info!(username = %request.username, "account created");
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ClientError> {
        let res = self
            .http
            .get(format!("{}/api/auth/signout", self.base_url))
            .send()
            .await?;
        let _: Value = read_envelope(res).await?;
        Ok(())
    }

    async fn update_user(
        &self,
        user_id: &UserId,
        changes: &UpdateUserRequest,
    ) -> Result<UserRecord, ClientError> {
        let res = self
            .http
            .post(format!("{}/api/user/update/{user_id}", self.base_url))
            .json(changes)
            .send()
            .await?;
        let user: UserRecord = read_envelope(res).await?;
        info!(user_id = %user.id, revision = user.revision, "profile updated");
        Ok(user)
    }

    async fn delete_user(&self, user_id: &UserId) -> Result<(), ClientError> {
        let res = self
            .http
            .delete(format!("{}/api/user/delete/{user_id}", self.base_url))
            .send()
            .await?;
        let _: Value = read_envelope(res).await?;
        info!(user_id = %user_id, "account deleted");
        Ok(())
    }
}

/// Reads a response body as an envelope. A JSON body decides the outcome
/// through its `success` flag; an error status with a JSON body lacking the
/// flag is still an application failure, and a non-JSON error body is
/// reported by status alone.
async fn read_envelope<T: DeserializeOwned>(res: Response) -> Result<T, ClientError> {
    let status = res.status();
    let bytes = res.bytes().await?;

    let body: Value = match serde_json::from_slice(&bytes) {
        Ok(body) => body,
        Err(_) if !status.is_success() => return Err(ClientError::Status(status)),
        Err(err) if bytes.is_empty() => {
            // Acknowledgment-only endpoints may reply with an empty 2xx body.
            return serde_json::from_value(Value::Null).map_err(|_| ClientError::Decode(err));
        }
        Err(err) => return Err(ClientError::Decode(err)),
    };

    if !status.is_success() && !is_rejected(&body) {
        return Err(ClientError::Application {
            message: ErrorInfo::from_payload(&body).message,
        });
    }

    Ok(open_envelope(body)?)
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
