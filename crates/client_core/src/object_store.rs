use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{
    config::{ConfigError, Settings},
    upload::{ObjectStore, ResumableSession, UploadError},
};

const UPLOAD_PROTOCOL: &str = "X-Goog-Upload-Protocol";
const UPLOAD_COMMAND: &str = "X-Goog-Upload-Command";
const UPLOAD_OFFSET: &str = "X-Goog-Upload-Offset";
const UPLOAD_URL: &str = "X-Goog-Upload-URL";
const UPLOAD_SIZE_RECEIVED: &str = "X-Goog-Upload-Size-Received";
const UPLOAD_CONTENT_LENGTH: &str = "X-Goog-Upload-Header-Content-Length";
const UPLOAD_CONTENT_TYPE: &str = "X-Goog-Upload-Header-Content-Type";

#[derive(Debug, Serialize)]
struct StartUploadBody<'a> {
    name: &'a str,
    #[serde(rename = "contentType")]
    content_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct ObjectMetadata {
    #[serde(rename = "downloadTokens", default)]
    download_tokens: Option<String>,
}

/// Firebase Storage REST client using the resumable upload protocol.
pub struct HttpObjectStore {
    http: Client,
    endpoint: Url,
    bucket: String,
    api_key: String,
    size_limit: u64,
}

impl HttpObjectStore {
    pub fn new(
        http: Client,
        endpoint: Url,
        bucket: impl Into<String>,
        api_key: impl Into<String>,
        size_limit: u64,
    ) -> Self {
        Self {
            http,
            endpoint,
            bucket: bucket.into(),
            api_key: api_key.into(),
            size_limit,
        }
    }

    /// Fails with [`ConfigError::MissingApiKey`] instead of building a client
    /// that would be refused on first use.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let api_key = settings.storage.require_api_key()?.to_string();
        let endpoint = settings.storage.endpoint_url()?;
        Ok(Self::new(
            Client::new(),
            endpoint,
            settings.storage.bucket.clone(),
            api_key,
            settings.max_upload_bytes,
        ))
    }

    /// `{endpoint}/v0/b/{bucket}/o[/{key}]`, with the key as one encoded segment.
    fn object_url(&self, key: Option<&str>) -> Result<Url, UploadError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                UploadError::Protocol(format!("endpoint '{}' cannot be a base", self.endpoint))
            })?;
            segments
                .pop_if_empty()
                .extend(["v0", "b", self.bucket.as_str(), "o"]);
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    fn check_status(&self, res: Response, size: u64) -> Result<Response, UploadError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        Err(match status {
            StatusCode::PAYLOAD_TOO_LARGE => UploadError::TooLarge {
                size,
                limit: self.size_limit,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                UploadError::Rejected(format!("storage responded with status {status}"))
            }
            _ => UploadError::Transport(format!("storage responded with status {status}")),
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn open_session(
        &self,
        key: &str,
        total_bytes: u64,
        content_type: &str,
    ) -> Result<ResumableSession, UploadError> {
        let mut url = self.object_url(None)?;
        url.query_pairs_mut()
            .append_pair("name", key)
            .append_pair("uploadType", "resumable")
            .append_pair("key", &self.api_key);

        let res = self
            .http
            .post(url)
            .header(UPLOAD_PROTOCOL, "resumable")
            .header(UPLOAD_COMMAND, "start")
            .header(UPLOAD_CONTENT_LENGTH, total_bytes.to_string())
            .header(UPLOAD_CONTENT_TYPE, content_type)
            .json(&StartUploadBody {
                name: key,
                content_type,
            })
            .send()
            .await?;
        let res = self.check_status(res, total_bytes)?;

        let session_url = res
            .headers()
            .get(UPLOAD_URL)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| UploadError::Protocol(format!("missing {UPLOAD_URL} header")))?
            .to_string();
        debug!(key, "resumable session opened");

        Ok(ResumableSession {
            key: key.to_string(),
            session_url,
            total_bytes,
        })
    }

    async fn send_chunk(
        &self,
        session: &ResumableSession,
        offset: u64,
        chunk: &[u8],
        finalize: bool,
    ) -> Result<u64, UploadError> {
        let command = if finalize { "upload, finalize" } else { "upload" };
        let res = self
            .http
            .post(&session.session_url)
            .header(UPLOAD_COMMAND, command)
            .header(UPLOAD_OFFSET, offset.to_string())
            .body(chunk.to_vec())
            .send()
            .await?;
        let res = self.check_status(res, session.total_bytes)?;

        let committed = res
            .headers()
            .get(UPLOAD_SIZE_RECEIVED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(offset + chunk.len() as u64);
        Ok(committed)
    }

    async fn download_url(&self, session: &ResumableSession) -> Result<Url, UploadError> {
        let mut metadata_url = self.object_url(Some(&session.key))?;
        metadata_url
            .query_pairs_mut()
            .append_pair("key", &self.api_key);

        let res = self.http.get(metadata_url).send().await?;
        let metadata: ObjectMetadata = self.check_status(res, session.total_bytes)?.json().await?;

        let token = metadata
            .download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').next())
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                UploadError::Protocol(format!("object '{}' has no download token", session.key))
            })?;

        let mut public = self.object_url(Some(&session.key))?;
        public
            .query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("token", token);
        Ok(public)
    }
}

#[cfg(test)]
#[path = "tests/object_store_tests.rs"]
mod tests;
