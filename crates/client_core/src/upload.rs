//! Resumable asset upload with progress reporting.
//!
//! A transfer is exposed as an [`UploadTask`]: a single-subscriber stream of
//! [`UploadEvent::Progress`] items ending in exactly one
//! [`UploadEvent::Completed`] or [`UploadEvent::Failed`]. Starting another
//! upload on the same [`UploadCoordinator`] cancels the one in flight.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;

const EVENT_BUFFER: usize = 32;
const MAX_STALLED_CHUNKS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("file is empty")]
    EmptyPayload,
    #[error("file size must be less than {} MB", whole_megabytes(.limit))]
    TooLarge { size: u64, limit: u64 },
    #[error("storage unreachable: {0}")]
    Transport(String),
    #[error("storage rejected the upload: {0}")]
    Rejected(String),
    #[error("storage protocol error: {0}")]
    Protocol(String),
    #[error("upload superseded by a newer upload")]
    Superseded,
    #[error("upload cancelled")]
    Cancelled,
}

fn whole_megabytes(bytes: &u64) -> u64 {
    bytes.div_ceil(1024 * 1024)
}

impl From<reqwest::Error> for UploadError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    /// `round(transferred / total * 100)` clamped to `0..=100`. A zero total
    /// reports 0 instead of dividing.
    pub fn percentage(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let total = u128::from(self.total_bytes);
        let transferred = u128::from(self.bytes_transferred.min(self.total_bytes));
        let rounded = (transferred * 100 + total / 2) / total;
        u8::try_from(rounded.min(100)).unwrap_or(100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Progress(UploadProgress),
    Completed(Url),
    Failed(UploadError),
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumableSession {
    pub key: String,
    pub session_url: String,
    pub total_bytes: u64,
}

/// Storage collaborator speaking a resumable protocol.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn open_session(
        &self,
        key: &str,
        total_bytes: u64,
        content_type: &str,
    ) -> Result<ResumableSession, UploadError>;

    /// Sends `chunk` starting at `offset` and returns how many bytes the store
    /// has committed so far. The next chunk resumes from that count.
    async fn send_chunk(
        &self,
        session: &ResumableSession,
        offset: u64,
        chunk: &[u8],
        finalize: bool,
    ) -> Result<u64, UploadError>;

    async fn download_url(&self, session: &ResumableSession) -> Result<Url, UploadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub chunk_bytes: u64,
}

impl UploadPolicy {
    pub fn new(max_bytes: u64, chunk_bytes: u64) -> Self {
        Self {
            max_bytes,
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.max_upload_bytes, settings.upload_chunk_bytes)
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub payload: Vec<u8>,
    pub original_name: String,
    pub content_type: String,
}

/// Millisecond timestamp followed by the file's base name.
pub fn storage_key(original_name: &str, now: DateTime<Utc>) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("upload");
    format!("{}{}", now.timestamp_millis(), base)
}

struct ActiveTransfer {
    id: u64,
    cancel: oneshot::Sender<()>,
}

pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    policy: UploadPolicy,
    active: Mutex<Option<ActiveTransfer>>,
    next_id: AtomicU64,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, policy: UploadPolicy) -> Self {
        Self {
            store,
            policy,
            active: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> UploadPolicy {
        self.policy
    }

    /// Validates the payload, cancels any transfer still in flight and spawns
    /// the new one. Preflight rejections leave the in-flight transfer alone.
    pub async fn start(&self, request: UploadRequest) -> Result<UploadTask, UploadError> {
        let size = request.payload.len() as u64;
        if size == 0 {
            return Err(UploadError::EmptyPayload);
        }
        if size > self.policy.max_bytes {
            return Err(UploadError::TooLarge {
                size,
                limit: self.policy.max_bytes,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let key = storage_key(&request.original_name, Utc::now());
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        {
            let mut active = self.active.lock().await;
            let previous = active.replace(ActiveTransfer {
                id,
                cancel: cancel_tx,
            });
            if let Some(previous) = previous {
                if previous.cancel.send(()).is_ok() {
                    info!(
                        upload_id = previous.id,
                        superseded_by = id,
                        "cancelling in-flight upload"
                    );
                }
            }
        }

        info!(upload_id = id, key = %key, size, "upload started");
        tokio::spawn(run_transfer(
            Arc::clone(&self.store),
            self.policy,
            id,
            key.clone(),
            request,
            events_tx,
            cancel_rx,
        ));

        Ok(UploadTask {
            id,
            key,
            events: ReceiverStream::new(events_rx),
        })
    }
}

async fn run_transfer(
    store: Arc<dyn ObjectStore>,
    policy: UploadPolicy,
    id: u64,
    key: String,
    request: UploadRequest,
    events: mpsc::Sender<UploadEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    let outcome = tokio::select! {
        biased;
        signal = &mut cancel => match signal {
            Ok(()) => Err(UploadError::Superseded),
            Err(_) => Err(UploadError::Cancelled),
        },
        _ = events.closed() => Err(UploadError::Cancelled),
        result = transfer(store.as_ref(), policy, &key, &request, &events) => result,
    };

    let terminal = match outcome {
        Ok(url) => {
            info!(upload_id = id, key = %key, "upload completed");
            UploadEvent::Completed(url)
        }
        Err(err) => {
            warn!(upload_id = id, key = %key, error = %err, "upload failed");
            UploadEvent::Failed(err)
        }
    };
    // The subscriber may already be gone.
    let _ = events.send(terminal).await;
}

async fn transfer(
    store: &dyn ObjectStore,
    policy: UploadPolicy,
    key: &str,
    request: &UploadRequest,
    events: &mpsc::Sender<UploadEvent>,
) -> Result<Url, UploadError> {
    let payload = request.payload.as_slice();
    let total = payload.len() as u64;
    let session = store
        .open_session(key, total, &request.content_type)
        .await?;

    let mut offset = 0u64;
    let mut reported = 0u64;
    let mut stalled = 0u32;

    while offset < total {
        let end = offset.saturating_add(policy.chunk_bytes).min(total);
        let chunk = payload
            .get(offset as usize..end as usize)
            .ok_or_else(|| UploadError::Protocol(format!("offset {offset} out of range")))?;
        let committed = store
            .send_chunk(&session, offset, chunk, end == total)
            .await?;

        if committed > total {
            return Err(UploadError::Protocol(format!(
                "store committed {committed} bytes of a {total} byte payload"
            )));
        }
        if committed <= offset {
            stalled += 1;
            if stalled >= MAX_STALLED_CHUNKS {
                return Err(UploadError::Transport(format!(
                    "no progress after {stalled} chunks at offset {committed}"
                )));
            }
        } else {
            stalled = 0;
        }
        offset = committed;

        if committed > reported {
            reported = committed;
            let progress = UploadProgress {
                bytes_transferred: committed,
                total_bytes: total,
            };
            debug!(key, percentage = progress.percentage(), "upload progress");
            events
                .send(UploadEvent::Progress(progress))
                .await
                .map_err(|_| UploadError::Cancelled)?;
        }
    }

    store.download_url(&session).await
}

/// Event stream for one transfer. Dropping it cancels the transfer.
pub struct UploadTask {
    id: u64,
    key: String,
    events: ReceiverStream<UploadEvent>,
}

impl UploadTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Drains the stream, handing each progress tick to `on_progress`.
    pub async fn finish(
        mut self,
        mut on_progress: impl FnMut(UploadProgress),
    ) -> Result<Url, UploadError> {
        while let Some(event) = self.next().await {
            match event {
                UploadEvent::Progress(progress) => on_progress(progress),
                UploadEvent::Completed(url) => return Ok(url),
                UploadEvent::Failed(err) => return Err(err),
            }
        }
        Err(UploadError::Cancelled)
    }
}

impl Stream for UploadTask {
    type Item = UploadEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
