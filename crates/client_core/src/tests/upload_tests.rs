use super::*;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering},
    time::Duration,
};

const PUBLIC_URL: &str = "https://storage.example.com/v0/b/bucket/o/avatar.png?alt=media&token=t1";

/// Store whose commit counts can be scripted per chunk; unscripted chunks are
/// committed in full.
struct ScriptedStore {
    commits: std::sync::Mutex<VecDeque<u64>>,
    sent_offsets: std::sync::Mutex<Vec<u64>>,
    hang_on_total: Option<u64>,
    opens: AtomicUsize,
    abandoned: AtomicBool,
}

/// Flags the store when a hanging `open_session` future is dropped.
struct AbandonGuard<'a>(&'a AtomicBool);

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }
}

impl ScriptedStore {
    fn new(commits: &[u64]) -> Self {
        Self {
            commits: std::sync::Mutex::new(commits.iter().copied().collect()),
            sent_offsets: std::sync::Mutex::new(Vec::new()),
            hang_on_total: None,
            opens: AtomicUsize::new(0),
            abandoned: AtomicBool::new(false),
        }
    }

    /// Never answers `open_session` for payloads of exactly `total` bytes.
    fn hanging_on(total: u64) -> Self {
        let mut store = Self::new(&[]);
        store.hang_on_total = Some(total);
        store
    }

    fn offsets(&self) -> Vec<u64> {
        self.sent_offsets.lock().expect("offsets lock").clone()
    }
}

#[async_trait]
impl ObjectStore for ScriptedStore {
    async fn open_session(
        &self,
        key: &str,
        total_bytes: u64,
        _content_type: &str,
    ) -> Result<ResumableSession, UploadError> {
        self.opens.fetch_add(1, AtomicOrdering::SeqCst);
        if self.hang_on_total == Some(total_bytes) {
            let _guard = AbandonGuard(&self.abandoned);
            std::future::pending::<()>().await;
        }
        Ok(ResumableSession {
            key: key.to_string(),
            session_url: format!("memory://{key}"),
            total_bytes,
        })
    }

    async fn send_chunk(
        &self,
        _session: &ResumableSession,
        offset: u64,
        chunk: &[u8],
        _finalize: bool,
    ) -> Result<u64, UploadError> {
        self.sent_offsets.lock().expect("offsets lock").push(offset);
        let scripted = self.commits.lock().expect("commits lock").pop_front();
        Ok(scripted.unwrap_or(offset + chunk.len() as u64))
    }

    async fn download_url(&self, _session: &ResumableSession) -> Result<Url, UploadError> {
        Ok(Url::parse(PUBLIC_URL).expect("url"))
    }
}

fn request(size: usize) -> UploadRequest {
    UploadRequest {
        payload: vec![7u8; size],
        original_name: "avatar.png".to_string(),
        content_type: "image/png".to_string(),
    }
}

async fn collect(task: UploadTask) -> Vec<UploadEvent> {
    task.collect().await
}

#[test]
fn percentage_rounds_and_clamps() {
    let pct = |done, total| {
        UploadProgress {
            bytes_transferred: done,
            total_bytes: total,
        }
        .percentage()
    };
    assert_eq!(pct(300_000, 1_000_000), 30);
    assert_eq!(pct(1, 200), 1);
    assert_eq!(pct(1, 201), 0);
    assert_eq!(pct(2_000, 1_000), 100);
    assert_eq!(pct(0, 0), 0);
    assert_eq!(pct(u64::MAX, u64::MAX), 100);
}

#[test]
fn storage_key_prefixes_millis_to_base_name() {
    let now: DateTime<Utc> = "2024-01-01T00:00:00.123Z".parse().expect("timestamp");
    assert_eq!(storage_key("me.png", now), "1704067200123me.png");
    assert_eq!(storage_key("C:\\pics\\me.png", now), "1704067200123me.png");
    assert_eq!(storage_key("/tmp/", now), "1704067200123upload");
}

#[tokio::test]
async fn reports_thirty_then_hundred_then_one_url() {
    let store = Arc::new(ScriptedStore::new(&[300_000, 1_000_000]));
    let coordinator = UploadCoordinator::new(
        store.clone(),
        UploadPolicy::new(2 * 1024 * 1024, 1_000_000),
    );

    let task = coordinator.start(request(1_000_000)).await.expect("start");
    let events = collect(task).await;

    let percentages: Vec<u8> = events
        .iter()
        .filter_map(|event| match event {
            UploadEvent::Progress(progress) => Some(progress.percentage()),
            _ => None,
        })
        .collect();
    assert_eq!(percentages, vec![30, 100]);

    let terminals: Vec<&UploadEvent> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(
        terminals,
        vec![&UploadEvent::Completed(Url::parse(PUBLIC_URL).expect("url"))]
    );
    assert!(events.last().is_some_and(UploadEvent::is_terminal));
    // Second chunk resumes where the store said it stopped.
    assert_eq!(store.offsets(), vec![0, 300_000]);
}

#[tokio::test]
async fn progress_never_decreases_when_store_rewinds() {
    let store = Arc::new(ScriptedStore::new(&[400, 200, 700, 1_000]));
    let coordinator = UploadCoordinator::new(store.clone(), UploadPolicy::new(10_000, 500));

    let mut seen = Vec::new();
    let url = coordinator
        .start(request(1_000))
        .await
        .expect("start")
        .finish(|progress| seen.push(progress.percentage()))
        .await
        .expect("completed");

    assert_eq!(url.as_str(), PUBLIC_URL);
    assert_eq!(seen, vec![40, 70, 100]);
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(seen.iter().all(|pct| *pct <= 100));
    assert_eq!(store.offsets(), vec![0, 400, 200, 700]);
}

#[tokio::test]
async fn fails_after_repeated_stalls() {
    let store = Arc::new(ScriptedStore::new(&[0, 0, 0]));
    let coordinator = UploadCoordinator::new(store, UploadPolicy::new(10_000, 100));

    let err = coordinator
        .start(request(300))
        .await
        .expect("start")
        .finish(|_| {})
        .await
        .expect_err("stalled");
    assert!(matches!(err, UploadError::Transport(_)));
}

#[tokio::test]
async fn over_committing_store_is_a_protocol_error() {
    let store = Arc::new(ScriptedStore::new(&[5_000]));
    let coordinator = UploadCoordinator::new(store, UploadPolicy::new(10_000, 100));

    let events = collect(coordinator.start(request(300)).await.expect("start")).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        UploadEvent::Failed(UploadError::Protocol(_))
    ));
}

#[tokio::test]
async fn preflight_rejects_oversized_and_empty_payloads() {
    let store = Arc::new(ScriptedStore::new(&[]));
    let coordinator =
        UploadCoordinator::new(store.clone(), UploadPolicy::new(2 * 1024 * 1024, 1024));

    let err = coordinator
        .start(request(2 * 1024 * 1024 + 1))
        .await
        .err()
        .expect("too large");
    assert_eq!(
        err,
        UploadError::TooLarge {
            size: 2 * 1024 * 1024 + 1,
            limit: 2 * 1024 * 1024
        }
    );
    assert_eq!(err.to_string(), "file size must be less than 2 MB");

    let err = coordinator.start(request(0)).await.err().expect("empty");
    assert_eq!(err, UploadError::EmptyPayload);
    assert_eq!(store.opens.load(AtomicOrdering::SeqCst), 0);
}

#[tokio::test]
async fn new_upload_supersedes_the_one_in_flight() {
    let store = Arc::new(ScriptedStore::hanging_on(11));
    let coordinator = UploadCoordinator::new(store, UploadPolicy::new(10_000, 1_000));

    let first = coordinator.start(request(11)).await.expect("first");
    let second = coordinator.start(request(10)).await.expect("second");
    assert_ne!(first.id(), second.id());

    let first_events = collect(first).await;
    assert_eq!(
        first_events,
        vec![UploadEvent::Failed(UploadError::Superseded)]
    );

    let second_events = collect(second).await;
    assert!(matches!(
        second_events.last(),
        Some(UploadEvent::Completed(_))
    ));
}

#[tokio::test]
async fn rejected_preflight_does_not_cancel_in_flight_upload() {
    let store = Arc::new(ScriptedStore::new(&[]));
    let coordinator = UploadCoordinator::new(store, UploadPolicy::new(100, 10));

    let task = coordinator.start(request(50)).await.expect("start");
    assert!(coordinator.start(request(500)).await.is_err());

    let url = task.finish(|_| {}).await.expect("completed");
    assert_eq!(url.as_str(), PUBLIC_URL);
}

#[tokio::test]
async fn dropping_coordinator_cancels_in_flight_upload() {
    let store = Arc::new(ScriptedStore::hanging_on(10));
    let coordinator = UploadCoordinator::new(store, UploadPolicy::new(10_000, 1_000));

    let task = coordinator.start(request(10)).await.expect("start");
    drop(coordinator);

    let events = collect(task).await;
    assert_eq!(events, vec![UploadEvent::Failed(UploadError::Cancelled)]);
}

#[tokio::test]
async fn dropping_task_stops_a_transfer_waiting_on_the_store() {
    let store = Arc::new(ScriptedStore::hanging_on(10));
    let coordinator = UploadCoordinator::new(store.clone(), UploadPolicy::new(10_000, 1_000));

    let task = coordinator.start(request(10)).await.expect("start");
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.opens.load(AtomicOrdering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("transfer reached the store");

    drop(task);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !store.abandoned.load(AtomicOrdering::SeqCst) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("transfer abandoned after its subscriber went away");
    // The coordinator is still alive, so only the dropped stream stopped it.
    drop(coordinator);
}
