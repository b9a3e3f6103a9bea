use anyhow::Result;
use dvrgrab::{
    client::{FetchOutcome, Fetcher, Transfer, TransportFormat},
    history::{ArchiveHistory, HistoryEntry},
    pipeline::{ArchiveQueue, ArchiveRequest, RetryPolicy, UrlResolver},
    progress::{ProgressObserver, ProgressUpdate, TaskStatus},
    recording::Recording,
};
use std::{
    io::{self, Cursor, Read},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

const MAK: &str = "1234567890";

fn recording(id: &str) -> Recording {
    Recording {
        recording_id: id.to_owned(),
        title: format!("Recording {id}"),
        subtitle: None,
        duration: Some(1800),
        size: None,
        drm: None,
        start_time: None,
    }
}

fn request(id: &str, directory: &std::path::Path, no_decrypt: bool) -> ArchiveRequest {
    ArchiveRequest {
        recording: recording(id),
        destination: directory.join(format!("{id}.out")),
        no_decrypt,
        format: TransportFormat::Ts,
    }
}

/// Fast-turnaround policy so tests never sleep through real backoff.
fn test_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_step: Duration::ZERO,
        chunk_size: 1024,
        progress_min_delta: 0,
        ..RetryPolicy::default()
    }
}

struct StaticResolver;

impl UrlResolver for StaticResolver {
    fn resolve(&self, request: &ArchiveRequest) -> Result<String> {
        Ok(format!(
            "http://device/download/{}.TiVo",
            request.recording.recording_id
        ))
    }
}

struct RejectingResolver;

impl UrlResolver for RejectingResolver {
    fn resolve(&self, _request: &ArchiveRequest) -> Result<String> {
        Err(mindrpc::Error::AuthRejected("bad media access key".to_owned()).into())
    }
}

/// Scripted HTTP stand-in; `script` maps the attempt number to an outcome.
struct ScriptedFetcher {
    calls: AtomicU32,
    script: Box<dyn Fn(u32) -> Result<FetchOutcome> + Send + Sync>,
}

impl ScriptedFetcher {
    fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(u32) -> Result<FetchOutcome> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            script: Box::new(script),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for ScriptedFetcher {
    fn prime(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    fn fetch(&self, _url: &str) -> Result<FetchOutcome> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(attempt)
    }
}

fn success(declared_size: Option<u64>, body: Vec<u8>) -> Result<FetchOutcome> {
    Ok(FetchOutcome::Success(Transfer {
        declared_size,
        body: Box::new(Cursor::new(body)),
    }))
}

/// Produces bytes forever; only cancellation ends this transfer.
struct EndlessBody;

impl Read for EndlessBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(Duration::from_millis(1));
        buf.fill(0x47);
        Ok(buf.len())
    }
}

#[derive(Default)]
struct CollectingObserver(Mutex<Vec<ProgressUpdate>>);

impl ProgressObserver for CollectingObserver {
    fn update(&self, update: ProgressUpdate) {
        self.0.lock().unwrap().push(update);
    }
}

#[derive(Default)]
struct MemoryHistory(Mutex<Vec<HistoryEntry>>);

impl MemoryHistory {
    fn entries(&self) -> Vec<HistoryEntry> {
        self.0.lock().unwrap().clone()
    }
}

impl ArchiveHistory for MemoryHistory {
    fn record(&self, entry: HistoryEntry) -> Result<()> {
        self.0.lock().unwrap().push(entry);
        Ok(())
    }
}

struct Fixture {
    queue: ArchiveQueue,
    history: Arc<MemoryHistory>,
    observer: Arc<CollectingObserver>,
}

fn fixture(
    threads: usize,
    policy: RetryPolicy,
    resolver: Arc<dyn UrlResolver>,
    fetcher: Arc<dyn Fetcher>,
) -> Fixture {
    let history = Arc::new(MemoryHistory::default());
    let observer = Arc::new(CollectingObserver::default());
    let queue = ArchiveQueue::new(
        threads,
        policy,
        MAK,
        resolver,
        fetcher,
        observer.clone(),
        history.clone(),
    );

    Fixture {
        queue,
        history,
        observer,
    }
}

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let start = Instant::now();

    while start.elapsed() < Duration::from_secs(5) {
        if condition() {
            return true;
        }

        thread::sleep(Duration::from_millis(5));
    }

    false
}

/// Envelope fixture with one plaintext seed chunk and an encrypted stream,
/// built with the decoder crate's own keystream primitive.
fn envelope_fixture(mak: &str, stream: &[u8]) -> Vec<u8> {
    let seed = b"fixture-seed".to_vec();
    let mut body = Vec::new();
    body.extend_from_slice(&(12 + seed.len() as u32).to_be_bytes());
    body.extend_from_slice(&(seed.len() as u32).to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&seed);

    let mut file = Vec::new();
    file.extend_from_slice(b"TiVo");
    file.extend_from_slice(&[0; 6]);
    file.extend_from_slice(&(16 + body.len() as u32).to_be_bytes());
    file.extend_from_slice(&1u16.to_be_bytes());
    file.extend_from_slice(&body);

    let mut encrypted = stream.to_vec();
    ts_envelope::CipherStream::new(ts_envelope::KeySchedule::media(mak, &seed))
        .apply(&mut encrypted);
    file.extend_from_slice(&encrypted);
    file
}

#[test]
fn finished_transfer_lands_on_disk_and_in_history() {
    let dir = tempfile::tempdir().unwrap();
    let payload = vec![0x47; 20_000];
    let expected = payload.clone();
    let fetcher = ScriptedFetcher::new(move |_| success(Some(20_000), payload.clone()));
    let f = fixture(2, test_policy(0), Arc::new(StaticResolver), fetcher);

    let task = f.queue.enqueue(request("rc.1", dir.path(), true)).unwrap();
    f.queue.join();

    assert_eq!(task.status(), TaskStatus::Finished);
    assert_eq!(std::fs::read(dir.path().join("rc.1.out")).unwrap(), expected);

    let entries = f.history.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].recording_id, "rc.1");
    assert_eq!(entries[0].path, dir.path().join("rc.1.out"));
}

#[test]
fn decode_transfer_decrypts_through_the_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let stream: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let envelope = envelope_fixture(MAK, &stream);
    let declared = envelope.len() as u64;
    let fetcher = ScriptedFetcher::new(move |_| success(Some(declared), envelope.clone()));
    let f = fixture(2, test_policy(0), Arc::new(StaticResolver), fetcher);

    let task = f.queue.enqueue(request("rc.2", dir.path(), false)).unwrap();
    f.queue.join();

    assert_eq!(task.status(), TaskStatus::Finished);
    assert_eq!(std::fs::read(dir.path().join("rc.2.out")).unwrap(), stream);
}

#[test]
fn retries_stop_after_the_configured_limit() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(|_| Ok(FetchOutcome::Status(503)));
    let f = fixture(1, test_policy(3), Arc::new(StaticResolver), fetcher.clone());

    let task = f.queue.enqueue(request("rc.3", dir.path(), true)).unwrap();
    f.queue.join();

    // first attempt plus exactly three retries
    assert_eq!(fetcher.calls(), 4);
    assert_eq!(task.retries(), 3);

    match task.status() {
        TaskStatus::Error { message, detail } => {
            assert_eq!(message, "download failed after 4 attempts");
            assert_eq!(detail.as_deref(), Some("device answered HTTP 503"));
        }
        status => panic!("expected an error, got {status:?}"),
    }

    assert!(f.history.entries().is_empty());
}

#[test]
fn transient_failures_recover_before_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(|attempt| {
        if attempt < 2 {
            Ok(FetchOutcome::Status(503))
        } else {
            success(None, vec![1, 2, 3, 4])
        }
    });
    let f = fixture(1, test_policy(5), Arc::new(StaticResolver), fetcher.clone());

    let task = f.queue.enqueue(request("rc.4", dir.path(), true)).unwrap();
    f.queue.join();

    assert_eq!(task.status(), TaskStatus::Finished);
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(task.retries(), 2);
}

#[test]
fn short_transfer_is_an_error_despite_http_success() {
    let dir = tempfile::tempdir().unwrap();
    // 10_000 of a declared 100_000 bytes, well under the 80% threshold
    let fetcher = ScriptedFetcher::new(|_| success(Some(100_000), vec![0; 10_000]));
    let f = fixture(1, test_policy(0), Arc::new(StaticResolver), fetcher);

    let task = f.queue.enqueue(request("rc.5", dir.path(), true)).unwrap();
    f.queue.join();

    match task.status() {
        TaskStatus::Error { message, .. } => {
            assert_eq!(message, "transfer ended short of the device's estimate");
        }
        status => panic!("expected an error, got {status:?}"),
    }

    assert!(f.history.entries().is_empty());
}

#[test]
fn second_enqueue_for_active_recording_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(|_| {
        Ok(FetchOutcome::Success(Transfer {
            declared_size: None,
            body: Box::new(EndlessBody),
        }))
    });
    let f = fixture(2, test_policy(0), Arc::new(StaticResolver), fetcher);

    let task = f.queue.enqueue(request("rc.6", dir.path(), true)).unwrap();
    assert!(wait_for(|| task.status() == TaskStatus::Downloading));

    let second = f.queue.enqueue(request("rc.6", dir.path(), true));
    assert!(second.is_err());

    f.queue.cancel_all();
    f.queue.join();

    // terminal tasks leave the map; the recording may be enqueued again
    let again = f.queue.enqueue(request("rc.6", dir.path(), true)).unwrap();
    f.queue.cancel_all();
    f.queue.join();
    assert_eq!(again.status(), TaskStatus::Cancelled);
}

#[test]
fn cancel_mid_download_is_not_an_error_and_keeps_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(|_| {
        Ok(FetchOutcome::Success(Transfer {
            declared_size: Some(1_000_000_000),
            body: Box::new(EndlessBody),
        }))
    });
    let f = fixture(1, test_policy(0), Arc::new(StaticResolver), fetcher);

    let task = f.queue.enqueue(request("rc.7", dir.path(), true)).unwrap();
    assert!(wait_for(|| task.status() == TaskStatus::Downloading));

    assert!(f.queue.cancel("rc.7"));
    f.queue.join();

    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(!dir.path().join("rc.7.out").exists());
    assert!(f.history.entries().is_empty());
    assert!(!f.queue.has_active());
}

#[test]
fn rejected_authentication_never_starts_a_download() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(|_| panic!("fetch must not be called"));
    let f = fixture(1, test_policy(3), Arc::new(RejectingResolver), fetcher.clone());

    let task = f.queue.enqueue(request("rc.8", dir.path(), true)).unwrap();
    f.queue.join();

    assert_eq!(fetcher.calls(), 0);

    match task.status() {
        TaskStatus::Error { message, .. } => {
            assert_eq!(message, "device rejected the media access key");
        }
        status => panic!("expected an error, got {status:?}"),
    }
}

#[test]
fn decode_failure_is_distinct_from_download_failure() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(|_| success(None, b"garbage, not an envelope".to_vec()));
    let f = fixture(1, test_policy(0), Arc::new(StaticResolver), fetcher);

    let task = f.queue.enqueue(request("rc.9", dir.path(), false)).unwrap();
    f.queue.join();

    match task.status() {
        TaskStatus::Error { message, .. } => {
            assert_eq!(message, "problem decoding the recording");
        }
        status => panic!("expected an error, got {status:?}"),
    }
}

#[test]
fn enqueue_after_shutdown_fails() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(|_| success(None, vec![0; 16]));
    let f = fixture(1, test_policy(0), Arc::new(StaticResolver), fetcher);

    f.queue.shutdown();
    assert!(f.queue.enqueue(request("rc.10", dir.path(), true)).is_err());
}

#[test]
fn queue_reports_empty_transitions_and_statuses_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = transitions.clone();

    let fetcher = ScriptedFetcher::new(|_| success(None, vec![0; 16]));
    let f = fixture(1, test_policy(0), Arc::new(StaticResolver), fetcher);
    f.queue
        .on_queue_change(Box::new(move |empty| seen.lock().unwrap().push(empty)));

    let task = f.queue.enqueue(request("rc.11", dir.path(), true)).unwrap();
    f.queue.join();

    assert_eq!(task.status(), TaskStatus::Finished);
    assert_eq!(*transitions.lock().unwrap(), vec![false, true]);

    let statuses: Vec<TaskStatus> = f
        .observer
        .0
        .lock()
        .unwrap()
        .iter()
        .map(|u| u.status.clone())
        .collect();
    assert_eq!(statuses.first(), Some(&TaskStatus::Queued));
    assert!(statuses.contains(&TaskStatus::Connecting));
    assert!(statuses.contains(&TaskStatus::Downloading));
    assert_eq!(statuses.last(), Some(&TaskStatus::Finished));
}
