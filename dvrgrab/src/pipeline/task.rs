use crate::{
    client::{FetchOutcome, Fetcher, Transfer, TransportFormat, download_url},
    device::Device,
    history::{ArchiveHistory, HistoryEntry},
    pipeline::pipe::byte_pipe,
    progress::{ProgressEstimator, ProgressObserver, ProgressUpdate, TaskStatus},
    recording::Recording,
};
use anyhow::{Result, anyhow};
use chrono::Utc;
use log::warn;
use mindrpc::{Command, Session, TlsIdentity};
use std::{
    cell::Cell,
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};
use ts_envelope::EnvelopeDecoder;

/// Tunable transfer behavior. The defaults mirror the device family the
/// tool was written against; they are settings, not protocol constants.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Further attempts after the first failure.
    pub max_retries: u32,
    /// Added to the wait before each successive retry (linear backoff).
    pub backoff_step: Duration,
    /// Minimum fraction of the device-declared size that must arrive; the
    /// device is known to truncate transfers silently.
    pub integrity_threshold: f64,
    /// Transfer read size.
    pub chunk_size: usize,
    /// Bytes between progress reports.
    pub progress_min_delta: u64,
    /// Chunks buffered between the download and decode workers.
    pub pipe_capacity: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_step: Duration::from_secs(5),
            integrity_threshold: 0.8,
            chunk_size: 64 * 1024,
            progress_min_delta: 256 * 1024,
            pipe_capacity: 32,
        }
    }
}

/// One archive order: which recording, where to, and how.
#[derive(Clone)]
pub struct ArchiveRequest {
    pub recording: Recording,
    pub destination: PathBuf,
    /// Keep the raw encrypted envelope instead of decoding it.
    pub no_decrypt: bool,
    pub format: TransportFormat,
}

/// Shared, externally visible state of one running archive.
pub struct ArchiveTask {
    recording_id: String,
    cancelled: AtomicBool,
    retries: AtomicU32,
    status: Mutex<TaskStatus>,
}

impl ArchiveTask {
    pub(crate) fn new(recording_id: String) -> Self {
        Self {
            recording_id,
            cancelled: AtomicBool::new(false),
            retries: AtomicU32::new(0),
            status: Mutex::new(TaskStatus::Queued),
        }
    }

    pub fn recording_id(&self) -> &str {
        &self.recording_id
    }

    /// Requests cancellation; the workers notice at the next chunk
    /// boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Retries spent so far.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> TaskStatus {
        self.status.lock().unwrap().clone()
    }

    fn set_status(&self, status: TaskStatus) {
        *self.status.lock().unwrap() = status;
    }
}

/// Everything a worker needs besides the request itself.
pub(crate) struct TaskContext {
    pub resolver: Arc<dyn UrlResolver>,
    pub fetcher: Arc<dyn Fetcher>,
    pub observer: Arc<dyn ProgressObserver>,
    pub history: Arc<dyn ArchiveHistory>,
    pub policy: RetryPolicy,
    pub mak: String,
}

/// Resolves a recording into an authenticated download URL.
pub trait UrlResolver: Send + Sync {
    fn resolve(&self, request: &ArchiveRequest) -> Result<String>;
}

/// RPC-backed resolver. The session sits behind a mutex, so lookups are
/// serialized per device even while several transfers for that device run
/// in parallel.
pub struct MindResolver {
    device: Device,
    identity: TlsIdentity,
    session: Mutex<Option<Session>>,
}

impl MindResolver {
    pub fn new(device: Device, identity: TlsIdentity) -> Self {
        Self {
            device,
            identity,
            session: Mutex::new(None),
        }
    }

    /// Reuses a session that is already connected and authenticated.
    pub fn with_session(device: Device, identity: TlsIdentity, session: Session) -> Self {
        Self {
            device,
            identity,
            session: Mutex::new(Some(session)),
        }
    }
}

impl UrlResolver for MindResolver {
    fn resolve(&self, request: &ArchiveRequest) -> Result<String> {
        let mut guard = self.session.lock().unwrap();
        let session = match guard.as_mut() {
            Some(session) => session,
            None => guard.insert(Session::connect(
                &self.device.host,
                self.device.rpc_port,
                &self.identity,
                &self.device.mak,
            )?),
        };

        let mut lookup = Command::id_search(&self.device.body_id(), &request.recording.recording_id);

        if let Err(e) = lookup.execute(session) {
            // connection state is unknown after a failed exchange
            *guard = None;
            return Err(e.into());
        }

        let object_id = lookup.first_object_id()?;

        Ok(download_url(
            &self.device,
            &request.recording.file_stem(),
            object_id,
            request.format,
        ))
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum End {
    Finished,
    Cancelled,
}

enum TaskFailure {
    Resolve(anyhow::Error),
    Network { attempts: u32, last: String },
    Interrupted(std::io::Error),
    File(anyhow::Error),
    Decode(anyhow::Error),
    Short { received: u64, declared: u64 },
}

impl TaskFailure {
    fn into_status(self) -> TaskStatus {
        let (message, detail) = match self {
            TaskFailure::Resolve(e) => {
                let message = match e.downcast_ref::<mindrpc::Error>() {
                    Some(mindrpc::Error::AuthRejected(_)) => "device rejected the media access key",
                    _ => "couldn't authorize the download",
                };
                (message.to_owned(), Some(format!("{e:#}")))
            }
            TaskFailure::Network { attempts, last } => (
                format!("download failed after {attempts} attempts"),
                Some(last),
            ),
            TaskFailure::Interrupted(e) => {
                ("connection lost mid-transfer".to_owned(), Some(e.to_string()))
            }
            TaskFailure::File(e) => (
                "couldn't write the destination file".to_owned(),
                Some(format!("{e:#}")),
            ),
            TaskFailure::Decode(e) => (
                "problem decoding the recording".to_owned(),
                Some(format!("{e:#}")),
            ),
            TaskFailure::Short { received, declared } => (
                "transfer ended short of the device's estimate".to_owned(),
                Some(format!("received {received} of {declared} bytes")),
            ),
        };

        TaskStatus::Error { message, detail }
    }
}

/// Bundles the observer with per-task identity so the transfer code can
/// report without threading half a dozen arguments around.
struct Reporter<'a> {
    task: &'a ArchiveTask,
    observer: &'a dyn ProgressObserver,
    declared_size: Cell<Option<u64>>,
}

impl Reporter<'_> {
    fn emit(
        &self,
        status: TaskStatus,
        downloaded: u64,
        percent: Option<u8>,
        eta: Option<Duration>,
        message: Option<String>,
    ) {
        self.observer.update(ProgressUpdate {
            recording_id: self.task.recording_id.clone(),
            status,
            downloaded,
            declared_size: self.declared_size.get(),
            percent,
            eta,
            message,
        });
    }

    fn status(&self, status: TaskStatus) {
        self.task.set_status(status.clone());
        self.emit(status, 0, None, None, None);
    }

    fn progress(&self, downloaded: u64, percent: Option<u8>, eta: Option<Duration>) {
        self.emit(TaskStatus::Downloading, downloaded, percent, eta, None);
    }

    fn note(&self, downloaded: u64, message: String) {
        self.emit(
            self.task.status(),
            downloaded,
            None,
            None,
            Some(message),
        );
    }
}

/// Runs one archive to its terminal state and reports it.
pub(crate) fn run(task: &ArchiveTask, request: &ArchiveRequest, ctx: &TaskContext) -> TaskStatus {
    let reporter = Reporter {
        task,
        observer: ctx.observer.as_ref(),
        declared_size: Cell::new(None),
    };

    let terminal = match execute(task, request, ctx, &reporter) {
        Ok((End::Finished, downloaded)) => {
            reporter.emit(TaskStatus::Finished, downloaded, Some(100), None, None);
            TaskStatus::Finished
        }
        Ok((End::Cancelled, downloaded)) => {
            reporter.emit(TaskStatus::Cancelled, downloaded, None, None, None);
            TaskStatus::Cancelled
        }
        Err(failure) => {
            let status = failure.into_status();
            reporter.emit(status.clone(), 0, None, None, None);
            status
        }
    };

    task.set_status(terminal.clone());
    terminal
}

fn execute(
    task: &ArchiveTask,
    request: &ArchiveRequest,
    ctx: &TaskContext,
    reporter: &Reporter<'_>,
) -> Result<(End, u64), TaskFailure> {
    if task.is_cancelled() {
        return Ok((End::Cancelled, 0));
    }

    reporter.status(TaskStatus::Connecting);

    let url = ctx
        .resolver
        .resolve(request)
        .map_err(TaskFailure::Resolve)?;

    if task.is_cancelled() {
        return Ok((End::Cancelled, 0));
    }

    // the embedded web server wants its session cookie established before
    // it honors the credentialed download
    if let Err(e) = ctx.fetcher.prime(&url) {
        warn!("priming request failed: {e:#}");
    }

    let transfer = match open_with_retries(task, &url, ctx, reporter)? {
        Some(transfer) => transfer,
        None => return Ok((End::Cancelled, 0)),
    };

    reporter.declared_size.set(transfer.declared_size);
    reporter.status(TaskStatus::Downloading);

    let outfile = File::create(&request.destination)
        .map_err(|e| TaskFailure::File(anyhow!(e).context(request.destination.display().to_string())))?;

    let mut estimator =
        ProgressEstimator::new(transfer.declared_size, ctx.policy.progress_min_delta);

    let end = if request.no_decrypt {
        copy_plain(task, transfer.body, outfile, &mut estimator, reporter, ctx)?
    } else {
        copy_decoded(task, transfer.body, outfile, &mut estimator, reporter, ctx)?
    };

    let received = estimator.downloaded();

    if end == End::Cancelled {
        // a partial file must never look like a finished archive
        let _ = fs::remove_file(&request.destination);
        return Ok((End::Cancelled, received));
    }

    if let Some(declared) = transfer.declared_size {
        let minimum = (declared as f64 * ctx.policy.integrity_threshold) as u64;

        if received < minimum {
            return Err(TaskFailure::Short { received, declared });
        }
    }

    let entry = HistoryEntry {
        recording_id: request.recording.recording_id.clone(),
        archived_at: Utc::now(),
        path: request.destination.clone(),
    };

    if let Err(e) = ctx.history.record(entry) {
        warn!("couldn't record archive history: {e:#}");
    }

    Ok((End::Finished, received))
}

/// Opens the transfer, retrying transport errors and non-success statuses
/// with linearly increasing backoff. `None` means cancellation won.
fn open_with_retries(
    task: &ArchiveTask,
    url: &str,
    ctx: &TaskContext,
    reporter: &Reporter<'_>,
) -> Result<Option<Transfer>, TaskFailure> {
    let attempts = ctx.policy.max_retries + 1;
    let mut last = String::new();

    for attempt in 0..attempts {
        if task.is_cancelled() {
            return Ok(None);
        }

        if attempt > 0 {
            task.retries.fetch_add(1, Ordering::SeqCst);
            let wait = ctx.policy.backoff_step * attempt;

            if !countdown(task, reporter, attempt, ctx.policy.max_retries, wait) {
                return Ok(None);
            }
        }

        match ctx.fetcher.fetch(url) {
            Ok(FetchOutcome::Success(transfer)) => return Ok(Some(transfer)),
            Ok(FetchOutcome::Status(code)) => {
                last = format!("device answered HTTP {code}");
                warn!("{}: {last}", task.recording_id);
            }
            Err(e) => {
                last = format!("{e:#}");
                warn!("{}: {last}", task.recording_id);
            }
        }
    }

    Err(TaskFailure::Network { attempts, last })
}

/// Ticks the retry countdown on the status line, staying responsive to
/// cancellation. Returns false when the task was cancelled while waiting.
fn countdown(
    task: &ArchiveTask,
    reporter: &Reporter<'_>,
    attempt: u32,
    max_retries: u32,
    wait: Duration,
) -> bool {
    let mut remaining = wait;
    let mut announced = u64::MAX;

    loop {
        if task.is_cancelled() {
            return false;
        }

        let seconds = remaining.as_secs();

        if seconds != announced {
            reporter.note(0, format!("retry {attempt}/{max_retries} in {seconds}s"));
            announced = seconds;
        }

        if remaining.is_zero() {
            return true;
        }

        let slice = remaining.min(Duration::from_millis(250));
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

fn copy_plain(
    task: &ArchiveTask,
    mut body: Box<dyn Read + Send>,
    outfile: File,
    estimator: &mut ProgressEstimator,
    reporter: &Reporter<'_>,
    ctx: &TaskContext,
) -> Result<End, TaskFailure> {
    let mut outfile = BufWriter::new(outfile);
    let mut buf = vec![0; ctx.policy.chunk_size];

    loop {
        // checked every chunk, not only at blocking calls; returning drops
        // the response and with it the connection
        if task.is_cancelled() {
            return Ok(End::Cancelled);
        }

        let n = body.read(&mut buf).map_err(TaskFailure::Interrupted)?;

        if n == 0 {
            outfile.flush().map_err(|e| TaskFailure::File(e.into()))?;
            return Ok(End::Finished);
        }

        outfile
            .write_all(&buf[..n])
            .map_err(|e| TaskFailure::File(e.into()))?;

        if let Some((percent, eta)) = estimator.advance(n as u64) {
            reporter.progress(estimator.downloaded(), percent, eta);
        }
    }
}

/// Downloads through a bounded pipe into a dedicated decoder worker, the
/// only intra-task concurrency. Decryption order is the arrival order; the
/// decoder blocks when starved and the downloader blocks when it runs
/// ahead.
fn copy_decoded(
    task: &ArchiveTask,
    mut body: Box<dyn Read + Send>,
    outfile: File,
    estimator: &mut ProgressEstimator,
    reporter: &Reporter<'_>,
    ctx: &TaskContext,
) -> Result<End, TaskFailure> {
    let (mut writer, reader) = byte_pipe(ctx.policy.pipe_capacity);
    let mak = ctx.mak.clone();

    let decoder = thread::Builder::new()
        .name("envelope-decode".to_owned())
        .spawn(move || -> ts_envelope::Result<()> {
            let mut outfile = BufWriter::new(outfile);
            EnvelopeDecoder::new(&mak).decode(reader, &mut outfile)?;
            outfile.flush()?;
            Ok(())
        })
        .map_err(|e| TaskFailure::File(e.into()))?;

    let mut interrupted = None;
    let mut cancelled = false;
    let mut buf = vec![0; ctx.policy.chunk_size];

    loop {
        if task.is_cancelled() {
            cancelled = true;
            break;
        }

        let n = match body.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                interrupted = Some(TaskFailure::Interrupted(e));
                break;
            }
        };

        if n == 0 {
            break;
        }

        if writer.write_all(&buf[..n]).is_err() {
            // decoder went away; its own error is authoritative
            break;
        }

        if let Some((percent, eta)) = estimator.advance(n as u64) {
            reporter.progress(estimator.downloaded(), percent, eta);
        }
    }

    // stop network reads, then let the decoder drain the pipe and exit
    drop(body);
    drop(writer);
    let decode_result = decoder.join();

    if cancelled {
        // a truncated envelope is expected here; the decoder's complaint
        // about it is not an error
        return Ok(End::Cancelled);
    }

    if let Some(failure) = interrupted {
        return Err(failure);
    }

    match decode_result {
        Ok(Ok(())) => Ok(End::Finished),
        Ok(Err(e)) => Err(TaskFailure::Decode(e.into())),
        Err(_) => Err(TaskFailure::Decode(anyhow!("decoder worker panicked"))),
    }
}
