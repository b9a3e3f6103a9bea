use crate::{
    client::{HttpFetcher, TransportFormat},
    commands::DeviceOpts,
    history::{ArchiveHistory, FileHistory, NoHistory},
    pipeline::{ArchiveQueue, ArchiveRequest, MindResolver, RetryPolicy},
    progress::{TaskStatus, TermReporter},
    recording::Recording,
};
use anyhow::{Result, bail};
use clap::Args;
use log::{info, warn};
use mindrpc::{Command, Session};
use std::{
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Download recordings and decrypt them to transport streams.
#[derive(Debug, Args)]
pub struct Archive {
    /// Recording identifiers to archive (as shown by the list command).
    #[arg(required = true)]
    recordings: Vec<String>,

    #[command(flatten)]
    device: DeviceOpts,

    /// Directory archived files are written to.
    #[arg(short, long, default_value = ".")]
    directory: PathBuf,

    /// Save the raw encrypted envelope without decrypting it.
    #[arg(long, help_heading = "Download Options")]
    no_decrypt: bool,

    /// Container requested from the device.
    #[arg(long, help_heading = "Download Options", value_enum, default_value_t = TransportFormat::Ts)]
    format: TransportFormat,

    /// Maximum retries for one transfer.
    #[arg(long, help_heading = "Download Options", default_value_t = 5)]
    retry_count: u32,

    /// Seconds added to the wait before each successive retry.
    #[arg(long, help_heading = "Download Options", default_value_t = 5)]
    backoff: u64,

    /// Parallel transfers.
    #[arg(long, help_heading = "Download Options", default_value_t = 2)]
    threads: usize,

    /// File successful archives are recorded in.
    #[arg(long, help_heading = "Download Options")]
    history: Option<PathBuf>,
}

impl Archive {
    pub fn execute(self) -> Result<()> {
        let (device, identity) = self.device.resolve()?;

        if !self.directory.exists() {
            fs::create_dir_all(&self.directory)?;
        }

        let mut session =
            Session::connect(&device.host, device.rpc_port, &identity, &device.mak)?;
        let mut requests = Vec::new();

        for recording_id in &self.recordings {
            let mut search = Command::recording_search_by_id(&device.body_id(), recording_id);
            search.execute(&mut session)?;
            let found: Vec<Recording> = search.records("recording")?;

            let Some(recording) = found.into_iter().next() else {
                bail!("no recording {recording_id} on {}", device.host);
            };

            if recording.copy_protected() {
                warn!(
                    "Skipping {} ({}): copy protected, the device will refuse the transfer",
                    recording.title, recording_id
                );
                continue;
            }

            let extension = if self.no_decrypt { "TiVo" } else { "ts" };
            let destination = self
                .directory
                .join(format!("{}.{}", recording.file_stem(), extension));

            requests.push(ArchiveRequest {
                recording,
                destination,
                no_decrypt: self.no_decrypt,
                format: self.format,
            });
        }

        if requests.is_empty() {
            bail!("nothing to archive.");
        }

        let policy = RetryPolicy {
            max_retries: self.retry_count,
            backoff_step: Duration::from_secs(self.backoff),
            ..RetryPolicy::default()
        };

        let history: Arc<dyn ArchiveHistory> = match &self.history {
            Some(path) => Arc::new(FileHistory::new(path)),
            None => Arc::new(NoHistory),
        };

        let resolver = MindResolver::with_session(device.clone(), identity, session);
        let queue = Arc::new(ArchiveQueue::new(
            self.threads,
            policy,
            &device.mak,
            Arc::new(resolver),
            Arc::new(HttpFetcher::new(&device.mak)?),
            Arc::new(TermReporter::new()),
            history,
        ));

        // first Ctrl+C cancels gracefully, a second force-exits
        let interrupted = Arc::new(AtomicBool::new(false));
        let handler_queue = queue.clone();
        let handler_flag = interrupted.clone();
        ctrlc::set_handler(move || {
            if handler_flag.swap(true, Ordering::SeqCst) {
                std::process::exit(1);
            }

            warn!("Ctrl+C received, cancelling active transfers.");
            handler_queue.shutdown();
            handler_queue.cancel_all();
        })?;

        let mut tasks = Vec::new();

        for request in requests {
            info!(
                "Archiving {} to {}",
                request.recording.title,
                request.destination.display()
            );
            tasks.push(queue.enqueue(request)?);
        }

        queue.join();

        let mut failures = 0;

        for task in &tasks {
            if let TaskStatus::Error { message, detail } = task.status() {
                failures += 1;
                warn!("{}: {message}", task.recording_id());

                if let Some(detail) = detail {
                    info!("  {detail}");
                }
            }
        }

        if failures > 0 {
            bail!("{failures} archive(s) failed.");
        }

        if interrupted.load(Ordering::SeqCst) {
            bail!("cancelled.");
        }

        Ok(())
    }
}
