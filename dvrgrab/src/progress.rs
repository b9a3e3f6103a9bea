use colored::Colorize;
use std::{
    fmt,
    io::{self, Write},
    sync::Mutex,
    time::{Duration, Instant},
};

/// Externally visible state of one archive task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Connecting,
    Downloading,
    Finished,
    Cancelled,
    /// Short status line plus optional longer diagnostic detail.
    Error {
        message: String,
        detail: Option<String>,
    },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Cancelled | TaskStatus::Error { .. }
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Connecting => write!(f, "connecting"),
            TaskStatus::Downloading => write!(f, "downloading"),
            TaskStatus::Finished => write!(f, "finished"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Error { message, .. } => write!(f, "error: {message}"),
        }
    }
}

/// One report from the pipeline's worker threads.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub recording_id: String,
    pub status: TaskStatus,
    pub downloaded: u64,
    pub declared_size: Option<u64>,
    pub percent: Option<u8>,
    pub eta: Option<Duration>,
    /// Transient status-line text, e.g. a retry countdown.
    pub message: Option<String>,
}

/// Observer invoked from pipeline worker threads. Implementations own
/// their own delivery and threading concerns.
pub trait ProgressObserver: Send + Sync {
    fn update(&self, update: ProgressUpdate);
}

/// Byte-count tracker producing throttled percentage/ETA estimates; a
/// report is only due every `min_delta` bytes so observers are not flooded.
pub struct ProgressEstimator {
    started: Instant,
    downloaded: u64,
    declared_size: Option<u64>,
    last_reported: u64,
    min_delta: u64,
}

impl ProgressEstimator {
    pub fn new(declared_size: Option<u64>, min_delta: u64) -> Self {
        Self {
            started: Instant::now(),
            downloaded: 0,
            declared_size,
            last_reported: 0,
            min_delta,
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Records `n` more bytes; returns the percentage and ETA when a
    /// report is due.
    pub fn advance(&mut self, n: u64) -> Option<(Option<u8>, Option<Duration>)> {
        self.downloaded += n;

        if self.downloaded - self.last_reported < self.min_delta {
            return None;
        }

        self.last_reported = self.downloaded;

        let percent = self
            .declared_size
            .filter(|&total| total > 0)
            .map(|total| ((self.downloaded * 100) / total).min(100) as u8);

        let eta = self.declared_size.and_then(|total| {
            let elapsed = self.started.elapsed().as_secs_f64();
            let speed = self.downloaded as f64 / elapsed.max(0.001);
            let remaining = total.saturating_sub(self.downloaded);

            (speed > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / speed))
        });

        Some((percent, eta))
    }
}

/// Renders task progress as a single rewritten terminal line.
pub struct TermReporter {
    line: Mutex<()>,
}

impl TermReporter {
    pub fn new() -> Self {
        Self {
            line: Mutex::new(()),
        }
    }
}

impl ProgressObserver for TermReporter {
    fn update(&self, update: ProgressUpdate) {
        let _guard = self.line.lock().unwrap();
        let stderr = io::stderr();
        let mut handle = stderr.lock();

        if update.status.is_terminal() {
            let status = match &update.status {
                TaskStatus::Finished => "finished".bold().green(),
                TaskStatus::Cancelled => "cancelled".bold().yellow(),
                _ => update.status.to_string().bold().red(),
            };
            let _ = writeln!(
                handle,
                "\r\x1B[2K{} {} ({})",
                status,
                update.recording_id,
                ByteSize(update.downloaded)
            );
            return;
        }

        if let Some(message) = &update.message {
            let _ = write!(
                handle,
                "\r\x1B[2K{} {} {}",
                update.status.to_string().bold().cyan(),
                update.recording_id,
                message
            );
            let _ = handle.flush();
            return;
        }

        let total = update
            .declared_size
            .map(|total| format!("/{}", ByteSize(total)))
            .unwrap_or_default();
        let percent = update
            .percent
            .map(|p| format!(" ({p}%)").cyan().to_string())
            .unwrap_or_default();
        let eta = update
            .eta
            .map(|eta| format!(" ETA:{}", Eta(eta)).yellow().to_string())
            .unwrap_or_default();

        let _ = write!(
            handle,
            "\r\x1B[2K{} {} {}{}{}{}",
            update.status.to_string().bold().cyan(),
            update.recording_id,
            ByteSize(update.downloaded),
            total,
            percent,
            eta,
        );
        let _ = handle.flush();
    }
}

pub struct ByteSize(pub u64);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KIB: f64 = 1024.0;
        const MIB: f64 = KIB * 1024.0;
        const GIB: f64 = MIB * 1024.0;

        let bytes = self.0 as f64;

        if bytes >= GIB {
            write!(f, "{:.1}GiB", bytes / GIB)
        } else if bytes >= MIB {
            write!(f, "{:.1}MiB", bytes / MIB)
        } else if bytes >= KIB {
            write!(f, "{:.1}KiB", bytes / KIB)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

pub struct Eta(pub Duration);

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_seconds = self.0.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            write!(f, "{hours}h{minutes}m{seconds}s")
        } else if minutes > 0 {
            write!(f, "{minutes}m{seconds}s")
        } else {
            write!(f, "{seconds}s")
        }
    }
}
