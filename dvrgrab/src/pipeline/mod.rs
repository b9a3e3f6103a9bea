mod pipe;
mod queue;
mod task;

pub use pipe::{PipeReader, PipeWriter, byte_pipe};
pub use queue::{ArchiveQueue, QueueListener};
pub use task::{ArchiveRequest, ArchiveTask, MindResolver, RetryPolicy, UrlResolver};
