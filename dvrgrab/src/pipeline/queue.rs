use crate::{
    client::Fetcher,
    history::ArchiveHistory,
    pipeline::task::{self, ArchiveRequest, ArchiveTask, RetryPolicy, TaskContext, UrlResolver},
    progress::{ProgressObserver, ProgressUpdate, TaskStatus},
};
use anyhow::{Result, bail};
use log::debug;
use std::{
    collections::HashMap,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use threadpool::ThreadPool;

/// Callback fired when the queue transitions between empty and non-empty.
pub type QueueListener = Box<dyn Fn(bool) + Send + Sync>;

/// The archive queue: a Recording→Task map over a bounded worker pool.
///
/// At most `threads` transfers run in parallel; everything else waits in
/// the pool's backlog in `Queued`. A recording can have at most one active
/// task; the entry leaves the map when the task reaches a terminal state,
/// after which the recording may be enqueued again.
pub struct ArchiveQueue {
    inner: Arc<QueueInner>,
    pool: ThreadPool,
}

struct QueueInner {
    tasks: Mutex<HashMap<String, Arc<ArchiveTask>>>,
    idle: Condvar,
    shutting_down: AtomicBool,
    listener: Mutex<Option<QueueListener>>,
    ctx: TaskContext,
}

impl QueueInner {
    fn notify(&self, empty: bool) {
        if let Some(listener) = &*self.listener.lock().unwrap() {
            listener(empty);
        }
    }

    fn finish(&self, recording_id: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.remove(recording_id);
        let empty = tasks.is_empty();
        drop(tasks);

        if empty {
            self.notify(true);
        }

        self.idle.notify_all();
    }
}

impl ArchiveQueue {
    pub(crate) fn with_context(threads: usize, ctx: TaskContext) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tasks: Mutex::new(HashMap::new()),
                idle: Condvar::new(),
                shutting_down: AtomicBool::new(false),
                listener: Mutex::new(None),
                ctx,
            }),
            pool: ThreadPool::with_name("archive".to_owned(), threads),
        }
    }

    pub fn new(
        threads: usize,
        policy: RetryPolicy,
        mak: &str,
        resolver: Arc<dyn UrlResolver>,
        fetcher: Arc<dyn Fetcher>,
        observer: Arc<dyn ProgressObserver>,
        history: Arc<dyn ArchiveHistory>,
    ) -> Self {
        Self::with_context(
            threads,
            TaskContext {
                resolver,
                fetcher,
                observer,
                history,
                policy,
                mak: mak.to_owned(),
            },
        )
    }

    /// Registers the empty↔non-empty transition listener.
    pub fn on_queue_change(&self, listener: QueueListener) {
        *self.inner.listener.lock().unwrap() = Some(listener);
    }

    /// Enqueues an archive. Fails while shutting down, and when the
    /// recording already has an active task.
    pub fn enqueue(&self, request: ArchiveRequest) -> Result<Arc<ArchiveTask>> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            bail!("the archive queue is shutting down");
        }

        let recording_id = request.recording.recording_id.clone();
        let (task, first) = {
            let mut tasks = self.inner.tasks.lock().unwrap();

            if tasks.contains_key(&recording_id) {
                bail!("recording {recording_id} already has an active task");
            }

            let task = Arc::new(ArchiveTask::new(recording_id.clone()));
            tasks.insert(recording_id.clone(), task.clone());
            (task, tasks.len() == 1)
        };

        if first {
            self.inner.notify(false);
        }

        self.inner.ctx.observer.update(ProgressUpdate {
            recording_id: recording_id.clone(),
            status: TaskStatus::Queued,
            downloaded: 0,
            declared_size: None,
            percent: None,
            eta: None,
            message: None,
        });

        let inner = self.inner.clone();
        let worker_task = task.clone();

        self.pool.execute(move || {
            let terminal = task::run(&worker_task, &request, &inner.ctx);
            debug!("{recording_id}: {terminal}");
            inner.finish(&recording_id);
        });

        Ok(task)
    }

    /// Cancels one recording's task, if it has one. Returns whether a task
    /// was found.
    pub fn cancel(&self, recording_id: &str) -> bool {
        match self.inner.tasks.lock().unwrap().get(recording_id) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for task in self.inner.tasks.lock().unwrap().values() {
            task.cancel();
        }
    }

    /// Stops accepting work; running tasks are unaffected.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Whether any task is queued or running; gates application shutdown.
    pub fn has_active(&self) -> bool {
        !self.inner.tasks.lock().unwrap().is_empty()
    }

    /// Blocks until every enqueued task has reached a terminal state.
    pub fn join(&self) {
        let mut tasks = self.inner.tasks.lock().unwrap();

        while !tasks.is_empty() {
            tasks = self.inner.idle.wait(tasks).unwrap();
        }
    }
}
