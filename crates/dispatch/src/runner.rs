//! The bounded FIFO task runner.
//!
//! Single-threaded cooperative: one task in flight at a time. Failed tasks
//! are retried up to their attempt bound with exponential backoff, and a
//! retry goes back to the *front* of the queue so ordering within a batch
//! is preserved.

use chattermill_core::error::TaskError;
use chattermill_core::task::{Task, TaskKind, TaskPayload, TaskPriority};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Completion future for an enqueued task: resolves on success, carries the
/// terminal error otherwise.
pub type TaskCompletion = oneshot::Receiver<Result<(), TaskError>>;

/// One registered task handler.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &TaskPayload) -> chattermill_core::Result<()>;
}

struct QueuedTask {
    task: Task,
    done: oneshot::Sender<Result<(), TaskError>>,
}

struct Inner {
    queue: VecDeque<QueuedTask>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

/// Process-wide bounded task queue with priority insertion.
pub struct TaskRunner {
    inner: Mutex<Inner>,
    notify: Notify,
    stop: watch::Sender<bool>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
    default_max_attempts: u32,
}

impl TaskRunner {
    pub fn new(default_max_attempts: u32) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                handlers: HashMap::new(),
            }),
            notify: Notify::new(),
            stop,
            worker: std::sync::Mutex::new(None),
            default_max_attempts,
        }
    }

    /// Register the handler for a task kind. Enqueueing a kind with no
    /// handler fails.
    pub async fn register(&self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        self.inner.lock().await.handlers.insert(kind, handler);
    }

    /// Enqueue a task: appended at normal priority, prepended at high.
    ///
    /// Returns a future resolving when the task finally succeeds or fails.
    pub async fn enqueue(
        &self,
        payload: TaskPayload,
        priority: TaskPriority,
        max_attempts: Option<u32>,
    ) -> Result<TaskCompletion, TaskError> {
        if *self.stop.borrow() {
            return Err(TaskError::ShuttingDown);
        }

        let mut inner = self.inner.lock().await;
        let kind = payload.kind();
        if !inner.handlers.contains_key(&kind) {
            return Err(TaskError::NoHandler(kind.to_string()));
        }

        let task = Task::new(payload, max_attempts.unwrap_or(self.default_max_attempts));
        debug!(kind = %kind, id = %task.id, ?priority, "Task enqueued");

        let (done, completion) = oneshot::channel();
        let queued = QueuedTask { task, done };
        match priority {
            TaskPriority::Normal => inner.queue.push_back(queued),
            TaskPriority::High => inner.queue.push_front(queued),
        }
        drop(inner);

        self.notify.notify_one();
        Ok(completion)
    }

    /// Tasks currently waiting (excludes the one in flight).
    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Spawn the single worker. Call once at startup.
    pub fn start(self: &Arc<Self>) {
        let runner = Arc::clone(self);
        let mut stop_rx = self.stop.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                if *stop_rx.borrow() {
                    break;
                }

                let next = { runner.inner.lock().await.queue.pop_front() };
                let Some(mut queued) = next else {
                    tokio::select! {
                        _ = runner.notify.notified() => continue,
                        _ = stop_rx.changed() => break,
                    }
                };

                queued.task.attempts += 1;
                let kind = queued.task.kind();
                let handler = { runner.inner.lock().await.handlers.get(&kind).cloned() };
                let Some(handler) = handler else {
                    let _ = queued.done.send(Err(TaskError::NoHandler(kind.to_string())));
                    continue;
                };

                match handler.handle(&queued.task.payload).await {
                    Ok(()) => {
                        debug!(kind = %kind, id = %queued.task.id, attempts = queued.task.attempts, "Task completed");
                        let _ = queued.done.send(Ok(()));
                    }
                    Err(err) if queued.task.attempts < queued.task.max_attempts => {
                        let delay = retry_delay(queued.task.attempts);
                        warn!(
                            kind = %kind,
                            id = %queued.task.id,
                            attempts = queued.task.attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Task failed; will retry"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {
                                // Prepend so the retry stays ahead of
                                // anything enqueued meanwhile.
                                runner.inner.lock().await.queue.push_front(queued);
                            }
                            _ = stop_rx.changed() => {
                                let _ = queued.done.send(Err(TaskError::ShuttingDown));
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(
                            kind = %kind,
                            id = %queued.task.id,
                            attempts = queued.task.attempts,
                            error = %err,
                            "Task failed terminally"
                        );
                        let _ = queued.done.send(Err(TaskError::Terminal {
                            kind: kind.to_string(),
                            attempts: queued.task.attempts,
                            last: err.to_string(),
                        }));
                    }
                }
            }
            debug!("Task runner worker stopped");
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Stop accepting work, let the in-flight task finish, and reject
    /// everything still queued.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);
        self.notify.notify_one();

        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let mut inner = self.inner.lock().await;
        let discarded = inner.queue.len();
        while let Some(queued) = inner.queue.pop_front() {
            let _ = queued.done.send(Err(TaskError::ShuttingDown));
        }
        if discarded > 0 {
            info!(discarded, "Task runner discarded queued tasks at shutdown");
        }
    }
}

/// `min(1s · 2^(attempts−1), 10s)`.
fn retry_delay(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    Duration::from_secs(1)
        .saturating_mul(1u32 << exp)
        .min(Duration::from_secs(10))
}
