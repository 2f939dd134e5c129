//! Single-worker execution queue.
//!
//! ```text
//!  scheduler ─┐
//!  cli/api ───┼─▶ submit() ─▶ [ FIFO ] ─▶ worker ─▶ spawn_blocking(TaskRunner::run)
//!  manager ───┘       │                      │
//!                     ▼                      ├─▶ history (pending → running → complete)
//!               ExecutionId                  └─▶ live stream (progress, log, summary)
//! ```
//! Exactly one task runs at a time; the SQLite store is never written from two
//! executions concurrently. Producers only touch the queue and the history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use autoflow_core::{AutoflowError, ConfigHandle, Result, TaskOptions, TaskSummary};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::history::{ExecutionHistory, ExecutionId, ExecutionRecord, ExecutionResult, ExecutionStatus};
use crate::log_capture;
use crate::runner::{RunObserver, TaskOutcome, TaskRunner};
use crate::stream::{self, Progress, StreamReader, StreamRecord, StreamSender};

/// Where the worker looks up a task's current config at dequeue time.
pub trait TaskSource: Send + Sync {
    fn task_config(&self, name: &str) -> Option<Value>;
}

impl TaskSource for ConfigHandle {
    fn task_config(&self, name: &str) -> Option<Value> {
        self.current().task(name).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub history_capacity: usize,
    pub stream_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            stream_capacity: 1000,
        }
    }
}

struct RunRequest {
    id: ExecutionId,
    task: String,
    options: TaskOptions,
    sender: Arc<StreamSender>,
    cancel: Arc<AtomicBool>,
}

/// State shared between producers and the worker.
struct Shared {
    history: Mutex<ExecutionHistory>,
    readers: Mutex<HashMap<ExecutionId, StreamReader>>,
    cancels: Mutex<HashMap<ExecutionId, Arc<AtomicBool>>>,
    shutting_down: AtomicBool,
    /// Bumped after every completion; `wait` subscribes to it.
    completions: watch::Sender<u64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn complete(&self, id: ExecutionId, f: impl FnOnce(&mut ExecutionRecord)) {
        let evicted = lock(&self.history).complete(id, f);
        lock(&self.cancels).remove(&id);
        if !evicted.is_empty() {
            let mut readers = lock(&self.readers);
            for old in evicted {
                readers.remove(&old);
            }
        }
        self.completions.send_modify(|n| *n += 1);
    }

    /// Complete an execution that did not run to the end of its phase loop,
    /// leaving the reason as the stream's terminal summary.
    fn complete_early(&self, id: ExecutionId, sender: &StreamSender, result: ExecutionResult, message: String) {
        let summary = match result {
            ExecutionResult::Aborted => TaskSummary::aborted_with(message.clone()),
            _ => TaskSummary::errored(message.clone()),
        };
        sender.send_terminal(StreamRecord::Summary(summary));
        self.complete(id, |r| {
            r.result = Some(result);
            r.message = Some(message);
        });
    }
}

pub struct Executor {
    shared: Arc<Shared>,
    config: ExecutorConfig,
    tx: Mutex<Option<mpsc::UnboundedSender<RunRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn start(runner: Arc<TaskRunner>, source: Arc<dyn TaskSource>, config: ExecutorConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (completions, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            history: Mutex::new(ExecutionHistory::new(config.history_capacity)),
            readers: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            completions,
        });
        let worker = tokio::spawn(worker_loop(rx, shared.clone(), runner, source));
        tracing::info!("⚙️ Executor started (history {}, stream {})", config.history_capacity, config.stream_capacity);
        Self {
            shared,
            config,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a run. Never blocks.
    pub fn submit(&self, task: &str, options: TaskOptions) -> Result<ExecutionId> {
        let tx = lock(&self.tx);
        let Some(tx) = tx.as_ref() else {
            return Err(AutoflowError::Shutdown);
        };

        let id = ExecutionId::new();
        let (sender, reader) = stream::channel(self.config.stream_capacity);
        let cancel = Arc::new(AtomicBool::new(false));

        let evicted = lock(&self.shared.history).push(ExecutionRecord::pending(id, task, options.clone()));
        {
            let mut readers = lock(&self.shared.readers);
            for old in evicted {
                readers.remove(&old);
            }
            readers.insert(id, reader);
        }
        lock(&self.shared.cancels).insert(id, cancel.clone());

        let request = RunRequest {
            id,
            task: task.to_string(),
            options,
            sender: Arc::new(sender),
            cancel,
        };
        if let Err(mpsc::error::SendError(request)) = tx.send(request) {
            self.shared.complete_early(
                id,
                &request.sender,
                ExecutionResult::Error,
                AutoflowError::Shutdown.to_string(),
            );
            return Err(AutoflowError::Shutdown);
        }
        tracing::debug!("Queued execution {id} for task '{task}'");
        Ok(id)
    }

    pub fn status(&self, id: ExecutionId) -> Option<ExecutionRecord> {
        lock(&self.shared.history).get(id).cloned()
    }

    pub fn history(&self) -> Vec<ExecutionRecord> {
        lock(&self.shared.history).list()
    }

    pub fn count(&self, status: ExecutionStatus) -> usize {
        lock(&self.shared.history).count(status)
    }

    /// Take the live stream of an execution. Each stream has one reader.
    pub fn stream(&self, id: ExecutionId) -> Option<StreamReader> {
        lock(&self.shared.readers).remove(&id)
    }

    /// Request cancellation. False if the execution is unknown or done.
    pub fn cancel(&self, id: ExecutionId) -> bool {
        match lock(&self.shared.cancels).get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                tracing::info!("🚫 Cancel requested for execution {id}");
                true
            }
            None => false,
        }
    }

    /// Wait until the execution is complete.
    pub async fn wait(&self, id: ExecutionId) -> Option<ExecutionRecord> {
        let mut completions = self.shared.completions.subscribe();
        loop {
            match self.status(id) {
                Some(record) if record.is_complete() => return Some(record),
                None => return None,
                Some(_) => {}
            }
            if completions.changed().await.is_err() {
                return self.status(id);
            }
        }
    }

    /// Stop accepting work, cancel the running execution, fail whatever is
    /// still queued and wait for the worker to exit.
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("🛑 Executor shutting down");
        lock(&self.tx).take();
        for flag in lock(&self.shared.cancels).values() {
            flag.store(true, Ordering::SeqCst);
        }
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("❌ Executor worker ended abnormally: {e}");
            }
        }
        lock(&self.shared.readers).clear();
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<RunRequest>,
    shared: Arc<Shared>,
    runner: Arc<TaskRunner>,
    source: Arc<dyn TaskSource>,
) {
    while let Some(request) = rx.recv().await {
        let id = request.id;

        if shared.shutting_down.load(Ordering::SeqCst) {
            shared.complete_early(
                id,
                &request.sender,
                ExecutionResult::Error,
                AutoflowError::Shutdown.to_string(),
            );
            continue;
        }
        if request.cancel.load(Ordering::SeqCst) {
            tracing::info!("Execution {id} cancelled before start");
            shared.complete_early(id, &request.sender, ExecutionResult::Aborted, "cancelled".into());
            continue;
        }
        let Some(config) = source.task_config(&request.task) else {
            let err = AutoflowError::NotFound(format!("task '{}'", request.task));
            tracing::error!("❌ Execution {id}: {err}");
            shared.complete_early(id, &request.sender, ExecutionResult::Error, err.to_string());
            continue;
        };

        lock(&shared.history).update(id, |r| {
            r.status = ExecutionStatus::Running;
            r.started = Some(Utc::now());
        });

        let sender = request.sender.clone();
        let runner = runner.clone();
        let RunRequest {
            task, options, cancel, ..
        } = request;
        let joined = tokio::task::spawn_blocking(move || {
            let observer = StreamObserver {
                sender: sender.clone(),
                cancel,
            };
            log_capture::capture(sender, || runner.run(&task, &config, options, &observer))
        })
        .await;

        match joined {
            Ok(run) => {
                let sender = &request.sender;
                if let Some(entries) = run.entries {
                    sender.send_terminal(StreamRecord::EntryDump(entries));
                }
                let summary = match &run.outcome {
                    TaskOutcome::Completed { summary } | TaskOutcome::Aborted { summary } => summary.clone(),
                    TaskOutcome::Error { message } => TaskSummary::errored(message.clone()),
                };
                sender.send_terminal(StreamRecord::Summary(summary));
                if sender.dropped() > 0 {
                    tracing::debug!("Execution {id}: {} stream records dropped", sender.dropped());
                }
                shared.complete(id, |r| match run.outcome {
                    TaskOutcome::Completed { summary } => {
                        r.result = Some(ExecutionResult::Completed);
                        r.summary = Some(summary);
                    }
                    TaskOutcome::Aborted { summary } => {
                        r.result = Some(ExecutionResult::Aborted);
                        r.message = summary.abort_reason.clone();
                        r.summary = Some(summary);
                    }
                    TaskOutcome::Error { message } => {
                        r.result = Some(ExecutionResult::Error);
                        r.message = Some(message);
                    }
                });
            }
            Err(e) => {
                tracing::error!("❌ Execution {id} panicked: {e}");
                shared.complete_early(id, &request.sender, ExecutionResult::Error, format!("task panicked: {e}"));
            }
        }
        // `request.sender` drops here and the stream closes.
    }
    tracing::debug!("Executor worker stopped");
}

struct StreamObserver {
    sender: Arc<StreamSender>,
    cancel: Arc<AtomicBool>,
}

impl RunObserver for StreamObserver {
    fn progress(&self, progress: Progress) {
        self.sender.send(StreamRecord::Progress(progress));
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}
