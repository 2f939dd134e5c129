//! Process facade — owns the config generation, the store, the executor and
//! the scheduler, and exposes the operations the CLI (or any other front end)
//! needs.
//!
//! ```text
//!            ┌─────────────┐  reload()   ┌──────────────┐
//!  CLI ─────▶│   Manager   │────────────▶│ ConfigHandle │◀── worker reads task config
//!            └──┬───────┬──┘             └──────────────┘
//!     execute() │       │ schedules CRUD
//!        ┌──────▼──┐ ┌──▼──────────────┐
//!        │Executor │◀│ SchedulerEngine │ (tick → Submitter)
//!        └─────────┘ └─────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::{Mutex, watch};

use autoflow_core::{
    AutoflowConfig, AutoflowError, ConfigHandle, PluginFilter, PluginInfo, PluginRegistry, Result, ScheduleConfig,
    Store, TaskOptions,
};
use autoflow_engine::{
    ExecutionId, ExecutionRecord, Executor, ExecutorConfig, StreamReader, TaskRunner, TaskSource,
};
use autoflow_scheduler::{ScheduleInfo, SchedulerEngine, Submitter, spawn_scheduler};

use crate::selection::{self, Selected};

/// Feeds scheduler fires into the executor queue.
struct ExecutorSubmitter(Arc<Executor>);

impl Submitter for ExecutorSubmitter {
    fn submit(&self, task: &str, options: TaskOptions) -> Result<()> {
        self.0.submit(task, options).map(|_| ())
    }
}

pub struct Manager {
    config_path: Option<PathBuf>,
    registry: Arc<PluginRegistry>,
    config: ConfigHandle,
    executor: Arc<Executor>,
    scheduler: Arc<Mutex<SchedulerEngine>>,
    shutdown: watch::Sender<bool>,
}

impl Manager {
    /// Load `path`, open the store it names and start the executor.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path, registry: Arc<PluginRegistry>) -> Result<Self> {
        let config = AutoflowConfig::load_from(path, &registry)?;
        let store = Arc::new(Store::open(&config.daemon.db_path())?);
        let mut manager = Self::start(config, registry, store)?;
        manager.config_path = Some(path.to_path_buf());
        tracing::info!("📂 Config loaded from {}", path.display());
        Ok(manager)
    }

    /// Start from an already validated config.
    pub fn start(config: AutoflowConfig, registry: Arc<PluginRegistry>, store: Arc<Store>) -> Result<Self> {
        let mut scheduler = SchedulerEngine::new();
        scheduler.load(&config.schedules, Local::now())?;

        let executor_config = ExecutorConfig {
            history_capacity: config.daemon.history_capacity,
            stream_capacity: config.daemon.stream_capacity,
        };
        let handle = ConfigHandle::new(config);
        let runner = Arc::new(TaskRunner::new(registry.clone()).with_store(store));
        let source: Arc<dyn TaskSource> = Arc::new(handle.clone());
        let executor = Arc::new(Executor::start(runner, source, executor_config));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config_path: None,
            registry,
            config: handle,
            executor,
            scheduler: Arc::new(Mutex::new(scheduler)),
            shutdown,
        })
    }

    pub fn config(&self) -> Arc<AutoflowConfig> {
        self.config.current()
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    // ── Executions ──────────────────────────────────────────

    /// Resolve selectors (`all`, names, glob patterns) without submitting.
    pub fn select(&self, selectors: &[String]) -> Result<Vec<Selected>> {
        selection::select(&self.config(), selectors)
    }

    /// Submit one execution per selected task. Explicitly named tasks may run
    /// even when marked `manual`.
    pub fn execute(&self, selectors: &[String], options: TaskOptions) -> Result<Vec<(String, ExecutionId)>> {
        let selected = self.select(selectors)?;
        let mut ids = Vec::with_capacity(selected.len());
        for Selected { task, explicit } in selected {
            let options = TaskOptions {
                allow_manual: options.allow_manual || explicit,
                ..options.clone()
            };
            let id = self.executor.submit(&task, options)?;
            tracing::info!("📥 Queued '{task}' as {id}");
            ids.push((task, id));
        }
        Ok(ids)
    }

    pub fn submit(&self, task: &str, options: TaskOptions) -> Result<ExecutionId> {
        self.executor.submit(task, options)
    }

    pub fn status(&self, id: ExecutionId) -> Result<ExecutionRecord> {
        self.executor
            .status(id)
            .ok_or_else(|| AutoflowError::NotFound(format!("execution {id}")))
    }

    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.executor.history()
    }

    pub fn stream(&self, id: ExecutionId) -> Option<StreamReader> {
        self.executor.stream(id)
    }

    pub fn cancel(&self, id: ExecutionId) -> bool {
        self.executor.cancel(id)
    }

    pub async fn wait(&self, id: ExecutionId) -> Option<ExecutionRecord> {
        self.executor.wait(id).await
    }

    // ── Config reload ───────────────────────────────────────

    /// Re-read the config file. On any error the running generation stays.
    pub async fn reload(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            return Err(AutoflowError::NotFound("config file (manager was started without one)".into()));
        };
        match AutoflowConfig::load_from(path, &self.registry) {
            Ok(config) => self.apply(config).await,
            Err(e) => {
                tracing::error!("❌ Reload failed, keeping current config: {e}");
                Err(e)
            }
        }
    }

    /// Swap in a new config tree, schedules first. The scheduler lock is held
    /// across both steps so schedule edits cannot interleave.
    pub async fn apply(&self, config: AutoflowConfig) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        if self.config().daemon != config.daemon {
            tracing::warn!("⚠️ [daemon] changes take effect after a restart");
        }
        scheduler.load(&config.schedules, Local::now())?;
        let tasks = config.tasks.len();
        self.config.replace(config);
        drop(scheduler);
        tracing::info!("🔄 Config reloaded: {tasks} task(s)");
        Ok(())
    }

    // ── Schedules ───────────────────────────────────────────

    pub async fn schedules(&self) -> Vec<ScheduleInfo> {
        self.scheduler.lock().await.list()
    }

    pub async fn schedule(&self, id: u64) -> Option<ScheduleInfo> {
        self.scheduler.lock().await.get(id)
    }

    pub async fn add_schedule(&self, config: ScheduleConfig) -> Result<ScheduleInfo> {
        validate_schedule(&config)?;
        let mut scheduler = self.scheduler.lock().await;
        let info = scheduler.add(config, Local::now())?;
        self.sync_schedules(&scheduler);
        Ok(info)
    }

    pub async fn update_schedule(&self, id: u64, config: ScheduleConfig) -> Result<ScheduleInfo> {
        validate_schedule(&config)?;
        let mut scheduler = self.scheduler.lock().await;
        let info = scheduler.update(id, config, Local::now())?;
        self.sync_schedules(&scheduler);
        Ok(info)
    }

    pub async fn remove_schedule(&self, id: u64) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        scheduler.remove(id)?;
        self.sync_schedules(&scheduler);
        Ok(())
    }

    /// Mirror schedule edits into the in-memory config. Callers hold the
    /// scheduler lock.
    fn sync_schedules(&self, scheduler: &SchedulerEngine) {
        let mut config = (*self.config()).clone();
        config.schedules = scheduler.configs();
        self.config.replace(config);
    }

    // ── Introspection ───────────────────────────────────────

    pub fn plugins(&self, filter: PluginFilter, include_schema: bool) -> Vec<PluginInfo> {
        self.registry.info(filter, include_schema)
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Run the scheduler until ctrl-c or [`Manager::shutdown`].
    pub async fn run_daemon(&self) -> Result<()> {
        let check_interval = self.config().daemon.check_interval_secs;
        let submitter: Arc<dyn Submitter> = Arc::new(ExecutorSubmitter(self.executor.clone()));
        let scheduler = tokio::spawn(spawn_scheduler(
            self.scheduler.clone(),
            submitter,
            check_interval,
            self.shutdown.subscribe(),
        ));
        tracing::info!("🚀 Daemon running with {} schedule(s)", self.schedules().await.len());

        let mut stop = self.shutdown.subscribe();
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::error!("❌ Failed to listen for ctrl-c: {e}");
                }
                tracing::info!("Received ctrl-c");
            }
            _ = stop.wait_for(|stopped| *stopped) => {}
        }

        self.shutdown().await;
        if let Err(e) = scheduler.await {
            tracing::error!("❌ Scheduler task ended abnormally: {e}");
        }
        Ok(())
    }

    /// Stop the scheduler, drain the executor and close every stream.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.executor.shutdown().await;
        tracing::info!("👋 Manager stopped");
    }
}

fn validate_schedule(config: &ScheduleConfig) -> Result<()> {
    let raw = serde_json::to_value(config)
        .map_err(|e| AutoflowError::config(format!("unserializable schedule: {e}"), vec![]))?;
    let (_, errors) = autoflow_core::schema::process_config(&raw, &autoflow_core::config::schedule_schema(), false);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AutoflowError::config("invalid schedule", errors))
    }
}
