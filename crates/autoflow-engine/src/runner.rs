//! Task runner — drives one task through the fixed phase sequence.
//!
//! ```text
//! validate config ─▶ resolve plugins ─▶ inject entries
//!   ─▶ start ─▶ input ─(validate, dedup, snapshot)─▶ metainfo ─▶ filter
//!   ─▶ download ─▶ modify ─▶ output ─▶ learn
//!   ─▶ [abort, only when aborted] ─▶ exit (always)
//! ```
//! Between phases the runner checks the abort flag and the cancel request.
//! A `Fatal` plugin error aborts the task and skips the rest of its phase;
//! `task.abort()` from a handler takes effect at the phase boundary.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use autoflow_core::registry::PhaseHandlerRef;
use autoflow_core::{
    AutoflowError, Entry, EntryState, Phase, PluginError, PluginRegistry, Store, Task, TaskOptions, TaskSummary,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::Progress;

/// Snapshot taken right after the input phase.
pub const AFTER_INPUT: &str = "after_input";

/// Task config keys that are not plugins.
const RESERVED_KEYS: [&str; 2] = ["template", "disable"];

/// Terminal state of one run; exactly one per execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TaskOutcome {
    Completed { summary: TaskSummary },
    Aborted { summary: TaskSummary },
    Error { message: String },
}

impl TaskOutcome {
    pub fn summary(&self) -> Option<&TaskSummary> {
        match self {
            TaskOutcome::Completed { summary } | TaskOutcome::Aborted { summary } => Some(summary),
            TaskOutcome::Error { .. } => None,
        }
    }
}

/// Outcome plus optional entry dump.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRun {
    pub outcome: TaskOutcome,
    pub entries: Option<Vec<Value>>,
}

/// Hooks for whoever runs the task (the executor, or tests).
pub trait RunObserver {
    fn progress(&self, _progress: Progress) {}

    /// Polled between phases.
    fn cancelled(&self) -> bool {
        false
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Runs tasks against a frozen registry and a shared store.
pub struct TaskRunner {
    registry: Arc<PluginRegistry>,
    store: Option<Arc<Store>>,
}

impl TaskRunner {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry, store: None }
    }

    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Run task `name` with its (template-merged) config.
    pub fn run(&self, name: &str, config: &Value, options: TaskOptions, observer: &dyn RunObserver) -> TaskRun {
        let dump = options.dump_entries;
        let mut task = match self.prepare(name, config, options) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!("❌ Task '{name}' failed to start: {e}");
                for detail in e.validation_errors() {
                    tracing::error!("   {detail}");
                }
                return TaskRun {
                    outcome: TaskOutcome::Error { message: e.to_string() },
                    entries: None,
                };
            }
        };

        let plugins = match self.active_plugins(&task) {
            Ok(plugins) => plugins,
            Err(e) => {
                tracing::error!("❌ Task '{name}': {e}");
                return TaskRun {
                    outcome: TaskOutcome::Error { message: e.to_string() },
                    entries: None,
                };
            }
        };

        tracing::info!("▶️ Running task '{name}'");
        let mut engine = PhaseEngine::new(&self.registry, &plugins, task.options().learn, observer);
        engine.run(&mut task);

        let summary = task.summary();
        let entries = dump.then(|| {
            task.entries_mut()
                .iter_mut()
                .map(|e| {
                    e.force_all();
                    e.to_dump()
                })
                .collect()
        });

        let outcome = if task.is_aborted() {
            tracing::info!(
                "⏹️ Task '{name}' aborted: {}",
                task.abort_reason().unwrap_or("unknown reason")
            );
            TaskOutcome::Aborted { summary }
        } else {
            tracing::info!(
                "✅ Task '{name}' done: {} accepted, {} rejected, {} failed, {} undecided",
                summary.accepted,
                summary.rejected,
                summary.failed,
                summary.undecided
            );
            TaskOutcome::Completed { summary }
        };
        TaskRun { outcome, entries }
    }

    fn prepare(&self, name: &str, config: &Value, options: TaskOptions) -> autoflow_core::Result<Task> {
        let (config, errors) = self.registry.process_task_config(config, true);
        if !errors.is_empty() {
            let mut errors = errors;
            autoflow_core::schema::prefix_errors(&mut errors, &format!("/tasks/{name}"));
            return Err(AutoflowError::config(format!("task '{name}' has an invalid config"), errors));
        }

        let inject = options.inject.clone();
        let mut task = Task::new(name, config, options, self.registry.clone());
        if let Some(store) = &self.store {
            task = task.with_store(store.clone());
        }
        for item in inject {
            match item {
                Value::Object(map) => task.add_entry(Entry::from_map(map)),
                other => tracing::warn!("⚠️ Ignoring injected non-object entry: {other}"),
            }
        }
        Ok(task)
    }

    /// Configured plugins plus enabled builtins, with dependencies checked.
    fn active_plugins(&self, task: &Task) -> autoflow_core::Result<BTreeSet<String>> {
        let requester = format!("task {}", task.name());
        let mut active = BTreeSet::new();
        if let Some(config) = task.config().as_object() {
            for key in config.keys() {
                if RESERVED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                self.registry.get(key, Some(&requester))?;
                active.insert(key.clone());
            }
        }

        let disabled = disabled_plugins(task.config());
        for plugin in self.registry.plugins(Default::default()) {
            if !plugin.builtin || active.contains(&plugin.name) {
                continue;
            }
            if disabled.contains("builtins") || disabled.contains(plugin.name.as_str()) {
                tracing::debug!("Builtin '{}' disabled for task '{}'", plugin.name, task.name());
                continue;
            }
            active.insert(plugin.name.clone());
        }

        for name in &active {
            let plugin = self.registry.get(name, Some(&requester))?;
            for dep in &plugin.dependencies {
                self.registry.get(dep, Some(&format!("plugin {name}")))?;
            }
        }
        Ok(active)
    }
}

fn disabled_plugins(config: &Value) -> HashSet<String> {
    match config.get("disable") {
        Some(Value::String(s)) => HashSet::from([s.clone()]),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => HashSet::new(),
    }
}

/// Phase loop state for one run.
struct PhaseEngine<'a> {
    registry: &'a PluginRegistry,
    active: &'a BTreeSet<String>,
    learn: bool,
    observer: &'a dyn RunObserver,
    planned: usize,
    done: usize,
}

impl<'a> PhaseEngine<'a> {
    fn new(
        registry: &'a PluginRegistry,
        active: &'a BTreeSet<String>,
        learn: bool,
        observer: &'a dyn RunObserver,
    ) -> Self {
        let mut engine = Self {
            registry,
            active,
            learn,
            observer,
            planned: 0,
            done: 0,
        };
        engine.planned = Phase::SEQUENCE
            .iter()
            .filter(|p| **p != Phase::Exit && !(learn && p.skipped_when_learning()))
            .map(|p| engine.handlers(*p).len())
            .sum();
        engine
    }

    fn handlers(&self, phase: Phase) -> Vec<PhaseHandlerRef> {
        self.registry
            .phase_handlers(phase)
            .into_iter()
            .filter(|h| self.active.contains(h.name()))
            .collect()
    }

    fn run(&mut self, task: &mut Task) {
        for phase in Phase::SEQUENCE {
            if phase == Phase::Exit {
                break;
            }
            if task.is_aborted() {
                break;
            }
            if self.observer.cancelled() {
                task.abort("cancelled");
                break;
            }
            if self.learn && phase.skipped_when_learning() {
                tracing::debug!("Learn mode: skipping {phase}");
                continue;
            }

            let before: Vec<EntryState> = task.entries().iter().map(Entry::state).collect();
            self.run_phase(task, phase, false);

            if phase == Phase::Input {
                finish_input(task);
            } else if phase > Phase::Input {
                restore_rejected(task, &before);
            }
        }

        if task.is_aborted() {
            self.run_phase(task, Phase::Abort, true);
        }
        self.run_phase(task, Phase::Exit, true);
        task.set_current(None, None);
        self.observer.progress(Progress {
            status: "complete".into(),
            phase: None,
            plugin: None,
            percent: 100.0,
        });
    }

    /// Run every active handler of `phase`. Cleanup phases only log errors.
    fn run_phase(&mut self, task: &mut Task, phase: Phase, cleanup: bool) {
        let handlers = self.handlers(phase);
        if handlers.is_empty() {
            return;
        }
        tracing::debug!("Phase {phase}: {} handler(s)", handlers.len());

        for handler in handlers {
            let name = handler.name().to_string();
            task.set_current(Some(phase), Some(&name));
            let config = task.plugin_config(&name).cloned().unwrap_or(Value::Null);

            let result = handler.plugin.handler().on_phase(phase, task, &config);
            if !cleanup {
                self.done += 1;
            }
            self.observer.progress(Progress {
                status: "running".into(),
                phase: Some(phase),
                plugin: Some(name.clone()),
                percent: self.percent(),
            });

            match result {
                Ok(()) => {}
                Err(PluginError::Warning(msg)) => {
                    tracing::warn!("⚠️ {name} ({phase}): {msg}");
                }
                Err(PluginError::Fatal(msg)) if cleanup => {
                    tracing::error!("❌ {name} ({phase}) failed during cleanup: {msg}");
                }
                Err(PluginError::Fatal(msg)) => {
                    tracing::error!("❌ {name} ({phase}): {msg}");
                    task.abort(format!("{name}: {msg}"));
                    break;
                }
            }
        }
    }

    fn percent(&self) -> f32 {
        if self.planned == 0 {
            return 100.0;
        }
        ((self.done as f32 / self.planned as f32) * 100.0).min(100.0)
    }
}

/// Drop invalid entries, drop duplicate urls, snapshot the rest.
fn finish_input(task: &mut Task) {
    let mut urls = HashSet::new();
    let entries = task.entries_mut();
    let before = entries.len();
    entries.retain(|e| {
        if !e.is_valid() {
            tracing::warn!("⚠️ Dropping invalid entry (missing title or url): {:?}", e.to_map());
            return false;
        }
        if !urls.insert(e.url().to_string()) {
            tracing::debug!("Dropping duplicate url {}", e.url());
            return false;
        }
        true
    });
    for entry in entries.iter_mut() {
        entry.take_snapshot(AFTER_INPUT);
    }
    tracing::debug!("Input produced {} entries ({} dropped)", entries.len(), before - entries.len());
}

/// Undo field changes on entries rejected during the last phase.
fn restore_rejected(task: &mut Task, before: &[EntryState]) {
    for (entry, was) in task.entries_mut().iter_mut().zip(before) {
        if entry.is_rejected() && *was != EntryState::Rejected {
            entry.restore_snapshot(AFTER_INPUT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_core::{ConfigContributor, PhaseHandler, PluginDescriptor, PluginSchema};
    use serde_json::json;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records every call; optionally fails or mutates entries.
    struct Recorder {
        name: &'static str,
        log: Log,
        fail_in: Option<Phase>,
        warn_in: Option<Phase>,
    }

    impl ConfigContributor for Recorder {
        fn schema(&self) -> PluginSchema {
            PluginSchema::Any
        }
    }

    impl PhaseHandler for Recorder {
        fn on_phase(&self, phase: Phase, task: &mut Task, _config: &Value) -> Result<(), PluginError> {
            self.log.lock().unwrap().push(format!("{phase}:{}", self.name));
            if self.warn_in == Some(phase) {
                return Err(PluginError::warning("minor"));
            }
            if self.fail_in == Some(phase) {
                return Err(PluginError::fatal("boom"));
            }
            if phase == Phase::Metainfo {
                for e in task.live_mut() {
                    e.set("enriched", json!(true));
                }
            }
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Log) -> Recorder {
        Recorder {
            name,
            log: log.clone(),
            fail_in: None,
            warn_in: None,
        }
    }

    fn all_phases(mut d: PluginDescriptor) -> PluginDescriptor {
        for p in Phase::ALL {
            d = d.phase(p);
        }
        d
    }

    fn registry_with(extra: impl FnOnce(&mut PluginRegistry)) -> Arc<PluginRegistry> {
        let mut reg = autoflow_plugins::builtin_registry().unwrap();
        extra(&mut reg);
        Arc::new(reg)
    }

    fn calls(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_handler_order_is_priority_then_name() {
        let log: Log = Default::default();
        let reg = registry_with(|r| {
            r.register(PluginDescriptor::new("zz", Arc::new(recorder("zz", &log))).phase(Phase::Filter))
                .unwrap();
            r.register(PluginDescriptor::new("aa", Arc::new(recorder("aa", &log))).phase(Phase::Filter))
                .unwrap();
            r.register(
                PluginDescriptor::new("hi", Arc::new(recorder("hi", &log))).phase_priority(Phase::Filter, 200),
            )
            .unwrap();
        });
        let runner = TaskRunner::new(reg);
        let config = json!({"zz": true, "aa": true, "hi": true, "disable": "builtins"});
        for _ in 0..3 {
            log.lock().unwrap().clear();
            let run = runner.run("t", &config, TaskOptions::default(), &NoopObserver);
            assert!(matches!(run.outcome, TaskOutcome::Completed { .. }));
            assert_eq!(calls(&log), vec!["filter:hi", "filter:aa", "filter:zz"]);
        }
    }

    #[test]
    fn test_fatal_in_filter_aborts_runs_abort_once_and_exit() {
        let log: Log = Default::default();
        let reg = registry_with(|r| {
            let mut failing = recorder("failing", &log);
            failing.fail_in = Some(Phase::Filter);
            r.register(all_phases(PluginDescriptor::new("failing", Arc::new(failing))))
                .unwrap();
            r.register(all_phases(PluginDescriptor::new("watcher", Arc::new(recorder("watcher", &log)))))
                .unwrap();
        });
        let runner = TaskRunner::new(reg);
        let config = json!({
            "mock": [{"title": "a", "url": "http://a"}],
            "failing": true,
            "watcher": true
        });
        let run = runner.run("t", &config, TaskOptions::default(), &NoopObserver);

        let TaskOutcome::Aborted { summary } = &run.outcome else {
            panic!("expected aborted, got {:?}", run.outcome);
        };
        assert!(summary.aborted);
        assert_eq!(summary.abort_reason.as_deref(), Some("failing: boom"));

        let calls = calls(&log);
        assert!(!calls.contains(&"filter:watcher".to_string()), "{calls:?}");
        assert!(!calls.iter().any(|c| c.starts_with("output:")));
        assert_eq!(calls.iter().filter(|c| c.starts_with("abort:")).count(), 2);
        assert_eq!(calls.iter().filter(|c| *c == "abort:watcher").count(), 1);
        assert!(calls.contains(&"exit:watcher".to_string()));
        assert!(calls.contains(&"exit:failing".to_string()));
        let abort_pos = calls.iter().position(|c| c == "abort:watcher").unwrap();
        let exit_pos = calls.iter().position(|c| c == "exit:watcher").unwrap();
        assert!(abort_pos < exit_pos);
    }

    #[test]
    fn test_warning_does_not_abort() {
        let log: Log = Default::default();
        let reg = registry_with(|r| {
            let mut warny = recorder("warny", &log);
            warny.warn_in = Some(Phase::Filter);
            r.register(all_phases(PluginDescriptor::new("warny", Arc::new(warny)))).unwrap();
        });
        let run = TaskRunner::new(reg).run("t", &json!({"warny": true}), TaskOptions::default(), &NoopObserver);
        assert!(matches!(run.outcome, TaskOutcome::Completed { .. }));
        assert!(calls(&log).contains(&"output:warny".to_string()));
        assert!(!calls(&log).iter().any(|c| c.starts_with("abort:")));
    }

    #[test]
    fn test_input_validation_dedup_and_snapshot_restore() {
        let log: Log = Default::default();
        let reg = registry_with(|r| {
            r.register(PluginDescriptor::new("enrich", Arc::new(recorder("enrich", &log))).phase(Phase::Metainfo))
                .unwrap();
        });
        let config = json!({
            "mock": [
                {"title": "Keep.720p", "url": "http://a"},
                {"title": "Dup", "url": "http://a"},
                {"title": "", "url": "http://empty"},
                {"title": "Drop.CAM", "url": "http://b"}
            ],
            "enrich": true,
            "regexp": {"accept": ["720p"], "reject": ["cam"]}
        });
        let opts = TaskOptions {
            dump_entries: true,
            ..TaskOptions::default()
        };
        let run = TaskRunner::new(reg).run("t", &config, opts, &NoopObserver);
        let summary = run.outcome.summary().unwrap();
        assert_eq!((summary.accepted, summary.rejected), (1, 1));

        let dump = run.entries.unwrap();
        assert_eq!(dump.len(), 2);
        let keep = dump.iter().find(|e| e["title"] == "Keep.720p").unwrap();
        let drop = dump.iter().find(|e| e["title"] == "Drop.CAM").unwrap();
        assert_eq!(keep["enriched"], json!(true));
        assert_eq!(keep["quality"], json!("720p"));
        assert!(drop.get("enriched").is_none(), "rejected entry keeps enrichment: {drop}");
        assert_eq!(drop["state"], json!("rejected"));
    }

    #[test]
    fn test_learn_mode_skips_output_and_remembers() {
        let log: Log = Default::default();
        let reg = registry_with(|r| {
            r.register(all_phases(PluginDescriptor::new("watcher", Arc::new(recorder("watcher", &log)))))
                .unwrap();
        });
        let store = Arc::new(Store::in_memory().unwrap());
        let runner = TaskRunner::new(reg).with_store(store.clone());
        let config = json!({"mock": [{"title": "a", "url": "http://a"}], "accept_all": true, "watcher": true});
        let opts = TaskOptions {
            learn: true,
            ..TaskOptions::default()
        };
        runner.run("t", &config, opts, &NoopObserver);
        let calls = calls(&log);
        assert!(!calls.iter().any(|c| c.starts_with("output:") || c.starts_with("download:")));
        assert!(calls.contains(&"learn:watcher".to_string()));
        assert!(store.is_seen(&["http://a"]).unwrap());

        let run = runner.run("t", &config, TaskOptions::default(), &NoopObserver);
        assert_eq!(run.outcome.summary().unwrap().rejected, 1);
    }

    #[test]
    fn test_invalid_config_is_error_outcome() {
        let runner = TaskRunner::new(registry_with(|_| {}));
        let run = runner.run("t", &json!({"accept_all": "yes please"}), TaskOptions::default(), &NoopObserver);
        let TaskOutcome::Error { message } = run.outcome else {
            panic!("expected error");
        };
        assert!(message.contains("invalid config"));
    }

    #[test]
    fn test_inject_and_manual() {
        let runner = TaskRunner::new(registry_with(|_| {}));
        let config = json!({"manual": true, "accept_all": true});
        let opts = TaskOptions {
            inject: vec![json!({"title": "x", "url": "http://x"})],
            ..TaskOptions::default()
        };
        let run = runner.run("t", &config, opts.clone(), &NoopObserver);
        assert!(matches!(run.outcome, TaskOutcome::Aborted { .. }));

        let opts = TaskOptions {
            allow_manual: true,
            ..opts
        };
        let run = runner.run("t", &config, opts, &NoopObserver);
        assert_eq!(run.outcome.summary().unwrap().accepted, 1);
    }

    struct CancelAfterStart {
        progress: Mutex<Vec<Progress>>,
    }

    impl RunObserver for CancelAfterStart {
        fn progress(&self, progress: Progress) {
            self.progress.lock().unwrap().push(progress);
        }

        fn cancelled(&self) -> bool {
            !self.progress.lock().unwrap().is_empty()
        }
    }

    #[test]
    fn test_cancel_between_phases_and_progress() {
        let log: Log = Default::default();
        let reg = registry_with(|r| {
            r.register(all_phases(PluginDescriptor::new("watcher", Arc::new(recorder("watcher", &log)))))
                .unwrap();
        });
        let observer = CancelAfterStart {
            progress: Mutex::new(Vec::new()),
        };
        let run = TaskRunner::new(reg).run("t", &json!({"watcher": true}), TaskOptions::default(), &observer);
        let TaskOutcome::Aborted { summary } = run.outcome else {
            panic!("expected aborted");
        };
        assert_eq!(summary.abort_reason.as_deref(), Some("cancelled"));
        let calls = calls(&log);
        assert_eq!(calls.first().map(String::as_str), Some("start:watcher"));
        assert!(!calls.contains(&"input:watcher".to_string()));
        assert!(calls.contains(&"abort:watcher".to_string()));
        assert!(calls.contains(&"exit:watcher".to_string()));

        let progress = observer.progress.lock().unwrap();
        let last = progress.last().unwrap();
        assert_eq!(last.status, "complete");
        assert_eq!(last.percent, 100.0);
    }
}
