//! Task — one configured workflow while it runs.
//!
//! Entries live in a single vector; the four containers (accepted, rejected,
//! failed, undecided) are views selected by [`EntryState`], so an entry is
//! always in exactly one of them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entry::{Entry, EntryState};
use crate::phase::Phase;
use crate::registry::PluginRegistry;
use crate::store::Store;

/// Per-run behavior switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// Dry run: plugins must not persist state or touch the outside world.
    pub test: bool,
    /// Learn mode: skip download/modify/output, only remember what was seen.
    pub learn: bool,
    /// Stream every entry at exit.
    pub dump_entries: bool,
    /// Run tasks marked `manual`.
    pub allow_manual: bool,
    /// Entries injected before the input phase (input plugins still run).
    pub inject: Vec<Value>,
}

/// Counts at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub undecided: usize,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Set when the execution failed before or outside the phase loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskSummary {
    /// Summary of an execution that never produced entries.
    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Summary of an execution aborted before it ran.
    pub fn aborted_with(reason: impl Into<String>) -> Self {
        Self {
            aborted: true,
            abort_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// A task instance during one execution.
pub struct Task {
    name: String,
    config: Value,
    options: TaskOptions,
    entries: Vec<Entry>,
    aborted: bool,
    abort_reason: Option<String>,
    silent_abort: bool,
    current_phase: Option<Phase>,
    current_plugin: Option<String>,
    context: Map<String, Value>,
    registry: Arc<PluginRegistry>,
    store: Option<Arc<Store>>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("aborted", &self.aborted)
            .field("current_phase", &self.current_phase)
            .field("current_plugin", &self.current_plugin)
            .finish()
    }
}

impl Task {
    pub fn new(name: impl Into<String>, config: Value, options: TaskOptions, registry: Arc<PluginRegistry>) -> Self {
        let name = name.into();
        let mut context = Map::new();
        context.insert("task".into(), Value::String(name.clone()));
        Self {
            name,
            config,
            options,
            entries: Vec::new(),
            aborted: false,
            abort_reason: None,
            silent_abort: false,
            current_phase: None,
            current_plugin: None,
            context,
            registry,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The processed (validated, defaults filled) task config.
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn set_config(&mut self, config: Value) {
        self.config = config;
    }

    /// Config section of one plugin.
    pub fn plugin_config(&self, plugin: &str) -> Option<&Value> {
        self.config.get(plugin)
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn store(&self) -> Option<&Arc<Store>> {
        self.store.as_ref()
    }

    // ─── Entries ──────────────────────────────────────────────

    pub fn add_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut Vec<Entry> {
        &mut self.entries
    }

    fn in_state(&self, state: EntryState) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(move |e| e.state() == state)
    }

    fn in_state_mut(&mut self, state: EntryState) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut().filter(move |e| e.state() == state)
    }

    pub fn accepted(&self) -> impl Iterator<Item = &Entry> {
        self.in_state(EntryState::Accepted)
    }

    pub fn accepted_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.in_state_mut(EntryState::Accepted)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &Entry> {
        self.in_state(EntryState::Rejected)
    }

    pub fn failed(&self) -> impl Iterator<Item = &Entry> {
        self.in_state(EntryState::Failed)
    }

    pub fn undecided(&self) -> impl Iterator<Item = &Entry> {
        self.in_state(EntryState::Undecided)
    }

    pub fn undecided_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.in_state_mut(EntryState::Undecided)
    }

    /// Entries still in play (undecided or accepted).
    pub fn live_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries
            .iter_mut()
            .filter(|e| matches!(e.state(), EntryState::Undecided | EntryState::Accepted))
    }

    // ─── Abort ────────────────────────────────────────────────

    /// Abort the task; remaining phases are skipped, abort/exit still run.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.abort_with(reason.into(), false);
    }

    /// Abort without reporting it as a failure (e.g. a manual task skipped).
    pub fn abort_silently(&mut self, reason: impl Into<String>) {
        self.abort_with(reason.into(), true);
    }

    fn abort_with(&mut self, reason: String, silent: bool) {
        if self.aborted {
            return;
        }
        if silent {
            tracing::debug!("Task '{}' aborted silently: {reason}", self.name);
        } else {
            tracing::warn!("🛑 Task '{}' aborted: {reason}", self.name);
        }
        self.aborted = true;
        self.silent_abort = silent;
        self.abort_reason = Some(reason);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn is_silent_abort(&self) -> bool {
        self.silent_abort
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    // ─── Progress bookkeeping ─────────────────────────────────

    pub fn set_current(&mut self, phase: Option<Phase>, plugin: Option<&str>) {
        self.current_phase = phase;
        self.current_plugin = plugin.map(str::to_string);
    }

    pub fn current_phase(&self) -> Option<Phase> {
        self.current_phase
    }

    pub fn current_plugin(&self) -> Option<&str> {
        self.current_plugin.as_deref()
    }

    /// Template context shared by every entry (`task`, plus plugin extras).
    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.context
    }

    /// Render `template` for the entry at `index`, with the task context.
    pub fn render_entry(&mut self, index: usize, template: &str) -> Option<Result<String, crate::error::RenderError>> {
        let context = &self.context;
        self.entries.get_mut(index).map(|e| e.render(template, context))
    }

    pub fn summary(&self) -> TaskSummary {
        let mut summary = TaskSummary {
            aborted: self.aborted,
            abort_reason: self.abort_reason.clone(),
            ..TaskSummary::default()
        };
        for entry in &self.entries {
            match entry.state() {
                EntryState::Accepted => summary.accepted += 1,
                EntryState::Rejected => summary.rejected += 1,
                EntryState::Failed => summary.failed += 1,
                EntryState::Undecided => summary.undecided += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Task {
        Task::new("tv", json!({}), TaskOptions::default(), Arc::new(PluginRegistry::new()))
    }

    #[test]
    fn test_views_partition_entries() {
        let mut t = task();
        for i in 0..4 {
            t.add_entry(Entry::new(format!("e{i}"), format!("http://x/{i}")));
        }
        t.entries_mut()[0].accept("a");
        t.entries_mut()[1].reject("r");
        t.entries_mut()[2].fail("f");

        assert_eq!(t.accepted().count(), 1);
        assert_eq!(t.rejected().count(), 1);
        assert_eq!(t.failed().count(), 1);
        assert_eq!(t.undecided().count(), 1);
        assert_eq!(t.live_mut().count(), 2);

        let s = t.summary();
        assert_eq!((s.accepted, s.rejected, s.failed, s.undecided), (1, 1, 1, 1));
        assert!(!s.aborted);
    }

    #[test]
    fn test_first_abort_reason_wins() {
        let mut t = task();
        t.abort("first");
        t.abort("second");
        assert!(t.is_aborted());
        assert_eq!(t.abort_reason(), Some("first"));
        assert!(!t.is_silent_abort());
    }

    #[test]
    fn test_render_uses_task_context() {
        let mut t = task();
        t.add_entry(Entry::new("Show", "http://x"));
        let out = t.render_entry(0, "{{task}}/{{title}}").unwrap().unwrap();
        assert_eq!(out, "tv/Show");
        assert!(t.render_entry(5, "x").is_none());
    }
}
