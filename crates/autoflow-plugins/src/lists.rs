//! Named entry lists.
//!
//! `entry_list` stores lists in the SQLite store and is the builtin
//! [`ListProvider`]. `list_add` / `list_remove` act on accepted entries
//! through any plugin implementing the `list` interface:
//!
//! ```toml
//! [tasks.queue]
//! entry_list = "watchlist"            # input: read the list
//! list_remove = [{ entry_list = "watchlist" }]
//!
//! [tasks.discover]
//! list_add = [{ entry_list = "watchlist" }]
//! ```

use std::sync::Arc;

use autoflow_core::{
    ConfigContributor, Entry, ListProvider, Phase, PhaseHandler, PluginDescriptor, PluginError, PluginRegistry,
    PluginSchema, Result, Store, Task,
};
use serde_json::{Value, json};

/// Builtin SQLite-backed list.
pub struct EntryList;

impl ListProvider for EntryList {
    fn entries(&self, store: &Store, list: &str) -> Result<Vec<Entry>> {
        store.list_entries(list)
    }

    fn add(&self, store: &Store, list: &str, entry: &Entry) -> Result<bool> {
        store.list_add(list, entry)
    }

    fn remove(&self, store: &Store, list: &str, entry: &Entry) -> Result<bool> {
        store.list_remove(list, entry.url())
    }

    fn contains(&self, store: &Store, list: &str, entry: &Entry) -> Result<bool> {
        store.list_contains(list, entry.url())
    }
}

impl ConfigContributor for EntryList {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({"type": "string", "minLength": 1}))
    }
}

impl PhaseHandler for EntryList {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        let Some(list) = config.as_str() else {
            return Err(PluginError::fatal("entry_list expects a list name"));
        };
        let Some(store) = task.store().cloned() else {
            return Err(PluginError::fatal("entry_list needs a store"));
        };
        let entries = self.entries(&store, list)?;
        tracing::debug!("entry_list: {} entries from '{list}'", entries.len());
        for entry in entries {
            task.add_entry(entry);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListAction {
    Add,
    Remove,
}

/// `list_add` / `list_remove`.
pub struct ListOutput {
    action: ListAction,
}

impl ListOutput {
    fn name(&self) -> &'static str {
        match self.action {
            ListAction::Add => "list_add",
            ListAction::Remove => "list_remove",
        }
    }
}

impl ConfigContributor for ListOutput {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({
            "type": "array",
            "items": {
                "type": "object",
                "additionalProperties": {"type": "string"},
                "minProperties": 1,
                "maxProperties": 1
            },
            "minItems": 1
        }))
    }
}

impl PhaseHandler for ListOutput {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        let Some(targets) = config.as_array() else {
            return Err(PluginError::fatal(format!("{} expects a list of {{provider = list}}", self.name())));
        };
        if task.accepted().next().is_none() {
            return Ok(());
        }
        let Some(store) = task.store().cloned() else {
            return Err(PluginError::fatal(format!("{} needs a store", self.name())));
        };
        let registry = task.registry().clone();

        for target in targets.iter().filter_map(Value::as_object) {
            for (provider_name, list) in target {
                let Some(list) = list.as_str() else { continue };
                let provider = registry.get(provider_name, Some(self.name()))?;
                let Some(provider) = provider.list() else {
                    return Err(PluginError::fatal(format!(
                        "plugin '{provider_name}' does not provide lists"
                    )));
                };

                let mut changed = 0;
                for entry in task.accepted() {
                    if task.options().test {
                        tracing::info!("🧪 Would {} '{}' in {provider_name}:{list}", self.name(), entry.title());
                        continue;
                    }
                    let done = match self.action {
                        ListAction::Add => provider.add(&store, list, entry)?,
                        ListAction::Remove => provider.remove(&store, list, entry)?,
                    };
                    if done {
                        changed += 1;
                    }
                }
                tracing::info!("📋 {}: {changed} entries in {provider_name}:{list}", self.name());
            }
        }
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        PluginDescriptor::new("entry_list", Arc::new(EntryList))
            .category("input")
            .group("list")
            .phase(Phase::Input)
            .list_provider(Arc::new(EntryList)),
    )?;
    for action in [ListAction::Add, ListAction::Remove] {
        let plugin = Arc::new(ListOutput { action });
        let name = plugin.name();
        registry.register(
            PluginDescriptor::new(name, plugin)
                .category("output")
                .group("list")
                .phase(Phase::Output)
                .depends_on("entry_list"),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run, task_with, titles};
    use autoflow_core::TaskOptions;

    fn accepted(title: &str) -> Entry {
        let mut e = Entry::new(title, format!("http://x/{title}"));
        e.accept("test");
        e
    }

    #[test]
    fn test_add_then_read_then_remove() {
        let mut task = task_with(vec![accepted("a"), accepted("b"), Entry::new("c", "http://x/c")], TaskOptions::default());
        run(&mut task, "list_add", Phase::Output, json!([{"entry_list": "watch"}])).unwrap();
        let store = task.store().cloned().unwrap();
        assert_eq!(store.list_entries("watch").unwrap().len(), 2);

        let mut reader = task_with(vec![], TaskOptions::default()).with_store(store.clone());
        run(&mut reader, "entry_list", Phase::Input, json!("watch")).unwrap();
        assert_eq!(titles(reader.entries().iter()), vec!["a", "b"]);

        let mut remover = task_with(vec![accepted("a")], TaskOptions::default()).with_store(store.clone());
        run(&mut remover, "list_remove", Phase::Output, json!([{"entry_list": "watch"}])).unwrap();
        assert_eq!(store.list_entries("watch").unwrap().len(), 1);
    }

    #[test]
    fn test_test_mode_does_not_write() {
        let opts = TaskOptions {
            test: true,
            ..TaskOptions::default()
        };
        let mut task = task_with(vec![accepted("a")], opts);
        run(&mut task, "list_add", Phase::Output, json!([{"entry_list": "watch"}])).unwrap();
        assert!(task.store().unwrap().list_entries("watch").unwrap().is_empty());
    }

    #[test]
    fn test_non_list_provider_is_fatal() {
        let mut task = task_with(vec![accepted("a")], TaskOptions::default());
        let err = run(&mut task, "list_add", Phase::Output, json!([{"mock": "watch"}])).unwrap_err();
        assert!(matches!(err, PluginError::Fatal(m) if m.contains("does not provide lists")));

        let err = run(&mut task, "list_add", Phase::Output, json!([{"nothere": "watch"}])).unwrap_err();
        assert!(matches!(err, PluginError::Fatal(m) if m.contains("not installed")));
    }
}
