//! `seen` — remember accepted entries and reject them on later runs.
//!
//! Builtin: active for every task unless `seen = false` or disabled.
//! Fingerprints are the entry's `url` and `title`; `seen = "local"` scopes
//! them to the task.

use std::sync::Arc;

use autoflow_core::phase::PRIORITY_FIRST;
use autoflow_core::{
    ConfigContributor, Entry, Phase, PhaseHandler, PluginDescriptor, PluginError, PluginRegistry, PluginSchema,
    Result, Task,
};
use serde_json::{Value, json};

use crate::is_disabled;

pub struct Seen;

fn fingerprints(entry: &Entry, scope: Option<&str>) -> Vec<String> {
    [entry.url(), entry.title()]
        .into_iter()
        .filter(|v| !v.is_empty())
        .map(|v| match scope {
            Some(task) => format!("{task}:{v}"),
            None => v.to_string(),
        })
        .collect()
}

impl ConfigContributor for Seen {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({
            "oneOf": [
                {"type": "boolean"},
                {"type": "string", "enum": ["global", "local"]}
            ]
        }))
    }
}

impl PhaseHandler for Seen {
    fn on_phase(&self, phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        if is_disabled(config) {
            return Ok(());
        }
        let Some(store) = task.store().cloned() else {
            tracing::debug!("seen: no store, skipping");
            return Ok(());
        };
        let task_name = task.name().to_string();
        let scope = (config.as_str() == Some("local")).then_some(task_name.as_str());

        match phase {
            Phase::Filter => {
                let mut rejected = 0;
                for entry in task.undecided_mut() {
                    let prints = fingerprints(entry, scope);
                    let refs: Vec<&str> = prints.iter().map(String::as_str).collect();
                    if store.is_seen(&refs)? {
                        entry.reject("seen");
                        rejected += 1;
                    }
                }
                if rejected > 0 {
                    tracing::info!("👀 seen: rejected {rejected} previously seen entries");
                }
            }
            Phase::Learn => {
                if task.options().test {
                    tracing::info!("🧪 seen: test mode, not remembering {} entries", task.accepted().count());
                    return Ok(());
                }
                for entry in task.accepted() {
                    let prints = fingerprints(entry, scope);
                    let refs: Vec<&str> = prints.iter().map(String::as_str).collect();
                    store.remember(&task_name, entry.title(), &refs)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        PluginDescriptor::new("seen", Arc::new(Seen))
            .category("filter")
            .builtin()
            .phase_priority(Phase::Filter, PRIORITY_FIRST)
            .phase(Phase::Learn),
    )
}
