//! Output plugins.

use std::sync::Arc;

use autoflow_core::phase::PRIORITY_LAST;
use autoflow_core::{
    ConfigContributor, EntryState, Phase, PhaseHandler, PluginDescriptor, PluginError, PluginRegistry, PluginSchema,
    Result, Task,
};
use serde_json::{Value, json};

/// `dump` — log every entry with its state (`true`) or only one state.
pub struct Dump;

impl ConfigContributor for Dump {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({
            "oneOf": [
                {"type": "boolean"},
                {"type": "string", "enum": ["accepted", "rejected", "failed", "undecided"]}
            ]
        }))
    }
}

impl PhaseHandler for Dump {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        let only: Option<EntryState> = match config {
            Value::Bool(false) => return Ok(()),
            Value::String(state) => serde_json::from_value(Value::String(state.clone())).ok(),
            _ => None,
        };
        let name = task.name().to_string();
        let mut shown = 0;
        for entry in task.entries_mut() {
            if only.is_some_and(|s| s != entry.state()) {
                continue;
            }
            entry.force_all();
            tracing::info!("[{name}] {} | {}", entry.state(), entry.to_dump());
            shown += 1;
        }
        tracing::debug!("dump: {shown} entries");
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        PluginDescriptor::new("dump", Arc::new(Dump))
            .category("output")
            .interface("debug")
            .phase_priority(Phase::Output, PRIORITY_LAST),
    )
}
