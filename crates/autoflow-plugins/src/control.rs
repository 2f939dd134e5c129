//! Task-level control plugins.

use std::sync::Arc;

use autoflow_core::phase::PRIORITY_FIRST;
use autoflow_core::{
    ConfigContributor, Phase, PhaseHandler, PluginDescriptor, PluginError, PluginRegistry, PluginSchema, Result,
    Task,
};
use serde_json::{Value, json};

/// `manual: true` — the task only runs when requested by name.
pub struct Manual;

impl ConfigContributor for Manual {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({"type": "boolean"}))
    }
}

impl PhaseHandler for Manual {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        if config.as_bool() != Some(true) || task.options().allow_manual {
            return Ok(());
        }
        task.abort_silently("manual task not explicitly requested");
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        PluginDescriptor::new("manual", Arc::new(Manual))
            .category("control")
            .phase_priority(Phase::Start, PRIORITY_FIRST),
    )
}
