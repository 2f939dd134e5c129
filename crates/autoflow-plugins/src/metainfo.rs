//! Metainfo plugins: enrich entries, mostly through lazy fields.

use std::sync::Arc;

use autoflow_core::lazy::{self, LookupId};
use autoflow_core::quality::Quality;
use autoflow_core::{
    ConfigContributor, Phase, PhaseHandler, PluginDescriptor, PluginError, PluginRegistry, PluginSchema, Result,
    Task,
};
use serde_json::{Value, json};

use crate::is_disabled;

/// Lookup id backing the lazy `quality` field.
pub const QUALITY_LOOKUP: &str = "metainfo_quality";

/// Declares the lazy `quality` field, parsed from the title on first read.
pub struct MetainfoQuality {
    lookup: LookupId,
}

impl MetainfoQuality {
    pub fn new() -> Self {
        let lookup = lazy::register_lookup(QUALITY_LOOKUP, |entry, _field| {
            Ok(Value::String(Quality::from_title(entry.title()).to_string()))
        });
        Self { lookup }
    }
}

impl Default for MetainfoQuality {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigContributor for MetainfoQuality {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({"type": "boolean"}))
    }
}

impl PhaseHandler for MetainfoQuality {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        if is_disabled(config) {
            return Ok(());
        }
        for entry in task.live_mut() {
            entry.set_lazy(&["quality"], &self.lookup);
        }
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        PluginDescriptor::new("metainfo_quality", Arc::new(MetainfoQuality::new()))
            .category("metainfo")
            .builtin()
            .phase(Phase::Metainfo),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run, task_with};
    use autoflow_core::{Entry, TaskOptions};

    #[test]
    fn test_quality_is_lazy_and_parsed_from_title() {
        let mut task = task_with(
            vec![Entry::new("Show.S01E01.720p.HDTV.x264", "http://a")],
            TaskOptions::default(),
        );
        run(&mut task, "metainfo_quality", Phase::Metainfo, Value::Null).unwrap();
        let entry = &mut task.entries_mut()[0];
        assert!(entry.is_lazy("quality"));
        assert_eq!(entry.get("quality"), Some(&json!("720p hdtv")));
        assert!(!entry.is_lazy("quality"));
    }

    #[test]
    fn test_concrete_quality_is_kept() {
        let mut e = Entry::new("Show.1080p", "http://a");
        e.set("quality", json!("480p"));
        let mut task = task_with(vec![e], TaskOptions::default());
        run(&mut task, "metainfo_quality", Phase::Metainfo, Value::Null).unwrap();
        assert_eq!(task.entries_mut()[0].get("quality"), Some(&json!("480p")));
    }

    #[test]
    fn test_disabled() {
        let mut task = task_with(vec![Entry::new("Show.1080p", "http://a")], TaskOptions::default());
        run(&mut task, "metainfo_quality", Phase::Metainfo, json!(false)).unwrap();
        assert!(!task.entries()[0].contains("quality"));
    }
}
