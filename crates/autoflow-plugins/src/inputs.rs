//! Input plugins that need no external service.

use std::sync::Arc;

use autoflow_core::{
    ConfigContributor, Entry, Phase, PhaseHandler, PluginDescriptor, PluginError, PluginRegistry, PluginSchema,
    Result, Task,
};
use serde_json::{Value, json};

/// `mock` — entries straight from config.
///
/// ```toml
/// mock = [{ title = "Show.S01E01.720p", url = "http://example.com/1" }]
/// ```
pub struct Mock;

impl ConfigContributor for Mock {
    fn schema(&self) -> PluginSchema {
        PluginSchema::Object(json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "url": {"type": "string"}
                },
                "required": ["title"]
            }
        }))
    }
}

impl PhaseHandler for Mock {
    fn on_phase(&self, _phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError> {
        let Some(items) = config.as_array() else {
            return Err(PluginError::fatal("mock expects a list of entries"));
        };
        for (i, item) in items.iter().enumerate() {
            let Some(map) = item.as_object() else { continue };
            let mut map = map.clone();
            // Missing url: mock://<task>/<index>.
            if !map.contains_key("url") {
                let url = format!("mock://{}/{i}", task.name());
                tracing::debug!("mock: generated url {url}");
                map.insert("url".into(), Value::String(url));
            }
            task.add_entry(Entry::from_map(map));
        }
        tracing::debug!("mock: produced {} entries", items.len());
        Ok(())
    }
}

pub fn register(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        PluginDescriptor::new("mock", Arc::new(Mock))
            .category("input")
            .group("input")
            .phase(Phase::Input),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run, task_with, titles};
    use autoflow_core::TaskOptions;

    #[test]
    fn test_mock_produces_entries_with_extra_fields() {
        let mut task = task_with(vec![], TaskOptions::default());
        run(
            &mut task,
            "mock",
            Phase::Input,
            json!([
                {"title": "a", "url": "http://a", "content_size": 700},
                {"title": "b"}
            ]),
        )
        .unwrap();
        assert_eq!(titles(task.entries().iter()), vec!["a", "b"]);
        assert_eq!(task.entries()[0].peek("content_size"), Some(&json!(700)));
        assert_eq!(task.entries()[1].url(), "mock://test/1");
        assert!(task.entries().iter().all(Entry::is_valid));
    }

    #[test]
    fn test_mock_rejects_bad_config() {
        let mut task = task_with(vec![], TaskOptions::default());
        let err = run(&mut task, "mock", Phase::Input, json!("nope")).unwrap_err();
        assert!(matches!(err, PluginError::Fatal(_)));
    }
}
