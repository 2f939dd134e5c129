//! Autoflow configuration.
//!
//! Loading pipeline:
//! ```text
//! TOML text ─toml─▶ serde_json::Value ─templates merge─▶ validate /schema/config
//!     (set_defaults) ─serde─▶ AutoflowConfig
//! ```
//! Any failure leaves the caller's current config untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{AutoflowError, Result};
use crate::registry::PluginRegistry;
use crate::schema::ValidationError;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoflowConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Task name → task config (plugin name → plugin config), templates merged.
    #[serde(default)]
    pub tasks: BTreeMap<String, Value>,
    #[serde(default)]
    pub templates: BTreeMap<String, Value>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

/// Daemon and executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_check_interval() -> u64 { 30 }
fn default_history_capacity() -> usize { 50 }
fn default_stream_capacity() -> usize { 1000 }
fn default_db_path() -> String { "~/.autoflow/db.sqlite".into() }

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            history_capacity: default_history_capacity(),
            stream_capacity: default_stream_capacity(),
            db_path: default_db_path(),
        }
    }
}

impl DaemonConfig {
    /// Database path with `~` and env vars expanded.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).into_owned())
    }
}

/// One `[[schedules]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub tasks: TaskNames,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<CronConfig>,
}

/// `tasks = "name"` or `tasks = ["a", "b"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskNames {
    One(String),
    Many(Vec<String>),
}

impl TaskNames {
    pub fn names(&self) -> Vec<String> {
        match self {
            TaskNames::One(name) => vec![name.clone()],
            TaskNames::Many(names) => names.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weeks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u64>,
}

/// Cron fields; unset means any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<CronField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<CronField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<CronField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<CronField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<CronField>,
}

/// A cron field: a number or an expression (`*/15`, `1-5`, `mon,fri`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CronField {
    Number(u32),
    Expr(String),
}

impl std::fmt::Display for CronField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CronField::Number(n) => write!(f, "{n}"),
            CronField::Expr(s) => f.write_str(s),
        }
    }
}

impl AutoflowConfig {
    /// Default config file path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// The Autoflow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autoflow")
    }

    /// Read and validate a config file.
    pub fn load_from(path: &Path, registry: &PluginRegistry) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AutoflowError::config(format!("Failed to read config {}: {e}", path.display()), vec![])
        })?;
        Self::parse(&content, registry)
    }

    /// Parse and validate TOML text.
    pub fn parse(text: &str, registry: &PluginRegistry) -> Result<Self> {
        let raw: Value = toml::from_str(text)?;
        Self::from_value(raw, registry)
    }

    /// Validate a raw config tree and build the typed config.
    pub fn from_value(mut raw: Value, registry: &PluginRegistry) -> Result<Self> {
        if !raw.is_object() {
            return Err(AutoflowError::config("config root must be a table", vec![]));
        }
        apply_templates(&mut raw)?;

        let schema = json!({ "$ref": "/schema/config" });
        let (processed, errors) = registry.validator().process_config(&raw, &schema, true);
        if !errors.is_empty() {
            for e in &errors {
                tracing::debug!("config: {e}");
            }
            return Err(AutoflowError::config(
                format!("{} validation error(s) in config", errors.len()),
                errors,
            ));
        }

        serde_json::from_value(processed)
            .map_err(|e| AutoflowError::config(format!("Failed to build config: {e}"), vec![]))
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn task(&self, name: &str) -> Option<&Value> {
        self.tasks.get(name)
    }

    /// Tasks marked `manual` only run when named explicitly.
    pub fn is_manual(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .and_then(|t| t.get("manual"))
            .is_some_and(|m| !matches!(m, Value::Bool(false) | Value::Null))
    }
}

// ─── Templates ──────────────────────────────────────────────

/// Merge templates into every task of a raw config tree.
///
/// The `global` template applies unless the task sets `template = false`;
/// named templates are listed via `template = "name"` or `["a", "b"]`.
pub fn apply_templates(raw: &mut Value) -> Result<()> {
    let templates = match raw.get("templates") {
        Some(Value::Object(t)) => t.clone(),
        _ => Map::new(),
    };
    let Some(Value::Object(tasks)) = raw.get_mut("tasks") else {
        return Ok(());
    };

    let mut errors = Vec::new();
    for (task_name, task) in tasks.iter_mut() {
        let Value::Object(task_map) = task else {
            continue;
        };
        let wanted: Vec<String> = match task_map.get("template") {
            Some(Value::Bool(false)) => continue,
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        let mut names: Vec<String> = Vec::new();
        if templates.contains_key("global") {
            names.push("global".into());
        }
        for name in wanted {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        for name in names {
            match templates.get(&name) {
                Some(Value::Object(template)) => merge_into(task_map, template),
                Some(_) => {}
                None => errors.push(ValidationError {
                    message: format!("unknown template '{name}'"),
                    value: Value::String(name.clone()),
                    validator: "template".into(),
                    validator_value: Value::Array(
                        templates.keys().cloned().map(Value::String).collect(),
                    ),
                    json_pointer: format!("/tasks/{}/template", escape(task_name)),
                    schema_pointer: "/schema/task/properties/template".into(),
                }),
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AutoflowError::config("unknown template(s)", errors))
    }
}

/// Merge `template` into `task`: objects recurse, arrays append unseen items,
/// scalars keep the task's value.
pub fn merge_into(task: &mut Map<String, Value>, template: &Map<String, Value>) {
    for (key, tval) in template {
        match task.get_mut(key) {
            None => {
                task.insert(key.clone(), tval.clone());
            }
            Some(Value::Object(obj)) => {
                if let Value::Object(tobj) = tval {
                    merge_into(obj, tobj);
                }
            }
            Some(Value::Array(items)) => {
                if let Value::Array(titems) = tval {
                    for item in titems {
                        if !items.contains(item) {
                            items.push(item.clone());
                        }
                    }
                }
            }
            Some(_) => {}
        }
    }
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

// ─── Schemas ────────────────────────────────────────────────

/// Schema of the task-level `template` key.
pub fn template_key_schema() -> Value {
    json!({
        "oneOf": [
            {"type": "string"},
            {"type": "array", "items": {"type": "string"}},
            {"type": "boolean", "enum": [false]}
        ]
    })
}

/// Schema of the task-level `disable` key.
pub fn disable_key_schema() -> Value {
    json!({
        "oneOf": [
            {"type": "string"},
            {"type": "array", "items": {"type": "string"}}
        ]
    })
}

fn cron_field_schema() -> Value {
    json!({"type": ["integer", "string"]})
}

fn positive_int() -> Value {
    json!({"type": "integer", "minimum": 1})
}

/// Schema of one `[[schedules]]` entry.
pub fn schedule_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tasks": {
                "oneOf": [
                    {"type": "string"},
                    {"type": "array", "items": {"type": "string"}, "minItems": 1}
                ]
            },
            "interval": {
                "type": "object",
                "properties": {
                    "weeks": positive_int(),
                    "days": positive_int(),
                    "hours": positive_int(),
                    "minutes": positive_int()
                },
                "additionalProperties": false,
                "minProperties": 1
            },
            "schedule": {
                "type": "object",
                "properties": {
                    "minute": cron_field_schema(),
                    "hour": cron_field_schema(),
                    "day": cron_field_schema(),
                    "month": cron_field_schema(),
                    "day_of_week": cron_field_schema()
                },
                "additionalProperties": false
            }
        },
        "required": ["tasks"],
        "additionalProperties": false,
        "oneOf": [
            {"required": ["interval"]},
            {"required": ["schedule"]}
        ]
    })
}

/// Root `/schema/config`.
pub fn root_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "daemon": {
                "type": "object",
                "properties": {
                    "check_interval_secs": {"type": "integer", "minimum": 1, "default": default_check_interval()},
                    "history_capacity": {"type": "integer", "minimum": 1, "default": default_history_capacity()},
                    "stream_capacity": {"type": "integer", "minimum": 1, "default": default_stream_capacity()},
                    "db_path": {"type": "string", "format": "path", "default": default_db_path()}
                },
                "additionalProperties": false,
                "default": {}
            },
            "tasks": {
                "type": "object",
                "additionalProperties": {"$ref": "/schema/task"},
                "default": {}
            },
            "templates": {
                "type": "object",
                "additionalProperties": {"type": "object"},
                "default": {}
            },
            "schedules": {
                "type": "array",
                "items": schedule_schema(),
                "default": []
            }
        },
        "additionalProperties": false
    })
}

// ─── Shared handle ──────────────────────────────────────────

/// Current config generation, swapped atomically on reload.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<AutoflowConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: AutoflowConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Snapshot of the active config.
    pub fn current(&self) -> Arc<AutoflowConfig> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the active config.
    pub fn replace(&self, config: AutoflowConfig) {
        let config = Arc::new(config);
        match self.inner.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::phase::Phase;
    use crate::plugin::{ConfigContributor, PhaseHandler, PluginDescriptor, PluginSchema};
    use crate::task::Task;

    struct Mock;

    impl PhaseHandler for Mock {
        fn on_phase(&self, _: Phase, _: &mut Task, _: &Value) -> std::result::Result<(), PluginError> {
            Ok(())
        }
    }

    impl ConfigContributor for Mock {
        fn schema(&self) -> PluginSchema {
            PluginSchema::Object(json!({"type": "array", "items": {"type": "object"}}))
        }
    }

    struct Limit;

    impl PhaseHandler for Limit {
        fn on_phase(&self, _: Phase, _: &mut Task, _: &Value) -> std::result::Result<(), PluginError> {
            Ok(())
        }
    }

    impl ConfigContributor for Limit {
        fn schema(&self) -> PluginSchema {
            PluginSchema::Object(json!({
                "type": "object",
                "properties": {"amount": {"type": "integer", "default": 10}},
                "additionalProperties": false
            }))
        }
    }

    fn registry() -> PluginRegistry {
        let mut reg = PluginRegistry::new();
        reg.register(PluginDescriptor::new("mock", std::sync::Arc::new(Mock)).phase(Phase::Input))
            .unwrap();
        reg.register(PluginDescriptor::new("limit", std::sync::Arc::new(Limit)).phase(Phase::Filter))
            .unwrap();
        reg
    }

    #[test]
    fn test_defaults_filled() {
        let cfg = AutoflowConfig::parse(
            r#"
            [tasks.tv]
            mock = [{ title = "a", url = "http://a" }]
            limit = {}
            "#,
            &registry(),
        )
        .unwrap();
        assert_eq!(cfg.daemon.check_interval_secs, 30);
        assert_eq!(cfg.daemon.history_capacity, 50);
        assert_eq!(cfg.tasks["tv"]["limit"]["amount"], json!(10));
        assert!(cfg.schedules.is_empty());
    }

    #[test]
    fn test_wrong_type_reports_path() {
        let err = AutoflowConfig::parse(
            r#"
            [tasks.tv]
            limit = { amount = "ten" }
            "#,
            &registry(),
        )
        .unwrap_err();
        let errors = err.validation_errors();
        assert!(!errors.is_empty());
        assert_eq!(errors[0].json_pointer, "/tasks/tv/limit/amount");
        assert_eq!(errors[0].validator, "type");
    }

    #[test]
    fn test_unknown_plugin_is_config_error() {
        let err = AutoflowConfig::parse("[tasks.tv]\nnope = 1\n", &registry()).unwrap_err();
        assert!(matches!(err, AutoflowError::Config { .. }));
        assert_eq!(err.validation_errors()[0].json_pointer, "/tasks/tv/nope");
    }

    #[test]
    fn test_schedules_parse() {
        let cfg = AutoflowConfig::parse(
            r#"
            [tasks.tv]
            mock = []

            [[schedules]]
            tasks = ["tv"]
            interval = { hours = 2 }

            [[schedules]]
            tasks = "tv"
            schedule = { hour = 3, minute = "*/15" }
            "#,
            &registry(),
        )
        .unwrap();
        assert_eq!(cfg.schedules.len(), 2);
        assert_eq!(cfg.schedules[0].interval.as_ref().unwrap().hours, Some(2));
        let cron = cfg.schedules[1].schedule.as_ref().unwrap();
        assert_eq!(cron.hour, Some(CronField::Number(3)));
        assert_eq!(cron.minute, Some(CronField::Expr("*/15".into())));
        assert_eq!(cfg.schedules[1].tasks.names(), vec!["tv"]);
    }

    #[test]
    fn test_schedule_needs_exactly_one_kind() {
        let text = r#"
            [[schedules]]
            tasks = ["tv"]
            interval = { hours = 2 }
            schedule = { hour = 3 }
        "#;
        assert!(AutoflowConfig::parse(text, &registry()).is_err());
    }

    #[test]
    fn test_templates_merge() {
        let mut raw = json!({
            "templates": {
                "global": {"limit": {"amount": 5}, "mock": [{"title": "g", "url": "http://g"}]},
                "extra": {"disable": ["seen"]}
            },
            "tasks": {
                "a": {"limit": {"amount": 1}, "mock": [{"title": "a", "url": "http://a"}], "template": "extra"},
                "b": {"template": false}
            }
        });
        apply_templates(&mut raw).unwrap();
        let a = &raw["tasks"]["a"];
        assert_eq!(a["limit"]["amount"], json!(1));
        assert_eq!(a["mock"].as_array().unwrap().len(), 2);
        assert_eq!(a["disable"], json!(["seen"]));
        assert_eq!(raw["tasks"]["b"], json!({"template": false}));
    }

    #[test]
    fn test_unknown_template() {
        let mut raw = json!({"tasks": {"a": {"template": ["missing"]}}});
        let err = apply_templates(&mut raw).unwrap_err();
        assert_eq!(err.validation_errors()[0].json_pointer, "/tasks/a/template");
    }

    #[test]
    fn test_handle_swap() {
        let handle = ConfigHandle::new(AutoflowConfig::default());
        let before = handle.current();
        let mut next = AutoflowConfig::default();
        next.daemon.history_capacity = 7;
        handle.replace(next);
        assert_eq!(before.daemon.history_capacity, 50);
        assert_eq!(handle.current().daemon.history_capacity, 7);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[daemon]\ncheck_interval_secs = 5\n").unwrap();
        let cfg = AutoflowConfig::load_from(&path, &registry()).unwrap();
        assert_eq!(cfg.daemon.check_interval_secs, 5);
        assert!(AutoflowConfig::load_from(&dir.path().join("missing.toml"), &registry()).is_err());
    }
}
