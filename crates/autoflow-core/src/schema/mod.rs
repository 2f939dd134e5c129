//! Config schema validation.
//!
//! ```text
//! /schema/config            root config (daemon, tasks, templates, schedules)
//!   └── /schema/task        mapping plugin-name → plugin fragment
//!         └── /schema/plugin/<name>   one fragment per registered plugin
//! ```
//! The plugin registry composes these references on first use; see
//! [`PluginRegistry::validator`](crate::registry::PluginRegistry::validator).

pub mod formats;
pub mod validator;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use formats::{FormatChecker, parse_interval, parse_size_mib};
pub use validator::{Validator, pointer};

/// One validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Human readable message.
    pub message: String,
    /// The offending value.
    pub value: Value,
    /// Keyword that failed (`type`, `format`, `required`, ...).
    pub validator: String,
    /// The keyword's value in the schema.
    pub validator_value: Value,
    /// Pointer into the validated config.
    pub json_pointer: String,
    /// Pointer into the schema (rooted at a `$ref` uri when one was followed).
    pub schema_pointer: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let at = if self.json_pointer.is_empty() {
            "/"
        } else {
            self.json_pointer.as_str()
        };
        write!(f, "[{at}] {}", self.message)
    }
}

/// Validate `config` against a standalone `schema` with builtin formats only.
pub fn process_config(config: &Value, schema: &Value, set_defaults: bool) -> (Value, Vec<ValidationError>) {
    Validator::new().process_config(config, schema, set_defaults)
}

/// Prefix every error pointer with `prefix` (used when a task config is
/// validated on its own but reported relative to the root config).
pub fn prefix_errors(errors: &mut [ValidationError], prefix: &str) {
    for e in errors.iter_mut() {
        e.json_pointer = format!("{prefix}{}", e.json_pointer);
    }
}
