//! # Autoflow Plugins
//!
//! Builtin plugins. Each module exposes `register(&mut PluginRegistry)`;
//! [`builtin_registry`] installs all of them.
//!
//! | Plugin             | Phase(s)            | Notes                            |
//! |--------------------|---------------------|----------------------------------|
//! | `mock`             | input               | entries from config              |
//! | `entry_list`       | input               | stored list, `ListProvider`      |
//! | `metainfo_quality` | metainfo            | builtin, lazy `quality` field    |
//! | `set`              | filter (255)        | templated field assignment       |
//! | `seen`             | filter (255), learn | builtin, SQLite backed           |
//! | `accept_all`       | filter              |                                  |
//! | `regexp`           | filter              | accept / reject / rest           |
//! | `quality`          | filter              | quality requirement              |
//! | `content_size`     | filter              | min / max size                   |
//! | `manual`           | start               | only runs when named explicitly  |
//! | `list_add`         | output              | via a `list` provider            |
//! | `list_remove`      | output              | via a `list` provider            |
//! | `dump`             | output (0)          | logs entries                     |

pub mod control;
pub mod filters;
pub mod inputs;
pub mod lists;
pub mod metainfo;
pub mod outputs;
pub mod seen;

use autoflow_core::{PluginRegistry, Result};
use serde_json::Value;

/// Registry with every builtin plugin installed.
pub fn builtin_registry() -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry)?;
    Ok(registry)
}

/// Install every builtin plugin into `registry`.
pub fn register_builtins(registry: &mut PluginRegistry) -> Result<()> {
    control::register(registry)?;
    inputs::register(registry)?;
    lists::register(registry)?;
    metainfo::register(registry)?;
    filters::register(registry)?;
    seen::register(registry)?;
    outputs::register(registry)?;
    tracing::debug!("🔌 {} builtin plugins installed", registry.len());
    Ok(())
}

/// `false` turns a plugin off for a task; everything else (including an
/// unconfigured builtin's `null`) leaves it on.
pub(crate) fn is_disabled(config: &Value) -> bool {
    matches!(config, Value::Bool(false))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use autoflow_core::{Entry, Phase, PluginError, PluginRegistry, Store, Task, TaskOptions};
    use serde_json::Value;

    pub fn task_with(entries: Vec<Entry>, options: TaskOptions) -> Task {
        let registry = Arc::new(super::builtin_registry().unwrap());
        let store = Arc::new(Store::in_memory().unwrap());
        let mut task = Task::new("test", Value::Null, options, registry).with_store(store);
        for e in entries {
            task.add_entry(e);
        }
        task
    }

    pub fn run(task: &mut Task, plugin: &str, phase: Phase, config: Value) -> Result<(), PluginError> {
        let registry: Arc<PluginRegistry> = task.registry().clone();
        let descriptor = registry.get(plugin, None).unwrap().clone();
        descriptor.handler().on_phase(phase, task, &config)
    }

    pub fn titles<'a>(entries: impl Iterator<Item = &'a Entry>) -> Vec<String> {
        entries.map(|e| e.title().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_core::{Phase, PluginFilter};

    #[test]
    fn test_builtin_registry_is_consistent() {
        let reg = builtin_registry().unwrap();
        reg.check_dependencies().unwrap();
        for name in [
            "mock", "entry_list", "metainfo_quality", "set", "seen", "accept_all", "regexp",
            "quality", "content_size", "manual", "list_add", "list_remove", "dump",
        ] {
            assert!(reg.contains(name), "missing {name}");
        }
        let lists: Vec<_> = reg
            .plugins(PluginFilter::all().interface("list"))
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(lists, vec!["entry_list"]);
    }

    #[test]
    fn test_filter_order_puts_seen_and_set_first() {
        let reg = builtin_registry().unwrap();
        let order: Vec<String> = reg
            .phase_handlers(Phase::Filter)
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(&order[..2], &["seen".to_string(), "set".to_string()]);
    }
}
