//! Plugin registry — process-wide catalog of installed plugins.
//!
//! Built once at startup with `&mut` registration calls, then frozen behind an
//! `Arc` and shared read-only; no locking on the dispatch path.
//!
//! Dispatch order inside a phase is `(priority desc, name asc)`.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value, json};

use crate::config;
use crate::error::{AutoflowError, Result};
use crate::phase::Phase;
use crate::plugin::{PluginDescriptor, PluginInfo};
use crate::schema::Validator;

/// Selects plugins by phase, group and interface; unset fields match all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginFilter {
    pub phase: Option<Phase>,
    pub group: Option<String>,
    pub interface: Option<String>,
}

impl PluginFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    fn matches(&self, plugin: &PluginDescriptor) -> bool {
        self.phase.is_none_or(|p| plugin.handles(p))
            && self.group.as_ref().is_none_or(|g| plugin.groups.contains(g))
            && self
                .interface
                .as_ref()
                .is_none_or(|i| plugin.interfaces.contains(i))
    }
}

/// One resolved handler for a phase.
#[derive(Debug, Clone)]
pub struct PhaseHandlerRef {
    pub priority: i32,
    pub plugin: Arc<PluginDescriptor>,
}

impl PhaseHandlerRef {
    pub fn name(&self) -> &str {
        &self.plugin.name
    }
}

/// Registry of all available plugins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<PluginDescriptor>>,
    validator: OnceLock<Validator>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. A name collision fails unless the newcomer is a
    /// debug plugin, in which case it is skipped.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<()> {
        if let Some(existing) = self.plugins.get(&descriptor.name) {
            if descriptor.debug {
                tracing::debug!(
                    "Skipping debug plugin '{}': name taken by {} plugin",
                    descriptor.name,
                    if existing.debug { "a debug" } else { "a regular" }
                );
                return Ok(());
            }
            return Err(AutoflowError::PluginNameConflict(descriptor.name));
        }
        tracing::debug!(
            "🔌 Registered plugin: {} (phases: {:?})",
            descriptor.name,
            descriptor.phases.keys().map(|p| p.as_str()).collect::<Vec<_>>()
        );
        self.plugins.insert(descriptor.name.clone(), Arc::new(descriptor));
        // The composed schema must include the newcomer.
        self.validator = OnceLock::new();
        Ok(())
    }

    /// Look a plugin up; `requested_by` is reported in the dependency error.
    pub fn get(&self, name: &str, requested_by: Option<&str>) -> Result<&Arc<PluginDescriptor>> {
        self.plugins.get(name).ok_or_else(|| AutoflowError::Dependency {
            plugin: name.to_string(),
            requested_by: requested_by.map(str::to_string),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Lazily filtered plugins in name order.
    pub fn plugins(&self, filter: PluginFilter) -> impl Iterator<Item = &Arc<PluginDescriptor>> + '_ {
        self.plugins.values().filter(move |p| filter.matches(p))
    }

    /// Handlers for `phase` in dispatch order: priority descending, then name.
    pub fn phase_handlers(&self, phase: Phase) -> Vec<PhaseHandlerRef> {
        let mut handlers: Vec<PhaseHandlerRef> = self
            .plugins
            .values()
            .filter_map(|p| {
                p.priority(phase).map(|priority| PhaseHandlerRef {
                    priority,
                    plugin: p.clone(),
                })
            })
            .collect();
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name().cmp(b.name())));
        handlers
    }

    /// Verify every declared dependency is installed.
    pub fn check_dependencies(&self) -> Result<()> {
        for plugin in self.plugins.values() {
            for dep in &plugin.dependencies {
                self.get(dep, Some(&format!("plugin {}", plugin.name)))?;
            }
        }
        Ok(())
    }

    /// Introspection data for every plugin.
    pub fn info(&self, filter: PluginFilter, include_schema: bool) -> Vec<PluginInfo> {
        self.plugins(filter).map(|p| p.info(include_schema)).collect()
    }

    /// Schema for one task: keys are plugin names, values their fragments.
    pub fn task_schema(&self) -> Value {
        let mut properties = Map::new();
        for plugin in self.plugins.values() {
            if plugin.schema.is_configurable() {
                properties.insert(
                    plugin.name.clone(),
                    json!({ "$ref": format!("/schema/plugin/{}", plugin.name) }),
                );
            }
        }
        properties.insert("template".into(), config::template_key_schema());
        properties.insert("disable".into(), config::disable_key_schema());
        json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false
        })
    }

    /// Composed validator: root config, task and every plugin fragment.
    /// Built on first use.
    pub fn validator(&self) -> &Validator {
        self.validator.get_or_init(|| {
            let mut validator = Validator::new();
            for plugin in self.plugins.values() {
                if let Some(schema) = plugin.schema.to_json() {
                    validator.add_ref(format!("/schema/plugin/{}", plugin.name), schema);
                }
            }
            validator.add_ref("/schema/task", self.task_schema());
            validator.add_ref("/schema/config", config::root_schema());
            validator
        })
    }

    /// Validate a single task config (defaults filled in).
    pub fn process_task_config(&self, config: &Value, set_defaults: bool) -> (Value, Vec<crate::schema::ValidationError>) {
        let validator = self.validator();
        let schema = json!({ "$ref": "/schema/task" });
        validator.process_config(config, &schema, set_defaults)
    }
}

static GLOBAL: OnceLock<Arc<PluginRegistry>> = OnceLock::new();

/// Freeze `registry` as the process-wide registry. Dependencies are checked
/// first; a second install returns the already installed one.
pub fn install_global(registry: PluginRegistry) -> Result<Arc<PluginRegistry>> {
    registry.check_dependencies()?;
    Ok(GLOBAL.get_or_init(|| Arc::new(registry)).clone())
}

/// The process-wide registry, if installed.
pub fn global() -> Option<Arc<PluginRegistry>> {
    GLOBAL.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::plugin::{ConfigContributor, PhaseHandler, PluginSchema};
    use crate::task::Task;

    struct Noop;

    impl PhaseHandler for Noop {
        fn on_phase(&self, _: Phase, _: &mut Task, _: &Value) -> std::result::Result<(), PluginError> {
            Ok(())
        }
    }

    impl ConfigContributor for Noop {
        fn schema(&self) -> PluginSchema {
            PluginSchema::Any
        }
    }

    fn noop(name: &str) -> PluginDescriptor {
        PluginDescriptor::new(name, Arc::new(Noop))
    }

    #[test]
    fn test_name_conflict() {
        let mut reg = PluginRegistry::new();
        reg.register(noop("mock").phase(Phase::Input)).unwrap();
        let err = reg.register(noop("mock").phase(Phase::Input)).unwrap_err();
        assert!(matches!(err, AutoflowError::PluginNameConflict(n) if n == "mock"));
        assert!(reg.register(noop("mock").debug()).is_ok());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_get_unknown_is_dependency_error() {
        let reg = PluginRegistry::new();
        let err = reg.get("deluge", Some("task tv")).unwrap_err();
        match err {
            AutoflowError::Dependency { plugin, requested_by } => {
                assert_eq!(plugin, "deluge");
                assert_eq!(requested_by.as_deref(), Some("task tv"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_phase_order_priority_then_name() {
        let mut reg = PluginRegistry::new();
        reg.register(noop("zeta").phase(Phase::Filter)).unwrap();
        reg.register(noop("alpha").phase(Phase::Filter)).unwrap();
        reg.register(noop("seen").phase_priority(Phase::Filter, 255)).unwrap();
        reg.register(noop("late").phase_priority(Phase::Filter, 0)).unwrap();
        reg.register(noop("input_only").phase(Phase::Input)).unwrap();

        let order = |reg: &PluginRegistry| -> Vec<String> {
            reg.phase_handlers(Phase::Filter)
                .iter()
                .map(|h| h.name().to_string())
                .collect()
        };
        let first = order(&reg);
        assert_eq!(first, vec!["seen", "alpha", "zeta", "late"]);
        for _ in 0..5 {
            assert_eq!(order(&reg), first);
        }
    }

    #[test]
    fn test_filtering() {
        let mut reg = PluginRegistry::new();
        reg.register(noop("mock").phase(Phase::Input).group("input")).unwrap();
        reg.register(noop("dump").phase(Phase::Output).interface("debug")).unwrap();
        let names = |f: PluginFilter| reg.plugins(f).map(|p| p.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(PluginFilter::all().phase(Phase::Input)), vec!["mock"]);
        assert_eq!(names(PluginFilter::all().group("input")), vec!["mock"]);
        assert_eq!(names(PluginFilter::all().interface("debug")), vec!["dump"]);
        assert_eq!(names(PluginFilter::all().interface("task")).len(), 2);
    }

    #[test]
    fn test_missing_dependency_detected() {
        let mut reg = PluginRegistry::new();
        reg.register(noop("list_add").phase(Phase::Output).depends_on("entry_list"))
            .unwrap();
        assert!(matches!(reg.check_dependencies(), Err(AutoflowError::Dependency { .. })));
    }

    #[test]
    fn test_task_schema_rejects_unknown_plugin() {
        let mut reg = PluginRegistry::new();
        reg.register(noop("mock").phase(Phase::Input)).unwrap();
        let (_, errors) = reg.process_task_config(&json!({"mock": [], "bogus": 1}), true);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].json_pointer, "/bogus");
        assert_eq!(errors[0].validator, "additionalProperties");
    }

    #[test]
    fn test_late_registration_reaches_task_schema() {
        let mut reg = PluginRegistry::new();
        reg.register(noop("mock").phase(Phase::Input)).unwrap();
        let (_, errors) = reg.process_task_config(&json!({"mock": [], "dump": true}), true);
        assert_eq!(errors.len(), 1);

        reg.register(noop("dump").phase(Phase::Output)).unwrap();
        let (_, errors) = reg.process_task_config(&json!({"mock": [], "dump": true}), true);
        assert!(errors.is_empty(), "{errors:?}");
    }
}
