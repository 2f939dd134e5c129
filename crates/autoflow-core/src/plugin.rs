//! Plugin capability traits and the descriptor each plugin registers.
//!
//! A plugin is a handler plus metadata:
//! ```text
//! PluginDescriptor
//!   ├── name / api_version / category / builtin / debug
//!   ├── phases:      Phase → priority (higher runs first)
//!   ├── interfaces:  capability tags ("task", "list", ...)
//!   ├── groups:      free-form grouping tags
//!   ├── schema:      config fragment (Any | Object | NotConfigurable)
//!   ├── dependencies: other plugin names
//!   ├── handler:     Arc<dyn PhaseHandler>
//!   └── list:        Option<Arc<dyn ListProvider>>
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::Entry;
use crate::error::{PluginError, Result};
use crate::phase::Phase;
use crate::store::Store;
use crate::task::Task;

/// Current plugin API version.
pub const PLUGIN_API_VERSION: u32 = 2;

/// Acts on a task during the phases it registered for.
pub trait PhaseHandler: Send + Sync {
    fn on_phase(&self, phase: Phase, task: &mut Task, config: &Value) -> std::result::Result<(), PluginError>;
}

/// Contributes the plugin's config schema fragment.
pub trait ConfigContributor {
    fn schema(&self) -> PluginSchema {
        PluginSchema::NotConfigurable
    }
}

/// Named entry lists kept by a plugin (usually in the shared store).
pub trait ListProvider: Send + Sync {
    fn entries(&self, store: &Store, list: &str) -> Result<Vec<Entry>>;
    fn add(&self, store: &Store, list: &str, entry: &Entry) -> Result<bool>;
    fn remove(&self, store: &Store, list: &str, entry: &Entry) -> Result<bool>;
    fn contains(&self, store: &Store, list: &str, entry: &Entry) -> Result<bool>;
}

/// Config fragment a plugin accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginSchema {
    /// Any value (`true`).
    Any,
    /// A JSON schema object.
    Object(Value),
    /// The plugin cannot appear in task config.
    NotConfigurable,
}

impl PluginSchema {
    /// Schema as JSON; `None` when not configurable.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            PluginSchema::Any => Some(Value::Bool(true)),
            PluginSchema::Object(v) => Some(v.clone()),
            PluginSchema::NotConfigurable => None,
        }
    }

    pub fn is_configurable(&self) -> bool {
        !matches!(self, PluginSchema::NotConfigurable)
    }
}

/// Everything the registry knows about one plugin.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub api_version: u32,
    pub category: Option<String>,
    pub builtin: bool,
    pub debug: bool,
    pub interfaces: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub phases: BTreeMap<Phase, i32>,
    pub schema: PluginSchema,
    pub dependencies: Vec<String>,
    handler: Arc<dyn PhaseHandler>,
    list: Option<Arc<dyn ListProvider>>,
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("api_version", &self.api_version)
            .field("category", &self.category)
            .field("builtin", &self.builtin)
            .field("debug", &self.debug)
            .field("interfaces", &self.interfaces)
            .field("groups", &self.groups)
            .field("phases", &self.phases)
            .field("dependencies", &self.dependencies)
            .field("list_provider", &self.list.is_some())
            .finish()
    }
}

impl PluginDescriptor {
    /// Describe `plugin`, taking its schema from [`ConfigContributor`].
    /// Every plugin implements the `task` interface.
    pub fn new<P>(name: impl Into<String>, plugin: Arc<P>) -> Self
    where
        P: PhaseHandler + ConfigContributor + 'static,
    {
        let schema = plugin.schema();
        Self {
            name: name.into(),
            api_version: PLUGIN_API_VERSION,
            category: None,
            builtin: false,
            debug: false,
            interfaces: BTreeSet::from(["task".to_string()]),
            groups: BTreeSet::new(),
            phases: BTreeMap::new(),
            schema,
            dependencies: Vec::new(),
            handler: plugin,
            list: None,
        }
    }

    /// Handle `phase` at the phase's default priority.
    pub fn phase(self, phase: Phase) -> Self {
        let priority = phase.default_priority();
        self.phase_priority(phase, priority)
    }

    pub fn phase_priority(mut self, phase: Phase, priority: i32) -> Self {
        self.phases.insert(phase, priority);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }

    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.insert(interface.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn depends_on(mut self, plugin: impl Into<String>) -> Self {
        self.dependencies.push(plugin.into());
        self
    }

    pub fn schema(mut self, schema: PluginSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Attach a list provider; adds the `list` interface.
    pub fn list_provider(mut self, provider: Arc<dyn ListProvider>) -> Self {
        self.list = Some(provider);
        self.interfaces.insert("list".to_string());
        self
    }

    pub fn handler(&self) -> &Arc<dyn PhaseHandler> {
        &self.handler
    }

    pub fn list(&self) -> Option<&Arc<dyn ListProvider>> {
        self.list.as_ref()
    }

    pub fn priority(&self, phase: Phase) -> Option<i32> {
        self.phases.get(&phase).copied()
    }

    pub fn handles(&self, phase: Phase) -> bool {
        self.phases.contains_key(&phase)
    }

    /// Serializable view for introspection.
    pub fn info(&self, include_schema: bool) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            api_version: self.api_version,
            category: self.category.clone(),
            builtin: self.builtin,
            debug: self.debug,
            interfaces: self.interfaces.iter().cloned().collect(),
            groups: self.groups.iter().cloned().collect(),
            phases: self
                .phases
                .iter()
                .map(|(phase, priority)| PhaseInfo {
                    phase: *phase,
                    priority: *priority,
                })
                .collect(),
            dependencies: self.dependencies.clone(),
            schema: if include_schema { self.schema.to_json() } else { None },
        }
    }
}

/// Handler registration in one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub phase: Phase,
    pub priority: i32,
}

/// Plugin metadata as exposed to the API/CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub api_version: u32,
    pub category: Option<String>,
    pub builtin: bool,
    pub debug: bool,
    pub interfaces: Vec<String>,
    pub groups: Vec<String>,
    pub phases: Vec<PhaseInfo>,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}
