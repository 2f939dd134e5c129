//! # Autoflow Core
//!
//! Data model shared by every Autoflow crate.
//!
//! ```text
//!            ┌──────────────┐
//!  config ──▶│ PluginRegistry│──▶ Validator (/schema/config, /schema/task, /schema/plugin/*)
//!            └──────┬───────┘
//!                   │ phase_handlers(phase)
//!            ┌──────▼───────┐
//!            │     Task     │── entries: Vec<Entry> (undecided/accepted/rejected/failed)
//!            └──────┬───────┘
//!                   │ on_phase(phase, &mut Task, &config)
//!            ┌──────▼───────┐
//!            │ PhaseHandler │── Store (SQLite), lazy lookups, templates
//!            └──────────────┘
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod lazy;
pub mod phase;
pub mod plugin;
pub mod quality;
pub mod registry;
pub mod schema;
pub mod store;
pub mod task;
pub mod template;

pub use config::{
    AutoflowConfig, ConfigHandle, CronConfig, CronField, DaemonConfig, IntervalConfig, ScheduleConfig,
    TaskNames,
};
pub use entry::{Entry, EntryState, FieldValue};
pub use error::{AutoflowError, PluginError, RenderError, Result};
pub use phase::Phase;
pub use plugin::{ConfigContributor, ListProvider, PhaseHandler, PluginDescriptor, PluginInfo, PluginSchema};
pub use registry::{PluginFilter, PluginRegistry};
pub use schema::ValidationError;
pub use store::Store;
pub use task::{Task, TaskOptions, TaskSummary};
