//! Error taxonomy shared by every Autoflow crate.
//!
//! Scope of each error:
//! - [`AutoflowError`] — task- or process-scoped failures (registry, config, store).
//! - [`PluginError`] — returned by phase handlers; `Warning` is logged and
//!   swallowed, `Fatal` aborts the task.
//! - [`RenderError`] — template evaluation failure; fails a single entry.

use crate::schema::ValidationError;

/// Errors surfaced by the engine, registry, config loader and store.
#[derive(Debug, thiserror::Error)]
pub enum AutoflowError {
    #[error("Plugin name conflict: '{0}' is already registered")]
    PluginNameConflict(String),

    #[error("Dependency error: plugin '{plugin}' is not installed (requested by {})", requested_by.as_deref().unwrap_or("unknown"))]
    Dependency {
        plugin: String,
        requested_by: Option<String>,
    },

    #[error("Config error: {message}")]
    Config {
        message: String,
        errors: Vec<ValidationError>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Executor is shut down")]
    Shutdown,
}

impl AutoflowError {
    /// Build a config error from a batch of validation failures.
    pub fn config(message: impl Into<String>, errors: Vec<ValidationError>) -> Self {
        Self::Config {
            message: message.into(),
            errors,
        }
    }

    /// Structured validation errors carried by a config error, if any.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            Self::Config { errors, .. } => errors,
            _ => &[],
        }
    }
}

impl From<rusqlite::Error> for AutoflowError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AutoflowError>;

/// Outcome of a phase handler that did not succeed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PluginError {
    /// Recoverable: logged, the task carries on.
    #[error("{0}")]
    Warning(String),
    /// Unrecoverable: the task aborts, abort and exit handlers still run.
    #[error("{0}")]
    Fatal(String),
}

impl PluginError {
    pub fn warning(msg: impl Into<String>) -> Self {
        Self::Warning(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}

impl From<AutoflowError> for PluginError {
    fn from(e: AutoflowError) -> Self {
        Self::Fatal(e.to_string())
    }
}

/// Template rendering failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("template syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("'{0}' is undefined")]
    Undefined(String),

    #[error("unknown filter '{0}'")]
    Filter(String),
}
