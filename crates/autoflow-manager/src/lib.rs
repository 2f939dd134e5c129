//! # Autoflow Manager
//!
//! One [`Manager`] per process: it loads the config, opens the store, starts
//! the executor and drives the scheduler in daemon mode.

pub mod manager;
pub mod selection;

pub use manager::Manager;
pub use selection::Selected;
