//! # Autoflow Engine
//!
//! Runs tasks. [`TaskRunner`] drives one task through its phases;
//! [`Executor`] serialises every run request onto a single worker and
//! publishes history records and live streams.

pub mod executor;
pub mod history;
pub mod log_capture;
pub mod runner;
pub mod stream;

pub use executor::{Executor, ExecutorConfig, TaskSource};
pub use history::{ExecutionHistory, ExecutionId, ExecutionRecord, ExecutionResult, ExecutionStatus};
pub use log_capture::StreamLogLayer;
pub use runner::{NoopObserver, RunObserver, TaskOutcome, TaskRun, TaskRunner};
pub use stream::{Progress, StreamPoll, StreamReader, StreamRecord};
