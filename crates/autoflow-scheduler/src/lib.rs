//! # Autoflow Scheduler
//!
//! Turns `[[schedules]]` entries into run requests.
//!
//! ```text
//! Scheduler (tokio interval)
//!   ├── interval: every 2h      → "tv"
//!   ├── cron: hour=3 minute=0   → "backup", "movies"
//!   └── on fire → Submitter::submit(task) → executor queue
//! ```

pub mod cron;
pub mod engine;
pub mod schedule;

pub use cron::CronSpec;
pub use engine::{Fire, ScheduleInfo, SchedulerEngine, Submitter, spawn_scheduler};
pub use schedule::{IntervalSpec, Trigger};
