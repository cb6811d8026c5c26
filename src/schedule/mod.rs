//! Automatic snapshot schedules and retention.
//!
//! - `config`: per-book schedule and its calendar rules
//! - `registry`: schedules persisted across restarts
//! - `scheduler`: due evaluation, creation, pruning, background thread

mod config;
mod registry;
mod scheduler;

pub use config::{last_day_of_month, Frequency, ScheduleConfig, DEFAULT_RETENTION_COUNT};
pub use registry::ScheduleRegistry;
pub use scheduler::{RunReport, ScheduleFailure, Scheduler, SchedulerHandle, TriggerOutcome};
