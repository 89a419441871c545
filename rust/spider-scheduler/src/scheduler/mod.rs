//! Cron scheduling of spider runs.
//!
//! [`TaskScheduler`] keeps one in-memory job per task, keyed `task_<id>`.
//! Jobs are not persisted; the server re-registers every stored task at
//! startup.

pub mod cron;
pub mod jobs;

pub use cron::{CronExpression, CronParser};
pub use jobs::{job_id, JobRunner, TaskScheduler};
