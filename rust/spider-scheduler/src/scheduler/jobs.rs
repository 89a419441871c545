//! In-process job registry.
//!
//! Each job is a tokio task that sleeps until the next cron match, runs the
//! spider, and repeats. The run is awaited before the next fire time is
//! computed, so a task never overlaps itself; fires missed meanwhile are
//! skipped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::{CronExpression, CronParser};
use crate::domain::{RunEnvelope, ScheduledJobInfo};
use crate::error::{AppError, AppResult};

const JOB_PREFIX: &str = "task_";

/// Scheduler job id for a task.
pub fn job_id(task_id: i64) -> String {
    format!("{JOB_PREFIX}{task_id}")
}

fn task_id_from_job(job_id: &str) -> Option<i64> {
    let digits = job_id.strip_prefix(JOB_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// What a job does when it fires.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run the spider with a fresh database session.
    async fn run_spider(&self, spider_id: i64) -> AppResult<RunEnvelope>;
}

#[derive(Debug)]
struct ScheduledJob {
    task_id: i64,
    expression: CronExpression,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    handle: JoinHandle<()>,
}

/// Registry of cron-triggered spider runs, one per task.
#[derive(Clone)]
pub struct TaskScheduler {
    jobs: Arc<RwLock<HashMap<String, ScheduledJob>>>,
    runner: Arc<dyn JobRunner>,
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler").finish_non_exhaustive()
    }
}

impl TaskScheduler {
    /// Create an empty scheduler that fires jobs through `runner`.
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            runner,
        }
    }

    /// Register (or replace) the job for `task_id`.
    ///
    /// Returns the job id, `task_<task_id>`.
    pub async fn add(&self, task_id: i64, spider_id: i64, cron_expression: &str) -> AppResult<String> {
        let expression = CronParser::parse(cron_expression)
            .map_err(|e| AppError::InvalidCron(format!("{e:#}")))?;

        let id = job_id(task_id);
        let next_run = Arc::new(Mutex::new(
            expression
                .next_after(&Local::now())
                .map(|t| t.with_timezone(&Utc)),
        ));

        let handle = tokio::spawn(run_job(
            id.clone(),
            spider_id,
            expression.clone(),
            Arc::clone(&next_run),
            Arc::clone(&self.runner),
        ));

        let job = ScheduledJob {
            task_id,
            expression,
            next_run,
            handle,
        };

        let replaced = self.jobs.write().await.insert(id.clone(), job);
        if let Some(old) = replaced {
            old.handle.abort();
            tracing::info!(job_id = %id, "Replaced existing job");
        }

        tracing::info!(
            job_id = %id,
            task_id,
            spider_id,
            cron = %cron_expression.trim(),
            "Job scheduled"
        );
        Ok(id)
    }

    /// De-register the job for `task_id`.
    ///
    /// An in-flight run is left to finish.
    pub async fn remove(&self, task_id: i64) -> AppResult<()> {
        let id = job_id(task_id);
        let job = self
            .jobs
            .write()
            .await
            .remove(&id)
            .ok_or(AppError::NotScheduled(task_id))?;
        job.handle.abort();
        tracing::info!(job_id = %id, task_id, "Job removed");
        Ok(())
    }

    /// Whether a job exists for `task_id`.
    pub async fn contains(&self, task_id: i64) -> bool {
        self.jobs.read().await.contains_key(&job_id(task_id))
    }

    /// Number of registered jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether no job is registered.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Snapshot of task jobs, ordered by task id.
    pub async fn list(&self) -> Vec<ScheduledJobInfo> {
        let jobs = self.jobs.read().await;
        let mut snapshot: Vec<ScheduledJobInfo> = jobs
            .iter()
            .filter_map(|(id, job)| {
                let task_id = task_id_from_job(id)?;
                debug_assert_eq!(task_id, job.task_id);
                Some(ScheduledJobInfo {
                    task_id,
                    job_id: id.clone(),
                    name: format!("Task {task_id}"),
                    next_run_time: *job.next_run.lock(),
                    trigger: job.expression.describe(),
                })
            })
            .collect();
        snapshot.sort_by_key(|info| info.task_id);
        snapshot
    }

    /// Abort every job.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
        tracing::info!(jobs = count, "Scheduler stopped");
    }
}

async fn run_job(
    job_id: String,
    spider_id: i64,
    expression: CronExpression,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    runner: Arc<dyn JobRunner>,
) {
    let mut last_fire: Option<DateTime<Local>> = None;

    loop {
        let now = Local::now();
        let base = match last_fire {
            Some(last) if last > now => last,
            _ => now,
        };

        let Some(next) = expression.next_after(&base) else {
            *next_run.lock() = None;
            tracing::warn!(job_id = %job_id, "Cron expression has no upcoming fire time, job idle");
            return;
        };
        *next_run.lock() = Some(next.with_timezone(&Utc));

        let wait = (next - Local::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        last_fire = Some(next);

        tracing::info!(job_id = %job_id, spider_id, "Running scheduled spider");
        let invocation = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run_spider(spider_id).await })
        };

        match invocation.await {
            Ok(Ok(envelope)) => {
                tracing::info!(job_id = %job_id, spider_id, message = %envelope.message, "Scheduled run finished");
            }
            Ok(Err(e)) => {
                tracing::error!(job_id = %job_id, spider_id, error = %e, "Scheduled run failed");
            }
            Err(e) if e.is_panic() => {
                tracing::error!(job_id = %job_id, spider_id, "Scheduled run panicked");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, spider_id, error = %e, "Scheduled run aborted");
            }
        }
    }
}
