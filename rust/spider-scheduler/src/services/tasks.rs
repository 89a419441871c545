//! Task use-cases. Every task row is mirrored by a scheduler job.

use serde::Serialize;

use crate::database::{tasks, Database};
use crate::domain::{NewTask, ScheduledJobInfo, Task};
use crate::error::{AppError, AppResult};
use crate::scheduler::TaskScheduler;

/// Outcome of re-registering stored tasks at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct TaskService {
    db: Database,
    scheduler: TaskScheduler,
}

impl TaskService {
    pub fn new(db: Database, scheduler: TaskScheduler) -> Self {
        Self { db, scheduler }
    }

    /// Store a task and schedule it.
    ///
    /// If the job cannot be registered the row is deleted again, so a task
    /// either exists with a job or not at all.
    pub async fn create(&self, new: NewTask) -> AppResult<Task> {
        if new.cron_expression.trim().is_empty() {
            return Err(AppError::InvalidCron("expression is empty".into()));
        }

        let task = self.db.session(move |conn| tasks::insert(conn, &new)).await?;

        let job_id = match self
            .scheduler
            .add(task.id, task.spider_id, &task.cron_expression)
            .await
        {
            Ok(job_id) => job_id,
            Err(e) => {
                let task_id = task.id;
                if let Err(cleanup) = self.db.session(move |conn| tasks::delete(conn, task_id)).await {
                    tracing::error!(task_id, error = %cleanup, "Failed to remove unscheduled task");
                }
                tracing::warn!(task_id, error = %e, "Task rejected by scheduler");
                return Err(e);
            }
        };

        let task_id = task.id;
        let stored = self
            .db
            .session(move |conn| tasks::set_job_id(conn, task_id, &job_id))
            .await;
        match stored {
            Ok(task) => {
                tracing::info!(task_id, spider_id = task.spider_id, "Task created");
                Ok(task)
            }
            Err(e) => {
                if let Err(unscheduled) = self.scheduler.remove(task_id).await {
                    tracing::warn!(task_id, error = %unscheduled, "Failed to unschedule task");
                }
                Err(e)
            }
        }
    }

    pub async fn list(&self) -> AppResult<Vec<Task>> {
        self.db.session(|conn| tasks::list(conn)).await
    }

    pub async fn get(&self, id: i64) -> AppResult<Task> {
        self.db.session(move |conn| tasks::get(conn, id)).await
    }

    /// Unschedule and delete a task.
    ///
    /// A missing job is logged and the row is deleted anyway.
    pub async fn delete(&self, id: i64) -> AppResult<()> {
        match self.scheduler.remove(id).await {
            Ok(()) => {}
            Err(AppError::NotScheduled(_)) => {
                tracing::warn!(task_id = id, "Task had no scheduler job");
            }
            Err(e) => return Err(e),
        }
        self.db.session(move |conn| tasks::delete(conn, id)).await?;
        tracing::info!(task_id = id, "Task deleted");
        Ok(())
    }

    /// Current scheduler snapshot.
    pub async fn running(&self) -> Vec<ScheduledJobInfo> {
        self.scheduler.list().await
    }

    /// Schedule every stored task. Failures are logged and skipped.
    pub async fn restore_all(&self) -> AppResult<RestoreReport> {
        let stored = self.list().await?;
        let mut report = RestoreReport::default();

        for task in stored {
            match self
                .scheduler
                .add(task.id, task.spider_id, &task.cron_expression)
                .await
            {
                Ok(job_id) => {
                    report.restored += 1;
                    if task.job_id.as_deref() != Some(job_id.as_str()) {
                        let task_id = task.id;
                        if let Err(e) = self
                            .db
                            .session(move |conn| tasks::set_job_id(conn, task_id, &job_id))
                            .await
                        {
                            tracing::warn!(task_id, error = %e, "Failed to record job id");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        task_id = task.id,
                        cron = %task.cron_expression,
                        error = %e,
                        "Failed to restore task"
                    );
                    report.failed.push(task.id);
                }
            }
        }

        Ok(report)
    }
}
