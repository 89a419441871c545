//! Spider Scheduler - stored scraping routines with cron-triggered runs.
//!
//! The service keeps *spiders* (runnable scraping or screenshot routines)
//! and *tasks* (cron schedules bound to a spider) in SQLite, exposes CRUD
//! and run-now endpoints over HTTP, and fires scheduled runs from an
//! in-process cron scheduler.
//!
//! # Architecture
//!
//! - [`config`]: layered settings and the typed [`config::AppConfig`]
//! - [`database`]: SQLite store with per-operation sessions
//! - [`executor`]: in-process routines and external interpreter runs
//! - [`browser`]: cookie handling and the headless screenshot routine
//! - [`scheduler`]: cron parsing and the [`scheduler::TaskScheduler`]
//! - [`services`]: spider and task use-cases
//! - [`api`]: HTTP endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use spider_scheduler::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//!     axum::serve(listener, app.router).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod browser;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod executor;
pub mod logging;
pub mod scheduler;
pub mod server;
pub mod services;

use std::sync::Arc;

use browser::ScreenshotOptions;
use config::AppConfig;
use scheduler::TaskScheduler;
use services::{SpiderService, TaskService};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Spider CRUD and runs.
    pub spiders: SpiderService,
    /// Task CRUD, mirrored into the scheduler.
    pub tasks: TaskService,
    /// Cron job registry, owned here and stopped on shutdown.
    pub scheduler: TaskScheduler,
    /// Settings for ad-hoc screenshots.
    pub screenshots: Arc<ScreenshotOptions>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("spiders", &self.spiders)
            .field("tasks", &self.tasks)
            .field("scheduler", &self.scheduler)
            .field("screenshots", &self.screenshots.output_dir)
            .finish()
    }
}
