//! Application assembly and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::browser::ScreenshotOptions;
use crate::config::AppConfig;
use crate::database::Database;
use crate::executor::{builtin, ProcessRunner, RoutineRegistry, SpiderExecutor};
use crate::logging::OpTimer;
use crate::scheduler::TaskScheduler;
use crate::services::{SpiderRunner, SpiderService, TaskService};
use crate::{log_banner, log_init_step, log_init_warning, log_success, AppState};

/// Spider Scheduler version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Router plus the state behind it, for shutdown handling.
#[derive(Debug)]
pub struct Application {
    pub router: Router,
    pub state: AppState,
}

/// Create the application with all routes and middleware.
///
/// Opens the store, fills the routine registry, starts the scheduler and
/// re-registers every stored task.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Application> {
    create_app_with_routines(config, RoutineRegistry::new()).await
}

/// Like [`create_app`], with extra in-process routines registered up front.
pub async fn create_app_with_routines(
    config: AppConfig,
    routines: RoutineRegistry,
) -> anyhow::Result<Application> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("🕷️ Spider Scheduler v{VERSION}"),
        format!("Database: {}", config.database.path().display())
    );

    // [1/6] Database
    let step_timer = OpTimer::new("server", "database");
    let db = Database::open(&config.database).await?;
    log_init_step!(
        1,
        6,
        "Database",
        format!(
            "🗄️  {} (pool {})",
            db.path().display(),
            config.database.pool_size
        )
    );
    step_timer.finish();

    // [2/6] Routine registry
    let step_timer = OpTimer::new("server", "routines");
    let screenshots = ScreenshotOptions::from_config(&config);
    builtin::register_builtins(&routines, &screenshots);
    let routine_count = routines.list().len();
    log_init_step!(2, 6, "Routines", format!("🔧 {routine_count} in-process routines"));
    step_timer.finish();

    // [3/6] Executor
    let step_timer = OpTimer::new("server", "executor");
    let process = ProcessRunner::from_config(&config);
    let executor = SpiderExecutor::new(Arc::new(routines), process);
    log_init_step!(
        3,
        6,
        "Executor",
        format!(
            "⚙️  interpreter '{}', timeout {}s",
            config.runtime.node_path, config.runtime.process_timeout_secs
        )
    );
    if !config.paths.default_script.exists() {
        log_init_warning!(
            "Default script {} not found; javascript spiders without module_path will fail",
            config.paths.default_script.display()
        );
    }
    step_timer.finish();

    // [4/6] Scheduler and services
    let step_timer = OpTimer::new("server", "scheduler");
    let runner = SpiderRunner::new(db.clone(), executor);
    let scheduler = TaskScheduler::new(Arc::new(runner.clone()));
    let spiders = SpiderService::new(
        db.clone(),
        runner,
        scheduler.clone(),
        &config.paths.spider_dir,
    );
    let tasks = TaskService::new(db, scheduler.clone());
    log_init_step!(4, 6, "Scheduler", "⏰ Cron scheduler ready");
    step_timer.finish();

    // [5/6] Restore stored tasks
    let step_timer = OpTimer::new("server", "restore_tasks");
    let report = tasks.restore_all().await?;
    log_init_step!(
        5,
        6,
        "Tasks",
        format!("📋 {} restored, {} failed", report.restored, report.failed.len())
    );
    if !report.failed.is_empty() {
        log_init_warning!("Tasks not scheduled: {:?}", report.failed);
    }
    step_timer.finish();

    let state = AppState {
        config: Arc::new(config.clone()),
        spiders,
        tasks,
        scheduler,
        screenshots: Arc::new(screenshots),
    };

    // [6/6] Router with middleware
    let step_timer = OpTimer::new("server", "router");
    let router = api::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.timeout_secs),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());
    log_init_step!(6, 6, "Router", "🌐 Routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("Spider Scheduler created successfully");

    Ok(Application { router, state })
}
