//! Spider execution.
//!
//! A spider's language tag picks the strategy:
//!
//! - `python` runs a routine from the [`RoutineRegistry`] in process;
//! - `javascript` spawns the external interpreter through [`ProcessRunner`].
//!
//! Inactive spiders are rejected before anything is resolved or spawned.

pub mod builtin;
pub mod process;
pub mod registry;

pub use process::ProcessRunner;
pub use registry::{RoutineRegistry, RunContext, SpiderRoutine};

use std::sync::Arc;

use serde_json::Value;

use crate::domain::{Language, RunEnvelope, Spider};
use crate::error::{AppError, AppResult};

/// How a spider is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    InProcess,
    ExternalProcess,
}

impl ExecutionStrategy {
    /// Strategy for a stored language tag.
    pub fn for_language(tag: &str) -> AppResult<Self> {
        Ok(match Language::parse(tag)? {
            Language::Python => Self::InProcess,
            Language::Javascript => Self::ExternalProcess,
        })
    }
}

/// Runs spiders. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SpiderExecutor {
    routines: Arc<RoutineRegistry>,
    process: ProcessRunner,
}

impl SpiderExecutor {
    pub fn new(routines: Arc<RoutineRegistry>, process: ProcessRunner) -> Self {
        Self { routines, process }
    }

    /// Run `spider` once.
    ///
    /// Writes no database rows; callers persist any language change first.
    pub async fn run(&self, spider: &Spider, params: Value) -> AppResult<RunEnvelope> {
        if !spider.is_active {
            return Err(AppError::NotRunnable(spider.id));
        }

        let strategy = ExecutionStrategy::for_language(&spider.language)?;
        tracing::info!(
            spider_id = spider.id,
            spider = %spider.name,
            strategy = ?strategy,
            "Running spider"
        );

        let result = match strategy {
            ExecutionStrategy::InProcess => {
                let routine = self
                    .routines
                    .resolve(&spider.module_path, &spider.class_name)?;
                let ctx = RunContext {
                    spider: spider.clone(),
                    params,
                };
                routine
                    .run(&ctx)
                    .await
                    .map_err(|e| AppError::ExecutionFailed(format!("{e:#}")))?
            }
            ExecutionStrategy::ExternalProcess => self.process.run(spider, &params).await?,
        };

        tracing::info!(spider_id = spider.id, spider = %spider.name, "Spider run successfully");
        Ok(RunEnvelope::success(spider, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Counter {
        runs: AtomicUsize,
    }

    struct Counted(Arc<Counter>);

    #[async_trait]
    impl SpiderRoutine for Counted {
        async fn run(&self, ctx: &RunContext) -> anyhow::Result<Value> {
            self.0.runs.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"spider": ctx.spider.name}))
        }
    }

    struct Failing;

    #[async_trait]
    impl SpiderRoutine for Failing {
        async fn run(&self, _ctx: &RunContext) -> anyhow::Result<Value> {
            anyhow::bail!("selector not found")
        }
    }

    fn spider(module_path: &str, class_name: &str, language: &str) -> Spider {
        let now = Utc::now();
        Spider {
            id: 9,
            name: "s1".into(),
            description: None,
            module_path: module_path.into(),
            class_name: class_name.into(),
            is_active: true,
            language: language.into(),
            script_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn executor(counter: &Arc<Counter>) -> SpiderExecutor {
        let registry = RoutineRegistry::new();
        let counter = Arc::clone(counter);
        registry.register("pkg.mod", "Cls", move || Box::new(Counted(Arc::clone(&counter))));
        registry.register("pkg.mod", "Broken", || Box::new(Failing));
        SpiderExecutor::new(
            Arc::new(registry),
            ProcessRunner::new("/nonexistent/node", "default.js", Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_in_process_run() {
        let counter = Arc::new(Counter::default());
        let envelope = executor(&counter)
            .run(&spider("pkg.mod", "Cls", "python"), Value::Null)
            .await
            .unwrap();

        assert_eq!(envelope.status, "success");
        assert_eq!(envelope.message, "Spider 9 (s1) run successfully");
        assert_eq!(envelope.result["spider"], "s1");
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inactive_spider_has_no_side_effects() {
        let counter = Arc::new(Counter::default());
        let mut inactive = spider("pkg.mod", "Cls", "python");
        inactive.is_active = false;

        let err = executor(&counter).run(&inactive, Value::Null).await.unwrap_err();
        assert!(matches!(err, AppError::NotRunnable(9)));
        assert_eq!(counter.runs.load(Ordering::SeqCst), 0);

        // the external path is rejected before spawning as well
        inactive.language = "javascript".into();
        let err = executor(&counter).run(&inactive, Value::Null).await.unwrap_err();
        assert!(matches!(err, AppError::NotRunnable(9)));
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let counter = Arc::new(Counter::default());
        let executor = executor(&counter);

        let err = executor
            .run(&spider("pkg.other", "Cls", "python"), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TargetNotFound(_)));

        let err = executor
            .run(&spider("pkg.mod", "Broken", "python"), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExecutionFailed(ref m) if m.contains("selector not found")));

        let err = executor
            .run(&spider("pkg.mod", "Cls", "ruby"), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedLanguage(_)));

        let err = executor
            .run(&spider("", "https://example.com", "javascript"), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExecutionFailed(_)));
    }

    #[test]
    fn test_strategy_for_language() {
        assert_eq!(
            ExecutionStrategy::for_language("python").unwrap(),
            ExecutionStrategy::InProcess
        );
        assert_eq!(
            ExecutionStrategy::for_language("javascript").unwrap(),
            ExecutionStrategy::ExternalProcess
        );
        assert!(ExecutionStrategy::for_language("go").is_err());
    }
}
