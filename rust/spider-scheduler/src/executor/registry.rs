//! In-process routine registry.
//!
//! Maps a spider's `module_path` and `class_name` to a constructor. Only
//! routines registered at startup can run; nothing is loaded from a path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::domain::Spider;
use crate::error::{AppError, AppResult};

/// Input of a single run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub spider: Spider,
    /// Caller-supplied parameters, `null` for scheduled runs.
    pub params: Value,
}

impl RunContext {
    /// Target URL: `params.url`, else the spider name when it is an http(s) URL.
    pub fn target_url(&self) -> Option<url::Url> {
        let from_params = self
            .params
            .get("url")
            .and_then(Value::as_str)
            .and_then(|raw| url::Url::parse(raw).ok());
        from_params.or_else(|| {
            url::Url::parse(&self.spider.name)
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
        })
    }
}

/// A runnable in-process spider.
#[async_trait]
pub trait SpiderRoutine: Send + Sync {
    /// Run once and return the result payload.
    async fn run(&self, ctx: &RunContext) -> anyhow::Result<Value>;
}

/// Zero-argument routine constructor.
pub type RoutineFactory = Arc<dyn Fn() -> Box<dyn SpiderRoutine> + Send + Sync>;

/// `module_path` -> `class_name` -> constructor.
#[derive(Default)]
pub struct RoutineRegistry {
    modules: RwLock<HashMap<String, HashMap<String, RoutineFactory>>>,
}

impl fmt::Debug for RoutineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutineRegistry")
            .field("routines", &self.list())
            .finish()
    }
}

impl RoutineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one for the same pair.
    pub fn register<F>(&self, module_path: &str, class_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn SpiderRoutine> + Send + Sync + 'static,
    {
        self.modules
            .write()
            .entry(module_path.to_string())
            .or_default()
            .insert(class_name.to_string(), Arc::new(factory));
    }

    /// Construct the routine for `module_path`/`class_name`.
    pub fn resolve(&self, module_path: &str, class_name: &str) -> AppResult<Box<dyn SpiderRoutine>> {
        let modules = self.modules.read();
        let classes = modules.get(module_path).ok_or_else(|| {
            AppError::TargetNotFound(format!("module '{module_path}' is not registered"))
        })?;
        let factory = classes.get(class_name).ok_or_else(|| {
            AppError::TargetNotFound(format!(
                "class '{class_name}' not found in module '{module_path}'"
            ))
        })?;
        Ok(factory())
    }

    /// Registered `module_path.class_name` pairs, sorted.
    pub fn list(&self) -> Vec<String> {
        let modules = self.modules.read();
        let mut names: Vec<String> = modules
            .iter()
            .flat_map(|(module, classes)| classes.keys().map(move |class| format!("{module}.{class}")))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct Echo;

    #[async_trait]
    impl SpiderRoutine for Echo {
        async fn run(&self, ctx: &RunContext) -> anyhow::Result<Value> {
            Ok(ctx.params.clone())
        }
    }

    fn spider(name: &str) -> Spider {
        let now = Utc::now();
        Spider {
            id: 1,
            name: name.to_string(),
            description: None,
            module_path: "tests.echo".into(),
            class_name: "Echo".into(),
            is_active: true,
            language: "python".into(),
            script_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = RoutineRegistry::new();
        registry.register("tests.echo", "Echo", || Box::new(Echo));

        let routine = registry.resolve("tests.echo", "Echo").unwrap();
        let ctx = RunContext {
            spider: spider("s1"),
            params: serde_json::json!({"page": 2}),
        };
        assert_eq!(routine.run(&ctx).await.unwrap()["page"], 2);
        assert_eq!(registry.list(), vec!["tests.echo.Echo".to_string()]);
    }

    #[test]
    fn test_unknown_module_and_class() {
        let registry = RoutineRegistry::new();
        registry.register("tests.echo", "Echo", || Box::new(Echo));

        let err = registry.resolve("pkg.mod", "Cls").err().unwrap();
        assert!(matches!(err, AppError::TargetNotFound(ref m) if m.contains("pkg.mod")));

        let err = registry.resolve("tests.echo", "Missing").err().unwrap();
        assert!(matches!(err, AppError::TargetNotFound(ref m) if m.contains("Missing")));
    }

    #[test]
    fn test_target_url() {
        let ctx = RunContext {
            spider: spider("https://example.com/feed"),
            params: Value::Null,
        };
        assert_eq!(ctx.target_url().unwrap().as_str(), "https://example.com/feed");

        let ctx = RunContext {
            spider: spider("news"),
            params: serde_json::json!({"url": "https://example.org/"}),
        };
        assert_eq!(ctx.target_url().unwrap().host_str(), Some("example.org"));

        let ctx = RunContext {
            spider: spider("news"),
            params: Value::Null,
        };
        assert!(ctx.target_url().is_none());
    }
}
