//! Spider use-cases: CRUD, script upload, and runs.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::database::{spiders, Database};
use crate::domain::{Language, NewSpider, RunEnvelope, RunRequest, Spider, SpiderPage, SpiderUpdate, Task};
use crate::error::{AppError, AppResult};
use crate::executor::SpiderExecutor;
use crate::scheduler::{JobRunner, TaskScheduler};

/// Loads a spider and runs it. Used both by the HTTP run path and by
/// scheduled jobs.
#[derive(Debug, Clone)]
pub struct SpiderRunner {
    db: Database,
    executor: SpiderExecutor,
}

impl SpiderRunner {
    pub fn new(db: Database, executor: SpiderExecutor) -> Self {
        Self { db, executor }
    }

    /// Load `spider_id` in a fresh session and run it.
    pub async fn run_by_id(&self, spider_id: i64, params: Value) -> AppResult<RunEnvelope> {
        let spider = self
            .db
            .session(move |conn| spiders::get(conn, spider_id))
            .await?;
        self.executor.run(&spider, params).await
    }
}

#[async_trait]
impl JobRunner for SpiderRunner {
    async fn run_spider(&self, spider_id: i64) -> AppResult<RunEnvelope> {
        self.run_by_id(spider_id, Value::Null).await
    }
}

/// A script received by `POST /spiders/upload`.
#[derive(Debug, Clone)]
pub struct UploadedScript {
    pub name: String,
    pub description: Option<String>,
    pub language: String,
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Spider operations behind the HTTP surface.
#[derive(Debug, Clone)]
pub struct SpiderService {
    db: Database,
    runner: SpiderRunner,
    scheduler: TaskScheduler,
    spider_dir: PathBuf,
}

impl SpiderService {
    pub fn new(
        db: Database,
        runner: SpiderRunner,
        scheduler: TaskScheduler,
        spider_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            runner,
            scheduler,
            spider_dir: spider_dir.into(),
        }
    }

    /// Page of spiders in id order plus the total count.
    pub async fn list(&self, skip: i64, limit: i64) -> AppResult<SpiderPage> {
        let skip = skip.max(0);
        let limit = limit.max(0);
        self.db
            .session(move |conn| {
                let total = spiders::count(conn)?;
                let spiders = spiders::list(conn, skip, limit)?;
                Ok(SpiderPage { total, spiders })
            })
            .await
    }

    pub async fn get(&self, id: i64) -> AppResult<Spider> {
        self.db.session(move |conn| spiders::get(conn, id)).await
    }

    /// Create a spider record.
    pub async fn create(&self, new: NewSpider) -> AppResult<Spider> {
        new.validate()?;
        let spider = self
            .db
            .session(move |conn| spiders::insert(conn, &new))
            .await?;
        tracing::info!(spider_id = spider.id, spider = %spider.name, language = %spider.language, "Spider created");
        Ok(spider)
    }

    /// Save an uploaded script under the spider directory and create its record.
    ///
    /// The saved file is removed again when the record cannot be created.
    pub async fn upload(&self, upload: UploadedScript) -> AppResult<Spider> {
        let language = Language::parse(&upload.language)?;
        let stem = script_stem(&upload.file_name, language)?.to_string();

        tokio::fs::create_dir_all(&self.spider_dir)
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "Failed to create {}: {e}",
                    self.spider_dir.display()
                ))
            })?;
        let dest = self.spider_dir.join(&upload.file_name);
        write_new_file(&dest, &upload.content).await?;
        let saved = dest.to_string_lossy().into_owned();

        let (module_path, class_name) = match language {
            Language::Python => (format!("spiders.{stem}"), camel_case(&stem)),
            Language::Javascript => (saved.clone(), "run".to_string()),
        };
        let new = NewSpider {
            name: upload.name,
            description: upload.description,
            module_path,
            class_name,
            is_active: true,
            language: language.as_str().to_string(),
            script_path: Some(saved),
        };

        match self.create(new).await {
            Ok(spider) => {
                tracing::info!(spider_id = spider.id, path = %dest.display(), "Spider script uploaded");
                Ok(spider)
            }
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&dest).await {
                    tracing::warn!(path = %dest.display(), error = %remove, "Failed to remove uploaded script");
                }
                Err(e)
            }
        }
    }

    /// Apply a partial update.
    pub async fn update(&self, id: i64, update: SpiderUpdate) -> AppResult<Spider> {
        update.validate()?;
        if update.is_empty() {
            return self.get(id).await;
        }
        let spider = self
            .db
            .session(move |conn| spiders::update(conn, id, &update))
            .await?;
        tracing::info!(spider_id = id, "Spider updated");
        Ok(spider)
    }

    /// Delete a spider, its tasks and their jobs, and any uploaded script.
    pub async fn delete(&self, id: i64) -> AppResult<(Spider, Vec<Task>)> {
        let (spider, tasks) = self
            .db
            .session(move |conn| spiders::delete_cascade(conn, id))
            .await?;

        for task in &tasks {
            match self.scheduler.remove(task.id).await {
                Ok(()) | Err(AppError::NotScheduled(_)) => {}
                Err(e) => tracing::warn!(task_id = task.id, error = %e, "Failed to unschedule task"),
            }
        }

        if let Some(script) = &spider.script_path {
            match tokio::fs::remove_file(script).await {
                Ok(()) => tracing::debug!(path = %script, "Spider script removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!(path = %script, "Spider script already missing");
                }
                Err(e) => tracing::warn!(path = %script, error = %e, "Failed to remove spider script"),
            }
        }

        tracing::info!(spider_id = id, tasks = tasks.len(), "Spider deleted");
        Ok((spider, tasks))
    }

    /// Run a spider now.
    ///
    /// An unknown spider is a validation failure here. A differing `language`
    /// is persisted before the run, but never for an inactive spider.
    pub async fn run(&self, request: RunRequest) -> AppResult<RunEnvelope> {
        let RunRequest {
            spider_id,
            language,
            params,
        } = request;

        let mut spider = self
            .get(spider_id)
            .await
            .map_err(AppError::not_found_as_validation)?;
        if !spider.is_active {
            return Err(AppError::NotRunnable(spider.id));
        }

        if let Some(requested) = language {
            let requested = Language::parse(&requested)?;
            if !spider.language.eq_ignore_ascii_case(requested.as_str()) {
                tracing::info!(spider_id, from = %spider.language, to = %requested, "Switching spider language");
                spider = self
                    .update(
                        spider_id,
                        SpiderUpdate {
                            language: Some(requested.as_str().to_string()),
                            ..SpiderUpdate::default()
                        },
                    )
                    .await?;
            }
        }

        self.runner
            .executor
            .run(&spider, params.unwrap_or(Value::Null))
            .await
    }

    /// Run a spider by id with no parameters.
    pub async fn run_by_id(&self, spider_id: i64) -> AppResult<RunEnvelope> {
        self.runner.run_by_id(spider_id, Value::Null).await
    }
}

/// Validate an upload file name and return its stem.
fn script_stem(file_name: &str, language: Language) -> AppResult<&str> {
    let path = Path::new(file_name);
    let plain = !file_name.contains(['/', '\\'])
        && path.file_name().and_then(|n| n.to_str()) == Some(file_name);
    if !plain {
        return Err(AppError::Validation(format!(
            "Invalid file name '{file_name}'"
        )));
    }

    let extension = language.file_extension();
    if path.extension().and_then(|e| e.to_str()) != Some(extension) {
        return Err(AppError::Validation(format!(
            "Only .{extension} files are allowed for {language} spiders"
        )));
    }

    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation(format!("Invalid file name '{file_name}'")))
}

async fn write_new_file(path: &Path, content: &[u8]) -> AppResult<()> {
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(AppError::AlreadyExists(format!(
                "File '{}'",
                path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned())
            )));
        }
        Err(e) => {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Failed to create {}: {e}",
                path.display()
            )));
        }
    };

    let written = async {
        file.write_all(content).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = written {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
        return Err(AppError::Internal(anyhow::anyhow!(
            "Failed to write {}: {e}",
            path.display()
        )));
    }
    Ok(())
}

/// `news_feed` -> `NewsFeed`.
fn camel_case(stem: &str) -> String {
    stem.split(['_', '-', ' '])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ProcessRunner, RoutineRegistry, RunContext, SpiderRoutine};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Counted(Arc<AtomicUsize>);

    #[async_trait]
    impl SpiderRoutine for Counted {
        async fn run(&self, ctx: &RunContext) -> anyhow::Result<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ctx.params.clone())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        service: SpiderService,
        scheduler: TaskScheduler,
        db: Database,
        runs: Arc<AtomicUsize>,
        spider_dir: PathBuf,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(dir.path().join("spider.db"), 2, Duration::from_secs(5))
            .await
            .unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let registry = RoutineRegistry::new();
        let counter = Arc::clone(&runs);
        registry.register("pkg.mod", "Cls", move || Box::new(Counted(Arc::clone(&counter))));
        let executor = SpiderExecutor::new(
            Arc::new(registry),
            ProcessRunner::new("/nonexistent/node", "default.js", Duration::from_secs(1)),
        );

        let runner = SpiderRunner::new(db.clone(), executor);
        let scheduler = TaskScheduler::new(Arc::new(runner.clone()));
        let spider_dir = dir.path().join("spiders");
        let service = SpiderService::new(db.clone(), runner, scheduler.clone(), &spider_dir);
        Fixture {
            _dir: dir,
            service,
            scheduler,
            db,
            runs,
            spider_dir,
        }
    }

    fn upload(name: &str, file_name: &str, language: &str) -> UploadedScript {
        UploadedScript {
            name: name.to_string(),
            description: None,
            language: language.to_string(),
            file_name: file_name.to_string(),
            content: b"print('hi')\n".to_vec(),
        }
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("news_feed"), "NewsFeed");
        assert_eq!(camel_case("twitter-timeline"), "TwitterTimeline");
        assert_eq!(camel_case("single"), "Single");
    }

    #[test]
    fn test_script_stem() {
        assert_eq!(script_stem("feed.py", Language::Python).unwrap(), "feed");
        assert_eq!(script_stem("feed.js", Language::Javascript).unwrap(), "feed");
        assert!(matches!(
            script_stem("feed.js", Language::Python),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            script_stem("../feed.py", Language::Python),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            script_stem(".py", Language::Python),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_python_and_duplicate_file() {
        let fx = fixture().await;

        let spider = fx.service.upload(upload("feed", "news_feed.py", "python")).await.unwrap();
        assert_eq!(spider.module_path, "spiders.news_feed");
        assert_eq!(spider.class_name, "NewsFeed");
        assert!(fx.spider_dir.join("news_feed.py").exists());

        let err = fx
            .service
            .upload(upload("feed2", "news_feed.py", "python"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
        assert_eq!(fx.service.list(0, 100).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_upload_removes_file_when_record_fails() {
        let fx = fixture().await;
        fx.service.upload(upload("feed", "a.js", "javascript")).await.unwrap();

        let err = fx
            .service
            .upload(upload("feed", "b.js", "javascript"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
        assert!(fx.spider_dir.join("a.js").exists());
        assert!(!fx.spider_dir.join("b.js").exists());
    }

    #[tokio::test]
    async fn test_delete_cascades_jobs_and_script() {
        let fx = fixture().await;
        let spider = fx.service.upload(upload("feed", "feed.js", "javascript")).await.unwrap();
        assert_eq!(spider.class_name, "run");

        let spider_id = spider.id;
        let task = fx
            .db
            .session(move |conn| {
                crate::database::tasks::insert(
                    conn,
                    &crate::domain::NewTask {
                        spider_id,
                        cron_expression: "0 0 * * *".into(),
                        description: None,
                    },
                )
            })
            .await
            .unwrap();
        fx.scheduler.add(task.id, spider.id, "0 0 * * *").await.unwrap();

        let (deleted, tasks) = fx.service.delete(spider.id).await.unwrap();
        assert_eq!(deleted.id, spider.id);
        assert_eq!(tasks.len(), 1);
        assert!(fx.scheduler.is_empty().await);
        assert!(!fx.spider_dir.join("feed.js").exists());
        assert!(matches!(
            fx.service.get(spider.id).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_with_missing_script_still_succeeds() {
        let fx = fixture().await;
        let spider = fx.service.upload(upload("feed", "feed.py", "python")).await.unwrap();
        std::fs::remove_file(fx.spider_dir.join("feed.py")).unwrap();

        assert!(fx.service.delete(spider.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_paths() {
        let fx = fixture().await;
        let spider = fx.service.create(spiders::sample("s1")).await.unwrap();

        let envelope = fx
            .service
            .run(RunRequest {
                spider_id: spider.id,
                language: None,
                params: Some(serde_json::json!({"page": 1})),
            })
            .await
            .unwrap();
        assert_eq!(envelope.result["page"], 1);
        assert_eq!(fx.runs.load(Ordering::SeqCst), 1);

        let err = fx
            .service
            .run(RunRequest {
                spider_id: 999,
                language: None,
                params: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_run_inactive_has_no_side_effects() {
        let fx = fixture().await;
        let spider = fx.service.create(spiders::sample("s1")).await.unwrap();
        fx.service
            .update(
                spider.id,
                SpiderUpdate {
                    is_active: Some(false),
                    ..SpiderUpdate::default()
                },
            )
            .await
            .unwrap();

        let err = fx
            .service
            .run(RunRequest {
                spider_id: spider.id,
                language: Some("javascript".into()),
                params: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotRunnable(_)));
        assert_eq!(fx.runs.load(Ordering::SeqCst), 0);
        assert_eq!(fx.service.get(spider.id).await.unwrap().language, "python");
    }

    #[tokio::test]
    async fn test_run_persists_language_switch() {
        let fx = fixture().await;
        let spider = fx.service.create(spiders::sample("s1")).await.unwrap();

        let err = fx
            .service
            .run(RunRequest {
                spider_id: spider.id,
                language: Some("JavaScript".into()),
                params: None,
            })
            .await
            .unwrap_err();
        // the interpreter does not exist, but the switch is already stored
        assert!(matches!(err, AppError::ExecutionFailed(_)));
        assert_eq!(fx.service.get(spider.id).await.unwrap().language, "javascript");

        let err = fx
            .service
            .run(RunRequest {
                spider_id: spider.id,
                language: Some("ruby".into()),
                params: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedLanguage(_)));
    }

    #[tokio::test]
    async fn test_job_runner_uses_fresh_lookup() {
        let fx = fixture().await;
        let spider = fx.service.create(spiders::sample("s1")).await.unwrap();

        let envelope = fx.service.run_by_id(spider.id).await.unwrap();
        assert_eq!(envelope.status, "success");
        assert!(matches!(
            fx.service.run_by_id(404).await,
            Err(AppError::NotFound { .. })
        ));
    }
}
