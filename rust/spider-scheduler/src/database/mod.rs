//! SQLite-backed persistence for spiders and tasks.
//!
//! Every operation runs inside a *session*: a fresh connection opened on the
//! blocking thread pool, bounded by a semaphore sized from
//! `database.pool_size`. Repository functions in [`spiders`] and [`tasks`]
//! are plain synchronous functions over a [`rusqlite::Connection`], so they
//! compose inside one session or one transaction.
//!
//! ```rust,ignore
//! let db = Database::open(&config.database).await?;
//! let spider = db.session(move |conn| spiders::get(conn, 7)).await?;
//! ```

pub mod schema;
pub mod spiders;
pub mod tasks;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tokio::task;

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

/// Handle to the SQLite store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
    sessions: Arc<Semaphore>,
}

impl Database {
    /// Open (and migrate) the database described by `config`.
    pub async fn open(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool_size = usize::try_from(config.pool_size).unwrap_or(1).max(1);
        Self::open_at(
            config.path(),
            pool_size,
            Duration::from_secs(config.busy_timeout_secs),
        )
        .await
    }

    /// Open (and migrate) the database file at `path`.
    pub async fn open_at(
        path: impl Into<PathBuf>,
        pool_size: usize,
        busy_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let db = Self {
            path: path.into(),
            busy_timeout,
            sessions: Arc::new(Semaphore::new(pool_size.max(1))),
        };

        if let Some(parent) = db.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let path = db.path.clone();
        let busy_timeout = db.busy_timeout;
        task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = open_connection(&path, busy_timeout)?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to enable WAL mode")?;
            schema::migrate(&conn)
        })
        .await
        .context("Failed to spawn blocking task")??;

        Ok(db)
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` with a dedicated connection on the blocking pool.
    ///
    /// The connection is closed when `f` returns, whatever the outcome.
    pub async fn session<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.sessions)
            .acquire_owned()
            .await
            .context("Database session pool closed")?;
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;

        task::spawn_blocking(move || {
            let _permit = permit;
            let mut conn = open_connection(&path, busy_timeout).map_err(AppError::Internal)?;
            f(&mut conn)
        })
        .await
        .context("Database session task failed")?
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.busy_timeout(busy_timeout)
        .context("Failed to set busy timeout")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("Failed to enable foreign keys")?;
    Ok(conn)
}

/// Whether `err` is a violation of the given extended constraint code.
pub(crate) fn is_constraint(err: &rusqlite::Error, extended_code: std::ffi::c_int) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == extended_code
    )
}

#[cfg(test)]
pub(crate) fn test_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    schema::migrate(&conn).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_parent_and_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("spider.db");
        let db = Database::open_at(&path, 2, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(path.exists());

        let count = db
            .session(|conn| Ok(spiders::count(conn)?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_session_error_propagates() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("s.db"), 1, Duration::from_secs(1))
            .await
            .unwrap();

        let err = db
            .session(|conn| spiders::get(conn, 42))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { id: 42, .. }));
    }
}
