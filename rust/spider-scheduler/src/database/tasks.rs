//! Task repository.

use chrono::Utc;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};

use super::is_constraint;
use crate::domain::{NewTask, Task};
use crate::error::{AppError, AppResult};

const COLUMNS: &str =
    "id, spider_id, cron_expression, description, job_id, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        spider_id: row.get(1)?,
        cron_expression: row.get(2)?,
        description: row.get(3)?,
        job_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Insert a task with no job id yet.
pub fn insert(conn: &Connection, new: &NewTask) -> AppResult<Task> {
    conn.query_row(
        &format!(
            "INSERT INTO tasks (spider_id, cron_expression, description, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?4) RETURNING {COLUMNS}"
        ),
        params![
            new.spider_id,
            new.cron_expression.trim(),
            new.description,
            Utc::now()
        ],
        from_row,
    )
    .map_err(|e| {
        if is_constraint(&e, ffi::SQLITE_CONSTRAINT_FOREIGNKEY) {
            AppError::spider_not_found(new.spider_id)
        } else {
            AppError::Database(e)
        }
    })
}

/// Fetch one task.
pub fn get(conn: &Connection, id: i64) -> AppResult<Task> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::task_not_found(id))
}

/// All tasks in id order.
pub fn list(conn: &Connection) -> AppResult<Vec<Task>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM tasks ORDER BY id"))?;
    let tasks = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

/// Tasks bound to one spider, in id order.
pub fn list_for_spider(conn: &Connection, spider_id: i64) -> AppResult<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM tasks WHERE spider_id = ?1 ORDER BY id"
    ))?;
    let tasks = stmt
        .query_map(params![spider_id], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

/// Record the scheduler job id of a task.
pub fn set_job_id(conn: &Connection, id: i64, job_id: &str) -> AppResult<Task> {
    conn.query_row(
        &format!("UPDATE tasks SET job_id = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {COLUMNS}"),
        params![id, job_id, Utc::now()],
        from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::task_not_found(id))
}

/// Delete one task.
pub fn delete(conn: &Connection, id: i64) -> AppResult<()> {
    match conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])? {
        0 => Err(AppError::task_not_found(id)),
        _ => Ok(()),
    }
}

/// Delete every task of a spider, returning how many were removed.
pub fn delete_for_spider(conn: &Connection, spider_id: i64) -> AppResult<usize> {
    Ok(conn.execute("DELETE FROM tasks WHERE spider_id = ?1", params![spider_id])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{spiders, test_connection};

    fn new_task(spider_id: i64, cron: &str) -> NewTask {
        NewTask {
            spider_id,
            cron_expression: cron.to_string(),
            description: Some("nightly".to_string()),
        }
    }

    #[test]
    fn test_insert_get_and_job_id() {
        let conn = test_connection();
        let spider = spiders::insert(&conn, &spiders::sample("s1")).unwrap();

        let task = insert(&conn, &new_task(spider.id, " 0 0 * * * ")).unwrap();
        assert_eq!(task.cron_expression, "0 0 * * *");
        assert!(task.job_id.is_none());

        let task = set_job_id(&conn, task.id, "task_1").unwrap();
        assert_eq!(task.job_id.as_deref(), Some("task_1"));
        assert_eq!(get(&conn, task.id).unwrap(), task);
    }

    #[test]
    fn test_insert_unknown_spider() {
        let conn = test_connection();
        let err = insert(&conn, &new_task(77, "* * * * *")).unwrap_err();
        assert!(matches!(err, AppError::NotFound { entity: "Spider", id: 77 }));
        assert!(list(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let conn = test_connection();
        let spider = spiders::insert(&conn, &spiders::sample("s1")).unwrap();
        let first = insert(&conn, &new_task(spider.id, "*/5 * * * *")).unwrap();
        let second = insert(&conn, &new_task(spider.id, "0 12 * * 1")).unwrap();

        delete(&conn, first.id).unwrap();
        assert!(matches!(
            delete(&conn, first.id),
            Err(AppError::NotFound { entity: "Task", .. })
        ));

        let remaining = list_for_spider(&conn, spider.id).unwrap();
        assert_eq!(remaining, vec![second]);
        assert_eq!(delete_for_spider(&conn, spider.id).unwrap(), 1);
        assert!(list(&conn).unwrap().is_empty());
    }
}
