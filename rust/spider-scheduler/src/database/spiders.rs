//! Spider repository.

use chrono::Utc;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};

use super::{is_constraint, tasks};
use crate::domain::{NewSpider, Spider, SpiderUpdate, Task};
use crate::error::{AppError, AppResult};

const COLUMNS: &str = "id, name, description, module_path, class_name, is_active, language, \
                       script_path, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Spider> {
    Ok(Spider {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        module_path: row.get(3)?,
        class_name: row.get(4)?,
        is_active: row.get(5)?,
        language: row.get(6)?,
        script_path: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn duplicate_name(err: rusqlite::Error, name: &str) -> AppError {
    if is_constraint(&err, ffi::SQLITE_CONSTRAINT_UNIQUE) {
        AppError::AlreadyExists(format!("Spider with name '{name}'"))
    } else {
        AppError::Database(err)
    }
}

/// Insert a spider. A taken name yields [`AppError::AlreadyExists`].
pub fn insert(conn: &Connection, new: &NewSpider) -> AppResult<Spider> {
    let now = Utc::now();
    conn.query_row(
        &format!(
            "INSERT INTO spiders (name, description, module_path, class_name, is_active, \
             language, script_path, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) RETURNING {COLUMNS}"
        ),
        params![
            new.name,
            new.description,
            new.module_path,
            new.class_name,
            new.is_active,
            new.language.trim().to_ascii_lowercase(),
            new.script_path,
            now,
        ],
        from_row,
    )
    .map_err(|e| duplicate_name(e, &new.name))
}

/// Fetch one spider.
pub fn get(conn: &Connection, id: i64) -> AppResult<Spider> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM spiders WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::spider_not_found(id))
}

/// Page through spiders in id order.
pub fn list(conn: &Connection, skip: i64, limit: i64) -> AppResult<Vec<Spider>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM spiders ORDER BY id LIMIT ?1 OFFSET ?2"
    ))?;
    let spiders = stmt
        .query_map(params![limit, skip], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(spiders)
}

/// Total number of spiders.
pub fn count(conn: &Connection) -> AppResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM spiders", [], |row| row.get(0))?)
}

/// Apply the supplied fields, leaving the rest untouched.
pub fn update(conn: &Connection, id: i64, update: &SpiderUpdate) -> AppResult<Spider> {
    let language = update
        .language
        .as_deref()
        .map(|l| l.trim().to_ascii_lowercase());
    let result = conn
        .query_row(
            &format!(
                "UPDATE spiders SET \
                 name = COALESCE(?2, name), \
                 description = COALESCE(?3, description), \
                 module_path = COALESCE(?4, module_path), \
                 class_name = COALESCE(?5, class_name), \
                 is_active = COALESCE(?6, is_active), \
                 language = COALESCE(?7, language), \
                 updated_at = ?8 \
                 WHERE id = ?1 RETURNING {COLUMNS}"
            ),
            params![
                id,
                update.name,
                update.description,
                update.module_path,
                update.class_name,
                update.is_active,
                language,
                Utc::now(),
            ],
            from_row,
        )
        .optional();

    match result {
        Ok(Some(spider)) => Ok(spider),
        Ok(None) => Err(AppError::spider_not_found(id)),
        Err(e) => Err(duplicate_name(e, update.name.as_deref().unwrap_or_default())),
    }
}

/// Delete a spider and all of its tasks in one transaction.
///
/// Returns the removed spider and tasks so the caller can clean up scheduler
/// jobs and script files.
pub fn delete_cascade(conn: &mut Connection, id: i64) -> AppResult<(Spider, Vec<Task>)> {
    let tx = conn.transaction()?;
    let spider = get(&tx, id)?;
    let removed = tasks::list_for_spider(&tx, id)?;
    tasks::delete_for_spider(&tx, id)?;
    tx.execute("DELETE FROM spiders WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok((spider, removed))
}

#[cfg(test)]
pub(crate) fn sample(name: &str) -> NewSpider {
    NewSpider {
        name: name.to_string(),
        description: Some("test spider".to_string()),
        module_path: "pkg.mod".to_string(),
        class_name: "Cls".to_string(),
        is_active: true,
        language: "python".to_string(),
        script_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_connection;
    use crate::domain::NewTask;

    #[test]
    fn test_insert_and_get() {
        let conn = test_connection();
        let created = insert(&conn, &sample("s1")).unwrap();
        assert!(created.id > 0);
        assert_eq!(created.created_at, created.updated_at);

        let fetched = get(&conn, created.id).unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_duplicate_name_leaves_table_unchanged() {
        let conn = test_connection();
        insert(&conn, &sample("s1")).unwrap();

        let err = insert(&conn, &sample("s1")).unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
        assert_eq!(err.to_string(), "Spider with name 's1' already exists");
        assert_eq!(count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_get_missing() {
        let conn = test_connection();
        assert!(matches!(
            get(&conn, 5),
            Err(AppError::NotFound { entity: "Spider", id: 5 })
        ));
    }

    #[test]
    fn test_list_pagination_in_id_order() {
        let conn = test_connection();
        for name in ["a", "b", "c", "d"] {
            insert(&conn, &sample(name)).unwrap();
        }

        let page = list(&conn, 1, 2).unwrap();
        let names: Vec<_> = page.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
        assert_eq!(count(&conn).unwrap(), 4);
    }

    #[test]
    fn test_partial_update() {
        let conn = test_connection();
        let created = insert(&conn, &sample("s1")).unwrap();

        let updated = update(
            &conn,
            created.id,
            &SpiderUpdate {
                description: Some("x".into()),
                ..SpiderUpdate::default()
            },
        )
        .unwrap();

        assert_eq!(updated.description.as_deref(), Some("x"));
        assert_eq!(updated.name, created.name);
        assert_eq!(updated.module_path, created.module_path);
        assert_eq!(updated.class_name, created.class_name);
        assert_eq!(updated.is_active, created.is_active);
        assert_eq!(updated.language, created.language);
    }

    #[test]
    fn test_update_rename_conflict_and_missing() {
        let conn = test_connection();
        insert(&conn, &sample("s1")).unwrap();
        let second = insert(&conn, &sample("s2")).unwrap();

        let rename = SpiderUpdate {
            name: Some("s1".into()),
            ..SpiderUpdate::default()
        };
        assert!(matches!(
            update(&conn, second.id, &rename),
            Err(AppError::AlreadyExists(_))
        ));
        assert!(matches!(
            update(&conn, 99, &SpiderUpdate::default()),
            Err(AppError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_cascade_removes_tasks() {
        let mut conn = test_connection();
        let spider = insert(&conn, &sample("s1")).unwrap();
        let other = insert(&conn, &sample("s2")).unwrap();
        for spider_id in [spider.id, spider.id, other.id] {
            tasks::insert(
                &conn,
                &NewTask {
                    spider_id,
                    cron_expression: "0 0 * * *".into(),
                    description: None,
                },
            )
            .unwrap();
        }

        let (deleted, removed) = delete_cascade(&mut conn, spider.id).unwrap();
        assert_eq!(deleted.id, spider.id);
        assert_eq!(removed.len(), 2);
        assert!(get(&conn, spider.id).is_err());
        assert_eq!(tasks::list(&conn).unwrap().len(), 1);

        assert!(matches!(
            delete_cascade(&mut conn, spider.id),
            Err(AppError::NotFound { .. })
        ));
    }
}
