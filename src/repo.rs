use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqlitePool;

use crate::cascade::phase_for;
use crate::{AppError, AppResult};

pub const PROJECTS_TABLE: &str = "projects";

static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("identifier validation pattern to compile")
});

/// Tables the maintenance core writes to in place. Each carries `updated_at`.
const UPDATABLE_TABLES: &[&str] = &["projects", "financial_snapshots", "payments", "milestones"];

/// Tables that exist in the store but are not owned by a project.
const SHARED_TABLES: &[&str] = &["contractors"];

pub(crate) fn ensure_identifier(name: &str) -> AppResult<()> {
    if IDENTIFIER_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(
            AppError::new("REPO/INVALID_IDENTIFIER", "Invalid table or column name")
                .with_context("identifier", name.to_string()),
        )
    }
}

pub(crate) fn ensure_table(table: &str) -> AppResult<()> {
    ensure_identifier(table)?;
    let known =
        table == PROJECTS_TABLE || SHARED_TABLES.contains(&table) || phase_for(table).is_some();
    if known {
        Ok(())
    } else {
        Err(AppError::new("REPO/INVALID_TABLE", "Unknown table").with_context("table", table.to_string()))
    }
}

pub(crate) fn ensure_updatable(table: &str) -> AppResult<()> {
    ensure_table(table)?;
    if UPDATABLE_TABLES.contains(&table) {
        Ok(())
    } else {
        Err(
            AppError::new("REPO/TABLE_NOT_UPDATABLE", "Table is not updatable by maintenance")
                .with_context("table", table.to_string()),
        )
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub(crate) async fn select_ids_by(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    value: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let sql = format!("SELECT id FROM {table} WHERE {column} = ? ORDER BY id");
    sqlx::query_scalar::<_, String>(&sql)
        .bind(value)
        .fetch_all(pool)
        .await
}

pub(crate) async fn select_ids_in(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    parents: &[String],
    chunk_size: usize,
) -> Result<Vec<String>, sqlx::Error> {
    let mut out = Vec::new();
    for chunk in parents.chunks(chunk_size.max(1)) {
        let sql = format!(
            "SELECT id FROM {table} WHERE {column} IN ({}) ORDER BY id",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        out.extend(query.fetch_all(pool).await?);
    }
    Ok(out)
}

pub(crate) async fn delete_by(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    value: &str,
) -> Result<u64, sqlx::Error> {
    let sql = format!("DELETE FROM {table} WHERE {column} = ?");
    let res = sqlx::query(&sql).bind(value).execute(pool).await?;
    Ok(res.rows_affected())
}

pub(crate) async fn delete_in(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    parents: &[String],
    chunk_size: usize,
) -> Result<u64, sqlx::Error> {
    let mut deleted = 0;
    for chunk in parents.chunks(chunk_size.max(1)) {
        let sql = format!(
            "DELETE FROM {table} WHERE {column} IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        deleted += query.execute(pool).await?.rows_affected();
    }
    Ok(deleted)
}

pub(crate) async fn count_by(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    value: &str,
) -> Result<i64, sqlx::Error> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?");
    sqlx::query_scalar::<_, i64>(&sql)
        .bind(value)
        .fetch_one(pool)
        .await
}

pub(crate) async fn count_in(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    parents: &[String],
    chunk_size: usize,
) -> Result<i64, sqlx::Error> {
    let mut total = 0;
    for chunk in parents.chunks(chunk_size.max(1)) {
        let sql = format!(
            "SELECT COUNT(*) FROM {table} WHERE {column} IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        total += query.fetch_one(pool).await?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_reject_sql() {
        assert!(ensure_identifier("progress_percentage").is_ok());
        assert!(ensure_identifier("projects; DROP TABLE projects").is_err());
        assert!(ensure_identifier("Name").is_err());
        assert!(ensure_identifier("").is_err());
    }

    #[test]
    fn only_known_tables_pass() {
        assert!(ensure_table("projects").is_ok());
        assert!(ensure_table("delivery_items").is_ok());
        assert!(ensure_table("contractors").is_ok());
        let err = ensure_table("sqlite_master").unwrap_err();
        assert_eq!(err.code(), "REPO/INVALID_TABLE");
    }

    #[test]
    fn updatable_tables_are_a_subset() {
        assert!(ensure_updatable("financial_snapshots").is_ok());
        let err = ensure_updatable("photos").unwrap_err();
        assert_eq!(err.code(), "REPO/TABLE_NOT_UPDATABLE");
    }

    #[test]
    fn placeholder_lists() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
