use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use std::collections::HashMap;

use crate::time::now_ms;
use tracing::{error, info};

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.len() > 160 {
        let cut = trimmed
            .char_indices()
            .map(|(idx, _)| idx)
            .take_while(|idx| *idx <= 160)
            .last()
            .unwrap_or(0);
        format!("{}…", &trimmed[..cut])
    } else {
        trimmed.to_string()
    }
}

static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202601050900_projects.sql",
        include_str!("../migrations/202601050900_projects.sql"),
    ),
    (
        "202601050910_procurement.sql",
        include_str!("../migrations/202601050910_procurement.sql"),
    ),
    (
        "202601050920_documents_media.sql",
        include_str!("../migrations/202601050920_documents_media.sql"),
    ),
    (
        "202601050930_field_ops.sql",
        include_str!("../migrations/202601050930_field_ops.sql"),
    ),
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    pub version: String,
    pub applied_at: Option<i64>,
}

fn strip_comments(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum(cleaned: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned.as_bytes()))
}

/// Split a migration file into statements. Trigger bodies keep their inner
/// semicolons until the closing `END`.
pub(crate) fn split_statements(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for piece in sql.split(';') {
        if !current.is_empty() {
            current.push(';');
        }
        current.push_str(piece);
        let trimmed = current.trim();
        if trimmed.is_empty() {
            current.clear();
            continue;
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("CREATE TRIGGER") && !upper.ends_with("END") {
            continue;
        }
        out.push(trimmed.to_string());
        current.clear();
    }
    let rest = current.trim();
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

async fn ensure_ledger(pool: &SqlitePool) -> anyhow::Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version   TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum TEXT NOT NULL\
         )",
    )
    .await?;
    Ok(())
}

async fn applied_checksums(pool: &SqlitePool) -> anyhow::Result<HashMap<String, (String, i64)>> {
    let rows = sqlx::query("SELECT version, checksum, applied_at FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c), Ok(at)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
            r.try_get::<i64, _>("applied_at"),
        ) {
            applied.insert(v, (c, at));
        }
    }
    Ok(applied)
}

pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    ensure_ledger(pool).await?;
    let applied = applied_checksums(pool).await?;

    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = strip_comments(raw_sql);
        let checksum = checksum(&cleaned);

        if let Some((stored, _)) = applied.get(*filename) {
            if stored != &checksum {
                anyhow::bail!("migration {} edited after application", filename);
            }
            info!(target: "sitedesk", event = "migration_skip_file", file = %filename);
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in split_statements(&cleaned) {
            let upper = stmt.to_ascii_uppercase();
            if upper == "BEGIN" || upper == "COMMIT" {
                continue;
            }
            info!(target: "sitedesk", event = "migration_stmt", file = %filename, sql = %preview(&stmt));
            if let Err(e) = sqlx::query(&stmt).execute(&mut *tx).await {
                error!(target: "sitedesk", event = "migration_stmt_error", file = %filename, sql = %preview(&stmt), error = %e);
                return Err(e.into());
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)",
        )
        .bind(*filename)
        .bind(now_ms())
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(target: "sitedesk", event = "migration_file_applied", file = %filename);
    }

    Ok(())
}

/// Every embedded migration with its application time, pending ones last-known as `None`.
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<Vec<MigrationState>> {
    ensure_ledger(pool).await?;
    let applied = applied_checksums(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .map(|(filename, _)| MigrationState {
            version: filename.to_string(),
            applied_at: applied.get(*filename).map(|(_, at)| *at),
        })
        .collect())
}
