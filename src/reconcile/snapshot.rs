use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};
use ts_rs::TS;

use crate::id::new_uuid_v7;
use crate::time::{now_ms, today};
use crate::updater::{apply_update, FieldSet, UpdateOutcome, UpdateStrategy, UpdateTarget};
use crate::{AppError, AppResult};

use super::PROJECT_NOT_FOUND;

pub const SNAPSHOT_TABLE: &str = "financial_snapshots";

const SNAPSHOT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Newest capture first; later edits and later inserts win ties.
const LATEST_FIRST: &str = "snapshot_date DESC, updated_at DESC, created_at DESC, rowid DESC";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SnapshotValues {
    /// `YYYY-MM-DD`. Today when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub snapshot_date: Option<String>,
    pub cash_received: f64,
    pub amount_used: f64,
    /// Defaults to `cash_received - amount_used`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub amount_remaining: Option<f64>,
}

impl SnapshotValues {
    pub fn validate(&self) -> AppResult<()> {
        for (field, value) in [
            ("cashReceived", Some(self.cash_received)),
            ("amountUsed", Some(self.amount_used)),
            ("amountRemaining", self.amount_remaining),
        ] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(AppError::new(
                        "SNAPSHOT/INVALID_AMOUNT",
                        "Amounts must be non-negative numbers",
                    )
                    .with_context("field", field)
                    .with_context("value", value.to_string()));
                }
            }
        }
        if let Some(date) = &self.snapshot_date {
            NaiveDate::parse_from_str(date, SNAPSHOT_DATE_FORMAT).map_err(|_| {
                AppError::new("SNAPSHOT/INVALID_DATE", "Snapshot date must be YYYY-MM-DD")
                    .with_context("snapshotDate", date.clone())
            })?;
        }
        Ok(())
    }

    fn date(&self) -> String {
        self.snapshot_date
            .clone()
            .unwrap_or_else(|| today().format(SNAPSHOT_DATE_FORMAT).to_string())
    }

    fn remaining(&self) -> f64 {
        self.amount_remaining
            .unwrap_or(self.cash_received - self.amount_used)
    }

    fn fields(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert("snapshot_date".into(), json!(self.date()));
        fields.insert("cash_received".into(), json!(self.cash_received));
        fields.insert("amount_used".into(), json!(self.amount_used));
        fields.insert("amount_remaining".into(), json!(self.remaining()));
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SnapshotAction {
    Updated,
    Inserted,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SnapshotOutcome {
    pub project_id: String,
    pub snapshot_id: String,
    pub action: SnapshotAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub update: Option<UpdateOutcome>,
    pub duplicates_removed: u32,
    /// Duplicate rows that could not be removed. The write itself stands.
    pub cleanup_errors: Vec<AppError>,
}

fn snapshot_strategies(fields: &FieldSet) -> Vec<UpdateStrategy> {
    vec![
        UpdateStrategy::atomic("full", fields.clone()),
        UpdateStrategy::per_field("per_field", fields.clone()),
        UpdateStrategy::subset("minimal", fields, &["cash_received", "amount_used"]),
    ]
}

async fn latest_snapshot_id(pool: &SqlitePool, project_id: &str) -> AppResult<Option<String>> {
    let sql = format!(
        "SELECT id FROM {SNAPSHOT_TABLE} WHERE project_id = ? ORDER BY {LATEST_FIRST} LIMIT 1"
    );
    let id = sqlx::query_scalar::<_, String>(&sql)
        .bind(project_id)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

async fn insert_snapshot(
    pool: &SqlitePool,
    project_id: &str,
    values: &SnapshotValues,
) -> AppResult<String> {
    let id = new_uuid_v7();
    let now = now_ms();
    sqlx::query(
        "INSERT INTO financial_snapshots \
         (id, project_id, snapshot_date, cash_received, amount_used, amount_remaining, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(project_id)
    .bind(values.date())
    .bind(values.cash_received)
    .bind(values.amount_used)
    .bind(values.remaining())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Delete every other snapshot of the project, one row at a time so a single
/// failure does not keep the rest.
async fn remove_duplicates(
    pool: &SqlitePool,
    project_id: &str,
    keep: &str,
    outcome: &mut SnapshotOutcome,
) {
    let sql = format!("SELECT id FROM {SNAPSHOT_TABLE} WHERE project_id = ? AND id <> ? ORDER BY id");
    let duplicates = match sqlx::query_scalar::<_, String>(&sql)
        .bind(project_id)
        .bind(keep)
        .fetch_all(pool)
        .await
    {
        Ok(ids) => ids,
        Err(err) => {
            warn!(
                target: "sitedesk",
                event = "snapshot_cleanup_scan_failed",
                project_id = %project_id,
                error = %err
            );
            outcome
                .cleanup_errors
                .push(AppError::from(err).with_context("operation", "snapshot_cleanup_scan"));
            return;
        }
    };

    for duplicate in duplicates {
        let result = sqlx::query("DELETE FROM financial_snapshots WHERE id = ?")
            .bind(&duplicate)
            .execute(pool)
            .await;
        match result {
            Ok(res) => outcome.duplicates_removed += res.rows_affected() as u32,
            Err(err) => {
                warn!(
                    target: "sitedesk",
                    event = "snapshot_duplicate_delete_failed",
                    project_id = %project_id,
                    snapshot_id = %duplicate,
                    error = %err
                );
                outcome.cleanup_errors.push(
                    AppError::from(err)
                        .with_context("operation", "snapshot_cleanup")
                        .with_context("snapshot_id", duplicate),
                );
            }
        }
    }
}

/// Write `values` to the project's latest financial snapshot, then drop the
/// older duplicates.
///
/// The latest row is addressed by its own id so no other row can be touched
/// by the write. Without a snapshot a new one is inserted. If the write fails
/// nothing is cleaned up. Snapshots of unknown projects are refused.
pub async fn reconcile_snapshot(
    pool: &SqlitePool,
    project_id: &str,
    values: &SnapshotValues,
) -> AppResult<SnapshotOutcome> {
    values.validate()?;

    let exists = sqlx::query_scalar::<_, i64>("SELECT 1 FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(AppError::new(PROJECT_NOT_FOUND, "Project not found")
            .with_context("project_id", project_id.to_string()));
    }

    let (snapshot_id, action, update) = match latest_snapshot_id(pool, project_id).await? {
        Some(snapshot_id) => {
            let outcome = apply_update(
                pool,
                UpdateTarget {
                    table: SNAPSHOT_TABLE,
                    id: &snapshot_id,
                },
                &snapshot_strategies(&values.fields()),
            )
            .await;
            if !outcome.is_success() {
                let err = outcome.last_error.unwrap_or_else(|| {
                    AppError::new("SNAPSHOT/UPDATE_FAILED", "Snapshot update failed")
                });
                return Err(err
                    .with_context("project_id", project_id.to_string())
                    .with_context("snapshot_id", snapshot_id));
            }
            (snapshot_id, SnapshotAction::Updated, Some(outcome))
        }
        None => {
            let snapshot_id = insert_snapshot(pool, project_id, values)
                .await
                .map_err(|err| err.with_context("project_id", project_id.to_string()))?;
            (snapshot_id, SnapshotAction::Inserted, None)
        }
    };

    let mut outcome = SnapshotOutcome {
        project_id: project_id.to_string(),
        snapshot_id,
        action,
        update,
        duplicates_removed: 0,
        cleanup_errors: Vec::new(),
    };
    let keep = outcome.snapshot_id.clone();
    remove_duplicates(pool, project_id, &keep, &mut outcome).await;

    info!(
        target: "sitedesk",
        event = "snapshot_reconciled",
        project_id = %project_id,
        snapshot_id = %outcome.snapshot_id,
        action = ?outcome.action,
        duplicates_removed = outcome.duplicates_removed,
        cleanup_errors = outcome.cleanup_errors.len()
    );
    Ok(outcome)
}
