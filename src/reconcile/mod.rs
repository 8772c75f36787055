//! Recount derived project metrics and bring the cached copies back in sync.
//!
//! `progress_percentage`, `total_milestones` and `completed_milestones` on a
//! project are caches of a milestone recount. Any write path may touch them,
//! so they are never trusted: [`recompute_all`] rewrites them from the
//! recount and [`find_drift`] reports where they disagree without writing.

use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};
use ts_rs::TS;

use crate::updater::{apply_update, FieldSet, UpdateStrategy, UpdateTarget};
use crate::{AppError, AppResult};

mod progress;
mod snapshot;

pub use progress::{compute_progress, drift_delta, CompletionBucket, CompletionBuckets};
pub use snapshot::{
    reconcile_snapshot, SnapshotAction, SnapshotOutcome, SnapshotValues, SNAPSHOT_TABLE,
};

/// Number of drifting projects returned by [`drift_report`].
pub const DRIFT_REPORT_LIMIT: usize = 20;

pub const PROJECT_NOT_FOUND: &str = "RECONCILE/PROJECT_NOT_FOUND";

const COMPLETED_STATUS: &str = "completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum RecomputeStatus {
    Updated,
    /// Written by a fallback strategy; some cached fields kept their old value.
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProjectRecompute {
    pub root_id: String,
    pub name: String,
    /// Cached progress as stored before the write.
    #[ts(type = "number | null")]
    pub old_value: Option<f64>,
    #[ts(type = "number | null")]
    pub new_value: Option<i64>,
    #[ts(type = "number")]
    pub total_milestones: i64,
    #[ts(type = "number")]
    pub completed_milestones: i64,
    pub status: RecomputeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<AppError>,
}

#[derive(Debug, Clone, Default, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BatchSummary {
    pub total_projects: u32,
    /// Updated plus degraded.
    pub succeeded: u32,
    pub degraded: u32,
    pub failed: u32,
    pub average_progress: f64,
    pub buckets: CompletionBuckets,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub results: Vec<ProjectRecompute>,
}

impl BatchReport {
    fn from_results(results: Vec<ProjectRecompute>) -> Self {
        let mut summary = BatchSummary {
            total_projects: results.len() as u32,
            ..BatchSummary::default()
        };
        let mut progress_sum = 0i64;
        for result in &results {
            match result.status {
                RecomputeStatus::Updated => summary.succeeded += 1,
                RecomputeStatus::Degraded => {
                    summary.succeeded += 1;
                    summary.degraded += 1;
                }
                RecomputeStatus::Failed => summary.failed += 1,
            }
            let value = result.new_value.unwrap_or(0);
            progress_sum += value;
            summary.buckets.record(value);
        }
        if !results.is_empty() {
            let average = progress_sum as f64 / results.len() as f64;
            summary.average_progress = (average * 10.0).round() / 10.0;
        }
        Self { summary, results }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DriftEntry {
    pub root_id: String,
    pub name: String,
    #[ts(type = "number | null")]
    pub current_value: Option<f64>,
    #[ts(type = "number")]
    pub computed_value: i64,
    #[ts(type = "number")]
    pub delta: i64,
}

#[derive(Debug, Clone, Default, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DriftSummary {
    pub total_projects: u32,
    pub drifting_projects: u32,
    #[ts(type = "number")]
    pub max_delta: i64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DriftReport {
    pub summary: DriftSummary,
    pub drifting_roots: Vec<DriftEntry>,
    pub has_more: bool,
}

// Other writers may leave a REAL or TEXT in the cached column, so it is read
// through a REAL cast and never decoded as an integer.
const CACHED_PROGRESS: &str = "CAST(progress_percentage AS REAL) AS progress_percentage";

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    progress_percentage: Option<f64>,
}

#[derive(Debug, sqlx::FromRow)]
struct ProgressRow {
    id: String,
    name: String,
    progress_percentage: Option<f64>,
    total: i64,
    completed: i64,
}

async fn count_milestones(pool: &SqlitePool, project_id: &str) -> AppResult<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = ? THEN 1 ELSE 0 END), 0) \
         FROM milestones WHERE project_id = ?",
    )
    .bind(COMPLETED_STATUS)
    .bind(project_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Widest first: every cached field at once, then one field at a time, then
/// the counters alone.
fn progress_strategies(progress: i64, total: i64, completed: i64) -> Vec<UpdateStrategy> {
    let mut full = FieldSet::new();
    full.insert("progress_percentage".into(), json!(progress));
    full.insert("total_milestones".into(), json!(total));
    full.insert("completed_milestones".into(), json!(completed));
    vec![
        UpdateStrategy::atomic("full", full.clone()),
        UpdateStrategy::per_field("per_field", full.clone()),
        UpdateStrategy::subset("totals_only", &full, &["total_milestones", "completed_milestones"]),
    ]
}

async fn recompute_row(pool: &SqlitePool, project: ProjectRow) -> ProjectRecompute {
    let mut result = ProjectRecompute {
        root_id: project.id,
        name: project.name,
        old_value: project.progress_percentage,
        new_value: project.progress_percentage.map(|value| value.round() as i64),
        total_milestones: 0,
        completed_milestones: 0,
        status: RecomputeStatus::Failed,
        strategy: None,
        error: None,
    };

    let (total, completed) = match count_milestones(pool, &result.root_id).await {
        Ok(counts) => counts,
        Err(err) => {
            warn!(
                target: "sitedesk",
                event = "recompute_count_failed",
                project_id = %result.root_id,
                error = %err
            );
            result.error = Some(err.with_context("operation", "count_milestones"));
            return result;
        }
    };
    result.total_milestones = total;
    result.completed_milestones = completed;

    let progress = compute_progress(completed, total);
    let outcome = apply_update(
        pool,
        UpdateTarget {
            table: "projects",
            id: &result.root_id,
        },
        &progress_strategies(progress, total, completed),
    )
    .await;

    result.strategy = outcome.strategy.clone();
    if outcome.is_success() {
        if outcome.wrote("progress_percentage") {
            result.new_value = Some(progress);
        }
        result.status = if outcome.is_degraded() {
            RecomputeStatus::Degraded
        } else {
            RecomputeStatus::Updated
        };
    } else {
        result.error = outcome.last_error;
    }
    result
}

/// Recompute one project's progress.
pub async fn recompute_project(pool: &SqlitePool, project_id: &str) -> AppResult<ProjectRecompute> {
    let project: Option<ProjectRow> = sqlx::query_as(&format!(
        "SELECT id, name, {CACHED_PROGRESS} FROM projects WHERE id = ?"
    ))
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    let project = project.ok_or_else(|| {
        AppError::new(PROJECT_NOT_FOUND, "Project not found")
            .with_context("project_id", project_id.to_string())
    })?;
    Ok(recompute_row(pool, project).await)
}

/// Recompute every project's progress, one project at a time.
///
/// A project that fails is reported and the batch carries on. Only a failure
/// to list projects fails the call.
pub async fn recompute_all(pool: &SqlitePool) -> AppResult<BatchReport> {
    let projects: Vec<ProjectRow> = sqlx::query_as(&format!(
        "SELECT id, name, {CACHED_PROGRESS} FROM projects ORDER BY created_at, id"
    ))
    .fetch_all(pool)
    .await?;

    let mut results = Vec::with_capacity(projects.len());
    for project in projects {
        results.push(recompute_row(pool, project).await);
    }

    let report = BatchReport::from_results(results);
    info!(
        target: "sitedesk",
        event = "recompute_complete",
        total = report.summary.total_projects,
        succeeded = report.summary.succeeded,
        degraded = report.summary.degraded,
        failed = report.summary.failed,
        average_progress = report.summary.average_progress
    );
    Ok(report)
}

async fn scan_progress(pool: &SqlitePool) -> AppResult<Vec<ProgressRow>> {
    let sql = format!(
        "SELECT p.id, p.name, {CACHED_PROGRESS}, \
                COUNT(m.id) AS total, \
                COALESCE(SUM(CASE WHEN m.status = ? THEN 1 ELSE 0 END), 0) AS completed \
         FROM projects p LEFT JOIN milestones m ON m.project_id = p.id \
         GROUP BY p.id \
         ORDER BY p.id"
    );
    let rows = sqlx::query_as::<_, ProgressRow>(&sql)
        .bind(COMPLETED_STATUS)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

fn drifting(rows: Vec<ProgressRow>) -> Vec<DriftEntry> {
    let mut entries: Vec<DriftEntry> = rows
        .into_iter()
        .filter_map(|row| {
            let computed = compute_progress(row.completed, row.total);
            let delta = drift_delta(row.progress_percentage, computed);
            (delta > 0).then(|| DriftEntry {
                root_id: row.id,
                name: row.name,
                current_value: row.progress_percentage,
                computed_value: computed,
                delta,
            })
        })
        .collect();
    entries.sort_by(|a, b| b.delta.cmp(&a.delta).then_with(|| a.root_id.cmp(&b.root_id)));
    entries
}

/// Projects whose cached progress differs from the recount, largest delta
/// first. Read only.
pub async fn find_drift(pool: &SqlitePool) -> AppResult<Vec<DriftEntry>> {
    Ok(drifting(scan_progress(pool).await?))
}

/// [`find_drift`] capped to `limit` entries, with totals over the whole store.
pub async fn drift_report(pool: &SqlitePool, limit: usize) -> AppResult<DriftReport> {
    let rows = scan_progress(pool).await?;
    let total_projects = rows.len() as u32;
    let mut entries = drifting(rows);
    let summary = DriftSummary {
        total_projects,
        drifting_projects: entries.len() as u32,
        max_delta: entries.first().map(|entry| entry.delta).unwrap_or(0),
    };
    let has_more = entries.len() > limit;
    entries.truncate(limit);
    Ok(DriftReport {
        summary,
        drifting_roots: entries,
        has_more,
    })
}
