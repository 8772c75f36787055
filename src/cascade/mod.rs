//! Dependency-ordered cascade deletion of a project and everything it owns.
//!
//! The store only enforces some of the ownership relations, so this module
//! emulates `ON DELETE CASCADE` from the static [`CASCADE_PHASES`] order. A
//! failure in one phase is recorded and the next phase still runs; only a
//! failure to delete the project row itself is returned as an error.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::repo::{self, PROJECTS_TABLE};
use crate::{classify_sqlx_error, AppError, FailureCategory};

mod phases;
mod repair;
mod report;

pub(crate) use phases::phase_for;
pub use phases::{cascade_phase_tables, CascadePhase, Ownership, CASCADE_PHASES};
pub use report::{
    DeletionError, DeletionReport, PhaseOutcome, PhaseStatus, RepairFailure, RepairedPayment,
    ResidualReference,
};

const DEFAULT_CHUNK_SIZE: u32 = 500;

pub const REPAIR_PHASE: &str = "repair";
pub const VERIFY_PHASE: &str = "verify";

#[derive(Debug, Clone, Serialize)]
pub struct CascadeProgress {
    pub phase: String,
    pub deleted: u64,
    pub total_deleted: u64,
}

pub type CascadeProgressObserver = Arc<dyn Fn(CascadeProgress) + Send + Sync + 'static>;

#[derive(Clone)]
pub struct CascadeDeleteOptions {
    /// Maximum ids bound into one `IN (...)` list.
    pub chunk_size: NonZeroU32,
    pub progress: Option<CascadeProgressObserver>,
}

impl Default for CascadeDeleteOptions {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroU32::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroU32::MIN),
            progress: None,
        }
    }
}

impl CascadeDeleteOptions {
    fn chunk(&self) -> usize {
        self.chunk_size.get() as usize
    }

    fn emit(&self, phase: &str, deleted: u64, total_deleted: u64) {
        if let Some(observer) = &self.progress {
            observer(CascadeProgress {
                phase: phase.to_string(),
                deleted,
                total_deleted,
            });
        }
    }
}

type ResolvedIds = HashMap<&'static str, Result<Vec<String>, AppError>>;

/// Resolve the id set of every intermediate table up front. Parents sit later
/// in the phase list, so walking it backwards sees each parent before the
/// tables reached through it.
async fn resolve_owned_ids(pool: &SqlitePool, project_id: &str, chunk: usize) -> ResolvedIds {
    let wanted = phases::parent_tables();
    let mut resolved: ResolvedIds = HashMap::new();

    for phase in CASCADE_PHASES.iter().rev() {
        if !wanted.contains(&phase.table) {
            continue;
        }
        let ids = match phase.owner {
            Ownership::Direct { column } => {
                repo::select_ids_by(pool, phase.table, column, project_id)
                    .await
                    .map_err(AppError::from)
            }
            Ownership::Via { column, parent } => match resolved.get(parent) {
                Some(Ok(parent_ids)) => {
                    repo::select_ids_in(pool, phase.table, column, parent_ids, chunk)
                        .await
                        .map_err(AppError::from)
                }
                Some(Err(err)) => Err(err.clone()),
                None => Err(AppError::new(
                    "CASCADE/PARENT_UNRESOLVED",
                    "Parent ids were not resolved",
                )
                .with_context("parent", parent)),
            },
        };
        if let Err(err) = &ids {
            warn!(
                target: "sitedesk",
                event = "cascade_resolve_failed",
                project_id = %project_id,
                table = phase.table,
                error = %err
            );
        }
        resolved.insert(phase.table, ids);
    }

    resolved
}

fn parent_ids<'a>(resolved: &'a ResolvedIds, parent: &str) -> Result<&'a [String], AppError> {
    match resolved.get(parent) {
        Some(Ok(ids)) => Ok(ids.as_slice()),
        Some(Err(err)) => Err(AppError::new(
            "CASCADE/PARENT_UNRESOLVED",
            "Owning rows could not be resolved",
        )
        .with_context("parent", parent.to_string())
        .with_cause(err.clone())),
        None => Err(AppError::new(
            "CASCADE/PARENT_UNRESOLVED",
            "Owning rows could not be resolved",
        )
        .with_context("parent", parent.to_string())),
    }
}

async fn delete_phase(
    pool: &SqlitePool,
    project_id: &str,
    phase: &CascadePhase,
    resolved: &ResolvedIds,
    chunk: usize,
) -> PhaseOutcome {
    let result = match phase.owner {
        Ownership::Direct { column } => repo::delete_by(pool, phase.table, column, project_id)
            .await
            .map_err(|err| (classify_sqlx_error(&err), AppError::from(err))),
        Ownership::Via { column, parent } => match parent_ids(resolved, parent) {
            Ok([]) => Ok(0),
            Ok(ids) => repo::delete_in(pool, phase.table, column, ids, chunk)
                .await
                .map_err(|err| (classify_sqlx_error(&err), AppError::from(err))),
            Err(err) => Err((FailureCategory::Other, err)),
        },
    };

    match result {
        Ok(deleted) => PhaseOutcome {
            table: phase.table.to_string(),
            status: PhaseStatus::Deleted,
            deleted,
            category: None,
            error: None,
        },
        Err((category, err)) => {
            let err = err
                .with_context("operation", "cascade_delete")
                .with_context("table", phase.table);
            warn!(
                target: "sitedesk",
                event = "cascade_phase_failed",
                project_id = %project_id,
                table = phase.table,
                category = category.as_str(),
                error = %err
            );
            PhaseOutcome {
                table: phase.table.to_string(),
                status: PhaseStatus::Failed,
                deleted: 0,
                category: Some(category),
                error: Some(err),
            }
        }
    }
}

/// Re-query every phase for rows still owned by the project.
async fn verify_phases(
    pool: &SqlitePool,
    project_id: &str,
    resolved: &ResolvedIds,
    chunk: usize,
) -> Vec<ResidualReference> {
    let mut residual = Vec::new();
    for phase in CASCADE_PHASES {
        let count = match phase.owner {
            Ownership::Direct { column } => repo::count_by(pool, phase.table, column, project_id)
                .await
                .map_err(AppError::from),
            Ownership::Via { column, parent } => match parent_ids(resolved, parent) {
                Ok([]) => Ok(0),
                Ok(ids) => repo::count_in(pool, phase.table, column, ids, chunk)
                    .await
                    .map_err(AppError::from),
                Err(err) => Err(err),
            },
        };
        match count {
            Ok(0) => {}
            Ok(remaining) => {
                warn!(
                    target: "sitedesk",
                    event = "cascade_residual_reference",
                    project_id = %project_id,
                    table = phase.table,
                    remaining
                );
                residual.push(ResidualReference {
                    table: phase.table.to_string(),
                    remaining: Some(remaining),
                    message: format!(
                        "{remaining} row(s) in {} still reference project {project_id}",
                        phase.table
                    ),
                });
            }
            Err(err) => {
                warn!(
                    target: "sitedesk",
                    event = "cascade_verify_failed",
                    project_id = %project_id,
                    table = phase.table,
                    error = %err
                );
                residual.push(ResidualReference {
                    table: phase.table.to_string(),
                    remaining: None,
                    message: format!("could not verify {}: {}", phase.table, err.message()),
                });
            }
        }
    }
    residual
}

/// Delete `project_id` and every record it owns.
///
/// Payments violating `amount_used <= cash_received` are repaired first so
/// the store's delete guard does not reject them. Per-table failures land in
/// the report. The call fails only when the project row cannot be deleted;
/// the error then carries the partial report.
pub async fn delete_project(
    pool: &SqlitePool,
    project_id: &str,
    options: CascadeDeleteOptions,
) -> Result<DeletionReport, DeletionError> {
    let start = Instant::now();
    let chunk = options.chunk();
    let mut report = DeletionReport::new(project_id);
    info!(target: "sitedesk", event = "cascade_start", project_id = %project_id);

    report.root_existed = match sqlx::query_scalar::<_, i64>("SELECT 1 FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await
    {
        Ok(row) => row.is_some(),
        Err(err) => {
            warn!(
                target: "sitedesk",
                event = "cascade_root_lookup_failed",
                project_id = %project_id,
                error = %err
            );
            true
        }
    };

    let resolved = resolve_owned_ids(pool, project_id, chunk).await;

    let repair = repair::repair_payment_invariant(pool, project_id).await;
    report.repaired_payments = repair.repaired;
    report.repair_failures = repair.failures;
    options.emit(REPAIR_PHASE, 0, 0);

    for phase in CASCADE_PHASES {
        let outcome = delete_phase(pool, project_id, phase, &resolved, chunk).await;
        report.total_deleted += outcome.deleted;
        options.emit(phase.table, outcome.deleted, report.total_deleted);
        report.phases.push(outcome);
    }

    report.residual_references = verify_phases(pool, project_id, &resolved, chunk).await;
    options.emit(VERIFY_PHASE, 0, report.total_deleted);

    let root = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(project_id)
        .execute(pool)
        .await;
    report.duration_ms = start.elapsed().as_millis() as u64;

    match root {
        Ok(res) => {
            report.root_deleted = res.rows_affected() > 0;
            report.total_deleted += res.rows_affected();
            options.emit(PROJECTS_TABLE, res.rows_affected(), report.total_deleted);
            if !report.root_existed {
                warn!(target: "sitedesk", event = "cascade_root_missing", project_id = %project_id);
            }
            info!(
                target: "sitedesk",
                event = "cascade_complete",
                project_id = %project_id,
                total_deleted = report.total_deleted,
                failed_phases = report.failed_phases().count(),
                residual = report.residual_references.len(),
                duration_ms = report.duration_ms
            );
            Ok(report)
        }
        Err(err) => {
            let category = classify_sqlx_error(&err);
            let error = AppError::from(err)
                .with_context("operation", "delete_project")
                .with_context("project_id", project_id.to_string());
            tracing::error!(
                target: "sitedesk",
                event = "cascade_root_failed",
                project_id = %project_id,
                category = category.as_str(),
                error = %error
            );
            Err(DeletionError {
                category,
                error,
                report: Box::new(report),
            })
        }
    }
}
