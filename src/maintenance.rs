use sqlx::SqlitePool;

use crate::cascade::{self, CascadeDeleteOptions, DeletionError, DeletionReport};
use crate::reconcile::{
    self, BatchReport, DriftEntry, DriftReport, ProjectRecompute, SnapshotOutcome, SnapshotValues,
};
use crate::AppResult;

/// Entry point for the data-integrity operations. The HTTP handlers and the
/// CLI both go through here.
#[derive(Clone)]
pub struct Maintenance {
    pool: SqlitePool,
    cascade: CascadeDeleteOptions,
}

impl Maintenance {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cascade: CascadeDeleteOptions::default(),
        }
    }

    pub fn with_cascade_options(mut self, options: CascadeDeleteOptions) -> Self {
        self.cascade = options;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<DeletionReport, DeletionError> {
        cascade::delete_project(&self.pool, project_id, self.cascade.clone()).await
    }

    pub async fn recompute_all(&self) -> AppResult<BatchReport> {
        reconcile::recompute_all(&self.pool).await
    }

    pub async fn recompute_project(&self, project_id: &str) -> AppResult<ProjectRecompute> {
        reconcile::recompute_project(&self.pool, project_id).await
    }

    pub async fn find_drift(&self) -> AppResult<Vec<DriftEntry>> {
        reconcile::find_drift(&self.pool).await
    }

    pub async fn drift_report(&self) -> AppResult<DriftReport> {
        reconcile::drift_report(&self.pool, reconcile::DRIFT_REPORT_LIMIT).await
    }

    pub async fn reconcile_snapshot(
        &self,
        project_id: &str,
        values: &SnapshotValues,
    ) -> AppResult<SnapshotOutcome> {
        reconcile::reconcile_snapshot(&self.pool, project_id, values).await
    }
}
