use serde::Serialize;
use ts_rs::TS;

use crate::{AppError, FailureCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PhaseStatus {
    Deleted,
    Failed,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PhaseOutcome {
    pub table: String,
    pub status: PhaseStatus,
    #[ts(type = "number")]
    pub deleted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub category: Option<FailureCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<AppError>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RepairedPayment {
    pub payment_id: String,
    pub cash_received_before: f64,
    pub amount_used_before: f64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RepairFailure {
    /// `None` when the scan itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub payment_id: Option<String>,
    pub error: AppError,
}

/// A dependent row that outlived the cascade. Diagnostic only.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ResidualReference {
    pub table: String,
    /// `None` when the verification query could not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub remaining: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DeletionReport {
    pub project_id: String,
    pub root_existed: bool,
    pub root_deleted: bool,
    pub phases: Vec<PhaseOutcome>,
    pub repaired_payments: Vec<RepairedPayment>,
    pub repair_failures: Vec<RepairFailure>,
    pub residual_references: Vec<ResidualReference>,
    #[ts(type = "number")]
    pub total_deleted: u64,
    #[ts(type = "number")]
    pub duration_ms: u64,
}

impl DeletionReport {
    pub(crate) fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            root_existed: false,
            root_deleted: false,
            phases: Vec::new(),
            repaired_payments: Vec::new(),
            repair_failures: Vec::new(),
            residual_references: Vec::new(),
            total_deleted: 0,
            duration_ms: 0,
        }
    }

    pub fn failed_phases(&self) -> impl Iterator<Item = &PhaseOutcome> {
        self.phases
            .iter()
            .filter(|phase| phase.status == PhaseStatus::Failed)
    }

    pub fn is_clean(&self) -> bool {
        self.residual_references.is_empty() && self.failed_phases().next().is_none()
    }

    /// Human readable residual-reference warnings for the console.
    pub fn warnings(&self) -> Vec<String> {
        self.residual_references
            .iter()
            .map(|residual| residual.message.clone())
            .collect()
    }
}

/// The project row itself could not be removed. The dependents that were
/// deleted stay deleted.
#[derive(Debug, thiserror::Error)]
#[error("failed to delete project {}: {error}", .report.project_id)]
pub struct DeletionError {
    pub category: FailureCategory,
    pub error: AppError,
    pub report: Box<DeletionReport>,
}

impl DeletionError {
    pub fn hint(&self) -> &'static str {
        self.category.hint()
    }
}
