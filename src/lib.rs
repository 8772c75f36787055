pub mod api;
pub mod cascade;
pub mod config;
pub mod db;
mod error;
pub mod id;
pub mod logging;
pub mod maintenance;
pub mod migrate;
pub mod reconcile;
mod repo;
pub mod state;
pub mod time;
pub mod updater;

pub use cascade::{
    cascade_phase_tables, delete_project, CascadeDeleteOptions, CascadeProgress,
    CascadeProgressObserver, DeletionError, DeletionReport,
};
pub use error::{classify_sqlx_error, AppError, AppResult, FailureCategory};
pub use maintenance::Maintenance;
pub use reconcile::{
    drift_report, find_drift, reconcile_snapshot, recompute_all, recompute_project, BatchReport,
    DriftEntry, DriftReport, SnapshotOutcome, SnapshotValues,
};
pub use state::AppState;
pub use updater::{apply_update, UpdateOutcome, UpdateStrategy, UpdateTarget};
