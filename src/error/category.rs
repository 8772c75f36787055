use serde::{Deserialize, Serialize};
use sqlx::error::ErrorKind;
use sqlx::Error as SqlxError;
use ts_rs::TS;

const FOREIGN_KEY_MESSAGE: &str = "FOREIGN KEY constraint failed";
const CHECK_MESSAGE: &str = "CHECK constraint failed";

/// Coarse classification of a failed write, reported to the console so it can
/// pick a hint without parsing driver messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum FailureCategory {
    ForeignKeyViolation,
    CheckViolation,
    Other,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::ForeignKeyViolation => "foreign_key_violation",
            FailureCategory::CheckViolation => "check_violation",
            FailureCategory::Other => "other",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            FailureCategory::ForeignKeyViolation => {
                "Some records still reference this project. Retry the deletion; if it keeps failing, escalate with the project id."
            }
            FailureCategory::CheckViolation => {
                "A record failed a validation rule during deletion. Retry the deletion; if it keeps failing, escalate to an administrator."
            }
            FailureCategory::Other => {
                "Unexpected database error. Retry the deletion or escalate to an administrator."
            }
        }
    }
}

/// Classify by the driver's constraint kind first. Constraint failures raised
/// from triggers come back as `Other` with the message carrying the kind.
pub fn classify_sqlx_error(error: &SqlxError) -> FailureCategory {
    let SqlxError::Database(db) = error else {
        return FailureCategory::Other;
    };
    match db.kind() {
        ErrorKind::ForeignKeyViolation => FailureCategory::ForeignKeyViolation,
        ErrorKind::CheckViolation => FailureCategory::CheckViolation,
        _ => {
            let message = db.message();
            if message.starts_with(FOREIGN_KEY_MESSAGE) {
                FailureCategory::ForeignKeyViolation
            } else if message.starts_with(CHECK_MESSAGE) {
                FailureCategory::CheckViolation
            } else {
                FailureCategory::Other
            }
        }
    }
}
