use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use super::report::{RepairFailure, RepairedPayment};
use crate::time::now_ms;
use crate::AppError;

#[derive(Debug, Default)]
pub(crate) struct PaymentRepair {
    pub repaired: Vec<RepairedPayment>,
    pub failures: Vec<RepairFailure>,
}

/// Bring every payment of the project back within `amount_used <= cash_received`.
///
/// The store refuses to delete a payment that violates the invariant. Repair
/// zeroes `amount_used` and raises `cash_received` to the amount that was
/// used. Best effort: failures are collected and the caller carries on.
pub(crate) async fn repair_payment_invariant(pool: &SqlitePool, project_id: &str) -> PaymentRepair {
    let mut outcome = PaymentRepair::default();

    let rows = match sqlx::query(
        "SELECT id, cash_received, amount_used FROM payments \
         WHERE project_id = ? AND amount_used > cash_received ORDER BY id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(err) => {
            warn!(
                target: "sitedesk",
                event = "payment_repair_scan_failed",
                project_id = %project_id,
                error = %err
            );
            outcome.failures.push(RepairFailure {
                payment_id: None,
                error: AppError::from(err).with_context("operation", "payment_repair_scan"),
            });
            return outcome;
        }
    };

    for row in rows {
        let (id, cash_received, amount_used) = match (
            row.try_get::<String, _>("id"),
            row.try_get::<f64, _>("cash_received"),
            row.try_get::<f64, _>("amount_used"),
        ) {
            (Ok(id), Ok(cash), Ok(used)) => (id, cash, used),
            (id, _, _) => {
                outcome.failures.push(RepairFailure {
                    payment_id: id.ok(),
                    error: AppError::new("REPAIR/DECODE", "Payment row could not be decoded"),
                });
                continue;
            }
        };

        let result = sqlx::query(
            "UPDATE payments SET cash_received = ?, amount_used = 0, updated_at = ? WHERE id = ?",
        )
        .bind(amount_used)
        .bind(now_ms())
        .bind(&id)
        .execute(pool)
        .await;

        match result {
            Ok(_) => {
                info!(
                    target: "sitedesk",
                    event = "payment_repaired",
                    project_id = %project_id,
                    payment_id = %id,
                    cash_received_before = cash_received,
                    amount_used_before = amount_used
                );
                outcome.repaired.push(RepairedPayment {
                    payment_id: id,
                    cash_received_before: cash_received,
                    amount_used_before: amount_used,
                });
            }
            Err(err) => {
                warn!(
                    target: "sitedesk",
                    event = "payment_repair_failed",
                    project_id = %project_id,
                    payment_id = %id,
                    error = %err
                );
                outcome.failures.push(RepairFailure {
                    error: AppError::from(err)
                        .with_context("operation", "payment_repair")
                        .with_context("payment_id", id.clone()),
                    payment_id: Some(id),
                });
            }
        }
    }

    outcome
}
