#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::{json, Value};
use sitedesk_lib::updater::{FieldSet, StrategyMode};
use sitedesk_lib::{apply_update, UpdateStrategy, UpdateTarget};
use sqlx::SqlitePool;

mod util;
use util::*;

fn fields(value: Value) -> FieldSet {
    value.as_object().cloned().unwrap()
}

fn progress_fields() -> FieldSet {
    fields(json!({
        "progress_percentage": 67,
        "total_milestones": 3,
        "completed_milestones": 2
    }))
}

fn progress_strategies() -> Vec<UpdateStrategy> {
    let all = progress_fields();
    vec![
        UpdateStrategy::atomic("full", all.clone()),
        UpdateStrategy::per_field("per_field", all.clone()),
        UpdateStrategy::subset("totals_only", &all, &["total_milestones", "completed_milestones"]),
    ]
}

async fn project_metrics(pool: &SqlitePool, id: &str) -> (Option<i64>, i64, i64) {
    sqlx::query_as(
        "SELECT progress_percentage, total_milestones, completed_milestones FROM projects WHERE id = ?1",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .unwrap()
}

const P1: UpdateTarget<'static> = UpdateTarget {
    table: "projects",
    id: "p1",
};

#[tokio::test]
async fn first_strategy_wins_when_it_succeeds() {
    let pool = temp_pool().await;
    insert_project(&pool, "p1", Some(10)).await;

    let outcome = apply_update(&pool, P1, &progress_strategies()).await;

    assert_eq!(outcome.succeeded, Some(0));
    assert!(!outcome.is_degraded());
    assert_eq!(outcome.attempts.len(), 1);
    assert!(outcome.omitted_fields.is_empty());
    assert_eq!(project_metrics(&pool, "p1").await, (Some(67), 3, 2));

    let stamped: i64 = sqlx::query_scalar("SELECT updated_at FROM projects WHERE id = 'p1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(stamped > 0);
}

#[tokio::test]
async fn falls_back_to_per_field_writes() {
    let pool = temp_pool().await;
    insert_project(&pool, "p1", Some(10)).await;
    // rejects any single statement that moves progress and totals together
    exec(
        &pool,
        "CREATE TRIGGER projects_progress_recalc BEFORE UPDATE ON projects \
         WHEN NEW.progress_percentage IS NOT OLD.progress_percentage \
          AND NEW.total_milestones IS NOT OLD.total_milestones \
         BEGIN SELECT RAISE(ABORT, 'progress trigger failed'); END",
    )
    .await;

    let outcome = apply_update(&pool, P1, &progress_strategies()).await;

    assert_eq!(outcome.succeeded, Some(1));
    assert!(outcome.is_degraded());
    assert_eq!(outcome.strategy.as_deref(), Some("per_field"));
    assert_eq!(outcome.attempts.len(), 2);
    assert!(!outcome.attempts[0].succeeded);
    assert_eq!(outcome.attempts[1].mode, StrategyMode::PerField);
    assert!(outcome.omitted_fields.is_empty());
    assert_eq!(project_metrics(&pool, "p1").await, (Some(67), 3, 2));
}

#[tokio::test]
async fn narrowest_strategy_reports_omitted_fields() {
    let pool = temp_pool().await;
    insert_project(&pool, "p1", Some(10)).await;
    exec(
        &pool,
        "CREATE TRIGGER projects_progress_locked BEFORE UPDATE OF progress_percentage ON projects \
         WHEN NEW.progress_percentage IS NOT OLD.progress_percentage \
         BEGIN SELECT RAISE(ABORT, 'progress is locked'); END",
    )
    .await;

    let outcome = apply_update(&pool, P1, &progress_strategies()).await;

    assert_eq!(outcome.succeeded, Some(2));
    assert_eq!(outcome.omitted_fields, vec!["progress_percentage".to_string()]);
    assert!(outcome.wrote("total_milestones"));
    assert!(!outcome.wrote("progress_percentage"));
    // per-field writes from the failed strategy were rolled back with it
    assert_eq!(project_metrics(&pool, "p1").await, (Some(10), 3, 2));
}

#[tokio::test]
async fn failed_strategy_leaves_no_partial_write() {
    let pool = temp_pool().await;
    insert_project(&pool, "p1", None).await;
    insert_milestone(&pool, "m1", "p1", "pending").await;
    exec(
        &pool,
        "CREATE TRIGGER milestones_title_locked BEFORE UPDATE OF title ON milestones \
         BEGIN SELECT RAISE(ABORT, 'title is locked'); END",
    )
    .await;

    // status sorts before title, so it is written first and must be undone
    let strategy = UpdateStrategy::per_field(
        "per_field",
        fields(json!({"status": "completed", "title": "Renamed"})),
    );
    let outcome = apply_update(
        &pool,
        UpdateTarget {
            table: "milestones",
            id: "m1",
        },
        &[strategy],
    )
    .await;

    assert!(!outcome.is_success());
    let err = outcome.last_error.expect("last error is kept");
    assert!(err.message().contains("title is locked"), "{err}");
    let status: String = sqlx::query_scalar("SELECT status FROM milestones WHERE id = 'm1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "pending");
}

#[tokio::test]
async fn missing_target_fails_every_strategy() {
    let pool = temp_pool().await;

    let outcome = apply_update(&pool, P1, &progress_strategies()).await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.attempts.len(), 3);
    for attempt in &outcome.attempts {
        assert_eq!(attempt.error.as_ref().unwrap().code(), "UPDATE/TARGET_MISSING");
    }
}

#[tokio::test]
async fn refuses_tables_outside_maintenance() {
    let pool = temp_pool().await;

    let outcome = apply_update(
        &pool,
        UpdateTarget {
            table: "photos",
            id: "x",
        },
        &progress_strategies(),
    )
    .await;
    assert!(outcome.attempts.is_empty());
    assert_eq!(outcome.last_error.unwrap().code(), "REPO/TABLE_NOT_UPDATABLE");

    let outcome = apply_update(&pool, P1, &[]).await;
    assert_eq!(outcome.last_error.unwrap().code(), "UPDATE/NO_STRATEGY");
}
