#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    sitedesk_lib::migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

pub async fn exec(pool: &SqlitePool, sql: &str) {
    sqlx::query(sql)
        .execute(pool)
        .await
        .unwrap_or_else(|err| panic!("{sql}: {err}"));
}

pub async fn insert_project(pool: &SqlitePool, id: &str, progress: Option<i64>) {
    sqlx::query(
        "INSERT INTO projects (id, name, progress_percentage, created_at, updated_at) \
         VALUES (?1, ?2, ?3, 0, 0)",
    )
    .bind(id)
    .bind(format!("Project {id}"))
    .bind(progress)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_milestone(pool: &SqlitePool, id: &str, project_id: &str, status: &str) {
    sqlx::query(
        "INSERT INTO milestones (id, project_id, title, status, created_at, updated_at) \
         VALUES (?1, ?2, 'Milestone', ?3, 0, 0)",
    )
    .bind(id)
    .bind(project_id)
    .bind(status)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_payment(pool: &SqlitePool, id: &str, project_id: &str, cash: f64, used: f64) {
    sqlx::query(
        "INSERT INTO payments (id, project_id, cash_received, amount_used, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 0, 0)",
    )
    .bind(id)
    .bind(project_id)
    .bind(cash)
    .bind(used)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_snapshot(
    pool: &SqlitePool,
    id: &str,
    project_id: &str,
    date: &str,
    updated_at: i64,
    created_at: i64,
    cash: f64,
) {
    sqlx::query(
        "INSERT INTO financial_snapshots \
         (id, project_id, snapshot_date, cash_received, amount_used, amount_remaining, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 0, ?4, ?5, ?6)",
    )
    .bind(id)
    .bind(project_id)
    .bind(date)
    .bind(cash)
    .bind(created_at)
    .bind(updated_at)
    .execute(pool)
    .await
    .unwrap();
}

/// One row in every table a project owns, ids prefixed with `p`.
pub async fn seed_full_project(pool: &SqlitePool, p: &str) {
    insert_project(pool, p, Some(0)).await;
    exec(pool, "INSERT OR IGNORE INTO contractors (id, name, created_at, updated_at) VALUES ('acme', 'Acme', 0, 0)").await;

    let statements = [
        format!("INSERT INTO milestones (id, project_id, title, status, created_at, updated_at) VALUES ('{p}-ms', '{p}', 'Frame', 'completed', 0, 0)"),
        format!("INSERT INTO payments (id, project_id, cash_received, amount_used, created_at, updated_at) VALUES ('{p}-pay', '{p}', 100, 40, 0, 0)"),
        format!("INSERT INTO financial_snapshots (id, project_id, snapshot_date, created_at, updated_at) VALUES ('{p}-fs', '{p}', '2026-01-01', 0, 0)"),
        format!("INSERT INTO project_contractors (id, project_id, contractor_id, created_at, updated_at) VALUES ('{p}-pc', '{p}', 'acme', 0, 0)"),
        format!("INSERT INTO orders (id, project_id, created_at, updated_at) VALUES ('{p}-ord', '{p}', 0, 0)"),
        format!("INSERT INTO deliveries (id, order_id, created_at, updated_at) VALUES ('{p}-del', '{p}-ord', 0, 0)"),
        format!("INSERT INTO delivery_items (id, delivery_id, description, created_at, updated_at) VALUES ('{p}-di', '{p}-del', 'Rebar', 0, 0)"),
        format!("INSERT INTO documents (id, project_id, title, created_at, updated_at) VALUES ('{p}-doc', '{p}', 'Plans', 0, 0)"),
        format!("INSERT INTO document_versions (id, document_id, version, file_path, created_at, updated_at) VALUES ('{p}-dv', '{p}-doc', 1, 'plans.pdf', 0, 0)"),
        format!("INSERT INTO photo_albums (id, project_id, title, created_at, updated_at) VALUES ('{p}-alb', '{p}', 'Site', 0, 0)"),
        format!("INSERT INTO photos (id, project_id, album_id, file_path, created_at, updated_at) VALUES ('{p}-ph', '{p}', '{p}-alb', 'a.jpg', 0, 0)"),
        format!("INSERT INTO photo_comments (id, photo_id, body, created_at, updated_at) VALUES ('{p}-pcm', '{p}-ph', 'Nice', 0, 0)"),
        format!("INSERT INTO schedule_phases (id, project_id, name, created_at, updated_at) VALUES ('{p}-sp', '{p}', 'Foundations', 0, 0)"),
        format!("INSERT INTO schedule_tasks (id, phase_id, name, created_at, updated_at) VALUES ('{p}-st', '{p}-sp', 'Pour', 0, 0)"),
        format!("INSERT INTO work_sessions (id, task_id, started_at, created_at, updated_at) VALUES ('{p}-ws', '{p}-st', 0, 0, 0)"),
        format!("INSERT INTO safety_incidents (id, project_id, created_at, updated_at) VALUES ('{p}-si', '{p}', 0, 0)"),
        format!("INSERT INTO safety_attachments (id, incident_id, file_path, created_at, updated_at) VALUES ('{p}-sa', '{p}-si', 'report.pdf', 0, 0)"),
        format!("INSERT INTO quality_inspections (id, project_id, created_at, updated_at) VALUES ('{p}-qi', '{p}', 0, 0)"),
        format!("INSERT INTO inspection_results (id, inspection_id, criterion, created_at, updated_at) VALUES ('{p}-ir', '{p}-qi', 'Level', 0, 0)"),
        format!("INSERT INTO inspection_photos (id, inspection_id, file_path, created_at, updated_at) VALUES ('{p}-ip', '{p}-qi', 'b.jpg', 0, 0)"),
        format!("INSERT INTO communications (id, project_id, subject, created_at, updated_at) VALUES ('{p}-com', '{p}', 'RFI', 0, 0)"),
        format!("INSERT INTO approval_records (id, communication_id, approver, created_at, updated_at) VALUES ('{p}-ar', '{p}-com', 'Architect', 0, 0)"),
        format!("INSERT INTO change_orders (id, project_id, created_at, updated_at) VALUES ('{p}-co', '{p}', 0, 0)"),
        format!("INSERT INTO daily_reports (id, project_id, report_date, created_at, updated_at) VALUES ('{p}-dr', '{p}', '2026-01-02', 0, 0)"),
        format!("INSERT INTO punch_list_items (id, project_id, description, created_at, updated_at) VALUES ('{p}-pl', '{p}', 'Touch up', 0, 0)"),
        format!("INSERT INTO team_members (id, project_id, user_id, created_at, updated_at) VALUES ('{p}-tm', '{p}', 'u1', 0, 0)"),
        format!("INSERT INTO budget_items (id, project_id, category, created_at, updated_at) VALUES ('{p}-bi', '{p}', 'Labour', 0, 0)"),
        format!("INSERT INTO project_notifications (id, project_id, message, created_at, updated_at) VALUES ('{p}-pn', '{p}', 'Hello', 0, 0)"),
        format!("INSERT INTO activity_log (id, project_id, action, created_at, updated_at) VALUES ('{p}-al', '{p}', 'created', 0, 0)"),
    ];
    for sql in &statements {
        exec(pool, sql).await;
    }
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    sqlx::query_scalar(&sql).fetch_one(pool).await.unwrap()
}

/// Rows in `table` whose id starts with the project prefix.
pub async fn owned_rows(pool: &SqlitePool, table: &str, project_id: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE id LIKE ?1 || '-%'");
    sqlx::query_scalar(&sql)
        .bind(project_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn project_exists(pool: &SqlitePool, id: &str) -> bool {
    sqlx::query_scalar::<_, i64>("SELECT 1 FROM projects WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .unwrap()
        .is_some()
}
