use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::SqlitePool;

use sitedesk_lib::config::{LogConfig, ServeConfig, StoreConfig};
use sitedesk_lib::reconcile::{BatchReport, DriftEntry, ProjectRecompute, RecomputeStatus};
use sitedesk_lib::{
    api, db, logging, migrate, AppState, CascadeDeleteOptions, CascadeProgress,
    CascadeProgressObserver, DeletionReport, Maintenance,
};

/// Exit code when the project row itself could not be deleted.
const ROOT_DELETE_FAILED_EXIT_CODE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "sitedesk", about = "Sitedesk data-integrity maintenance", version)]
struct Cli {
    #[command(flatten)]
    store: StoreConfig,

    #[command(flatten)]
    log: LogConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the maintenance HTTP API.
    Serve(ServeConfig),
    /// Apply pending schema migrations and exit.
    Migrate,
    /// Project teardown.
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Derived metric maintenance.
    #[command(subcommand)]
    Metrics(MetricsCommand),
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    /// Delete a project and every record it owns.
    Delete {
        id: String,
        /// Emit the raw JSON deletion report.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum MetricsCommand {
    /// Recount milestone progress and rewrite the cached values.
    Recompute {
        /// Only this project.
        #[arg(long, value_name = "ID")]
        project: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List projects whose cached progress disagrees with the recount.
    Drift {
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let _log_guard = match logging::init(&cli.log) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let runtime = tokio::runtime::Runtime::new().context("start tokio runtime")?;
    runtime.block_on(async move {
        let pool = open_store(&cli.store).await?;
        let code = match cli.command {
            Commands::Serve(serve) => serve_api(pool.clone(), serve).await,
            Commands::Migrate => {
                for state in migrate::migration_status(&pool).await? {
                    println!("{}\tapplied", state.version);
                }
                Ok(0)
            }
            Commands::Project(ProjectCommand::Delete { id, json }) => {
                delete_project(pool.clone(), &id, json).await
            }
            Commands::Metrics(command) => handle_metrics(pool.clone(), command).await,
        };
        pool.close().await;
        code
    })
}

async fn open_store(store: &StoreConfig) -> Result<SqlitePool> {
    let pool = db::open_sqlite_pool(store)
        .await
        .with_context(|| format!("open database {}", store.database))?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply migrations")?;
    Ok(pool)
}

async fn serve_api(pool: SqlitePool, serve: ServeConfig) -> Result<i32> {
    let state = AppState::new(Maintenance::new(pool));
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(serve.bind)
        .await
        .with_context(|| format!("bind {}", serve.bind))?;
    tracing::info!(target: "sitedesk", event = "api_listening", addr = %serve.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve maintenance API")?;

    tracing::info!(target: "sitedesk", event = "api_stopped");
    Ok(0)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(target: "sitedesk", event = "signal_handler_failed", error = %err);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("serialize report")?;
    println!("{serialized}");
    Ok(())
}

async fn delete_project(pool: SqlitePool, id: &str, emit_json: bool) -> Result<i32> {
    let printer: CascadeProgressObserver = Arc::new(move |event: CascadeProgress| {
        if !emit_json && event.deleted > 0 {
            println!("{:<24} {:>8}", event.phase, event.deleted);
        }
    });
    let maintenance = Maintenance::new(pool).with_cascade_options(CascadeDeleteOptions {
        progress: Some(printer),
        ..CascadeDeleteOptions::default()
    });

    match maintenance.delete_project(id).await {
        Ok(report) => {
            if emit_json {
                print_json(&report)?;
            } else {
                print_deletion_summary(&report);
            }
            Ok(0)
        }
        Err(err) => {
            if emit_json {
                print_json(&err.report)?;
            } else {
                print_deletion_summary(&err.report);
            }
            eprintln!("Error: {err}");
            eprintln!("Hint: {}", err.hint());
            Ok(ROOT_DELETE_FAILED_EXIT_CODE)
        }
    }
}

fn print_deletion_summary(report: &DeletionReport) {
    println!();
    if !report.root_existed {
        println!("Project {} did not exist.", report.project_id);
    }
    println!(
        "Deleted {} row(s) in {} ms.",
        report.total_deleted, report.duration_ms
    );
    for repaired in &report.repaired_payments {
        println!(
            "Repaired payment {} (cash {} < used {})",
            repaired.payment_id, repaired.cash_received_before, repaired.amount_used_before
        );
    }
    for phase in report.failed_phases() {
        let reason = phase
            .error
            .as_ref()
            .map(|err| err.message().to_string())
            .unwrap_or_default();
        println!("FAILED  {:<24} {reason}", phase.table);
    }
    for warning in report.warnings() {
        println!("WARNING {warning}");
    }
}

async fn handle_metrics(pool: SqlitePool, command: MetricsCommand) -> Result<i32> {
    let maintenance = Maintenance::new(pool);
    match command {
        MetricsCommand::Recompute {
            project: Some(id),
            json,
        } => {
            let result = maintenance.recompute_project(&id).await?;
            if json {
                print_json(&result)?;
            } else {
                print_recompute_row(&result);
            }
            Ok(if result.status == RecomputeStatus::Failed { 1 } else { 0 })
        }
        MetricsCommand::Recompute {
            project: None,
            json,
        } => {
            let report = maintenance.recompute_all().await?;
            if json {
                print_json(&report)?;
            } else {
                print_batch(&report);
            }
            Ok(if report.summary.failed > 0 { 1 } else { 0 })
        }
        MetricsCommand::Drift { json } => {
            let entries = maintenance.find_drift().await?;
            if json {
                print_json(&entries)?;
            } else {
                print_drift(&entries);
            }
            Ok(0)
        }
    }
}

fn format_progress(value: Option<i64>) -> String {
    value.map(|v| format!("{v}%")).unwrap_or_else(|| "-".into())
}

fn format_cached(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 => format!("{v:.0}%"),
        Some(v) => format!("{v:.1}%"),
        None => "-".into(),
    }
}

fn print_recompute_row(result: &ProjectRecompute) {
    let status = match result.status {
        RecomputeStatus::Updated => "updated",
        RecomputeStatus::Degraded => "degraded",
        RecomputeStatus::Failed => "failed",
    };
    println!(
        "{:<38} {:>5} -> {:<5} {:<9} {}",
        result.root_id,
        format_cached(result.old_value),
        format_progress(result.new_value),
        status,
        result
            .error
            .as_ref()
            .map(|err| err.message().to_string())
            .unwrap_or_default()
    );
}

fn print_batch(report: &BatchReport) {
    for result in &report.results {
        print_recompute_row(result);
    }
    let summary = &report.summary;
    println!();
    println!(
        "{} project(s): {} succeeded ({} degraded), {} failed, average {:.1}%",
        summary.total_projects,
        summary.succeeded,
        summary.degraded,
        summary.failed,
        summary.average_progress
    );
    println!(
        "not started {}, in progress {}, completed {}",
        summary.buckets.not_started, summary.buckets.in_progress, summary.buckets.completed
    );
}

fn print_drift(entries: &[DriftEntry]) {
    if entries.is_empty() {
        println!("No drift.");
        return;
    }
    for entry in entries {
        println!(
            "{:<38} cached {:>5} computed {:>4}% delta {:>3}",
            entry.root_id,
            format_cached(entry.current_value),
            entry.computed_value,
            entry.delta
        );
    }
}
