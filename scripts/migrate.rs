use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sitedesk_lib::config::{LogConfig, StoreConfig};
use sitedesk_lib::{db, logging, migrate};

#[derive(Parser)]
#[command(name = "migrate", about = "Sitedesk migration helper")]
struct Cli {
    #[command(flatten)]
    store: StoreConfig,

    #[command(flatten)]
    log: LogConfig,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List migrations and show applied/pending
    List,
    /// Show how many migrations are pending
    Status,
    /// Apply pending migrations
    Up,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&cli.log)?;

    let pool = db::open_sqlite_pool(&cli.store)
        .await
        .with_context(|| format!("open database {}", cli.store.database))?;

    match cli.cmd {
        Cmd::List => {
            for state in migrate::migration_status(&pool).await? {
                let mark = if state.applied_at.is_some() { "applied" } else { "pending" };
                println!("{:<40} {mark}", state.version);
            }
        }
        Cmd::Status => {
            let states = migrate::migration_status(&pool).await?;
            let pending = states.iter().filter(|s| s.applied_at.is_none()).count();
            match states.iter().filter(|s| s.applied_at.is_some()).last() {
                Some(latest) => println!("current: {}", latest.version),
                None => println!("current: none"),
            }
            println!("pending: {pending}");
        }
        Cmd::Up => {
            let started = std::time::Instant::now();
            migrate::apply_migrations(&pool).await?;
            println!("up to date in {} ms", started.elapsed().as_millis());
        }
    }

    pool.close().await;
    Ok(())
}
