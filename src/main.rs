use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use verbena_action::{ActionRegistry, RunContext};
use verbena_store::SqliteStore;
use verbena_watcher::{FlowWatchAction, WatcherConfig};

/// Verbena - flow orchestration with resource locking for cloud resources
#[derive(Parser)]
#[command(name = "verbena")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the SQLite database file
  #[arg(long, global = true, default_value = "verbena.db")]
  db: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Create or upgrade the database schema
  Migrate,

  /// Watch a flow until terminal and reconcile its resource lock
  Watch {
    /// The flow to watch
    #[arg(long)]
    flow_id: String,

    /// The resource the flow targets
    #[arg(long)]
    res_id: String,

    /// The resource's type (e.g. load_balancer, disk)
    #[arg(long)]
    res_type: String,

    /// Kind of operation the flow performs
    #[arg(long)]
    task_type: String,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let cli = Cli::parse();

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run(cli).await })
}

async fn run(cli: Cli) -> Result<()> {
  let options = SqliteConnectOptions::new()
    .filename(&cli.db)
    .create_if_missing(true);
  let pool = SqlitePoolOptions::new()
    .connect_with(options)
    .await
    .with_context(|| format!("failed to open database: {}", cli.db.display()))?;

  let store = Arc::new(SqliteStore::new(pool));
  store.migrate().await.context("failed to migrate database")?;

  match cli.command {
    Commands::Migrate => {
      eprintln!("database ready: {}", cli.db.display());
      Ok(())
    }
    Commands::Watch {
      flow_id,
      res_id,
      res_type,
      task_type,
    } => {
      let mut registry = ActionRegistry::new();
      registry
        .register(FlowWatchAction::new(store, WatcherConfig::default()))
        .context("failed to register flow_watch")?;

      // Dispatch through the registry with a raw JSON payload, the same
      // way a hosting framework would.
      let action = registry.get("flow_watch").with_context(|| {
        format!("flow_watch is not registered (have: {})", registry.names().join(", "))
      })?;
      let params = serde_json::json!({
        "flow_id": flow_id,
        "res_id": res_id,
        "res_type": res_type,
        "task_type": task_type,
      });

      let ctx = RunContext::new();
      action
        .run(&ctx, &params)
        .await
        .with_context(|| format!("watch failed for flow {flow_id}"))?;

      eprintln!("flow {flow_id} reconciled");
      Ok(())
    }
  }
}
