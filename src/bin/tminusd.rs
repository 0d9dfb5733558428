//! Coordinator daemon: serves the RPC surface (spec §6.3) for one user.
//!
//! The two async pipelines and the reconciliation sweep run as separate
//! binaries (`sync-consumer`, `write-consumer`, `reconcile-driver`) against
//! the same per-user database, matching the single-writer actor model.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tminus_core::config::Config;
use tminus_core::coordinator::Coordinator;
use tminus_core::queue::Queues;
use tminus_core::rpc;
use tminus_core::store::Store;

#[derive(Parser, Debug)]
#[command(name = "tminusd")]
#[command(about = "Serves the coordinator RPC surface for one user")]
struct Args {
    /// User whose database this process serves.
    #[arg(long, env = "TMINUS_USER_ID")]
    user_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("tminusd=info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    std::fs::create_dir_all(&config.store_dir).context("creating store directory")?;

    let db_path = config.user_db_path(&args.user_id);
    let store = Store::open(db_path.to_str().context("store path must be valid UTF-8")?).context("opening per-user store")?;
    let coordinator = Arc::new(Coordinator::new(store, Queues::default()));

    tracing::info!(user_id = %args.user_id, db = %db_path.display(), "coordinator starting");
    rpc::serve(coordinator, &config).await
}
