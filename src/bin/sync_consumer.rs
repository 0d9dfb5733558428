//! Provider→Canonical worker (spec §4.8): drains the sync queue for one
//! user, polling on an empty queue rather than blocking.
//!
//! No real provider HTTP client ships with this crate (spec §1 scopes it
//! out as an external collaborator); operators wire one in by replacing
//! [`UnconfiguredSource`] with a concrete [`ProviderDeltaSource`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tminus_core::account_holder::{AccountHolder, NoRefresh};
use tminus_core::config::Config;
use tminus_core::consumers::provider_to_canonical::DrainOutcome;
use tminus_core::consumers::{ProviderDeltaSource, SyncConsumer, UnconfiguredSource};
use tminus_core::coordinator::Coordinator;
use tminus_core::crypto::MasterKey;
use tminus_core::queue::Queues;
use tminus_core::store::Store;

#[derive(Parser, Debug)]
#[command(name = "sync-consumer")]
struct Args {
    #[arg(long, env = "TMINUS_USER_ID")]
    user_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("sync_consumer=info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    std::fs::create_dir_all(&config.store_dir).context("creating store directory")?;
    let db_path = config.user_db_path(&args.user_id);
    let db_path_str = db_path.to_str().context("store path must be valid UTF-8")?;

    let coordinator = Arc::new(Coordinator::new(Store::open(db_path_str)?, Queues::default()));
    let master_key = MasterKey::from_env(&config.master_key_env).context("loading master key")?;
    let holder = Arc::new(AccountHolder::new(Store::open(db_path_str)?, master_key, Arc::new(NoRefresh)));
    let source: Arc<dyn ProviderDeltaSource> = Arc::new(UnconfiguredSource);

    let consumer = SyncConsumer::new(coordinator.clone(), holder, source, coordinator.queues.clone(), config.max_delivery_attempts);

    tracing::info!(user_id = %args.user_id, "sync consumer starting");
    loop {
        match consumer.drain_one() {
            DrainOutcome::Empty => tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await,
            outcome => tracing::debug!(?outcome, "drained sync message"),
        }
    }
}
