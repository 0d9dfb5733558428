//! Reconciliation driver (spec §4.9): runs once a day per active account,
//! pulling each account's full event list and cross-checking mirrors.
//!
//! No real provider HTTP client ships with this crate (spec §1 scopes it
//! out as an external collaborator); operators wire one in by replacing
//! [`UnconfiguredSource`] and [`UnconfiguredChecker`] with concrete
//! implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tminus_core::account_holder::{AccountHolder, NoRefresh};
use tminus_core::config::Config;
use tminus_core::consumers::provider_to_canonical::ProviderDeltaSource;
use tminus_core::consumers::UnconfiguredSource;
use tminus_core::coordinator::Coordinator;
use tminus_core::crypto::MasterKey;
use tminus_core::queue::Queues;
use tminus_core::reconcile::{ProviderMirrorChecker, ReconcileDriver, UnconfiguredChecker};
use tminus_core::store::Store;

const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Parser, Debug)]
#[command(name = "reconcile-driver")]
struct Args {
    #[arg(long, env = "TMINUS_USER_ID")]
    user_id: String,

    /// Run one pass and exit instead of looping forever.
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("reconcile_driver=info".parse().unwrap()))
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
    let checker: Arc<dyn ProviderMirrorChecker> = Arc::new(UnconfiguredChecker);
    let driver = ReconcileDriver::new(coordinator.clone(), holder, source, checker);

    loop {
        for account_id in coordinator.store.list_account_ids()? {
            let Some(row) = coordinator.store.get_account(&account_id)? else {
                continue;
            };
            if !row.active {
                continue;
            }
            match driver.reconcile_account(&account_id) {
                Ok(report) => tracing::info!(account_id = %account_id, ?report, "reconciliation pass complete"),
                Err(e) => tracing::warn!(account_id = %account_id, error = %e, "reconciliation pass failed"),
            }
        }
        if args.once {
            break;
        }
        tokio::time::sleep(ONE_DAY).await;
    }
    Ok(())
}
