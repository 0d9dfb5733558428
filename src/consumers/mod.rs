//! The two asynchronous pipelines that keep provider accounts and the
//! canonical store converged (spec §4.8): provider deltas flow in through
//! [`provider_to_canonical`], projected mirrors flow out through
//! [`canonical_to_provider`]. Both are stateless workers that RPC into the
//! coordinator and the per-account holder; neither touches storage or
//! token material directly.

pub mod canonical_to_provider;
pub mod provider_to_canonical;

pub use canonical_to_provider::{AccountHolderRegistry, ProviderWriter, UnconfiguredWriter, WriteConsumer};
pub use provider_to_canonical::{ProviderDeltaPage, ProviderDeltaSource, SyncConsumer, UnconfiguredSource};
