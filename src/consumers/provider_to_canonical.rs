//! Provider→Canonical consumer (spec §4.8).
//!
//! Drains the sync queue, obtains a token and cursor from the account
//! holder, requests provider deltas, and hands them to the coordinator.
//! The actual provider HTTP client is an external collaborator (spec §1);
//! callers supply one via [`ProviderDeltaSource`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::account_holder::AccountHolder;
use crate::coordinator::{ApplyDeltaResult, Coordinator, ProviderDelta};
use crate::error::{Error, Result};
use crate::ids::AccountId;
use crate::queue::{DeadLetter, Queues, SyncFullReason, SyncMessage};

/// One page of provider deltas plus the opaque cursor to resume from.
/// `next_cursor: None` means the provider has no further pages right now.
pub struct ProviderDeltaPage {
    pub deltas: Vec<ProviderDelta>,
    pub next_cursor: Option<String>,
}

pub trait ProviderDeltaSource: Send + Sync {
    /// Fetches one page of deltas. Returns `Err(Error::CursorStale)` when the
    /// provider reports the cursor as expired (HTTP 410 Gone).
    fn fetch_deltas(&self, account_id: &AccountId, access_token: &str, cursor: Option<&str>) -> Result<ProviderDeltaPage>;
}

/// A source that always fails transiently; plugs the seam for deployments
/// that haven't wired up a real provider HTTP client yet.
pub struct UnconfiguredSource;

impl ProviderDeltaSource for UnconfiguredSource {
    fn fetch_deltas(&self, account_id: &AccountId, _access_token: &str, _cursor: Option<&str>) -> Result<ProviderDeltaPage> {
        Err(Error::ProviderTransient(format!("no provider delta source configured for {account_id}")))
    }
}

#[derive(Debug)]
pub enum DrainOutcome {
    Empty,
    Applied { account_id: AccountId, result: ApplyDeltaResult },
    FullRequested { account_id: AccountId },
    Deferred { account_id: AccountId, reason: String },
    DeadLettered { account_id: AccountId, reason: String },
}

pub struct SyncConsumer {
    coordinator: Arc<Coordinator>,
    holder: Arc<AccountHolder>,
    source: Arc<dyn ProviderDeltaSource>,
    queues: Queues,
    max_delivery_attempts: u32,
    attempts: Mutex<HashMap<AccountId, u32>>,
}

impl SyncConsumer {
    pub fn new(
        coordinator: Arc<Coordinator>,
        holder: Arc<AccountHolder>,
        source: Arc<dyn ProviderDeltaSource>,
        queues: Queues,
        max_delivery_attempts: u32,
    ) -> Self {
        Self {
            coordinator,
            holder,
            source,
            queues,
            max_delivery_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Pops and processes one sync-queue message; `DrainOutcome::Empty` means
    /// there was nothing to drain.
    pub fn drain_one(&self) -> DrainOutcome {
        let Some(message) = self.queues.sync.pop() else {
            return DrainOutcome::Empty;
        };
        match message {
            SyncMessage::Incremental { account_id, .. } => self.process(account_id, false),
            SyncMessage::Full { account_id, .. } => self.process(account_id, true),
        }
    }

    fn process(&self, account_id: AccountId, full: bool) -> DrainOutcome {
        let cursor = if full {
            None
        } else {
            self.holder.get_sync_cursor(&account_id).unwrap_or(None)
        };

        let access_token = match self.holder.get_access_token(&account_id) {
            Ok(t) => t,
            Err(e) => return self.handle_failure(account_id, e.to_string()),
        };

        let page = match self.source.fetch_deltas(&account_id, &access_token, cursor.as_deref()) {
            Ok(p) => p,
            Err(Error::CursorStale) => {
                self.queues.sync.push(SyncMessage::Full {
                    account_id: account_id.clone(),
                    reason: SyncFullReason::Token410,
                });
                self.reset_attempts(&account_id);
                return DrainOutcome::FullRequested { account_id };
            }
            Err(e) => return self.handle_failure(account_id, e.to_string()),
        };

        let result = match self.coordinator.apply_provider_delta(&account_id, page.deltas) {
            Ok(r) => r,
            Err(e) => return self.handle_failure(account_id, e.to_string()),
        };

        // The consumer's cursor only advances if at least one delta
        // succeeded or all errors were terminal (spec §4.3); every error
        // accumulated here is a per-delta validation failure, which is
        // terminal by construction, so advancing unconditionally on Ok is
        // correct.
        if let Some(next_cursor) = &page.next_cursor {
            let now = chrono::Utc::now().to_rfc3339();
            if let Err(e) = self.holder.set_sync_cursor(&account_id, next_cursor, &now) {
                warn!(account_id = %account_id, error = %e, "failed to persist sync cursor");
            }
        }
        self.reset_attempts(&account_id);
        info!(account_id = %account_id, created = result.created, updated = result.updated, deleted = result.deleted, "applied provider delta batch");
        DrainOutcome::Applied { account_id, result }
    }

    fn handle_failure(&self, account_id: AccountId, reason: String) -> DrainOutcome {
        let attempts = self.bump_attempts(&account_id);
        if attempts >= self.max_delivery_attempts {
            self.queues.dead_letter.push(DeadLetter {
                queue: "sync".to_string(),
                payload_json: serde_json::json!({ "account_id": account_id.as_str() }).to_string(),
                reason: reason.clone(),
                attempts,
            });
            self.reset_attempts(&account_id);
            warn!(account_id = %account_id, %reason, "sync consumer exhausted retries, dead-lettered");
            DrainOutcome::DeadLettered { account_id, reason }
        } else {
            warn!(account_id = %account_id, %reason, attempts, "sync consumer will retry");
            DrainOutcome::Deferred { account_id, reason }
        }
    }

    fn bump_attempts(&self, account_id: &AccountId) -> u32 {
        let mut attempts = self.attempts.lock();
        let entry = attempts.entry(account_id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn reset_attempts(&self, account_id: &AccountId) {
        self.attempts.lock().remove(account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_holder::NoRefresh;
    use crate::crypto::{MasterKey, TokenPair};
    use crate::queue::SyncFullReason;
    use crate::store::Store;

    struct StubSource {
        page: Mutex<Option<ProviderDeltaPage>>,
        stale: bool,
    }

    impl ProviderDeltaSource for StubSource {
        fn fetch_deltas(&self, _account_id: &AccountId, _access_token: &str, _cursor: Option<&str>) -> Result<ProviderDeltaPage> {
            if self.stale {
                return Err(Error::CursorStale);
            }
            self.page
                .lock()
                .take()
                .ok_or_else(|| Error::ProviderTransient("no more pages".into()))
        }
    }

    fn setup(page: Option<ProviderDeltaPage>, stale: bool) -> (SyncConsumer, AccountId) {
        let account_id = AccountId::from("acc_1");
        let holder = Arc::new(AccountHolder::new(Store::open_in_memory().unwrap(), MasterKey::generate(), Arc::new(NoRefresh)));
        holder
            .link_account(
                &account_id,
                TokenPair {
                    access_token: "at".into(),
                    refresh_token: "rt".into(),
                    expires_at: "2099-01-01T00:00:00Z".into(),
                },
            )
            .unwrap();
        let coordinator = Arc::new(Coordinator::new(Store::open_in_memory().unwrap(), Queues::default()));
        let queues = coordinator.queues.clone();
        let source = Arc::new(StubSource { page: Mutex::new(page), stale });
        (SyncConsumer::new(coordinator, holder, source, queues, 3), account_id)
    }

    #[test]
    fn empty_queue_is_a_noop() {
        let (consumer, _) = setup(None, false);
        assert!(matches!(consumer.drain_one(), DrainOutcome::Empty));
    }

    #[test]
    fn applies_deltas_and_advances_cursor() {
        let (consumer, account_id) = setup(
            Some(ProviderDeltaPage {
                deltas: vec![ProviderDelta::Deleted { origin_event_id: "unknown".into() }],
                next_cursor: Some("cursor-2".into()),
            }),
            false,
        );
        consumer.queues.sync.push(SyncMessage::Incremental {
            account_id: account_id.clone(),
            channel_id: "chan_1".into(),
            resource_id: "res_1".into(),
            ping_ts: "2026-02-15T00:00:00Z".into(),
        });
        match consumer.drain_one() {
            DrainOutcome::Applied { result, .. } => assert_eq!(result.deleted, 0),
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(consumer.holder.get_sync_cursor(&account_id).unwrap().as_deref(), Some("cursor-2"));
    }

    #[test]
    fn cursor_stale_requests_full_sync() {
        let (consumer, account_id) = setup(None, true);
        consumer.queues.sync.push(SyncMessage::Incremental {
            account_id: account_id.clone(),
            channel_id: "chan_1".into(),
            resource_id: "res_1".into(),
            ping_ts: "2026-02-15T00:00:00Z".into(),
        });
        assert!(matches!(consumer.drain_one(), DrainOutcome::FullRequested { .. }));
        let queued = consumer.queues.sync.pop().unwrap();
        assert!(matches!(queued, SyncMessage::Full { reason: SyncFullReason::Token410, .. }));
    }

    #[test]
    fn repeated_failures_reach_dead_letter() {
        let (consumer, account_id) = setup(None, false);
        for _ in 0..3 {
            consumer.queues.sync.push(SyncMessage::Incremental {
                account_id: account_id.clone(),
                channel_id: "chan_1".into(),
                resource_id: "res_1".into(),
                ping_ts: "2026-02-15T00:00:00Z".into(),
            });
        }
        assert!(matches!(consumer.drain_one(), DrainOutcome::Deferred { .. }));
        assert!(matches!(consumer.drain_one(), DrainOutcome::Deferred { .. }));
        assert!(matches!(consumer.drain_one(), DrainOutcome::DeadLettered { .. }));
        assert_eq!(consumer.queues.dead_letter.len(), 1);
    }
}
