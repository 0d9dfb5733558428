//! Reconciliation driver (spec §4.9).
//!
//! Runs once a day per active account: pulls the account's full event list
//! through the same path as an incremental sync, then cross-checks mirror
//! rows the account holds as a write target against what the provider
//! actually has. Drift is repaired and journaled as `reconcile:<subtype>`.
//! Token material never passes through here directly; access is always
//! through the account holder.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::account_holder::AccountHolder;
use crate::consumers::provider_to_canonical::ProviderDeltaSource;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::ids::{AccountId, CanonicalEventId};
use crate::model::MirrorState;
use crate::queue::{idempotency_key, WriteMessage};

/// Lists every provider-side event in a target calendar tagged as a
/// managed mirror, paired with the canonical event id it carries (spec
/// §6.1 tagging). One fetch per calendar is enough to detect both
/// orphaned provider mirrors and stale local mirror rows.
pub trait ProviderMirrorChecker: Send + Sync {
    fn list_managed_events(&self, access_token: &str, target_calendar_id: &str) -> Result<Vec<(String, CanonicalEventId)>>;
}

/// A checker that always fails transiently; plugs the seam for deployments
/// that haven't wired up a real provider HTTP client yet.
pub struct UnconfiguredChecker;

impl ProviderMirrorChecker for UnconfiguredChecker {
    fn list_managed_events(&self, _access_token: &str, target_calendar_id: &str) -> Result<Vec<(String, CanonicalEventId)>> {
        Err(crate::error::Error::ProviderTransient(format!("no mirror checker configured for calendar {target_calendar_id}")))
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    pub account_id: String,
    pub pages_pulled: u32,
    pub missing_canonical: u64,
    pub updated_canonical: u64,
    pub orphaned_mirrors: u32,
    pub stale_local_mirrors: u32,
    pub hash_mismatches_requeued: u64,
}

pub struct ReconcileDriver {
    coordinator: Arc<Coordinator>,
    holder: Arc<AccountHolder>,
    source: Arc<dyn ProviderDeltaSource>,
    checker: Arc<dyn ProviderMirrorChecker>,
}

impl ReconcileDriver {
    pub fn new(coordinator: Arc<Coordinator>, holder: Arc<AccountHolder>, source: Arc<dyn ProviderDeltaSource>, checker: Arc<dyn ProviderMirrorChecker>) -> Self {
        Self { coordinator, holder, source, checker }
    }

    /// Full reconciliation pass for one account: origin events first
    /// (step 1-2), then mirrors this account holds as a write target
    /// (steps 3-4), then hash-mismatch repair (step 5).
    pub fn reconcile_account(&self, account_id: &AccountId) -> Result<ReconcileReport> {
        let mut report = ReconcileReport { account_id: account_id.to_string(), ..Default::default() };
        let access_token = self.holder.get_access_token(account_id)?;

        self.pull_full_origin(account_id, &access_token, &mut report)?;
        self.check_target_mirrors(account_id, &access_token, &mut report)?;
        report.hash_mismatches_requeued = self.coordinator.recompute_projections(None, false)?;

        let now = chrono::Utc::now().to_rfc3339();
        if let Some(cursor) = self.holder.get_sync_cursor(account_id)? {
            self.holder.set_sync_cursor(account_id, &cursor, &now)?;
        }

        info!(account_id = %account_id, ?report, "reconciliation pass complete");
        Ok(report)
    }

    fn pull_full_origin(&self, account_id: &AccountId, access_token: &str, report: &mut ReconcileReport) -> Result<()> {
        let mut cursor: Option<String> = None;
        loop {
            let page = self.source.fetch_deltas(account_id, access_token, cursor.as_deref())?;
            let page_is_empty = page.deltas.is_empty();
            let result = self.coordinator.apply_provider_delta(account_id, page.deltas)?;
            report.missing_canonical += result.created;
            report.updated_canonical += result.updated;
            report.pages_pulled += 1;
            for err in &result.errors {
                warn!(account_id = %account_id, origin_event_id = %err.origin_event_id, reason = %err.reason, "reconcile pull dropped one event");
            }
            cursor = page.next_cursor;
            if cursor.is_none() || page_is_empty {
                break;
            }
        }
        Ok(())
    }

    fn check_target_mirrors(&self, account_id: &AccountId, access_token: &str, report: &mut ReconcileReport) -> Result<()> {
        let mirrors = self.coordinator.store.list_mirrors_for_account(account_id)?;
        let mut calendar_ids: Vec<String> = mirrors.iter().map(|m| m.target_calendar_id.as_str().to_string()).collect();
        calendar_ids.sort();
        calendar_ids.dedup();

        let local_provider_ids: HashSet<&str> = mirrors.iter().filter_map(|m| m.provider_event_id.as_deref()).collect();

        for calendar_id in &calendar_ids {
            let remote = self.checker.list_managed_events(access_token, calendar_id)?;
            let remote_ids: HashSet<&str> = remote.iter().map(|(id, _)| id.as_str()).collect();

            for mirror in mirrors.iter().filter(|m| m.target_calendar_id.as_str() == calendar_id && m.state == MirrorState::Active) {
                let Some(provider_event_id) = &mirror.provider_event_id else {
                    continue;
                };
                if !remote_ids.contains(provider_event_id.as_str()) {
                    let mut tombstoned = mirror.clone();
                    tombstoned.state = MirrorState::Tombstoned;
                    self.coordinator.store.upsert_mirror(&tombstoned)?;
                    self.coordinator
                        .log_reconcile_discrepancy(Some(&mirror.canonical_event_id), "stale_local_mirror", "{}", "provider no longer has this event")?;
                    report.stale_local_mirrors += 1;
                }
            }

            for (provider_event_id, canonical_event_id) in &remote {
                if local_provider_ids.contains(provider_event_id.as_str()) {
                    continue;
                }
                let key = idempotency_key(canonical_event_id, account_id, "orphan");
                self.coordinator.queues.write.push(WriteMessage::DeleteMirror {
                    canonical_event_id: canonical_event_id.clone(),
                    target_account_id: account_id.clone(),
                    provider_event_id: provider_event_id.clone(),
                    idempotency_key: key,
                });
                self.coordinator
                    .log_reconcile_discrepancy(Some(canonical_event_id), "orphaned_mirror", "{}", "no local mirror row for this provider event")?;
                report.orphaned_mirrors += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_holder::NoRefresh;
    use crate::consumers::provider_to_canonical::ProviderDeltaPage;
    use crate::coordinator::ProviderDelta;
    use crate::crypto::{MasterKey, TokenPair};
    use crate::ids::CalendarId;
    use crate::model::Mirror;
    use crate::queue::Queues;
    use crate::store::Store;

    struct StubSource {
        pages: parking_lot::Mutex<Vec<ProviderDeltaPage>>,
    }
    impl ProviderDeltaSource for StubSource {
        fn fetch_deltas(&self, _account_id: &AccountId, _access_token: &str, _cursor: Option<&str>) -> Result<ProviderDeltaPage> {
            let mut pages = self.pages.lock();
            if pages.is_empty() {
                Ok(ProviderDeltaPage { deltas: vec![], next_cursor: None })
            } else {
                Ok(pages.remove(0))
            }
        }
    }

    struct StubChecker {
        remote: Vec<(String, CanonicalEventId)>,
    }
    impl ProviderMirrorChecker for StubChecker {
        fn list_managed_events(&self, _access_token: &str, _target_calendar_id: &str) -> Result<Vec<(String, CanonicalEventId)>> {
            Ok(self.remote.clone())
        }
    }

    fn setup(pages: Vec<ProviderDeltaPage>, remote: Vec<(String, CanonicalEventId)>) -> (ReconcileDriver, Arc<Coordinator>, AccountId) {
        let account_id = AccountId::from("acc_1");
        let coordinator = Arc::new(Coordinator::new(Store::open_in_memory().unwrap(), Queues::default()));
        let holder = Arc::new(AccountHolder::new(Store::open_in_memory().unwrap(), MasterKey::generate(), Arc::new(NoRefresh)));
        holder
            .link_account(&account_id, TokenPair { access_token: "at".into(), refresh_token: "rt".into(), expires_at: "2099-01-01T00:00:00Z".into() })
            .unwrap();
        let source = Arc::new(StubSource { pages: parking_lot::Mutex::new(pages) });
        let checker = Arc::new(StubChecker { remote });
        (ReconcileDriver::new(coordinator.clone(), holder, source, checker), coordinator, account_id)
    }

    #[test]
    fn pulls_full_origin_and_counts_created_events() {
        let (driver, _coordinator, account_id) = setup(
            vec![ProviderDeltaPage {
                deltas: vec![ProviderDelta::Created { origin_event_id: "prov_1".into(), event: None }],
                next_cursor: None,
            }],
            vec![],
        );
        let report = driver.reconcile_account(&account_id).unwrap();
        assert_eq!(report.pages_pulled, 1);
    }

    #[test]
    fn stale_local_mirror_is_tombstoned_not_deleted() {
        let (driver, coordinator, account_id) = setup(vec![], vec![]);
        let canonical_event_id = CanonicalEventId::new();
        coordinator
            .store
            .upsert_mirror(&Mirror {
                canonical_event_id: canonical_event_id.clone(),
                target_account_id: account_id.clone(),
                target_calendar_id: CalendarId::from("alc_target".to_string()),
                provider_event_id: Some("gone_1".into()),
                last_projected_hash: "hash-1".into(),
                last_write_ts: None,
                state: MirrorState::Active,
                error_message: None,
            })
            .unwrap();

        let report = driver.reconcile_account(&account_id).unwrap();
        assert_eq!(report.stale_local_mirrors, 1);
        let mirror = coordinator.store.get_mirror(&canonical_event_id, &account_id).unwrap().unwrap();
        assert_eq!(mirror.state, MirrorState::Tombstoned);
    }

    #[test]
    fn orphaned_provider_mirror_enqueues_delete() {
        let canonical_event_id = CanonicalEventId::new();
        let (driver, coordinator, account_id) = setup(vec![], vec![("prov_orphan".to_string(), canonical_event_id.clone())]);
        coordinator
            .store
            .upsert_mirror(&Mirror {
                canonical_event_id: CanonicalEventId::new(),
                target_account_id: account_id.clone(),
                target_calendar_id: CalendarId::from("alc_target".to_string()),
                provider_event_id: Some("prov_known".into()),
                last_projected_hash: "hash-1".into(),
                last_write_ts: None,
                state: MirrorState::Active,
                error_message: None,
            })
            .unwrap();

        let report = driver.reconcile_account(&account_id).unwrap();
        assert_eq!(report.orphaned_mirrors, 1);
        let queued = coordinator.queues.write.pop().unwrap();
        match queued {
            WriteMessage::DeleteMirror { provider_event_id, .. } => assert_eq!(provider_event_id, "prov_orphan"),
            other => panic!("expected DeleteMirror, got {other:?}"),
        }
    }
}
