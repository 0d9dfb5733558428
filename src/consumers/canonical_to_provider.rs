//! Canonical→Provider consumer (spec §4.8).
//!
//! Drains the write queue and performs idempotent create/patch/delete calls
//! against providers, then updates the mirror row to reflect the outcome.
//! The provider HTTP client is an external collaborator (spec §1); callers
//! supply one via [`ProviderWriter`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::account_holder::AccountHolder;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::ids::{AccountId, CalendarId};
use crate::model::mirror::{Mirror, MirrorState};
use crate::queue::{idempotency_key, DeadLetter, ProjectedEventBody, WriteMessage};

pub trait ProviderWriter: Send + Sync {
    /// Creates (`provider_event_id: None`) or patches an existing event;
    /// returns the provider-assigned event id either way.
    fn upsert(&self, access_token: &str, target_calendar_id: &str, provider_event_id: Option<&str>, payload: &ProjectedEventBody) -> Result<String>;
    fn delete(&self, access_token: &str, target_calendar_id: &str, provider_event_id: &str) -> Result<()>;
}

/// A writer that always fails transiently; plugs the seam for deployments
/// that haven't wired up a real provider HTTP client yet.
pub struct UnconfiguredWriter;

impl ProviderWriter for UnconfiguredWriter {
    fn upsert(&self, _access_token: &str, _target_calendar_id: &str, _provider_event_id: Option<&str>, _payload: &ProjectedEventBody) -> Result<String> {
        Err(crate::error::Error::ProviderTransient("no provider writer configured".into()))
    }

    fn delete(&self, _access_token: &str, _target_calendar_id: &str, _provider_event_id: &str) -> Result<()> {
        Err(crate::error::Error::ProviderTransient("no provider writer configured".into()))
    }
}

/// Maps target accounts to the holder that owns their tokens. One write
/// consumer instance serves every account in a user's graph, so it needs a
/// lookup rather than a single holder.
#[derive(Default)]
pub struct AccountHolderRegistry {
    holders: HashMap<AccountId, Arc<AccountHolder>>,
}

impl AccountHolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account_id: AccountId, holder: Arc<AccountHolder>) {
        self.holders.insert(account_id, holder);
    }

    pub fn get(&self, account_id: &AccountId) -> Option<Arc<AccountHolder>> {
        self.holders.get(account_id).cloned()
    }
}

#[derive(Debug)]
pub enum DrainOutcome {
    Empty,
    Applied { idempotency_key: String },
    Skipped { idempotency_key: String, reason: String },
    Deferred { idempotency_key: String, reason: String },
    DeadLettered { idempotency_key: String, reason: String },
}

pub struct WriteConsumer {
    coordinator: Arc<Coordinator>,
    holders: AccountHolderRegistry,
    writer: Arc<dyn ProviderWriter>,
    max_delivery_attempts: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl WriteConsumer {
    pub fn new(coordinator: Arc<Coordinator>, holders: AccountHolderRegistry, writer: Arc<dyn ProviderWriter>, max_delivery_attempts: u32) -> Self {
        Self {
            coordinator,
            holders,
            writer,
            max_delivery_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn drain_one(&self) -> DrainOutcome {
        let Some(message) = self.coordinator.queues.write.pop() else {
            return DrainOutcome::Empty;
        };
        match message {
            WriteMessage::UpsertMirror {
                canonical_event_id,
                target_account_id,
                target_calendar_id,
                projected_payload,
                idempotency_key,
            } => self.upsert(canonical_event_id, target_account_id, target_calendar_id, projected_payload, idempotency_key),
            WriteMessage::DeleteMirror {
                canonical_event_id,
                target_account_id,
                provider_event_id,
                idempotency_key,
            } => self.delete(canonical_event_id, target_account_id, provider_event_id, idempotency_key),
        }
    }

    fn upsert(
        &self,
        canonical_event_id: crate::ids::CanonicalEventId,
        target_account_id: AccountId,
        target_calendar_id: String,
        payload: ProjectedEventBody,
        key: String,
    ) -> DrainOutcome {
        let existing = self.coordinator.store.get_mirror(&canonical_event_id, &target_account_id).unwrap_or(None);

        // Idempotent retry: if the mirror is already ACTIVE under this exact
        // projection hash, the effect of this message has already happened.
        if let Some(mirror) = &existing {
            if mirror.state == MirrorState::Active {
                let current_key = idempotency_key(&canonical_event_id, &target_account_id, &mirror.last_projected_hash);
                if current_key == key {
                    return DrainOutcome::Skipped { idempotency_key: key, reason: "already applied".to_string() };
                }
            }
        }

        let Some(holder) = self.holders.get(&target_account_id) else {
            return self.handle_failure(key, format!("no account holder for {target_account_id}"), &canonical_event_id, &target_account_id, &target_calendar_id, existing.as_ref());
        };
        let access_token = match holder.get_access_token(&target_account_id) {
            Ok(t) => t,
            Err(e) => return self.handle_failure(key, e.to_string(), &canonical_event_id, &target_account_id, &target_calendar_id, existing.as_ref()),
        };

        let provider_event_id = existing.as_ref().and_then(|m| m.provider_event_id.clone());
        let last_projected_hash = existing.as_ref().map(|m| m.last_projected_hash.clone()).unwrap_or_default();

        match self.writer.upsert(&access_token, &target_calendar_id, provider_event_id.as_deref(), &payload) {
            Ok(new_provider_event_id) => {
                let mirror = Mirror {
                    canonical_event_id: canonical_event_id.clone(),
                    target_account_id: target_account_id.clone(),
                    target_calendar_id: CalendarId::parse(target_calendar_id.clone()),
                    provider_event_id: Some(new_provider_event_id),
                    last_projected_hash,
                    last_write_ts: Some(chrono::Utc::now().to_rfc3339()),
                    state: MirrorState::Active,
                    error_message: None,
                };
                if let Err(e) = self.coordinator.store.upsert_mirror(&mirror) {
                    warn!(canonical_event_id = %canonical_event_id, error = %e, "failed to persist mirror after successful provider write");
                }
                self.reset_attempts(&key);
                info!(canonical_event_id = %canonical_event_id, target_account_id = %target_account_id, "mirror upserted");
                DrainOutcome::Applied { idempotency_key: key }
            }
            Err(e) => self.handle_failure(key, e.to_string(), &canonical_event_id, &target_account_id, &target_calendar_id, existing.as_ref()),
        }
    }

    fn delete(
        &self,
        canonical_event_id: crate::ids::CanonicalEventId,
        target_account_id: AccountId,
        provider_event_id: String,
        key: String,
    ) -> DrainOutcome {
        let existing = self.coordinator.store.get_mirror(&canonical_event_id, &target_account_id).unwrap_or(None);
        let Some(mirror) = existing else {
            // Already gone locally; deleting the provider event is moot.
            return DrainOutcome::Skipped { idempotency_key: key, reason: "mirror already removed".to_string() };
        };

        let Some(holder) = self.holders.get(&target_account_id) else {
            return self.handle_delete_failure(key, format!("no account holder for {target_account_id}"), &mirror);
        };
        let access_token = match holder.get_access_token(&target_account_id) {
            Ok(t) => t,
            Err(e) => return self.handle_delete_failure(key, e.to_string(), &mirror),
        };

        match self.writer.delete(&access_token, mirror.target_calendar_id.as_str(), &provider_event_id) {
            Ok(()) => {
                if let Err(e) = self.coordinator.store.delete_mirror(&canonical_event_id, &target_account_id) {
                    warn!(canonical_event_id = %canonical_event_id, error = %e, "failed to remove mirror row after provider delete");
                }
                self.reset_attempts(&key);
                DrainOutcome::Applied { idempotency_key: key }
            }
            Err(e) => self.handle_delete_failure(key, e.to_string(), &mirror),
        }
    }

    fn handle_failure(
        &self,
        key: String,
        reason: String,
        canonical_event_id: &crate::ids::CanonicalEventId,
        target_account_id: &AccountId,
        target_calendar_id: &str,
        existing: Option<&Mirror>,
    ) -> DrainOutcome {
        let mirror = Mirror {
            canonical_event_id: canonical_event_id.clone(),
            target_account_id: target_account_id.clone(),
            target_calendar_id: CalendarId::parse(target_calendar_id.to_string()),
            provider_event_id: existing.and_then(|m| m.provider_event_id.clone()),
            last_projected_hash: existing.map(|m| m.last_projected_hash.clone()).unwrap_or_default(),
            last_write_ts: existing.and_then(|m| m.last_write_ts.clone()),
            state: MirrorState::Error,
            error_message: Some(reason.clone()),
        };
        let _ = self.coordinator.store.upsert_mirror(&mirror);
        self.record_failure(key, reason)
    }

    fn handle_delete_failure(&self, key: String, reason: String, existing: &Mirror) -> DrainOutcome {
        let mut mirror = existing.clone();
        mirror.state = MirrorState::Error;
        mirror.error_message = Some(reason.clone());
        let _ = self.coordinator.store.upsert_mirror(&mirror);
        self.record_failure(key, reason)
    }

    fn record_failure(&self, key: String, reason: String) -> DrainOutcome {
        let attempts = self.bump_attempts(&key);
        if attempts >= self.max_delivery_attempts {
            self.coordinator.queues.dead_letter.push(DeadLetter {
                queue: "write".to_string(),
                payload_json: serde_json::json!({ "idempotency_key": key }).to_string(),
                reason: reason.clone(),
                attempts,
            });
            self.reset_attempts(&key);
            warn!(idempotency_key = %key, %reason, "write consumer exhausted retries, dead-lettered");
            DrainOutcome::DeadLettered { idempotency_key: key, reason }
        } else {
            warn!(idempotency_key = %key, %reason, attempts, "write consumer will retry");
            DrainOutcome::Deferred { idempotency_key: key, reason }
        }
    }

    fn bump_attempts(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock();
        let entry = attempts.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn reset_attempts(&self, key: &str) {
        self.attempts.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_holder::NoRefresh;
    use crate::crypto::{MasterKey, TokenPair};
    use crate::ids::CanonicalEventId;
    use crate::queue::{ProjectedEventTime, Queues};
    use crate::store::Store;

    fn sample_payload() -> ProjectedEventBody {
        ProjectedEventBody {
            summary: "Busy".into(),
            description: None,
            location: None,
            start: ProjectedEventTime { date_time: Some("2026-02-15T09:00:00Z".into()), date: None, time_zone: Some("UTC".into()) },
            end: ProjectedEventTime { date_time: Some("2026-02-15T09:30:00Z".into()), date: None, time_zone: Some("UTC".into()) },
            transparency: "opaque".into(),
            extended_properties_private: serde_json::json!({}),
        }
    }

    struct StubWriter {
        fail: bool,
    }
    impl ProviderWriter for StubWriter {
        fn upsert(&self, _access_token: &str, _target_calendar_id: &str, _provider_event_id: Option<&str>, _payload: &ProjectedEventBody) -> Result<String> {
            if self.fail {
                Err(crate::error::Error::ProviderTransient("boom".into()))
            } else {
                Ok("gcal_event_1".into())
            }
        }
        fn delete(&self, _access_token: &str, _target_calendar_id: &str, _provider_event_id: &str) -> Result<()> {
            if self.fail {
                Err(crate::error::Error::ProviderTransient("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    fn setup(fail: bool) -> (WriteConsumer, AccountId, CanonicalEventId) {
        let coordinator = Arc::new(Coordinator::new(Store::open_in_memory().unwrap(), Queues::default()));
        let account_id = AccountId::from("acc_target");
        let holder = Arc::new(AccountHolder::new(Store::open_in_memory().unwrap(), MasterKey::generate(), Arc::new(NoRefresh)));
        holder
            .link_account(
                &account_id,
                TokenPair { access_token: "at".into(), refresh_token: "rt".into(), expires_at: "2099-01-01T00:00:00Z".into() },
            )
            .unwrap();
        let mut registry = AccountHolderRegistry::new();
        registry.insert(account_id.clone(), holder);
        let canonical_event_id = CanonicalEventId::new();
        let mirror = Mirror {
            canonical_event_id: canonical_event_id.clone(),
            target_account_id: account_id.clone(),
            target_calendar_id: CalendarId::from("alc_1".to_string()),
            provider_event_id: None,
            last_projected_hash: "hash-1".into(),
            last_write_ts: None,
            state: MirrorState::Pending,
            error_message: None,
        };
        coordinator.store.upsert_mirror(&mirror).unwrap();
        let consumer = WriteConsumer::new(coordinator, registry, Arc::new(StubWriter { fail }), 2);
        (consumer, account_id, canonical_event_id)
    }

    #[test]
    fn upsert_success_activates_mirror() {
        let (consumer, account_id, canonical_event_id) = setup(false);
        let key = idempotency_key(&canonical_event_id, &account_id, "hash-1");
        consumer.coordinator.queues.write.push(WriteMessage::UpsertMirror {
            canonical_event_id: canonical_event_id.clone(),
            target_account_id: account_id.clone(),
            target_calendar_id: "alc_1".into(),
            projected_payload: sample_payload(),
            idempotency_key: key,
        });
        match consumer.drain_one() {
            DrainOutcome::Applied { .. } => {}
            other => panic!("expected Applied, got {other:?}"),
        }
        let mirror = consumer.coordinator.store.get_mirror(&canonical_event_id, &account_id).unwrap().unwrap();
        assert_eq!(mirror.state, MirrorState::Active);
        assert_eq!(mirror.provider_event_id.as_deref(), Some("gcal_event_1"));
    }

    #[test]
    fn replaying_same_idempotency_key_after_success_is_skipped() {
        let (consumer, account_id, canonical_event_id) = setup(false);
        let key = idempotency_key(&canonical_event_id, &account_id, "hash-1");
        let message = || WriteMessage::UpsertMirror {
            canonical_event_id: canonical_event_id.clone(),
            target_account_id: account_id.clone(),
            target_calendar_id: "alc_1".into(),
            projected_payload: sample_payload(),
            idempotency_key: key.clone(),
        };
        consumer.coordinator.queues.write.push(message());
        consumer.drain_one();
        consumer.coordinator.queues.write.push(message());
        match consumer.drain_one() {
            DrainOutcome::Skipped { .. } => {}
            other => panic!("expected Skipped, got {other:?}"),
        }
    }

    #[test]
    fn repeated_failures_reach_dead_letter() {
        let (consumer, account_id, canonical_event_id) = setup(true);
        let key = idempotency_key(&canonical_event_id, &account_id, "hash-1");
        for _ in 0..2 {
            consumer.coordinator.queues.write.push(WriteMessage::UpsertMirror {
                canonical_event_id: canonical_event_id.clone(),
                target_account_id: account_id.clone(),
                target_calendar_id: "alc_1".into(),
                projected_payload: sample_payload(),
                idempotency_key: key.clone(),
            });
        }
        assert!(matches!(consumer.drain_one(), DrainOutcome::Deferred { .. }));
        assert!(matches!(consumer.drain_one(), DrainOutcome::DeadLettered { .. }));
        let mirror = consumer.coordinator.store.get_mirror(&canonical_event_id, &account_id).unwrap().unwrap();
        assert_eq!(mirror.state, MirrorState::Error);
    }
}
