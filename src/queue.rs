//! Queue message contracts (spec §6.2) and the in-process FIFO consumers
//! drain. An external broker is out of scope; this crate owns only the
//! contract shapes and a queue abstraction workers can poll.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, CanonicalEventId};

/// Hard cap from spec §6.2: "All messages are JSON ≤ 128 KiB."
pub const MAX_MESSAGE_BYTES: usize = 128 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    #[serde(rename = "SYNC_INCREMENTAL")]
    Incremental {
        account_id: AccountId,
        channel_id: String,
        resource_id: String,
        ping_ts: String,
    },
    #[serde(rename = "SYNC_FULL")]
    Full { account_id: AccountId, reason: SyncFullReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFullReason {
    Onboarding,
    Reconcile,
    Token410,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedEventTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedEventBody {
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: ProjectedEventTime,
    pub end: ProjectedEventTime,
    pub transparency: String,
    pub extended_properties_private: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WriteMessage {
    #[serde(rename = "UPSERT_MIRROR")]
    UpsertMirror {
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        target_calendar_id: String,
        projected_payload: ProjectedEventBody,
        idempotency_key: String,
    },
    #[serde(rename = "DELETE_MIRROR")]
    DeleteMirror {
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        provider_event_id: String,
        idempotency_key: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileMessage {
    #[serde(rename = "type")]
    pub kind: String, // always "RECONCILE_ACCOUNT"
    pub account_id: AccountId,
    pub user_id: String,
    pub triggered_at: String,
}

impl ReconcileMessage {
    pub fn new(account_id: AccountId, user_id: impl Into<String>, triggered_at: impl Into<String>) -> Self {
        Self {
            kind: "RECONCILE_ACCOUNT".to_string(),
            account_id,
            user_id: user_id.into(),
            triggered_at: triggered_at.into(),
        }
    }
}

/// Computes the idempotency key for a write-queue message: a hash of
/// `(canonical_event_id, target_account_id, projection_hash)` (spec §5,
/// glossary "Idempotency key").
pub fn idempotency_key(canonical_event_id: &CanonicalEventId, target_account_id: &AccountId, projection_hash: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(canonical_event_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(target_account_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(projection_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncates an overlong payload string to fit the 128 KiB message cap;
/// full content always remains in canonical storage (spec §6.2).
pub fn truncate_to_limit(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// A minimal in-process FIFO queue. One instance per logical queue (sync,
/// write, reconcile, dead-letter). Cheap to clone; backed by a mutex-guarded
/// deque, matching the single-writer actor idiom used by the coordinator.
#[derive(Clone)]
pub struct InProcessQueue<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Default for InProcessQueue<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl<T> InProcessQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Pops up to `max` items in FIFO order.
    pub fn pop_batch(&self, max: usize) -> Vec<T> {
        let mut guard = self.inner.lock();
        let n = max.min(guard.len());
        guard.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The full set of queues the two pipelines and the reconciliation driver
/// share within one process (spec §2 data flow).
#[derive(Clone, Default)]
pub struct Queues {
    pub sync: InProcessQueue<SyncMessage>,
    pub write: InProcessQueue<WriteMessage>,
    pub reconcile: InProcessQueue<ReconcileMessage>,
    pub dead_letter: InProcessQueue<DeadLetter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub queue: String,
    pub payload_json: String,
    pub reason: String,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo() {
        let q: InProcessQueue<i32> = InProcessQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop_batch(2), vec![1, 2]);
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn truncate_keeps_char_boundaries() {
        let s = "héllo world";
        let truncated = truncate_to_limit(s, 3);
        assert!(s.is_char_boundary(truncated.len()) || truncated.len() <= 3);
        assert!(truncated.len() <= 4);
    }

    #[test]
    fn idempotency_key_is_stable() {
        let cid = CanonicalEventId::from("evt_a".to_string());
        let acct = AccountId::from("acc_b");
        let k1 = idempotency_key(&cid, &acct, "hash1");
        let k2 = idempotency_key(&cid, &acct, "hash1");
        assert_eq!(k1, k2);
        assert_ne!(k1, idempotency_key(&cid, &acct, "hash2"));
    }
}
