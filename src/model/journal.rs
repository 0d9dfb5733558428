//! Append-only journal entries (spec §3).

use serde::{Deserialize, Serialize};

use crate::ids::{CanonicalEventId, JournalId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
    Mirrored,
    AccountUnlinked,
    /// `reconcile:<subtype>`, e.g. `reconcile:missing_canonical`.
    Reconcile(String),
}

impl ChangeType {
    pub fn as_str(&self) -> String {
        match self {
            ChangeType::Created => "created".to_string(),
            ChangeType::Updated => "updated".to_string(),
            ChangeType::Deleted => "deleted".to_string(),
            ChangeType::Mirrored => "mirrored".to_string(),
            ChangeType::AccountUnlinked => "account_unlinked".to_string(),
            ChangeType::Reconcile(sub) => format!("reconcile:{sub}"),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "created" => ChangeType::Created,
            "updated" => ChangeType::Updated,
            "deleted" => ChangeType::Deleted,
            "mirrored" => ChangeType::Mirrored,
            "account_unlinked" => ChangeType::AccountUnlinked,
            other => other
                .strip_prefix("reconcile:")
                .map(|sub| ChangeType::Reconcile(sub.to_string()))
                .unwrap_or_else(|| ChangeType::Reconcile(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub journal_id: JournalId,
    pub canonical_event_id: Option<CanonicalEventId>,
    pub ts: String,
    pub actor: String,
    pub change_type: String,
    pub patch_json: String,
    pub reason: Option<String>,
}
