//! The mirror: a canonical event's materialization in one target account
//! under one policy edge (spec §3).

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, CalendarId, CanonicalEventId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MirrorState {
    Pending,
    Active,
    Deleted,
    Tombstoned,
    Error,
}

impl MirrorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorState::Pending => "PENDING",
            MirrorState::Active => "ACTIVE",
            MirrorState::Deleted => "DELETED",
            MirrorState::Tombstoned => "TOMBSTONED",
            MirrorState::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(MirrorState::Pending),
            "ACTIVE" => Some(MirrorState::Active),
            "DELETED" => Some(MirrorState::Deleted),
            "TOMBSTONED" => Some(MirrorState::Tombstoned),
            "ERROR" => Some(MirrorState::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mirror {
    pub canonical_event_id: CanonicalEventId,
    pub target_account_id: AccountId,
    pub target_calendar_id: CalendarId,
    pub provider_event_id: Option<String>,
    pub last_projected_hash: String,
    pub last_write_ts: Option<String>,
    pub state: MirrorState,
    pub error_message: Option<String>,
}

impl Mirror {
    /// Invariant from spec §8: when ACTIVE, `provider_event_id` is non-null.
    pub fn check_invariant(&self) -> bool {
        self.state != MirrorState::Active || self.provider_event_id.is_some()
    }
}
