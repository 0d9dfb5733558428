//! Scheduling sessions & tentative holds (spec §4.7).

use serde::{Deserialize, Serialize};

use crate::ids::{HoldId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    CandidatesReady,
    Committed,
    Cancelled,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::CandidatesReady => "candidates_ready",
            SessionStatus::Committed => "committed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(SessionStatus::Open),
            "candidates_ready" => Some(SessionStatus::CandidatesReady),
            "committed" => Some(SessionStatus::Committed),
            "cancelled" => Some(SessionStatus::Cancelled),
            "expired" => Some(SessionStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Cancelled | SessionStatus::Committed | SessionStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    Held,
    Committed,
    Released,
    Expired,
}

impl HoldState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldState::Held => "held",
            HoldState::Committed => "committed",
            HoldState::Released => "released",
            HoldState::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, HoldState::Held)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub start: String,
    pub end: String,
    pub score: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub hold_id: HoldId,
    pub session_id: SessionId,
    pub candidate_index: usize,
    pub state: HoldState,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingSession {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub candidates: Vec<Candidate>,
    pub last_activity_ts: String,
}
