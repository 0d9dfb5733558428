//! Policies and policy edges (spec §3, §4.2).

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, PolicyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DetailLevel {
    Busy,
    Title,
    Full,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Busy => "BUSY",
            DetailLevel::Title => "TITLE",
            DetailLevel::Full => "FULL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUSY" => Some(DetailLevel::Busy),
            "TITLE" => Some(DetailLevel::Title),
            "FULL" => Some(DetailLevel::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CalendarKind {
    BusyOverlay,
    TrueMirror,
}

impl CalendarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarKind::BusyOverlay => "BUSY_OVERLAY",
            CalendarKind::TrueMirror => "TRUE_MIRROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUSY_OVERLAY" => Some(CalendarKind::BusyOverlay),
            "TRUE_MIRROR" => Some(CalendarKind::TrueMirror),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEdge {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub detail_level: DetailLevel,
    pub calendar_kind: CalendarKind,
}

impl PolicyEdge {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.from_account_id == self.to_account_id {
            return Err(crate::error::Error::validation(format!(
                "policy edge self-loop: {}",
                self.from_account_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: PolicyId,
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyWithEdges {
    pub policy: Policy,
    pub edges: Vec<PolicyEdge>,
}
