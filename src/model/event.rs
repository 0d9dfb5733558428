//! The canonical event (spec §3).

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, CanonicalEventId, ConstraintId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Confirmed => "confirmed",
            EventStatus::Tentative => "tentative",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(EventStatus::Confirmed),
            "tentative" => Some(EventStatus::Tentative),
            "cancelled" => Some(EventStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transparency {
    Opaque,
    Transparent,
}

impl Transparency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transparency::Opaque => "opaque",
            Transparency::Transparent => "transparent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opaque" => Some(Transparency::Opaque),
            "transparent" => Some(Transparency::Transparent),
            _ => None,
        }
    }
}

/// Where a canonical event's current revision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Provider,
    Ui,
    Api,
    Mcp,
    System,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Provider => "provider",
            Source::Ui => "ui",
            Source::Api => "api",
            Source::Mcp => "mcp",
            Source::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provider" => Some(Source::Provider),
            "ui" => Some(Source::Ui),
            "api" => Some(Source::Api),
            "mcp" => Some(Source::Mcp),
            "system" => Some(Source::System),
            _ => None,
        }
    }
}

/// The authoritative representation of an occurrence (spec §3).
///
/// `start_ts`/`end_ts` store the ISO 8601 instant; `all_day` decides whether
/// callers should render them as `date` or `dateTime` forms on the wire
/// (§4.1, §8 "all-day events round-trip").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub canonical_event_id: CanonicalEventId,
    pub origin_account_id: AccountId,
    pub origin_event_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start_ts: String,
    pub end_ts: String,
    pub timezone: String,
    pub all_day: bool,
    pub status: EventStatus,
    pub visibility: String,
    pub transparency: Transparency,
    pub recurrence_rule: Option<String>,
    pub source: Source,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
    pub constraint_id: Option<ConstraintId>,
}

impl CanonicalEvent {
    /// Overlap test for `[time_min, time_max)` windows (spec §4.3, §4.5):
    /// half-open on both sides, so touching endpoints do not count.
    pub fn overlaps(&self, window_start: &str, window_end: &str) -> bool {
        self.start_ts.as_str() < window_end && window_start < self.end_ts.as_str()
    }

    pub fn is_busy_candidate(&self) -> bool {
        self.status != EventStatus::Cancelled && self.transparency == Transparency::Opaque
    }
}
