//! Declared calendars within an external account (spec §3).

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, CalendarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CalendarType {
    Primary,
    BusyOverlay,
    Projected,
    Readonly,
}

impl CalendarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarType::Primary => "PRIMARY",
            CalendarType::BusyOverlay => "BUSY_OVERLAY",
            CalendarType::Projected => "PROJECTED",
            CalendarType::Readonly => "READONLY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRIMARY" => Some(CalendarType::Primary),
            "BUSY_OVERLAY" => Some(CalendarType::BusyOverlay),
            "PROJECTED" => Some(CalendarType::Projected),
            "READONLY" => Some(CalendarType::Readonly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    pub calendar_id: CalendarId,
    pub account_id: AccountId,
    pub name: String,
    pub kind: CalendarType,
}
