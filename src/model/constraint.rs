//! Constraints and their per-kind validation (spec §3, §4.4).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::ConstraintId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Trip,
    WorkingHours,
    Buffer,
    NoMeetingsAfter,
    Override,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::Trip => "trip",
            ConstraintKind::WorkingHours => "working_hours",
            ConstraintKind::Buffer => "buffer",
            ConstraintKind::NoMeetingsAfter => "no_meetings_after",
            ConstraintKind::Override => "override",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trip" => Some(ConstraintKind::Trip),
            "working_hours" => Some(ConstraintKind::WorkingHours),
            "buffer" => Some(ConstraintKind::Buffer),
            "no_meetings_after" => Some(ConstraintKind::NoMeetingsAfter),
            "override" => Some(ConstraintKind::Override),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub constraint_id: ConstraintId,
    pub kind: ConstraintKind,
    pub config: serde_json::Value,
    pub active_from: Option<String>,
    pub active_to: Option<String>,
}

/// Matches `^([01]\d|2[0-3]):[0-5]\d$` without pulling in a regex engine for
/// one fixed-width pattern.
fn is_valid_hhmm(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return false;
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 2 || b.is_ascii_digit());
    if !digits_ok {
        return false;
    }
    let hh: u32 = s[0..2].parse().unwrap_or(99);
    let mm: u32 = s[3..5].parse().unwrap_or(99);
    hh <= 23 && mm <= 59
}

fn non_empty_str(v: &serde_json::Value, field: &str) -> Result<String> {
    v.get(field)
        .and_then(|x| x.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::validation(format!("{field} must be a non-empty string")))
}

fn valid_iana_timezone(tz: &str) -> Result<()> {
    // A full IANA tzdata validation is out of scope for this pure validator;
    // the shape check below catches the common malformed inputs (empty,
    // whitespace, obviously non-zone strings) the spec requires rejecting.
    if tz.trim().is_empty() || !tz.contains('/') && tz != "UTC" {
        return Err(Error::validation(format!("invalid IANA timezone: {tz}")));
    }
    Ok(())
}

/// Validates a constraint's `config` by kind, per spec §4.4. Returns a
/// descriptive error on the first violation found.
pub fn validate_constraint(
    kind: ConstraintKind,
    config: &serde_json::Value,
    active_from: &Option<String>,
    active_to: &Option<String>,
) -> Result<()> {
    match kind {
        ConstraintKind::Trip => {
            non_empty_str(config, "name")?;
            let tz = non_empty_str(config, "timezone")?;
            valid_iana_timezone(&tz)?;
            let block_policy = non_empty_str(config, "block_policy")?;
            if block_policy != "BUSY" && block_policy != "TITLE" {
                return Err(Error::validation(
                    "trip.block_policy must be BUSY or TITLE",
                ));
            }
            let (from, to) = (
                active_from
                    .as_deref()
                    .ok_or_else(|| Error::validation("trip requires active_from"))?,
                active_to
                    .as_deref()
                    .ok_or_else(|| Error::validation("trip requires active_to"))?,
            );
            if from >= to {
                return Err(Error::validation("trip active_from must be < active_to"));
            }
            Ok(())
        }
        ConstraintKind::WorkingHours => {
            let days = config
                .get("days")
                .and_then(|d| d.as_array())
                .ok_or_else(|| Error::validation("working_hours.days must be an array"))?;
            if days.is_empty() {
                return Err(Error::validation("working_hours.days must be non-empty"));
            }
            let mut seen = std::collections::HashSet::new();
            for d in days {
                let n = d
                    .as_i64()
                    .ok_or_else(|| Error::validation("working_hours.days entries must be ints"))?;
                if !(0..=6).contains(&n) {
                    return Err(Error::validation("working_hours.days entries must be 0..6"));
                }
                if !seen.insert(n) {
                    return Err(Error::validation("working_hours.days must not repeat"));
                }
            }
            let start = non_empty_str(config, "start_time")?;
            let end = non_empty_str(config, "end_time")?;
            if !is_valid_hhmm(&start) || !is_valid_hhmm(&end) {
                return Err(Error::validation("working_hours times must match HH:MM"));
            }
            if end <= start {
                return Err(Error::validation("working_hours.end_time must be > start_time"));
            }
            let tz = non_empty_str(config, "timezone")?;
            valid_iana_timezone(&tz)?;
            Ok(())
        }
        ConstraintKind::Buffer => {
            let buf_type = non_empty_str(config, "type")?;
            if !["travel", "prep", "cooldown"].contains(&buf_type.as_str()) {
                return Err(Error::validation(
                    "buffer.type must be travel|prep|cooldown",
                ));
            }
            let minutes = config
                .get("minutes")
                .and_then(|m| m.as_i64())
                .ok_or_else(|| Error::validation("buffer.minutes must be an integer"))?;
            if minutes <= 0 {
                return Err(Error::validation("buffer.minutes must be positive"));
            }
            let applies_to = non_empty_str(config, "applies_to")?;
            if applies_to != "all" && applies_to != "external" {
                return Err(Error::validation("buffer.applies_to must be all|external"));
            }
            Ok(())
        }
        ConstraintKind::NoMeetingsAfter => {
            let time = non_empty_str(config, "time")?;
            if !is_valid_hhmm(&time) {
                return Err(Error::validation("no_meetings_after.time must match HH:MM"));
            }
            let tz = non_empty_str(config, "timezone")?;
            valid_iana_timezone(&tz)?;
            Ok(())
        }
        ConstraintKind::Override => {
            non_empty_str(config, "reason")?;
            if let (Some(s), Some(e)) = (
                config.get("slot_start").and_then(|v| v.as_str()),
                config.get("slot_end").and_then(|v| v.as_str()),
            ) {
                if s >= e {
                    return Err(Error::validation("override slot_start must be < slot_end"));
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trip_requires_ordered_window() {
        let cfg = json!({"name": "Tokyo", "timezone": "Asia/Tokyo", "block_policy": "BUSY"});
        let err = validate_constraint(
            ConstraintKind::Trip,
            &cfg,
            &Some("2026-02-20T00:00:00Z".into()),
            &Some("2026-02-10T00:00:00Z".into()),
        );
        assert!(err.is_err());
    }

    #[test]
    fn working_hours_rejects_backwards_times() {
        let cfg = json!({"days": [1,2,3], "start_time": "17:00", "end_time": "09:00", "timezone": "UTC"});
        assert!(validate_constraint(ConstraintKind::WorkingHours, &cfg, &None, &None).is_err());
    }

    #[test]
    fn buffer_rejects_zero_minutes() {
        let cfg = json!({"type": "travel", "minutes": 0, "applies_to": "all"});
        assert!(validate_constraint(ConstraintKind::Buffer, &cfg, &None, &None).is_err());
    }
}
