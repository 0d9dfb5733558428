//! Stable Projection Hasher (spec §4.1).
//!
//! Pure function: canonical event + edge policy -> projected payload +
//! SHA-256 fingerprint. The fingerprint is computed over a fixed-order ASCII
//! rendering so it is insensitive to map/field iteration order and so equal
//! inputs always produce equal hashes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::event::{CanonicalEvent, Transparency};
use crate::model::policy::{CalendarKind, DetailLevel};
use crate::tagging::managed_tags;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeField {
    pub date: Option<String>,
    pub date_time: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedPayload {
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: TimeField,
    pub end: TimeField,
    pub transparency: String,
    pub visibility: String,
    pub extended_properties_private: serde_json::Value,
}

/// Produces the projected payload for one canonical event under one edge
/// (spec §4.1's payload rules).
pub fn project(
    event: &CanonicalEvent,
    detail_level: DetailLevel,
    calendar_kind: CalendarKind,
) -> Result<ProjectedPayload> {
    if event.all_day {
        if event.start_ts.is_empty() || event.end_ts.is_empty() {
            return Err(Error::invariant(
                "event missing both date and dateTime forms",
            ));
        }
    }

    let (summary, description, location, visibility) = match detail_level {
        DetailLevel::Busy => ("Busy".to_string(), None, None, "private".to_string()),
        DetailLevel::Title => (event.title.clone(), None, None, "default".to_string()),
        DetailLevel::Full => (
            event.title.clone(),
            Some(event.description.clone()),
            Some(event.location.clone()),
            "default".to_string(),
        ),
    };

    // Transparency only propagates through at FULL; all other levels
    // project as opaque regardless of the canonical's own transparency.
    let transparency = if detail_level == DetailLevel::Full {
        event.transparency.as_str().to_string()
    } else {
        Transparency::Opaque.as_str().to_string()
    };

    let (start, end) = if event.all_day {
        (
            TimeField {
                date: Some(event.start_ts.clone()),
                date_time: None,
                time_zone: None,
            },
            TimeField {
                date: Some(event.end_ts.clone()),
                date_time: None,
                time_zone: None,
            },
        )
    } else {
        (
            TimeField {
                date: None,
                date_time: Some(event.start_ts.clone()),
                time_zone: Some(event.timezone.clone()),
            },
            TimeField {
                date: None,
                date_time: Some(event.end_ts.clone()),
                time_zone: Some(event.timezone.clone()),
            },
        )
    };

    Ok(ProjectedPayload {
        summary,
        description,
        location,
        start,
        end,
        transparency,
        visibility,
        extended_properties_private: managed_tags(&event.canonical_event_id, &event.origin_account_id),
    })
}

/// SHA-256 over the canonical ASCII rendering: concatenate
/// `canonical_event_id`, `detail_level`, `calendar_kind`, then the
/// level-relevant fields in a fixed order (spec §4.1).
pub fn fingerprint(
    event: &CanonicalEvent,
    detail_level: DetailLevel,
    calendar_kind: CalendarKind,
) -> Result<String> {
    let payload = project(event, detail_level, calendar_kind)?;
    let mut hasher = Sha256::new();
    hasher.update(event.canonical_event_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(detail_level.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(calendar_kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(payload.summary.as_bytes());
    hasher.update(b"|");
    hasher.update(payload.description.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(payload.location.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(payload.transparency.as_bytes());
    hasher.update(b"|");
    hasher.update(payload.visibility.as_bytes());
    hasher.update(b"|");
    hasher.update(payload.start.date.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(payload.start.date_time.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(payload.start.time_zone.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(payload.end.date.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(payload.end.date_time.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(payload.end.time_zone.as_deref().unwrap_or("").as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AccountId, CanonicalEventId};
    use crate::model::event::{EventStatus, Source};

    fn sample_event() -> CanonicalEvent {
        CanonicalEvent {
            canonical_event_id: CanonicalEventId::from("evt_test123".to_string()),
            origin_account_id: AccountId::from("acc_a"),
            origin_event_id: "gcal_1".into(),
            title: "Team Standup".into(),
            description: "Daily sync".into(),
            location: "Zoom".into(),
            start_ts: "2026-02-15T09:00:00Z".into(),
            end_ts: "2026-02-15T09:30:00Z".into(),
            timezone: "UTC".into(),
            all_day: false,
            status: EventStatus::Confirmed,
            visibility: "default".into(),
            transparency: Transparency::Opaque,
            recurrence_rule: None,
            source: Source::Provider,
            version: 1,
            created_at: "2026-02-01T00:00:00Z".into(),
            updated_at: "2026-02-01T00:00:00Z".into(),
            constraint_id: None,
        }
    }

    #[test]
    fn busy_level_hides_title() {
        let e = sample_event();
        let p = project(&e, DetailLevel::Busy, CalendarKind::BusyOverlay).unwrap();
        assert_eq!(p.summary, "Busy");
        assert_eq!(p.visibility, "private");
        assert!(p.description.is_none());
    }

    #[test]
    fn title_level_shows_title_not_description() {
        let e = sample_event();
        let p = project(&e, DetailLevel::Title, CalendarKind::BusyOverlay).unwrap();
        assert_eq!(p.summary, "Team Standup");
        assert_eq!(p.visibility, "default");
        assert!(p.description.is_none());
    }

    #[test]
    fn full_level_shows_everything() {
        let e = sample_event();
        let p = project(&e, DetailLevel::Full, CalendarKind::TrueMirror).unwrap();
        assert_eq!(p.description.as_deref(), Some("Daily sync"));
        assert_eq!(p.location.as_deref(), Some("Zoom"));
    }

    #[test]
    fn fingerprint_is_stable_and_pure() {
        let e = sample_event();
        let h1 = fingerprint(&e, DetailLevel::Title, CalendarKind::BusyOverlay).unwrap();
        let h2 = fingerprint(&e, DetailLevel::Title, CalendarKind::BusyOverlay).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_detail_level() {
        let e = sample_event();
        let busy = fingerprint(&e, DetailLevel::Busy, CalendarKind::BusyOverlay).unwrap();
        let full = fingerprint(&e, DetailLevel::Full, CalendarKind::BusyOverlay).unwrap();
        assert_ne!(busy, full);
    }
}
