//! Constraint-Aware Free/Busy engine (spec §4.5).
//!
//! Pure: no store access, no queue enqueues. The coordinator's
//! `computeAvailability` operation loads events and constraints and calls
//! straight through to [`compute_availability`].

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::AccountId;
use crate::model::constraint::{Constraint, ConstraintKind};
use crate::model::event::CanonicalEvent;
use crate::timeutil::{all_day_range_utc, dates_spanning_window, day_bounds_utc, parse_instant, resolve_tz, time_of_day_utc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub account_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub busy_intervals: Vec<BusyInterval>,
    pub free_intervals: Vec<FreeInterval>,
}

fn event_instant_range(event: &CanonicalEvent) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    if event.all_day {
        let tz = resolve_tz(if event.timezone.is_empty() { "UTC" } else { &event.timezone })?;
        all_day_range_utc(&event.start_ts, &event.end_ts, tz)
    } else {
        Ok((parse_instant(&event.start_ts)?, parse_instant(&event.end_ts)?))
    }
}

/// Step 1: event busy intervals, honoring the account filter and the
/// constraint-derived bypass (spec §4.5 step 1). Returns the interval list
/// alongside the surviving events, which step 4 needs to place buffers.
fn gather_event_busy<'a>(
    events: &'a [CanonicalEvent],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    account_filter: Option<&[AccountId]>,
) -> Result<(Vec<BusyInterval>, Vec<&'a CanonicalEvent>)> {
    let window_start_s = window_start.to_rfc3339();
    let window_end_s = window_end.to_rfc3339();
    let mut busy = Vec::new();
    let mut survivors = Vec::new();
    for event in events {
        if !event.is_busy_candidate() {
            continue;
        }
        if !event.overlaps(&window_start_s, &window_end_s) {
            continue;
        }
        if let Some(accounts) = account_filter {
            let bypasses = event.constraint_id.is_some();
            if !bypasses && !accounts.contains(&event.origin_account_id) {
                continue;
            }
        }
        let (start, end) = event_instant_range(event)?;
        busy.push(BusyInterval {
            start,
            end,
            account_ids: vec![event.origin_account_id.as_str().to_string()],
        });
        survivors.push(event);
    }
    Ok((busy, survivors))
}

/// Step 2: working-hours constraints narrow each local day to their union of
/// coverage; the complement within the window is busy. Skipped entirely when
/// no working-hours constraint exists (nothing to narrow).
fn expand_working_hours(
    constraints: &[Constraint],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<BusyInterval>> {
    let working_hours: Vec<&Constraint> = constraints
        .iter()
        .filter(|c| c.kind == ConstraintKind::WorkingHours)
        .collect();
    if working_hours.is_empty() {
        return Ok(Vec::new());
    }

    let mut coverage: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
    for c in &working_hours {
        let tz_name = c.config.get("timezone").and_then(|v| v.as_str()).unwrap_or("UTC");
        let tz = resolve_tz(tz_name)?;
        let days: BTreeSet<i64> = c
            .config
            .get("days")
            .and_then(|d| d.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
            .unwrap_or_default();
        let start_time = c.config.get("start_time").and_then(|v| v.as_str()).unwrap_or("00:00");
        let end_time = c.config.get("end_time").and_then(|v| v.as_str()).unwrap_or("00:00");

        for date in dates_spanning_window(window_start, window_end, tz) {
            let weekday = date.weekday().num_days_from_sunday() as i64;
            if !days.contains(&weekday) {
                continue;
            }
            let day_start = time_of_day_utc(date, start_time, tz)?;
            let day_end = time_of_day_utc(date, end_time, tz)?;
            if day_start < day_end {
                coverage.push((day_start, day_end));
            }
        }
    }

    let covered = merge_raw_intervals(coverage);
    Ok(invert_raw(&covered, window_start, window_end)
        .into_iter()
        .map(|(start, end)| BusyInterval {
            start,
            end,
            account_ids: vec!["working_hours".to_string()],
        })
        .collect())
}

/// Step 3: each no-meetings-after constraint emits `[time_of_day, end_of_day)`
/// busy for every local day in the window.
fn expand_no_meetings_after(
    constraints: &[Constraint],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<BusyInterval>> {
    let mut busy = Vec::new();
    for c in constraints.iter().filter(|c| c.kind == ConstraintKind::NoMeetingsAfter) {
        let tz_name = c.config.get("timezone").and_then(|v| v.as_str()).unwrap_or("UTC");
        let tz = resolve_tz(tz_name)?;
        let time = c.config.get("time").and_then(|v| v.as_str()).unwrap_or("00:00");
        for date in dates_spanning_window(window_start, window_end, tz) {
            let cutoff = time_of_day_utc(date, time, tz)?;
            let (_, day_end) = day_bounds_utc(date, tz)?;
            if cutoff < day_end {
                busy.push(BusyInterval {
                    start: cutoff,
                    end: day_end,
                    account_ids: vec!["no_meetings_after".to_string()],
                });
            }
        }
    }
    Ok(busy)
}

/// Step 4: travel/prep buffers precede an event; cooldown buffers follow it.
/// `applies_to: "external"` skips constraint-derived events (trips).
fn expand_buffers(constraints: &[Constraint], survivors: &[&CanonicalEvent]) -> Result<Vec<BusyInterval>> {
    let mut busy = Vec::new();
    for c in constraints.iter().filter(|c| c.kind == ConstraintKind::Buffer) {
        let buf_type = c.config.get("type").and_then(|v| v.as_str()).unwrap_or("travel");
        let minutes = c.config.get("minutes").and_then(|v| v.as_i64()).unwrap_or(0);
        let applies_to_external_only = c.config.get("applies_to").and_then(|v| v.as_str()) == Some("external");
        if minutes <= 0 {
            continue;
        }
        let span = Duration::minutes(minutes);
        for event in survivors {
            if applies_to_external_only && event.constraint_id.is_some() {
                continue;
            }
            let (start, end) = event_instant_range(event)?;
            match buf_type {
                "travel" | "prep" => busy.push(BusyInterval {
                    start: start - span,
                    end: start,
                    account_ids: vec!["buffer".to_string()],
                }),
                "cooldown" => busy.push(BusyInterval {
                    start: end,
                    end: end + span,
                    account_ids: vec!["buffer".to_string()],
                }),
                _ => {}
            }
        }
    }
    Ok(busy)
}

/// Sorts by start and folds overlapping or touching (`end >= next.start`)
/// intervals into one, unioning `account_ids` with duplicates removed (spec
/// §4.5 step 5, tested as an invariant in §8).
pub fn merge_intervals(mut intervals: Vec<BusyInterval>) -> Vec<BusyInterval> {
    intervals.sort_by(|a, b| a.start.cmp(&b.start));
    let mut merged: Vec<BusyInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        if let Some(last) = merged.last_mut() {
            if interval.start <= last.end {
                if interval.end > last.end {
                    last.end = interval.end;
                }
                for acct in interval.account_ids {
                    if !last.account_ids.contains(&acct) {
                        last.account_ids.push(acct);
                    }
                }
                continue;
            }
        }
        merged.push(interval);
    }
    merged
}

fn merge_raw_intervals(mut intervals: Vec<(DateTime<Utc>, DateTime<Utc>)>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    intervals.sort_by(|a, b| a.0.cmp(&b.0));
    let mut merged: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        if let Some(last) = merged.last_mut() {
            if start <= last.1 {
                if end > last.1 {
                    last.1 = end;
                }
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

fn invert_raw(
    covered: &[(DateTime<Utc>, DateTime<Utc>)],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut gaps = Vec::new();
    let mut cursor = window_start;
    for (start, end) in covered {
        let start = (*start).max(window_start);
        let end = (*end).min(window_end);
        if start > cursor {
            gaps.push((cursor, start));
        }
        if end > cursor {
            cursor = end;
        }
    }
    if cursor < window_end {
        gaps.push((cursor, window_end));
    }
    gaps
}

/// `computeFreeIntervals`: the complement of the merged busy set within
/// `[window_start, window_end)`, clipping partial overlaps (spec §4.5 step 6).
pub fn compute_free_intervals(
    merged_busy: &[BusyInterval],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<FreeInterval> {
    let raw: Vec<(DateTime<Utc>, DateTime<Utc>)> = merged_busy.iter().map(|b| (b.start, b.end)).collect();
    invert_raw(&raw, window_start, window_end)
        .into_iter()
        .map(|(start, end)| FreeInterval { start, end })
        .collect()
}

/// Runs the full five/six-step pipeline over one query window.
pub fn compute_availability(
    events: &[CanonicalEvent],
    constraints: &[Constraint],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    account_filter: Option<&[AccountId]>,
) -> Result<Availability> {
    let (mut busy, survivors) = gather_event_busy(events, window_start, window_end, account_filter)?;
    busy.extend(expand_working_hours(constraints, window_start, window_end)?);
    busy.extend(expand_no_meetings_after(constraints, window_start, window_end)?);
    busy.extend(expand_buffers(constraints, &survivors)?);

    let merged = merge_intervals(busy);
    let free = compute_free_intervals(&merged, window_start, window_end);
    Ok(Availability {
        busy_intervals: merged,
        free_intervals: free,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AccountId, CanonicalEventId, ConstraintId};
    use crate::model::constraint::ConstraintKind;
    use crate::model::event::{EventStatus, Source, Transparency};
    use chrono::TimeZone;
    use serde_json::json;

    fn dt(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn base_event(id: &str, start: &str, end: &str, constraint_id: Option<ConstraintId>) -> CanonicalEvent {
        CanonicalEvent {
            canonical_event_id: CanonicalEventId::from(id.to_string()),
            origin_account_id: AccountId::from("acc_a"),
            origin_event_id: format!("src_{id}"),
            title: "Meeting".into(),
            description: String::new(),
            location: String::new(),
            start_ts: start.into(),
            end_ts: end.into(),
            timezone: "UTC".into(),
            all_day: false,
            status: EventStatus::Confirmed,
            visibility: "default".into(),
            transparency: Transparency::Opaque,
            recurrence_rule: None,
            source: Source::Provider,
            version: 1,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
            constraint_id,
        }
    }

    fn working_hours_constraint() -> Constraint {
        Constraint {
            constraint_id: ConstraintId::new(),
            kind: ConstraintKind::WorkingHours,
            config: json!({"days": [1,2,3,4,5], "start_time": "09:00", "end_time": "17:00", "timezone": "UTC"}),
            active_from: None,
            active_to: None,
        }
    }

    fn buffer_constraint(minutes: i64) -> Constraint {
        Constraint {
            constraint_id: ConstraintId::new(),
            kind: ConstraintKind::Buffer,
            config: json!({"type": "travel", "minutes": minutes, "applies_to": "all"}),
            active_from: None,
            active_to: None,
        }
    }

    #[test]
    fn merge_intervals_is_sorted_disjoint_and_dedupes_accounts() {
        let intervals = vec![
            BusyInterval { start: dt("2026-02-16T10:00:00Z"), end: dt("2026-02-16T11:00:00Z"), account_ids: vec!["a".into()] },
            BusyInterval { start: dt("2026-02-16T10:30:00Z"), end: dt("2026-02-16T12:00:00Z"), account_ids: vec!["a".into(), "b".into()] },
        ];
        let merged = merge_intervals(intervals);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, dt("2026-02-16T10:00:00Z"));
        assert_eq!(merged[0].end, dt("2026-02-16T12:00:00Z"));
        assert_eq!(merged[0].account_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn free_is_complement_of_busy_within_window() {
        let window_start = dt("2026-02-16T00:00:00Z");
        let window_end = dt("2026-02-17T00:00:00Z");
        let busy = vec![BusyInterval { start: dt("2026-02-16T09:00:00Z"), end: dt("2026-02-16T10:00:00Z"), account_ids: vec!["a".into()] }];
        let free = compute_free_intervals(&busy, window_start, window_end);
        assert_eq!(free.len(), 2);
        assert_eq!(free[0].start, window_start);
        assert_eq!(free[0].end, dt("2026-02-16T09:00:00Z"));
        assert_eq!(free[1].start, dt("2026-02-16T10:00:00Z"));
        assert_eq!(free[1].end, window_end);
    }

    #[test]
    fn working_hours_out_of_range_is_whole_day_busy() {
        let window_start = Utc.with_ymd_and_hms(2026, 2, 21, 0, 0, 0).unwrap(); // Saturday
        let window_end = Utc.with_ymd_and_hms(2026, 2, 22, 0, 0, 0).unwrap();
        let constraints = vec![working_hours_constraint()];
        let result = compute_availability(&[], &constraints, window_start, window_end, None).unwrap();
        assert_eq!(result.free_intervals.len(), 0);
        assert_eq!(result.busy_intervals.len(), 1);
        assert_eq!(result.busy_intervals[0].start, window_start);
        assert_eq!(result.busy_intervals[0].end, window_end);
    }

    #[test]
    fn trip_working_hours_and_travel_buffer_scenario() {
        // Mon 2026-02-16: working hours 09:00-17:00 UTC, trip 14:00-16:00,
        // 15-min travel buffer, meeting 10:00-11:00.
        let window_start = dt("2026-02-16T00:00:00Z");
        let window_end = dt("2026-02-17T00:00:00Z");
        let trip_constraint_id = ConstraintId::new();
        let trip_event = base_event("evt_trip", "2026-02-16T14:00:00Z", "2026-02-16T16:00:00Z", Some(trip_constraint_id));
        let meeting = base_event("evt_meeting", "2026-02-16T10:00:00Z", "2026-02-16T11:00:00Z", None);
        let events = vec![trip_event, meeting];
        let constraints = vec![working_hours_constraint(), buffer_constraint(15)];

        let result = compute_availability(&events, &constraints, window_start, window_end, None).unwrap();
        let free: Vec<(String, String)> = result
            .free_intervals
            .iter()
            .map(|f| (f.start.to_rfc3339(), f.end.to_rfc3339()))
            .collect();
        assert_eq!(free.len(), 3);
        assert_eq!(free[0].0, dt("2026-02-16T09:00:00Z").to_rfc3339());
        assert_eq!(free[0].1, dt("2026-02-16T09:45:00Z").to_rfc3339());
        assert_eq!(free[1].0, dt("2026-02-16T11:00:00Z").to_rfc3339());
        assert_eq!(free[1].1, dt("2026-02-16T13:45:00Z").to_rfc3339());
        assert_eq!(free[2].0, dt("2026-02-16T16:00:00Z").to_rfc3339());
        assert_eq!(free[2].1, dt("2026-02-16T17:00:00Z").to_rfc3339());
    }

    #[test]
    fn account_filter_excludes_non_matching_but_not_constraint_derived() {
        let window_start = dt("2026-02-16T00:00:00Z");
        let window_end = dt("2026-02-17T00:00:00Z");
        let trip = base_event("evt_trip", "2026-02-16T14:00:00Z", "2026-02-16T16:00:00Z", Some(ConstraintId::new()));
        let other_account_event = {
            let mut e = base_event("evt_other", "2026-02-16T10:00:00Z", "2026-02-16T11:00:00Z", None);
            e.origin_account_id = AccountId::from("acc_b");
            e
        };
        let events = vec![trip, other_account_event];
        let filter = vec![AccountId::from("acc_a")];
        let result = compute_availability(&events, &[], window_start, window_end, Some(&filter)).unwrap();
        // Only the trip (constraint-derived, bypasses filter) contributes busy.
        assert_eq!(result.busy_intervals.len(), 1);
        assert_eq!(result.busy_intervals[0].start, dt("2026-02-16T14:00:00Z"));
    }
}
