//! Timestamp and per-day timezone expansion helpers shared by the
//! availability engine and the constraint-derived event builder.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Error, Result};

/// Parses a canonical event's `start_ts`/`end_ts` (RFC 3339) into a UTC
/// instant. All-day events store a plain `YYYY-MM-DD` date instead; callers
/// needing the all-day range should use [`all_day_range_utc`] instead.
pub fn parse_instant(ts: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::validation(format!("invalid timestamp {ts}: {e}")))
}

pub fn resolve_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::validation(format!("invalid IANA timezone: {name}")))
}

/// `[start, end)` of an all-day event given its plain `YYYY-MM-DD` bounds and
/// timezone, expressed as UTC instants.
pub fn all_day_range_utc(start_date: &str, end_date: &str, tz: Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d")
        .map_err(|e| Error::validation(format!("invalid all-day date {start_date}: {e}")))?;
    let end = NaiveDate::parse_from_str(end_date, "%Y-%m-%d")
        .map_err(|e| Error::validation(format!("invalid all-day date {end_date}: {e}")))?;
    let start_local = tz
        .from_local_datetime(&start.and_hms_opt(0, 0, 0).unwrap())
        .single()
        .ok_or_else(|| Error::invariant("ambiguous all-day start in local time"))?;
    let end_local = tz
        .from_local_datetime(&end.and_hms_opt(0, 0, 0).unwrap())
        .single()
        .ok_or_else(|| Error::invariant("ambiguous all-day end in local time"))?;
    Ok((start_local.with_timezone(&Utc), end_local.with_timezone(&Utc)))
}

/// Midnight-to-midnight bounds of `date` in `tz`, expressed in UTC. DST
/// transitions within the day are handled per chrono-tz's local-time
/// resolution; per spec §9 Open Question (b), each day is expanded
/// independently in its constraint's own timezone rather than assuming a
/// fixed-length day.
pub fn day_bounds_utc(date: NaiveDate, tz: Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = tz
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
        .earliest()
        .ok_or_else(|| Error::invariant("could not resolve local midnight"))?;
    let next = date + Duration::days(1);
    let end = tz
        .from_local_datetime(&next.and_hms_opt(0, 0, 0).unwrap())
        .earliest()
        .ok_or_else(|| Error::invariant("could not resolve local midnight"))?;
    Ok((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

/// A clock-time instant (`HH:MM`) on `date` in `tz`, as a UTC instant.
pub fn time_of_day_utc(date: NaiveDate, hhmm: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(hhmm, "%H:%M")
        .map_err(|e| Error::validation(format!("invalid HH:MM {hhmm}: {e}")))?;
    let local = tz
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .ok_or_else(|| Error::invariant("could not resolve local time of day"))?;
    Ok(local.with_timezone(&Utc))
}

/// Enumerates every calendar date (in `tz`) that could overlap `[window_start,
/// window_end)`, padded by one day on each side so boundary-crossing local
/// days are not missed.
pub fn dates_spanning_window(window_start: DateTime<Utc>, window_end: DateTime<Utc>, tz: Tz) -> Vec<NaiveDate> {
    let local_start = window_start.with_timezone(&tz).date_naive() - Duration::days(1);
    let local_end = window_end.with_timezone(&tz).date_naive() + Duration::days(1);
    let mut dates = Vec::new();
    let mut d = local_start;
    while d <= local_end {
        dates.push(d);
        d += Duration::days(1);
    }
    dates
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
