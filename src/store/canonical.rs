//! Canonical event storage (spec §3, §4.3).

use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::ids::{AccountId, CanonicalEventId, ConstraintId};
use crate::model::event::{CanonicalEvent, EventStatus, Source, Transparency};

use super::{bool_to_sql, sql_to_bool, Store};

fn row_to_event(row: &Row) -> rusqlite::Result<CanonicalEvent> {
    let all_day: i64 = row.get("all_day")?;
    let status: String = row.get("status")?;
    let transparency: String = row.get("transparency")?;
    let source: String = row.get("source")?;
    let constraint_id: Option<String> = row.get("constraint_id")?;
    Ok(CanonicalEvent {
        canonical_event_id: CanonicalEventId::parse(row.get::<_, String>("canonical_event_id")?),
        origin_account_id: AccountId::from(row.get::<_, String>("origin_account_id")?),
        origin_event_id: row.get("origin_event_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        location: row.get("location")?,
        start_ts: row.get("start_ts")?,
        end_ts: row.get("end_ts")?,
        timezone: row.get("timezone")?,
        all_day: sql_to_bool(all_day),
        status: EventStatus::parse(&status).unwrap_or(EventStatus::Confirmed),
        visibility: row.get("visibility")?,
        transparency: Transparency::parse(&transparency).unwrap_or(Transparency::Opaque),
        recurrence_rule: row.get("recurrence_rule")?,
        source: Source::parse(&source).unwrap_or(Source::System),
        version: row.get::<_, i64>("version")? as u64,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        constraint_id: constraint_id.map(ConstraintId::parse),
    })
}

const COLUMNS: &str = "canonical_event_id, origin_account_id, origin_event_id, title, description, \
     location, start_ts, end_ts, timezone, all_day, status, visibility, transparency, \
     recurrence_rule, source, version, created_at, updated_at, constraint_id";

impl Store {
    pub fn insert_canonical_event(&self, event: &CanonicalEvent) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO canonical_events ({COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)"
                ),
                params![
                    event.canonical_event_id.as_str(),
                    event.origin_account_id.as_str(),
                    event.origin_event_id,
                    event.title,
                    event.description,
                    event.location,
                    event.start_ts,
                    event.end_ts,
                    event.timezone,
                    bool_to_sql(event.all_day),
                    event.status.as_str(),
                    event.visibility,
                    event.transparency.as_str(),
                    event.recurrence_rule,
                    event.source.as_str(),
                    event.version as i64,
                    event.created_at,
                    event.updated_at,
                    event.constraint_id.as_ref().map(|c| c.as_str().to_string()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn update_canonical_event(&self, event: &CanonicalEvent) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE canonical_events SET origin_account_id=?2, origin_event_id=?3, title=?4, \
                 description=?5, location=?6, start_ts=?7, end_ts=?8, timezone=?9, all_day=?10, \
                 status=?11, visibility=?12, transparency=?13, recurrence_rule=?14, source=?15, \
                 version=?16, updated_at=?17, constraint_id=?18 WHERE canonical_event_id=?1",
                params![
                    event.canonical_event_id.as_str(),
                    event.origin_account_id.as_str(),
                    event.origin_event_id,
                    event.title,
                    event.description,
                    event.location,
                    event.start_ts,
                    event.end_ts,
                    event.timezone,
                    bool_to_sql(event.all_day),
                    event.status.as_str(),
                    event.visibility,
                    event.transparency.as_str(),
                    event.recurrence_rule,
                    event.source.as_str(),
                    event.version as i64,
                    event.updated_at,
                    event.constraint_id.as_ref().map(|c| c.as_str().to_string()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_canonical_event(&self, id: &CanonicalEventId) -> Result<Option<CanonicalEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM canonical_events WHERE canonical_event_id = ?1"))?;
            Ok(stmt.query_row(params![id.as_str()], row_to_event).optional()?)
        })
    }

    pub fn find_canonical_by_origin(&self, origin_account_id: &AccountId, origin_event_id: &str) -> Result<Option<CanonicalEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM canonical_events WHERE origin_account_id = ?1 AND origin_event_id = ?2"
            ))?;
            Ok(stmt
                .query_row(params![origin_account_id.as_str(), origin_event_id], row_to_event)
                .optional()?)
        })
    }

    pub fn delete_canonical_event(&self, id: &CanonicalEventId) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM canonical_events WHERE canonical_event_id = ?1", params![id.as_str()])?;
            Ok(n > 0)
        })
    }

    pub fn delete_canonical_events_by_account(&self, account_id: &AccountId) -> Result<Vec<CanonicalEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM canonical_events WHERE origin_account_id = ?1"))?;
            let events: Vec<CanonicalEvent> = stmt
                .query_map(params![account_id.as_str()], row_to_event)?
                .collect::<rusqlite::Result<_>>()?;
            conn.execute("DELETE FROM canonical_events WHERE origin_account_id = ?1", params![account_id.as_str()])?;
            Ok(events)
        })
    }

    /// All non-cancelled events overlapping `[time_min, time_max)`, used by
    /// `listCanonicalEvents` and `computeAvailability` alike.
    pub fn list_events_in_window(&self, time_min: &str, time_max: &str) -> Result<Vec<CanonicalEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM canonical_events WHERE start_ts < ?2 AND end_ts > ?1 \
                 ORDER BY start_ts ASC, canonical_event_id ASC"
            ))?;
            let rows = stmt
                .query_map(params![time_min, time_max], row_to_event)?
                .collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    pub fn list_all_events(&self) -> Result<Vec<CanonicalEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM canonical_events ORDER BY start_ts ASC, canonical_event_id ASC"))?;
            let rows = stmt.query_map([], row_to_event)?.collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    pub fn count_canonical_events(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM canonical_events", [], |r| r.get(0))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::{EventStatus, Source, Transparency};

    fn sample() -> CanonicalEvent {
        CanonicalEvent {
            canonical_event_id: CanonicalEventId::new(),
            origin_account_id: AccountId::from("acc_a"),
            origin_event_id: "ev1".into(),
            title: "Standup".into(),
            description: String::new(),
            location: String::new(),
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
    fn insert_and_fetch_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let event = sample();
        store.insert_canonical_event(&event).unwrap();
        let fetched = store.get_canonical_event(&event.canonical_event_id).unwrap().unwrap();
        assert_eq!(fetched.title, "Standup");
        assert_eq!(fetched.version, 1);
    }

    #[test]
    fn find_by_origin_then_delete() {
        let store = Store::open_in_memory().unwrap();
        let event = sample();
        store.insert_canonical_event(&event).unwrap();
        let found = store
            .find_canonical_by_origin(&AccountId::from("acc_a"), "ev1")
            .unwrap()
            .unwrap();
        assert_eq!(found.canonical_event_id, event.canonical_event_id);
        assert!(store.delete_canonical_event(&event.canonical_event_id).unwrap());
        assert!(store.get_canonical_event(&event.canonical_event_id).unwrap().is_none());
    }
}
