//! Mirror row storage (spec §3, §4.3).

use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::ids::{AccountId, CalendarId, CanonicalEventId};
use crate::model::mirror::{Mirror, MirrorState};

use super::Store;

fn row_to_mirror(row: &Row) -> rusqlite::Result<Mirror> {
    let state: String = row.get("state")?;
    Ok(Mirror {
        canonical_event_id: CanonicalEventId::parse(row.get::<_, String>("canonical_event_id")?),
        target_account_id: AccountId::from(row.get::<_, String>("target_account_id")?),
        target_calendar_id: CalendarId::parse(row.get::<_, String>("target_calendar_id")?),
        provider_event_id: row.get("provider_event_id")?,
        last_projected_hash: row.get("last_projected_hash")?,
        last_write_ts: row.get("last_write_ts")?,
        state: MirrorState::parse(&state).unwrap_or(MirrorState::Error),
        error_message: row.get("error_message")?,
    })
}

const COLUMNS: &str =
    "canonical_event_id, target_account_id, target_calendar_id, provider_event_id, last_projected_hash, last_write_ts, state, error_message";

impl Store {
    pub fn upsert_mirror(&self, mirror: &Mirror) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO event_mirrors ({COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8) \
                     ON CONFLICT(canonical_event_id, target_account_id) DO UPDATE SET \
                     target_calendar_id=excluded.target_calendar_id, \
                     provider_event_id=excluded.provider_event_id, \
                     last_projected_hash=excluded.last_projected_hash, \
                     last_write_ts=excluded.last_write_ts, \
                     state=excluded.state, \
                     error_message=excluded.error_message"
                ),
                params![
                    mirror.canonical_event_id.as_str(),
                    mirror.target_account_id.as_str(),
                    mirror.target_calendar_id.as_str(),
                    mirror.provider_event_id,
                    mirror.last_projected_hash,
                    mirror.last_write_ts,
                    mirror.state.as_str(),
                    mirror.error_message,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_mirror(&self, canonical_event_id: &CanonicalEventId, target_account_id: &AccountId) -> Result<Option<Mirror>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM event_mirrors WHERE canonical_event_id = ?1 AND target_account_id = ?2"
            ))?;
            Ok(stmt
                .query_row(params![canonical_event_id.as_str(), target_account_id.as_str()], row_to_mirror)
                .optional()?)
        })
    }

    pub fn list_mirrors_for_event(&self, canonical_event_id: &CanonicalEventId) -> Result<Vec<Mirror>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM event_mirrors WHERE canonical_event_id = ?1"))?;
            let rows = stmt
                .query_map(params![canonical_event_id.as_str()], row_to_mirror)?
                .collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    pub fn list_mirrors_for_account(&self, target_account_id: &AccountId) -> Result<Vec<Mirror>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM event_mirrors WHERE target_account_id = ?1"))?;
            let rows = stmt
                .query_map(params![target_account_id.as_str()], row_to_mirror)?
                .collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    pub fn get_active_mirrors(&self) -> Result<Vec<Mirror>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM event_mirrors WHERE state = 'ACTIVE'"))?;
            let rows = stmt.query_map([], row_to_mirror)?.collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    pub fn delete_mirror(&self, canonical_event_id: &CanonicalEventId, target_account_id: &AccountId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM event_mirrors WHERE canonical_event_id = ?1 AND target_account_id = ?2",
                params![canonical_event_id.as_str(), target_account_id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn delete_mirrors_for_event(&self, canonical_event_id: &CanonicalEventId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM event_mirrors WHERE canonical_event_id = ?1",
                params![canonical_event_id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn delete_mirrors_for_account(&self, target_account_id: &AccountId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM event_mirrors WHERE target_account_id = ?1",
                params![target_account_id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn count_mirrors_by_state(&self, state: MirrorState) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM event_mirrors WHERE state = ?1",
                params![state.as_str()],
                |r| r.get(0),
            )?)
        })
    }

    pub fn count_mirrors_total(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM event_mirrors", [], |r| r.get(0))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mirror() -> Mirror {
        Mirror {
            canonical_event_id: CanonicalEventId::from("evt_a".to_string()),
            target_account_id: AccountId::from("acc_b"),
            target_calendar_id: CalendarId::from("alc_b".to_string()),
            provider_event_id: None,
            last_projected_hash: "hash1".into(),
            last_write_ts: None,
            state: MirrorState::Pending,
            error_message: None,
        }
    }

    #[test]
    fn upsert_then_transition_to_active() {
        let store = Store::open_in_memory().unwrap();
        let mut mirror = sample_mirror();
        store.upsert_mirror(&mirror).unwrap();
        mirror.state = MirrorState::Active;
        mirror.provider_event_id = Some("gcal_1".into());
        store.upsert_mirror(&mirror).unwrap();

        let fetched = store
            .get_mirror(&mirror.canonical_event_id, &mirror.target_account_id)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.state, MirrorState::Active);
        assert!(fetched.check_invariant());
        assert_eq!(store.count_mirrors_by_state(MirrorState::Active).unwrap(), 1);
    }
}
