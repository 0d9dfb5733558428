//! Append-only journal storage (spec §3, §4.3, §6.3 `queryJournal`).

use rusqlite::{params, Row};

use crate::error::Result;
use crate::ids::{CanonicalEventId, JournalId};
use crate::model::journal::JournalEntry;

use super::Store;

fn row_to_entry(row: &Row) -> rusqlite::Result<JournalEntry> {
    let canonical_event_id: Option<String> = row.get("canonical_event_id")?;
    Ok(JournalEntry {
        journal_id: JournalId::parse(row.get::<_, String>("journal_id")?),
        canonical_event_id: canonical_event_id.map(CanonicalEventId::parse),
        ts: row.get("ts")?,
        actor: row.get("actor")?,
        change_type: row.get("change_type")?,
        patch_json: row.get("patch_json")?,
        reason: row.get("reason")?,
    })
}

const COLUMNS: &str = "journal_id, canonical_event_id, ts, actor, change_type, patch_json, reason";

#[derive(Default)]
pub struct JournalFilter {
    pub canonical_event_id: Option<CanonicalEventId>,
    pub actor: Option<String>,
    pub change_type: Option<String>,
    pub limit: Option<i64>,
}

impl Store {
    pub fn append_journal(&self, entry: &JournalEntry) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO journal ({COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7)"),
                params![
                    entry.journal_id.as_str(),
                    entry.canonical_event_id.as_ref().map(|c| c.as_str().to_string()),
                    entry.ts,
                    entry.actor,
                    entry.change_type,
                    entry.patch_json,
                    entry.reason,
                ],
            )?;
            Ok(())
        })
    }

    /// `ORDER BY ts DESC`, filtered by `canonical_event_id`, `actor`, or
    /// `change_type` (spec §4.3 `queryJournal`).
    pub fn query_journal(&self, filter: &JournalFilter) -> Result<Vec<JournalEntry>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {COLUMNS} FROM journal WHERE 1=1");
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(cid) = &filter.canonical_event_id {
                sql.push_str(" AND canonical_event_id = ?");
                args.push(Box::new(cid.as_str().to_string()));
            }
            if let Some(actor) = &filter.actor {
                sql.push_str(" AND actor = ?");
                args.push(Box::new(actor.clone()));
            }
            if let Some(ct) = &filter.change_type {
                sql.push_str(" AND change_type = ?");
                args.push(Box::new(ct.clone()));
            }
            sql.push_str(" ORDER BY ts DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(params.as_slice(), row_to_entry)?.collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    pub fn latest_journal_ts(&self) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT ts FROM journal ORDER BY ts DESC LIMIT 1", [], |r| r.get(0))
                .ok())
        })
    }

    pub fn count_journal(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM journal", [], |r| r.get(0))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_query_filters_by_actor() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_journal(&JournalEntry {
                journal_id: JournalId::new(),
                canonical_event_id: Some(CanonicalEventId::from("evt_a".to_string())),
                ts: "2026-02-15T09:00:00.000Z".into(),
                actor: "ui".into(),
                change_type: "created".into(),
                patch_json: "{}".into(),
                reason: None,
            })
            .unwrap();
        store
            .append_journal(&JournalEntry {
                journal_id: JournalId::new(),
                canonical_event_id: Some(CanonicalEventId::from("evt_b".to_string())),
                ts: "2026-02-15T09:01:00.000Z".into(),
                actor: "system".into(),
                change_type: "created".into(),
                patch_json: "{}".into(),
                reason: None,
            })
            .unwrap();

        let filtered = store
            .query_journal(&JournalFilter {
                actor: Some("ui".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].actor, "ui");
    }
}
