//! Scheduling sessions & tentative holds storage (spec §4.7).

use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::ids::{HoldId, SessionId};
use crate::model::session::{Candidate, Hold, HoldState, SchedulingSession, SessionStatus};

use super::Store;

fn row_to_hold(row: &Row) -> rusqlite::Result<Hold> {
    let state: String = row.get("state")?;
    Ok(Hold {
        hold_id: HoldId::parse(row.get::<_, String>("hold_id")?),
        session_id: SessionId::parse(row.get::<_, String>("session_id")?),
        candidate_index: row.get::<_, i64>("candidate_index")? as usize,
        state: match state.as_str() {
            "committed" => HoldState::Committed,
            "released" => HoldState::Released,
            "expired" => HoldState::Expired,
            _ => HoldState::Held,
        },
        expires_at: row.get("expires_at")?,
    })
}

impl Store {
    pub fn insert_session(&self, session_id: &SessionId, status: SessionStatus, ts: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scheduling_sessions (session_id, status, created_at, updated_at) VALUES (?1,?2,?3,?3)",
                params![session_id.as_str(), status.as_str(), ts],
            )?;
            Ok(())
        })
    }

    pub fn set_session_candidates(&self, session_id: &SessionId, candidates: &[Candidate], ts: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM candidates WHERE session_id = ?1", params![session_id.as_str()])?;
            for (i, c) in candidates.iter().enumerate() {
                tx.execute(
                    "INSERT INTO candidates (session_id, candidate_index, start_ts, end_ts, score, explanation) VALUES (?1,?2,?3,?4,?5,?6)",
                    params![session_id.as_str(), i as i64, c.start, c.end, c.score, c.explanation],
                )?;
            }
            tx.execute(
                "UPDATE scheduling_sessions SET status = ?2, updated_at = ?3 WHERE session_id = ?1",
                params![session_id.as_str(), SessionStatus::CandidatesReady.as_str(), ts],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Option<SchedulingSession>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT status, updated_at FROM scheduling_sessions WHERE session_id = ?1",
                    params![session_id.as_str()],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()?;
            let Some((status, updated_at)) = row else { return Ok(None) };
            let mut stmt = conn.prepare(
                "SELECT start_ts, end_ts, score, explanation FROM candidates WHERE session_id = ?1 ORDER BY candidate_index ASC",
            )?;
            let candidates = stmt
                .query_map(params![session_id.as_str()], |r| {
                    Ok(Candidate {
                        start: r.get(0)?,
                        end: r.get(1)?,
                        score: r.get(2)?,
                        explanation: r.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;
            Ok(Some(SchedulingSession {
                session_id: session_id.clone(),
                status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Open),
                candidates,
                last_activity_ts: updated_at,
            }))
        })
    }

    pub fn set_session_status(&self, session_id: &SessionId, status: SessionStatus, ts: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE scheduling_sessions SET status = ?2, updated_at = ?3 WHERE session_id = ?1",
                params![session_id.as_str(), status.as_str(), ts],
            )?;
            Ok(())
        })
    }

    pub fn insert_hold(&self, hold: &Hold) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO holds (hold_id, session_id, candidate_index, state, expires_at) VALUES (?1,?2,?3,?4,?5)",
                params![
                    hold.hold_id.as_str(),
                    hold.session_id.as_str(),
                    hold.candidate_index as i64,
                    hold.state.as_str(),
                    hold.expires_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_holds_for_session(&self, session_id: &SessionId) -> Result<Vec<Hold>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT hold_id, session_id, candidate_index, state, expires_at FROM holds WHERE session_id = ?1",
            )?;
            let rows = stmt.query_map(params![session_id.as_str()], row_to_hold)?.collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
    }

    pub fn set_hold_state(&self, hold_id: &HoldId, state: HoldState) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE holds SET state = ?2 WHERE hold_id = ?1",
                params![hold_id.as_str(), state.as_str()],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_candidates_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let session_id = SessionId::new();
        store.insert_session(&session_id, SessionStatus::Open, "2026-02-15T00:00:00Z").unwrap();
        let candidates = vec![Candidate {
            start: "2026-02-16T10:00:00Z".into(),
            end: "2026-02-16T10:30:00Z".into(),
            score: 0.9,
            explanation: "best fit".into(),
        }];
        store.set_session_candidates(&session_id, &candidates, "2026-02-15T00:01:00Z").unwrap();
        let session = store.get_session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::CandidatesReady);
        assert_eq!(session.candidates.len(), 1);
    }
}
