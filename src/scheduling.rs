//! Scheduling sessions & tentative holds (spec §4.7).
//!
//! A session records candidate intervals with scores and explanations and
//! walks `open -> candidates_ready -> {committed | cancelled | expired}`.
//! Candidate generation calls through to [`crate::availability`]; the
//! ranking strategy itself is pluggable via [`CandidateEnumerator`], the
//! same way provider I/O is pluggable elsewhere in this crate.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::availability::Availability;
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::ids::{AccountId, HoldId, SessionId};
use crate::model::session::{Candidate, Hold, HoldState, SchedulingSession, SessionStatus};
use crate::timeutil::{now_rfc3339, parse_instant};

/// Turns a window's availability into ranked candidate slots of a fixed
/// duration. A separate seam from the availability engine itself because
/// ranking strategy (earliest-first, score by time-of-day fit, ...) is a
/// product decision, not a correctness one.
pub trait CandidateEnumerator: Send + Sync {
    fn enumerate(&self, availability: &Availability, duration: Duration, max_candidates: usize) -> Vec<Candidate>;
}

/// Slices each free interval into back-to-back `duration`-sized candidates
/// starting at the interval's earliest point, scoring earlier starts
/// higher. Simple and deterministic; good enough as the shipped default.
pub struct GreedyEarliestEnumerator;

impl CandidateEnumerator for GreedyEarliestEnumerator {
    fn enumerate(&self, availability: &Availability, duration: Duration, max_candidates: usize) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for free in &availability.free_intervals {
            let mut cursor = free.start;
            while cursor + duration <= free.end && candidates.len() < max_candidates {
                let end = cursor + duration;
                candidates.push(Candidate {
                    start: cursor.to_rfc3339(),
                    end: end.to_rfc3339(),
                    score: 1.0 / (1.0 + candidates.len() as f64),
                    explanation: format!("slot {} in a free window of {} minutes", candidates.len() + 1, (free.end - free.start).num_minutes()),
                });
                cursor = end;
            }
            if candidates.len() >= max_candidates {
                break;
            }
        }
        candidates
    }
}

pub struct SchedulingEngine {
    coordinator: Arc<Coordinator>,
    enumerator: Arc<dyn CandidateEnumerator>,
    session_ttl: Duration,
}

impl SchedulingEngine {
    pub fn new(coordinator: Arc<Coordinator>, enumerator: Arc<dyn CandidateEnumerator>, session_ttl_hours: i64) -> Self {
        Self { coordinator, enumerator, session_ttl: Duration::hours(session_ttl_hours) }
    }

    pub fn open_session(&self) -> Result<SessionId> {
        let session_id = SessionId::new();
        self.coordinator.store.insert_session(&session_id, SessionStatus::Open, &now_rfc3339())?;
        Ok(session_id)
    }

    /// Computes availability over the window and replaces the session's
    /// candidate list, moving it to `candidates_ready`. Legal from `open`
    /// or `candidates_ready` (re-running search replaces candidates, but
    /// any holds against the old list are left as-is for the caller to
    /// reconcile).
    pub fn generate_candidates(
        &self,
        session_id: &SessionId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        duration: Duration,
        accounts: Option<&[AccountId]>,
        max_candidates: usize,
    ) -> Result<Vec<Candidate>> {
        let session = self.load_active_session(session_id)?;
        if session.status.is_terminal() {
            return Err(Error::invariant(format!("session {session_id} is terminal")));
        }
        let availability = self.coordinator.compute_availability(window_start, window_end, accounts)?;
        let candidates = self.enumerator.enumerate(&availability, duration, max_candidates);
        self.coordinator.store.set_session_candidates(session_id, &candidates, &now_rfc3339())?;
        Ok(candidates)
    }

    /// Places a tentative hold on one candidate. Only legal while the
    /// session is `candidates_ready`.
    pub fn hold_candidate(&self, session_id: &SessionId, candidate_index: usize) -> Result<HoldId> {
        let session = self.load_active_session(session_id)?;
        if session.status != SessionStatus::CandidatesReady {
            return Err(Error::invariant(format!("session {session_id} is not ready for holds")));
        }
        if candidate_index >= session.candidates.len() {
            return Err(Error::validation(format!("candidate index {candidate_index} out of range")));
        }
        let hold = Hold {
            hold_id: HoldId::new(),
            session_id: session_id.clone(),
            candidate_index,
            state: HoldState::Held,
            expires_at: (Utc::now() + self.session_ttl).to_rfc3339(),
        };
        self.coordinator.store.insert_hold(&hold)?;
        Ok(hold.hold_id)
    }

    /// Commits one hold: marks it `committed`, releases every other `held`
    /// hold on the session, and moves the session to `committed`.
    pub fn commit(&self, session_id: &SessionId, hold_id: &HoldId) -> Result<()> {
        let session = self.load_active_session(session_id)?;
        if session.status != SessionStatus::CandidatesReady {
            return Err(Error::invariant(format!("session {session_id} is not ready to commit")));
        }
        let holds = self.coordinator.store.list_holds_for_session(session_id)?;
        let chosen = holds
            .iter()
            .find(|h| &h.hold_id == hold_id)
            .ok_or_else(|| Error::not_found(format!("hold {hold_id} not found")))?;
        if chosen.state != HoldState::Held {
            return Err(Error::invariant(format!("hold {hold_id} is not held")));
        }
        for hold in &holds {
            let next = if &hold.hold_id == hold_id { HoldState::Committed } else { HoldState::Released };
            if hold.state == HoldState::Held {
                self.coordinator.store.set_hold_state(&hold.hold_id, next)?;
            }
        }
        self.coordinator.store.set_session_status(session_id, SessionStatus::Committed, &now_rfc3339())?;
        Ok(())
    }

    /// Cancels a session outright, releasing every still-held hold.
    pub fn cancel(&self, session_id: &SessionId) -> Result<()> {
        let session = self.load_active_session(session_id)?;
        if session.status.is_terminal() {
            return Err(Error::invariant(format!("session {session_id} is already terminal")));
        }
        self.release_all_held(session_id)?;
        self.coordinator.store.set_session_status(session_id, SessionStatus::Cancelled, &now_rfc3339())?;
        Ok(())
    }

    /// Releases a single hold by hand (e.g. the caller picked a different
    /// candidate). If every hold on the session has since reached a
    /// terminal state, the session lazily expires.
    pub fn release_hold(&self, session_id: &SessionId, hold_id: &HoldId) -> Result<()> {
        let holds = self.coordinator.store.list_holds_for_session(session_id)?;
        let hold = holds
            .iter()
            .find(|h| &h.hold_id == hold_id)
            .ok_or_else(|| Error::not_found(format!("hold {hold_id} not found")))?;
        if hold.state != HoldState::Held {
            return Err(Error::invariant(format!("hold {hold_id} is not held")));
        }
        self.coordinator.store.set_hold_state(hold_id, HoldState::Released)?;
        self.maybe_expire_if_all_holds_terminal(session_id)?;
        Ok(())
    }

    /// Lazy expiry check (spec: "expired (lazy, after ~24h inactivity)").
    /// Callers invoke this on session access rather than relying on a
    /// background sweep; only `candidates_ready` sessions can expire this
    /// way.
    pub fn expire_if_stale(&self, session_id: &SessionId) -> Result<bool> {
        let session = self.load_active_session(session_id)?;
        if session.status != SessionStatus::CandidatesReady {
            return Ok(false);
        }
        let last_activity = parse_instant(&session.last_activity_ts)?;
        if Utc::now() - last_activity < self.session_ttl {
            return Ok(false);
        }
        self.release_all_held(session_id)?;
        self.coordinator.store.set_session_status(session_id, SessionStatus::Expired, &now_rfc3339())?;
        Ok(true)
    }

    fn release_all_held(&self, session_id: &SessionId) -> Result<()> {
        for hold in self.coordinator.store.list_holds_for_session(session_id)? {
            if hold.state == HoldState::Held {
                self.coordinator.store.set_hold_state(&hold.hold_id, HoldState::Released)?;
            }
        }
        Ok(())
    }

    /// "When all holds for a session reach terminal state, the session is
    /// automatically set to expired (only from candidates_ready)."
    fn maybe_expire_if_all_holds_terminal(&self, session_id: &SessionId) -> Result<()> {
        let session = self.load_active_session(session_id)?;
        if session.status != SessionStatus::CandidatesReady {
            return Ok(());
        }
        let holds = self.coordinator.store.list_holds_for_session(session_id)?;
        if !holds.is_empty() && holds.iter().all(|h| h.state.is_terminal()) {
            self.coordinator.store.set_session_status(session_id, SessionStatus::Expired, &now_rfc3339())?;
        }
        Ok(())
    }

    fn load_active_session(&self, session_id: &SessionId) -> Result<SchedulingSession> {
        self.coordinator
            .store
            .get_session(session_id)?
            .ok_or_else(|| Error::not_found(format!("session {session_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::FreeInterval;
    use crate::queue::Queues;
    use crate::store::Store;

    fn engine() -> SchedulingEngine {
        let coordinator = Arc::new(Coordinator::new(Store::open_in_memory().unwrap(), Queues::default()));
        SchedulingEngine::new(coordinator, Arc::new(GreedyEarliestEnumerator), 24)
    }

    fn sample_availability() -> Availability {
        let start: DateTime<Utc> = "2026-02-16T09:00:00Z".parse().unwrap();
        Availability {
            busy_intervals: vec![],
            free_intervals: vec![FreeInterval { start, end: start + Duration::hours(2) }],
        }
    }

    #[test]
    fn greedy_enumerator_slices_free_interval_into_candidates() {
        let candidates = GreedyEarliestEnumerator.enumerate(&sample_availability(), Duration::minutes(30), 10);
        assert_eq!(candidates.len(), 4);
        assert!(candidates[0].score > candidates[1].score);
    }

    #[test]
    fn commit_releases_other_holds_and_closes_session() {
        let engine = engine();
        let session_id = engine.open_session().unwrap();
        let candidates = vec![
            Candidate { start: "2026-02-16T09:00:00Z".into(), end: "2026-02-16T09:30:00Z".into(), score: 1.0, explanation: "a".into() },
            Candidate { start: "2026-02-16T10:00:00Z".into(), end: "2026-02-16T10:30:00Z".into(), score: 0.5, explanation: "b".into() },
        ];
        engine.coordinator.store.set_session_candidates(&session_id, &candidates, &now_rfc3339()).unwrap();

        let hold_a = engine.hold_candidate(&session_id, 0).unwrap();
        let hold_b = engine.hold_candidate(&session_id, 1).unwrap();
        engine.commit(&session_id, &hold_a).unwrap();

        let session = engine.coordinator.store.get_session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Committed);
        let holds = engine.coordinator.store.list_holds_for_session(&session_id).unwrap();
        let a = holds.iter().find(|h| h.hold_id == hold_a).unwrap();
        let b = holds.iter().find(|h| h.hold_id == hold_b).unwrap();
        assert_eq!(a.state, HoldState::Committed);
        assert_eq!(b.state, HoldState::Released);
    }

    #[test]
    fn cancel_releases_all_held_holds() {
        let engine = engine();
        let session_id = engine.open_session().unwrap();
        let candidates = vec![Candidate { start: "2026-02-16T09:00:00Z".into(), end: "2026-02-16T09:30:00Z".into(), score: 1.0, explanation: "a".into() }];
        engine.coordinator.store.set_session_candidates(&session_id, &candidates, &now_rfc3339()).unwrap();
        let hold_id = engine.hold_candidate(&session_id, 0).unwrap();

        engine.cancel(&session_id).unwrap();

        let session = engine.coordinator.store.get_session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
        let holds = engine.coordinator.store.list_holds_for_session(&session_id).unwrap();
        assert_eq!(holds.iter().find(|h| h.hold_id == hold_id).unwrap().state, HoldState::Released);
    }

    #[test]
    fn releasing_last_held_hold_auto_expires_session() {
        let engine = engine();
        let session_id = engine.open_session().unwrap();
        let candidates = vec![Candidate { start: "2026-02-16T09:00:00Z".into(), end: "2026-02-16T09:30:00Z".into(), score: 1.0, explanation: "a".into() }];
        engine.coordinator.store.set_session_candidates(&session_id, &candidates, &now_rfc3339()).unwrap();
        let hold_id = engine.hold_candidate(&session_id, 0).unwrap();

        engine.release_hold(&session_id, &hold_id).unwrap();

        let session = engine.coordinator.store.get_session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Expired);
    }
}
