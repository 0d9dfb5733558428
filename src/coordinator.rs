//! The per-user coordinator (spec §4.3): the single-writer entry point that
//! owns every mutation to canonical state and exposes the full RPC surface
//! (spec §6.3). All store access for a given user goes through one
//! `Coordinator` instance; serialization comes from `Store`'s internal
//! mutex, so concurrent callers observe a total order of mutations.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::availability::{compute_availability, Availability};
use crate::error::{Error, Result};
use crate::hash::fingerprint;
use crate::ids::{AccountId, CalendarId, CanonicalEventId, ConstraintId, JournalId, PolicyId};
use crate::model::constraint::{validate_constraint, Constraint, ConstraintKind};
use crate::model::event::{CanonicalEvent, EventStatus, Source, Transparency};
use crate::model::journal::JournalEntry;
use crate::model::mirror::{Mirror, MirrorState};
use crate::model::policy::{CalendarKind, DetailLevel, Policy, PolicyEdge, PolicyWithEdges};
use crate::queue::{idempotency_key, ProjectedEventBody, ProjectedEventTime, Queues, WriteMessage};
use crate::store::journal::JournalFilter as StoreJournalFilter;
use crate::store::Store;
use crate::tagging::{classify, Classification};
use crate::timeutil::now_rfc3339;

pub struct Coordinator {
    pub store: Store,
    pub queues: Queues,
}

// ---------------------------------------------------------------------
// applyProviderDelta
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEventPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_ts: Option<String>,
    pub end_ts: Option<String>,
    pub timezone: Option<String>,
    pub all_day: Option<bool>,
    pub status: Option<String>,
    pub visibility: Option<String>,
    pub transparency: Option<String>,
    pub recurrence_rule: Option<String>,
    pub extended_properties_private: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderDelta {
    Created { origin_event_id: String, event: Option<ProviderEventPayload> },
    Updated { origin_event_id: String, event: Option<ProviderEventPayload> },
    Deleted { origin_event_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaError {
    pub origin_event_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyDeltaResult {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub mirrors_enqueued: u64,
    pub errors: Vec<DeltaError>,
}

impl Coordinator {
    pub fn new(store: Store, queues: Queues) -> Self {
        Self { store, queues }
    }

    pub fn apply_provider_delta(&self, origin_account_id: &AccountId, deltas: Vec<ProviderDelta>) -> Result<ApplyDeltaResult> {
        let mut result = ApplyDeltaResult::default();
        for delta in deltas {
            if let Err(reason) = self.apply_one_delta(origin_account_id, delta.clone(), &mut result) {
                let origin_event_id = match &delta {
                    ProviderDelta::Created { origin_event_id, .. }
                    | ProviderDelta::Updated { origin_event_id, .. }
                    | ProviderDelta::Deleted { origin_event_id } => origin_event_id.clone(),
                };
                result.errors.push(DeltaError {
                    origin_event_id,
                    reason: reason.redacted_message(),
                });
            }
        }
        Ok(result)
    }

    fn apply_one_delta(&self, origin_account_id: &AccountId, delta: ProviderDelta, result: &mut ApplyDeltaResult) -> Result<()> {
        let actor = format!("provider:{origin_account_id}");
        match delta {
            ProviderDelta::Deleted { origin_event_id } => {
                let Some(existing) = self.store.find_canonical_by_origin(origin_account_id, &origin_event_id)? else {
                    return Ok(()); // unknown-event delete is silently ignored
                };
                self.hard_delete_event(&existing, &actor)?;
                result.deleted += 1;
                Ok(())
            }
            ProviderDelta::Created { origin_event_id, event } | ProviderDelta::Updated { origin_event_id, event } => {
                let Some(payload) = event else {
                    return Err(Error::validation("delta missing event payload"));
                };

                if let Classification::ManagedMirror { canonical_event_id, .. } =
                    classify(payload.extended_properties_private.as_ref())
                {
                    // Invariant E: never re-enter a managed mirror as origin.
                    self.reconcile_managed_mirror_drift(&canonical_event_id, origin_account_id, &payload)?;
                    return Ok(());
                }

                let existing = self.store.find_canonical_by_origin(origin_account_id, &origin_event_id)?;
                let now = now_rfc3339();
                match existing {
                    Some(mut event) => {
                        let dedup = matches!(
                            (&payload, &event),
                            (p, e) if p.title.as_deref() == Some(e.title.as_str())
                                && p.start_ts.as_deref() == Some(e.start_ts.as_str())
                                && p.end_ts.as_deref() == Some(e.end_ts.as_str())
                        );
                        apply_payload(&mut event, &payload);
                        event.version += 1;
                        event.updated_at = now.clone();
                        self.store.update_canonical_event(&event)?;
                        self.journal(
                            Some(&event.canonical_event_id),
                            &actor,
                            "updated",
                            &serde_json::json!({"dedup": dedup}).to_string(),
                            None,
                        )?;
                        result.updated += 1;
                        result.mirrors_enqueued += self.project_and_enqueue(&event)?;
                        Ok(())
                    }
                    None => {
                        let rebind_candidate = self.find_orphaned_rebind_candidate(&origin_event_id, origin_account_id)?;
                        let event = match rebind_candidate {
                            Some(mut event) => {
                                let legacy_from = event.origin_account_id.clone();
                                event.origin_account_id = origin_account_id.clone();
                                apply_payload(&mut event, &payload);
                                event.version += 1;
                                event.updated_at = now.clone();
                                self.store.update_canonical_event(&event)?;
                                self.journal(
                                    Some(&event.canonical_event_id),
                                    &actor,
                                    "updated",
                                    &serde_json::json!({"legacy_rebind_from": legacy_from.as_str()}).to_string(),
                                    None,
                                )?;
                                event
                            }
                            None => {
                                let event = new_event_from_payload(origin_account_id.clone(), origin_event_id.clone(), &payload, Source::Provider, &now);
                                self.store.insert_canonical_event(&event)?;
                                self.journal(Some(&event.canonical_event_id), &actor, "created", "{}", None)?;
                                event
                            }
                        };
                        result.created += 1;
                        result.mirrors_enqueued += self.project_and_enqueue(&event)?;
                        Ok(())
                    }
                }
            }
        }
    }

    fn find_orphaned_rebind_candidate(&self, origin_event_id: &str, excluding_account: &AccountId) -> Result<Option<CanonicalEvent>> {
        for event in self.store.list_all_events()? {
            if event.origin_event_id == origin_event_id && &event.origin_account_id != excluding_account {
                let calendars = self.store.list_calendars_for_account(&event.origin_account_id)?;
                if calendars.is_empty() {
                    return Ok(Some(event));
                }
            }
        }
        Ok(None)
    }

    fn reconcile_managed_mirror_drift(&self, canonical_event_id: &CanonicalEventId, target_account_id: &AccountId, payload: &ProviderEventPayload) -> Result<()> {
        let Some(mirror) = self.store.get_mirror(canonical_event_id, target_account_id)? else {
            return Ok(());
        };
        let Some(event) = self.store.get_canonical_event(canonical_event_id)? else {
            return Ok(());
        };
        let Some(edge) = self.edge_for(&event.origin_account_id, target_account_id)? else {
            return Ok(());
        };
        let expected_hash = fingerprint(&event, edge.detail_level, edge.calendar_kind)?;
        let observed_matches = payload.title.as_deref() == Some(display_title(&event, edge.detail_level).as_str());
        if mirror.last_projected_hash != expected_hash || !observed_matches {
            self.enqueue_upsert_mirror(&event, target_account_id, &mirror.target_calendar_id, edge.detail_level, edge.calendar_kind, &expected_hash)?;
        }
        Ok(())
    }

    fn hard_delete_event(&self, event: &CanonicalEvent, actor: &str) -> Result<()> {
        let mirrors = self.store.list_mirrors_for_event(&event.canonical_event_id)?;
        for mirror in &mirrors {
            if let Some(provider_event_id) = &mirror.provider_event_id {
                self.queues.write.push(WriteMessage::DeleteMirror {
                    canonical_event_id: event.canonical_event_id.clone(),
                    target_account_id: mirror.target_account_id.clone(),
                    provider_event_id: provider_event_id.clone(),
                    idempotency_key: idempotency_key(&event.canonical_event_id, &mirror.target_account_id, &mirror.last_projected_hash),
                });
            }
        }
        self.store.delete_mirrors_for_event(&event.canonical_event_id)?;
        self.store.delete_canonical_event(&event.canonical_event_id)?;
        self.journal(Some(&event.canonical_event_id), actor, "deleted", "{}", None)?;
        Ok(())
    }

    fn edge_for(&self, from: &AccountId, to: &AccountId) -> Result<Option<PolicyEdge>> {
        for edge in self.store.outgoing_edges_for_account(from)? {
            if &edge.to_account_id == to {
                return Ok(Some(edge));
            }
        }
        Ok(None)
    }

    /// Projects `event` across every outgoing edge and enqueues `UPSERT_MIRROR`
    /// when the hash differs (Invariant C write-skipping). Returns the number
    /// enqueued.
    fn project_and_enqueue(&self, event: &CanonicalEvent) -> Result<u64> {
        let mut enqueued = 0;
        for edge in self.store.outgoing_edges_for_account(&event.origin_account_id)? {
            let new_hash = fingerprint(event, edge.detail_level, edge.calendar_kind)?;
            let existing = self.store.get_mirror(&event.canonical_event_id, &edge.to_account_id)?;
            let unchanged = existing.as_ref().map(|m| m.last_projected_hash == new_hash).unwrap_or(false);
            if unchanged {
                continue;
            }
            let target_calendar_id = existing
                .as_ref()
                .map(|m| m.target_calendar_id.clone())
                .unwrap_or_else(CalendarId::new);
            self.enqueue_upsert_mirror(event, &edge.to_account_id, &target_calendar_id, edge.detail_level, edge.calendar_kind, &new_hash)?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    fn enqueue_upsert_mirror(
        &self,
        event: &CanonicalEvent,
        target_account_id: &AccountId,
        target_calendar_id: &CalendarId,
        detail_level: DetailLevel,
        calendar_kind: CalendarKind,
        new_hash: &str,
    ) -> Result<()> {
        self.store.upsert_mirror(&Mirror {
            canonical_event_id: event.canonical_event_id.clone(),
            target_account_id: target_account_id.clone(),
            target_calendar_id: target_calendar_id.clone(),
            provider_event_id: None,
            last_projected_hash: new_hash.to_string(),
            last_write_ts: None,
            state: MirrorState::Pending,
            error_message: None,
        })?;
        let projected = crate::hash::project(event, detail_level, calendar_kind)?;
        self.queues.write.push(WriteMessage::UpsertMirror {
            canonical_event_id: event.canonical_event_id.clone(),
            target_account_id: target_account_id.clone(),
            target_calendar_id: target_calendar_id.as_str().to_string(),
            projected_payload: ProjectedEventBody {
                summary: projected.summary,
                description: projected.description,
                location: projected.location,
                start: ProjectedEventTime {
                    date_time: projected.start.date_time,
                    date: projected.start.date,
                    time_zone: projected.start.time_zone,
                },
                end: ProjectedEventTime {
                    date_time: projected.end.date_time,
                    date: projected.end.date,
                    time_zone: projected.end.time_zone,
                },
                transparency: projected.transparency,
                extended_properties_private: projected.extended_properties_private,
            },
            idempotency_key: idempotency_key(&event.canonical_event_id, target_account_id, new_hash),
        });
        Ok(())
    }

    fn journal(&self, canonical_event_id: Option<&CanonicalEventId>, actor: &str, change_type: &str, patch_json: &str, reason: Option<&str>) -> Result<()> {
        self.store.append_journal(&JournalEntry {
            journal_id: JournalId::new(),
            canonical_event_id: canonical_event_id.cloned(),
            ts: now_rfc3339(),
            actor: actor.to_string(),
            change_type: change_type.to_string(),
            patch_json: patch_json.to_string(),
            reason: reason.map(|s| s.to_string()),
        })
    }

    // -------------------------------------------------------------
    // upsertCanonicalEvent / deleteCanonicalEvent
    // -------------------------------------------------------------

    pub fn upsert_canonical_event(&self, partial: UpsertEventInput, actor: &str) -> Result<CanonicalEvent> {
        let now = now_rfc3339();
        if let Some(id) = &partial.canonical_event_id {
            if let Some(mut existing) = self.store.get_canonical_event(id)? {
                apply_upsert_input(&mut existing, &partial);
                existing.version += 1;
                existing.updated_at = now;
                self.store.update_canonical_event(&existing)?;
                self.journal(Some(&existing.canonical_event_id), actor, "updated", "{}", None)?;
                self.project_and_enqueue(&existing)?;
                return Ok(existing);
            }
        }
        let origin_account_id = partial.origin_account_id.clone().unwrap_or_else(AccountId::internal);
        let origin_event_id = partial.origin_event_id.clone().unwrap_or_else(|| CanonicalEventId::new().as_str().to_string());
        let event = CanonicalEvent {
            canonical_event_id: partial.canonical_event_id.clone().unwrap_or_else(CanonicalEventId::new),
            origin_account_id,
            origin_event_id,
            title: partial.title.unwrap_or_default(),
            description: partial.description.unwrap_or_default(),
            location: partial.location.unwrap_or_default(),
            start_ts: partial.start_ts.unwrap_or_default(),
            end_ts: partial.end_ts.unwrap_or_default(),
            timezone: partial.timezone.unwrap_or_else(|| "UTC".to_string()),
            all_day: partial.all_day.unwrap_or(false),
            status: partial.status.and_then(|s| EventStatus::parse(&s)).unwrap_or(EventStatus::Confirmed),
            visibility: partial.visibility.unwrap_or_else(|| "default".to_string()),
            transparency: partial.transparency.and_then(|t| Transparency::parse(&t)).unwrap_or(Transparency::Opaque),
            recurrence_rule: partial.recurrence_rule,
            source: partial.source.and_then(|s| Source::parse(&s)).unwrap_or(Source::Api),
            version: 1,
            created_at: now.clone(),
            updated_at: now,
            constraint_id: None,
        };
        self.store.insert_canonical_event(&event)?;
        self.journal(Some(&event.canonical_event_id), actor, "created", "{}", None)?;
        self.project_and_enqueue(&event)?;
        Ok(event)
    }

    pub fn delete_canonical_event(&self, id: &CanonicalEventId, actor: &str) -> Result<bool> {
        let Some(event) = self.store.get_canonical_event(id)? else {
            return Ok(false);
        };
        self.hard_delete_event(&event, actor)?;
        Ok(true)
    }

    // -------------------------------------------------------------
    // listCanonicalEvents / getCanonicalEvent / findCanonicalByOrigin
    // -------------------------------------------------------------

    pub fn list_canonical_events(&self, query: &ListEventsQuery) -> Result<ListEventsResult> {
        let time_min = query.time_min.clone().unwrap_or_else(|| "0000-01-01T00:00:00Z".to_string());
        let time_max = query.time_max.clone().unwrap_or_else(|| "9999-12-31T23:59:59Z".to_string());
        let mut events = self.store.list_events_in_window(&time_min, &time_max)?;

        events.retain(|e| {
            query.origin_account_id.as_ref().map(|a| &e.origin_account_id == a).unwrap_or(true)
                && query.origin_event_id.as_ref().map(|o| &e.origin_event_id == o).unwrap_or(true)
                && query.updated_after.as_ref().map(|u| &e.updated_at > u).unwrap_or(true)
                && query.source.as_ref().map(|s| e.source.as_str() == s.as_str()).unwrap_or(true)
        });

        if let Some(cursor) = &query.cursor {
            if let Some((cursor_start, cursor_id)) = decode_cursor(cursor) {
                events.retain(|e| (e.start_ts.as_str(), e.canonical_event_id.as_str()) > (cursor_start.as_str(), cursor_id.as_str()));
            }
        }

        let limit = query.limit.unwrap_or(100).min(500) as usize;
        let has_more = events.len() > limit;
        events.truncate(limit);
        let next_cursor = if has_more {
            events.last().map(|e| encode_cursor(&e.start_ts, e.canonical_event_id.as_str()))
        } else {
            None
        };
        Ok(ListEventsResult { events, next_cursor })
    }

    pub fn get_canonical_event(&self, id: &CanonicalEventId) -> Result<Option<(CanonicalEvent, Vec<Mirror>)>> {
        let Some(event) = self.store.get_canonical_event(id)? else {
            return Ok(None);
        };
        let mirrors = self.store.list_mirrors_for_event(id)?;
        Ok(Some((event, mirrors)))
    }

    pub fn find_canonical_by_origin(&self, origin_account_id: &AccountId, origin_event_id: &str) -> Result<Option<CanonicalEvent>> {
        self.store.find_canonical_by_origin(origin_account_id, origin_event_id)
    }

    // -------------------------------------------------------------
    // queryJournal
    // -------------------------------------------------------------

    pub fn query_journal(&self, filter: StoreJournalFilter) -> Result<Vec<JournalEntry>> {
        self.store.query_journal(&filter)
    }

    pub fn log_reconcile_discrepancy(&self, canonical_event_id: Option<&CanonicalEventId>, subtype: &str, patch_json: &str, reason: &str) -> Result<()> {
        self.journal(canonical_event_id, "reconcile", &format!("reconcile:{subtype}"), patch_json, Some(reason))
    }

    // -------------------------------------------------------------
    // recomputeProjections
    // -------------------------------------------------------------

    pub fn recompute_projections(&self, canonical_event_id: Option<&CanonicalEventId>, force_requeue_non_active: bool) -> Result<u64> {
        let events = match canonical_event_id {
            Some(id) => self.store.get_canonical_event(id)?.into_iter().collect::<Vec<_>>(),
            None => self.store.list_all_events()?,
        };
        let mut count = 0;
        for event in events {
            for edge in self.store.outgoing_edges_for_account(&event.origin_account_id)? {
                let new_hash = fingerprint(&event, edge.detail_level, edge.calendar_kind)?;
                let existing = self.store.get_mirror(&event.canonical_event_id, &edge.to_account_id)?;
                let hash_changed = existing.as_ref().map(|m| m.last_projected_hash != new_hash).unwrap_or(true);
                let stuck = force_requeue_non_active && existing.as_ref().map(|m| m.state != MirrorState::Active).unwrap_or(false);
                if hash_changed || stuck {
                    let target_calendar_id = existing.as_ref().map(|m| m.target_calendar_id.clone()).unwrap_or_else(CalendarId::new);
                    self.enqueue_upsert_mirror(&event, &edge.to_account_id, &target_calendar_id, edge.detail_level, edge.calendar_kind, &new_hash)?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    // -------------------------------------------------------------
    // computeAvailability
    // -------------------------------------------------------------

    pub fn compute_availability(&self, window_start: chrono::DateTime<chrono::Utc>, window_end: chrono::DateTime<chrono::Utc>, accounts: Option<&[AccountId]>) -> Result<Availability> {
        let events = self.store.list_events_in_window(&window_start.to_rfc3339(), &window_end.to_rfc3339())?;
        let constraints = self.store.list_constraints(None)?;
        compute_availability(&events, &constraints, window_start, window_end, accounts)
    }

    // -------------------------------------------------------------
    // getSyncHealth
    // -------------------------------------------------------------

    pub fn get_sync_health(&self) -> Result<SyncHealth> {
        Ok(SyncHealth {
            total_events: self.store.count_canonical_events()?,
            total_mirrors: self.store.count_mirrors_total()?,
            total_journal: self.store.count_journal()?,
            pending_mirrors: self.store.count_mirrors_by_state(MirrorState::Pending)?,
            error_mirrors: self.store.count_mirrors_by_state(MirrorState::Error)?,
            last_journal_ts: self.store.latest_journal_ts()?,
        })
    }

    pub fn get_active_mirrors(&self) -> Result<Vec<Mirror>> {
        self.store.get_active_mirrors()
    }

    // -------------------------------------------------------------
    // Policy compiler & edge registry (spec §4.2)
    // -------------------------------------------------------------

    pub fn create_policy(&self, name: &str) -> Result<PolicyId> {
        let policy = Policy {
            policy_id: PolicyId::new(),
            name: name.to_string(),
            is_default: false,
        };
        self.store.insert_policy(&policy)?;
        Ok(policy.policy_id)
    }

    pub fn list_policies(&self) -> Result<Vec<Policy>> {
        self.store.list_policies()
    }

    pub fn get_policy(&self, id: &PolicyId) -> Result<Option<PolicyWithEdges>> {
        self.store.get_policy_with_edges(id)
    }

    pub fn get_policy_edges(&self, id: &PolicyId) -> Result<Vec<PolicyEdge>> {
        self.store.get_policy_edges(id)
    }

    pub fn set_policy_edges(&self, policy_id: &PolicyId, edges: Vec<PolicyEdge>) -> Result<()> {
        if self.store.get_policy_with_edges(policy_id)?.is_none() {
            return Err(Error::not_found(format!("policy {policy_id} not found")));
        }
        for edge in &edges {
            edge.validate()?;
        }
        self.store.replace_policy_edges(policy_id, &edges)?;
        self.recompute_projections(None, false)?;
        Ok(())
    }

    /// Idempotent: creates one default policy if none exists, then for
    /// every unordered pair of distinct accounts ensures a bidirectional
    /// edge exists at `(BUSY, BUSY_OVERLAY)`, preserving custom levels
    /// already present (spec §4.2).
    pub fn ensure_default_policy(&self, account_ids: &[AccountId]) -> Result<PolicyId> {
        let policy = match self.store.get_default_policy()? {
            Some(p) => p,
            None => {
                let p = Policy {
                    policy_id: PolicyId::new(),
                    name: "default".to_string(),
                    is_default: true,
                };
                self.store.insert_policy(&p)?;
                p
            }
        };
        if account_ids.len() < 2 {
            return Ok(policy.policy_id);
        }
        for i in 0..account_ids.len() {
            for j in (i + 1)..account_ids.len() {
                let a = &account_ids[i];
                let b = &account_ids[j];
                self.store.upsert_policy_edge(
                    &policy.policy_id,
                    &PolicyEdge {
                        from_account_id: a.clone(),
                        to_account_id: b.clone(),
                        detail_level: DetailLevel::Busy,
                        calendar_kind: CalendarKind::BusyOverlay,
                    },
                )?;
                self.store.upsert_policy_edge(
                    &policy.policy_id,
                    &PolicyEdge {
                        from_account_id: b.clone(),
                        to_account_id: a.clone(),
                        detail_level: DetailLevel::Busy,
                        calendar_kind: CalendarKind::BusyOverlay,
                    },
                )?;
            }
        }
        Ok(policy.policy_id)
    }

    // -------------------------------------------------------------
    // unlinkAccount
    // -------------------------------------------------------------

    pub fn unlink_account(&self, account_id: &AccountId) -> Result<UnlinkResult> {
        let owned_events = self.store.delete_canonical_events_by_account(account_id)?;
        let mut events_deleted = 0;
        for event in &owned_events {
            let mirrors = self.store.list_mirrors_for_event(&event.canonical_event_id)?;
            for mirror in &mirrors {
                if let Some(provider_event_id) = &mirror.provider_event_id {
                    self.queues.write.push(WriteMessage::DeleteMirror {
                        canonical_event_id: event.canonical_event_id.clone(),
                        target_account_id: mirror.target_account_id.clone(),
                        provider_event_id: provider_event_id.clone(),
                        idempotency_key: idempotency_key(&event.canonical_event_id, &mirror.target_account_id, &mirror.last_projected_hash),
                    });
                }
            }
            self.store.delete_mirrors_for_event(&event.canonical_event_id)?;
            self.journal(Some(&event.canonical_event_id), "system", "deleted", &serde_json::json!({"reason": "account_unlinked"}).to_string(), None)?;
            events_deleted += 1;
        }
        self.store.delete_mirrors_for_account(account_id)?;
        self.store.delete_policy_edges_for_account(account_id)?;
        self.store.delete_calendars_for_account(account_id)?;
        self.journal(None, "system", "account_unlinked", &serde_json::json!({"account_id": account_id.as_str()}).to_string(), None)?;
        Ok(UnlinkResult { events_deleted })
    }

    // -------------------------------------------------------------
    // Constraint registry (spec §4.4)
    // -------------------------------------------------------------

    pub fn add_constraint(&self, kind: ConstraintKind, config: serde_json::Value, active_from: Option<String>, active_to: Option<String>) -> Result<ConstraintId> {
        validate_constraint(kind, &config, &active_from, &active_to)?;
        let constraint = Constraint {
            constraint_id: ConstraintId::new(),
            kind,
            config: config.clone(),
            active_from: active_from.clone(),
            active_to: active_to.clone(),
        };
        self.store.insert_constraint(&constraint)?;

        if kind == ConstraintKind::Trip {
            let block_policy = config.get("block_policy").and_then(|v| v.as_str()).unwrap_or("BUSY");
            let name = config.get("name").and_then(|v| v.as_str()).unwrap_or("Trip");
            let timezone = config.get("timezone").and_then(|v| v.as_str()).unwrap_or("UTC");
            let title = if block_policy == "BUSY" { "Busy".to_string() } else { name.to_string() };
            let now = now_rfc3339();
            let derived = CanonicalEvent {
                canonical_event_id: CanonicalEventId::new(),
                origin_account_id: AccountId::internal(),
                origin_event_id: format!("constraint:{}", constraint.constraint_id),
                title,
                description: String::new(),
                location: String::new(),
                start_ts: active_from.clone().unwrap_or_default(),
                end_ts: active_to.clone().unwrap_or_default(),
                timezone: timezone.to_string(),
                all_day: false,
                status: EventStatus::Confirmed,
                visibility: "default".to_string(),
                transparency: Transparency::Opaque,
                recurrence_rule: None,
                source: Source::System,
                version: 1,
                created_at: now.clone(),
                updated_at: now,
                constraint_id: Some(constraint.constraint_id.clone()),
            };
            self.store.insert_canonical_event(&derived)?;
            self.journal(
                Some(&derived.canonical_event_id),
                "system",
                "created",
                &serde_json::json!({"reason": "trip_constraint", "constraint_id": constraint.constraint_id.as_str()}).to_string(),
                None,
            )?;
            self.project_and_enqueue(&derived)?;
        }
        Ok(constraint.constraint_id)
    }

    pub fn delete_constraint(&self, id: &ConstraintId) -> Result<bool> {
        let Some(constraint) = self.store.get_constraint(id)? else {
            return Ok(false);
        };
        if constraint.kind == ConstraintKind::Trip {
            for event in self.store.list_all_events()? {
                if event.constraint_id.as_ref() == Some(id) {
                    let mirrors = self.store.list_mirrors_for_event(&event.canonical_event_id)?;
                    for mirror in &mirrors {
                        if let Some(provider_event_id) = &mirror.provider_event_id {
                            self.queues.write.push(WriteMessage::DeleteMirror {
                                canonical_event_id: event.canonical_event_id.clone(),
                                target_account_id: mirror.target_account_id.clone(),
                                provider_event_id: provider_event_id.clone(),
                                idempotency_key: idempotency_key(&event.canonical_event_id, &mirror.target_account_id, &mirror.last_projected_hash),
                            });
                        }
                    }
                    self.store.delete_mirrors_for_event(&event.canonical_event_id)?;
                    self.store.delete_canonical_event(&event.canonical_event_id)?;
                    self.journal(
                        Some(&event.canonical_event_id),
                        "system",
                        "deleted",
                        &serde_json::json!({"reason": "constraint_deleted"}).to_string(),
                        None,
                    )?;
                }
            }
        }
        self.store.delete_constraint(id)
    }

    pub fn list_constraints(&self, kind: Option<ConstraintKind>) -> Result<Vec<Constraint>> {
        self.store.list_constraints(kind)
    }

    pub fn get_constraint(&self, id: &ConstraintId) -> Result<Option<Constraint>> {
        self.store.get_constraint(id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsertEventInput {
    pub canonical_event_id: Option<CanonicalEventId>,
    pub origin_account_id: Option<AccountId>,
    pub origin_event_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_ts: Option<String>,
    pub end_ts: Option<String>,
    pub timezone: Option<String>,
    pub all_day: Option<bool>,
    pub status: Option<String>,
    pub visibility: Option<String>,
    pub transparency: Option<String>,
    pub recurrence_rule: Option<String>,
    pub source: Option<String>,
}

fn apply_upsert_input(event: &mut CanonicalEvent, input: &UpsertEventInput) {
    macro_rules! set_if_some {
        ($field:ident) => {
            if let Some(v) = input.$field.clone() {
                event.$field = v;
            }
        };
    }
    set_if_some!(title);
    set_if_some!(description);
    set_if_some!(location);
    set_if_some!(start_ts);
    set_if_some!(end_ts);
    set_if_some!(timezone);
    if let Some(v) = input.all_day {
        event.all_day = v;
    }
    if let Some(s) = &input.status {
        if let Some(parsed) = EventStatus::parse(s) {
            event.status = parsed;
        }
    }
    set_if_some!(visibility);
    if let Some(t) = &input.transparency {
        if let Some(parsed) = Transparency::parse(t) {
            event.transparency = parsed;
        }
    }
    if input.recurrence_rule.is_some() {
        event.recurrence_rule = input.recurrence_rule.clone();
    }
}

fn apply_payload(event: &mut CanonicalEvent, payload: &ProviderEventPayload) {
    if let Some(v) = &payload.title {
        event.title = v.clone();
    }
    if let Some(v) = &payload.description {
        event.description = v.clone();
    }
    if let Some(v) = &payload.location {
        event.location = v.clone();
    }
    if let Some(v) = &payload.start_ts {
        event.start_ts = v.clone();
    }
    if let Some(v) = &payload.end_ts {
        event.end_ts = v.clone();
    }
    if let Some(v) = &payload.timezone {
        event.timezone = v.clone();
    }
    if let Some(v) = payload.all_day {
        event.all_day = v;
    }
    if let Some(v) = &payload.status {
        if let Some(parsed) = EventStatus::parse(v) {
            event.status = parsed;
        }
    }
    if let Some(v) = &payload.visibility {
        event.visibility = v.clone();
    }
    if let Some(v) = &payload.transparency {
        if let Some(parsed) = Transparency::parse(v) {
            event.transparency = parsed;
        }
    }
    if payload.recurrence_rule.is_some() {
        event.recurrence_rule = payload.recurrence_rule.clone();
    }
}

fn new_event_from_payload(origin_account_id: AccountId, origin_event_id: String, payload: &ProviderEventPayload, source: Source, now: &str) -> CanonicalEvent {
    CanonicalEvent {
        canonical_event_id: CanonicalEventId::new(),
        origin_account_id,
        origin_event_id,
        title: payload.title.clone().unwrap_or_default(),
        description: payload.description.clone().unwrap_or_default(),
        location: payload.location.clone().unwrap_or_default(),
        start_ts: payload.start_ts.clone().unwrap_or_default(),
        end_ts: payload.end_ts.clone().unwrap_or_default(),
        timezone: payload.timezone.clone().unwrap_or_else(|| "UTC".to_string()),
        all_day: payload.all_day.unwrap_or(false),
        status: payload.status.as_deref().and_then(EventStatus::parse).unwrap_or(EventStatus::Confirmed),
        visibility: payload.visibility.clone().unwrap_or_else(|| "default".to_string()),
        transparency: payload.transparency.as_deref().and_then(Transparency::parse).unwrap_or(Transparency::Opaque),
        recurrence_rule: payload.recurrence_rule.clone(),
        source,
        version: 1,
        created_at: now.to_string(),
        updated_at: now.to_string(),
        constraint_id: None,
    }
}

fn display_title(event: &CanonicalEvent, detail_level: DetailLevel) -> String {
    match detail_level {
        DetailLevel::Busy => "Busy".to_string(),
        _ => event.title.clone(),
    }
}

fn encode_cursor(start_ts: &str, canonical_event_id: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{start_ts}|{canonical_event_id}"))
}

fn decode_cursor(cursor: &str) -> Option<(String, String)> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(cursor).ok()?;
    let s = String::from_utf8(bytes).ok()?;
    let (start, id) = s.split_once('|')?;
    Some((start.to_string(), id.to_string()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListEventsQuery {
    pub time_min: Option<String>,
    pub time_max: Option<String>,
    pub origin_account_id: Option<AccountId>,
    pub origin_event_id: Option<String>,
    pub updated_after: Option<String>,
    pub source: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEventsResult {
    pub events: Vec<CanonicalEvent>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHealth {
    pub total_events: i64,
    pub total_mirrors: i64,
    pub total_journal: i64,
    pub pending_mirrors: i64,
    pub error_mirrors: i64,
    pub last_journal_ts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkResult {
    pub events_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_coordinator() -> Coordinator {
        Coordinator::new(Store::open_in_memory().unwrap(), Queues::default())
    }

    #[test]
    fn hash_skip_scenario() {
        let coordinator = new_coordinator();
        let policy = coordinator.create_policy("default").unwrap();
        coordinator
            .set_policy_edges(
                &policy,
                vec![PolicyEdge {
                    from_account_id: AccountId::from("acc_a"),
                    to_account_id: AccountId::from("acc_b"),
                    detail_level: DetailLevel::Busy,
                    calendar_kind: CalendarKind::BusyOverlay,
                }],
            )
            .unwrap();

        let delta = ProviderDelta::Created {
            origin_event_id: "gcal_1".to_string(),
            event: Some(ProviderEventPayload {
                title: Some("Team Standup".into()),
                start_ts: Some("2026-02-15T09:00:00Z".into()),
                end_ts: Some("2026-02-15T09:30:00Z".into()),
                ..Default::default()
            }),
        };
        let result = coordinator.apply_provider_delta(&AccountId::from("acc_a"), vec![delta]).unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.mirrors_enqueued, 1);
        let msg = coordinator.queues.write.pop().unwrap();
        match msg {
            WriteMessage::UpsertMirror { projected_payload, .. } => {
                assert_eq!(projected_payload.summary, "Busy");
            }
            _ => panic!("expected upsert"),
        }

        let repeat = ProviderDelta::Updated {
            origin_event_id: "gcal_1".to_string(),
            event: Some(ProviderEventPayload {
                title: Some("Team Standup".into()),
                start_ts: Some("2026-02-15T09:00:00Z".into()),
                end_ts: Some("2026-02-15T09:30:00Z".into()),
                ..Default::default()
            }),
        };
        let result2 = coordinator.apply_provider_delta(&AccountId::from("acc_a"), vec![repeat]).unwrap();
        assert_eq!(result2.updated, 1);
        assert_eq!(result2.mirrors_enqueued, 0);
    }

    #[test]
    fn duplicate_created_delta_dedupes_to_one_canonical() {
        let coordinator = new_coordinator();
        let delta = || ProviderDelta::Created {
            origin_event_id: "gcal_x".to_string(),
            event: Some(ProviderEventPayload {
                title: Some("1:1".into()),
                start_ts: Some("2026-02-15T09:00:00Z".into()),
                end_ts: Some("2026-02-15T09:30:00Z".into()),
                ..Default::default()
            }),
        };
        let account = AccountId::from("acc_a");
        coordinator.apply_provider_delta(&account, vec![delta()]).unwrap();
        let result = coordinator.apply_provider_delta(&account, vec![delta()]).unwrap();
        assert_eq!(result.updated, 1);
        let events = coordinator.store.list_all_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version, 2);
    }

    #[test]
    fn same_origin_event_id_from_two_accounts_is_two_canonicals() {
        let coordinator = new_coordinator();
        let payload = || ProviderEventPayload {
            title: Some("Sync".into()),
            start_ts: Some("2026-02-15T09:00:00Z".into()),
            end_ts: Some("2026-02-15T09:30:00Z".into()),
            ..Default::default()
        };
        coordinator
            .apply_provider_delta(&AccountId::from("acc_a"), vec![ProviderDelta::Created { origin_event_id: "same_id".into(), event: Some(payload()) }])
            .unwrap();
        coordinator
            .apply_provider_delta(&AccountId::from("acc_b"), vec![ProviderDelta::Created { origin_event_id: "same_id".into(), event: Some(payload()) }])
            .unwrap();
        assert_eq!(coordinator.store.count_canonical_events().unwrap(), 2);
    }

    #[test]
    fn unlink_cascades_events_mirrors_and_edges() {
        let coordinator = new_coordinator();
        let policy = coordinator.create_policy("default").unwrap();
        coordinator
            .set_policy_edges(
                &policy,
                vec![
                    PolicyEdge { from_account_id: AccountId::from("acc_a"), to_account_id: AccountId::from("acc_b"), detail_level: DetailLevel::Busy, calendar_kind: CalendarKind::BusyOverlay },
                    PolicyEdge { from_account_id: AccountId::from("acc_b"), to_account_id: AccountId::from("acc_a"), detail_level: DetailLevel::Busy, calendar_kind: CalendarKind::BusyOverlay },
                ],
            )
            .unwrap();
        let payload = |t: &str| ProviderEventPayload {
            title: Some(t.into()),
            start_ts: Some("2026-02-15T09:00:00Z".into()),
            end_ts: Some("2026-02-15T09:30:00Z".into()),
            ..Default::default()
        };
        coordinator.apply_provider_delta(&AccountId::from("acc_a"), vec![
            ProviderDelta::Created { origin_event_id: "a1".into(), event: Some(payload("A1")) },
            ProviderDelta::Created { origin_event_id: "a2".into(), event: Some(payload("A2")) },
        ]).unwrap();
        coordinator.apply_provider_delta(&AccountId::from("acc_b"), vec![
            ProviderDelta::Created { origin_event_id: "b1".into(), event: Some(payload("B1")) },
        ]).unwrap();

        let result = coordinator.unlink_account(&AccountId::from("acc_a")).unwrap();
        assert_eq!(result.events_deleted, 2);
        assert_eq!(coordinator.store.count_canonical_events().unwrap(), 1);
        assert_eq!(coordinator.get_policy_edges(&policy).unwrap().len(), 0);
    }

    #[test]
    fn unknown_event_delete_is_silent() {
        let coordinator = new_coordinator();
        let result = coordinator
            .apply_provider_delta(&AccountId::from("acc_a"), vec![ProviderDelta::Deleted { origin_event_id: "missing".into() }])
            .unwrap();
        assert_eq!(result.deleted, 0);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn ensure_default_policy_is_idempotent_and_preserves_custom_edges() {
        let coordinator = new_coordinator();
        let accounts = vec![AccountId::from("acc_a"), AccountId::from("acc_b")];
        let policy_id = coordinator.ensure_default_policy(&accounts).unwrap();
        coordinator
            .store
            .upsert_policy_edge(
                &policy_id,
                &PolicyEdge { from_account_id: AccountId::from("acc_a"), to_account_id: AccountId::from("acc_b"), detail_level: DetailLevel::Full, calendar_kind: CalendarKind::TrueMirror },
            )
            .unwrap();
        // idempotent re-run must not reset the custom edge back to BUSY
        coordinator.ensure_default_policy(&accounts).unwrap();
        let edges = coordinator.get_policy_edges(&policy_id).unwrap();
        let ab = edges.iter().find(|e| e.from_account_id.as_str() == "acc_a" && e.to_account_id.as_str() == "acc_b").unwrap();
        assert_eq!(ab.detail_level, DetailLevel::Full);
    }
}
