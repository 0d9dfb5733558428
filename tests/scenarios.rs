//! End-to-end coverage driven entirely through the public crate API,
//! complementing the module-local unit tests with cross-module scenarios
//! that only show up once the coordinator, hasher, and scheduling engine
//! are wired together.

use std::sync::Arc;

use tminus_core::coordinator::{Coordinator, ProviderDelta, ProviderEventPayload};
use tminus_core::ids::AccountId;
use tminus_core::model::{CalendarKind, DetailLevel, PolicyEdge};
use tminus_core::queue::{Queues, WriteMessage};
use tminus_core::scheduling::{GreedyEarliestEnumerator, SchedulingEngine};
use tminus_core::store::Store;

fn coordinator() -> Coordinator {
    Coordinator::new(Store::open_in_memory().unwrap(), Queues::default())
}

fn standup_payload() -> ProviderEventPayload {
    ProviderEventPayload {
        title: Some("Team Standup".into()),
        start_ts: Some("2026-02-15T09:00:00Z".into()),
        end_ts: Some("2026-02-15T09:30:00Z".into()),
        ..Default::default()
    }
}

/// Scenario 2 (spec §8): TITLE-level projection shows the real title with
/// default visibility; upgrading the edge to FULL and recomputing queues
/// exactly one more mirror write for the same canonical event.
#[test]
fn detail_upgrade_from_title_to_full_requeues_one_mirror() {
    let coordinator = coordinator();
    let policy = coordinator.create_policy("default").unwrap();
    coordinator
        .set_policy_edges(
            &policy,
            vec![PolicyEdge {
                from_account_id: AccountId::from("acc_a"),
                to_account_id: AccountId::from("acc_b"),
                detail_level: DetailLevel::Title,
                calendar_kind: CalendarKind::TrueMirror,
            }],
        )
        .unwrap();

    let result = coordinator
        .apply_provider_delta(&AccountId::from("acc_a"), vec![ProviderDelta::Created { origin_event_id: "gcal_standup".into(), event: Some(standup_payload()) }])
        .unwrap();
    assert_eq!(result.created, 1);
    assert_eq!(result.mirrors_enqueued, 1);

    match coordinator.queues.write.pop().unwrap() {
        WriteMessage::UpsertMirror { projected_payload, .. } => {
            assert_eq!(projected_payload.summary, "Team Standup");
        }
        other => panic!("expected upsert, got {other:?}"),
    }

    coordinator
        .set_policy_edges(
            &policy,
            vec![PolicyEdge {
                from_account_id: AccountId::from("acc_a"),
                to_account_id: AccountId::from("acc_b"),
                detail_level: DetailLevel::Full,
                calendar_kind: CalendarKind::TrueMirror,
            }],
        )
        .unwrap();

    let enqueued = coordinator.recompute_projections(None, false).unwrap();
    assert_eq!(enqueued, 1);
    assert!(coordinator.queues.write.pop().is_some());
    assert!(coordinator.queues.write.pop().is_none());
}

/// Scenario 6 (spec §8) run through the actual scheduling engine rather
/// than a hand-built session: generate candidates over a free window,
/// hold one, commit it, and confirm the other holds and the session both
/// land in their terminal states.
#[test]
fn commit_flow_releases_losing_holds_and_closes_the_session() {
    let coordinator = Arc::new(coordinator());
    let engine = SchedulingEngine::new(coordinator.clone(), Arc::new(GreedyEarliestEnumerator), 24);

    let session_id = engine.open_session().unwrap();
    let window_start = "2026-02-16T09:00:00Z".parse().unwrap();
    let window_end = "2026-02-16T17:00:00Z".parse().unwrap();
    let candidates = engine
        .generate_candidates(&session_id, window_start, window_end, chrono::Duration::minutes(30), None, 3)
        .unwrap();
    assert!(candidates.len() >= 2, "expected at least two candidates to exercise the losing-hold path");

    let hold_a = engine.hold_candidate(&session_id, 0).unwrap();
    let hold_b = engine.hold_candidate(&session_id, 1).unwrap();

    engine.commit(&session_id, &hold_a).unwrap();

    let session = coordinator.store.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status.as_str(), "committed");

    let holds = coordinator.store.list_holds_for_session(&session_id).unwrap();
    let a = holds.iter().find(|h| h.hold_id == hold_a).unwrap();
    let b = holds.iter().find(|h| h.hold_id == hold_b).unwrap();
    assert_eq!(a.state.as_str(), "committed");
    assert_eq!(b.state.as_str(), "released");
}
