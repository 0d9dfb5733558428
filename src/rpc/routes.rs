//! One handler per coordinator operation (spec §6.3). Each takes and
//! returns plain JSON; the coordinator call is the entire handler body.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::coordinator::{
    ApplyDeltaResult, ListEventsQuery, ListEventsResult, ProviderDelta, SyncHealth, UnlinkResult, UpsertEventInput,
};
use crate::error::{Error, Result};
use crate::ids::{AccountId, CanonicalEventId, ConstraintId, PolicyId};
use crate::model::{CanonicalEvent, Constraint, ConstraintKind, JournalEntry, Mirror, Policy, PolicyEdge, PolicyWithEdges};
use crate::store::journal::JournalFilter as StoreJournalFilter;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ApplyProviderDeltaRequest {
    pub origin_account_id: AccountId,
    pub deltas: Vec<ProviderDelta>,
}

pub async fn apply_provider_delta(State(state): State<AppState>, Json(req): Json<ApplyProviderDeltaRequest>) -> Result<Json<ApplyDeltaResult>> {
    let result = state.coordinator.apply_provider_delta(&req.origin_account_id, req.deltas)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct UpsertCanonicalEventRequest {
    #[serde(flatten)]
    pub input: UpsertEventInput,
    pub actor: String,
}

pub async fn upsert_canonical_event(State(state): State<AppState>, Json(req): Json<UpsertCanonicalEventRequest>) -> Result<Json<CanonicalEvent>> {
    let event = state.coordinator.upsert_canonical_event(req.input, &req.actor)?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
pub struct DeleteCanonicalEventRequest {
    pub canonical_event_id: CanonicalEventId,
    pub actor: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteCanonicalEventResponse {
    pub deleted: bool,
}

pub async fn delete_canonical_event(State(state): State<AppState>, Json(req): Json<DeleteCanonicalEventRequest>) -> Result<Json<DeleteCanonicalEventResponse>> {
    let deleted = state.coordinator.delete_canonical_event(&req.canonical_event_id, &req.actor)?;
    Ok(Json(DeleteCanonicalEventResponse { deleted }))
}

pub async fn list_canonical_events(State(state): State<AppState>, Json(query): Json<ListEventsQuery>) -> Result<Json<ListEventsResult>> {
    let result = state.coordinator.list_canonical_events(&query)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct GetCanonicalEventRequest {
    pub canonical_event_id: CanonicalEventId,
}

#[derive(Debug, Serialize)]
pub struct GetCanonicalEventResponse {
    pub event: CanonicalEvent,
    pub mirrors: Vec<Mirror>,
}

pub async fn get_canonical_event(State(state): State<AppState>, Json(req): Json<GetCanonicalEventRequest>) -> Result<Json<GetCanonicalEventResponse>> {
    let (event, mirrors) = state
        .coordinator
        .get_canonical_event(&req.canonical_event_id)?
        .ok_or_else(|| Error::not_found(format!("canonical event {} not found", req.canonical_event_id)))?;
    Ok(Json(GetCanonicalEventResponse { event, mirrors }))
}

#[derive(Debug, Deserialize)]
pub struct FindCanonicalByOriginRequest {
    pub origin_account_id: AccountId,
    pub origin_event_id: String,
}

pub async fn find_canonical_by_origin(State(state): State<AppState>, Json(req): Json<FindCanonicalByOriginRequest>) -> Result<Json<Option<CanonicalEvent>>> {
    let event = state.coordinator.find_canonical_by_origin(&req.origin_account_id, &req.origin_event_id)?;
    Ok(Json(event))
}

#[derive(Debug, Default, Deserialize)]
pub struct JournalQuery {
    pub canonical_event_id: Option<CanonicalEventId>,
    pub actor: Option<String>,
    pub change_type: Option<String>,
    pub limit: Option<i64>,
}

pub async fn query_journal(State(state): State<AppState>, Json(query): Json<JournalQuery>) -> Result<Json<Vec<JournalEntry>>> {
    let filter = StoreJournalFilter {
        canonical_event_id: query.canonical_event_id,
        actor: query.actor,
        change_type: query.change_type,
        limit: query.limit,
    };
    let entries = state.coordinator.query_journal(filter)?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct LogReconcileDiscrepancyRequest {
    pub canonical_event_id: Option<CanonicalEventId>,
    pub subtype: String,
    pub patch_json: String,
    pub reason: String,
}

pub async fn log_reconcile_discrepancy(State(state): State<AppState>, Json(req): Json<LogReconcileDiscrepancyRequest>) -> Result<Json<()>> {
    state
        .coordinator
        .log_reconcile_discrepancy(req.canonical_event_id.as_ref(), &req.subtype, &req.patch_json, &req.reason)?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
pub struct RecomputeProjectionsRequest {
    pub canonical_event_id: Option<CanonicalEventId>,
    #[serde(default)]
    pub force_requeue_non_active: bool,
}

#[derive(Debug, Serialize)]
pub struct RecomputeProjectionsResponse {
    pub enqueued: u64,
}

pub async fn recompute_projections(State(state): State<AppState>, Json(req): Json<RecomputeProjectionsRequest>) -> Result<Json<RecomputeProjectionsResponse>> {
    let enqueued = state
        .coordinator
        .recompute_projections(req.canonical_event_id.as_ref(), req.force_requeue_non_active)?;
    Ok(Json(RecomputeProjectionsResponse { enqueued }))
}

#[derive(Debug, Deserialize)]
pub struct ComputeAvailabilityRequest {
    pub window_start: chrono::DateTime<chrono::Utc>,
    pub window_end: chrono::DateTime<chrono::Utc>,
    pub accounts: Option<Vec<AccountId>>,
}

pub async fn compute_availability(State(state): State<AppState>, Json(req): Json<ComputeAvailabilityRequest>) -> Result<Json<crate::availability::Availability>> {
    let availability = state
        .coordinator
        .compute_availability(req.window_start, req.window_end, req.accounts.as_deref())?;
    Ok(Json(availability))
}

pub async fn get_sync_health(State(state): State<AppState>) -> Result<Json<SyncHealth>> {
    Ok(Json(state.coordinator.get_sync_health()?))
}

pub async fn get_active_mirrors(State(state): State<AppState>) -> Result<Json<Vec<Mirror>>> {
    Ok(Json(state.coordinator.get_active_mirrors()?))
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePolicyResponse {
    pub policy_id: PolicyId,
}

pub async fn create_policy(State(state): State<AppState>, Json(req): Json<CreatePolicyRequest>) -> Result<Json<CreatePolicyResponse>> {
    let policy_id = state.coordinator.create_policy(&req.name)?;
    Ok(Json(CreatePolicyResponse { policy_id }))
}

pub async fn list_policies(State(state): State<AppState>) -> Result<Json<Vec<Policy>>> {
    Ok(Json(state.coordinator.list_policies()?))
}

#[derive(Debug, Deserialize)]
pub struct PolicyIdRequest {
    pub policy_id: PolicyId,
}

pub async fn get_policy(State(state): State<AppState>, Json(req): Json<PolicyIdRequest>) -> Result<Json<PolicyWithEdges>> {
    let policy = state
        .coordinator
        .get_policy(&req.policy_id)?
        .ok_or_else(|| Error::not_found(format!("policy {} not found", req.policy_id)))?;
    Ok(Json(policy))
}

pub async fn get_policy_edges(State(state): State<AppState>, Json(req): Json<PolicyIdRequest>) -> Result<Json<Vec<PolicyEdge>>> {
    Ok(Json(state.coordinator.get_policy_edges(&req.policy_id)?))
}

#[derive(Debug, Deserialize)]
pub struct SetPolicyEdgesRequest {
    pub policy_id: PolicyId,
    pub edges: Vec<PolicyEdge>,
}

pub async fn set_policy_edges(State(state): State<AppState>, Json(req): Json<SetPolicyEdgesRequest>) -> Result<Json<()>> {
    state.coordinator.set_policy_edges(&req.policy_id, req.edges)?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
pub struct EnsureDefaultPolicyRequest {
    pub account_ids: Vec<AccountId>,
}

pub async fn ensure_default_policy(State(state): State<AppState>, Json(req): Json<EnsureDefaultPolicyRequest>) -> Result<Json<CreatePolicyResponse>> {
    let policy_id = state.coordinator.ensure_default_policy(&req.account_ids)?;
    Ok(Json(CreatePolicyResponse { policy_id }))
}

#[derive(Debug, Deserialize)]
pub struct UnlinkAccountRequest {
    pub account_id: AccountId,
}

pub async fn unlink_account(State(state): State<AppState>, Json(req): Json<UnlinkAccountRequest>) -> Result<Json<UnlinkResult>> {
    Ok(Json(state.coordinator.unlink_account(&req.account_id)?))
}

#[derive(Debug, Deserialize)]
pub struct AddConstraintRequest {
    pub kind: ConstraintKind,
    pub config: serde_json::Value,
    pub active_from: Option<String>,
    pub active_to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddConstraintResponse {
    pub constraint_id: ConstraintId,
}

pub async fn add_constraint(State(state): State<AppState>, Json(req): Json<AddConstraintRequest>) -> Result<Json<AddConstraintResponse>> {
    let constraint_id = state.coordinator.add_constraint(req.kind, req.config, req.active_from, req.active_to)?;
    Ok(Json(AddConstraintResponse { constraint_id }))
}

#[derive(Debug, Deserialize)]
pub struct ConstraintIdRequest {
    pub constraint_id: ConstraintId,
}

#[derive(Debug, Serialize)]
pub struct DeleteConstraintResponse {
    pub deleted: bool,
}

pub async fn delete_constraint(State(state): State<AppState>, Json(req): Json<ConstraintIdRequest>) -> Result<Json<DeleteConstraintResponse>> {
    let deleted = state.coordinator.delete_constraint(&req.constraint_id)?;
    Ok(Json(DeleteConstraintResponse { deleted }))
}

#[derive(Debug, Deserialize)]
pub struct ListConstraintsQuery {
    pub kind: Option<ConstraintKind>,
}

pub async fn list_constraints(State(state): State<AppState>, Query(query): Query<ListConstraintsQuery>) -> Result<Json<Vec<Constraint>>> {
    Ok(Json(state.coordinator.list_constraints(query.kind)?))
}

pub async fn get_constraint(State(state): State<AppState>, Json(req): Json<ConstraintIdRequest>) -> Result<Json<Option<Constraint>>> {
    Ok(Json(state.coordinator.get_constraint(&req.constraint_id)?))
}
