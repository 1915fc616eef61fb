//! HTTP JSON surface over the workflow service
//!
//! The acting employee is taken from the `X-Employee-Id` header.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Employee, RegisterEmployeeRequest, Role};
use crate::workflow::request::AttendanceEntry;
use crate::workflow::{
    Decision, Delegation, FinalOutcome, MissionForm, ReconciliationForm, RequestDetail,
    RequestSummary, Revocation, StatusOverride, TravelRequest,
};
use crate::AppState;

pub const ACTOR_HEADER: &str = "x-employee-id";

/// Identity of the caller
#[derive(Debug, Clone, Copy)]
pub struct Actor(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| AppError::Unauthorized("missing actor header".to_string()))?;
        let id = value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| AppError::validation(ACTOR_HEADER, "must be an employee id"))?;
        Ok(Actor(id))
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/employees", post(register_employee).get(list_employees))
        .route("/employees/:id/manager", put(assign_manager))
        .route("/employees/:id/role", put(set_role))
        .route("/requests", post(submit_request).get(list_requests))
        .route("/requests/:id", get(get_request).put(update_request))
        .route("/requests/:id/pre-mission", post(decide_pre_mission))
        .route("/requests/:id/reconciliation", post(submit_reconciliation))
        .route("/requests/:id/post-mission", post(decide_post_mission))
        .route("/requests/:id/reimbursement", post(request_reimbursement))
        .route("/requests/:id/finalization", post(finalize_reimbursement))
        .route("/requests/:id/status", put(override_status))
        .route("/finalization-queue", get(list_awaiting_finalization))
        .route("/attendance", get(list_approved_missions))
        .route("/delegations", post(create_delegation).get(list_delegations))
        .route("/delegations/:id", delete(revoke_delegation))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// Employees

async fn register_employee(
    State(state): State<Arc<AppState>>,
    actor: Option<Actor>,
    Json(req): Json<RegisterEmployeeRequest>,
) -> Result<(StatusCode, Json<Employee>)> {
    let employee = state
        .service
        .register_employee(actor.map(|Actor(id)| id), req)
        .await?;
    Ok((StatusCode::CREATED, Json(employee)))
}

async fn list_employees(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
) -> Result<Json<Vec<Employee>>> {
    Ok(Json(state.service.list_employees(actor_id).await?))
}

#[derive(Debug, Deserialize)]
struct AssignManagerBody {
    manager_id: Option<Uuid>,
}

async fn assign_manager(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(employee_id): Path<Uuid>,
    Json(body): Json<AssignManagerBody>,
) -> Result<Json<Employee>> {
    let employee = state
        .service
        .assign_manager(actor_id, employee_id, body.manager_id)
        .await?;
    Ok(Json(employee))
}

#[derive(Debug, Deserialize)]
struct SetRoleBody {
    role: String,
}

async fn set_role(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(employee_id): Path<Uuid>,
    Json(body): Json<SetRoleBody>,
) -> Result<Json<Employee>> {
    // Legacy labels are accepted here too
    let role: Role = body
        .role
        .parse()
        .map_err(|e: String| AppError::validation("role", e))?;
    let employee = state.service.set_role(actor_id, employee_id, role).await?;
    Ok(Json(employee))
}

// Requests

async fn submit_request(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Json(form): Json<MissionForm>,
) -> Result<(StatusCode, Json<TravelRequest>)> {
    let mission = form.validate()?;
    let request = state.service.submit_request(actor_id, mission).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[derive(Debug, Deserialize)]
struct DashboardQuery {
    as_of: Option<NaiveDate>,
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Vec<RequestSummary>>> {
    let as_of = query.as_of.unwrap_or_else(|| state.service.today());
    let summaries = state
        .service
        .list_actionable_requests(actor_id, as_of)
        .await?;
    Ok(Json(summaries))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(request_id): Path<Uuid>,
) -> Result<Json<RequestDetail>> {
    Ok(Json(state.service.get_request(request_id, actor_id).await?))
}

async fn update_request(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(request_id): Path<Uuid>,
    Json(form): Json<MissionForm>,
) -> Result<Json<TravelRequest>> {
    let mission = form.validate()?;
    let request = state
        .service
        .update_request(request_id, actor_id, mission)
        .await?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
struct DecisionBody {
    decision: Decision,
    comment: Option<String>,
}

async fn decide_pre_mission(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(request_id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<TravelRequest>> {
    let request = state
        .service
        .decide_pre_mission(request_id, actor_id, body.decision, body.comment)
        .await?;
    Ok(Json(request))
}

async fn submit_reconciliation(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(request_id): Path<Uuid>,
    Json(form): Json<ReconciliationForm>,
) -> Result<Json<TravelRequest>> {
    let (data, items) = form.validate()?;
    let request = state
        .service
        .submit_reconciliation(request_id, actor_id, data, items)
        .await?;
    Ok(Json(request))
}

async fn decide_post_mission(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(request_id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<TravelRequest>> {
    let request = state
        .service
        .decide_post_mission(request_id, actor_id, body.decision, body.comment)
        .await?;
    Ok(Json(request))
}

async fn request_reimbursement(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(request_id): Path<Uuid>,
) -> Result<Json<TravelRequest>> {
    let request = state
        .service
        .request_reimbursement(request_id, actor_id)
        .await?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
struct FinalizeBody {
    outcome: FinalOutcome,
    comment: Option<String>,
}

async fn finalize_reimbursement(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(request_id): Path<Uuid>,
    Json(body): Json<FinalizeBody>,
) -> Result<Json<TravelRequest>> {
    let request = state
        .service
        .finalize_reimbursement(request_id, actor_id, body.outcome, body.comment)
        .await?;
    Ok(Json(request))
}

async fn override_status(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(request_id): Path<Uuid>,
    Json(change): Json<StatusOverride>,
) -> Result<Json<TravelRequest>> {
    let request = state
        .service
        .override_status(actor_id, request_id, change)
        .await?;
    Ok(Json(request))
}

async fn list_awaiting_finalization(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
) -> Result<Json<Vec<RequestSummary>>> {
    Ok(Json(state.service.list_awaiting_finalization(actor_id).await?))
}

#[derive(Debug, Deserialize)]
struct DateRangeQuery {
    from: NaiveDate,
    to: NaiveDate,
}

async fn list_approved_missions(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<Vec<AttendanceEntry>>> {
    let entries = state
        .service
        .list_approved_missions(actor_id, range.from, range.to)
        .await?;
    Ok(Json(entries))
}

// Delegations

#[derive(Debug, Deserialize)]
struct CreateDelegationBody {
    delegate_id: Uuid,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
}

async fn create_delegation(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Json(body): Json<CreateDelegationBody>,
) -> Result<(StatusCode, Json<Delegation>)> {
    let delegation = state
        .service
        .create_delegation(actor_id, body.delegate_id, body.start_date, body.end_date)
        .await?;
    Ok((StatusCode::CREATED, Json(delegation)))
}

async fn list_delegations(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
) -> Result<Json<Vec<Delegation>>> {
    Ok(Json(state.service.list_delegations(actor_id).await?))
}

async fn revoke_delegation(
    State(state): State<Arc<AppState>>,
    Actor(actor_id): Actor,
    Path(delegation_id): Path<Uuid>,
) -> Result<Json<Revocation>> {
    Ok(Json(
        state
            .service
            .revoke_delegation(delegation_id, actor_id)
            .await?,
    ))
}
