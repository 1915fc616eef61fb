//! Travel workflow service
//!
//! The service handles:
//! - Employee registration, roles and manager assignments
//! - Request submission and pre-mission decisions
//! - Reconciliation, the expense ledger and post-mission decisions
//! - Reimbursement requests and the final decision
//! - Delegation grants and revocations
//! - Dashboards and queues
//! - Event broadcasting
//!
//! Every mutation reads the clock once, runs in a single transaction and
//! broadcasts its events only after commit.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::authorization::{ActorAuthority, Grant};
use super::clock::{Clock, SystemClock};
use super::delegation::{Delegation, Revocation};
use super::ledger::{self, Expense, ExpenseItem, ExpenseReplacement};
use super::permission::{require, Permission};
use super::request::{
    ApprovalPhase, AttendanceEntry, Decision, FinalOutcome, MissionDetails, PostMissionStatus,
    PreMissionStatus, Reconciliation, ReconciliationAction, RequestSummary, StatusOverride,
    TravelRequest,
};
use super::validation::ReconciliationData;
use crate::error::{AppError, Result};
use crate::models::{would_create_cycle, Employee, RegisterEmployeeRequest, Role};
use crate::store::Store;

/// Events emitted by the workflow service
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// A request was submitted, possibly approved on the spot
    RequestSubmitted {
        request_id: Uuid,
        requester_id: Uuid,
        auto_approved: bool,
    },
    PreMissionDecided {
        request_id: Uuid,
        approver_id: Uuid,
        status: PreMissionStatus,
    },
    /// Reconciliation saved or submitted by the requester
    ReconciliationSubmitted {
        request_id: Uuid,
        action: ReconciliationAction,
        expense_total_cents: i64,
    },
    PostMissionDecided {
        request_id: Uuid,
        approver_id: Uuid,
        status: PostMissionStatus,
    },
    ReimbursementRequested {
        request_id: Uuid,
        requester_id: Uuid,
    },
    ReimbursementFinalized {
        request_id: Uuid,
        approver_id: Uuid,
        outcome: FinalOutcome,
    },
    DelegationCreated {
        delegation_id: Uuid,
        delegator_id: Uuid,
        delegate_id: Uuid,
    },
    DelegationRevoked {
        delegation_id: Uuid,
        revocation: Revocation,
    },
    /// An employee was registered or had role/manager changed
    EmployeeUpdated {
        employee_id: Uuid,
        role: Role,
        manager_id: Option<Uuid>,
    },
    StatusOverridden {
        request_id: Uuid,
        actor_id: Uuid,
        change: StatusOverride,
    },
}

/// A request together with its expense lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: TravelRequest,
    pub expenses: Vec<Expense>,
}

/// Service coordinating the travel request workflow
pub struct TravelService {
    store: Store,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<WorkflowEvent>,
}

impl TravelService {
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Store, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            clock,
            event_tx,
        }
    }

    /// Subscribe to workflow events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_tx.subscribe()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn emit(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            let _ = self.event_tx.send(event);
        }
    }

    // Employees

    /// Register a new employee. Anyone may sign up as Staff; any other role
    /// needs an actor allowed to hand it out, as with `set_role`. A
    /// self-managing Manager is set up afterwards with `assign_manager`.
    pub async fn register_employee(
        &self,
        actor_id: Option<Uuid>,
        req: RegisterEmployeeRequest,
    ) -> Result<Employee> {
        let now = self.clock.now();
        let name = req.name.trim();
        let email = req.email.trim();
        if name.is_empty() {
            return Err(AppError::validation("name", "is required"));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::validation("email", "must be an email address"));
        }

        let mut tx = self.store.begin().await?;

        if req.role != Role::Staff {
            let Some(actor_id) = actor_id else {
                return Err(AppError::Unauthorized(format!(
                    "self-registration as {} is not allowed",
                    req.role.as_str()
                )));
            };
            let actor = load_actor(&mut tx, actor_id).await?;
            require_role_grant(actor.role, req.role)?;
        }

        if Store::find_employee_by_email(&mut tx, email).await?.is_some() {
            return Err(AppError::validation("email", "is already registered"));
        }
        if let Some(manager_id) = req.manager_id {
            ensure_employee_exists(&mut tx, manager_id, "manager_id").await?;
        }

        let employee = Employee {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            role: req.role,
            manager_id: req.manager_id,
            created_at: now,
            updated_at: now,
        };
        Store::insert_employee(&mut tx, &employee).await?;
        tx.commit().await?;

        tracing::info!(
            employee_id = %employee.id,
            actor_id = ?actor_id,
            role = employee.role.as_str(),
            "Registered employee"
        );
        self.emit(vec![WorkflowEvent::EmployeeUpdated {
            employee_id: employee.id,
            role: employee.role,
            manager_id: employee.manager_id,
        }]);

        Ok(employee)
    }

    /// Make sure a Superuser with `email` exists, creating it if needed.
    /// This is the only way to obtain the first privileged account.
    pub async fn seed_superuser(&self, name: &str, email: &str) -> Result<Employee> {
        let now = self.clock.now();
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(AppError::validation("name", "is required"));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::validation("email", "must be an email address"));
        }

        let mut tx = self.store.begin().await?;

        if let Some(existing) = Store::find_employee_by_email(&mut tx, email).await? {
            if existing.role != Role::Superuser {
                return Err(AppError::validation(
                    "email",
                    "is already registered with another role",
                ));
            }
            return Ok(existing);
        }

        let employee = Employee {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            role: Role::Superuser,
            manager_id: None,
            created_at: now,
            updated_at: now,
        };
        Store::insert_employee(&mut tx, &employee).await?;
        tx.commit().await?;

        tracing::warn!(employee_id = %employee.id, "Seeded superuser account");
        self.emit(vec![WorkflowEvent::EmployeeUpdated {
            employee_id: employee.id,
            role: employee.role,
            manager_id: None,
        }]);

        Ok(employee)
    }

    pub async fn get_employee(&self, employee_id: Uuid) -> Result<Employee> {
        let mut conn = self.store.acquire().await?;
        Store::get_employee(&mut conn, employee_id).await
    }

    pub async fn list_employees(&self, actor_id: Uuid) -> Result<Vec<Employee>> {
        let mut conn = self.store.acquire().await?;
        let actor = load_actor(&mut conn, actor_id).await?;
        require(actor.role, Permission::ManageEmployees)?;
        Store::list_employees(&mut conn).await
    }

    /// Point an employee at a responsible manager, or clear it with `None`.
    /// Only a Manager may be its own manager.
    pub async fn assign_manager(
        &self,
        actor_id: Uuid,
        employee_id: Uuid,
        manager_id: Option<Uuid>,
    ) -> Result<Employee> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let actor = load_actor(&mut tx, actor_id).await?;
        require(actor.role, Permission::ManageEmployees)?;
        let mut employee = Store::get_employee(&mut tx, employee_id).await?;

        match manager_id {
            Some(id) if id == employee.id => {
                if employee.role != Role::Manager {
                    return Err(AppError::validation(
                        "manager_id",
                        "only a manager can be their own manager",
                    ));
                }
            }
            Some(id) => {
                ensure_employee_exists(&mut tx, id, "manager_id").await?;
                let employees: HashMap<Uuid, Employee> = Store::list_employees(&mut tx)
                    .await?
                    .into_iter()
                    .map(|e| (e.id, e))
                    .collect();
                if would_create_cycle(&employees, employee.id, id) {
                    return Err(AppError::validation(
                        "manager_id",
                        "assignment would create a management cycle",
                    ));
                }
            }
            None => {}
        }

        employee.manager_id = manager_id;
        employee.updated_at = now;
        Store::update_employee(&mut tx, &employee).await?;
        tx.commit().await?;

        tracing::info!(
            employee_id = %employee.id,
            actor_id = %actor_id,
            manager_id = ?employee.manager_id,
            "Assigned manager"
        );
        self.emit(vec![WorkflowEvent::EmployeeUpdated {
            employee_id: employee.id,
            role: employee.role,
            manager_id: employee.manager_id,
        }]);

        Ok(employee)
    }

    /// Change an employee's role. Leaving the Manager role drops a
    /// self-reference; only a Superuser can hand out the Superuser role.
    pub async fn set_role(&self, actor_id: Uuid, employee_id: Uuid, role: Role) -> Result<Employee> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let actor = load_actor(&mut tx, actor_id).await?;
        require_role_grant(actor.role, role)?;
        let mut employee = Store::get_employee(&mut tx, employee_id).await?;

        let from = employee.role;
        if role != Role::Manager && employee.manager_id == Some(employee.id) {
            employee.manager_id = None;
        }
        employee.role = role;
        employee.updated_at = now;
        Store::update_employee(&mut tx, &employee).await?;
        tx.commit().await?;

        tracing::info!(
            employee_id = %employee.id,
            actor_id = %actor_id,
            from = from.as_str(),
            to = role.as_str(),
            "Changed role"
        );
        self.emit(vec![WorkflowEvent::EmployeeUpdated {
            employee_id: employee.id,
            role: employee.role,
            manager_id: employee.manager_id,
        }]);

        Ok(employee)
    }

    // Pre-mission

    pub async fn submit_request(
        &self,
        requester_id: Uuid,
        mission: MissionDetails,
    ) -> Result<TravelRequest> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let requester = load_actor(&mut tx, requester_id).await?;
        require(requester.role, Permission::SubmitRequest)?;

        let request = TravelRequest::new(&requester, mission, now);
        Store::insert_request(&mut tx, &request).await?;
        tx.commit().await?;

        let auto_approved = request.pre_status == PreMissionStatus::Approved;
        tracing::info!(
            request_id = %request.id,
            requester_id = %requester_id,
            to = request.pre_status.as_str(),
            auto_approved,
            "Submitted travel request"
        );
        if request.responsible_manager_id.is_none() {
            tracing::warn!(
                request_id = %request.id,
                requester_id = %requester_id,
                "Request has no responsible manager; nobody can approve it"
            );
        }
        self.emit(vec![WorkflowEvent::RequestSubmitted {
            request_id: request.id,
            requester_id,
            auto_approved,
        }]);

        Ok(request)
    }

    /// Edit mission details while the pre-mission decision is pending
    pub async fn update_request(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        mission: MissionDetails,
    ) -> Result<TravelRequest> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        load_actor(&mut tx, actor_id).await?;
        let mut request = Store::get_request(&mut tx, request_id).await?;
        ensure_requester(&request, actor_id)?;
        request
            .update_mission(mission, now)
            .map_err(AppError::InvalidState)?;
        Store::save_request(&mut tx, &request).await?;
        tx.commit().await?;

        tracing::info!(request_id = %request_id, actor_id = %actor_id, "Updated travel request");
        Ok(request)
    }

    pub async fn decide_pre_mission(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<TravelRequest> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut tx = self.store.begin().await?;

        load_actor(&mut tx, actor_id).await?;
        let mut request = Store::get_request(&mut tx, request_id).await?;
        let grant =
            authorize(&mut tx, &request, actor_id, today, ApprovalPhase::PreMission).await?;

        let from = request.pre_status;
        request
            .decide_pre_mission(actor_id, decision, comment, now)
            .map_err(AppError::InvalidState)?;
        Store::save_request(&mut tx, &request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            actor_id = %actor_id,
            grant = ?grant,
            from = from.as_str(),
            to = request.pre_status.as_str(),
            "Pre-mission decision recorded"
        );
        self.emit(vec![WorkflowEvent::PreMissionDecided {
            request_id,
            approver_id: actor_id,
            status: request.pre_status,
        }]);

        Ok(request)
    }

    // Post-mission

    /// Store reconciliation data and apply the expense replacement policy:
    /// no rows keeps the ledger as is, any rows replace it entirely.
    pub async fn submit_reconciliation(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        data: ReconciliationData,
        items: Vec<ExpenseItem>,
    ) -> Result<TravelRequest> {
        let now = self.clock.now();
        let worked_hours =
            ledger::worked_hours(data.actual_start, data.actual_end, data.lunch_start, data.lunch_end)?;
        ledger::check_amounts(&items)?;

        let mut tx = self.store.begin().await?;

        let actor = load_actor(&mut tx, actor_id).await?;
        require(actor.role, Permission::SubmitRequest)?;
        let mut request = Store::get_request(&mut tx, request_id).await?;
        ensure_requester(&request, actor_id)?;

        let from = request.post_status;
        let reconciliation = Reconciliation {
            actual_start: data.actual_start,
            actual_end: data.actual_end,
            lunch_start: data.lunch_start,
            lunch_end: data.lunch_end,
            worked_hours,
            distance_km: data.distance_km,
            notes: data.notes,
            submitted_at: now,
        };
        request
            .reconcile(reconciliation, data.action, now)
            .map_err(AppError::InvalidState)?;

        match ExpenseReplacement::plan(request.id, &items, request.mission.mission_date, now) {
            ExpenseReplacement::Preserve => {
                tracing::debug!(request_id = %request_id, "No expense rows submitted; keeping ledger");
            }
            ExpenseReplacement::Replace(expenses) => {
                tracing::debug!(
                    request_id = %request_id,
                    submitted = items.len(),
                    recorded = expenses.len(),
                    "Replacing expense ledger"
                );
                Store::replace_expenses(&mut tx, request.id, &expenses).await?;
            }
        }

        let total = Store::expense_total(&mut tx, request.id).await?;
        request.expense_total_cents = total;

        let auto_closed = data.action == ReconciliationAction::Submit && request.is_self_managed();
        if auto_closed {
            request
                .close_self_managed_reconciliation(total, now)
                .map_err(AppError::InvalidState)?;
        }

        Store::save_request(&mut tx, &request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            actor_id = %actor_id,
            from = from.as_str(),
            to = request.post_status.as_str(),
            worked_hours,
            total = %ledger::format_cents(total),
            "Reconciliation recorded"
        );

        let mut events = vec![WorkflowEvent::ReconciliationSubmitted {
            request_id,
            action: data.action,
            expense_total_cents: total,
        }];
        if auto_closed {
            events.push(WorkflowEvent::PostMissionDecided {
                request_id,
                approver_id: actor_id,
                status: request.post_status,
            });
        }
        self.emit(events);

        Ok(request)
    }

    /// Approve or reject a submitted reconciliation. Approval outcome
    /// depends on the ledger total recomputed inside the transaction.
    pub async fn decide_post_mission(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<TravelRequest> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut tx = self.store.begin().await?;

        load_actor(&mut tx, actor_id).await?;
        let mut request = Store::get_request(&mut tx, request_id).await?;
        let grant =
            authorize(&mut tx, &request, actor_id, today, ApprovalPhase::PostMission).await?;

        let total = Store::expense_total(&mut tx, request.id).await?;
        let from = request.post_status;
        request
            .decide_post_mission(actor_id, decision, comment, total, now)
            .map_err(AppError::InvalidState)?;
        Store::save_request(&mut tx, &request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            actor_id = %actor_id,
            grant = ?grant,
            from = from.as_str(),
            to = request.post_status.as_str(),
            total = %ledger::format_cents(total),
            "Post-mission decision recorded"
        );
        self.emit(vec![WorkflowEvent::PostMissionDecided {
            request_id,
            approver_id: actor_id,
            status: request.post_status,
        }]);

        Ok(request)
    }

    // Reimbursement

    pub async fn request_reimbursement(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
    ) -> Result<TravelRequest> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        load_actor(&mut tx, actor_id).await?;
        let mut request = Store::get_request(&mut tx, request_id).await?;
        ensure_requester(&request, actor_id)?;
        request
            .request_reimbursement(now)
            .map_err(AppError::InvalidState)?;
        Store::save_request(&mut tx, &request).await?;
        tx.commit().await?;

        tracing::info!(request_id = %request_id, actor_id = %actor_id, "Reimbursement requested");
        self.emit(vec![WorkflowEvent::ReimbursementRequested {
            request_id,
            requester_id: actor_id,
        }]);

        Ok(request)
    }

    pub async fn finalize_reimbursement(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        outcome: FinalOutcome,
        comment: Option<String>,
    ) -> Result<TravelRequest> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let actor = load_actor(&mut tx, actor_id).await?;
        require(actor.role, Permission::FinalizeReimbursement)?;
        let mut request = Store::get_request(&mut tx, request_id).await?;

        let from = request.post_status;
        request
            .finalize(actor_id, outcome, comment, now)
            .map_err(AppError::InvalidState)?;
        Store::save_request(&mut tx, &request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            actor_id = %actor_id,
            from = from.as_str(),
            to = outcome.as_str(),
            total = %ledger::format_cents(request.expense_total_cents),
            "Reimbursement finalized"
        );
        self.emit(vec![WorkflowEvent::ReimbursementFinalized {
            request_id,
            approver_id: actor_id,
            outcome,
        }]);

        Ok(request)
    }

    // Delegation

    pub async fn create_delegation(
        &self,
        delegator_id: Uuid,
        delegate_id: Uuid,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> Result<Delegation> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let delegator = load_actor(&mut tx, delegator_id).await?;
        require(delegator.role, Permission::Delegate)?;
        let delegate = Store::get_employee(&mut tx, delegate_id).await?;

        let delegation = Delegation::new(&delegator, &delegate, start_date, end_date, now)?;
        Store::insert_delegation(&mut tx, &delegation).await?;
        tx.commit().await?;

        tracing::info!(
            delegation_id = %delegation.id,
            delegator_id = %delegator_id,
            delegate_id = %delegate_id,
            start = %start_date,
            end = ?end_date,
            "Delegation created"
        );
        self.emit(vec![WorkflowEvent::DelegationCreated {
            delegation_id: delegation.id,
            delegator_id,
            delegate_id,
        }]);

        Ok(delegation)
    }

    pub async fn revoke_delegation(&self, delegation_id: Uuid, actor_id: Uuid) -> Result<Revocation> {
        let today = self.clock.today();
        let mut tx = self.store.begin().await?;

        load_actor(&mut tx, actor_id).await?;
        let delegation = Store::get_delegation(&mut tx, delegation_id).await?;
        let revocation = delegation.plan_revocation(actor_id, today)?;

        match revocation {
            Revocation::Delete => Store::delete_delegation(&mut tx, delegation_id).await?,
            Revocation::EndOn { end_date } => {
                Store::set_delegation_end(&mut tx, delegation_id, end_date).await?
            }
            Revocation::AlreadyExpired => {}
        }
        tx.commit().await?;

        tracing::info!(
            delegation_id = %delegation_id,
            actor_id = %actor_id,
            revocation = ?revocation,
            "Delegation revoked"
        );
        self.emit(vec![WorkflowEvent::DelegationRevoked {
            delegation_id,
            revocation,
        }]);

        Ok(revocation)
    }

    /// Delegations granted by or to the actor
    pub async fn list_delegations(&self, actor_id: Uuid) -> Result<Vec<Delegation>> {
        let mut conn = self.store.acquire().await?;
        load_actor(&mut conn, actor_id).await?;
        Store::delegations_involving(&mut conn, actor_id).await
    }

    // Views

    /// The actor's own requests plus every request whose open phase the
    /// actor may decide on `as_of`, newest mission first
    pub async fn list_actionable_requests(
        &self,
        actor_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<RequestSummary>> {
        let mut conn = self.store.acquire().await?;

        load_actor(&mut conn, actor_id).await?;
        let delegations = Store::delegations_to(&mut conn, actor_id).await?;
        let authority = ActorAuthority::resolve(actor_id, &delegations, as_of);
        let candidates =
            Store::requests_for(&mut conn, actor_id, &authority.managers_represented()).await?;

        let summaries = candidates
            .into_iter()
            .filter_map(|(request, requester_name)| {
                let actionable = request
                    .open_phase()
                    .is_some_and(|phase| authority.can_approve(&request, phase));
                (actionable || request.requester_id == actor_id)
                    .then(|| RequestSummary::new(&request, requester_name, actionable))
            })
            .collect();

        Ok(summaries)
    }

    /// Administration queue: ready for reimbursement, not yet finalized
    pub async fn list_awaiting_finalization(&self, actor_id: Uuid) -> Result<Vec<RequestSummary>> {
        let mut conn = self.store.acquire().await?;

        let actor = load_actor(&mut conn, actor_id).await?;
        require(actor.role, Permission::FinalizeReimbursement)?;

        let rows = Store::requests_awaiting_finalization(&mut conn).await?;
        Ok(rows
            .into_iter()
            .map(|(request, name)| RequestSummary::new(&request, name, true))
            .collect())
    }

    /// Pre-approved missions in `from..=to`, for attendance reconciliation
    pub async fn list_approved_missions(
        &self,
        actor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceEntry>> {
        if to < from {
            return Err(AppError::validation("to", "must not be before 'from'"));
        }

        let mut conn = self.store.acquire().await?;
        let actor = load_actor(&mut conn, actor_id).await?;
        require(actor.role, Permission::ViewAttendance)?;

        let rows = Store::approved_missions_between(&mut conn, from, to).await?;
        Ok(rows
            .into_iter()
            .map(|(request, name)| AttendanceEntry::new(&request, name))
            .collect())
    }

    /// A request with its expenses, visible to its requester, anyone holding
    /// approval authority over it, and the back-office roles
    pub async fn get_request(&self, request_id: Uuid, actor_id: Uuid) -> Result<RequestDetail> {
        let today = self.clock.today();
        let mut conn = self.store.acquire().await?;

        let actor = load_actor(&mut conn, actor_id).await?;
        let request = Store::get_request(&mut conn, request_id).await?;

        let back_office = [
            Permission::FinalizeReimbursement,
            Permission::OverrideStatus,
            Permission::ViewAttendance,
        ]
        .into_iter()
        .any(|p| actor.role.has_permission(p));

        let visible = back_office
            || request.requester_id == actor_id
            || match request.responsible_manager_id {
                Some(manager_id) => {
                    let delegations = Store::delegations_to(&mut conn, actor_id).await?;
                    ActorAuthority::resolve(actor_id, &delegations, today)
                        .managers_represented()
                        .contains(&manager_id)
                }
                None => false,
            };
        if !visible {
            return Err(AppError::Unauthorized(format!(
                "employee {} cannot view request {}",
                actor_id, request_id
            )));
        }

        let expenses = Store::list_expenses(&mut conn, request_id).await?;
        Ok(RequestDetail { request, expenses })
    }

    // Support

    /// Rewrite statuses without transition checks
    pub async fn override_status(
        &self,
        actor_id: Uuid,
        request_id: Uuid,
        change: StatusOverride,
    ) -> Result<TravelRequest> {
        if change.is_empty() {
            return Err(AppError::validation("status", "no status to change"));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let actor = load_actor(&mut tx, actor_id).await?;
        require(actor.role, Permission::OverrideStatus)?;
        let mut request = Store::get_request(&mut tx, request_id).await?;

        let (pre_from, post_from) = (request.pre_status, request.post_status);
        request.apply_override(&change, now);
        Store::save_request(&mut tx, &request).await?;
        tx.commit().await?;

        tracing::warn!(
            request_id = %request_id,
            actor_id = %actor_id,
            pre_from = pre_from.as_str(),
            pre_to = request.pre_status.as_str(),
            post_from = post_from.as_str(),
            post_to = request.post_status.as_str(),
            final_status = ?request.final_status,
            "Status overridden"
        );
        self.emit(vec![WorkflowEvent::StatusOverridden {
            request_id,
            actor_id,
            change,
        }]);

        Ok(request)
    }

    /// Today's date per the service clock
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }
}

/// Load the acting employee; an unknown identity is a denial, not a lookup miss
async fn load_actor(conn: &mut SqliteConnection, actor_id: Uuid) -> Result<Employee> {
    match Store::get_employee(conn, actor_id).await {
        Err(AppError::NotFound(_)) => Err(AppError::Unauthorized(format!(
            "unknown employee {}",
            actor_id
        ))),
        other => other,
    }
}

/// Handing out a role needs `ManageEmployees`; Superuser also needs `OverrideStatus`
fn require_role_grant(actor_role: Role, role: Role) -> Result<()> {
    require(actor_role, Permission::ManageEmployees)?;
    if role == Role::Superuser {
        require(actor_role, Permission::OverrideStatus)?;
    }
    Ok(())
}

async fn ensure_employee_exists(
    conn: &mut SqliteConnection,
    employee_id: Uuid,
    field: &str,
) -> Result<()> {
    match Store::get_employee(conn, employee_id).await {
        Ok(_) => Ok(()),
        Err(AppError::NotFound(_)) => Err(AppError::validation(
            field,
            format!("employee {} does not exist", employee_id),
        )),
        Err(e) => Err(e),
    }
}

fn ensure_requester(request: &TravelRequest, actor_id: Uuid) -> Result<()> {
    if request.requester_id != actor_id {
        return Err(AppError::Unauthorized(format!(
            "employee {} is not the requester of {}",
            actor_id, request.id
        )));
    }
    Ok(())
}

/// Resolve the actor's authority over `request` as of `today`
async fn authorize(
    conn: &mut SqliteConnection,
    request: &TravelRequest,
    actor_id: Uuid,
    today: NaiveDate,
    phase: ApprovalPhase,
) -> Result<Grant> {
    let delegations = Store::delegations_to(conn, actor_id).await?;
    let authority = ActorAuthority::resolve(actor_id, &delegations, today);

    authority.check(request, phase).map_err(|denial| {
        tracing::warn!(
            request_id = %request.id,
            actor_id = %actor_id,
            phase = ?phase,
            reason = denial.as_str(),
            "Approval denied"
        );
        AppError::Unauthorized(denial.as_str().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::clock::FixedClock;
    use crate::workflow::request::TransportMode;
    use chrono::NaiveTime;
    use sqlx::sqlite::SqlitePoolOptions;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn setup() -> (TravelService, Arc<FixedClock>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = Store::new(pool);
        store.migrate().await.unwrap();
        let clock = Arc::new(FixedClock::at_date(date(2025, 5, 20)));
        (TravelService::with_clock(store, clock.clone()), clock)
    }

    /// Staff sign up on their own; other roles are granted by a seeded root
    async fn register(service: &TravelService, name: &str, role: Role) -> Employee {
        let actor_id = match role {
            Role::Staff => None,
            _ => Some(
                service
                    .seed_superuser("Root", "root@example.com")
                    .await
                    .unwrap()
                    .id,
            ),
        };
        service
            .register_employee(actor_id, RegisterEmployeeRequest {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                role,
                manager_id: None,
            })
            .await
            .unwrap()
    }

    fn mission() -> MissionDetails {
        MissionDetails {
            mission_date: date(2025, 5, 21),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            location: "Milan".to_string(),
            justification: "Supplier audit".to_string(),
            transport_mode: TransportMode::PublicTransport,
            extra_hours_authorized: false,
            clock_in_time: None,
            clock_out_time: None,
            clock_reason: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_email() {
        let (service, _) = setup().await;
        register(&service, "Rossi", Role::Staff).await;

        let result = service
            .register_employee(None, RegisterEmployeeRequest {
                name: "Other Rossi".to_string(),
                email: "ROSSI@example.com".to_string(),
                role: Role::Staff,
                manager_id: None,
            })
            .await;
        match result {
            Err(AppError::Validation { field, .. }) => assert_eq!(field, "email"),
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_self_registration_is_staff_only() {
        let (service, _) = setup().await;
        let request = |role| RegisterEmployeeRequest {
            name: "Mallory".to_string(),
            email: "mallory@example.com".to_string(),
            role,
            manager_id: None,
        };

        for role in [Role::Superuser, Role::Administration, Role::Manager] {
            let result = service.register_employee(None, request(role)).await;
            assert!(
                matches!(result, Err(AppError::Unauthorized(_))),
                "{:?} self-registration should be refused",
                role
            );
        }

        // Staff may not grant roles, Administration may not grant Superuser
        let staff = service.register_employee(None, request(Role::Staff)).await.unwrap();
        assert_eq!(staff.role, Role::Staff);
        let other = |role| RegisterEmployeeRequest {
            email: "other@example.com".to_string(),
            ..request(role)
        };
        let result = service
            .register_employee(Some(staff.id), other(Role::Manager))
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));

        let admin = register(&service, "Admin", Role::Administration).await;
        let result = service
            .register_employee(Some(admin.id), other(Role::Superuser))
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
        let manager = service
            .register_employee(Some(admin.id), other(Role::Manager))
            .await
            .unwrap();
        assert_eq!(manager.role, Role::Manager);
    }

    #[tokio::test]
    async fn test_seed_superuser_is_idempotent() {
        let (service, _) = setup().await;
        let first = service.seed_superuser("Root", "root@example.com").await.unwrap();
        let again = service.seed_superuser("Root", "root@example.com").await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(first.role, Role::Superuser);

        // An existing non-superuser account is never promoted
        register(&service, "Rossi", Role::Staff).await;
        let result = service.seed_superuser("Rossi", "rossi@example.com").await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_assign_manager_rules() {
        let (service, _) = setup().await;
        let admin = register(&service, "Admin", Role::Administration).await;
        let manager = register(&service, "Bianchi", Role::Manager).await;
        let staff = register(&service, "Rossi", Role::Staff).await;

        // Staff cannot manage employees
        let denied = service
            .assign_manager(staff.id, staff.id, Some(manager.id))
            .await;
        assert!(matches!(denied, Err(AppError::Unauthorized(_))));

        // Only managers may self-reference
        let result = service.assign_manager(admin.id, staff.id, Some(staff.id)).await;
        assert!(matches!(result, Err(AppError::Validation { .. })));

        let manager = service
            .assign_manager(admin.id, manager.id, Some(manager.id))
            .await
            .unwrap();
        assert!(manager.is_self_managing());

        service
            .assign_manager(admin.id, staff.id, Some(manager.id))
            .await
            .unwrap();

        // manager -> staff -> manager
        let cycle = service.assign_manager(admin.id, manager.id, Some(staff.id)).await;
        assert!(matches!(cycle, Err(AppError::Validation { .. })));

        let missing = service
            .assign_manager(admin.id, staff.id, Some(Uuid::new_v4()))
            .await;
        assert!(matches!(missing, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_demoting_manager_clears_self_reference() {
        let (service, _) = setup().await;
        let admin = register(&service, "Admin", Role::Administration).await;
        let manager = register(&service, "Bianchi", Role::Manager).await;
        service
            .assign_manager(admin.id, manager.id, Some(manager.id))
            .await
            .unwrap();

        let demoted = service
            .set_role(admin.id, manager.id, Role::Staff)
            .await
            .unwrap();
        assert_eq!(demoted.role, Role::Staff);
        assert_eq!(demoted.manager_id, None);

        // Administration cannot create superusers
        let result = service.set_role(admin.id, manager.id, Role::Superuser).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_unknown_actor_is_unauthorized() {
        let (service, _) = setup().await;
        let result = service.submit_request(Uuid::new_v4(), mission()).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_events_follow_commits() {
        let (service, _) = setup().await;
        let mut events = service.subscribe();
        let staff = register(&service, "Rossi", Role::Staff).await;
        let request = service.submit_request(staff.id, mission()).await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            WorkflowEvent::EmployeeUpdated { .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            WorkflowEvent::RequestSubmitted {
                request_id: request.id,
                requester_id: staff.id,
                auto_approved: false,
            }
        );

        // A failed operation emits nothing
        let result = service
            .decide_pre_mission(request.id, staff.id, Decision::Approve, None)
            .await;
        assert!(result.is_err());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_request_only_by_requester_while_pending() {
        let (service, _) = setup().await;
        let admin = register(&service, "Admin", Role::Administration).await;
        let manager = register(&service, "Bianchi", Role::Manager).await;
        let staff = register(&service, "Rossi", Role::Staff).await;
        service
            .assign_manager(admin.id, staff.id, Some(manager.id))
            .await
            .unwrap();
        let request = service.submit_request(staff.id, mission()).await.unwrap();

        let mut edited = mission();
        edited.location = "Turin".to_string();
        let denied = service
            .update_request(request.id, manager.id, edited.clone())
            .await;
        assert!(matches!(denied, Err(AppError::Unauthorized(_))));

        let updated = service
            .update_request(request.id, staff.id, edited.clone())
            .await
            .unwrap();
        assert_eq!(updated.mission.location, "Turin");

        service
            .decide_pre_mission(request.id, manager.id, Decision::Approve, None)
            .await
            .unwrap();
        let locked = service.update_request(request.id, staff.id, edited).await;
        assert!(matches!(locked, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_override_status_requires_superuser() {
        let (service, _) = setup().await;
        let admin = register(&service, "Admin", Role::Administration).await;
        let root = service
            .seed_superuser("Root", "root@example.com")
            .await
            .unwrap();
        let staff = register(&service, "Rossi", Role::Staff).await;
        let request = service.submit_request(staff.id, mission()).await.unwrap();

        let change = StatusOverride {
            pre_status: Some(PreMissionStatus::Approved),
            ..Default::default()
        };
        let denied = service
            .override_status(admin.id, request.id, change.clone())
            .await;
        assert!(matches!(denied, Err(AppError::Unauthorized(_))));

        let updated = service
            .override_status(root.id, request.id, change)
            .await
            .unwrap();
        assert_eq!(updated.pre_status, PreMissionStatus::Approved);

        let empty = service
            .override_status(root.id, request.id, StatusOverride::default())
            .await;
        assert!(matches!(empty, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_get_request_visibility() {
        let (service, _) = setup().await;
        let admin = register(&service, "Admin", Role::Administration).await;
        let manager = register(&service, "Bianchi", Role::Manager).await;
        let staff = register(&service, "Rossi", Role::Staff).await;
        let outsider = register(&service, "Verdi", Role::Staff).await;
        service
            .assign_manager(admin.id, staff.id, Some(manager.id))
            .await
            .unwrap();
        let request = service.submit_request(staff.id, mission()).await.unwrap();

        for viewer in [staff.id, manager.id, admin.id] {
            let detail = service.get_request(request.id, viewer).await.unwrap();
            assert_eq!(detail.request.id, request.id);
            assert!(detail.expenses.is_empty());
        }

        let denied = service.get_request(request.id, outsider.id).await;
        assert!(matches!(denied, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_approved_missions_range_is_checked() {
        let (service, _) = setup().await;
        let admin = register(&service, "Admin", Role::Administration).await;
        let staff = register(&service, "Rossi", Role::Staff).await;

        let inverted = service
            .list_approved_missions(admin.id, date(2025, 6, 1), date(2025, 5, 1))
            .await;
        assert!(matches!(inverted, Err(AppError::Validation { .. })));

        let denied = service
            .list_approved_missions(staff.id, date(2025, 5, 1), date(2025, 6, 1))
            .await;
        assert!(matches!(denied, Err(AppError::Unauthorized(_))));
    }
}
