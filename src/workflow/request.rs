//! Travel requests and their phase state machines
//!
//! A request moves through a pre-mission approval, a post-mission
//! reconciliation and, when expenses exist, a final reimbursement decision.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Employee;

/// Pre-mission approval status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreMissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl PreMissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreMissionStatus::Pending => "pending",
            PreMissionStatus::Approved => "approved",
            PreMissionStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for PreMissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "In attesa" | "In Attesa" => Ok(PreMissionStatus::Pending),
            "approved" | "Approvata" => Ok(PreMissionStatus::Approved),
            "rejected" | "Rifiutata" => Ok(PreMissionStatus::Rejected),
            _ => Err(format!("Invalid pre-mission status: {}", s)),
        }
    }
}

/// Post-mission reconciliation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostMissionStatus {
    /// Pre-mission not approved yet, nothing to reconcile
    NotApplicable,
    /// Reconciliation saved but not submitted
    Draft,
    /// Reconciliation submitted, awaiting the approver
    Pending,
    /// Sent back to the requester for correction
    RejectedPost,
    /// Approved with expenses; ready for reimbursement
    AwaitingReimbursement,
    /// Requester asked administration to pay out
    ReimbursementRequested,
    /// Approved without expenses
    Concluded,
    Reimbursed,
    NotReimbursed,
}

impl PostMissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostMissionStatus::NotApplicable => "not_applicable",
            PostMissionStatus::Draft => "draft",
            PostMissionStatus::Pending => "pending",
            PostMissionStatus::RejectedPost => "rejected_post",
            PostMissionStatus::AwaitingReimbursement => "awaiting_reimbursement",
            PostMissionStatus::ReimbursementRequested => "reimbursement_requested",
            PostMissionStatus::Concluded => "concluded",
            PostMissionStatus::Reimbursed => "reimbursed",
            PostMissionStatus::NotReimbursed => "not_reimbursed",
        }
    }

    /// States the requester may (re)enter reconciliation data from
    pub fn accepts_reconciliation(&self) -> bool {
        matches!(
            self,
            PostMissionStatus::NotApplicable
                | PostMissionStatus::Draft
                | PostMissionStatus::RejectedPost
        )
    }

    /// Ready-for-reimbursement family, visible to administration
    pub fn is_ready_for_reimbursement(&self) -> bool {
        matches!(
            self,
            PostMissionStatus::AwaitingReimbursement | PostMissionStatus::ReimbursementRequested
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostMissionStatus::Concluded
                | PostMissionStatus::Reimbursed
                | PostMissionStatus::NotReimbursed
        )
    }
}

impl std::str::FromStr for PostMissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_applicable" | "N/A" => Ok(PostMissionStatus::NotApplicable),
            "draft" | "Bozza" => Ok(PostMissionStatus::Draft),
            "pending" | "In attesa" | "In Attesa" => Ok(PostMissionStatus::Pending),
            "rejected_post" | "Rifiutata" => Ok(PostMissionStatus::RejectedPost),
            "awaiting_reimbursement" | "Pronto per Rimborso" | "Pronta per rimborso" => {
                Ok(PostMissionStatus::AwaitingReimbursement)
            }
            "reimbursement_requested" | "Rimborso Richiesto" => {
                Ok(PostMissionStatus::ReimbursementRequested)
            }
            "concluded" | "Conclusa" => Ok(PostMissionStatus::Concluded),
            "reimbursed" | "Rimborsata" => Ok(PostMissionStatus::Reimbursed),
            "not_reimbursed" | "Non rimborsata" | "Rimborso Rifiutato" => {
                Ok(PostMissionStatus::NotReimbursed)
            }
            _ => Err(format!("Invalid post-mission status: {}", s)),
        }
    }
}

/// Administration's terminal reimbursement decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalOutcome {
    Reimbursed,
    NotReimbursed,
}

impl FinalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalOutcome::Reimbursed => "reimbursed",
            FinalOutcome::NotReimbursed => "not_reimbursed",
        }
    }
}

impl From<FinalOutcome> for PostMissionStatus {
    fn from(outcome: FinalOutcome) -> Self {
        match outcome {
            FinalOutcome::Reimbursed => PostMissionStatus::Reimbursed,
            FinalOutcome::NotReimbursed => PostMissionStatus::NotReimbursed,
        }
    }
}

impl std::str::FromStr for FinalOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reimbursed" | "Rimborsata" => Ok(FinalOutcome::Reimbursed),
            "not_reimbursed" | "Non rimborsata" => Ok(FinalOutcome::NotReimbursed),
            _ => Err(format!("Invalid final outcome: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Which approval step an actor is trying to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPhase {
    PreMission,
    PostMission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationAction {
    /// Keep as an editable draft
    Save,
    /// Hand over for approval
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    OwnVehicle,
    PublicTransport,
    CompanyVehicle,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::OwnVehicle => "own_vehicle",
            TransportMode::PublicTransport => "public_transport",
            TransportMode::CompanyVehicle => "company_vehicle",
        }
    }
}

impl std::str::FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "own_vehicle" | "PROPRIO" => Ok(TransportMode::OwnVehicle),
            "public_transport" | "PUBBLICO" => Ok(TransportMode::PublicTransport),
            "company_vehicle" | "AMMINISTRAZIONE" => Ok(TransportMode::CompanyVehicle),
            _ => Err(format!("Invalid transport mode: {}", s)),
        }
    }
}

/// What the requester declares before the trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionDetails {
    pub mission_date: NaiveDate,
    pub start_time: NaiveTime,
    pub location: String,
    pub justification: String,
    pub transport_mode: TransportMode,
    /// Authorization to work beyond ordinary hours
    pub extra_hours_authorized: bool,
    /// Authorized clock-in/clock-out times away from the office
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_in_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_out_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Who decided a phase, when, and what they said
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approver_id: Uuid,
    pub decided_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Actual times and distances reported after the trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub actual_start: NaiveTime,
    pub actual_end: NaiveTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lunch_start: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lunch_end: Option<NaiveTime>,
    /// Net worked time, whole hours
    pub worked_hours: i64,
    pub distance_km: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    /// Authority who must approve; equals the requester for a self-managing manager
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responsible_manager_id: Option<Uuid>,
    pub mission: MissionDetails,
    pub pre_status: PreMissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_approval: Option<ApprovalRecord>,
    pub post_status: PostMissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<Reconciliation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_approval: Option<ApprovalRecord>,
    /// Display cache of the expense ledger total
    pub expense_total_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_status: Option<FinalOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_approval: Option<ApprovalRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TravelRequest {
    /// Create a request for `requester`. A self-managing manager's request
    /// is approved on the spot with the requester as approver.
    pub fn new(requester: &Employee, mission: MissionDetails, now: DateTime<Utc>) -> Self {
        let mut request = Self {
            id: Uuid::new_v4(),
            requester_id: requester.id,
            responsible_manager_id: requester.manager_id,
            mission,
            pre_status: PreMissionStatus::Pending,
            pre_approval: None,
            post_status: PostMissionStatus::NotApplicable,
            reconciliation: None,
            post_approval: None,
            expense_total_cents: 0,
            final_status: None,
            final_approval: None,
            created_at: now,
            updated_at: now,
        };

        if requester.is_self_managing() {
            request.pre_status = PreMissionStatus::Approved;
            request.pre_approval = Some(ApprovalRecord {
                approver_id: requester.id,
                decided_at: now,
                comment: None,
            });
        }

        request
    }

    /// The requester is their own responsible manager
    pub fn is_self_managed(&self) -> bool {
        self.responsible_manager_id == Some(self.requester_id)
    }

    /// Approval step that is currently open for this request, if any
    pub fn open_phase(&self) -> Option<ApprovalPhase> {
        if self.pre_status == PreMissionStatus::Pending {
            Some(ApprovalPhase::PreMission)
        } else if self.post_status == PostMissionStatus::Pending {
            Some(ApprovalPhase::PostMission)
        } else {
            None
        }
    }

    /// Replace the mission details while the request is still undecided
    pub fn update_mission(&mut self, mission: MissionDetails, now: DateTime<Utc>) -> Result<(), String> {
        if self.pre_status != PreMissionStatus::Pending {
            return Err(format!(
                "Cannot edit request with pre-mission status: {}",
                self.pre_status.as_str()
            ));
        }
        self.mission = mission;
        self.updated_at = now;
        Ok(())
    }

    /// Approve or reject the intent to travel
    pub fn decide_pre_mission(
        &mut self,
        approver_id: Uuid,
        decision: Decision,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if self.pre_status != PreMissionStatus::Pending {
            return Err(format!(
                "Cannot decide request with pre-mission status: {}",
                self.pre_status.as_str()
            ));
        }
        self.pre_status = match decision {
            Decision::Approve => PreMissionStatus::Approved,
            Decision::Reject => PreMissionStatus::Rejected,
        };
        self.pre_approval = Some(ApprovalRecord {
            approver_id,
            decided_at: now,
            comment,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Store reconciliation data; `Submit` hands it over for approval
    pub fn reconcile(
        &mut self,
        reconciliation: Reconciliation,
        action: ReconciliationAction,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if self.pre_status != PreMissionStatus::Approved {
            return Err(format!(
                "Cannot reconcile request with pre-mission status: {}",
                self.pre_status.as_str()
            ));
        }
        if !self.post_status.accepts_reconciliation() {
            return Err(format!(
                "Cannot reconcile request with post-mission status: {}",
                self.post_status.as_str()
            ));
        }
        self.reconciliation = Some(reconciliation);
        self.post_status = match action {
            ReconciliationAction::Save => PostMissionStatus::Draft,
            ReconciliationAction::Submit => PostMissionStatus::Pending,
        };
        self.updated_at = now;
        Ok(())
    }

    /// Approve or reject a submitted reconciliation. The outcome of an
    /// approval depends on the recomputed expense total.
    pub fn decide_post_mission(
        &mut self,
        approver_id: Uuid,
        decision: Decision,
        comment: Option<String>,
        expense_total_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if self.pre_status != PreMissionStatus::Approved {
            return Err(format!(
                "Cannot decide reconciliation with pre-mission status: {}",
                self.pre_status.as_str()
            ));
        }
        if self.post_status != PostMissionStatus::Pending {
            return Err(format!(
                "Cannot decide reconciliation with post-mission status: {}",
                self.post_status.as_str()
            ));
        }
        self.post_status = match decision {
            Decision::Approve if expense_total_cents > 0 => PostMissionStatus::AwaitingReimbursement,
            Decision::Approve => PostMissionStatus::Concluded,
            Decision::Reject => PostMissionStatus::RejectedPost,
        };
        self.post_approval = Some(ApprovalRecord {
            approver_id,
            decided_at: now,
            comment,
        });
        self.expense_total_cents = expense_total_cents;
        self.updated_at = now;
        Ok(())
    }

    /// A self-managing manager's submitted reconciliation closes without
    /// an approver step, recording the requester as post-approver.
    pub fn close_self_managed_reconciliation(
        &mut self,
        expense_total_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if !self.is_self_managed() {
            return Err("Reconciliation is not self-managed".to_string());
        }
        self.decide_post_mission(
            self.requester_id,
            Decision::Approve,
            None,
            expense_total_cents,
            now,
        )
    }

    /// Requester asks administration to pay out an approved expense report
    pub fn request_reimbursement(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.post_status != PostMissionStatus::AwaitingReimbursement {
            return Err(format!(
                "Cannot request reimbursement with post-mission status: {}",
                self.post_status.as_str()
            ));
        }
        self.post_status = PostMissionStatus::ReimbursementRequested;
        self.updated_at = now;
        Ok(())
    }

    /// Record administration's terminal decision
    pub fn finalize(
        &mut self,
        approver_id: Uuid,
        outcome: FinalOutcome,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if let Some(existing) = self.final_status {
            return Err(format!(
                "Request already finalized as: {}",
                existing.as_str()
            ));
        }
        if !self.post_status.is_ready_for_reimbursement() {
            return Err(format!(
                "Cannot finalize request with post-mission status: {}",
                self.post_status.as_str()
            ));
        }
        self.final_status = Some(outcome);
        self.final_approval = Some(ApprovalRecord {
            approver_id,
            decided_at: now,
            comment,
        });
        self.post_status = outcome.into();
        self.updated_at = now;
        Ok(())
    }
}

/// Row of an actor's dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub requester_name: String,
    pub mission_date: NaiveDate,
    pub location: String,
    pub pre_status: PreMissionStatus,
    pub post_status: PostMissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_status: Option<FinalOutcome>,
    pub expense_total_cents: i64,
    /// The actor may approve or reject the open phase right now
    pub actionable: bool,
    pub created_at: DateTime<Utc>,
}

impl RequestSummary {
    pub fn new(request: &TravelRequest, requester_name: String, actionable: bool) -> Self {
        Self {
            id: request.id,
            requester_id: request.requester_id,
            requester_name,
            mission_date: request.mission.mission_date,
            location: request.mission.location.clone(),
            pre_status: request.pre_status,
            post_status: request.post_status,
            final_status: request.final_status,
            expense_total_cents: request.expense_total_cents,
            actionable,
            created_at: request.created_at,
        }
    }
}

/// Approved mission as seen by the attendance office
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub request_id: Uuid,
    pub requester_id: Uuid,
    pub requester_name: String,
    pub mission_date: NaiveDate,
    pub location: String,
    pub start_time: NaiveTime,
    pub extra_hours_authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_in_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_out_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_reason: Option<String>,
}

impl AttendanceEntry {
    pub fn new(request: &TravelRequest, requester_name: String) -> Self {
        Self {
            request_id: request.id,
            requester_id: request.requester_id,
            requester_name,
            mission_date: request.mission.mission_date,
            location: request.mission.location.clone(),
            start_time: request.mission.start_time,
            extra_hours_authorized: request.mission.extra_hours_authorized,
            clock_in_time: request.mission.clock_in_time,
            clock_out_time: request.mission.clock_out_time,
            clock_reason: request.mission.clock_reason.clone(),
        }
    }
}

/// Direct status rewrite for support
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusOverride {
    pub pre_status: Option<PreMissionStatus>,
    pub post_status: Option<PostMissionStatus>,
    pub final_status: Option<FinalOutcome>,
}

impl StatusOverride {
    pub fn is_empty(&self) -> bool {
        self.pre_status.is_none() && self.post_status.is_none() && self.final_status.is_none()
    }
}

impl TravelRequest {
    /// Apply an override without any transition checks
    pub fn apply_override(&mut self, change: &StatusOverride, now: DateTime<Utc>) {
        if let Some(pre) = change.pre_status {
            self.pre_status = pre;
        }
        if let Some(post) = change.post_status {
            self.post_status = post;
        }
        if let Some(outcome) = change.final_status {
            self.final_status = Some(outcome);
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn employee(role: Role) -> Employee {
        let now = Utc::now();
        Employee {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            email: "test@example.com".to_string(),
            role,
            manager_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn mission() -> MissionDetails {
        MissionDetails {
            mission_date: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            location: "Milan".to_string(),
            justification: "Client workshop".to_string(),
            transport_mode: TransportMode::PublicTransport,
            extra_hours_authorized: false,
            clock_in_time: None,
            clock_out_time: None,
            clock_reason: None,
            notes: None,
        }
    }

    fn reconciliation() -> Reconciliation {
        Reconciliation {
            actual_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            actual_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            lunch_start: None,
            lunch_end: None,
            worked_hours: 9,
            distance_km: 10.0,
            notes: None,
            submitted_at: Utc::now(),
        }
    }

    fn staff_request() -> (Employee, Employee, TravelRequest) {
        let manager = employee(Role::Manager);
        let mut staff = employee(Role::Staff);
        staff.manager_id = Some(manager.id);
        let request = TravelRequest::new(&staff, mission(), Utc::now());
        (manager, staff, request)
    }

    fn approved_request() -> (Employee, Employee, TravelRequest) {
        let (manager, staff, mut request) = staff_request();
        request
            .decide_pre_mission(manager.id, Decision::Approve, None, Utc::now())
            .unwrap();
        (manager, staff, request)
    }

    #[test]
    fn test_new_request_starts_pending() {
        let (manager, _, request) = staff_request();
        assert_eq!(request.pre_status, PreMissionStatus::Pending);
        assert_eq!(request.post_status, PostMissionStatus::NotApplicable);
        assert_eq!(request.responsible_manager_id, Some(manager.id));
        assert!(request.pre_approval.is_none());
        assert_eq!(request.open_phase(), Some(ApprovalPhase::PreMission));
    }

    #[test]
    fn test_self_managing_manager_is_auto_approved() {
        let mut manager = employee(Role::Manager);
        manager.manager_id = Some(manager.id);
        let now = Utc::now();
        let request = TravelRequest::new(&manager, mission(), now);

        assert_eq!(request.pre_status, PreMissionStatus::Approved);
        let approval = request.pre_approval.unwrap();
        assert_eq!(approval.approver_id, manager.id);
        assert_eq!(approval.decided_at, now);
    }

    #[test]
    fn test_manager_with_superior_is_not_auto_approved() {
        let director = employee(Role::Manager);
        let mut manager = employee(Role::Manager);
        manager.manager_id = Some(director.id);
        let request = TravelRequest::new(&manager, mission(), Utc::now());
        assert_eq!(request.pre_status, PreMissionStatus::Pending);
    }

    #[test]
    fn test_decide_pre_mission_once() {
        let (manager, _, mut request) = staff_request();
        request
            .decide_pre_mission(manager.id, Decision::Reject, Some("Budget".into()), Utc::now())
            .unwrap();
        assert_eq!(request.pre_status, PreMissionStatus::Rejected);
        assert_eq!(
            request.pre_approval.as_ref().unwrap().comment.as_deref(),
            Some("Budget")
        );

        let again = request.decide_pre_mission(manager.id, Decision::Approve, None, Utc::now());
        assert!(again.is_err());
        assert_eq!(request.pre_status, PreMissionStatus::Rejected);
    }

    #[test]
    fn test_update_mission_only_while_pending() {
        let (manager, _, mut request) = staff_request();
        let mut edited = mission();
        edited.location = "Turin".to_string();
        request.update_mission(edited.clone(), Utc::now()).unwrap();
        assert_eq!(request.mission.location, "Turin");

        request
            .decide_pre_mission(manager.id, Decision::Approve, None, Utc::now())
            .unwrap();
        assert!(request.update_mission(edited, Utc::now()).is_err());
    }

    #[test]
    fn test_reconcile_requires_pre_approval() {
        let (_, _, mut request) = staff_request();
        let result = request.reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now());
        assert!(result.is_err());
        assert_eq!(request.post_status, PostMissionStatus::NotApplicable);
    }

    #[test]
    fn test_save_then_submit_reconciliation() {
        let (_, _, mut request) = approved_request();
        request
            .reconcile(reconciliation(), ReconciliationAction::Save, Utc::now())
            .unwrap();
        assert_eq!(request.post_status, PostMissionStatus::Draft);
        assert_eq!(request.open_phase(), None);

        request
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .unwrap();
        assert_eq!(request.post_status, PostMissionStatus::Pending);
        assert_eq!(request.open_phase(), Some(ApprovalPhase::PostMission));

        // Submitted reconciliation is locked
        assert!(request
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .is_err());
    }

    #[test]
    fn test_post_approval_depends_on_total() {
        let (manager, _, mut with_expenses) = approved_request();
        with_expenses
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .unwrap();
        with_expenses
            .decide_post_mission(manager.id, Decision::Approve, None, 7_500, Utc::now())
            .unwrap();
        assert_eq!(
            with_expenses.post_status,
            PostMissionStatus::AwaitingReimbursement
        );
        assert_eq!(with_expenses.expense_total_cents, 7_500);

        let (manager, _, mut without) = approved_request();
        without
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .unwrap();
        without
            .decide_post_mission(manager.id, Decision::Approve, None, 0, Utc::now())
            .unwrap();
        assert_eq!(without.post_status, PostMissionStatus::Concluded);
    }

    #[test]
    fn test_rejected_reconciliation_returns_to_requester() {
        let (manager, _, mut request) = approved_request();
        request
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .unwrap();
        request
            .decide_post_mission(manager.id, Decision::Reject, Some("Missing receipt".into()), 100, Utc::now())
            .unwrap();
        assert_eq!(request.post_status, PostMissionStatus::RejectedPost);

        request
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .unwrap();
        assert_eq!(request.post_status, PostMissionStatus::Pending);
    }

    #[test]
    fn test_close_self_managed_reconciliation() {
        let mut manager = employee(Role::Manager);
        manager.manager_id = Some(manager.id);
        let mut request = TravelRequest::new(&manager, mission(), Utc::now());
        request
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .unwrap();
        request
            .close_self_managed_reconciliation(12_000, Utc::now())
            .unwrap();
        assert_eq!(request.post_status, PostMissionStatus::AwaitingReimbursement);
        assert_eq!(request.post_approval.unwrap().approver_id, manager.id);

        let (_, _, mut staff_request) = approved_request();
        staff_request
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .unwrap();
        assert!(staff_request
            .close_self_managed_reconciliation(0, Utc::now())
            .is_err());
    }

    #[test]
    fn test_reimbursement_flow() {
        let (manager, _, mut request) = approved_request();
        request
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .unwrap();
        request
            .decide_post_mission(manager.id, Decision::Approve, None, 5_000, Utc::now())
            .unwrap();
        request.request_reimbursement(Utc::now()).unwrap();
        assert_eq!(
            request.post_status,
            PostMissionStatus::ReimbursementRequested
        );
        assert!(request.request_reimbursement(Utc::now()).is_err());

        let admin = Uuid::new_v4();
        request
            .finalize(admin, FinalOutcome::Reimbursed, None, Utc::now())
            .unwrap();
        assert_eq!(request.final_status, Some(FinalOutcome::Reimbursed));
        assert_eq!(request.post_status, PostMissionStatus::Reimbursed);
        assert_eq!(request.final_approval.as_ref().unwrap().approver_id, admin);
    }

    #[test]
    fn test_finalize_twice_fails_without_change() {
        let (manager, _, mut request) = approved_request();
        request
            .reconcile(reconciliation(), ReconciliationAction::Submit, Utc::now())
            .unwrap();
        request
            .decide_post_mission(manager.id, Decision::Approve, None, 5_000, Utc::now())
            .unwrap();
        request
            .finalize(Uuid::new_v4(), FinalOutcome::NotReimbursed, None, Utc::now())
            .unwrap();
        let snapshot = request.clone();

        let again = request.finalize(Uuid::new_v4(), FinalOutcome::Reimbursed, None, Utc::now());
        assert!(again.is_err());
        assert_eq!(request.final_status, snapshot.final_status);
        assert_eq!(request.post_status, PostMissionStatus::NotReimbursed);
        assert_eq!(request.updated_at, snapshot.updated_at);
    }

    #[test]
    fn test_finalize_requires_ready_state() {
        let (_, _, mut request) = approved_request();
        let result = request.finalize(Uuid::new_v4(), FinalOutcome::Reimbursed, None, Utc::now());
        assert!(result.is_err());
        assert!(request.final_status.is_none());
    }

    #[test]
    fn test_apply_override_skips_transition_rules() {
        let (_, _, mut request) = staff_request();
        let change = StatusOverride {
            post_status: Some(PostMissionStatus::Concluded),
            ..Default::default()
        };
        assert!(!change.is_empty());
        request.apply_override(&change, Utc::now());
        assert_eq!(request.pre_status, PreMissionStatus::Pending);
        assert_eq!(request.post_status, PostMissionStatus::Concluded);
        assert!(StatusOverride::default().is_empty());
    }

    #[test]
    fn test_status_legacy_spellings_normalize() {
        assert_eq!(
            "Pronto per Rimborso".parse::<PostMissionStatus>().unwrap(),
            PostMissionStatus::AwaitingReimbursement
        );
        assert_eq!(
            "Pronta per rimborso".parse::<PostMissionStatus>().unwrap(),
            PostMissionStatus::AwaitingReimbursement
        );
        assert_eq!(
            "In Attesa".parse::<PreMissionStatus>().unwrap(),
            PreMissionStatus::Pending
        );
        assert!("Rimborso Concesso".parse::<PostMissionStatus>().is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            PostMissionStatus::NotApplicable,
            PostMissionStatus::Draft,
            PostMissionStatus::Pending,
            PostMissionStatus::RejectedPost,
            PostMissionStatus::AwaitingReimbursement,
            PostMissionStatus::ReimbursementRequested,
            PostMissionStatus::Concluded,
            PostMissionStatus::Reimbursed,
            PostMissionStatus::NotReimbursed,
        ] {
            assert_eq!(status.as_str().parse::<PostMissionStatus>().unwrap(), status);
        }
    }
}
