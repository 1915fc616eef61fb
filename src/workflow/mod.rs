//! Travel request workflow: delegation, authorization, state machines,
//! expense ledger and the service tying them to the store

pub mod authorization;
pub mod clock;
pub mod delegation;
pub mod ledger;
pub mod permission;
pub mod request;
pub mod service;
pub mod validation;

pub use authorization::{is_authorized_approver, ActorAuthority, Denial, Grant};
pub use clock::{Clock, FixedClock, SystemClock};
pub use delegation::{Delegation, Revocation};
pub use ledger::{Expense, ExpenseItem};
pub use permission::Permission;
pub use request::{
    ApprovalPhase, Decision, FinalOutcome, MissionDetails, PostMissionStatus, PreMissionStatus,
    ReconciliationAction, RequestSummary, StatusOverride, TransportMode, TravelRequest,
};
pub use service::{RequestDetail, TravelService, WorkflowEvent};
pub use validation::{MissionForm, ReconciliationData, ReconciliationForm};
