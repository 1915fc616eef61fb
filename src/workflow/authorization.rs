//! Who may approve or reject a given request
//!
//! The responsible manager acts directly; anyone holding an active
//! delegation from that manager acts on their behalf. Two conflict of
//! interest channels are closed: a manager approving their own expense
//! report, and a delegate approving the manager who delegated to them.

use chrono::NaiveDate;
use std::collections::HashSet;
use uuid::Uuid;

use super::delegation::{active_delegators_for, Delegation};
use super::request::{ApprovalPhase, TravelRequest};

/// Why an approval was granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    ResponsibleManager,
    Delegate { delegator_id: Uuid },
}

/// Why an approval was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NoResponsibleManager,
    OwnReconciliation,
    DelegatorIsRequester,
    OwnRequest,
    NoAuthority,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::NoResponsibleManager => "request has no responsible manager",
            Denial::OwnReconciliation => "managers cannot approve their own reconciliation",
            Denial::DelegatorIsRequester => "delegates cannot approve their delegator's request",
            Denial::OwnRequest => "requesters cannot approve their own request through delegation",
            Denial::NoAuthority => "actor holds no authority over this request",
        }
    }
}

/// An actor's approval authority as of one date
#[derive(Debug, Clone)]
pub struct ActorAuthority {
    pub actor_id: Uuid,
    pub as_of: NaiveDate,
    /// Managers whose authority the actor currently holds by delegation
    pub delegators: HashSet<Uuid>,
}

impl ActorAuthority {
    pub fn resolve<'a>(
        actor_id: Uuid,
        delegations: impl IntoIterator<Item = &'a Delegation>,
        as_of: NaiveDate,
    ) -> Self {
        Self {
            actor_id,
            as_of,
            delegators: active_delegators_for(delegations, actor_id, as_of),
        }
    }

    /// Managers whose requests this actor may be asked to approve
    pub fn managers_represented(&self) -> HashSet<Uuid> {
        let mut managers = self.delegators.clone();
        managers.insert(self.actor_id);
        managers
    }

    pub fn check(&self, request: &TravelRequest, phase: ApprovalPhase) -> Result<Grant, Denial> {
        let Some(manager_id) = request.responsible_manager_id else {
            return Err(Denial::NoResponsibleManager);
        };

        if self.actor_id == manager_id {
            if phase == ApprovalPhase::PostMission && self.actor_id == request.requester_id {
                return Err(Denial::OwnReconciliation);
            }
            return Ok(Grant::ResponsibleManager);
        }

        if self.delegators.contains(&manager_id) {
            if request.requester_id == manager_id {
                return Err(Denial::DelegatorIsRequester);
            }
            if request.requester_id == self.actor_id {
                return Err(Denial::OwnRequest);
            }
            return Ok(Grant::Delegate {
                delegator_id: manager_id,
            });
        }

        Err(Denial::NoAuthority)
    }

    pub fn can_approve(&self, request: &TravelRequest, phase: ApprovalPhase) -> bool {
        self.check(request, phase).is_ok()
    }
}

/// Whether `actor_id` may decide `phase` of `request` on `as_of`
pub fn is_authorized_approver<'a>(
    request: &TravelRequest,
    actor_id: Uuid,
    delegations: impl IntoIterator<Item = &'a Delegation>,
    as_of: NaiveDate,
    phase: ApprovalPhase,
) -> bool {
    ActorAuthority::resolve(actor_id, delegations, as_of).can_approve(request, phase)
}
