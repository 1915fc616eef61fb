//! Time-bounded delegation of approval authority
//!
//! A manager grants another employee the right to act with their approval
//! authority between a start date and an optional end date (inclusive).

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::Employee;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: Uuid,
    pub delegator_id: Uuid,
    pub delegate_id: Uuid,
    pub start_date: NaiveDate,
    /// Absent means open-ended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Delegation {
    /// Build a new delegation after checking both parties and the date range
    pub fn new(
        delegator: &Employee,
        delegate: &Employee,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !delegator.role.has_manager_authority() {
            return Err(AppError::Unauthorized(format!(
                "employee {} has no approval authority to delegate",
                delegator.id
            )));
        }
        if delegator.id == delegate.id {
            return Err(AppError::validation(
                "delegate_id",
                "cannot delegate to yourself",
            ));
        }
        if let Some(end) = end_date {
            if end < start_date {
                return Err(AppError::validation(
                    "end_date",
                    "end date must not be before the start date",
                ));
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            delegator_id: delegator.id,
            delegate_id: delegate.id,
            start_date,
            end_date,
            created_at: now,
        })
    }

    /// Active on `as_of` iff start <= as_of and the end is absent or >= as_of
    pub fn is_active(&self, as_of: NaiveDate) -> bool {
        self.start_date <= as_of && self.end_date.map_or(true, |end| end >= as_of)
    }

    pub fn has_expired(&self, as_of: NaiveDate) -> bool {
        self.end_date.is_some_and(|end| end < as_of)
    }

    /// Decide how a revocation requested by `actor_id` on `today` applies
    pub fn plan_revocation(&self, actor_id: Uuid, today: NaiveDate) -> Result<Revocation> {
        if actor_id != self.delegator_id {
            return Err(AppError::Unauthorized(
                "only the delegating manager can revoke a delegation".to_string(),
            ));
        }

        // Ending the day before its own start would break start <= end
        if self.start_date >= today {
            Ok(Revocation::Delete)
        } else if self.has_expired(today) {
            Ok(Revocation::AlreadyExpired)
        } else {
            Ok(Revocation::EndOn {
                end_date: today - Duration::days(1),
            })
        }
    }
}

/// Outcome of revoking a delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Revocation {
    /// Not started before today: the record is removed
    Delete,
    /// Already past its end date: nothing changes
    AlreadyExpired,
    /// Currently active: closed the day before revocation
    EndOn { end_date: NaiveDate },
}

/// Managers from whom `employee_id` holds delegated authority on `as_of`
pub fn active_delegators_for<'a>(
    delegations: impl IntoIterator<Item = &'a Delegation>,
    employee_id: Uuid,
    as_of: NaiveDate,
) -> HashSet<Uuid> {
    delegations
        .into_iter()
        .filter(|d| d.delegate_id == employee_id && d.is_active(as_of))
        .map(|d| d.delegator_id)
        .collect()
}
