//! Role-based permission table
//!
//! Each workflow operation names the permission it needs and checks it
//! explicitly against the acting employee's role.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{AppError, Result};
use crate::models::Role;

/// Permissions that roles can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Can submit and reconcile own travel requests
    SubmitRequest,
    /// Can grant approval authority to another employee
    Delegate,
    /// Can issue the final reimbursement decision
    FinalizeReimbursement,
    /// Can change roles and manager assignments
    ManageEmployees,
    /// Can rewrite workflow states directly
    OverrideStatus,
    /// Can browse approved missions for attendance reconciliation
    ViewAttendance,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::SubmitRequest => "submit_request",
            Permission::Delegate => "delegate",
            Permission::FinalizeReimbursement => "finalize_reimbursement",
            Permission::ManageEmployees => "manage_employees",
            Permission::OverrideStatus => "override_status",
            Permission::ViewAttendance => "view_attendance",
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "submit_request" => Ok(Permission::SubmitRequest),
            "delegate" => Ok(Permission::Delegate),
            "finalize_reimbursement" => Ok(Permission::FinalizeReimbursement),
            "manage_employees" => Ok(Permission::ManageEmployees),
            "override_status" => Ok(Permission::OverrideStatus),
            "view_attendance" => Ok(Permission::ViewAttendance),
            _ => Err(format!("Invalid permission: {}", s)),
        }
    }
}

impl Role {
    /// Permissions granted to this role.
    ///
    /// Approving a specific request is not a role permission: it is decided
    /// per request by the authorization resolver.
    pub fn permissions(&self) -> HashSet<Permission> {
        let mut perms = HashSet::new();
        match self {
            Role::Staff => {
                perms.insert(Permission::SubmitRequest);
            }
            Role::Manager => {
                perms.insert(Permission::SubmitRequest);
                perms.insert(Permission::Delegate);
            }
            Role::Administration => {
                perms.insert(Permission::SubmitRequest);
                perms.insert(Permission::FinalizeReimbursement);
                perms.insert(Permission::ManageEmployees);
                perms.insert(Permission::ViewAttendance);
            }
            Role::AttendanceOffice => {
                perms.insert(Permission::SubmitRequest);
                perms.insert(Permission::ViewAttendance);
            }
            Role::Superuser => {
                perms.insert(Permission::SubmitRequest);
                perms.insert(Permission::Delegate);
                perms.insert(Permission::ManageEmployees);
                perms.insert(Permission::OverrideStatus);
                perms.insert(Permission::ViewAttendance);
            }
        }
        perms
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

/// Fail with `Unauthorized` unless `role` holds `permission`
pub fn require(role: Role, permission: Permission) -> Result<()> {
    if role.has_permission(permission) {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "role {} lacks permission {}",
            role.as_str(),
            permission.as_str()
        )))
    }
}
