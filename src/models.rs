//! Identity model: employees and their roles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// An employee. Manager references are plain ids into the employee table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    /// Responsible manager; a Manager may point at itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    /// A Manager whose responsible manager is themself approves their own missions
    pub fn is_self_managing(&self) -> bool {
        self.role == Role::Manager && self.manager_id == Some(self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Manager,
    Administration,
    AttendanceOffice,
    Superuser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Manager => "manager",
            Role::Administration => "administration",
            Role::AttendanceOffice => "attendance_office",
            Role::Superuser => "superuser",
        }
    }

    /// Whether this role can grant its approval authority to someone else
    pub fn has_manager_authority(&self) -> bool {
        matches!(self, Role::Manager | Role::Superuser)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staff" | "Dipendente" => Ok(Role::Staff),
            "manager" | "Dirigente" => Ok(Role::Manager),
            "administration" | "Amministrazione" => Ok(Role::Administration),
            "attendance_office" | "Ufficio Presenze" => Ok(Role::AttendanceOffice),
            "superuser" | "Superuser" => Ok(Role::Superuser),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Request to register a new employee
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterEmployeeRequest {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub manager_id: Option<Uuid>,
}

/// Whether pointing `employee_id` at `manager_id` closes a loop in the
/// management chain. A self-reference ends a chain and is not a loop here.
pub fn would_create_cycle(
    employees: &HashMap<Uuid, Employee>,
    employee_id: Uuid,
    manager_id: Uuid,
) -> bool {
    if manager_id == employee_id {
        return false;
    }

    let mut seen = HashSet::new();
    let mut current = Some(manager_id);
    while let Some(id) = current {
        if id == employee_id {
            return true;
        }
        if !seen.insert(id) {
            return false;
        }
        current = employees
            .get(&id)
            .and_then(|e| e.manager_id)
            .filter(|next| *next != id);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee(role: Role) -> Employee {
        let now = Utc::now();
        Employee {
            id: Uuid::new_v4(),
            name: "Mario Rossi".to_string(),
            email: "mario.rossi@example.com".to_string(),
            role,
            manager_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_round_trips_canonical_names() {
        for role in [
            Role::Staff,
            Role::Manager,
            Role::Administration,
            Role::AttendanceOffice,
            Role::Superuser,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_role_accepts_legacy_labels() {
        assert_eq!("Dipendente".parse::<Role>().unwrap(), Role::Staff);
        assert_eq!("Dirigente".parse::<Role>().unwrap(), Role::Manager);
        assert_eq!(
            "Amministrazione".parse::<Role>().unwrap(),
            Role::Administration
        );
        assert!("Direttore".parse::<Role>().is_err());
    }

    #[test]
    fn test_self_managing_requires_manager_role() {
        let mut manager = employee(Role::Manager);
        manager.manager_id = Some(manager.id);
        assert!(manager.is_self_managing());

        let mut staff = employee(Role::Staff);
        staff.manager_id = Some(staff.id);
        assert!(!staff.is_self_managing());

        let unassigned = employee(Role::Manager);
        assert!(!unassigned.is_self_managing());
    }

    #[test]
    fn test_would_create_cycle() {
        let mut director = employee(Role::Manager);
        director.manager_id = Some(director.id);
        let mut manager = employee(Role::Manager);
        manager.manager_id = Some(director.id);
        let mut staff = employee(Role::Staff);
        staff.manager_id = Some(manager.id);

        let employees: HashMap<Uuid, Employee> = [&director, &manager, &staff]
            .into_iter()
            .map(|e| (e.id, e.clone()))
            .collect();

        // director -> staff -> manager -> director
        assert!(would_create_cycle(&employees, director.id, staff.id));
        assert!(would_create_cycle(&employees, manager.id, staff.id));
        assert!(!would_create_cycle(&employees, staff.id, director.id));
        assert!(!would_create_cycle(&employees, director.id, director.id));
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::AttendanceOffice).unwrap();
        assert_eq!(json, "\"attendance_office\"");
    }
}
