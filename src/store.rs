//! Database store for employees, delegations, travel requests and expenses
//!
//! Query functions take a `&mut SqliteConnection` so that a workflow
//! operation can run all of its reads and writes inside one transaction.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Employee, Role};
use crate::workflow::delegation::Delegation;
use crate::workflow::ledger::Expense;
use crate::workflow::request::{
    ApprovalRecord, FinalOutcome, MissionDetails, PostMissionStatus, PreMissionStatus,
    Reconciliation, TransportMode, TravelRequest,
};

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// A plain connection for read-only operations
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    // Employee operations

    pub async fn insert_employee(conn: &mut SqliteConnection, employee: &Employee) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO employees (id, name, email, role, manager_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(employee.id.to_string())
        .bind(&employee.name)
        .bind(&employee.email)
        .bind(employee.role.as_str())
        .bind(employee.manager_id.map(|u| u.to_string()))
        .bind(employee.created_at)
        .bind(employee.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get_employee(conn: &mut SqliteConnection, id: Uuid) -> Result<Employee> {
        let row = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT id, name, email, role, manager_id, created_at, updated_at
            FROM employees
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", id)))?;

        row.try_into()
    }

    pub async fn find_employee_by_email(
        conn: &mut SqliteConnection,
        email: &str,
    ) -> Result<Option<Employee>> {
        let row = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT id, name, email, role, manager_id, created_at, updated_at
            FROM employees
            WHERE email = ? COLLATE NOCASE
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    pub async fn list_employees(conn: &mut SqliteConnection) -> Result<Vec<Employee>> {
        let rows = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT id, name, email, role, manager_id, created_at, updated_at
            FROM employees
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Persist role and manager assignment
    pub async fn update_employee(conn: &mut SqliteConnection, employee: &Employee) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE employees SET role = ?, manager_id = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(employee.role.as_str())
        .bind(employee.manager_id.map(|u| u.to_string()))
        .bind(employee.updated_at)
        .bind(employee.id.to_string())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Employee {} not found",
                employee.id
            )));
        }
        Ok(())
    }

    // Delegation operations

    pub async fn insert_delegation(
        conn: &mut SqliteConnection,
        delegation: &Delegation,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delegations (id, delegator_id, delegate_id, start_date, end_date, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(delegation.id.to_string())
        .bind(delegation.delegator_id.to_string())
        .bind(delegation.delegate_id.to_string())
        .bind(delegation.start_date)
        .bind(delegation.end_date)
        .bind(delegation.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get_delegation(conn: &mut SqliteConnection, id: Uuid) -> Result<Delegation> {
        let row = sqlx::query_as::<_, DelegationRow>(
            r#"
            SELECT id, delegator_id, delegate_id, start_date, end_date, created_at
            FROM delegations
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Delegation {} not found", id)))?;

        row.try_into()
    }

    /// Every delegation naming `delegate_id` as delegate, active or not
    pub async fn delegations_to(
        conn: &mut SqliteConnection,
        delegate_id: Uuid,
    ) -> Result<Vec<Delegation>> {
        let rows = sqlx::query_as::<_, DelegationRow>(
            r#"
            SELECT id, delegator_id, delegate_id, start_date, end_date, created_at
            FROM delegations
            WHERE delegate_id = ?
            ORDER BY start_date ASC
            "#,
        )
        .bind(delegate_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Delegations granted by or to `employee_id`
    pub async fn delegations_involving(
        conn: &mut SqliteConnection,
        employee_id: Uuid,
    ) -> Result<Vec<Delegation>> {
        let rows = sqlx::query_as::<_, DelegationRow>(
            r#"
            SELECT id, delegator_id, delegate_id, start_date, end_date, created_at
            FROM delegations
            WHERE delegator_id = ? OR delegate_id = ?
            ORDER BY start_date DESC, created_at DESC
            "#,
        )
        .bind(employee_id.to_string())
        .bind(employee_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn set_delegation_end(
        conn: &mut SqliteConnection,
        id: Uuid,
        end_date: NaiveDate,
    ) -> Result<()> {
        sqlx::query("UPDATE delegations SET end_date = ? WHERE id = ?")
            .bind(end_date)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    pub async fn delete_delegation(conn: &mut SqliteConnection, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM delegations WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    // Travel request operations

    pub async fn insert_request(conn: &mut SqliteConnection, request: &TravelRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO travel_requests (
                id, requester_id, responsible_manager_id,
                mission_date, start_time, location, justification, transport_mode,
                extra_hours_authorized, clock_in_time, clock_out_time, clock_reason, notes,
                pre_status, pre_approver_id, pre_decided_at, pre_comment,
                post_status, expense_total_cents, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.id.to_string())
        .bind(request.requester_id.to_string())
        .bind(request.responsible_manager_id.map(|u| u.to_string()))
        .bind(request.mission.mission_date)
        .bind(request.mission.start_time)
        .bind(&request.mission.location)
        .bind(&request.mission.justification)
        .bind(request.mission.transport_mode.as_str())
        .bind(request.mission.extra_hours_authorized)
        .bind(request.mission.clock_in_time)
        .bind(request.mission.clock_out_time)
        .bind(&request.mission.clock_reason)
        .bind(&request.mission.notes)
        .bind(request.pre_status.as_str())
        .bind(request.pre_approval.as_ref().map(|a| a.approver_id.to_string()))
        .bind(request.pre_approval.as_ref().map(|a| a.decided_at))
        .bind(request.pre_approval.as_ref().and_then(|a| a.comment.clone()))
        .bind(request.post_status.as_str())
        .bind(request.expense_total_cents)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Write back every mutable column of a request
    pub async fn save_request(conn: &mut SqliteConnection, request: &TravelRequest) -> Result<()> {
        let reconciliation = request.reconciliation.as_ref();
        let post = request.post_approval.as_ref();
        let final_approval = request.final_approval.as_ref();

        let result = sqlx::query(
            r#"
            UPDATE travel_requests SET
                mission_date = ?, start_time = ?, location = ?, justification = ?,
                transport_mode = ?, extra_hours_authorized = ?, clock_in_time = ?,
                clock_out_time = ?, clock_reason = ?, notes = ?,
                pre_status = ?, pre_approver_id = ?, pre_decided_at = ?, pre_comment = ?,
                post_status = ?, actual_start = ?, actual_end = ?, lunch_start = ?,
                lunch_end = ?, worked_hours = ?, distance_km = ?, reconciliation_notes = ?,
                reconciled_at = ?, post_approver_id = ?, post_decided_at = ?, post_comment = ?,
                expense_total_cents = ?,
                final_status = ?, final_approver_id = ?, final_decided_at = ?, final_comment = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(request.mission.mission_date)
        .bind(request.mission.start_time)
        .bind(&request.mission.location)
        .bind(&request.mission.justification)
        .bind(request.mission.transport_mode.as_str())
        .bind(request.mission.extra_hours_authorized)
        .bind(request.mission.clock_in_time)
        .bind(request.mission.clock_out_time)
        .bind(&request.mission.clock_reason)
        .bind(&request.mission.notes)
        .bind(request.pre_status.as_str())
        .bind(request.pre_approval.as_ref().map(|a| a.approver_id.to_string()))
        .bind(request.pre_approval.as_ref().map(|a| a.decided_at))
        .bind(request.pre_approval.as_ref().and_then(|a| a.comment.clone()))
        .bind(request.post_status.as_str())
        .bind(reconciliation.map(|r| r.actual_start))
        .bind(reconciliation.map(|r| r.actual_end))
        .bind(reconciliation.and_then(|r| r.lunch_start))
        .bind(reconciliation.and_then(|r| r.lunch_end))
        .bind(reconciliation.map(|r| r.worked_hours))
        .bind(reconciliation.map(|r| r.distance_km))
        .bind(reconciliation.and_then(|r| r.notes.clone()))
        .bind(reconciliation.map(|r| r.submitted_at))
        .bind(post.map(|a| a.approver_id.to_string()))
        .bind(post.map(|a| a.decided_at))
        .bind(post.and_then(|a| a.comment.clone()))
        .bind(request.expense_total_cents)
        .bind(request.final_status.map(|s| s.as_str()))
        .bind(final_approval.map(|a| a.approver_id.to_string()))
        .bind(final_approval.map(|a| a.decided_at))
        .bind(final_approval.and_then(|a| a.comment.clone()))
        .bind(request.updated_at)
        .bind(request.id.to_string())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Travel request {} not found",
                request.id
            )));
        }
        Ok(())
    }

    pub async fn get_request(conn: &mut SqliteConnection, id: Uuid) -> Result<TravelRequest> {
        let sql = format!("{} WHERE r.id = ?", SELECT_REQUESTS);
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Travel request {} not found", id)))?;

        let (request, _) = row.into_parts()?;
        Ok(request)
    }

    /// Requests submitted by `requester_id` or owned by any of `manager_ids`,
    /// newest mission first, each paired with the requester's name
    pub async fn requests_for(
        conn: &mut SqliteConnection,
        requester_id: Uuid,
        manager_ids: &HashSet<Uuid>,
    ) -> Result<Vec<(TravelRequest, String)>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "{} WHERE r.requester_id = ",
            SELECT_REQUESTS
        ));
        query.push_bind(requester_id.to_string());
        if !manager_ids.is_empty() {
            query.push(" OR r.responsible_manager_id IN (");
            let mut ids = query.separated(", ");
            for id in manager_ids {
                ids.push_bind(id.to_string());
            }
            ids.push_unseparated(")");
        }
        query.push(" ORDER BY r.mission_date DESC, r.created_at DESC");

        let rows = query
            .build_query_as::<RequestRow>()
            .fetch_all(&mut *conn)
            .await?;

        rows.into_iter().map(RequestRow::into_parts).collect()
    }

    /// Ready for reimbursement and not finalized, oldest mission first
    pub async fn requests_awaiting_finalization(
        conn: &mut SqliteConnection,
    ) -> Result<Vec<(TravelRequest, String)>> {
        let sql = format!(
            "{} WHERE r.post_status IN (?, ?) AND r.final_status IS NULL \
             ORDER BY r.mission_date ASC, r.created_at ASC",
            SELECT_REQUESTS
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(PostMissionStatus::AwaitingReimbursement.as_str())
            .bind(PostMissionStatus::ReimbursementRequested.as_str())
            .fetch_all(&mut *conn)
            .await?;

        rows.into_iter().map(RequestRow::into_parts).collect()
    }

    /// Pre-approved missions whose date falls in `from..=to`
    pub async fn approved_missions_between(
        conn: &mut SqliteConnection,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(TravelRequest, String)>> {
        let sql = format!(
            "{} WHERE r.pre_status = ? AND r.mission_date BETWEEN ? AND ? \
             ORDER BY r.mission_date ASC, e.name ASC",
            SELECT_REQUESTS
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(PreMissionStatus::Approved.as_str())
            .bind(from)
            .bind(to)
            .fetch_all(&mut *conn)
            .await?;

        rows.into_iter().map(RequestRow::into_parts).collect()
    }

    // Expense operations

    /// Delete every expense of the request, then insert `expenses`
    pub async fn replace_expenses(
        conn: &mut SqliteConnection,
        request_id: Uuid,
        expenses: &[Expense],
    ) -> Result<()> {
        sqlx::query("DELETE FROM expenses WHERE request_id = ?")
            .bind(request_id.to_string())
            .execute(&mut *conn)
            .await?;

        for expense in expenses {
            sqlx::query(
                r#"
                INSERT INTO expenses (id, request_id, category, description, amount_cents, expense_date, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(expense.id.to_string())
            .bind(expense.request_id.to_string())
            .bind(&expense.category)
            .bind(&expense.description)
            .bind(expense.amount_cents)
            .bind(expense.expense_date)
            .bind(expense.created_at)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    pub async fn list_expenses(conn: &mut SqliteConnection, request_id: Uuid) -> Result<Vec<Expense>> {
        let rows = sqlx::query_as::<_, ExpenseRow>(
            r#"
            SELECT id, request_id, category, description, amount_cents, expense_date, created_at
            FROM expenses
            WHERE request_id = ?
            ORDER BY expense_date ASC, created_at ASC
            "#,
        )
        .bind(request_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Sum of the stored expense lines, recomputed from the ledger
    pub async fn expense_total(conn: &mut SqliteConnection, request_id: Uuid) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM expenses WHERE request_id = ?",
        )
        .bind(request_id.to_string())
        .fetch_one(&mut *conn)
        .await?;

        Ok(total)
    }

    // Legacy data

    /// Rewrite historical spellings of roles, statuses and transport modes to
    /// their canonical values. Returns the number of rows changed.
    pub async fn normalize_legacy_values(&self) -> Result<u64> {
        let mut tx = self.begin().await?;

        // Granted reimbursements split on the recomputed ledger total
        let mut changed = sqlx::query(
            r#"
            UPDATE travel_requests SET
                expense_total_cents = (
                    SELECT COALESCE(SUM(amount_cents), 0) FROM expenses
                    WHERE expenses.request_id = travel_requests.id
                ),
                post_status = CASE
                    WHEN (
                        SELECT COALESCE(SUM(amount_cents), 0) FROM expenses
                        WHERE expenses.request_id = travel_requests.id
                    ) > 0 THEN ?
                    ELSE ?
                END
            WHERE post_status = 'Rimborso Concesso'
            "#,
        )
        .bind(PostMissionStatus::AwaitingReimbursement.as_str())
        .bind(PostMissionStatus::Concluded.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        changed += rewrite_column(&mut tx, "employees", "role", |s| {
            s.parse::<Role>().map(|v| v.as_str())
        })
        .await?;
        changed += rewrite_column(&mut tx, "travel_requests", "pre_status", |s| {
            s.parse::<PreMissionStatus>().map(|v| v.as_str())
        })
        .await?;
        changed += rewrite_column(&mut tx, "travel_requests", "post_status", |s| {
            s.parse::<PostMissionStatus>().map(|v| v.as_str())
        })
        .await?;
        changed += rewrite_column(&mut tx, "travel_requests", "final_status", |s| {
            s.parse::<FinalOutcome>().map(|v| v.as_str())
        })
        .await?;
        changed += rewrite_column(&mut tx, "travel_requests", "transport_mode", |s| {
            s.parse::<TransportMode>().map(|v| v.as_str())
        })
        .await?;

        tx.commit().await?;

        if changed > 0 {
            tracing::info!(rows = changed, "Normalized legacy values");
        }
        Ok(changed)
    }
}

/// Replace every non-canonical value of `table.column` with its canonical
/// spelling. Unknown values are left in place and reported.
async fn rewrite_column<F>(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    canonical: F,
) -> Result<u64>
where
    F: Fn(&str) -> std::result::Result<&'static str, String>,
{
    let values: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT DISTINCT {column} FROM {table} WHERE {column} IS NOT NULL"
    ))
    .fetch_all(&mut *conn)
    .await?;

    let mut changed = 0;
    for value in values {
        match canonical(&value) {
            Ok(canonical) if canonical != value => {
                changed += sqlx::query(&format!(
                    "UPDATE {table} SET {column} = ? WHERE {column} = ?"
                ))
                .bind(canonical)
                .bind(&value)
                .execute(&mut *conn)
                .await?
                .rows_affected();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(table, column, value = %value, "Leaving unrecognized value: {}", e);
            }
        }
    }

    Ok(changed)
}

// Internal row types for sqlx

fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| AppError::Internal(format!("Invalid {} UUID: {}", column, e)))
}

fn parse_optional_uuid(column: &str, value: Option<String>) -> Result<Option<Uuid>> {
    value.map(|v| parse_uuid(column, &v)).transpose()
}

#[derive(sqlx::FromRow)]
struct EmployeeRow {
    id: String,
    name: String,
    email: String,
    role: String,
    manager_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EmployeeRow> for Employee {
    type Error = AppError;

    fn try_from(row: EmployeeRow) -> Result<Self> {
        Ok(Employee {
            id: parse_uuid("employee", &row.id)?,
            name: row.name,
            email: row.email,
            role: row
                .role
                .parse::<Role>()
                .map_err(|e| AppError::Internal(format!("Invalid role: {}", e)))?,
            manager_id: parse_optional_uuid("manager_id", row.manager_id)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DelegationRow {
    id: String,
    delegator_id: String,
    delegate_id: String,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DelegationRow> for Delegation {
    type Error = AppError;

    fn try_from(row: DelegationRow) -> Result<Self> {
        Ok(Delegation {
            id: parse_uuid("delegation", &row.id)?,
            delegator_id: parse_uuid("delegator_id", &row.delegator_id)?,
            delegate_id: parse_uuid("delegate_id", &row.delegate_id)?,
            start_date: row.start_date,
            end_date: row.end_date,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExpenseRow {
    id: String,
    request_id: String,
    category: String,
    description: String,
    amount_cents: i64,
    expense_date: NaiveDate,
    created_at: DateTime<Utc>,
}

impl TryFrom<ExpenseRow> for Expense {
    type Error = AppError;

    fn try_from(row: ExpenseRow) -> Result<Self> {
        Ok(Expense {
            id: parse_uuid("expense", &row.id)?,
            request_id: parse_uuid("request_id", &row.request_id)?,
            category: row.category,
            description: row.description,
            amount_cents: row.amount_cents,
            expense_date: row.expense_date,
            created_at: row.created_at,
        })
    }
}

const SELECT_REQUESTS: &str = r#"
    SELECT
        r.id, r.requester_id, r.responsible_manager_id,
        r.mission_date, r.start_time, r.location, r.justification, r.transport_mode,
        r.extra_hours_authorized, r.clock_in_time, r.clock_out_time, r.clock_reason, r.notes,
        r.pre_status, r.pre_approver_id, r.pre_decided_at, r.pre_comment,
        r.post_status, r.actual_start, r.actual_end, r.lunch_start, r.lunch_end,
        r.worked_hours, r.distance_km, r.reconciliation_notes, r.reconciled_at,
        r.post_approver_id, r.post_decided_at, r.post_comment,
        r.expense_total_cents,
        r.final_status, r.final_approver_id, r.final_decided_at, r.final_comment,
        r.created_at, r.updated_at,
        e.name AS requester_name
    FROM travel_requests r
    JOIN employees e ON e.id = r.requester_id
"#;

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: String,
    requester_id: String,
    responsible_manager_id: Option<String>,
    mission_date: NaiveDate,
    start_time: NaiveTime,
    location: String,
    justification: String,
    transport_mode: String,
    extra_hours_authorized: bool,
    clock_in_time: Option<NaiveTime>,
    clock_out_time: Option<NaiveTime>,
    clock_reason: Option<String>,
    notes: Option<String>,
    pre_status: String,
    pre_approver_id: Option<String>,
    pre_decided_at: Option<DateTime<Utc>>,
    pre_comment: Option<String>,
    post_status: String,
    actual_start: Option<NaiveTime>,
    actual_end: Option<NaiveTime>,
    lunch_start: Option<NaiveTime>,
    lunch_end: Option<NaiveTime>,
    worked_hours: Option<i64>,
    distance_km: Option<f64>,
    reconciliation_notes: Option<String>,
    reconciled_at: Option<DateTime<Utc>>,
    post_approver_id: Option<String>,
    post_decided_at: Option<DateTime<Utc>>,
    post_comment: Option<String>,
    expense_total_cents: i64,
    final_status: Option<String>,
    final_approver_id: Option<String>,
    final_decided_at: Option<DateTime<Utc>>,
    final_comment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    requester_name: String,
}

fn approval_record(
    column: &str,
    approver_id: Option<String>,
    decided_at: Option<DateTime<Utc>>,
    comment: Option<String>,
) -> Result<Option<ApprovalRecord>> {
    match (approver_id, decided_at) {
        (Some(id), Some(decided_at)) => Ok(Some(ApprovalRecord {
            approver_id: parse_uuid(column, &id)?,
            decided_at,
            comment,
        })),
        _ => Ok(None),
    }
}

impl RequestRow {
    fn into_parts(self) -> Result<(TravelRequest, String)> {
        let reconciliation = match (self.actual_start, self.actual_end, self.reconciled_at) {
            (Some(actual_start), Some(actual_end), Some(submitted_at)) => Some(Reconciliation {
                actual_start,
                actual_end,
                lunch_start: self.lunch_start,
                lunch_end: self.lunch_end,
                worked_hours: self.worked_hours.unwrap_or(0),
                distance_km: self.distance_km.unwrap_or(0.0),
                notes: self.reconciliation_notes,
                submitted_at,
            }),
            _ => None,
        };

        let request = TravelRequest {
            id: parse_uuid("request", &self.id)?,
            requester_id: parse_uuid("requester_id", &self.requester_id)?,
            responsible_manager_id: parse_optional_uuid(
                "responsible_manager_id",
                self.responsible_manager_id,
            )?,
            mission: MissionDetails {
                mission_date: self.mission_date,
                start_time: self.start_time,
                location: self.location,
                justification: self.justification,
                transport_mode: self
                    .transport_mode
                    .parse::<TransportMode>()
                    .map_err(|e| AppError::Internal(format!("Invalid transport mode: {}", e)))?,
                extra_hours_authorized: self.extra_hours_authorized,
                clock_in_time: self.clock_in_time,
                clock_out_time: self.clock_out_time,
                clock_reason: self.clock_reason,
                notes: self.notes,
            },
            pre_status: self
                .pre_status
                .parse::<PreMissionStatus>()
                .map_err(|e| AppError::Internal(format!("Invalid pre-mission status: {}", e)))?,
            pre_approval: approval_record(
                "pre_approver_id",
                self.pre_approver_id,
                self.pre_decided_at,
                self.pre_comment,
            )?,
            post_status: self
                .post_status
                .parse::<PostMissionStatus>()
                .map_err(|e| AppError::Internal(format!("Invalid post-mission status: {}", e)))?,
            reconciliation,
            post_approval: approval_record(
                "post_approver_id",
                self.post_approver_id,
                self.post_decided_at,
                self.post_comment,
            )?,
            expense_total_cents: self.expense_total_cents,
            final_status: self
                .final_status
                .map(|s| s.parse::<FinalOutcome>())
                .transpose()
                .map_err(|e| AppError::Internal(format!("Invalid final status: {}", e)))?,
            final_approval: approval_record(
                "final_approver_id",
                self.final_approver_id,
                self.final_decided_at,
                self.final_comment,
            )?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        Ok((request, self.requester_name))
    }
}
