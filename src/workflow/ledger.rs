//! Expense ledger and worked-time arithmetic for reconciliations

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Largest single expense line accepted, in cents (one million euro).
/// Keeps ledger sums far from `i64` overflow.
pub const MAX_EXPENSE_CENTS: i64 = 100_000_000;

/// A stored expense line. Amounts are integer cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub request_id: Uuid,
    pub category: String,
    pub description: String,
    pub amount_cents: i64,
    pub expense_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// An expense line as submitted with a reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseItem {
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub amount_cents: i64,
    /// Defaults to the mission date
    #[serde(default)]
    pub expense_date: Option<NaiveDate>,
}

impl ExpenseItem {
    /// Rows without a category or with a non-positive amount are not recorded
    pub fn is_recordable(&self) -> bool {
        !self.category.trim().is_empty() && self.amount_cents > 0
    }
}

/// What a reconciliation does to the stored expense set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpenseReplacement {
    /// No rows submitted: existing expenses stay untouched
    Preserve,
    /// Rows submitted: all existing expenses give way to these
    Replace(Vec<Expense>),
}

impl ExpenseReplacement {
    /// Apply the replace-vs-preserve policy to a submitted row set
    pub fn plan(
        request_id: Uuid,
        items: &[ExpenseItem],
        default_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        if items.is_empty() {
            return ExpenseReplacement::Preserve;
        }

        let expenses = items
            .iter()
            .filter(|item| item.is_recordable())
            .map(|item| Expense {
                id: Uuid::new_v4(),
                request_id,
                category: item.category.trim().to_string(),
                description: item.description.trim().to_string(),
                amount_cents: item.amount_cents,
                expense_date: item.expense_date.unwrap_or(default_date),
                created_at: now,
            })
            .collect();

        ExpenseReplacement::Replace(expenses)
    }
}

/// Reject any submitted row whose amount exceeds `MAX_EXPENSE_CENTS`
pub fn check_amounts(items: &[ExpenseItem]) -> Result<()> {
    match items
        .iter()
        .position(|item| item.amount_cents.abs() > MAX_EXPENSE_CENTS)
    {
        Some(i) => Err(AppError::validation(
            format!("expenses[{}].amount", i),
            format!("exceeds the maximum of {}", format_cents(MAX_EXPENSE_CENTS)),
        )),
        None => Ok(()),
    }
}

pub fn total_cents<'a>(expenses: impl IntoIterator<Item = &'a Expense>) -> i64 {
    expenses.into_iter().map(|e| e.amount_cents).sum()
}

/// Net worked time in whole hours: the span between start and end minus the
/// lunch break when both of its bounds are given.
pub fn worked_hours(
    start: NaiveTime,
    end: NaiveTime,
    lunch_start: Option<NaiveTime>,
    lunch_end: Option<NaiveTime>,
) -> Result<i64> {
    if end <= start {
        return Err(AppError::validation(
            "actual_end",
            "end time must be after the start time",
        ));
    }

    let mut worked = end - start;
    if let (Some(lunch_start), Some(lunch_end)) = (lunch_start, lunch_end) {
        if lunch_end < lunch_start {
            return Err(AppError::validation(
                "lunch_end",
                "lunch break must end after it starts",
            ));
        }
        worked = worked - (lunch_end - lunch_start);
    }

    if worked < Duration::zero() {
        return Err(AppError::validation(
            "lunch_end",
            "lunch break is longer than the working time",
        ));
    }

    Ok(worked.num_hours())
}

/// Render cents as a decimal amount, e.g. `12345` as `123.45`
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
