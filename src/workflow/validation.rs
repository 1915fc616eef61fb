//! Input validation for submitted forms
//!
//! Forms arrive as loosely typed strings; these checks turn them into
//! workflow inputs or report which field is wrong and why.

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

use super::ledger::{self, ExpenseItem, MAX_EXPENSE_CENTS};
use super::request::{MissionDetails, ReconciliationAction, TransportMode};
use crate::error::{AppError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str> {
    present(value).ok_or_else(|| AppError::validation(field, "is required"))
}

pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| AppError::validation(field, format!("expected YYYY-MM-DD, got '{}'", value)))
}

pub fn parse_time(field: &str, value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
        .ok_or_else(|| AppError::validation(field, format!("expected HH:MM, got '{}'", value)))
}

fn optional_time(field: &str, value: Option<&str>) -> Result<Option<NaiveTime>> {
    present(value).map(|v| parse_time(field, v)).transpose()
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        present(value).map(str::to_ascii_lowercase).as_deref(),
        Some("si" | "sì" | "yes" | "true" | "on" | "1")
    )
}

/// Parse a decimal amount such as `12.50` or `12,50` into cents.
/// Blank input counts as zero, which the ledger then skips. Amounts
/// beyond `MAX_EXPENSE_CENTS` are refused rather than saturated.
pub fn parse_amount_cents(field: &str, value: Option<&str>) -> Result<i64> {
    let Some(value) = present(value) else {
        return Ok(0);
    };
    let amount: f64 = value
        .replace(',', ".")
        .parse()
        .map_err(|_| AppError::validation(field, format!("'{}' is not an amount", value)))?;
    if !amount.is_finite() {
        return Err(AppError::validation(field, "amount must be finite"));
    }
    let cents = (amount * 100.0).round();
    if cents.abs() > MAX_EXPENSE_CENTS as f64 {
        return Err(AppError::validation(
            field,
            format!(
                "exceeds the maximum of {}",
                ledger::format_cents(MAX_EXPENSE_CENTS)
            ),
        ));
    }
    Ok(cents as i64)
}

/// Mission request form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MissionForm {
    pub mission_date: Option<String>,
    pub start_time: Option<String>,
    pub location: Option<String>,
    pub justification: Option<String>,
    pub transport_mode: Option<String>,
    pub extra_hours: Option<String>,
    pub clock_in_time: Option<String>,
    pub clock_out_time: Option<String>,
    pub clock_reason: Option<String>,
    pub notes: Option<String>,
}

impl MissionForm {
    pub fn validate(self) -> Result<MissionDetails> {
        let mission_date = parse_date(
            "mission_date",
            required("mission_date", self.mission_date.as_deref())?,
        )?;
        let start_time = parse_time(
            "start_time",
            required("start_time", self.start_time.as_deref())?,
        )?;
        let location = required("location", self.location.as_deref())?.to_string();
        let justification = required("justification", self.justification.as_deref())?.to_string();
        let transport_mode: TransportMode = required("transport_mode", self.transport_mode.as_deref())?
            .parse()
            .map_err(|e: String| AppError::validation("transport_mode", e))?;

        let clock_in_time = optional_time("clock_in_time", self.clock_in_time.as_deref())?;
        let clock_out_time = optional_time("clock_out_time", self.clock_out_time.as_deref())?;
        if let (Some(clock_in), Some(clock_out)) = (clock_in_time, clock_out_time) {
            if clock_out <= clock_in {
                return Err(AppError::validation(
                    "clock_out_time",
                    "must be after the clock-in time",
                ));
            }
        }

        Ok(MissionDetails {
            mission_date,
            start_time,
            location,
            justification,
            transport_mode,
            extra_hours_authorized: parse_flag(self.extra_hours.as_deref()),
            clock_in_time,
            clock_out_time,
            clock_reason: optional_text(self.clock_reason),
            notes: optional_text(self.notes),
        })
    }
}

/// One expense row of a reconciliation form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpenseForm {
    pub category: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub date: Option<String>,
}

/// Reconciliation form with logistics and expense rows
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconciliationForm {
    pub actual_start: Option<String>,
    pub actual_end: Option<String>,
    pub lunch_start: Option<String>,
    pub lunch_end: Option<String>,
    pub distance_km: Option<String>,
    pub notes: Option<String>,
    pub action: Option<ReconciliationAction>,
    #[serde(default)]
    pub expenses: Vec<ExpenseForm>,
}

/// Validated logistics part of a reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationData {
    pub actual_start: NaiveTime,
    pub actual_end: NaiveTime,
    pub lunch_start: Option<NaiveTime>,
    pub lunch_end: Option<NaiveTime>,
    pub distance_km: f64,
    pub notes: Option<String>,
    pub action: ReconciliationAction,
}

impl ReconciliationForm {
    pub fn validate(self) -> Result<(ReconciliationData, Vec<ExpenseItem>)> {
        let actual_start = parse_time(
            "actual_start",
            required("actual_start", self.actual_start.as_deref())?,
        )?;
        let actual_end = parse_time(
            "actual_end",
            required("actual_end", self.actual_end.as_deref())?,
        )?;
        let lunch_start = optional_time("lunch_start", self.lunch_start.as_deref())?;
        let lunch_end = optional_time("lunch_end", self.lunch_end.as_deref())?;

        let distance_km = match present(self.distance_km.as_deref()) {
            Some(v) => v
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .filter(|km| km.is_finite() && *km >= 0.0)
                .ok_or_else(|| {
                    AppError::validation("distance_km", format!("'{}' is not a distance", v))
                })?,
            None => 0.0,
        };

        let mut items = Vec::with_capacity(self.expenses.len());
        for (i, row) in self.expenses.into_iter().enumerate() {
            let amount_cents =
                parse_amount_cents(&format!("expenses[{}].amount", i), row.amount.as_deref())?;
            let expense_date = optional_date(&format!("expenses[{}].date", i), row.date.as_deref())?;
            items.push(ExpenseItem {
                category: row.category.unwrap_or_default(),
                description: row.description.unwrap_or_default(),
                amount_cents,
                expense_date,
            });
        }

        let data = ReconciliationData {
            actual_start,
            actual_end,
            lunch_start,
            lunch_end,
            distance_km,
            notes: optional_text(self.notes),
            action: self.action.unwrap_or(ReconciliationAction::Submit),
        };
        Ok((data, items))
    }
}

fn optional_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    present(value).map(|v| parse_date(field, v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mission_form() -> MissionForm {
        MissionForm {
            mission_date: Some("2025-12-25".to_string()),
            start_time: Some("09:00".to_string()),
            location: Some("Milan".to_string()),
            justification: Some("Supplier visit".to_string()),
            transport_mode: Some("PUBBLICO".to_string()),
            extra_hours: Some("si".to_string()),
            ..Default::default()
        }
    }

    fn field_of(err: AppError) -> String {
        match err {
            AppError::Validation { field, .. } => field,
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_mission_form() {
        let mission = mission_form().validate().unwrap();
        assert_eq!(mission.mission_date, NaiveDate::from_ymd_opt(2025, 12, 25).unwrap());
        assert_eq!(mission.start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(mission.transport_mode, TransportMode::PublicTransport);
        assert!(mission.extra_hours_authorized);
        assert!(mission.clock_in_time.is_none());
        assert!(mission.notes.is_none());
    }

    #[test]
    fn test_missing_location_is_reported() {
        let mut form = mission_form();
        form.location = Some("   ".to_string());
        assert_eq!(field_of(form.validate().unwrap_err()), "location");
    }

    #[test]
    fn test_bad_date_is_reported() {
        let mut form = mission_form();
        form.mission_date = Some("25/12/2025".to_string());
        assert_eq!(field_of(form.validate().unwrap_err()), "mission_date");
    }

    #[test]
    fn test_bad_time_is_reported() {
        let mut form = mission_form();
        form.start_time = Some("9am".to_string());
        assert_eq!(field_of(form.validate().unwrap_err()), "start_time");
    }

    #[test]
    fn test_clock_window_must_be_ordered() {
        let mut form = mission_form();
        form.clock_in_time = Some("17:00".to_string());
        form.clock_out_time = Some("08:00".to_string());
        assert_eq!(field_of(form.validate().unwrap_err()), "clock_out_time");
    }

    #[test]
    fn test_parse_amount_cents() {
        assert_eq!(parse_amount_cents("a", Some("100.00")).unwrap(), 10_000);
        assert_eq!(parse_amount_cents("a", Some("12,5")).unwrap(), 1_250);
        assert_eq!(parse_amount_cents("a", Some("")).unwrap(), 0);
        assert_eq!(parse_amount_cents("a", None).unwrap(), 0);
        assert!(parse_amount_cents("a", Some("lots")).is_err());
        assert_eq!(parse_amount_cents("a", Some("1000000")).unwrap(), MAX_EXPENSE_CENTS);
        assert!(parse_amount_cents("a", Some("1000000,01")).is_err());
        assert!(parse_amount_cents("a", Some("-1e300")).is_err());
    }

    #[test]
    fn test_huge_expense_amount_reports_row() {
        let form = ReconciliationForm {
            actual_start: Some("09:00".to_string()),
            actual_end: Some("18:00".to_string()),
            expenses: vec![ExpenseForm {
                category: Some("Hotel".to_string()),
                amount: Some("1e300".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(field_of(form.validate().unwrap_err()), "expenses[0].amount");
    }

    #[test]
    fn test_reconciliation_form() {
        let form = ReconciliationForm {
            actual_start: Some("09:00".to_string()),
            actual_end: Some("18:00".to_string()),
            distance_km: Some("10".to_string()),
            expenses: vec![ExpenseForm {
                category: Some("Meals".to_string()),
                description: Some("Business lunch".to_string()),
                amount: Some("100.00".to_string()),
                date: Some("2025-12-25".to_string()),
            }],
            ..Default::default()
        };

        let (data, items) = form.validate().unwrap();
        assert_eq!(data.action, ReconciliationAction::Submit);
        assert_eq!(data.distance_km, 10.0);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount_cents, 10_000);
    }

    #[test]
    fn test_reconciliation_form_reports_expense_row() {
        let form = ReconciliationForm {
            actual_start: Some("09:00".to_string()),
            actual_end: Some("18:00".to_string()),
            expenses: vec![
                ExpenseForm::default(),
                ExpenseForm {
                    category: Some("Taxi".to_string()),
                    amount: Some("twelve".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(field_of(form.validate().unwrap_err()), "expenses[1].amount");
    }

    #[test]
    fn test_negative_distance_is_rejected() {
        let form = ReconciliationForm {
            actual_start: Some("09:00".to_string()),
            actual_end: Some("18:00".to_string()),
            distance_km: Some("-4".to_string()),
            ..Default::default()
        };
        assert_eq!(field_of(form.validate().unwrap_err()), "distance_km");
    }
}
