use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, profit_margin_percent};

/// Calendar month key in `YYYY-MM` form, the unit the rollup is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        // Reject months chrono can't build a first-of-month date for
        NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self { year, month })
    }

    /// Month containing the given instant.
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Half-open UTC range `[start of month, start of next month)`.
    pub fn range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .expect("validated on construction")
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid");

        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .expect("first of month is always valid")
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid");

        (
            DateTime::from_naive_utc_and_offset(start, Utc),
            DateTime::from_naive_utc_and_offset(end, Utc),
        )
    }
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl std::str::FromStr for MonthKey {
    type Err = ParseMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year_str, month_str) = s
            .split_once('-')
            .ok_or_else(|| ParseMonthError(s.to_string()))?;
        if year_str.len() != 4 || month_str.len() != 2 {
            return Err(ParseMonthError(s.to_string()));
        }
        let year: i32 = year_str.parse().map_err(|_| ParseMonthError(s.to_string()))?;
        let month: u32 = month_str
            .parse()
            .map_err(|_| ParseMonthError(s.to_string()))?;
        MonthKey::new(year, month).ok_or_else(|| ParseMonthError(s.to_string()))
    }
}

impl TryFrom<String> for MonthKey {
    type Error = ParseMonthError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMonthError(pub String);

impl std::fmt::Display for ParseMonthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid month key (expected YYYY-MM): {}", self.0)
    }
}

impl std::error::Error for ParseMonthError {}

/// Raw sums read from the invoice/expense tables for one month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonthTotals {
    pub revenue_cents: Cents,
    pub cost_cents: Cents,
    pub expenses_cents: Cents,
    pub invoice_count: i64,
    pub expense_count: i64,
}

/// Denormalized monthly profit/loss row. One per month, fully derived from
/// invoice/expense data, safe to overwrite on every recomputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub month: MonthKey,
    pub total_revenue_cents: Cents,
    pub total_cost_cents: Cents,
    pub total_expenses_cents: Cents,
    pub gross_profit_cents: Cents,
    pub net_profit_cents: Cents,
    /// Percentage, 0.0 for months with no revenue
    pub profit_margin: f64,
    pub invoice_count: i64,
    pub expense_count: i64,
    pub last_calculated: DateTime<Utc>,
}

impl FinancialSummary {
    /// Derive the full row from raw sums. The same totals always produce the
    /// same derived figures, which is what makes recomputation idempotent.
    pub fn from_totals(month: MonthKey, totals: MonthTotals, calculated_at: DateTime<Utc>) -> Self {
        let gross_profit_cents = totals.revenue_cents - totals.cost_cents;
        let net_profit_cents = gross_profit_cents - totals.expenses_cents;
        Self {
            month,
            total_revenue_cents: totals.revenue_cents,
            total_cost_cents: totals.cost_cents,
            total_expenses_cents: totals.expenses_cents,
            gross_profit_cents,
            net_profit_cents,
            profit_margin: profit_margin_percent(net_profit_cents, totals.revenue_cents),
            invoice_count: totals.invoice_count,
            expense_count: totals.expense_count,
            last_calculated: calculated_at,
        }
    }
}
