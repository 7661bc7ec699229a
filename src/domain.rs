use crate::error::{CaisseError, CaisseResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Roles that take part in manager-scoped rollups.
pub const MANAGER_ROLES: &[&str] = &["Manager", "Agent", "Supervisor"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Income,
    Expense,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Income => "Income",
            EntryKind::Expense => "Expense",
        }
    }
}

impl FromStr for EntryKind {
    type Err = CaisseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Income" => Ok(EntryKind::Income),
            "Expense" => Ok(EntryKind::Expense),
            other => Err(CaisseError::validation(format!(
                "Entry kind must be either 'Income' or 'Expense' (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Cdf,
}

impl Currency {
    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Cdf => "CDF",
        }
    }
}

impl FromStr for Currency {
    type Err = CaisseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "CDF" => Ok(Currency::Cdf),
            _ => Err(CaisseError::validation(format!(
                "Unsupported currency '{}'. Supported: USD, CDF",
                s.trim()
            ))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApartmentStatus {
    #[default]
    Available,
    Occupied,
    Maintenance,
    Unavailable,
}

impl ApartmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApartmentStatus::Available => "available",
            ApartmentStatus::Occupied => "occupied",
            ApartmentStatus::Maintenance => "maintenance",
            ApartmentStatus::Unavailable => "unavailable",
        }
    }
}

impl FromStr for ApartmentStatus {
    type Err = CaisseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(ApartmentStatus::Available),
            "occupied" => Ok(ApartmentStatus::Occupied),
            "maintenance" => Ok(ApartmentStatus::Maintenance),
            "unavailable" => Ok(ApartmentStatus::Unavailable),
            _ => Err(CaisseError::validation(format!(
                "Apartment status must be one of available, occupied, maintenance, unavailable (got '{}')",
                s.trim()
            ))),
        }
    }
}

impl fmt::Display for ApartmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dated cash movement on an apartment, recorded in both currencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub apartment_id: String,
    pub kind: EntryKind,
    pub amount_cdf: f64,
    pub amount_usd: f64,
    pub memo: String,
    pub signer: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable fields of a ledger entry, used for both create and full-replace update.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInput {
    pub apartment_id: String,
    pub kind: EntryKind,
    pub amount_cdf: f64,
    pub amount_usd: f64,
    pub memo: String,
    pub signer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apartment {
    pub id: String,
    pub name: String,
    pub number: String,
    pub surface: f64,
    pub rooms: i64,
    pub bathrooms: i64,
    pub balcony: bool,
    pub furnished: bool,
    pub monthly_rent: f64,
    pub guarantee_months: f64,
    pub guarantee_amount: f64,
    pub due_date: Option<NaiveDate>,
    pub status: ApartmentStatus,
    pub manager_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApartmentInput {
    pub name: String,
    pub number: String,
    pub surface: f64,
    pub rooms: i64,
    pub bathrooms: i64,
    pub balcony: bool,
    pub furnished: bool,
    pub monthly_rent: f64,
    pub guarantee_months: f64,
    pub guarantee_amount: f64,
    pub due_date: Option<NaiveDate>,
    pub status: ApartmentStatus,
    pub manager_id: Option<String>,
}

impl Default for ApartmentInput {
    fn default() -> Self {
        Self {
            name: String::new(),
            number: String::new(),
            surface: 0.0,
            rooms: 1,
            bathrooms: 1,
            balcony: false,
            furnished: false,
            monthly_rent: 0.0,
            guarantee_months: 2.0,
            guarantee_amount: 0.0,
            due_date: None,
            status: ApartmentStatus::Available,
            manager_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_manager(&self) -> bool {
        MANAGER_ROLES.contains(&self.role.as_str())
    }
}

/// Filtering dimension of an aggregation call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Global,
    Apartment(String),
    /// Entries reached through the apartments this manager owns.
    Manager(String),
}

impl Scope {
    pub fn from_flags(apartment: Option<String>, manager: Option<String>) -> CaisseResult<Self> {
        let apartment = apartment.filter(|s| !s.trim().is_empty());
        let manager = manager.filter(|s| !s.trim().is_empty());
        match (apartment, manager) {
            (Some(_), Some(_)) => Err(CaisseError::validation(
                "Scope accepts either an apartment or a manager, not both",
            )),
            (Some(a), None) => Ok(Scope::Apartment(a)),
            (None, Some(m)) => Ok(Scope::Manager(m)),
            (None, None) => Ok(Scope::Global),
        }
    }
}

/// Half-open interval `[start, end)`; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    #[cfg(test)]
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Builds a range from calendar-day filters (`YYYY-MM-DD`).
    ///
    /// The end day is inclusive, so the bound becomes midnight of the following day.
    /// Blank or malformed values drop that bound instead of failing.
    pub fn from_day_filters(start: Option<&str>, end: Option<&str>) -> Self {
        let start = start.and_then(|raw| parse_day_filter("start", raw));
        let end = end
            .and_then(|raw| parse_day_filter("end", raw))
            .map(|d| d + Duration::days(1));
        Self { start, end }
    }

    pub fn month(year: i32, month: u32) -> CaisseResult<Self> {
        let start = month_start(year, month)?;
        let (ny, nm) = shift_month(year, month, 1);
        let end = month_start(ny, nm)?;
        Ok(Self::between(start, end))
    }

    /// Overlap of two ranges, or `None` when they share no instant.
    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return None;
            }
        }
        Some(DateRange { start, end })
    }
}

fn parse_day_filter(which: &str, raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(d) => Some(start_of_day(d)),
        Err(_) => {
            warn!(filter = which, value = raw, "Ignoring malformed date filter");
            None
        }
    }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

pub fn month_start(year: i32, month: u32) -> CaisseResult<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(start_of_day)
        .ok_or_else(|| CaisseError::validation(format!("Invalid month {year:04}-{month:02}")))
}

/// Moves `(year, month)` by `delta` calendar months.
pub fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let idx = year * 12 + (month as i32 - 1) + delta;
    (idx.div_euclid(12), (idx.rem_euclid(12) + 1) as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Month,
    Quarter,
    Year,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Month => "month",
            Period::Quarter => "quarter",
            Period::Year => "year",
        }
    }

    /// Calendar period that contains `as_of`, with its display label.
    pub fn window(self, as_of: DateTime<Utc>) -> CaisseResult<(DateRange, String)> {
        let year = as_of.year();
        match self {
            Period::Month => {
                let month = as_of.month();
                Ok((DateRange::month(year, month)?, format!("{year:04}-{month:02}")))
            }
            Period::Quarter => {
                let quarter = (as_of.month() - 1) / 3 + 1;
                let first = (quarter - 1) * 3 + 1;
                let start = month_start(year, first)?;
                let (ny, nm) = shift_month(year, first, 3);
                let end = month_start(ny, nm)?;
                Ok((DateRange::between(start, end), format!("{year:04}-Q{quarter}")))
            }
            Period::Year => {
                let start = month_start(year, 1)?;
                let end = month_start(year + 1, 1)?;
                Ok((DateRange::between(start, end), format!("{year:04}")))
            }
        }
    }
}

/// Parameterized ledger predicate: scope × date range × free-text filter.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub scope: Scope,
    pub range: DateRange,
    pub text: Option<String>,
}

impl EntryQuery {
    pub fn new(scope: Scope, range: DateRange) -> Self {
        Self {
            scope,
            range,
            text: None,
        }
    }

    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.text = text.filter(|t| !t.trim().is_empty());
        self
    }
}

/// Income and expense sums in both currencies.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct KindTotals {
    pub income_cdf: f64,
    pub income_usd: f64,
    pub expense_cdf: f64,
    pub expense_usd: f64,
}

impl KindTotals {
    pub fn balance_cdf(&self) -> f64 {
        self.income_cdf - self.expense_cdf
    }

    pub fn balance_usd(&self) -> f64 {
        self.income_usd - self.expense_usd
    }
}

/// An apartment with the USD income it earned over some window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApartmentRevenue {
    pub apartment_id: String,
    pub name: String,
    pub number: String,
    pub monthly_rent: f64,
    pub status: ApartmentStatus,
    pub manager_name: Option<String>,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub page_count: i64,
    pub page: u32,
    pub page_size: u32,
}

/// `ceil(total / size)`; zero when there is nothing to page.
pub fn page_count(total: i64, page_size: u32) -> i64 {
    if page_size == 0 || total <= 0 {
        return 0;
    }
    let size = i64::from(page_size);
    (total + size - 1) / size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn entry_kind_accepts_only_the_two_variants() {
        assert_eq!("Income".parse::<EntryKind>().unwrap(), EntryKind::Income);
        assert_eq!("Expense".parse::<EntryKind>().unwrap(), EntryKind::Expense);
        for bad in ["income", "Transfer", "", "EXPENSE"] {
            let err = bad.parse::<EntryKind>().unwrap_err();
            assert!(matches!(err, CaisseError::Validation(_)), "{bad}");
        }
    }

    #[test]
    fn currency_codes_are_case_insensitive_and_closed() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!(" CDF ".parse::<Currency>().unwrap(), Currency::Cdf);
        assert!(matches!(
            "EUR".parse::<Currency>(),
            Err(CaisseError::Validation(_))
        ));
    }

    #[test]
    fn day_filters_make_end_inclusive() {
        let r = DateRange::from_day_filters(Some("2024-01-01"), Some("2024-01-31"));
        assert_eq!(r.start, Some(ts("2024-01-01T00:00:00Z")));
        assert_eq!(r.end, Some(ts("2024-02-01T00:00:00Z")));
    }

    #[test]
    fn malformed_day_filters_are_dropped() {
        let r = DateRange::from_day_filters(Some("01/02/2024"), Some("2024-13-45"));
        assert_eq!(r, DateRange::all());

        let r = DateRange::from_day_filters(Some("2024-03-01"), Some("nope"));
        assert_eq!(r.start, Some(ts("2024-03-01T00:00:00Z")));
        assert_eq!(r.end, None);
    }

    #[test]
    fn month_range_rolls_over_december() {
        let r = DateRange::month(2023, 12).unwrap();
        assert_eq!(r.start, Some(ts("2023-12-01T00:00:00Z")));
        assert_eq!(r.end, Some(ts("2024-01-01T00:00:00Z")));
        assert!(DateRange::month(2023, 13).is_err());
    }

    #[test]
    fn shift_month_handles_negative_offsets() {
        assert_eq!(shift_month(2024, 1, -1), (2023, 12));
        assert_eq!(shift_month(2024, 3, -14), (2023, 1));
        assert_eq!(shift_month(2024, 11, 3), (2025, 2));
    }

    #[test]
    fn intersect_returns_none_for_disjoint_ranges() {
        let jan = DateRange::month(2024, 1).unwrap();
        let feb = DateRange::month(2024, 2).unwrap();
        assert!(jan.intersect(&feb).is_none());

        let custom = DateRange::from_day_filters(Some("2024-01-15"), None);
        let cut = jan.intersect(&custom).unwrap();
        assert_eq!(cut.start, Some(ts("2024-01-15T00:00:00Z")));
        assert_eq!(cut.end, jan.end);
    }

    #[test]
    fn quarter_window_and_label() {
        let (range, label) = Period::Quarter.window(ts("2024-05-20T08:00:00Z")).unwrap();
        assert_eq!(label, "2024-Q2");
        assert_eq!(range.start, Some(ts("2024-04-01T00:00:00Z")));
        assert_eq!(range.end, Some(ts("2024-07-01T00:00:00Z")));

        let (_, label) = Period::Year.window(ts("2024-05-20T08:00:00Z")).unwrap();
        assert_eq!(label, "2024");
    }

    #[test]
    fn scope_rejects_both_apartment_and_manager() {
        assert_eq!(Scope::from_flags(None, None).unwrap(), Scope::Global);
        assert_eq!(
            Scope::from_flags(Some("a".into()), Some(" ".into())).unwrap(),
            Scope::Apartment("a".into())
        );
        assert!(Scope::from_flags(Some("a".into()), Some("m".into())).is_err());
    }

    #[test]
    fn page_count_is_ceiling() {
        assert_eq!(page_count(0, 15), 0);
        assert_eq!(page_count(15, 15), 1);
        assert_eq!(page_count(16, 15), 2);
        assert_eq!(page_count(7, 0), 0);
    }
}
