use crate::db::Db;
use crate::domain::{
    Apartment, ApartmentRevenue, ApartmentStatus, DateRange, EntryQuery, KindTotals, Period,
    Scope, User, shift_month,
};
use crate::error::{CaisseError, CaisseResult};
use crate::ledger::sum_by_kind;
use crate::registry;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

pub const DEFAULT_TOP_LIMIT: usize = 10;

/// One hundred years of rolling trends.
pub const MAX_TREND_MONTHS: i32 = 1200;

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole * 100.0 } else { 0.0 }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusCounts {
    pub total: i64,
    pub available: i64,
    pub occupied: i64,
    pub maintenance: i64,
    pub unavailable: i64,
}

impl StatusCounts {
    fn tally(apartments: &[Apartment]) -> Self {
        let mut counts = Self::default();
        for apt in apartments {
            counts.total += 1;
            match apt.status {
                ApartmentStatus::Available => counts.available += 1,
                ApartmentStatus::Occupied => counts.occupied += 1,
                ApartmentStatus::Maintenance => counts.maintenance += 1,
                ApartmentStatus::Unavailable => counts.unavailable += 1,
            }
        }
        counts
    }
}

fn total_rent(apartments: &[Apartment]) -> f64 {
    apartments.iter().map(|a| a.monthly_rent).sum()
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_apartments: i64,
    pub available_apartments: i64,
    pub occupied_apartments: i64,
    pub maintenance_apartments: i64,
    pub unavailable_apartments: i64,

    pub total_income_usd: f64,
    pub total_expense_usd: f64,
    pub net_balance_usd: f64,
    pub total_income_cdf: f64,
    pub total_expense_cdf: f64,
    pub net_balance_cdf: f64,

    pub monthly_revenue_target: f64,
    pub actual_monthly_revenue: f64,
    pub revenue_percentage: f64,

    pub top_apartments: Vec<ApartmentRevenue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_stats: Option<Vec<ManagerStats>>,
}

/// Counts, ledger sums over `range`, and revenue for the month containing `as_of`
/// measured against the summed rent of every apartment in scope.
pub fn dashboard_summary(
    db: &Db,
    scope: &Scope,
    range: &DateRange,
    as_of: DateTime<Utc>,
) -> CaisseResult<DashboardStats> {
    let apartments = registry::apartments_in_scope(db, scope)?;
    let counts = StatusCounts::tally(&apartments);
    let totals = sum_by_kind(db, scope, range)?;

    let monthly_revenue_target = total_rent(&apartments);
    let current_month = DateRange::month(as_of.year(), as_of.month())?;
    let actual_monthly_revenue = sum_by_kind(db, scope, &current_month)?.income_usd;

    let top_apartments = top_apartments_by_revenue(db, scope, range, DEFAULT_TOP_LIMIT)?;
    let manager_stats = match scope {
        Scope::Global => Some(manager_comparison(db, range)?),
        _ => None,
    };
    debug!(?scope, apartments = counts.total, "Built dashboard summary");

    Ok(DashboardStats {
        total_apartments: counts.total,
        available_apartments: counts.available,
        occupied_apartments: counts.occupied,
        maintenance_apartments: counts.maintenance,
        unavailable_apartments: counts.unavailable,
        total_income_usd: totals.income_usd,
        total_expense_usd: totals.expense_usd,
        net_balance_usd: totals.balance_usd(),
        total_income_cdf: totals.income_cdf,
        total_expense_cdf: totals.expense_cdf,
        net_balance_cdf: totals.balance_cdf(),
        monthly_revenue_target,
        actual_monthly_revenue,
        revenue_percentage: percent(actual_monthly_revenue, monthly_revenue_target),
        top_apartments,
        manager_stats,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendWindow {
    /// The twelve calendar months of a year.
    Year(i32),
    /// The last `n` months, ending with the month that contains `as_of`.
    LastMonths(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyTrend {
    pub month: String,
    pub year: i32,
    pub income_usd: f64,
    pub expense_usd: f64,
    pub income_cdf: f64,
    pub expense_cdf: f64,
}

/// One income/expense pair per month, oldest first. Months outside `range` report zeros.
pub fn monthly_trends(
    db: &Db,
    scope: &Scope,
    window: TrendWindow,
    range: &DateRange,
    as_of: DateTime<Utc>,
) -> CaisseResult<Vec<MonthlyTrend>> {
    let months: Vec<(i32, u32)> = match window {
        TrendWindow::Year(year) => (1..=12).map(|m| (year, m)).collect(),
        TrendWindow::LastMonths(n) => {
            let n = i32::try_from(n)
                .ok()
                .filter(|n| (1..=MAX_TREND_MONTHS).contains(n))
                .ok_or_else(|| {
                    CaisseError::validation(format!(
                        "Month count must be between 1 and {MAX_TREND_MONTHS} (got {n})"
                    ))
                })?;
            (0..n)
                .map(|i| shift_month(as_of.year(), as_of.month(), i - (n - 1)))
                .collect()
        }
    };

    let mut trends = Vec::with_capacity(months.len());
    for (year, month) in months {
        let totals = match DateRange::month(year, month)?.intersect(range) {
            Some(span) => sum_by_kind(db, scope, &span)?,
            None => KindTotals::default(),
        };
        trends.push(MonthlyTrend {
            month: format!("{year:04}-{month:02}"),
            year,
            income_usd: totals.income_usd,
            expense_usd: totals.expense_usd,
            income_cdf: totals.income_cdf,
            expense_cdf: totals.expense_cdf,
        });
    }
    Ok(trends)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStats {
    pub manager_id: String,
    pub manager_name: String,
    pub total_apartments: i64,
    pub available_apartments: i64,
    pub occupied_apartments: i64,
    pub maintenance_apartments: i64,
    pub total_income_usd: f64,
    pub total_expense_usd: f64,
    pub net_balance_usd: f64,
    pub total_income_cdf: f64,
    pub total_expense_cdf: f64,
    pub net_balance_cdf: f64,
    pub monthly_revenue_target: f64,
    pub occupancy_rate: f64,
    pub efficiency: f64,
}

/// Stats for every managerial user that owns at least one apartment, in storage order.
fn collect_manager_stats(db: &Db, range: &DateRange) -> CaisseResult<Vec<ManagerStats>> {
    let mut out = Vec::new();
    for manager in registry::list_managers(db)? {
        if let Some(stats) = stats_for_manager(db, &manager, range)? {
            out.push(stats);
        }
    }
    Ok(out)
}

fn stats_for_manager(
    db: &Db,
    manager: &User,
    range: &DateRange,
) -> CaisseResult<Option<ManagerStats>> {
    let apartments = registry::list_by_manager(db, &manager.id)?;
    if apartments.is_empty() {
        return Ok(None);
    }
    let counts = StatusCounts::tally(&apartments);
    let totals = sum_by_kind(db, &Scope::Manager(manager.id.clone()), range)?;
    let net = totals.balance_usd();

    Ok(Some(ManagerStats {
        manager_id: manager.id.clone(),
        manager_name: manager.display_name.clone(),
        total_apartments: counts.total,
        available_apartments: counts.available,
        occupied_apartments: counts.occupied,
        maintenance_apartments: counts.maintenance,
        total_income_usd: totals.income_usd,
        total_expense_usd: totals.expense_usd,
        net_balance_usd: net,
        total_income_cdf: totals.income_cdf,
        total_expense_cdf: totals.expense_cdf,
        net_balance_cdf: totals.balance_cdf(),
        monthly_revenue_target: total_rent(&apartments),
        occupancy_rate: percent(counts.occupied as f64, counts.total as f64),
        efficiency: net / counts.total as f64,
    }))
}

/// Managers ranked by USD income, highest first. Equal incomes keep storage order.
pub fn manager_comparison(db: &Db, range: &DateRange) -> CaisseResult<Vec<ManagerStats>> {
    let mut stats = collect_manager_stats(db, range)?;
    stats.sort_by(|a, b| desc(a.total_income_usd, b.total_income_usd));
    Ok(stats)
}

fn desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopManager {
    pub manager_id: String,
    pub manager_name: String,
    pub total_revenue: f64,
    pub net_profit: f64,
    pub apartment_count: i64,
    pub occupancy_rate: f64,
    pub efficiency: f64,
}

/// Managers ranked by net profit over the calendar `period` containing `as_of`.
pub fn top_managers(
    db: &Db,
    period: Period,
    limit: usize,
    as_of: DateTime<Utc>,
) -> CaisseResult<Vec<TopManager>> {
    let limit = if limit == 0 { DEFAULT_TOP_LIMIT } else { limit };
    let (range, label) = period.window(as_of)?;

    let mut ranked: Vec<TopManager> = collect_manager_stats(db, &range)?
        .into_iter()
        .map(|s| TopManager {
            manager_id: s.manager_id,
            manager_name: s.manager_name,
            total_revenue: s.total_income_usd,
            net_profit: s.net_balance_usd,
            apartment_count: s.total_apartments,
            occupancy_rate: s.occupancy_rate,
            efficiency: s.efficiency,
        })
        .collect();
    ranked.sort_by(|a, b| desc(a.net_profit, b.net_profit));
    ranked.truncate(limit);
    debug!(
        period = period.as_str(),
        %label,
        managers = ranked.len(),
        "Ranked top managers"
    );
    Ok(ranked)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OccupancyStats {
    pub total_apartments: i64,
    pub occupied_apartments: i64,
    pub available_apartments: i64,
    pub maintenance_apartments: i64,
    pub unavailable_apartments: i64,
    pub occupancy_rate: f64,
    pub availability_rate: f64,
    pub maintenance_rate: f64,
    pub average_rent: f64,
    pub total_potential_revenue: f64,
    pub lost_revenue: f64,
}

pub fn occupancy_stats(db: &Db, scope: &Scope) -> CaisseResult<OccupancyStats> {
    let apartments = registry::apartments_in_scope(db, scope)?;
    let counts = StatusCounts::tally(&apartments);
    let total = counts.total as f64;
    let potential = total_rent(&apartments);
    let lost: f64 = apartments
        .iter()
        .filter(|a| a.status != ApartmentStatus::Occupied)
        .map(|a| a.monthly_rent)
        .sum();

    Ok(OccupancyStats {
        total_apartments: counts.total,
        occupied_apartments: counts.occupied,
        available_apartments: counts.available,
        maintenance_apartments: counts.maintenance,
        unavailable_apartments: counts.unavailable,
        occupancy_rate: percent(counts.occupied as f64, total),
        availability_rate: percent(counts.available as f64, total),
        maintenance_rate: percent(counts.maintenance as f64, total),
        average_rent: if counts.total > 0 { potential / total } else { 0.0 },
        total_potential_revenue: potential,
        lost_revenue: lost,
    })
}

pub fn top_apartments_by_revenue(
    db: &Db,
    scope: &Scope,
    range: &DateRange,
    limit: usize,
) -> CaisseResult<Vec<ApartmentRevenue>> {
    let limit = if limit == 0 { DEFAULT_TOP_LIMIT } else { limit };
    db.apartment_revenue(scope, range, i64::try_from(limit).unwrap_or(i64::MAX))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialSummary {
    pub period: Period,
    pub label: String,
    pub range: DateRange,
    pub income_usd: f64,
    pub expense_usd: f64,
    pub net_balance_usd: f64,
    pub income_cdf: f64,
    pub expense_cdf: f64,
    pub net_balance_cdf: f64,
}

pub fn financial_summary(
    db: &Db,
    scope: &Scope,
    period: Period,
    as_of: DateTime<Utc>,
) -> CaisseResult<FinancialSummary> {
    let (range, label) = period.window(as_of)?;
    let totals = db.sum_entries(&EntryQuery::new(scope.clone(), range))?;
    debug!(period = period.as_str(), %label, ?scope, "Built financial summary");
    Ok(FinancialSummary {
        period,
        label,
        range,
        income_usd: totals.income_usd,
        expense_usd: totals.expense_usd,
        net_balance_usd: totals.balance_usd(),
        income_cdf: totals.income_cdf,
        expense_cdf: totals.expense_cdf,
        net_balance_cdf: totals.balance_cdf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApartmentInput, EntryInput, EntryKind};
    use crate::ledger::record_entry;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn apt(db: &Db, name: &str, rent: f64, status: ApartmentStatus, manager: &str) -> Apartment {
        registry::create_apartment(
            db,
            &ApartmentInput {
                name: name.to_string(),
                number: name.to_string(),
                monthly_rent: rent,
                status,
                manager_id: Some(manager.to_string()),
                ..ApartmentInput::default()
            },
            ts("2024-01-01T00:00:00Z"),
        )
        .unwrap()
    }

    fn entry(db: &Db, apartment: &str, kind: EntryKind, usd: f64, at: &str) {
        record_entry(
            db,
            &EntryInput {
                apartment_id: apartment.to_string(),
                kind,
                amount_cdf: 0.0,
                amount_usd: usd,
                memo: String::new(),
                signer: "caissier".to_string(),
            },
            ts(at),
        )
        .unwrap();
    }

    struct Fixture {
        db: Db,
        manager: User,
        a: Apartment,
        b: Apartment,
    }

    /// A (rent 500, occupied) and B (rent 300, available) under one manager,
    /// with an income of 500 and an expense of 50 on A in January 2024.
    fn fixture() -> Fixture {
        let db = Db::open_in_memory().unwrap();
        let manager =
            registry::create_user(&db, "Marie", "Manager", ts("2024-01-01T00:00:00Z")).unwrap();
        let a = apt(&db, "A", 500.0, ApartmentStatus::Occupied, &manager.id);
        let b = apt(&db, "B", 300.0, ApartmentStatus::Available, &manager.id);
        entry(&db, &a.id, EntryKind::Income, 500.0, "2024-01-05T10:00:00Z");
        entry(&db, &a.id, EntryKind::Expense, 50.0, "2024-01-20T10:00:00Z");
        Fixture { db, manager, a, b }
    }

    #[test]
    fn occupancy_for_manager_scope() {
        let f = fixture();
        let occ = occupancy_stats(&f.db, &Scope::Manager(f.manager.id.clone())).unwrap();
        assert_eq!(occ.total_apartments, 2);
        assert_eq!(occ.occupied_apartments, 1);
        assert_eq!(occ.occupancy_rate, 50.0);
        assert_eq!(occ.total_potential_revenue, 800.0);
        assert_eq!(occ.lost_revenue, 300.0);
        assert_eq!(occ.average_rent, 400.0);
        assert_eq!(
            occ.occupancy_rate + occ.availability_rate + occ.maintenance_rate,
            100.0
        );
    }

    #[test]
    fn occupancy_of_empty_scope_is_all_zero() {
        let db = Db::open_in_memory().unwrap();
        let occ = occupancy_stats(&db, &Scope::Global).unwrap();
        assert_eq!(occ.total_apartments, 0);
        assert_eq!(occ.occupancy_rate, 0.0);
        assert_eq!(occ.average_rent, 0.0);
    }

    #[test]
    fn year_trends_have_one_row_per_month() {
        let f = fixture();
        let trends = monthly_trends(
            &f.db,
            &Scope::Global,
            TrendWindow::Year(2024),
            &DateRange::all(),
            ts("2024-06-01T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(trends.len(), 12);
        assert_eq!(trends[0].month, "2024-01");
        assert_eq!(trends[0].income_usd, 500.0);
        assert_eq!(trends[0].expense_usd, 50.0);
        assert!(trends[1..].iter().all(|t| t.income_usd == 0.0));
        assert_eq!(trends[11].month, "2024-12");
    }

    #[test]
    fn trends_respect_custom_range_and_rolling_window() {
        let f = fixture();
        let from_mid_jan = DateRange::from_day_filters(Some("2024-01-10"), None);
        let trends = monthly_trends(
            &f.db,
            &Scope::Apartment(f.a.id.clone()),
            TrendWindow::Year(2024),
            &from_mid_jan,
            ts("2024-06-01T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(trends[0].income_usd, 0.0);
        assert_eq!(trends[0].expense_usd, 50.0);

        let rolling = monthly_trends(
            &f.db,
            &Scope::Global,
            TrendWindow::LastMonths(3),
            &DateRange::all(),
            ts("2024-02-15T00:00:00Z"),
        )
        .unwrap();
        let labels: Vec<&str> = rolling.iter().map(|t| t.month.as_str()).collect();
        assert_eq!(labels, vec!["2023-12", "2024-01", "2024-02"]);
        assert_eq!(rolling[1].income_usd, 500.0);

        for months in [0, 1201, 3_000_000_000] {
            let res = monthly_trends(
                &f.db,
                &Scope::Global,
                TrendWindow::LastMonths(months),
                &DateRange::all(),
                ts("2024-02-15T00:00:00Z"),
            );
            assert!(matches!(res, Err(CaisseError::Validation(_))), "months {months}");
        }

        let century = monthly_trends(
            &f.db,
            &Scope::Global,
            TrendWindow::LastMonths(1200),
            &DateRange::all(),
            ts("2024-02-15T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(century.len(), 1200);
        assert_eq!(century[0].month, "1924-03");
    }

    #[test]
    fn dashboard_measures_month_against_rent_target() {
        let f = fixture();
        let stats = dashboard_summary(
            &f.db,
            &Scope::Global,
            &DateRange::all(),
            ts("2024-01-25T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(stats.total_apartments, 2);
        assert_eq!(stats.net_balance_usd, 450.0);
        assert_eq!(stats.monthly_revenue_target, 800.0);
        assert_eq!(stats.actual_monthly_revenue, 500.0);
        assert_eq!(stats.revenue_percentage, 62.5);
        assert_eq!(stats.top_apartments[0].apartment_id, f.a.id);
        assert_eq!(stats.top_apartments[1].apartment_id, f.b.id);
        assert_eq!(stats.top_apartments[0].manager_name.as_deref(), Some("Marie"));
        assert_eq!(stats.manager_stats.as_ref().map(Vec::len), Some(1));

        let scoped = dashboard_summary(
            &f.db,
            &Scope::Manager(f.manager.id.clone()),
            &DateRange::all(),
            ts("2024-03-01T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(scoped.actual_monthly_revenue, 0.0);
        assert!(scoped.manager_stats.is_none());
    }

    #[test]
    fn zero_target_reports_zero_percent() {
        let db = Db::open_in_memory().unwrap();
        entry(&db, "loose", EntryKind::Income, 100.0, "2024-01-05T10:00:00Z");
        let stats =
            dashboard_summary(&db, &Scope::Global, &DateRange::all(), ts("2024-01-25T00:00:00Z"))
                .unwrap();
        assert_eq!(stats.monthly_revenue_target, 0.0);
        assert_eq!(stats.actual_monthly_revenue, 100.0);
        assert_eq!(stats.revenue_percentage, 0.0);
    }

    #[test]
    fn managers_without_apartments_are_left_out() {
        let f = fixture();
        let at = ts("2024-01-01T00:00:00Z");
        registry::create_user(&f.db, "Idle", "Agent", at).unwrap();
        let rich = registry::create_user(&f.db, "Rich", "Supervisor", at).unwrap();
        let c = apt(&f.db, "C", 1000.0, ApartmentStatus::Occupied, &rich.id);
        entry(&f.db, &c.id, EntryKind::Income, 900.0, "2024-01-07T10:00:00Z");
        entry(&f.db, &c.id, EntryKind::Expense, 800.0, "2024-01-08T10:00:00Z");

        let compared = manager_comparison(&f.db, &DateRange::all()).unwrap();
        let names: Vec<&str> = compared.iter().map(|m| m.manager_name.as_str()).collect();
        assert_eq!(names, vec!["Rich", "Marie"]);
        let marie = &compared[1];
        assert_eq!(marie.net_balance_usd, 450.0);
        assert_eq!(marie.efficiency, 225.0);
        assert_eq!(marie.occupancy_rate, 50.0);
        assert_eq!(marie.monthly_revenue_target, 800.0);

        // Net profit ranks Marie (450) above Rich (100).
        let top = top_managers(&f.db, Period::Month, 10, ts("2024-01-31T00:00:00Z")).unwrap();
        let names: Vec<&str> = top.iter().map(|m| m.manager_name.as_str()).collect();
        assert_eq!(names, vec!["Marie", "Rich"]);
        assert_eq!(top[0].total_revenue, 500.0);

        let one = top_managers(&f.db, Period::Year, 1, ts("2024-07-01T00:00:00Z")).unwrap();
        assert_eq!(one.len(), 1);

        let next_month = top_managers(&f.db, Period::Month, 10, ts("2024-02-10T00:00:00Z")).unwrap();
        assert!(next_month.iter().all(|m| m.net_profit == 0.0));
        assert_eq!(next_month.len(), 2);
    }

    #[test]
    fn top_apartments_skip_deleted_and_respect_limit() {
        let f = fixture();
        registry::delete_apartment(&f.db, &f.b.id, ts("2024-02-01T00:00:00Z")).unwrap();
        let top = top_apartments_by_revenue(&f.db, &Scope::Global, &DateRange::all(), 10).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].total_revenue, 500.0);

        let feb = DateRange::month(2024, 2).unwrap();
        let top = top_apartments_by_revenue(&f.db, &Scope::Global, &feb, 1).unwrap();
        assert_eq!(top[0].total_revenue, 0.0);
    }

    #[test]
    fn financial_summary_uses_calendar_period() {
        let f = fixture();
        let q1 = financial_summary(
            &f.db,
            &Scope::Manager(f.manager.id.clone()),
            Period::Quarter,
            ts("2024-03-31T23:00:00Z"),
        )
        .unwrap();
        assert_eq!(q1.label, "2024-Q1");
        assert_eq!(q1.net_balance_usd, 450.0);

        let q2 = financial_summary(&f.db, &Scope::Global, Period::Quarter, ts("2024-04-01T00:00:00Z"))
            .unwrap();
        assert_eq!(q2.income_usd, 0.0);
    }
}
