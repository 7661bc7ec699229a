use crate::currency::RateTable;
use crate::db::Db;
use crate::domain::{
    Currency, DateRange, EntryInput, EntryQuery, KindTotals, LedgerEntry, Page, Scope, page_count,
};
use crate::error::{CaisseError, CaisseResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// A page of entries plus the sums for the same scope and date range.
#[derive(Debug, Clone, Serialize)]
pub struct EntryPage {
    #[serde(flatten)]
    pub page: Page<LedgerEntry>,
    pub totals: KindTotals,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Balance {
    #[serde(flatten)]
    pub totals: KindTotals,
    pub balance_cdf: f64,
    pub balance_usd: f64,
    /// CDF balance plus the USD balance converted at the configured rate.
    pub folded_balance_cdf: f64,
    /// USD balance plus the CDF balance converted at the configured rate.
    pub folded_balance_usd: f64,
    pub usd_to_cdf: f64,
    pub cdf_to_usd: f64,
}

fn validate_input(input: &EntryInput) -> CaisseResult<EntryInput> {
    let apartment_id = input.apartment_id.trim();
    if apartment_id.is_empty() {
        return Err(CaisseError::validation("Apartment id is required"));
    }
    for (field, amount) in [("amount_cdf", input.amount_cdf), ("amount_usd", input.amount_usd)] {
        if !amount.is_finite() || amount < 0.0 {
            return Err(CaisseError::validation(format!(
                "{field} must be a non-negative number (got {amount})"
            )));
        }
    }
    Ok(EntryInput {
        apartment_id: apartment_id.to_string(),
        kind: input.kind,
        amount_cdf: input.amount_cdf,
        amount_usd: input.amount_usd,
        memo: input.memo.trim().to_string(),
        signer: input.signer.trim().to_string(),
    })
}

pub fn record_entry(db: &Db, input: &EntryInput, at: DateTime<Utc>) -> CaisseResult<LedgerEntry> {
    let input = validate_input(input)?;
    let entry = LedgerEntry {
        id: Uuid::new_v4().to_string(),
        apartment_id: input.apartment_id,
        kind: input.kind,
        amount_cdf: input.amount_cdf,
        amount_usd: input.amount_usd,
        memo: input.memo,
        signer: input.signer,
        created_at: at,
        updated_at: at,
    };
    db.insert_entry(&entry)?;
    info!(
        entry = %entry.id,
        apartment = %entry.apartment_id,
        kind = %entry.kind,
        "Recorded ledger entry"
    );
    Ok(entry)
}

pub fn get_entry(db: &Db, id: &str) -> CaisseResult<LedgerEntry> {
    db.get_entry(id)?
        .ok_or_else(|| CaisseError::not_found("entry", id))
}

/// Replaces kind, amounts, memo, signer and apartment; `created_at` is kept.
pub fn update_entry(
    db: &Db,
    id: &str,
    input: &EntryInput,
    at: DateTime<Utc>,
) -> CaisseResult<LedgerEntry> {
    let input = validate_input(input)?;
    let existing = get_entry(db, id)?;
    let entry = LedgerEntry {
        apartment_id: input.apartment_id,
        kind: input.kind,
        amount_cdf: input.amount_cdf,
        amount_usd: input.amount_usd,
        memo: input.memo,
        signer: input.signer,
        updated_at: at,
        ..existing
    };
    if db.update_entry(&entry)? == 0 {
        return Err(CaisseError::not_found("entry", id));
    }
    info!(entry = %entry.id, "Updated ledger entry");
    Ok(entry)
}

pub fn delete_entry(db: &Db, id: &str, at: DateTime<Utc>) -> CaisseResult<()> {
    if db.soft_delete_entry(id, at)? == 0 {
        return Err(CaisseError::not_found("entry", id));
    }
    info!(entry = %id, "Deleted ledger entry");
    Ok(())
}

/// Pages are 1-based; anything below 1 reads the first page.
pub fn list_entries(
    db: &Db,
    query: &EntryQuery,
    page: u32,
    page_size: u32,
) -> CaisseResult<EntryPage> {
    if page_size == 0 {
        return Err(CaisseError::validation("Page size must be at least 1"));
    }
    let page = page.max(1);
    let offset = i64::from(page - 1) * i64::from(page_size);

    let total_count = db.count_entries(query)?;
    let items = db.list_entries(query, i64::from(page_size), offset)?;
    let totals = db.sum_entries(&EntryQuery::new(query.scope.clone(), query.range))?;
    debug!(total_count, page, page_size, "Listed ledger entries");

    Ok(EntryPage {
        page: Page {
            items,
            total_count,
            page_count: page_count(total_count, page_size),
            page,
            page_size,
        },
        totals,
    })
}

pub fn sum_by_kind(db: &Db, scope: &Scope, range: &DateRange) -> CaisseResult<KindTotals> {
    db.sum_entries(&EntryQuery::new(scope.clone(), *range))
}

pub fn balance(
    db: &Db,
    rates: &RateTable,
    scope: &Scope,
    range: &DateRange,
) -> CaisseResult<Balance> {
    let totals = sum_by_kind(db, scope, range)?;
    let (folded_balance_cdf, folded_balance_usd) = rates.fold_balances(&totals);
    Ok(Balance {
        totals,
        balance_cdf: totals.balance_cdf(),
        balance_usd: totals.balance_usd(),
        folded_balance_cdf,
        folded_balance_usd,
        usd_to_cdf: rates.default_rate(Currency::Usd, Currency::Cdf),
        cdf_to_usd: rates.default_rate(Currency::Cdf, Currency::Usd),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Apartment, ApartmentStatus, EntryKind};

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn input(apartment: &str, kind: EntryKind, cdf: f64, usd: f64, memo: &str) -> EntryInput {
        EntryInput {
            apartment_id: apartment.to_string(),
            kind,
            amount_cdf: cdf,
            amount_usd: usd,
            memo: memo.to_string(),
            signer: "alice".to_string(),
        }
    }

    fn apartment(db: &Db, id: &str, manager: Option<&str>) {
        let now = ts("2024-01-01T00:00:00Z");
        db.insert_apartment(&Apartment {
            id: id.to_string(),
            name: format!("Apt {id}"),
            number: id.to_string(),
            surface: 40.0,
            rooms: 2,
            bathrooms: 1,
            balcony: false,
            furnished: false,
            monthly_rent: 500.0,
            guarantee_months: 2.0,
            guarantee_amount: 1000.0,
            due_date: None,
            status: ApartmentStatus::Occupied,
            manager_id: manager.map(str::to_string),
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    }

    #[test]
    fn empty_scope_sums_to_zero() {
        let db = Db::open_in_memory().unwrap();
        for scope in [
            Scope::Global,
            Scope::Apartment("nope".into()),
            Scope::Manager("nobody".into()),
        ] {
            let totals = sum_by_kind(&db, &scope, &DateRange::all()).unwrap();
            assert_eq!(totals, KindTotals::default());
        }
    }

    #[test]
    fn balance_is_income_minus_expense_per_currency() {
        let db = Db::open_in_memory().unwrap();
        let rates = RateTable::new(2800.0, 1.0 / 2800.0).unwrap();
        let at = ts("2024-01-10T12:00:00Z");
        record_entry(&db, &input("A", EntryKind::Income, 140_000.0, 500.0, "rent"), at).unwrap();
        record_entry(&db, &input("A", EntryKind::Expense, 28_000.0, 50.0, "repair"), at).unwrap();
        record_entry(&db, &input("B", EntryKind::Income, 0.0, 300.0, "rent"), at).unwrap();

        let scope = Scope::Apartment("A".into());
        let totals = sum_by_kind(&db, &scope, &DateRange::all()).unwrap();
        assert_eq!(totals.income_usd, 500.0);
        assert_eq!(totals.expense_usd, 50.0);

        let b = balance(&db, &rates, &scope, &DateRange::all()).unwrap();
        assert_eq!(b.balance_usd, 450.0);
        assert_eq!(b.balance_cdf, 112_000.0);
        assert_eq!(b.folded_balance_cdf, 112_000.0 + 450.0 * 2800.0);
        assert!((b.folded_balance_usd - (450.0 + 40.0)).abs() < 1e-9);

        let global = sum_by_kind(&db, &Scope::Global, &DateRange::all()).unwrap();
        assert_eq!(global.income_usd, 800.0);
    }

    #[test]
    fn manager_scope_follows_apartment_ownership() {
        let db = Db::open_in_memory().unwrap();
        apartment(&db, "A", Some("m1"));
        apartment(&db, "B", Some("m2"));
        let at = ts("2024-02-01T08:00:00Z");
        record_entry(&db, &input("A", EntryKind::Income, 0.0, 100.0, ""), at).unwrap();
        record_entry(&db, &input("B", EntryKind::Income, 0.0, 70.0, ""), at).unwrap();
        // No apartment row: counted globally, never under a manager.
        record_entry(&db, &input("ghost", EntryKind::Income, 0.0, 5.0, ""), at).unwrap();

        let m1 = sum_by_kind(&db, &Scope::Manager("m1".into()), &DateRange::all()).unwrap();
        assert_eq!(m1.income_usd, 100.0);
        let all = sum_by_kind(&db, &Scope::Global, &DateRange::all()).unwrap();
        assert_eq!(all.income_usd, 175.0);
    }

    #[test]
    fn date_range_is_half_open() {
        let db = Db::open_in_memory().unwrap();
        record_entry(
            &db,
            &input("A", EntryKind::Income, 0.0, 10.0, ""),
            ts("2024-01-31T23:59:59Z"),
        )
        .unwrap();
        record_entry(
            &db,
            &input("A", EntryKind::Income, 0.0, 20.0, ""),
            ts("2024-02-01T00:00:00Z"),
        )
        .unwrap();

        let jan = DateRange::month(2024, 1).unwrap();
        assert_eq!(sum_by_kind(&db, &Scope::Global, &jan).unwrap().income_usd, 10.0);

        let inclusive = DateRange::from_day_filters(Some("2024-01-01"), Some("2024-02-01"));
        assert_eq!(
            sum_by_kind(&db, &Scope::Global, &inclusive).unwrap().income_usd,
            30.0
        );
    }

    #[test]
    fn update_replaces_fields_and_keeps_creation_time() {
        let db = Db::open_in_memory().unwrap();
        let created = ts("2024-03-01T10:00:00Z");
        let e = record_entry(&db, &input("A", EntryKind::Income, 0.0, 10.0, "x"), created).unwrap();

        let later = ts("2024-03-05T10:00:00Z");
        let updated = update_entry(
            &db,
            &e.id,
            &input("A", EntryKind::Expense, 5.0, 0.0, "fixed"),
            later,
        )
        .unwrap();
        assert_eq!(updated.kind, EntryKind::Expense);
        assert_eq!(updated.created_at, created);
        assert_eq!(updated.updated_at, later);

        let fetched = get_entry(&db, &e.id).unwrap();
        assert_eq!(fetched, updated);
    }

    #[test]
    fn soft_deleted_entries_disappear_everywhere() {
        let db = Db::open_in_memory().unwrap();
        let at = ts("2024-03-01T10:00:00Z");
        let e = record_entry(&db, &input("A", EntryKind::Income, 0.0, 10.0, ""), at).unwrap();
        delete_entry(&db, &e.id, at).unwrap();

        assert!(matches!(get_entry(&db, &e.id), Err(CaisseError::NotFound { .. })));
        assert!(matches!(
            delete_entry(&db, &e.id, at),
            Err(CaisseError::NotFound { .. })
        ));
        assert!(matches!(
            update_entry(&db, &e.id, &input("A", EntryKind::Income, 0.0, 1.0, ""), at),
            Err(CaisseError::NotFound { .. })
        ));
        let listed = list_entries(&db, &EntryQuery::default(), 1, 10).unwrap();
        assert_eq!(listed.page.total_count, 0);
        assert_eq!(listed.totals, KindTotals::default());
    }

    #[test]
    fn validation_rejects_blank_apartment_and_negative_amounts() {
        let db = Db::open_in_memory().unwrap();
        let at = ts("2024-03-01T10:00:00Z");
        for bad in [
            input("  ", EntryKind::Income, 0.0, 1.0, ""),
            input("A", EntryKind::Income, -1.0, 1.0, ""),
            input("A", EntryKind::Expense, 0.0, f64::NAN, ""),
        ] {
            assert!(matches!(
                record_entry(&db, &bad, at),
                Err(CaisseError::Validation(_))
            ));
        }
        assert_eq!(db.count_entries(&EntryQuery::default()).unwrap(), 0);
    }

    #[test]
    fn listing_pages_newest_first_and_filters_text() {
        let db = Db::open_in_memory().unwrap();
        for day in 1..=5 {
            let at = ts(&format!("2024-04-0{day}T09:00:00Z"));
            let memo = if day % 2 == 0 { "Loyer avril" } else { "Plomberie" };
            record_entry(&db, &input("A", EntryKind::Income, 0.0, day as f64, memo), at).unwrap();
        }

        let page1 = list_entries(&db, &EntryQuery::default(), 1, 2).unwrap();
        assert_eq!(page1.page.total_count, 5);
        assert_eq!(page1.page.page_count, 3);
        let amounts: Vec<f64> = page1.page.items.iter().map(|e| e.amount_usd).collect();
        assert_eq!(amounts, vec![5.0, 4.0]);

        let beyond = list_entries(&db, &EntryQuery::default(), 9, 2).unwrap();
        assert!(beyond.page.items.is_empty());
        assert_eq!(beyond.page.total_count, 5);

        let q = EntryQuery::default().with_text(Some("loyer".into()));
        let filtered = list_entries(&db, &q, 0, 10).unwrap();
        assert_eq!(filtered.page.page, 1);
        assert_eq!(filtered.page.total_count, 2);
        // Totals ignore the text filter.
        assert_eq!(filtered.totals.income_usd, 15.0);

        let by_kind = EntryQuery::default().with_text(Some("income".into()));
        assert_eq!(list_entries(&db, &by_kind, 1, 10).unwrap().page.total_count, 5);

        let wildcard = EntryQuery::default().with_text(Some("%".into()));
        assert_eq!(list_entries(&db, &wildcard, 1, 10).unwrap().page.total_count, 0);
    }

    #[test]
    fn text_filter_ignores_case_of_accented_letters() {
        let db = Db::open_in_memory().unwrap();
        let at = ts("2024-01-10T09:00:00Z");
        let bill = EntryInput {
            signer: "Évariste".to_string(),
            ..input("A", EntryKind::Expense, 45000.0, 0.0, "Électricité janvier")
        };
        record_entry(&db, &bill, at).unwrap();
        record_entry(&db, &input("A", EntryKind::Income, 0.0, 500.0, "Loyer"), at).unwrap();

        for needle in ["électricité", "ÉLECTRICITÉ", "évariste", "ÉVAR"] {
            let q = EntryQuery::default().with_text(Some(needle.into()));
            let found = list_entries(&db, &q, 1, 10).unwrap();
            assert_eq!(found.page.total_count, 1, "needle {needle}");
            assert_eq!(found.page.items[0].memo, "Électricité janvier");
        }
    }
}
