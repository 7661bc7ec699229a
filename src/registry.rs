use crate::db::Db;
use crate::domain::{Apartment, ApartmentInput, MANAGER_ROLES, Page, Scope, User, page_count};
use crate::error::{CaisseError, CaisseResult};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

fn validate_apartment(db: &Db, input: &ApartmentInput) -> CaisseResult<ApartmentInput> {
    let name = input.name.trim();
    let number = input.number.trim();
    if name.is_empty() {
        return Err(CaisseError::validation("Apartment name is required"));
    }
    if number.is_empty() {
        return Err(CaisseError::validation("Apartment number is required"));
    }
    for (field, value) in [
        ("surface", input.surface),
        ("monthly_rent", input.monthly_rent),
        ("guarantee_months", input.guarantee_months),
        ("guarantee_amount", input.guarantee_amount),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(CaisseError::validation(format!(
                "{field} must be a non-negative number (got {value})"
            )));
        }
    }
    if input.rooms < 0 || input.bathrooms < 0 {
        return Err(CaisseError::validation(
            "rooms and bathrooms must not be negative",
        ));
    }

    let manager_id = input
        .manager_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    if let Some(manager_id) = manager_id.as_deref() {
        let manager = get_user(db, manager_id)?;
        if !manager.is_manager() {
            return Err(CaisseError::validation(format!(
                "User '{}' has role '{}', which cannot manage apartments",
                manager.display_name, manager.role
            )));
        }
    }

    Ok(ApartmentInput {
        name: name.to_string(),
        number: number.to_string(),
        manager_id,
        ..input.clone()
    })
}

pub fn create_apartment(
    db: &Db,
    input: &ApartmentInput,
    at: DateTime<Utc>,
) -> CaisseResult<Apartment> {
    let input = validate_apartment(db, input)?;
    let apt = Apartment {
        id: Uuid::new_v4().to_string(),
        name: input.name,
        number: input.number,
        surface: input.surface,
        rooms: input.rooms,
        bathrooms: input.bathrooms,
        balcony: input.balcony,
        furnished: input.furnished,
        monthly_rent: input.monthly_rent,
        guarantee_months: input.guarantee_months,
        guarantee_amount: input.guarantee_amount,
        due_date: input.due_date,
        status: input.status,
        manager_id: input.manager_id,
        created_at: at,
        updated_at: at,
    };
    db.insert_apartment(&apt)?;
    info!(apartment = %apt.id, name = %apt.name, "Created apartment");
    Ok(apt)
}

pub fn get_apartment(db: &Db, id: &str) -> CaisseResult<Apartment> {
    db.get_apartment(id)?
        .ok_or_else(|| CaisseError::not_found("apartment", id))
}

/// Full replace of the mutable fields. Reassigning the manager is just another field.
pub fn update_apartment(
    db: &Db,
    id: &str,
    input: &ApartmentInput,
    at: DateTime<Utc>,
) -> CaisseResult<Apartment> {
    let input = validate_apartment(db, input)?;
    let existing = get_apartment(db, id)?;
    let apt = Apartment {
        name: input.name,
        number: input.number,
        surface: input.surface,
        rooms: input.rooms,
        bathrooms: input.bathrooms,
        balcony: input.balcony,
        furnished: input.furnished,
        monthly_rent: input.monthly_rent,
        guarantee_months: input.guarantee_months,
        guarantee_amount: input.guarantee_amount,
        due_date: input.due_date,
        status: input.status,
        manager_id: input.manager_id,
        updated_at: at,
        ..existing
    };
    if db.update_apartment(&apt)? == 0 {
        return Err(CaisseError::not_found("apartment", id));
    }
    info!(apartment = %apt.id, status = %apt.status, "Updated apartment");
    Ok(apt)
}

pub fn delete_apartment(db: &Db, id: &str, at: DateTime<Utc>) -> CaisseResult<()> {
    if db.soft_delete_apartment(id, at)? == 0 {
        return Err(CaisseError::not_found("apartment", id));
    }
    info!(apartment = %id, "Deleted apartment");
    Ok(())
}

pub fn list_all(db: &Db) -> CaisseResult<Vec<Apartment>> {
    db.list_apartments(&Scope::Global)
}

pub fn list_by_manager(db: &Db, manager_id: &str) -> CaisseResult<Vec<Apartment>> {
    db.list_apartments(&Scope::Manager(manager_id.to_string()))
}

pub fn apartments_in_scope(db: &Db, scope: &Scope) -> CaisseResult<Vec<Apartment>> {
    match scope {
        Scope::Global => list_all(db),
        Scope::Manager(manager_id) => list_by_manager(db, manager_id),
        Scope::Apartment(_) => db.list_apartments(scope),
    }
}

/// Search listing: most recently updated first, matching name, number or status.
pub fn search_apartments(
    db: &Db,
    manager_id: Option<&str>,
    search: Option<&str>,
    page: u32,
    page_size: u32,
) -> CaisseResult<Page<Apartment>> {
    if page_size == 0 {
        return Err(CaisseError::validation("Page size must be at least 1"));
    }
    let page = page.max(1);
    let offset = i64::from(page - 1) * i64::from(page_size);
    let total_count = db.count_apartments_matching(manager_id, search)?;
    let items = db.search_apartments(manager_id, search, i64::from(page_size), offset)?;
    Ok(Page {
        items,
        total_count,
        page_count: page_count(total_count, page_size),
        page,
        page_size,
    })
}

pub fn create_user(
    db: &Db,
    display_name: &str,
    role: &str,
    at: DateTime<Utc>,
) -> CaisseResult<User> {
    let display_name = display_name.trim();
    let role = role.trim();
    if display_name.is_empty() {
        return Err(CaisseError::validation("User display name is required"));
    }
    if role.is_empty() {
        return Err(CaisseError::validation("User role is required"));
    }
    let user = User {
        id: Uuid::new_v4().to_string(),
        display_name: display_name.to_string(),
        role: role.to_string(),
        created_at: at,
        updated_at: at,
    };
    db.insert_user(&user)?;
    info!(user = %user.id, role = %user.role, "Created user");
    Ok(user)
}

pub fn get_user(db: &Db, id: &str) -> CaisseResult<User> {
    db.get_user(id)?.ok_or_else(|| CaisseError::not_found("user", id))
}

pub fn list_users(db: &Db, role: Option<&str>) -> CaisseResult<Vec<User>> {
    match role.map(str::trim).filter(|r| !r.is_empty()) {
        Some(role) => db.list_users(Some(std::slice::from_ref(&role))),
        None => db.list_users(None),
    }
}

/// Users holding a managerial role, in storage order.
pub fn list_managers(db: &Db) -> CaisseResult<Vec<User>> {
    db.list_users(Some(MANAGER_ROLES))
}
