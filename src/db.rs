use crate::config::AppPaths;
use crate::domain::{
    Apartment, ApartmentRevenue, ApartmentStatus, DateRange, EntryKind, EntryQuery, KindTotals,
    LedgerEntry, Scope, User,
};
use crate::error::{CaisseError, CaisseResult};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Type, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::fs;
use std::path::PathBuf;

const ENTRY_COLUMNS: &str = "e.uuid, e.apartment_uuid, e.kind, e.amount_cdf, e.amount_usd, e.memo, e.signer, e.created_at, e.updated_at";

const APARTMENT_COLUMNS: &str = "a.uuid, a.name, a.number, a.surface, a.rooms, a.bathrooms, a.balcony, a.furnished, a.monthly_rent, a.guarantee_months, a.guarantee_amount, a.due_date, a.status, a.manager_uuid, a.created_at, a.updated_at";

const USER_COLUMNS: &str = "u.uuid, u.display_name, u.role, u.created_at, u.updated_at";

/// Unicode-aware lowercase, registered on every connection for text search.
const FOLD_FN: &str = "caisse_fold";

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(paths: &AppPaths) -> Result<(Self, PathBuf)> {
        fs::create_dir_all(&paths.data_dir)
            .with_context(|| format!("Failed to create data dir {}", paths.data_dir.display()))?;

        let db_path = paths.data_dir.join("caisse.sqlite3");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open DB {}", db_path.display()))?;

        let db = Self { conn };
        db.register_functions()
            .context("Failed to register SQL functions")?;
        db.migrate()
            .with_context(|| format!("Failed to migrate DB {}", db_path.display()))?;
        Ok((db, db_path))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> CaisseResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.register_functions()?;
        db.migrate()?;
        Ok(db)
    }

    /// SQLite's built-in `lower()` and `LIKE` fold ASCII only.
    fn register_functions(&self) -> CaisseResult<()> {
        self.conn.create_scalar_function(
            FOLD_FN,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text: Option<String> = ctx.get(0)?;
                Ok(text.map(|t| t.to_lowercase()))
            },
        )?;
        Ok(())
    }

    fn migrate(&self) -> CaisseResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                uuid TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);

            CREATE TABLE IF NOT EXISTS apartments (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                number TEXT NOT NULL,
                surface REAL NOT NULL DEFAULT 0,
                rooms INTEGER NOT NULL DEFAULT 1,
                bathrooms INTEGER NOT NULL DEFAULT 1,
                balcony INTEGER NOT NULL DEFAULT 0,
                furnished INTEGER NOT NULL DEFAULT 0,
                monthly_rent REAL NOT NULL DEFAULT 0,
                guarantee_months REAL NOT NULL DEFAULT 2,
                guarantee_amount REAL NOT NULL DEFAULT 0,
                due_date TEXT,
                status TEXT NOT NULL DEFAULT 'available',
                manager_uuid TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_apartments_manager ON apartments(manager_uuid);
            CREATE INDEX IF NOT EXISTS idx_apartments_status ON apartments(status);

            CREATE TABLE IF NOT EXISTS entries (
                uuid TEXT PRIMARY KEY,
                apartment_uuid TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('Income', 'Expense')),
                amount_cdf REAL NOT NULL DEFAULT 0,
                amount_usd REAL NOT NULL DEFAULT 0,
                memo TEXT NOT NULL DEFAULT '',
                signer TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_entries_apartment ON entries(apartment_uuid);
            CREATE INDEX IF NOT EXISTS idx_entries_created_at ON entries(created_at);
            CREATE INDEX IF NOT EXISTS idx_entries_updated_at ON entries(updated_at);
            "#,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ledger entries
    // ------------------------------------------------------------------

    pub fn insert_entry(&self, entry: &LedgerEntry) -> CaisseResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO entries (uuid, apartment_uuid, kind, amount_cdf, amount_usd, memo, signer, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                entry.id,
                entry.apartment_id,
                entry.kind.as_str(),
                entry.amount_cdf,
                entry.amount_usd,
                entry.memo,
                entry.signer,
                ts_to_sql(&entry.created_at),
                ts_to_sql(&entry.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Replaces the mutable fields of a live entry. Returns the number of rows touched.
    pub fn update_entry(&self, entry: &LedgerEntry) -> CaisseResult<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE entries
            SET apartment_uuid = ?2, kind = ?3, amount_cdf = ?4, amount_usd = ?5,
                memo = ?6, signer = ?7, updated_at = ?8
            WHERE uuid = ?1 AND deleted_at IS NULL
            "#,
            params![
                entry.id,
                entry.apartment_id,
                entry.kind.as_str(),
                entry.amount_cdf,
                entry.amount_usd,
                entry.memo,
                entry.signer,
                ts_to_sql(&entry.updated_at),
            ],
        )?;
        Ok(changed)
    }

    pub fn soft_delete_entry(&self, id: &str, at: DateTime<Utc>) -> CaisseResult<usize> {
        let changed = self.conn.execute(
            "UPDATE entries SET deleted_at = ?2 WHERE uuid = ?1 AND deleted_at IS NULL",
            params![id, ts_to_sql(&at)],
        )?;
        Ok(changed)
    }

    pub fn get_entry(&self, id: &str) -> CaisseResult<Option<LedgerEntry>> {
        let sql =
            format!("SELECT {ENTRY_COLUMNS} FROM entries e WHERE e.uuid = ?1 AND e.deleted_at IS NULL");
        let entry = self
            .conn
            .query_row(&sql, params![id], entry_from_row)
            .optional()?;
        Ok(entry)
    }

    pub fn count_entries(&self, query: &EntryQuery) -> CaisseResult<i64> {
        let (filter, args) = entry_filter(query);
        let sql = format!("SELECT COUNT(*) {filter}");
        let count = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(count)
    }

    /// One page of matching entries, most recently updated first.
    pub fn list_entries(
        &self,
        query: &EntryQuery,
        limit: i64,
        offset: i64,
    ) -> CaisseResult<Vec<LedgerEntry>> {
        let (filter, mut args) = entry_filter(query);
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} {filter} ORDER BY e.updated_at DESC, e.rowid DESC LIMIT ? OFFSET ?"
        );
        args.push(Value::Integer(limit));
        args.push(Value::Integer(offset));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), entry_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Income/expense sums in both currencies, read in a single statement.
    pub fn sum_entries(&self, query: &EntryQuery) -> CaisseResult<KindTotals> {
        let (filter, args) = entry_filter(query);
        let sql = format!(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN e.kind = 'Income' THEN e.amount_cdf END), 0.0),
                COALESCE(SUM(CASE WHEN e.kind = 'Income' THEN e.amount_usd END), 0.0),
                COALESCE(SUM(CASE WHEN e.kind = 'Expense' THEN e.amount_cdf END), 0.0),
                COALESCE(SUM(CASE WHEN e.kind = 'Expense' THEN e.amount_usd END), 0.0)
            {filter}
            "#
        );
        let totals = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| {
                Ok(KindTotals {
                    income_cdf: row.get(0)?,
                    income_usd: row.get(1)?,
                    expense_cdf: row.get(2)?,
                    expense_usd: row.get(3)?,
                })
            })?;
        Ok(totals)
    }

    /// Apartments in scope ranked by USD income inside `range`.
    ///
    /// Apartments without matching income are kept with a zero total; ties keep insertion order.
    pub fn apartment_revenue(
        &self,
        scope: &Scope,
        range: &DateRange,
        limit: i64,
    ) -> CaisseResult<Vec<ApartmentRevenue>> {
        let mut sql = String::from(
            r#"
            SELECT a.uuid, a.name, a.number, a.monthly_rent, a.status, u.display_name,
                   COALESCE(SUM(e.amount_usd), 0.0) AS total_revenue
            FROM apartments a
            LEFT JOIN entries e
                ON e.apartment_uuid = a.uuid AND e.kind = 'Income' AND e.deleted_at IS NULL
            "#,
        );
        let mut args = Vec::new();
        if let Some(start) = range.start {
            sql.push_str(" AND e.created_at >= ?");
            args.push(Value::Text(ts_to_sql(&start)));
        }
        if let Some(end) = range.end {
            sql.push_str(" AND e.created_at < ?");
            args.push(Value::Text(ts_to_sql(&end)));
        }
        sql.push_str(" LEFT JOIN users u ON u.uuid = a.manager_uuid WHERE a.deleted_at IS NULL");
        push_apartment_scope(&mut sql, &mut args, scope);
        sql.push_str(" GROUP BY a.uuid ORDER BY total_revenue DESC, a.rowid ASC LIMIT ?");
        args.push(Value::Integer(limit));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(ApartmentRevenue {
                apartment_id: row.get(0)?,
                name: row.get(1)?,
                number: row.get(2)?,
                monthly_rent: row.get(3)?,
                status: row.get(4)?,
                manager_name: row.get(5)?,
                total_revenue: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Apartments
    // ------------------------------------------------------------------

    pub fn insert_apartment(&self, apt: &Apartment) -> CaisseResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO apartments (uuid, name, number, surface, rooms, bathrooms, balcony, furnished,
                monthly_rent, guarantee_months, guarantee_amount, due_date, status, manager_uuid,
                created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                apt.id,
                apt.name,
                apt.number,
                apt.surface,
                apt.rooms,
                apt.bathrooms,
                apt.balcony,
                apt.furnished,
                apt.monthly_rent,
                apt.guarantee_months,
                apt.guarantee_amount,
                apt.due_date,
                apt.status.as_str(),
                apt.manager_id,
                ts_to_sql(&apt.created_at),
                ts_to_sql(&apt.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn update_apartment(&self, apt: &Apartment) -> CaisseResult<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE apartments
            SET name = ?2, number = ?3, surface = ?4, rooms = ?5, bathrooms = ?6, balcony = ?7,
                furnished = ?8, monthly_rent = ?9, guarantee_months = ?10, guarantee_amount = ?11,
                due_date = ?12, status = ?13, manager_uuid = ?14, updated_at = ?15
            WHERE uuid = ?1 AND deleted_at IS NULL
            "#,
            params![
                apt.id,
                apt.name,
                apt.number,
                apt.surface,
                apt.rooms,
                apt.bathrooms,
                apt.balcony,
                apt.furnished,
                apt.monthly_rent,
                apt.guarantee_months,
                apt.guarantee_amount,
                apt.due_date,
                apt.status.as_str(),
                apt.manager_id,
                ts_to_sql(&apt.updated_at),
            ],
        )?;
        Ok(changed)
    }

    pub fn soft_delete_apartment(&self, id: &str, at: DateTime<Utc>) -> CaisseResult<usize> {
        let changed = self.conn.execute(
            "UPDATE apartments SET deleted_at = ?2 WHERE uuid = ?1 AND deleted_at IS NULL",
            params![id, ts_to_sql(&at)],
        )?;
        Ok(changed)
    }

    pub fn get_apartment(&self, id: &str) -> CaisseResult<Option<Apartment>> {
        let sql = format!(
            "SELECT {APARTMENT_COLUMNS} FROM apartments a WHERE a.uuid = ?1 AND a.deleted_at IS NULL"
        );
        let apt = self
            .conn
            .query_row(&sql, params![id], apartment_from_row)
            .optional()?;
        Ok(apt)
    }

    /// Live apartments in scope, in insertion order.
    pub fn list_apartments(&self, scope: &Scope) -> CaisseResult<Vec<Apartment>> {
        let mut sql =
            format!("SELECT {APARTMENT_COLUMNS} FROM apartments a WHERE a.deleted_at IS NULL");
        let mut args = Vec::new();
        push_apartment_scope(&mut sql, &mut args, scope);
        sql.push_str(" ORDER BY a.rowid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), apartment_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count_apartments_matching(
        &self,
        manager_id: Option<&str>,
        search: Option<&str>,
    ) -> CaisseResult<i64> {
        let (filter, args) = apartment_search_filter(manager_id, search);
        let sql = format!("SELECT COUNT(*) FROM apartments a {filter}");
        let count = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(count)
    }

    pub fn search_apartments(
        &self,
        manager_id: Option<&str>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> CaisseResult<Vec<Apartment>> {
        let (filter, mut args) = apartment_search_filter(manager_id, search);
        let sql = format!(
            "SELECT {APARTMENT_COLUMNS} FROM apartments a {filter} ORDER BY a.updated_at DESC, a.rowid DESC LIMIT ? OFFSET ?"
        );
        args.push(Value::Integer(limit));
        args.push(Value::Integer(offset));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), apartment_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn insert_user(&self, user: &User) -> CaisseResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO users (uuid, display_name, role, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                user.id,
                user.display_name,
                user.role,
                ts_to_sql(&user.created_at),
                ts_to_sql(&user.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> CaisseResult<Option<User>> {
        let sql =
            format!("SELECT {USER_COLUMNS} FROM users u WHERE u.uuid = ?1 AND u.deleted_at IS NULL");
        let user = self
            .conn
            .query_row(&sql, params![id], user_from_row)
            .optional()?;
        Ok(user)
    }

    /// Live users in insertion order, optionally restricted to a set of roles.
    pub fn list_users(&self, roles: Option<&[&str]>) -> CaisseResult<Vec<User>> {
        let mut sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.deleted_at IS NULL");
        let mut args = Vec::new();
        if let Some(roles) = roles {
            if roles.is_empty() {
                return Ok(Vec::new());
            }
            let marks = vec!["?"; roles.len()].join(", ");
            sql.push_str(&format!(" AND u.role IN ({marks})"));
            args.extend(roles.iter().map(|r| Value::Text(r.to_string())));
        }
        sql.push_str(" ORDER BY u.rowid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), user_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Fixed-width UTC text so that lexical order matches time order.
pub fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl FromSql for EntryKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: CaisseError| FromSqlError::Other(Box::new(e)))
    }
}

impl FromSql for ApartmentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: CaisseError| FromSqlError::Other(Box::new(e)))
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        apartment_id: row.get(1)?,
        kind: row.get(2)?,
        amount_cdf: row.get(3)?,
        amount_usd: row.get(4)?,
        memo: row.get(5)?,
        signer: row.get(6)?,
        created_at: ts_column(row, 7)?,
        updated_at: ts_column(row, 8)?,
    })
}

fn apartment_from_row(row: &Row<'_>) -> rusqlite::Result<Apartment> {
    Ok(Apartment {
        id: row.get(0)?,
        name: row.get(1)?,
        number: row.get(2)?,
        surface: row.get(3)?,
        rooms: row.get(4)?,
        bathrooms: row.get(5)?,
        balcony: row.get(6)?,
        furnished: row.get(7)?,
        monthly_rent: row.get(8)?,
        guarantee_months: row.get(9)?,
        guarantee_amount: row.get(10)?,
        due_date: row.get(11)?,
        status: row.get(12)?,
        manager_id: row.get(13)?,
        created_at: ts_column(row, 14)?,
        updated_at: ts_column(row, 15)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        display_name: row.get(1)?,
        role: row.get(2)?,
        created_at: ts_column(row, 3)?,
        updated_at: ts_column(row, 4)?,
    })
}

/// Translates the ledger predicate into `FROM ... WHERE ...` plus positional parameters.
fn entry_filter(query: &EntryQuery) -> (String, Vec<Value>) {
    let mut sql = String::from("FROM entries e");
    let mut args = Vec::new();

    if matches!(query.scope, Scope::Manager(_)) {
        sql.push_str(" JOIN apartments a ON a.uuid = e.apartment_uuid");
    }
    sql.push_str(" WHERE e.deleted_at IS NULL");

    match &query.scope {
        Scope::Global => {}
        Scope::Apartment(id) => {
            sql.push_str(" AND e.apartment_uuid = ?");
            args.push(Value::Text(id.clone()));
        }
        Scope::Manager(id) => {
            sql.push_str(" AND a.manager_uuid = ?");
            args.push(Value::Text(id.clone()));
        }
    }

    if let Some(start) = query.range.start {
        sql.push_str(" AND e.created_at >= ?");
        args.push(Value::Text(ts_to_sql(&start)));
    }
    if let Some(end) = query.range.end {
        sql.push_str(" AND e.created_at < ?");
        args.push(Value::Text(ts_to_sql(&end)));
    }

    if let Some(text) = query.text.as_deref() {
        push_text_match(&mut sql, &mut args, &["e.kind", "e.signer", "e.memo"], text);
    }

    (sql, args)
}

fn push_apartment_scope(sql: &mut String, args: &mut Vec<Value>, scope: &Scope) {
    match scope {
        Scope::Global => {}
        Scope::Apartment(id) => {
            sql.push_str(" AND a.uuid = ?");
            args.push(Value::Text(id.clone()));
        }
        Scope::Manager(id) => {
            sql.push_str(" AND a.manager_uuid = ?");
            args.push(Value::Text(id.clone()));
        }
    }
}

fn apartment_search_filter(manager_id: Option<&str>, search: Option<&str>) -> (String, Vec<Value>) {
    let mut sql = String::from("WHERE a.deleted_at IS NULL");
    let mut args = Vec::new();
    if let Some(manager_id) = manager_id {
        sql.push_str(" AND a.manager_uuid = ?");
        args.push(Value::Text(manager_id.to_string()));
    }
    if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
        push_text_match(&mut sql, &mut args, &["a.name", "a.number", "a.status"], search);
    }
    (sql, args)
}

/// Case-insensitive substring match of `text` against any of `columns`.
/// `instr` takes the needle literally, so `%` and `_` need no escaping.
fn push_text_match(sql: &mut String, args: &mut Vec<Value>, columns: &[&str], text: &str) {
    let needle = fold_text(text);
    let clauses: Vec<String> = columns
        .iter()
        .map(|col| format!("instr({FOLD_FN}({col}), ?) > 0"))
        .collect();
    sql.push_str(" AND (");
    sql.push_str(&clauses.join(" OR "));
    sql.push(')');
    args.extend(columns.iter().map(|_| Value::Text(needle.clone())));
}

fn fold_text(text: &str) -> String {
    text.trim().to_lowercase()
}
