mod cli;
mod config;
mod currency;
mod db;
mod domain;
mod error;
mod ledger;
mod output;
mod registry;
mod reports;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use serde_json::json;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::{
    AggregateArgs, ApartmentCmd, ApartmentFields, AsOfArgs, Cli, Command, ConfigCmd,
    ConvertArgs, DashboardCmd, DateFilterArgs, EntryCmd, EntryFields, OutputFormat, ScopeArgs,
    UserCmd,
};
use crate::config::{AppConfig, AppPaths, app_paths, load_or_init_config, now_utc, write_config};
use crate::currency::convert_currency;
use crate::db::Db;
use crate::domain::{
    ApartmentInput, ApartmentStatus, Currency, DateRange, EntryInput, EntryKind, EntryQuery,
    Scope,
};
use crate::output::{money, print_json, print_table};
use crate::reports::TrendWindow;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so stdout stays parseable. `CAISSE_LOG` takes `RUST_LOG` syntax.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("CAISSE_LOG").unwrap_or_else(|_| EnvFilter::new("caisse=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = app_paths(cli.home.clone())?;
    let (mut cfg, cfg_path) = load_or_init_config(&paths)?;

    match cli.command {
        Command::Config(args) => handle_config(args.cmd, &mut cfg, &cfg_path),
        Command::Convert(args) => handle_convert(&cfg, args),
        Command::Entry(args) => handle_entry(&open_db(&paths)?, &cfg, args.cmd),
        Command::Totals(args) => handle_totals(&open_db(&paths)?, args),
        Command::Balance(args) => handle_balance(&open_db(&paths)?, &cfg, args),
        Command::Dashboard(args) => handle_dashboard(&open_db(&paths)?, args.cmd),
        Command::Apartment(args) => handle_apartment(&open_db(&paths)?, &cfg, args.cmd),
        Command::User(args) => handle_user(&open_db(&paths)?, args.cmd),
    }
}

fn open_db(paths: &AppPaths) -> Result<Db> {
    let (db, db_path) = Db::open(paths)?;
    debug!(path = %db_path.display(), "Opened store");
    Ok(db)
}

fn handle_config(cmd: ConfigCmd, cfg: &mut AppConfig, cfg_path: &Path) -> Result<()> {
    match cmd {
        ConfigCmd::Show => print_json(&*cfg),
        ConfigCmd::SetRate { from, to, rate } => {
            let from: Currency = from.parse()?;
            let to: Currency = to.parse()?;
            cfg.set_rate(from, to, rate)?;
            cfg.rate_table()?;
            write_config(cfg_path, cfg)?;
            print_json(&cfg.exchange_rates)
        }
        ConfigCmd::SetSigner { signer } => {
            cfg.default_signer = signer
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            write_config(cfg_path, cfg)?;
            print_json(&*cfg)
        }
    }
}

fn handle_convert(cfg: &AppConfig, args: ConvertArgs) -> Result<()> {
    let rates = cfg.rate_table()?;
    let conversion = convert_currency(&rates, args.amount, &args.from, &args.to, args.rate)?;
    print_json(&conversion)
}

fn scope_of(args: &ScopeArgs) -> Result<Scope> {
    Ok(Scope::from_flags(
        args.apartment.clone(),
        args.manager.clone(),
    )?)
}

fn range_of(args: &DateFilterArgs) -> DateRange {
    DateRange::from_day_filters(args.start.as_deref(), args.end.as_deref())
}

fn entry_input(cfg: &AppConfig, fields: EntryFields) -> Result<EntryInput> {
    Ok(EntryInput {
        apartment_id: fields.apartment,
        kind: fields.kind.parse::<EntryKind>()?,
        amount_cdf: fields.cdf,
        amount_usd: fields.usd,
        memo: fields.memo.unwrap_or_default(),
        signer: fields
            .signer
            .or_else(|| cfg.default_signer.clone())
            .unwrap_or_default(),
    })
}

fn handle_entry(db: &Db, cfg: &AppConfig, cmd: EntryCmd) -> Result<()> {
    match cmd {
        EntryCmd::Record { fields, at } => {
            let input = entry_input(cfg, fields)?;
            let at = parse_rfc3339_or_now(at.as_deref())?;
            let entry = ledger::record_entry(db, &input, at)?;
            print_json(&entry)
        }
        EntryCmd::Get { id } => print_json(&ledger::get_entry(db, &id)?),
        EntryCmd::Update { id, fields } => {
            let input = entry_input(cfg, fields)?;
            let entry = ledger::update_entry(db, &id, &input, now_utc())?;
            print_json(&entry)
        }
        EntryCmd::Delete { id } => {
            ledger::delete_entry(db, &id, now_utc())?;
            print_json(&json!({ "deleted": id }))
        }
        EntryCmd::List {
            scope,
            dates,
            search,
            paging,
        } => {
            let query = EntryQuery::new(scope_of(&scope)?, range_of(&dates)).with_text(search);
            let page_size = cfg.page_size_or_default(paging.page_size);
            let listing = ledger::list_entries(db, &query, paging.page, page_size)?;

            match paging.format {
                OutputFormat::Json => print_json(&listing),
                OutputFormat::Table => {
                    let rows: Vec<Vec<String>> = listing
                        .page
                        .items
                        .iter()
                        .map(|e| {
                            vec![
                                e.id.clone(),
                                e.apartment_id.clone(),
                                e.kind.to_string(),
                                money(e.amount_cdf),
                                money(e.amount_usd),
                                e.memo.clone(),
                                e.signer.clone(),
                                e.created_at.format("%Y-%m-%d %H:%M").to_string(),
                            ]
                        })
                        .collect();
                    print_table(
                        &["ID", "Apartment", "Kind", "CDF", "USD", "Memo", "Signer", "Created"],
                        &rows,
                    );
                    let t = &listing.totals;
                    println!(
                        "Page {}/{} ({} entries). Income: {} CDF / {} USD. Expense: {} CDF / {} USD.",
                        listing.page.page,
                        listing.page.page_count,
                        listing.page.total_count,
                        money(t.income_cdf),
                        money(t.income_usd),
                        money(t.expense_cdf),
                        money(t.expense_usd),
                    );
                    Ok(())
                }
            }
        }
    }
}

fn handle_totals(db: &Db, args: AggregateArgs) -> Result<()> {
    let scope = scope_of(&args.scope)?;
    let totals = ledger::sum_by_kind(db, &scope, &range_of(&args.dates))?;
    print_json(&totals)
}

fn handle_balance(db: &Db, cfg: &AppConfig, args: AggregateArgs) -> Result<()> {
    let rates = cfg.rate_table()?;
    let scope = scope_of(&args.scope)?;
    let balance = ledger::balance(db, &rates, &scope, &range_of(&args.dates))?;
    print_json(&balance)
}

fn handle_dashboard(db: &Db, cmd: DashboardCmd) -> Result<()> {
    match cmd {
        DashboardCmd::Summary {
            scope,
            dates,
            as_of,
        } => {
            let stats = reports::dashboard_summary(
                db,
                &scope_of(&scope)?,
                &range_of(&dates),
                parse_as_of(&as_of)?,
            )?;
            print_json(&stats)
        }
        DashboardCmd::Trends {
            scope,
            dates,
            year,
            months,
            as_of,
        } => {
            let window = match (year, months) {
                (Some(year), _) => TrendWindow::Year(year),
                (None, Some(n)) => TrendWindow::LastMonths(n),
                (None, None) => TrendWindow::LastMonths(12),
            };
            let trends = reports::monthly_trends(
                db,
                &scope_of(&scope)?,
                window,
                &range_of(&dates),
                parse_as_of(&as_of)?,
            )?;
            print_json(&trends)
        }
        DashboardCmd::Managers { dates } => {
            print_json(&reports::manager_comparison(db, &range_of(&dates))?)
        }
        DashboardCmd::Occupancy { scope } => {
            print_json(&reports::occupancy_stats(db, &scope_of(&scope)?)?)
        }
        DashboardCmd::TopManagers {
            period,
            limit,
            as_of,
        } => {
            let ranked = reports::top_managers(db, period.into(), limit, parse_as_of(&as_of)?)?;
            print_json(&ranked)
        }
        DashboardCmd::TopApartments {
            scope,
            dates,
            limit,
        } => {
            let top = reports::top_apartments_by_revenue(
                db,
                &scope_of(&scope)?,
                &range_of(&dates),
                limit,
            )?;
            print_json(&top)
        }
        DashboardCmd::Financial {
            scope,
            period,
            as_of,
        } => {
            let summary = reports::financial_summary(
                db,
                &scope_of(&scope)?,
                period.into(),
                parse_as_of(&as_of)?,
            )?;
            print_json(&summary)
        }
    }
}

fn apartment_input(fields: ApartmentFields) -> Result<ApartmentInput> {
    let due_date = match fields.due_date.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("Invalid due date (expected YYYY-MM-DD): {raw}"))?,
        ),
    };
    Ok(ApartmentInput {
        name: fields.name,
        number: fields.number,
        surface: fields.surface,
        rooms: fields.rooms,
        bathrooms: fields.bathrooms,
        balcony: fields.balcony,
        furnished: fields.furnished,
        monthly_rent: fields.rent,
        guarantee_months: fields.guarantee_months,
        guarantee_amount: fields.guarantee_amount,
        due_date,
        status: fields.status.parse::<ApartmentStatus>()?,
        manager_id: fields.manager,
    })
}

fn handle_apartment(db: &Db, cfg: &AppConfig, cmd: ApartmentCmd) -> Result<()> {
    match cmd {
        ApartmentCmd::Add { fields } => {
            let apt = registry::create_apartment(db, &apartment_input(fields)?, now_utc())?;
            print_json(&apt)
        }
        ApartmentCmd::Get { id } => print_json(&registry::get_apartment(db, &id)?),
        ApartmentCmd::Update { id, fields } => {
            let apt = registry::update_apartment(db, &id, &apartment_input(fields)?, now_utc())?;
            print_json(&apt)
        }
        ApartmentCmd::Delete { id } => {
            registry::delete_apartment(db, &id, now_utc())?;
            print_json(&json!({ "deleted": id }))
        }
        ApartmentCmd::List {
            manager,
            search,
            paging,
        } => {
            let page_size = cfg.page_size_or_default(paging.page_size);
            let page = registry::search_apartments(
                db,
                manager.as_deref(),
                search.as_deref(),
                paging.page,
                page_size,
            )?;
            match paging.format {
                OutputFormat::Json => print_json(&page),
                OutputFormat::Table => {
                    let rows: Vec<Vec<String>> = page
                        .items
                        .iter()
                        .map(|a| {
                            vec![
                                a.id.clone(),
                                a.name.clone(),
                                a.number.clone(),
                                a.status.to_string(),
                                money(a.monthly_rent),
                                a.manager_id.clone().unwrap_or_default(),
                            ]
                        })
                        .collect();
                    print_table(&["ID", "Name", "Number", "Status", "Rent", "Manager"], &rows);
                    println!(
                        "Page {}/{} ({} apartments).",
                        page.page, page.page_count, page.total_count
                    );
                    Ok(())
                }
            }
        }
    }
}

fn handle_user(db: &Db, cmd: UserCmd) -> Result<()> {
    match cmd {
        UserCmd::Add { name, role } => {
            print_json(&registry::create_user(db, &name, &role, now_utc())?)
        }
        UserCmd::List {
            role,
            managers,
            format,
        } => {
            let users = if managers {
                registry::list_managers(db)?
            } else {
                registry::list_users(db, role.as_deref())?
            };
            match format {
                OutputFormat::Json => print_json(&users),
                OutputFormat::Table => {
                    let rows: Vec<Vec<String>> = users
                        .iter()
                        .map(|u| vec![u.id.clone(), u.display_name.clone(), u.role.clone()])
                        .collect();
                    print_table(&["ID", "Name", "Role"], &rows);
                    Ok(())
                }
            }
        }
    }
}

fn parse_rfc3339_or_now(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        None => Ok(now_utc()),
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Invalid RFC3339 timestamp: {s}"))?
            .with_timezone(&Utc)),
    }
}

fn parse_as_of(args: &AsOfArgs) -> Result<DateTime<Utc>> {
    parse_rfc3339_or_now(args.as_of.as_deref())
}
