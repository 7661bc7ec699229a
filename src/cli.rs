use crate::domain::Period;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "caisse")]
#[command(
    about = "Multi-currency cash ledger and dashboards for rental apartments",
    long_about = None
)]
pub struct Cli {
    /// Override Caisse home directory (config/data subdirs will be created inside it).
    #[arg(long, env = "CAISSE_HOME", global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record, edit and list ledger entries.
    Entry(EntryArgs),
    /// Income and expense sums per currency.
    Totals(AggregateArgs),
    /// Net balance per currency plus the folded grand totals.
    Balance(AggregateArgs),
    /// Convert an amount between USD and CDF.
    Convert(ConvertArgs),
    Dashboard(DashboardArgs),
    Apartment(ApartmentArgs),
    User(UserArgs),
    Config(ConfigArgs),
}

/// Neither flag means every apartment.
#[derive(Debug, Args, Clone, Default)]
pub struct ScopeArgs {
    #[arg(long)]
    pub apartment: Option<String>,

    /// Apartments owned by this manager.
    #[arg(long)]
    pub manager: Option<String>,
}

/// Calendar-day bounds (YYYY-MM-DD); both ends are inclusive.
#[derive(Debug, Args, Clone, Default)]
pub struct DateFilterArgs {
    #[arg(long)]
    pub start: Option<String>,

    #[arg(long)]
    pub end: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct AsOfArgs {
    /// Reference instant for "current period" computations (RFC3339). Defaults to now.
    #[arg(long)]
    pub as_of: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PeriodArg {
    Month,
    Quarter,
    Year,
}

impl From<PeriodArg> for Period {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::Month => Period::Month,
            PeriodArg::Quarter => Period::Quarter,
            PeriodArg::Year => Period::Year,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct PageArgs {
    /// 1-based page number.
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Defaults to `default_page_size` from the config.
    #[arg(long)]
    pub page_size: Option<u32>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct EntryArgs {
    #[command(subcommand)]
    pub cmd: EntryCmd,
}

/// Mutable fields of an entry; `update` replaces all of them.
#[derive(Debug, Args, Clone)]
pub struct EntryFields {
    #[arg(long)]
    pub apartment: String,

    /// Income or Expense.
    #[arg(long)]
    pub kind: String,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub cdf: f64,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub usd: f64,

    #[arg(long, short = 'm', alias = "note")]
    pub memo: Option<String>,

    /// Defaults to `default_signer` from the config.
    #[arg(long)]
    pub signer: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum EntryCmd {
    Record {
        #[command(flatten)]
        fields: EntryFields,

        /// Creation time (RFC3339). Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },
    Get {
        id: String,
    },
    Update {
        id: String,

        #[command(flatten)]
        fields: EntryFields,
    },
    Delete {
        id: String,
    },
    List {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        dates: DateFilterArgs,

        /// Case-insensitive match on kind, signer or memo.
        #[arg(long)]
        search: Option<String>,

        #[command(flatten)]
        paging: PageArgs,
    },
}

#[derive(Debug, Args)]
pub struct AggregateArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    #[command(flatten)]
    pub dates: DateFilterArgs,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    #[arg(allow_hyphen_values = true)]
    pub amount: f64,

    pub from: String,

    pub to: String,

    /// Explicit rate for this conversion only; otherwise the configured rate is used.
    #[arg(long, allow_hyphen_values = true)]
    pub rate: Option<f64>,
}

#[derive(Debug, Args)]
pub struct DashboardArgs {
    #[command(subcommand)]
    pub cmd: DashboardCmd,
}

#[derive(Debug, Subcommand)]
pub enum DashboardCmd {
    Summary {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        dates: DateFilterArgs,

        #[command(flatten)]
        as_of: AsOfArgs,
    },
    Trends {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        dates: DateFilterArgs,

        /// The twelve months of this year.
        #[arg(long, conflicts_with = "months")]
        year: Option<i32>,

        /// The last N months up to the as-of month (default 12).
        #[arg(long)]
        months: Option<u32>,

        #[command(flatten)]
        as_of: AsOfArgs,
    },
    Managers {
        #[command(flatten)]
        dates: DateFilterArgs,
    },
    Occupancy {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    TopManagers {
        #[arg(long, value_enum, default_value_t = PeriodArg::Month)]
        period: PeriodArg,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[command(flatten)]
        as_of: AsOfArgs,
    },
    TopApartments {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        dates: DateFilterArgs,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    Financial {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long, value_enum, default_value_t = PeriodArg::Month)]
        period: PeriodArg,

        #[command(flatten)]
        as_of: AsOfArgs,
    },
}

#[derive(Debug, Args)]
pub struct ApartmentArgs {
    #[command(subcommand)]
    pub cmd: ApartmentCmd,
}

#[derive(Debug, Args, Clone)]
pub struct ApartmentFields {
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub number: String,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub surface: f64,

    #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
    pub rooms: i64,

    #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
    pub bathrooms: i64,

    #[arg(long)]
    pub balcony: bool,

    #[arg(long)]
    pub furnished: bool,

    /// Monthly rent target (USD).
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub rent: f64,

    #[arg(long, default_value_t = 2.0, allow_hyphen_values = true)]
    pub guarantee_months: f64,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub guarantee_amount: f64,

    /// YYYY-MM-DD
    #[arg(long)]
    pub due_date: Option<String>,

    /// available, occupied, maintenance or unavailable.
    #[arg(long, default_value = "available")]
    pub status: String,

    #[arg(long)]
    pub manager: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ApartmentCmd {
    Add {
        #[command(flatten)]
        fields: ApartmentFields,
    },
    Get {
        id: String,
    },
    Update {
        id: String,

        #[command(flatten)]
        fields: ApartmentFields,
    },
    Delete {
        id: String,
    },
    List {
        #[arg(long)]
        manager: Option<String>,

        /// Case-insensitive match on name, number or status.
        #[arg(long)]
        search: Option<String>,

        #[command(flatten)]
        paging: PageArgs,
    },
}

#[derive(Debug, Args)]
pub struct UserArgs {
    #[command(subcommand)]
    pub cmd: UserCmd,
}

#[derive(Debug, Subcommand)]
pub enum UserCmd {
    Add {
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "Manager")]
        role: String,
    },
    List {
        #[arg(long, conflicts_with = "managers")]
        role: Option<String>,

        /// Only users taking part in manager rollups.
        #[arg(long)]
        managers: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    Show,
    /// Set the rate for one direction, e.g. `set-rate USD CDF 2850`.
    SetRate {
        from: String,
        to: String,
        rate: f64,
    },
    /// Signer recorded on entries when `--signer` is not given.
    SetSigner {
        signer: Option<String>,
    },
}
