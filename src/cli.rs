use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

#[derive(Debug, Parser)]
#[command(name = "budgeteer")]
#[command(about = "Hierarchical multi-currency budgets", long_about = None)]
pub struct Cli {
    /// Override Budgeteer home directory (config/data subdirs will be created inside it).
    #[arg(long, env = "BUDGETEER_HOME")]
    pub home: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Budget(BudgetArgs),
    Category(CategoryArgs),
    Rate(RateArgs),
    Tx(TxArgs),
}

#[derive(Debug, Args, Clone)]
pub struct YearFlag {
    /// Fiscal year. Defaults to the configured year, then the current year.
    #[arg(long)]
    pub year: Option<i32>,
}

#[derive(Debug, Subcommand)]
pub enum BudgetCmd {
    /// Create a Top or Bot budget by splitting annual estimates evenly over 12 months.
    Create {
        #[command(flatten)]
        year: YearFlag,
        #[arg(long)]
        expense: Decimal,
        #[arg(long)]
        income: Decimal,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long = "type", default_value = "bot")]
        budget_type: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    /// One line per stored budget: year, type, currency and annual totals.
    List,
    /// Print every field of a budget. `--type act` reconciles from the ledger.
    Show {
        #[command(flatten)]
        year: YearFlag,
        #[arg(long = "type", default_value = "bot")]
        budget_type: String,
        /// Reference date for actuals (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        today: Option<String>,
    },
    /// Overwrite months directly, e.g. `m3_exp=250 m4_exp=300`.
    Set {
        #[command(flatten)]
        year: YearFlag,
        #[arg(long = "type", default_value = "bot")]
        budget_type: String,
        #[arg(long)]
        flow: String,
        #[arg(long)]
        currency: Option<String>,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// List detail rows of a budget.
    Details {
        #[command(flatten)]
        year: YearFlag,
        #[arg(long = "type", default_value = "bot")]
        budget_type: String,
        #[arg(long)]
        category: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct BudgetArgs {
    #[command(subcommand)]
    pub cmd: BudgetCmd,
}

#[derive(Debug, Subcommand)]
pub enum CategoryCmd {
    Add {
        name: String,
        #[arg(long = "type")]
        kind: String,
    },
    List,
    /// Set a category's monthly plan on the Bot budget, e.g. `m1_exp=500 ...`.
    Set {
        name: String,
        #[command(flatten)]
        year: YearFlag,
        #[arg(long)]
        currency: Option<String>,
        /// Actual month values, same key format as the plan.
        #[arg(long = "actual")]
        actual: Vec<String>,
        #[arg(required = true)]
        plan: Vec<String>,
    },
    /// Remove a category's contribution from the Bot budget.
    Delete {
        name: String,
        #[command(flatten)]
        year: YearFlag,
        /// Zero the rows instead of deleting them.
        #[arg(long)]
        truncate: bool,
    },
}

#[derive(Debug, Args)]
pub struct CategoryArgs {
    #[command(subcommand)]
    pub cmd: CategoryCmd,
}

#[derive(Debug, Subcommand)]
pub enum RateCmd {
    /// Store `rate` units of QUOTE per one BASE.
    Set {
        base: String,
        quote: String,
        rate: Decimal,
        /// RFC3339 timestamp. Defaults to now.
        #[arg(long)]
        as_of: Option<String>,
    },
    List,
}

#[derive(Debug, Args)]
pub struct RateArgs {
    #[command(subcommand)]
    pub cmd: RateCmd,
}

#[derive(Debug, Subcommand)]
pub enum TxCmd {
    Add {
        /// income, expense or transfer
        kind: String,
        amount: Decimal,
        currency: String,
        /// YYYY-MM-DD. Defaults to today.
        #[arg(long)]
        date: Option<String>,
    },
    Delete {
        id: String,
    },
    List,
}

#[derive(Debug, Args)]
pub struct TxArgs {
    #[command(subcommand)]
    pub cmd: TxCmd,
}
