mod cli;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use clap::Parser;
use rust_decimal::Decimal;
use uuid::Uuid;

use budgeteer::config::{AppConfig, app_paths, load_or_init_config};
use budgeteer::domain::{
    BudgetType, Category, CategoryPlan, CategoryRemoval, DetailType, DetailUpdate, FieldMap, Flow,
    LedgerTransaction, NewBudget, RemovalMode, RemovalOutcome, TransactionKind,
    normalize_currency,
};
use budgeteer::{BudgetAggregate, BudgetEngine, Db, Field};

use crate::cli::{BudgetCmd, CategoryCmd, Cli, Command, RateCmd, TxCmd, YearFlag};

fn main() {
    budgeteer::logging::init_tracing();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = app_paths(cli.home.clone())?;
    let (cfg, _cfg_path) = load_or_init_config(&paths)?;
    let (mut db, db_path) = Db::open(&paths)
        .with_context(|| format!("Failed to open budget store under {}", paths.data_dir.display()))?;
    tracing::debug!(db = %db_path.display(), user = %cfg.user_id, "store opened");

    match cli.command {
        Command::Budget(args) => handle_budget(&mut db, &cfg, args.cmd),
        Command::Category(args) => handle_category(&mut db, &cfg, args.cmd),
        Command::Rate(args) => handle_rate(&db, args.cmd),
        Command::Tx(args) => handle_tx(&db, &cfg, args.cmd),
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn resolve_year(flag: &YearFlag, cfg: &AppConfig) -> i32 {
    flag.year
        .or(cfg.default_fiscal_year)
        .unwrap_or_else(|| today().year())
}

fn parse_date_or_today(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        None => Ok(today()),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("Invalid date (expected YYYY-MM-DD): {s}")),
    }
}

fn parse_rfc3339_or_now(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        None => Ok(Utc::now()),
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Invalid RFC3339 timestamp: {s}"))?
            .with_timezone(&Utc)),
    }
}

/// Parses `key=value` pairs such as `m3_exp=250`.
fn parse_assignments(raw: &[String]) -> Result<FieldMap> {
    let mut out = FieldMap::new();
    for token in raw {
        let Some((key, value)) = token.split_once('=') else {
            return Err(anyhow!("Expected <field>=<amount>, got '{token}'"));
        };
        let amount = value
            .trim()
            .parse::<Decimal>()
            .with_context(|| format!("Invalid amount for {key}: '{value}'"))?;
        if out.insert(key.trim().to_string(), amount).is_some() {
            return Err(anyhow!("Field {key} given more than once"));
        }
    }
    Ok(out)
}

fn category_by_name(db: &Db, cfg: &AppConfig, name: &str) -> Result<Category> {
    db.find_category_by_name(cfg.user_id, name)?
        .ok_or_else(|| anyhow!("No such category: '{name}'"))
}

fn print_aggregate(aggregate: &BudgetAggregate) {
    println!(
        "budget\t{}\t{}\t{}",
        aggregate.budget_type.as_str(),
        aggregate.fiscal_year,
        aggregate.currency
    );
    println!("field\texpense\tincome");
    for field in Field::all() {
        let label = match field {
            Field::Month(m) => format!("m{m}"),
            Field::Quarter(q) => format!("q{q}"),
            Field::Half(h) => format!("h{h}"),
            Field::Total => "total".to_string(),
        };
        println!(
            "{}\t{}\t{}",
            label,
            aggregate.expense.get(field).normalize(),
            aggregate.income.get(field).normalize()
        );
    }
}

fn handle_budget(db: &mut Db, cfg: &AppConfig, cmd: BudgetCmd) -> Result<()> {
    let rates = db.rate_table()?;
    let engine = BudgetEngine::new(&rates);

    match cmd {
        BudgetCmd::Create {
            year,
            expense,
            income,
            currency,
            budget_type,
            description,
            icon,
        } => {
            let req = NewBudget {
                user_id: cfg.user_id,
                fiscal_year: resolve_year(&year, cfg),
                budget_type: budget_type.parse()?,
                estimated_total_expense: expense,
                estimated_total_income: income,
                currency: currency.unwrap_or_else(|| cfg.base_currency.clone()),
                description,
                icon,
            };
            let created = engine.create_budget(db, &req)?;
            println!(
                "Created {} budget for {} in {} ({} detail rows).",
                created.aggregate.budget_type.as_str(),
                created.aggregate.fiscal_year,
                created.aggregate.currency,
                created.details.len()
            );
            Ok(())
        }
        BudgetCmd::List => {
            let aggregates = db.list_aggregates(cfg.user_id)?;
            if aggregates.is_empty() {
                println!("(no budgets)");
                return Ok(());
            }
            println!("year\ttype\tcurrency\ttotal_exp\ttotal_inc");
            for a in aggregates {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    a.fiscal_year,
                    a.budget_type.as_str(),
                    a.currency,
                    a.expense.total.normalize(),
                    a.income.total.normalize()
                );
            }
            Ok(())
        }
        BudgetCmd::Show {
            year,
            budget_type,
            today,
        } => {
            let budget_type: BudgetType = budget_type.parse()?;
            let today = parse_date_or_today(today.as_deref())?;
            let store: &Db = db;
            let aggregate = engine.get_budget_by_type(
                store,
                store,
                cfg.user_id,
                resolve_year(&year, cfg),
                budget_type,
                today,
            )?;
            print_aggregate(&aggregate);
            Ok(())
        }
        BudgetCmd::Set {
            year,
            budget_type,
            flow,
            currency,
            fields,
        } => {
            let flow: Flow = flow.parse()?;
            let req = DetailUpdate {
                user_id: cfg.user_id,
                fiscal_year: resolve_year(&year, cfg),
                budget_type: budget_type.parse()?,
                detail_type: DetailType::from(flow),
                fields: parse_assignments(&fields)?,
                currency: currency.unwrap_or_else(|| cfg.base_currency.clone()),
            };
            let aggregate = engine.update_budget_details(db, &req)?;
            print_aggregate(&aggregate);
            Ok(())
        }
        BudgetCmd::Details {
            year,
            budget_type,
            category,
        } => {
            let fiscal_year = resolve_year(&year, cfg);
            let budget_type: BudgetType = budget_type.parse()?;
            let Some(aggregate) = db.get_aggregate(cfg.user_id, fiscal_year, budget_type)? else {
                return Err(anyhow!("No {budget_type} budget for fiscal year {fiscal_year}"));
            };
            let category_id = match category.as_deref() {
                Some(name) => Some(category_by_name(db, cfg, name)?.id),
                None => None,
            };
            let details = db.list_details(aggregate.id, category_id)?;
            if details.is_empty() {
                println!("(no details)");
                return Ok(());
            }
            println!("category\tmonth\ttype\tamount\tcurrency");
            for d in details {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    d.category_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    d.month,
                    d.detail_type.as_str(),
                    d.amount.normalize(),
                    d.currency
                );
            }
            Ok(())
        }
    }
}

fn handle_category(db: &mut Db, cfg: &AppConfig, cmd: CategoryCmd) -> Result<()> {
    match cmd {
        CategoryCmd::Add { name, kind } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(anyhow!("Category name must not be empty"));
            }
            let category = Category {
                id: Uuid::new_v4(),
                user_id: cfg.user_id,
                name: name.clone(),
                kind: kind.parse()?,
                created_at: Utc::now(),
            };
            db.insert_category(&category)
                .with_context(|| format!("Failed to create category '{name}'"))?;
            println!("Created {} category '{}'.", category.kind.as_str(), name);
            Ok(())
        }
        CategoryCmd::List => {
            let categories = db.list_categories(cfg.user_id)?;
            if categories.is_empty() {
                println!("(no categories)");
                return Ok(());
            }
            println!("name\ttype\tid");
            for c in categories {
                println!("{}\t{}\t{}", c.name, c.kind.as_str(), c.id);
            }
            Ok(())
        }
        CategoryCmd::Set {
            name,
            year,
            currency,
            actual,
            plan,
        } => {
            let category = category_by_name(db, cfg, &name)?;
            let req = CategoryPlan {
                user_id: cfg.user_id,
                fiscal_year: resolve_year(&year, cfg),
                category_id: category.id,
                detail_type: DetailType::from(category.kind),
                plan: parse_assignments(&plan)?,
                actual: if actual.is_empty() {
                    None
                } else {
                    Some(parse_assignments(&actual)?)
                },
                currency: currency.unwrap_or_else(|| cfg.base_currency.clone()),
            };
            let rates = db.rate_table()?;
            let outcome = BudgetEngine::new(&rates).upsert_category_details(db, &req)?;
            println!(
                "Set '{}' plan ({} rows{}).",
                name,
                outcome.updated_details.len(),
                outcome
                    .act_details
                    .as_ref()
                    .map(|rows| format!(", {} actual rows", rows.len()))
                    .unwrap_or_default()
            );
            print_aggregate(&outcome.aggregate);
            Ok(())
        }
        CategoryCmd::Delete {
            name,
            year,
            truncate,
        } => {
            let category = category_by_name(db, cfg, &name)?;
            let req = CategoryRemoval {
                user_id: cfg.user_id,
                fiscal_year: resolve_year(&year, cfg),
                category_id: category.id,
                detail_type: DetailType::from(category.kind),
                mode: if truncate {
                    RemovalMode::Truncate
                } else {
                    RemovalMode::Delete
                },
            };
            let rates = db.rate_table()?;
            match BudgetEngine::new(&rates).delete_category_details(db, &req)? {
                RemovalOutcome::Deleted { count } => {
                    println!("Deleted {count} detail rows for '{name}'.")
                }
                RemovalOutcome::Truncated { count } => {
                    println!("Zeroed {count} detail rows for '{name}'.")
                }
            }
            Ok(())
        }
    }
}

fn handle_rate(db: &Db, cmd: RateCmd) -> Result<()> {
    match cmd {
        RateCmd::Set {
            base,
            quote,
            rate,
            as_of,
        } => {
            let as_of = parse_rfc3339_or_now(as_of.as_deref())?;
            db.set_rate(&base, &quote, as_of, rate)?;
            println!(
                "Set rate {} per {} = {} (as of {}).",
                quote.to_ascii_uppercase(),
                base.to_ascii_uppercase(),
                rate,
                as_of.to_rfc3339()
            );
            Ok(())
        }
        RateCmd::List => {
            let rates = db.list_latest_rates()?;
            if rates.is_empty() {
                println!("(no rates)");
                return Ok(());
            }
            println!("base\tquote\tas_of\trate");
            for (base, quote, as_of, rate) in rates {
                println!("{}\t{}\t{}\t{}", base, quote, as_of.to_rfc3339(), rate);
            }
            Ok(())
        }
    }
}

fn handle_tx(db: &Db, cfg: &AppConfig, cmd: TxCmd) -> Result<()> {
    match cmd {
        TxCmd::Add {
            kind,
            amount,
            currency,
            date,
        } => {
            let kind: TransactionKind = kind.parse()?;
            if amount <= Decimal::ZERO {
                return Err(anyhow!("Transaction amount must be > 0"));
            }
            let txn = LedgerTransaction {
                id: Uuid::new_v4(),
                user_id: cfg.user_id,
                kind,
                amount,
                currency: normalize_currency(&currency)?,
                occurred_on: parse_date_or_today(date.as_deref())?,
                deleted_at: None,
            };
            db.insert_transaction(&txn)?;
            println!("Recorded {} {} {} ({}).", kind.as_str(), amount, txn.currency, txn.id);
            Ok(())
        }
        TxCmd::Delete { id } => {
            let id = Uuid::parse_str(id.trim()).with_context(|| format!("Invalid id: {id}"))?;
            let changed = db.soft_delete_transaction(id, cfg.user_id, Utc::now())?;
            if changed == 0 {
                return Err(anyhow!("No such transaction: {id}"));
            }
            println!("Deleted transaction {id}.");
            Ok(())
        }
        TxCmd::List => {
            let txns = db.list_transactions(cfg.user_id, None, true)?;
            if txns.is_empty() {
                println!("(no transactions)");
                return Ok(());
            }
            println!("date\tkind\tamount\tcurrency\tid");
            for t in txns {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    t.occurred_on,
                    t.kind.as_str(),
                    t.amount,
                    t.currency,
                    t.id
                );
            }
            Ok(())
        }
    }
}
