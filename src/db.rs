use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actuals::{DateWindow, TransactionLedger};
use crate::config::AppPaths;
use crate::currency::RateTable;
use crate::domain::{
    BudgetDetail, BudgetType, Category, DetailType, Flow, LedgerTransaction, TransactionKind,
};
use crate::error::{BudgetError, BudgetResult};
use crate::fields::{BudgetAggregate, Field, FlowPatch, FlowTotals, MONTHS};

const AGGREGATE_HEAD: &str =
    "id, user_id, fiscal_year, budget_type, currency, description, icon, updated_by, updated_at";
const AGGREGATE_HEAD_LEN: usize = 9;
const FLOW_FIELDS: usize = 19;

const DETAIL_COLUMNS: &str =
    "id, user_id, budget_id, category_id, month, detail_type, amount, currency, updated_at";

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS budget_details (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        budget_id TEXT NOT NULL REFERENCES budgets(id),
        category_id TEXT,
        month INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
        detail_type TEXT NOT NULL,
        amount TEXT NOT NULL,
        currency TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (user_id, budget_id, category_id, month, detail_type)
    );

    CREATE INDEX IF NOT EXISTS idx_details_category
        ON budget_details(budget_id, category_id, detail_type);

    CREATE TABLE IF NOT EXISTS categories (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (user_id, name)
    );

    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        amount TEXT NOT NULL,
        currency TEXT NOT NULL,
        occurred_on TEXT NOT NULL,
        created_at TEXT NOT NULL,
        deleted_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, occurred_on);

    CREATE TABLE IF NOT EXISTS rates (
        base TEXT NOT NULL,
        quote TEXT NOT NULL,
        as_of TEXT NOT NULL,
        rate TEXT NOT NULL,
        PRIMARY KEY (base, quote, as_of)
    );
"#;

fn amount_columns() -> Vec<String> {
    [Flow::Expense, Flow::Income]
        .into_iter()
        .flat_map(|flow| Field::all().map(move |f| f.column(flow)))
        .collect()
}

fn budgets_schema() -> String {
    let amounts = amount_columns()
        .iter()
        .map(|c| format!("        {c} TEXT NOT NULL DEFAULT '0'"))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        r#"
    CREATE TABLE IF NOT EXISTS budgets (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        fiscal_year INTEGER NOT NULL,
        budget_type TEXT NOT NULL,
        currency TEXT NOT NULL,
        description TEXT,
        icon TEXT,
        updated_by TEXT,
        updated_at TEXT NOT NULL,
{amounts},
        UNIQUE (user_id, fiscal_year, budget_type)
    );
"#
    )
}

fn aggregate_select() -> String {
    format!(
        "SELECT {AGGREGATE_HEAD}, {} FROM budgets",
        amount_columns().join(", ")
    )
}

fn storage_err(what: &str, raw: &str) -> BudgetError {
    BudgetError::Storage(format!("Invalid {what} in DB: '{raw}'"))
}

fn parse_uuid(raw: &str, what: &str) -> BudgetResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| storage_err(what, raw))
}

fn parse_amount(raw: &str, what: &str) -> BudgetResult<Decimal> {
    raw.parse::<Decimal>().map_err(|_| storage_err(what, raw))
}

fn parse_ts(raw: &str, what: &str) -> BudgetResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| storage_err(what, raw))
}

fn parse_date(raw: &str, what: &str) -> BudgetResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| storage_err(what, raw))
}

struct RawAggregate {
    id: String,
    user_id: String,
    fiscal_year: i32,
    budget_type: String,
    currency: String,
    description: Option<String>,
    icon: Option<String>,
    updated_by: Option<String>,
    updated_at: String,
    amounts: Vec<String>,
}

fn read_raw_aggregate(row: &Row<'_>) -> rusqlite::Result<RawAggregate> {
    let mut amounts = Vec::with_capacity(FLOW_FIELDS * 2);
    for i in 0..FLOW_FIELDS * 2 {
        amounts.push(row.get(AGGREGATE_HEAD_LEN + i)?);
    }
    Ok(RawAggregate {
        id: row.get(0)?,
        user_id: row.get(1)?,
        fiscal_year: row.get(2)?,
        budget_type: row.get(3)?,
        currency: row.get(4)?,
        description: row.get(5)?,
        icon: row.get(6)?,
        updated_by: row.get(7)?,
        updated_at: row.get(8)?,
        amounts,
    })
}

fn parse_flow(raw: &[String], flow: Flow) -> BudgetResult<FlowTotals> {
    let mut totals = FlowTotals::zero();
    for (field, value) in Field::all().zip(raw) {
        totals.set(field, parse_amount(value, &field.column(flow))?);
    }
    Ok(totals)
}

impl RawAggregate {
    fn into_aggregate(self) -> BudgetResult<BudgetAggregate> {
        let (exp, inc) = self.amounts.split_at(FLOW_FIELDS);
        Ok(BudgetAggregate {
            id: parse_uuid(&self.id, "budget id")?,
            user_id: parse_uuid(&self.user_id, "budget user_id")?,
            fiscal_year: self.fiscal_year,
            budget_type: BudgetType::from_str(&self.budget_type)
                .map_err(|_| storage_err("budget_type", &self.budget_type))?,
            currency: self.currency,
            description: self.description,
            icon: self.icon,
            updated_by: self
                .updated_by
                .as_deref()
                .map(|raw| parse_uuid(raw, "updated_by"))
                .transpose()?,
            updated_at: parse_ts(&self.updated_at, "budget updated_at")?,
            expense: parse_flow(exp, Flow::Expense)?,
            income: parse_flow(inc, Flow::Income)?,
        })
    }
}

struct RawDetail {
    id: String,
    user_id: String,
    budget_id: String,
    category_id: Option<String>,
    month: u8,
    detail_type: String,
    amount: String,
    currency: String,
    updated_at: String,
}

fn read_raw_detail(row: &Row<'_>) -> rusqlite::Result<RawDetail> {
    Ok(RawDetail {
        id: row.get(0)?,
        user_id: row.get(1)?,
        budget_id: row.get(2)?,
        category_id: row.get(3)?,
        month: row.get(4)?,
        detail_type: row.get(5)?,
        amount: row.get(6)?,
        currency: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl RawDetail {
    fn into_detail(self) -> BudgetResult<BudgetDetail> {
        Ok(BudgetDetail {
            id: parse_uuid(&self.id, "detail id")?,
            user_id: parse_uuid(&self.user_id, "detail user_id")?,
            budget_id: parse_uuid(&self.budget_id, "detail budget_id")?,
            category_id: self
                .category_id
                .as_deref()
                .map(|raw| parse_uuid(raw, "detail category_id"))
                .transpose()?,
            month: self.month,
            detail_type: DetailType::from_str(&self.detail_type)
                .map_err(|_| storage_err("detail_type", &self.detail_type))?,
            amount: parse_amount(&self.amount, "detail amount")?,
            currency: self.currency,
            updated_at: parse_ts(&self.updated_at, "detail updated_at")?,
        })
    }
}

fn query_aggregate(
    conn: &Connection,
    user_id: Uuid,
    fiscal_year: i32,
    budget_type: BudgetType,
) -> BudgetResult<Option<BudgetAggregate>> {
    let sql = format!(
        "{} WHERE user_id = ?1 AND fiscal_year = ?2 AND budget_type = ?3",
        aggregate_select()
    );
    let raw = conn
        .query_row(
            &sql,
            params![user_id.to_string(), fiscal_year, budget_type.as_str()],
            read_raw_aggregate,
        )
        .optional()?;
    raw.map(RawAggregate::into_aggregate).transpose()
}

fn query_aggregate_by_id(conn: &Connection, id: Uuid) -> BudgetResult<Option<BudgetAggregate>> {
    let sql = format!("{} WHERE id = ?1", aggregate_select());
    let raw = conn
        .query_row(&sql, params![id.to_string()], read_raw_aggregate)
        .optional()?;
    raw.map(RawAggregate::into_aggregate).transpose()
}

fn read_category(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_category(raw: (String, String, String, String, String)) -> BudgetResult<Category> {
    let (id, user_id, name, kind, created_at) = raw;
    Ok(Category {
        id: parse_uuid(&id, "category id")?,
        user_id: parse_uuid(&user_id, "category user_id")?,
        name,
        kind: Flow::from_str(&kind).map_err(|_| storage_err("category kind", &kind))?,
        created_at: parse_ts(&created_at, "category created_at")?,
    })
}

fn query_category(conn: &Connection, id: Uuid, user_id: Uuid) -> BudgetResult<Option<Category>> {
    let raw = conn
        .query_row(
            "SELECT id, user_id, name, kind, created_at FROM categories WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.to_string()],
            read_category,
        )
        .optional()?;
    raw.map(into_category).transpose()
}

fn query_details(
    conn: &Connection,
    budget_id: Uuid,
    category_id: Option<Uuid>,
    detail_type: Option<DetailType>,
) -> BudgetResult<Vec<BudgetDetail>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {DETAIL_COLUMNS}
        FROM budget_details
        WHERE budget_id = ?1
          AND (?2 IS NULL OR category_id = ?2)
          AND (?3 IS NULL OR detail_type = ?3)
        ORDER BY category_id ASC, detail_type ASC, month ASC
        "#
    ))?;
    let rows = stmt.query_map(
        params![
            budget_id.to_string(),
            category_id.map(|id| id.to_string()),
            detail_type.map(DetailType::as_str),
        ],
        read_raw_detail,
    )?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_detail()?);
    }
    Ok(out)
}

/// Twelve months of one flow plus the currency they are stored in.
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    pub budget_id: Uuid,
    pub currency: String,
    pub months: [Decimal; MONTHS],
}

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(paths: &AppPaths) -> BudgetResult<(Self, PathBuf)> {
        fs::create_dir_all(&paths.data_dir).map_err(|e| {
            BudgetError::Storage(format!(
                "Failed to create data dir {}: {e}",
                paths.data_dir.display()
            ))
        })?;
        let db_path = paths.data_dir.join("budgeteer.sqlite3");
        let db = Self::open_at(&db_path)?;
        Ok((db, db_path))
    }

    pub fn open_at(path: &Path) -> BudgetResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> BudgetResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> BudgetResult<()> {
        self.conn.execute_batch(&budgets_schema())?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Opens an immediate (write-locking) transaction. Other writers block on
    /// the database lock for at most `limit`.
    pub fn begin_write(&mut self, label: &'static str, limit: Duration) -> BudgetResult<WriteTx<'_>> {
        self.conn.busy_timeout(limit)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        debug!(op = label, ?limit, "write transaction opened");
        Ok(WriteTx {
            tx,
            label,
            started: Instant::now(),
            limit,
        })
    }

    pub fn get_aggregate(
        &self,
        user_id: Uuid,
        fiscal_year: i32,
        budget_type: BudgetType,
    ) -> BudgetResult<Option<BudgetAggregate>> {
        query_aggregate(&self.conn, user_id, fiscal_year, budget_type)
    }

    pub fn list_aggregates(&self, user_id: Uuid) -> BudgetResult<Vec<BudgetAggregate>> {
        let sql = format!(
            "{} WHERE user_id = ?1 ORDER BY fiscal_year ASC, budget_type ASC",
            aggregate_select()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id.to_string()], read_raw_aggregate)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_aggregate()?);
        }
        Ok(out)
    }

    pub fn list_details(
        &self,
        budget_id: Uuid,
        category_id: Option<Uuid>,
    ) -> BudgetResult<Vec<BudgetDetail>> {
        query_details(&self.conn, budget_id, category_id, None)
    }

    pub fn insert_category(&self, category: &Category) -> BudgetResult<()> {
        self.conn.execute(
            "INSERT INTO categories (id, user_id, name, kind, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                category.id.to_string(),
                category.user_id.to_string(),
                category.name,
                category.kind.as_str(),
                category.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_category(&self, id: Uuid, user_id: Uuid) -> BudgetResult<Option<Category>> {
        query_category(&self.conn, id, user_id)
    }

    pub fn find_category_by_name(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> BudgetResult<Option<Category>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, user_id, name, kind, created_at FROM categories WHERE user_id = ?1 AND name = ?2",
                params![user_id.to_string(), name],
                read_category,
            )
            .optional()?;
        raw.map(into_category).transpose()
    }

    pub fn list_categories(&self, user_id: Uuid) -> BudgetResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, kind, created_at FROM categories WHERE user_id = ?1 ORDER BY name ASC",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], read_category)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(into_category(row?)?);
        }
        Ok(out)
    }

    pub fn insert_transaction(&self, txn: &LedgerTransaction) -> BudgetResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO transactions (id, user_id, kind, amount, currency, occurred_on, created_at, deleted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                txn.id.to_string(),
                txn.user_id.to_string(),
                txn.kind.as_str(),
                txn.amount.to_string(),
                txn.currency,
                txn.occurred_on.format("%Y-%m-%d").to_string(),
                Utc::now().to_rfc3339(),
                txn.deleted_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Marks a transaction deleted. Returns the number of rows changed.
    pub fn soft_delete_transaction(
        &self,
        id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> BudgetResult<usize> {
        let changed = self.conn.execute(
            "UPDATE transactions SET deleted_at = ?1 WHERE id = ?2 AND user_id = ?3 AND deleted_at IS NULL",
            params![at.to_rfc3339(), id.to_string(), user_id.to_string()],
        )?;
        Ok(changed)
    }

    pub fn list_transactions(
        &self,
        user_id: Uuid,
        window: Option<&DateWindow>,
        exclude_deleted: bool,
    ) -> BudgetResult<Vec<LedgerTransaction>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, user_id, kind, amount, currency, occurred_on, deleted_at
            FROM transactions
            WHERE user_id = ?1
              AND (?2 IS NULL OR occurred_on >= ?2)
              AND (?3 IS NULL OR occurred_on <= ?3)
              AND (?4 = 0 OR deleted_at IS NULL)
            ORDER BY occurred_on ASC, created_at ASC
            "#,
        )?;

        let rows = stmt.query_map(
            params![
                user_id.to_string(),
                window.map(|w| w.start.format("%Y-%m-%d").to_string()),
                window.map(|w| w.end.format("%Y-%m-%d").to_string()),
                exclude_deleted,
            ],
            |row| {
                let id: String = row.get(0)?;
                let user_id: String = row.get(1)?;
                let kind: String = row.get(2)?;
                let amount: String = row.get(3)?;
                let currency: String = row.get(4)?;
                let occurred_on: String = row.get(5)?;
                let deleted_at: Option<String> = row.get(6)?;
                Ok((id, user_id, kind, amount, currency, occurred_on, deleted_at))
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (id, user_id, kind, amount, currency, occurred_on, deleted_at) = row?;
            out.push(LedgerTransaction {
                id: parse_uuid(&id, "transaction id")?,
                user_id: parse_uuid(&user_id, "transaction user_id")?,
                kind: TransactionKind::from_str(&kind)
                    .map_err(|_| storage_err("transaction kind", &kind))?,
                amount: parse_amount(&amount, "transaction amount")?,
                currency,
                occurred_on: parse_date(&occurred_on, "transaction occurred_on")?,
                deleted_at: deleted_at
                    .as_deref()
                    .map(|raw| parse_ts(raw, "transaction deleted_at"))
                    .transpose()?,
            });
        }
        Ok(out)
    }

    pub fn set_rate(
        &self,
        base: &str,
        quote: &str,
        as_of: DateTime<Utc>,
        rate: Decimal,
    ) -> BudgetResult<()> {
        if rate <= Decimal::ZERO {
            return Err(BudgetError::InvalidInput(format!(
                "rate must be > 0 (got {rate})"
            )));
        }
        self.conn.execute(
            r#"
            INSERT INTO rates (base, quote, as_of, rate)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(base, quote, as_of) DO UPDATE SET rate = excluded.rate
            "#,
            params![
                base.to_ascii_uppercase(),
                quote.to_ascii_uppercase(),
                as_of.to_rfc3339(),
                rate.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Latest rate of every stored (base, quote) pair.
    pub fn list_latest_rates(&self) -> BudgetResult<Vec<(String, String, DateTime<Utc>, Decimal)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT r.base, r.quote, r.as_of, r.rate
            FROM rates r
            WHERE r.as_of = (
                SELECT MAX(x.as_of) FROM rates x WHERE x.base = r.base AND x.quote = r.quote
            )
            ORDER BY r.base ASC, r.quote ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            let base: String = row.get(0)?;
            let quote: String = row.get(1)?;
            let as_of: String = row.get(2)?;
            let rate: String = row.get(3)?;
            Ok((base, quote, as_of, rate))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (base, quote, as_of, rate) = row?;
            let as_of = parse_ts(&as_of, "rate as_of")?;
            let rate = parse_amount(&rate, "rate")?;
            out.push((base, quote, as_of, rate));
        }
        Ok(out)
    }

    pub fn rate_table(&self) -> BudgetResult<RateTable> {
        Ok(RateTable::from_rates(
            self.list_latest_rates()?
                .into_iter()
                .map(|(base, quote, _, rate)| (base, quote, rate)),
        ))
    }
}

impl TransactionLedger for Db {
    fn find_transactions(
        &self,
        user_id: Uuid,
        window: &DateWindow,
        exclude_deleted: bool,
    ) -> BudgetResult<Vec<LedgerTransaction>> {
        self.list_transactions(user_id, Some(window), exclude_deleted)
    }
}

/// Unit of work for one engine operation. Dropping without `commit` rolls back.
pub struct WriteTx<'c> {
    tx: rusqlite::Transaction<'c>,
    label: &'static str,
    started: Instant,
    limit: Duration,
}

impl WriteTx<'_> {
    pub fn find_category(&self, id: Uuid, user_id: Uuid) -> BudgetResult<Option<Category>> {
        query_category(&self.tx, id, user_id)
    }

    pub fn load_aggregate(
        &self,
        user_id: Uuid,
        fiscal_year: i32,
        budget_type: BudgetType,
    ) -> BudgetResult<Option<BudgetAggregate>> {
        query_aggregate(&self.tx, user_id, fiscal_year, budget_type)
    }

    pub fn load_aggregate_by_id(&self, id: Uuid) -> BudgetResult<Option<BudgetAggregate>> {
        query_aggregate_by_id(&self.tx, id)
    }

    /// Reads only the currency and the twelve month columns of `flow`.
    pub fn load_flow_months(
        &self,
        user_id: Uuid,
        fiscal_year: i32,
        budget_type: BudgetType,
        flow: Flow,
    ) -> BudgetResult<Option<FlowSnapshot>> {
        let months: Vec<String> = (1..=12).map(|m| Field::Month(m).column(flow)).collect();
        let sql = format!(
            "SELECT id, currency, {} FROM budgets WHERE user_id = ?1 AND fiscal_year = ?2 AND budget_type = ?3",
            months.join(", ")
        );
        let raw = self
            .tx
            .query_row(
                &sql,
                params![user_id.to_string(), fiscal_year, budget_type.as_str()],
                |row| {
                    let id: String = row.get(0)?;
                    let currency: String = row.get(1)?;
                    let mut values = Vec::with_capacity(MONTHS);
                    for i in 0..MONTHS {
                        values.push(row.get::<_, String>(2 + i)?);
                    }
                    Ok((id, currency, values))
                },
            )
            .optional()?;

        let Some((id, currency, values)) = raw else {
            return Ok(None);
        };
        let mut parsed = [Decimal::ZERO; MONTHS];
        for (i, (slot, value)) in parsed.iter_mut().zip(values.iter()).enumerate() {
            *slot = parse_amount(value, &months[i])?;
        }
        Ok(Some(FlowSnapshot {
            budget_id: parse_uuid(&id, "budget id")?,
            currency,
            months: parsed,
        }))
    }

    pub fn insert_aggregate(&self, aggregate: &BudgetAggregate) -> BudgetResult<()> {
        let columns = amount_columns();
        let mut values: Vec<Value> = vec![
            Value::Text(aggregate.id.to_string()),
            Value::Text(aggregate.user_id.to_string()),
            Value::Integer(i64::from(aggregate.fiscal_year)),
            Value::Text(aggregate.budget_type.as_str().to_string()),
            Value::Text(aggregate.currency.clone()),
            aggregate
                .description
                .clone()
                .map(Value::Text)
                .unwrap_or(Value::Null),
            aggregate.icon.clone().map(Value::Text).unwrap_or(Value::Null),
            aggregate
                .updated_by
                .map(|id| Value::Text(id.to_string()))
                .unwrap_or(Value::Null),
            Value::Text(aggregate.updated_at.to_rfc3339()),
        ];
        for flow in [Flow::Expense, Flow::Income] {
            let totals = aggregate.flow(flow);
            values.extend(Field::all().map(|f| Value::Text(totals.get(f).to_string())));
        }
        let placeholders = (1..=values.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO budgets ({AGGREGATE_HEAD}, {}) VALUES ({placeholders})",
            columns.join(", ")
        );
        self.tx.execute(&sql, params_from_iter(values.iter()))?;
        Ok(())
    }

    /// Writes exactly the fields in `patch`, plus `updated_by`/`updated_at`.
    /// Returns the number of rows changed.
    pub fn write_flow_patch(
        &self,
        budget_id: Uuid,
        patch: &FlowPatch,
        updated_by: Uuid,
    ) -> BudgetResult<usize> {
        let mut assignments = Vec::with_capacity(patch.fields.len() + 2);
        let mut values: Vec<Value> = Vec::with_capacity(patch.fields.len() + 3);
        for (field, value) in patch.entries() {
            values.push(Value::Text(value.to_string()));
            assignments.push(format!("{} = ?{}", field.column(patch.flow), values.len()));
        }
        values.push(Value::Text(updated_by.to_string()));
        assignments.push(format!("updated_by = ?{}", values.len()));
        values.push(Value::Text(Utc::now().to_rfc3339()));
        assignments.push(format!("updated_at = ?{}", values.len()));
        values.push(Value::Text(budget_id.to_string()));

        let sql = format!(
            "UPDATE budgets SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len()
        );
        let changed = self.tx.execute(&sql, params_from_iter(values.iter()))?;
        Ok(changed)
    }

    pub fn insert_detail(&self, detail: &BudgetDetail) -> BudgetResult<()> {
        self.tx.execute(
            &format!(
                "INSERT INTO budget_details ({DETAIL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                detail.id.to_string(),
                detail.user_id.to_string(),
                detail.budget_id.to_string(),
                detail.category_id.map(|id| id.to_string()),
                detail.month,
                detail.detail_type.as_str(),
                detail.amount.to_string(),
                detail.currency,
                detail.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Inserts or overwrites the row keyed by (user, budget, category, month, type).
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_detail(
        &self,
        user_id: Uuid,
        budget_id: Uuid,
        category_id: Uuid,
        month: u8,
        detail_type: DetailType,
        amount: Decimal,
        currency: &str,
    ) -> BudgetResult<BudgetDetail> {
        let raw = self.tx.query_row(
            &format!(
                r#"
                INSERT INTO budget_details ({DETAIL_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(user_id, budget_id, category_id, month, detail_type)
                DO UPDATE SET amount = excluded.amount,
                              currency = excluded.currency,
                              updated_at = excluded.updated_at
                RETURNING {DETAIL_COLUMNS}
                "#
            ),
            params![
                Uuid::new_v4().to_string(),
                user_id.to_string(),
                budget_id.to_string(),
                category_id.to_string(),
                month,
                detail_type.as_str(),
                amount.to_string(),
                currency,
                Utc::now().to_rfc3339(),
            ],
            read_raw_detail,
        )?;
        raw.into_detail()
    }

    pub fn category_details(
        &self,
        budget_id: Uuid,
        category_id: Uuid,
        detail_type: DetailType,
    ) -> BudgetResult<Vec<BudgetDetail>> {
        query_details(&self.tx, budget_id, Some(category_id), Some(detail_type))
    }

    pub fn delete_category_details(
        &self,
        budget_id: Uuid,
        category_id: Uuid,
        detail_types: &[DetailType],
    ) -> BudgetResult<usize> {
        let mut deleted = 0;
        for detail_type in detail_types {
            deleted += self.tx.execute(
                "DELETE FROM budget_details WHERE budget_id = ?1 AND category_id = ?2 AND detail_type = ?3",
                params![
                    budget_id.to_string(),
                    category_id.to_string(),
                    detail_type.as_str()
                ],
            )?;
        }
        Ok(deleted)
    }

    pub fn truncate_category_details(
        &self,
        budget_id: Uuid,
        category_id: Uuid,
        detail_types: &[DetailType],
    ) -> BudgetResult<usize> {
        let now = Utc::now().to_rfc3339();
        let mut updated = 0;
        for detail_type in detail_types {
            updated += self.tx.execute(
                r#"
                UPDATE budget_details SET amount = '0', updated_at = ?1
                WHERE budget_id = ?2 AND category_id = ?3 AND detail_type = ?4
                "#,
                params![
                    now,
                    budget_id.to_string(),
                    category_id.to_string(),
                    detail_type.as_str()
                ],
            )?;
        }
        Ok(updated)
    }

    /// Commits unless the operation outlived its limit, in which case nothing
    /// is committed.
    pub fn commit(self) -> BudgetResult<()> {
        let elapsed = self.started.elapsed();
        if elapsed > self.limit {
            warn!(op = self.label, ?elapsed, limit = ?self.limit, "transaction timed out, rolling back");
            let limit = self.limit;
            self.tx.rollback()?;
            return Err(BudgetError::TransactionTimeout { elapsed, limit });
        }
        self.tx.commit()?;
        debug!(op = self.label, ?elapsed, "write transaction committed");
        Ok(())
    }
}
