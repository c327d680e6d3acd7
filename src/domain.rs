use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BudgetError, BudgetResult};
use crate::fields::BudgetAggregate;

/// Planning horizon of an aggregate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetType {
    Top,
    Bot,
    Act,
}

impl BudgetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bot => "bot",
            Self::Act => "act",
        }
    }
}

impl fmt::Display for BudgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Top => "Top",
            Self::Bot => "Bot",
            Self::Act => "Act",
        })
    }
}

impl FromStr for BudgetType {
    type Err = BudgetError;

    fn from_str(s: &str) -> BudgetResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "bot" => Ok(Self::Bot),
            "act" => Ok(Self::Act),
            other => Err(BudgetError::InvalidInput(format!(
                "unknown budget type '{other}' (expected top, bot or act)"
            ))),
        }
    }
}

/// Expense or income side of an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Expense,
    Income,
}

impl Flow {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Expense => "_exp",
            Self::Income => "_inc",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
        }
    }
}

impl FromStr for Flow {
    type Err = BudgetError;

    fn from_str(s: &str) -> BudgetResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expense" | "exp" => Ok(Self::Expense),
            "income" | "inc" => Ok(Self::Income),
            other => Err(BudgetError::InvalidInput(format!(
                "unknown flow '{other}' (expected expense or income)"
            ))),
        }
    }
}

/// Kind of a budget detail row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailType {
    Expense,
    Income,
    Act,
}

impl DetailType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
            Self::Act => "act",
        }
    }

    /// The aggregate flow a plan detail feeds. `Act` details feed none.
    pub fn flow(self) -> Option<Flow> {
        match self {
            Self::Expense => Some(Flow::Expense),
            Self::Income => Some(Flow::Income),
            Self::Act => None,
        }
    }
}

impl From<Flow> for DetailType {
    fn from(flow: Flow) -> Self {
        match flow {
            Flow::Expense => Self::Expense,
            Flow::Income => Self::Income,
        }
    }
}

impl fmt::Display for DetailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expense => "Expense",
            Self::Income => "Income",
            Self::Act => "Act",
        })
    }
}

impl FromStr for DetailType {
    type Err = BudgetError;

    fn from_str(s: &str) -> BudgetResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expense" | "exp" => Ok(Self::Expense),
            "income" | "inc" => Ok(Self::Income),
            "act" => Ok(Self::Act),
            other => Err(BudgetError::InvalidInput(format!(
                "unknown detail type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Transfer => "transfer",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = BudgetError;

    fn from_str(s: &str) -> BudgetResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            "transfer" => Ok(Self::Transfer),
            other => Err(BudgetError::InvalidInput(format!(
                "unknown transaction kind '{other}'"
            ))),
        }
    }
}

/// How a category's details are removed from a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    /// Hard-delete the detail rows.
    Delete,
    /// Keep the rows with `amount = 0`.
    Truncate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub kind: Flow,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDetail {
    pub id: Uuid,
    pub user_id: Uuid,
    pub budget_id: Uuid,
    /// `None` for the uncategorised rows written by the even-split initializer.
    pub category_id: Option<Uuid>,
    pub month: u8,
    pub detail_type: DetailType,
    pub amount: Decimal,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub currency: String,
    pub occurred_on: NaiveDate,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for the even-split initializer.
#[derive(Debug, Clone)]
pub struct NewBudget {
    pub user_id: Uuid,
    pub fiscal_year: i32,
    pub budget_type: BudgetType,
    pub estimated_total_expense: Decimal,
    pub estimated_total_income: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedBudget {
    pub aggregate: BudgetAggregate,
    pub details: Vec<BudgetDetail>,
}

/// Absolute month values keyed by field name (`m3_exp`, `m11_inc`, ...).
pub type FieldMap = BTreeMap<String, Decimal>;

/// Direct overwrite of selected months of one flow.
#[derive(Debug, Clone)]
pub struct DetailUpdate {
    pub user_id: Uuid,
    pub fiscal_year: i32,
    pub budget_type: BudgetType,
    pub detail_type: DetailType,
    pub fields: FieldMap,
    pub currency: String,
}

/// A category's full-year bottom-up plan, optionally with actuals.
#[derive(Debug, Clone)]
pub struct CategoryPlan {
    pub user_id: Uuid,
    pub fiscal_year: i32,
    pub category_id: Uuid,
    pub detail_type: DetailType,
    pub plan: FieldMap,
    pub actual: Option<FieldMap>,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct CategoryUpsert {
    pub updated_details: Vec<BudgetDetail>,
    pub act_details: Option<Vec<BudgetDetail>>,
    pub aggregate: BudgetAggregate,
}

#[derive(Debug, Clone)]
pub struct CategoryRemoval {
    pub user_id: Uuid,
    pub fiscal_year: i32,
    pub category_id: Uuid,
    pub detail_type: DetailType,
    pub mode: RemovalMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    Deleted { count: usize },
    Truncated { count: usize },
}

pub fn normalize_currency(raw: &str) -> BudgetResult<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(BudgetError::InvalidInput(format!(
            "invalid currency code '{raw}'"
        )));
    }
    Ok(code)
}
