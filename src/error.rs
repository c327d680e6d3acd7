use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::{BudgetType, DetailType};

pub type BudgetResult<T> = Result<T, BudgetError>;

/// Every failure the budget engine can surface. Raising any of these inside a
/// write rolls the whole transaction back.
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Invalid field key '{key}' for {detail_type} (expected m1..m12 with suffix {suffix})")]
    InvalidKey {
        key: String,
        detail_type: DetailType,
        suffix: &'static str,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No {budget_type} budget for fiscal year {fiscal_year}")]
    BudgetNotFound {
        fiscal_year: i32,
        budget_type: BudgetType,
    },

    #[error("A {budget_type} budget for fiscal year {fiscal_year} already exists")]
    BudgetExists {
        fiscal_year: i32,
        budget_type: BudgetType,
    },

    #[error("Category not found: {0}")]
    CategoryNotFound(String),

    #[error("Category {category_id} is declared as {declared} but {requested} was requested")]
    CategoryTypeMismatch {
        category_id: Uuid,
        declared: DetailType,
        requested: DetailType,
    },

    #[error("No exchange rate path from {from} to {to}")]
    CurrencyNotFound { from: String, to: String },

    #[error("Nothing to delete: category {category_id} has no {detail_type} details")]
    NothingToDelete {
        category_id: Uuid,
        detail_type: DetailType,
    },

    #[error("Budget update failed: {0}")]
    BudgetUpdateFailed(String),

    #[error("Budget detail update failed: {0}")]
    BudgetDetailUpdateFailed(String),

    #[error("Budget detail delete failed: {0}")]
    BudgetDetailDeleteFailed(String),

    #[error("Transaction timed out after {elapsed:?} (limit {limit:?})")]
    TransactionTimeout { elapsed: Duration, limit: Duration },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for BudgetError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}
