//! Hierarchical budget aggregation: wide per-year aggregates kept consistent
//! across month, quarter, half and year as category allocations change, with
//! multi-currency normalization and ledger-derived actuals.

pub mod actuals;
pub mod config;
pub mod currency;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fields;
pub mod logging;
pub mod strategy;

pub use actuals::{ActualsReconciler, DateWindow, TransactionLedger, actuals_window};
pub use currency::{CurrencyConverter, RateTable};
pub use db::Db;
pub use engine::BudgetEngine;
pub use error::{BudgetError, BudgetResult};
pub use fields::{BudgetAggregate, Field, FieldSet, FlowTotals};
