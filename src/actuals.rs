//! Read-time reconciliation of the `Act` budget from the transaction ledger.

use std::collections::BTreeSet;

use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::currency::CurrencyConverter;
use crate::db::Db;
use crate::domain::{BudgetType, Flow, LedgerTransaction, TransactionKind};
use crate::engine::BudgetEngine;
use crate::error::{BudgetError, BudgetResult};
use crate::fields::{BudgetAggregate, FieldSet, MONTHS};
use crate::strategy::{add_amounts, strategy_for_flow};

/// Inclusive calendar-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Calendar months (1-based) the window touches.
    pub fn months(&self) -> BTreeSet<u8> {
        let mut out = BTreeSet::new();
        let mut cursor = self.start.with_day(1).unwrap_or(self.start);
        while cursor <= self.end {
            out.insert(cursor.month() as u8);
            match cursor.checked_add_months(Months::new(1)) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        out
    }
}

/// Read-only access to the transaction ledger.
pub trait TransactionLedger {
    fn find_transactions(
        &self,
        user_id: Uuid,
        window: &DateWindow,
        exclude_deleted: bool,
    ) -> BudgetResult<Vec<LedgerTransaction>>;
}

/// `max(fiscal year start, today - 1 month) ..= min(fiscal year end, today)`,
/// or `None` when the fiscal year lies entirely outside that range.
pub fn actuals_window(fiscal_year: i32, today: NaiveDate) -> Option<DateWindow> {
    let fy_start = NaiveDate::from_ymd_opt(fiscal_year, 1, 1)?;
    let fy_end = NaiveDate::from_ymd_opt(fiscal_year, 12, 31)?;
    let month_ago = today.checked_sub_months(Months::new(1))?;

    let start = fy_start.max(month_ago);
    let end = fy_end.min(today);
    (start <= end).then_some(DateWindow { start, end })
}

/// Per-month ledger sums for both flows, in the target currency. Transfers
/// count toward neither flow.
pub fn bucket_by_month(
    transactions: &[LedgerTransaction],
    window: &DateWindow,
    currency: &str,
    converter: &dyn CurrencyConverter,
) -> BudgetResult<([Decimal; MONTHS], [Decimal; MONTHS])> {
    let mut expense = [Decimal::ZERO; MONTHS];
    let mut income = [Decimal::ZERO; MONTHS];
    for txn in transactions {
        if txn.deleted_at.is_some() || !window.contains(txn.occurred_on) {
            continue;
        }
        let bucket = match txn.kind {
            TransactionKind::Expense => &mut expense,
            TransactionKind::Income => &mut income,
            TransactionKind::Transfer => continue,
        };
        let month = txn.occurred_on.month0() as usize;
        let converted = converter.convert(txn.amount.abs(), &txn.currency, currency)?;
        bucket[month] = add_amounts(bucket[month], converted)?;
    }
    Ok((expense, income))
}

pub struct ActualsReconciler<'a> {
    ledger: &'a dyn TransactionLedger,
    converter: &'a dyn CurrencyConverter,
}

impl<'a> ActualsReconciler<'a> {
    pub fn new(ledger: &'a dyn TransactionLedger, converter: &'a dyn CurrencyConverter) -> Self {
        Self { ledger, converter }
    }

    /// Returns `stored` with the in-window months replaced by ledger sums and
    /// their quarters, halves and totals re-folded. Never written back.
    pub fn reconcile(&self, stored: &BudgetAggregate, today: NaiveDate) -> BudgetResult<BudgetAggregate> {
        let mut view = stored.clone();
        let Some(window) = actuals_window(stored.fiscal_year, today) else {
            debug!(fiscal_year = stored.fiscal_year, %today, "fiscal year outside actuals window");
            return Ok(view);
        };

        let transactions = self
            .ledger
            .find_transactions(stored.user_id, &window, true)?;
        let (expense, income) =
            bucket_by_month(&transactions, &window, &stored.currency, self.converter)?;

        let in_window = window.months();
        for (flow, computed) in [(Flow::Expense, expense), (Flow::Income, income)] {
            let strategy = strategy_for_flow(flow);
            let mut months = view.flow(flow).months;
            for m in &in_window {
                let i = usize::from(*m) - 1;
                months[i] = computed[i];
            }
            let affected = FieldSet::months(&in_window) | strategy.affected_fields(&in_window);
            let patch =
                strategy.build_update_payload(&strategy.fold_totals(&months)?, &months, affected);
            patch.apply_to(&mut view);
        }

        debug!(
            fiscal_year = stored.fiscal_year,
            start = %window.start,
            end = %window.end,
            transactions = transactions.len(),
            "actuals reconciled"
        );
        Ok(view)
    }
}

impl BudgetEngine<'_> {
    /// Stored Top/Bot row, or for `Act` the ledger-reconciled view.
    pub fn get_budget_by_type(
        &self,
        db: &Db,
        ledger: &dyn TransactionLedger,
        user_id: Uuid,
        fiscal_year: i32,
        budget_type: BudgetType,
        today: NaiveDate,
    ) -> BudgetResult<BudgetAggregate> {
        let stored = db
            .get_aggregate(user_id, fiscal_year, budget_type)?
            .ok_or(BudgetError::BudgetNotFound {
                fiscal_year,
                budget_type,
            })?;
        match budget_type {
            BudgetType::Act => ActualsReconciler::new(ledger, self.converter()).reconcile(&stored, today),
            BudgetType::Top | BudgetType::Bot => Ok(stored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn window_is_trailing_month_clamped_to_fiscal_year() {
        let w = actuals_window(2025, d(2025, 6, 15)).unwrap();
        assert_eq!(w.start, d(2025, 5, 15));
        assert_eq!(w.end, d(2025, 6, 15));
        assert_eq!(w.months().into_iter().collect::<Vec<_>>(), vec![5, 6]);

        let w = actuals_window(2025, d(2025, 1, 10)).unwrap();
        assert_eq!(w.start, d(2025, 1, 1));

        let w = actuals_window(2025, d(2026, 1, 10)).unwrap();
        assert_eq!(w.start, d(2025, 12, 10));
        assert_eq!(w.end, d(2025, 12, 31));
    }

    #[test]
    fn window_is_empty_outside_fiscal_year() {
        assert!(actuals_window(2025, d(2024, 12, 31)).is_none());
        assert!(actuals_window(2025, d(2026, 3, 1)).is_none());
    }
}
