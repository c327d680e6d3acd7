//! Write paths of the budget aggregation engine. Every public operation runs
//! inside one immediate SQLite transaction: the aggregate read, the delta
//! computation and all row writes commit together or not at all.

mod category;
mod create;
mod update;

use std::collections::BTreeSet;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::currency::CurrencyConverter;
use crate::db::{Db, WriteTx};
use crate::domain::BudgetDetail;
use crate::error::{BudgetError, BudgetResult};
use crate::fields::{BudgetAggregate, Field, FieldSet, MONTHS};
use crate::strategy::{UpdateStrategy, add_amounts};

pub use create::even_split;

/// Direct field updates and budget creation.
pub const DETAIL_UPDATE_TIMEOUT: Duration = Duration::from_secs(15);
/// Category upsert/delete fan out into per-month conversions and row writes.
pub const CATEGORY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BudgetEngine<'a> {
    converter: &'a dyn CurrencyConverter,
}

impl<'a> BudgetEngine<'a> {
    pub fn new(converter: &'a dyn CurrencyConverter) -> Self {
        Self { converter }
    }

    pub fn converter(&self) -> &'a dyn CurrencyConverter {
        self.converter
    }

    /// Sums a category's stored rows per month, each converted from its own
    /// currency into `target`.
    fn previous_months(
        &self,
        rows: &[BudgetDetail],
        target: &str,
    ) -> BudgetResult<[Decimal; MONTHS]> {
        let mut old = [Decimal::ZERO; MONTHS];
        for row in rows {
            let Some(slot) = usize::from(row.month).checked_sub(1).and_then(|i| old.get_mut(i))
            else {
                return Err(BudgetError::Storage(format!(
                    "detail {} has month {} out of range",
                    row.id, row.month
                )));
            };
            let converted = self.converter.convert(row.amount, &row.currency, target)?;
            *slot = add_amounts(*slot, converted)?;
        }
        Ok(old)
    }

    /// Adds `delta` to one flow of `aggregate`, floors each month at zero,
    /// re-folds the touched quarters/halves/total and persists only those
    /// fields. Returns the row as committed.
    fn apply_delta(
        &self,
        tx: &WriteTx<'_>,
        aggregate: &BudgetAggregate,
        strategy: &dyn UpdateStrategy,
        delta: &[Decimal; MONTHS],
        updated_by: Uuid,
    ) -> BudgetResult<BudgetAggregate> {
        let flow = strategy.flow();
        let changed: BTreeSet<u8> = (1..=12u8)
            .filter(|m| !delta[usize::from(*m) - 1].is_zero())
            .collect();
        if changed.is_empty() {
            debug!(budget = %aggregate.id, ?flow, "zero delta, aggregate untouched");
            return Ok(aggregate.clone());
        }

        let current = aggregate.flow(flow);
        let delta_fold = strategy.fold_totals(delta)?;
        let mut months = current.months;
        let mut clamped = Vec::new();
        for &m in &changed {
            let i = usize::from(m) - 1;
            let next = add_amounts(current.months[i], delta[i])?;
            if next.is_sign_negative() && !next.is_zero() {
                clamped.push(Field::Month(m).column(flow));
                months[i] = Decimal::ZERO;
            } else {
                months[i] = next;
            }
        }
        if !clamped.is_empty() {
            warn!(
                budget = %aggregate.id,
                fields = ?clamped,
                "delta would drive aggregate below zero, clamped at 0"
            );
        }

        let totals = strategy.fold_totals(&months)?;
        let affected = FieldSet::months(&changed) | strategy.affected_fields(&changed);
        let patch = strategy.build_update_payload(&totals, &months, affected);
        debug!(
            budget = %aggregate.id,
            fields = ?affected.columns(flow),
            total_delta = %delta_fold.total,
            "applying category delta"
        );

        let changed_rows = tx.write_flow_patch(aggregate.id, &patch, updated_by)?;
        if changed_rows != 1 {
            return Err(BudgetError::BudgetUpdateFailed(format!(
                "expected to update budget {}, updated {changed_rows} rows",
                aggregate.id
            )));
        }

        tx.load_aggregate_by_id(aggregate.id)?
            .ok_or_else(|| BudgetError::BudgetUpdateFailed(format!("budget {} vanished", aggregate.id)))
    }
}

/// Runs `op` inside one write transaction bounded by `limit`.
fn in_transaction<T>(
    db: &mut Db,
    label: &'static str,
    limit: Duration,
    op: impl FnOnce(&WriteTx<'_>) -> BudgetResult<T>,
) -> BudgetResult<T> {
    let tx = db.begin_write(label, limit)?;
    let out = op(&tx)?;
    tx.commit()?;
    Ok(out)
}

fn months_delta(
    new: &[Decimal; MONTHS],
    old: &[Decimal; MONTHS],
) -> BudgetResult<[Decimal; MONTHS]> {
    let mut delta = [Decimal::ZERO; MONTHS];
    for (i, slot) in delta.iter_mut().enumerate() {
        *slot = new[i].checked_sub(old[i]).ok_or_else(|| {
            BudgetError::InvalidInput(format!(
                "amount overflow subtracting {} from {}",
                old[i], new[i]
            ))
        })?;
    }
    Ok(delta)
}
