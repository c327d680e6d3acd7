use tracing::info;

use crate::db::Db;
use crate::domain::{BudgetType, DetailUpdate, normalize_currency};
use crate::error::{BudgetError, BudgetResult};
use crate::fields::{BudgetAggregate, FieldSet, changed_months, month_values};
use crate::strategy::strategy_for;

use super::{BudgetEngine, DETAIL_UPDATE_TIMEOUT, in_transaction};

impl BudgetEngine<'_> {
    /// Overwrites selected months of one flow with absolute values and
    /// re-folds the quarters, halves and total those months belong to.
    ///
    /// Caller values are converted into the row's stored currency before the
    /// overlay, so every field of the row stays in one currency.
    pub fn update_budget_details(
        &self,
        db: &mut Db,
        req: &DetailUpdate,
    ) -> BudgetResult<BudgetAggregate> {
        if req.budget_type == BudgetType::Act {
            return Err(BudgetError::InvalidInput(
                "Act budgets are computed from the ledger and cannot be edited".to_string(),
            ));
        }
        let strategy = strategy_for(req.detail_type)?;
        let flow = strategy.flow();
        let currency = normalize_currency(&req.currency)?;

        let values = month_values(&req.fields, req.detail_type, flow)?;
        if values.is_empty() {
            return Err(BudgetError::InvalidInput("no fields to update".to_string()));
        }
        let changed = changed_months(&values);
        let affected = FieldSet::months(&changed) | strategy.affected_fields(&changed);

        in_transaction(db, "update_budget_details", DETAIL_UPDATE_TIMEOUT, |tx| {
            let snapshot = tx
                .load_flow_months(req.user_id, req.fiscal_year, req.budget_type, flow)?
                .ok_or(BudgetError::BudgetNotFound {
                    fiscal_year: req.fiscal_year,
                    budget_type: req.budget_type,
                })?;

            let mut months = snapshot.months;
            for (month, value) in &values {
                months[usize::from(*month) - 1] =
                    self.converter
                        .convert(*value, &currency, &snapshot.currency)?;
            }

            let totals = strategy.fold_totals(&months)?;
            let patch = strategy.build_update_payload(&totals, &months, affected);
            let changed_rows = tx.write_flow_patch(snapshot.budget_id, &patch, req.user_id)?;
            if changed_rows != 1 {
                return Err(BudgetError::BudgetUpdateFailed(format!(
                    "expected to update budget {}, updated {changed_rows} rows",
                    snapshot.budget_id
                )));
            }

            info!(
                budget = %snapshot.budget_id,
                fiscal_year = req.fiscal_year,
                fields = affected.len(),
                "budget details updated"
            );
            tx.load_aggregate_by_id(snapshot.budget_id)?
                .ok_or_else(|| {
                    BudgetError::BudgetUpdateFailed(format!(
                        "budget {} vanished",
                        snapshot.budget_id
                    ))
                })
        })
    }
}
