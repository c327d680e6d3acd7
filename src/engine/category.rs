use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::currency::convert_months;
use crate::db::{Db, WriteTx};
use crate::domain::{
    BudgetType, Category, CategoryPlan, CategoryRemoval, CategoryUpsert, DetailType, FieldMap, Flow,
    RemovalMode, RemovalOutcome, normalize_currency,
};
use crate::error::{BudgetError, BudgetResult};
use crate::fields::{BudgetAggregate, MONTHS, month_values};
use crate::strategy::strategy_for;

use super::{BudgetEngine, CATEGORY_TIMEOUT, in_transaction, months_delta};

fn require_category(
    tx: &WriteTx<'_>,
    category_id: Uuid,
    user_id: Uuid,
) -> BudgetResult<Category> {
    tx.find_category(category_id, user_id)?
        .ok_or_else(|| BudgetError::CategoryNotFound(category_id.to_string()))
}

fn require_bot(tx: &WriteTx<'_>, user_id: Uuid, fiscal_year: i32) -> BudgetResult<BudgetAggregate> {
    tx.load_aggregate(user_id, fiscal_year, BudgetType::Bot)?
        .ok_or(BudgetError::BudgetNotFound {
            fiscal_year,
            budget_type: BudgetType::Bot,
        })
}

/// Full-year vector from a sparse month map; absent months are zero.
fn full_year(
    fields: &FieldMap,
    detail_type: DetailType,
    flow: Flow,
) -> BudgetResult<[Decimal; MONTHS]> {
    let mut months = [Decimal::ZERO; MONTHS];
    for (month, value) in month_values(fields, detail_type, flow)? {
        months[usize::from(month) - 1] = value;
    }
    Ok(months)
}

impl BudgetEngine<'_> {
    /// Replaces a category's monthly plan on the Bot budget and moves the
    /// aggregate by the difference between the old and new plan only, so other
    /// categories' contributions are left intact.
    pub fn upsert_category_details(
        &self,
        db: &mut Db,
        req: &CategoryPlan,
    ) -> BudgetResult<CategoryUpsert> {
        let strategy = strategy_for(req.detail_type)?;
        let flow = strategy.flow();
        let currency = normalize_currency(&req.currency)?;

        in_transaction(db, "upsert_category_details", CATEGORY_TIMEOUT, |tx| {
            let category = require_category(tx, req.category_id, req.user_id)?;
            if DetailType::from(category.kind) != req.detail_type {
                return Err(BudgetError::CategoryTypeMismatch {
                    category_id: category.id,
                    declared: category.kind.into(),
                    requested: req.detail_type,
                });
            }

            let plan = full_year(&req.plan, req.detail_type, flow)?;
            let actual = req
                .actual
                .as_ref()
                .map(|fields| full_year(fields, req.detail_type, flow))
                .transpose()?;

            let aggregate = require_bot(tx, req.user_id, req.fiscal_year)?;
            let target = aggregate.currency.as_str();

            let new = convert_months(self.converter, &plan, &currency, target)?;
            let new_actual = actual
                .map(|values| convert_months(self.converter, &values, &currency, target))
                .transpose()?;

            let previous = tx.category_details(aggregate.id, category.id, req.detail_type)?;
            let old = self.previous_months(&previous, target)?;
            let delta = months_delta(&new, &old)?;

            let mut updated_details = Vec::with_capacity(MONTHS);
            for (i, amount) in new.iter().enumerate() {
                updated_details.push(tx.upsert_detail(
                    req.user_id,
                    aggregate.id,
                    category.id,
                    (i + 1) as u8,
                    req.detail_type,
                    *amount,
                    target,
                )?);
            }

            let act_details = match new_actual {
                Some(values) => {
                    let mut rows = Vec::with_capacity(MONTHS);
                    for (i, amount) in values.iter().enumerate() {
                        rows.push(tx.upsert_detail(
                            req.user_id,
                            aggregate.id,
                            category.id,
                            (i + 1) as u8,
                            DetailType::Act,
                            *amount,
                            target,
                        )?);
                    }
                    Some(rows)
                }
                None => None,
            };

            let aggregate = self.apply_delta(tx, &aggregate, strategy, &delta, req.user_id)?;
            info!(
                budget = %aggregate.id,
                category = %category.name,
                detail_type = %req.detail_type,
                "category plan upserted"
            );
            Ok(CategoryUpsert {
                updated_details,
                act_details,
                aggregate,
            })
        })
    }

    /// Withdraws a category's contribution from the Bot aggregate, then either
    /// deletes its detail rows (plan and Act) or zeroes them in place.
    pub fn delete_category_details(
        &self,
        db: &mut Db,
        req: &CategoryRemoval,
    ) -> BudgetResult<RemovalOutcome> {
        let strategy = strategy_for(req.detail_type)?;

        in_transaction(db, "delete_category_details", CATEGORY_TIMEOUT, |tx| {
            let category = require_category(tx, req.category_id, req.user_id)?;
            let aggregate = require_bot(tx, req.user_id, req.fiscal_year)?;

            let previous = tx.category_details(aggregate.id, category.id, req.detail_type)?;
            if previous.is_empty() {
                return Err(BudgetError::NothingToDelete {
                    category_id: category.id,
                    detail_type: req.detail_type,
                });
            }
            let act_rows = tx
                .category_details(aggregate.id, category.id, DetailType::Act)?
                .len();
            let expected = previous.len() + act_rows;

            let old = self.previous_months(&previous, &aggregate.currency)?;
            let delta = months_delta(&[Decimal::ZERO; MONTHS], &old)?;
            self.apply_delta(tx, &aggregate, strategy, &delta, req.user_id)?;

            let kinds = [req.detail_type, DetailType::Act];
            let outcome = match req.mode {
                RemovalMode::Delete => {
                    let count = tx.delete_category_details(aggregate.id, category.id, &kinds)?;
                    if count != expected {
                        return Err(BudgetError::BudgetDetailDeleteFailed(format!(
                            "expected to delete {expected} rows for category {}, deleted {count}",
                            category.id
                        )));
                    }
                    RemovalOutcome::Deleted { count }
                }
                RemovalMode::Truncate => {
                    let count = tx.truncate_category_details(aggregate.id, category.id, &kinds)?;
                    if count != expected {
                        return Err(BudgetError::BudgetDetailUpdateFailed(format!(
                            "expected to zero {expected} rows for category {}, updated {count}",
                            category.id
                        )));
                    }
                    RemovalOutcome::Truncated { count }
                }
            };

            info!(
                budget = %aggregate.id,
                category = %category.name,
                ?outcome,
                "category details removed"
            );
            Ok(outcome)
        })
    }
}
