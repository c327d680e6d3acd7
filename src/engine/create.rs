use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::info;
use uuid::Uuid;

use crate::db::Db;
use crate::domain::{BudgetDetail, BudgetType, CreatedBudget, DetailType, NewBudget, normalize_currency};
use crate::error::{BudgetError, BudgetResult};
use crate::fields::{BudgetAggregate, FlowTotals, MONTHS};

use super::{BudgetEngine, DETAIL_UPDATE_TIMEOUT, in_transaction};

/// `round(total / 12, 2)` in every month. Quarters, halves and the total are
/// later summed from these rounded months, so they may differ from
/// `total / 4` etc. by a few cents.
pub fn even_split(total: Decimal) -> [Decimal; MONTHS] {
    let month = (total / Decimal::from(12u32))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    [month; MONTHS]
}

impl BudgetEngine<'_> {
    /// Creates a Top or Bot aggregate from annual estimates, with one Expense
    /// and one Income detail row per month. Also provisions the zeroed Act
    /// row for the fiscal year when it does not exist yet.
    pub fn create_budget(&self, db: &mut Db, req: &NewBudget) -> BudgetResult<CreatedBudget> {
        if req.budget_type == BudgetType::Act {
            return Err(BudgetError::InvalidInput(
                "Act budgets are derived from the ledger and cannot be created from estimates"
                    .to_string(),
            ));
        }
        for (name, value) in [
            ("estimated total expense", req.estimated_total_expense),
            ("estimated total income", req.estimated_total_income),
        ] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(BudgetError::InvalidInput(format!(
                    "{name} must not be negative (got {value})"
                )));
            }
        }
        let currency = normalize_currency(&req.currency)?;
        let expense = even_split(req.estimated_total_expense);
        let income = even_split(req.estimated_total_income);

        in_transaction(db, "create_budget", DETAIL_UPDATE_TIMEOUT, |tx| {
            if tx
                .load_aggregate(req.user_id, req.fiscal_year, req.budget_type)?
                .is_some()
            {
                return Err(BudgetError::BudgetExists {
                    fiscal_year: req.fiscal_year,
                    budget_type: req.budget_type,
                });
            }

            let now = Utc::now();
            let aggregate = BudgetAggregate {
                id: Uuid::new_v4(),
                user_id: req.user_id,
                fiscal_year: req.fiscal_year,
                budget_type: req.budget_type,
                currency: currency.clone(),
                description: req.description.clone(),
                icon: req.icon.clone(),
                expense: FlowTotals::from_months(expense)?,
                income: FlowTotals::from_months(income)?,
                updated_by: Some(req.user_id),
                updated_at: now,
            };
            tx.insert_aggregate(&aggregate)?;

            let mut details = Vec::with_capacity(MONTHS * 2);
            for month in 1..=12u8 {
                let i = usize::from(month) - 1;
                for (detail_type, amount) in
                    [(DetailType::Expense, expense[i]), (DetailType::Income, income[i])]
                {
                    let detail = BudgetDetail {
                        id: Uuid::new_v4(),
                        user_id: req.user_id,
                        budget_id: aggregate.id,
                        category_id: None,
                        month,
                        detail_type,
                        amount,
                        currency: currency.clone(),
                        updated_at: now,
                    };
                    tx.insert_detail(&detail)?;
                    details.push(detail);
                }
            }

            if tx
                .load_aggregate(req.user_id, req.fiscal_year, BudgetType::Act)?
                .is_none()
            {
                tx.insert_aggregate(&BudgetAggregate {
                    id: Uuid::new_v4(),
                    budget_type: BudgetType::Act,
                    description: None,
                    icon: None,
                    expense: FlowTotals::zero(),
                    income: FlowTotals::zero(),
                    ..aggregate.clone()
                })?;
            }

            info!(
                budget = %aggregate.id,
                fiscal_year = req.fiscal_year,
                budget_type = %req.budget_type,
                "budget created"
            );
            Ok(CreatedBudget { aggregate, details })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn even_split_rounds_each_month() {
        assert_eq!(even_split(dec!(12000)), [dec!(1000); 12]);
        assert_eq!(even_split(dec!(100))[0], dec!(8.33));
        let folded = FlowTotals::from_months(even_split(dec!(100))).unwrap();
        assert_eq!(folded.total, dec!(99.96));
        assert_eq!(folded.quarters[0], dec!(24.99));
    }
}
