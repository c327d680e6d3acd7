//! Per-flow update strategies: which aggregate fields a change touches and how
//! monthly values fold into quarters, halves and the annual total.

use std::collections::BTreeSet;

use rust_decimal::Decimal;

use crate::domain::{DetailType, Flow};
use crate::error::{BudgetError, BudgetResult};
use crate::fields::{Field, FieldSet, FlowPatch, FlowTotals, MONTHS, half_of, quarter_of};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fold {
    pub total: Decimal,
    pub quarters: [Decimal; 4],
    pub halves: [Decimal; 2],
}

/// `a + b`, failing with `InvalidInput` instead of panicking past `Decimal::MAX`.
pub fn add_amounts(a: Decimal, b: Decimal) -> BudgetResult<Decimal> {
    a.checked_add(b).ok_or_else(|| {
        BudgetError::InvalidInput(format!("amount overflow adding {a} and {b}"))
    })
}

/// Folds a 12-month vector into quarter, half and annual sums. Works equally on
/// absolute values and on delta vectors.
pub fn fold(months: &[Decimal; MONTHS]) -> BudgetResult<Fold> {
    let mut quarters = [Decimal::ZERO; 4];
    for (i, value) in months.iter().enumerate() {
        quarters[i / 3] = add_amounts(quarters[i / 3], *value)?;
    }
    let halves = [
        add_amounts(quarters[0], quarters[1])?,
        add_amounts(quarters[2], quarters[3])?,
    ];
    Ok(Fold {
        total: add_amounts(halves[0], halves[1])?,
        quarters,
        halves,
    })
}

pub trait UpdateStrategy: Sync {
    fn flow(&self) -> Flow;

    fn field_suffix(&self) -> &'static str {
        self.flow().suffix()
    }

    /// Quarter, half and total slots whose constituent months include one of
    /// `changed_months`. The months themselves are not included.
    fn affected_fields(&self, changed_months: &BTreeSet<u8>) -> FieldSet {
        let mut set = FieldSet::empty();
        for &m in changed_months {
            set.insert(Field::Quarter(quarter_of(m)));
            set.insert(Field::Half(half_of(m)));
            set.insert(Field::Total);
        }
        set
    }

    fn fold_totals(&self, monthly: &[Decimal; MONTHS]) -> BudgetResult<Fold> {
        fold(monthly)
    }

    /// Builds the partial update for this flow restricted to `affected`.
    fn build_update_payload(
        &self,
        totals: &Fold,
        monthly: &[Decimal; MONTHS],
        affected: FieldSet,
    ) -> FlowPatch {
        FlowPatch {
            flow: self.flow(),
            fields: affected,
            values: FlowTotals {
                months: *monthly,
                quarters: totals.quarters,
                halves: totals.halves,
                total: totals.total,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExpenseStrategy;

impl UpdateStrategy for ExpenseStrategy {
    fn flow(&self) -> Flow {
        Flow::Expense
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IncomeStrategy;

impl UpdateStrategy for IncomeStrategy {
    fn flow(&self) -> Flow {
        Flow::Income
    }
}

pub fn strategy_for_flow(flow: Flow) -> &'static dyn UpdateStrategy {
    match flow {
        Flow::Expense => &ExpenseStrategy,
        Flow::Income => &IncomeStrategy,
    }
}

pub fn strategy_for(detail_type: DetailType) -> BudgetResult<&'static dyn UpdateStrategy> {
    match detail_type.flow() {
        Some(flow) => Ok(strategy_for_flow(flow)),
        None => Err(BudgetError::InvalidInput(
            "Act details do not map to an aggregate flow".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fold_sums_nested_granularities() {
        let months = [
            dec!(1),
            dec!(2),
            dec!(3),
            dec!(4),
            dec!(5),
            dec!(6),
            dec!(7),
            dec!(8),
            dec!(9),
            dec!(10),
            dec!(11),
            dec!(12.5),
        ];
        let f = fold(&months).unwrap();
        assert_eq!(f.quarters, [dec!(6), dec!(15), dec!(24), dec!(33.5)]);
        assert_eq!(f.halves, [dec!(21), dec!(57.5)]);
        assert_eq!(f.total, months.iter().copied().sum::<Decimal>());
        assert_eq!(f.total, f.halves[0] + f.halves[1]);
    }

    #[test]
    fn fold_handles_negative_deltas() {
        let mut delta = [Decimal::ZERO; 12];
        delta[0] = dec!(-100);
        delta[11] = dec!(40);
        let f = fold(&delta).unwrap();
        assert_eq!(f.quarters, [dec!(-100), dec!(0), dec!(0), dec!(40)]);
        assert_eq!(f.total, dec!(-60));
    }

    #[test]
    fn affected_fields_are_minimal() {
        let changed: BTreeSet<u8> = [2u8, 3].into_iter().collect();
        let set = ExpenseStrategy.affected_fields(&changed);
        assert!(set.contains(Field::Quarter(1)));
        assert!(set.contains(Field::Half(1)));
        assert!(set.contains(Field::Total));
        assert!(!set.contains(Field::Quarter(2)));
        assert!(!set.contains(Field::Half(2)));
        assert!(!set.contains(Field::Month(2)));
        assert_eq!(set.len(), 3);

        let changed: BTreeSet<u8> = [6u8, 7].into_iter().collect();
        let cols = IncomeStrategy.affected_fields(&changed).columns(Flow::Income);
        assert_eq!(cols, vec!["q2_inc", "q3_inc", "h1_inc", "h2_inc", "total_inc"]);
    }

    #[test]
    fn payload_is_scoped_to_suffix_and_fields() {
        let months = [dec!(10); 12];
        let changed: BTreeSet<u8> = [5u8].into_iter().collect();
        let strategy = strategy_for(DetailType::Income).unwrap();
        assert_eq!(strategy.field_suffix(), "_inc");
        let affected = FieldSet::months(&changed) | strategy.affected_fields(&changed);
        let patch = strategy.build_update_payload(&strategy.fold_totals(&months).unwrap(), &months, affected);
        let entries: Vec<_> = patch
            .entries()
            .map(|(f, v)| (f.column(patch.flow), v))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("m5_inc".to_string(), dec!(10)),
                ("q2_inc".to_string(), dec!(30)),
                ("h1_inc".to_string(), dec!(60)),
                ("total_inc".to_string(), dec!(120)),
            ]
        );
    }

    #[test]
    fn fold_reports_overflow_instead_of_panicking() {
        let months = [dec!(10000000000000000000000000000); 12];
        let err = fold(&months).unwrap_err();
        assert!(matches!(err, BudgetError::InvalidInput(ref msg) if msg.contains("overflow")));
        assert!(add_amounts(Decimal::MAX, dec!(1)).is_err());
        assert_eq!(add_amounts(dec!(1.5), dec!(2)).unwrap(), dec!(3.5));
    }

    #[test]
    fn act_has_no_strategy() {
        assert!(strategy_for(DetailType::Act).is_err());
    }
}
