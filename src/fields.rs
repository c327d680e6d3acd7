//! Strongly typed view of the wide aggregate row.
//!
//! Column names (`m{1..12}`, `q{1..4}`, `h{1..2}`, `total`, each suffixed with
//! `_exp` or `_inc`) are produced here and nowhere else.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{BudgetType, DetailType, Flow};
use crate::error::{BudgetError, BudgetResult};
use crate::strategy::{Fold, fold};

pub const MONTHS: usize = 12;

/// One granularity slot of a flow. Indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Month(u8),
    Quarter(u8),
    Half(u8),
    Total,
}

impl Field {
    /// All 19 slots of a flow in column order.
    pub fn all() -> impl Iterator<Item = Field> {
        (1..=12)
            .map(Field::Month)
            .chain((1..=4).map(Field::Quarter))
            .chain((1..=2).map(Field::Half))
            .chain(std::iter::once(Field::Total))
    }

    pub fn column(self, flow: Flow) -> String {
        let suffix = flow.suffix();
        match self {
            Field::Month(m) => format!("m{m}{suffix}"),
            Field::Quarter(q) => format!("q{q}{suffix}"),
            Field::Half(h) => format!("h{h}{suffix}"),
            Field::Total => format!("total{suffix}"),
        }
    }

    fn bit(self) -> u32 {
        match self {
            Field::Month(m) => u32::from(m) - 1,
            Field::Quarter(q) => 11 + u32::from(q),
            Field::Half(h) => 15 + u32::from(h),
            Field::Total => 18,
        }
    }
}

pub fn quarter_of(month: u8) -> u8 {
    month.div_ceil(3)
}

pub fn half_of(month: u8) -> u8 {
    if month <= 6 { 1 } else { 2 }
}

/// Bitmask over the 19 slots of one flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet(u32);

impl FieldSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self((1 << 19) - 1)
    }

    pub fn months<'a>(months: impl IntoIterator<Item = &'a u8>) -> Self {
        let mut set = Self::empty();
        for m in months {
            set.insert(Field::Month(*m));
        }
        set
    }

    pub fn insert(&mut self, field: Field) {
        self.0 |= 1 << field.bit();
    }

    pub fn contains(self, field: Field) -> bool {
        self.0 & (1 << field.bit()) != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Field> {
        Field::all().filter(move |f| self.contains(*f))
    }

    pub fn columns(self, flow: Flow) -> Vec<String> {
        self.iter().map(|f| f.column(flow)).collect()
    }
}

impl std::ops::BitOr for FieldSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// All granularities of one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowTotals {
    pub months: [Decimal; MONTHS],
    pub quarters: [Decimal; 4],
    pub halves: [Decimal; 2],
    pub total: Decimal,
}

impl FlowTotals {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_months(months: [Decimal; MONTHS]) -> BudgetResult<Self> {
        let Fold {
            total,
            quarters,
            halves,
        } = fold(&months)?;
        Ok(Self {
            months,
            quarters,
            halves,
            total,
        })
    }

    pub fn get(&self, field: Field) -> Decimal {
        match field {
            Field::Month(m) => self.months[usize::from(m) - 1],
            Field::Quarter(q) => self.quarters[usize::from(q) - 1],
            Field::Half(h) => self.halves[usize::from(h) - 1],
            Field::Total => self.total,
        }
    }

    pub fn set(&mut self, field: Field, value: Decimal) {
        match field {
            Field::Month(m) => self.months[usize::from(m) - 1] = value,
            Field::Quarter(q) => self.quarters[usize::from(q) - 1] = value,
            Field::Half(h) => self.halves[usize::from(h) - 1] = value,
            Field::Total => self.total = value,
        }
    }

    /// Sum-of-parts check across the three nested granularities.
    pub fn is_consistent(&self) -> bool {
        let Ok(folded) = fold(&self.months) else {
            return false;
        };
        folded.quarters == self.quarters
            && folded.halves == self.halves
            && folded.total == self.total
    }
}

/// Field-level partial update for one flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPatch {
    pub flow: Flow,
    pub fields: FieldSet,
    pub values: FlowTotals,
}

impl FlowPatch {
    pub fn entries(&self) -> impl Iterator<Item = (Field, Decimal)> + '_ {
        self.fields.iter().map(|f| (f, self.values.get(f)))
    }

    pub fn apply_to(&self, aggregate: &mut BudgetAggregate) {
        let target = aggregate.flow_mut(self.flow);
        for (field, value) in self.entries() {
            target.set(field, value);
        }
    }
}

/// One row per (user, fiscal year, budget type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAggregate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub fiscal_year: i32,
    pub budget_type: BudgetType,
    pub currency: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub expense: FlowTotals,
    pub income: FlowTotals,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl BudgetAggregate {
    pub fn flow(&self, flow: Flow) -> &FlowTotals {
        match flow {
            Flow::Expense => &self.expense,
            Flow::Income => &self.income,
        }
    }

    pub fn flow_mut(&mut self, flow: Flow) -> &mut FlowTotals {
        match flow {
            Flow::Expense => &mut self.expense,
            Flow::Income => &mut self.income,
        }
    }
}

/// Parses `m{1..12}{suffix}` into a month index. Leading zeros are rejected.
pub fn parse_month_key(key: &str, flow: Flow) -> Option<u8> {
    let digits = key.strip_prefix('m')?.strip_suffix(flow.suffix())?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let month: u8 = digits.parse().ok()?;
    (1..=12).contains(&month).then_some(month)
}

/// Validates every key of a caller-supplied field map against the flow implied
/// by `detail_type`, returning the values by month.
pub fn month_values<'a>(
    fields: impl IntoIterator<Item = (&'a String, &'a Decimal)>,
    detail_type: DetailType,
    flow: Flow,
) -> BudgetResult<Vec<(u8, Decimal)>> {
    let mut out = Vec::new();
    for (key, value) in fields {
        let Some(month) = parse_month_key(key, flow) else {
            return Err(BudgetError::InvalidKey {
                key: key.clone(),
                detail_type,
                suffix: flow.suffix(),
            });
        };
        if value.is_sign_negative() && !value.is_zero() {
            return Err(BudgetError::InvalidInput(format!(
                "{key} must not be negative (got {value})"
            )));
        }
        out.push((month, *value));
    }
    Ok(out)
}

/// Months present in `values`, as a set.
pub fn changed_months(values: &[(u8, Decimal)]) -> BTreeSet<u8> {
    values.iter().map(|(m, _)| *m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn column_names_follow_storage_convention() {
        assert_eq!(Field::Month(3).column(Flow::Expense), "m3_exp");
        assert_eq!(Field::Month(11).column(Flow::Income), "m11_inc");
        assert_eq!(Field::Quarter(4).column(Flow::Expense), "q4_exp");
        assert_eq!(Field::Half(2).column(Flow::Income), "h2_inc");
        assert_eq!(Field::Total.column(Flow::Expense), "total_exp");
        assert_eq!(FieldSet::all().len(), 19);
    }

    #[test]
    fn month_keys_must_match_flow_suffix() {
        assert_eq!(parse_month_key("m1_exp", Flow::Expense), Some(1));
        assert_eq!(parse_month_key("m12_inc", Flow::Income), Some(12));
        assert_eq!(parse_month_key("m12_inc", Flow::Expense), None);
        assert_eq!(parse_month_key("m13_exp", Flow::Expense), None);
        assert_eq!(parse_month_key("m0_exp", Flow::Expense), None);
        assert_eq!(parse_month_key("m01_exp", Flow::Expense), None);
        assert_eq!(parse_month_key("q1_exp", Flow::Expense), None);
        assert_eq!(parse_month_key("m_exp", Flow::Expense), None);
    }

    #[test]
    fn month_values_rejects_foreign_keys() {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("m2_exp".to_string(), dec!(10));
        fields.insert("m3_inc".to_string(), dec!(10));
        let err = month_values(&fields, DetailType::Expense, Flow::Expense).unwrap_err();
        assert!(matches!(err, BudgetError::InvalidKey { ref key, .. } if key == "m3_inc"));
    }

    #[test]
    fn quarter_and_half_membership() {
        assert_eq!(quarter_of(1), 1);
        assert_eq!(quarter_of(3), 1);
        assert_eq!(quarter_of(4), 2);
        assert_eq!(quarter_of(12), 4);
        assert_eq!(half_of(6), 1);
        assert_eq!(half_of(7), 2);
    }

    #[test]
    fn patch_only_touches_selected_fields() {
        let mut aggregate = BudgetAggregate {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            fiscal_year: 2025,
            budget_type: BudgetType::Bot,
            currency: "USD".to_string(),
            description: None,
            icon: None,
            expense: FlowTotals::from_months([dec!(1); 12]).unwrap(),
            income: FlowTotals::zero(),
            updated_by: None,
            updated_at: Utc::now(),
        };
        let mut fields = FieldSet::empty();
        fields.insert(Field::Month(2));
        let patch = FlowPatch {
            flow: Flow::Expense,
            fields,
            values: FlowTotals::from_months([dec!(7); 12]).unwrap(),
        };
        patch.apply_to(&mut aggregate);
        assert_eq!(aggregate.expense.months[1], dec!(7));
        assert_eq!(aggregate.expense.months[0], dec!(1));
        assert_eq!(aggregate.expense.total, dec!(12));
    }
}
