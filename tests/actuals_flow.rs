use std::time::Duration;

use budgeteer::domain::{BudgetType, Flow, LedgerTransaction, NewBudget, TransactionKind};
use budgeteer::fields::FlowPatch;
use budgeteer::{
    ActualsReconciler, BudgetAggregate, BudgetEngine, BudgetError, BudgetResult, DateWindow, Db,
    FieldSet, FlowTotals, RateTable, TransactionLedger,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

const FY: i32 = 2025;

fn day(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(FY, m, d).unwrap()
}

fn txn(user: Uuid, kind: TransactionKind, amount: Decimal, currency: &str, on: NaiveDate) -> LedgerTransaction {
    LedgerTransaction {
        id: Uuid::new_v4(),
        user_id: user,
        kind,
        amount,
        currency: currency.to_string(),
        occurred_on: on,
        deleted_at: None,
    }
}

/// In-memory ledger honouring the window and the deleted filter.
struct FakeLedger(Vec<LedgerTransaction>);

impl TransactionLedger for FakeLedger {
    fn find_transactions(
        &self,
        user_id: Uuid,
        window: &DateWindow,
        exclude_deleted: bool,
    ) -> BudgetResult<Vec<LedgerTransaction>> {
        Ok(self
            .0
            .iter()
            .filter(|t| t.user_id == user_id && window.contains(t.occurred_on))
            .filter(|t| !exclude_deleted || t.deleted_at.is_none())
            .cloned()
            .collect())
    }
}

fn rates() -> RateTable {
    RateTable::from_rates([("USD".to_string(), "EUR".to_string(), dec!(0.8))])
}

fn provision(db: &mut Db, rates: &RateTable, user: Uuid) -> BudgetAggregate {
    BudgetEngine::new(rates)
        .create_budget(
            db,
            &NewBudget {
                user_id: user,
                fiscal_year: FY,
                budget_type: BudgetType::Bot,
                estimated_total_expense: dec!(1200),
                estimated_total_income: dec!(2400),
                currency: "USD".to_string(),
                description: None,
                icon: None,
            },
        )
        .unwrap();
    db.get_aggregate(user, FY, BudgetType::Act)
        .unwrap()
        .expect("act row")
}

/// Persists January expense actuals on the Act row.
fn seed_january(db: &mut Db, act: &BudgetAggregate, amount: Decimal) {
    let mut months = [Decimal::ZERO; 12];
    months[0] = amount;
    let patch = FlowPatch {
        flow: Flow::Expense,
        fields: FieldSet::all(),
        values: FlowTotals::from_months(months).unwrap(),
    };
    let tx = db.begin_write("seed", Duration::from_secs(5)).unwrap();
    assert_eq!(tx.write_flow_patch(act.id, &patch, act.user_id).unwrap(), 1);
    tx.commit().unwrap();
}

#[test]
fn window_months_come_from_the_ledger() {
    let mut db = Db::open_in_memory().unwrap();
    let rates = rates();
    let user = Uuid::new_v4();
    let act = provision(&mut db, &rates, user);
    seed_january(&mut db, &act, dec!(70));

    let ledger = FakeLedger(vec![
        txn(user, TransactionKind::Expense, dec!(100), "USD", day(5, 20)),
        txn(user, TransactionKind::Expense, dec!(-50), "USD", day(6, 1)),
        txn(user, TransactionKind::Income, dec!(2000), "USD", day(6, 10)),
        txn(user, TransactionKind::Transfer, dec!(999), "USD", day(6, 2)),
        txn(user, TransactionKind::Expense, dec!(40), "USD", day(3, 1)),
        txn(Uuid::new_v4(), TransactionKind::Expense, dec!(5), "USD", day(6, 3)),
    ]);

    let view = BudgetEngine::new(&rates)
        .get_budget_by_type(&db, &ledger, user, FY, BudgetType::Act, day(6, 15))
        .unwrap();

    assert_eq!(view.expense.months[4], dec!(100));
    assert_eq!(view.expense.months[5], dec!(50));
    assert_eq!(view.expense.months[2], Decimal::ZERO);
    // Outside the window the persisted value stays.
    assert_eq!(view.expense.months[0], dec!(70));
    assert_eq!(view.expense.quarters[1], dec!(150));
    assert_eq!(view.expense.halves[0], dec!(220));
    assert_eq!(view.expense.total, dec!(220));
    assert_eq!(view.income.months[5], dec!(2000));
    assert_eq!(view.income.total, dec!(2000));
    assert!(view.expense.is_consistent() && view.income.is_consistent());

    // Reads never write back.
    let stored = db.get_aggregate(user, FY, BudgetType::Act).unwrap().unwrap();
    assert_eq!(stored.expense.months[4], Decimal::ZERO);
    assert_eq!(stored.expense.total, dec!(70));
}

#[test]
fn ledger_amounts_are_converted_into_the_row_currency() {
    let mut db = Db::open_in_memory().unwrap();
    let rates = rates();
    let user = Uuid::new_v4();
    let act = provision(&mut db, &rates, user);

    let ledger = FakeLedger(vec![txn(
        user,
        TransactionKind::Expense,
        dec!(80),
        "EUR",
        day(6, 5),
    )]);
    let view = ActualsReconciler::new(&ledger, &rates)
        .reconcile(&act, day(6, 15))
        .unwrap();
    assert_eq!(view.expense.months[5], dec!(100));
    assert_eq!(view.currency, "USD");
}

#[test]
fn out_of_year_reads_return_the_persisted_row() {
    let mut db = Db::open_in_memory().unwrap();
    let rates = rates();
    let user = Uuid::new_v4();
    let act = provision(&mut db, &rates, user);
    seed_january(&mut db, &act, dec!(70));
    let ledger = FakeLedger(vec![txn(
        user,
        TransactionKind::Expense,
        dec!(10),
        "USD",
        day(1, 5),
    )]);

    let view = BudgetEngine::new(&rates)
        .get_budget_by_type(
            &db,
            &ledger,
            user,
            FY,
            BudgetType::Act,
            NaiveDate::from_ymd_opt(FY + 1, 3, 1).unwrap(),
        )
        .unwrap();
    assert_eq!(view.expense.months[0], dec!(70));
    assert_eq!(view.expense.total, dec!(70));
}

#[test]
fn sqlite_ledger_skips_soft_deleted_transactions() {
    let mut db = Db::open_in_memory().unwrap();
    let rates = rates();
    let user = Uuid::new_v4();
    provision(&mut db, &rates, user);

    let kept = txn(user, TransactionKind::Expense, dec!(30), "USD", day(6, 3));
    let dropped = txn(user, TransactionKind::Expense, dec!(500), "USD", day(6, 4));
    db.insert_transaction(&kept).unwrap();
    db.insert_transaction(&dropped).unwrap();
    assert_eq!(db.soft_delete_transaction(dropped.id, user, Utc::now()).unwrap(), 1);

    let view = BudgetEngine::new(&rates)
        .get_budget_by_type(&db, &db, user, FY, BudgetType::Act, day(6, 15))
        .unwrap();
    assert_eq!(view.expense.months[5], dec!(30));
    assert_eq!(view.expense.total, dec!(30));
}

#[test]
fn missing_budget_is_not_found() {
    let db = Db::open_in_memory().unwrap();
    let rates = rates();
    let err = BudgetEngine::new(&rates)
        .get_budget_by_type(
            &db,
            &FakeLedger(Vec::new()),
            Uuid::new_v4(),
            FY,
            BudgetType::Act,
            day(6, 15),
        )
        .unwrap_err();
    assert!(matches!(err, BudgetError::BudgetNotFound { .. }));
}

#[test]
fn ledger_sums_past_decimal_range_are_rejected() {
    let mut db = Db::open_in_memory().unwrap();
    let rates = rates();
    let user = Uuid::new_v4();
    let act = provision(&mut db, &rates, user);

    let ledger = FakeLedger(vec![
        txn(user, TransactionKind::Expense, Decimal::MAX, "USD", day(6, 1)),
        txn(user, TransactionKind::Expense, Decimal::MAX, "USD", day(6, 2)),
    ]);
    let err = ActualsReconciler::new(&ledger, &rates)
        .reconcile(&act, day(6, 15))
        .unwrap_err();
    assert!(matches!(err, BudgetError::InvalidInput(ref msg) if msg.contains("overflow")));
}
