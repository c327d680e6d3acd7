use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn budgeteer_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("budgeteer"))
}

fn run_ok(home: &tempfile::TempDir, args: &[&str]) {
    let mut cmd = budgeteer_cmd();
    cmd.env("BUDGETEER_HOME", home.path());
    cmd.args(args);
    cmd.assert().success();
}

fn run_ok_out(home: &tempfile::TempDir, args: &[&str]) -> String {
    let mut cmd = budgeteer_cmd();
    cmd.env("BUDGETEER_HOME", home.path());
    cmd.args(args);
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).expect("utf8 stdout")
}

fn every_month(suffix: &str, amount: &str) -> Vec<String> {
    (1..=12).map(|m| format!("m{m}{suffix}={amount}")).collect()
}

#[test]
fn create_then_category_plan_then_delete() {
    let home = tempfile::tempdir().expect("tempdir");

    let out = run_ok_out(
        &home,
        &[
            "budget", "create", "--year", "2025", "--expense", "12000", "--income", "24000",
            "--currency", "usd",
        ],
    );
    assert!(out.contains("Created bot budget for 2025 in USD (24 detail rows)."));

    let shown = run_ok_out(&home, &["budget", "show", "--year", "2025"]);
    assert!(shown.contains("budget\tbot\t2025\tUSD"));
    assert!(shown.contains("m1\t1000\t2000"));
    assert!(shown.contains("q2\t3000\t6000"));
    assert!(shown.contains("total\t12000\t24000"));

    run_ok(&home, &["category", "add", "Rent", "--type", "expense"]);
    let plan = every_month("_exp", "500");
    let mut args = vec!["category", "set", "Rent", "--year", "2025"];
    args.extend(plan.iter().map(String::as_str));
    let out = run_ok_out(&home, &args);
    assert!(out.contains("Set 'Rent' plan (12 rows)."));
    assert!(out.contains("m7\t1500\t2000"));
    assert!(out.contains("total\t18000\t24000"));

    let details = run_ok_out(
        &home,
        &["budget", "details", "--year", "2025", "--category", "Rent"],
    );
    assert_eq!(details.lines().filter(|l| l.contains("\texpense\t500\t")).count(), 12);

    let out = run_ok_out(&home, &["category", "delete", "Rent", "--year", "2025"]);
    assert!(out.contains("Deleted 12 detail rows for 'Rent'."));

    let shown = run_ok_out(&home, &["budget", "show", "--year", "2025"]);
    assert!(shown.contains("total\t12000\t24000"));

    let mut cmd = budgeteer_cmd();
    cmd.env("BUDGETEER_HOME", home.path());
    cmd.args(["category", "delete", "Rent", "--year", "2025"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Nothing to delete"));
}

#[test]
fn direct_set_overwrites_months() {
    let home = tempfile::tempdir().expect("tempdir");
    run_ok(
        &home,
        &["budget", "create", "--year", "2025", "--expense", "1200", "--income", "0"],
    );

    let out = run_ok_out(
        &home,
        &[
            "budget", "set", "--year", "2025", "--flow", "expense", "m2_exp=400", "m3_exp=0",
        ],
    );
    assert!(out.contains("m2\t400\t0"));
    assert!(out.contains("q1\t500\t0"));
    assert!(out.contains("total\t1400\t0"));

    let listed = run_ok_out(&home, &["budget", "list"]);
    assert!(listed.contains("2025\tact\tUSD\t0\t0"));
    assert!(listed.contains("2025\tbot\tUSD\t1400\t0"));
}

#[test]
fn mismatched_keys_are_rejected() {
    let home = tempfile::tempdir().expect("tempdir");
    run_ok(
        &home,
        &["budget", "create", "--year", "2025", "--expense", "1200", "--income", "0"],
    );
    run_ok(&home, &["category", "add", "Salary", "--type", "income"]);

    let mut cmd = budgeteer_cmd();
    cmd.env("BUDGETEER_HOME", home.path());
    cmd.args(["category", "set", "Salary", "--year", "2025", "m1_exp=10"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid field key 'm1_exp'"));
}

#[test]
fn foreign_currency_plan_uses_stored_rates() {
    let home = tempfile::tempdir().expect("tempdir");
    run_ok(
        &home,
        &["budget", "create", "--year", "2025", "--expense", "0", "--income", "0"],
    );
    run_ok(&home, &["rate", "set", "USD", "EUR", "0.8"]);
    run_ok(&home, &["category", "add", "Salary", "--type", "income"]);

    let out = run_ok_out(
        &home,
        &[
            "category", "set", "Salary", "--year", "2025", "--currency", "EUR", "m4_inc=80",
        ],
    );
    assert!(out.contains("m4\t0\t100"));
    assert!(out.contains("h1\t0\t100"));

    let mut cmd = budgeteer_cmd();
    cmd.env("BUDGETEER_HOME", home.path());
    cmd.args([
        "category", "set", "Salary", "--year", "2025", "--currency", "JPY", "m4_inc=80",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("No exchange rate path"));
}

#[test]
fn actuals_follow_the_ledger() {
    let home = tempfile::tempdir().expect("tempdir");
    run_ok(
        &home,
        &["budget", "create", "--year", "2025", "--expense", "1200", "--income", "0"],
    );
    run_ok(&home, &["tx", "add", "expense", "100", "USD", "--date", "2025-06-01"]);
    run_ok(&home, &["tx", "add", "transfer", "900", "USD", "--date", "2025-06-02"]);
    run_ok(&home, &["tx", "add", "income", "250", "USD", "--date", "2025-05-20"]);

    let out = run_ok_out(
        &home,
        &["budget", "show", "--year", "2025", "--type", "act", "--today", "2025-06-15"],
    );
    assert!(out.contains("budget\tact\t2025\tUSD"));
    assert!(out.contains("m5\t0\t250"));
    assert!(out.contains("m6\t100\t0"));
    assert!(out.contains("total\t100\t250"));

    // Bot plan is unaffected by the ledger.
    let out = run_ok_out(&home, &["budget", "show", "--year", "2025"]);
    assert!(out.contains("m6\t100\t0"));
    assert!(out.contains("total\t1200\t0"));
}
