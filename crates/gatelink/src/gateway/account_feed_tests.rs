// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::account::AccountAmount;
use crate::core::monetary::Monetary;
use crate::core::notifications::{nt_kinds, NT_ACCOUNT_FEED_DONE};
use crate::core::notifier::Notifier;
use crate::core::test_support::test_pool;
use crate::gateway::engine::{AccountData, AccountValue, PortfolioItem};
use crate::gateway::feed::{Feed, FeedContext, FeedError, FeedFactory};
use crate::gateway::test_support::StubEngine;
use crate::require_db;

use super::{apply_monetary, AccountFeedFactory};

// ── schema binding regression ─────────────────────────────────────────────

#[test]
fn monetary_keys_bind_to_their_own_columns() {
    let money = |amount| Monetary { iso_4217_code: 36, amount };

    let mut amount = AccountAmount::default();
    assert!(apply_monetary(&mut amount, "EquityWithLoanValue", money(100)));
    assert_eq!(amount.equity_with_loan_value, money(100));
    assert_eq!(amount.excess_liquidity, Monetary::default());

    let mut amount = AccountAmount::default();
    assert!(apply_monetary(&mut amount, "ExcessLiquidity", money(200)));
    assert_eq!(amount.excess_liquidity, money(200));
    assert_eq!(amount.equity_with_loan_value, Monetary::default());

    let mut amount = AccountAmount::default();
    assert!(apply_monetary(&mut amount, "TotalCashBalance", money(300)));
    assert_eq!(amount.total_cash_balance, money(300));
    assert_eq!(amount.total_cash_value, Monetary::default());

    let mut amount = AccountAmount::default();
    assert!(apply_monetary(&mut amount, "TotalCashValue", money(400)));
    assert_eq!(amount.total_cash_value, money(400));
    assert_eq!(amount.total_cash_balance, Monetary::default());
}

#[test]
fn unknown_keys_are_not_monetary_columns() {
    let mut amount = AccountAmount::default();
    assert!(!apply_monetary(
        &mut amount,
        "Cushion",
        Monetary { iso_4217_code: 36, amount: 1 }
    ));
    assert_eq!(amount, AccountAmount::default());
}

// ── feed cycles against the store ─────────────────────────────────────────

fn fixture(account_code: &str) -> AccountData {
    let value = |key: &str, value: &str, currency: &str| AccountValue {
        account_code: account_code.to_owned(),
        key: key.to_owned(),
        value: value.to_owned(),
        currency: currency.to_owned(),
    };
    AccountData {
        values: vec![
            value("AccountType", "INDIVIDUAL", ""),
            value("Cushion", "0.5", ""),
            value("NetLiquidation", "62.69", "AUD"),
            value("TotalCashBalance", "10", "AUD"),
            value("NetLiquidation", "9999", "BASE"),
        ],
        portfolio: vec![PortfolioItem {
            account_code: account_code.to_owned(),
            broker_contract_id: 1234,
            symbol: "BHP".to_owned(),
            local_symbol: "BHP".to_owned(),
            security_type: "STK".to_owned(),
            primary_exchange: "ASX".to_owned(),
            currency: "AUD".to_owned(),
            position: 100,
            market_price: 41.5,
            market_value: 4150.0,
            average_cost: 39.1,
            unrealized_pnl: 240.0,
            realized_pnl: 0.0,
        }],
    }
}

struct FeedHarness {
    notifier: Notifier,
    db: sqlx::PgPool,
    ctx: Arc<FeedContext>,
    errors_rx: mpsc::Receiver<FeedError>,
    account_code: String,
}

async fn feed_harness(db_url: &str, with_engine: bool) -> anyhow::Result<FeedHarness> {
    let db = test_pool(db_url).await?;
    let notifier = Notifier::connect(db_url).await?;
    notifier.register_all(&nt_kinds()).await?;

    let account_code = format!("DU-{}", Uuid::new_v4());
    let engine = with_engine.then(|| StubEngine::with_data(fixture(&account_code)) as _);

    let (errors_tx, errors_rx) = mpsc::channel(16);
    let ctx = Arc::new(FeedContext {
        errors: errors_tx,
        db: db.clone(),
        notifier: notifier.clone(),
        engine,
    });
    Ok(FeedHarness { notifier, db, ctx, errors_rx, account_code })
}

fn hourly_factory() -> anyhow::Result<AccountFeedFactory> {
    Ok(AccountFeedFactory { schedule: cron::Schedule::from_str("@hourly")? })
}

/// Wait until `query` (bound to the harness account code) counts at least
/// one row, failing fast if the feed reports an error.
async fn wait_for_rows(
    h: &mut FeedHarness,
    query: &str,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(feed_err) = h.errors_rx.try_recv() {
            anyhow::bail!("feed reported an error: {:#}", feed_err.error);
        }
        let count: i64 = sqlx::query_scalar(query)
            .bind(&h.account_code)
            .fetch_one(&h.db)
            .await?;
        if count >= 1 {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("table never grew for {}", h.account_code);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
#[serial(notifications)]
async fn startup_cycle_inserts_snapshot_rows() -> anyhow::Result<()> {
    let url = require_db!();
    let mut h = feed_harness(&url, true).await?;

    let factory = hourly_factory()?;
    let feed = factory.new_feed(Arc::clone(&h.ctx));

    wait_for_rows(&mut h, "SELECT count(*) FROM account WHERE account_code = $1").await?;
    wait_for_rows(
        &mut h,
        "SELECT count(*) FROM account_amount aa \
         JOIN account_snapshot s ON s.id = aa.account_snapshot_id \
         JOIN account a ON a.id = s.account_id WHERE a.account_code = $1",
    )
    .await?;
    wait_for_rows(
        &mut h,
        "SELECT count(*) FROM v_account_position WHERE account_code = $1",
    )
    .await?;

    // The persisted amounts land in their own columns.
    let amount: AccountAmount = sqlx::query_as(
        "SELECT aa.* FROM account_amount aa \
         JOIN account_snapshot s ON s.id = aa.account_snapshot_id \
         JOIN account a ON a.id = s.account_id WHERE a.account_code = $1",
    )
    .bind(&h.account_code)
    .fetch_one(&h.db)
    .await?;
    assert_eq!(amount.net_liquidation, Monetary { iso_4217_code: 36, amount: 6269 });
    assert_eq!(amount.total_cash_balance, Monetary { iso_4217_code: 36, amount: 1000 });
    assert_eq!(amount.total_cash_value, Monetary::default());
    assert!((amount.cushion - 0.5).abs() < f64::EPSILON);

    feed.close().await;
    h.notifier.close().await;
    Ok(())
}

#[tokio::test]
#[serial(notifications)]
async fn completed_cycle_publishes_done() -> anyhow::Result<()> {
    let url = require_db!();
    let h = feed_harness(&url, true).await?;

    let (tx, mut rx) = mpsc::channel(16);
    h.notifier.subscribe(tx.clone()).await;

    let factory = hourly_factory()?;
    assert_eq!(factory.done(), NT_ACCOUNT_FEED_DONE);
    let feed = factory.new_feed(Arc::clone(&h.ctx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(notification)) if notification.kind == NT_ACCOUNT_FEED_DONE => break,
            Ok(Some(_)) => continue,
            Ok(None) => anyhow::bail!("subscription closed before the done event"),
            Err(_) => anyhow::bail!("feed never published its done event"),
        }
    }

    feed.close().await;
    h.notifier.unsubscribe(&tx, rx).await;
    h.notifier.close().await;
    Ok(())
}

#[tokio::test]
#[serial(notifications)]
async fn missing_engine_is_reported_as_feed_error() -> anyhow::Result<()> {
    let url = require_db!();
    let mut h = feed_harness(&url, false).await?;

    let factory = hourly_factory()?;
    let feed = factory.new_feed(Arc::clone(&h.ctx));

    let reported = tokio::time::timeout(Duration::from_secs(3), h.errors_rx.recv()).await;
    let Ok(Some(feed_err)) = reported else {
        anyhow::bail!("missing engine was never reported");
    };
    assert!(feed_err.error.to_string().contains("broker engine unavailable"));

    feed.close().await;
    h.notifier.close().await;
    Ok(())
}
