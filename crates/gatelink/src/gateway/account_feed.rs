// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The account feed: pulls account values and portfolio rows from the
//! broker engine and persists a snapshot in one transaction, then
//! publishes the done notification. Writes are at-least-once and
//! idempotent through deterministic lookup-or-insert of reference rows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::core::account::{
    Account, AccountAmount, AccountPosition, AccountSnapshot, AccountType, Contract, Exchange,
    SecurityType, Symbol,
};
use crate::core::monetary::{Iso4217, Monetary};
use crate::core::notifications::{
    NtKind, NT_ACCOUNT_FEED_DONE, NT_ACCOUNT_REFRESH, NT_REFRESH_ALL,
};
use crate::gateway::engine::{AccountValue, PortfolioItem};
use crate::gateway::feed::{Feed, FeedContext, FeedError, FeedFactory};
use crate::gateway::generic_feed::GenericFeed;

/// How long one cycle will wait for the engine to produce account data.
const ENGINE_SINK_TIMEOUT: Duration = Duration::from_secs(60);

pub struct AccountFeedFactory {
    pub schedule: cron::Schedule,
}

impl FeedFactory for AccountFeedFactory {
    fn new_feed(&self, ctx: Arc<FeedContext>) -> Box<dyn Feed> {
        let kinds = vec![NT_REFRESH_ALL, NT_ACCOUNT_REFRESH];
        let generic = GenericFeed::new(
            ctx,
            self.schedule.clone(),
            kinds,
            Arc::new(|ctx| Box::pin(run_cycle(ctx))),
        );
        Box::new(AccountFeed { generic })
    }

    fn done(&self) -> NtKind {
        NT_ACCOUNT_FEED_DONE
    }
}

pub struct AccountFeed {
    generic: GenericFeed,
}

#[async_trait]
impl Feed for AccountFeed {
    async fn close(&self) {
        self.generic.close().await;
    }
}

/// One scheduled or requested cycle. Failures are reported on the errors
/// outlet; the scheduler keeps running for the next trigger.
async fn run_cycle(ctx: Arc<FeedContext>) {
    if let Err(error) = cycle(&ctx).await {
        let _ = ctx.errors.send(FeedError { error }).await;
    }
}

async fn cycle(ctx: &FeedContext) -> anyhow::Result<()> {
    let engine = ctx.engine.clone().context("broker engine unavailable")?;
    let data = tokio::time::timeout(ENGINE_SINK_TIMEOUT, engine.account_data())
        .await
        .context("account data request timed out")?
        .context("account data request failed")?;

    let mut tx = ctx.db.begin().await.context("account feed begin tx")?;
    let mut state = CycleState::new(Utc::now());

    for value in &data.values {
        ingest_value(&mut tx, &mut state, value)
            .await
            .with_context(|| format!("account value {} {}", value.key, value.currency))?;
    }
    for item in &data.portfolio {
        ingest_position(&mut tx, &mut state, item)
            .await
            .with_context(|| format!("position {}", item.symbol))?;
    }
    store(&mut tx, &state).await?;
    tx.commit().await.context("account feed commit tx")?;

    ctx.notifier.publish(NT_ACCOUNT_FEED_DONE, 1).await;
    Ok(())
}

/// Working set of one cycle: the snapshot per account plus the amount and
/// position rows accumulated for each snapshot.
struct CycleState {
    created: DateTime<Utc>,
    snapshots: HashMap<String, AccountSnapshot>,
    amounts: HashMap<i64, AccountAmount>,
    positions: Vec<AccountPosition>,
}

impl CycleState {
    fn new(created: DateTime<Utc>) -> CycleState {
        CycleState {
            created,
            snapshots: HashMap::new(),
            amounts: HashMap::new(),
            positions: Vec::new(),
        }
    }
}

async fn ingest_value(
    tx: &mut PgConnection,
    state: &mut CycleState,
    value: &AccountValue,
) -> anyhow::Result<()> {
    let snapshot = get_snapshot(tx, state, &value.account_code).await?;

    // The BASE pseudo-currency aggregates real currencies; skip it.
    if value.currency == "BASE" {
        return Ok(());
    }

    let amount = state.amounts.entry(snapshot.id).or_insert_with(|| AccountAmount {
        account_snapshot_id: snapshot.id,
        ..AccountAmount::default()
    });

    match value.key.as_str() {
        "AccountType" => {
            let account_type = get_account_type(tx, &value.value).await?;
            amount.account_type_id = account_type.id;
        }
        "Cushion" => {
            amount.cushion = value.value.parse()?;
        }
        "LookAheadNextChange" => {
            amount.look_ahead_next_change = value.value.parse()?;
        }
        key if MONETARY_KEYS.contains(&key) => {
            let money = Monetary::new(&mut *tx, &value.currency, &value.value)
                .await
                .with_context(|| format!("{key} {} {}", value.currency, value.value))?;
            apply_monetary(amount, key, money);
        }
        _ => {}
    }
    Ok(())
}

/// The account keys persisted as monetary columns.
const MONETARY_KEYS: [&str; 19] = [
    "AccruedCash",
    "AvailableFunds",
    "BuyingPower",
    "EquityWithLoanValue",
    "ExcessLiquidity",
    "FullAvailableFunds",
    "FullExcessLiquidity",
    "FullInitMarginReq",
    "FullMaintMarginReq",
    "GrossPositionValue",
    "InitMarginReq",
    "LookAheadAvailableFunds",
    "LookAheadExcessLiquidity",
    "LookAheadInitMarginReq",
    "LookAheadMaintMarginReq",
    "MaintMarginReq",
    "NetLiquidation",
    "TotalCashBalance",
    "TotalCashValue",
];

/// Assign a monetary value to the column matching `key`. Returns false for
/// keys that have no monetary column.
pub(crate) fn apply_monetary(amount: &mut AccountAmount, key: &str, value: Monetary) -> bool {
    match key {
        "AccruedCash" => amount.accrued_cash = value,
        "AvailableFunds" => amount.available_funds = value,
        "BuyingPower" => amount.buying_power = value,
        "EquityWithLoanValue" => amount.equity_with_loan_value = value,
        "ExcessLiquidity" => amount.excess_liquidity = value,
        "FullAvailableFunds" => amount.full_available_funds = value,
        "FullExcessLiquidity" => amount.full_excess_liquidity = value,
        "FullInitMarginReq" => amount.full_init_margin_req = value,
        "FullMaintMarginReq" => amount.full_maint_margin_req = value,
        "GrossPositionValue" => amount.gross_position_value = value,
        "InitMarginReq" => amount.init_margin_req = value,
        "LookAheadAvailableFunds" => amount.look_ahead_available_funds = value,
        "LookAheadExcessLiquidity" => amount.look_ahead_excess_liquidity = value,
        "LookAheadInitMarginReq" => amount.look_ahead_init_margin_req = value,
        "LookAheadMaintMarginReq" => amount.look_ahead_maint_margin_req = value,
        "MaintMarginReq" => amount.maint_margin_req = value,
        "NetLiquidation" => amount.net_liquidation = value,
        "TotalCashBalance" => amount.total_cash_balance = value,
        "TotalCashValue" => amount.total_cash_value = value,
        _ => return false,
    }
    true
}

async fn ingest_position(
    tx: &mut PgConnection,
    state: &mut CycleState,
    item: &PortfolioItem,
) -> anyhow::Result<()> {
    let snapshot = get_snapshot(tx, state, &item.account_code).await?;

    let iso: Iso4217 = sqlx::query_as(
        "SELECT iso_4217_code, minor_unit, alphabetic_code, currency \
         FROM iso_4217 WHERE alphabetic_code = $1",
    )
    .bind(&item.currency)
    .fetch_optional(&mut *tx)
    .await?
    .with_context(|| format!("unknown currency '{}'", item.currency))?;

    let symbol = get_symbol(tx, &item.symbol).await?;
    let local_symbol = get_symbol(tx, &item.local_symbol).await?;
    let security_type = get_security_type(tx, &item.security_type).await?;
    let exchange = get_exchange(tx, &item.primary_exchange).await?;

    let contract = get_contract(
        tx,
        state.created,
        item.broker_contract_id,
        iso.iso_4217_code,
        symbol.id,
        local_symbol.id,
        security_type.id,
        exchange.id,
    )
    .await?;

    state.positions.push(AccountPosition {
        id: 0,
        account_snapshot_id: snapshot.id,
        contract_id: contract.id,
        position: item.position,
        market_price: item.market_price,
        market_value: item.market_value,
        average_cost: item.average_cost,
        unrealized_pnl: item.unrealized_pnl,
        realized_pnl: item.realized_pnl,
    });
    Ok(())
}

/// The snapshot to use for this account in this cycle, creating the
/// account and snapshot rows when required.
async fn get_snapshot(
    tx: &mut PgConnection,
    state: &mut CycleState,
    account_code: &str,
) -> anyhow::Result<AccountSnapshot> {
    if let Some(existing) = state.snapshots.get(account_code) {
        return Ok(existing.clone());
    }

    let account = get_account(tx, account_code).await?;
    let snapshot: AccountSnapshot = sqlx::query_as(
        "INSERT INTO account_snapshot (account_id, created) VALUES ($1, $2) \
         RETURNING id, account_id, created",
    )
    .bind(account.id)
    .bind(state.created)
    .fetch_one(&mut *tx)
    .await?;

    state.snapshots.insert(account_code.to_owned(), snapshot.clone());
    Ok(snapshot)
}

async fn get_account(tx: &mut PgConnection, account_code: &str) -> anyhow::Result<Account> {
    let existing: Option<Account> =
        sqlx::query_as("SELECT id, account_code FROM account WHERE account_code = $1")
            .bind(account_code)
            .fetch_optional(&mut *tx)
            .await?;
    if let Some(account) = existing {
        return Ok(account);
    }

    Ok(sqlx::query_as(
        "INSERT INTO account (account_code) VALUES ($1) RETURNING id, account_code",
    )
    .bind(account_code)
    .fetch_one(&mut *tx)
    .await?)
}

async fn get_account_type(tx: &mut PgConnection, desc: &str) -> anyhow::Result<AccountType> {
    let existing: Option<AccountType> =
        sqlx::query_as("SELECT id, type_desc FROM account_type WHERE type_desc = $1")
            .bind(desc)
            .fetch_optional(&mut *tx)
            .await?;
    if let Some(account_type) = existing {
        return Ok(account_type);
    }

    Ok(sqlx::query_as(
        "INSERT INTO account_type (type_desc) VALUES ($1) RETURNING id, type_desc",
    )
    .bind(desc)
    .fetch_one(&mut *tx)
    .await?)
}

async fn get_security_type(tx: &mut PgConnection, desc: &str) -> anyhow::Result<SecurityType> {
    let existing: Option<SecurityType> =
        sqlx::query_as("SELECT id, security_type FROM security_type WHERE security_type = $1")
            .bind(desc)
            .fetch_optional(&mut *tx)
            .await?;
    if let Some(security_type) = existing {
        return Ok(security_type);
    }

    Ok(sqlx::query_as(
        "INSERT INTO security_type (security_type) VALUES ($1) RETURNING id, security_type",
    )
    .bind(desc)
    .fetch_one(&mut *tx)
    .await?)
}

async fn get_symbol(tx: &mut PgConnection, symbol: &str) -> anyhow::Result<Symbol> {
    let existing: Option<Symbol> =
        sqlx::query_as("SELECT id, symbol FROM symbol WHERE symbol = $1")
            .bind(symbol)
            .fetch_optional(&mut *tx)
            .await?;
    if let Some(symbol) = existing {
        return Ok(symbol);
    }

    Ok(sqlx::query_as("INSERT INTO symbol (symbol) VALUES ($1) RETURNING id, symbol")
        .bind(symbol)
        .fetch_one(&mut *tx)
        .await?)
}

async fn get_exchange(tx: &mut PgConnection, exchange: &str) -> anyhow::Result<Exchange> {
    let existing: Option<Exchange> =
        sqlx::query_as("SELECT id, exchange FROM exchange WHERE exchange = $1")
            .bind(exchange)
            .fetch_optional(&mut *tx)
            .await?;
    if let Some(exchange) = existing {
        return Ok(exchange);
    }

    Ok(sqlx::query_as("INSERT INTO exchange (exchange) VALUES ($1) RETURNING id, exchange")
        .bind(exchange)
        .fetch_one(&mut *tx)
        .await?)
}

#[allow(clippy::too_many_arguments)]
async fn get_contract(
    tx: &mut PgConnection,
    created: DateTime<Utc>,
    broker_contract_id: i64,
    iso_4217_code: i16,
    symbol_id: i64,
    local_symbol_id: i64,
    security_type_id: i64,
    primary_exchange_id: i64,
) -> anyhow::Result<Contract> {
    let existing: Option<Contract> = sqlx::query_as(
        "SELECT id, created, broker_contract_id, iso_4217_code, symbol_id, local_symbol_id, \
                security_type_id, primary_exchange_id \
         FROM contract \
         WHERE broker_contract_id = $1 AND iso_4217_code = $2 AND symbol_id = $3 \
           AND local_symbol_id = $4 AND security_type_id = $5 AND primary_exchange_id = $6",
    )
    .bind(broker_contract_id)
    .bind(iso_4217_code)
    .bind(symbol_id)
    .bind(local_symbol_id)
    .bind(security_type_id)
    .bind(primary_exchange_id)
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(contract) = existing {
        return Ok(contract);
    }

    Ok(sqlx::query_as(
        "INSERT INTO contract (created, broker_contract_id, iso_4217_code, symbol_id, \
                               local_symbol_id, security_type_id, primary_exchange_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING id, created, broker_contract_id, iso_4217_code, symbol_id, local_symbol_id, \
                   security_type_id, primary_exchange_id",
    )
    .bind(created)
    .bind(broker_contract_id)
    .bind(iso_4217_code)
    .bind(symbol_id)
    .bind(local_symbol_id)
    .bind(security_type_id)
    .bind(primary_exchange_id)
    .fetch_one(&mut *tx)
    .await?)
}

/// Insert the accumulated amount and position rows.
async fn store(tx: &mut PgConnection, state: &CycleState) -> anyhow::Result<()> {
    for amount in state.amounts.values() {
        sqlx::query(
            "INSERT INTO account_amount (account_snapshot_id, account_type_id, cushion, \
                 look_ahead_next_change, accrued_cash, available_funds, buying_power, \
                 equity_with_loan_value, excess_liquidity, full_available_funds, \
                 full_excess_liquidity, full_init_margin_req, full_maint_margin_req, \
                 gross_position_value, init_margin_req, look_ahead_available_funds, \
                 look_ahead_excess_liquidity, look_ahead_init_margin_req, \
                 look_ahead_maint_margin_req, maint_margin_req, net_liquidation, \
                 total_cash_balance, total_cash_value) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21, $22, $23)",
        )
        .bind(amount.account_snapshot_id)
        .bind(amount.account_type_id)
        .bind(amount.cushion)
        .bind(amount.look_ahead_next_change)
        .bind(amount.accrued_cash)
        .bind(amount.available_funds)
        .bind(amount.buying_power)
        .bind(amount.equity_with_loan_value)
        .bind(amount.excess_liquidity)
        .bind(amount.full_available_funds)
        .bind(amount.full_excess_liquidity)
        .bind(amount.full_init_margin_req)
        .bind(amount.full_maint_margin_req)
        .bind(amount.gross_position_value)
        .bind(amount.init_margin_req)
        .bind(amount.look_ahead_available_funds)
        .bind(amount.look_ahead_excess_liquidity)
        .bind(amount.look_ahead_init_margin_req)
        .bind(amount.look_ahead_maint_margin_req)
        .bind(amount.maint_margin_req)
        .bind(amount.net_liquidation)
        .bind(amount.total_cash_balance)
        .bind(amount.total_cash_value)
        .execute(&mut *tx)
        .await?;
    }

    for position in &state.positions {
        sqlx::query(
            "INSERT INTO account_position (account_snapshot_id, contract_id, pos, \
                 market_price, market_value, average_cost, unrealized_pnl, realized_pnl) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(position.account_snapshot_id)
        .bind(position.contract_id)
        .bind(position.position)
        .bind(position.market_price)
        .bind(position.market_value)
        .bind(position.average_cost)
        .bind(position.unrealized_pnl)
        .bind(position.realized_pnl)
        .execute(&mut *tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "account_feed_tests.rs"]
mod tests;
