// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain row types persisted by the account feed and read by the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::monetary::Monetary;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    #[serde(skip)]
    pub id: i64,
    pub account_code: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountType {
    pub id: i64,
    pub type_desc: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountSnapshot {
    pub id: i64,
    pub account_id: i64,
    pub created: DateTime<Utc>,
}

/// Row of the `v_account_snapshot_latest` view.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountSnapshotLatest {
    pub account_code: String,
    pub latest: DateTime<Utc>,
}

/// One snapshot's worth of account-level amounts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountAmount {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub account_snapshot_id: i64,
    pub account_type_id: i64,
    pub cushion: f64,
    pub look_ahead_next_change: i16,
    pub accrued_cash: Monetary,
    pub available_funds: Monetary,
    pub buying_power: Monetary,
    pub equity_with_loan_value: Monetary,
    pub excess_liquidity: Monetary,
    pub full_available_funds: Monetary,
    pub full_excess_liquidity: Monetary,
    pub full_init_margin_req: Monetary,
    pub full_maint_margin_req: Monetary,
    pub gross_position_value: Monetary,
    pub init_margin_req: Monetary,
    pub look_ahead_available_funds: Monetary,
    pub look_ahead_excess_liquidity: Monetary,
    pub look_ahead_init_margin_req: Monetary,
    pub look_ahead_maint_margin_req: Monetary,
    pub maint_margin_req: Monetary,
    pub net_liquidation: Monetary,
    pub total_cash_balance: Monetary,
    pub total_cash_value: Monetary,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SecurityType {
    pub id: i64,
    pub security_type: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Symbol {
    pub id: i64,
    pub symbol: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Exchange {
    pub id: i64,
    pub exchange: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Contract {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub broker_contract_id: i64,
    pub iso_4217_code: i16,
    pub symbol_id: i64,
    pub local_symbol_id: i64,
    pub security_type_id: i64,
    pub primary_exchange_id: i64,
}

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct AccountPosition {
    pub id: i64,
    pub account_snapshot_id: i64,
    pub contract_id: i64,
    #[sqlx(rename = "pos")]
    pub position: i64,
    pub market_price: f64,
    pub market_value: f64,
    pub average_cost: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

/// Row of the `v_account_position` view: a position joined with its
/// contract, symbol, exchange and currency details.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccountPositionView {
    pub broker_contract_id: i64,
    pub symbol: String,
    pub local_symbol: String,
    pub security_type: String,
    pub exchange: String,
    #[sqlx(rename = "pos")]
    pub position: i64,
    pub iso_4217_code: i16,
    pub currency: String,
    pub market_price: f64,
    pub market_value: f64,
    pub average_cost: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    #[serde(skip)]
    pub account_snapshot_id: i64,
    #[serde(skip)]
    pub created: DateTime<Utc>,
    #[serde(skip)]
    pub account_code: String,
}
