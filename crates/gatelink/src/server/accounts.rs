// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account read handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::core::account::{
    Account, AccountAmount, AccountPositionView, AccountSnapshot, AccountSnapshotLatest,
};
use crate::core::notifications::{NT_ACCOUNT_FEED_DONE, NT_ACCOUNT_REFRESH};
use crate::error::error_response;
use crate::server::refresh::refresh_if_needed;
use crate::server::AppState;

/// How long a forced refresh may take before the read gives up.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// A snapshot report: the account-level balance plus all positions.
#[derive(Debug, Serialize)]
pub struct AccountReport {
    pub balance: AccountAmount,
    pub positions: Vec<AccountPositionView>,
}

/// `GET /v1/accounts` — all known accounts, optionally forcing a fresh
/// feed cycle first when the caller sent `Cache-Control: max-age=0`.
pub async fn get_all(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    match get_all_inner(&state, &headers).await {
        Ok(accounts) => (
            [(header::CACHE_CONTROL, "private, max-age=60")],
            Json(accounts),
        )
            .into_response(),
        Err(err) => error_response(&err, state.err_info, &uri),
    }
}

async fn get_all_inner(state: &AppState, headers: &HeaderMap) -> anyhow::Result<Vec<Account>> {
    refresh_if_needed(
        &state.notifier,
        headers,
        NT_ACCOUNT_REFRESH,
        NT_ACCOUNT_FEED_DONE,
        REFRESH_TIMEOUT,
    )
    .await?;

    Ok(sqlx::query_as("SELECT id, account_code FROM account ORDER BY account_code")
        .fetch_all(&state.db)
        .await?)
}

/// `GET /v1/accounts/{account_code}` — redirect to the latest snapshot
/// report for the account.
pub async fn get_latest(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Path(account_code): Path<String>,
) -> Response {
    let latest: Result<AccountSnapshotLatest, anyhow::Error> = sqlx::query_as(
        "SELECT account_code, latest FROM v_account_snapshot_latest WHERE account_code = $1",
    )
    .bind(&account_code)
    .fetch_one(&state.db)
    .await
    .map_err(Into::into);

    match latest {
        Ok(latest) => {
            let timestamp = latest.latest.to_rfc3339_opts(SecondsFormat::Nanos, true);
            let location = format!("/v1/accounts/{account_code}/{timestamp}");
            (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
        }
        Err(err) => error_response(&err, state.err_info, &uri),
    }
}

/// `GET /v1/accounts/{account_code}/{timestamp}` — the full report for one
/// snapshot, addressed by its RFC 3339 creation time.
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Path((account_code, timestamp)): Path<(String, String)>,
) -> Response {
    match get_report_inner(&state, &account_code, &timestamp).await {
        Ok(report) => (
            [(header::CACHE_CONTROL, "private, max-age=31556926")],
            Json(report),
        )
            .into_response(),
        Err(err) => error_response(&err, state.err_info, &uri),
    }
}

async fn get_report_inner(
    state: &AppState,
    account_code: &str,
    timestamp: &str,
) -> anyhow::Result<AccountReport> {
    let account: Account =
        sqlx::query_as("SELECT id, account_code FROM account WHERE account_code = $1")
            .bind(account_code)
            .fetch_one(&state.db)
            .await?;

    let created: DateTime<Utc> = DateTime::parse_from_rfc3339(timestamp)
        .with_context(|| format!("invalid snapshot timestamp '{timestamp}'"))?
        .with_timezone(&Utc);

    let snapshot: AccountSnapshot = sqlx::query_as(
        "SELECT id, account_id, created FROM account_snapshot \
         WHERE account_id = $1 AND created = $2",
    )
    .bind(account.id)
    .bind(created)
    .fetch_one(&state.db)
    .await?;

    let positions: Vec<AccountPositionView> = sqlx::query_as(
        "SELECT broker_contract_id, symbol, local_symbol, security_type, exchange, pos, \
                iso_4217_code, currency, market_price, market_value, average_cost, \
                unrealized_pnl, realized_pnl, account_snapshot_id, created, account_code \
         FROM v_account_position WHERE account_snapshot_id = $1",
    )
    .bind(snapshot.id)
    .fetch_all(&state.db)
    .await?;

    let balance: AccountAmount = sqlx::query_as(
        "SELECT id, account_snapshot_id, account_type_id, cushion, look_ahead_next_change, \
                accrued_cash, available_funds, buying_power, equity_with_loan_value, \
                excess_liquidity, full_available_funds, full_excess_liquidity, \
                full_init_margin_req, full_maint_margin_req, gross_position_value, \
                init_margin_req, look_ahead_available_funds, look_ahead_excess_liquidity, \
                look_ahead_init_margin_req, look_ahead_maint_margin_req, maint_margin_req, \
                net_liquidation, total_cash_balance, total_cash_value \
         FROM account_amount WHERE account_snapshot_id = $1",
    )
    .bind(snapshot.id)
    .fetch_one(&state.db)
    .await?;

    Ok(AccountReport { balance, positions })
}

#[cfg(test)]
#[path = "accounts_tests.rs"]
mod tests;
