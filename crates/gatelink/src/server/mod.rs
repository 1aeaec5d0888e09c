// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP read API over the store, with on-demand refresh via the notifier.

pub mod accounts;
pub mod refresh;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::core::notifier::Notifier;

/// Shared state for the HTTP handlers.
pub struct AppState {
    pub db: PgPool,
    pub notifier: Notifier,
    pub err_info: bool,
}

/// Assemble the API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/accounts", get(accounts::get_all))
        .route("/v1/accounts/{account_code}", get(accounts::get_latest))
        .route("/v1/accounts/{account_code}/{timestamp}", get(accounts::get_report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
