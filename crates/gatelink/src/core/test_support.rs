// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for store-backed tests.
//!
//! Tests that need a live Postgres read `TEST_DB_URL` and skip (not fail)
//! when it is unset, so the suite stays green on machines without a store.

use std::str::FromStr;

use sqlx::PgPool;

use crate::config::Config;
use crate::core::context::Context;
use crate::core::store;

/// Skip the current test unless `TEST_DB_URL` points at a Postgres store.
#[macro_export]
macro_rules! require_db {
    () => {
        match std::env::var("TEST_DB_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("TEST_DB_URL not set — skipping test");
                return Ok(());
            }
        }
    };
}

/// A config pointed at the test store, with production defaults elsewhere.
pub fn test_config(db_url: &str) -> anyhow::Result<Config> {
    Ok(Config {
        err_info: false,
        broker_gws: vec!["127.0.0.1:4002".to_owned()],
        broker_client_id: 5555,
        db_url: db_url.to_owned(),
        port: 0,
        host: "localhost".to_owned(),
        account_refresh: cron::Schedule::from_str("@hourly")?,
    })
}

/// Connect a pool to the test store and apply the schema migrations.
pub async fn test_pool(db_url: &str) -> anyhow::Result<PgPool> {
    let pool = store::open_pool(db_url).await?;
    store::migrate(&pool).await?;
    Ok(pool)
}

/// Build a full context against the test store, with migrations applied.
pub async fn test_context(db_url: &str) -> anyhow::Result<Context> {
    let config = test_config(db_url)?;
    let ctx = Context::new(&config).await?;
    store::migrate(&ctx.db).await?;
    Ok(ctx)
}
