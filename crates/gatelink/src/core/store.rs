// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store pool bootstrap.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Open the shared connection pool. Connects eagerly so configuration
/// problems fail at process start rather than on first use.
pub async fn open_pool(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new().max_connections(10).connect(db_url).await
}

/// Apply the embedded schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
