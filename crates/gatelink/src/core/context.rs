// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composed application lifetime: notifier + lock manager + store pool.

use sqlx::PgPool;

use crate::config::Config;
use crate::core::dist_lock::DistLock;
use crate::core::notifications::nt_kinds;
use crate::core::notifier::Notifier;
use crate::core::store::open_pool;

/// Key application dependencies, built once and shared by everything else.
/// The context exclusively owns its notifier, lock manager and pool.
#[derive(Clone)]
pub struct Context {
    pub notifier: Notifier,
    pub dist_lock: DistLock,
    pub db: PgPool,
}

impl Context {
    /// Prepare the application context, failing fast on any store error.
    pub async fn new(config: &Config) -> anyhow::Result<Context> {
        let notifier = Notifier::connect(&config.db_url).await?;
        notifier.register_all(&nt_kinds()).await?;

        let dist_lock = DistLock::connect(&config.db_url).await?;
        let db = open_pool(&config.db_url).await?;

        Ok(Context { notifier, dist_lock, db })
    }

    /// Release all resources. Safe to call multiple times.
    pub async fn close(&self) {
        self.db.close().await;
        self.dist_lock.close().await;
        self.notifier.close().await;
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
