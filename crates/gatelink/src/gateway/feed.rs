// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker contract hosted by a gateway service.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::core::notifications::NtKind;
use crate::core::notifier::Notifier;
use crate::gateway::account_feed::AccountFeedFactory;
use crate::gateway::engine::Engine;

/// A feed handles one class of data exchange between the broker and the
/// store. It must report any failure on the [`FeedContext`] errors outlet
/// or cleanly complete its work; it must not close shared resources.
#[async_trait]
pub trait Feed: Send + Sync {
    async fn close(&self);
}

/// Builds a feed bound to a feed context. The factory must not send on the
/// errors outlet from the caller's task, as that could block delivery.
pub trait FeedFactory: Send + Sync {
    fn new_feed(&self, ctx: Arc<FeedContext>) -> Box<dyn Feed>;

    /// The notification kind this feed publishes when a cycle completes.
    fn done(&self) -> NtKind;
}

/// Error information sent on the feed context's errors outlet.
#[derive(Debug)]
pub struct FeedError {
    pub error: anyhow::Error,
}

/// Values commonly needed when writing feeds, shared by all feeds of one
/// service for the service's lifetime. The engine is absent when the
/// service failed to open one.
pub struct FeedContext {
    pub errors: mpsc::Sender<FeedError>,
    pub db: PgPool,
    pub notifier: Notifier,
    pub engine: Option<Arc<dyn Engine>>,
}

/// The registered feed factories for this deployment.
pub fn feed_factories(config: &Config) -> Vec<Arc<dyn FeedFactory>> {
    vec![Arc::new(AccountFeedFactory { schedule: config.account_refresh.clone() })]
}
