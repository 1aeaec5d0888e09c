// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;

use crate::core::notifications::nt_kinds;
use crate::core::notifier::Notifier;
use crate::gateway::engine::Engine;
use crate::gateway::feed::{FeedError, FeedFactory};
use crate::gateway::test_support::{
    CountingFeedFactory, FailingConnector, FeedHook, StubConnector, StubEngine,
};
use crate::require_db;

use super::{GatewayError, GatewayService};

const ENDPOINT: &str = "127.0.0.1:4002";

struct Harness {
    notifier: Notifier,
    errors_rx: mpsc::Receiver<GatewayError>,
    errors_tx: mpsc::Sender<GatewayError>,
    db: sqlx::PgPool,
}

async fn harness(db_url: &str) -> anyhow::Result<Harness> {
    let notifier = Notifier::connect(db_url).await?;
    notifier.register_all(&nt_kinds()).await?;
    let db = PgPoolOptions::new().connect_lazy(db_url)?;
    let (errors_tx, errors_rx) = mpsc::channel(16);
    Ok(Harness { notifier, errors_rx, errors_tx, db })
}

async fn expect_gateway_error(rx: &mut mpsc::Receiver<GatewayError>) -> anyhow::Result<GatewayError> {
    match tokio::time::timeout(Duration::from_secs(3), rx.recv()).await {
        Ok(Some(err)) => Ok(err),
        Ok(None) => anyhow::bail!("error outlet unexpectedly closed"),
        Err(_) => anyhow::bail!("service never reported an error"),
    }
}

async fn wait_for_open(factory: &CountingFeedFactory) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if factory.counts().0 >= 1 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("feed was never opened")
}

// ── engine open ───────────────────────────────────────────────────────────

#[tokio::test]
async fn engine_open_failure_is_reported_and_hosts_no_feeds() -> anyhow::Result<()> {
    let url = require_db!();
    let mut h = harness(&url).await?;
    let (factory, _events) = CountingFeedFactory::new(None);

    let service = GatewayService::new(
        h.errors_tx.clone(),
        vec![Arc::clone(&factory) as Arc<dyn FeedFactory>],
        h.db.clone(),
        h.notifier.clone(),
        Arc::new(FailingConnector::default()),
        ENDPOINT.to_owned(),
        5555,
    );

    let reported = expect_gateway_error(&mut h.errors_rx).await?;
    assert_eq!(reported.endpoint, ENDPOINT);
    assert_eq!(factory.counts(), (0, 0), "no feeds should open without an engine");

    service.close().await;
    h.notifier.close().await;
    Ok(())
}

// ── error forwarding ──────────────────────────────────────────────────────

#[tokio::test]
async fn feed_errors_are_forwarded_with_endpoint_tag() -> anyhow::Result<()> {
    let url = require_db!();
    let mut h = harness(&url).await?;

    let hook: FeedHook = Arc::new(|ctx| {
        Box::pin(async move {
            let _ = ctx
                .errors
                .send(FeedError { error: anyhow::anyhow!("intentional feed failure") })
                .await;
        })
    });
    let (factory, _events) = CountingFeedFactory::new(Some(hook));

    let engine = Arc::new(StubEngine::default());
    let service = GatewayService::new(
        h.errors_tx.clone(),
        vec![Arc::clone(&factory) as Arc<dyn FeedFactory>],
        h.db.clone(),
        h.notifier.clone(),
        Arc::new(StubConnector { engine }),
        ENDPOINT.to_owned(),
        5555,
    );

    let reported = expect_gateway_error(&mut h.errors_rx).await?;
    assert_eq!(reported.endpoint, ENDPOINT);
    assert!(reported.error.to_string().contains("intentional feed failure"));

    service.close().await;
    h.notifier.close().await;
    Ok(())
}

#[tokio::test]
async fn engine_departure_from_ready_is_reported() -> anyhow::Result<()> {
    let url = require_db!();
    let mut h = harness(&url).await?;
    let (factory, _events) = CountingFeedFactory::new(None);

    let engine = Arc::new(StubEngine::default());
    let service = GatewayService::new(
        h.errors_tx.clone(),
        vec![Arc::clone(&factory) as Arc<dyn FeedFactory>],
        h.db.clone(),
        h.notifier.clone(),
        Arc::new(StubConnector { engine: Arc::clone(&engine) }),
        ENDPOINT.to_owned(),
        5555,
    );
    wait_for_open(&factory).await?;

    engine.fail("gateway connection dropped");

    let reported = expect_gateway_error(&mut h.errors_rx).await?;
    assert_eq!(reported.endpoint, ENDPOINT);
    assert!(reported.error.to_string().contains("gateway connection dropped"));

    service.close().await;
    h.notifier.close().await;
    Ok(())
}

#[tokio::test]
async fn engine_departure_without_fatal_error_is_synthesized() -> anyhow::Result<()> {
    let url = require_db!();
    let mut h = harness(&url).await?;
    let (factory, _events) = CountingFeedFactory::new(None);

    let engine = Arc::new(StubEngine::default());
    let service = GatewayService::new(
        h.errors_tx.clone(),
        vec![Arc::clone(&factory) as Arc<dyn FeedFactory>],
        h.db.clone(),
        h.notifier.clone(),
        Arc::new(StubConnector { engine: Arc::clone(&engine) }),
        ENDPOINT.to_owned(),
        5555,
    );
    wait_for_open(&factory).await?;

    // Departure with no recorded fatal error: the service makes one up
    // from the state name.
    engine.stop().await;

    let reported = expect_gateway_error(&mut h.errors_rx).await?;
    assert!(reported.error.to_string().contains("without reporting fatal error"));

    service.close().await;
    h.notifier.close().await;
    Ok(())
}

// ── teardown ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn close_is_idempotent_and_closes_feeds() -> anyhow::Result<()> {
    let url = require_db!();
    let h = harness(&url).await?;
    let (factory, _events) = CountingFeedFactory::new(None);

    let engine = Arc::new(StubEngine::default());
    let service = GatewayService::new(
        h.errors_tx.clone(),
        vec![Arc::clone(&factory) as Arc<dyn FeedFactory>],
        h.db.clone(),
        h.notifier.clone(),
        Arc::new(StubConnector { engine }),
        ENDPOINT.to_owned(),
        5555,
    );
    wait_for_open(&factory).await?;

    service.close().await;
    service.close().await;
    assert_eq!(factory.counts(), (1, 1));

    h.notifier.close().await;
    Ok(())
}
