// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::sync::mpsc;

use crate::core::test_support::test_context;
use crate::gateway::engine::EngineConnector;
use crate::gateway::feed::{FeedError, FeedFactory};
use crate::gateway::test_support::{
    CountingFeedFactory, FailingConnector, FeedHook, StubConnector, StubEngine,
};
use crate::require_db;

use super::GatewayController;

const ENDPOINT: &str = "127.0.0.1:4002";

/// Drive a controller until the counting factory has seen the expected
/// number of opens and closes, then close it and wait for every remaining
/// feed to close. Returns the restart count.
async fn run_controller(
    db_url: &str,
    factory: Arc<CountingFeedFactory>,
    mut events: mpsc::UnboundedReceiver<(u32, u32)>,
    connector: Arc<dyn EngineConnector>,
    expected_opens: u32,
    expected_closes: u32,
) -> anyhow::Result<u32> {
    let ctx = test_context(db_url).await?;
    let controller = GatewayController::new(
        vec![Arc::clone(&factory) as Arc<dyn FeedFactory>],
        ctx.db.clone(),
        ctx.notifier.clone(),
        ctx.dist_lock.clone(),
        vec![ENDPOINT.to_owned()],
        5555,
        connector,
    );

    let mut terminating = false;
    let restarts = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
        let Ok(Some((opened, closed))) = event else {
            let (opened, closed) = factory.counts();
            anyhow::bail!(
                "timeout after {opened} opens (expected {expected_opens}) and \
                 {closed} closes (expected {expected_closes})"
            );
        };

        if opened < expected_opens || closed < expected_closes {
            continue;
        }
        if !terminating && opened > expected_opens {
            anyhow::bail!("too many opens (saw {opened}, expected {expected_opens})");
        }
        if !terminating && closed > expected_closes {
            anyhow::bail!("too many closes (saw {closed}, expected {expected_closes})");
        }
        if !terminating {
            terminating = true;
            controller.close().await;
        }
        let (opened, closed) = factory.counts();
        if opened == closed {
            break controller.restarts();
        }
    };

    ctx.close().await;
    Ok(restarts)
}

// ── leader operation ──────────────────────────────────────────────────────

#[tokio::test]
#[serial(leader_lock)]
async fn normal_operation_opens_one_feed_per_endpoint() -> anyhow::Result<()> {
    let url = require_db!();
    let (factory, events) = CountingFeedFactory::new(None);
    let engine = Arc::new(StubEngine::default());

    let restarts = run_controller(
        &url,
        factory,
        events,
        Arc::new(StubConnector { engine }),
        1,
        0,
    )
    .await?;
    assert_eq!(restarts, 0);
    Ok(())
}

#[tokio::test]
#[serial(leader_lock)]
async fn failed_services_are_replaced() -> anyhow::Result<()> {
    let url = require_db!();

    // The first three feeds report an error; the fourth stays healthy.
    let error_count = 3;
    let injected = Arc::new(AtomicU32::new(0));
    let hook: FeedHook = {
        let injected = Arc::clone(&injected);
        Arc::new(move |ctx| {
            let injected = Arc::clone(&injected);
            Box::pin(async move {
                let n = injected.fetch_add(1, Ordering::Relaxed);
                if n < error_count {
                    let _ = ctx
                        .errors
                        .send(FeedError {
                            error: anyhow::anyhow!(
                                "intentional error {} of {error_count}",
                                n + 1
                            ),
                        })
                        .await;
                }
            })
        })
    };

    let (factory, events) = CountingFeedFactory::new(Some(hook));
    let engine = Arc::new(StubEngine::default());

    let restarts = run_controller(
        &url,
        factory,
        events,
        Arc::new(StubConnector { engine }),
        error_count + 1,
        error_count,
    )
    .await?;
    assert_eq!(restarts, error_count);
    Ok(())
}

#[tokio::test]
#[serial(leader_lock)]
async fn unreachable_engine_keeps_restarting_without_feeds() -> anyhow::Result<()> {
    let url = require_db!();
    let ctx = test_context(&url).await?;

    let (factory, _events) = CountingFeedFactory::new(None);
    let connector = Arc::new(FailingConnector::default());
    let controller = GatewayController::new(
        vec![Arc::clone(&factory) as Arc<dyn FeedFactory>],
        ctx.db.clone(),
        ctx.notifier.clone(),
        ctx.dist_lock.clone(),
        vec![ENDPOINT.to_owned()],
        5555,
        connector,
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while controller.restarts() <= 5 {
        if tokio::time::Instant::now() > deadline {
            controller.close().await;
            ctx.close().await;
            anyhow::bail!("controller failed to keep restarting before timeout");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(factory.counts(), (0, 0), "feeds must never open without an engine");

    controller.close().await;
    ctx.close().await;
    Ok(())
}
