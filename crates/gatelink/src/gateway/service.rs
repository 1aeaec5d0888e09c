// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-endpoint supervisor: one broker engine and the feeds attached to it.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::core::notifier::Notifier;
use crate::gateway::drain_while;
use crate::gateway::engine::{Engine, EngineConnector, EngineState};
use crate::gateway::feed::{Feed, FeedContext, FeedError, FeedFactory};

/// Error information reported upward by a gateway service, tagged with the
/// endpoint it belongs to.
#[derive(Debug)]
pub struct GatewayError {
    pub error: anyhow::Error,
    pub endpoint: String,
}

/// An attempt at communication with a single broker gateway endpoint,
/// hosting one feed per registered factory. Any failure is reported on the
/// errors outlet passed at creation; the service is disposable and is
/// replaced (not recovered) by the controller after an error.
pub struct GatewayService {
    exit: CancellationToken,
    terminated: CancellationToken,
}

impl GatewayService {
    /// Start the service. Engine-open failures are reported on `errors`;
    /// the service then keeps running (hosting no feeds) until closed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        errors: mpsc::Sender<GatewayError>,
        factories: Vec<Arc<dyn FeedFactory>>,
        db: PgPool,
        notifier: Notifier,
        connector: Arc<dyn EngineConnector>,
        endpoint: String,
        client_id: i64,
    ) -> GatewayService {
        let exit = CancellationToken::new();
        let terminated = CancellationToken::new();

        tokio::spawn(run_service(
            errors,
            factories,
            db,
            notifier,
            connector,
            endpoint,
            client_id,
            exit.clone(),
            terminated.clone(),
        ));

        GatewayService { exit, terminated }
    }

    /// Terminate the service and any feeds it is running. Safe to call
    /// multiple times; blocks until the service has closed.
    pub async fn close(&self) {
        self.exit.cancel();
        self.terminated.cancelled().await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_service(
    errors: mpsc::Sender<GatewayError>,
    factories: Vec<Arc<dyn FeedFactory>>,
    db: PgPool,
    notifier: Notifier,
    connector: Arc<dyn EngineConnector>,
    endpoint: String,
    client_id: i64,
    exit: CancellationToken,
    terminated: CancellationToken,
) {
    let (feed_err_tx, mut feed_err_rx) = mpsc::channel::<FeedError>(16);
    let mut feeds: Vec<Box<dyn Feed>> = Vec::new();
    let mut engine: Option<Arc<dyn Engine>> = None;

    // A watch that never changes stands in when no engine opened; keeping
    // the sender alive stops the branch from firing spuriously.
    let (idle_state_tx, idle_state_rx) = watch::channel(EngineState::Ready);
    let _idle_state_guard = idle_state_tx;
    let mut state_rx = idle_state_rx;
    let mut state_watch_live = false;

    match connector.open(&endpoint, client_id).await {
        Ok(opened) => {
            state_rx = opened.state();
            state_rx.mark_unchanged();
            state_watch_live = true;

            let ctx = Arc::new(FeedContext {
                errors: feed_err_tx.clone(),
                db,
                notifier,
                engine: Some(Arc::clone(&opened)),
            });
            for factory in &factories {
                feeds.push(factory.new_feed(Arc::clone(&ctx)));
            }
            engine = Some(opened);
        }
        Err(e) => {
            let _ = errors
                .send(GatewayError { error: e, endpoint: endpoint.clone() })
                .await;
        }
    }

    loop {
        tokio::select! {
            _ = exit.cancelled() => {
                // Feeds may be mid-send on the errors outlet; drain while
                // closing so they cannot deadlock.
                drain_while(
                    async {
                        for feed in &feeds {
                            feed.close().await;
                        }
                    },
                    &mut feed_err_rx,
                )
                .await;
                if let Some(engine) = &engine {
                    engine.stop().await;
                }
                terminated.cancel();
                return;
            }
            Some(feed_err) = feed_err_rx.recv() => {
                let _ = errors
                    .send(GatewayError { error: feed_err.error, endpoint: endpoint.clone() })
                    .await;
            }
            changed = state_rx.changed(), if state_watch_live => {
                match changed {
                    Ok(()) => {
                        let state = *state_rx.borrow_and_update();
                        if state != EngineState::Ready {
                            // In normal shutdown we have already stopped
                            // watching, so this is always a failure.
                            let error = engine
                                .as_ref()
                                .and_then(|e| e.fatal_error())
                                .map(anyhow::Error::msg)
                                .unwrap_or_else(|| {
                                    anyhow::anyhow!(
                                        "{} without reporting fatal error",
                                        state.as_str()
                                    )
                                });
                            let _ = errors
                                .send(GatewayError { error, endpoint: endpoint.clone() })
                                .await;
                        }
                    }
                    Err(_) => {
                        state_watch_live = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
