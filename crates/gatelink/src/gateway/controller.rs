// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet supervisor: competes for the cluster-wide leader lock and, while
//! holding it, runs one gateway service per endpoint, restarting any
//! service that reports an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::dist_lock::DistLock;
use crate::core::notifier::Notifier;
use crate::gateway::drain_while;
use crate::gateway::engine::EngineConnector;
use crate::gateway::feed::FeedFactory;
use crate::gateway::service::{GatewayError, GatewayService};

/// The cluster-wide leader key. At most one controller in the cluster holds
/// it, and only the holder runs services.
pub const LOCK_MANAGER_KEY: i64 = 9063409683409876463;

/// Pause before replacing a failed service.
const RESTART_BACKOFF: Duration = Duration::from_millis(100);

/// Ensures this node runs a [`GatewayService`] for each broker endpoint if
/// no other node in the cluster is doing so, and automatically restarts any
/// failed service.
pub struct GatewayController {
    exit: CancellationToken,
    terminated: CancellationToken,
    restarts: Arc<AtomicU32>,
}

impl GatewayController {
    pub fn new(
        factories: Vec<Arc<dyn FeedFactory>>,
        db: PgPool,
        notifier: Notifier,
        dist_lock: DistLock,
        endpoints: Vec<String>,
        client_id: i64,
        connector: Arc<dyn EngineConnector>,
    ) -> GatewayController {
        let exit = CancellationToken::new();
        let terminated = CancellationToken::new();
        let restarts = Arc::new(AtomicU32::new(0));

        tokio::spawn(run_controller(
            factories,
            db,
            notifier,
            dist_lock,
            endpoints,
            client_id,
            connector,
            exit.clone(),
            terminated.clone(),
            Arc::clone(&restarts),
        ));

        GatewayController { exit, terminated, restarts }
    }

    /// How many times a failed service has been replaced. Zero may indicate
    /// an absence of errors, or that this node is not the leader.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Terminate the controller and any services it is controlling. Safe to
    /// call multiple times; blocks until the controller has closed.
    pub async fn close(&self) {
        self.exit.cancel();
        self.terminated.cancelled().await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_controller(
    factories: Vec<Arc<dyn FeedFactory>>,
    db: PgPool,
    notifier: Notifier,
    dist_lock: DistLock,
    endpoints: Vec<String>,
    client_id: i64,
    connector: Arc<dyn EngineConnector>,
    exit: CancellationToken,
    terminated: CancellationToken,
    restarts: Arc<AtomicU32>,
) {
    let abandon = CancellationToken::new();
    let (err_tx, mut err_rx) = mpsc::channel::<GatewayError>(16);
    let mut lock_reply = dist_lock.request(LOCK_MANAGER_KEY, abandon.clone());
    let mut lock_live = true;
    let mut services: HashMap<String, GatewayService> = HashMap::new();

    let new_service = |endpoint: &str, err_tx: &mpsc::Sender<GatewayError>| {
        GatewayService::new(
            err_tx.clone(),
            factories.clone(),
            db.clone(),
            notifier.clone(),
            Arc::clone(&connector),
            endpoint.to_owned(),
            client_id,
        )
    };

    loop {
        tokio::select! {
            _ = exit.cancelled() => {
                // Services may be mid-send on the error outlet; drain and
                // discard their reports while closing.
                let closing: Vec<GatewayService> = services.drain().map(|(_, s)| s).collect();
                drain_while(
                    async {
                        for service in &closing {
                            service.close().await;
                        }
                    },
                    &mut err_rx,
                )
                .await;
                abandon.cancel();
                terminated.cancel();
                return;
            }
            reply = lock_reply.recv(), if lock_live => {
                match reply {
                    Some(true) => {
                        for endpoint in &endpoints {
                            services.insert(endpoint.clone(), new_service(endpoint, &err_tx));
                        }
                    }
                    Some(false) => {}
                    // Stream closure means the lock is gone; nothing more
                    // to do here until session-loss detection exists.
                    None => lock_live = false,
                }
            }
            Some(gw_err) = err_rx.recv() => {
                tokio::time::sleep(RESTART_BACKOFF).await;
                restarts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(endpoint = %gw_err.endpoint, err = %gw_err.error, "gateway service failed");
                if let Some(failed) = services.remove(&gw_err.endpoint) {
                    failed.close().await;
                }
                tracing::info!(endpoint = %gw_err.endpoint, "restarting gateway service");
                services.insert(gw_err.endpoint.clone(), new_service(&gw_err.endpoint, &err_tx));
            }
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
