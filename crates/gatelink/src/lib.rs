// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gatelink: bridges broker gateway endpoints and a shared Postgres store.
//!
//! Multiple replicas may run for redundancy; a store-backed leader lock
//! guarantees at most one of them polls the broker and writes snapshots.
//! Every replica serves the HTTP read API and can ask the leader for an
//! on-demand refresh through store notifications.

pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::context::Context;
use crate::gateway::controller::GatewayController;
use crate::gateway::engine::TcpEngineConnector;
use crate::gateway::feed::feed_factories;
use crate::server::{build_router, AppState};

/// How long in-flight HTTP requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run the daemon until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let ctx = Context::new(&config).await?;

    let factories = feed_factories(&config);
    let controller = GatewayController::new(
        factories,
        ctx.db.clone(),
        ctx.notifier.clone(),
        ctx.dist_lock.clone(),
        config.broker_gws.clone(),
        config.broker_client_id,
        Arc::new(TcpEngineConnector),
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let state = Arc::new(AppState {
        db: ctx.db.clone(),
        notifier: ctx.notifier.clone(),
        err_info: config.err_info,
    });
    let router = build_router(state);
    let addr = config.address();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("gatelink listening on {addr}");

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled_owned());
    tokio::select! {
        served = server => served?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!("shutdown grace expired with requests in flight");
        }
    }

    controller.close().await;
    ctx.close().await;
    Ok(())
}

/// Cancel `shutdown` on SIGINT, SIGTERM or SIGHUP.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(err = %e, "failed to install SIGINT handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(err = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(err = %e, "failed to install SIGHUP handler");
                return;
            }
        };

        tokio::select! {
            _ = interrupt.recv() => tracing::info!("received SIGINT"),
            _ = terminate.recv() => tracing::info!("received SIGTERM"),
            _ = hangup.recv() => tracing::info!("received SIGHUP"),
        }
        shutdown.cancel();
    });
}
