// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker-engine boundary: the handle the gateway consumes, plus the TCP
//! adapter used in production. The broker's own wire protocol is not
//! modelled here; the adapter speaks newline-delimited JSON with
//! correlation ids, which is enough for connection supervision and the
//! account data exchange the feeds need.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Connection state published by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    Exited,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Ready => "engine ready",
            EngineState::Exited => "engine exited",
        }
    }
}

/// One account key/value observation reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountValue {
    pub account_code: String,
    pub key: String,
    pub value: String,
    pub currency: String,
}

/// One portfolio row reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioItem {
    pub account_code: String,
    pub broker_contract_id: i64,
    pub symbol: String,
    pub local_symbol: String,
    pub security_type: String,
    pub primary_exchange: String,
    pub currency: String,
    pub position: i64,
    pub market_price: f64,
    pub market_value: f64,
    pub average_cost: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

/// Everything an account feed cycle reads from the broker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountData {
    pub values: Vec<AccountValue>,
    pub portfolio: Vec<PortfolioItem>,
}

/// A live connection to one broker gateway endpoint.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Watch the connection state. Only changes after subscription are
    /// observed.
    fn state(&self) -> watch::Receiver<EngineState>;

    /// The error that took the engine out of `Ready`, when it reported one.
    fn fatal_error(&self) -> Option<String>;

    /// Fetch the current account values and portfolio.
    async fn account_data(&self) -> anyhow::Result<AccountData>;

    /// Stop the engine. Idempotent.
    async fn stop(&self);
}

/// Opens engines for endpoints; injected so tests can substitute stubs.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn open(&self, endpoint: &str, client_id: i64) -> anyhow::Result<Arc<dyn Engine>>;
}

/// Production connector: plain TCP to the gateway endpoint.
#[derive(Debug, Default)]
pub struct TcpEngineConnector;

#[async_trait]
impl EngineConnector for TcpEngineConnector {
    async fn open(&self, endpoint: &str, client_id: i64) -> anyhow::Result<Arc<dyn Engine>> {
        let engine = TcpEngine::open(endpoint, client_id).await?;
        Ok(engine)
    }
}

#[derive(Serialize)]
struct HelloMsg {
    hello: HelloBody,
}

#[derive(Serialize)]
struct HelloBody {
    client_id: i64,
}

#[derive(Serialize)]
struct RequestMsg<'a> {
    req: &'a str,
    id: u64,
}

#[derive(Deserialize)]
struct ReplyMsg {
    id: u64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    account_data: Option<AccountData>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<AccountData>>>>>;

/// Engine over a TCP connection. Requests are correlated by id; the read
/// task publishes state transitions and fails all in-flight requests when
/// the connection drops.
pub struct TcpEngine {
    state_tx: watch::Sender<EngineState>,
    fatal: Arc<Mutex<Option<String>>>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_req: AtomicU64,
    cancel: CancellationToken,
}

impl TcpEngine {
    /// Connect to `endpoint` and present `client_id` in the hello line.
    pub async fn open(endpoint: &str, client_id: i64) -> anyhow::Result<Arc<TcpEngine>> {
        let stream = TcpStream::connect(endpoint).await?;
        let (read_half, mut write_half) = stream.into_split();

        let hello = serde_json::to_string(&HelloMsg { hello: HelloBody { client_id } })?;
        write_half.write_all(hello.as_bytes()).await?;
        write_half.write_all(b"\n").await?;

        let (state_tx, _) = watch::channel(EngineState::Ready);
        let engine = Arc::new(TcpEngine {
            state_tx,
            fatal: Arc::new(Mutex::new(None)),
            writer: tokio::sync::Mutex::new(write_half),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_req: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(read_loop(
            read_half,
            engine.state_tx.clone(),
            Arc::clone(&engine.fatal),
            Arc::clone(&engine.pending),
            engine.cancel.clone(),
        ));

        Ok(engine)
    }
}

#[async_trait]
impl Engine for TcpEngine {
    fn state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().ok().and_then(|guard| guard.clone())
    }

    async fn account_data(&self) -> anyhow::Result<AccountData> {
        if *self.state_tx.borrow() == EngineState::Exited {
            anyhow::bail!("engine exited");
        }

        let id = self.next_req.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }

        let line = serde_json::to_string(&RequestMsg { req: "account_data", id })?;
        {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("engine connection lost"),
        }
    }

    async fn stop(&self) {
        self.cancel.cancel();
        let _ = self.state_tx.send(EngineState::Exited);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Reads reply lines until cancellation or disconnect. On disconnect the
/// fatal error is recorded, the state flips to `Exited` and every pending
/// request fails.
async fn read_loop(
    read_half: OwnedReadHalf,
    state_tx: watch::Sender<EngineState>,
    fatal: Arc<Mutex<Option<String>>>,
    pending: PendingMap,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(read_half).lines();

    let failure: Option<String> = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let reply: ReplyMsg = match serde_json::from_str(&line) {
                        Ok(reply) => reply,
                        Err(e) => {
                            tracing::debug!(err = %e, "discarding unparseable engine line");
                            continue;
                        }
                    };
                    let waiter = pending.lock().ok().and_then(|mut p| p.remove(&reply.id));
                    let Some(waiter) = waiter else { continue };
                    let result = match (reply.error, reply.account_data) {
                        (Some(msg), _) => Err(anyhow::anyhow!(msg)),
                        (None, Some(data)) => Ok(data),
                        (None, None) => Err(anyhow::anyhow!("empty engine reply")),
                    };
                    let _ = waiter.send(result);
                }
                Ok(None) => break Some("engine connection closed".to_owned()),
                Err(e) => break Some(format!("engine read failed: {e}")),
            },
        }
    };

    if let Some(msg) = failure {
        if let Ok(mut guard) = fatal.lock() {
            *guard = Some(msg);
        }
        let _ = state_tx.send(EngineState::Exited);
    }

    // Fail any requests still in flight.
    if let Ok(mut p) = pending.lock() {
        p.clear();
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
