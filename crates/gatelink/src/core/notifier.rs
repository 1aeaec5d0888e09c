// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inter-process notification fan-out backed by Postgres LISTEN/NOTIFY.
//!
//! A client publishes a kind plus an optional 64-bit payload and the store
//! delivers it asynchronously to subscribers on every node. All subscriber
//! list mutation happens inside a single serial loop fed by a command
//! queue; there is no external lock. Delivery to a subscriber is a blocking
//! send, so slow subscribers backpressure the whole notifier. On
//! termination every subscriber stream is closed.

use std::collections::HashMap;

use sqlx::postgres::PgListener;
use sqlx::{Connection, PgConnection};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::notifications::{Notification, NtKind, NT_ERROR_FLAG};

enum Command {
    Register { kind: NtKind, ack: oneshot::Sender<Result<(), sqlx::Error>> },
    Publish { kind: NtKind, id: i64, ack: oneshot::Sender<()> },
    Subscribe { tx: mpsc::Sender<Notification>, ack: oneshot::Sender<()> },
    Unsubscribe { tx: mpsc::Sender<Notification>, ack: oneshot::Sender<()> },
}

/// Handle to a notifier. Cheap to clone; all clones drive the same loop.
#[derive(Clone)]
pub struct Notifier {
    cmd_tx: mpsc::Sender<Command>,
    exit: CancellationToken,
    terminated: CancellationToken,
}

impl Notifier {
    /// Open the listener and publish sessions and start the serial loop.
    pub async fn connect(db_url: &str) -> Result<Notifier, sqlx::Error> {
        let listener = PgListener::connect(db_url).await?;
        let publish_conn = PgConnection::connect(db_url).await?;
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let exit = CancellationToken::new();
        let terminated = CancellationToken::new();

        tokio::spawn(run_loop(listener, publish_conn, cmd_rx, exit.clone(), terminated.clone()));

        Ok(Notifier { cmd_tx, exit, terminated })
    }

    /// Register a store channel to listen on. Must be called before
    /// notifications of `kind` can be delivered.
    pub async fn register(&self, kind: NtKind) -> anyhow::Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if !self.send_command(Command::Register { kind, ack: ack_tx }).await {
            return Ok(());
        }
        tokio::select! {
            _ = self.terminated.cancelled() => Ok(()),
            res = ack_rx => Ok(res.unwrap_or(Ok(()))?),
        }
    }

    /// Register every kind in order, stopping at the first error.
    pub async fn register_all(&self, kinds: &[NtKind]) -> anyhow::Result<()> {
        for kind in kinds {
            self.register(*kind).await?;
        }
        Ok(())
    }

    /// Transmit a notification to all subscribers on all nodes. Delivery is
    /// asynchronous and best-effort; publish errors are logged, not returned.
    pub async fn publish(&self, kind: NtKind, id: i64) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if !self.send_command(Command::Publish { kind, id, ack: ack_tx }).await {
            return;
        }
        tokio::select! {
            _ = self.terminated.cancelled() => {}
            _ = ack_rx => {}
        }
    }

    /// Add an in-process receiver. Blocks until the serial loop has
    /// acknowledged the subscription or the notifier has terminated.
    pub async fn subscribe(&self, tx: mpsc::Sender<Notification>) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if !self.send_command(Command::Subscribe { tx, ack: ack_tx }).await {
            return;
        }
        tokio::select! {
            _ = self.terminated.cancelled() => {}
            _ = ack_rx => {}
        }
    }

    /// Remove a receiver. Blocks until the serial loop has acknowledged the
    /// removal or the notifier has terminated. The receiver half is drained
    /// until then so a caller that has stopped reading cannot deadlock an
    /// in-flight delivery.
    pub async fn unsubscribe(
        &self,
        tx: &mpsc::Sender<Notification>,
        rx: mpsc::Receiver<Notification>,
    ) {
        let sentinel = CancellationToken::new();
        let drain_stop = sentinel.clone();
        let mut rx = rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain_stop.cancelled() => return,
                    msg = rx.recv() => {
                        if msg.is_none() {
                            return;
                        }
                    }
                }
            }
        });

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.send_command(Command::Unsubscribe { tx: tx.clone(), ack: ack_tx }).await {
            tokio::select! {
                _ = self.terminated.cancelled() => {}
                _ = ack_rx => {}
            }
        }
        sentinel.cancel();
    }

    /// Terminate the notifier, closing every subscriber stream. Safe to
    /// call multiple times; blocks until the notifier has closed.
    pub async fn close(&self) {
        self.exit.cancel();
        self.terminated.cancelled().await;
    }

    /// Deliver a command to the serial loop, returning false if the
    /// notifier terminated first.
    async fn send_command(&self, cmd: Command) -> bool {
        tokio::select! {
            _ = self.terminated.cancelled() => false,
            sent = self.cmd_tx.send(cmd) => sent.is_ok(),
        }
    }
}

/// The serial loop: multiplexes termination, the command queue and inbound
/// store notifications. Owns the channel→kind registry and subscriber list.
async fn run_loop(
    mut listener: PgListener,
    mut publish_conn: PgConnection,
    mut cmd_rx: mpsc::Receiver<Command>,
    exit: CancellationToken,
    terminated: CancellationToken,
) {
    let mut kinds: HashMap<String, NtKind> = HashMap::new();
    let mut subscribers: Vec<mpsc::Sender<Notification>> = Vec::new();

    loop {
        tokio::select! {
            _ = exit.cancelled() => {
                // Dropping the senders closes every subscriber stream.
                subscribers.clear();
                let _ = listener.unlisten_all().await;
                let _ = publish_conn.close().await;
                terminated.cancel();
                return;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    exit.cancelled().await;
                    continue;
                };
                match cmd {
                    Command::Register { kind, ack } => {
                        kinds.insert(kind.as_str().to_owned(), kind);
                        let res = listener.listen(kind.as_str()).await;
                        let _ = ack.send(res);
                    }
                    Command::Publish { kind, id, ack } => {
                        let res = sqlx::query("SELECT pg_notify($1, $2)")
                            .bind(kind.as_str())
                            .bind(id.to_string())
                            .execute(&mut publish_conn)
                            .await;
                        if let Err(e) = res {
                            tracing::warn!(kind = %kind, id, err = %e, "notification publish failed");
                        }
                        let _ = ack.send(());
                    }
                    Command::Subscribe { tx, ack } => {
                        subscribers.push(tx);
                        let _ = ack.send(());
                    }
                    Command::Unsubscribe { tx, ack } => {
                        subscribers.retain(|existing| !existing.same_channel(&tx));
                        let _ = ack.send(());
                    }
                }
            }
            inbound = listener.recv() => {
                match inbound {
                    Ok(pgn) => {
                        let n = decode(&kinds, pgn.channel(), pgn.payload());
                        if n.kind == NT_ERROR_FLAG {
                            continue;
                        }
                        for sub in &subscribers {
                            // A closed receiver just skips; an open-but-full
                            // one backpressures the loop by contract.
                            let _ = sub.send(n).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, "notification listener error");
                    }
                }
            }
        }
    }
}

/// Convert a store notification into a local one. An unregistered channel
/// yields the error sentinel (logged, then dropped by the caller); a
/// malformed payload decodes as id 0 without error.
fn decode(kinds: &HashMap<String, NtKind>, channel: &str, payload: &str) -> Notification {
    let id = payload.parse::<i64>().unwrap_or(0);
    match kinds.get(channel) {
        Some(kind) => Notification { kind: *kind, id },
        None => {
            tracing::warn!(channel, "dropping notification for unregistered channel");
            Notification { kind: NT_ERROR_FLAG, id }
        }
    }
}

#[cfg(test)]
#[path = "notifier_tests.rs"]
mod tests;
