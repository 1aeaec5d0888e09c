// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed lock manager backed by Postgres session-level advisory locks.
//!
//! Such locks are held until explicitly released or the owning session ends.
//! Loss of connectivity between this node and the store (which makes the
//! store consider the session ended, releasing the locks) is currently not
//! detected; the reply-stream contract reserves "closed" as the universal
//! signal for "lock no longer held" so a future heartbeat can add detection
//! without any client changes.

use std::time::Duration;

use sqlx::{Connection, PgConnection};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Interval between try-acquire attempts while a lock request is pending.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum LockCmd {
    TryAcquire { id: i64, ack: oneshot::Sender<bool> },
    Release { id: i64 },
}

/// Handle to a distributed lock manager owning one store session.
#[derive(Clone)]
pub struct DistLock {
    cmd_tx: mpsc::Sender<LockCmd>,
    exit: CancellationToken,
    terminated: CancellationToken,
}

impl DistLock {
    /// Open the manager's dedicated session and start its dispatch loop.
    pub async fn connect(db_url: &str) -> Result<DistLock, sqlx::Error> {
        let conn = PgConnection::connect(db_url).await?;
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let exit = CancellationToken::new();
        let terminated = CancellationToken::new();

        tokio::spawn(run_session(conn, cmd_rx, exit.clone(), terminated.clone()));

        Ok(DistLock { cmd_tx, exit, terminated })
    }

    /// Start an asynchronous attempt to acquire the lock `id`.
    ///
    /// Exactly one `true` is delivered on the returned stream when the lock
    /// is held. The stream closes when the caller cancels `abandon`, when
    /// the manager terminates, or when the lock is lost for any reason; in
    /// all cases closure means the lock is no longer held. A request against
    /// an already-terminated manager yields a closed stream with no value.
    pub fn request(&self, id: i64, abandon: CancellationToken) -> mpsc::Receiver<bool> {
        let (reply_tx, reply_rx) = mpsc::channel(1);
        let cmd_tx = self.cmd_tx.clone();
        let terminated = self.terminated.clone();

        tokio::spawn(async move {
            let mut acquired = false;
            loop {
                if !acquired {
                    let granted = tokio::select! {
                        _ = terminated.cancelled() => return,
                        _ = abandon.cancelled() => return,
                        granted = try_acquire(&cmd_tx, id) => granted,
                    };
                    if granted {
                        acquired = true;
                        if reply_tx.send(true).await.is_err() {
                            // Receiver dropped: treat as abandonment.
                            let _ = cmd_tx.send(LockCmd::Release { id }).await;
                            return;
                        }
                    }
                }

                tokio::select! {
                    _ = terminated.cancelled() => return,
                    _ = abandon.cancelled() => {
                        if acquired {
                            let _ = cmd_tx.send(LockCmd::Release { id }).await;
                        }
                        return;
                    }
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
        });

        reply_rx
    }

    /// Terminate the manager and all locks, closing every reply stream.
    /// Safe to call multiple times; blocks until the manager has closed.
    pub async fn close(&self) {
        self.exit.cancel();
        self.terminated.cancelled().await;
    }
}

/// One non-blocking acquisition attempt through the dispatch loop.
/// Store errors and loop termination both read as "not granted".
async fn try_acquire(cmd_tx: &mpsc::Sender<LockCmd>, id: i64) -> bool {
    let (ack_tx, ack_rx) = oneshot::channel();
    if cmd_tx.send(LockCmd::TryAcquire { id, ack: ack_tx }).await.is_err() {
        return false;
    }
    ack_rx.await.unwrap_or(false)
}

/// Serial loop owning the session. All queries run here so the advisory
/// locks stay bound to one connection.
async fn run_session(
    mut conn: PgConnection,
    mut cmd_rx: mpsc::Receiver<LockCmd>,
    exit: CancellationToken,
    terminated: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = exit.cancelled() => {
                let _ = sqlx::query("SELECT pg_advisory_unlock_all()")
                    .execute(&mut conn)
                    .await;
                let _ = conn.close().await;
                terminated.cancel();
                return;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // All handles gone without close(): park until exit.
                    exit.cancelled().await;
                    continue;
                };
                match cmd {
                    LockCmd::TryAcquire { id, ack } => {
                        let granted = sqlx::query_scalar::<_, bool>(
                            "SELECT pg_try_advisory_lock($1)",
                        )
                        .bind(id)
                        .fetch_one(&mut conn)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::debug!(id, err = %e, "advisory lock attempt failed");
                            false
                        });
                        let _ = ack.send(granted);
                    }
                    LockCmd::Release { id } => {
                        // Result ignored: the session may already be gone,
                        // in which case the lock is gone with it.
                        let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
                            .bind(id)
                            .execute(&mut conn)
                            .await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "dist_lock_tests.rs"]
mod tests;
