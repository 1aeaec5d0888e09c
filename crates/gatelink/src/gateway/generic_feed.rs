// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler shared by feed implementations: fires an async callback once
//! at startup, on every tick of a cron schedule, and on every subscribed
//! notification. Callbacks are invoked serially within one feed and must
//! either complete cleanly or report a single error on the feed context's
//! errors outlet.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::notifications::{Notification, NtKind};
use crate::gateway::feed::{FeedContext, FeedError};

/// The work a generic feed performs on each trigger.
pub type FeedCallback = Arc<dyn Fn(Arc<FeedContext>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A running scheduler. Dropping the value does not stop it; call
/// [`GenericFeed::close`].
pub struct GenericFeed {
    exit: CancellationToken,
    terminated: CancellationToken,
}

impl GenericFeed {
    /// Start the scheduler. The callback fires immediately, then on each
    /// schedule tick and each notification whose kind is in `kinds`.
    pub fn new(
        ctx: Arc<FeedContext>,
        schedule: cron::Schedule,
        kinds: Vec<NtKind>,
        callback: FeedCallback,
    ) -> GenericFeed {
        let exit = CancellationToken::new();
        let terminated = CancellationToken::new();
        let ticker_stop = CancellationToken::new();

        let (tick_tx, tick_rx) = mpsc::channel::<()>(1);
        tokio::spawn(run_ticker(schedule, tick_tx, ticker_stop.clone()));
        tokio::spawn(run_dispatch(
            ctx,
            kinds,
            callback,
            tick_rx,
            ticker_stop,
            exit.clone(),
            terminated.clone(),
        ));

        GenericFeed { exit, terminated }
    }

    /// Stop the scheduler. Safe to call multiple times; blocks until both
    /// tasks have terminated.
    pub async fn close(&self) {
        self.exit.cancel();
        self.terminated.cancelled().await;
    }
}

/// Emits one tick immediately, then one per schedule fire. The next fire
/// time is recomputed from a fresh UTC read on every cycle, so wall-clock
/// jumps re-pace naturally.
async fn run_ticker(schedule: cron::Schedule, tick_tx: mpsc::Sender<()>, stop: CancellationToken) {
    if tick_tx.send(()).await.is_err() {
        return;
    }
    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            stop.cancelled().await;
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
        if tick_tx.send(()).await.is_err() {
            return;
        }
    }
}

/// Selects among termination, ticks and notifications, running the
/// callback serially. Closure of the notification stream means the
/// notifier died: it is reported once as a feed error and the dispatcher
/// keeps serving ticks so a later close is not masked.
async fn run_dispatch(
    ctx: Arc<FeedContext>,
    kinds: Vec<NtKind>,
    callback: FeedCallback,
    mut tick_rx: mpsc::Receiver<()>,
    ticker_stop: CancellationToken,
    exit: CancellationToken,
    terminated: CancellationToken,
) {
    let (notify_tx, mut notify_rx) = mpsc::channel::<Notification>(16);
    ctx.notifier.subscribe(notify_tx.clone()).await;

    let mut notifications_live = true;
    loop {
        tokio::select! {
            _ = exit.cancelled() => break,
            Some(()) = tick_rx.recv() => {
                callback(Arc::clone(&ctx)).await;
            }
            inbound = notify_rx.recv(), if notifications_live => {
                match inbound {
                    Some(notification) => {
                        if kinds.contains(&notification.kind) {
                            callback(Arc::clone(&ctx)).await;
                        }
                    }
                    None => {
                        notifications_live = false;
                        let error = anyhow::anyhow!("notification system stopped");
                        let _ = ctx.errors.send(FeedError { error }).await;
                    }
                }
            }
        }
    }

    ticker_stop.cancel();
    ctx.notifier.unsubscribe(&notify_tx, notify_rx).await;
    terminated.cancel();
}

#[cfg(test)]
#[path = "generic_feed_tests.rs"]
mod tests;
