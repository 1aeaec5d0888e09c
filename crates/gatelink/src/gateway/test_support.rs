// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stubs and harnesses for exercising the supervision tree without a
//! broker gateway: a controllable engine, connectors that hand it out (or
//! refuse to), and a feed factory that counts opens and closes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};

use crate::core::notifications::{NtKind, NT_REFRESH_ALL};
use crate::gateway::engine::{AccountData, Engine, EngineConnector, EngineState};
use crate::gateway::feed::{Feed, FeedContext, FeedFactory};

/// An engine whose state and account data are controlled by the test.
pub struct StubEngine {
    state_tx: watch::Sender<EngineState>,
    fatal: Mutex<Option<String>>,
    data: Mutex<AccountData>,
}

impl Default for StubEngine {
    fn default() -> StubEngine {
        let (state_tx, _) = watch::channel(EngineState::Ready);
        StubEngine { state_tx, fatal: Mutex::new(None), data: Mutex::new(AccountData::default()) }
    }
}

impl StubEngine {
    pub fn with_data(data: AccountData) -> Arc<StubEngine> {
        let engine = StubEngine::default();
        if let Ok(mut guard) = engine.data.lock() {
            *guard = data;
        }
        Arc::new(engine)
    }

    /// Simulate a fatal engine failure visible to the hosting service.
    pub fn fail(&self, message: &str) {
        if let Ok(mut guard) = self.fatal.lock() {
            *guard = Some(message.to_owned());
        }
        let _ = self.state_tx.send(EngineState::Exited);
    }
}

#[async_trait]
impl Engine for StubEngine {
    fn state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().ok().and_then(|guard| guard.clone())
    }

    async fn account_data(&self) -> anyhow::Result<AccountData> {
        match self.data.lock() {
            Ok(guard) => Ok(guard.clone()),
            Err(_) => anyhow::bail!("stub data poisoned"),
        }
    }

    async fn stop(&self) {
        let _ = self.state_tx.send(EngineState::Exited);
    }
}

/// Hands out a shared [`StubEngine`] for every endpoint.
pub struct StubConnector {
    pub engine: Arc<StubEngine>,
}

#[async_trait]
impl EngineConnector for StubConnector {
    async fn open(&self, _endpoint: &str, _client_id: i64) -> anyhow::Result<Arc<dyn Engine>> {
        Ok(Arc::clone(&self.engine) as Arc<dyn Engine>)
    }
}

/// Refuses every open, counting the attempts.
#[derive(Default)]
pub struct FailingConnector {
    pub attempts: AtomicU32,
}

#[async_trait]
impl EngineConnector for FailingConnector {
    async fn open(&self, endpoint: &str, _client_id: i64) -> anyhow::Result<Arc<dyn Engine>> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        anyhow::bail!("no gateway at {endpoint}")
    }
}

/// Work spawned when a counting feed opens, used to inject faults.
pub type FeedHook = Arc<dyn Fn(Arc<FeedContext>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A fake feed factory reporting `(opened, closed)` counts on a channel
/// every time either count changes.
pub struct CountingFeedFactory {
    counts: Arc<Mutex<(u32, u32)>>,
    events: mpsc::UnboundedSender<(u32, u32)>,
    hook: Option<FeedHook>,
}

impl CountingFeedFactory {
    pub fn new(
        hook: Option<FeedHook>,
    ) -> (Arc<CountingFeedFactory>, mpsc::UnboundedReceiver<(u32, u32)>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let factory = CountingFeedFactory {
            counts: Arc::new(Mutex::new((0, 0))),
            events,
            hook,
        };
        (Arc::new(factory), events_rx)
    }

    pub fn counts(&self) -> (u32, u32) {
        self.counts.lock().map(|guard| *guard).unwrap_or((0, 0))
    }
}

impl FeedFactory for CountingFeedFactory {
    fn new_feed(&self, ctx: Arc<FeedContext>) -> Box<dyn Feed> {
        let snapshot = match self.counts.lock() {
            Ok(mut guard) => {
                guard.0 += 1;
                *guard
            }
            Err(_) => (0, 0),
        };
        let _ = self.events.send(snapshot);

        if let Some(hook) = &self.hook {
            let hook = Arc::clone(hook);
            tokio::spawn(async move { hook(ctx).await });
        }

        Box::new(CountingFeed {
            counts: Arc::clone(&self.counts),
            events: self.events.clone(),
        })
    }

    fn done(&self) -> NtKind {
        NT_REFRESH_ALL
    }
}

struct CountingFeed {
    counts: Arc<Mutex<(u32, u32)>>,
    events: mpsc::UnboundedSender<(u32, u32)>,
}

#[async_trait]
impl Feed for CountingFeed {
    async fn close(&self) {
        let snapshot = match self.counts.lock() {
            Ok(mut guard) => {
                if guard.0 == guard.1 {
                    return;
                }
                guard.1 += 1;
                *guard
            }
            Err(_) => return,
        };
        let _ = self.events.send(snapshot);
    }
}
