// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transfer of data between the broker gateways and the store.
//!
//! The entry point is [`controller::GatewayController`], which uses the
//! distributed lock system to guarantee a single leader in the cluster.
//! The leader loads one [`service::GatewayService`] per endpoint; a service
//! is disposable and is replaced by the controller when it reports an
//! error. Services delegate the actual work to [`feed::Feed`] values built
//! from the registered [`feed::FeedFactory`] implementations.

pub mod account_feed;
pub mod controller;
pub mod engine;
pub mod feed;
pub mod generic_feed;
pub mod service;
pub mod test_support;

use std::future::Future;

use tokio::sync::mpsc;

/// Run `work` to completion while draining and discarding messages from
/// `rx`, so tasks blocked sending on the paired sender cannot deadlock the
/// caller. Stops polling the channel once it closes.
pub(crate) async fn drain_while<F, T>(work: F, rx: &mut mpsc::Receiver<T>) -> F::Output
where
    F: Future,
{
    tokio::pin!(work);
    let mut open = true;
    loop {
        tokio::select! {
            out = &mut work => return out,
            msg = rx.recv(), if open => {
                if msg.is_none() {
                    open = false;
                }
            }
        }
    }
}
