// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publish-and-wait refresh rendezvous coupling the HTTP read path to a
//! writer feed's done event.

use std::time::Duration;

use anyhow::anyhow;
use axum::http::{header, HeaderMap};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::notifications::NtKind;
use crate::core::notifier::Notifier;

/// Detect a request for an immediate refresh of the gateway backend.
///
/// When the request's `Cache-Control` contains `max-age=0`, publish
/// `request_kind` and block until a notification of `completed_kind`
/// arrives. Notifications of other kinds keep the wait alive. An error is
/// returned if the acknowledgement exceeds `timeout` or if the
/// subscription closes underneath us; the subscription is released on
/// every exit path. Requests without the cache-bypass hint return
/// immediately.
pub async fn refresh_if_needed(
    notifier: &Notifier,
    headers: &HeaderMap,
    request_kind: NtKind,
    completed_kind: NtKind,
    timeout: Duration,
) -> anyhow::Result<()> {
    let wants_refresh = headers
        .get(header::CACHE_CONTROL)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("max-age=0"));
    if !wants_refresh {
        return Ok(());
    }

    let (tx, mut rx) = mpsc::channel(16);
    notifier.subscribe(tx.clone()).await;

    notifier.publish(request_kind, 0).await;

    let deadline = Instant::now() + timeout;
    let result = loop {
        tokio::select! {
            inbound = rx.recv() => match inbound {
                Some(notification) if notification.kind == completed_kind => break Ok(()),
                Some(_) => continue,
                None => break Err(anyhow!(
                    "subscription closed while awaiting '{completed_kind}'; \
                     did the notifier shut down?"
                )),
            },
            _ = tokio::time::sleep_until(deadline) => break Err(anyhow!(
                "timeout {timeout:?} waiting for '{completed_kind}' response \
                 to '{request_kind}' request"
            )),
        }
    };

    notifier.unsubscribe(&tx, rx).await;
    result
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
