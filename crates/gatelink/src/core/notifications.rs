// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification kinds shared between the gateway and server layers.

use std::fmt;

/// A notification kind. The wrapped string doubles as the store-side
/// channel name, so it must be a valid Postgres channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtKind(pub &'static str);

impl NtKind {
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for NtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Global refresh trigger: every feed that reacts to refreshes runs a cycle.
pub const NT_REFRESH_ALL: NtKind = NtKind("refreshall");

/// Request an account feed cycle.
pub const NT_ACCOUNT_REFRESH: NtKind = NtKind("accountrefresh");

/// An account feed cycle completed.
pub const NT_ACCOUNT_FEED_DONE: NtKind = NtKind("accountfeeddone");

/// Sentinel kind produced when an inbound notification fails to decode.
/// Never registered and never delivered to subscribers.
pub const NT_ERROR_FLAG: NtKind = NtKind("__error__");

/// All official kinds used by the application.
pub fn nt_kinds() -> Vec<NtKind> {
    vec![NT_REFRESH_ALL, NT_ACCOUNT_REFRESH, NT_ACCOUNT_FEED_DONE]
}

/// A decoded store notification: the kind plus an optional 64-bit payload,
/// commonly a primary key identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub kind: NtKind,
    pub id: i64,
}
