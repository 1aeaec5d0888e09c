// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP error mapping with correlation identifiers.

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body returned for a failed request: a correlation id, plus the error
/// detail when the deployment opts into exposing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Map a handler error onto an HTTP response. Row-not-found maps to 404;
/// everything else is logged under a fresh correlation id and answered
/// with 500. The two outcomes are exclusive.
pub fn error_response(err: &anyhow::Error, err_info: bool, uri: &Uri) -> Response {
    if is_not_found(err) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let error_id = Uuid::new_v4().to_string();
    tracing::error!(error_id = %error_id, uri = %uri, err = %err, "request failed");

    let details = err_info.then(|| format!("{err:#}"));
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error_id, details })).into_response()
}

/// True when the error chain bottoms out in a store row-not-found.
fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<sqlx::Error>(), Some(sqlx::Error::RowNotFound)))
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
