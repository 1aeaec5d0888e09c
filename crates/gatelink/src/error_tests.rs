// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::{StatusCode, Uri};

use super::{error_response, ErrorBody};

fn test_uri() -> Uri {
    Uri::from_static("/v1/accounts")
}

async fn body_of(response: axum::response::Response) -> anyhow::Result<ErrorBody> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

// ── dispatch exclusivity ──────────────────────────────────────────────────

#[tokio::test]
async fn row_not_found_maps_to_404_only() -> anyhow::Result<()> {
    let err = anyhow::Error::from(sqlx::Error::RowNotFound);
    let response = error_response(&err, true, &test_uri());

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    // Not-found must short-circuit: no error-id body is written.
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert!(serde_json::from_slice::<ErrorBody>(&bytes).is_err());
    Ok(())
}

#[tokio::test]
async fn wrapped_row_not_found_still_maps_to_404() {
    let err = anyhow::Error::from(sqlx::Error::RowNotFound).context("loading snapshot");
    let response = error_response(&err, false, &test_uri());
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn other_errors_map_to_500_with_error_id() -> anyhow::Result<()> {
    let err = anyhow::anyhow!("store exploded");
    let response = error_response(&err, false, &test_uri());

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_of(response).await?;
    assert!(!body.error_id.is_empty());
    assert!(body.details.is_none(), "details must be withheld by default");
    Ok(())
}

// ── error-info flag ───────────────────────────────────────────────────────

#[tokio::test]
async fn error_info_flag_exposes_details() -> anyhow::Result<()> {
    let err = anyhow::anyhow!("store exploded");
    let response = error_response(&err, true, &test_uri());

    let body = body_of(response).await?;
    let details = body.details.unwrap_or_default();
    assert!(details.contains("store exploded"));
    Ok(())
}
