// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::process::ExitCode;

use clap::Parser;

use gatelink::config::Config;

/// `RUST_LOG` wins when set; otherwise default to info with the daemon's
/// own spans fully enabled.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,gatelink=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing();

    tracing::info!(
        endpoints = config.broker_gws.len(),
        client_id = config.broker_client_id,
        bind = %config.address(),
        "starting gatelink"
    );

    match gatelink::run(config).await {
        Ok(()) => {
            tracing::info!("gatelink stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(err = %format!("{e:#}"), "gatelink exited with a fatal error");
            ExitCode::FAILURE
        }
    }
}
