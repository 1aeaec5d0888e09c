// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::str::FromStr;

/// Configuration for the gatelink daemon.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "gatelinkd", about = "Broker gateway to store bridge")]
pub struct Config {
    /// Include error detail text in HTTP error bodies.
    #[arg(long, env = "ERR_INFO")]
    pub err_info: bool,

    /// Comma-separated broker gateway addresses.
    #[arg(
        long,
        env = "BROKER_GW",
        default_value = "127.0.0.1:4002",
        value_delimiter = ','
    )]
    pub broker_gws: Vec<String>,

    /// Client id presented to the broker gateways.
    #[arg(long, env = "BROKER_CID", default_value_t = 5555)]
    pub broker_client_id: i64,

    /// Store connection URL. Must begin with postgres://.
    #[arg(
        long,
        env = "DB_URL",
        default_value = "postgres://gatelink_dev@localhost/gatelink_dev?sslmode=disable",
        value_parser = parse_db_url
    )]
    pub db_url: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Host to bind on.
    #[arg(long, env = "HOST", default_value = "localhost")]
    pub host: String,

    /// Cron schedule for account refresh cycles.
    #[arg(
        long,
        env = "ACCT_REF",
        default_value = "@hourly",
        value_parser = parse_schedule
    )]
    pub account_refresh: cron::Schedule,
}

impl Config {
    /// The HTTP bind address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_db_url(value: &str) -> Result<String, String> {
    if !value.starts_with("postgres://") {
        return Err(format!("'{value}' did not begin with postgres://"));
    }
    Ok(value.to_owned())
}

fn parse_schedule(value: &str) -> Result<cron::Schedule, String> {
    cron::Schedule::from_str(value).map_err(|e| format!("'{value}' is not a cron schedule: {e}"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
