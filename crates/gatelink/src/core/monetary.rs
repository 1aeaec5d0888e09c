// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Currency-scoped money amounts and their `monetary` composite codec.
//!
//! Amounts are stored in minor units of the currency for space efficiency,
//! formatting convenience and freedom from floating point precision issues.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;

/// A monetary amount in a specific currency, stored in minor units.
///
/// Bound to the Postgres composite type `monetary (iso_4217_code smallint,
/// amount bigint)`. The text form is `(iso, amount)` and round-trips through
/// [`fmt::Display`] / [`FromStr`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "monetary")]
pub struct Monetary {
    pub iso_4217_code: i16,
    pub amount: i64,
}

impl Monetary {
    /// Build a money amount from a human string, resolving the currency in
    /// the `iso_4217` registry. `amount` is `major` or `major.minor`; more
    /// than one decimal point is an error, as is an unknown currency code.
    pub async fn new<'e, E>(db: E, currency: &str, amount: &str) -> anyhow::Result<Monetary>
    where
        E: PgExecutor<'e>,
    {
        let iso: Iso4217 = sqlx::query_as(
            "SELECT iso_4217_code, minor_unit, alphabetic_code, currency \
             FROM iso_4217 WHERE alphabetic_code = $1",
        )
        .bind(currency)
        .fetch_optional(db)
        .await?
        .with_context(|| format!("unknown currency '{currency}'"))?;

        let (major, minor) = split_amount(amount)?;
        let scale = 10_i64.pow(iso.minor_unit.max(0) as u32);
        Ok(Monetary { iso_4217_code: iso.iso_4217_code, amount: major * scale + minor })
    }
}

impl fmt::Display for Monetary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.iso_4217_code, self.amount)
    }
}

impl FromStr for Monetary {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Monetary> {
        let inner = s
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .with_context(|| format!("'{s}' is not a composite value"))?;

        let fields: Vec<&str> = inner.split(',').collect();
        if fields.len() != 2 {
            bail!("'{inner}' did not have the expected 2 composite fields");
        }

        let iso: i16 = fields[0]
            .trim()
            .parse()
            .with_context(|| format!("'{}' is not an integer", fields[0]))?;
        let amount: i64 = fields[1]
            .trim()
            .parse()
            .with_context(|| format!("'{}' is not an integer", fields[1]))?;
        Ok(Monetary { iso_4217_code: iso, amount })
    }
}

/// Officially-reported information about a specific currency.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Iso4217 {
    pub iso_4217_code: i16,
    pub minor_unit: i16,
    pub alphabetic_code: String,
    pub currency: String,
}

/// Split a human amount string into (major, minor) integer parts.
fn split_amount(amount: &str) -> anyhow::Result<(i64, i64)> {
    let parts: Vec<&str> = amount.split('.').collect();
    if parts.len() > 2 {
        bail!("amount '{amount}' should be an integer or contain a single decimal point");
    }

    let major: i64 = parts[0]
        .parse()
        .with_context(|| format!("amount '{amount}' major part is not an integer"))?;
    let minor: i64 = if parts.len() == 2 {
        parts[1]
            .parse()
            .with_context(|| format!("amount '{amount}' minor part is not an integer"))?
    } else {
        0
    };
    Ok((major, minor))
}

#[cfg(test)]
#[path = "monetary_tests.rs"]
mod tests;
