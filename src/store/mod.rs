//! Relational persistence: pool setup, migrations, and the repositories.
//!
//! Row-level updates rely on database atomicity; balance upserts use
//! `INSERT .. ON CONFLICT`. Big integers (balances, gas prices, values) are
//! stored as decimal strings and modeled as `U256` in memory.

pub mod transactions;
pub mod vaults;
pub mod wallets;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use crate::error::Error;

/// Embedded schema migrations, applied on startup.
pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Open (creating if missing) the SQLite database and apply migrations.
pub async fn connect(db_path: &Path) -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
    Ok(pool)
}

/// Parse a decimal string column into a [`alloy::primitives::U256`].
pub(crate) fn parse_u256(column: &str, value: &str) -> Result<alloy::primitives::U256, Error> {
    alloy::primitives::U256::from_str(value)
        .map_err(|_| Error::OperationFailed(format!("corrupt {column} value: {value}")))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A single-connection in-memory database with the schema applied.
    ///
    /// One connection only: each `:memory:` connection is its own database.
    pub async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        MIGRATOR.run(&pool).await.expect("migrations apply");
        pool
    }
}
