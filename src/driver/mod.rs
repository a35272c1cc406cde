//! Database driver abstraction.
//!
//! The engine never talks to a database library directly; it goes through the
//! [`Driver`] and [`DriverConnection`] traits, which only require connection
//! acquisition, statement execution, and row materialization. The dialect and
//! parameter style are declared by the driver at construction time.

mod mock;
mod postgres;
mod types;

pub use mock::MockDriver;
pub use postgres::PgDriver;
pub use types::{Row, Value};

use crate::config::{Dialect, PoolConfig};
use crate::error::Result;
use crate::normalize::{BoundArgs, ParamStyle};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Creates a driver for the given dialect and pool configuration.
///
/// This is the central factory for connection pools. The dialect is named
/// explicitly; an unsupported combination fails here, at construction time,
/// never at call time.
pub async fn connect(dialect: Dialect, config: &PoolConfig) -> Result<Arc<dyn Driver>> {
    match dialect {
        Dialect::Postgres => {
            let driver = PgDriver::connect(config).await?;
            Ok(Arc::new(driver))
        }
    }
}

/// A snapshot of pool occupancy, for diagnostics and leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Total connections currently open.
    pub size: u32,
    /// Connections idle in the pool, available for acquisition.
    pub idle: u32,
}

/// A pooled connection source for one database dialect.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The SQL dialect this driver speaks.
    fn dialect(&self) -> Dialect;

    /// The bind-parameter syntax this driver expects.
    fn param_style(&self) -> ParamStyle;

    /// Acquires a connection, waiting at most `timeout`.
    ///
    /// Fails with a pool-timeout error if no connection becomes available in
    /// time. The returned connection goes back to the pool when dropped.
    async fn acquire(&self, timeout: Duration) -> Result<Box<dyn DriverConnection>>;

    /// Reports current pool occupancy.
    fn status(&self) -> PoolStatus;

    /// Closes the pool and all idle connections.
    async fn close(&self);
}

/// One acquired connection.
///
/// The driver session is strictly sequential: statements issued through one
/// connection execute in submission order. Dropping the connection releases
/// it back to the pool on every exit path.
#[async_trait]
pub trait DriverConnection: Send + std::fmt::Debug {
    /// Opens a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Executes a statement and materializes every returned row.
    async fn fetch_all(&mut self, sql: &str, args: &BoundArgs) -> Result<Vec<Row>>;

    /// Executes a statement and returns the affected-row count.
    async fn execute(&mut self, sql: &str, args: &BoundArgs) -> Result<u64>;

    /// Marks the connection unusable (an in-flight operation was abandoned).
    fn mark_broken(&mut self);

    /// True if the connection should not be reused.
    fn is_broken(&self) -> bool;
}
