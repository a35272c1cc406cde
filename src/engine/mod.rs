//! Query execution engine.
//!
//! Executes bound calls against a driver, shaping results per the
//! descriptor's declared mode. Each call walks a linear state machine:
//!
//! ```text
//! ACQUIRE -> (BEGIN)? -> EXECUTE -> FETCH(mode) -> (COMMIT | ROLLBACK) -> RELEASE
//! ```
//!
//! RELEASE is guaranteed on every exit path, including driver errors, timeouts
//! and cancellation, because pool-acquired connections are owned by the call
//! scope and returned on drop. Caller-supplied connections are borrowed and
//! never released here. Commit happens on normal completion; any error during
//! execute/fetch triggers a rollback and is then re-raised unchanged.

mod cursor;

pub use cursor::Cursor;

use crate::config::EngineConfig;
use crate::driver::{Driver, DriverConnection, PoolStatus, Row, Value};
use crate::error::{Result, StashError};
use crate::library::QueryLibrary;
use crate::normalize::{self, Args, BoundArgs};
use crate::parse::{QueryDescriptor, ResultMode};
use crate::serdes::{self, DeserializedRows, JsonSerde, RowDeserializer};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How long a post-timeout rollback attempt may itself take.
const ROLLBACK_GRACE: Duration = Duration::from_secs(1);

/// An acquired connection, usable across several calls for caller-managed
/// transaction scopes.
pub struct Connection {
    inner: Box<dyn DriverConnection>,
}

impl Connection {
    pub(crate) fn new(inner: Box<dyn DriverConnection>) -> Self {
        Self { inner }
    }

    /// Opens a transaction on this connection.
    pub async fn begin(&mut self) -> Result<()> {
        self.inner.begin().await
    }

    /// Commits the open transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.inner.commit().await
    }

    /// Rolls back the open transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.inner.rollback().await
    }

    /// True if the connection should not be reused.
    pub fn is_broken(&self) -> bool {
        self.inner.is_broken()
    }

    fn driver_conn(&mut self) -> &mut dyn DriverConnection {
        self.inner.as_mut()
    }
}

/// Per-call execution options. Lives exactly as long as one call.
#[derive(Default)]
pub struct CallOptions<'a> {
    /// Run on this caller-owned connection instead of acquiring from the
    /// pool. The caller retains ownership; the engine never releases it.
    pub connection: Option<&'a mut Connection>,
    /// Bounds ACQUIRE and EXECUTE/FETCH. Defaults to the engine's timeout.
    pub timeout: Option<Duration>,
    /// Open a transaction around the call. Defaults to the inverse of the
    /// engine's autocommit setting.
    pub transaction: Option<bool>,
    /// Roll back after execution regardless of outcome, still returning the
    /// fetched result. For dry-run execution against a live schema; always an
    /// explicit opt-in, and implies a transaction.
    pub rollback: bool,
    /// Treat bound values without a matching template parameter as errors.
    /// Defaults to the engine's strict-binding setting.
    pub strict: Option<bool>,
}

impl<'a> CallOptions<'a> {
    /// Runs the call on a caller-owned connection.
    pub fn on(mut self, connection: &'a mut Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Overrides the call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enables or disables the implicit transaction.
    pub fn with_transaction(mut self, transaction: bool) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Requests a forced rollback after execution.
    pub fn forced_rollback(mut self) -> Self {
        self.rollback = true;
        self
    }

    /// Overrides strict binding for this call.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }
}

/// Arguments for the generic dispatch entry point.
pub enum CallArgs {
    /// One argument set, for every mode except `multi`.
    Single(Args),
    /// A batch of argument sets, for `multi` queries.
    Batch(Vec<Args>),
}

/// The result of a generic dispatch, shaped by the declared mode.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// `one`: the first matching row.
    One(Row),
    /// `many`: every matching row.
    Many(Vec<Row>),
    /// `scalar`: the first column of the first row.
    Scalar(Value),
    /// `multi`: how many argument sets were executed.
    Multi(u64),
    /// `affected`: the affected-row count.
    Affected(u64),
    /// `raw`: every row, bypassing the serde bridge.
    Raw(Vec<Row>),
}

/// The execution engine: a driver, a built library, and call defaults.
///
/// Cheap to share behind an `Arc`; all state is read-only after construction.
pub struct Engine {
    driver: Arc<dyn Driver>,
    library: Arc<QueryLibrary>,
    config: EngineConfig,
    /// Templates rewritten for the driver's parameter style, keyed by
    /// (category, query name). Built once at attach time.
    normalized: HashMap<(String, String), String>,
}

impl Engine {
    /// Attaches a driver to a built library.
    pub fn new(driver: Arc<dyn Driver>, library: Arc<QueryLibrary>, config: EngineConfig) -> Self {
        let style = driver.param_style();
        let normalized = library
            .descriptors()
            .map(|(category, descriptor)| {
                (
                    (category.to_string(), descriptor.name.clone()),
                    normalize::rewrite(descriptor, style),
                )
            })
            .collect();
        Self {
            driver,
            library,
            config,
            normalized,
        }
    }

    /// The library this engine executes from.
    pub fn library(&self) -> &QueryLibrary {
        &self.library
    }

    /// Current pool occupancy, from the driver.
    pub fn pool_status(&self) -> PoolStatus {
        self.driver.status()
    }

    /// Acquires a connection for caller-managed transaction scopes.
    pub async fn acquire(&self) -> Result<Connection> {
        self.acquire_with(self.config.default_timeout).await
    }

    /// Closes the underlying pool.
    pub async fn close(&self) {
        self.driver.close().await;
    }

    // ----- typed entry points ------------------------------------------------

    /// Executes a `one` query and deserializes the row with the default
    /// bridge.
    ///
    /// Zero rows is a not-found error. If the statement matches more than one
    /// row, the first row in driver order is returned.
    pub async fn one<T: DeserializeOwned>(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<T> {
        let row = self.one_row(category, name, args, opts).await?;
        JsonSerde::new().deserialize(name, &row)
    }

    /// Executes a `one` query with an explicit deserializer override.
    pub async fn one_with<T>(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
        deserializer: &dyn RowDeserializer<T>,
    ) -> Result<T> {
        let row = self.one_row(category, name, args, opts).await?;
        deserializer.deserialize(name, &row)
    }

    /// Executes a `one` query and returns the row undeserialized.
    pub async fn one_row(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Row> {
        let rows = self
            .rows_for(category, name, args, opts, ResultMode::One)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StashError::not_found(name))
    }

    /// Executes a `many` query and deserializes every row.
    ///
    /// Zero matching rows is an empty vector, never an error.
    pub async fn many<T: DeserializeOwned>(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Vec<T>> {
        let rows = self.many_rows(category, name, args, opts).await?;
        let bridge = JsonSerde::new();
        rows.iter().map(|row| bridge.deserialize(name, row)).collect()
    }

    /// Executes a `many` query with an explicit deserializer override.
    pub async fn many_with<T>(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
        deserializer: &dyn RowDeserializer<T>,
    ) -> Result<Vec<T>> {
        let rows = self.many_rows(category, name, args, opts).await?;
        rows.iter()
            .map(|row| deserializer.deserialize(name, row))
            .collect()
    }

    /// Executes a `many` query and returns a lazy deserializing sequence.
    pub async fn many_iter<T: DeserializeOwned + 'static>(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<DeserializedRows<T>> {
        let rows = self.many_rows(category, name, args, opts).await?;
        Ok(serdes::deserialize_rows(
            name,
            rows,
            Arc::new(JsonSerde::<T>::new()),
        ))
    }

    /// Executes a `many` query and returns the rows undeserialized.
    pub async fn many_rows(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Vec<Row>> {
        self.rows_for(category, name, args, opts, ResultMode::Many)
            .await
    }

    /// Executes a `scalar` query: the first column of the first row.
    ///
    /// Zero rows is a not-found error.
    pub async fn scalar(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Value> {
        let rows = self
            .rows_for(category, name, args, opts, ResultMode::Scalar)
            .await?;
        rows.first()
            .and_then(Row::first_value)
            .cloned()
            .ok_or_else(|| StashError::not_found(name))
    }

    /// Executes an `affected` query and returns the affected-row count.
    ///
    /// Zero affected rows returns `0`, never an error.
    pub async fn affected(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<u64> {
        let (descriptor, sql) = self.prepared(category, name)?;
        ensure_mode(descriptor, ResultMode::Affected)?;
        let bound = self.bind(descriptor, args, &opts)?;
        let (mut scope, timeout) = self.open_scope(&descriptor.name, opts).await?;
        let result = Self::bounded_execute(&mut scope, timeout, sql, &bound).await;
        Self::finish(scope, result).await
    }

    /// Executes a `multi` query once per argument set, inside one connection
    /// and one transaction. Returns the number of sets executed.
    ///
    /// All binding happens before any driver I/O: a missing parameter in any
    /// set fails the whole call up front.
    pub async fn multi(
        &self,
        category: &str,
        name: &str,
        batches: &[Args],
        opts: CallOptions<'_>,
    ) -> Result<u64> {
        let (descriptor, sql) = self.prepared(category, name)?;
        ensure_mode(descriptor, ResultMode::Multi)?;
        let bounds = batches
            .iter()
            .map(|args| self.bind(descriptor, args, &opts))
            .collect::<Result<Vec<_>>>()?;

        let (mut scope, timeout) = self.open_scope(&descriptor.name, opts).await?;
        let mut executed = 0u64;
        let mut outcome = Ok(());
        for bound in &bounds {
            match Self::bounded_execute(&mut scope, timeout, sql, bound).await {
                Ok(_) => executed += 1,
                Err(error) => {
                    outcome = Err(error);
                    break;
                }
            }
        }
        Self::finish(scope, outcome.map(|()| executed)).await
    }

    /// Executes a `raw` query: every row, bypassing the serde bridge.
    pub async fn raw(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Vec<Row>> {
        self.rows_for(category, name, args, opts, ResultMode::Raw)
            .await
    }

    /// Submits a batch as one statement in a single round trip.
    ///
    /// The argument sets are transposed into one array-valued argument per
    /// parameter, for statements written against arrays (`UNNEST`-style).
    /// Returns the affected-row count.
    pub async fn bulk(
        &self,
        category: &str,
        name: &str,
        batches: &[Args],
        opts: CallOptions<'_>,
    ) -> Result<u64> {
        let (descriptor, sql) = self.prepared(category, name)?;
        let args = transpose(descriptor, batches)?;
        let bound = self.bind(descriptor, &args, &opts)?;
        let (mut scope, timeout) = self.open_scope(&descriptor.name, opts).await?;
        let result = Self::bounded_execute(&mut scope, timeout, sql, &bound).await;
        Self::finish(scope, result).await
    }

    /// Like [`Engine::bulk`], but for statements with a `RETURNING` clause:
    /// returns the full set of inserted rows.
    pub async fn bulk_returning(
        &self,
        category: &str,
        name: &str,
        batches: &[Args],
        opts: CallOptions<'_>,
    ) -> Result<Vec<Row>> {
        let (descriptor, sql) = self.prepared(category, name)?;
        let args = transpose(descriptor, batches)?;
        let bound = self.bind(descriptor, &args, &opts)?;
        let (mut scope, timeout) = self.open_scope(&descriptor.name, opts).await?;
        let result = Self::bounded_fetch(&mut scope, timeout, sql, &bound).await;
        Self::finish(scope, result).await
    }

    /// The generic dispatch table: invokes a query by name with the strategy
    /// implied by its declared mode, and shapes the outcome accordingly.
    pub async fn invoke(
        &self,
        category: &str,
        name: &str,
        args: CallArgs,
        opts: CallOptions<'_>,
    ) -> Result<Outcome> {
        let mode = self.library.get(category, name)?.mode;
        match (mode, args) {
            (ResultMode::One, CallArgs::Single(args)) => self
                .one_row(category, name, &args, opts)
                .await
                .map(Outcome::One),
            (ResultMode::Many, CallArgs::Single(args)) => self
                .many_rows(category, name, &args, opts)
                .await
                .map(Outcome::Many),
            (ResultMode::Scalar, CallArgs::Single(args)) => self
                .scalar(category, name, &args, opts)
                .await
                .map(Outcome::Scalar),
            (ResultMode::Affected, CallArgs::Single(args)) => self
                .affected(category, name, &args, opts)
                .await
                .map(Outcome::Affected),
            (ResultMode::Raw, CallArgs::Single(args)) => self
                .raw(category, name, &args, opts)
                .await
                .map(Outcome::Raw),
            (ResultMode::Multi, CallArgs::Batch(batches)) => self
                .multi(category, name, &batches, opts)
                .await
                .map(Outcome::Multi),
            (ResultMode::Multi, CallArgs::Single(args)) => self
                .multi(category, name, std::slice::from_ref(&args), opts)
                .await
                .map(Outcome::Multi),
            (declared, CallArgs::Batch(_)) => Err(StashError::ModeMismatch {
                query: name.to_string(),
                declared: declared.as_str(),
                invoked: "multi",
            }),
        }
    }

    // ----- shared plumbing ---------------------------------------------------

    fn prepared(&self, category: &str, name: &str) -> Result<(&QueryDescriptor, &str)> {
        let descriptor = self.library.get(category, name)?;
        let sql = self
            .normalized
            .get(&(category.to_string(), name.to_string()))
            .map(String::as_str)
            .expect("every library descriptor is normalized at attach time");
        Ok((descriptor, sql))
    }

    fn bind(
        &self,
        descriptor: &QueryDescriptor,
        args: &Args,
        opts: &CallOptions<'_>,
    ) -> Result<BoundArgs> {
        let strict = opts.strict.unwrap_or(self.config.strict_binding);
        normalize::bind(descriptor, args, self.driver.param_style(), strict)
    }

    async fn rows_for(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
        invoked: ResultMode,
    ) -> Result<Vec<Row>> {
        let (descriptor, sql) = self.prepared(category, name)?;
        ensure_mode(descriptor, invoked)?;
        let bound = self.bind(descriptor, args, &opts)?;
        let (mut scope, timeout) = self.open_scope(&descriptor.name, opts).await?;
        let result = Self::bounded_fetch(&mut scope, timeout, sql, &bound).await;
        Self::finish(scope, result).await
    }

    async fn acquire_with(&self, timeout: Duration) -> Result<Connection> {
        let inner = self.driver.acquire(timeout).await?;
        Ok(Connection::new(inner))
    }

    /// ACQUIRE and optional BEGIN.
    async fn open_scope<'a>(
        &self,
        query: &str,
        opts: CallOptions<'a>,
    ) -> Result<(CallScope<'a>, Duration)> {
        let timeout = opts.timeout.unwrap_or(self.config.default_timeout);
        let transaction = opts.transaction.unwrap_or(!self.config.autocommit) || opts.rollback;
        let conn = match opts.connection {
            Some(existing) => ScopeConn::Borrowed(existing),
            None => ScopeConn::Owned(self.acquire_with(timeout).await?),
        };
        let mut scope = CallScope {
            conn,
            tx_open: false,
            force_rollback: opts.rollback,
            query: query.to_string(),
        };
        if transaction {
            scope.conn().begin().await?;
            scope.tx_open = true;
        }
        debug!(query, transaction, "call scope opened");
        Ok((scope, timeout))
    }

    /// EXECUTE/FETCH under the call timeout, abandoning on expiry.
    async fn bounded_fetch(
        scope: &mut CallScope<'_>,
        timeout: Duration,
        sql: &str,
        bound: &BoundArgs,
    ) -> Result<Vec<Row>> {
        match tokio::time::timeout(timeout, scope.conn().fetch_all(sql, bound)).await {
            Ok(result) => result,
            Err(_) => Err(Self::abandon(scope, timeout).await),
        }
    }

    async fn bounded_execute(
        scope: &mut CallScope<'_>,
        timeout: Duration,
        sql: &str,
        bound: &BoundArgs,
    ) -> Result<u64> {
        match tokio::time::timeout(timeout, scope.conn().execute(sql, bound)).await {
            Ok(result) => result,
            Err(_) => Err(Self::abandon(scope, timeout).await),
        }
    }

    /// Abandons a timed-out driver operation: the connection is marked
    /// unusable, a rollback is attempted if a transaction was open, and the
    /// timeout error is handed back for the caller. The connection itself is
    /// released by scope drop, never leaked.
    async fn abandon(scope: &mut CallScope<'_>, timeout: Duration) -> StashError {
        warn!(query = %scope.query, ?timeout, "call timed out; abandoning in-flight statement");
        scope.conn().mark_broken();
        if scope.tx_open {
            scope.tx_open = false;
            match tokio::time::timeout(ROLLBACK_GRACE, scope.conn().rollback()).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(query = %scope.query, %error, "rollback after timeout failed")
                }
                Err(_) => warn!(query = %scope.query, "rollback after timeout also timed out"),
            }
        }
        StashError::Timeout(timeout)
    }

    /// COMMIT on success (or forced rollback), ROLLBACK on error; the
    /// original error is always re-raised after rollback completes.
    async fn finish<T>(mut scope: CallScope<'_>, result: Result<T>) -> Result<T> {
        if scope.tx_open {
            scope.tx_open = false;
            match &result {
                Ok(_) if scope.force_rollback => {
                    debug!(query = %scope.query, "forced rollback requested");
                    scope.conn().rollback().await?;
                }
                Ok(_) => scope.conn().commit().await?,
                Err(error) => {
                    debug!(query = %scope.query, %error, "rolling back after error");
                    if let Err(rollback_error) = scope.conn().rollback().await {
                        warn!(query = %scope.query, error = %rollback_error, "rollback failed");
                        scope.conn().mark_broken();
                    }
                }
            }
        }
        result
    }
}

/// The connection a call scope runs on: borrowed from the caller, or owned
/// for the duration of the call and released on drop.
enum ScopeConn<'a> {
    Borrowed(&'a mut Connection),
    Owned(Connection),
}

/// One call's ACQUIRE..RELEASE scope.
struct CallScope<'a> {
    conn: ScopeConn<'a>,
    tx_open: bool,
    force_rollback: bool,
    query: String,
}

impl CallScope<'_> {
    fn conn(&mut self) -> &mut dyn DriverConnection {
        match &mut self.conn {
            ScopeConn::Borrowed(connection) => connection.driver_conn(),
            ScopeConn::Owned(connection) => connection.driver_conn(),
        }
    }

    fn into_owned(self) -> Result<(Connection, bool, bool, String)> {
        match self.conn {
            ScopeConn::Owned(connection) => {
                Ok((connection, self.tx_open, self.force_rollback, self.query))
            }
            ScopeConn::Borrowed(_) => Err(StashError::internal(
                "expected a pool-owned call scope",
            )),
        }
    }
}

/// Transposes a batch of argument sets into one array-valued argument per
/// parameter, preserving parameter order.
fn transpose(descriptor: &QueryDescriptor, batches: &[Args]) -> Result<Args> {
    if batches.is_empty() {
        return Err(StashError::config(
            "a bulk call requires at least one argument set",
        ));
    }
    let mut columns: Vec<(String, Vec<Value>)> = descriptor
        .parameters
        .iter()
        .map(|name| (name.clone(), Vec::with_capacity(batches.len())))
        .collect();
    for batch in batches {
        for (position, (name, values)) in columns.iter_mut().enumerate() {
            let value = batch
                .get(name, position)
                .ok_or_else(|| StashError::missing_parameter(&descriptor.name, name.clone()))?;
            values.push(value.clone());
        }
    }
    Ok(Args::Named(
        columns
            .into_iter()
            .map(|(name, values)| (name, Value::Array(values)))
            .collect(),
    ))
}

fn ensure_mode(descriptor: &QueryDescriptor, invoked: ResultMode) -> Result<()> {
    if descriptor.mode != invoked {
        return Err(StashError::ModeMismatch {
            query: descriptor.name.clone(),
            declared: descriptor.mode.as_str(),
            invoked: invoked.as_str(),
        });
    }
    Ok(())
}
