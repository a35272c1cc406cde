//! Mock driver for testing.
//!
//! An in-memory driver implementation with just enough SQL understanding to
//! exercise the engine: named tables held as row vectors, snapshot-based
//! transactions (commit publishes, rollback discards), a bounded connection
//! pool, and hooks for injecting failures and latency. Statement
//! interpretation is deliberately crude (the first keyword picks the
//! operation, and bound arguments double as equality criteria), which is all
//! the engine's contract requires.

use crate::config::Dialect;
use crate::driver::{Driver, DriverConnection, PoolStatus, Row, Value};
use crate::error::{Result, StashError};
use crate::normalize::{BoundArgs, ParamStyle};
use crate::parse::scan_placeholders;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// An in-memory driver that emulates a small, transactional table store.
pub struct MockDriver {
    state: Arc<MockState>,
}

#[derive(Debug)]
struct MockState {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    semaphore: Arc<Semaphore>,
    capacity: u32,
    latency: Mutex<Option<Duration>>,
    /// One entry per upcoming statement: `Some` fails it, `None` lets it run.
    failures: Mutex<VecDeque<Option<String>>>,
    journal: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockDriver {
    /// Creates a mock driver with the default pool capacity.
    pub fn new() -> Self {
        Self::with_connections(5)
    }

    /// Creates a mock driver with a pool of exactly `capacity` connections.
    pub fn with_connections(capacity: u32) -> Self {
        Self {
            state: Arc::new(MockState {
                tables: Mutex::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(capacity as usize)),
                capacity,
                latency: Mutex::new(None),
                failures: Mutex::new(VecDeque::new()),
                journal: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Seeds a table with rows, replacing any existing content.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.state
            .tables
            .lock()
            .expect("mock tables lock")
            .insert(table.to_string(), rows);
    }

    /// Returns a snapshot of a table's committed rows.
    pub fn table(&self, table: &str) -> Vec<Row> {
        self.state
            .tables
            .lock()
            .expect("mock tables lock")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Queues an execution failure for the next statement.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.fail_after(0, message);
    }

    /// Lets `successes` statements run, then fails the one after.
    pub fn fail_after(&self, successes: usize, message: impl Into<String>) {
        let mut failures = self.state.failures.lock().expect("mock failures lock");
        for _ in 0..successes {
            failures.push_back(None);
        }
        failures.push_back(Some(message.into()));
    }

    /// Adds artificial latency before every statement, for timeout tests.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.state.latency.lock().expect("mock latency lock") = latency;
    }

    /// Returns every successfully executed statement, in submission order.
    pub fn journal(&self) -> Vec<String> {
        self.state.journal.lock().expect("mock journal lock").clone()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Named
    }

    async fn acquire(&self, timeout: Duration) -> Result<Box<dyn DriverConnection>> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(StashError::connection("mock pool is closed"));
        }
        let permit = tokio::time::timeout(
            timeout,
            Arc::clone(&self.state.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| StashError::PoolTimeout(timeout))?
        .map_err(|_| StashError::connection("mock pool is closed"))?;

        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            _permit: permit,
            working: None,
            broken: false,
        }))
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.state.capacity,
            idle: self.state.semaphore.available_permits() as u32,
        }
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.semaphore.close();
    }
}

/// One mock connection. While a transaction is open, all effects go to a
/// private snapshot that commit publishes wholesale.
#[derive(Debug)]
struct MockConnection {
    state: Arc<MockState>,
    _permit: OwnedSemaphorePermit,
    working: Option<HashMap<String, Vec<Row>>>,
    broken: bool,
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn begin(&mut self) -> Result<()> {
        if self.working.is_some() {
            return Err(StashError::execution("transaction already open"));
        }
        let snapshot = self.state.tables.lock().expect("mock tables lock").clone();
        self.working = Some(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let working = self
            .working
            .take()
            .ok_or_else(|| StashError::execution("no open transaction to commit"))?;
        *self.state.tables.lock().expect("mock tables lock") = working;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.working.take().is_none() {
            return Err(StashError::execution("no open transaction to roll back"));
        }
        Ok(())
    }

    async fn fetch_all(&mut self, sql: &str, args: &BoundArgs) -> Result<Vec<Row>> {
        self.run(sql, args).await.map(|outcome| outcome.rows)
    }

    async fn execute(&mut self, sql: &str, args: &BoundArgs) -> Result<u64> {
        self.run(sql, args).await.map(|outcome| outcome.affected)
    }

    fn mark_broken(&mut self) {
        self.broken = true;
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

struct MockOutcome {
    rows: Vec<Row>,
    affected: u64,
}

impl MockConnection {
    async fn run(&mut self, sql: &str, args: &BoundArgs) -> Result<MockOutcome> {
        let latency = *self.state.latency.lock().expect("mock latency lock");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(Some(message)) = self
            .state
            .failures
            .lock()
            .expect("mock failures lock")
            .pop_front()
        {
            return Err(StashError::execution(message));
        }

        let pairs = match args {
            BoundArgs::Named(pairs) => pairs.clone(),
            BoundArgs::Positional(_) => {
                return Err(StashError::internal(
                    "mock driver binds by name; positional arguments reached it",
                ))
            }
        };

        let outcome = match &mut self.working {
            Some(working) => apply(working, sql, &pairs)?,
            None => {
                let mut tables = self.state.tables.lock().expect("mock tables lock");
                apply(&mut tables, sql, &pairs)?
            }
        };

        self.state
            .journal
            .lock()
            .expect("mock journal lock")
            .push(sql.to_string());
        Ok(outcome)
    }
}

/// Interprets one statement against the given table state.
fn apply(
    tables: &mut HashMap<String, Vec<Row>>,
    sql: &str,
    pairs: &[(String, Value)],
) -> Result<MockOutcome> {
    let verb = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();

    match verb.as_str() {
        "SELECT" => {
            let rows = match table_after(sql, "FROM") {
                Some(table) => tables
                    .get(&table)
                    .map(|rows| {
                        rows.iter()
                            .filter(|row| matches(row, pairs))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            let affected = rows.len() as u64;
            Ok(MockOutcome { rows, affected })
        }
        "INSERT" => {
            let table = table_after(sql, "INTO")
                .ok_or_else(|| StashError::execution("INSERT without a target table"))?;
            let inserted = expand_rows(pairs);
            let affected = inserted.len() as u64;
            tables
                .entry(table)
                .or_default()
                .extend(inserted.iter().cloned());
            Ok(MockOutcome {
                rows: inserted,
                affected,
            })
        }
        "DELETE" => {
            let table = table_after(sql, "FROM")
                .ok_or_else(|| StashError::execution("DELETE without a target table"))?;
            let rows = tables.entry(table).or_default();
            let removed: Vec<Row> = rows.iter().filter(|r| matches(r, pairs)).cloned().collect();
            rows.retain(|r| !matches(r, pairs));
            let affected = removed.len() as u64;
            Ok(MockOutcome {
                rows: removed,
                affected,
            })
        }
        "UPDATE" => {
            let table = table_after(sql, "UPDATE")
                .ok_or_else(|| StashError::execution("UPDATE without a target table"))?;
            // Parameters before WHERE assign, parameters after WHERE match.
            let (assign, criteria) = split_update_params(sql, pairs);
            let rows = tables.entry(table).or_default();
            let mut updated = Vec::new();
            for row in rows.iter_mut() {
                if matches(row, &criteria) {
                    *row = overwrite(row, &assign);
                    updated.push(row.clone());
                }
            }
            let affected = updated.len() as u64;
            Ok(MockOutcome {
                rows: updated,
                affected,
            })
        }
        // DDL and anything else is accepted and ignored.
        _ => Ok(MockOutcome {
            rows: Vec::new(),
            affected: 0,
        }),
    }
}

/// True if every (column, value) criterion matches the row.
fn matches(row: &Row, criteria: &[(String, Value)]) -> bool {
    criteria
        .iter()
        .all(|(name, value)| row.get(name) == Some(value))
}

/// Builds inserted rows from named arguments. When every value is an array of
/// one common length, the arrays are unnested element-wise into that many
/// rows (the single-round-trip bulk path); otherwise one row is inserted.
fn expand_rows(pairs: &[(String, Value)]) -> Vec<Row> {
    let lengths: Option<Vec<usize>> = pairs
        .iter()
        .map(|(_, v)| match v {
            Value::Array(items) => Some(items.len()),
            _ => None,
        })
        .collect();
    if let Some(lengths) = lengths {
        if !lengths.is_empty() && lengths.iter().all(|l| *l == lengths[0]) {
            return (0..lengths[0])
                .map(|i| {
                    Row::from_pairs(pairs.iter().map(|(name, value)| {
                        let Value::Array(items) = value else {
                            unreachable!("checked above")
                        };
                        (name.clone(), items[i].clone())
                    }))
                })
                .collect();
        }
    }
    vec![Row::from_pairs(
        pairs.iter().map(|(n, v)| (n.clone(), v.clone())),
    )]
}

/// Splits an UPDATE's parameters into SET assignments and WHERE criteria by
/// where their placeholders sit relative to the WHERE keyword.
fn split_update_params(
    sql: &str,
    pairs: &[(String, Value)],
) -> (Vec<(String, Value)>, Vec<(String, Value)>) {
    let where_pos = sql.to_uppercase().find(" WHERE ");
    let Some(where_pos) = where_pos else {
        return (pairs.to_vec(), Vec::new());
    };
    let criteria_names: Vec<String> = scan_placeholders(&sql[where_pos..])
        .into_iter()
        .map(|p| p.name)
        .collect();
    let (criteria, assign) = pairs
        .iter()
        .cloned()
        .partition(|(name, _)| criteria_names.contains(name));
    (assign, criteria)
}

/// Returns a copy of the row with the given columns overwritten or appended.
fn overwrite(row: &Row, assign: &[(String, Value)]) -> Row {
    let mut pairs: Vec<(String, Value)> = row
        .iter()
        .map(|(n, v)| (n.to_string(), v.clone()))
        .collect();
    for (name, value) in assign {
        match pairs.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.clone(),
            None => pairs.push((name.clone(), value.clone())),
        }
    }
    Row::from_pairs(pairs)
}

/// Finds the identifier following a keyword, e.g. the table after FROM.
fn table_after(sql: &str, keyword: &str) -> Option<String> {
    let mut tokens = sql.split_whitespace();
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case(keyword) {
            return tokens
                .next()
                .map(|t| t.trim_end_matches(';').trim_end_matches('(').to_string());
        }
    }
    None
}
