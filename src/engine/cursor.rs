//! Scoped cursors over row-returning queries.
//!
//! A cursor is a connection-scoped resource: it holds its own pooled
//! connection (and transaction) open from `fetch_cursor` until `close`.
//! Rows advance forward only and the cursor is not restartable; consuming
//! the result again requires a fresh fetch. Advancing after close is an
//! error.

use super::{CallOptions, Connection, Engine};
use crate::driver::Row;
use crate::error::{Result, StashError};
use crate::normalize::Args;
use crate::serdes::{JsonSerde, RowDeserializer};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use tracing::warn;

impl Engine {
    /// Opens a cursor over a row-returning query (`many` or `raw` mode).
    ///
    /// The cursor always runs on its own pool-acquired connection; passing a
    /// caller-supplied connection is an error, since the cursor would pin it
    /// across unrelated calls. With `rollback` set, the close rolls the
    /// cursor's transaction back instead of committing.
    pub async fn fetch_cursor(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Cursor> {
        let (descriptor, sql) = self.prepared(category, name)?;
        if !descriptor.mode.supports_cursor() {
            return Err(StashError::cursor(format!(
                "query '{name}' is declared ':{}', which has no cursor variant",
                descriptor.mode
            )));
        }
        if opts.connection.is_some() {
            return Err(StashError::cursor(
                "cursors acquire their own pooled connection",
            ));
        }
        let bound = self.bind(descriptor, args, &opts)?;
        let (mut scope, timeout) = self.open_scope(&descriptor.name, opts).await?;
        let rows = match Self::bounded_fetch(&mut scope, timeout, sql, &bound).await {
            Ok(rows) => rows,
            Err(error) => return Self::finish(scope, Err(error)).await,
        };
        let (conn, tx_open, force_rollback, query) = scope.into_owned()?;
        Ok(Cursor {
            conn: Some(conn),
            rows: rows.into(),
            tx_open,
            force_rollback,
            closed: false,
            query,
        })
    }
}

/// A scoped, lazily-advancing row source. Finite, forward-only, and valid
/// only until [`Cursor::close`].
pub struct Cursor {
    conn: Option<Connection>,
    rows: VecDeque<Row>,
    tx_open: bool,
    force_rollback: bool,
    closed: bool,
    query: String,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("connected", &self.conn.is_some())
            .field("rows", &self.rows)
            .field("tx_open", &self.tx_open)
            .field("force_rollback", &self.force_rollback)
            .field("closed", &self.closed)
            .field("query", &self.query)
            .finish()
    }
}

impl Cursor {
    /// Advances to the next row.
    ///
    /// Returns `None` once the result set is exhausted; fails if the cursor
    /// has been closed.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.closed {
            return Err(StashError::cursor(format!(
                "cursor for query '{}' was advanced after close",
                self.query
            )));
        }
        Ok(self.rows.pop_front())
    }

    /// Advances to the next row and deserializes it with the default bridge.
    pub async fn next_as<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.next().await? {
            Some(row) => JsonSerde::new().deserialize(&self.query, &row).map(Some),
            None => Ok(None),
        }
    }

    /// Advances to the next row with an explicit deserializer override.
    pub async fn next_with<T>(
        &mut self,
        deserializer: &dyn RowDeserializer<T>,
    ) -> Result<Option<T>> {
        match self.next().await? {
            Some(row) => deserializer.deserialize(&self.query, &row).map(Some),
            None => Ok(None),
        }
    }

    /// Rows not yet consumed.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    /// True once [`Cursor::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Consumes the cursor as a cooperative stream of rows.
    ///
    /// The cursor closes itself (settling its transaction) when the stream is
    /// exhausted; dropping the stream early abandons the cursor as a plain
    /// drop would.
    pub fn into_stream(self) -> impl futures::Stream<Item = Result<Row>> {
        futures::stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(row)) => Some((Ok(row), cursor)),
                Ok(None) => {
                    if let Err(error) = cursor.close().await {
                        return Some((Err(error), cursor));
                    }
                    None
                }
                Err(error) => Some((Err(error), cursor)),
            }
        })
    }

    /// Closes the cursor: settles its transaction (commit, or rollback when
    /// forced) and releases the connection back to the pool. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.rows.clear();
        if let Some(mut conn) = self.conn.take() {
            if self.tx_open {
                if self.force_rollback {
                    conn.rollback().await?;
                } else {
                    conn.commit().await?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if !self.closed && self.conn.is_some() {
            // The connection still returns to the pool on drop; only the
            // explicit transaction settlement is lost.
            warn!(
                query = %self.query,
                "cursor dropped without close; its transaction is abandoned"
            );
        }
    }
}
