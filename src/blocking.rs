//! Blocking execution mode.
//!
//! Wraps the async engine behind a dedicated runtime so callers without an
//! async context get the same behavior with the calling thread blocked for
//! the duration of each call. Outcomes are identical to cooperative mode;
//! only the waiting differs. Must not be used from inside an async runtime;
//! call the [`crate::engine::Engine`] methods directly there.

use crate::driver::{Row, Value};
use crate::engine::{CallArgs, CallOptions, Connection, Cursor, Engine, Outcome};
use crate::error::{Result, StashError};
use crate::normalize::Args;
use crate::serdes::RowDeserializer;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// A blocking facade over [`Engine`], owning its own runtime.
pub struct BlockingEngine {
    engine: Arc<Engine>,
    runtime: tokio::runtime::Runtime,
}

impl BlockingEngine {
    /// Wraps an engine, building a dedicated multi-thread runtime.
    pub fn new(engine: Arc<Engine>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| StashError::config(format!("cannot build blocking runtime: {e}")))?;
        Ok(Self { engine, runtime })
    }

    /// The wrapped async engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Blocking mirror of [`Engine::acquire`].
    pub fn acquire(&self) -> Result<Connection> {
        self.runtime.block_on(self.engine.acquire())
    }

    /// Blocking mirror of [`Engine::one`].
    pub fn one<T: DeserializeOwned>(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<T> {
        self.runtime
            .block_on(self.engine.one(category, name, args, opts))
    }

    /// Blocking mirror of [`Engine::one_with`].
    pub fn one_with<T>(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
        deserializer: &dyn RowDeserializer<T>,
    ) -> Result<T> {
        self.runtime
            .block_on(self.engine.one_with(category, name, args, opts, deserializer))
    }

    /// Blocking mirror of [`Engine::many`].
    pub fn many<T: DeserializeOwned>(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Vec<T>> {
        self.runtime
            .block_on(self.engine.many(category, name, args, opts))
    }

    /// Blocking mirror of [`Engine::many_rows`].
    pub fn many_rows(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Vec<Row>> {
        self.runtime
            .block_on(self.engine.many_rows(category, name, args, opts))
    }

    /// Blocking mirror of [`Engine::scalar`].
    pub fn scalar(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Value> {
        self.runtime
            .block_on(self.engine.scalar(category, name, args, opts))
    }

    /// Blocking mirror of [`Engine::affected`].
    pub fn affected(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<u64> {
        self.runtime
            .block_on(self.engine.affected(category, name, args, opts))
    }

    /// Blocking mirror of [`Engine::multi`].
    pub fn multi(
        &self,
        category: &str,
        name: &str,
        batches: &[Args],
        opts: CallOptions<'_>,
    ) -> Result<u64> {
        self.runtime
            .block_on(self.engine.multi(category, name, batches, opts))
    }

    /// Blocking mirror of [`Engine::raw`].
    pub fn raw(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<Vec<Row>> {
        self.runtime
            .block_on(self.engine.raw(category, name, args, opts))
    }

    /// Blocking mirror of [`Engine::bulk`].
    pub fn bulk(
        &self,
        category: &str,
        name: &str,
        batches: &[Args],
        opts: CallOptions<'_>,
    ) -> Result<u64> {
        self.runtime
            .block_on(self.engine.bulk(category, name, batches, opts))
    }

    /// Blocking mirror of [`Engine::bulk_returning`].
    pub fn bulk_returning(
        &self,
        category: &str,
        name: &str,
        batches: &[Args],
        opts: CallOptions<'_>,
    ) -> Result<Vec<Row>> {
        self.runtime
            .block_on(self.engine.bulk_returning(category, name, batches, opts))
    }

    /// Blocking mirror of [`Engine::invoke`].
    pub fn invoke(
        &self,
        category: &str,
        name: &str,
        args: CallArgs,
        opts: CallOptions<'_>,
    ) -> Result<Outcome> {
        self.runtime
            .block_on(self.engine.invoke(category, name, args, opts))
    }

    /// Blocking mirror of [`Engine::fetch_cursor`].
    pub fn fetch_cursor(
        &self,
        category: &str,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<BlockingCursor<'_>> {
        let cursor = self
            .runtime
            .block_on(self.engine.fetch_cursor(category, name, args, opts))?;
        Ok(BlockingCursor {
            cursor,
            runtime: &self.runtime,
        })
    }

    /// Blocking mirror of [`Engine::close`].
    pub fn close(&self) {
        self.runtime.block_on(self.engine.close());
    }
}

/// A blocking wrapper around [`Cursor`], tied to its engine's runtime.
pub struct BlockingCursor<'rt> {
    cursor: Cursor,
    runtime: &'rt tokio::runtime::Runtime,
}

impl BlockingCursor<'_> {
    /// Blocking mirror of [`Cursor::next`].
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        self.runtime.block_on(self.cursor.next())
    }

    /// Blocking mirror of [`Cursor::next_as`].
    pub fn next_as<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        self.runtime.block_on(self.cursor.next_as())
    }

    /// Rows not yet consumed.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Blocking mirror of [`Cursor::close`].
    pub fn close(&mut self) -> Result<()> {
        self.runtime.block_on(self.cursor.close())
    }
}
