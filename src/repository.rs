//! Typed repository facade over one library category.
//!
//! A repository binds an engine, a category, a model type, and a default
//! serde pair, giving callers typed wrappers without re-stating the model on
//! every call. Write helpers serialize the model through the configured
//! serializer (minus its exclusion set) and bind the resulting mapping as
//! named arguments, so statement parameters line up with field names.

use crate::driver::{Row, Value};
use crate::engine::{CallOptions, Cursor, Engine};
use crate::error::Result;
use crate::normalize::Args;
use crate::serdes::{self, DeserializedRows, JsonSerde, ModelSerializer, RowDeserializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// A typed facade over one category of queries.
pub struct Repository<M> {
    engine: Arc<Engine>,
    category: String,
    serializer: Arc<dyn ModelSerializer<M>>,
    deserializer: Arc<dyn RowDeserializer<M>>,
}

impl<M> Repository<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a repository with the default serde bridge.
    pub fn new(engine: Arc<Engine>, category: impl Into<String>) -> Self {
        Self {
            engine,
            category: category.into(),
            serializer: Arc::new(JsonSerde::<M>::new()),
            deserializer: Arc::new(JsonSerde::<M>::new()),
        }
    }

    /// Replaces the repository-default serializer and deserializer.
    ///
    /// This sets the default for every call through this repository; per-call
    /// overrides via the `*_with` methods take precedence and leave the
    /// default untouched.
    pub fn with_serdes(
        mut self,
        serializer: Arc<dyn ModelSerializer<M>>,
        deserializer: Arc<dyn RowDeserializer<M>>,
    ) -> Self {
        self.serializer = serializer;
        self.deserializer = deserializer;
        self
    }

    /// The category this repository reads from.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The engine behind this repository.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Executes a `one` query and deserializes with the repository default.
    pub async fn one(&self, name: &str, args: &Args, opts: CallOptions<'_>) -> Result<M> {
        self.engine
            .one_with(&self.category, name, args, opts, self.deserializer.as_ref())
            .await
    }

    /// Executes a `one` query with a per-call deserializer override.
    pub async fn one_with<T>(
        &self,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
        deserializer: &dyn RowDeserializer<T>,
    ) -> Result<T> {
        self.engine
            .one_with(&self.category, name, args, opts, deserializer)
            .await
    }

    /// Executes a `many` query and deserializes with the repository default.
    pub async fn many(&self, name: &str, args: &Args, opts: CallOptions<'_>) -> Result<Vec<M>> {
        self.engine
            .many_with(&self.category, name, args, opts, self.deserializer.as_ref())
            .await
    }

    /// Executes a `many` query with a per-call deserializer override.
    pub async fn many_with<T>(
        &self,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
        deserializer: &dyn RowDeserializer<T>,
    ) -> Result<Vec<T>> {
        self.engine
            .many_with(&self.category, name, args, opts, deserializer)
            .await
    }

    /// Executes a `many` query as a lazy deserializing sequence.
    pub async fn many_iter(
        &self,
        name: &str,
        args: &Args,
        opts: CallOptions<'_>,
    ) -> Result<DeserializedRows<M>> {
        let rows = self.engine.many_rows(&self.category, name, args, opts).await?;
        Ok(serdes::deserialize_rows(
            name,
            rows,
            Arc::clone(&self.deserializer),
        ))
    }

    /// Executes a `scalar` query.
    pub async fn scalar(&self, name: &str, args: &Args, opts: CallOptions<'_>) -> Result<Value> {
        self.engine.scalar(&self.category, name, args, opts).await
    }

    /// Executes an `affected` query.
    pub async fn affected(&self, name: &str, args: &Args, opts: CallOptions<'_>) -> Result<u64> {
        self.engine.affected(&self.category, name, args, opts).await
    }

    /// Executes a `raw` query, bypassing the serde bridge.
    pub async fn raw(&self, name: &str, args: &Args, opts: CallOptions<'_>) -> Result<Vec<Row>> {
        self.engine.raw(&self.category, name, args, opts).await
    }

    /// Opens a cursor over a row-returning query.
    pub async fn cursor(&self, name: &str, args: &Args, opts: CallOptions<'_>) -> Result<Cursor> {
        self.engine
            .fetch_cursor(&self.category, name, args, opts)
            .await
    }

    /// Runs a write query with the model serialized as named arguments.
    ///
    /// Fields in the serializer's exclusion set (identity, server-managed
    /// timestamps) are not bound; the statement's parameters must line up
    /// with the remaining field names. Returns the affected-row count.
    pub async fn persist(&self, name: &str, model: &M, opts: CallOptions<'_>) -> Result<u64> {
        let args = self.model_args(model)?;
        self.engine
            .affected(&self.category, name, &args, opts)
            .await
    }

    /// Runs a `RETURNING`-style write query with the model serialized as
    /// named arguments, deserializing the returned row.
    pub async fn persist_returning(
        &self,
        name: &str,
        model: &M,
        opts: CallOptions<'_>,
    ) -> Result<M> {
        let args = self.model_args(model)?;
        self.engine
            .one_with(&self.category, name, &args, opts, self.deserializer.as_ref())
            .await
    }

    /// Runs a `multi` query once per model, inside one transaction.
    pub async fn persist_many(
        &self,
        name: &str,
        models: &[M],
        opts: CallOptions<'_>,
    ) -> Result<u64> {
        let batches = models
            .iter()
            .map(|model| self.model_args(model))
            .collect::<Result<Vec<_>>>()?;
        self.engine
            .multi(&self.category, name, &batches, opts)
            .await
    }

    /// Submits every model in one round trip, for array-taking statements.
    pub async fn persist_bulk(
        &self,
        name: &str,
        models: &[M],
        opts: CallOptions<'_>,
    ) -> Result<u64> {
        let batches = models
            .iter()
            .map(|model| self.model_args(model))
            .collect::<Result<Vec<_>>>()?;
        self.engine.bulk(&self.category, name, &batches, opts).await
    }

    fn model_args(&self, model: &M) -> Result<Args> {
        Ok(Args::Named(self.serializer.serialize(model)?))
    }
}
