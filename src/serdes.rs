//! Serialization bridge between application objects and row mappings.
//!
//! Write queries serialize an application object into a flat column→value
//! mapping; read queries deserialize returned rows back into objects. Both
//! directions are explicit interfaces with a provided default; overrides are
//! passed per call or per repository, never discovered by inspecting the
//! object at runtime.

use crate::driver::{Row, Value};
use crate::error::{Result, StashError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// Fields excluded from write serialization by default: identity and
/// server-managed timestamp columns.
pub const DEFAULT_EXCLUDED_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Serializes an application object into a column→value mapping.
pub trait ModelSerializer<T>: Send + Sync {
    /// Produces the mapping for every mapped, non-excluded field.
    ///
    /// Deterministic: the same object state always yields the same mapping.
    fn serialize(&self, model: &T) -> Result<Vec<(String, Value)>>;
}

/// Constructs an application object from one returned row.
pub trait RowDeserializer<T>: Send + Sync {
    /// Builds one instance, coercing values to the declared field types.
    ///
    /// `query` identifies the originating query in coercion errors.
    fn deserialize(&self, query: &str, row: &Row) -> Result<T>;
}

/// The default serde bridge, routing through `serde_json`.
///
/// Serialization drops the configured exclusion set (commonly identity and
/// server-generated timestamp fields); deserialization coerces row values to
/// the target type's declared fields and reports the offending column on
/// failure.
pub struct JsonSerde<T> {
    excluded: BTreeSet<String>,
    _model: PhantomData<fn() -> T>,
}

impl<T> JsonSerde<T> {
    /// Creates a bridge with the default exclusion set.
    pub fn new() -> Self {
        Self::with_exclusions(DEFAULT_EXCLUDED_FIELDS)
    }

    /// Creates a bridge that serializes every field.
    pub fn without_exclusions() -> Self {
        Self::with_exclusions(Vec::<String>::new())
    }

    /// Creates a bridge with an explicit exclusion set.
    pub fn with_exclusions<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: fields.into_iter().map(Into::into).collect(),
            _model: PhantomData,
        }
    }

    /// Returns the configured exclusion set.
    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }
}

impl<T> Default for JsonSerde<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> ModelSerializer<T> for JsonSerde<T> {
    fn serialize(&self, model: &T) -> Result<Vec<(String, Value)>> {
        let json = serde_json::to_value(model)
            .map_err(|e| StashError::internal(format!("model is not serializable: {e}")))?;
        let serde_json::Value::Object(map) = json else {
            return Err(StashError::internal(
                "model must serialize to an object with named fields",
            ));
        };
        Ok(map
            .into_iter()
            .filter(|(name, _)| !self.excluded.contains(name))
            .map(|(name, value)| {
                let value = Value::from_json(&value);
                (name, value)
            })
            .collect())
    }
}

impl<T: DeserializeOwned> RowDeserializer<T> for JsonSerde<T> {
    fn deserialize(&self, query: &str, row: &Row) -> Result<T> {
        let map: serde_json::Map<String, serde_json::Value> = row
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect();
        match serde_json::from_value(serde_json::Value::Object(map.clone())) {
            Ok(model) => Ok(model),
            Err(error) => {
                let field =
                    locate_offending_field::<T>(&map).unwrap_or_else(|| "<unknown>".to_string());
                Err(StashError::coercion(query, field, error.to_string()))
            }
        }
    }
}

/// Finds the column a failed deserialization choked on by re-probing the row
/// with one column removed at a time: if removing a column changes the error
/// to a missing-field complaint about that very column (or makes the whole
/// row deserialize), that column held the bad value.
fn locate_offending_field<T: DeserializeOwned>(
    map: &serde_json::Map<String, serde_json::Value>,
) -> Option<String> {
    for name in map.keys() {
        let mut probe = map.clone();
        probe.remove(name);
        match serde_json::from_value::<T>(serde_json::Value::Object(probe)) {
            Ok(_) => return Some(name.clone()),
            Err(error) => {
                if error.to_string().contains(&format!("missing field `{name}`")) {
                    return Some(name.clone());
                }
            }
        }
    }
    None
}

/// A deserializer that hands rows through untouched.
///
/// Useful as a per-call override when the caller wants raw row mappings from
/// a query whose library default deserializes into application objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl RowDeserializer<Row> for Passthrough {
    fn deserialize(&self, _query: &str, row: &Row) -> Result<Row> {
        Ok(row.clone())
    }
}

/// A lazy, forward-only sequence of deserialized objects.
///
/// Wraps an already-fetched row set; each `next` deserializes one row.
/// Consuming it a second time requires a fresh fetch.
pub struct DeserializedRows<T> {
    query: String,
    rows: std::vec::IntoIter<Row>,
    deserializer: Arc<dyn RowDeserializer<T>>,
}

impl<T> DeserializedRows<T> {
    /// Number of rows not yet deserialized.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl<T> Iterator for DeserializedRows<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(self.deserializer.deserialize(&self.query, &row))
    }
}

/// Applies a row deserializer lazily across a fetched row set.
pub fn deserialize_rows<T>(
    query: impl Into<String>,
    rows: Vec<Row>,
    deserializer: Arc<dyn RowDeserializer<T>>,
) -> DeserializedRows<T> {
    DeserializedRows {
        query: query.into(),
        rows: rows.into_iter(),
        deserializer,
    }
}
