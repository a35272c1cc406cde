//! Error types for stashql.
//!
//! Defines the main error enum used throughout the crate. Every failure mode
//! surfaces to the caller as one of these variants; nothing is recovered
//! silently. Transaction rollback is the only automatic recovery action, and
//! it always re-raises the error that triggered it.

use std::time::Duration;
use thiserror::Error;

/// Main error type for stashql operations.
#[derive(Error, Debug)]
pub enum StashError {
    /// Annotation parse errors (malformed preamble, duplicate query name,
    /// unnamed statement). Reported at library-build time, never at call time.
    #[error("Parse error in {origin}: {message}")]
    Parse { origin: String, message: String },

    /// Library configuration errors (missing source path, empty required
    /// source, invalid pool settings, unsupported dialect).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lookup of a category or query name that does not exist in the library.
    #[error("Unknown query '{name}' in category '{category}'")]
    UnknownQuery { category: String, name: String },

    /// A template parameter with no bound value. Reported before any driver
    /// I/O happens.
    #[error("Query '{query}' is missing a value for parameter '{name}'")]
    MissingParameter { query: String, name: String },

    /// A bound value with no matching template parameter, in strict mode.
    #[error("Query '{query}' got an unexpected parameter '{name}'")]
    UnexpectedParameter { query: String, name: String },

    /// A typed entry point invoked against a query declared with a different
    /// fetch modifier.
    #[error("Query '{query}' is declared ':{declared}' but was invoked as ':{invoked}'")]
    ModeMismatch {
        query: String,
        declared: &'static str,
        invoked: &'static str,
    },

    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Driver-reported execution failures (constraint violation, SQL syntax,
    /// connectivity loss mid-statement).
    #[error("Execution error: {0}")]
    Execution(String),

    /// Zero rows for a `one`/`scalar` call. Distinct from execution failure.
    #[error("Query '{query}' returned no rows")]
    NotFound { query: String },

    /// A row value that cannot be converted to the target field type.
    #[error("Query '{query}': cannot coerce column '{field}': {message}")]
    Coercion {
        query: String,
        field: String,
        message: String,
    },

    /// No pool connection became available within the acquisition timeout.
    #[error("Timed out acquiring a connection after {0:?}")]
    PoolTimeout(Duration),

    /// The call-level timeout elapsed during execute/fetch. The in-flight
    /// driver operation is abandoned and the connection released.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// Cursor misuse (advanced after close, opened on a non-cursor mode).
    #[error("Cursor error: {0}")]
    Cursor(String),

    /// Internal invariant violations (bugs).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StashError {
    /// Creates a parse error for the given source.
    pub fn parse(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an unknown-query error.
    pub fn unknown_query(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownQuery {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Creates a missing-parameter error.
    pub fn missing_parameter(query: impl Into<String>, name: impl Into<String>) -> Self {
        Self::MissingParameter {
            query: query.into(),
            name: name.into(),
        }
    }

    /// Creates an unexpected-parameter error.
    pub fn unexpected_parameter(query: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnexpectedParameter {
            query: query.into(),
            name: name.into(),
        }
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates an execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Creates a not-found error for the given query.
    pub fn not_found(query: impl Into<String>) -> Self {
        Self::NotFound {
            query: query.into(),
        }
    }

    /// Creates a coercion error naming the offending column.
    pub fn coercion(
        query: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Coercion {
            query: query.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a cursor error with the given message.
    pub fn cursor(msg: impl Into<String>) -> Self {
        Self::Cursor(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "Parse Error",
            Self::Config(_) => "Configuration Error",
            Self::UnknownQuery { .. } => "Unknown Query",
            Self::MissingParameter { .. }
            | Self::UnexpectedParameter { .. }
            | Self::ModeMismatch { .. } => "Binding Error",
            Self::Connection(_) => "Connection Error",
            Self::Execution(_) => "Execution Error",
            Self::NotFound { .. } => "Not Found",
            Self::Coercion { .. } => "Coercion Error",
            Self::PoolTimeout(_) | Self::Timeout(_) => "Resource Error",
            Self::Cursor(_) => "Cursor Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns true for errors reported before any driver I/O.
    pub fn is_binding(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter { .. }
                | Self::UnexpectedParameter { .. }
                | Self::ModeMismatch { .. }
        )
    }
}

/// Result type alias using StashError.
pub type Result<T> = std::result::Result<T, StashError>;
