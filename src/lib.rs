//! stashql - annotated SQL files as a typed, pooled query library.
//!
//! Hand-written SQL statements carry a one-line preamble naming the query and
//! its fetch modifier; stashql parses them into an immutable library, rewrites
//! parameters for the target driver, and executes each call with transaction
//! scoping against a connection pool.
//!
//! ```sql
//! -- :name get_user :one
//! SELECT * FROM users WHERE id = :id;
//! ```

pub mod blocking;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod library;
pub mod logging;
pub mod normalize;
pub mod parse;
pub mod repository;
pub mod serdes;

pub use blocking::{BlockingCursor, BlockingEngine};
pub use config::{Dialect, EngineConfig, PoolConfig};
pub use driver::{Driver, DriverConnection, MockDriver, PgDriver, PoolStatus, Row, Value};
pub use engine::{CallArgs, CallOptions, Connection, Cursor, Engine, Outcome};
pub use error::{Result, StashError};
pub use library::{BuildOptions, QueryLibrary, Source};
pub use normalize::{Args, BoundArgs, ParamStyle};
pub use parse::{QueryDescriptor, ResultMode};
pub use repository::Repository;
pub use serdes::{DeserializedRows, JsonSerde, ModelSerializer, Passthrough, RowDeserializer};
