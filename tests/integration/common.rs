//! Shared fixtures for the mock-driver tests.

use std::sync::Arc;
use stashql::{
    BuildOptions, Engine, EngineConfig, MockDriver, QueryLibrary, Row, Source, Value,
};

/// The query set most tests run against, in one "users" category.
pub const USERS_SQL: &str = "\
-- :name get_user :one
-- Fetch one user by primary key.
SELECT * FROM users WHERE id = :id;

-- :name list_users :many
SELECT * FROM users;

-- :name user_name :scalar
SELECT name FROM users WHERE id = :id;

-- :name add_user :multi
INSERT INTO users (id, name) VALUES (:id, :name);

-- :name insert_user :affected
INSERT INTO users (id, name) VALUES (:id, :name);

-- :name remove_user :affected
DELETE FROM users WHERE id = :id;

-- :name dump_users :raw
SELECT * FROM users;

-- :name add_users_bulk :affected
INSERT INTO users (id, name) SELECT unnest(:id), unnest(:name);
";

/// Builds an engine over a fresh mock driver, returning both.
pub fn mock_engine() -> (Arc<MockDriver>, Arc<Engine>) {
    mock_engine_with(EngineConfig::default(), 5)
}

/// Builds an engine with explicit config and pool capacity.
pub fn mock_engine_with(config: EngineConfig, connections: u32) -> (Arc<MockDriver>, Arc<Engine>) {
    let driver = Arc::new(MockDriver::with_connections(connections));
    let library = Arc::new(
        QueryLibrary::build(
            &[Source::named_literal("users", USERS_SQL)],
            &BuildOptions::default(),
        )
        .expect("fixture library parses"),
    );
    let engine = Arc::new(Engine::new(driver.clone(), library, config));
    (driver, engine)
}

/// One seeded user row.
pub fn user_row(id: i64, name: &str) -> Row {
    Row::from_pairs([
        ("id", Value::Int(id)),
        ("name", Value::String(name.to_string())),
    ])
}
