//! End-to-end tests against a live PostgreSQL database.
//!
//! These tests require a running PostgreSQL server.
//! Set DATABASE_URL to run them; they skip silently otherwise.

use std::sync::Arc;
use stashql::{
    Args, BuildOptions, CallOptions, Engine, EngineConfig, PgDriver, PoolConfig, QueryLibrary,
    Source, Value,
};

const SETUP_SQL: &str = "\
-- :name make_table :affected
CREATE TABLE IF NOT EXISTS stashql_smoke (id bigint PRIMARY KEY, label text);

-- :name drop_table :affected
DROP TABLE IF EXISTS stashql_smoke;

-- :name add :affected
INSERT INTO stashql_smoke (id, label) VALUES (:id, :label);

-- :name get :one
SELECT id, label FROM stashql_smoke WHERE id = :id;

-- :name all :many
SELECT id, label FROM stashql_smoke ORDER BY id;

-- :name label_of :scalar
SELECT label FROM stashql_smoke WHERE id = :id;
";

async fn get_test_engine() -> Option<Arc<Engine>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = PoolConfig::from_dsn(&url).ok()?;
    let driver = Arc::new(PgDriver::connect(&config).await.ok()?);
    let library = Arc::new(
        QueryLibrary::build(
            &[Source::named_literal("smoke", SETUP_SQL)],
            &BuildOptions::default(),
        )
        .ok()?,
    );
    Some(Arc::new(Engine::new(
        driver,
        library,
        EngineConfig::default(),
    )))
}

#[tokio::test]
async fn test_round_trip_against_postgres() {
    let Some(engine) = get_test_engine().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    engine
        .affected("smoke", "make_table", &Args::none(), CallOptions::default())
        .await
        .unwrap();

    engine
        .affected(
            "smoke",
            "add",
            &Args::named([("id", Value::Int(1)), ("label", Value::from("first"))]),
            CallOptions::default(),
        )
        .await
        .unwrap();

    let row = engine
        .one_row(
            "smoke",
            "get",
            &Args::named([("id", 1i64)]),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(row.get("label"), Some(&Value::String("first".into())));

    let label = engine
        .scalar(
            "smoke",
            "label_of",
            &Args::named([("id", 1i64)]),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(label, Value::String("first".into()));

    engine
        .affected("smoke", "drop_table", &Args::none(), CallOptions::default())
        .await
        .unwrap();
    engine.close().await;
}

#[tokio::test]
async fn test_forced_rollback_against_postgres() {
    let Some(engine) = get_test_engine().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    engine
        .affected("smoke", "make_table", &Args::none(), CallOptions::default())
        .await
        .unwrap();

    let affected = engine
        .affected(
            "smoke",
            "add",
            &Args::named([("id", Value::Int(77)), ("label", Value::from("ghost"))]),
            CallOptions::default().forced_rollback(),
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    // The dry-run write left no trace.
    let rows = engine
        .many_rows("smoke", "all", &Args::none(), CallOptions::default())
        .await
        .unwrap();
    assert!(rows.iter().all(|r| r.get("id") != Some(&Value::Int(77))));

    engine
        .affected("smoke", "drop_table", &Args::none(), CallOptions::default())
        .await
        .unwrap();
    engine.close().await;
}
