//! Transaction scoping, forced rollback, and error-path rollback tests.

use super::common::{mock_engine, user_row};
use pretty_assertions::assert_eq;
use stashql::{Args, CallOptions, Value};

#[tokio::test]
async fn test_commit_on_normal_completion() {
    let (driver, engine) = mock_engine();

    engine
        .affected(
            "users",
            "insert_user",
            &Args::named([("id", Value::Int(1)), ("name", Value::from("a"))]),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(driver.table("users").len(), 1);
}

#[tokio::test]
async fn test_forced_rollback_returns_data_but_persists_nothing() {
    let (driver, engine) = mock_engine();

    // Dry-run insert: the affected count reflects the transient write.
    let affected = engine
        .affected(
            "users",
            "insert_user",
            &Args::named([("id", Value::Int(1)), ("name", Value::from("a"))]),
            CallOptions::default().forced_rollback(),
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    // Verified by an independent read outside the rolled-back transaction.
    let rows = engine
        .many_rows("users", "list_users", &Args::none(), CallOptions::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert!(driver.table("users").is_empty());
}

#[tokio::test]
async fn test_execution_error_rolls_back_and_reraises() {
    let (driver, engine) = mock_engine();
    driver.fail_next("duplicate key value violates unique constraint");

    let err = engine
        .affected(
            "users",
            "insert_user",
            &Args::named([("id", Value::Int(1)), ("name", Value::from("a"))]),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    // The driver error surfaces unchanged, after rollback.
    assert_eq!(err.category(), "Execution Error");
    assert!(err.to_string().contains("duplicate key"));
    assert!(driver.table("users").is_empty());
    assert_eq!(engine.pool_status().idle, 5);
}

#[tokio::test]
async fn test_multi_is_atomic_on_error() {
    let (driver, engine) = mock_engine();
    // First insert succeeds, second fails; the transaction rolls back both.
    driver.fail_after(1, "constraint violation");

    let batches = vec![
        Args::named([("id", Value::Int(1)), ("name", Value::from("a"))]),
        Args::named([("id", Value::Int(2)), ("name", Value::from("b"))]),
    ];
    let err = engine
        .multi("users", "add_user", &batches, CallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "Execution Error");
    assert!(driver.table("users").is_empty());
}

#[tokio::test]
async fn test_caller_supplied_connection_spans_calls() {
    let (driver, engine) = mock_engine();

    let mut conn = engine.acquire().await.unwrap();
    conn.begin().await.unwrap();

    engine
        .affected(
            "users",
            "insert_user",
            &Args::named([("id", Value::Int(1)), ("name", Value::from("a"))]),
            CallOptions::default().on(&mut conn).with_transaction(false),
        )
        .await
        .unwrap();
    engine
        .affected(
            "users",
            "insert_user",
            &Args::named([("id", Value::Int(2)), ("name", Value::from("b"))]),
            CallOptions::default().on(&mut conn).with_transaction(false),
        )
        .await
        .unwrap();

    // Nothing published until the caller commits its own transaction.
    assert!(driver.table("users").is_empty());
    conn.commit().await.unwrap();
    assert_eq!(driver.table("users").len(), 2);
}

#[tokio::test]
async fn test_caller_connection_is_not_released_by_the_engine() {
    let (_driver, engine) = mock_engine();

    let mut conn = engine.acquire().await.unwrap();
    assert_eq!(engine.pool_status().idle, 4);

    engine
        .many_rows(
            "users",
            "list_users",
            &Args::none(),
            CallOptions::default().on(&mut conn),
        )
        .await
        .unwrap();

    // Still held by the caller after the call completes.
    assert_eq!(engine.pool_status().idle, 4);
    drop(conn);
    assert_eq!(engine.pool_status().idle, 5);
}

#[tokio::test]
async fn test_autocommit_disables_implicit_transaction() {
    let (driver, engine) = super::common::mock_engine_with(
        stashql::EngineConfig {
            autocommit: true,
            ..stashql::EngineConfig::default()
        },
        5,
    );
    driver.seed("users", vec![user_row(1, "Alice")]);

    // With autocommit there is no BEGIN, so the mock applies directly.
    engine
        .affected(
            "users",
            "remove_user",
            &Args::named([("id", 1i64)]),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert!(driver.table("users").is_empty());
}
