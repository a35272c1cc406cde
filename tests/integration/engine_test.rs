//! Engine mode-dispatch tests against the mock driver.

use super::common::{mock_engine, user_row};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use stashql::{Args, CallArgs, CallOptions, Outcome, StashError, Value};

#[derive(Debug, PartialEq, Deserialize)]
struct User {
    id: i64,
    name: String,
}

#[tokio::test]
async fn test_one_returns_deserialized_row() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "Alice"), user_row(2, "Bob")]);

    let user: User = engine
        .one(
            "users",
            "get_user",
            &Args::named([("id", 1i64)]),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        user,
        User {
            id: 1,
            name: "Alice".into(),
        }
    );
}

#[tokio::test]
async fn test_one_zero_rows_is_not_found() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "Alice")]);

    let err = engine
        .one::<User>(
            "users",
            "get_user",
            &Args::named([("id", 999i64)]),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StashError::NotFound { .. }));
    assert_eq!(err.category(), "Not Found");
}

#[tokio::test]
async fn test_many_with_zero_rows_is_empty_not_error() {
    let (_driver, engine) = mock_engine();

    let users: Vec<User> = engine
        .many("users", "list_users", &Args::none(), CallOptions::default())
        .await
        .unwrap();

    assert!(users.is_empty());
}

#[tokio::test]
async fn test_many_returns_all_rows() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "Alice"), user_row(2, "Bob")]);

    let users: Vec<User> = engine
        .many("users", "list_users", &Args::none(), CallOptions::default())
        .await
        .unwrap();

    assert_eq!(users.len(), 2);
    assert_eq!(users[0].name, "Alice");
}

#[tokio::test]
async fn test_scalar_returns_first_column() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(3, "Carol")]);

    // The scalar statement selects `name`, but the mock returns whole rows;
    // the engine takes the first column, which is `id` in seeded order.
    let value = engine
        .scalar(
            "users",
            "user_name",
            &Args::named([("id", 3i64)]),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(value, Value::Int(3));
}

#[tokio::test]
async fn test_scalar_zero_rows_is_not_found() {
    let (_driver, engine) = mock_engine();

    let err = engine
        .scalar(
            "users",
            "user_name",
            &Args::named([("id", 1i64)]),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StashError::NotFound { .. }));
}

#[tokio::test]
async fn test_affected_zero_matches_returns_zero() {
    let (_driver, engine) = mock_engine();

    let affected = engine
        .affected(
            "users",
            "remove_user",
            &Args::named([("id", 42i64)]),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(affected, 0);
}

#[tokio::test]
async fn test_multi_executes_once_per_argument_set() {
    let (driver, engine) = mock_engine();

    let batches = vec![
        Args::named([("id", Value::Int(1)), ("name", Value::from("a"))]),
        Args::named([("id", Value::Int(2)), ("name", Value::from("b"))]),
        Args::named([("id", Value::Int(3)), ("name", Value::from("c"))]),
    ];
    let executed = engine
        .multi("users", "add_user", &batches, CallOptions::default())
        .await
        .unwrap();
    assert_eq!(executed, 3);

    // Verified by an independent subsequent read.
    let users: Vec<User> = engine
        .many("users", "list_users", &Args::none(), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(users.len(), 3);
    assert_eq!(driver.journal().len(), 4);
}

#[tokio::test]
async fn test_raw_bypasses_deserialization() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "Alice")]);

    let rows = engine
        .raw("users", "dump_users", &Args::none(), CallOptions::default())
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::String("Alice".into())));
}

#[tokio::test]
async fn test_bulk_single_round_trip() {
    let (driver, engine) = mock_engine();

    let batches = vec![
        Args::named([("id", Value::Int(1)), ("name", Value::from("a"))]),
        Args::named([("id", Value::Int(2)), ("name", Value::from("b"))]),
        Args::named([("id", Value::Int(3)), ("name", Value::from("c"))]),
    ];
    let affected = engine
        .bulk("users", "add_users_bulk", &batches, CallOptions::default())
        .await
        .unwrap();

    assert_eq!(affected, 3);
    assert_eq!(driver.table("users").len(), 3);
    // One INSERT statement, not three.
    let inserts = driver
        .journal()
        .into_iter()
        .filter(|sql| sql.starts_with("INSERT"))
        .count();
    assert_eq!(inserts, 1);
}

#[tokio::test]
async fn test_invoke_dispatches_by_declared_mode() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "Alice")]);

    let outcome = engine
        .invoke(
            "users",
            "get_user",
            CallArgs::Single(Args::named([("id", 1i64)])),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::One(_)));

    let outcome = engine
        .invoke(
            "users",
            "list_users",
            CallArgs::Single(Args::none()),
            CallOptions::default(),
        )
        .await
        .unwrap();
    let Outcome::Many(rows) = outcome else {
        panic!("expected Outcome::Many");
    };
    assert_eq!(rows.len(), 1);

    let outcome = engine
        .invoke(
            "users",
            "add_user",
            CallArgs::Batch(vec![
                Args::named([("id", Value::Int(7)), ("name", Value::from("g"))]),
                Args::named([("id", Value::Int(8)), ("name", Value::from("h"))]),
            ]),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Multi(2));
}

#[tokio::test]
async fn test_invoke_rejects_batch_for_non_multi() {
    let (_driver, engine) = mock_engine();

    let err = engine
        .invoke(
            "users",
            "list_users",
            CallArgs::Batch(vec![Args::none()]),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StashError::ModeMismatch { .. }));
}

#[tokio::test]
async fn test_mode_mismatch_is_rejected() {
    let (_driver, engine) = mock_engine();

    let err = engine
        .many::<User>(
            "users",
            "get_user",
            &Args::named([("id", 1i64)]),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StashError::ModeMismatch { .. }));
    assert_eq!(err.category(), "Binding Error");
}

#[tokio::test]
async fn test_missing_parameter_fails_before_driver_io() {
    let (driver, engine) = mock_engine();

    let err = engine
        .one::<User>("users", "get_user", &Args::none(), CallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, StashError::MissingParameter { .. }));
    // Nothing reached the driver.
    assert!(driver.journal().is_empty());
}

#[tokio::test]
async fn test_strict_mode_rejects_unexpected_parameter() {
    let (_driver, engine) = mock_engine();

    let args = Args::named([("id", Value::Int(1)), ("stray", Value::Int(2))]);
    let err = engine
        .one::<User>(
            "users",
            "get_user",
            &args,
            CallOptions::default().with_strict(true),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StashError::UnexpectedParameter { .. }));
}

#[tokio::test]
async fn test_unknown_query_is_reported() {
    let (_driver, engine) = mock_engine();

    let err = engine
        .one::<User>("users", "nope", &Args::none(), CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StashError::UnknownQuery { .. }));
}

#[tokio::test]
async fn test_concurrent_calls_do_not_interfere() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "Alice"), user_row(2, "Bob")]);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .many_rows("users", "list_users", &Args::none(), CallOptions::default())
                .await
        }));
    }
    for handle in handles {
        let rows = handle.await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
    }
    assert_eq!(engine.pool_status().idle, 5);
}
