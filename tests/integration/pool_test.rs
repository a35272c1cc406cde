//! Pool acquisition, timeout, and leak-freedom tests.

use super::common::{mock_engine, mock_engine_with, user_row};
use pretty_assertions::assert_eq;
use std::time::Duration;
use stashql::{Args, CallOptions, EngineConfig, StashError};

#[tokio::test]
async fn test_acquire_timeout_when_pool_exhausted() {
    let (_driver, engine) = mock_engine_with(EngineConfig::default(), 1);

    let held = engine.acquire().await.unwrap();

    let err = engine
        .many_rows(
            "users",
            "list_users",
            &Args::none(),
            CallOptions::default().with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StashError::PoolTimeout(_)));
    assert_eq!(err.category(), "Resource Error");

    drop(held);
    assert_eq!(engine.pool_status().idle, 1);
}

#[tokio::test]
async fn test_acquire_timeout_does_not_leak() {
    let (_driver, engine) = mock_engine_with(EngineConfig::default(), 2);
    let before = engine.pool_status();

    let held = engine.acquire().await.unwrap();
    let also_held = engine.acquire().await.unwrap();
    let err = engine
        .many_rows(
            "users",
            "list_users",
            &Args::none(),
            CallOptions::default().with_timeout(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StashError::PoolTimeout(_)));

    drop(held);
    drop(also_held);
    // The pool reports the same availability as before the failed call.
    assert_eq!(engine.pool_status(), before);
}

#[tokio::test]
async fn test_execute_timeout_releases_connection() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "a")]);
    driver.set_latency(Some(Duration::from_millis(200)));
    let before = engine.pool_status();

    let err = engine
        .many_rows(
            "users",
            "list_users",
            &Args::none(),
            CallOptions::default().with_timeout(Duration::from_millis(30)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StashError::Timeout(_)));
    assert_eq!(err.category(), "Resource Error");
    // The abandoned connection went back; no leak.
    assert_eq!(engine.pool_status(), before);

    // The engine is still usable afterwards.
    driver.set_latency(None);
    let rows = engine
        .many_rows("users", "list_users", &Args::none(), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_pool_serves_waiters_as_connections_free_up() {
    let (driver, engine) = mock_engine_with(EngineConfig::default(), 1);
    driver.seed("users", vec![user_row(1, "a")]);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .many_rows(
                    "users",
                    "list_users",
                    &Args::none(),
                    CallOptions::default().with_timeout(Duration::from_secs(5)),
                )
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 1);
    }
    assert_eq!(engine.pool_status().idle, 1);
}
