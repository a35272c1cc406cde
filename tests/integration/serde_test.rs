//! Serde bridge and repository facade tests.

use super::common::{mock_engine, user_row};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stashql::{
    Args, CallOptions, JsonSerde, Passthrough, Repository, Row, RowDeserializer, StashError,
    Value,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
}

#[tokio::test]
async fn test_per_call_passthrough_override_leaves_default_alone() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "Alice")]);

    // Override for one call: raw row mappings instead of objects.
    let rows: Vec<Row> = engine
        .many_with(
            "users",
            "list_users",
            &Args::none(),
            CallOptions::default(),
            &Passthrough,
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get("name"), Some(&Value::String("Alice".into())));

    // The default bridge still deserializes for other calls.
    let users: Vec<User> = engine
        .many("users", "list_users", &Args::none(), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(users[0].name, "Alice");
}

#[tokio::test]
async fn test_coercion_error_names_field_and_query() {
    let (driver, engine) = mock_engine();
    driver.seed(
        "users",
        vec![Row::from_pairs([
            ("id", Value::String("not-a-number".into())),
            ("name", Value::String("Alice".into())),
        ])],
    );

    let err = engine
        .many::<User>("users", "list_users", &Args::none(), CallOptions::default())
        .await
        .unwrap_err();

    match err {
        StashError::Coercion { query, field, .. } => {
            assert_eq!(query, "list_users");
            assert_eq!(field, "id");
        }
        other => panic!("expected a coercion error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_repository_typed_reads() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "Alice"), user_row(2, "Bob")]);
    let repo: Repository<User> = Repository::new(engine, "users");

    let user = repo
        .one("get_user", &Args::named([("id", 2i64)]), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(user.name, "Bob");

    let all = repo
        .many("list_users", &Args::none(), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_repository_persist_excludes_identity_fields() {
    let (driver, engine) = mock_engine();
    let repo: Repository<User> = Repository::new(engine, "users").with_serdes(
        // Exclude nothing so `id` binds too; the statement names both fields.
        Arc::new(JsonSerde::<User>::without_exclusions()),
        Arc::new(JsonSerde::<User>::new()),
    );

    let user = User {
        id: 9,
        name: "Niner".into(),
    };
    let affected = repo
        .persist("insert_user", &user, CallOptions::default())
        .await
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(
        driver.table("users")[0].get("name"),
        Some(&Value::String("Niner".into()))
    );
}

#[tokio::test]
async fn test_repository_persist_many() {
    let (driver, engine) = mock_engine();
    let repo: Repository<User> = Repository::new(engine, "users").with_serdes(
        Arc::new(JsonSerde::<User>::without_exclusions()),
        Arc::new(JsonSerde::<User>::new()),
    );

    let users = vec![
        User { id: 1, name: "a".into() },
        User { id: 2, name: "b".into() },
        User { id: 3, name: "c".into() },
    ];
    let executed = repo
        .persist_many("add_user", &users, CallOptions::default())
        .await
        .unwrap();
    assert_eq!(executed, 3);
    assert_eq!(driver.table("users").len(), 3);
}

#[tokio::test]
async fn test_repository_default_exclusions_drop_id() {
    let (_driver, engine) = mock_engine();
    // Default serde excludes `id`, so a statement binding :id cannot be
    // satisfied from the model alone.
    let repo: Repository<User> = Repository::new(engine, "users");

    let user = User {
        id: 1,
        name: "a".into(),
    };
    let err = repo
        .persist("insert_user", &user, CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StashError::MissingParameter { .. }));
}

#[tokio::test]
async fn test_repository_lazy_iteration() {
    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(1, "a"), user_row(2, "b")]);
    let repo: Repository<User> = Repository::new(engine, "users");

    let mut iter = repo
        .many_iter("list_users", &Args::none(), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(iter.remaining(), 2);
    assert_eq!(iter.next().unwrap().unwrap().name, "a");
    assert_eq!(iter.next().unwrap().unwrap().name, "b");
    assert!(iter.next().is_none());
}

#[tokio::test]
async fn test_custom_deserializer_per_repository() {
    struct NameOnly;
    impl RowDeserializer<User> for NameOnly {
        fn deserialize(&self, _query: &str, row: &Row) -> stashql::Result<User> {
            Ok(User {
                id: 0,
                name: row
                    .get("name")
                    .map(|v| v.to_display_string())
                    .unwrap_or_default(),
            })
        }
    }

    let (driver, engine) = mock_engine();
    driver.seed("users", vec![user_row(5, "Eve")]);
    let repo: Repository<User> = Repository::new(engine, "users").with_serdes(
        Arc::new(JsonSerde::<User>::new()),
        Arc::new(NameOnly),
    );

    let user = repo
        .one("get_user", &Args::named([("id", 5i64)]), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(user, User { id: 0, name: "Eve".into() });
}
