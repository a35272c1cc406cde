//! Library construction tests over real directory trees.

use pretty_assertions::assert_eq;
use stashql::{BuildOptions, QueryLibrary, ResultMode, Source};

#[test]
fn test_spec_preamble_example() {
    let library = QueryLibrary::build(
        &[Source::literal(
            "-- :name get :one\nSELECT * FROM t WHERE id = :id;",
        )],
        &BuildOptions::default(),
    )
    .unwrap();

    let descriptor = library.get("<inline>", "get").unwrap();
    assert_eq!(descriptor.name, "get");
    assert_eq!(descriptor.mode, ResultMode::One);
    assert_eq!(descriptor.parameters, vec!["id"]);
}

#[test]
fn test_directory_tree_categories() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("users.sql"),
        "-- :name all :many\nSELECT * FROM users;\n",
    )
    .unwrap();
    std::fs::create_dir_all(dir.path().join("posts")).unwrap();
    std::fs::write(
        dir.path().join("posts").join("writes.sql"),
        "-- :name add :affected\nINSERT INTO posts (title) VALUES (:title);\n",
    )
    .unwrap();

    let library = QueryLibrary::from_dir(dir.path(), &BuildOptions::default()).unwrap();

    assert_eq!(library.len(), 2);
    assert!(library.get("users", "all").is_ok());
    let add = library.get("posts.writes", "add").unwrap();
    assert_eq!(add.mode, ResultMode::Affected);
    assert_eq!(add.parameters, vec!["title"]);
}

#[test]
fn test_mixed_sources() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("users.sql"),
        "-- :name all :many\nSELECT * FROM users;\n",
    )
    .unwrap();

    let library = QueryLibrary::build(
        &[
            Source::dir(dir.path()),
            Source::named_literal("extras", "-- :name ping :scalar\nSELECT 1;"),
        ],
        &BuildOptions::default(),
    )
    .unwrap();

    assert_eq!(library.len(), 2);
    assert!(library.get("extras", "ping").is_ok());
}

#[test]
fn test_file_source_uses_stem_category() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.sql");
    std::fs::write(&path, "-- :name all :many\nSELECT * FROM accounts;\n").unwrap();

    let library =
        QueryLibrary::build(&[Source::file(&path)], &BuildOptions::default()).unwrap();
    assert!(library.get("accounts", "all").is_ok());
}

#[test]
fn test_parse_error_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.sql"), "SELECT 1;\n").unwrap();

    let err = QueryLibrary::from_dir(dir.path(), &BuildOptions::default()).unwrap_err();
    assert!(err.to_string().contains("broken.sql"));
}

#[test]
fn test_custom_extension() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("users.psql"),
        "-- :name all :many\nSELECT * FROM users;\n",
    )
    .unwrap();

    let options = BuildOptions {
        extension: "psql".to_string(),
        ..BuildOptions::default()
    };
    let library = QueryLibrary::from_dir(dir.path(), &options).unwrap();
    assert!(library.get("users", "all").is_ok());
}
