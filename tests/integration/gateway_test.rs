//! Gateway integration tests.
//!
//! The rollback invariant is the core safety property: for any sequence of
//! `execute_query` calls, the database state after equals the state before.

use std::io::Write;
use std::path::PathBuf;

use sqlsaber::db::{ConnectionTarget, Gateway};

/// Creates a SQLite file with seeded `users` and `orders` tables. Seeding
/// goes through a direct connection because the gateway never commits.
pub async fn seeded_sqlite(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("test.db");
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true),
        )
        .await
        .unwrap();

    sqlx::raw_sql(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE orders (
             id INTEGER PRIMARY KEY,
             user_id INTEGER REFERENCES users(id),
             total REAL
         );
         INSERT INTO users (id, name) VALUES (1, 'Alice'), (2, 'Bob');
         INSERT INTO orders (id, user_id, total) VALUES (1, 1, 25.5), (2, 2, 10.0);",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    path
}

#[tokio::test]
async fn test_rollback_invariant_for_inserts() {
    let dir = tempfile::tempdir().unwrap();
    let path = seeded_sqlite(&dir).await;
    let gateway = Gateway::connect(&ConnectionTarget::Sqlite(Some(path)))
        .await
        .unwrap();

    let before = gateway
        .execute_query("SELECT count(*) AS n FROM users")
        .await
        .unwrap();

    // The insert succeeds inside its transaction, then rolls back.
    gateway
        .execute_query("INSERT INTO users (id, name) VALUES (99, 'Mallory')")
        .await
        .unwrap();

    let after = gateway
        .execute_query("SELECT count(*) AS n FROM users")
        .await
        .unwrap();
    assert_eq!(before[0]["n"], after[0]["n"]);

    let row = gateway
        .execute_query("SELECT count(*) AS n FROM users WHERE id = 99")
        .await
        .unwrap();
    assert_eq!(row[0]["n"], serde_json::json!(0));

    gateway.close().await;
}

#[tokio::test]
async fn test_malformed_sql_does_not_kill_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let path = seeded_sqlite(&dir).await;
    let gateway = Gateway::connect(&ConnectionTarget::Sqlite(Some(path)))
        .await
        .unwrap();

    let err = gateway.execute_query("SELECT nope FROM users").await;
    assert!(err.is_err());

    // The pool still serves queries.
    let rows = gateway
        .execute_query("SELECT name FROM users ORDER BY id")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], serde_json::json!("Alice"));

    gateway.close().await;
}

#[tokio::test]
async fn test_row_preserves_column_order() {
    let gateway = Gateway::connect(&ConnectionTarget::Sqlite(None))
        .await
        .unwrap();
    let rows = gateway
        .execute_query("SELECT 3 AS zulu, 1 AS alpha, 2 AS mike")
        .await
        .unwrap();
    let keys: Vec<&String> = rows[0].keys().collect();
    assert_eq!(keys, ["zulu", "alpha", "mike"]);
    gateway.close().await;
}

#[tokio::test]
async fn test_csv_target_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("cities.csv");
    let mut file = std::fs::File::create(&csv_path).unwrap();
    file.write_all(b"name,population\nBerlin,3600000\nParis,2100000\n")
        .unwrap();

    let target = ConnectionTarget::parse(csv_path.to_str().unwrap()).unwrap();
    let gateway = Gateway::connect(&target).await.unwrap();

    let rows = gateway
        .execute_query("SELECT name FROM cities WHERE population > 3000000")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], serde_json::json!("Berlin"));

    // Writes against the view's backing engine roll back too.
    let before = gateway
        .execute_query("SELECT count(*) AS n FROM cities")
        .await
        .unwrap();
    let _ = gateway
        .execute_query("INSERT INTO csvdata.cities VALUES ('Ghost', 1)")
        .await;
    let after = gateway
        .execute_query("SELECT count(*) AS n FROM cities")
        .await
        .unwrap();
    assert_eq!(before[0]["n"], after[0]["n"]);

    gateway.close().await;
}
