//! Schema introspection integration tests against SQLite fixtures.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sqlsaber::db::{ConnectionTarget, Gateway};
use sqlsaber::schema::SchemaManager;

use super::gateway_test::seeded_sqlite;

async fn seeded_manager(dir: &tempfile::TempDir) -> (std::path::PathBuf, SchemaManager) {
    let path = seeded_sqlite(dir).await;
    let gateway = Arc::new(
        Gateway::connect(&ConnectionTarget::Sqlite(Some(path.clone())))
            .await
            .unwrap(),
    );
    (path, SchemaManager::new(gateway))
}

#[tokio::test]
async fn test_list_tables_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (_path, manager) = seeded_manager(&dir).await;

    let listing = manager.list_tables().await.unwrap();
    assert_eq!(listing.total_tables, 2);

    let full_names: Vec<&str> = listing
        .tables
        .iter()
        .map(|t| t.full_name.as_str())
        .collect();
    assert_eq!(full_names, ["main.orders", "main.users"]);
    assert!(listing.tables.iter().all(|t| t.kind == "table"));
}

#[tokio::test]
async fn test_schema_pattern_filters_tables() {
    let dir = tempfile::tempdir().unwrap();
    let (_path, manager) = seeded_manager(&dir).await;

    let schema = manager.get_schema_info(Some("user%")).await.unwrap();
    assert_eq!(schema.len(), 1);

    let users = &schema["main.users"];
    assert_eq!(users.schema, "main");
    assert_eq!(users.name, "users");
    assert!(users.columns["id"].data_type.to_uppercase().starts_with("INT"));
    assert!(users.columns.contains_key("name"));
    assert!(!users.columns["name"].nullable);
    assert_eq!(users.primary_keys, vec!["id"]);
}

#[tokio::test]
async fn test_foreign_keys_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let (_path, manager) = seeded_manager(&dir).await;

    let schema = manager.get_schema_info(None).await.unwrap();
    let orders = &schema["main.orders"];
    assert_eq!(orders.foreign_keys.len(), 1);
    assert_eq!(orders.foreign_keys[0].column, "user_id");
    assert_eq!(orders.foreign_keys[0].references.table, "main.users");
}

#[tokio::test]
async fn test_cache_hit_skips_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let (path, manager) = seeded_manager(&dir).await;

    let first = manager.list_tables().await.unwrap();
    assert_eq!(first.total_tables, 2);

    // Add a table behind the manager's back; within TTL the cached listing
    // must come back unchanged, proving the driver was not queried again.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(sqlx::sqlite::SqliteConnectOptions::new().filename(&path))
        .await
        .unwrap();
    sqlx::query("CREATE TABLE sneaky (id INTEGER)")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let second = manager.list_tables().await.unwrap();
    assert_eq!(second.total_tables, 2);

    // An explicit clear invalidates the cache.
    manager.clear_schema_cache();
    let third = manager.list_tables().await.unwrap();
    assert_eq!(third.total_tables, 3);
}

#[tokio::test]
async fn test_schema_cache_keyed_by_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let (_path, manager) = seeded_manager(&dir).await;

    let users_only = manager.get_schema_info(Some("user%")).await.unwrap();
    let everything = manager.get_schema_info(None).await.unwrap();
    assert_eq!(users_only.len(), 1);
    assert_eq!(everything.len(), 2);
}

#[tokio::test]
async fn test_csv_gateway_reuses_sqlite_introspection() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("plants.csv");
    let mut file = std::fs::File::create(&csv_path).unwrap();
    file.write_all(b"species,height\nfern,30\noak,2000\n").unwrap();

    let gateway = Arc::new(
        Gateway::connect(&ConnectionTarget::Csv(vec![csv_path]))
            .await
            .unwrap(),
    );
    let manager = SchemaManager::new(gateway);

    let listing = manager.list_tables().await.unwrap();
    assert_eq!(listing.total_tables, 1);
    assert_eq!(listing.tables[0].full_name, "main.plants");
    assert_eq!(listing.tables[0].kind, "view");

    let schema = manager.get_schema_info(Some("plants")).await.unwrap();
    let plants = &schema["main.plants"];
    assert!(plants.columns.contains_key("species"));
    assert!(plants.columns.contains_key("height"));
}
