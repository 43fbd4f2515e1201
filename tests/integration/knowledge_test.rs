//! Knowledge store integration tests.

use sqlsaber::knowledge::{KnowledgeEntry, KnowledgeStore};

async fn open_store(dir: &tempfile::TempDir) -> KnowledgeStore {
    KnowledgeStore::open(dir.path().join("knowledge.db"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_schema_create_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(&dir).await;
        let entry = KnowledgeEntry::new("db", "persisted", "survives reopen").unwrap();
        store.add(&entry).await.unwrap();
        store.close().await;
    }

    // Reopening the same file runs the schema DDL again and must not lose data.
    let store = open_store(&dir).await;
    let all = store.list_all("db").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "persisted");

    let found = store.search("db", "reopen", 10).await.unwrap();
    assert_eq!(found.len(), 1);
    store.close().await;
}

#[tokio::test]
async fn test_update_keeps_fts_in_sync() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let mut entry = KnowledgeEntry::new("db", "orders metric", "counts orders").unwrap();
    store.add(&entry).await.unwrap();

    entry.description = "tracks quarterly shipments".to_string();
    entry.updated_at += 1.0;
    assert!(store.update(&entry).await.unwrap());

    // The old text no longer matches; the new text does.
    assert!(store.search("db", "counts", 10).await.unwrap().is_empty());
    let found = store.search("db", "shipments", 10).await.unwrap();
    assert_eq!(found.len(), 1);
    store.close().await;
}

#[tokio::test]
async fn test_remove_drops_from_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let entry = KnowledgeEntry::new("db", "ephemeral", "soon gone").unwrap();
    store.add(&entry).await.unwrap();
    assert_eq!(store.search("db", "ephemeral", 10).await.unwrap().len(), 1);

    store.remove("db", &entry.id).await.unwrap();
    assert!(store.search("db", "ephemeral", 10).await.unwrap().is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_search_limit_caps_results() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    for i in 0..5 {
        let entry =
            KnowledgeEntry::new("db", format!("widget {i}"), "a widget description").unwrap();
        store.add(&entry).await.unwrap();
    }

    let found = store.search("db", "widget", 3).await.unwrap();
    assert_eq!(found.len(), 3);
    store.close().await;
}

#[tokio::test]
async fn test_explicit_operators_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let keep = KnowledgeEntry::new("db", "daily revenue", "sum per day").unwrap();
    let skip = KnowledgeEntry::new("db", "daily signups", "count per day").unwrap();
    store.add(&keep).await.unwrap();
    store.add(&skip).await.unwrap();

    let found = store
        .search("db", "daily AND revenue", 10)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, keep.id);
    store.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_database_file_is_user_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    store.close().await;
}
