//! Per-database knowledge store with full-text search.
//!
//! One SQLite file holds named knowledge entries (text plus an optional SQL
//! snippet) for every database the user works with. An external-content FTS5
//! index over name/description/sql is kept in sync by triggers and ranked
//! with BM25.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row as SqlxRow;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SaberError};

/// Default number of search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge (
    id TEXT PRIMARY KEY,
    database_name TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    sql TEXT,
    source TEXT,
    created_at REAL NOT NULL,
    updated_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_knowledge_database_name
    ON knowledge(database_name);

CREATE INDEX IF NOT EXISTS idx_knowledge_database_updated
    ON knowledge(database_name, updated_at DESC);

CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts
USING fts5(
    name,
    description,
    sql,
    content='knowledge',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS knowledge_ai AFTER INSERT ON knowledge BEGIN
    INSERT INTO knowledge_fts(rowid, name, description, sql)
    VALUES (new.rowid, new.name, new.description, COALESCE(new.sql, ''));
END;

CREATE TRIGGER IF NOT EXISTS knowledge_ad AFTER DELETE ON knowledge BEGIN
    INSERT INTO knowledge_fts(knowledge_fts, rowid, name, description, sql)
    VALUES ('delete', old.rowid, old.name, old.description, COALESCE(old.sql, ''));
END;

CREATE TRIGGER IF NOT EXISTS knowledge_au AFTER UPDATE ON knowledge BEGIN
    INSERT INTO knowledge_fts(knowledge_fts, rowid, name, description, sql)
    VALUES ('delete', old.rowid, old.name, old.description, COALESCE(old.sql, ''));
    INSERT INTO knowledge_fts(rowid, name, description, sql)
    VALUES (new.rowid, new.name, new.description, COALESCE(new.sql, ''));
END;
"#;

/// A single knowledge entry for a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub database_name: String,
    pub name: String,
    pub description: String,
    pub sql: Option<String>,
    pub source: Option<String>,
    /// Unix seconds.
    pub created_at: f64,
    /// Unix seconds.
    pub updated_at: f64,
}

impl KnowledgeEntry {
    /// Creates a new entry with a fresh id and current timestamps.
    ///
    /// `name` and `description` must be non-empty after trimming.
    pub fn new(
        database_name: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        let description = description.into().trim().to_string();
        if name.is_empty() {
            return Err(SaberError::validation("Knowledge entry name cannot be empty"));
        }
        if description.is_empty() {
            return Err(SaberError::validation(
                "Knowledge entry description cannot be empty",
            ));
        }

        let now = unix_now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            database_name: database_name.into(),
            name,
            description,
            sql: None,
            source: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Human-readable created timestamp (UTC).
    pub fn formatted_created_at(&self) -> String {
        format_unix(self.created_at)
    }

    /// Human-readable updated timestamp (UTC).
    pub fn formatted_updated_at(&self) -> String {
        format_unix(self.updated_at)
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn format_unix(secs: f64) -> String {
    let format = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    time::OffsetDateTime::from_unix_timestamp(secs as i64)
        .ok()
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_default()
}

/// SQLite-backed knowledge store with FTS5 BM25 ranking.
pub struct KnowledgeStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// Opens the store at the default platform data path.
    pub async fn open_default() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| SaberError::storage("Could not determine data directory"))?;
        Self::open(data_dir.join("sqlsaber").join("knowledge.db")).await
    }

    /// Opens (creating if needed) the store at the given path.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            let parent_existed = parent.exists();
            std::fs::create_dir_all(parent).map_err(|e| {
                SaberError::storage(format!("Could not create knowledge directory: {e}"))
            })?;
            if !parent_existed {
                set_secure_permissions(parent, true);
            }
        }

        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| SaberError::storage(format!("Invalid knowledge db path: {e}")))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| SaberError::storage(format!("Failed to open knowledge db: {e}")))?;

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(|e| SaberError::storage(format!("Failed to initialize knowledge db: {e}")))?;

        maybe_rebuild_fts(&pool).await?;
        set_secure_permissions(&path, false);

        info!("Knowledge store opened at {}", path.display());
        Ok(Self { pool, db_path: path })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Inserts a new entry.
    pub async fn add(&self, entry: &KnowledgeEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO knowledge (id, database_name, name, description, sql, source, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.database_name)
        .bind(&entry.name)
        .bind(&entry.description)
        .bind(&entry.sql)
        .bind(&entry.source)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SaberError::storage(format!("Failed to add knowledge entry: {e}")))?;
        Ok(())
    }

    /// Gets an entry by id for a database.
    pub async fn get(&self, database_name: &str, entry_id: &str) -> Result<Option<KnowledgeEntry>> {
        let row = sqlx::query(
            "SELECT id, database_name, name, description, sql, source, created_at, updated_at \
             FROM knowledge WHERE database_name = ? AND id = ?",
        )
        .bind(database_name)
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SaberError::storage(format!("Failed to read knowledge entry: {e}")))?;

        Ok(row.map(|r| row_to_entry(&r)))
    }

    /// Updates an existing entry, refreshing `updated_at` from the value given.
    pub async fn update(&self, entry: &KnowledgeEntry) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE knowledge SET name = ?, description = ?, sql = ?, source = ?, updated_at = ? \
             WHERE database_name = ? AND id = ?",
        )
        .bind(&entry.name)
        .bind(&entry.description)
        .bind(&entry.sql)
        .bind(&entry.source)
        .bind(entry.updated_at)
        .bind(&entry.database_name)
        .bind(&entry.id)
        .execute(&self.pool)
        .await
        .map_err(|e| SaberError::storage(format!("Failed to update knowledge entry: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes an entry; returns whether anything was removed.
    pub async fn remove(&self, database_name: &str, entry_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM knowledge WHERE database_name = ? AND id = ?")
            .bind(database_name)
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SaberError::storage(format!("Failed to remove knowledge entry: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes all entries for a database; returns the deleted count.
    pub async fn clear(&self, database_name: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM knowledge WHERE database_name = ?")
            .bind(database_name)
            .execute(&self.pool)
            .await
            .map_err(|e| SaberError::storage(format!("Failed to clear knowledge: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    /// Lists all entries for a database, most recently updated first.
    pub async fn list_all(&self, database_name: &str) -> Result<Vec<KnowledgeEntry>> {
        let rows = sqlx::query(
            "SELECT id, database_name, name, description, sql, source, created_at, updated_at \
             FROM knowledge WHERE database_name = ? ORDER BY updated_at DESC",
        )
        .bind(database_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SaberError::storage(format!("Failed to list knowledge: {e}")))?;

        Ok(rows.iter().map(row_to_entry).collect())
    }

    /// Searches entries via FTS5 MATCH, ranked by BM25 then recency.
    ///
    /// Free-text tokens are joined with OR; explicit FTS operators pass
    /// through. On a malformed query the search falls back to quoted tokens;
    /// if that also fails the result is empty.
    pub async fn search(
        &self,
        database_name: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let final_query = prepare_fts_query(query);
        if final_query.is_empty() {
            return Ok(Vec::new());
        }

        let max_results = limit.max(1);
        let rows = self
            .run_fts_query(database_name, &final_query, max_results)
            .await;
        if !rows.is_empty() {
            return Ok(rows);
        }

        let fallback = quoted_token_query(query);
        if fallback.is_empty() || fallback == final_query {
            return Ok(Vec::new());
        }

        Ok(self
            .run_fts_query(database_name, &fallback, max_results)
            .await)
    }

    /// Runs one MATCH query; FTS syntax errors yield an empty result so the
    /// caller can retry with a sanitized query.
    async fn run_fts_query(
        &self,
        database_name: &str,
        query: &str,
        limit: usize,
    ) -> Vec<KnowledgeEntry> {
        let result = sqlx::query(
            "SELECT k.id, k.database_name, k.name, k.description, k.sql, k.source, \
                    k.created_at, k.updated_at \
             FROM knowledge_fts \
             JOIN knowledge AS k ON k.rowid = knowledge_fts.rowid \
             WHERE knowledge_fts MATCH ? \
               AND k.database_name = ? \
             ORDER BY bm25(knowledge_fts), k.updated_at DESC \
             LIMIT ?",
        )
        .bind(query)
        .bind(database_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(rows) => rows.iter().map(row_to_entry).collect(),
            Err(e) => {
                debug!("FTS query '{query}' failed: {e}");
                Vec::new()
            }
        }
    }

    /// Closes the backing pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> KnowledgeEntry {
    KnowledgeEntry {
        id: row.get("id"),
        database_name: row.get("database_name"),
        name: row.get("name"),
        description: row.get("description"),
        sql: row.get("sql"),
        source: row.get("source"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Rebuilds the FTS index for legacy databases where the base table has rows
/// but the index side was never populated.
async fn maybe_rebuild_fts(pool: &SqlitePool) -> Result<()> {
    let has_rows: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM knowledge LIMIT 1)")
        .fetch_one(pool)
        .await
        .map_err(|e| SaberError::storage(format!("Failed to inspect knowledge table: {e}")))?;
    if has_rows == 0 {
        return Ok(());
    }

    let needs_rebuild = match sqlx::query_scalar::<_, i64>(
        "SELECT EXISTS(SELECT 1 FROM knowledge_fts_docsize LIMIT 1)",
    )
    .fetch_one(pool)
    .await
    {
        Ok(has_docs) => has_docs == 0,
        // Unexpected FTS schema shape: safest fallback is a one-time rebuild.
        Err(_) => true,
    };

    if needs_rebuild {
        info!("Rebuilding knowledge FTS index");
        sqlx::query("INSERT INTO knowledge_fts(knowledge_fts) VALUES ('rebuild')")
            .execute(pool)
            .await
            .map_err(|e| SaberError::storage(format!("Failed to rebuild FTS index: {e}")))?;
    }

    Ok(())
}

/// Converts free-text input into OR-mode FTS terms. Queries that already use
/// FTS operators pass through unchanged.
fn prepare_fts_query(raw_query: &str) -> String {
    let stripped = raw_query.trim();
    if stripped.is_empty() {
        return String::new();
    }

    let upper = stripped.to_uppercase();
    let has_operators = [" OR ", " AND ", " NOT ", " NEAR "]
        .iter()
        .any(|op| upper.contains(op))
        || stripped.contains('"')
        || stripped.contains('(')
        || stripped.contains(')');
    if has_operators {
        return stripped.to_string();
    }

    let tokens: Vec<&str> = stripped.split_whitespace().collect();
    match tokens.len() {
        0 => String::new(),
        1 => tokens[0].to_string(),
        _ => tokens.join(" OR "),
    }
}

/// Quotes every token for the malformed-query fallback.
fn quoted_token_query(raw_query: &str) -> String {
    let quoted: Vec<String> = raw_query
        .split_whitespace()
        .map(|token| token.replace('"', ""))
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{token}\""))
        .collect();
    quoted.join(" OR ")
}

/// Restricts a path to the owning user on POSIX; no-op elsewhere and on error.
fn set_secure_permissions(path: &Path, is_directory: bool) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if is_directory { 0o700 } else { 0o600 };
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
            debug!("Could not set permissions on {}: {e}", path.display());
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (path, is_directory);
    }
}
