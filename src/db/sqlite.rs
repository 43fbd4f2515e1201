//! SQLite gateway implementation.
//!
//! Backs both on-disk SQLite databases and the CSV variant's embedded engine.
//! In-memory databases pin the pool to a single persistent connection so that
//! schema objects survive across queries.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::{Row, POOL_MAX_CONNECTIONS, POOL_MIN_CONNECTIONS};
use crate::error::{Result, SaberError};

/// SQLite database gateway.
#[derive(Debug)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Connects to an on-disk database, or an in-memory one when `path` is None.
    pub async fn connect(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .min_connections(POOL_MIN_CONNECTIONS)
                    .max_connections(POOL_MAX_CONNECTIONS)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        SaberError::connection(format!(
                            "Cannot open SQLite database '{}': {e}",
                            path.display()
                        ))
                    })?;
                debug!(path = %path.display(), "Connected to SQLite");
                Ok(Self { pool })
            }
            None => Self::connect_memory().await,
        }
    }

    /// Connects to a fresh in-memory database with one persistent connection.
    pub async fn connect_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SaberError::connection(format!("Cannot open in-memory SQLite: {e}")))?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| SaberError::connection(format!("Cannot open in-memory SQLite: {e}")))?;
        debug!("Connected to in-memory SQLite");
        Ok(Self { pool })
    }

    /// The underlying pool, for the CSV variant's setup phase.
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Executes a statement and returns rows. The surrounding transaction is
    /// always rolled back, success or failure.
    pub async fn execute_query(&self, sql: &str, params: &[String]) -> Result<Vec<Row>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SaberError::connection(format!("Failed to open transaction: {e}")))?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(param);
        }
        let result = query.fetch_all(&mut *tx).await;

        if let Err(e) = tx.rollback().await {
            warn!("Rollback failed (transaction never committed): {e}");
        }

        let rows = result.map_err(|e| {
            SaberError::query(
                e.as_database_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| e.to_string()),
            )
        })?;
        Ok(rows.iter().map(convert_row).collect())
    }

    /// Releases the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Converts a sqlx SqliteRow into an ordered column-name → JSON value map.
fn convert_row(row: &SqliteRow) -> Row {
    let mut out = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        out.insert(
            col.name().to_string(),
            convert_value(row, i, col.type_info().name()),
        );
    }
    out
}

/// Decodes a single column. SQLite typing is dynamic: expression and PRAGMA
/// columns carry no declared type, so the value's own storage class decides
/// when the declared type is absent.
fn convert_value(row: &SqliteRow, index: usize, decl_type: &str) -> serde_json::Value {
    use serde_json::Value;

    let mut hint = decl_type.to_uppercase();
    if hint.is_empty() || hint == "NULL" {
        match row.try_get_raw(index) {
            Ok(raw) => {
                if raw.is_null() {
                    return Value::Null;
                }
                hint = raw.type_info().name().to_uppercase();
            }
            Err(_) => return Value::Null,
        }
    }

    if hint.contains("INT") {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(index) {
            return Value::from(v);
        }
    }

    if hint.contains("REAL")
        || hint.contains("FLOA")
        || hint.contains("DOUB")
        || hint.contains("NUMERIC")
        || hint.contains("DECIMAL")
    {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(index) {
            return Value::from(v);
        }
    }

    if hint.contains("BOOL") {
        if let Ok(Some(v)) = row.try_get::<Option<bool>, _>(index) {
            return Value::from(v);
        }
    }

    if hint.contains("BLOB") {
        if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(index) {
            return Value::String(format!("<{} bytes>", v.len()));
        }
    }

    // TEXT and everything else decodes as a string.
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(index) {
        return Value::String(v);
    }

    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_gateway_select() {
        let gateway = SqliteGateway::connect_memory().await.unwrap();
        let rows = gateway
            .execute_query("SELECT 1 AS x, 'hi' AS y", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["x"], serde_json::json!(1));
        assert_eq!(rows[0]["y"], serde_json::json!("hi"));
        gateway.close().await;
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let gateway = SqliteGateway::connect_memory().await.unwrap();
        gateway
            .execute_query("CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();
        // The CREATE above was rolled back, so the table must not exist.
        let err = gateway
            .execute_query("SELECT * FROM t", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such table"));
        gateway.close().await;
    }

    #[tokio::test]
    async fn test_query_error_is_typed() {
        let gateway = SqliteGateway::connect_memory().await.unwrap();
        let err = gateway
            .execute_query("SELEC broken", &[])
            .await
            .unwrap_err();
        assert_eq!(err.category(), "Query Error");
        gateway.close().await;
    }
}
