//! MySQL gateway implementation.

use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::{Row, POOL_MAX_CONNECTIONS, POOL_MIN_CONNECTIONS};
use crate::error::{Result, SaberError};

/// MySQL database gateway.
#[derive(Debug)]
pub struct MySqlGateway {
    pool: MySqlPool,
}

impl MySqlGateway {
    /// Connects to the database using the given connection string.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .min_connections(POOL_MIN_CONNECTIONS)
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| SaberError::connection(format!("MySQL connection failed: {e}")))?;

        debug!("Connected to MySQL");
        Ok(Self { pool })
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

/// Converts a sqlx MySqlRow into an ordered column-name → JSON value map.
fn convert_row(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        out.insert(
            col.name().to_string(),
            convert_value(row, i, col.type_info().name()),
        );
    }
    out
}

/// Decodes a single column by its MySQL type name. Unsigned variants carry a
/// suffix in the type name, so match on the leading keyword.
fn convert_value(row: &MySqlRow, index: usize, type_name: &str) -> serde_json::Value {
    use serde_json::Value;

    let upper = type_name.to_uppercase();
    let base = upper.split_whitespace().next().unwrap_or("");

    match base {
        "BOOLEAN" | "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),

        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::from)
            .or_else(|| {
                // Unsigned BIGINT may exceed i64.
                row.try_get::<Option<u64>, _>(index)
                    .ok()
                    .flatten()
                    .map(Value::from)
            })
            .unwrap_or(Value::Null),

        "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),

        "DECIMAL" | "NEWDECIMAL" => row
            .try_get::<Option<sqlx::types::BigDecimal>, _>(index)
            .ok()
            .flatten()
            .map(|v| {
                let text = v.to_string();
                text.parse::<f64>()
                    .map(Value::from)
                    .unwrap_or(Value::String(text))
            })
            .unwrap_or(Value::Null),

        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<sqlx::types::time::PrimitiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "DATE" => row
            .try_get::<Option<sqlx::types::time::Date>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "TIME" => row
            .try_get::<Option<sqlx::types::time::Time>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(serde_json::Value::Null),

        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(format!("<{} bytes>", v.len())))
            .unwrap_or(Value::Null),

        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
