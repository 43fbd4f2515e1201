//! PostgreSQL gateway implementation.
//!
//! Pooled sqlx connections; every statement runs inside a transaction that is
//! rolled back on exit.

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::{Row, POOL_MAX_CONNECTIONS, POOL_MIN_CONNECTIONS};
use crate::error::{Result, SaberError};

/// PostgreSQL database gateway.
#[derive(Debug)]
pub struct PostgresGateway {
    pool: PgPool,
}

impl PostgresGateway {
    /// Connects to the database using the given connection string.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(POOL_MIN_CONNECTIONS)
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(map_connection_error)?;

        debug!("Connected to PostgreSQL");
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

        let rows = result.map_err(|e| SaberError::query(format_driver_error(&e)))?;
        Ok(rows.iter().map(convert_row).collect())
    }

    /// Releases the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Converts a sqlx PgRow into an ordered column-name → JSON value map.
fn convert_row(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        out.insert(
            col.name().to_string(),
            convert_value(row, i, col.type_info().name()),
        );
    }
    out
}

/// Decodes a single column by its Postgres type name.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> serde_json::Value {
    use serde_json::Value;

    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::from(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::from(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::from(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),

        "NUMERIC" | "DECIMAL" => row
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

        "TIMESTAMPTZ" => row
            .try_get::<Option<sqlx::types::time::OffsetDateTime>, _>(index)
            .ok()
            .flatten()
            .and_then(|v| {
                v.format(&time::format_description::well_known::Rfc3339)
                    .ok()
            })
            .map(Value::String)
            .unwrap_or(Value::Null),

        "TIMESTAMP" => row
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

        "UUID" => row
            .try_get::<Option<sqlx::types::Uuid>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(serde_json::Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(format!("<{} bytes>", v.len())))
            .unwrap_or(Value::Null),

        // For all other types, fall back to a string decode.
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error) -> SaberError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        SaberError::connection(
            "Cannot connect to the server. Check that PostgreSQL is running and reachable.",
        )
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        SaberError::connection("Authentication failed. Check your credentials.")
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        SaberError::connection("Database does not exist.")
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        SaberError::connection("Connection timed out. The server may be overloaded or unreachable.")
    } else {
        SaberError::connection(error.to_string())
    }
}

/// Formats a query error, surfacing detail and hint when the driver has them.
pub(crate) fn format_driver_error(error: &sqlx::Error) -> String {
    if let Some(db_error) = error.as_database_error() {
        let mut result = db_error.message().to_string();
        if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
            if let Some(detail) = pg_error.detail() {
                result.push_str("\n  DETAIL: ");
                result.push_str(detail);
            }
            if let Some(hint) = pg_error.hint() {
                result.push_str("\n  HINT: ");
                result.push_str(hint);
            }
        }
        result
    } else {
        error.to_string()
    }
}
