//! Database schema introspection with caching.
//!
//! Dialect-specific introspectors extract tables, columns, primary keys, and
//! foreign keys; `SchemaManager` fronts them with a TTL cache keyed by the
//! request pattern. The cache is per-manager (per-gateway), never global, so
//! multi-database processes do not cross-pollute.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlIntrospector;
pub use postgres::PostgresIntrospector;
pub use sqlite::SqliteIntrospector;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::db::{DatabaseKind, Gateway, Row};
use crate::error::Result;

/// Full schema map: `schema.table` → table details, in discovery order.
pub type SchemaInfo = IndexMap<String, TableSchema>;

/// Structured details for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub schema: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub columns: IndexMap<String, ColumnSchema>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
}

/// Structured details for one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<i64>,
}

/// A foreign-key reference from one column to another table's column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub column: String,
    pub references: ForeignKeyTarget,
}

/// Target side of a foreign key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyTarget {
    pub table: String,
    pub column: String,
}

/// Basic listing of user tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableListing {
    pub tables: Vec<TableRef>,
    pub total_tables: usize,
}

/// One entry in a table listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
    pub full_name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Raw table identity produced by the introspectors.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub kind: String,
}

impl TableInfo {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Raw column record produced by the introspectors.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub max_length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
}

/// Raw primary-key record produced by the introspectors.
#[derive(Debug, Clone)]
pub struct PrimaryKeyInfo {
    pub schema: String,
    pub table: String,
    pub column: String,
}

/// Raw foreign-key record produced by the introspectors.
#[derive(Debug, Clone)]
pub struct ForeignKeyInfo {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub foreign_schema: String,
    pub foreign_table: String,
    pub foreign_column: String,
}

/// Dialect-specific metadata extraction.
///
/// The column/key queries are restricted to the table set discovered first,
/// which bounds the work for pattern-filtered requests.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn tables_info(
        &self,
        gateway: &Gateway,
        pattern: Option<&str>,
    ) -> Result<Vec<TableInfo>>;

    async fn columns_info(
        &self,
        gateway: &Gateway,
        tables: &[TableInfo],
    ) -> Result<Vec<ColumnInfo>>;

    async fn primary_keys_info(
        &self,
        gateway: &Gateway,
        tables: &[TableInfo],
    ) -> Result<Vec<PrimaryKeyInfo>>;

    async fn foreign_keys_info(
        &self,
        gateway: &Gateway,
        tables: &[TableInfo],
    ) -> Result<Vec<ForeignKeyInfo>>;

    async fn list_tables_info(&self, gateway: &Gateway) -> Result<Vec<TableInfo>>;
}

/// Picks the introspector matching a gateway's dialect. CSV reuses the
/// SQLite introspector against the embedded engine.
pub fn introspector_for(kind: DatabaseKind) -> Box<dyn SchemaIntrospector> {
    match kind {
        DatabaseKind::Postgres => Box::new(PostgresIntrospector),
        DatabaseKind::MySql => Box::new(MySqlIntrospector),
        DatabaseKind::Sqlite | DatabaseKind::Csv => Box::new(SqliteIntrospector),
    }
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Schema(SchemaInfo),
    Listing(TableListing),
}

/// Manages schema introspection with a TTL cache.
pub struct SchemaManager {
    gateway: Arc<Gateway>,
    introspector: Box<dyn SchemaIntrospector>,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, CacheEntry)>>,
}

impl SchemaManager {
    /// Creates a manager with the default 15 minute TTL.
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self::with_ttl(gateway, Duration::from_secs(crate::config::DEFAULT_CACHE_TTL_SECS))
    }

    /// Creates a manager with a custom cache TTL.
    pub fn with_ttl(gateway: Arc<Gateway>, cache_ttl: Duration) -> Self {
        let introspector = introspector_for(gateway.kind());
        Self {
            gateway,
            introspector,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drops all cached entries.
    pub fn clear_schema_cache(&self) {
        self.cache
            .lock()
            .expect("schema cache lock poisoned")
            .clear();
    }

    /// Gets schema information, optionally filtered by a SQL LIKE pattern
    /// such as `public.user%` or `%order%`.
    pub async fn get_schema_info(&self, pattern: Option<&str>) -> Result<SchemaInfo> {
        let cache_key = format!("schema:{}", pattern.unwrap_or("all"));
        if let Some(CacheEntry::Schema(cached)) = self.cached(&cache_key) {
            return Ok(cached);
        }

        let schema_info = self.fetch_schema(pattern).await?;
        self.store(cache_key, CacheEntry::Schema(schema_info.clone()));
        Ok(schema_info)
    }

    /// Lists all user tables with basic information.
    pub async fn list_tables(&self) -> Result<TableListing> {
        let cache_key = "list_tables".to_string();
        if let Some(CacheEntry::Listing(cached)) = self.cached(&cache_key) {
            return Ok(cached);
        }

        let tables = self.introspector.list_tables_info(&self.gateway).await?;
        let listing = TableListing {
            total_tables: tables.len(),
            tables: tables
                .into_iter()
                .map(|t| TableRef {
                    full_name: t.full_name(),
                    schema: t.schema,
                    name: t.name,
                    kind: t.kind,
                })
                .collect(),
        };

        self.store(cache_key, CacheEntry::Listing(listing.clone()));
        Ok(listing)
    }

    fn cached(&self, key: &str) -> Option<CacheEntry> {
        let cache = self.cache.lock().expect("schema cache lock poisoned");
        match cache.get(key) {
            Some((stored_at, entry)) if stored_at.elapsed() < self.cache_ttl => {
                Some(entry.clone())
            }
            _ => None,
        }
    }

    fn store(&self, key: String, entry: CacheEntry) {
        // Last writer wins; regeneration is idempotent so races are harmless.
        self.cache
            .lock()
            .expect("schema cache lock poisoned")
            .insert(key, (Instant::now(), entry));
    }

    async fn fetch_schema(&self, pattern: Option<&str>) -> Result<SchemaInfo> {
        let tables = self
            .introspector
            .tables_info(&self.gateway, pattern)
            .await?;
        let columns = self.introspector.columns_info(&self.gateway, &tables).await?;
        let primary_keys = self
            .introspector
            .primary_keys_info(&self.gateway, &tables)
            .await?;
        let foreign_keys = self
            .introspector
            .foreign_keys_info(&self.gateway, &tables)
            .await?;

        let mut schema_info = SchemaInfo::new();
        for table in &tables {
            schema_info.insert(
                table.full_name(),
                TableSchema {
                    schema: table.schema.clone(),
                    name: table.name.clone(),
                    kind: table.kind.clone(),
                    columns: IndexMap::new(),
                    primary_keys: Vec::new(),
                    foreign_keys: Vec::new(),
                },
            );
        }

        for col in columns {
            let full_name = format!("{}.{}", col.schema, col.table);
            if let Some(table) = schema_info.get_mut(&full_name) {
                table.columns.insert(
                    col.column,
                    ColumnSchema {
                        data_type: col.data_type,
                        nullable: col.nullable,
                        default: col.default,
                        max_length: col.max_length,
                        precision: col.precision,
                        scale: col.scale,
                    },
                );
            }
        }

        for pk in primary_keys {
            let full_name = format!("{}.{}", pk.schema, pk.table);
            if let Some(table) = schema_info.get_mut(&full_name) {
                table.primary_keys.push(pk.column);
            }
        }

        for fk in foreign_keys {
            let full_name = format!("{}.{}", fk.schema, fk.table);
            if let Some(table) = schema_info.get_mut(&full_name) {
                table.foreign_keys.push(ForeignKeyRef {
                    column: fk.column,
                    references: ForeignKeyTarget {
                        table: format!("{}.{}", fk.foreign_schema, fk.foreign_table),
                        column: fk.foreign_column,
                    },
                });
            }
        }

        Ok(schema_info)
    }
}

// Row extraction helpers shared by the introspectors.

pub(crate) fn row_str(row: &Row, key: &str) -> String {
    match row.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn row_opt_str(row: &Row, key: &str) -> Option<String> {
    match row.get(key) {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

pub(crate) fn row_opt_i64(row: &Row, key: &str) -> Option<i64> {
    row.get(key).and_then(|v| v.as_i64())
}

pub(crate) fn row_i64(row: &Row, key: &str) -> i64 {
    row_opt_i64(row, key).unwrap_or(0)
}

/// Escapes a literal for interpolation into a quoted SQL string. The values
/// come back from the catalog queries, but identifiers can contain quotes.
pub(crate) fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Splits a `schema.table` pattern into its two LIKE parts, if dotted.
pub(crate) fn split_pattern(pattern: &str) -> Option<(String, String)> {
    pattern
        .split_once('.')
        .map(|(s, t)| (s.to_string(), t.to_string()))
}
