//! CSV-as-SQL gateway.
//!
//! Wraps the in-memory SQLite gateway: each CSV file is loaded into a raw
//! table inside an attached `csvdata` schema, and `main` exposes one view per
//! file named by the file stem. Introspection and query execution then reuse
//! the SQLite paths unchanged.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::db::{Row, SqliteGateway};
use crate::error::{Result, SaberError};

/// Rows sampled per column for type inference.
const TYPE_SAMPLE_ROWS: usize = 100;

/// CSV-backed embedded SQL gateway.
#[derive(Debug)]
pub struct CsvGateway {
    inner: SqliteGateway,
    files: Vec<PathBuf>,
}

/// Inferred storage type for a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvColumnType {
    Integer,
    Real,
    Text,
}

impl CsvColumnType {
    fn sql_name(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

impl CsvGateway {
    /// Builds the embedded engine and registers one view per CSV file.
    pub async fn connect(paths: &[PathBuf]) -> Result<Self> {
        if paths.is_empty() {
            return Err(SaberError::configuration("No CSV files provided"));
        }

        let inner = SqliteGateway::connect_memory().await?;

        // Raw data lives in an attached schema so `main` holds only the views.
        sqlx::query("ATTACH DATABASE ':memory:' AS csvdata")
            .execute(inner.pool())
            .await
            .map_err(|e| SaberError::connection(format!("Failed to attach CSV schema: {e}")))?;

        for path in paths {
            load_csv_file(&inner, path).await?;
        }

        Ok(Self {
            inner,
            files: paths.to_vec(),
        })
    }

    /// The CSV files backing this gateway.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Executes a statement against the embedded engine, always rolled back.
    pub async fn execute_query(&self, sql: &str, params: &[String]) -> Result<Vec<Row>> {
        self.inner.execute_query(sql, params).await
    }

    /// Releases the embedded engine.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

/// Loads one CSV file: infers column types, fills a raw table in `csvdata`,
/// and exposes a `main` view named by the file stem.
async fn load_csv_file(gateway: &SqliteGateway, path: &Path) -> Result<()> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            SaberError::configuration(format!("Cannot derive a view name from '{}'", path.display()))
        })?
        .to_string();

    let mut reader = ::csv::Reader::from_path(path).map_err(|e| {
        SaberError::connection(format!("Cannot read CSV file '{}': {e}", path.display()))
    })?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| SaberError::connection(format!("Cannot read CSV headers: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() {
        return Err(SaberError::connection(format!(
            "CSV file '{}' has no header row",
            path.display()
        )));
    }

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| SaberError::connection(format!("Malformed CSV record: {e}")))?;
        records.push(record);
    }

    let types = infer_column_types(&headers, &records);

    let column_defs = headers
        .iter()
        .zip(&types)
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql_name()))
        .collect::<Vec<_>>()
        .join(", ");

    let table = format!("csvdata.{}", quote_ident(&stem));
    sqlx::query(&format!("CREATE TABLE {table} ({column_defs})"))
        .execute(gateway.pool())
        .await
        .map_err(|e| SaberError::connection(format!("Failed to create table for '{stem}': {e}")))?;

    let placeholders = vec!["?"; headers.len()].join(", ");
    let insert_sql = format!("INSERT INTO {table} VALUES ({placeholders})");

    for record in &records {
        let mut query = sqlx::query(&insert_sql);
        for (i, ty) in types.iter().enumerate() {
            let raw = record.get(i).unwrap_or("").trim();
            query = bind_csv_value(query, raw, *ty);
        }
        query
            .execute(gateway.pool())
            .await
            .map_err(|e| SaberError::connection(format!("Failed to load '{stem}': {e}")))?;
    }

    sqlx::query(&format!(
        "CREATE VIEW {} AS SELECT * FROM {table}",
        quote_ident(&stem)
    ))
    .execute(gateway.pool())
    .await
    .map_err(|e| SaberError::connection(format!("Failed to create view '{stem}': {e}")))?;

    debug!(view = %stem, rows = records.len(), "Registered CSV file");
    Ok(())
}

/// Infers a storage type per column from a sample of records. A column is
/// INTEGER or REAL only when every non-empty sampled value parses as one.
fn infer_column_types(headers: &[String], records: &[::csv::StringRecord]) -> Vec<CsvColumnType> {
    (0..headers.len())
        .map(|i| {
            let mut saw_value = false;
            let mut all_int = true;
            let mut all_float = true;

            for record in records.iter().take(TYPE_SAMPLE_ROWS) {
                let raw = record.get(i).unwrap_or("").trim();
                if raw.is_empty() {
                    continue;
                }
                saw_value = true;
                if raw.parse::<i64>().is_err() {
                    all_int = false;
                }
                if raw.parse::<f64>().is_err() {
                    all_float = false;
                }
            }

            if !saw_value {
                CsvColumnType::Text
            } else if all_int {
                CsvColumnType::Integer
            } else if all_float {
                CsvColumnType::Real
            } else {
                CsvColumnType::Text
            }
        })
        .collect()
}

/// Binds one CSV cell with the column's inferred type; empty cells are NULL.
fn bind_csv_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    raw: &str,
    ty: CsvColumnType,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    if raw.is_empty() {
        return query.bind(None::<String>);
    }
    match ty {
        CsvColumnType::Integer => match raw.parse::<i64>() {
            Ok(v) => query.bind(v),
            Err(_) => query.bind(raw.to_string()),
        },
        CsvColumnType::Real => match raw.parse::<f64>() {
            Ok(v) => query.bind(v),
            Err(_) => query.bind(raw.to_string()),
        },
        CsvColumnType::Text => query.bind(raw.to_string()),
    }
}

/// Quotes an SQL identifier, escaping embedded double quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
