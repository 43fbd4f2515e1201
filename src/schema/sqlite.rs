//! SQLite schema introspection.
//!
//! Uses `sqlite_master` filtered to tables and views (excluding `sqlite_%`
//! internals) plus `PRAGMA table_info` / `PRAGMA foreign_key_list`. The CSV
//! gateway reuses this introspector against its embedded engine.

use async_trait::async_trait;

use crate::db::Gateway;
use crate::error::Result;
use crate::schema::{
    row_i64, row_opt_str, row_str, ColumnInfo, ForeignKeyInfo, PrimaryKeyInfo, SchemaIntrospector,
    TableInfo,
};

/// SQLite-specific schema introspector.
pub struct SqliteIntrospector;

/// Quotes an identifier for use inside a PRAGMA call.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl SchemaIntrospector for SqliteIntrospector {
    async fn tables_info(
        &self,
        gateway: &Gateway,
        pattern: Option<&str>,
    ) -> Result<Vec<TableInfo>> {
        let mut where_conditions = vec![
            "type IN ('table', 'view')".to_string(),
            "name NOT LIKE 'sqlite_%'".to_string(),
        ];
        let mut params = Vec::new();

        if let Some(pattern) = pattern {
            // SQLite has a single `main` schema; a dotted pattern filters on
            // the table part only.
            let table_pattern = pattern
                .split_once('.')
                .map(|(_, t)| t.to_string())
                .unwrap_or_else(|| pattern.to_string());
            where_conditions.push("name LIKE ?".to_string());
            params.push(table_pattern);
        }

        let sql = format!(
            "SELECT 'main' AS table_schema, name AS table_name, type AS table_type \
             FROM sqlite_master \
             WHERE {} \
             ORDER BY name",
            where_conditions.join(" AND ")
        );

        let rows = gateway.execute_query_bound(&sql, &params).await?;
        Ok(rows
            .iter()
            .map(|row| TableInfo {
                schema: row_str(row, "table_schema"),
                name: row_str(row, "table_name"),
                kind: row_str(row, "table_type"),
            })
            .collect())
    }

    async fn columns_info(
        &self,
        gateway: &Gateway,
        tables: &[TableInfo],
    ) -> Result<Vec<ColumnInfo>> {
        let mut columns = Vec::new();

        for table in tables {
            let pragma = format!("PRAGMA table_info({})", quote_ident(&table.name));
            let rows = gateway.execute_query(&pragma).await?;

            for row in &rows {
                columns.push(ColumnInfo {
                    schema: "main".to_string(),
                    table: table.name.clone(),
                    column: row_str(row, "name"),
                    data_type: row_str(row, "type"),
                    nullable: row_i64(row, "notnull") == 0,
                    default: row_opt_str(row, "dflt_value"),
                    max_length: None,
                    precision: None,
                    scale: None,
                });
            }
        }

        Ok(columns)
    }

    async fn primary_keys_info(
        &self,
        gateway: &Gateway,
        tables: &[TableInfo],
    ) -> Result<Vec<PrimaryKeyInfo>> {
        let mut primary_keys = Vec::new();

        for table in tables {
            let pragma = format!("PRAGMA table_info({})", quote_ident(&table.name));
            let rows = gateway.execute_query(&pragma).await?;

            for row in &rows {
                if row_i64(row, "pk") > 0 {
                    primary_keys.push(PrimaryKeyInfo {
                        schema: "main".to_string(),
                        table: table.name.clone(),
                        column: row_str(row, "name"),
                    });
                }
            }
        }

        Ok(primary_keys)
    }

    async fn foreign_keys_info(
        &self,
        gateway: &Gateway,
        tables: &[TableInfo],
    ) -> Result<Vec<ForeignKeyInfo>> {
        let mut foreign_keys = Vec::new();

        for table in tables {
            let pragma = format!("PRAGMA foreign_key_list({})", quote_ident(&table.name));
            let rows = gateway.execute_query(&pragma).await?;

            for row in &rows {
                foreign_keys.push(ForeignKeyInfo {
                    schema: "main".to_string(),
                    table: table.name.clone(),
                    column: row_str(row, "from"),
                    foreign_schema: "main".to_string(),
                    foreign_table: row_str(row, "table"),
                    foreign_column: row_str(row, "to"),
                });
            }
        }

        Ok(foreign_keys)
    }

    async fn list_tables_info(&self, gateway: &Gateway) -> Result<Vec<TableInfo>> {
        self.tables_info(gateway, None).await
    }
}
