//! PostgreSQL schema introspection.
//!
//! Reads from `information_schema`, resolving foreign keys through
//! `constraint_column_usage`. System schemas (`pg_catalog`,
//! `information_schema`) are excluded.

use async_trait::async_trait;

use crate::db::Gateway;
use crate::error::Result;
use crate::schema::{
    escape_literal, row_opt_i64, row_opt_str, row_str, split_pattern, ColumnInfo, ForeignKeyInfo,
    PrimaryKeyInfo, SchemaIntrospector, TableInfo,
};

/// PostgreSQL-specific schema introspector.
pub struct PostgresIntrospector;

/// Builds the OR-of-equality filter restricting catalog queries to the
/// discovered table set.
fn table_filters(tables: &[TableInfo], prefix: &str) -> String {
    tables
        .iter()
        .map(|t| {
            format!(
                "({prefix}table_schema = '{}' AND {prefix}table_name = '{}')",
                escape_literal(&t.schema),
                escape_literal(&t.name)
            )
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[async_trait]
impl SchemaIntrospector for PostgresIntrospector {
    async fn tables_info(
        &self,
        gateway: &Gateway,
        pattern: Option<&str>,
    ) -> Result<Vec<TableInfo>> {
        let mut where_conditions =
            vec!["table_schema NOT IN ('pg_catalog', 'information_schema')".to_string()];
        let mut params = Vec::new();

        if let Some(pattern) = pattern {
            match split_pattern(pattern) {
                Some((schema_pattern, table_pattern)) => {
                    where_conditions
                        .push("(table_schema LIKE $1 AND table_name LIKE $2)".to_string());
                    params.push(schema_pattern);
                    params.push(table_pattern);
                }
                None => {
                    where_conditions.push(
                        "(table_name LIKE $1 OR table_schema || '.' || table_name LIKE $1)"
                            .to_string(),
                    );
                    params.push(pattern.to_string());
                }
            }
        }

        let sql = format!(
            "SELECT table_schema, table_name, table_type \
             FROM information_schema.tables \
             WHERE {} \
             ORDER BY table_schema, table_name",
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
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT table_schema, table_name, column_name, data_type, is_nullable, \
                    column_default, character_maximum_length, numeric_precision, numeric_scale \
             FROM information_schema.columns \
             WHERE ({}) \
             ORDER BY table_schema, table_name, ordinal_position",
            table_filters(tables, "")
        );

        let rows = gateway.execute_query(&sql).await?;
        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                schema: row_str(row, "table_schema"),
                table: row_str(row, "table_name"),
                column: row_str(row, "column_name"),
                data_type: row_str(row, "data_type"),
                nullable: row_str(row, "is_nullable") == "YES",
                default: row_opt_str(row, "column_default"),
                max_length: row_opt_i64(row, "character_maximum_length"),
                precision: row_opt_i64(row, "numeric_precision"),
                scale: row_opt_i64(row, "numeric_scale"),
            })
            .collect())
    }

    async fn primary_keys_info(
        &self,
        gateway: &Gateway,
        tables: &[TableInfo],
    ) -> Result<Vec<PrimaryKeyInfo>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT tc.table_schema, tc.table_name, kcu.column_name \
             FROM information_schema.table_constraints AS tc \
             JOIN information_schema.key_column_usage AS kcu \
                 ON tc.constraint_name = kcu.constraint_name \
                 AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
                 AND ({}) \
             ORDER BY tc.table_schema, tc.table_name, kcu.ordinal_position",
            table_filters(tables, "tc.")
        );

        let rows = gateway.execute_query(&sql).await?;
        Ok(rows
            .iter()
            .map(|row| PrimaryKeyInfo {
                schema: row_str(row, "table_schema"),
                table: row_str(row, "table_name"),
                column: row_str(row, "column_name"),
            })
            .collect())
    }

    async fn foreign_keys_info(
        &self,
        gateway: &Gateway,
        tables: &[TableInfo],
    ) -> Result<Vec<ForeignKeyInfo>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT tc.table_schema, tc.table_name, kcu.column_name, \
                    ccu.table_schema AS foreign_table_schema, \
                    ccu.table_name AS foreign_table_name, \
                    ccu.column_name AS foreign_column_name \
             FROM information_schema.table_constraints AS tc \
             JOIN information_schema.key_column_usage AS kcu \
                 ON tc.constraint_name = kcu.constraint_name \
                 AND tc.table_schema = kcu.table_schema \
             JOIN information_schema.constraint_column_usage AS ccu \
                 ON ccu.constraint_name = tc.constraint_name \
                 AND ccu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' \
                 AND ({})",
            table_filters(tables, "tc.")
        );

        let rows = gateway.execute_query(&sql).await?;
        Ok(rows
            .iter()
            .map(|row| ForeignKeyInfo {
                schema: row_str(row, "table_schema"),
                table: row_str(row, "table_name"),
                column: row_str(row, "column_name"),
                foreign_schema: row_str(row, "foreign_table_schema"),
                foreign_table: row_str(row, "foreign_table_name"),
                foreign_column: row_str(row, "foreign_column_name"),
            })
            .collect())
    }

    async fn list_tables_info(&self, gateway: &Gateway) -> Result<Vec<TableInfo>> {
        self.tables_info(gateway, None).await
    }
}
