// src/catalog.rs
// Catalog Introspector (spec.md §4.1): read-only queries against Postgres
// system catalogs for column types, primary keys, and foreign keys.
//
// Query shapes are ported from `examples/original_source/db_cleaner/pg.py`
// and `relations.py`.

use sqlx::{PgConnection, Row};

use crate::error::{CleanerError, CleanerResult};
use crate::model::{ColumnType, DeleteAction, QualifiedName};

/// Looks up the base type name of each requested column, in the order
/// `columns` was given. Fails with `CatalogMiss` if any column is absent.
pub async fn column_types(
    conn: &mut PgConnection,
    table: &QualifiedName,
    columns: &[String],
) -> CleanerResult<Vec<ColumnType>> {
    let regclass = table.qualified();
    let rows = sqlx::query(
        r#"
        SELECT a.attname AS column_name, t.typname AS type_name
        FROM pg_attribute a
        JOIN pg_type t ON t.oid = a.atttypid
        WHERE a.attrelid = $1::regclass
          AND a.attname = ANY($2)
          AND a.attnum > 0
          AND NOT a.attisdropped
        "#,
    )
    .bind(&regclass)
    .bind(columns)
    .fetch_all(&mut *conn)
    .await?;

    let mut found: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for row in &rows {
        let col: String = row.try_get("column_name")?;
        let ty: String = row.try_get("type_name")?;
        found.insert(col, ty);
    }

    columns
        .iter()
        .map(|col| {
            found
                .get(col)
                .map(|ty| ColumnType {
                    column: col.clone(),
                    type_name: ty.clone(),
                })
                .ok_or_else(|| CleanerError::catalog_miss(format!("column '{col}' not found on {table}")))
        })
        .collect()
}

/// Returns the primary key columns in constrained key order, or empty if the
/// table has no primary key.
pub async fn primary_key_columns(conn: &mut PgConnection, table: &QualifiedName) -> CleanerResult<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT a.attname AS column_name
        FROM pg_index i
        JOIN pg_class c ON c.oid = i.indrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey)
        WHERE n.nspname = $1
          AND c.relname = $2
          AND i.indisprimary = TRUE
        ORDER BY array_position(i.indkey, a.attnum)
        "#,
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(|row| Ok(row.try_get::<String, _>("column_name")?)).collect()
}

/// Returns every live column of `table` in physical (`attnum`) order, the
/// order Postgres itself uses for `SELECT *` — used by the archiver to
/// snapshot full rows without the caller naming every column up front.
pub async fn all_columns(conn: &mut PgConnection, table: &QualifiedName) -> CleanerResult<Vec<ColumnType>> {
    let regclass = table.qualified();
    let rows = sqlx::query(
        r#"
        SELECT a.attname AS column_name, t.typname AS type_name
        FROM pg_attribute a
        JOIN pg_type t ON t.oid = a.atttypid
        WHERE a.attrelid = $1::regclass
          AND a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY a.attnum
        "#,
    )
    .bind(&regclass)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(ColumnType {
                column: row.try_get("column_name")?,
                type_name: row.try_get("type_name")?,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct AutoEdge {
    pub child_schema: String,
    pub child_table: String,
    pub parent_columns: Vec<String>,
    pub child_columns: Vec<String>,
    pub delete_action: DeleteAction,
    pub constraint_name: String,
}

/// Returns every foreign key constraint whose referenced table equals
/// `parent`, with the column pair in constrained order.
pub async fn foreign_keys_referencing(conn: &mut PgConnection, parent: &QualifiedName) -> CleanerResult<Vec<AutoEdge>> {
    let rows = sqlx::query(
        r#"
        SELECT
            child_ns.nspname  AS child_schema,
            child_cls.relname AS child_table,
            con.conname       AS constraint_name,
            con.confdeltype::text AS del_action,
            ARRAY(
                SELECT a.attname FROM pg_attribute a
                WHERE a.attrelid = con.conrelid AND a.attnum = ANY(con.conkey)
                ORDER BY array_position(con.conkey, a.attnum)
            ) AS child_columns,
            ARRAY(
                SELECT a.attname FROM pg_attribute a
                WHERE a.attrelid = con.confrelid AND a.attnum = ANY(con.confkey)
                ORDER BY array_position(con.confkey, a.attnum)
            ) AS parent_columns
        FROM pg_constraint con
        JOIN pg_class child_cls ON child_cls.oid = con.conrelid
        JOIN pg_namespace child_ns ON child_ns.oid = child_cls.relnamespace
        JOIN pg_class parent_cls ON parent_cls.oid = con.confrelid
        JOIN pg_namespace parent_ns ON parent_ns.oid = parent_cls.relnamespace
        WHERE con.contype = 'f'
          AND parent_ns.nspname = $1
          AND parent_cls.relname = $2
        "#,
    )
    .bind(&parent.schema)
    .bind(&parent.name)
    .fetch_all(&mut *conn)
    .await?;

    let mut edges = Vec::with_capacity(rows.len());
    for row in rows {
        let del_char: String = row.try_get("del_action")?;
        let del_action = del_char
            .chars()
            .next()
            .and_then(DeleteAction::from_pg_char)
            .unwrap_or(DeleteAction::NoAction);
        edges.push(AutoEdge {
            child_schema: row.try_get("child_schema")?,
            child_table: row.try_get("child_table")?,
            parent_columns: row.try_get("parent_columns")?,
            child_columns: row.try_get("child_columns")?,
            delete_action: del_action,
            constraint_name: row.try_get("constraint_name")?,
        });
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_action_default_is_no_action_on_unknown_letter() {
        assert_eq!(DeleteAction::from_pg_char('?'), None);
    }
}
