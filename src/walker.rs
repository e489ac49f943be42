// src/walker.rs
// Cascade Walker (spec.md §4.5): depth-first traversal of the relation graph
// for one batch of parent keys, projecting keys into child tuples, deleting
// (or counting) children before their parent, inside one transaction.
//
// Ported from `examples/original_source/db_cleaner/cleaner.py::cascade_delete`
// and its helpers (`count_child_matches`, `select_child_pks`, `delete_parent`,
// `fetch_needed_parent_keys`).

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use sqlx::postgres::PgArguments;
use sqlx::{Arguments, PgConnection, Row};

use crate::archiver;
use crate::catalog;
use crate::error::CleanerResult;
use crate::graph;
use crate::model::{ArchiveBuffer, CellRow, CellValue, DeleteTotals, Predicate, QualifiedName, RelationGraph};
use crate::sql_render::{quote_ident, quote_qualified, render_predicates, render_values_clause};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    DryRun,
    Execute,
}

/// Everything the walker needs that is constant for one batch's cascade, to
/// keep the recursive signature manageable.
pub struct WalkOptions<'a> {
    pub auto_discover: bool,
    pub exclude_cascade_fk: bool,
    pub skip_tables: &'a [String],
    pub skip_columns: &'a [String],
    pub mode: WalkMode,
    pub archive: bool,
}

/// Selects `select_columns` from `table` whose `key_columns` tuple is in
/// `keys`, plus any extra `conditions`. The shared shape behind
/// `select_child_pks`/`fetch_needed_parent_keys` in the original: one
/// typed-VALUES lookup, never per-row.
pub async fn select_by_keys(
    conn: &mut PgConnection,
    table: &QualifiedName,
    select_columns: &[String],
    key_columns: &[String],
    keys: &[CellRow],
    conditions: &[Predicate],
) -> CleanerResult<Vec<CellRow>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let key_types = catalog::column_types(conn, table, key_columns).await?;
    let select_types = catalog::column_types(conn, table, select_columns).await?;
    let type_names: Vec<String> = key_types.iter().map(|t| t.type_name.clone()).collect();

    let mut args = PgArguments::default();
    let values_clause = render_values_clause(keys, &type_names, &mut args);
    let key_cols_sql = key_columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let select_sql = select_columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let cond_sql = render_predicates(conditions, args.len() + 1, &mut args);

    let sql = format!(
        "SELECT {select_sql} FROM {} WHERE ({key_cols_sql}) IN (VALUES {values_clause}){cond_sql}",
        quote_qualified(&table.schema, &table.name)
    );

    let logged_values: Vec<CellValue> = keys.iter().flatten().cloned().chain(crate::sql_render::predicate_values(conditions)).collect();
    let rows = sqlx::query_with(&sql, args)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| crate::error::log_sql_error(&sql, &logged_values, e))?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut cells = Vec::with_capacity(select_types.len());
        for (idx, ty) in select_types.iter().enumerate() {
            cells.push(CellValue::decode(row, idx, &ty.type_name)?);
        }
        out.push(cells);
    }
    Ok(out)
}

/// `COUNT(*)` of rows in `table` whose `key_columns` tuple is in `keys`,
/// used only in dry-run mode.
pub async fn count_by_keys(
    conn: &mut PgConnection,
    table: &QualifiedName,
    key_columns: &[String],
    keys: &[CellRow],
    conditions: &[Predicate],
) -> CleanerResult<i64> {
    if keys.is_empty() {
        return Ok(0);
    }
    let key_types = catalog::column_types(conn, table, key_columns).await?;
    let type_names: Vec<String> = key_types.iter().map(|t| t.type_name.clone()).collect();

    let mut args = PgArguments::default();
    let values_clause = render_values_clause(keys, &type_names, &mut args);
    let key_cols_sql = key_columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let cond_sql = render_predicates(conditions, args.len() + 1, &mut args);

    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE ({key_cols_sql}) IN (VALUES {values_clause}){cond_sql}",
        quote_qualified(&table.schema, &table.name)
    );

    let logged_values: Vec<CellValue> = keys.iter().flatten().cloned().chain(crate::sql_render::predicate_values(conditions)).collect();
    let row = sqlx::query_with(&sql, args)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| crate::error::log_sql_error(&sql, &logged_values, e))?;
    Ok(row.try_get::<i64, _>(0)?)
}

/// `DELETE` of rows in `table` whose `key_columns` tuple is in `keys`,
/// returning the number of rows affected.
pub async fn delete_by_keys(
    conn: &mut PgConnection,
    table: &QualifiedName,
    key_columns: &[String],
    keys: &[CellRow],
) -> CleanerResult<u64> {
    if keys.is_empty() {
        return Ok(0);
    }
    let key_types = catalog::column_types(conn, table, key_columns).await?;
    let type_names: Vec<String> = key_types.iter().map(|t| t.type_name.clone()).collect();

    let mut args = PgArguments::default();
    let values_clause = render_values_clause(keys, &type_names, &mut args);
    let key_cols_sql = key_columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");

    let sql = format!(
        "DELETE FROM {} WHERE ({key_cols_sql}) IN (VALUES {values_clause})",
        quote_qualified(&table.schema, &table.name)
    );

    let logged_values: Vec<CellValue> = keys.iter().flatten().cloned().collect();
    let result = sqlx::query_with(&sql, args)
        .execute(&mut *conn)
        .await
        .map_err(|e| crate::error::log_sql_error(&sql, &logged_values, e))?;
    Ok(result.rows_affected())
}

/// Projects `parent_keys` (columns = `current_key_columns`) down to the
/// sub-tuple named by `wanted`, assuming `wanted ⊆ current_key_columns`
/// (spec.md §4.5.1 step 2, fast path).
fn project_columns(current_key_columns: &[String], wanted: &[String], parent_keys: &[CellRow]) -> Vec<CellRow> {
    let idx: Vec<usize> = wanted
        .iter()
        .map(|c| current_key_columns.iter().position(|k| k == c).expect("caller checked subset"))
        .collect();
    parent_keys
        .iter()
        .map(|row| idx.iter().map(|&i| row[i].clone()).collect::<CellRow>())
        .collect()
}

/// Cascade-deletes (or counts, in dry-run mode) `current_table` and every
/// table reachable from it in `graph`, children before parents, all within
/// the caller's already-open transaction (spec.md §4.5).
///
/// Recursive `async fn`s need manual boxing; this is the idiomatic shape for
/// a self-recursive future over a borrowed connection.
pub fn cascade_delete<'a>(
    conn: &'a mut PgConnection,
    current_table: &'a QualifiedName,
    current_key_columns: &'a [String],
    parent_keys: &'a [CellRow],
    graph: &'a mut RelationGraph,
    discovered_auto: &'a mut HashSet<QualifiedName>,
    opts: &'a WalkOptions<'a>,
    edge_path: &'a mut HashSet<crate::model::EdgeKey>,
    delete_totals: &'a mut DeleteTotals,
    archive_buffer: &'a mut ArchiveBuffer,
) -> Pin<Box<dyn Future<Output = CleanerResult<()>> + Send + 'a>> {
    Box::pin(async move {
        graph::extend_if_needed(
            conn,
            graph,
            discovered_auto,
            current_table,
            opts.auto_discover,
            opts.exclude_cascade_fk,
            opts.skip_tables,
            opts.skip_columns,
        )
        .await?;

        let edges = graph.edges_from(current_table).to_vec();
        for edge in edges {
            let edge_key = edge.edge_key();
            if edge_path.contains(&edge_key) {
                tracing::warn!(
                    target: "walker",
                    parent = %current_table,
                    child = %edge.child_table,
                    "[CYCLE] Infinite loop detected: {current_table} -> {}, skipping...",
                    edge.child_table,
                );
                continue;
            }
            edge_path.insert(edge_key.clone());

            let is_projectable = edge
                .parent_columns
                .iter()
                .all(|c| current_key_columns.iter().any(|k| k == c));

            let parent_keys_for_child = if is_projectable {
                project_columns(current_key_columns, &edge.parent_columns, parent_keys)
            } else {
                let fetched = select_by_keys(conn, current_table, &edge.parent_columns, current_key_columns, parent_keys, &[]).await?;
                if fetched.is_empty() {
                    tracing::warn!(
                        target: "walker",
                        table = %current_table,
                        child = %edge.child_table,
                        columns = ?edge.parent_columns,
                        "[WARN] failed to find parent column value(s) {:?} on {current_table} for child relation, skipping {}",
                        edge.parent_columns,
                        edge.child_table,
                    );
                    edge_path.remove(&edge_key);
                    continue;
                }
                fetched
            };

            if opts.mode == WalkMode::DryRun {
                let cnt = count_by_keys(conn, &edge.child_table, &edge.child_columns, &parent_keys_for_child, &edge.conditions).await?;
                tracing::info!(
                    target: "walker",
                    table = %edge.child_table,
                    parent = %current_table,
                    count = cnt,
                    "[DRY-RUN] would delete {cnt} rows from {} (child of {current_table})",
                    edge.child_table,
                );
                delete_totals.add(&edge.child_table, cnt);
            }

            let child_pk_cols = {
                let pk = catalog::primary_key_columns(conn, &edge.child_table).await?;
                if pk.is_empty() { edge.child_columns.clone() } else { pk }
            };

            let child_pks = select_by_keys(
                conn,
                &edge.child_table,
                &child_pk_cols,
                &edge.child_columns,
                &parent_keys_for_child,
                &edge.conditions,
            )
            .await?;

            if !child_pks.is_empty() {
                cascade_delete(
                    conn,
                    &edge.child_table,
                    &child_pk_cols,
                    &child_pks,
                    graph,
                    discovered_auto,
                    opts,
                    edge_path,
                    delete_totals,
                    archive_buffer,
                )
                .await?;
            }

            edge_path.remove(&edge_key);
        }

        match opts.mode {
            WalkMode::DryRun => {
                let cnt = count_by_keys(conn, current_table, current_key_columns, parent_keys, &[]).await?;
                tracing::info!(
                    target: "walker",
                    table = %current_table,
                    count = cnt,
                    "[DRY-RUN] would delete {cnt} rows from {current_table} (parent)",
                );
                delete_totals.add(current_table, cnt);
            }
            WalkMode::Execute => {
                if opts.archive {
                    let rows = archiver::select_rows_for_archive(conn, current_table, current_key_columns, parent_keys).await?;
                    for row in rows {
                        archive_buffer.push(current_table, row);
                    }
                }
                let deleted = delete_by_keys(conn, current_table, current_key_columns, parent_keys).await?;
                tracing::info!(
                    target: "walker",
                    table = %current_table,
                    count = deleted,
                    "[DELETE] {current_table}: deleted {deleted} rows (parent)",
                );
                delete_totals.add(current_table, deleted as i64);
            }
        }

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CellValue;

    #[test]
    fn project_columns_extracts_subtuple_in_requested_order() {
        let current_key_columns = vec!["tenant".to_string(), "id".to_string()];
        let wanted = vec!["id".to_string(), "tenant".to_string()];
        let rows = vec![vec![CellValue::Text("t1".into()), CellValue::Int4(7)]];
        let projected = project_columns(&current_key_columns, &wanted, &rows);
        assert_eq!(projected, vec![vec![CellValue::Int4(7), CellValue::Text("t1".into())]]);
    }
}
