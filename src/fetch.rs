// src/fetch.rs
// Batch Fetcher (spec.md §4.4): selects up to N parent key tuples older
// than cutoff, honoring optional predicates and cutoff-ordering semantics.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::{Arguments, PgConnection, Row};

use crate::error::CleanerResult;
use crate::model::{CellRow, CellValue, ColumnType, Predicate, QualifiedName};
use crate::sql_render::{quote_ident, quote_qualified, render_predicates};

/// `fetch_batch` (spec.md §4.4). `cutoff` of `None` means `disable_cutoff`;
/// ordering is then unspecified and `ORDER BY` is omitted entirely, matching
/// the original's `fetch_batch`.
pub async fn fetch_batch(
    conn: &mut PgConnection,
    table: &QualifiedName,
    key_columns: &[String],
    key_types: &[ColumnType],
    date_column: &str,
    cutoff: Option<DateTime<Utc>>,
    limit: i64,
    predicates: &[Predicate],
) -> CleanerResult<Vec<CellRow>> {
    let mut args = PgArguments::default();
    let select_list = key_columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let mut sql = format!(
        "SELECT {select_list} FROM {} WHERE TRUE",
        quote_qualified(&table.schema, &table.name)
    );

    let mut next_idx = 1usize;
    if let Some(cutoff) = cutoff {
        sql.push_str(&format!(" AND {} < ${}", quote_ident(date_column), next_idx));
        args.add(CellValue::TimestampTz(cutoff)).expect("CellValue never fails to encode");
        next_idx += 1;
    }

    sql.push_str(&render_predicates(predicates, next_idx, &mut args));

    if cutoff.is_some() {
        sql.push_str(&format!(" ORDER BY {} ASC", quote_ident(date_column)));
    }
    sql.push_str(&format!(" LIMIT {limit}"));

    let mut logged_values: Vec<CellValue> = Vec::new();
    if let Some(cutoff) = cutoff {
        logged_values.push(CellValue::TimestampTz(cutoff));
    }
    logged_values.extend(crate::sql_render::predicate_values(predicates));

    let rows = sqlx::query_with(&sql, args)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| crate::error::log_sql_error(&sql, &logged_values, e))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut cells = Vec::with_capacity(key_columns.len());
        for (idx, ty) in key_types.iter().enumerate() {
            cells.push(CellValue::decode(row, idx, &ty.type_name)?);
        }
        out.push(cells);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // `fetch_batch`'s SQL text is covered indirectly through sql_render's
    // unit tests (values/predicate rendering); the limit/ordering contract
    // is validated end-to-end in walker scenario tests against a fake
    // row source, since this function requires a live PgConnection.

    #[test]
    fn select_list_quotes_every_key_column() {
        let cols = vec!["id".to_string(), "tenant".to_string()];
        let select_list = cols.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        assert_eq!(select_list, "\"id\", \"tenant\"");
    }
}
