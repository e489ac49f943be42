// src/sql_render.rs
// SQL Fragment Renderer (spec.md §4.3): typed VALUES tuples, predicate
// clauses, identifier quoting, and log normalization.

use regex::Regex;
use sqlx::postgres::PgArguments;
use sqlx::Arguments;

use crate::model::{CellValue, Predicate};

/// Quotes an identifier the way the driver would: double the embedded quotes
/// and wrap in double quotes. Used for table/column names only — never for
/// values.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Renders a typed VALUES clause for `rows` of `ncols` each, casting every
/// cell to its catalog-derived type, and appends the bind values to `args`
/// in emission order.
///
/// ```text
/// ( $1::t1, $2::t2, … ), ( $(n+1)::t1, … )
/// ```
pub fn render_values_clause(rows: &[Vec<CellValue>], type_names: &[String], args: &mut PgArguments) -> String {
    let mut placeholder = 1usize;
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = Vec::with_capacity(row.len());
        for (cell, type_name) in row.iter().zip(type_names) {
            cells.push(format!("${placeholder}::{type_name}"));
            args.add(cell.clone()).expect("CellValue never fails to encode");
            placeholder += 1;
        }
        tuples.push(format!("({})", cells.join(", ")));
    }
    tuples.join(", ")
}

/// Renders `" AND " + clause1 + " AND " + clause2 + …`, binding one
/// parameter per simple/in-list value and splicing `raw_sql` verbatim.
/// `start_index` is the next free `$n` placeholder number.
pub fn render_predicates(predicates: &[Predicate], start_index: usize, args: &mut PgArguments) -> String {
    let mut idx = start_index;
    let mut clauses = Vec::with_capacity(predicates.len());

    for pred in predicates {
        match pred {
            Predicate::Simple { column, op, value } => {
                clauses.push(format!("{} {} ${}", quote_ident(column), op, idx));
                args.add(value.clone()).expect("CellValue never fails to encode");
                idx += 1;
            }
            Predicate::In { column, values } => {
                if values.is_empty() {
                    clauses.push("FALSE".to_string());
                    continue;
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        let p = format!("${idx}");
                        args.add(v.clone()).expect("CellValue never fails to encode");
                        idx += 1;
                        p
                    })
                    .collect();
                clauses.push(format!("{} IN ({})", quote_ident(column), placeholders.join(", ")));
            }
            Predicate::IsNull { column, negate } => {
                let op = if *negate { "IS NOT NULL" } else { "IS NULL" };
                clauses.push(format!("{} {}", quote_ident(column), op));
            }
            Predicate::Raw { raw_sql, params } => {
                clauses.push(raw_sql.clone());
                for p in params {
                    args.add(p.clone()).expect("CellValue never fails to encode");
                    idx += 1;
                }
            }
        }
    }

    if clauses.is_empty() {
        String::new()
    } else {
        format!(" AND {}", clauses.join(" AND "))
    }
}

/// Flattens the bind values `render_predicates` would emit for `predicates`,
/// in the same order, without building any SQL text. Used to reconstruct a
/// parameter list for error-log rendering (`error::log_sql_error`) alongside
/// the key-tuple values that were bound ahead of the predicate clause.
pub fn predicate_values(predicates: &[Predicate]) -> Vec<CellValue> {
    let mut values = Vec::new();
    for pred in predicates {
        match pred {
            Predicate::Simple { value, .. } => values.push(value.clone()),
            Predicate::In { values: vs, .. } => values.extend(vs.iter().cloned()),
            Predicate::IsNull { .. } => {}
            Predicate::Raw { params, .. } => values.extend(params.iter().cloned()),
        }
    }
    values
}

/// Collapses `::T::T` double-casts and truncates to at most 2000 characters,
/// for SQL-error log lines (spec.md §4.3 "Log normalization").
pub fn normalize_for_log(sql: &str) -> String {
    let double_cast = Regex::new(r"::(\w+)::\1\b").expect("static regex");
    let collapsed = double_cast.replace_all(sql, "::$1");
    if collapsed.chars().count() > 2000 {
        collapsed.chars().take(2000).collect()
    } else {
        collapsed.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("weird\"col"), "\"weird\"\"col\"");
    }

    #[test]
    fn values_clause_emits_casts_and_binds_in_order() {
        let rows = vec![
            vec![CellValue::Uuid(uuid::Uuid::nil())],
            vec![CellValue::Uuid(uuid::Uuid::nil())],
        ];
        let types = vec!["uuid".to_string()];
        let mut args = PgArguments::default();
        let rendered = render_values_clause(&rows, &types, &mut args);
        assert_eq!(rendered, "($1::uuid), ($2::uuid)");
    }

    #[test]
    fn predicate_render_joins_with_and_and_handles_in() {
        let preds = vec![
            Predicate::IsNull { column: "deleted_at".into(), negate: true },
            Predicate::In {
                column: "status".into(),
                values: vec![CellValue::Text("a".into()), CellValue::Text("b".into())],
            },
        ];
        let mut args = PgArguments::default();
        let rendered = render_predicates(&preds, 1, &mut args);
        assert_eq!(rendered, " AND \"deleted_at\" IS NOT NULL AND \"status\" IN ($1, $2)");
    }

    #[test]
    fn normalize_collapses_double_cast_and_truncates() {
        let sql = format!("SELECT x::uuid::uuid, {}", "y".repeat(2100));
        let normalized = normalize_for_log(&sql);
        assert!(normalized.starts_with("SELECT x::uuid,"));
        assert_eq!(normalized.chars().count(), 2000);
    }
}
