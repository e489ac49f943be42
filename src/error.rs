// src/error.rs
// Error types for the retention engine

use thiserror::Error;

use crate::model::CellValue;

/// Top-level error type returned by every stage of the cascade pipeline.
#[derive(Error, Debug)]
pub enum CleanerError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("catalog miss: {0}")]
    CatalogMiss(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("missing parent column(s): {0}")]
    MissingParentColumn(String),

    #[error("archive I/O error: {0}")]
    ArchiveIo(#[from] std::io::Error),
}

impl CleanerError {
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub fn catalog_miss(msg: impl Into<String>) -> Self {
        Self::CatalogMiss(msg.into())
    }

    pub fn cycle_detected(msg: impl Into<String>) -> Self {
        Self::CycleDetected(msg.into())
    }

    pub fn missing_parent_column(msg: impl Into<String>) -> Self {
        Self::MissingParentColumn(msg.into())
    }

    /// True for error kinds that are fatal to the whole run (spec §7: all DB
    /// errors are fatal; cycles and missing-parent-columns recover locally).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::CycleDetected(_) | Self::MissingParentColumn(_))
    }
}

pub type CleanerResult<T> = Result<T, CleanerError>;

/// Structured rendering of a Postgres diagnostic, joined with `" | "` the way
/// the original tool's `format_pg_error` does.
#[derive(Debug, Default)]
pub struct PgDiagnostic {
    pub message: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub context: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
    pub sqlstate: Option<String>,
    pub routine: Option<String>,
}

impl PgDiagnostic {
    pub fn from_db_error(err: &sqlx::postgres::PgDatabaseError) -> Self {
        Self {
            message: Some(err.message().to_string()),
            detail: err.detail().map(str::to_string),
            hint: err.hint().map(str::to_string),
            context: err.where_().map(str::to_string),
            schema: err.schema().map(str::to_string),
            table: err.table().map(str::to_string),
            column: err.column().map(str::to_string),
            constraint: err.constraint().map(str::to_string),
            sqlstate: Some(err.code().to_string()),
            routine: err.routine().map(str::to_string),
        }
    }

    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        let mut add = |label: &str, value: &Option<String>| {
            if let Some(v) = value {
                if !v.is_empty() {
                    parts.push(format!("{label}={v}"));
                }
            }
        };
        add("message", &self.message);
        add("detail", &self.detail);
        add("hint", &self.hint);
        add("context", &self.context);
        add("schema", &self.schema);
        add("table", &self.table);
        add("column", &self.column);
        add("constraint", &self.constraint);
        add("sqlstate", &self.sqlstate);
        add("routine", &self.routine);
        if parts.is_empty() {
            "unknown database error".to_string()
        } else {
            parts.join(" | ")
        }
    }
}

/// Render a full diagnostic string for a `sqlx::Error`, falling back to the
/// plain `Display` text for non-database errors (spec §4.8).
pub fn format_db_error(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => {
            if let Some(pg_err) = db_err.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
                PgDiagnostic::from_db_error(pg_err).render()
            } else {
                db_err.message().to_string()
            }
        }
        other => other.to_string(),
    }
}

fn quote_literal_for_log(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Best-effort substitution of `$1`, `$2`, … placeholders with their bound
/// values, for diagnostic logging only — this string is never sent back to
/// the database. Falls back to leaving a placeholder untouched (rather than
/// failing outright) when `values` is shorter than the SQL references,
/// matching spec.md §4.8 step 2's "on failure, fall back to the unbound
/// text" in spirit.
pub fn render_bound_sql(sql: &str, values: &[CellValue]) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 {
                let n: usize = chars[i + 1..j].iter().collect::<String>().parse().unwrap_or(0);
                if n >= 1 && n <= values.len() {
                    let literal = match &values[n - 1] {
                        CellValue::Null => "NULL".to_string(),
                        CellValue::Text(s) => quote_literal_for_log(s),
                        CellValue::Uuid(_) | CellValue::Timestamp(_) | CellValue::TimestampTz(_) | CellValue::Date(_) => {
                            quote_literal_for_log(&values[n - 1].to_csv_field())
                        }
                        other => other.to_csv_field(),
                    };
                    out.push_str(&literal);
                    i = j;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Renders, normalizes, and logs a failing query at `[SQL-ERROR]` level
/// (spec.md §4.8), then wraps the underlying `sqlx::Error` as a
/// `CleanerError` for the caller to propagate.
pub fn log_sql_error(sql: &str, bound_values: &[CellValue], err: sqlx::Error) -> CleanerError {
    let rendered = render_bound_sql(sql, bound_values);
    let normalized = crate::sql_render::normalize_for_log(&rendered);
    let diagnostic = format_db_error(&err);
    tracing::error!(target: "sql", sql = %normalized, diagnostic = %diagnostic, "[SQL-ERROR] {normalized} | {diagnostic}");
    CleanerError::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification_matches_policy() {
        assert!(!CleanerError::cycle_detected("x").is_fatal());
        assert!(!CleanerError::missing_parent_column("x").is_fatal());
        assert!(CleanerError::config_invalid("x").is_fatal());
        assert!(CleanerError::catalog_miss("x").is_fatal());
    }

    #[test]
    fn diagnostic_render_joins_present_fields_only() {
        let diag = PgDiagnostic {
            message: Some("duplicate key".into()),
            sqlstate: Some("23505".into()),
            ..Default::default()
        };
        assert_eq!(diag.render(), "message=duplicate key | sqlstate=23505");
    }

    #[test]
    fn diagnostic_render_falls_back_when_empty() {
        let diag = PgDiagnostic::default();
        assert_eq!(diag.render(), "unknown database error");
    }
}
