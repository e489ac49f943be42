// src/config.rs
// Global and per-table configuration, loaded from YAML with environment
// variable overrides applied after parse (spec.md §6.1, §6.4).

use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::error::{CleanerError, CleanerResult};
use crate::model::CellValue;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub db_uri: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub log_rotate: Option<LogRotate>,
    #[serde(default = "default_true")]
    pub log_console: bool,
    #[serde(default)]
    pub skip_tables: Vec<String>,
    #[serde(default)]
    pub skip_columns: Vec<String>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogRotate {
    Timed {
        #[serde(default = "default_rotate_when")]
        when: String,
        #[serde(default = "default_rotate_interval")]
        interval: u32,
        #[serde(default = "default_backup_count")]
        backup_count: u32,
    },
    Size {
        max_bytes: u64,
        #[serde(default = "default_backup_count")]
        backup_count: u32,
    },
}

fn default_rotate_when() -> String {
    "midnight".to_string()
}

fn default_rotate_interval() -> u32 {
    1
}

fn default_backup_count() -> u32 {
    7
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> i64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    pub key_columns: Vec<String>,
    pub date_column: String,
    #[serde(default)]
    pub expire_days: i64,
    #[serde(default)]
    pub disable_cutoff: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default, rename = "time_out")]
    pub time_out_s: i64,
    #[serde(default)]
    pub archive: bool,
    #[serde(default)]
    pub archive_path: Option<String>,
    #[serde(default)]
    pub conditions: Vec<PredicateConfig>,
    #[serde(default)]
    pub auto_discover_related: bool,
    #[serde(default = "default_true")]
    pub exclude_cascade_fk: bool,
    #[serde(default)]
    pub related: Vec<ManualRelation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualRelation {
    pub name: String,
    pub parent_table: Option<String>,
    pub mapping: RelationMapping,
    #[serde(default)]
    pub conditions: Vec<PredicateConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationMapping {
    pub parent_columns: Vec<String>,
    pub child_columns: Vec<String>,
}

/// Duck-typed predicate shape as it arrives from YAML, matching the
/// original's dict-shaped conditions (`{column, op, value}` /
/// `{column, op}` / `{raw_sql, params}`).
#[derive(Debug, Clone, Deserialize)]
pub struct PredicateConfig {
    pub column: Option<String>,
    pub op: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    pub raw_sql: Option<String>,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl PredicateConfig {
    pub fn into_predicate(self) -> CleanerResult<crate::model::Predicate> {
        use crate::model::Predicate;

        if let Some(raw_sql) = self.raw_sql {
            let params = self.params.into_iter().map(json_to_cell).collect();
            return Ok(Predicate::Raw { raw_sql, params });
        }

        let column = self
            .column
            .ok_or_else(|| CleanerError::config_invalid("predicate missing 'column'"))?;
        let op = self
            .op
            .ok_or_else(|| CleanerError::config_invalid("predicate missing 'op'"))?;

        match op.to_ascii_uppercase().as_str() {
            "IS NULL" => Ok(Predicate::IsNull { column, negate: false }),
            "IS NOT NULL" => Ok(Predicate::IsNull { column, negate: true }),
            "IN" => {
                let value = self
                    .value
                    .ok_or_else(|| CleanerError::config_invalid("IN predicate missing 'value'"))?;
                let values = match value {
                    serde_json::Value::Array(items) => items.into_iter().map(json_to_cell).collect(),
                    other => vec![json_to_cell(other)],
                };
                Ok(Predicate::In { column, values })
            }
            "<" | "<=" | "=" | ">=" | ">" | "<>" | "LIKE" | "ILIKE" => {
                let value = self
                    .value
                    .ok_or_else(|| CleanerError::config_invalid("predicate missing 'value'"))?;
                Ok(Predicate::Simple {
                    column,
                    op,
                    value: json_to_cell(value),
                })
            }
            other => Err(CleanerError::config_invalid(format!("unknown predicate op '{other}'"))),
        }
    }
}

fn json_to_cell(v: serde_json::Value) -> CellValue {
    match v {
        serde_json::Value::Null => CellValue::Null,
        serde_json::Value::Bool(b) => CellValue::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Int8(i)
            } else {
                CellValue::Float8(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => CellValue::Text(s),
        other => CellValue::Text(other.to_string()),
    }
}

impl Config {
    pub fn load(path: &Path) -> CleanerResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CleanerError::config_invalid(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| CleanerError::config_invalid(format!("invalid YAML in {}: {e}", path.display())))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `DATABASE_CONNECTION_STRING`/`DB_URI`/`DRY_RUN`/`EXPIRY_DAYS`/
    /// `ARCHIVE` overrides, announcing each with the same confirmation the
    /// original prints (`✓ Using environment variable to set X = Y`).
    fn apply_env_overrides(&mut self) {
        if let Ok(uri) = env::var("DATABASE_CONNECTION_STRING") {
            tracing::info!(target: "config", "\u{2713} Using environment variable to set db_uri = {uri}");
            self.db_uri = uri;
        } else if let Ok(uri) = env::var("DB_URI") {
            tracing::info!(target: "config", "\u{2713} Using environment variable to set db_uri = {uri}");
            self.db_uri = uri;
        }

        if let Ok(raw) = env::var("DRY_RUN") {
            if let Some(parsed) = parse_bool_env(&raw) {
                tracing::info!(target: "config", "\u{2713} Using environment variable to set dry_run = {parsed}");
                self.dry_run = parsed;
            }
        }

        if let Ok(raw) = env::var("EXPIRY_DAYS") {
            if let Ok(days) = raw.parse::<i64>() {
                tracing::info!(target: "config", "\u{2713} Using environment variable to set expire_days = {days}");
                for table in &mut self.tables {
                    table.expire_days = days;
                }
            }
        }

        if let Ok(raw) = env::var("ARCHIVE") {
            if let Some(parsed) = parse_bool_env(&raw) {
                tracing::info!(target: "config", "\u{2713} Using environment variable to set archive = {parsed}");
                for table in &mut self.tables {
                    table.archive = parsed;
                }
            }
        }
    }

    fn validate(&self) -> CleanerResult<()> {
        for table in &self.tables {
            for relation in &table.related {
                let p = relation.mapping.parent_columns.len();
                let c = relation.mapping.child_columns.len();
                if p == 0 || p != c {
                    return Err(CleanerError::config_invalid(format!(
                        "relation '{}' on table '{}' has mismatched column lengths ({p} vs {c})",
                        relation.name, table.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_bool_env(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Resolves the config file path from `--config`, `DB_CLEANER_CONFIG`, or the
/// documented default, in that precedence order (spec.md §6.2/§6.4).
pub fn resolve_config_path(cli_override: Option<String>) -> String {
    cli_override
        .or_else(|| env::var("DB_CLEANER_CONFIG").ok())
        .unwrap_or_else(|| "./config/config.yaml".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
db_uri: "postgres://localhost/app"
tables:
  - name: events
    key_columns: [id]
    date_column: created_at
    expire_days: 365
    batch_size: 500
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tables.len(), 1);
        assert!(config.tables[0].enable);
        assert!(config.tables[0].exclude_cascade_fk);
        assert_eq!(config.tables[0].batch_size, 500);
        assert!(config.log_console);
    }

    #[test]
    fn rejects_mismatched_manual_relation_columns() {
        let yaml = r#"
db_uri: "postgres://localhost/app"
tables:
  - name: orders
    key_columns: [order_id]
    date_column: created_at
    related:
      - name: bad
        mapping:
          parent_columns: [a, b]
          child_columns: [x]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn predicate_config_rejects_unknown_op() {
        let pred = PredicateConfig {
            column: Some("status".into()),
            op: Some("FROBNICATE".into()),
            value: Some(serde_json::json!("x")),
            raw_sql: None,
            params: vec![],
        };
        assert!(pred.into_predicate().is_err());
    }

    #[test]
    fn predicate_config_builds_in_list() {
        let pred = PredicateConfig {
            column: Some("status".into()),
            op: Some("IN".into()),
            value: Some(serde_json::json!(["a", "b"])),
            raw_sql: None,
            params: vec![],
        };
        match pred.into_predicate().unwrap() {
            crate::model::Predicate::In { values, .. } => assert_eq!(values.len(), 2),
            other => panic!("expected In predicate, got {other:?}"),
        }
    }
}
