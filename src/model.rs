// src/model.rs
// Core data model shared by every component: qualified names, relation
// edges/graph, predicates, and the dynamically-typed cell value used to
// shuttle row tuples between queries without knowing their Rust type ahead
// of time (spec.md §9, "Dynamic typing of row tuples").

use std::collections::{HashMap, HashSet};
use std::fmt;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};
use uuid::Uuid;

/// `(schema, name)`, normalized so unqualified input defaults to `public`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((schema, name)) => Self {
                schema: schema.to_string(),
                name: name.to_string(),
            },
            None => Self {
                schema: "public".to_string(),
                name: raw.to_string(),
            },
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// The bare table name, ignoring schema — used by `skip_tables` matching,
    /// which the original accepts either qualified or short.
    pub fn short(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// Decoded `confdeltype` from `pg_constraint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl DeleteAction {
    pub fn from_pg_char(c: char) -> Option<Self> {
        match c {
            'a' => Some(Self::NoAction),
            'r' => Some(Self::Restrict),
            'c' => Some(Self::Cascade),
            'n' => Some(Self::SetNull),
            'd' => Some(Self::SetDefault),
            _ => None,
        }
    }
}

/// Column identity and catalog-derived base type name, used to emit explicit
/// `::type` casts when rendering VALUES tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub column: String,
    pub type_name: String,
}

/// Canonical 4-tuple identifying a relation edge for dedup and cycle
/// detection: `(parent_table, child_table, child_columns, parent_columns)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub parent_table: QualifiedName,
    pub child_table: QualifiedName,
    pub child_columns: Vec<String>,
    pub parent_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RelationEdge {
    pub parent_table: QualifiedName,
    pub child_table: QualifiedName,
    pub parent_columns: Vec<String>,
    pub child_columns: Vec<String>,
    pub conditions: Vec<Predicate>,
    /// Only meaningful for auto-discovered edges; manual edges carry `None`.
    pub delete_action: Option<DeleteAction>,
    pub constraint_name: Option<String>,
}

impl RelationEdge {
    pub fn edge_key(&self) -> EdgeKey {
        EdgeKey {
            parent_table: self.parent_table.clone(),
            child_table: self.child_table.clone(),
            child_columns: self.child_columns.clone(),
            parent_columns: self.parent_columns.clone(),
        }
    }

    /// Invariant from spec.md §3.1: `len(parent_columns) == len(child_columns) > 0`.
    pub fn is_valid(&self) -> bool {
        !self.parent_columns.is_empty() && self.parent_columns.len() == self.child_columns.len()
    }
}

/// Mapping from a parent qualified name to its outgoing edges.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    edges: HashMap<QualifiedName, Vec<RelationEdge>>,
    seen_keys: HashSet<EdgeKey>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an edge unless its canonical key is already present.
    /// First insertion wins, matching "manual wins on tie because it's
    /// inserted first" (spec.md §4.2).
    pub fn insert(&mut self, edge: RelationEdge) -> bool {
        let key = edge.edge_key();
        if self.seen_keys.contains(&key) {
            return false;
        }
        self.seen_keys.insert(key);
        self.edges.entry(edge.parent_table.clone()).or_default().push(edge);
        true
    }

    pub fn edges_from(&self, parent: &QualifiedName) -> &[RelationEdge] {
        self.edges.get(parent).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// One predicate condition, matching the four shapes spec.md §3.1 describes.
#[derive(Debug, Clone)]
pub enum Predicate {
    Simple { column: String, op: String, value: CellValue },
    In { column: String, values: Vec<CellValue> },
    IsNull { column: String, negate: bool },
    Raw { raw_sql: String, params: Vec<CellValue> },
}

/// A dynamically-typed database cell. Rows are heterogeneous sequences whose
/// element types mirror the column types discovered via the catalog; this
/// enum lets the engine decode a row once and rebind the same values into a
/// later query's parameter list without static knowledge of the schema.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int4(i32),
    Int8(i64),
    Float8(f64),
    Numeric(BigDecimal),
    Text(String),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Bytea(Vec<u8>),
}

impl CellValue {
    /// Decodes a single column of a `PgRow` using the catalog-reported base
    /// type name to pick the right native Rust type.
    pub fn decode(row: &sqlx::postgres::PgRow, idx: usize, type_name: &str) -> sqlx::Result<Self> {
        use sqlx::Row;
        macro_rules! try_col {
            ($t:ty, $variant:expr) => {{
                let v: Option<$t> = row.try_get(idx)?;
                return Ok(v.map($variant).unwrap_or(CellValue::Null));
            }};
        }
        match type_name {
            "bool" => try_col!(bool, CellValue::Bool),
            "int2" => {
                let v: Option<i16> = row.try_get(idx)?;
                return Ok(v.map(|n| CellValue::Int4(n as i32)).unwrap_or(CellValue::Null));
            }
            "int4" => try_col!(i32, CellValue::Int4),
            "int8" => try_col!(i64, CellValue::Int8),
            "float4" => {
                let v: Option<f32> = row.try_get(idx)?;
                return Ok(v.map(|n| CellValue::Float8(n as f64)).unwrap_or(CellValue::Null));
            }
            "float8" => try_col!(f64, CellValue::Float8),
            "numeric" => try_col!(BigDecimal, CellValue::Numeric),
            "uuid" => try_col!(Uuid, CellValue::Uuid),
            "timestamp" => try_col!(NaiveDateTime, CellValue::Timestamp),
            "timestamptz" => try_col!(DateTime<Utc>, CellValue::TimestampTz),
            "date" => try_col!(NaiveDate, CellValue::Date),
            "bytea" => try_col!(Vec<u8>, CellValue::Bytea),
            // text, varchar, bpchar, and anything else unrecognized: read as text.
            _ => try_col!(String, CellValue::Text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Rendering used only for CSV archival (spec.md §4.6); never used to
    /// build SQL text directly.
    pub fn to_csv_field(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int4(v) => v.to_string(),
            CellValue::Int8(v) => v.to_string(),
            CellValue::Float8(v) => v.to_string(),
            CellValue::Numeric(v) => v.to_string(),
            CellValue::Text(v) => v.clone(),
            CellValue::Uuid(v) => v.to_string(),
            CellValue::Timestamp(v) => v.to_string(),
            CellValue::TimestampTz(v) => v.to_rfc3339(),
            CellValue::Date(v) => v.to_string(),
            CellValue::Bytea(v) => format!("\\x{}", hex::encode(v)),
        }
    }
}

/// Accept any wire type; actual dispatch happens in `encode_by_ref` by
/// delegating to the concrete type's own `Encode` impl. This is the standard
/// pattern for dynamic bind values against a driver whose `Type` trait is
/// normally monomorphic per Rust type.
impl Type<Postgres> for CellValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("text")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl Encode<'_, Postgres> for CellValue {
    fn encode_by_ref(
        &self,
        buf: &mut PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            CellValue::Null => Ok(sqlx::encode::IsNull::Yes),
            CellValue::Bool(v) => v.encode_by_ref(buf),
            CellValue::Int4(v) => v.encode_by_ref(buf),
            CellValue::Int8(v) => v.encode_by_ref(buf),
            CellValue::Float8(v) => v.encode_by_ref(buf),
            CellValue::Numeric(v) => v.encode_by_ref(buf),
            CellValue::Text(v) => v.encode_by_ref(buf),
            CellValue::Uuid(v) => v.encode_by_ref(buf),
            CellValue::Timestamp(v) => v.encode_by_ref(buf),
            CellValue::TimestampTz(v) => v.encode_by_ref(buf),
            CellValue::Date(v) => v.encode_by_ref(buf),
            CellValue::Bytea(v) => v.encode_by_ref(buf),
        }
    }
}

impl<'r> Decode<'r, Postgres> for CellValue {
    fn decode(value: PgValueRef<'r>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        // Fallback decode path (used only outside the catalog-typed path,
        // e.g. ad-hoc scalar reads); text representation is always safe.
        let s: Option<String> = Decode::<Postgres>::decode(value)?;
        Ok(s.map(CellValue::Text).unwrap_or(CellValue::Null))
    }
}

/// A full row as a vector of cells, in catalog-declared column order.
pub type CellRow = Vec<CellValue>;

/// Per-table deletion counters: reset each batch, accumulated across the run.
#[derive(Debug, Clone, Default)]
pub struct DeleteTotals {
    pub batch: HashMap<QualifiedName, i64>,
    pub run: HashMap<QualifiedName, i64>,
}

impl DeleteTotals {
    pub fn add(&mut self, table: &QualifiedName, count: i64) {
        *self.batch.entry(table.clone()).or_insert(0) += count;
        *self.run.entry(table.clone()).or_insert(0) += count;
    }

    pub fn reset_batch(&mut self) {
        self.batch.clear();
    }
}

/// Rows slated for deletion, buffered per table for the duration of one
/// batch transaction; flushed to CSV only after commit (spec.md §4.6).
#[derive(Debug, Default)]
pub struct ArchiveBuffer {
    pub rows: HashMap<QualifiedName, Vec<CellRow>>,
}

impl ArchiveBuffer {
    pub fn push(&mut self, table: &QualifiedName, row: CellRow) {
        self.rows.entry(table.clone()).or_default().push(row);
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_defaults_to_public() {
        let q = QualifiedName::parse("events");
        assert_eq!(q.schema, "public");
        assert_eq!(q.name, "events");
        assert_eq!(q.qualified(), "public.events");
    }

    #[test]
    fn qualified_name_respects_explicit_schema() {
        let q = QualifiedName::parse("billing.invoices");
        assert_eq!(q.schema, "billing");
        assert_eq!(q.name, "invoices");
    }

    #[test]
    fn delete_action_decodes_known_letters() {
        assert_eq!(DeleteAction::from_pg_char('c'), Some(DeleteAction::Cascade));
        assert_eq!(DeleteAction::from_pg_char('n'), Some(DeleteAction::SetNull));
        assert_eq!(DeleteAction::from_pg_char('z'), None);
    }

    fn edge(parent: &str, child: &str, pcols: &[&str], ccols: &[&str]) -> RelationEdge {
        RelationEdge {
            parent_table: QualifiedName::parse(parent),
            child_table: QualifiedName::parse(child),
            parent_columns: pcols.iter().map(|s| s.to_string()).collect(),
            child_columns: ccols.iter().map(|s| s.to_string()).collect(),
            conditions: vec![],
            delete_action: None,
            constraint_name: None,
        }
    }

    #[test]
    fn relation_edge_validity() {
        assert!(edge("p", "c", &["id"], &["p_id"]).is_valid());
        assert!(!edge("p", "c", &["a", "b"], &["x"]).is_valid());
        assert!(!edge("p", "c", &[], &[]).is_valid());
    }

    #[test]
    fn relation_graph_dedups_by_canonical_key_manual_wins() {
        let mut graph = RelationGraph::new();
        let mut manual = edge("orders", "order_items", &["order_id"], &["order_id"]);
        manual.conditions.push(Predicate::IsNull {
            column: "deleted_at".into(),
            negate: true,
        });
        let auto = edge("orders", "order_items", &["order_id"], &["order_id"]);

        assert!(graph.insert(manual));
        assert!(!graph.insert(auto));

        let edges = graph.edges_from(&QualifiedName::parse("orders"));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].conditions.len(), 1);
    }

    #[test]
    fn delete_totals_accumulate_across_batches() {
        let mut totals = DeleteTotals::default();
        let t = QualifiedName::parse("orders");
        totals.add(&t, 3);
        totals.reset_batch();
        totals.add(&t, 2);
        assert_eq!(totals.batch[&t], 2);
        assert_eq!(totals.run[&t], 5);
    }
}
