// src/graph.rs
// Relation Graph Builder (spec.md §4.2): merges manual and auto-discovered
// edges, applies skip rules and CASCADE exclusion, deduplicates, and
// supports lazy per-node extension during the walk.

use std::collections::HashSet;

use sqlx::PgConnection;

use crate::catalog;
use crate::config::{ManualRelation, PredicateConfig, TableConfig};
use crate::error::CleanerResult;
use crate::model::{DeleteAction, QualifiedName, RelationEdge, RelationGraph};

pub struct SkipRules<'a> {
    pub skip_tables: &'a [String],
    pub skip_columns: &'a [String],
}

impl SkipRules<'_> {
    fn table_skipped(&self, table: &QualifiedName) -> bool {
        self.skip_tables
            .iter()
            .any(|s| s == table.short() || s == &table.qualified())
    }

    fn columns_skipped(&self, columns: &[String]) -> bool {
        columns.iter().any(|c| self.skip_columns.iter().any(|s| s == c))
    }

    fn edge_allowed(&self, edge: &RelationEdge) -> bool {
        !self.table_skipped(&edge.child_table) && !self.columns_skipped(&edge.child_columns)
    }
}

/// Normalizes a table's manual `related` entries into `RelationEdge`s.
pub fn manual_edges(parent_default: &QualifiedName, related: &[ManualRelation]) -> CleanerResult<Vec<RelationEdge>> {
    let mut out = Vec::with_capacity(related.len());
    for rel in related {
        let parent_table = rel
            .parent_table
            .as_deref()
            .map(QualifiedName::parse)
            .unwrap_or_else(|| parent_default.clone());
        // child_table is carried by the relation's own `name` field in the
        // original tool's manual-relation schema; here it doubles as the
        // qualified child table name.
        let child_table = QualifiedName::parse(&rel.name);

        let conditions = rel
            .conditions
            .iter()
            .cloned()
            .map(PredicateConfig::into_predicate)
            .collect::<CleanerResult<Vec<_>>>()?;

        let edge = RelationEdge {
            parent_table,
            child_table,
            parent_columns: rel.mapping.parent_columns.clone(),
            child_columns: rel.mapping.child_columns.clone(),
            conditions,
            delete_action: None,
            constraint_name: None,
        };
        out.push(edge);
    }
    Ok(out)
}

/// Runs auto-discovery rooted at `parent`, applying the CASCADE-exclusion
/// and skip-rule filters, logging skipped CASCADE constraints the way the
/// original `[AUTO-DISCOVER]` messages do.
pub async fn discover_edges(
    conn: &mut PgConnection,
    parent: &QualifiedName,
    exclude_cascade_fk: bool,
    skip_rules: &SkipRules<'_>,
) -> CleanerResult<Vec<RelationEdge>> {
    let auto = catalog::foreign_keys_referencing(conn, parent).await?;

    let mut kept = Vec::new();
    let mut skipped_cascade: Vec<String> = Vec::new();

    for a in auto {
        let edge = RelationEdge {
            parent_table: parent.clone(),
            child_table: QualifiedName {
                schema: a.child_schema,
                name: a.child_table,
            },
            parent_columns: a.parent_columns,
            child_columns: a.child_columns,
            conditions: vec![],
            delete_action: Some(a.delete_action),
            constraint_name: Some(a.constraint_name.clone()),
        };

        if exclude_cascade_fk && a.delete_action == DeleteAction::Cascade {
            skipped_cascade.push(a.constraint_name);
            continue;
        }

        if !skip_rules.edge_allowed(&edge) {
            continue;
        }

        kept.push(edge);
    }

    if !skipped_cascade.is_empty() {
        tracing::info!(
            target: "graph",
            count = skipped_cascade.len(),
            constraints = ?skipped_cascade,
            "[AUTO-DISCOVER] Skipped {} tables with CASCADE delete rules",
            skipped_cascade.len()
        );
    }

    Ok(kept)
}

/// Builds the initial graph for a table-clean pass: manual edges first, then
/// (if enabled) one round of auto-discovery rooted at the table itself.
pub async fn build_graph(
    conn: &mut PgConnection,
    table: &TableConfig,
    skip_tables: &[String],
    skip_columns: &[String],
) -> CleanerResult<(RelationGraph, HashSet<QualifiedName>)> {
    let root = QualifiedName::parse(&table.name);
    let skip_rules = SkipRules { skip_tables, skip_columns };

    let mut graph = RelationGraph::new();
    let mut discovered_auto: HashSet<QualifiedName> = HashSet::new();

    for edge in manual_edges(&root, &table.related)? {
        if skip_rules.edge_allowed(&edge) {
            graph.insert(edge);
        }
    }

    if table.auto_discover_related {
        let auto = discover_edges(conn, &root, table.exclude_cascade_fk, &skip_rules).await?;
        for edge in auto {
            graph.insert(edge);
        }
        discovered_auto.insert(root);
    }

    Ok((graph, discovered_auto))
}

/// Lazy extension (spec.md §4.2 "Lazy extension"): the first time the walker
/// reaches `node`, if auto-discovery is enabled and not yet run for it,
/// re-run discovery rooted at `node` and union in any new edges.
pub async fn extend_if_needed(
    conn: &mut PgConnection,
    graph: &mut RelationGraph,
    discovered_auto: &mut HashSet<QualifiedName>,
    node: &QualifiedName,
    auto_discover_related: bool,
    exclude_cascade_fk: bool,
    skip_tables: &[String],
    skip_columns: &[String],
) -> CleanerResult<()> {
    if !auto_discover_related || discovered_auto.contains(node) {
        return Ok(());
    }
    let skip_rules = SkipRules { skip_tables, skip_columns };
    let auto = discover_edges(conn, node, exclude_cascade_fk, &skip_rules).await?;
    for edge in auto {
        graph.insert(edge);
    }
    discovered_auto.insert(node.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelationMapping;

    fn manual_relation(name: &str, parent_cols: &[&str], child_cols: &[&str]) -> ManualRelation {
        ManualRelation {
            name: name.to_string(),
            parent_table: None,
            mapping: RelationMapping {
                parent_columns: parent_cols.iter().map(|s| s.to_string()).collect(),
                child_columns: child_cols.iter().map(|s| s.to_string()).collect(),
            },
            conditions: vec![],
        }
    }

    #[test]
    fn manual_edges_default_parent_to_cleaned_table() {
        let parent = QualifiedName::parse("orders");
        let related = vec![manual_relation("order_items", &["order_id"], &["order_id"])];
        let edges = manual_edges(&parent, &related).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].parent_table, parent);
        assert_eq!(edges[0].child_table, QualifiedName::parse("order_items"));
    }

    #[test]
    fn skip_rules_match_short_and_qualified_names() {
        let rules = SkipRules {
            skip_tables: &["order_items".to_string(), "billing.invoices".to_string()],
            skip_columns: &[],
        };
        assert!(rules.table_skipped(&QualifiedName::parse("order_items")));
        assert!(rules.table_skipped(&QualifiedName::parse("billing.invoices")));
        assert!(!rules.table_skipped(&QualifiedName::parse("orders")));
    }

    #[test]
    fn skip_rules_match_on_child_columns() {
        let rules = SkipRules {
            skip_tables: &[],
            skip_columns: &["secret_token".to_string()],
        };
        assert!(rules.columns_skipped(&["id".to_string(), "secret_token".to_string()]));
        assert!(!rules.columns_skipped(&["id".to_string()]));
    }
}
