//! Depth-first flattening of a node tree into linked tables
//!
//! Leaves fold into their parent's row; every other element becomes a row of
//! the table named after its tag.

use crate::melt::document::{Document, Node};
use crate::melt::types::{Linkage, MeltConfig, Row, TableSet, RESERVED_FIELDS, TEXT};
use tracing::{debug, warn};

/// What a node turned into after flattening
#[derive(Debug, Clone, PartialEq)]
pub enum Flattened {
    /// A leaf: the parent stores it as a field named after the tag
    Folded { key: String, value: Option<String> },
    /// The node became a row of its own table
    Materialized,
}

/// The core XML melter that turns one document into relational tables
pub struct XmlMelter {
    config: MeltConfig,
}

impl XmlMelter {
    pub fn new(config: MeltConfig) -> Self {
        XmlMelter { config }
    }

    pub fn config(&self) -> &MeltConfig {
        &self.config
    }

    /// Melt a document into a set of tables
    pub fn melt(&self, document: &Document) -> TableSet {
        let mut tables = TableSet::new();
        let outcome = self.flatten_node(&document.root, &Linkage::root(), &mut tables, &document.source);
        if let Flattened::Folded { key, .. } = outcome {
            // A childless root carries no record of its own
            debug!(source = %document.source, root = %key, "Root element has no children");
        }
        tables
    }

    /// Recursively flatten a node under the given parent linkage
    fn flatten_node(
        &self,
        node: &Node,
        context: &Linkage,
        tables: &mut TableSet,
        source: &str,
    ) -> Flattened {
        if node.is_leaf() {
            if !node.attributes.is_empty() {
                warn!(
                    source,
                    line = node.line,
                    tag = %node.tag,
                    attributes = ?node.attributes,
                    "Ignoring attributes on leaf element"
                );
            }
            let value = node
                .text
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from);
            return Flattened::Folded {
                key: node.tag.clone(),
                value,
            };
        }

        // Register the row before recursing so children can point at it
        let index = tables.push_row(&node.tag, Row::linked(node.line, context));

        let id = node
            .attributes
            .get(&self.config.id_attribute)
            .map(String::as_str)
            .unwrap_or("");
        let child_context = Linkage::child_of(&node.tag, index, id);

        // Collected separately: recursion may grow this same table
        let mut fields = Row::new();
        for (name, value) in &node.attributes {
            if self.is_reserved(name, node, source) {
                continue;
            }
            fields.fold(name, value);
        }

        for child in &node.children {
            if let Flattened::Folded {
                key,
                value: Some(value),
            } = self.flatten_node(child, &child_context, tables, source)
            {
                if self.is_reserved(&key, node, source) {
                    continue;
                }
                fields.fold(&key, &value);
            }
        }

        if let Some(text) = node.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            fields.insert(TEXT, text.into());
        }

        if let Some(row) = tables.row_mut(&node.tag, index) {
            for (name, value) in fields.iter() {
                row.insert(name.clone(), value.clone());
            }
        }

        Flattened::Materialized
    }

    fn is_reserved(&self, name: &str, node: &Node, source: &str) -> bool {
        let reserved = RESERVED_FIELDS.contains(&name);
        if reserved {
            warn!(source, line = node.line, field = name, "Dropping field that shadows a linkage column");
        }
        reserved
    }
}
