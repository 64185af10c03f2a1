//! Rows, cells and table sets shared by the melting stages

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Line in the source document that produced the row
pub const SOURCE_LINE: &str = "SOURCE_LINE";
/// Table (later: output identifier) of the structural parent, empty for roots
pub const PARENT_TABLE: &str = "PARENT_TABLE";
/// 0-based position of the parent row inside its table, empty for roots
pub const PARENT_ROW_INDEX: &str = "PARENT_ROW_INDEX";
/// The parent's `id` attribute, or empty
pub const PARENT_ID: &str = "PARENT_ID";
/// Text carried by a node that also has children
pub const TEXT: &str = "TEXT";

/// Linkage and provenance fields present on every row
pub const RESERVED_FIELDS: [&str; 4] = [SOURCE_LINE, PARENT_TABLE, PARENT_ROW_INDEX, PARENT_ID];

/// A single scalar value in a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn empty() -> Self {
        Cell::Text(String::new())
    }

    /// True for null and for empty text
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view, accepting string-encoded integers
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Cell::Int(n) => Some(*n),
            Cell::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Int(n) => write!(f, "{}", n),
            Cell::Float(x) => write!(f, "{}", x),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Int(n)
    }
}

/// Where a row hangs in the tree: parent table, parent row and parent id
#[derive(Debug, Clone, PartialEq)]
pub struct Linkage {
    pub table: String,
    pub row_index: Cell,
    pub id: String,
}

impl Linkage {
    /// Linkage of a structural root
    pub fn root() -> Self {
        Linkage {
            table: String::new(),
            row_index: Cell::empty(),
            id: String::new(),
        }
    }

    pub fn child_of(table: &str, row_index: usize, id: &str) -> Self {
        Linkage {
            table: table.to_string(),
            row_index: Cell::Int(row_index as i64),
            id: id.to_string(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.table.is_empty()
    }
}

/// One materialized record: reserved linkage fields plus whatever the node carried
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    fields: IndexMap<String, Cell>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    /// A row holding only the reserved fields
    pub fn linked(source_line: usize, linkage: &Linkage) -> Self {
        let mut row = Row::new();
        row.insert(SOURCE_LINE, Cell::Int(source_line as i64));
        row.set_linkage(linkage.clone());
        row
    }

    pub fn get(&self, field: &str) -> Option<&Cell> {
        self.fields.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Cell> {
        self.fields.get_mut(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Insert or overwrite a field, keeping its original position if present
    pub fn insert(&mut self, field: impl Into<String>, value: Cell) {
        self.fields.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Cell> {
        self.fields.shift_remove(field)
    }

    /// Add a folded leaf value; repeated keys are joined with a comma
    pub fn fold(&mut self, field: &str, value: &str) {
        match self.fields.get_mut(field) {
            Some(existing) => {
                let joined = format!("{},{}", existing, value);
                *existing = Cell::Text(joined);
            }
            None => {
                self.fields.insert(field.to_string(), Cell::text(value));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether the row carries anything besides the reserved fields
    pub fn has_content(&self) -> bool {
        self.fields
            .keys()
            .any(|k| !RESERVED_FIELDS.contains(&k.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Cell)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    /// Parent table name, empty for roots
    pub fn parent_table(&self) -> &str {
        self.fields
            .get(PARENT_TABLE)
            .and_then(Cell::as_str)
            .unwrap_or("")
    }

    /// Parent row position, if the row has a parent
    pub fn parent_row_index(&self) -> Option<usize> {
        self.fields
            .get(PARENT_ROW_INDEX)
            .and_then(Cell::as_int)
            .and_then(|n| usize::try_from(n).ok())
    }

    pub fn linkage(&self) -> Linkage {
        let text = |field: &str| {
            self.fields
                .get(field)
                .map(|c| c.to_string())
                .unwrap_or_default()
        };
        Linkage {
            table: text(PARENT_TABLE),
            row_index: self
                .fields
                .get(PARENT_ROW_INDEX)
                .cloned()
                .unwrap_or_else(Cell::empty),
            id: text(PARENT_ID),
        }
    }

    pub fn set_linkage(&mut self, linkage: Linkage) {
        self.fields.insert(PARENT_TABLE.to_string(), Cell::Text(linkage.table));
        self.fields.insert(PARENT_ROW_INDEX.to_string(), linkage.row_index);
        self.fields.insert(PARENT_ID.to_string(), Cell::Text(linkage.id));
    }

    /// Return a copy with the given fields placed in front of the existing ones
    pub fn with_leading(&self, leading: &[(&str, Cell)]) -> Row {
        let mut fields = IndexMap::with_capacity(self.fields.len() + leading.len());
        for (name, value) in leading {
            fields.insert(name.to_string(), value.clone());
        }
        for (name, value) in &self.fields {
            fields.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Row { fields }
    }
}

impl FromIterator<(String, Cell)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Cell)>>(iter: I) -> Self {
        Row {
            fields: iter.into_iter().collect(),
        }
    }
}

/// All tables produced by flattening one document, in first-seen order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSet {
    tables: IndexMap<String, Vec<Row>>,
}

impl TableSet {
    pub fn new() -> Self {
        TableSet::default()
    }

    /// Append a row, registering the table on first use. Returns the row's index.
    pub fn push_row(&mut self, table: &str, row: Row) -> usize {
        let rows = self.tables.entry(table.to_string()).or_default();
        rows.push(row);
        rows.len() - 1
    }

    pub fn rows(&self, table: &str) -> Option<&[Row]> {
        self.tables.get(table).map(|r| r.as_slice())
    }

    pub fn row_mut(&mut self, table: &str, index: usize) -> Option<&mut Row> {
        self.tables.get_mut(table).and_then(|rows| rows.get_mut(index))
    }

    /// Table names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Row])> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub(crate) fn position(&self, table: &str) -> Option<usize> {
        self.tables.get_index_of(table)
    }

    pub(crate) fn rows_at(&self, position: usize) -> &[Row] {
        &self.tables[position]
    }

    pub(crate) fn rows_at_mut(&mut self, position: usize) -> &mut Vec<Row> {
        &mut self.tables[position]
    }

    /// Take the rows of a table out of the set
    pub fn take(&mut self, table: &str) -> Option<Vec<Row>> {
        self.tables.shift_remove(table)
    }
}

/// A pruned table under its final output identifier
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTable {
    /// The tag name the table was built from
    pub tag: String,
    pub rows: Vec<Row>,
}

/// Output identifier → table, in first-seen order
pub type NamedTables = IndexMap<String, NamedTable>;

/// Output identifier → rows, the shape the aggregator works on
pub type Sheets = IndexMap<String, Vec<Row>>;

/// Configuration for flattening
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeltConfig {
    /// Attribute whose value children record as PARENT_ID
    pub id_attribute: String,

    /// Maximum element nesting accepted by the XML reader
    pub max_depth: usize,

    /// Value the source uses for null, replaced by empty text before enrichment
    pub null_marker: String,
}

impl Default for MeltConfig {
    fn default() -> Self {
        MeltConfig {
            id_attribute: String::from("id"),
            max_depth: 1000,
            null_marker: String::from("$@NULL@$"),
        }
    }
}
