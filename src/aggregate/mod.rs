//! Merging workbooks that share sheet identifiers
//!
//! Rows of later sources are appended after earlier ones, so a child's
//! `PARENT_ROW_INDEX` has to be shifted by the number of parent rows merged
//! before its own source. Roots are left alone.
//!
//! ## Example
//!
//! ```rust
//! use xmelt::aggregate::aggregate;
//! use xmelt::melt::{Cell, Linkage, Row, Sheets};
//!
//! # fn main() -> xmelt::Result<()> {
//! let source = |users: usize| {
//!     let mut sheets = Sheets::new();
//!     sheets.insert("user".to_string(), vec![Row::linked(1, &Linkage::root()); users]);
//!     sheets.insert("pref".to_string(), vec![Row::linked(2, &Linkage::child_of("user", 0, ""))]);
//!     sheets
//! };
//!
//! let merged = aggregate(&[("a".to_string(), source(3)), ("b".to_string(), source(2))])?;
//! assert_eq!(merged["user"].len(), 5);
//! assert_eq!(merged["pref"][1].parent_row_index(), Some(3));
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod grouping;

pub use catalog::{write_catalog, CATALOG_FILE};
pub use grouping::{run_pass, CommonObjectGrouping, GroupingStrategy, SectionGrouping};

use crate::error::{MeltError, Result};
use crate::melt::types::{Cell, Row, Sheets, PARENT_ROW_INDEX};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What the aggregation passes produced in an output directory
#[derive(Debug, Clone, Default)]
pub struct AggregationSummary {
    /// Workbooks merged across numbered sections
    pub sections: Vec<PathBuf>,
    /// `ALL_<name>` workbooks
    pub common: Vec<PathBuf>,
    pub catalog: PathBuf,
}

/// Run both grouping passes over `dir`, then write the column catalog
pub fn aggregate_directory(dir: &Path, dry_run: bool) -> Result<AggregationSummary> {
    let sections = run_pass(&SectionGrouping, dir, dry_run)?;
    let common = run_pass(&CommonObjectGrouping, dir, dry_run)?;
    let catalog = write_catalog(dir, dry_run)?;
    Ok(AggregationSummary {
        sections,
        common,
        catalog,
    })
}

/// Merge per-source sheets into one set of sheets
///
/// Sources are merged in the order given; callers sort them. A row whose
/// parent table is not a sheet of its own source is a [`MeltError::DanglingParent`].
pub fn aggregate(sources: &[(String, Sheets)]) -> Result<Sheets> {
    let mut merged = Sheets::new();

    for (source, sheets) in sources {
        // Offsets are fixed before any of this source's rows are appended
        let offsets: HashMap<&str, usize> = sheets
            .keys()
            .map(|id| (id.as_str(), merged.get(id).map_or(0, Vec::len)))
            .collect();
        debug!(source = %source, sheets = sheets.len(), "Aggregating source");

        for (identifier, rows) in sheets {
            let rebased = rows
                .iter()
                .enumerate()
                .map(|(index, row)| rebase(source, identifier, index, row, &offsets))
                .collect::<Result<Vec<Row>>>()?;
            merged.entry(identifier.clone()).or_default().extend(rebased);
        }
    }

    Ok(merged)
}

fn rebase(
    source: &str,
    identifier: &str,
    index: usize,
    row: &Row,
    offsets: &HashMap<&str, usize>,
) -> Result<Row> {
    let parent = row.parent_table();
    if parent.is_empty() {
        return Ok(row.clone());
    }

    let offset = *offsets.get(parent).ok_or_else(|| MeltError::DanglingParent {
        source_name: source.to_string(),
        table: identifier.to_string(),
        parent: parent.to_string(),
        row: index,
    })?;

    let current = row.get(PARENT_ROW_INDEX).cloned().unwrap_or(Cell::Null);
    let position = current.as_int().ok_or_else(|| MeltError::InvalidParentIndex {
        table: identifier.to_string(),
        row: index,
        value: current.to_string(),
    })?;
    let shifted = position + offset as i64;

    let mut row = row.clone();
    // Keep the encoding the source used
    let value = match current {
        Cell::Text(_) => Cell::Text(shifted.to_string()),
        _ => Cell::Int(shifted),
    };
    row.insert(PARENT_ROW_INDEX, value);
    Ok(row)
}
