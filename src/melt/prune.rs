//! Dropping structurally empty tables
//!
//! A table whose rows carry nothing but the reserved linkage fields adds no
//! information. It is dropped, and every row that pointed into it is re-adopted
//! by the dropped row's own parent.

use crate::melt::types::TableSet;
use std::collections::HashSet;
use tracing::debug;

/// Drop empty tables and re-link their children
///
/// Returns the surviving table names in registration order. Dropped tables stay
/// in `tables` so their linkage can still be consulted; callers only emit the
/// survivors.
pub fn prune(tables: &mut TableSet) -> Vec<String> {
    let dropped: HashSet<usize> = tables
        .iter()
        .enumerate()
        .filter(|(_, (_, rows))| !rows.iter().any(|row| row.has_content()))
        .map(|(position, _)| position)
        .collect();

    if !dropped.is_empty() {
        readopt(tables, &dropped);
    }

    tables
        .names()
        .enumerate()
        .filter(|(position, name)| {
            let keep = !dropped.contains(position);
            if !keep {
                debug!(table = name, "Skipping table with only linkage fields");
            }
            keep
        })
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Point every row whose parent lives in a dropped table at the nearest
/// ancestor outside the dropped set.
///
/// Each hop copies the parent row's own linkage, so a row climbs one
/// generation at a time until its parent table survives or it becomes a root.
/// Hops always move to a strict ancestor, which bounds the loop.
fn readopt(tables: &mut TableSet, dropped: &HashSet<usize>) {
    for position in 0..tables.len() {
        for index in 0..tables.rows_at(position).len() {
            loop {
                let row = &tables.rows_at(position)[index];
                let Some(parent) = tables.position(row.parent_table()) else {
                    break;
                };
                if !dropped.contains(&parent) {
                    break;
                }
                let Some(parent_index) = row.parent_row_index() else {
                    break;
                };
                let Some(linkage) = tables.rows_at(parent).get(parent_index).map(|r| r.linkage()) else {
                    break;
                };
                tables.rows_at_mut(position)[index].set_linkage(linkage);
            }
        }
    }
}
