//! Deciding which workbooks merge into which
//!
//! Pass 1 ([`SectionGrouping`]) folds workbooks that differ only by a numeric
//! section segment. Pass 2 ([`CommonObjectGrouping`]) folds everything sharing
//! the trailing name segment into `ALL_<segment>`. Consumed inputs are moved
//! into a parts sub-directory so a pass never sees its own inputs twice.

use crate::aggregate::aggregate;
use crate::error::Result;
use crate::melt::workbook::{read_workbook, workbook_path, write_workbook, WorkbookFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

/// Maps a workbook name (no extension) to the workbook it merges into
pub trait GroupingStrategy {
    fn name(&self) -> &'static str;

    /// Sub-directory that receives consumed inputs
    fn parts_dir(&self) -> &'static str;

    /// Target workbook, or `None` if the workbook is not grouped by this pass
    fn target(&self, workbook: &str) -> Option<String>;
}

/// `_activities_forum_12_forum` → `_activities_forum_ALLSECTIONS_forum`
pub struct SectionGrouping;

impl GroupingStrategy for SectionGrouping {
    fn name(&self) -> &'static str {
        "sections"
    }

    fn parts_dir(&self) -> &'static str {
        "_EACH_SECTION_"
    }

    fn target(&self, workbook: &str) -> Option<String> {
        let mut parts: Vec<&str> = workbook.split('_').collect();
        let n = parts.len();
        let mut numbered = None;
        if n > 3 && NUMERIC.is_match(parts[n - 3]) {
            numbered = Some(n - 3);
        }
        // The segment closest to the end wins
        if n > 2 && NUMERIC.is_match(parts[n - 2]) {
            numbered = Some(n - 2);
        }
        parts[numbered?] = "ALLSECTIONS";
        Some(parts.join("_"))
    }
}

/// `_activities_forum_ALLSECTIONS_forum` → `ALL_forum`
pub struct CommonObjectGrouping;

impl GroupingStrategy for CommonObjectGrouping {
    fn name(&self) -> &'static str {
        "common objects"
    }

    fn parts_dir(&self) -> &'static str {
        "_ALL_SECTIONS_"
    }

    fn target(&self, workbook: &str) -> Option<String> {
        if workbook.starts_with("ALL_") {
            return None;
        }
        let last = workbook.rsplit('_').next()?;
        Some(format!("ALL_{}", last))
    }
}

/// Workbook files directly inside `dir`, sorted by file name
///
/// Spreadsheet lock files (`~$name.xlsx`) are skipped.
pub fn list_workbooks<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let is_lock = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('~'));
        if path.is_file() && !is_lock && WorkbookFormat::of_path(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn workbook_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// Group the workbooks of `dir`, write each merged target, and move the inputs away
///
/// Workbooks only merge with workbooks of the same format; the target keeps
/// that format. Returns the targets that were produced, in name order.
pub fn run_pass<S: GroupingStrategy + ?Sized>(strategy: &S, dir: &Path, dry_run: bool) -> Result<Vec<PathBuf>> {
    let mut groups: BTreeMap<(String, WorkbookFormat), Vec<PathBuf>> = BTreeMap::new();
    for path in list_workbooks(dir)? {
        let (Some(stem), Some(format)) = (workbook_stem(&path), WorkbookFormat::of_path(&path)) else {
            continue;
        };
        if let Some(target) = strategy.target(&stem) {
            groups.entry((target, format)).or_default().push(path);
        }
    }
    info!(pass = strategy.name(), targets = groups.len(), "Aggregating workbooks");

    let mut produced = Vec::with_capacity(groups.len());
    for ((target, format), inputs) in &groups {
        let mut sources = Vec::with_capacity(inputs.len());
        for input in inputs {
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            sources.push((name, read_workbook(input)?));
        }
        let merged = aggregate(&sources)?;

        let output = workbook_path(dir, target, *format);
        if dry_run {
            info!(path = %output.display(), sources = sources.len(), "Dry run: would write aggregate");
        } else {
            write_workbook(&output, &merged)?;
            info!(path = %output.display(), sources = sources.len(), sheets = merged.len(), "Wrote aggregate");
        }
        produced.push(output);
    }

    move_inputs(dir, strategy.parts_dir(), groups.values().flatten(), dry_run)?;
    Ok(produced)
}

fn move_inputs<'a>(
    dir: &Path,
    parts_dir: &str,
    inputs: impl Iterator<Item = &'a PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let parts = dir.join(parts_dir);
    if dry_run {
        info!(dir = %parts.display(), "Dry run: not moving aggregated inputs");
        return Ok(());
    }
    std::fs::create_dir_all(&parts)?;
    for input in inputs {
        if let Some(name) = input.file_name() {
            std::fs::rename(input, parts.join(name))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::types::{Cell, Linkage, Row, Sheets};
    use tempfile::TempDir;

    fn section(users: usize) -> Sheets {
        let mut sheets = Sheets::new();
        sheets.insert("forum".to_string(), vec![Row::linked(1, &Linkage::root()); users]);
        let mut post = Row::linked(2, &Linkage::child_of("forum", users - 1, "1"));
        post.insert("subject", Cell::text("hi"));
        sheets.insert("post".to_string(), vec![post]);
        sheets
    }

    #[test]
    fn test_section_segment_is_replaced() {
        let s = SectionGrouping;
        assert_eq!(
            s.target("_activities_forum_12_forum").as_deref(),
            Some("_activities_forum_ALLSECTIONS_forum")
        );
        assert_eq!(
            s.target("_sections_section_34_section").as_deref(),
            Some("_sections_section_ALLSECTIONS_section")
        );
    }

    #[test]
    fn test_third_from_last_segment() {
        let s = SectionGrouping;
        assert_eq!(
            s.target("_activities_quiz_7_x_quiz").as_deref(),
            Some("_activities_quiz_ALLSECTIONS_x_quiz")
        );
        // Both numeric: the later one is replaced
        assert_eq!(s.target("a_1_2_b").as_deref(), Some("a_1_ALLSECTIONS_b"));
    }

    #[test]
    fn test_unnumbered_names_are_not_grouped() {
        let s = SectionGrouping;
        assert_eq!(s.target("users"), None);
        assert_eq!(s.target("_course_course"), None);
        assert_eq!(s.target("12_x"), None);
    }

    #[test]
    fn test_section_pass_merges_xlsx_workbooks() {
        let dir = TempDir::new().unwrap();
        write_workbook(dir.path().join("_activities_forum_1_forum.xlsx"), &section(2)).unwrap();
        write_workbook(dir.path().join("_activities_forum_2_forum.xlsx"), &section(1)).unwrap();
        write_workbook(dir.path().join("users.jsonl"), &section(1)).unwrap();

        let produced = run_pass(&SectionGrouping, dir.path(), false).unwrap();
        let target = dir.path().join("_activities_forum_ALLSECTIONS_forum.xlsx");
        assert_eq!(produced, vec![target.clone()]);

        let merged = read_workbook(&target).unwrap();
        assert_eq!(merged["forum"].len(), 3);
        let parents: Vec<Option<usize>> = merged["post"].iter().map(|r| r.parent_row_index()).collect();
        assert_eq!(parents, vec![Some(1), Some(2)]);

        assert!(dir.path().join("_EACH_SECTION_/_activities_forum_1_forum.xlsx").is_file());
        assert!(dir.path().join("users.jsonl").is_file());
    }

    #[test]
    fn test_formats_are_grouped_apart() {
        let dir = TempDir::new().unwrap();
        write_workbook(dir.path().join("_a_course.xlsx"), &section(1)).unwrap();
        write_workbook(dir.path().join("_b_course.jsonl"), &section(1)).unwrap();

        let produced = run_pass(&CommonObjectGrouping, dir.path(), false).unwrap();
        assert_eq!(
            produced,
            vec![dir.path().join("ALL_course.xlsx"), dir.path().join("ALL_course.jsonl")]
        );
    }

    #[test]
    fn test_common_object_target() {
        let c = CommonObjectGrouping;
        assert_eq!(
            c.target("_activities_forum_ALLSECTIONS_forum").as_deref(),
            Some("ALL_forum")
        );
        assert_eq!(c.target("users").as_deref(), Some("ALL_users"));
        assert_eq!(c.target("ALL_forum"), None);
    }
}
