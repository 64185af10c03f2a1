//! Tab-separated index of every column of every final workbook

use crate::aggregate::grouping::list_workbooks;
use crate::error::Result;
use crate::melt::workbook::read_workbook;
use indexmap::IndexSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the catalog inside the output directory
pub const CATALOG_FILE: &str = "__All_COLUMNS.csv";

/// One `(file, sheet, column)` entry per column, in workbook and field order
pub fn catalog_entries<P: AsRef<Path>>(dir: P) -> Result<Vec<[String; 3]>> {
    let mut entries = Vec::new();
    for path in list_workbooks(dir)? {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for (sheet, rows) in read_workbook(&path)? {
            let columns: IndexSet<&str> = rows.iter().flat_map(|row| row.field_names()).collect();
            for column in columns {
                entries.push([file.clone(), sheet.clone(), column.to_string()]);
            }
        }
    }
    Ok(entries)
}

/// Write `__All_COLUMNS.csv` into `dir`
pub fn write_catalog<P: AsRef<Path>>(dir: P, dry_run: bool) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let path = dir.join(CATALOG_FILE);
    let entries = catalog_entries(dir)?;
    if dry_run {
        info!(path = %path.display(), columns = entries.len(), "Dry run: would write column catalog");
        return Ok(path);
    }

    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(&path)?;
    writer.write_record(["file", "sheet", "column"])?;
    for entry in &entries {
        writer.write_record(entry)?;
    }
    writer.flush()?;
    info!(path = %path.display(), columns = entries.len(), "Wrote column catalog");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::types::{Cell, Linkage, Row, Sheets};
    use crate::melt::workbook::write_workbook;
    use tempfile::TempDir;

    #[test]
    fn test_catalog_lists_union_of_columns() {
        let dir = TempDir::new().unwrap();
        let mut a = Row::linked(1, &Linkage::root());
        a.insert("name", Cell::text("x"));
        let mut b = Row::linked(2, &Linkage::root());
        b.insert("email", Cell::text("y"));
        let mut sheets = Sheets::new();
        sheets.insert("user".to_string(), vec![a, b]);
        write_workbook(dir.path().join("users.jsonl"), &sheets).unwrap();

        let path = write_catalog(dir.path(), false).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "file\tsheet\tcolumn");
        assert_eq!(lines[1], "users.jsonl\tuser\tSOURCE_LINE");
        assert_eq!(lines.len(), 1 + 6);
        assert!(lines.contains(&"users.jsonl\tuser\temail"));
    }

    #[test]
    fn test_catalog_reads_xlsx_and_skips_lock_files() {
        let dir = TempDir::new().unwrap();
        let mut row = Row::linked(1, &Linkage::root());
        row.insert("name", Cell::text("x"));
        let mut sheets = Sheets::new();
        sheets.insert("course".to_string(), vec![row]);
        write_workbook(dir.path().join("ALL_course.xlsx"), &sheets).unwrap();
        std::fs::write(dir.path().join("~$ALL_course.xlsx"), b"lock").unwrap();

        let entries = catalog_entries(dir.path()).unwrap();
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|[file, sheet, _]| file == "ALL_course.xlsx" && sheet == "course"));
        assert!(!entries.iter().any(|[_, _, column]| column == "INDEX"));
    }

    #[test]
    fn test_catalog_ignores_itself() {
        let dir = TempDir::new().unwrap();
        write_catalog(dir.path(), false).unwrap();
        assert!(catalog_entries(dir.path()).unwrap().is_empty());
    }
}
