//! Output sinks for melted documents
//!
//! A [`Sink`] receives each document's named tables once. Rows are stamped with
//! `SOURCE_FILE` and `SOURCE_TAG` on the way out.

use crate::error::{MeltError, Result};
use crate::melt::processor::SourceIdentity;
use crate::melt::types::{Cell, NamedTables, Sheets};
use crate::melt::workbook::{workbook_path, write_workbook, WorkbookFormat};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Column naming the source document of each row
pub const SOURCE_FILE: &str = "SOURCE_FILE";
/// Column naming the tag a sheet was built from
pub const SOURCE_TAG: &str = "SOURCE_TAG";

/// Destination for a document's named tables
pub trait Sink {
    fn write(&mut self, source: &SourceIdentity, tables: &NamedTables) -> Result<()>;
}

/// Rows as they are written: `SOURCE_FILE` and `SOURCE_TAG` first
fn sheets_for(source: &SourceIdentity, tables: &NamedTables) -> Sheets {
    let file = Cell::Text(source.source_file());
    tables
        .iter()
        .map(|(identifier, table)| {
            let leading = [(SOURCE_FILE, file.clone()), (SOURCE_TAG, Cell::text(table.tag.as_str()))];
            let rows = table.rows.iter().map(|row| row.with_leading(&leading)).collect();
            (identifier.clone(), rows)
        })
        .collect()
}

/// Writes one workbook file per document into an output directory
pub struct WorkbookSink {
    output_dir: PathBuf,
    format: WorkbookFormat,
    dry_run: bool,
    written: Vec<PathBuf>,
}

impl WorkbookSink {
    pub fn new<P: Into<PathBuf>>(output_dir: P, format: WorkbookFormat, dry_run: bool) -> Result<Self> {
        let output_dir = output_dir.into();
        if !dry_run {
            std::fs::create_dir_all(&output_dir)?;
        }
        Ok(WorkbookSink {
            output_dir,
            format,
            dry_run,
            written: Vec::new(),
        })
    }

    /// Workbooks written so far, in write order
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl Sink for WorkbookSink {
    fn write(&mut self, source: &SourceIdentity, tables: &NamedTables) -> Result<()> {
        let path = workbook_path(&self.output_dir, &source.workbook, self.format);
        if self.dry_run {
            info!(path = %path.display(), sheets = tables.len(), "Dry run: would write workbook");
            return Ok(());
        }

        let sheets = sheets_for(source, tables);
        write_workbook(&path, &sheets)
            .map_err(|e| MeltError::sink(source.source_file(), e))?;
        debug!(path = %path.display(), sheets = sheets.len(), "Wrote workbook");
        self.written.push(path);
        Ok(())
    }
}

/// Keeps workbooks in memory, keyed by workbook name
#[derive(Debug, Default)]
pub struct MemorySink {
    workbooks: BTreeMap<String, Sheets>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn workbook(&self, name: &str) -> Option<&Sheets> {
        self.workbooks.get(name)
    }

    /// Workbooks sorted by name, the order the aggregator expects
    pub fn into_sources(self) -> Vec<(String, Sheets)> {
        self.workbooks.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.workbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workbooks.is_empty()
    }
}

impl Sink for MemorySink {
    fn write(&mut self, source: &SourceIdentity, tables: &NamedTables) -> Result<()> {
        self.workbooks
            .insert(source.workbook.clone(), sheets_for(source, tables));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::types::{Linkage, NamedTable, Row};
    use crate::melt::workbook::read_workbook;
    use tempfile::TempDir;

    fn tables() -> NamedTables {
        let mut row = Row::linked(4, &Linkage::root());
        row.insert("name", Cell::text("Alice"));
        let mut tables = NamedTables::new();
        tables.insert(
            "user".to_string(),
            NamedTable {
                tag: "user".to_string(),
                rows: vec![row],
            },
        );
        tables
    }

    #[test]
    fn test_workbook_sink_writes_jsonl() {
        let dir = TempDir::new().unwrap();
        let mut sink = WorkbookSink::new(dir.path(), WorkbookFormat::Jsonl, false).unwrap();
        let source = SourceIdentity::new("in/users.xml", "_users");

        sink.write(&source, &tables()).unwrap();
        assert_eq!(sink.written().len(), 1);

        let text = std::fs::read_to_string(dir.path().join("_users.jsonl")).unwrap();
        assert!(text.starts_with(r#"{"sheet":"user","row":{"SOURCE_FILE":"in/users.xml","SOURCE_TAG":"user","#));

        let sheets = read_workbook(dir.path().join("_users.jsonl")).unwrap();
        assert_eq!(sheets["user"][0].get("name"), Some(&Cell::text("Alice")));
    }

    #[test]
    fn test_workbook_sink_writes_xlsx() {
        let dir = TempDir::new().unwrap();
        let mut sink = WorkbookSink::new(dir.path(), WorkbookFormat::Xlsx, false).unwrap();
        sink.write(&SourceIdentity::new("course/users.xml", "_course_users"), &tables())
            .unwrap();
        assert_eq!(sink.written(), &[dir.path().join("_course_users.xlsx")]);

        let sheets = read_workbook(dir.path().join("_course_users.xlsx")).unwrap();
        let user = &sheets["user"][0];
        let columns: Vec<&str> = user.field_names().take(3).collect();
        assert_eq!(columns, vec!["SOURCE_FILE", "SOURCE_TAG", "SOURCE_LINE"]);
        assert_eq!(user.get("SOURCE_FILE"), Some(&Cell::text("course/users.xml")));
        assert_eq!(user.get("name"), Some(&Cell::text("Alice")));
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let mut sink = WorkbookSink::new(&out, WorkbookFormat::Xlsx, true).unwrap();
        sink.write(&SourceIdentity::new("users.xml", "_users"), &tables()).unwrap();
        assert!(!out.exists());
        assert!(sink.written().is_empty());
    }

    #[test]
    fn test_unwritable_output_is_a_sink_error() {
        let dir = TempDir::new().unwrap();
        let mut sink = WorkbookSink::new(dir.path(), WorkbookFormat::Xlsx, false).unwrap();
        // A directory where the workbook file should go
        std::fs::create_dir(dir.path().join("_users.xlsx")).unwrap();

        let err = sink
            .write(&SourceIdentity::new("users.xml", "_users"), &tables())
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_memory_sink_orders_sources() {
        let mut sink = MemorySink::new();
        sink.write(&SourceIdentity::new("b.xml", "_b"), &tables()).unwrap();
        sink.write(&SourceIdentity::new("a.xml", "_a"), &tables()).unwrap();
        let names: Vec<String> = sink.into_sources().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["_a", "_b"]);
    }
}
