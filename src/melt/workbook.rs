//! Workbook files on disk
//!
//! A workbook is a set of named sheets of rows. Two file formats are
//! supported and picked by extension:
//!
//! - `.xlsx`: one worksheet per sheet, a header row of column names and a
//!   leading `INDEX` column holding each row's 0-based position, which is what
//!   `PARENT_ROW_INDEX` refers to. Blank cells read back as empty text.
//! - `.jsonl`: one `{"sheet", "row"}` record per line, lossless.

use crate::error::{MeltError, Result};
use crate::melt::types::{Cell, Row, Sheets};
use calamine::{open_workbook, Data, Reader, Xlsx};
use indexmap::IndexSet;
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Header of the leading row-position column of xlsx sheets
pub const ROW_INDEX_COLUMN: &str = "INDEX";

/// Longest text a spreadsheet cell holds
const MAX_CELL_CHARS: usize = 32_767;

/// On-disk workbook format
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkbookFormat {
    #[default]
    Xlsx,
    Jsonl,
}

impl WorkbookFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Jsonl => "jsonl",
        }
    }

    /// Format of a workbook file, from its extension
    pub fn of_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "xlsx" => Some(Self::Xlsx),
            "jsonl" => Some(Self::Jsonl),
            _ => None,
        }
    }
}

impl fmt::Display for WorkbookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for WorkbookFormat {
    type Err = MeltError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xlsx" => Ok(Self::Xlsx),
            "jsonl" => Ok(Self::Jsonl),
            other => Err(MeltError::invalid_config(format!(
                "workbook format should be 'xlsx' or 'jsonl', got '{}'",
                other
            ))),
        }
    }
}

/// Path of a workbook inside an output directory
pub fn workbook_path<P: AsRef<Path>>(output_dir: P, workbook: &str, format: WorkbookFormat) -> PathBuf {
    output_dir
        .as_ref()
        .join(format!("{}.{}", workbook, format.extension()))
}

fn format_of(path: &Path) -> Result<WorkbookFormat> {
    WorkbookFormat::of_path(path)
        .ok_or_else(|| MeltError::workbook(path, "unknown workbook extension, expected .xlsx or .jsonl"))
}

/// Write sheets to `path` in the format its extension names
pub fn write_workbook<P: AsRef<Path>>(path: P, sheets: &Sheets) -> Result<()> {
    let path = path.as_ref();
    match format_of(path)? {
        WorkbookFormat::Xlsx => write_xlsx(path, sheets),
        WorkbookFormat::Jsonl => write_jsonl(path, sheets),
    }
}

/// Read a workbook back into sheets, keeping sheet order
pub fn read_workbook<P: AsRef<Path>>(path: P) -> Result<Sheets> {
    let path = path.as_ref();
    match format_of(path)? {
        WorkbookFormat::Xlsx => read_xlsx(path),
        WorkbookFormat::Jsonl => read_jsonl(path),
    }
}

#[derive(Debug, Serialize)]
struct RecordRef<'a> {
    sheet: &'a str,
    row: &'a Row,
}

#[derive(Debug, Deserialize)]
struct Record {
    sheet: String,
    row: Row,
}

fn write_jsonl(path: &Path, sheets: &Sheets) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    for (sheet, rows) in sheets {
        for row in rows {
            let json = serde_json::to_string(&RecordRef { sheet, row })?;
            writeln!(writer, "{}", json)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn read_jsonl(path: &Path) -> Result<Sheets> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut sheets = Sheets::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)?;
        sheets.entry(record.sheet).or_default().push(record.row);
    }
    Ok(sheets)
}

fn write_xlsx(path: &Path, sheets: &Sheets) -> Result<()> {
    let xlsx_err = |e: XlsxError| MeltError::workbook(path, e);
    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(name.as_str()).map_err(xlsx_err)?;
        write_sheet(worksheet, name, rows).map_err(xlsx_err)?;
    }
    workbook.save(path).map_err(xlsx_err)?;
    Ok(())
}

fn write_sheet(worksheet: &mut Worksheet, name: &str, rows: &[Row]) -> std::result::Result<(), XlsxError> {
    let columns: IndexSet<&str> = rows.iter().flat_map(|row| row.field_names()).collect();

    worksheet.write_string(0, 0, ROW_INDEX_COLUMN)?;
    for (c, column) in columns.iter().enumerate() {
        worksheet.write_string(0, column_number(c + 1)?, *column)?;
    }

    for (r, row) in rows.iter().enumerate() {
        let line = u32::try_from(r + 1).map_err(|_| XlsxError::RowColumnLimitError)?;
        worksheet.write_number(line, 0, r as f64)?;
        for (c, column) in columns.iter().enumerate() {
            let col = column_number(c + 1)?;
            match row.get(column) {
                None | Some(Cell::Null) => {}
                Some(Cell::Int(n)) => {
                    worksheet.write_number(line, col, *n as f64)?;
                }
                Some(Cell::Float(x)) if x.is_finite() => {
                    worksheet.write_number(line, col, *x)?;
                }
                Some(Cell::Float(x)) => {
                    worksheet.write_string(line, col, x.to_string())?;
                }
                Some(Cell::Text(s)) if s.is_empty() => {}
                Some(Cell::Text(s)) => {
                    worksheet.write_string(line, col, clip(s, name, column))?;
                }
            }
        }
    }
    Ok(())
}

fn column_number(c: usize) -> std::result::Result<u16, XlsxError> {
    u16::try_from(c).map_err(|_| XlsxError::RowColumnLimitError)
}

fn clip<'a>(text: &'a str, sheet: &str, column: &str) -> &'a str {
    match text.char_indices().nth(MAX_CELL_CHARS) {
        Some((end, _)) => {
            warn!(sheet, column, chars = text.chars().count(), "Cell text truncated to the spreadsheet limit");
            &text[..end]
        }
        None => text,
    }
}

fn read_xlsx(path: &Path) -> Result<Sheets> {
    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| MeltError::workbook(path, e))?;
    let mut sheets = Sheets::new();

    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| MeltError::workbook(path, e))?;
        let mut lines = range.rows();
        let header: Vec<String> = match lines.next() {
            Some(cells) => cells.iter().map(|c| c.to_string()).collect(),
            None => Vec::new(),
        };
        let skip = usize::from(header.first().is_some_and(|h| h == ROW_INDEX_COLUMN));

        let rows = lines
            .map(|cells| {
                header
                    .iter()
                    .zip(cells)
                    .skip(skip)
                    .map(|(column, data)| (column.clone(), cell_from(data)))
                    .collect::<Row>()
            })
            .collect();
        sheets.insert(name, rows);
    }
    Ok(sheets)
}

fn cell_from(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::empty(),
        Data::Int(n) => Cell::Int(*n),
        // Spreadsheets store every number as a float
        Data::Float(x) if x.fract() == 0.0 && x.abs() < 9.0e15 => Cell::Int(*x as i64),
        Data::Float(x) => Cell::Float(*x),
        Data::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}
