//! XML melting - flatten nested XML documents into relational tables
//!
//! Every element with children becomes a row in a table named after its tag;
//! childless elements fold into their parent row as fields. Each row carries
//! the linkage back to its structural parent.
//!
//! ## Pipeline
//!
//! [`Document`] → [`XmlMelter`] → [`prune`] → [`SheetNamer`] → enrichment → [`Sink`]
//!
//! [`DocumentProcessor`] drives the whole chain for one document.

pub mod types;
pub mod document;
pub mod extractor;
pub mod prune;
pub mod naming;
pub mod processor;
pub mod workbook;
pub mod writer;

pub use types::{Cell, Linkage, MeltConfig, NamedTable, NamedTables, Row, Sheets, TableSet};
pub use document::{Document, Node};
pub use extractor::{Flattened, XmlMelter};
pub use prune::prune;
pub use naming::{SheetNamer, MAX_IDENTIFIER_LEN};
pub use processor::{DocumentProcessor, SourceIdentity};
pub use workbook::{read_workbook, workbook_path, write_workbook, WorkbookFormat};
pub use writer::{MemorySink, Sink, WorkbookSink};
