//! # xmelt - XML to relational tables
//!
//! Flattens nested XML documents into tables of rows that keep a link to their
//! structural parent, then merges those tables across documents.
//!
//! ## Modules
//!
//! - **melt**: Parse, flatten, prune and name the tables of one document
//! - **enrich**: Per-row column decoders (timestamps, base64, markup, geo-IP, pseudonyms)
//! - **aggregate**: Merge workbooks while keeping parent indexes valid
//! - **batch**: Run a directory of documents end to end
//! - **archive**: Expand the XML members of a backup archive
//!
//! ## Quick Start
//!
//! ```rust
//! use xmelt::melt::{Cell, Document, MeltConfig, XmlMelter};
//!
//! # fn main() -> xmelt::Result<()> {
//! let xml = r#"<course id="9"><section id="1"><item>hi</item></section></course>"#;
//! let doc = Document::parse("course.xml", xml, &MeltConfig::default())?;
//! let tables = XmlMelter::new(MeltConfig::default()).melt(&doc);
//!
//! let section = &tables.rows("section").unwrap()[0];
//! assert_eq!(section.parent_table(), "course");
//! assert_eq!(section.get("item"), Some(&Cell::text("hi")));
//! assert!(!tables.contains("item"));
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod archive;
pub mod batch;
pub mod config;
pub mod context;
pub mod enrich;
pub mod error;
pub mod logging;
pub mod melt;

// Re-export commonly used types for convenience
pub use aggregate::{aggregate, aggregate_directory};
pub use batch::{workbook_name, BatchReport, Extractor};
pub use config::ExtractorConfig;
pub use context::BatchContext;
pub use enrich::{EnrichmentPipeline, Enricher, LookupConfig, PseudonymRegistry, PseudonymStrategy};
pub use error::{MeltError, Result};
pub use logging::init_logging;
pub use melt::{
    Document, DocumentProcessor, MeltConfig, MemorySink, NamedTables, Row, Sheets, Sink, SourceIdentity,
    WorkbookFormat, WorkbookSink, XmlMelter,
};

/// Melt one XML string into named, pruned tables
///
/// Convenience for callers that do not need enrichment or a sink. Returns
/// `None` when no table carries data.
pub fn melt_xml(source: &str, xml: &str, config: MeltConfig) -> Result<Option<NamedTables>> {
    let document = Document::parse(source, xml, &config)?;
    let processor = DocumentProcessor::new(config, EnrichmentPipeline::new(String::new()));
    Ok(processor.melt(&document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::Cell;

    #[test]
    fn test_basic_melting() {
        let xml = r#"<forum id="3"><name>News</name><post id="10"><subject>Hi</subject></post><post id="11"><subject>Re</subject></post></forum>"#;
        let tables = melt_xml("forum.xml", xml, MeltConfig::default()).unwrap().unwrap();

        assert_eq!(tables.keys().collect::<Vec<_>>(), vec!["forum", "post"]);
        let posts = &tables["post"].rows;
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].get("subject"), Some(&Cell::text("Re")));
        assert_eq!(posts[1].linkage().id, "3");
    }

    #[test]
    fn test_nothing_to_melt() {
        assert!(melt_xml("a.xml", "<a/>", MeltConfig::default()).unwrap().is_none());
    }
}
