//! Per-document pipeline: flatten, prune, name, enrich, sink
//!
//! [`DocumentProcessor::melt`] is pure and may run on any thread; enrichment and
//! sinking need the batch context and run in document order.

use crate::enrich::EnrichmentPipeline;
use crate::error::Result;
use crate::melt::document::Document;
use crate::melt::extractor::XmlMelter;
use crate::melt::naming::SheetNamer;
use crate::melt::prune::prune;
use crate::melt::types::{Cell, MeltConfig, NamedTable, NamedTables, PARENT_TABLE};
use crate::melt::writer::Sink;
use crate::BatchContext;
use std::collections::HashMap;
use std::path::{Component, PathBuf};
use tracing::debug;

/// Where a document came from and which workbook its tables go to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    /// Path of the source document, relative to the input directory in a batch
    pub path: PathBuf,
    /// Workbook name, without extension
    pub workbook: String,
}

impl SourceIdentity {
    pub fn new(path: impl Into<PathBuf>, workbook: impl Into<String>) -> Self {
        SourceIdentity {
            path: path.into(),
            workbook: workbook.into(),
        }
    }

    /// The document path as recorded in `SOURCE_FILE`: `/`-separated, no `.` segments
    pub fn source_file(&self) -> String {
        let parts: Vec<String> = self
            .path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        parts.join("/")
    }
}

pub struct DocumentProcessor {
    melter: XmlMelter,
    pipeline: EnrichmentPipeline,
}

impl DocumentProcessor {
    pub fn new(config: MeltConfig, pipeline: EnrichmentPipeline) -> Self {
        DocumentProcessor {
            melter: XmlMelter::new(config),
            pipeline,
        }
    }

    pub fn config(&self) -> &MeltConfig {
        self.melter.config()
    }

    /// Flatten, prune and name a document's tables
    ///
    /// Returns `None` when nothing survives pruning. `PARENT_TABLE` values are
    /// rewritten to the parent's output identifier.
    pub fn melt(&self, document: &Document) -> Option<NamedTables> {
        let mut tables = self.melter.melt(document);
        let survivors = prune(&mut tables);
        if survivors.is_empty() {
            debug!(source = %document.source, "No tables survived pruning");
            return None;
        }

        let mut namer = SheetNamer::new();
        let identifiers: HashMap<String, String> = survivors
            .iter()
            .map(|name| (name.clone(), namer.name(name)))
            .collect();

        let mut named = NamedTables::with_capacity(survivors.len());
        for name in &survivors {
            let mut rows = tables.take(name).unwrap_or_default();
            for row in &mut rows {
                let parent = row.parent_table();
                if parent.is_empty() {
                    continue;
                }
                if let Some(identifier) = identifiers.get(parent) {
                    if identifier != parent {
                        let identifier = identifier.clone();
                        row.insert(PARENT_TABLE, Cell::Text(identifier));
                    }
                }
            }
            named.insert(
                identifiers[name].clone(),
                NamedTable {
                    tag: name.clone(),
                    rows,
                },
            );
        }
        Some(named)
    }

    /// Run the enrichment pipeline over melted tables
    pub fn enrich(&self, source: &SourceIdentity, tables: &mut NamedTables, ctx: &mut BatchContext) -> Result<()> {
        self.pipeline.apply(&source.source_file(), tables, ctx)
    }

    /// Melt, enrich and sink one document
    ///
    /// Returns whether anything was written.
    pub fn process(
        &self,
        source: &SourceIdentity,
        document: &Document,
        ctx: &mut BatchContext,
        sink: &mut dyn Sink,
    ) -> Result<bool> {
        match self.melt(document) {
            Some(tables) => self.finish(source, tables, ctx, sink),
            None => Ok(false),
        }
    }

    /// Enrich and sink tables that were already melted
    pub fn finish(
        &self,
        source: &SourceIdentity,
        mut tables: NamedTables,
        ctx: &mut BatchContext,
        sink: &mut dyn Sink,
    ) -> Result<bool> {
        self.enrich(source, &mut tables, ctx)?;
        sink.write(source, &tables)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{LookupConfig, PseudonymRegistry, PseudonymStrategy};
    use crate::melt::types::{PARENT_ROW_INDEX, SOURCE_LINE};
    use crate::melt::writer::MemorySink;

    fn processor() -> DocumentProcessor {
        DocumentProcessor::new(MeltConfig::default(), EnrichmentPipeline::new("$@NULL@$"))
    }

    fn parse(xml: &str) -> Document {
        Document::parse("test.xml", xml, &MeltConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_document_yields_nothing() {
        assert!(processor().melt(&parse("<a><b/></a>")).is_none());
    }

    #[test]
    fn test_parent_table_uses_identifier() {
        let long = "question_multichoice_answer_feedback_items";
        let xml = format!("<{long} id=\"1\"><child x=\"1\"><leaf>v</leaf></child></{long}>");
        let tables = processor().melt(&parse(&xml)).unwrap();

        let keys: Vec<&str> = tables.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["quest...nswer_feedback_items", "child"]);
        assert_eq!(tables["quest...nswer_feedback_items"].tag, long);

        let child = &tables["child"].rows[0];
        assert_eq!(child.parent_table(), "quest...nswer_feedback_items");
        assert_eq!(child.get(PARENT_ROW_INDEX), Some(&Cell::Int(0)));
    }

    #[test]
    fn test_process_hands_tables_to_sink() {
        let mut sink = MemorySink::new();
        let mut ctx = BatchContext::new(LookupConfig::default(), PseudonymRegistry::new(PseudonymStrategy::None, None));
        let source = SourceIdentity::new("dir/course.xml", "_dir_course");

        let wrote = processor()
            .process(&source, &parse("<course id=\"9\"><name>x</name></course>"), &mut ctx, &mut sink)
            .unwrap();
        assert!(wrote);

        let sheets = sink.workbook("_dir_course").unwrap();
        assert_eq!(sheets["course"][0].get(SOURCE_LINE), Some(&Cell::Int(1)));
        assert_eq!(sheets["course"][0].get("name"), Some(&Cell::text("x")));
    }

    #[test]
    fn test_short_name_cannot_overwrite_elided_table() {
        let long = "question_multichoice_answer_feedback_items";
        let short = "quest...nswer_feedback_items";
        let xml = format!("<r><{long} id=\"1\"><v>1</v></{long}><{short} id=\"2\"><v>2</v></{short}></r>");
        let tables = processor().melt(&parse(&xml)).unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[short].tag, long);
        assert_eq!(tables[short].rows[0].get("v"), Some(&Cell::text("1")));
        let numbered = format!("{short}2");
        assert_eq!(tables[numbered.as_str()].tag, short);
        assert_eq!(tables[numbered.as_str()].rows[0].get("v"), Some(&Cell::text("2")));
    }

    #[test]
    fn test_source_file_name() {
        let source = SourceIdentity::new("./a/b/forum.xml", "_a_b_forum");
        assert_eq!(source.source_file(), "a/b/forum.xml");
    }
}
