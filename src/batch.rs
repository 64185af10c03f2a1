//! Running a whole directory of XML documents
//!
//! Documents of one directory are parsed and melted in parallel. Enrichment and
//! sinking then run one document at a time in a fixed order: the user lookup
//! document first, the remaining files by name, then sub-directories by name.
//! A failure confined to one document is recorded and the batch goes on; a
//! fatal error stops it.
//!
//! When the input is a backup archive, its XML members are expanded first.

use crate::aggregate::{aggregate_directory, AggregationSummary};
use crate::archive;
use crate::config::ExtractorConfig;
use crate::enrich::EnrichmentPipeline;
use crate::error::{MeltError, Result};
use crate::melt::{Document, DocumentProcessor, NamedTables, Sink, SourceIdentity, WorkbookSink};
use crate::BatchContext;
use rayon::prelude::*;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Outcome of one batch
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Documents whose tables reached the sink
    pub succeeded: Vec<PathBuf>,
    /// Documents with no table left after pruning
    pub empty: Vec<PathBuf>,
    /// Documents that could not be parsed or written, with the reason
    pub failed: Vec<(PathBuf, String)>,
    pub aggregation: Option<AggregationSummary>,
}

impl BatchReport {
    /// True only if no document failed
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn documents(&self) -> usize {
        self.succeeded.len() + self.empty.len() + self.failed.len()
    }

    fn record_failure(&mut self, path: &Path, err: MeltError) -> Result<()> {
        if err.is_fatal() {
            return Err(err);
        }
        warn!(path = %path.display(), error = %err, "Skipping document");
        self.failed.push((path.to_path_buf(), err.to_string()));
        Ok(())
    }
}

/// Output workbook name for a document
///
/// Directory components are joined with `_` and lose their dots; the file stem
/// loses `.xml` and its underscores, so underscores only separate path parts.
///
/// ```rust
/// use std::path::Path;
/// use xmelt::batch::workbook_name;
///
/// assert_eq!(workbook_name(Path::new(""), "users.xml"), "users");
/// assert_eq!(
///     workbook_name(Path::new("activities/forum_12"), "grade_history.xml"),
///     "_activities_forum_12_gradehistory"
/// );
/// ```
pub fn workbook_name(relative_dir: &Path, file_name: &str) -> String {
    let stem = file_name.replace(".xml", "").replace('_', "");
    let sub: Vec<String> = relative_dir
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().replace('.', "")),
            _ => None,
        })
        .collect();
    if sub.is_empty() {
        stem
    } else {
        format!("_{}_{}", sub.join("_"), stem)
    }
}

/// Drives extraction, pseudonym output and aggregation for one input directory
pub struct Extractor {
    config: ExtractorConfig,
    input_dir: PathBuf,
    processor: DocumentProcessor,
    context: BatchContext,
}

impl Extractor {
    /// Validate the configuration and load the pseudonym and geo-IP tables
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        config.validate()?;
        let context = BatchContext::from_config(&config)?;
        let pipeline = EnrichmentPipeline::from_config(&config)?;
        info!(enrichers = ?pipeline.enricher_names(), "Enrichment pipeline ready");
        let processor = DocumentProcessor::new(config.melt.clone(), pipeline);
        Ok(Extractor {
            input_dir: config.input_dir(),
            config,
            processor,
            context,
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn context(&self) -> &BatchContext {
        &self.context
    }

    /// Extract every document, write the pseudonym table, then aggregate
    pub fn run(&mut self) -> Result<BatchReport> {
        let output_dir = self.config.output_dir();
        info!(input = %self.input_dir.display(), output = %output_dir.display(), "Starting extraction");

        let mut sink = WorkbookSink::new(&output_dir, self.config.format, self.config.dry_run)?;
        let mut report = self.extract(&mut sink)?;
        self.write_pseudonyms()?;

        if self.config.aggregate {
            if output_dir.is_dir() {
                report.aggregation = Some(aggregate_directory(&output_dir, self.config.dry_run)?);
            } else {
                info!(dir = %output_dir.display(), "No output directory; skipping aggregation");
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            empty = report.empty.len(),
            failed = report.failed.len(),
            "Finished extraction"
        );
        Ok(report)
    }

    /// Process every document under the input directory into `sink`
    pub fn extract(&mut self, sink: &mut dyn Sink) -> Result<BatchReport> {
        if let Some(path) = &self.config.archive {
            archive::expand(path, &self.input_dir, self.config.reuse_expanded)?;
        }
        let mut report = BatchReport::default();
        self.process_directory(Path::new(""), sink, &mut report)?;
        Ok(report)
    }

    fn write_pseudonyms(&self) -> Result<()> {
        if !self.config.pseudonymize {
            return Ok(());
        }
        let path = self.config.pseudonym_output();
        if self.config.dry_run {
            info!(path = %path.display(), "Dry run: not writing pseudonym table");
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.context.pseudonyms.write_csv(&path)
    }

    fn process_directory(&mut self, relative: &Path, sink: &mut dyn Sink, report: &mut BatchReport) -> Result<()> {
        let dir = self.input_dir.join(relative);
        let (files, subdirs) = self.list_directory(&dir)?;
        info!(dir = %dir.display(), documents = files.len(), "Processing directory");

        let melt_config = &self.config.melt;
        let processor = &self.processor;
        let melted: Vec<(PathBuf, Result<Option<NamedTables>>)> = files
            .par_iter()
            .map(|path| {
                let tables = Document::from_path(path, melt_config)
                    .map(|doc| processor.melt(&doc));
                (path.clone(), tables)
            })
            .collect();

        for (path, tables) in melted {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = SourceIdentity::new(relative.join(&file_name), workbook_name(relative, &file_name));

            match tables {
                Ok(Some(tables)) => {
                    match self.processor.finish(&source, tables, &mut self.context, sink) {
                        Ok(_) => report.succeeded.push(path),
                        Err(err) => report.record_failure(&path, err)?,
                    }
                }
                Ok(None) => {
                    info!(path = %path.display(), "No tables to write");
                    report.empty.push(path);
                }
                Err(err) => report.record_failure(&path, err)?,
            }
        }

        if self.config.top_level_only {
            return Ok(());
        }
        for subdir in subdirs {
            self.process_directory(&relative.join(subdir), sink, report)?;
        }
        Ok(())
    }

    /// XML files (lookup document first, then by name) and sub-directory names
    fn list_directory(&self, dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                subdirs.push(PathBuf::from(entry.file_name()));
            } else if path.extension().is_some_and(|e| e == "xml") {
                files.push(path);
            }
        }

        let lookup_document = self.config.lookup.document.as_str();
        files.sort_by_key(|path| {
            let is_lookup = path.file_name().is_some_and(|n| n == lookup_document);
            (!is_lookup, path.clone())
        });
        subdirs.sort();
        Ok((files, subdirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::MemorySink;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, xml: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, xml).unwrap();
    }

    #[test]
    fn test_workbook_names() {
        assert_eq!(workbook_name(Path::new(""), "users.xml"), "users");
        assert_eq!(workbook_name(Path::new("course"), "course.xml"), "_course_course");
        assert_eq!(
            workbook_name(Path::new("sections/section_34"), "section.xml"),
            "_sections_section_34_section"
        );
        assert_eq!(workbook_name(Path::new("a.b/c"), "x_y.xml"), "_ab_c_xy");
    }

    #[test]
    fn test_lookup_document_goes_first() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.xml", "<a><b>1</b></a>");
        write(dir.path(), "users.xml", "<users><user id=\"1\"><username>u</username></user></users>");
        write(dir.path(), "z.xml", "<z><b>1</b></z>");
        write(dir.path(), "sub/c.xml", "<c><b>1</b></c>");

        let extractor = Extractor::new(ExtractorConfig::new(dir.path())).unwrap();
        let (files, subdirs) = extractor.list_directory(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["users.xml", "a.xml", "z.xml"]);
        assert_eq!(subdirs, vec![PathBuf::from("sub")]);
    }

    #[test]
    fn test_broken_document_is_isolated() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "good.xml", "<course id=\"1\"><name>x</name></course>");
        write(dir.path(), "bad.xml", "<course><name>x</course>");
        write(dir.path(), "empty.xml", "<course><section/></course>");

        let mut extractor = Extractor::new(ExtractorConfig::new(dir.path())).unwrap();
        let mut sink = MemorySink::new();
        let report = extractor.extract(&mut sink).unwrap();

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.empty.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("bad.xml"));
        assert!(!report.is_complete_success());
        assert!(sink.workbook("good").is_some());
    }

    #[test]
    fn test_top_level_only_skips_subdirectories() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "course.xml", "<course id=\"1\"><name>x</name></course>");
        write(dir.path(), "sub/more.xml", "<more id=\"1\"><name>x</name></more>");

        let config = ExtractorConfig {
            top_level_only: true,
            ..ExtractorConfig::new(dir.path())
        };
        let mut extractor = Extractor::new(config).unwrap();
        let mut sink = MemorySink::new();
        let report = extractor.extract(&mut sink).unwrap();
        assert_eq!(report.documents(), 1);
        assert!(sink.workbook("_sub_more").is_none());
    }
}
