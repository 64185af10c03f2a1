//! Column enrichment - per-row decoders applied after flattening
//!
//! Enrichers see a read-only row and return extra fields. They never touch the
//! reserved linkage fields: anything they return under a reserved name is
//! discarded.

pub mod decode;
pub mod geoip;
pub mod pseudonym;

pub use decode::{Base64Decoder, MarkupDecoder, TimestampDecoder};
pub use geoip::{GeoIpEnricher, GeoIpTable};
pub use pseudonym::{LookupConfig, PseudonymRegistry, PseudonymStrategy, Pseudonymizer, UserDirectory};

use crate::config::ExtractorConfig;
use crate::error::Result;
use crate::melt::types::{Cell, NamedTables, Row, RESERVED_FIELDS};
use crate::BatchContext;
use tracing::{debug, warn};

/// A row as seen by an enricher
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    pub document: &'a str,
    /// Tag name of the row's table
    pub table: &'a str,
    pub index: usize,
    pub row: &'a Row,
}

/// A per-row column decoder
pub trait Enricher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute additional fields for one row
    ///
    /// Decode failures are recovered inside the enricher; an `Err` aborts the batch.
    fn enrich(&self, row: &RowRef<'_>, ctx: &mut BatchContext) -> Result<Vec<(String, Cell)>>;
}

/// The ordered set of enrichers applied to every named table of a document
pub struct EnrichmentPipeline {
    enrichers: Vec<Box<dyn Enricher>>,
    null_marker: String,
    dropped_columns: Vec<String>,
    populates_lookup: bool,
}

impl EnrichmentPipeline {
    pub fn new(null_marker: impl Into<String>) -> Self {
        EnrichmentPipeline {
            enrichers: Vec::new(),
            null_marker: null_marker.into(),
            dropped_columns: Vec::new(),
            populates_lookup: false,
        }
    }

    /// Build the pipeline the batch configuration asks for
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let mut pipeline = EnrichmentPipeline::new(config.melt.null_marker.clone())
            .with(Base64Decoder)
            .with(TimestampDecoder::new(config.millisecond_times))
            .with(MarkupDecoder);

        if let Some(dir) = &config.geoip_dir {
            if let Some(table) = GeoIpTable::load_dir(dir)? {
                pipeline = pipeline.with(GeoIpEnricher::new(table));
            }
        }

        if config.pseudonymize {
            let pseudonymizer = Pseudonymizer::new();
            if config.delete_user_ids {
                let columns: Vec<String> = pseudonymizer.source_columns().map(String::from).collect();
                pipeline = pipeline.dropping(columns);
            }
            pipeline = pipeline.with(pseudonymizer).populating_lookup();
        }

        Ok(pipeline)
    }

    pub fn with(mut self, enricher: impl Enricher + 'static) -> Self {
        self.enrichers.push(Box::new(enricher));
        self
    }

    /// Remove these columns once all enrichers have run
    pub fn dropping(mut self, columns: Vec<String>) -> Self {
        self.dropped_columns.extend(columns);
        self
    }

    /// Populate the user directory from the designated table when it is seen
    pub fn populating_lookup(mut self) -> Self {
        self.populates_lookup = true;
        self
    }

    pub fn enricher_names(&self) -> Vec<&'static str> {
        self.enrichers.iter().map(|e| e.name()).collect()
    }

    /// Enrich every row of a document's named tables in place
    pub fn apply(&self, document: &str, tables: &mut NamedTables, ctx: &mut BatchContext) -> Result<()> {
        for (identifier, table) in tables.iter_mut() {
            if self.populates_lookup && ctx.users.is_source(&table.tag, &table.rows) {
                ctx.users.populate(document, &table.rows)?;
            }

            debug!(document, sheet = %identifier, rows = table.rows.len(), "Enriching table");
            for (index, row) in table.rows.iter_mut().enumerate() {
                self.clear_null_markers(row);

                let mut added = Vec::new();
                {
                    let row_ref = RowRef {
                        document,
                        table: &table.tag,
                        index,
                        row,
                    };
                    for enricher in &self.enrichers {
                        added.extend(enricher.enrich(&row_ref, ctx)?);
                    }
                }

                for (name, value) in added {
                    if RESERVED_FIELDS.contains(&name.as_str()) {
                        warn!(document, field = %name, "Enricher output shadows a linkage column; dropped");
                        continue;
                    }
                    row.insert(name, value);
                }

                for col in &self.dropped_columns {
                    row.remove(col);
                }
            }
        }
        Ok(())
    }

    fn clear_null_markers(&self, row: &mut Row) {
        let marked: Vec<String> = row
            .iter()
            .filter(|(name, value)| {
                !RESERVED_FIELDS.contains(&name.as_str())
                    && value.as_str() == Some(self.null_marker.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in marked {
            row.insert(name, Cell::empty());
        }
    }
}
