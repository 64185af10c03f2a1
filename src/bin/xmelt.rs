//! xmelt: Melt a directory of XML documents into relational workbooks
//!
//! Usage:
//!   # Expand the XML of backup.mbz into backup-xml/, then write backup-out/
//!   xmelt backup.mbz
//!
//!   # An already expanded directory, written as JSON Lines into backup-xml-out/
//!   xmelt backup-xml --format jsonl
//!
//!   # Keep pseudonyms stable across runs
//!   xmelt backup-xml --pseudonyms-in ids.csv --pseudonyms-out ids.csv
//!
//!   # Settings from a JSON file, with a flag on top
//!   xmelt backup-xml --config xmelt.json --dry-run

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use xmelt::{init_logging, ExtractorConfig, Extractor, PseudonymStrategy, WorkbookFormat};

#[derive(Parser, Debug)]
#[command(name = "xmelt")]
#[command(about = "Melt nested XML documents into relational tables", long_about = None)]
struct Args {
    /// Backup archive (tar or tar.gz), or a directory of expanded XML documents
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// JSON config file; flags override its values
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Output directory (default: <INPUT>-out)
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// Workbook format: xlsx or jsonl
    #[arg(long, short = 'f')]
    format: Option<WorkbookFormat>,

    /// Pseudonym strategy for unseen users: uuid4, salt+sha1 or none
    #[arg(long)]
    pseudonym_strategy: Option<PseudonymStrategy>,

    /// Salt for the salt+sha1 strategy
    #[arg(long)]
    salt: Option<String>,

    /// Existing userid/anonid CSV to reuse
    #[arg(long)]
    pseudonyms_in: Option<PathBuf>,

    /// Where to write the userid/anonid CSV
    #[arg(long)]
    pseudonyms_out: Option<PathBuf>,

    /// Directory containing IP2LOCATION-LITE-DB11.CSV
    #[arg(long)]
    geoip_dir: Option<PathBuf>,

    /// Keep user ids as they are
    #[arg(long)]
    no_pseudonymize: bool,

    /// Remove the raw user id columns after pseudonymization
    #[arg(long)]
    delete_user_ids: bool,

    /// Skip the <col>_ms timestamp columns
    #[arg(long)]
    no_ms_times: bool,

    /// Only process documents directly inside the input directory
    #[arg(long)]
    top_level_only: bool,

    /// Skip the aggregation passes
    #[arg(long)]
    no_aggregate: bool,

    /// Process everything but write nothing
    #[arg(long)]
    dry_run: bool,

    /// Value the dump uses for null
    #[arg(long)]
    null_marker: Option<String>,

    /// Debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => ExtractorConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ExtractorConfig::default(),
    };
    if args.input.is_file() {
        config.archive = Some(args.input);
    } else {
        config.input_dir = Some(args.input);
    }
    if args.output_dir.is_some() {
        config.output_dir = args.output_dir;
    }
    if let Some(format) = args.format {
        config.format = format;
    }
    if let Some(strategy) = args.pseudonym_strategy {
        config.pseudonym_strategy = strategy;
    }
    if args.salt.is_some() {
        config.salt = args.salt;
    }
    if let Some(path) = args.pseudonyms_in {
        config.pseudonym_input = Some(path);
    }
    if let Some(path) = args.pseudonyms_out {
        config.pseudonym_output = Some(path);
    }
    if let Some(dir) = args.geoip_dir {
        config.geoip_dir = Some(dir);
    }
    if let Some(marker) = args.null_marker {
        config.melt.null_marker = marker;
    }
    config.pseudonymize &= !args.no_pseudonymize;
    config.millisecond_times &= !args.no_ms_times;
    config.aggregate &= !args.no_aggregate;
    config.delete_user_ids |= args.delete_user_ids;
    config.top_level_only |= args.top_level_only;
    config.dry_run |= args.dry_run;

    let mut extractor = Extractor::new(config).context("Failed to set up extraction")?;
    let report = extractor.run().context("Extraction aborted")?;

    println!(
        "{} documents: {} written, {} empty, {} failed",
        report.documents(),
        report.succeeded.len(),
        report.empty.len(),
        report.failed.len()
    );
    if let Some(aggregation) = &report.aggregation {
        println!(
            "{} section aggregates, {} combined workbooks, catalog {}",
            aggregation.sections.len(),
            aggregation.common.len(),
            aggregation.catalog.display()
        );
    }
    for (path, reason) in &report.failed {
        eprintln!("  failed {}: {}", path.display(), reason);
    }

    if !report.is_complete_success() {
        bail!("{} documents failed", report.failed.len());
    }
    Ok(())
}
