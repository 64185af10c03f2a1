//! xmelt-aggregate: Merge the workbooks of an existing output directory
//!
//! Runs the section pass, the common-object pass and writes the column catalog.
//!
//! Usage:
//!   xmelt-aggregate backup-xml-out
//!   xmelt-aggregate backup-xml-out --dry-run

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use xmelt::aggregate::{aggregate_directory, write_catalog};
use xmelt::init_logging;

#[derive(Parser, Debug)]
#[command(name = "xmelt-aggregate")]
#[command(about = "Aggregate xmelt workbooks across sections and objects", long_about = None)]
struct Args {
    /// Directory of workbooks written by xmelt
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    /// Only write the column catalog
    #[arg(long)]
    catalog_only: bool,

    /// Report what would be merged without writing or moving anything
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if !args.dir.is_dir() {
        anyhow::bail!("{} is not a directory", args.dir.display());
    }

    if args.catalog_only {
        let catalog = write_catalog(&args.dir, args.dry_run)
            .with_context(|| format!("Failed to catalog {}", args.dir.display()))?;
        println!("catalog {}", catalog.display());
        return Ok(());
    }

    let summary = aggregate_directory(&args.dir, args.dry_run)
        .with_context(|| format!("Failed to aggregate {}", args.dir.display()))?;
    for path in summary.sections.iter().chain(&summary.common) {
        println!("{}", path.display());
    }
    println!("catalog {}", summary.catalog.display());
    Ok(())
}
