//! Batch configuration
//!
//! Every field has a default, so a JSON config file only needs the fields it
//! changes. Command-line flags override the loaded values.

use crate::archive::{output_dir_for, xml_dir_for};
use crate::enrich::{LookupConfig, PseudonymStrategy};
use crate::error::{MeltError, Result};
use crate::melt::{MeltConfig, WorkbookFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default file name of the pseudonym table written next to the workbooks
pub const PSEUDONYM_FILE: &str = "userids_anonids.csv";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Backup archive (tar or tar.gz) whose XML members are the input
    pub archive: Option<PathBuf>,

    /// Reuse an earlier expansion of `archive` if it holds XML files
    pub reuse_expanded: bool,

    /// Directory holding the expanded XML documents; `<archive>-xml` when unset
    pub input_dir: Option<PathBuf>,

    /// Where workbooks go; `<archive>-out` or `<input_dir>-out` when unset
    pub output_dir: Option<PathBuf>,

    pub format: WorkbookFormat,

    pub melt: MeltConfig,

    /// Replace user ids with pseudonyms
    pub pseudonymize: bool,
    pub pseudonym_strategy: PseudonymStrategy,
    /// Salt for the `salt+sha1` strategy
    pub salt: Option<String>,
    /// Existing userid → anonid table to seed the registry from
    pub pseudonym_input: Option<PathBuf>,
    /// Where to write the pseudonym table; `<output_dir>/userids_anonids.csv` when unset
    pub pseudonym_output: Option<PathBuf>,

    /// Directory containing `IP2LOCATION-LITE-DB11.CSV`
    pub geoip_dir: Option<PathBuf>,

    /// Add `<col>_ms` columns next to `<col>_utc`
    pub millisecond_times: bool,

    /// Drop the raw user id columns after pseudonymization
    pub delete_user_ids: bool,

    /// Only process documents directly inside `input_dir`
    pub top_level_only: bool,

    /// Process everything but write nothing
    pub dry_run: bool,

    /// Run the aggregation passes after extraction
    pub aggregate: bool,

    pub lookup: LookupConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            archive: None,
            reuse_expanded: true,
            input_dir: None,
            output_dir: None,
            format: WorkbookFormat::default(),
            melt: MeltConfig::default(),
            pseudonymize: true,
            pseudonym_strategy: PseudonymStrategy::default(),
            salt: None,
            pseudonym_input: None,
            pseudonym_output: None,
            geoip_dir: None,
            millisecond_times: true,
            delete_user_ids: false,
            top_level_only: false,
            dry_run: false,
            aggregate: true,
            lookup: LookupConfig::default(),
        }
    }
}

impl ExtractorConfig {
    pub fn new<P: Into<PathBuf>>(input_dir: P) -> Self {
        ExtractorConfig {
            input_dir: Some(input_dir.into()),
            ..Default::default()
        }
    }

    /// Configuration for a backup archive, expanded next to itself
    pub fn from_archive<P: Into<PathBuf>>(archive: P) -> Self {
        ExtractorConfig {
            archive: Some(archive.into()),
            ..Default::default()
        }
    }

    /// Load a config from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ExtractorConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// The effective directory of XML documents
    pub fn input_dir(&self) -> PathBuf {
        match (&self.input_dir, &self.archive) {
            (Some(dir), _) => dir.clone(),
            (None, Some(archive)) => xml_dir_for(archive),
            (None, None) => PathBuf::from("."),
        }
    }

    /// The effective output directory
    pub fn output_dir(&self) -> PathBuf {
        if let Some(dir) = &self.output_dir {
            return dir.clone();
        }
        if let Some(archive) = &self.archive {
            return output_dir_for(archive);
        }
        let input_dir = self.input_dir();
        let mut name = input_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "xmelt".into());
        name.push("-out");
        input_dir.with_file_name(name)
    }

    /// The effective pseudonym table path
    pub fn pseudonym_output(&self) -> PathBuf {
        self.pseudonym_output
            .clone()
            .unwrap_or_else(|| self.output_dir().join(PSEUDONYM_FILE))
    }

    /// Check paths and settings before anything is read
    ///
    /// With an archive, the input directory may not exist yet.
    pub fn validate(&self) -> Result<()> {
        match &self.archive {
            Some(archive) if !archive.is_file() => {
                return Err(MeltError::invalid_config(format!(
                    "archive {} does not exist",
                    archive.display()
                )));
            }
            Some(_) => {}
            None if !self.input_dir().is_dir() => {
                return Err(MeltError::invalid_config(format!(
                    "input directory {} does not exist",
                    self.input_dir().display()
                )));
            }
            None => {}
        }
        if let Some(path) = &self.pseudonym_input {
            if !path.is_file() {
                return Err(MeltError::invalid_config(format!(
                    "pseudonym table {} does not exist",
                    path.display()
                )));
            }
        }
        if self.melt.id_attribute.is_empty() {
            return Err(MeltError::invalid_config("id attribute must not be empty"));
        }
        Ok(())
    }
}
