//! Pseudonymization lookups
//!
//! Two lookups work together. The [`UserDirectory`] maps the numeric user ids
//! found in rows to usernames; it is filled once, from the designated user
//! table. The [`PseudonymRegistry`] maps usernames to stable pseudonyms, may be
//! seeded from a CSV file and grows as new users are seen.

use crate::enrich::{Enricher, RowRef};
use crate::error::{MeltError, Result};
use crate::melt::types::{Cell, Row};
use crate::BatchContext;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// How a pseudonym is produced for a user the registry has never seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PseudonymStrategy {
    /// Random 32 hex digit identifier
    #[default]
    #[serde(rename = "uuid4")]
    Uuid4,
    /// `p` + the first 12 hex digits of sha1(salt + username)
    #[serde(rename = "salt+sha1")]
    SaltSha1,
    /// Leave unknown users without a pseudonym
    #[serde(rename = "none")]
    None,
}

impl std::str::FromStr for PseudonymStrategy {
    type Err = MeltError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uuid4" => Ok(Self::Uuid4),
            "salt+sha1" => Ok(Self::SaltSha1),
            "none" => Ok(Self::None),
            other => Err(MeltError::invalid_config(format!(
                "pseudonym strategy should be 'uuid4', 'salt+sha1' or 'none', got '{}'",
                other
            ))),
        }
    }
}

const USERID_COLUMN: &str = "userid";
const ANONID_COLUMN: &str = "anonid";
const ORIGINAL_KEY_COLUMN: &str = "moodleid";

#[derive(Debug, Clone, PartialEq)]
struct PseudonymEntry {
    pseudonym: String,
    original_key: Option<String>,
}

/// raw id → pseudonym, seeded from and written back to a CSV table
#[derive(Debug, Clone)]
pub struct PseudonymRegistry {
    entries: IndexMap<String, PseudonymEntry>,
    strategy: PseudonymStrategy,
    salt: Option<String>,
}

impl PseudonymRegistry {
    pub fn new(strategy: PseudonymStrategy, salt: Option<String>) -> Self {
        PseudonymRegistry {
            entries: IndexMap::new(),
            strategy,
            salt,
        }
    }

    /// Seed the registry from a CSV with `userid` and `anonid` columns
    ///
    /// Duplicate `userid` values make the mapping ambiguous and are rejected
    /// before anything is processed.
    pub fn load_csv<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let path_name = path.display().to_string();
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        let column = |name: &str| headers.iter().position(|h| h.trim() == name);
        let userid = column(USERID_COLUMN).ok_or_else(|| MeltError::InvalidPseudonymSource {
            path: path_name.clone(),
            column: USERID_COLUMN.to_string(),
        })?;
        let anonid = column(ANONID_COLUMN).ok_or_else(|| MeltError::InvalidPseudonymSource {
            path: path_name.clone(),
            column: ANONID_COLUMN.to_string(),
        })?;
        let original_key = column(ORIGINAL_KEY_COLUMN);

        let mut loaded: IndexMap<String, PseudonymEntry> = IndexMap::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let raw_id = record.get(userid).unwrap_or("").trim().to_string();
            *seen.entry(raw_id.clone()).or_insert(0) += 1;
            loaded.insert(
                raw_id,
                PseudonymEntry {
                    pseudonym: record.get(anonid).unwrap_or("").to_string(),
                    original_key: original_key
                        .and_then(|i| record.get(i))
                        .filter(|v| !v.is_empty())
                        .map(String::from),
                },
            );
        }

        let mut duplicates: Vec<String> = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id)
            .collect();
        if !duplicates.is_empty() {
            duplicates.sort();
            return Err(MeltError::AmbiguousPseudonymSource {
                path: path_name,
                duplicates,
            });
        }

        info!(path = %path_name, entries = loaded.len(), "Loaded pseudonym table");
        self.entries.extend(loaded);
        Ok(())
    }

    /// Write the registry as CSV with `userid`, `moodleid`, `anonid` columns
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        writer.write_record([USERID_COLUMN, ORIGINAL_KEY_COLUMN, ANONID_COLUMN])?;
        for (raw_id, entry) in &self.entries {
            writer.write_record([
                raw_id.as_str(),
                entry.original_key.as_deref().unwrap_or(""),
                entry.pseudonym.as_str(),
            ])?;
        }
        writer.flush()?;
        info!(path = %path.as_ref().display(), rows = self.entries.len(), "Wrote pseudonym table");
        Ok(())
    }

    pub fn lookup(&self, raw_id: &str) -> Option<&str> {
        self.entries.get(raw_id).map(|e| e.pseudonym.as_str())
    }

    /// Return the pseudonym for `raw_id`, generating and recording one if needed
    ///
    /// Returns `None` only when the strategy is [`PseudonymStrategy::None`]
    /// and the id is unknown.
    pub fn register(&mut self, raw_id: &str, original_key: Option<&str>) -> Option<String> {
        if let Some(existing) = self.lookup(raw_id) {
            return Some(existing.to_string());
        }

        let pseudonym = match self.strategy {
            PseudonymStrategy::Uuid4 => uuid::Uuid::new_v4().simple().to_string(),
            PseudonymStrategy::SaltSha1 => match self.salt.as_deref() {
                Some(salt) if !salt.is_empty() => salted_digest(salt, raw_id),
                _ => String::from("anonymized"),
            },
            PseudonymStrategy::None => return None,
        };

        self.entries.insert(
            raw_id.to_string(),
            PseudonymEntry {
                pseudonym: pseudonym.clone(),
                original_key: original_key.map(String::from),
            },
        );
        Some(pseudonym)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn salted_digest(salt: &str, raw_id: &str) -> String {
    let digest = Sha1::digest(format!("{}{}", salt, raw_id).as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("p{}", &hex[..12])
}

/// Which table feeds the id → username directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Tag of the table holding one row per user
    pub table: String,
    pub key_field: String,
    pub value_field: String,
    /// File name of the document holding that table, processed first
    pub document: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        LookupConfig {
            table: String::from("user"),
            key_field: String::from("id"),
            value_field: String::from("username"),
            document: String::from("users.xml"),
        }
    }
}

/// Write-once id → username directory
#[derive(Debug)]
pub struct UserDirectory {
    config: LookupConfig,
    entries: OnceCell<HashMap<String, String>>,
}

impl UserDirectory {
    pub fn new(config: LookupConfig) -> Self {
        UserDirectory {
            config,
            entries: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    /// Whether `tag`'s rows should populate the directory
    pub fn is_source(&self, tag: &str, rows: &[Row]) -> bool {
        tag == self.config.table
            && rows
                .first()
                .is_some_and(|row| row.contains(&self.config.value_field))
    }

    /// Fill the directory from the user table; a second fill is an ordering bug
    pub fn populate(&self, document: &str, rows: &[Row]) -> Result<()> {
        let entries: HashMap<String, String> = rows
            .iter()
            .filter_map(|row| {
                let key = row.get(&self.config.key_field)?.to_string();
                let value = row.get(&self.config.value_field)?.to_string();
                Some((key, value))
            })
            .collect();
        let count = entries.len();

        self.entries
            .set(entries)
            .map_err(|_| MeltError::LookupAlreadyPopulated {
                document: document.to_string(),
                lookup: self.config.table.clone(),
            })?;
        info!(document, users = count, "Populated user directory");
        Ok(())
    }

    pub fn is_populated(&self) -> bool {
        self.entries.get().is_some()
    }

    /// Username for a raw id, or `None` when the directory is not populated yet
    pub fn entries(&self) -> Option<&HashMap<String, String>> {
        self.entries.get()
    }
}

/// Replaces user id columns with pseudonyms
pub struct Pseudonymizer {
    /// (source column, output column)
    columns: Vec<(String, String)>,
}

impl Pseudonymizer {
    pub fn new() -> Self {
        let columns = ["userid", "relateduserid", "realuserid"]
            .iter()
            .map(|&col| (col.to_string(), Self::output_column(col)))
            .collect();
        Pseudonymizer { columns }
    }

    /// Source columns this enricher reads
    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(c, _)| c.as_str())
    }

    /// `userid` → `anonid`, `relateduserid` → `related_anonid`
    fn output_column(col: &str) -> String {
        if col == "userid" {
            String::from("anonid")
        } else {
            let stem = col.strip_suffix("userid").unwrap_or(col);
            format!("{}_anonid", stem)
        }
    }

    fn pseudonym_for(&self, raw: &Cell, row: &RowRef<'_>, ctx: &mut BatchContext) -> Result<Cell> {
        if raw.is_blank() {
            return Ok(Cell::empty());
        }
        let Some(users) = ctx.users.entries() else {
            return Err(MeltError::MissingLookupPrecondition {
                document: row.document.to_string(),
                table: row.table.to_string(),
                row: row.index,
                lookup: ctx.users.config().table.clone(),
            });
        };

        let raw_id = raw.to_string();
        let Some(username) = users.get(&raw_id).cloned() else {
            warn!(document = row.document, table = row.table, user = %raw_id, "Unknown user number");
            return Ok(Cell::empty());
        };

        Ok(ctx
            .pseudonyms
            .register(&username, Some(&raw_id))
            .map(Cell::Text)
            .unwrap_or_else(Cell::empty))
    }
}

impl Default for Pseudonymizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Enricher for Pseudonymizer {
    fn name(&self) -> &'static str {
        "pseudonym"
    }

    fn enrich(&self, row: &RowRef<'_>, ctx: &mut BatchContext) -> Result<Vec<(String, Cell)>> {
        let mut out = Vec::new();
        for (col, output) in &self.columns {
            if let Some(raw) = row.row.get(col) {
                out.push((output.clone(), self.pseudonym_for(raw, row, ctx)?));
            }
        }

        let key_field = ctx.users.config().key_field.clone();
        if row.table == ctx.users.config().table {
            if let Some(raw) = row.row.get(&key_field) {
                out.push((String::from("anonid"), self.pseudonym_for(raw, row, ctx)?));
            }
        }
        Ok(out)
    }
}
