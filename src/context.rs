//! State shared by all documents of one batch

use crate::config::ExtractorConfig;
use crate::enrich::{LookupConfig, PseudonymRegistry, UserDirectory};
use crate::error::Result;

/// Lookups owned by one batch and passed by reference to every document
#[derive(Debug)]
pub struct BatchContext {
    /// id → username, filled once from the user table
    pub users: UserDirectory,
    pub pseudonyms: PseudonymRegistry,
}

impl BatchContext {
    pub fn new(lookup: LookupConfig, pseudonyms: PseudonymRegistry) -> Self {
        BatchContext {
            users: UserDirectory::new(lookup),
            pseudonyms,
        }
    }

    /// Build the context for a batch, seeding pseudonyms from the configured table
    ///
    /// A malformed or ambiguous pseudonym table fails here, before any document
    /// is read.
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let mut pseudonyms = PseudonymRegistry::new(config.pseudonym_strategy, config.salt.clone());
        if let Some(path) = &config.pseudonym_input {
            pseudonyms.load_csv(path)?;
        }
        Ok(BatchContext::new(config.lookup.clone(), pseudonyms))
    }
}
