//! Error types for xmelt
//!
//! Fatal conditions abort a batch; everything recoverable is logged through
//! `tracing` where it happens and never reaches this type.

use thiserror::Error;

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MeltError>;

/// Main error type for xmelt
#[derive(Error, Debug)]
pub enum MeltError {
    /// The XML text could not be turned into a node tree
    #[error("Malformed XML in {source_name} at byte {position}: {message}")]
    Xml {
        source_name: String,
        position: u64,
        message: String,
    },

    /// The supplied pseudonym table has duplicate primary keys
    #[error("Pseudonym table {path} has duplicate userid entries: {duplicates:?}")]
    AmbiguousPseudonymSource { path: String, duplicates: Vec<String> },

    /// The supplied pseudonym table is missing a required column
    #[error("Pseudonym table {path} should have a column named '{column}'")]
    InvalidPseudonymSource { path: String, column: String },

    /// A row needed the id lookup before its source document was processed
    #[error("Row {row} of table '{table}' in {document} needs the '{lookup}' lookup before it was populated")]
    MissingLookupPrecondition {
        document: String,
        table: String,
        row: usize,
        lookup: String,
    },

    /// The write-once id lookup was offered a second source
    #[error("The '{lookup}' lookup was already populated before {document}")]
    LookupAlreadyPopulated { document: String, lookup: String },

    /// A row references a parent table its own source never produced
    #[error("Row {row} of '{table}' from {source_name} references missing parent table '{parent}'")]
    DanglingParent {
        source_name: String,
        table: String,
        parent: String,
        row: usize,
    },

    /// A parent row index could not be read as an integer
    #[error("Row {row} of '{table}' has a non-integer parent index {value:?}")]
    InvalidParentIndex {
        table: String,
        row: usize,
        value: String,
    },

    /// The output sink rejected a document's tables
    #[error("Sink failed for {source_name}: {message}")]
    Sink { source_name: String, message: String },

    /// A workbook file could not be written or read back
    #[error("Workbook {path}: {message}")]
    Workbook { path: String, message: String },

    /// The source archive could not be expanded
    #[error("Archive {path}: {message}")]
    Archive { path: String, message: String },

    /// Configuration validation failed
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl MeltError {
    /// Create an XML parse error
    pub fn xml(source_name: impl Into<String>, position: u64, message: impl ToString) -> Self {
        Self::Xml {
            source_name: source_name.into(),
            position,
            message: message.to_string(),
        }
    }

    /// Create a sink error
    pub fn sink(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Sink {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Create a workbook file error
    pub fn workbook(path: &std::path::Path, message: impl ToString) -> Self {
        Self::Workbook {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Create an archive error
    pub fn archive(path: &std::path::Path, message: impl ToString) -> Self {
        Self::Archive {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole batch
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Xml { .. } | Self::Sink { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!MeltError::sink("a.xml", "disk full").is_fatal());
        assert!(!MeltError::xml("a.xml", 3, "bad tag").is_fatal());
        assert!(MeltError::MissingLookupPrecondition {
            document: "forum.xml".into(),
            table: "post".into(),
            row: 0,
            lookup: "user".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_display_names_offender() {
        let err = MeltError::MissingLookupPrecondition {
            document: "forum.xml".into(),
            table: "post".into(),
            row: 4,
            lookup: "user".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("forum.xml"));
        assert!(msg.contains("Row 4"));
    }
}
