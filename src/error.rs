use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Structural problems found while turning CSV text into records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedInput {
    #[error("missing header row")]
    MissingHeader,

    #[error("duplicate column `{0}` in header")]
    DuplicateColumn(String),

    #[error("row {row} (line {line}) has {found} fields, header has {expected}")]
    FieldCount {
        row: usize,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("missing required column `{0}`")]
    MissingColumn(String),

    #[error("unreadable record at row {row}: {message}")]
    Unreadable { row: usize, message: String },
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("import file does not exist: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {table} csv: {source}")]
    Malformed {
        table: &'static str,
        #[source]
        source: MalformedInput,
    },

    #[error("mapping `{0}` is not of the form old_id=new_id[,old_id=new_id...]")]
    InvalidMappingFormat(String),

    #[error("{table} row {row}: product id `{id}` has no entry in the mapping")]
    UnmappedId {
        table: &'static str,
        row: usize,
        id: String,
    },

    #[error("review row {row} (review_id `{review_id}`) failed to import: {source}")]
    Store {
        row: usize,
        review_id: String,
        #[source]
        source: StoreError,
    },

    #[error("no reviews were imported")]
    NoRowsImported,
}

impl ImportError {
    pub(crate) fn malformed(table: &'static str) -> impl FnOnce(MalformedInput) -> Self {
        move |source| ImportError::Malformed { table, source }
    }
}

/// Store errors carry the row they happened on once they leave the pipeline.
pub(crate) fn store_failure(row: usize, review_id: &str, source: StoreError) -> ImportError {
    ImportError::Store {
        row,
        review_id: review_id.to_string(),
        source,
    }
}
