// src/parse/mod.rs
use csv::ReaderBuilder;
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::Path,
};
use tracing::debug;

use crate::error::{ImportError, MalformedInput};

pub mod mapping;

/// One data row of a CSV export, keyed by the header's column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based index of the data row (the header is row 0).
    pub row: usize,
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(row: usize, fields: BTreeMap<String, String>) -> Self {
        Self { row, fields }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Like `get`, but a missing column is a structural error.
    pub fn require(&self, column: &str) -> Result<&str, MalformedInput> {
        self.get(column)
            .ok_or_else(|| MalformedInput::MissingColumn(column.to_string()))
    }
}

/// A whole CSV export held in memory: the header plus every data row, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    headers: Vec<String>,
    records: Vec<RawRecord>,
}

impl CsvTable {
    /// Parse raw CSV bytes. The first record is the header; every later record
    /// must have exactly as many fields as the header.
    pub fn parse(content: &[u8]) -> Result<Self, MalformedInput> {
        // flexible so that a short or long row reaches us instead of failing
        // inside the reader with a less useful message
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content);

        let mut records = rdr.records();

        let header = match records.next() {
            Some(Ok(rec)) => rec,
            Some(Err(e)) => {
                return Err(MalformedInput::Unreadable {
                    row: 0,
                    message: e.to_string(),
                })
            }
            None => return Err(MalformedInput::MissingHeader),
        };

        let headers: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if i == 0 {
                    h.trim_start_matches('\u{feff}').to_string()
                } else {
                    h.to_string()
                }
            })
            .collect();

        if headers.iter().all(|h| h.is_empty()) {
            return Err(MalformedInput::MissingHeader);
        }

        let mut seen = HashSet::with_capacity(headers.len());
        for h in &headers {
            if !seen.insert(h.as_str()) {
                return Err(MalformedInput::DuplicateColumn(h.clone()));
            }
        }

        let mut rows = Vec::new();
        for (idx, result) in records.enumerate() {
            let row = idx + 1;
            let record = result.map_err(|e| MalformedInput::Unreadable {
                row,
                message: e.to_string(),
            })?;

            if record.len() != headers.len() {
                return Err(MalformedInput::FieldCount {
                    row,
                    line: record.position().map(|p| p.line()).unwrap_or_default(),
                    expected: headers.len(),
                    found: record.len(),
                });
            }

            let fields = headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect();
            rows.push(RawRecord::new(row, fields));
        }

        debug!(columns = headers.len(), rows = rows.len(), "parsed csv");
        Ok(Self {
            headers,
            records: rows,
        })
    }

    /// Read a whole file into memory and parse it. `table` names the export in errors.
    #[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_path<P: AsRef<Path>>(path: P, table: &'static str) -> Result<Self, ImportError> {
        let path = path.as_ref();
        let content = fs::read(path).map_err(|source| ImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(ImportError::malformed(table))
    }

    pub fn require_columns(&self, columns: &[&str]) -> Result<(), MalformedInput> {
        match columns
            .iter()
            .find(|c| !self.headers.iter().any(|h| h.as_str() == **c))
        {
            Some(missing) => Err(MalformedInput::MissingColumn(missing.to_string())),
            None => Ok(()),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
