use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

use crate::error::ImportError;

/// `old=new` pairs separated by commas, ASCII digits only, nothing else.
static MAPPING_SPEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+=[0-9]+(,[0-9]+=[0-9]+)*$").expect("static regex"));

/// Legacy product id to local product id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapping {
    pairs: HashMap<u64, u64>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("product id `{0}` has no entry in the mapping")]
pub struct UnmappedId(pub String);

impl IdMapping {
    /// Parse `old=new,old=new,...`. The whole string is validated before any
    /// pair is read; a repeated source id keeps its last target.
    pub fn parse(spec: &str) -> Result<Self, ImportError> {
        if !MAPPING_SPEC.is_match(spec) {
            return Err(ImportError::InvalidMappingFormat(spec.to_string()));
        }

        let mut pairs = HashMap::new();
        for pair in spec.split(',') {
            let (old, new) = pair
                .split_once('=')
                .ok_or_else(|| ImportError::InvalidMappingFormat(spec.to_string()))?;
            let parse = |digits: &str| {
                digits
                    .parse::<u64>()
                    .map_err(|_| ImportError::InvalidMappingFormat(spec.to_string()))
            };
            pairs.insert(parse(old)?, parse(new)?);
        }

        Ok(Self { pairs })
    }

    pub fn get(&self, source: u64) -> Option<u64> {
        self.pairs.get(&source).copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Translate a product id from the export into a local one.
///
/// With no mapping the id passes through untouched. With a mapping, an id
/// that is absent (or not plain ASCII digits, like the mapping keys) is an
/// error rather than a fallback to the original value.
pub fn resolve(mapping: Option<&IdMapping>, id: &str) -> Result<String, UnmappedId> {
    let Some(mapping) = mapping else {
        return Ok(id.to_string());
    };
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UnmappedId(id.to_string()));
    }
    id.parse::<u64>()
        .ok()
        .and_then(|source| mapping.get(source))
        .map(|target| target.to_string())
        .ok_or_else(|| UnmappedId(id.to_string()))
}
