use clap::ValueEnum;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{
    error::{ImportError, MalformedInput},
    model::{RATING_COLUMNS, REVIEW_COLUMNS},
    parse::{mapping::IdMapping, CsvTable},
    pipeline::RowErrorPolicy,
};

/// How much the run reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Verbosity {
    Error,
    #[default]
    Info,
    All,
}

impl Verbosity {
    /// Default `EnvFilter` directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            Verbosity::Error => "error",
            Verbosity::Info => "info",
            Verbosity::All => "trace",
        }
    }
}

/// Everything one import run needs to know about its inputs.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub base_dir: PathBuf,
    pub reviews: PathBuf,
    pub ratings: PathBuf,
    pub mapping: Option<String>,
    pub catalog_dir: PathBuf,
    pub policy: RowErrorPolicy,
}

/// The parsed inputs of a run, all validated before anything is written.
#[derive(Debug)]
pub struct ImportInputs {
    pub reviews: CsvTable,
    pub ratings: CsvTable,
    pub mapping: Option<IdMapping>,
}

impl ImportConfig {
    pub fn reviews_path(&self) -> PathBuf {
        self.base_dir.join(&self.reviews)
    }

    pub fn ratings_path(&self) -> PathBuf {
        self.base_dir.join(&self.ratings)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.base_dir.join(&self.catalog_dir)
    }

    /// Parse the mapping and both exports. Fails on the first structural
    /// problem: bad mapping, missing file, malformed csv, missing columns.
    pub fn load_inputs(&self) -> Result<ImportInputs, ImportError> {
        let mapping = self.mapping.as_deref().map(IdMapping::parse).transpose()?;
        if let Some(m) = &mapping {
            info!(pairs = m.len(), "parsed product id mapping");
        }

        let reviews_path = self.reviews_path();
        let ratings_path = self.ratings_path();
        for path in [&reviews_path, &ratings_path] {
            if !path.is_file() {
                return Err(ImportError::MissingFile(path.clone()));
            }
        }

        let reviews = CsvTable::from_path(&reviews_path, "reviews")?;
        check_columns(&reviews, &REVIEW_COLUMNS, "reviews")?;

        let ratings = load_ratings(&ratings_path)?;
        check_columns(&ratings, &RATING_COLUMNS, "ratings")?;

        info!(
            reviews = reviews.len(),
            ratings = ratings.len(),
            "loaded import files"
        );
        Ok(ImportInputs {
            reviews,
            ratings,
            mapping,
        })
    }
}

fn check_columns(
    table: &CsvTable,
    columns: &[&str],
    name: &'static str,
) -> Result<(), ImportError> {
    // a table with no header at all has nothing to check
    if table.headers().is_empty() {
        return Ok(());
    }
    table
        .require_columns(columns)
        .map_err(ImportError::malformed(name))
}

/// Ratings are optional, so a blank ratings file means "no ratings"
/// rather than a missing header.
fn load_ratings(path: &Path) -> Result<CsvTable, ImportError> {
    match CsvTable::from_path(path, "ratings") {
        Err(ImportError::Malformed {
            source: MalformedInput::MissingHeader,
            ..
        }) if is_blank(path)? => Ok(CsvTable::default()),
        other => other,
    }
}

fn is_blank(path: &Path) -> Result<bool, ImportError> {
    let content = std::fs::read(path).map_err(|source| ImportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content.iter().all(u8::is_ascii_whitespace))
}
