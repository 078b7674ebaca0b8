use anyhow::{Context, Result};
use clap::{error::ErrorKind, CommandFactory, Parser};
use legacy_reviews::{
    config::{ImportConfig, Verbosity},
    logging, store, ImportError, ImportPipeline, ImportResult, RowErrorPolicy,
};
use std::{fs, path::PathBuf, process::ExitCode};
use tracing::{error, info};

/// Import reviews and ratings exported from another catalog instance.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// The reviews csv file path, relative to the base directory
    #[arg(long)]
    reviews: PathBuf,

    /// The ratings csv file path, relative to the base directory
    #[arg(long)]
    ratings: PathBuf,

    /// If product ids differ, the mapping from the legacy ids to local ones
    /// (old_id=new_id,old_id=new_id...)
    #[arg(long)]
    mapping: Option<String>,

    /// Logging verbosity. Passing the bare flag means "all".
    #[arg(long, value_enum, num_args = 0..=1, default_value = "info", default_missing_value = "all")]
    verbose: Verbosity,

    /// Directory the input paths are relative to
    #[arg(long, env = "LEGACY_REVIEWS_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// Catalog directory (Parquet), relative to the base directory
    #[arg(long, default_value = "catalog")]
    catalog: PathBuf,

    /// Skip reviews that fail to save instead of stopping the run
    #[arg(long)]
    skip_failed_rows: bool,

    /// Write a JSON report of the run to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> ImportConfig {
        ImportConfig {
            base_dir: self.base_dir,
            reviews: self.reviews,
            ratings: self.ratings,
            mapping: self.mapping,
            catalog_dir: self.catalog,
            policy: if self.skip_failed_rows {
                RowErrorPolicy::SkipAndReport
            } else {
                RowErrorPolicy::Abort
            },
        }
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    logging::init(args.verbose);
    let report = args.report.clone();
    let config = args.into_config();

    match run(&config, report) {
        Ok(result) => {
            info!("Successfully imported {} reviews.", result.imported);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            if e.downcast_ref::<ImportError>().is_some() {
                eprintln!("{}", Args::command().render_usage());
            }
            ExitCode::from(1)
        }
    }
}

fn run(config: &ImportConfig, report: Option<PathBuf>) -> Result<ImportResult> {
    let inputs = config.load_inputs()?;

    let catalog_dir = config.catalog_path();
    let catalog = store::persist::open(&catalog_dir)?;

    let result = ImportPipeline::new(catalog.clone(), catalog.clone())
        .with_policy(config.policy)
        .run(
            inputs.reviews.records(),
            inputs.ratings.records(),
            inputs.mapping.as_ref(),
        )?;

    // nothing reaches disk unless the whole run succeeded
    store::persist::save(&catalog, &catalog_dir)?;

    if let Some(path) = report {
        let json = serde_json::to_string_pretty(&result).context("serializing run report")?;
        fs::write(&path, json).with_context(|| format!("writing report {:?}", path))?;
        info!(path = %path.display(), "wrote run report");
    }

    Ok(result)
}
