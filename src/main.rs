//! `seqembed` command line.
//!
//! - `seqembed run`: build sequences, train, write and verify both embedding files
//! - `seqembed verify`: check an existing embedding file's first-entry dimension
//!
//! Exit codes: 0 success, 1 fatal error, 2 verification mismatch.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use seqembed::{CsvSource, Pipeline, PipelineConfig, embed::text, errors::Result};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const EXIT_OK: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_MISMATCH: i32 = 2;

/// Item and actor embeddings from interaction logs
#[derive(Parser)]
#[command(name = "seqembed")]
#[command(version)]
#[command(about = "Train item and actor embeddings from interaction sequences")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full training pipeline
    Run {
        /// Interaction CSV (userId, movieId, rating, timestamp)
        #[arg(long)]
        events: PathBuf,
        /// Entity catalog CSV (movieId)
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// TOML config file; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overrides [output] dir
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Skip the corpus cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Check the first entry of an embedding file
    Verify {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        dimension: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Commands::Run {
            events,
            catalog,
            config,
            output_dir,
            no_cache,
        } => run(events, catalog, config, output_dir, no_cache),
        Commands::Verify { file, dimension } => verify(file, dimension),
    };

    std::process::exit(exit_code);
}

fn run(
    events: PathBuf,
    catalog: Option<PathBuf>,
    config: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    no_cache: bool,
) -> i32 {
    let config = match load_config(config, output_dir, no_cache) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return EXIT_FATAL;
        }
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return EXIT_FATAL;
        }
    };

    let source = CsvSource::new(events, catalog);
    match pipeline.run(&source) {
        Ok(report) => {
            println!("{}", report.render());
            if report.verification_failed() {
                EXIT_MISMATCH
            } else {
                EXIT_OK
            }
        }
        Err(_) => EXIT_FATAL,
    }
}

fn load_config(
    path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    no_cache: bool,
) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides();

    if let Some(dir) = output_dir {
        config.output.dir = dir;
    }
    if no_cache {
        config.cache.enabled = false;
    }
    Ok(config)
}

fn verify(file: PathBuf, dimension: usize) -> i32 {
    match text::verify(&file, dimension) {
        Ok(summary) => {
            info!(
                path = %file.display(),
                lines = summary.line_count,
                dimension = ?summary.first_entry_dimension,
                "file verified"
            );
            EXIT_OK
        }
        Err(e) if e.is_format_mismatch() => EXIT_MISMATCH,
        Err(e) => {
            error!(path = %file.display(), error = %e, "verification failed");
            EXIT_FATAL
        }
    }
}
