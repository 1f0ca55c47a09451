//! MuScle CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use msc_calib::{
    CancelFlag, ErrorsAnalyzer, ErrorsConfig, LineshapeTables, MomentumScaleCorrector, ResolutionEstimator,
    RunConfig, read_pairs,
};
use msc_inference::CalibrationFit;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "muscle")]
#[command(about = "MuScle - muon momentum scale and resolution calibration")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit scale, resolution and background parameters
    Fit {
        /// Run configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Muon pairs (JSON array)
        #[arg(short, long)]
        pairs: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for scale/resolution/background parameter files
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Apply a fitted scale correction to muon pairs
    Correct {
        /// Scale parameter file (text or JSON)
        #[arg(long)]
        parameters: PathBuf,

        /// Muon pairs (JSON array)
        #[arg(short, long)]
        pairs: PathBuf,

        /// Resolution parameter file; adds the mass resolution per pair
        #[arg(long)]
        resolution: Option<PathBuf>,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolution error bands versus pt and eta
    Errors {
        /// Error-band configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Muon pairs (JSON array)
        #[arg(short, long)]
        pairs: PathBuf,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build the lineshape tables and report timing and normalizations
    Tables {
        /// Run configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured bins per axis
        #[arg(long)]
        bins: Option<usize>,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Fit { config, pairs, output, out_dir } => {
            cmd_fit(&config, &pairs, output.as_ref(), out_dir.as_ref())
        }
        Commands::Correct { parameters, pairs, resolution, output } => {
            cmd_correct(&parameters, &pairs, resolution.as_ref(), output.as_ref())
        }
        Commands::Errors { config, pairs, output } => cmd_errors(&config, &pairs, output.as_ref()),
        Commands::Tables { config, bins, output } => cmd_tables(&config, bins, output.as_ref()),
    }
}

fn load_run_config(path: &Path) -> Result<RunConfig> {
    RunConfig::from_path(path).with_context(|| format!("reading run configuration {}", path.display()))
}

fn load_pairs(path: &Path) -> Result<Vec<msc_core::MuonPair>> {
    read_pairs(path).with_context(|| format!("reading muon pairs {}", path.display()))
}

fn cmd_fit(config: &Path, pairs: &Path, output: Option<&PathBuf>, out_dir: Option<&PathBuf>) -> Result<()> {
    let fit = CalibrationFit::new(load_run_config(config)?)?;
    let pairs = load_pairs(pairs)?;

    let result = fit.run(&pairs)?;
    if let Some(last) = result.iterations.last() {
        tracing::info!(nll = last.nll, iterations = result.iterations.len(), "fit complete");
    }
    if let Some(dir) = out_dir {
        result
            .write_parameter_files(dir)
            .with_context(|| format!("writing parameter files to {}", dir.display()))?;
    }
    write_json(output, serde_json::to_value(&result)?)
}

fn cmd_correct(
    parameters: &Path,
    pairs: &Path,
    resolution: Option<&PathBuf>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let corrector = MomentumScaleCorrector::from_file(parameters)
        .with_context(|| format!("reading scale parameters {}", parameters.display()))?;
    let estimator = resolution
        .map(|path| {
            ResolutionEstimator::from_file(path)
                .with_context(|| format!("reading resolution parameters {}", path.display()))
        })
        .transpose()?;

    let corrected: Vec<_> = load_pairs(pairs)?.iter().map(|p| corrector.correct_pair(p)).collect();
    let masses: Vec<f64> = corrected.iter().map(|p| p.mass()).collect();
    let mut out = serde_json::json!({
        "steps": corrector.n_steps(),
        "pairs": corrected,
        "masses": masses,
    });
    if let Some(estimator) = estimator {
        let sigmas: Vec<f64> = corrected.iter().map(|p| estimator.mass_resolution(p)).collect();
        out["mass_resolution"] = serde_json::to_value(sigmas)?;
    }
    write_json(output, out)
}

fn cmd_errors(config: &Path, pairs: &Path, output: Option<&PathBuf>) -> Result<()> {
    let config = ErrorsConfig::from_path(config)
        .with_context(|| format!("reading errors configuration {}", config.display()))?;
    let analyzer = ErrorsAnalyzer::new(config)?;
    let report = analyzer.analyze(&load_pairs(pairs)?);
    write_json(output, serde_json::to_value(&report)?)
}

fn cmd_tables(config: &Path, bins: Option<usize>, output: Option<&PathBuf>) -> Result<()> {
    let mut config = load_run_config(config)?;
    if let Some(bins) = bins {
        config.table_bins = bins;
        config.validate()?;
    }
    let resonances = config.resonances()?;

    let start = Instant::now();
    let tables = LineshapeTables::build(&resonances, config.table_bins, &CancelFlag::new())?;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let entries: Vec<serde_json::Value> = resonances
        .selected_indices()
        .filter_map(|ires| {
            let desc = resonances.descriptor(ires).ok()?;
            let table = tables.table(ires)?;
            let norms = table.norms();
            let min = norms.iter().copied().fold(f64::INFINITY, f64::min);
            let max = norms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Some(serde_json::json!({
                "index": ires,
                "name": desc.name,
                "mass": desc.mass,
                "width": desc.width,
                "nbins": table.nbins(),
                "norm_min": min,
                "norm_max": max,
            }))
        })
        .collect();

    write_json(output, serde_json::json!({ "elapsed_ms": elapsed_ms, "tables": entries }))
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
