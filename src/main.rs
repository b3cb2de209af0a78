use anyhow::{Context, Result};
use clap::Parser;
use cwc_retrieval::core::{DEFAULT_DESCRIPTION, DEFAULT_WORKERS};
use cwc_retrieval::logging::init_logging;
use cwc_retrieval::{
    LiquidWaterInversion, RefractiveIndexTable, RetrievalParams, RetrievalPipeline, RunOutcome,
    RunPaths,
};
use std::path::PathBuf;
use std::time::Duration;

/// Retrieve canopy water content from an ISOFIT run's reflectance
#[derive(Debug, Parser)]
#[command(name = "cwc-retrieval", version)]
struct Cli {
    /// ISOFIT run directory containing config/*_modtran.json
    isofit_dir: PathBuf,

    /// Output raster (defaults to the run's _cwc file)
    #[arg(long = "output_cwc_file", alias = "output-cwc-file")]
    output_cwc_file: Option<PathBuf>,

    #[arg(long, default_value = "INFO")]
    loglevel: String,

    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Liquid water refractive index CSV (columns wvl_6 and "T = 20°C")
    #[arg(long = "water-k-table")]
    water_k_table: PathBuf,

    /// Worker pool size and number of line partitions
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Abort the parallel phase after this many seconds
    #[arg(long = "deadline-secs")]
    deadline_secs: Option<u64>,

    /// Let remaining workers finish after one fails
    #[arg(long = "no-cancel-on-failure")]
    no_cancel_on_failure: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.loglevel, cli.logfile.as_deref()).context("Failed to initialise logging")?;

    let paths = RunPaths::discover(&cli.isofit_dir, cli.output_cwc_file.clone())
        .with_context(|| format!("Failed to resolve run directory {}", cli.isofit_dir.display()))?;
    log::info!("Isofit config file: {}", paths.config_file.display());

    let table = RefractiveIndexTable::from_csv(&cli.water_k_table)
        .with_context(|| format!("Failed to load {}", cli.water_k_table.display()))?;

    let params = RetrievalParams {
        workers: cli.workers,
        cancel_on_failure: !cli.no_cancel_on_failure,
        deadline: cli.deadline_secs.map(Duration::from_secs),
        description: DEFAULT_DESCRIPTION.to_string(),
    };
    let pipeline = RetrievalPipeline::with_params(LiquidWaterInversion::new(table), params);

    let outcome = pipeline
        .run(&paths.reflectance, &paths.output)
        .with_context(|| format!("CWC retrieval into {} failed", paths.output.display()))?;

    match outcome {
        RunOutcome::AlreadyComplete => log::info!("Nothing to do"),
        RunOutcome::Completed(diagnostics) => log::info!(
            "Inverted {} spectra ({} no-data) across {} partitions",
            diagnostics.valid_spectra,
            diagnostics.skipped_spectra,
            diagnostics.partitions
        ),
    }
    Ok(())
}
