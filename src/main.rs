use std::{path::PathBuf, process::ExitCode};

use camprint::{
    StyleConfig,
    config::DEFAULT_CONFIG_FILE,
    error::Result,
    pipeline::{self, ExtractionOutcome},
    report::RunReport,
};
use clap::{Args, Parser, Subcommand};
use log::{error, info};

mod logger;

#[derive(Parser)]
#[command(name = "camprint")]
#[command(version, about = "Extract an infrared camera's fingerprint and apply it to clean images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Write a JSON report of the run
    #[arg(long, global = true, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Process files one at a time in every stage
    #[arg(long, global = true)]
    sequential: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the camera fingerprint from the raw image directory
    Extract(ExtractArgs),

    /// Apply the stored fingerprint to the clean image directory
    Apply(ApplyArgs),

    /// Extract, then apply
    All {
        #[command(flatten)]
        extract: ExtractArgs,

        #[command(flatten)]
        apply: ApplyArgs,
    },
}

#[derive(Debug, Clone, Args)]
struct ExtractArgs {
    /// Only consider the first N source files; undecodable ones count too
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Write PNG previews of the maps
    #[arg(long)]
    previews: bool,
}

#[derive(Debug, Clone, Args)]
struct ApplyArgs {
    /// Noise strength (0 disables noise)
    #[arg(long, value_name = "FLOAT")]
    noise_intensity: Option<f32>,

    /// Vignetting strength (0 disables vignetting)
    #[arg(long, value_name = "FLOAT")]
    vignetting_strength: Option<f32>,
}

impl ExtractArgs {
    fn apply_to(&self, config: &mut StyleConfig) {
        if self.limit.is_some() {
            config.runtime.max_images = self.limit;
        }
        config.runtime.write_previews |= self.previews;
    }
}

impl ApplyArgs {
    fn apply_to(&self, config: &mut StyleConfig) {
        if let Some(v) = self.noise_intensity {
            config.applicator.noise_intensity = v;
        }
        if let Some(v) = self.vignetting_strength {
            config.applicator.vignetting_strength = v;
        }
    }
}

impl Cli {
    /// Folds the command line overrides into the loaded configuration.
    fn apply_to(&self, config: &mut StyleConfig) {
        match &self.command {
            Commands::Extract(args) => args.apply_to(config),
            Commands::Apply(args) => args.apply_to(config),
            Commands::All { extract, apply } => {
                extract.apply_to(config);
                apply.apply_to(config);
            }
        }
        if self.sequential {
            config.runtime.parallel = false;
        }
    }
}

fn extraction_stage(config: &StyleConfig, report: &mut RunReport) -> Result<ExtractionOutcome> {
    info!("step 1: extracting camera fingerprint");
    let outcome = pipeline::run_extraction(config)?;
    for skipped in &outcome.report.skipped {
        info!("  skipped {}", skipped.path.display());
    }
    report.extraction = Some(outcome.report.clone());
    Ok(outcome)
}

fn run(cli: &Cli) -> ExitCode {
    let mut config = match StyleConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    cli.apply_to(&mut config);

    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let mut report = RunReport::default();
    let extract_first = matches!(cli.command, Commands::Extract(_) | Commands::All { .. });
    let apply_after = matches!(cli.command, Commands::Apply(_) | Commands::All { .. });

    let mut fingerprint = None;
    if extract_first {
        match extraction_stage(&config, &mut report) {
            Ok(outcome) => fingerprint = Some(outcome.fingerprint),
            Err(e) => {
                error!("extraction failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if apply_after {
        info!("step 2: applying camera style");
        let result = match &fingerprint {
            Some(fp) => pipeline::apply_directory(fp, &config),
            None => pipeline::run_application(&config),
        };
        match result {
            Ok(application) => report.application = Some(application),
            Err(e) => {
                error!("application failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Some(path) = &cli.report {
        if let Err(e) = report.save(path) {
            error!("failed to write report {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        info!("report written to {}", path.display());
    }

    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    logger::init();
    let cli = Cli::parse();
    run(&cli)
}
