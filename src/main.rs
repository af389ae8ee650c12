//! CLI entry point for the weld-daq engine.
//!
//! The HTTP layer lives in a separate deployment; this binary exposes the
//! same core operations for local use and troubleshooting:
//!
//! ```bash
//! # Index experiment folders into the (in-memory) repository
//! weld-daq scan
//!
//! # List the channels a loaded experiment exposes
//! weld-daq inspect "J23-09-06(1)" --format tensile
//!
//! # Windowed, decimated samples plus statistics for one channel
//! weld-daq channel "J23-09-06(1)" force_time --format tensile --max-points 50
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use weld_daq::channel::SourceFormat;
use weld_daq::config::Settings;
use weld_daq::logging::{self, LogConfig};
use weld_daq::resample::Window;
use weld_daq::scan::{DirectoryScanner, InMemoryRepository};
use weld_daq::service::ExperimentService;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "weld-daq")]
#[command(about = "Sensor-data ingestion engine for weld-testing rigs", long_about = None)]
struct Cli {
    /// Config name under config/ (without extension)
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Position,
    Tensile,
    Temperature,
    Hdf5,
}

impl From<FormatArg> for SourceFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Position => SourceFormat::Position,
            FormatArg::Tensile => SourceFormat::Tensile,
            FormatArg::Temperature => SourceFormat::Temperature,
            FormatArg::Hdf5 => SourceFormat::Hdf5,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the data root and index experiment folders
    Scan {
        /// Scan a different root than the configured one
        #[arg(long)]
        root: Option<PathBuf>,

        /// Re-scan folders that are already indexed
        #[arg(long)]
        force: bool,
    },

    /// Show metadata and channel listing for one experiment
    Inspect {
        experiment: String,

        #[arg(long, value_enum)]
        format: FormatArg,
    },

    /// Print a windowed, decimated channel with its statistics
    Channel {
        experiment: String,
        channel: String,

        #[arg(long, value_enum)]
        format: FormatArg,

        #[arg(long)]
        start: Option<f64>,

        #[arg(long)]
        end: Option<f64>,

        #[arg(long)]
        max_points: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::new(cli.config.as_deref())?;

    let level = logging::parse_log_level(&settings.log_level).map_err(anyhow::Error::msg)?;
    logging::init(LogConfig::new(level)).map_err(anyhow::Error::msg)?;
    weld_daq::validation::validate_settings(&settings)?;

    let settings = Arc::new(settings);
    match cli.command {
        Commands::Scan { root, force } => {
            let root = root.unwrap_or_else(|| settings.data_root.clone());
            let scanner = DirectoryScanner::new(settings.scanner.cutoff_date);
            let repository = InMemoryRepository::new();
            let report = scanner.scan(&root, &repository, force).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            for record in repository.records().await {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Commands::Inspect { experiment, format } => {
            let service = ExperimentService::new(settings, format.into());
            let response = service.get_metadata(&experiment, false).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Channel {
            experiment,
            channel,
            format,
            start,
            end,
            max_points,
        } => {
            let service = ExperimentService::new(settings, format.into());
            let window = Window::new(start, end);
            let data = service
                .get_channel_data(&experiment, &channel, window, max_points, false)
                .await;
            println!("{}", serde_json::to_string_pretty(&data)?);
            let stats = service.get_channel_statistics(&experiment, &channel).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}
