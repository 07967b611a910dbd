//! CLI entry point for ivscan.
//!
//! Subcommands:
//! - `scan`: configure the instruments and run the full ramp procedure
//! - `soak`: fixed-voltage soak acquisition
//! - `probe`: print the identification string of one configured device
//! - `check-config`: parse and validate a configuration card
//!
//! The `--mock` flag substitutes simulated instruments for the bus so every
//! subcommand runs without hardware.

// mimalloc for allocation performance in multi-threaded tokio runs
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use ivscan::config::{Role, ScanConfig};
use ivscan::error::ScanError;
use ivscan::instrument::mock::{self, MockBus};
use ivscan::instrument::{Device, ScpiTransport};
use ivscan::logging;
use ivscan::measurement::ScanOutcome;
use ivscan::scan::IvScanner;

#[derive(Parser)]
#[command(name = "ivscan")]
#[command(about = "Configuration-driven IV scan control", long_about = None)]
struct Cli {
    /// Serial port of the GPIB adapter
    #[arg(long, global = true, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate of the GPIB adapter
    #[arg(long, global = true, default_value_t = 115_200)]
    baud: u32,

    /// Reply timeout in milliseconds
    #[arg(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,

    /// Substitute simulated instruments for the bus
    #[arg(long, global = true)]
    mock: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the instruments and run the full ramp procedure
    Scan {
        /// Path to the configuration card
        #[arg(long)]
        config: PathBuf,

        /// Output base name for the CSV files
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Hold a fixed voltage and stream current readings
    Soak {
        /// Path to the configuration card
        #[arg(long)]
        config: PathBuf,

        /// Bias voltage to hold
        #[arg(long)]
        voltage: f64,

        /// Number of readings to stream
        #[arg(long, default_value_t = 1000)]
        samples: usize,

        /// Output base name for the CSV files
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the identification string of one configured device
    Probe {
        /// Path to the configuration card
        #[arg(long)]
        config: PathBuf,

        /// Instrument role to probe (ammeter or vsource)
        #[arg(long)]
        role: String,
    },

    /// Parse and validate a configuration card
    CheckConfig {
        /// Path to the configuration card
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::level_from_verbosity(cli.verbose)).map_err(anyhow::Error::msg)?;

    match &cli.command {
        Commands::Scan { config, output } => {
            let config = load_validated(config)?;
            let transport = open_transport(&cli, &config).await?;
            let scanner = IvScanner::from_config(config, transport)?;
            scanner.configure().await?;
            let outcome = scanner.scan().await?;
            info!(
                stages = outcome.stages.len(),
                samples = outcome.samples.len(),
                "scan complete"
            );
            write_results(&outcome, output.as_ref())
        }
        Commands::Soak {
            config,
            voltage,
            samples,
            output,
        } => {
            let config = load_validated(config)?;
            let transport = open_transport(&cli, &config).await?;
            let scanner = IvScanner::from_config(config, transport)?;
            scanner.configure().await?;
            let outcome = scanner.soak(*voltage, *samples).await?;
            info!(samples = outcome.samples.len(), "soak complete");
            write_results(&outcome, output.as_ref())
        }
        Commands::Probe { config, role } => {
            let role: Role = role.parse()?;
            let config = load_validated(config)?;
            let record = config.instrument(role).ok_or_else(|| {
                ScanError::Configuration(format!("no {role} record in configuration"))
            })?;
            let transport = open_transport(&cli, &config).await?;
            let device = Device::from_config(role, record, config.compl, transport)?;
            let idn = device.identify().await?;
            println!("{idn}");
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let config = load_validated(config)?;
            let stages = config.ramp.stages();
            println!("configuration is valid");
            for role in config.active_roles() {
                if let Some(record) = config.instrument(role) {
                    println!("  {role}: address {}", record.address);
                }
            }
            println!(
                "  {} ramp stages, Vtest = {} V, {} repetitions per stage",
                stages.len(),
                config.v_test,
                config.num_repetitions
            );
            println!(
                "  settling {} s, hold at Vtest {} s",
                config.stable_time_s, config.time_at_test_s
            );
            Ok(())
        }
    }
}

fn load_validated(path: &PathBuf) -> Result<ScanConfig> {
    let config = ScanConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Open the bus transport: simulated instruments with `--mock`, otherwise
/// the GPIB adapter serial port.
async fn open_transport(cli: &Cli, config: &ScanConfig) -> Result<Arc<dyn ScpiTransport>> {
    if cli.mock {
        let mut bus = MockBus::new()
            .with_noise(5e-13)
            .with_read_delay(Duration::from_millis(10));
        for role in config.active_roles() {
            if let Some(record) = config.instrument(role) {
                let idn = match role {
                    Role::Ammeter => mock::AMMETER_IDN,
                    Role::Vsource => mock::VSOURCE_IDN,
                };
                bus = bus.with_device(record.address, idn);
            }
        }
        warn!("running against simulated instruments (--mock)");
        return Ok(Arc::new(bus));
    }

    #[cfg(feature = "instrument_serial")]
    {
        let transport = ivscan::instrument::prologix::PrologixTransport::open(
            &cli.port,
            cli.baud,
            Duration::from_millis(cli.timeout_ms),
        )
        .await?;
        Ok(Arc::new(transport))
    }
    #[cfg(not(feature = "instrument_serial"))]
    {
        Err(ScanError::SerialFeatureDisabled.into())
    }
}

#[cfg(feature = "storage_csv")]
fn write_results(outcome: &ScanOutcome, output: Option<&PathBuf>) -> Result<()> {
    let base = output
        .cloned()
        .unwrap_or_else(ivscan::storage::default_base);
    let (stages_path, samples_path) = ivscan::storage::write_outcome(outcome, &base)?;
    info!("stage records written to {}", stages_path.display());
    info!("raw samples written to {}", samples_path.display());
    Ok(())
}

#[cfg(not(feature = "storage_csv"))]
fn write_results(_outcome: &ScanOutcome, output: Option<&PathBuf>) -> Result<()> {
    if output.is_some() {
        return Err(ScanError::FeatureNotEnabled("storage_csv".into()).into());
    }
    warn!("storage_csv feature disabled; results were not persisted");
    Ok(())
}
