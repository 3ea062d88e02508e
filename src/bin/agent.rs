use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use linux_embedded_hal::{Delay, I2cdev};

use envmon::agent_modules::clock::LocalClock;
use envmon::agent_modules::config::AgentConfig;
use envmon::agent_modules::sampler::{Sampler, SamplingSettings};
use envmon::agent_modules::sensors::sense_hat::SenseHat;
use envmon::agent_modules::sensors::sgp30::Sgp30;
use envmon::agent_modules::sensors::{SensorError, SensorReader};
use envmon::agent_modules::shutdown::ShutdownSignals;
use envmon::db::sqlite_service::MetricStore;
use envmon::version::VERSION;

use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "envmon-agent", version = VERSION, about = "Records Sense HAT and SGP30 readings into SQLite")]
struct Args {
    /// Optional TOML config file; a missing file is ignored.
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "agent.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info` level if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

fn open_bus(path: &str) -> Result<I2cdev, SensorError> {
    I2cdev::new(path).map_err(|e| {
        error!(path, error = %e, "Failed to open I2C bus.");
        SensorError::Open {
            path: path.to_string(),
            reason: e.to_string(),
        }
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    init_logging();
    info!(version = VERSION, "Starting envmon agent...");

    let config = match AgentConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Critical error loading configuration. Exiting.");
            return Err(e.into());
        }
    };

    // Handlers go in before any hardware or database setup.
    let shutdown = Arc::new(AtomicBool::new(false));
    match ShutdownSignals::install() {
        Ok(signals) => {
            tokio::spawn(signals.wait(shutdown.clone()));
        }
        Err(e) => {
            error!(error = %e, "Failed to install signal handlers. Exiting.");
            return Err(e.into());
        }
    }

    let sense_hat = SenseHat::new(open_bus(&config.i2c_bus)?);
    let sgp30 = Sgp30::new(open_bus(&config.i2c_bus)?, Delay);
    let store = MetricStore::open(&config.database_path)?;

    let sampler = Sampler::new(
        SensorReader::new(sense_hat, sgp30),
        LocalClock::new(),
        store,
        config.catalog.clone(),
        SamplingSettings::from(&config),
    );

    match sampler.run(shutdown).await {
        Ok(cycles) => {
            info!(cycles, "Program successfully terminated.");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Agent stopped on a fatal error. Exiting.");
            Err(e.into())
        }
    }
}
