use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt;

use energy_logger::devices::registers::RegisterMap;
use energy_logger::devices::statusjsn::{Profile, ALL_COMPONENTS};
use energy_logger::devices::{ModbusConfig, ModbusMeter, StatusJsonConfig, StatusJsonMeter};
use energy_logger::har;
use energy_logger::logger::data::MAX_PRECISION;
use energy_logger::logger::{self, LoopConfig, Meter};

/// Poll a power meter and save readings to a CSV file
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Directory for the rolling application log
    #[clap(long, default_value = "logs", global = true)]
    log_dir: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the device's HTTP status document
    Http {
        #[clap(flatten)]
        poll: PollArgs,

        /// Device base URL
        #[clap(long, default_value = "http://192.168.0.2")]
        url: String,

        /// Components bitmask requested from the device
        #[clap(long, default_value_t = ALL_COMPONENTS)]
        components: u32,

        /// Request timeout in seconds
        #[clap(long, default_value_t = 5.0)]
        timeout: f64,

        /// Column layout of the output file
        #[clap(long, value_enum, default_value_t = Profile::Energy)]
        profile: Profile,
    },

    /// Poll the device's input registers over Modbus-TCP
    Modbus {
        #[clap(flatten)]
        poll: PollArgs,

        /// Modbus server address
        #[clap(long, default_value = "192.168.0.2")]
        host: String,

        /// Modbus server port
        #[clap(long, default_value = "502")]
        port: u16,

        /// Modbus unit identifier
        #[clap(long, default_value = "1")]
        unit_id: u8,

        /// Request timeout in seconds
        #[clap(long, default_value_t = 1.0)]
        timeout: f64,

        /// Connection attempts per tick before logging a sentinel row
        #[clap(long, default_value = "3")]
        reconnect_attempts: u32,

        /// Delay between register reads in milliseconds
        #[clap(long, default_value = "0")]
        register_delay_ms: u64,

        /// Read every documented register instead of the basic set
        #[clap(long)]
        extended: bool,
    },

    /// Convert a HAR network capture into a CSV table
    Har {
        /// HAR file to convert
        input: PathBuf,

        /// Output CSV file
        #[clap(long, short, default_value = "output.csv")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct PollArgs {
    /// Filename for the CSV output
    #[clap(long)]
    csv: PathBuf,

    /// Polling rate in seconds
    #[clap(long, default_value_t = 1.0)]
    rate: f64,

    /// Decimals kept on computed power cross-checks
    #[clap(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(0..=MAX_PRECISION as i64))]
    precision: u32,
}

impl PollArgs {
    fn loop_config(&self) -> Result<LoopConfig, Box<dyn std::error::Error>> {
        Ok(LoopConfig {
            csv: self.csv.clone(),
            rate: seconds(self.rate, "rate")?,
            max_ticks: None,
        })
    }
}

fn seconds(value: f64, name: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("invalid --{} {}: {}", name, value, e).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Keep the guard alive so buffered log lines are flushed on exit
    let _guard = setup_logging(&cli.log_dir);
    info!("Starting application");

    match cli.command {
        Command::Http {
            poll,
            url,
            components,
            timeout,
            profile,
        } => {
            let config = StatusJsonConfig {
                base_url: url,
                components,
                timeout: seconds(timeout, "timeout")?,
                profile,
                precision: poll.precision,
            };
            let mut meter = StatusJsonMeter::new(config)?;
            poll_until_interrupted(&mut meter, poll.loop_config()?).await?;
        }
        Command::Modbus {
            poll,
            host,
            port,
            unit_id,
            timeout,
            reconnect_attempts,
            register_delay_ms,
            extended,
        } => {
            let config = ModbusConfig {
                host,
                port,
                unit_id,
                timeout: seconds(timeout, "timeout")?,
                reconnect_attempts,
                register_delay: Duration::from_millis(register_delay_ms),
                map: if extended { RegisterMap::extended() } else { RegisterMap::basic() },
                precision: poll.precision,
                ..ModbusConfig::default()
            };
            let mut meter = ModbusMeter::new(config);
            poll_until_interrupted(&mut meter, poll.loop_config()?).await?;
        }
        Command::Har { input, output } => convert_har(&input, &output)?,
    }

    info!("Application shutting down");
    Ok(())
}

async fn poll_until_interrupted<M: Meter>(
    meter: &mut M,
    config: LoopConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match logger::run(meter, &config, interrupted()).await {
        Ok(summary) => {
            println!("\nPolling stopped.");
            info!("{} rows written to {}", summary.ticks, config.csv.display());
            Ok(())
        }
        Err(e) => {
            error!("Cannot log to {}: {}", config.csv.display(), e);
            eprintln!("Cannot log to {}: {}", config.csv.display(), e);
            Err(Box::new(e))
        }
    }
}

async fn interrupted() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received"),
        Err(e) => {
            // Without a signal handler the loop runs until killed
            error!("Failed to listen for interrupt: {}", e);
            std::future::pending::<()>().await
        }
    }
}

fn convert_har(input: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match har::convert_file(input, output) {
        Ok(rows) => {
            println!("Data saved to {}", output.display());
            println!("{}", har::preview(&rows, 5));
            Ok(())
        }
        Err(e) => {
            error!("HAR conversion failed: {}", e);
            eprintln!("Error: {}", e);
            Err(Box::new(e))
        }
    }
}

fn setup_logging(log_dir: &Path) -> WorkerGuard {
    // Set up file-based logging with daily rotation
    let file_appender = rolling::daily(log_dir, "app.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    fmt()
        .with_writer(non_blocking)
        .with_ansi(false) // Disable ANSI colors in log files
        .with_level(true)
        .init();
    guard
}
