pub mod data;
pub mod sink;

use chrono::{DateTime, Utc};
use data::{MetricTable, Record, Value, ELAPSED_COLUMN, UNIX_MS_COLUMN, UTC_COLUMN};
use sink::{CsvSink, SinkError};
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a single acquisition produced no reading. Never fatal to the loop.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Register 0x{address:04X} read failed: {reason}")]
    RegisterReadError { address: u16, reason: String },
}

/// A metering device the poll loop can drive.
#[allow(async_fn_in_trait)]
pub trait Meter {
    /// Raw, source-specific reading handed from acquisition to normalization
    type Sample;

    fn metric_table(&self) -> MetricTable;

    async fn acquire(&mut self) -> Result<Self::Sample, AcquireError>;

    /// Map a raw sample onto the metric table, one value per metric in order.
    fn normalize(&self, sample: Self::Sample) -> Vec<Value>;
}

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub csv: PathBuf,          // Output CSV file
    pub rate: Duration,        // Sleep between ticks
    pub max_ticks: Option<u64>, // Stop after this many rows, None = until interrupted
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            csv: PathBuf::from("readings.csv"),
            rate: Duration::from_secs(1),
            max_ticks: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub failures: u64,
}

enum Phase<S> {
    Idle,
    Acquire,
    Normalize {
        captured_at: DateTime<Utc>,
        elapsed: Duration,
        outcome: Result<S, AcquireError>,
    },
    Persist(Record),
    Echo(Record),
    Sleep,
    Stopped,
}

/// Drive `meter` until `shutdown` resolves or `max_ticks` rows are written.
///
/// Every tick appends exactly one row: a failed acquisition yields a sentinel
/// row and the loop carries on. Only a sink that cannot be bound to the output
/// file is an error.
pub async fn run<M, F>(meter: &mut M, config: &LoopConfig, shutdown: F) -> Result<LoopSummary, SinkError>
where
    M: Meter,
    F: Future<Output = ()>,
{
    let table = meter.metric_table();
    let sink = CsvSink::new(&config.csv, table.header())?;
    info!(
        "Starting poll loop: {} columns, rate {:?}, output {}",
        sink.header().len(),
        config.rate,
        sink.path().display()
    );

    tokio::pin!(shutdown);
    let mut summary = LoopSummary::default();
    let mut phase = Phase::Idle;

    loop {
        phase = match phase {
            Phase::Idle => Phase::Acquire,

            Phase::Acquire => {
                let captured_at = Utc::now();
                let started = Instant::now();
                tokio::select! {
                    biased;
                    _ = &mut shutdown => Phase::Stopped,
                    outcome = meter.acquire() => Phase::Normalize {
                        captured_at,
                        elapsed: started.elapsed(),
                        outcome,
                    },
                }
            }

            Phase::Normalize { captured_at, elapsed, outcome } => {
                let values = match outcome {
                    Ok(sample) => Some(meter.normalize(sample)),
                    Err(e) => {
                        warn!("Acquisition failed, logging sentinel row: {}", e);
                        None
                    }
                };
                Phase::Persist(Record::new(captured_at, values, elapsed.as_micros()))
            }

            Phase::Persist(record) => {
                if let Err(e) = sink.append(&record.to_row(&table)) {
                    error!("Failed to write row to {}: {}", sink.path().display(), e);
                }
                Phase::Echo(record)
            }

            Phase::Echo(record) => {
                println!("{}", format_echo(&table, &record));
                summary.ticks += 1;
                if record.is_sentinel() {
                    summary.failures += 1;
                }
                match config.max_ticks {
                    Some(max) if summary.ticks >= max => Phase::Stopped,
                    _ => Phase::Sleep,
                }
            }

            Phase::Sleep => {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => Phase::Stopped,
                    _ = tokio::time::sleep(config.rate) => Phase::Acquire,
                }
            }

            Phase::Stopped => break,
        };
    }

    info!(
        "Polling stopped after {} ticks ({} failed)",
        summary.ticks, summary.failures
    );
    Ok(summary)
}

/// Human-readable console block for one tick.
pub fn format_echo(table: &MetricTable, record: &Record) -> String {
    let mut out = String::new();
    match &record.values {
        Some(values) => {
            out.push_str(&format!("{}: {}\n", UNIX_MS_COLUMN, record.unix_ms));
            out.push_str(&format!("{}: {}\n", UTC_COLUMN, record.utc));
            for (name, value) in table.names().iter().zip(values) {
                out.push_str(&format!("{}: {}\n", name, value));
            }
            out.push_str(&format!("{}: {}\n", ELAPSED_COLUMN, record.elapsed_us));
        }
        None => {
            out.push_str(&format!(
                "{}: {} - Request Failed (Logged as TIMEOUT)\n",
                UNIX_MS_COLUMN, record.unix_ms
            ));
        }
    }
    out.push_str(&"-".repeat(50));
    out
}
