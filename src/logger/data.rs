use chrono::{DateTime, Utc};
use std::fmt;

/// Written in place of every metric column when a tick fails.
pub const SENTINEL: &str = "TIMEOUT";

pub const UNIX_MS_COLUMN: &str = "Unix Timestamp (ms)";
pub const UTC_COLUMN: &str = "UTC Human-Readable";
pub const ELAPSED_COLUMN: &str = "Elapsed Time (µs)";

/// One normalized metric value, carrying the precision it is printed with.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Shortest representation that round-trips, keeping one decimal on whole
    /// numbers so the column reads as a float (`230.0`, not `230`)
    Float(f64),
    Integer(i64),
    /// Printed with exactly this many decimals
    Fixed(f64, usize),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) | Value::Fixed(v, _) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => write!(f, "{:.1}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Fixed(v, decimals) => write!(f, "{:.*}", decimals, v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Most decimals an f64 can meaningfully be rounded to
pub const MAX_PRECISION: u32 = 15;

/// Round half away from zero to `decimals` places, capped at `MAX_PRECISION`.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals.min(MAX_PRECISION) as i32);
    (value * factor).round() / factor
}

/// Ordered metric names. The order is the CSV column order and never changes
/// for the lifetime of an output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricTable {
    names: Vec<String>,
}

impl MetricTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of metric columns, excluding timestamps and elapsed time.
    pub fn width(&self) -> usize {
        self.names.len()
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.names.len() + 3);
        header.push(UNIX_MS_COLUMN.to_string());
        header.push(UTC_COLUMN.to_string());
        header.extend(self.names.iter().cloned());
        header.push(ELAPSED_COLUMN.to_string());
        header
    }
}

/// One tick's output. `values` is `None` when acquisition failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub unix_ms: i64,
    pub utc: String,
    pub values: Option<Vec<Value>>,
    pub elapsed_us: u128,
}

impl Record {
    pub fn new(captured_at: DateTime<Utc>, values: Option<Vec<Value>>, elapsed_us: u128) -> Self {
        Self {
            unix_ms: captured_at.timestamp_millis(),
            utc: format_utc(&captured_at),
            values,
            elapsed_us,
        }
    }

    /// True for a failed tick's row
    pub fn is_sentinel(&self) -> bool {
        self.values.is_none()
    }

    pub fn to_row(&self, table: &MetricTable) -> Vec<String> {
        let mut row = Vec::with_capacity(table.width() + 3);
        row.push(self.unix_ms.to_string());
        row.push(self.utc.clone());
        match &self.values {
            Some(values) => row.extend(values.iter().map(Value::to_string)),
            None => row.extend(std::iter::repeat_n(SENTINEL.to_string(), table.width())),
        }
        row.push(self.elapsed_us.to_string());
        row
    }
}

pub fn format_utc(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
