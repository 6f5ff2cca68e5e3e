use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::logger::data::{round_to, MetricTable, Value};
use crate::logger::{AcquireError, Meter};

/// Components bitmask requesting every section of the status document
pub const ALL_COMPONENTS: u32 = 1073741823;

/// Number of entries in the device's sensor value set
pub const SENSOR_COUNT: usize = 10;

const VOLTAGE: usize = 0;
const CURRENT: usize = 1;
const FREQUENCY: usize = 2;
const ACTIVE_POWER: usize = 4;
const APPARENT_POWER: usize = 6;
const POWER_FACTOR: usize = 7;
const TOTAL_ENERGY: usize = 8;
const RESETTABLE_ENERGY: usize = 9;

/// Column layout written for a status document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Profile {
    /// Core electrical metrics, energy in Wh, with computed power cross-checks
    #[default]
    Energy,
    /// Device clock plus every reported metric as-is
    Full,
}

impl Profile {
    pub fn metric_table(self) -> MetricTable {
        match self {
            Profile::Energy => MetricTable::new([
                "Voltage (V)",
                "Current (A)",
                "Active Power (W)",
                "Computed Active Power (W) - Precise",
                "Frequency (Hz)",
                "Apparent Power (VA)",
                "Computed Apparent Power (VA)",
                "Power Factor (PF)",
                "Total Energy (Wh)",
                "Resettable Energy (Wh)",
            ]),
            Profile::Full => MetricTable::new([
                "Device Time",
                "Voltage (V)",
                "Current (A)",
                "Frequency (Hz)",
                "Phase (deg)",
                "Active Power (W)",
                "Reactive Power (VAR)",
                "Apparent Power (VA)",
                "Power Factor (PF)",
                "Total Energy (kWh)",
                "Resettable Energy (kWh)",
            ]),
        }
    }
}

/// Configuration for an HTTP status-document meter
#[derive(Debug, Clone)]
pub struct StatusJsonConfig {
    pub base_url: String,   // Device root, e.g. http://192.168.0.2
    pub components: u32,    // Bitmask passed as ?components=
    pub timeout: Duration,  // Whole-request timeout
    pub profile: Profile,
    pub precision: u32,     // Decimals kept on computed cross-checks
}

impl Default for StatusJsonConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.0.2".to_string(),
            components: ALL_COMPONENTS,
            timeout: Duration::from_secs(5),
            profile: Profile::Energy,
            precision: 3,
        }
    }
}

#[derive(Deserialize)]
struct StatusDocument {
    #[serde(default)]
    sensor_values: Vec<SensorGroup>,
    // Only decoded for profiles that log the device clock
    #[serde(default)]
    clock: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SensorGroup {
    #[serde(default)]
    values: Vec<Vec<SensorValue>>,
}

#[derive(Deserialize)]
struct SensorValue {
    v: f64,
}

#[derive(Deserialize)]
struct SystemTime {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl SystemTime {
    fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_opt(self.hour, self.minute, self.second)
    }
}

/// Values pulled out of one status document
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSample {
    pub values: Vec<f64>,
    pub device_time: Option<NaiveDateTime>,
}

/// Extract the first sensor value set and the device clock from a status body.
pub fn parse_status(body: &str, profile: Profile) -> Result<StatusSample, AcquireError> {
    let document: StatusDocument =
        serde_json::from_str(body).map_err(|e| AcquireError::ParseError(e.to_string()))?;

    let values: Vec<f64> = document
        .sensor_values
        .first()
        .and_then(|group| group.values.first())
        .ok_or_else(|| AcquireError::ParseError("sensor_values holds no value set".to_string()))?
        .iter()
        .map(|sensor| sensor.v)
        .collect();

    if values.len() < SENSOR_COUNT {
        return Err(AcquireError::ParseError(format!(
            "expected {} sensor values, got {}",
            SENSOR_COUNT,
            values.len()
        )));
    }

    let device_time = match profile {
        Profile::Energy => None,
        Profile::Full => Some(device_time(document.clock)?),
    };

    Ok(StatusSample { values, device_time })
}

fn device_time(clock: Option<serde_json::Value>) -> Result<NaiveDateTime, AcquireError> {
    let mut clock = clock.unwrap_or_default();
    let systemtime = match clock.get_mut("systemtime") {
        Some(systemtime) => systemtime.take(),
        None => return Err(AcquireError::ParseError("clock.systemtime missing".to_string())),
    };
    let time: SystemTime = serde_json::from_value(systemtime)
        .map_err(|e| AcquireError::ParseError(format!("clock.systemtime: {}", e)))?;
    time.to_naive()
        .ok_or_else(|| AcquireError::ParseError("clock.systemtime is not a valid date".to_string()))
}

/// Power meter exposing `statusjsn.js` over HTTP.
pub struct StatusJsonMeter {
    client: reqwest::Client,
    url: String,
    components: u32,
    profile: Profile,
    precision: u32,
}

impl StatusJsonMeter {
    pub fn new(config: StatusJsonConfig) -> reqwest::Result<Self> {
        let url = format!("{}/statusjsn.js", config.base_url.trim_end_matches('/'));
        info!("Initializing status meter at {} (profile {:?})", url, config.profile);
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(StatusJsonMeter {
            client,
            url,
            components: config.components,
            profile: config.profile,
            precision: config.precision,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn network_error(e: reqwest::Error) -> AcquireError {
    AcquireError::NetworkError(e.to_string())
}

impl Meter for StatusJsonMeter {
    type Sample = StatusSample;

    fn metric_table(&self) -> MetricTable {
        self.profile.metric_table()
    }

    async fn acquire(&mut self) -> Result<StatusSample, AcquireError> {
        let body = self
            .client
            .get(&self.url)
            .query(&[("components", self.components)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(network_error)?
            .text()
            .await
            .map_err(network_error)?;

        parse_status(&body, self.profile)
    }

    fn normalize(&self, sample: StatusSample) -> Vec<Value> {
        let v = &sample.values;
        match self.profile {
            Profile::Energy => {
                let voltage = v[VOLTAGE];
                let current = v[CURRENT];
                let power_factor = round_to(v[POWER_FACTOR], 2);
                vec![
                    Value::Float(voltage),
                    Value::Float(current),
                    Value::Float(v[ACTIVE_POWER]),
                    Value::Float(round_to(voltage * current * power_factor, self.precision)),
                    Value::Float(v[FREQUENCY]),
                    Value::Float(v[APPARENT_POWER]),
                    Value::Float(round_to(voltage * current, self.precision)),
                    Value::Float(power_factor),
                    Value::Float(v[TOTAL_ENERGY] * 1000.0),
                    Value::Float(v[RESETTABLE_ENERGY] * 1000.0),
                ]
            }
            Profile::Full => {
                let device_time = sample
                    .device_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                std::iter::once(Value::Text(device_time))
                    .chain(v[..SENSOR_COUNT].iter().copied().map(Value::Float))
                    .collect()
            }
        }
    }
}
