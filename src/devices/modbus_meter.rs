use std::time::Duration;
use tokio::net::lookup_host;
use tokio_modbus::client::{tcp, Context, Reader};
use tokio_modbus::Slave;
use tracing::{info, warn, error};

use super::registers::{combine_pair, RegisterMap, Role};
use crate::logger::data::{round_to, MetricTable, Value};
use crate::logger::{AcquireError, Meter};

pub const COMPUTED_ACTIVE_POWER: &str = "Computed Active Power (W)";
pub const COMPUTED_APPARENT_POWER: &str = "Computed Apparent Power (VA)";

/// Configuration for a Modbus-TCP meter
#[derive(Debug, Clone)]
pub struct ModbusConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,         // Per-request timeout
    pub reconnect_delay: Duration, // Pause between connection attempts
    pub reconnect_attempts: u32,   // Attempts per tick before logging a sentinel row
    pub register_delay: Duration,  // Pause between register reads
    pub map: RegisterMap,
    pub precision: u32,            // Decimals kept on computed cross-checks
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.2".to_string(),
            port: 502,
            unit_id: 1,
            timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(1),
            reconnect_attempts: 3,
            register_delay: Duration::ZERO,
            map: RegisterMap::basic(),
            precision: 3,
        }
    }
}

/// Transport that can read one register pair at a time.
#[allow(async_fn_in_trait)]
pub trait RegisterLink {
    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> Result<(), AcquireError>;

    /// Read two consecutive input registers starting at `address`.
    async fn read_pair(&mut self, address: u16) -> Result<(u16, u16), AcquireError>;
}

/// Persistent Modbus-TCP connection, dropped after any transport failure so
/// the next tick reconnects.
pub struct TcpLink {
    context: Option<Context>,
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
}

impl TcpLink {
    pub fn new(host: &str, port: u16, unit_id: u8, timeout: Duration) -> Self {
        info!("Initializing Modbus link to {}:{} (unit {})", host, port, unit_id);
        TcpLink {
            context: None,
            host: host.to_string(),
            port,
            unit_id,
            timeout,
        }
    }
}

impl RegisterLink for TcpLink {
    fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    async fn connect(&mut self) -> Result<(), AcquireError> {
        info!("Attempting to connect to Modbus server at {}:{}", self.host, self.port);
        let socket_addr = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| AcquireError::NetworkError(e.to_string()))?
            .next()
            .ok_or_else(|| AcquireError::NetworkError(format!("no address for {}", self.host)))?;

        let context = tokio::time::timeout(self.timeout, tcp::connect_slave(socket_addr, Slave(self.unit_id)))
            .await
            .map_err(|_| AcquireError::NetworkError(format!("connect to {} timed out", socket_addr)))?
            .map_err(|e| AcquireError::NetworkError(e.to_string()))?;

        self.context = Some(context);
        info!("Modbus server {} connected", socket_addr);
        Ok(())
    }

    async fn read_pair(&mut self, address: u16) -> Result<(u16, u16), AcquireError> {
        let Some(context) = self.context.as_mut() else {
            return Err(AcquireError::NetworkError("Modbus server not connected".to_string()));
        };

        let reason = match tokio::time::timeout(self.timeout, context.read_input_registers(address, 2)).await {
            Ok(Ok(Ok(words))) => match words.as_slice() {
                [high, low, ..] => return Ok((*high, *low)),
                _ => format!("expected 2 registers, got {}", words.len()),
            },
            // Device answered with an exception, the connection is still good
            Ok(Ok(Err(exception))) => format!("exception {:?}", exception),
            Ok(Err(e)) => {
                error!("Modbus transport error, dropping connection: {}", e);
                self.context = None;
                e.to_string()
            }
            Err(_) => {
                error!("Modbus request timed out, dropping connection");
                self.context = None;
                "request timed out".to_string()
            }
        };
        Err(AcquireError::RegisterReadError { address, reason })
    }
}

/// Meter reading a fixed register map over Modbus.
pub struct ModbusMeter<L = TcpLink> {
    link: L,
    map: RegisterMap,
    reconnect_delay: Duration,
    reconnect_attempts: u32,
    register_delay: Duration,
    precision: u32,
}

impl ModbusMeter<TcpLink> {
    pub fn new(config: ModbusConfig) -> Self {
        let link = TcpLink::new(&config.host, config.port, config.unit_id, config.timeout);
        Self::with_link(link, config)
    }
}

impl<L: RegisterLink> ModbusMeter<L> {
    pub fn with_link(link: L, config: ModbusConfig) -> Self {
        Self {
            link,
            map: config.map,
            reconnect_delay: config.reconnect_delay,
            reconnect_attempts: config.reconnect_attempts.max(1),
            register_delay: config.register_delay,
            precision: config.precision,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    async fn ensure_connected(&mut self) -> Result<(), AcquireError> {
        for attempt in 1..=self.reconnect_attempts {
            if self.link.is_connected() {
                return Ok(());
            }
            match self.link.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Failed to connect to Modbus server (attempt {}/{}): {}",
                        attempt, self.reconnect_attempts, e
                    );
                    if attempt < self.reconnect_attempts {
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                }
            }
        }
        Err(AcquireError::NetworkError(format!(
            "Modbus server unreachable after {} attempts",
            self.reconnect_attempts
        )))
    }

    fn role_value(&self, values: &[Value], role: Role) -> f64 {
        self.map
            .registers()
            .iter()
            .zip(values)
            .find(|(register, _)| register.role == role)
            .and_then(|(_, value)| value.as_f64())
            .unwrap_or(0.0)
    }
}

impl<L: RegisterLink> Meter for ModbusMeter<L> {
    /// Raw 32-bit values in map order, zero where a read failed
    type Sample = Vec<u32>;

    fn metric_table(&self) -> MetricTable {
        let names = self.map.registers().iter().map(|r| r.name);
        MetricTable::new(names.chain([COMPUTED_ACTIVE_POWER, COMPUTED_APPARENT_POWER]))
    }

    async fn acquire(&mut self) -> Result<Vec<u32>, AcquireError> {
        self.ensure_connected().await?;

        let mut raw = vec![0u32; self.map.len()];
        for (slot, register) in raw.iter_mut().zip(self.map.registers()) {
            match self.link.read_pair(register.address).await {
                Ok((high, low)) => *slot = combine_pair(high, low),
                Err(e) => warn!("{} left at default: {}", register.name, e),
            }
            if !self.register_delay.is_zero() {
                tokio::time::sleep(self.register_delay).await;
            }
        }
        Ok(raw)
    }

    fn normalize(&self, sample: Vec<u32>) -> Vec<Value> {
        let mut values: Vec<Value> = self
            .map
            .registers()
            .iter()
            .zip(sample)
            .map(|(register, raw)| register.scale.apply(raw))
            .collect();

        let voltage = self.role_value(&values, Role::Voltage);
        let current = self.role_value(&values, Role::Current);
        let power_factor = self.role_value(&values, Role::PowerFactor);

        values.push(Value::Float(round_to(voltage * current * power_factor, self.precision)));
        values.push(Value::Float(round_to(voltage * current, self.precision)));
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::registers::{CURRENT, FREQUENCY, POWER_ACTIVE, POWER_FACTOR, VOLTAGE};
    use std::collections::HashMap;

    /// In-memory register bank with a scripted number of refused connections.
    #[derive(Default)]
    struct FakeLink {
        connected: bool,
        refuse_connects: u32,
        connect_calls: u32,
        pairs: HashMap<u16, (u16, u16)>,
    }

    impl RegisterLink for FakeLink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn connect(&mut self) -> Result<(), AcquireError> {
            self.connect_calls += 1;
            if self.refuse_connects > 0 {
                self.refuse_connects -= 1;
                return Err(AcquireError::NetworkError("connection refused".into()));
            }
            self.connected = true;
            Ok(())
        }

        async fn read_pair(&mut self, address: u16) -> Result<(u16, u16), AcquireError> {
            self.pairs.get(&address).copied().ok_or(AcquireError::RegisterReadError {
                address,
                reason: "exception IllegalDataAddress".into(),
            })
        }
    }

    fn quick_config() -> ModbusConfig {
        ModbusConfig {
            reconnect_delay: Duration::ZERO,
            ..ModbusConfig::default()
        }
    }

    fn healthy_link() -> FakeLink {
        FakeLink {
            pairs: HashMap::from([
                (POWER_ACTIVE, (0, 327)),
                (VOLTAGE, (0, 230)),
                (CURRENT, (0, 1500)),
                (FREQUENCY, (0, 5000)),
                (POWER_FACTOR, (0, 950)),
            ]),
            ..FakeLink::default()
        }
    }

    #[tokio::test]
    async fn reads_and_scales_basic_map() {
        let mut meter = ModbusMeter::with_link(healthy_link(), quick_config());

        let raw = meter.acquire().await.unwrap();
        assert_eq!(raw, vec![327, 230, 1500, 5000, 950]);

        let values = meter.normalize(raw);
        let cells: Vec<String> = values.iter().map(Value::to_string).collect();
        assert_eq!(
            cells,
            ["327", "230", "1.500", "50.00", "0.950", "327.75", "345.0"]
        );
        assert_eq!(values[2].as_f64(), Some(1.5));
        assert_eq!(values.len(), meter.metric_table().width());
    }

    #[tokio::test]
    async fn failed_register_is_left_at_zero() {
        let mut link = healthy_link();
        link.pairs.remove(&CURRENT);
        let mut meter = ModbusMeter::with_link(link, quick_config());

        let raw = meter.acquire().await.unwrap();
        assert_eq!(raw, vec![327, 230, 0, 5000, 950]);

        let values = meter.normalize(raw);
        assert_eq!(values[2], Value::Fixed(0.0, 3));
        assert_eq!(values[5], Value::Float(0.0));
    }

    #[tokio::test]
    async fn reconnects_before_polling() {
        let link = FakeLink {
            refuse_connects: 2,
            ..healthy_link()
        };
        let mut meter = ModbusMeter::with_link(link, quick_config());

        assert!(meter.acquire().await.is_ok());
        assert_eq!(meter.link().connect_calls, 3);
        assert!(meter.link().is_connected());
    }

    #[tokio::test]
    async fn unreachable_server_fails_the_tick() {
        let link = FakeLink {
            refuse_connects: 10,
            ..healthy_link()
        };
        let mut meter = ModbusMeter::with_link(link, quick_config());

        let err = meter.acquire().await.unwrap_err();
        assert!(matches!(err, AcquireError::NetworkError(_)));
        assert_eq!(meter.link().connect_calls, 3);
    }

    #[test]
    fn metric_table_appends_cross_checks() {
        let meter = ModbusMeter::with_link(FakeLink::default(), quick_config());
        let table = meter.metric_table();
        assert_eq!(table.width(), 7);
        assert_eq!(table.names()[0], "Active Power (W)");
        assert_eq!(table.names()[5], COMPUTED_ACTIVE_POWER);
        assert_eq!(table.names()[6], COMPUTED_APPARENT_POWER);
    }
}
