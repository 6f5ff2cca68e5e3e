pub mod modbus_meter;
pub mod registers;
pub mod statusjsn;

pub use modbus_meter::{ModbusConfig, ModbusMeter};
pub use statusjsn::{StatusJsonConfig, StatusJsonMeter};
