//! Input-register layout of the line-in energy sensor.
//!
//! Every metric occupies a pair of consecutive 16-bit input registers, high
//! word first.

use crate::logger::data::Value;

pub const ABSOLUTE_ACTIVE_ENERGY: u16 = 0x400;
pub const POWER_ACTIVE: u16 = 0x402;
pub const VOLTAGE: u16 = 0x404;
pub const CURRENT: u16 = 0x406;
pub const FREQUENCY: u16 = 0x408;
pub const POWER_FACTOR: u16 = 0x40A;
pub const POWER_ANGLE: u16 = 0x40C;
pub const POWER_APPARENT: u16 = 0x40E;
pub const POWER_REACTIVE: u16 = 0x410;
pub const ABSOLUTE_ACTIVE_ENERGY_RESETTABLE: u16 = 0x412;
pub const ABSOLUTE_REACTIVE_ENERGY: u16 = 0x414;
pub const ABSOLUTE_REACTIVE_ENERGY_RESETTABLE: u16 = 0x416;
pub const RESET_TIME: u16 = 0x418;
pub const FORWARD_ACTIVE_ENERGY: u16 = 0x41A;
pub const FORWARD_REACTIVE_ENERGY: u16 = 0x41C;
pub const FORWARD_ACTIVE_ENERGY_RESETTABLE: u16 = 0x41E;
pub const FORWARD_REACTIVE_ENERGY_RESETTABLE: u16 = 0x420;
pub const REVERSE_ACTIVE_ENERGY: u16 = 0x422;
pub const REVERSE_REACTIVE_ENERGY: u16 = 0x424;
pub const REVERSE_ACTIVE_ENERGY_RESETTABLE: u16 = 0x426;
pub const REVERSE_REACTIVE_ENERGY_RESETTABLE: u16 = 0x428;
pub const RESIDUAL_CURRENT_TYPE_A: u16 = 0x42A;
pub const NEUTRAL_CURRENT: u16 = 0x42C;

/// Rebuild a 32-bit value from a register pair.
pub fn combine_pair(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// How a raw 32-bit register value becomes a metric value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Raw,
    Divide { divisor: u32, decimals: usize },
}

impl Scale {
    pub fn apply(self, raw: u32) -> Value {
        match self {
            Scale::Raw => Value::Integer(i64::from(raw)),
            Scale::Divide { divisor, decimals } => {
                Value::Fixed(f64::from(raw) / f64::from(divisor), decimals)
            }
        }
    }
}

/// Which cross-check input a register feeds, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Voltage,
    Current,
    PowerFactor,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    pub address: u16,
    pub scale: Scale,
    pub role: Role,
}

impl Register {
    pub const fn new(name: &'static str, address: u16, scale: Scale, role: Role) -> Self {
        Self {
            name,
            address,
            scale,
            role,
        }
    }
}

const MILLI: Scale = Scale::Divide {
    divisor: 1000,
    decimals: 3,
};
const CENTI: Scale = Scale::Divide {
    divisor: 100,
    decimals: 2,
};

/// Read-only set of registers polled each tick, in CSV column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    registers: Vec<Register>,
}

impl RegisterMap {
    pub fn new(registers: Vec<Register>) -> Self {
        Self { registers }
    }

    /// Power, voltage, current, frequency and power factor.
    pub fn basic() -> Self {
        Self::new(vec![
            Register::new("Active Power (W)", POWER_ACTIVE, Scale::Raw, Role::Other),
            Register::new("Voltage (V)", VOLTAGE, Scale::Raw, Role::Voltage),
            Register::new("Current (A)", CURRENT, MILLI, Role::Current),
            Register::new("Frequency (Hz)", FREQUENCY, CENTI, Role::Other),
            Register::new("Power Factor (PF)", POWER_FACTOR, MILLI, Role::PowerFactor),
        ])
    }

    /// Every documented line-in register.
    pub fn extended() -> Self {
        use Role::Other;
        use Scale::Raw;
        Self::new(vec![
            Register::new("Absolute Active Energy (Wh)", ABSOLUTE_ACTIVE_ENERGY, Raw, Other),
            Register::new("Power Active (W)", POWER_ACTIVE, Raw, Other),
            Register::new("Voltage (V)", VOLTAGE, Raw, Role::Voltage),
            Register::new("Current (A)", CURRENT, MILLI, Role::Current),
            Register::new("Frequency (Hz)", FREQUENCY, CENTI, Other),
            Register::new("Power Factor (PF)", POWER_FACTOR, MILLI, Role::PowerFactor),
            Register::new("Power Angle (deg)", POWER_ANGLE, Raw, Other),
            Register::new("Power Apparent (VA)", POWER_APPARENT, Raw, Other),
            Register::new("Power Reactive (VAR)", POWER_REACTIVE, Raw, Other),
            Register::new(
                "Absolute Active Energy Resettable (Wh)",
                ABSOLUTE_ACTIVE_ENERGY_RESETTABLE,
                Raw,
                Other,
            ),
            Register::new("Absolute Reactive Energy (VARh)", ABSOLUTE_REACTIVE_ENERGY, Raw, Other),
            Register::new(
                "Absolute Reactive Energy Resettable (VARh)",
                ABSOLUTE_REACTIVE_ENERGY_RESETTABLE,
                Raw,
                Other,
            ),
            Register::new("Reset Time (sec)", RESET_TIME, Raw, Other),
            Register::new("Forward Active Energy (Wh)", FORWARD_ACTIVE_ENERGY, Raw, Other),
            Register::new("Forward Reactive Energy (VARh)", FORWARD_REACTIVE_ENERGY, Raw, Other),
            Register::new(
                "Forward Active Energy Resettable (Wh)",
                FORWARD_ACTIVE_ENERGY_RESETTABLE,
                Raw,
                Other,
            ),
            Register::new(
                "Forward Reactive Energy Resettable (VARh)",
                FORWARD_REACTIVE_ENERGY_RESETTABLE,
                Raw,
                Other,
            ),
            Register::new("Reverse Active Energy (Wh)", REVERSE_ACTIVE_ENERGY, Raw, Other),
            Register::new("Reverse Reactive Energy (VARh)", REVERSE_REACTIVE_ENERGY, Raw, Other),
            Register::new(
                "Reverse Active Energy Resettable (Wh)",
                REVERSE_ACTIVE_ENERGY_RESETTABLE,
                Raw,
                Other,
            ),
            Register::new(
                "Reverse Reactive Energy Resettable (VARh)",
                REVERSE_REACTIVE_ENERGY_RESETTABLE,
                Raw,
                Other,
            ),
            Register::new("Residual Current Type A (A)", RESIDUAL_CURRENT_TYPE_A, MILLI, Other),
            Register::new("Neutral Current (A)", NEUTRAL_CURRENT, MILLI, Other),
        ])
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::basic()
    }
}
