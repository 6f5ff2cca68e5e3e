//! Capture power-meter readings to CSV.
//!
//! A [`logger::Meter`] is polled at a fixed rate by [`logger::run`]; every tick
//! appends exactly one row to an append-only CSV file, with failed ticks
//! written as sentinel rows. [`har`] converts browser network captures into
//! the same kind of flat table.

pub mod devices;
pub mod har;
pub mod logger;
