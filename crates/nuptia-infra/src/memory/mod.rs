//! Memory pressure monitoring
//!
//! A probe reports used/total memory, the pure `PressureTier::classify` maps the
//! ratio onto a tier, and the monitor publishes immutable snapshots and asks a
//! `PressureRelief` implementation to trim or flush when the tier escalates.

pub use monitor::{MemoryPressureMonitor, PressureRelief};
pub use probe::{MemoryError, MemoryProbe, MemorySample, SystemMemoryProbe};
pub use tier::{MemorySnapshot, PressureThresholds, PressureTier};

mod monitor;
mod probe;
mod tier;
