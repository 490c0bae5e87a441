//! Nuptia Infrastructure Library
//!
//! Shared infrastructure used by the upload pipeline, the frame sampler and the CLI:
//! - Telemetry initialization
//! - Memory pressure monitoring

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

#[cfg(feature = "memory")]
pub use memory::{
    MemoryError, MemoryPressureMonitor, MemoryProbe, MemorySample, MemorySnapshot,
    PressureRelief, PressureThresholds, PressureTier, SystemMemoryProbe,
};
