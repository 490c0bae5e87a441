use std::sync::{Arc, Mutex};

use sysinfo::System;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory statistics are not available on this host")]
    Unavailable,

    #[error("failed to read memory statistics: {0}")]
    Probe(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Source of memory usage readings.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> Result<MemorySample, MemoryError>;
}

/// Host memory usage via `sysinfo`.
#[derive(Clone)]
pub struct SystemMemoryProbe {
    system: Arc<Mutex<System>>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();

        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&self) -> Result<MemorySample, MemoryError> {
        let mut system = self.system.lock().map_err(|e| {
            tracing::error!(error = %e, "Failed to acquire system lock for memory check");
            MemoryError::Probe("mutex poisoned".to_string())
        })?;
        system.refresh_memory();

        let total_bytes = system.total_memory();
        if total_bytes == 0 {
            return Err(MemoryError::Unavailable);
        }

        Ok(MemorySample {
            used_bytes: system.used_memory(),
            total_bytes,
        })
    }
}
