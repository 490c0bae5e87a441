use chrono::{DateTime, Utc};
use nuptia_core::constants::{DEFAULT_CRITICAL_MEMORY_RATIO, DEFAULT_ELEVATED_MEMORY_RATIO};
use nuptia_core::FrameConfig;

use super::probe::MemorySample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressureTier {
    Normal,
    /// Above the elevated ratio: release transient buffers.
    Elevated,
    /// Above the critical ratio: flush everything that can be flushed.
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureThresholds {
    pub elevated: f64,
    pub critical: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            elevated: DEFAULT_ELEVATED_MEMORY_RATIO,
            critical: DEFAULT_CRITICAL_MEMORY_RATIO,
        }
    }
}

impl From<&FrameConfig> for PressureThresholds {
    fn from(config: &FrameConfig) -> Self {
        Self {
            elevated: config.elevated_memory_ratio,
            critical: config.critical_memory_ratio,
        }
    }
}

impl PressureTier {
    /// Both thresholds are exclusive: a ratio of exactly 0.70 is still `Normal`.
    pub fn classify(ratio: f64, thresholds: &PressureThresholds) -> Self {
        if ratio > thresholds.critical {
            PressureTier::Critical
        } else if ratio > thresholds.elevated {
            PressureTier::Elevated
        } else {
            PressureTier::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PressureTier::Normal => "normal",
            PressureTier::Elevated => "elevated",
            PressureTier::Critical => "critical",
        }
    }
}

/// Point-in-time reading. Produced fresh on every check, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub usage_ratio: f64,
    pub tier: PressureTier,
    pub taken_at: DateTime<Utc>,
}

impl MemorySnapshot {
    pub fn from_sample(sample: MemorySample, thresholds: &PressureThresholds) -> Self {
        let usage_ratio = if sample.total_bytes == 0 {
            0.0
        } else {
            sample.used_bytes as f64 / sample.total_bytes as f64
        };
        Self {
            used_bytes: sample.used_bytes,
            total_bytes: sample.total_bytes,
            usage_ratio,
            tier: PressureTier::classify(usage_ratio, thresholds),
            taken_at: Utc::now(),
        }
    }
}
