use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::probe::{MemoryError, MemoryProbe};
use super::tier::{MemorySnapshot, PressureThresholds, PressureTier};

/// Something that can give memory back when asked.
pub trait PressureRelief: Send + Sync {
    /// Proactive cleanup of transient buffers. Returns the number of resources released.
    fn trim(&self) -> usize;

    /// Aggressive release of everything that is not currently checked out.
    fn flush(&self) -> usize;
}

pub struct MemoryPressureMonitor {
    probe: Arc<dyn MemoryProbe>,
    thresholds: PressureThresholds,
    latest: watch::Sender<Option<MemorySnapshot>>,
}

impl MemoryPressureMonitor {
    pub fn new(probe: Arc<dyn MemoryProbe>, thresholds: PressureThresholds) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            probe,
            thresholds,
            latest,
        }
    }

    pub fn thresholds(&self) -> PressureThresholds {
        self.thresholds
    }

    /// Observe published snapshots. `None` until the first successful check.
    pub fn subscribe(&self) -> watch::Receiver<Option<MemorySnapshot>> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> Option<MemorySnapshot> {
        self.latest.borrow().clone()
    }

    /// Sample once, publish the snapshot and relieve pressure if needed.
    ///
    /// Trimming only happens when the tier rises to `Elevated`, so a reading that
    /// hovers just above the threshold does not clean on every check. `Critical`
    /// flushes on every check.
    pub fn check(&self, relief: &dyn PressureRelief) -> Result<MemorySnapshot, MemoryError> {
        let sample = self.probe.sample()?;
        let snapshot = MemorySnapshot::from_sample(sample, &self.thresholds);
        let previous = self
            .latest
            .borrow()
            .as_ref()
            .map(|s| s.tier)
            .unwrap_or(PressureTier::Normal);

        match snapshot.tier {
            PressureTier::Critical => {
                let released = relief.flush();
                warn!(
                    usage_ratio = snapshot.usage_ratio,
                    released,
                    "Critical memory pressure, flushed pool"
                );
            }
            PressureTier::Elevated if previous < PressureTier::Elevated => {
                let released = relief.trim();
                info!(
                    usage_ratio = snapshot.usage_ratio,
                    released,
                    "Elevated memory pressure, trimmed pool"
                );
            }
            tier => {
                debug!(
                    usage_ratio = snapshot.usage_ratio,
                    tier = tier.as_str(),
                    "Memory check"
                );
            }
        }

        self.latest.send_replace(Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// Run `check` on a fixed interval until `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        relief: Arc<dyn PressureRelief>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Memory pressure monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.check(relief.as_ref()) {
                            match e {
                                MemoryError::Unavailable => {
                                    debug!("Memory statistics unavailable, stopping monitor");
                                    break;
                                }
                                other => warn!(error = %other, "Memory check failed"),
                            }
                        }
                    }
                }
            }
        })
    }
}
