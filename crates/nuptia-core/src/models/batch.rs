use serde::Serialize;

/// Where one file of a batch currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Queued,
    InFlight,
    Completed,
    Failed,
}

/// Aggregate snapshot of a batch. Derived from per-file statuses, never mutated in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchState {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_flight: usize,
}

impl BatchState {
    pub fn from_statuses(statuses: &[FileStatus]) -> Self {
        statuses.iter().fold(
            BatchState {
                total: statuses.len(),
                ..Default::default()
            },
            |mut state, status| {
                match status {
                    FileStatus::Queued => {}
                    FileStatus::InFlight => state.in_flight += 1,
                    FileStatus::Completed => state.completed += 1,
                    FileStatus::Failed => state.failed += 1,
                }
                state
            },
        )
    }

    pub fn queued(&self) -> usize {
        self.total - self.completed - self.failed - self.in_flight
    }

    pub fn is_finished(&self) -> bool {
        self.completed + self.failed == self.total
    }

    /// Share of files that reached a terminal state, 0.0 - 100.0.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed + self.failed) as f64 / self.total as f64 * 100.0
    }
}
