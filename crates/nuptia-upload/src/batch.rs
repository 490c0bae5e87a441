//! Concurrency-bounded, paced execution of many uploads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use nuptia_core::constants::{
    DEFAULT_BATCH_CONCURRENCY, DEFAULT_WAVE_DELAY_FLOOR_MS, DEFAULT_WAVE_DELAY_PER_FILE_MS,
};
use nuptia_core::{
    BatchState, FileStatus, UploadConfig, UploadError, UploadFile, UploadPhase, UploadResult,
};

use crate::events::UploadEvents;
use crate::pipeline::UploadPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Files uploaded at the same time; also the wave size.
    pub concurrency: usize,
    pub wave_delay_floor: Duration,
    pub wave_delay_per_file: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_BATCH_CONCURRENCY,
            wave_delay_floor: Duration::from_millis(DEFAULT_WAVE_DELAY_FLOOR_MS),
            wave_delay_per_file: Duration::from_millis(DEFAULT_WAVE_DELAY_PER_FILE_MS),
        }
    }
}

impl From<&UploadConfig> for BatchOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            concurrency: config.batch_concurrency,
            wave_delay_floor: config.wave_delay_floor,
            wave_delay_per_file: config.wave_delay_per_file,
        }
    }
}

impl BatchOptions {
    /// Pause after a wave of `wave_size` files: `max(floor, per_file * wave_size)`.
    pub fn wave_delay(&self, wave_size: usize) -> Duration {
        let scaled = self
            .wave_delay_per_file
            .saturating_mul(u32::try_from(wave_size).unwrap_or(u32::MAX));
        scaled.max(self.wave_delay_floor)
    }
}

#[derive(Debug, Clone)]
pub struct BatchSuccess {
    /// The caller's identifier of the submitted file.
    pub file_id: String,
    pub result: UploadResult,
}

/// Per-file outcomes, in submission order within each list.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub successes: Vec<BatchSuccess>,
    pub failures: Vec<UploadError>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct BatchScheduler {
    pipeline: Arc<UploadPipeline>,
    options: BatchOptions,
    state: watch::Sender<BatchState>,
}

impl BatchScheduler {
    pub fn new(pipeline: Arc<UploadPipeline>, options: BatchOptions) -> Self {
        let (state, _) = watch::channel(BatchState::default());
        Self {
            pipeline,
            options: BatchOptions {
                concurrency: options.concurrency.max(1),
                ..options
            },
            state,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Observe `BatchState` snapshots as files change status.
    pub fn subscribe(&self) -> watch::Receiver<BatchState> {
        self.state.subscribe()
    }

    fn publish(&self, statuses: &Mutex<Vec<FileStatus>>) {
        if let Ok(statuses) = statuses.lock() {
            self.state.send_replace(BatchState::from_statuses(&statuses));
        }
    }

    fn set_status(&self, statuses: &Mutex<Vec<FileStatus>>, index: usize, status: FileStatus) {
        if let Ok(mut statuses) = statuses.lock() {
            if let Some(slot) = statuses.get_mut(index) {
                *slot = status;
            }
        }
        self.publish(statuses);
    }

    /// Upload `files` in waves of `concurrency`.
    ///
    /// A failing file never affects its siblings. Cancelling `cancel` aborts the
    /// wave in flight and reports every file that had not started as cancelled.
    #[instrument(skip_all, fields(files = files.len(), concurrency = self.options.concurrency))]
    pub async fn run(
        &self,
        files: Vec<UploadFile>,
        cancel: &CancellationToken,
        events: &UploadEvents,
    ) -> BatchReport {
        let statuses = Mutex::new(vec![FileStatus::Queued; files.len()]);
        self.publish(&statuses);
        for file in &files {
            events.phase(&file.file_id, UploadPhase::Queued);
        }

        let mut report = BatchReport::default();
        let waves: Vec<&[UploadFile]> = files.chunks(self.options.concurrency).collect();
        let mut started = 0;

        for (wave_index, wave) in waves.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let offset = started;
            started += wave.len();
            info!(wave = wave_index + 1, size = wave.len(), "Starting upload wave");

            let uploads = wave.iter().enumerate().map(|(i, file)| {
                let child = cancel.child_token();
                let statuses = &statuses;
                async move {
                    self.set_status(statuses, offset + i, FileStatus::InFlight);
                    let result = self.pipeline.upload(file, &child, events).await;
                    let status = if result.is_ok() {
                        FileStatus::Completed
                    } else {
                        FileStatus::Failed
                    };
                    self.set_status(statuses, offset + i, status);
                    (file.file_id.clone(), result)
                }
            });

            for (file_id, result) in join_all(uploads).await {
                match result {
                    Ok(result) => report.successes.push(BatchSuccess { file_id, result }),
                    Err(e) => report.failures.push(e),
                }
            }

            if wave_index + 1 < waves.len() {
                let delay = self.options.wave_delay(wave.len());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        for (index, file) in files.iter().enumerate().skip(started) {
            self.set_status(&statuses, index, FileStatus::Failed);
            events.phase(&file.file_id, UploadPhase::Cancelled);
            report.failures.push(UploadError::Cancelled {
                file_id: file.file_id.clone(),
            });
        }
        if started < files.len() {
            warn!(skipped = files.len() - started, "Batch cancelled before all files started");
        }

        info!(
            succeeded = report.successes.len(),
            failed = report.failures.len(),
            "Batch finished"
        );
        report
    }
}
