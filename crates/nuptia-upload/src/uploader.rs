use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use nuptia_core::constants::{DEFAULT_PROGRESS_INTERVAL_MS, DEFAULT_PROGRESS_WINDOW};
use nuptia_core::{UploadConfig, UploadError, UploadFile, UploadPhase, UploadSession};

use crate::events::UploadEvents;
use crate::progress::ProgressWindow;
use crate::retry::{RetryCoordinator, RetryFailure};
use crate::transport::{ObjectTransport, SentBytes};

/// Writes a file's bytes to a negotiated session's target.
#[derive(Clone)]
pub struct StreamingUploader {
    transport: Arc<dyn ObjectTransport>,
    retry: RetryCoordinator,
    progress_interval: Duration,
    progress_window: usize,
}

impl StreamingUploader {
    pub fn new(transport: Arc<dyn ObjectTransport>, retry: RetryCoordinator) -> Self {
        Self {
            transport,
            retry,
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
            progress_window: DEFAULT_PROGRESS_WINDOW,
        }
    }

    pub fn from_config(
        transport: Arc<dyn ObjectTransport>,
        retry: RetryCoordinator,
        config: &UploadConfig,
    ) -> Self {
        Self {
            transport,
            retry,
            progress_interval: config.progress_interval,
            progress_window: config.progress_window,
        }
    }

    /// Transfer the whole body, retrying per the coordinator's policy.
    ///
    /// Progress is sampled every `progress_interval` and once on completion.
    /// Returns the number of bytes written.
    #[instrument(skip_all, fields(file_id = %file.file_id, session_id = %session.session_id))]
    pub async fn transfer(
        &self,
        session: &UploadSession,
        file: &UploadFile,
        cancel: &CancellationToken,
        events: &UploadEvents,
    ) -> Result<u64, UploadError> {
        let total = file.size();
        let window = Mutex::new(ProgressWindow::new(total, self.progress_window));
        let window = &window;

        let emit = |bytes: u64| {
            let progress = match window.lock() {
                Ok(mut window) => window.record(Instant::now(), bytes, UploadPhase::Transferring),
                Err(_) => return,
            };
            events.progress(&file.file_id, progress);
        };

        let outcome = self
            .retry
            .execute(
                cancel,
                |state| events.retry(&file.file_id, state),
                |attempt| async move {
                    if attempt > 1 {
                        if let Ok(mut window) = window.lock() {
                            window.restart();
                        }
                    }

                    let sent = SentBytes::default();
                    let put = self.transport.put(
                        &session.write_target,
                        &file.content_type,
                        file.data.clone(),
                        sent.clone(),
                    );
                    tokio::pin!(put);

                    let mut ticker = interval(self.progress_interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    ticker.tick().await;

                    loop {
                        tokio::select! {
                            result = &mut put => {
                                if result.is_ok() {
                                    emit(total);
                                }
                                return result;
                            }
                            _ = ticker.tick() => emit(sent.get()),
                        }
                    }
                },
            )
            .await;

        match outcome {
            Ok(()) => {
                debug!(bytes = total, "Transfer complete");
                Ok(total)
            }
            Err(RetryFailure::Cancelled { .. }) => Err(UploadError::Cancelled {
                file_id: file.file_id.clone(),
            }),
            Err(RetryFailure::Exhausted { error, attempts })
            | Err(RetryFailure::Permanent { error, attempts }) => Err(UploadError::Transfer {
                file_id: file.file_id.clone(),
                attempts,
                source: error,
            }),
        }
    }
}
