//! Per-file orchestration: validate, negotiate, transfer, confirm.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use nuptia_core::models::{CancelRequest, SessionStatus};
use nuptia_core::{
    BrokerError, BrokerErrorKind, UploadConfig, UploadError, UploadFile, UploadLimits,
    UploadPhase, UploadResult, UploadSession,
};

use crate::broker::{HttpBroker, StorageBroker};
use crate::confirmation::ConfirmationHandshake;
use crate::events::UploadEvents;
use crate::negotiator::UploadSessionNegotiator;
use crate::retry::{RetryCoordinator, RetryFailure, RetryPolicy};
use crate::transport::{HttpTransport, ObjectTransport};
use crate::uploader::StreamingUploader;

/// Uploads one file end to end.
///
/// Each call holds at most one live session. A session that was refused by the
/// object store or expired before confirmation is abandoned and replaced by a
/// fresh negotiation, up to `max_session_restarts` times.
#[derive(Clone)]
pub struct UploadPipeline {
    broker: Arc<dyn StorageBroker>,
    negotiator: UploadSessionNegotiator,
    uploader: StreamingUploader,
    confirmation: ConfirmationHandshake,
    retry: RetryCoordinator,
    limits: UploadLimits,
    max_session_restarts: u32,
}

impl UploadPipeline {
    pub fn new(
        config: &UploadConfig,
        broker: Arc<dyn StorageBroker>,
        transport: Arc<dyn ObjectTransport>,
    ) -> Self {
        let retry = RetryCoordinator::new(RetryPolicy::from(config));
        Self {
            negotiator: UploadSessionNegotiator::new(broker.clone(), config.session_expiry_secs),
            uploader: StreamingUploader::from_config(transport, retry, config),
            confirmation: ConfirmationHandshake::new(broker.clone()),
            broker,
            retry,
            limits: config.limits.clone(),
            max_session_restarts: config.max_session_restarts,
        }
    }

    /// Pipeline talking HTTP to the configured broker and to the presigned targets.
    pub fn from_config(config: &UploadConfig) -> Result<Self, BrokerError> {
        let broker = Arc::new(HttpBroker::from_config(config)?);
        // Large files legitimately take longer than a broker round-trip, so the
        // transfer itself has no overall timeout.
        let transport = Arc::new(HttpTransport::new(None).map_err(BrokerError::transport)?);
        Ok(Self::new(config, broker, transport))
    }

    #[instrument(skip_all, fields(file_id = %file.file_id, file_name = %file.file_name))]
    pub async fn upload(
        &self,
        file: &UploadFile,
        cancel: &CancellationToken,
        events: &UploadEvents,
    ) -> Result<UploadResult, UploadError> {
        events.phase(&file.file_id, UploadPhase::Validating);
        if let Err(reason) = self.limits.check(file) {
            warn!(reason = %reason, "File rejected before upload");
            events.phase(&file.file_id, UploadPhase::Failed);
            return Err(UploadError::Validation {
                file_id: file.file_id.clone(),
                reason,
            });
        }

        let result = self.run(file, cancel, events).await;

        let phase = match &result {
            Ok(upload) => {
                info!(
                    remote_file_id = %upload.file_id,
                    url = %upload.canonical_url,
                    file_size = upload.file_size,
                    "Upload completed"
                );
                UploadPhase::Completed
            }
            Err(e) if e.is_cancelled() => {
                info!("Upload cancelled");
                UploadPhase::Cancelled
            }
            Err(e) => {
                warn!(error = %e, error_code = e.error_code(), "Upload failed");
                UploadPhase::Failed
            }
        };
        events.phase(&file.file_id, phase);
        result
    }

    async fn run(
        &self,
        file: &UploadFile,
        cancel: &CancellationToken,
        events: &UploadEvents,
    ) -> Result<UploadResult, UploadError> {
        let mut restarts = 0;
        loop {
            let session = self.negotiate(file, cancel, events).await?;

            match self.transfer_and_confirm(&session, file, cancel, events).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    // The session will never be confirmed; let the broker drop it.
                    self.spawn_cancel(&session.session_id);

                    if e.is_cancelled() || restarts >= self.max_session_restarts {
                        return Err(e);
                    }
                    if !needs_fresh_session(&e) {
                        return Err(e);
                    }
                    restarts += 1;
                    info!(
                        session_id = %session.session_id,
                        restart = restarts,
                        error = %e,
                        "Session unusable, negotiating a fresh one"
                    );
                }
            }
        }
    }

    async fn negotiate(
        &self,
        file: &UploadFile,
        cancel: &CancellationToken,
        events: &UploadEvents,
    ) -> Result<UploadSession, UploadError> {
        events.phase(&file.file_id, UploadPhase::Negotiating);
        self.retry
            .execute(
                cancel,
                |state| events.retry(&file.file_id, state),
                |_| self.negotiator.negotiate(file),
            )
            .await
            .map_err(|failure| match failure {
                RetryFailure::Cancelled { .. } => UploadError::Cancelled {
                    file_id: file.file_id.clone(),
                },
                RetryFailure::Exhausted { error, .. } | RetryFailure::Permanent { error, .. } => {
                    UploadError::Negotiation {
                        file_id: file.file_id.clone(),
                        source: error,
                    }
                }
            })
    }

    async fn transfer_and_confirm(
        &self,
        session: &UploadSession,
        file: &UploadFile,
        cancel: &CancellationToken,
        events: &UploadEvents,
    ) -> Result<UploadResult, UploadError> {
        events.phase(&file.file_id, UploadPhase::Transferring);
        let transferred = self.uploader.transfer(session, file, cancel, events).await?;

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled {
                file_id: file.file_id.clone(),
            });
        }
        if session.is_expired() {
            return Err(UploadError::SessionExpired {
                file_id: file.file_id.clone(),
                session_id: session.session_id.clone(),
            });
        }

        events.phase(&file.file_id, UploadPhase::Confirming);
        self.retry
            .execute(
                cancel,
                |state| events.retry(&file.file_id, state),
                |_| self.confirmation.confirm(session, transferred),
            )
            .await
            .map_err(|failure| match failure {
                RetryFailure::Cancelled { .. } => UploadError::Cancelled {
                    file_id: file.file_id.clone(),
                },
                RetryFailure::Exhausted { error, .. } | RetryFailure::Permanent { error, .. } => {
                    UploadError::Confirmation {
                        file_id: file.file_id.clone(),
                        source: error,
                    }
                }
            })
    }

    /// Best-effort, fire-and-forget cancellation of an open session.
    fn spawn_cancel(&self, session_id: &str) {
        let broker = self.broker.clone();
        let request = CancelRequest {
            upload_session_id: session_id.to_string(),
        };
        tokio::spawn(async move {
            if let Err(e) = broker.cancel(&request).await {
                debug!(
                    session_id = %request.upload_session_id,
                    error = %e,
                    "Session cancel request failed"
                );
            }
        });
    }

    pub async fn cancel_session(&self, session_id: &str) -> Result<(), BrokerError> {
        self.broker
            .cancel(&CancelRequest {
                upload_session_id: session_id.to_string(),
            })
            .await
    }

    pub async fn session_status(&self, session_id: &str) -> Result<SessionStatus, BrokerError> {
        self.broker.session_status(session_id).await
    }
}

/// Errors that mean the credential itself is unusable rather than the request.
fn needs_fresh_session(error: &UploadError) -> bool {
    match error {
        UploadError::Transfer { source, .. } => source.is_credential_rejected(),
        UploadError::SessionExpired { .. } => true,
        UploadError::Confirmation { source, .. } => source.kind == BrokerErrorKind::NotFound,
        _ => false,
    }
}
