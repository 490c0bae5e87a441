use std::sync::Arc;

use tracing::{instrument, warn};

use nuptia_core::models::ConfirmRequest;
use nuptia_core::{BrokerError, UploadResult, UploadSession};

use crate::broker::StorageBroker;

/// Turns a transferred session into a durable file record.
#[derive(Clone)]
pub struct ConfirmationHandshake {
    broker: Arc<dyn StorageBroker>,
}

impl ConfirmationHandshake {
    pub fn new(broker: Arc<dyn StorageBroker>) -> Self {
        Self { broker }
    }

    /// Confirm `session` with the number of bytes actually written.
    ///
    /// The result always carries `actual_size`; a broker recording a different
    /// size is logged, not trusted.
    ///
    /// An expired session is refused locally with a `NotFound` error: the broker
    /// would not find it either, and the only way forward is a fresh negotiation.
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub async fn confirm(
        &self,
        session: &UploadSession,
        actual_size: u64,
    ) -> Result<UploadResult, BrokerError> {
        if session.is_expired() {
            return Err(BrokerError::not_found(format!(
                "upload session {} expired at {}",
                session.session_id, session.expires_at
            )));
        }

        let response = self
            .broker
            .confirm(&ConfirmRequest {
                upload_session_id: session.session_id.clone(),
                actual_file_size: actual_size,
            })
            .await?;

        if response.url.trim().is_empty() {
            return Err(BrokerError::invalid_response(
                "broker confirmed the upload without a file URL",
            ));
        }

        if response.file_size != actual_size {
            warn!(
                recorded = response.file_size,
                transferred = actual_size,
                "Broker recorded a different file size than was transferred"
            );
        }

        Ok(UploadResult {
            file_id: response.file_id,
            canonical_url: response.url,
            file_size: actual_size,
            file_type: response.file_type,
            uploaded_at: response.uploaded_at,
            filename: response.filename,
            original_name: response.original_name,
            category: response.category,
        })
    }
}
