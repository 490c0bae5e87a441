use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use nuptia_core::models::NegotiationRequest;
use nuptia_core::{BrokerError, UploadFile, UploadSession, WriteTarget};

use crate::broker::StorageBroker;

/// Obtains a time-boxed write credential for one file.
///
/// Holds no per-call state and never retries; the caller decides what to do with
/// a rejection.
#[derive(Clone)]
pub struct UploadSessionNegotiator {
    broker: Arc<dyn StorageBroker>,
    default_expiry_secs: u64,
}

impl UploadSessionNegotiator {
    pub fn new(broker: Arc<dyn StorageBroker>, default_expiry_secs: u64) -> Self {
        Self {
            broker,
            default_expiry_secs,
        }
    }

    #[instrument(skip(self, file), fields(file_id = %file.file_id, file_name = %file.file_name))]
    pub async fn negotiate(&self, file: &UploadFile) -> Result<UploadSession, BrokerError> {
        let request = NegotiationRequest {
            file_name: file.file_name.clone(),
            file_size: file.size(),
            content_type: file.content_type.clone(),
            file_type: file.kind,
            category: file.category,
            expires_in_seconds: file.expires_in.unwrap_or(self.default_expiry_secs),
        };

        let response = self.broker.negotiate(&request).await?;

        if response.presigned_url.trim().is_empty() {
            return Err(BrokerError::invalid_response(
                "broker returned an empty presigned URL",
            ));
        }
        if response.upload_session_id.trim().is_empty() {
            return Err(BrokerError::invalid_response(
                "broker returned an empty upload session id",
            ));
        }
        if response.expires_at <= Utc::now() {
            return Err(BrokerError::invalid_response(format!(
                "broker issued a credential that already expired at {}",
                response.expires_at
            )));
        }

        let mut headers = vec![("Content-Type".to_string(), file.content_type.clone())];
        headers.extend(
            response
                .required_headers
                .into_iter()
                .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type")),
        );

        debug!(
            session_id = %response.upload_session_id,
            object_key = %response.object_key,
            expires_at = %response.expires_at,
            "Upload session negotiated"
        );

        Ok(UploadSession {
            session_id: response.upload_session_id,
            write_target: WriteTarget {
                url: response.presigned_url,
                headers,
            },
            file_key: response.object_key,
            expires_at: response.expires_at,
        })
    }
}
