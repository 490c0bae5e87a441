//! Wire types of the External Storage Broker's direct-upload endpoints.
//!
//! All broker calls are JSON with camelCase keys. The broker may answer either with
//! the bare payload or wrapped in a `{ success, message, data }` envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::upload::{FileKind, UploadCategory};

/// Request a write credential for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationRequest {
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub file_type: FileKind,
    pub category: UploadCategory,
    pub expires_in_seconds: u64,
}

/// Broker answer to a negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationResponse {
    pub presigned_url: String,
    pub upload_session_id: String,
    pub object_key: String,
    pub expires_at: DateTime<Utc>,
    /// Extra headers the object store expects on the PUT, if any.
    #[serde(default)]
    pub required_headers: Vec<(String, String)>,
}

/// Finalize a session once the bytes have landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub upload_session_id: String,
    pub actual_file_size: u64,
}

/// Durable file record returned by the broker after confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub file_id: String,
    pub filename: String,
    pub original_name: String,
    pub file_size: u64,
    pub url: String,
    pub file_type: FileKind,
    pub uploaded_at: DateTime<Utc>,
    pub category: String,
}

/// Best-effort cancellation of an open session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub upload_session_id: String,
}

/// Server-side state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

/// Answer of the session-status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub upload_session_id: String,
    pub status: SessionState,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: FileKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Either a `{ success, message, data }` envelope or the bare payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BrokerEnvelope<T> {
    Wrapped {
        success: bool,
        #[serde(default)]
        message: Option<String>,
        data: Option<T>,
    },
    Bare(T),
}

impl<T> BrokerEnvelope<T> {
    /// Unwrap the payload, or return the broker's message when it reported failure.
    pub fn into_payload(self) -> Result<T, String> {
        match self {
            BrokerEnvelope::Bare(payload) => Ok(payload),
            BrokerEnvelope::Wrapped {
                success: true,
                data: Some(payload),
                ..
            } => Ok(payload),
            BrokerEnvelope::Wrapped {
                success: true,
                data: None,
                ..
            } => Err("broker reported success without a payload".to_string()),
            BrokerEnvelope::Wrapped { message, .. } => {
                Err(message.unwrap_or_else(|| "broker reported failure".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_request_uses_broker_field_names() {
        let request = NegotiationRequest {
            file_name: "avatar.png".into(),
            file_size: 10,
            content_type: "image/png".into(),
            file_type: FileKind::Image,
            category: UploadCategory::Avatar,
            expires_in_seconds: 3600,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["fileName"], "avatar.png");
        assert_eq!(json["fileType"], "image");
        assert_eq!(json["category"], "avatar");
        assert_eq!(json["expiresInSeconds"], 3600);
    }

    #[test]
    fn envelope_accepts_wrapped_and_bare_payloads() {
        let wrapped = r#"{"success":true,"data":{"uploadSessionId":"s1","actualFileSize":4}}"#;
        let bare = r#"{"uploadSessionId":"s1","actualFileSize":4}"#;

        let a: BrokerEnvelope<ConfirmRequest> = serde_json::from_str(wrapped).unwrap();
        let b: BrokerEnvelope<ConfirmRequest> = serde_json::from_str(bare).unwrap();
        assert_eq!(a.into_payload().unwrap(), b.into_payload().unwrap());
    }

    #[test]
    fn envelope_failure_surfaces_message() {
        let failed = r#"{"success":false,"message":"quota exceeded"}"#;
        let envelope: BrokerEnvelope<ConfirmRequest> = serde_json::from_str(failed).unwrap();
        assert_eq!(envelope.into_payload().unwrap_err(), "quota exceeded");
    }

    #[test]
    fn envelope_of_a_payload_without_default_may_omit_data() {
        let empty = r#"{"success":true}"#;
        let envelope: BrokerEnvelope<NegotiationResponse> = serde_json::from_str(empty).unwrap();
        assert!(envelope.into_payload().is_err());
    }

    #[test]
    fn negotiation_response_headers_default_to_empty() {
        let body = r#"{
            "presignedUrl": "https://bucket.example/k?sig=1",
            "uploadSessionId": "s1",
            "objectKey": "image/avatar/k.png",
            "expiresAt": "2030-01-01T00:00:00Z"
        }"#;
        let response: NegotiationResponse = serde_json::from_str(body).unwrap();
        assert!(response.required_headers.is_empty());
        assert_eq!(response.object_key, "image/avatar/k.png");
    }
}
