//! Client for the External Storage Broker's direct-upload endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use nuptia_core::constants::{CANCEL_PATH, CONFIRM_PATH, NEGOTIATE_PATH, SESSION_STATUS_PATH};
use nuptia_core::models::{
    BrokerEnvelope, CancelRequest, ConfirmRequest, ConfirmResponse, NegotiationRequest,
    NegotiationResponse, SessionStatus,
};
use nuptia_core::{BrokerError, BrokerErrorKind, UploadConfig};

use crate::transport::transport_error_from_reqwest;

/// The broker's wire contract. Every call is JSON in, JSON out.
#[async_trait]
pub trait StorageBroker: Send + Sync {
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
    ) -> Result<NegotiationResponse, BrokerError>;

    async fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResponse, BrokerError>;

    async fn cancel(&self, request: &CancelRequest) -> Result<(), BrokerError>;

    async fn session_status(&self, session_id: &str) -> Result<SessionStatus, BrokerError>;
}

/// HTTP broker client. Forwards an optional static bearer token.
#[derive(Clone, Debug)]
pub struct HttpBroker {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBroker {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            BrokerError::new(
                BrokerErrorKind::Transport,
                format!("Failed to create HTTP client: {}", e),
            )
        })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self, BrokerError> {
        Self::new(
            config.broker_url.clone(),
            config.api_token.clone(),
            config.request_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BrokerError> {
        let request = self.apply_auth(self.client.post(self.build_url(path)).json(body));
        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::transport(transport_error_from_reqwest(e)))?;
        read_payload(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BrokerError> {
        let request = self.apply_auth(self.client.get(self.build_url(path)));
        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::transport(transport_error_from_reqwest(e)))?;
        read_payload(response).await
    }
}

/// Pull a human-readable message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

async fn read_payload<T: DeserializeOwned>(response: Response) -> Result<T, BrokerError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BrokerError::transport(transport_error_from_reqwest(e)))?;

    if !status.is_success() {
        return Err(BrokerError::from_status(
            status.as_u16(),
            format!(
                "broker request failed with status {}: {}",
                status,
                error_message(&body)
            ),
        ));
    }

    let envelope: BrokerEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
        BrokerError::invalid_response(format!("Failed to parse broker response: {}", e))
    })?;

    envelope
        .into_payload()
        .map_err(|message| BrokerError::new(BrokerErrorKind::Rejected, message))
}

#[async_trait]
impl StorageBroker for HttpBroker {
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
    ) -> Result<NegotiationResponse, BrokerError> {
        self.post_json(NEGOTIATE_PATH, request).await
    }

    async fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResponse, BrokerError> {
        self.post_json(CONFIRM_PATH, request).await
    }

    async fn cancel(&self, request: &CancelRequest) -> Result<(), BrokerError> {
        let request = self.apply_auth(self.client.post(self.build_url(CANCEL_PATH)).json(request));
        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::transport(transport_error_from_reqwest(e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::from_status(
                status.as_u16(),
                format!("cancel failed with status {}: {}", status, error_message(&body)),
            ));
        }
        Ok(())
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionStatus, BrokerError> {
        self.get_json(&format!("{}/{}", SESSION_STATUS_PATH, session_id))
            .await
    }
}
