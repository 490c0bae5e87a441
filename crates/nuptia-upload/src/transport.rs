//! Byte transfer to the object store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};

use nuptia_core::{TransportError, TransportErrorKind, WriteTarget};

/// Size of the slices the body is streamed in; progress advances once per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Cumulative bytes handed to the network for the current attempt.
///
/// The transport only ever writes it; the uploader samples it on its own cadence.
#[derive(Clone, Debug, Default)]
pub struct SentBytes(Arc<AtomicU64>);

impl SentBytes {
    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn set(&self, n: u64) {
        self.0.store(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A single full-body write against a presigned target.
///
/// Implementations must stop writing when the returned future is dropped; the
/// uploader aborts a transfer by dropping it.
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    async fn put(
        &self,
        target: &WriteTarget,
        content_type: &str,
        body: Bytes,
        sent: SentBytes,
    ) -> Result<(), TransportError>;
}

pub(crate) fn transport_error_from_reqwest(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(format!("request timed out: {}", error))
    } else if error.is_connect() {
        TransportError::connect(format!("connection failed: {}", error))
    } else if let Some(status) = error.status() {
        TransportError::status(status.as_u16(), error.to_string())
    } else {
        TransportError::new(TransportErrorKind::Other, error.to_string())
    }
}

/// `reqwest`-backed transport issuing a streamed `PUT`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("Failed to create HTTP client: {}", e),
            )
        })?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectTransport for HttpTransport {
    async fn put(
        &self,
        target: &WriteTarget,
        content_type: &str,
        body: Bytes,
        sent: SentBytes,
    ) -> Result<(), TransportError> {
        let total = body.len();
        let chunks: Vec<Bytes> = (0..total)
            .step_by(CHUNK_SIZE)
            .map(|start| body.slice(start..(start + CHUNK_SIZE).min(total)))
            .collect();

        let counter = sent.clone();
        let body_stream = stream::iter(chunks.into_iter().map(move |chunk| {
            counter.add(chunk.len() as u64);
            Ok::<Bytes, std::io::Error>(chunk)
        }));

        let mut request = self
            .client
            .put(&target.url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, total);

        for (name, value) in &target.headers {
            if name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Other,
                    format!("invalid header name {}: {}", name, e),
                )
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Other,
                    format!("invalid header value for {}: {}", name, e),
                )
            })?;
            request = request.header(name, value);
        }

        let response = request
            .body(Body::wrap_stream(body_stream))
            .send()
            .await
            .map_err(transport_error_from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::status(
                status.as_u16(),
                format!("object store responded with status {}: {}", status, error_text),
            ));
        }

        sent.set(total as u64);
        Ok(())
    }
}
