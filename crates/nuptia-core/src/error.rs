//! Error types module
//!
//! Errors are split by the collaborator that produced them: `TransportError` for the
//! byte transfer to the object store, `BrokerError` for the broker's JSON endpoints,
//! and `UploadError` for the terminal, per-file outcome the caller sees.
//!
//! Retry decisions are driven by `Classify`, which inspects structured status codes
//! first and only falls back to message matching when no status is available.

use std::fmt;

/// How a failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying with the ordinary (linear) backoff.
    Transient,
    /// The remote side asked us to slow down; escalate to exponential backoff.
    RateLimited,
    /// Retrying cannot help.
    Permanent,
}

/// Errors that can be classified for retry purposes.
pub trait Classify {
    fn failure_class(&self) -> FailureClass;
}

/// Message patterns that signal rate limiting when the transport exposes no status.
const RATE_LIMIT_PATTERNS: &[&str] = &["429", "too many requests", "rate limit", "throttl"];

fn message_signals_rate_limit(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    RATE_LIMIT_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

fn class_from_status(status: u16) -> FailureClass {
    match status {
        429 => FailureClass::RateLimited,
        408 | 500..=599 => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection could not be established or was reset.
    Connect,
    Timeout,
    /// The object store answered with a non-2xx status.
    Status,
    RateLimited,
    /// The transfer was aborted by cancellation.
    Aborted,
    Other,
}

/// Failure of the raw byte transfer to the write target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        let kind = if status == 429 {
            TransportErrorKind::RateLimited
        } else {
            TransportErrorKind::Status
        };
        Self {
            kind,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn aborted() -> Self {
        Self::new(TransportErrorKind::Aborted, "transfer aborted")
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == TransportErrorKind::Aborted
    }

    /// The object store refused the credential (expired or revoked presigned URL).
    pub fn is_credential_rejected(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

impl Classify for TransportError {
    fn failure_class(&self) -> FailureClass {
        match self.kind {
            TransportErrorKind::RateLimited => FailureClass::RateLimited,
            TransportErrorKind::Connect | TransportErrorKind::Timeout => FailureClass::Transient,
            TransportErrorKind::Aborted => FailureClass::Permanent,
            TransportErrorKind::Status => match self.status {
                Some(status) => class_from_status(status),
                None => FailureClass::Transient,
            },
            TransportErrorKind::Other => {
                if let Some(status) = self.status {
                    class_from_status(status)
                } else if message_signals_rate_limit(&self.message) {
                    FailureClass::RateLimited
                } else {
                    FailureClass::Transient
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// The broker refused the request (quota, invalid category, bad input).
    Rejected,
    /// The session is unknown to the broker, usually because it expired.
    NotFound,
    RateLimited,
    /// 5xx from the broker.
    Unavailable,
    /// The broker answered with something we could not interpret.
    InvalidResponse,
    /// The request never got an HTTP answer.
    Transport,
}

/// Failure of a negotiation, confirmation, cancellation or status call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Set when `kind` is `Transport`.
    pub transport: Option<TransportError>,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            transport: None,
        }
    }

    /// Map an HTTP status answered by the broker.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => BrokerErrorKind::RateLimited,
            404 | 410 => BrokerErrorKind::NotFound,
            500..=599 => BrokerErrorKind::Unavailable,
            _ => BrokerErrorKind::Rejected,
        };
        Self {
            kind,
            status: Some(status),
            message: message.into(),
            transport: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::NotFound, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::InvalidResponse, message)
    }

    pub fn transport(error: TransportError) -> Self {
        Self {
            kind: BrokerErrorKind::Transport,
            status: error.status,
            message: error.message.clone(),
            transport: Some(error),
        }
    }
}

impl Classify for BrokerError {
    fn failure_class(&self) -> FailureClass {
        match self.kind {
            BrokerErrorKind::RateLimited => FailureClass::RateLimited,
            BrokerErrorKind::Unavailable => FailureClass::Transient,
            BrokerErrorKind::Transport => match &self.transport {
                Some(inner) => inner.failure_class(),
                None => FailureClass::Transient,
            },
            BrokerErrorKind::Rejected => {
                // Some brokers report throttling in the body of a generic 4xx.
                if self.status.is_none() && message_signals_rate_limit(&self.message) {
                    FailureClass::RateLimited
                } else {
                    FailureClass::Permanent
                }
            }
            BrokerErrorKind::NotFound | BrokerErrorKind::InvalidResponse => {
                FailureClass::Permanent
            }
        }
    }
}

/// Terminal outcome of one file's upload. Every variant names the caller's file id.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    #[error("{file_id}: validation failed: {reason}")]
    Validation { file_id: String, reason: String },

    #[error("{file_id}: negotiation failed: {source}")]
    Negotiation {
        file_id: String,
        #[source]
        source: BrokerError,
    },

    #[error("{file_id}: transfer failed after {attempts} attempt(s): {source}")]
    Transfer {
        file_id: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("{file_id}: confirmation failed: {source}")]
    Confirmation {
        file_id: String,
        #[source]
        source: BrokerError,
    },

    #[error("{file_id}: upload session {session_id} expired before confirmation")]
    SessionExpired { file_id: String, session_id: String },

    #[error("{file_id}: upload cancelled")]
    Cancelled { file_id: String },
}

impl UploadError {
    pub fn file_id(&self) -> &str {
        match self {
            UploadError::Validation { file_id, .. }
            | UploadError::Negotiation { file_id, .. }
            | UploadError::Transfer { file_id, .. }
            | UploadError::Confirmation { file_id, .. }
            | UploadError::SessionExpired { file_id, .. }
            | UploadError::Cancelled { file_id } => file_id,
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            UploadError::Validation { .. } => "VALIDATION_FAILED",
            UploadError::Negotiation { .. } => "NEGOTIATION_FAILED",
            UploadError::Transfer { .. } => "TRANSFER_FAILED",
            UploadError::Confirmation { .. } => "CONFIRMATION_FAILED",
            UploadError::SessionExpired { .. } => "SESSION_EXPIRED",
            UploadError::Cancelled { .. } => "CANCELLED",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled { .. })
    }

    /// Whether submitting the same file again later may succeed.
    pub fn is_retryable_upstream(&self) -> bool {
        match self {
            UploadError::Validation { .. } | UploadError::Cancelled { .. } => false,
            UploadError::Negotiation { source, .. } | UploadError::Confirmation { source, .. } => {
                source.failure_class() != FailureClass::Permanent
            }
            UploadError::Transfer { .. } | UploadError::SessionExpired { .. } => true,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureClass::Transient => "transient",
            FailureClass::RateLimited => "rate_limited",
            FailureClass::Permanent => "permanent",
        };
        f.write_str(label)
    }
}
