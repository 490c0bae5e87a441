use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of media being uploaded. Serialized as the broker's `fileType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
}

impl FileKind {
    /// Infer the kind from a MIME type. Anything that is not `video/*` is treated as an image.
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.trim().to_ascii_lowercase().starts_with("video/") {
            FileKind::Video
        } else {
            FileKind::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Image => "image",
            FileKind::Video => "video",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical category the broker files an upload under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadCategory {
    Avatar,
    Work,
    Event,
    Profile,
    Cover,
    Favicon,
    Logo,
    #[default]
    Other,
}

impl UploadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadCategory::Avatar => "avatar",
            UploadCategory::Work => "work",
            UploadCategory::Event => "event",
            UploadCategory::Profile => "profile",
            UploadCategory::Cover => "cover",
            UploadCategory::Favicon => "favicon",
            UploadCategory::Logo => "logo",
            UploadCategory::Other => "other",
        }
    }
}

impl fmt::Display for UploadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UploadCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avatar" => Ok(UploadCategory::Avatar),
            "work" => Ok(UploadCategory::Work),
            "event" => Ok(UploadCategory::Event),
            "profile" => Ok(UploadCategory::Profile),
            "cover" => Ok(UploadCategory::Cover),
            "favicon" => Ok(UploadCategory::Favicon),
            "logo" => Ok(UploadCategory::Logo),
            "other" => Ok(UploadCategory::Other),
            other => Err(format!("unknown upload category: {}", other)),
        }
    }
}

/// A file submitted by the caller for upload.
///
/// `file_id` is the caller's identifier; every event and terminal error for
/// this file carries it so per-file status can be presented.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    pub kind: FileKind,
    pub category: UploadCategory,
    pub data: Bytes,
    /// Custom credential lifetime in seconds; the configured default applies when `None`.
    pub expires_in: Option<u64>,
}

impl UploadFile {
    /// Build a file with a generated id, inferring the kind from the content type.
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let content_type = content_type.into();
        Self {
            file_id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            kind: FileKind::from_content_type(&content_type),
            content_type,
            category: UploadCategory::default(),
            data: data.into(),
            expires_in: None,
        }
    }

    pub fn with_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = file_id.into();
        self
    }

    pub fn with_category(mut self, category: UploadCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_expiry(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Where and how the transfer must write the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub url: String,
    /// Headers the object store requires on the PUT (always includes `Content-Type`).
    pub headers: Vec<(String, String)>,
}

/// A negotiated, time-boxed write credential. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: String,
    pub write_target: WriteTarget,
    pub file_key: String,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Lifecycle phase of a single file upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Queued,
    Validating,
    Negotiating,
    Transferring,
    Confirming,
    Completed,
    Failed,
    Cancelled,
}

impl UploadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadPhase::Completed | UploadPhase::Failed | UploadPhase::Cancelled
        )
    }
}

/// Throttled progress snapshot for one transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
    /// 0.0 - 100.0
    pub percentage: f64,
    /// Bytes per second over the recent sample window.
    pub instantaneous_speed: f64,
    /// `None` while the speed is still unknown or zero.
    pub estimated_remaining_seconds: Option<f64>,
    pub phase: UploadPhase,
}

/// Retry bookkeeping for one in-flight operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    /// Number of failed attempts so far (1-based).
    pub attempt: u32,
    pub last_error: String,
    pub next_delay: Duration,
}

/// Durable record produced by a successful confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub file_id: String,
    pub canonical_url: String,
    pub file_size: u64,
    pub file_type: FileKind,
    pub uploaded_at: DateTime<Utc>,
    pub filename: String,
    pub original_name: String,
    pub category: String,
}

/// Events emitted while a file moves through the pipeline.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Phase {
        file_id: String,
        phase: UploadPhase,
    },
    Progress {
        file_id: String,
        progress: UploadProgress,
    },
    Retry {
        file_id: String,
        state: RetryState,
    },
}

impl UploadEvent {
    pub fn file_id(&self) -> &str {
        match self {
            UploadEvent::Phase { file_id, .. }
            | UploadEvent::Progress { file_id, .. }
            | UploadEvent::Retry { file_id, .. } => file_id,
        }
    }
}
