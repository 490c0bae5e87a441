//! Pre-flight validation of declared file metadata.
//!
//! Runs before any network call: a file rejected here never opens a session.

use crate::constants::{
    IMAGE_CONTENT_TYPES, MAX_FILENAME_LEN, MAX_IMAGE_SIZE_BYTES, MAX_VIDEO_SIZE_BYTES,
    VIDEO_CONTENT_TYPES,
};
use crate::models::{FileKind, UploadFile};

/// Size and MIME limits for one kind of file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindLimits {
    pub max_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

impl KindLimits {
    fn allows(&self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.allowed_content_types
            .iter()
            .any(|allowed| *allowed == content_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    pub image: KindLimits,
    pub video: KindLimits,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            image: KindLimits {
                max_size_bytes: MAX_IMAGE_SIZE_BYTES,
                allowed_content_types: IMAGE_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
            },
            video: KindLimits {
                max_size_bytes: MAX_VIDEO_SIZE_BYTES,
                allowed_content_types: VIDEO_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
            },
        }
    }
}

impl UploadLimits {
    pub fn for_kind(&self, kind: FileKind) -> &KindLimits {
        match kind {
            FileKind::Image => &self.image,
            FileKind::Video => &self.video,
        }
    }

    /// Check a file against the limits, returning a human-readable reason on rejection.
    pub fn check(&self, file: &UploadFile) -> Result<(), String> {
        let name_len = file.file_name.chars().count();
        if name_len == 0 || name_len > MAX_FILENAME_LEN {
            return Err(format!(
                "file name must be between 1 and {} characters",
                MAX_FILENAME_LEN
            ));
        }

        if file.data.is_empty() {
            return Err("file is empty".to_string());
        }

        if FileKind::from_content_type(&file.content_type) != file.kind {
            return Err(format!(
                "content type {} does not match declared {} upload",
                file.content_type, file.kind
            ));
        }

        let limits = self.for_kind(file.kind);
        if !limits.allows(&file.content_type) {
            return Err(format!(
                "content type {} is not allowed for {} uploads",
                file.content_type, file.kind
            ));
        }

        if file.size() > limits.max_size_bytes {
            return Err(format!(
                "file size {} bytes exceeds the {} limit of {} bytes",
                file.size(),
                file.kind,
                limits.max_size_bytes
            ));
        }

        Ok(())
    }
}
