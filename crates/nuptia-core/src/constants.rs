//! Default values shared by configuration and components.

/// Broker endpoint paths, relative to the broker base URL.
pub const NEGOTIATE_PATH: &str = "/direct-upload/presigned-url";
pub const CONFIRM_PATH: &str = "/direct-upload/confirm";
pub const CANCEL_PATH: &str = "/direct-upload/cancel";
pub const SESSION_STATUS_PATH: &str = "/direct-upload/progress";

pub const DEFAULT_SESSION_EXPIRY_SECS: u64 = 3600;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

// Retry policy
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RATE_LIMIT_CAP_MS: u64 = 30_000;

// Progress reporting
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;
pub const DEFAULT_PROGRESS_WINDOW: usize = 8;

// Batch pacing, tuned against the broker's upload rate limit
pub const DEFAULT_BATCH_CONCURRENCY: usize = 2;
pub const DEFAULT_WAVE_DELAY_FLOOR_MS: u64 = 2000;
pub const DEFAULT_WAVE_DELAY_PER_FILE_MS: u64 = 500;
pub const DEFAULT_MAX_SESSION_RESTARTS: u32 = 1;

// Validation limits
pub const MAX_IMAGE_SIZE_BYTES: u64 = 50 * 1024 * 1024;
pub const MAX_VIDEO_SIZE_BYTES: u64 = 500 * 1024 * 1024;
pub const MAX_FILENAME_LEN: usize = 255;

pub const IMAGE_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
];

pub const VIDEO_CONTENT_TYPES: &[&str] = &[
    "video/mp4",
    "video/avi",
    "video/mov",
    "video/wmv",
    "video/quicktime",
    "video/flv",
    "video/webm",
    "video/mkv",
];

// Frame sampling
pub const DEFAULT_FRAME_COUNT: usize = 8;
pub const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SEEK_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_FRAME_QUALITY: u8 = 80;
pub const DEFAULT_SURFACE_POOL_CAPACITY: usize = 5;
pub const DEFAULT_ELEVATED_MEMORY_RATIO: f64 = 0.70;
pub const DEFAULT_CRITICAL_MEMORY_RATIO: f64 = 0.90;
pub const DEFAULT_MEMORY_CHECK_INTERVAL_MS: u64 = 2000;
