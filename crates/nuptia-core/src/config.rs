//! Configuration module
//!
//! Settings are read from the environment (after loading `.env`) with typed defaults.
//! The batch pacing and backoff constants were tuned against one broker's rate limits,
//! so every one of them is overridable.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::validation::{KindLimits, UploadLimits};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(value) => value
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Upload pipeline configuration.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub broker_url: String,
    /// Forwarded as `Authorization: Bearer {token}` to the broker when set.
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub session_expiry_secs: u64,
    // Retry policy
    pub retry_base_delay: Duration,
    pub max_attempts: u32,
    pub rate_limit_cap: Duration,
    // Progress reporting
    pub progress_interval: Duration,
    pub progress_window: usize,
    // Batch pacing
    pub batch_concurrency: usize,
    pub wave_delay_floor: Duration,
    pub wave_delay_per_file: Duration,
    pub max_session_restarts: u32,
    pub limits: UploadLimits,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            broker_url: "http://localhost:3000/api".to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            session_expiry_secs: DEFAULT_SESSION_EXPIRY_SECS,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rate_limit_cap: Duration::from_millis(DEFAULT_RATE_LIMIT_CAP_MS),
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
            progress_window: DEFAULT_PROGRESS_WINDOW,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            wave_delay_floor: Duration::from_millis(DEFAULT_WAVE_DELAY_FLOOR_MS),
            wave_delay_per_file: Duration::from_millis(DEFAULT_WAVE_DELAY_PER_FILE_MS),
            max_session_restarts: DEFAULT_MAX_SESSION_RESTARTS,
            limits: UploadLimits::default(),
        }
    }
}

impl UploadConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let broker_url = env::var("NUPTIA_BROKER_URL")
            .or_else(|_| env::var("BROKER_URL"))
            .unwrap_or_else(|_| "http://localhost:3000/api".to_string());

        let api_token = env::var("NUPTIA_API_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        let limits = UploadLimits {
            image: KindLimits {
                max_size_bytes: env_or("NUPTIA_MAX_IMAGE_SIZE_BYTES", MAX_IMAGE_SIZE_BYTES),
                allowed_content_types: env_list(
                    "NUPTIA_IMAGE_CONTENT_TYPES",
                    IMAGE_CONTENT_TYPES,
                ),
            },
            video: KindLimits {
                max_size_bytes: env_or("NUPTIA_MAX_VIDEO_SIZE_BYTES", MAX_VIDEO_SIZE_BYTES),
                allowed_content_types: env_list(
                    "NUPTIA_VIDEO_CONTENT_TYPES",
                    VIDEO_CONTENT_TYPES,
                ),
            },
        };

        let config = Self {
            broker_url: broker_url.trim_end_matches('/').to_string(),
            api_token,
            request_timeout: Duration::from_secs(env_or(
                "NUPTIA_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            session_expiry_secs: env_or("NUPTIA_SESSION_EXPIRY_SECS", DEFAULT_SESSION_EXPIRY_SECS),
            retry_base_delay: Duration::from_millis(env_or(
                "NUPTIA_RETRY_BASE_DELAY_MS",
                DEFAULT_RETRY_BASE_DELAY_MS,
            )),
            max_attempts: env_or("NUPTIA_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            rate_limit_cap: Duration::from_millis(env_or(
                "NUPTIA_RATE_LIMIT_CAP_MS",
                DEFAULT_RATE_LIMIT_CAP_MS,
            )),
            progress_interval: Duration::from_millis(env_or(
                "NUPTIA_PROGRESS_INTERVAL_MS",
                DEFAULT_PROGRESS_INTERVAL_MS,
            )),
            progress_window: env_or("NUPTIA_PROGRESS_WINDOW", DEFAULT_PROGRESS_WINDOW),
            batch_concurrency: env_or("NUPTIA_BATCH_CONCURRENCY", DEFAULT_BATCH_CONCURRENCY),
            wave_delay_floor: Duration::from_millis(env_or(
                "NUPTIA_WAVE_DELAY_FLOOR_MS",
                DEFAULT_WAVE_DELAY_FLOOR_MS,
            )),
            wave_delay_per_file: Duration::from_millis(env_or(
                "NUPTIA_WAVE_DELAY_PER_FILE_MS",
                DEFAULT_WAVE_DELAY_PER_FILE_MS,
            )),
            max_session_restarts: env_or(
                "NUPTIA_MAX_SESSION_RESTARTS",
                DEFAULT_MAX_SESSION_RESTARTS,
            ),
            limits,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.broker_url.trim().is_empty() {
            return Err(anyhow::anyhow!("NUPTIA_BROKER_URL must not be empty"));
        }
        if self.batch_concurrency == 0 {
            return Err(anyhow::anyhow!("NUPTIA_BATCH_CONCURRENCY must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("NUPTIA_MAX_ATTEMPTS must be at least 1"));
        }
        if self.rate_limit_cap < self.retry_base_delay {
            return Err(anyhow::anyhow!(
                "NUPTIA_RATE_LIMIT_CAP_MS must not be smaller than NUPTIA_RETRY_BASE_DELAY_MS"
            ));
        }
        if self.progress_window < 2 {
            return Err(anyhow::anyhow!("NUPTIA_PROGRESS_WINDOW must be at least 2"));
        }
        Ok(())
    }
}

/// Output encoding for captured frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    Png,
    WebP,
}

impl FrameFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
            FrameFormat::Png => "image/png",
            FrameFormat::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "jpg",
            FrameFormat::Png => "png",
            FrameFormat::WebP => "webp",
        }
    }
}

impl FromStr for FrameFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" | "image/jpeg" | "image/jpg" => Ok(FrameFormat::Jpeg),
            "png" | "image/png" => Ok(FrameFormat::Png),
            "webp" | "image/webp" => Ok(FrameFormat::WebP),
            other => Err(format!("unsupported frame format: {}", other)),
        }
    }
}

/// Frame sampler, surface pool and memory monitor configuration.
#[derive(Clone, Debug)]
pub struct FrameConfig {
    pub frame_count: usize,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub format: FrameFormat,
    /// 1 - 100, only used by lossy formats.
    pub quality: u8,
    pub load_timeout: Duration,
    pub seek_timeout: Duration,
    pub pool_capacity: usize,
    pub elevated_memory_ratio: f64,
    pub critical_memory_ratio: f64,
    pub memory_check_interval: Duration,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            max_width: None,
            max_height: None,
            format: FrameFormat::Jpeg,
            quality: DEFAULT_FRAME_QUALITY,
            load_timeout: Duration::from_secs(DEFAULT_LOAD_TIMEOUT_SECS),
            seek_timeout: Duration::from_secs(DEFAULT_SEEK_TIMEOUT_SECS),
            pool_capacity: DEFAULT_SURFACE_POOL_CAPACITY,
            elevated_memory_ratio: DEFAULT_ELEVATED_MEMORY_RATIO,
            critical_memory_ratio: DEFAULT_CRITICAL_MEMORY_RATIO,
            memory_check_interval: Duration::from_millis(DEFAULT_MEMORY_CHECK_INTERVAL_MS),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl FrameConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let format = match env::var("NUPTIA_FRAME_FORMAT") {
            Ok(value) => value.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            Err(_) => FrameFormat::Jpeg,
        };

        let config = Self {
            frame_count: env_or("NUPTIA_FRAME_COUNT", DEFAULT_FRAME_COUNT),
            max_width: env::var("NUPTIA_FRAME_MAX_WIDTH")
                .ok()
                .and_then(|s| s.parse().ok()),
            max_height: env::var("NUPTIA_FRAME_MAX_HEIGHT")
                .ok()
                .and_then(|s| s.parse().ok()),
            format,
            quality: env_or("NUPTIA_FRAME_QUALITY", DEFAULT_FRAME_QUALITY),
            load_timeout: Duration::from_secs(env_or(
                "NUPTIA_VIDEO_LOAD_TIMEOUT_SECS",
                DEFAULT_LOAD_TIMEOUT_SECS,
            )),
            seek_timeout: Duration::from_secs(env_or(
                "NUPTIA_VIDEO_SEEK_TIMEOUT_SECS",
                DEFAULT_SEEK_TIMEOUT_SECS,
            )),
            pool_capacity: env_or("NUPTIA_SURFACE_POOL_CAPACITY", DEFAULT_SURFACE_POOL_CAPACITY),
            elevated_memory_ratio: env_or(
                "NUPTIA_MEMORY_ELEVATED_RATIO",
                DEFAULT_ELEVATED_MEMORY_RATIO,
            ),
            critical_memory_ratio: env_or(
                "NUPTIA_MEMORY_CRITICAL_RATIO",
                DEFAULT_CRITICAL_MEMORY_RATIO,
            ),
            memory_check_interval: Duration::from_millis(env_or(
                "NUPTIA_MEMORY_CHECK_INTERVAL_MS",
                DEFAULT_MEMORY_CHECK_INTERVAL_MS,
            )),
            ffmpeg_path: env::var("NUPTIA_FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: env::var("NUPTIA_FFPROBE_PATH")
                .unwrap_or_else(|_| "ffprobe".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.frame_count == 0 {
            return Err(anyhow::anyhow!("NUPTIA_FRAME_COUNT must be at least 1"));
        }
        if self.quality == 0 || self.quality > 100 {
            return Err(anyhow::anyhow!("NUPTIA_FRAME_QUALITY must be between 1 and 100"));
        }
        if !(0.0 < self.elevated_memory_ratio
            && self.elevated_memory_ratio < self.critical_memory_ratio
            && self.critical_memory_ratio <= 1.0)
        {
            return Err(anyhow::anyhow!(
                "memory thresholds must satisfy 0 < elevated < critical <= 1"
            ));
        }
        Ok(())
    }
}
