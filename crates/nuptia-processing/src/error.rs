use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to load video: {0}")]
    MediaLoad(String),

    #[error("video metadata did not load within {0:?}")]
    LoadTimeout(Duration),

    #[error("seek to {timestamp:.3}s did not settle within {timeout:?}")]
    SeekTimeout { timestamp: f64, timeout: Duration },

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),

    #[error("invalid sampling range {start}s..{end}s for {count} frame(s)")]
    InvalidRange { start: f64, end: f64, count: usize },

    #[error("frame extraction cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FrameError::Cancelled)
    }
}
