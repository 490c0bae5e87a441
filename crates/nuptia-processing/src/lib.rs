//! Nuptia media processing
//!
//! - `VideoFrameSampler` extracts evenly spaced still frames from a video
//! - `SurfacePool` recycles the RGBA surfaces frames are drawn into
//! - `FfmpegVideoSource` decodes through the `ffprobe`/`ffmpeg` binaries
//! - `ImageCompressor` shrinks images before they are uploaded

pub mod compress;
pub mod encode;
pub mod error;
pub mod pool;
pub mod sampler;
pub mod source;

pub use compress::ImageCompressor;
pub use error::FrameError;
pub use pool::{PoolStats, PooledSurface, Surface, SurfacePool};
pub use sampler::{
    batch_size_for, fit_within, sample_timestamps, FrameSample, SamplerOptions, VideoFrameSampler,
};
pub use source::{DecodedFrame, FfmpegVideoSource, VideoMetadata, VideoSource};
