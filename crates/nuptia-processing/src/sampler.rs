//! Evenly spaced still frames from a video.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nuptia_core::constants::{
    DEFAULT_FRAME_COUNT, DEFAULT_FRAME_QUALITY, DEFAULT_LOAD_TIMEOUT_SECS,
    DEFAULT_SEEK_TIMEOUT_SECS,
};
use nuptia_core::{FrameConfig, FrameFormat, UploadCategory, UploadFile};
use nuptia_infra::MemoryPressureMonitor;

use crate::encode::{data_url, encode_rgba};
use crate::error::FrameError;
use crate::pool::SurfacePool;
use crate::source::{VideoMetadata, VideoSource, END_MARGIN_SECS};

const LARGE_VIDEO_BYTES: u64 = 200 * 1024 * 1024;
const MEDIUM_VIDEO_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SamplerOptions {
    pub frame_count: usize,
    /// Defaults to the start of the video.
    pub start_time: Option<f64>,
    /// Defaults to the reported duration.
    pub end_time: Option<f64>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub format: FrameFormat,
    pub quality: u8,
    pub load_timeout: Duration,
    pub seek_timeout: Duration,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            start_time: None,
            end_time: None,
            max_width: None,
            max_height: None,
            format: FrameFormat::Jpeg,
            quality: DEFAULT_FRAME_QUALITY,
            load_timeout: Duration::from_secs(DEFAULT_LOAD_TIMEOUT_SECS),
            seek_timeout: Duration::from_secs(DEFAULT_SEEK_TIMEOUT_SECS),
        }
    }
}

impl From<&FrameConfig> for SamplerOptions {
    fn from(config: &FrameConfig) -> Self {
        Self {
            frame_count: config.frame_count,
            start_time: None,
            end_time: None,
            max_width: config.max_width,
            max_height: config.max_height,
            format: config.format,
            quality: config.quality,
            load_timeout: config.load_timeout,
            seek_timeout: config.seek_timeout,
        }
    }
}

/// A captured frame. Owns copies of its pixels and encoding, so it stays valid
/// after the surface it was drawn on has gone back to the pool.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub timestamp_seconds: f64,
    pub width: u32,
    pub height: u32,
    /// RGBA, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
    pub encoded: Bytes,
    pub format: FrameFormat,
    pub preview_url: String,
}

impl FrameSample {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Wrap the encoded frame as an image upload (e.g. a video cover).
    pub fn to_upload_file(
        &self,
        file_name: impl Into<String>,
        category: UploadCategory,
    ) -> UploadFile {
        UploadFile::new(file_name, self.mime_type(), self.encoded.clone()).with_category(category)
    }
}

/// `count` timestamps spaced `(end - start) / count` apart, starting at `start`.
pub fn sample_timestamps(start: f64, end: f64, count: usize) -> Result<Vec<f64>, FrameError> {
    if count == 0 || !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
        return Err(FrameError::InvalidRange { start, end, count });
    }

    let interval = (end - start) / count as f64;
    Ok((0..count)
        .map(|i| start + i as f64 * interval)
        .collect())
}

/// Scale `width` x `height` down to fit the box, preserving the aspect ratio.
/// Never scales up.
pub fn fit_within(
    width: u32,
    height: u32,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> (u32, u32) {
    let mut scale: f64 = 1.0;
    if let Some(max) = max_width.filter(|m| *m > 0) {
        scale = scale.min(max as f64 / width.max(1) as f64);
    }
    if let Some(max) = max_height.filter(|m| *m > 0) {
        scale = scale.min(max as f64 / height.max(1) as f64);
    }

    let scaled_width = ((width as f64 * scale).round() as u32).max(1);
    let scaled_height = ((height as f64 * scale).round() as u32).max(1);
    (scaled_width, scaled_height)
}

/// How many timestamps to capture between yields, by encoded video size.
pub fn batch_size_for(video_bytes: u64) -> usize {
    if video_bytes > LARGE_VIDEO_BYTES {
        2
    } else if video_bytes > MEDIUM_VIDEO_BYTES {
        4
    } else {
        8
    }
}

/// Race `operation` against cancellation and a deadline.
async fn bounded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    operation: F,
    on_timeout: FrameError,
) -> Result<T, FrameError>
where
    F: Future<Output = Result<T, FrameError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FrameError::Cancelled),
        outcome = tokio::time::timeout(limit, operation) => outcome.map_err(|_| on_timeout)?,
    }
}

pub struct VideoFrameSampler {
    pool: Arc<SurfacePool>,
    monitor: Option<Arc<MemoryPressureMonitor>>,
}

impl VideoFrameSampler {
    pub fn new(pool: Arc<SurfacePool>) -> Self {
        Self {
            pool,
            monitor: None,
        }
    }

    /// Check memory pressure before each batch and relieve it through the pool.
    pub fn with_monitor(mut self, monitor: Arc<MemoryPressureMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn pool(&self) -> &Arc<SurfacePool> {
        &self.pool
    }

    /// Capture `options.frame_count` frames. The source is released whatever the
    /// outcome; on error or cancellation nothing captured so far is returned.
    pub async fn sample(
        &self,
        source: &mut dyn VideoSource,
        options: &SamplerOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<FrameSample>, FrameError> {
        let result = self.sample_all(source, options, cancel).await;
        source.release();

        if let Err(e) = &result {
            if e.is_cancelled() {
                info!("Frame extraction cancelled");
            } else {
                warn!(error = %e, "Frame extraction failed");
            }
        }
        result
    }

    /// Capture the single frame nearest `timestamp`, clamped to
    /// `[0, duration - 0.1]`.
    pub async fn sample_one(
        &self,
        source: &mut dyn VideoSource,
        timestamp: f64,
        options: &SamplerOptions,
        cancel: &CancellationToken,
    ) -> Result<FrameSample, FrameError> {
        let result = async {
            let metadata = self.load(source, options, cancel).await?;
            let (width, height) =
                fit_within(metadata.width, metadata.height, options.max_width, options.max_height);
            let last = (metadata.duration - END_MARGIN_SECS).max(0.0);
            let timestamp = timestamp.max(0.0).min(last);
            self.capture(source, timestamp, width, height, options, cancel)
                .await
        }
        .await;
        source.release();
        result
    }

    async fn load(
        &self,
        source: &mut dyn VideoSource,
        options: &SamplerOptions,
        cancel: &CancellationToken,
    ) -> Result<VideoMetadata, FrameError> {
        if cancel.is_cancelled() {
            return Err(FrameError::Cancelled);
        }
        let metadata = bounded(
            cancel,
            options.load_timeout,
            source.load_metadata(),
            FrameError::LoadTimeout(options.load_timeout),
        )
        .await?;

        if !metadata.duration.is_finite() || metadata.duration <= 0.0 {
            return Err(FrameError::MediaLoad(format!(
                "video reports an unusable duration: {}",
                metadata.duration
            )));
        }
        Ok(metadata)
    }

    async fn sample_all(
        &self,
        source: &mut dyn VideoSource,
        options: &SamplerOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<FrameSample>, FrameError> {
        let metadata = self.load(source, options, cancel).await?;

        let start = options.start_time.unwrap_or(0.0);
        let end = options
            .end_time
            .map_or(metadata.duration, |end| end.min(metadata.duration));
        let timestamps = sample_timestamps(start, end, options.frame_count)?;

        let (width, height) =
            fit_within(metadata.width, metadata.height, options.max_width, options.max_height);
        let batch_size = batch_size_for(source.byte_len());

        debug!(
            frames = timestamps.len(),
            width,
            height,
            batch_size,
            duration = metadata.duration,
            "Sampling video frames"
        );

        let mut frames = Vec::with_capacity(timestamps.len());
        for batch in timestamps.chunks(batch_size) {
            self.relieve_pressure();
            tokio::task::yield_now().await;
            for &timestamp in batch {
                let frame = self
                    .capture(source, timestamp, width, height, options, cancel)
                    .await?;
                frames.push(frame);
            }
        }

        info!(
            frames = frames.len(),
            codec = %metadata.codec,
            "Frame extraction completed"
        );
        Ok(frames)
    }

    async fn capture(
        &self,
        source: &mut dyn VideoSource,
        timestamp: f64,
        width: u32,
        height: u32,
        options: &SamplerOptions,
        cancel: &CancellationToken,
    ) -> Result<FrameSample, FrameError> {
        bounded(
            cancel,
            options.seek_timeout,
            source.seek(timestamp),
            FrameError::SeekTimeout {
                timestamp,
                timeout: options.seek_timeout,
            },
        )
        .await?;
        if cancel.is_cancelled() {
            return Err(FrameError::Cancelled);
        }

        let decoded = source.decode_current()?;

        // The surface goes back to the pool at the end of this block; only the copy escapes.
        let pixels = {
            let mut surface = self.pool.checkout(width, height);
            surface.draw(&decoded)?;
            surface.pixels().to_vec()
        };

        let encoded = encode_rgba(&pixels, width, height, options.format, options.quality)?;
        let preview_url = data_url(options.format.mime_type(), &encoded);

        Ok(FrameSample {
            timestamp_seconds: timestamp,
            width,
            height,
            pixels,
            encoded: Bytes::from(encoded),
            format: options.format,
            preview_url,
        })
    }

    fn relieve_pressure(&self) {
        let Some(monitor) = &self.monitor else {
            return;
        };
        match monitor.check(&*self.pool) {
            Ok(snapshot) => debug!(
                tier = snapshot.tier.as_str(),
                usage_ratio = snapshot.usage_ratio,
                "Memory checked before frame batch"
            ),
            Err(e) => debug!(error = %e, "Memory usage unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_evenly_spaced_from_the_start() {
        let timestamps = sample_timestamps(0.0, 60.0, 8).unwrap();
        assert_eq!(
            timestamps,
            vec![0.0, 7.5, 15.0, 22.5, 30.0, 37.5, 45.0, 52.5]
        );
    }

    #[test]
    fn timestamps_respect_a_sub_range() {
        let timestamps = sample_timestamps(10.0, 20.0, 4).unwrap();
        assert_eq!(timestamps, vec![10.0, 12.5, 15.0, 17.5]);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(sample_timestamps(0.0, 10.0, 0).is_err());
        assert!(sample_timestamps(5.0, 5.0, 3).is_err());
        assert!(sample_timestamps(8.0, 2.0, 3).is_err());
        assert!(sample_timestamps(0.0, f64::NAN, 3).is_err());
        assert!(sample_timestamps(-1.0, 10.0, 3).is_err());
    }

    #[test]
    fn fit_within_preserves_aspect_ratio() {
        assert_eq!(fit_within(1920, 1080, Some(640), Some(640)), (640, 360));
        assert_eq!(fit_within(1080, 1920, Some(640), Some(640)), (360, 640));
        assert_eq!(fit_within(1920, 1080, None, Some(540)), (960, 540));
    }

    #[test]
    fn fit_within_never_upscales() {
        assert_eq!(fit_within(320, 240, Some(1920), Some(1080)), (320, 240));
        assert_eq!(fit_within(320, 240, None, None), (320, 240));
        assert_eq!(fit_within(10_000, 1, Some(100), None), (100, 1));
    }

    #[test]
    fn batch_size_shrinks_for_large_videos() {
        assert_eq!(batch_size_for(10 * 1024 * 1024), 8);
        assert_eq!(batch_size_for(MEDIUM_VIDEO_BYTES + 1), 4);
        assert_eq!(batch_size_for(LARGE_VIDEO_BYTES + 1), 2);
    }
}
