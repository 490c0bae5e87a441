//! Video decoding backends.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;

use nuptia_core::FrameConfig;

use crate::error::FrameError;

/// Seeks are clamped this far before the reported end, where decoders often have no frame.
pub(crate) const END_MARGIN_SECS: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
}

/// One decoded frame as tightly packed RGBA.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// A seekable video that can hand out its current frame.
///
/// `seek` resolves once the frame at the requested position is ready to be
/// read with `decode_current`. Callers bound both with their own timeouts.
#[async_trait]
pub trait VideoSource: Send {
    async fn load_metadata(&mut self) -> Result<VideoMetadata, FrameError>;

    async fn seek(&mut self, timestamp: f64) -> Result<(), FrameError>;

    fn decode_current(&mut self) -> Result<DecodedFrame, FrameError>;

    /// Size of the encoded video, used to size extraction batches.
    fn byte_len(&self) -> u64;

    /// Drop decoder state and any scratch files. Safe to call more than once.
    fn release(&mut self);
}

/// Tool paths come from configuration and must be plain paths.
fn validate_binary(binary: &str) -> Result<(), FrameError> {
    if binary.is_empty() || binary.contains("..") || !binary
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '\\'))
    {
        return Err(FrameError::MediaLoad(format!(
            "invalid executable path: {}",
            binary
        )));
    }
    Ok(())
}

/// Decodes through the `ffprobe` and `ffmpeg` command line tools.
pub struct FfmpegVideoSource {
    path: PathBuf,
    byte_len: u64,
    ffmpeg_path: String,
    ffprobe_path: String,
    metadata: Option<VideoMetadata>,
    current: Option<DecodedFrame>,
    // Keeps the scratch copy alive for sources built from memory.
    scratch: Option<NamedTempFile>,
}

impl FfmpegVideoSource {
    pub fn from_path(path: impl AsRef<Path>, config: &FrameConfig) -> Result<Self, FrameError> {
        let path = path.as_ref();
        validate_binary(&config.ffmpeg_path)?;
        validate_binary(&config.ffprobe_path)?;

        let path = path
            .canonicalize()
            .map_err(|e| FrameError::MediaLoad(format!("cannot open {}: {}", path.display(), e)))?;
        let byte_len = std::fs::metadata(&path)?.len();

        Ok(Self {
            path,
            byte_len,
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            metadata: None,
            current: None,
            scratch: None,
        })
    }

    /// Spill `data` to a temporary file the tools can read.
    pub fn from_bytes(data: &[u8], config: &FrameConfig) -> Result<Self, FrameError> {
        use std::io::Write;

        let mut scratch = NamedTempFile::new()?;
        scratch.write_all(data)?;
        scratch.flush()?;

        let mut source = Self::from_path(scratch.path(), config)?;
        source.scratch = Some(scratch);
        Ok(source)
    }

    async fn probe(&self) -> Result<VideoMetadata, FrameError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(&self.path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FrameError::MediaLoad(format!("failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(FrameError::MediaLoad(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        parse_probe(&output.stdout)
    }
}

pub(crate) fn parse_probe(stdout: &[u8]) -> Result<VideoMetadata, FrameError> {
    let probe: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| FrameError::MediaLoad(format!("failed to parse ffprobe output: {}", e)))?;

    let stream = probe["streams"]
        .get(0)
        .ok_or_else(|| FrameError::MediaLoad("no video stream found".to_string()))?;

    let duration = probe["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| FrameError::MediaLoad("could not parse duration".to_string()))?;

    let width = stream["width"]
        .as_u64()
        .filter(|w| *w > 0)
        .ok_or_else(|| FrameError::MediaLoad("could not parse width".to_string()))? as u32;
    let height = stream["height"]
        .as_u64()
        .filter(|h| *h > 0)
        .ok_or_else(|| FrameError::MediaLoad("could not parse height".to_string()))? as u32;

    let codec = stream["codec_name"]
        .as_str()
        .unwrap_or("unknown")
        .to_string();

    Ok(VideoMetadata {
        duration,
        width,
        height,
        codec,
    })
}

#[async_trait]
impl VideoSource for FfmpegVideoSource {
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    async fn load_metadata(&mut self) -> Result<VideoMetadata, FrameError> {
        if let Some(metadata) = &self.metadata {
            return Ok(metadata.clone());
        }

        let start = std::time::Instant::now();
        let metadata = self.probe().await?;
        tracing::info!(
            duration_ms = start.elapsed().as_millis(),
            video_duration = metadata.duration,
            width = metadata.width,
            height = metadata.height,
            codec = %metadata.codec,
            "Video probe completed"
        );

        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    async fn seek(&mut self, timestamp: f64) -> Result<(), FrameError> {
        let metadata = self.load_metadata().await?;
        let position = timestamp.clamp(0.0, (metadata.duration - END_MARGIN_SECS).max(0.0));
        self.current = None;

        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-ss"])
            .arg(format!("{:.3}", position))
            .arg("-i")
            .arg(&self.path)
            .args([
                "-frames:v",
                "1",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FrameError::Decode(format!("failed to execute ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(FrameError::Decode(format!(
                "ffmpeg failed at {:.3}s: {}",
                position,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let expected = metadata.width as usize * metadata.height as usize * 4;
        if output.stdout.len() != expected {
            return Err(FrameError::Decode(format!(
                "expected {} bytes of RGBA at {:.3}s, got {}",
                expected,
                position,
                output.stdout.len()
            )));
        }

        self.current = Some(DecodedFrame {
            width: metadata.width,
            height: metadata.height,
            rgba: output.stdout,
        });
        Ok(())
    }

    fn decode_current(&mut self) -> Result<DecodedFrame, FrameError> {
        self.current
            .take()
            .ok_or_else(|| FrameError::Decode("no frame decoded at the current position".to_string()))
    }

    fn byte_len(&self) -> u64 {
        self.byte_len
    }

    fn release(&mut self) {
        self.current = None;
        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = scratch.close() {
                tracing::warn!(error = %e, "Failed to remove scratch video file");
            }
        }
    }
}

impl Drop for FfmpegVideoSource {
    fn drop(&mut self) {
        self.release();
    }
}
