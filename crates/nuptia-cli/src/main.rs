//! Nuptia CLI: direct uploads to object storage and video frame sampling.
//!
//! Broker settings come from NUPTIA_* environment variables (or `.env`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nuptia_cli::{
    content_type_for_path, cover_file_name, init_tracing, join_background, pick_frame, print_json,
};
use nuptia_core::{FrameConfig, FrameFormat, UploadCategory, UploadConfig, UploadEvent, UploadFile};
use nuptia_infra::{MemoryPressureMonitor, PressureThresholds, SystemMemoryProbe};
use nuptia_processing::{
    FfmpegVideoSource, FrameSample, ImageCompressor, SamplerOptions, SurfacePool,
    VideoFrameSampler,
};
use nuptia_upload::{BatchOptions, BatchScheduler, UploadEvents, UploadPipeline};

#[derive(Parser)]
#[command(name = "nuptia", about = "Direct-to-storage uploads and video frame sampling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one or more files
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Category the broker files the uploads under
        #[arg(long, default_value = "other")]
        category: UploadCategory,
        /// Files uploaded concurrently per wave
        #[arg(long)]
        concurrency: Option<usize>,
        /// Downscale and re-encode images before uploading
        #[arg(long)]
        compress: bool,
    },
    /// Extract evenly spaced frames from a video
    Frames {
        /// Video file
        video: PathBuf,
        /// Number of frames
        #[arg(long)]
        count: Option<usize>,
        /// Directory the frames are written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long)]
        max_width: Option<u32>,
        #[arg(long)]
        max_height: Option<u32>,
        /// jpeg, png or webp
        #[arg(long)]
        format: Option<FrameFormat>,
    },
    /// Pick a frame from a video and upload it as the video's cover
    Cover {
        /// Video file
        video: PathBuf,
        /// Index of the frame to use (defaults to the middle one)
        #[arg(long)]
        pick: Option<usize>,
        #[arg(long, default_value = "cover")]
        category: UploadCategory,
    },
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

/// Log pipeline events until the sending side is dropped.
fn log_events(mut receiver: mpsc::UnboundedReceiver<UploadEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match event {
                UploadEvent::Phase { file_id, phase } => {
                    tracing::info!(file_id = %file_id, phase = ?phase, "Upload phase");
                }
                UploadEvent::Progress { file_id, progress } => {
                    tracing::info!(
                        file_id = %file_id,
                        percentage = progress.percentage,
                        speed_bps = progress.instantaneous_speed as u64,
                        eta_secs = ?progress.estimated_remaining_seconds.map(|s| s.round()),
                        "Upload progress"
                    );
                }
                UploadEvent::Retry { file_id, state } => {
                    tracing::warn!(
                        file_id = %file_id,
                        attempt = state.attempt,
                        delay_ms = state.next_delay.as_millis() as u64,
                        error = %state.last_error,
                        "Retrying upload"
                    );
                }
            }
        }
    })
}

async fn read_upload_file(path: &Path, category: UploadCategory) -> anyhow::Result<UploadFile> {
    let content_type = content_type_for_path(path)
        .with_context(|| format!("Unsupported file type: {}", path.display()))?;
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?;

    Ok(UploadFile::new(name, content_type, data)
        .with_id(path.display().to_string())
        .with_category(category))
}

fn sampler_for(config: &FrameConfig) -> (VideoFrameSampler, Arc<SurfacePool>, Arc<MemoryPressureMonitor>) {
    let pool = SurfacePool::new(config.pool_capacity);
    let monitor = Arc::new(MemoryPressureMonitor::new(
        Arc::new(SystemMemoryProbe::new()),
        PressureThresholds::from(config),
    ));
    let sampler = VideoFrameSampler::new(pool.clone()).with_monitor(monitor.clone());
    (sampler, pool, monitor)
}

/// Sample frames with the periodic memory monitor running alongside.
async fn extract_frames(
    video: &Path,
    config: &FrameConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<FrameSample>> {
    let (sampler, pool, monitor) = sampler_for(config);
    let monitor_stop = cancel.child_token();
    let monitor_task = monitor.spawn(pool, config.memory_check_interval, monitor_stop.clone());

    let mut source = FfmpegVideoSource::from_path(video, config)?;
    let result = sampler
        .sample(&mut source, &SamplerOptions::from(config), cancel)
        .await;

    monitor_stop.cancel();
    join_background(monitor_task, "memory monitor").await;
    Ok(result?)
}

async fn upload(
    files: Vec<PathBuf>,
    category: UploadCategory,
    concurrency: Option<usize>,
    compress: bool,
) -> anyhow::Result<()> {
    let mut config = UploadConfig::from_env()?;
    if let Some(concurrency) = concurrency {
        config.batch_concurrency = concurrency;
        config.validate()?;
    }

    let compressor = ImageCompressor::default();
    let mut uploads = Vec::with_capacity(files.len());
    for path in &files {
        let file = read_upload_file(path, category).await?;
        let file = if compress {
            compressor
                .compress(&file)
                .with_context(|| format!("Compress {}", path.display()))?
        } else {
            file
        };
        uploads.push(file);
    }

    let pipeline = UploadPipeline::from_config(&config).context("Create upload pipeline")?;
    let scheduler = BatchScheduler::new(Arc::new(pipeline), BatchOptions::from(&config));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let (events, receiver) = UploadEvents::channel();
    let logger = log_events(receiver);

    let report = scheduler.run(uploads, &cancel, &events).await;
    drop(events);
    join_background(logger, "event logger").await;

    let successes: Vec<_> = report
        .successes
        .iter()
        .map(|success| json!({ "file": success.file_id, "result": success.result }))
        .collect();
    let failures: Vec<_> = report
        .failures
        .iter()
        .map(|failure| {
            json!({
                "file": failure.file_id(),
                "code": failure.error_code(),
                "error": failure.to_string(),
            })
        })
        .collect();
    print_json(&json!({ "successes": successes, "failures": failures }))?;

    if !report.all_succeeded() {
        anyhow::bail!("{} of {} uploads failed", report.failures.len(), report.total());
    }
    Ok(())
}

async fn frames(
    video: PathBuf,
    count: Option<usize>,
    out: PathBuf,
    max_width: Option<u32>,
    max_height: Option<u32>,
    format: Option<FrameFormat>,
) -> anyhow::Result<()> {
    let mut config = FrameConfig::from_env()?;
    if let Some(count) = count {
        config.frame_count = count;
    }
    if max_width.is_some() {
        config.max_width = max_width;
    }
    if max_height.is_some() {
        config.max_height = max_height;
    }
    if let Some(format) = format {
        config.format = format;
    }
    config.validate()?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let frames = extract_frames(&video, &config, &cancel).await?;

    tokio::fs::create_dir_all(&out)
        .await
        .with_context(|| format!("Create {}", out.display()))?;
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");

    let mut written = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let path = out.join(format!("{}_frame_{:02}.{}", stem, index, frame.format.extension()));
        tokio::fs::write(&path, &frame.encoded)
            .await
            .with_context(|| format!("Write {}", path.display()))?;
        written.push(json!({
            "index": index,
            "timestampSeconds": frame.timestamp_seconds,
            "width": frame.width,
            "height": frame.height,
            "bytes": frame.encoded.len(),
            "path": path.display().to_string(),
        }));
    }
    print_json(&written)
}

async fn cover(video: PathBuf, pick: Option<usize>, category: UploadCategory) -> anyhow::Result<()> {
    let upload_config = UploadConfig::from_env()?;
    let frame_config = FrameConfig {
        format: FrameFormat::Jpeg,
        ..FrameConfig::from_env()?
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let frames = extract_frames(&video, &frame_config, &cancel).await?;
    let index = pick_frame(pick, frames.len())?;
    let frame = &frames[index];
    tracing::info!(
        index,
        timestamp = frame.timestamp_seconds,
        "Selected cover frame"
    );

    let file = frame.to_upload_file(cover_file_name(&video), category);
    let pipeline = UploadPipeline::from_config(&upload_config).context("Create upload pipeline")?;
    let (events, receiver) = UploadEvents::channel();
    let logger = log_events(receiver);

    let result = pipeline.upload(&file, &cancel, &events).await;
    drop(events);
    join_background(logger, "event logger").await;

    print_json(&result?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Upload {
            files,
            category,
            concurrency,
            compress,
        } => upload(files, category, concurrency, compress).await,
        Commands::Frames {
            video,
            count,
            out,
            max_width,
            max_height,
            format,
        } => frames(video, count, out, max_width, max_height, format).await,
        Commands::Cover {
            video,
            pick,
            category,
        } => cover(video, pick, category).await,
    };

    nuptia_infra::shutdown_telemetry().await;
    outcome
}
