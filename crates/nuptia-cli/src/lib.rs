use std::path::Path;

use anyhow::Context;
use serde::Serialize;

/// Initialize tracing for the CLI. Logs go to stderr so JSON output stays clean.
pub fn init_tracing() {
    if let Err(e) = nuptia_infra::init_telemetry("info") {
        eprintln!("failed to initialize tracing: {}", e);
    }
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

/// Wait for a background task. A panic is logged, not propagated; returns whether
/// the task finished cleanly.
pub async fn join_background(task: tokio::task::JoinHandle<()>, name: &'static str) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(task = name, error = %e, "Background task failed");
            false
        }
    }
}

/// MIME type implied by a file extension, for the types the broker accepts.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        _ => return None,
    };
    Some(content_type)
}

/// `clip.mp4` -> `clip_cover.jpg`
pub fn cover_file_name(video: &Path) -> String {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("video");
    format!("{}_cover.jpg", stem)
}

/// Index of the frame to use as a cover: the requested one, or the middle frame.
pub fn pick_frame(requested: Option<usize>, available: usize) -> anyhow::Result<usize> {
    if available == 0 {
        anyhow::bail!("no frames were extracted");
    }
    match requested {
        Some(index) if index < available => Ok(index),
        Some(index) => anyhow::bail!(
            "frame {} requested but only {} extracted",
            index,
            available
        ),
        None => Ok(available / 2),
    }
}
