use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use nuptia_core::{FileKind, FrameFormat, UploadCategory};
use nuptia_infra::{
    MemoryError, MemoryPressureMonitor, MemoryProbe, MemorySample, PressureThresholds,
    PressureTier,
};
use nuptia_processing::{
    DecodedFrame, FrameError, SamplerOptions, SurfacePool, VideoFrameSampler, VideoMetadata,
    VideoSource,
};

/// Synthetic video whose frames are a solid grey level derived from the timestamp.
struct FakeVideo {
    duration: f64,
    width: u32,
    height: u32,
    byte_len: u64,
    load_delay: Duration,
    seek_delay: Duration,
    hang_on_seek: Option<usize>,
    seeks: Vec<f64>,
    current: Option<DecodedFrame>,
    released: Arc<AtomicBool>,
}

impl FakeVideo {
    fn new(duration: f64, width: u32, height: u32) -> Self {
        Self {
            duration,
            width,
            height,
            byte_len: 10 * 1024 * 1024,
            load_delay: Duration::from_millis(10),
            seek_delay: Duration::from_millis(20),
            hang_on_seek: None,
            seeks: Vec::new(),
            current: None,
            released: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl VideoSource for FakeVideo {
    async fn load_metadata(&mut self) -> Result<VideoMetadata, FrameError> {
        tokio::time::sleep(self.load_delay).await;
        Ok(VideoMetadata {
            duration: self.duration,
            width: self.width,
            height: self.height,
            codec: "synthetic".to_string(),
        })
    }

    async fn seek(&mut self, timestamp: f64) -> Result<(), FrameError> {
        self.seeks.push(timestamp);
        if self.hang_on_seek == Some(self.seeks.len()) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.seek_delay).await;

        let level = (timestamp * 4.0) as u8;
        self.current = Some(DecodedFrame {
            width: self.width,
            height: self.height,
            rgba: [level, level, level, 255].repeat((self.width * self.height) as usize),
        });
        Ok(())
    }

    fn decode_current(&mut self) -> Result<DecodedFrame, FrameError> {
        self.current
            .take()
            .ok_or_else(|| FrameError::Decode("no frame".to_string()))
    }

    fn byte_len(&self) -> u64 {
        self.byte_len
    }

    fn release(&mut self) {
        self.current = None;
        self.released.store(true, Ordering::SeqCst);
    }
}

struct FixedProbe {
    used: u64,
    calls: AtomicUsize,
}

impl MemoryProbe for FixedProbe {
    fn sample(&self) -> Result<MemorySample, MemoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySample {
            used_bytes: self.used,
            total_bytes: 100,
        })
    }
}

fn options() -> SamplerOptions {
    SamplerOptions {
        max_width: Some(32),
        max_height: Some(32),
        ..SamplerOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn sixty_second_video_yields_eight_evenly_spaced_frames() {
    let pool = SurfacePool::new(5);
    let sampler = VideoFrameSampler::new(pool.clone());
    let mut video = FakeVideo::new(60.0, 64, 36);
    let released = video.released.clone();

    let frames = sampler
        .sample(&mut video, &options(), &CancellationToken::new())
        .await
        .unwrap();

    let timestamps: Vec<f64> = frames.iter().map(|f| f.timestamp_seconds).collect();
    assert_eq!(
        timestamps,
        vec![0.0, 7.5, 15.0, 22.5, 30.0, 37.5, 45.0, 52.5]
    );
    assert_eq!(video.seeks, timestamps);

    let first = &frames[0];
    assert_eq!((first.width, first.height), (32, 18));
    assert_eq!(first.pixels.len(), 32 * 18 * 4);
    assert_eq!(first.format, FrameFormat::Jpeg);
    assert_eq!(&first.encoded[..3], &[0xFF, 0xD8, 0xFF]);
    assert!(first.preview_url.starts_with("data:image/jpeg;base64,"));

    assert!(released.load(Ordering::SeqCst));
    let stats = pool.stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.created, 1);
    assert_eq!(stats.reused, 7);
}

#[tokio::test(start_paused = true)]
async fn frames_outlive_their_surface() {
    let pool = SurfacePool::new(1);
    let sampler = VideoFrameSampler::new(pool.clone());
    let mut video = FakeVideo::new(10.0, 8, 8);

    let frames = sampler
        .sample(
            &mut video,
            &SamplerOptions {
                frame_count: 2,
                format: FrameFormat::Png,
                ..SamplerOptions::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // 0s and 5s map to grey levels 0 and 20, both opaque.
    assert_eq!(&frames[0].pixels[..4], &[0, 0, 0, 255]);
    assert_eq!(&frames[1].pixels[..4], &[20, 20, 20, 255]);

    let surface = pool.checkout(8, 8);
    assert!(surface.is_blank());
}

#[tokio::test(start_paused = true)]
async fn sub_range_is_respected() {
    let sampler = VideoFrameSampler::new(SurfacePool::new(2));
    let mut video = FakeVideo::new(120.0, 16, 16);

    let frames = sampler
        .sample(
            &mut video,
            &SamplerOptions {
                frame_count: 4,
                start_time: Some(20.0),
                end_time: Some(40.0),
                ..options()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let timestamps: Vec<f64> = frames.iter().map(|f| f.timestamp_seconds).collect();
    assert_eq!(timestamps, vec![20.0, 25.0, 30.0, 35.0]);
    assert_eq!(video.seeks, timestamps);
}

#[tokio::test(start_paused = true)]
async fn stalled_seek_times_out_and_discards_frames() {
    let pool = SurfacePool::new(5);
    let sampler = VideoFrameSampler::new(pool.clone());
    let mut video = FakeVideo::new(60.0, 16, 16);
    video.hang_on_seek = Some(3);
    let released = video.released.clone();

    let error = sampler
        .sample(&mut video, &options(), &CancellationToken::new())
        .await
        .unwrap_err();

    match error {
        FrameError::SeekTimeout { timestamp, timeout } => {
            assert_eq!(timestamp, 15.0);
            assert_eq!(timeout, Duration::from_secs(5));
        }
        other => panic!("expected seek timeout, got {:?}", other),
    }
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(pool.stats().outstanding, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_metadata_is_a_load_timeout() {
    let sampler = VideoFrameSampler::new(SurfacePool::new(1));
    let mut video = FakeVideo::new(60.0, 16, 16);
    video.load_delay = Duration::from_secs(31);

    let error = sampler
        .sample(&mut video, &options(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, FrameError::LoadTimeout(t) if t == Duration::from_secs(30)));
    assert!(video.seeks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_seek_and_releases_the_source() {
    let pool = SurfacePool::new(5);
    let sampler = VideoFrameSampler::new(pool.clone());
    let mut video = FakeVideo::new(60.0, 16, 16);
    video.hang_on_seek = Some(2);
    let released = video.released.clone();

    let cancel = CancellationToken::new();
    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        })
    };

    let error = sampler
        .sample(&mut video, &options(), &cancel)
        .await
        .unwrap_err();
    trigger.await.unwrap();

    assert!(error.is_cancelled());
    assert_eq!(video.seeks.len(), 2);
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(pool.stats().outstanding, 0);
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_token_never_loads() {
    let sampler = VideoFrameSampler::new(SurfacePool::new(1));
    let mut video = FakeVideo::new(60.0, 16, 16);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = sampler
        .sample(&mut video, &options(), &cancel)
        .await
        .unwrap_err();

    assert!(error.is_cancelled());
    assert!(video.seeks.is_empty());
    assert!(video.released.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn memory_is_checked_before_every_batch_of_large_videos() {
    let pool = SurfacePool::new(5);
    let probe = Arc::new(FixedProbe {
        used: 95,
        calls: AtomicUsize::new(0),
    });
    let monitor = Arc::new(MemoryPressureMonitor::new(
        probe.clone(),
        PressureThresholds::default(),
    ));
    let sampler = VideoFrameSampler::new(pool.clone()).with_monitor(monitor.clone());

    let mut video = FakeVideo::new(60.0, 16, 16);
    video.byte_len = 300 * 1024 * 1024;

    let frames = sampler
        .sample(&mut video, &options(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(frames.len(), 8);
    // Batches of two: one check before each of the four batches.
    assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        monitor.latest().map(|snapshot| snapshot.tier),
        Some(PressureTier::Critical)
    );
    // Each critical check flushed the idle surface, so every batch allocated afresh.
    let stats = pool.stats();
    assert_eq!(stats.created, 4);
    assert_eq!(stats.reused, 4);
}

#[tokio::test(start_paused = true)]
async fn critical_memory_is_relieved_for_a_single_batch_video() {
    let pool = SurfacePool::new(5);
    let probe = Arc::new(FixedProbe {
        used: 95,
        calls: AtomicUsize::new(0),
    });
    let monitor = Arc::new(MemoryPressureMonitor::new(
        probe.clone(),
        PressureThresholds::default(),
    ));
    let sampler = VideoFrameSampler::new(pool.clone()).with_monitor(monitor.clone());

    // Left over from an earlier extraction.
    drop(pool.checkout(16, 16));
    assert_eq!(pool.stats().idle, 1);

    let mut video = FakeVideo::new(60.0, 16, 16);
    let frames = sampler
        .sample(&mut video, &options(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(frames.len(), 8);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        monitor.latest().map(|snapshot| snapshot.tier),
        Some(PressureTier::Critical)
    );
    // The leftover surface was flushed before the first frame, so a new one was created.
    assert_eq!(pool.stats().created, 2);
}

#[tokio::test(start_paused = true)]
async fn unusable_durations_are_load_errors() {
    for duration in [0.0, -3.0, f64::NAN, f64::INFINITY] {
        let sampler = VideoFrameSampler::new(SurfacePool::new(1));

        let mut video = FakeVideo::new(duration, 16, 16);
        let error = sampler
            .sample_one(&mut video, 1.0, &options(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, FrameError::MediaLoad(_)), "{:?}", error);
        assert!(video.seeks.is_empty());
        assert!(video.released.load(Ordering::SeqCst));

        let mut video = FakeVideo::new(duration, 16, 16);
        let error = sampler
            .sample(&mut video, &options(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, FrameError::MediaLoad(_)), "{:?}", error);
        assert!(video.seeks.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn single_frame_capture_clamps_into_the_video() {
    let sampler = VideoFrameSampler::new(SurfacePool::new(1));
    let mut video = FakeVideo::new(12.0, 16, 16);

    let frame = sampler
        .sample_one(&mut video, 99.0, &options(), &CancellationToken::new())
        .await
        .unwrap();

    assert!((frame.timestamp_seconds - 11.9).abs() < 1e-9);
    assert!(video.released.load(Ordering::SeqCst));

    let frame = sampler
        .sample_one(&mut video, -4.0, &options(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(frame.timestamp_seconds, 0.0);
}

#[tokio::test(start_paused = true)]
async fn chosen_frame_becomes_an_image_upload() {
    let sampler = VideoFrameSampler::new(SurfacePool::new(1));
    let mut video = FakeVideo::new(12.0, 16, 16);

    let frame = sampler
        .sample_one(&mut video, 6.0, &options(), &CancellationToken::new())
        .await
        .unwrap();
    let upload = frame.to_upload_file("clip_cover.jpg", UploadCategory::Cover);

    assert_eq!(upload.file_name, "clip_cover.jpg");
    assert_eq!(upload.content_type, "image/jpeg");
    assert_eq!(upload.kind, FileKind::Image);
    assert_eq!(upload.category, UploadCategory::Cover);
    assert_eq!(upload.data, frame.encoded);
}
