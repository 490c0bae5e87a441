//! Reusable RGBA drawing surfaces.
//!
//! The pool is an explicit object shared by `Arc`; there is no process-wide
//! instance. Surfaces are checked out as `PooledSurface` guards and go back to
//! the pool when the guard is dropped, cleared and with their buffer shrunk.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgba, RgbaImage};
use tracing::debug;

use nuptia_infra::PressureRelief;

use crate::error::FrameError;
use crate::source::DecodedFrame;

/// Largest buffer an idle surface keeps (one 1080p RGBA frame).
const MAX_RETAINED_BYTES: usize = 1920 * 1080 * 4;

/// An RGBA pixel buffer frames are drawn into.
#[derive(Debug, Default)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn retained_bytes(&self) -> usize {
        self.pixels.capacity()
    }

    /// True when every pixel is zero (fully transparent black).
    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|&b| b == 0)
    }

    /// Size the surface to `width` x `height`, all pixels cleared.
    fn prepare(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize * 4;
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(len, 0);
    }

    /// Draw `frame` scaled to fill the whole surface.
    pub fn draw(&mut self, frame: &DecodedFrame) -> Result<(), FrameError> {
        let source: ImageBuffer<Rgba<u8>, &[u8]> =
            ImageBuffer::from_raw(frame.width, frame.height, frame.rgba.as_slice()).ok_or_else(
                || {
                    FrameError::Decode(format!(
                        "frame buffer of {} bytes does not match {}x{}",
                        frame.rgba.len(),
                        frame.width,
                        frame.height
                    ))
                },
            )?;

        if frame.width == self.width && frame.height == self.height {
            self.pixels.copy_from_slice(frame.rgba.as_slice());
        } else {
            let scaled: RgbaImage =
                imageops::resize(&source, self.width, self.height, FilterType::Triangle);
            self.pixels.copy_from_slice(scaled.as_raw());
        }
        Ok(())
    }

    /// Zero the contents and give back memory beyond what an idle surface may keep.
    fn reset(&mut self) {
        self.pixels.fill(0);
        self.pixels.clear();
        if self.pixels.capacity() > MAX_RETAINED_BYTES {
            self.pixels.shrink_to(MAX_RETAINED_BYTES);
        }
        self.width = 0;
        self.height = 0;
    }

    fn release_buffer(&mut self) {
        self.pixels = Vec::new();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: usize,
    pub reused: usize,
    pub outstanding: usize,
    pub idle: usize,
}

pub struct SurfacePool {
    capacity: usize,
    idle: Mutex<Vec<Surface>>,
    created: AtomicUsize,
    reused: AtomicUsize,
    outstanding: AtomicUsize,
}

impl SurfacePool {
    /// `capacity` bounds how many idle surfaces are kept for reuse.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            idle: Mutex::new(Vec::with_capacity(capacity)),
            created: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn idle(&self) -> MutexGuard<'_, Vec<Surface>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check out a cleared surface of the given size.
    pub fn checkout(self: &Arc<Self>, width: u32, height: u32) -> PooledSurface {
        let recycled = self.idle().pop();
        let mut surface = match recycled {
            Some(surface) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                surface
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Surface::default()
            }
        };
        surface.prepare(width, height);
        self.outstanding.fetch_add(1, Ordering::Relaxed);

        PooledSurface {
            surface: Some(surface),
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, mut surface: Surface) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        surface.reset();

        let mut idle = self.idle();
        if idle.len() < self.capacity {
            idle.push(surface);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            idle: self.idle().len(),
        }
    }
}

impl PressureRelief for SurfacePool {
    /// Drop the buffers of idle surfaces but keep the surfaces themselves.
    fn trim(&self) -> usize {
        let mut idle = self.idle();
        let mut released = 0;
        for surface in idle.iter_mut() {
            if surface.retained_bytes() > 0 {
                surface.release_buffer();
                released += 1;
            }
        }
        debug!(released, "Trimmed idle surface buffers");
        released
    }

    /// Drop every idle surface.
    fn flush(&self) -> usize {
        let mut idle = self.idle();
        let released = idle.len();
        idle.clear();
        idle.shrink_to_fit();
        debug!(released, "Flushed surface pool");
        released
    }
}

/// A surface on loan from a `SurfacePool`. Returned on drop.
pub struct PooledSurface {
    surface: Option<Surface>,
    pool: Arc<SurfacePool>,
}

impl Deref for PooledSurface {
    type Target = Surface;

    fn deref(&self) -> &Surface {
        // Only `Drop` takes the surface out.
        self.surface.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledSurface {
    fn deref_mut(&mut self) -> &mut Surface {
        self.surface.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledSurface {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.take() {
            self.pool.give_back(surface);
        }
    }
}
