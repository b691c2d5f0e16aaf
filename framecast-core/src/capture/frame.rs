//! Frames handed to the consumer
//!
//! Frames borrow their planes from the image source (`Bytes` clones share
//! the producer's allocation) and carry a [`ReleaseCallback`] that returns
//! the buffer to its pool.

use bytes::Bytes;

use crate::types::{CropRect, Handle};

/// Returns one acquired buffer to its pool
///
/// Move-only: `release` consumes it, and dropping an unreleased callback
/// releases the buffer too, so a buffer goes back exactly once. Safe to
/// call from any thread.
pub struct ReleaseCallback {
    release: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl ReleaseCallback {
    /// Wrap a release action
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Return the buffer to its pool
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ReleaseCallback {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ReleaseCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseCallback")
            .field("pending", &self.release.is_some())
            .finish()
    }
}

/// Single-plane RGBA frame
#[derive(Debug)]
pub struct RgbaFrame {
    /// Pool the buffer belongs to
    pub pool: Handle,
    pub release: ReleaseCallback,
    /// Capture timestamp in nanoseconds
    pub timestamp_ns: i64,
    pub width: u32,
    pub height: u32,
    /// Pixel data
    pub data: Bytes,
    /// Row stride in bytes
    pub stride: u32,
    pub crop: CropRect,
}

/// Three-plane YUV 4:2:0 frame
#[derive(Debug)]
pub struct I420Frame {
    /// Pool the buffer belongs to
    pub pool: Handle,
    pub release: ReleaseCallback,
    /// Capture timestamp in nanoseconds
    pub timestamp_ns: i64,
    pub width: u32,
    pub height: u32,
    pub y: Bytes,
    pub u: Bytes,
    pub v: Bytes,
    pub y_stride: u32,
    pub uv_row_stride: u32,
    pub uv_pixel_stride: u32,
    pub crop: CropRect,
}

/// Frame of either layout
#[derive(Debug)]
pub enum Frame {
    Rgba(RgbaFrame),
    I420(I420Frame),
}

impl Frame {
    /// Pool the buffer belongs to
    pub fn pool(&self) -> Handle {
        match self {
            Self::Rgba(f) => f.pool,
            Self::I420(f) => f.pool,
        }
    }

    pub fn timestamp_ns(&self) -> i64 {
        match self {
            Self::Rgba(f) => f.timestamp_ns,
            Self::I420(f) => f.timestamp_ns,
        }
    }

    pub fn crop(&self) -> CropRect {
        match self {
            Self::Rgba(f) => f.crop,
            Self::I420(f) => f.crop,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Rgba(f) => (f.width, f.height),
            Self::I420(f) => (f.width, f.height),
        }
    }

    /// Return the buffer to its pool
    pub fn release(self) {
        match self {
            Self::Rgba(f) => f.release.release(),
            Self::I420(f) => f.release.release(),
        }
    }
}
