//! Core types for framecast
//!
//! These types describe buffer configurations, platform handles and the
//! images that flow from an image source through a pool to the consumer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global handle counter for unique ids
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque process-unique handle (sessions, pools, surfaces)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Create a new unique handle
    pub fn new() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Write target of an image source, bound to a display sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub Handle);

/// Identifier of one buffer inside an image source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u64);

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pixel layout of the buffers an image source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Single-plane 8-bit RGBA
    #[default]
    Rgba8888,
    /// Three-plane YUV 4:2:0, delivered as I420
    Yuv420,
    /// Opaque producer-private layout, never readable by a pool
    Private,
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", crate::formats::format_name(*self))
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rgba" | "rgba8888" | "rgba_8888" => Ok(Self::Rgba8888),
            "yuv420" | "yuv" | "i420" | "yuv_420_888" => Ok(Self::Yuv420),
            "private" => Ok(Self::Private),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Buffer configuration a pool is bound to for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureState {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Display density in dots per inch
    pub dpi: u32,
    /// Pixel format
    pub format: PixelFormat,
}

impl CaptureState {
    /// Create a new capture state
    pub fn new(width: u32, height: u32, dpi: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            dpi,
            format,
        }
    }

    /// Same dimensions and format, different density
    pub fn with_dpi(self, dpi: u32) -> Self {
        Self { dpi, ..self }
    }

    /// Same density and format, different dimensions
    pub fn with_size(self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }

    /// Same geometry, different pixel format
    pub fn with_format(self, format: PixelFormat) -> Self {
        Self { format, ..self }
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} @ {}dpi {}",
            self.width, self.height, self.dpi, self.format
        )
    }
}

/// Visible region of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropRect {
    /// Crop rectangle covering a whole `width` x `height` frame
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// One plane of an image
#[derive(Debug, Clone)]
pub struct Plane {
    /// Plane bytes, shared with the producer
    pub data: Bytes,
    /// Bytes between the starts of two rows
    pub row_stride: u32,
    /// Bytes between two horizontally adjacent samples
    pub pixel_stride: u32,
}

/// Image handed out by an image source
///
/// The buffer stays checked out until the pool gives it back through
/// [`crate::platform::ImageSource::release_image`].
#[derive(Debug, Clone)]
pub struct Image {
    /// Buffer id inside the producing source
    pub id: ImageId,
    /// Format the producer actually wrote
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Capture timestamp in nanoseconds
    pub timestamp_ns: i64,
    pub crop: CropRect,
    pub planes: Vec<Plane>,
}

/// Resolved host window context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowContext {
    /// Display density in dots per inch
    pub density_dpi: u32,
    /// Largest bounds the window can occupy (width, height)
    pub max_bounds: (u32, u32),
}

impl WindowContext {
    /// Create a window context
    pub fn new(density_dpi: u32, max_bounds: (u32, u32)) -> Self {
        Self {
            density_dpi,
            max_bounds,
        }
    }
}

/// One-shot screen-share permission produced by an external picker flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureGrant {
    /// Opaque token identifying the grant
    pub token: Handle,
    /// Result code reported by the picker
    pub result_code: i32,
}

impl CaptureGrant {
    /// Create a grant with a fresh token
    pub fn new(result_code: i32) -> Self {
        Self {
            token: Handle::new(),
            result_code,
        }
    }
}
