//! Pixel format helpers
//!
//! Centralizes plane layout and the format-negotiation fallback table so
//! the pool and the simulated producer agree on them.

use crate::types::PixelFormat;

/// Number of planes a readable format carries
pub fn plane_count(format: PixelFormat) -> usize {
    match format {
        PixelFormat::Rgba8888 => 1,
        PixelFormat::Yuv420 => 3,
        PixelFormat::Private => 0,
    }
}

/// Bytes per pixel of the first plane
pub fn bytes_per_pixel(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Rgba8888 => 4,
        // Luma plane; chroma planes are subsampled 2x2
        PixelFormat::Yuv420 => 1,
        PixelFormat::Private => 0,
    }
}

/// Format to retry with when the producer rejects `format`
///
/// Each format has at most one fallback, and no chain leads back to its
/// start, so negotiation always terminates.
pub fn fallback_format(format: PixelFormat) -> Option<PixelFormat> {
    match format {
        PixelFormat::Rgba8888 => Some(PixelFormat::Yuv420),
        PixelFormat::Yuv420 | PixelFormat::Private => None,
    }
}

/// Whether frames of this format can be delivered to a consumer
pub fn is_deliverable(format: PixelFormat) -> bool {
    plane_count(format) > 0
}

/// Size in bytes of a tightly packed frame
pub fn frame_size(format: PixelFormat, width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    match format {
        PixelFormat::Rgba8888 => w * h * 4,
        PixelFormat::Yuv420 => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
        PixelFormat::Private => 0,
    }
}

/// Format name for logs and display
pub fn format_name(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Rgba8888 => "RGBA_8888",
        PixelFormat::Yuv420 => "YUV_420_888",
        PixelFormat::Private => "PRIVATE",
    }
}

/// Every format known to the crate
pub const ALL_FORMATS: [PixelFormat; 3] = [
    PixelFormat::Rgba8888,
    PixelFormat::Yuv420,
    PixelFormat::Private,
];
