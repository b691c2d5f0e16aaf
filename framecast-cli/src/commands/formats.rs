//! Formats command - show pixel formats and the fallback table

use anyhow::Result;
use framecast_core::formats::{self, ALL_FORMATS};

/// Print every pixel format with its layout and fallback
pub async fn formats() -> Result<()> {
    println!("framecast - Pixel Formats\n");
    println!(
        "  {:<12} {:>6} {:>5} {:>12}  {}",
        "FORMAT", "PLANES", "BPP", "1080p BYTES", "FALLBACK"
    );

    for format in ALL_FORMATS {
        let fallback = match formats::fallback_format(format) {
            Some(next) => formats::format_name(next),
            None if formats::is_deliverable(format) => "(none)",
            None => "(not deliverable)",
        };
        println!(
            "  {:<12} {:>6} {:>5} {:>12}  {}",
            formats::format_name(format),
            formats::plane_count(format),
            formats::bytes_per_pixel(format),
            formats::frame_size(format, 1920, 1080),
            fallback
        );
    }

    println!();
    println!("A pool whose producer rejects its format is replaced once with the fallback.");

    Ok(())
}
