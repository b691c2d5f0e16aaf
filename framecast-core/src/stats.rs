//! Session counters
//!
//! Updated on the dispatch queue, read from anywhere.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one capture session
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_delivered: AtomicU64,
    rgba_frames: AtomicU64,
    i420_frames: AtomicU64,
    frames_dropped: AtomicU64,
    pools_created: AtomicU64,
    pools_closed: AtomicU64,
    recreations: AtomicU64,
    format_fallbacks: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Frames handed to the consumer
    pub frames_delivered: u64,
    pub rgba_frames: u64,
    pub i420_frames: u64,
    /// Frames acquired after the session was destroyed
    pub frames_dropped: u64,
    pub pools_created: u64,
    pub pools_closed: u64,
    /// Pools created to replace a newer-but-different configuration
    pub recreations: u64,
    /// Recreations caused by a format mismatch
    pub format_fallbacks: u64,
}

impl StatsSnapshot {
    /// Pools still holding platform resources
    pub fn live_pools(&self) -> u64 {
        self.pools_created.saturating_sub(self.pools_closed)
    }

    /// One-line summary for logs
    pub fn format_summary(&self) -> String {
        format!(
            "delivered={} (rgba={} i420={}) dropped={} pools={}/{} recreations={} fallbacks={}",
            self.frames_delivered,
            self.rgba_frames,
            self.i420_frames,
            self.frames_dropped,
            self.live_pools(),
            self.pools_created,
            self.recreations,
            self.format_fallbacks
        )
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rgba(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.rgba_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_i420(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.i420_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_created(&self) {
        self.pools_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_closed(&self) {
        self.pools_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recreation(&self) {
        self.recreations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_format_fallback(&self) {
        self.format_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            rgba_frames: self.rgba_frames.load(Ordering::Relaxed),
            i420_frames: self.i420_frames.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            pools_created: self.pools_created.load(Ordering::Relaxed),
            pools_closed: self.pools_closed.load(Ordering::Relaxed),
            recreations: self.recreations.load(Ordering::Relaxed),
            format_fallbacks: self.format_fallbacks.load(Ordering::Relaxed),
        }
    }
}
