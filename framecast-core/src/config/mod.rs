//! Configuration types for framecast
//!
//! Provides pool sizing, session defaults, and runtime configuration.

mod file;

pub use file::{sample_config, ConfigFile};

use crate::types::PixelFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Buffers a pool may have checked out at once
pub const DEFAULT_MAX_IMAGES: usize = 2;

/// Upper bound accepted by `validate_strict`
pub const MAX_IMAGES_LIMIT: usize = 8;

/// Complete capture session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Maximum buffers a pool hands out before acquisition backs off
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    /// Pixel format of the first pool in a session
    #[serde(default)]
    pub default_format: PixelFormat,
    /// Name of the dispatch thread
    #[serde(default = "default_thread_name")]
    pub dispatch_thread_name: String,
    /// Name given to the display sink
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// How long `start_capture` waits for the service gate (0 = forever)
    #[serde(default)]
    pub service_ready_timeout_ms: u64,
    /// Capacity of the session event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_images() -> usize {
    DEFAULT_MAX_IMAGES
}

fn default_thread_name() -> String {
    "framecast-capture".to_string()
}

fn default_display_name() -> String {
    "framecast-display".to_string()
}

fn default_event_capacity() -> usize {
    16
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_images: DEFAULT_MAX_IMAGES,
            default_format: PixelFormat::default(),
            dispatch_thread_name: default_thread_name(),
            display_name: default_display_name(),
            service_ready_timeout_ms: 0,
            event_capacity: default_event_capacity(),
        }
    }
}

impl CaptureConfig {
    /// Build a runtime configuration from the loaded config file
    pub fn from_file(file: &ConfigFile) -> Self {
        let mut config = Self::default()
            .with_max_images(file.pool.max_images)
            .with_service_ready_timeout_ms(file.session.service_ready_timeout_ms)
            .with_display_name(file.session.display_name.clone());

        match file.pool.format.parse::<PixelFormat>() {
            Ok(format) => config.default_format = format,
            Err(e) => tracing::warn!("{}, keeping {}", e, config.default_format),
        }

        config
    }

    /// Set the pool depth
    pub fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = max_images;
        self
    }

    /// Set the initial pixel format
    pub fn with_default_format(mut self, format: PixelFormat) -> Self {
        self.default_format = format;
        self
    }

    /// Set the dispatch thread name
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.dispatch_thread_name = name.into();
        self
    }

    /// Set the display sink name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set the service gate timeout in milliseconds (0 waits forever)
    pub fn with_service_ready_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.service_ready_timeout_ms = timeout_ms;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Service gate timeout, `None` when waiting indefinitely
    pub fn service_ready_timeout(&self) -> Option<Duration> {
        match self.service_ready_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.max_images > DEFAULT_MAX_IMAGES {
            warnings.push(format!(
                "max_images {} holds more buffers per pool than the usual {}; memory use grows with every pending resize",
                self.max_images, DEFAULT_MAX_IMAGES
            ));
        }

        if self.default_format == PixelFormat::Yuv420 {
            warnings.push(
                "Starting in YUV_420_888 skips RGBA negotiation; there is no further fallback"
                    .to_string(),
            );
        }

        if (1..100).contains(&self.service_ready_timeout_ms) {
            warnings.push(format!(
                "service_ready_timeout_ms {} is very short; the service may not come up in time",
                self.service_ready_timeout_ms
            ));
        }

        warnings
    }

    /// Validate and return an error if configuration is invalid
    ///
    /// Unlike `validate()` which returns warnings, this returns hard errors
    /// for configurations that cannot work.
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.max_images == 0 {
            return Err("max_images must be at least 1".to_string());
        }

        if self.max_images > MAX_IMAGES_LIMIT {
            return Err(format!(
                "max_images {} exceeds maximum supported ({})",
                self.max_images, MAX_IMAGES_LIMIT
            ));
        }

        if self.default_format == PixelFormat::Private {
            return Err("default_format PRIVATE cannot be read back by a pool".to_string());
        }

        if self.event_capacity == 0 {
            return Err("event_capacity must be at least 1".to_string());
        }

        if self.dispatch_thread_name.is_empty() {
            return Err("dispatch_thread_name cannot be empty".to_string());
        }

        Ok(())
    }
}
