//! Configuration file loading and merging
//!
//! Loads user configuration from `~/.config/framecast/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Frame buffer pool settings
    #[serde(default)]
    pub pool: PoolSettings,

    /// Session settings
    #[serde(default)]
    pub session: SessionSettings,

    /// Simulated platform settings used by `framecast simulate`
    #[serde(default)]
    pub simulate: SimulateSettings,
}

/// Frame buffer pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Buffers a pool may hand out at once
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Initial pixel format (rgba, yuv420)
    #[serde(default = "default_format")]
    pub format: String,
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Milliseconds to wait for the capture service (0 = forever)
    #[serde(default)]
    pub service_ready_timeout_ms: u64,

    /// Name given to the display sink
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

/// Simulated display settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateSettings {
    /// Maximum window width
    #[serde(default = "default_width")]
    pub width: u32,

    /// Maximum window height
    #[serde(default = "default_height")]
    pub height: u32,

    /// Display density
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    /// Frames per second to render
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_max_images() -> usize {
    super::DEFAULT_MAX_IMAGES
}

fn default_format() -> String {
    "rgba".to_string()
}

fn default_display_name() -> String {
    "framecast-display".to_string()
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_dpi() -> u32 {
    320
}

fn default_fps() -> u32 {
    30
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_images: default_max_images(),
            format: default_format(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            service_ready_timeout_ms: 0,
            display_name: default_display_name(),
        }
    }
}

impl Default for SimulateSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            dpi: default_dpi(),
            fps: default_fps(),
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("framecast").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("framecast")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/framecast/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| CaptureError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| CaptureError::Config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CaptureError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| CaptureError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_path();
        if path.exists() {
            return Ok(false);
        }

        let config = Self::default();
        config.save_to(path)?;
        Ok(true)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# framecast configuration

[pool]
# Buffers a pool may hand out before acquisition backs off (1-8)
max_images = 2

# Initial pixel format: rgba, yuv420
# rgba falls back to yuv420 if the producer rejects it
format = "rgba"

[session]
# Milliseconds to wait for the capture service before giving up (0 = forever)
service_ready_timeout_ms = 0

# Name given to the display sink
display_name = "framecast-display"

[simulate]
# Simulated window bounds and density
width = 1920
height = 1080
dpi = 320

# Frames per second rendered by `framecast simulate`
fps = 30
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();
        assert_eq!(config.pool.max_images, 2);
        assert_eq!(config.pool.format, "rgba");
        assert_eq!(config.simulate.dpi, 320);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = sample_config();
        let config: ConfigFile = toml::from_str(&sample).unwrap();
        assert_eq!(config.pool.max_images, 2);
        assert_eq!(config.session.display_name, "framecast-display");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ConfigFile = toml::from_str("[pool]\nmax_images = 3\n").unwrap();
        assert_eq!(config.pool.max_images, 3);
        assert_eq!(config.pool.format, "rgba");
        assert_eq!(config.simulate.width, 1920);
    }
}
