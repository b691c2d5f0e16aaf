//! framecast Core Library
//!
//! Screen-capture frame buffer pooling and capture session control.
//!
//! This library provides:
//! - Bounded frame buffer pools that close only once drained
//! - A capture session controller that swaps pools across resizes
//! - Platform traits plus an in-memory simulated platform
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Display Sink    │───▶│ FrameBufferPool  │───▶│ FrameConsumer   │
//! │ (projection)    │    │ (dispatch queue) │    │ (release cb)    │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod formats;
pub mod platform;
pub mod stats;
pub mod types;

pub use capture::{CaptureSession, FrameBufferPool, SessionDeps, SessionEvent, SessionState};
pub use config::{CaptureConfig, ConfigFile};
pub use error::{CaptureError, Result};
pub use stats::StatsSnapshot;
pub use types::{CaptureGrant, CaptureState, CropRect, Handle, PixelFormat, WindowContext};
