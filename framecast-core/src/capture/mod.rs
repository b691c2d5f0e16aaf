//! Screen-capture buffer pipeline
//!
//! This module handles:
//! - Bounded frame buffer pools with drain-based close
//! - The session controller that swaps pools across resizes
//! - Grant and service-readiness exchange with outside collaborators

pub mod frame;
pub mod grant;
pub mod pool;
pub mod session;

pub use frame::{Frame, I420Frame, ReleaseCallback, RgbaFrame};
pub use grant::{GrantSlot, ServiceReadyGate};
pub use pool::{FrameBufferPool, PoolEvent, PoolState, Releaser};
pub use session::{CaptureSession, PoolSnapshot, SessionDeps, SessionEvent, SessionState};
