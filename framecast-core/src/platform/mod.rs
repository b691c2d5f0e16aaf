//! Platform seams
//!
//! The capture pipeline talks to the operating system only through these
//! traits: a bounded image source and its factory, the projection that
//! backs a capture grant, the display sink frames are rendered into, the
//! host window, and the consumer that receives frames.
//!
//! [`sim`] implements all of them in memory.

pub mod sim;

use std::sync::Arc;

use crate::capture::frame::{I420Frame, RgbaFrame};
use crate::error::{CaptureError, Result};
use crate::types::{
    CaptureGrant, CaptureState, Handle, Image, ImageId, PixelFormat, SurfaceHandle, WindowContext,
};

/// Invoked by an image source when a new buffer may be acquired
pub type ImageAvailableCallback = Arc<dyn Fn() + Send + Sync>;

/// Invoked when the captured content changes size
pub type ContentResizeCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Invoked when the platform stops the projection
pub type StopCallback = Arc<dyn Fn() + Send + Sync>;

/// Work that must run on the host's UI thread
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Result of asking an image source for its newest buffer
#[derive(Debug)]
pub enum AcquireOutcome {
    /// A buffer was checked out
    Ready(Image),
    /// Nothing new has been produced
    Empty,
    /// The source already has its maximum number of buffers checked out
    WouldBlock,
    /// The producer wrote a layout other than the one the source expects
    FormatMismatch {
        /// Format the producer actually wrote
        produced: PixelFormat,
    },
}

/// Bounded buffer producer behind one surface
pub trait ImageSource: Send {
    /// Write target to bind to a display sink
    fn surface(&self) -> SurfaceHandle;

    /// Check out the newest produced buffer, dropping older unread ones
    fn acquire_latest(&mut self) -> AcquireOutcome;

    /// Give a checked-out buffer back
    fn release_image(&mut self, id: ImageId);

    /// Release every platform resource; outstanding buffers become invalid
    fn close(&mut self);
}

/// Allocates image sources
pub trait ImageSourceFactory: Send + Sync {
    /// Create a source producing `max_images` buffers shaped like `state`
    fn create_source(
        &self,
        state: &CaptureState,
        max_images: usize,
        on_available: ImageAvailableCallback,
    ) -> Result<Box<dyn ImageSource>>;
}

/// Virtual display frames are rendered into
pub trait DisplaySink: Send {
    fn resize(&mut self, width: u32, height: u32, dpi: u32);

    /// Point the display at another surface
    fn set_surface(&mut self, surface: SurfaceHandle);

    fn release(&mut self);
}

/// Callbacks a projection reports through
#[derive(Clone)]
pub struct ProjectionCallbacks {
    pub on_stop: StopCallback,
    pub on_content_resize: ContentResizeCallback,
}

/// Active capture projection backing one grant
pub trait MediaProjection: Send {
    fn register_callbacks(&mut self, callbacks: ProjectionCallbacks);

    /// Create the display sink rendering into `surface`
    fn create_display(
        &mut self,
        name: &str,
        state: &CaptureState,
        surface: SurfaceHandle,
    ) -> Result<Box<dyn DisplaySink>>;

    fn stop(&mut self);
}

/// System service turning grants into projections
pub trait ProjectionManager: Send + Sync {
    /// Fails with [`CaptureError::NoProjection`] when the grant is unusable
    /// or the service is unavailable
    fn projection_for(&self, grant: CaptureGrant) -> Result<Box<dyn MediaProjection>>;
}

/// Registration id of a host observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub Handle);

/// Receives host document and configuration changes
pub trait HostObserver: Send + Sync {
    /// The document moved to another window
    fn on_window_changed(&self);

    /// The OS reported a configuration change (density, orientation, ...)
    fn on_configuration_changed(&self);

    /// Content visibility changed
    fn on_visibility_changed(&self, _visible: bool) {}
}

/// Host document and window provider
pub trait HostWindow: Send + Sync {
    /// Current window context, if the document is attached to one
    fn window_context(&self) -> Option<WindowContext>;

    /// Must be called on the UI thread
    fn add_observer(&self, observer: Arc<dyn HostObserver>) -> ObserverId;

    /// Must be called on the UI thread
    fn remove_observer(&self, id: ObserverId);

    /// Run `task` on the UI thread
    fn post_ui_task(&self, task: UiTask) {
        task();
    }

    /// Run `task` on the UI thread and return once it has finished
    fn run_ui_task_sync(&self, task: UiTask) {
        task();
    }
}

/// Receives frames; every frame's release callback must eventually run
pub trait FrameConsumer: Send + Sync {
    fn on_rgba_frame(&self, frame: RgbaFrame);

    fn on_i420_frame(&self, frame: I420Frame);

    /// The platform stopped the projection
    fn on_stop(&self) {}

    /// The session hit an unrecoverable error and is being torn down
    fn on_error(&self, _error: &CaptureError) {}
}
