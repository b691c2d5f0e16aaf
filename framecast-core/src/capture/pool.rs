//! Bounded frame buffer pool over one image source
//!
//! A pool is bound to a single [`CaptureState`] for its whole life and hands
//! out at most `max_images` buffers at a time. It closes either at once
//! (`close_now`) or as soon as the last outstanding buffer comes back
//! (`close`).
//!
//! Every method runs on the session's dispatch queue. Instead of calling
//! back into the session, operations return a [`PoolEvent`] for the caller
//! to act on.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::frame::{Frame, I420Frame, ReleaseCallback, RgbaFrame};
use crate::error::{CaptureError, Result};
use crate::formats;
use crate::platform::{AcquireOutcome, ImageAvailableCallback, ImageSource, ImageSourceFactory};
use crate::types::{CaptureState, Handle, Image, ImageId, PixelFormat, SurfaceHandle};

/// Routes a released buffer back to its pool
///
/// Called from whatever thread releases the frame; implementations post
/// the release onto the dispatch queue.
pub type Releaser = Arc<dyn Fn(Handle, ImageId) + Send + Sync>;

/// Pool lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Acquiring and delivering buffers
    Open,
    /// Waiting for outstanding buffers before closing
    Closing,
    /// Platform resources released
    Closed,
}

/// Something the owner of the pool has to act on
#[derive(Debug)]
pub enum PoolEvent {
    /// A buffer was acquired and wrapped for delivery
    Frame(Frame),
    /// The pool reached `Closed`
    Closed,
    /// The producer rejected this pool's format; an equivalent pool with
    /// the carried state should replace it
    RecreateRequested(CaptureState),
}

/// Bounded pool of frame buffers from one image source
pub struct FrameBufferPool {
    id: Handle,
    state: CaptureState,
    max_images: usize,
    surface: SurfaceHandle,
    source: Option<Box<dyn ImageSource>>,
    acquired: BTreeSet<ImageId>,
    lifecycle: PoolState,
    releaser: Releaser,
    frames_emitted: u64,
}

impl FrameBufferPool {
    /// Allocate the image source for `state`
    ///
    /// `on_available` is handed to the source and must schedule
    /// [`on_image_available`](Self::on_image_available) on the dispatch
    /// queue.
    pub fn new(
        id: Handle,
        state: CaptureState,
        max_images: usize,
        factory: &dyn ImageSourceFactory,
        on_available: ImageAvailableCallback,
        releaser: Releaser,
    ) -> Result<Self> {
        let source = factory
            .create_source(&state, max_images, on_available)
            .map_err(|e| e.with_context(format!("Creating image source for {}", state)))?;
        let surface = source.surface();

        debug!("Pool {} created for {} ({} buffers)", id, state, max_images);

        Ok(Self {
            id,
            state,
            max_images,
            surface,
            source: Some(source),
            acquired: BTreeSet::new(),
            lifecycle: PoolState::Open,
            releaser,
            frames_emitted: 0,
        })
    }

    pub fn id(&self) -> Handle {
        self.id
    }

    /// Configuration this pool was created with
    pub fn capture_state(&self) -> CaptureState {
        self.state
    }

    /// Write target to bind to the display sink
    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    /// Buffers currently checked out to the consumer
    pub fn acquired_count(&self) -> usize {
        self.acquired.len()
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    pub fn lifecycle(&self) -> PoolState {
        self.lifecycle
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle == PoolState::Closed
    }

    /// Frames emitted over the pool's life
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Close once drained
    ///
    /// Returns `Closed` when nothing is outstanding; otherwise the pool
    /// moves to `Closing` and the last `release_buffer` reports `Closed`.
    pub fn close(&mut self) -> Option<PoolEvent> {
        match self.lifecycle {
            PoolState::Open if self.acquired.is_empty() => {
                self.release_resources();
                Some(PoolEvent::Closed)
            }
            PoolState::Open => {
                debug!(
                    "Pool {} closing after {} outstanding buffer(s)",
                    self.id,
                    self.acquired.len()
                );
                self.lifecycle = PoolState::Closing;
                None
            }
            PoolState::Closing | PoolState::Closed => None,
        }
    }

    /// Close immediately, invalidating outstanding buffers
    ///
    /// Only for teardown, once nothing downstream can touch those buffers.
    pub fn close_now(&mut self) -> Option<PoolEvent> {
        if self.is_closed() {
            return None;
        }
        if !self.acquired.is_empty() {
            debug!(
                "Pool {} force-closed with {} outstanding buffer(s)",
                self.id,
                self.acquired.len()
            );
        }
        self.release_resources();
        Some(PoolEvent::Closed)
    }

    /// Pull the newest buffer if there is room for it
    ///
    /// A full pool, an empty source and a source-side limit are all
    /// `Ok(None)`. A format mismatch is an error the caller maps to a
    /// fallback.
    pub fn try_acquire(&mut self) -> Result<Option<Image>> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };

        if self.acquired.len() >= self.max_images {
            trace!("Pool {} full ({} buffers)", self.id, self.acquired.len());
            return Ok(None);
        }

        match source.acquire_latest() {
            AcquireOutcome::Ready(image) => {
                self.acquired.insert(image.id);
                Ok(Some(image))
            }
            AcquireOutcome::Empty => Ok(None),
            AcquireOutcome::WouldBlock => {
                trace!("Pool {} source at its buffer limit", self.id);
                Ok(None)
            }
            AcquireOutcome::FormatMismatch { produced } => {
                debug!(
                    "Pool {} expected {} but producer wrote {}",
                    self.id, self.state.format, produced
                );
                Err(CaptureError::FormatMismatch {
                    expected: self.state.format,
                })
            }
        }
    }

    /// Give a buffer back to the source
    ///
    /// Completes a deferred close, or otherwise retries acquisition since
    /// a buffer may have arrived while the pool was full.
    pub fn release_buffer(&mut self, image: ImageId) -> Result<Option<PoolEvent>> {
        if self.is_closed() {
            trace!("Pool {} already closed, ignoring release of {}", self.id, image);
            return Ok(None);
        }

        if !self.acquired.remove(&image) {
            warn!("Pool {} asked to release unknown buffer {}", self.id, image);
            return Ok(None);
        }

        if let Some(source) = self.source.as_mut() {
            source.release_image(image);
        }

        if self.lifecycle == PoolState::Closing && self.acquired.is_empty() {
            self.release_resources();
            return Ok(Some(PoolEvent::Closed));
        }

        self.on_image_available()
    }

    /// Handle the source's "buffer available" notification
    pub fn on_image_available(&mut self) -> Result<Option<PoolEvent>> {
        let image = match self.try_acquire() {
            Ok(Some(image)) => image,
            Ok(None) => return Ok(None),
            Err(CaptureError::FormatMismatch { expected }) => {
                return match formats::fallback_format(expected) {
                    Some(fallback) => {
                        warn!(
                            "Pool {} cannot read {}, requesting {} instead",
                            self.id, expected, fallback
                        );
                        Ok(Some(PoolEvent::RecreateRequested(
                            self.state.with_format(fallback),
                        )))
                    }
                    None => Err(CaptureError::FormatFallbackExhausted(expected)),
                };
            }
            Err(e) => return Err(e),
        };

        let id = image.id;
        let frame = match self.wrap(image) {
            Ok(frame) => frame,
            Err(e) => {
                // Undeliverable buffers go straight back to the source
                self.acquired.remove(&id);
                if let Some(source) = self.source.as_mut() {
                    source.release_image(id);
                }
                return Err(e);
            }
        };
        self.frames_emitted += 1;
        Ok(Some(PoolEvent::Frame(frame)))
    }

    fn wrap(&self, image: Image) -> Result<Frame> {
        let expected_planes = formats::plane_count(image.format);
        if expected_planes == 0 || image.planes.len() < expected_planes {
            return Err(CaptureError::UnsupportedFormat(image.format));
        }

        let release = {
            let releaser = self.releaser.clone();
            let pool = self.id;
            let id = image.id;
            ReleaseCallback::new(move || releaser(pool, id))
        };

        let mut planes = image.planes.into_iter();
        let frame = match image.format {
            PixelFormat::Rgba8888 => {
                let Some(plane) = planes.next() else {
                    return Err(CaptureError::UnsupportedFormat(image.format));
                };
                Frame::Rgba(RgbaFrame {
                    pool: self.id,
                    release,
                    timestamp_ns: image.timestamp_ns,
                    width: image.width,
                    height: image.height,
                    data: plane.data,
                    stride: plane.row_stride,
                    crop: image.crop,
                })
            }
            PixelFormat::Yuv420 => {
                let (Some(y), Some(u), Some(v)) = (planes.next(), planes.next(), planes.next())
                else {
                    return Err(CaptureError::UnsupportedFormat(image.format));
                };
                Frame::I420(I420Frame {
                    pool: self.id,
                    release,
                    timestamp_ns: image.timestamp_ns,
                    width: image.width,
                    height: image.height,
                    y_stride: y.row_stride,
                    uv_row_stride: u.row_stride,
                    uv_pixel_stride: u.pixel_stride,
                    y: y.data,
                    u: u.data,
                    v: v.data,
                    crop: image.crop,
                })
            }
            PixelFormat::Private => return Err(CaptureError::UnsupportedFormat(image.format)),
        };

        trace!("Pool {} emitting buffer {}", self.id, image.id);
        Ok(frame)
    }

    fn release_resources(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.acquired.clear();
        self.lifecycle = PoolState::Closed;
        debug!("Pool {} closed ({} frames)", self.id, self.frames_emitted);
    }
}

impl Drop for FrameBufferPool {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.release_resources();
        }
    }
}

impl std::fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBufferPool")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("acquired", &self.acquired.len())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
