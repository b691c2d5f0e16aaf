//! Mock infrastructure for testing
//!
//! Provides a recording frame consumer and a harness wiring a capture
//! session to the simulated platform.

#![allow(dead_code)]

use framecast_core::capture::{
    CaptureSession, Frame, GrantSlot, I420Frame, RgbaFrame, ServiceReadyGate, SessionDeps,
    SessionEvent,
};
use framecast_core::config::CaptureConfig;
use framecast_core::error::CaptureError;
use framecast_core::platform::FrameConsumer;
use framecast_core::platform::sim::{SimHost, SimPlatform};
use framecast_core::types::{CaptureGrant, CropRect, Handle, PixelFormat, WindowContext};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// What the consumer saw for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub pool: Handle,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub crop: CropRect,
    pub timestamp_ns: i64,
    /// Bytes across all planes
    pub bytes: usize,
}

/// Frame consumer that records every frame
///
/// In hold mode frames are kept until the test releases them; otherwise
/// they are released as soon as they arrive.
#[derive(Default)]
pub struct RecordingConsumer {
    hold: AtomicBool,
    held: Mutex<Vec<Frame>>,
    delivered: Mutex<Vec<Delivered>>,
    stops: AtomicUsize,
    errors: Mutex<Vec<String>>,
}

impl RecordingConsumer {
    /// Consumer that releases frames immediately
    pub fn releasing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Consumer that keeps frames until told otherwise
    pub fn holding() -> Arc<Self> {
        let consumer = Self::default();
        consumer.hold.store(true, Ordering::SeqCst);
        Arc::new(consumer)
    }

    pub fn set_hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Pools of the frames currently held, oldest first
    pub fn held_pools(&self) -> Vec<Handle> {
        self.held.lock().iter().map(|f| f.pool()).collect()
    }

    /// Release the oldest held frame
    pub fn release_oldest(&self) -> bool {
        let frame = {
            let mut held = self.held.lock();
            if held.is_empty() {
                return false;
            }
            held.remove(0)
        };
        frame.release();
        true
    }

    /// Release every held frame
    pub fn release_all(&self) -> usize {
        let frames: Vec<Frame> = self.held.lock().drain(..).collect();
        let count = frames.len();
        for frame in frames {
            frame.release();
        }
        count
    }

    /// Drop every held frame without calling `release`
    pub fn drop_all(&self) {
        self.held.lock().clear();
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    fn record(&self, delivered: Delivered, frame: Frame) {
        self.delivered.lock().push(delivered);
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().push(frame);
        } else {
            frame.release();
        }
    }
}

impl FrameConsumer for RecordingConsumer {
    fn on_rgba_frame(&self, frame: RgbaFrame) {
        let delivered = Delivered {
            pool: frame.pool,
            format: PixelFormat::Rgba8888,
            width: frame.width,
            height: frame.height,
            crop: frame.crop,
            timestamp_ns: frame.timestamp_ns,
            bytes: frame.data.len(),
        };
        self.record(delivered, Frame::Rgba(frame));
    }

    fn on_i420_frame(&self, frame: I420Frame) {
        let delivered = Delivered {
            pool: frame.pool,
            format: PixelFormat::Yuv420,
            width: frame.width,
            height: frame.height,
            crop: frame.crop,
            timestamp_ns: frame.timestamp_ns,
            bytes: frame.y.len() + frame.u.len() + frame.v.len(),
        };
        self.record(delivered, Frame::I420(frame));
    }

    fn on_stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &CaptureError) {
        self.errors.lock().push(error.to_string());
    }
}

/// Simulated platform plus the collaborators a session needs
pub struct Harness {
    pub platform: SimPlatform,
    pub host: Arc<SimHost>,
    pub consumer: Arc<RecordingConsumer>,
    pub grants: Arc<GrantSlot>,
    pub gate: Arc<ServiceReadyGate>,
}

impl Harness {
    /// Harness whose host window is 1920x1080 at 320 dpi
    pub fn new(consumer: Arc<RecordingConsumer>) -> Self {
        Self::with_context(consumer, Some(WindowContext::new(320, (1920, 1080))))
    }

    pub fn with_context(consumer: Arc<RecordingConsumer>, context: Option<WindowContext>) -> Self {
        Self {
            platform: SimPlatform::new(),
            host: Arc::new(SimHost::new(context)),
            consumer,
            grants: Arc::new(GrantSlot::new()),
            gate: Arc::new(ServiceReadyGate::new()),
        }
    }

    pub fn deps(&self) -> SessionDeps {
        SessionDeps {
            sources: Arc::new(self.platform.clone()),
            projections: Arc::new(self.platform.clone()),
            host: self.host.clone(),
            consumer: self.consumer.clone(),
            grants: self.grants.clone(),
            service_gate: self.gate.clone(),
        }
    }

    /// Publish a grant and open the service gate
    pub fn make_ready(&self) {
        self.grants.publish(CaptureGrant::new(-1));
        self.gate.set_ready();
    }

    pub fn session(&self, config: CaptureConfig) -> CaptureSession {
        CaptureSession::new(config, self.deps()).expect("session should be created")
    }

    /// Create and start a session with `config`
    pub fn started(&self, config: CaptureConfig) -> CaptureSession {
        let session = self.session(config);
        self.make_ready();
        session.start_capture().expect("capture should start");
        session
    }

    /// Render one frame and wait for the session to process it
    pub fn render(&self, session: &CaptureSession) -> bool {
        let rendered = self.platform.render_frame();
        session.flush().expect("flush");
        rendered
    }
}

/// Collect every event received so far
pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
