//! In-memory simulated platform
//!
//! Implements every platform trait without touching the OS. A
//! [`SimPlatform`] plays the image-source factory, the projection service
//! and the producer: [`SimPlatform::render_frame`] writes a synthetic frame
//! into whatever surface the display sink is currently bound to. A
//! [`SimHost`] stands in for the host window.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace};

use super::{
    AcquireOutcome, DisplaySink, HostObserver, HostWindow, ImageAvailableCallback, ImageSource,
    ImageSourceFactory, MediaProjection, ObserverId, ProjectionCallbacks, ProjectionManager,
    UiTask,
};
use crate::error::{CaptureError, Result};
use crate::types::{
    CaptureGrant, CaptureState, CropRect, Handle, Image, ImageId, PixelFormat, Plane,
    SurfaceHandle, WindowContext,
};

/// Nanoseconds between simulated frames (60 Hz)
pub const FRAME_INTERVAL_NS: i64 = 16_666_667;

struct SourceState {
    state: CaptureState,
    max_images: usize,
    pending: VecDeque<Image>,
    acquired: HashSet<ImageId>,
    next_id: u64,
    closed: bool,
    on_available: ImageAvailableCallback,
}

#[derive(Debug, Clone, Default)]
struct DisplayState {
    name: String,
    width: u32,
    height: u32,
    dpi: u32,
    surface: Option<SurfaceHandle>,
    resizes: Vec<(u32, u32, u32)>,
    rebinds: usize,
    release_calls: usize,
}

/// What the display sink looks like right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplaySnapshot {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    /// Bound surface; `None` once released
    pub surface: Option<SurfaceHandle>,
    /// Every `resize` call, in order
    pub resizes: Vec<(u32, u32, u32)>,
    /// Number of `set_surface` calls
    pub rebinds: usize,
    pub release_calls: usize,
}

struct ProjectionShared {
    grant: CaptureGrant,
    callbacks: Mutex<Option<ProjectionCallbacks>>,
    display: Mutex<Option<Arc<Mutex<DisplayState>>>>,
    stop_calls: AtomicUsize,
}

#[derive(Default)]
struct SimShared {
    surfaces: Mutex<HashMap<SurfaceHandle, Arc<Mutex<SourceState>>>>,
    producer_format: Mutex<Option<PixelFormat>>,
    fail_allocation: AtomicBool,
    deny_projection: AtomicBool,
    projection: Mutex<Option<Arc<ProjectionShared>>>,
    frame_counter: AtomicU64,
    sources_created: AtomicU64,
    sources_closed: AtomicU64,
    created_states: Mutex<Vec<CaptureState>>,
}

/// Simulated image-source factory, projection service and producer
#[derive(Clone, Default)]
pub struct SimPlatform {
    shared: Arc<SimShared>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the producer write `format` regardless of what sources expect
    /// (`None` writes whatever the bound source asks for)
    pub fn set_producer_format(&self, format: Option<PixelFormat>) {
        *self.shared.producer_format.lock() = format;
    }

    /// Make every subsequent source allocation fail
    pub fn set_fail_allocation(&self, fail: bool) {
        self.shared.fail_allocation.store(fail, Ordering::SeqCst);
    }

    /// Reject every subsequent grant
    pub fn set_deny_projection(&self, deny: bool) {
        self.shared.deny_projection.store(deny, Ordering::SeqCst);
    }

    fn projection(&self) -> Option<Arc<ProjectionShared>> {
        self.shared.projection.lock().clone()
    }

    fn callbacks(&self) -> Option<ProjectionCallbacks> {
        self.projection()
            .and_then(|p| p.callbacks.lock().clone())
    }

    /// Render one frame into the surface the display is bound to
    ///
    /// Returns `false` when no live surface is bound.
    pub fn render_frame(&self) -> bool {
        let Some(display) = self.projection().and_then(|p| p.display.lock().clone()) else {
            return false;
        };
        let (surface, width, height) = {
            let d = display.lock();
            match d.surface {
                Some(surface) => (surface, d.width, d.height),
                None => return false,
            }
        };
        let Some(source) = self.shared.surfaces.lock().get(&surface).cloned() else {
            trace!("Display bound to a closed surface");
            return false;
        };

        let producer_format = *self.shared.producer_format.lock();
        let index = self.shared.frame_counter.fetch_add(1, Ordering::Relaxed);

        let on_available = {
            let mut s = source.lock();
            if s.closed {
                return false;
            }
            s.next_id += 1;
            let id = ImageId(s.next_id);
            let format = producer_format.unwrap_or(s.state.format);
            let image = synth_image(id, format, width, height, index);
            if s.pending.len() >= s.max_images {
                s.pending.pop_front();
            }
            s.pending.push_back(image);
            s.on_available.clone()
        };

        on_available();
        true
    }

    /// Report that the captured content changed size
    pub fn resize_content(&self, width: u32, height: u32) -> bool {
        match self.callbacks() {
            Some(callbacks) => {
                (callbacks.on_content_resize)(width, height);
                true
            }
            None => false,
        }
    }

    /// Stop the projection from the platform side
    pub fn stop_projection(&self) -> bool {
        match self.callbacks() {
            Some(callbacks) => {
                (callbacks.on_stop)();
                true
            }
            None => false,
        }
    }

    /// Current display sink, if one was created
    pub fn display(&self) -> Option<DisplaySnapshot> {
        let display = self.projection()?.display.lock().clone()?;
        let d = display.lock();
        Some(DisplaySnapshot {
            name: d.name.clone(),
            width: d.width,
            height: d.height,
            dpi: d.dpi,
            surface: d.surface,
            resizes: d.resizes.clone(),
            rebinds: d.rebinds,
            release_calls: d.release_calls,
        })
    }

    /// Grant the current projection was created from
    pub fn granted(&self) -> Option<CaptureGrant> {
        self.projection().map(|p| p.grant.clone())
    }

    pub fn projection_stop_calls(&self) -> usize {
        self.projection()
            .map(|p| p.stop_calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Sources not yet closed
    pub fn live_sources(&self) -> usize {
        self.shared.surfaces.lock().len()
    }

    pub fn sources_created(&self) -> u64 {
        self.shared.sources_created.load(Ordering::SeqCst)
    }

    pub fn sources_closed(&self) -> u64 {
        self.shared.sources_closed.load(Ordering::SeqCst)
    }

    /// States of every source ever created, in order
    pub fn created_states(&self) -> Vec<CaptureState> {
        self.shared.created_states.lock().clone()
    }

    /// Buffers checked out across all live sources
    pub fn outstanding_buffers(&self) -> usize {
        self.shared
            .surfaces
            .lock()
            .values()
            .map(|s| s.lock().acquired.len())
            .sum()
    }
}

fn synth_image(id: ImageId, format: PixelFormat, width: u32, height: u32, index: u64) -> Image {
    let (w, h) = (width as usize, height as usize);
    let planes = match format {
        PixelFormat::Rgba8888 => {
            let color = 0xff00_0000 | ((index as u32).wrapping_mul(0x0001_0203) & 0x00ff_ffff);
            let pixels = vec![color; w * h];
            vec![Plane {
                data: Bytes::from(bytemuck::cast_slice::<u32, u8>(&pixels).to_vec()),
                row_stride: width * 4,
                pixel_stride: 4,
            }]
        }
        PixelFormat::Yuv420 => {
            let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
            let luma = 16 + (index % 220) as u8;
            vec![
                Plane {
                    data: Bytes::from(vec![luma; w * h]),
                    row_stride: width,
                    pixel_stride: 1,
                },
                Plane {
                    data: Bytes::from(vec![128u8; cw * ch]),
                    row_stride: cw as u32,
                    pixel_stride: 1,
                },
                Plane {
                    data: Bytes::from(vec![128u8; cw * ch]),
                    row_stride: cw as u32,
                    pixel_stride: 1,
                },
            ]
        }
        PixelFormat::Private => Vec::new(),
    };

    Image {
        id,
        format,
        width,
        height,
        timestamp_ns: index as i64 * FRAME_INTERVAL_NS,
        crop: CropRect::full(width, height),
        planes,
    }
}

struct SimImageSource {
    surface: SurfaceHandle,
    source: Arc<Mutex<SourceState>>,
    platform: Arc<SimShared>,
}

impl ImageSource for SimImageSource {
    fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    fn acquire_latest(&mut self) -> AcquireOutcome {
        let mut s = self.source.lock();
        if s.closed {
            return AcquireOutcome::Empty;
        }
        if s.acquired.len() >= s.max_images {
            return AcquireOutcome::WouldBlock;
        }
        let Some(image) = s.pending.pop_back() else {
            return AcquireOutcome::Empty;
        };
        s.pending.clear();

        if image.format != s.state.format {
            return AcquireOutcome::FormatMismatch {
                produced: image.format,
            };
        }
        s.acquired.insert(image.id);
        AcquireOutcome::Ready(image)
    }

    fn release_image(&mut self, id: ImageId) {
        self.source.lock().acquired.remove(&id);
    }

    fn close(&mut self) {
        {
            let mut s = self.source.lock();
            if s.closed {
                return;
            }
            s.closed = true;
            s.pending.clear();
            s.acquired.clear();
        }
        self.platform.surfaces.lock().remove(&self.surface);
        self.platform.sources_closed.fetch_add(1, Ordering::SeqCst);
        trace!("Simulated source {:?} closed", self.surface);
    }
}

impl ImageSourceFactory for SimPlatform {
    fn create_source(
        &self,
        state: &CaptureState,
        max_images: usize,
        on_available: ImageAvailableCallback,
    ) -> Result<Box<dyn ImageSource>> {
        if self.shared.fail_allocation.load(Ordering::SeqCst) {
            return Err(CaptureError::allocation(format!(
                "simulated allocation failure for {}",
                state
            )));
        }

        let surface = SurfaceHandle(Handle::new());
        let source = Arc::new(Mutex::new(SourceState {
            state: *state,
            max_images,
            pending: VecDeque::new(),
            acquired: HashSet::new(),
            next_id: 0,
            closed: false,
            on_available,
        }));
        self.shared.surfaces.lock().insert(surface, source.clone());
        self.shared.sources_created.fetch_add(1, Ordering::SeqCst);
        self.shared.created_states.lock().push(*state);

        Ok(Box::new(SimImageSource {
            surface,
            source,
            platform: self.shared.clone(),
        }))
    }
}

struct SimProjection {
    shared: Arc<ProjectionShared>,
}

impl MediaProjection for SimProjection {
    fn register_callbacks(&mut self, callbacks: ProjectionCallbacks) {
        *self.shared.callbacks.lock() = Some(callbacks);
    }

    fn create_display(
        &mut self,
        name: &str,
        state: &CaptureState,
        surface: SurfaceHandle,
    ) -> Result<Box<dyn DisplaySink>> {
        let display = Arc::new(Mutex::new(DisplayState {
            name: name.to_string(),
            width: state.width,
            height: state.height,
            dpi: state.dpi,
            surface: Some(surface),
            ..Default::default()
        }));
        *self.shared.display.lock() = Some(display.clone());
        debug!("Simulated display '{}' created at {}", name, state);
        Ok(Box::new(SimDisplay { state: display }))
    }

    fn stop(&mut self) {
        self.shared.stop_calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl ProjectionManager for SimPlatform {
    fn projection_for(&self, grant: CaptureGrant) -> Result<Box<dyn MediaProjection>> {
        if self.shared.deny_projection.load(Ordering::SeqCst) {
            return Err(CaptureError::projection(format!(
                "grant {} rejected",
                grant.token
            )));
        }

        let shared = Arc::new(ProjectionShared {
            grant,
            callbacks: Mutex::new(None),
            display: Mutex::new(None),
            stop_calls: AtomicUsize::new(0),
        });
        *self.shared.projection.lock() = Some(shared.clone());
        Ok(Box::new(SimProjection { shared }))
    }
}

struct SimDisplay {
    state: Arc<Mutex<DisplayState>>,
}

impl DisplaySink for SimDisplay {
    fn resize(&mut self, width: u32, height: u32, dpi: u32) {
        let mut d = self.state.lock();
        d.width = width;
        d.height = height;
        d.dpi = dpi;
        d.resizes.push((width, height, dpi));
    }

    fn set_surface(&mut self, surface: SurfaceHandle) {
        let mut d = self.state.lock();
        d.surface = Some(surface);
        d.rebinds += 1;
    }

    fn release(&mut self) {
        let mut d = self.state.lock();
        d.surface = None;
        d.release_calls += 1;
    }
}

/// Simulated host window
#[derive(Default)]
pub struct SimHost {
    context: RwLock<Option<WindowContext>>,
    observers: Mutex<Vec<(ObserverId, Arc<dyn HostObserver>)>>,
    ui_tasks: AtomicUsize,
    ui_sync_tasks: AtomicUsize,
}

impl SimHost {
    pub fn new(context: Option<WindowContext>) -> Self {
        Self {
            context: RwLock::new(context),
            ..Default::default()
        }
    }

    /// Change what `window_context` resolves to
    pub fn set_context(&self, context: Option<WindowContext>) {
        *self.context.write() = context;
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Posted UI tasks run so far
    pub fn ui_tasks_run(&self) -> usize {
        self.ui_tasks.load(Ordering::SeqCst)
    }

    /// Blocking UI tasks run so far
    pub fn ui_sync_tasks_run(&self) -> usize {
        self.ui_sync_tasks.load(Ordering::SeqCst)
    }

    fn observers(&self) -> Vec<Arc<dyn HostObserver>> {
        self.observers
            .lock()
            .iter()
            .map(|(_, o)| o.clone())
            .collect()
    }

    pub fn fire_configuration_changed(&self) {
        for observer in self.observers() {
            observer.on_configuration_changed();
        }
    }

    pub fn fire_window_changed(&self) {
        for observer in self.observers() {
            observer.on_window_changed();
        }
    }

    pub fn fire_visibility_changed(&self, visible: bool) {
        for observer in self.observers() {
            observer.on_visibility_changed(visible);
        }
    }
}

impl HostWindow for SimHost {
    fn window_context(&self) -> Option<WindowContext> {
        *self.context.read()
    }

    fn add_observer(&self, observer: Arc<dyn HostObserver>) -> ObserverId {
        let id = ObserverId(Handle::new());
        self.observers.lock().push((id, observer));
        id
    }

    fn remove_observer(&self, id: ObserverId) {
        self.observers.lock().retain(|(existing, _)| *existing != id);
    }

    fn post_ui_task(&self, task: UiTask) {
        self.ui_tasks.fetch_add(1, Ordering::SeqCst);
        task();
    }

    fn run_ui_task_sync(&self, task: UiTask) {
        self.ui_sync_tasks.fetch_add(1, Ordering::SeqCst);
        task();
    }
}
