//! Capture session controller
//!
//! Owns the projection, the display sink and an ordered queue of frame
//! buffer pools. Resizes never pull a surface out from under the display:
//! a new pool is appended and bound first, and older pools are only asked
//! to close (drain-based) once the new one has produced a frame.
//!
//! ```text
//!  host / projection callbacks ──post──▶ ┌──────────────────────┐
//!  release callbacks (any thread) ─post─▶ │ dispatch queue       │──▶ FrameConsumer
//!  CaptureSession API ──────────sync────▶ │  CaptureEngine       │
//!                                         │  pools: [old.., new] │
//!                                         └──────────────────────┘
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use super::frame::Frame;
use super::grant::{GrantSlot, ServiceReadyGate};
use super::pool::{FrameBufferPool, PoolEvent, PoolState};
use crate::config::CaptureConfig;
use crate::dispatch::{DispatchHandle, DispatchQueue};
use crate::error::{CaptureError, Result};
use crate::platform::{
    DisplaySink, FrameConsumer, HostObserver, HostWindow, ImageSourceFactory, MediaProjection,
    ObserverId, ProjectionCallbacks, ProjectionManager,
};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::types::{CaptureState, Handle, ImageId, WindowContext};

/// Collaborators a session is wired to
#[derive(Clone)]
pub struct SessionDeps {
    pub sources: Arc<dyn ImageSourceFactory>,
    pub projections: Arc<dyn ProjectionManager>,
    pub host: Arc<dyn HostWindow>,
    pub consumer: Arc<dyn FrameConsumer>,
    pub grants: Arc<GrantSlot>,
    pub service_gate: Arc<ServiceReadyGate>,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, or a start attempt failed
    Idle,
    /// `start_capture` in progress
    Starting,
    /// First pool bound to the display sink
    Active,
    /// Torn down; terminal
    Destroyed,
}

/// Notifications published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started(CaptureState),
    PoolCreated { pool: Handle, state: CaptureState },
    PoolClosed { pool: Handle },
    Recreated { from: CaptureState, to: CaptureState },
    ProjectionStopped,
    Failed(String),
    Destroyed,
}

/// Read-only view of one pool in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub id: Handle,
    pub state: CaptureState,
    pub lifecycle: PoolState,
    pub acquired: usize,
}

/// State shared between the session handle, observers and the engine
struct Shared {
    session: Handle,
    state: Mutex<SessionState>,
    destroyed: AtomicBool,
    /// Latest host context; written by observers, read on the dispatch
    /// queue. A stale read only delays the density update.
    context: RwLock<Option<WindowContext>>,
    host: Arc<dyn HostWindow>,
    observer: Mutex<Option<ObserverId>>,
    stats: SessionStats,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Mark destroyed; returns false if it already was
    fn mark_destroyed(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.state.lock() = SessionState::Destroyed;
        true
    }

    fn refresh_context(&self) {
        match self.host.window_context() {
            Some(context) => *self.context.write() = Some(context),
            None => debug!("Session {} host context unavailable, keeping last", self.session),
        }
    }

    /// Register the host observer on the UI thread, waiting for it
    fn register_observer(&self, observer: Arc<dyn HostObserver>) -> Result<()> {
        let registered = Arc::new(Mutex::new(None));
        let slot = registered.clone();
        let host = self.host.clone();
        self.host.run_ui_task_sync(Box::new(move || {
            *slot.lock() = Some(host.add_observer(observer));
        }));

        let id = registered.lock().take().ok_or_else(|| {
            CaptureError::dispatch("host UI thread dropped observer registration")
        })?;
        *self.observer.lock() = Some(id);
        Ok(())
    }

    /// Unregister the host observer on the UI thread
    fn unregister_observer(&self) {
        if let Some(id) = self.observer.lock().take() {
            let host = self.host.clone();
            self.host.post_ui_task(Box::new(move || host.remove_observer(id)));
        }
    }
}

/// Host observer forwarding changes onto the dispatch queue
struct SessionObserver {
    shared: Weak<Shared>,
    queue: DispatchHandle<CaptureEngine>,
}

impl SessionObserver {
    fn context_changed(&self, reason: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.is_destroyed() {
            return;
        }
        trace!("Session {} {}", shared.session, reason);
        shared.refresh_context();
        self.queue.post(|engine| engine.on_configuration_changed());
    }
}

impl HostObserver for SessionObserver {
    fn on_window_changed(&self) {
        self.context_changed("window changed");
    }

    fn on_configuration_changed(&self) {
        self.context_changed("configuration changed");
    }

    fn on_visibility_changed(&self, visible: bool) {
        trace!("Content visibility changed: {}", visible);
    }
}

/// Session state owned by the dispatch thread
struct CaptureEngine {
    config: CaptureConfig,
    shared: Arc<Shared>,
    sources: Arc<dyn ImageSourceFactory>,
    consumer: Arc<dyn FrameConsumer>,
    queue: Option<DispatchHandle<CaptureEngine>>,
    projection: Option<Box<dyn MediaProjection>>,
    display: Option<Box<dyn DisplaySink>>,
    /// Oldest first; only the last one is open
    pools: VecDeque<FrameBufferPool>,
    torn_down: bool,
}

impl CaptureEngine {
    fn queue(&self) -> Result<DispatchHandle<CaptureEngine>> {
        self.queue
            .clone()
            .ok_or_else(|| CaptureError::dispatch("engine not attached to its queue"))
    }

    fn start(
        &mut self,
        mut projection: Box<dyn MediaProjection>,
        initial: CaptureState,
    ) -> Result<()> {
        if self.torn_down {
            return Err(CaptureError::SessionDestroyed);
        }

        let queue = self.queue()?;
        let on_stop = {
            let queue = queue.clone();
            Arc::new(move || {
                queue.post(|engine| engine.on_projection_stopped());
            })
        };
        let on_content_resize = Arc::new(move |width: u32, height: u32| {
            queue.post(move |engine| engine.on_content_resize(width, height));
        });
        projection.register_callbacks(ProjectionCallbacks {
            on_stop,
            on_content_resize,
        });

        let mut pool = match self.create_pool(initial) {
            Ok(pool) => pool,
            Err(e) => {
                projection.stop();
                return Err(e);
            }
        };

        let display =
            match projection.create_display(&self.config.display_name, &initial, pool.surface()) {
                Ok(display) => display,
                Err(e) => {
                    pool.close_now();
                    self.shared.stats.record_pool_closed();
                    projection.stop();
                    return Err(e);
                }
            };

        self.shared.emit(SessionEvent::PoolCreated {
            pool: pool.id(),
            state: initial,
        });
        self.pools.push_back(pool);
        self.projection = Some(projection);
        self.display = Some(display);
        Ok(())
    }

    fn create_pool(&self, state: CaptureState) -> Result<FrameBufferPool> {
        let queue = self.queue()?;
        let id = Handle::new();

        let on_available = {
            let queue = queue.clone();
            Arc::new(move || {
                queue.post(move |engine| engine.on_image_available(id));
            })
        };
        let releaser = Arc::new(move |pool: Handle, image: ImageId| {
            if !queue.post(move |engine| engine.release_buffer(pool, image)) {
                trace!("Release of {} after queue shutdown", image);
            }
        });

        let pool = FrameBufferPool::new(
            id,
            state,
            self.config.max_images,
            self.sources.as_ref(),
            on_available,
            releaser,
        )?;
        self.shared.stats.record_pool_created();
        Ok(pool)
    }

    fn position(&self, pool: Handle) -> Option<usize> {
        self.pools.iter().position(|p| p.id() == pool)
    }

    fn on_image_available(&mut self, pool: Handle) {
        if self.shared.is_destroyed() {
            return;
        }
        let Some(index) = self.position(pool) else {
            trace!("Image available on retired pool {}", pool);
            return;
        };
        let result = self.pools[index].on_image_available();
        self.handle_pool_result(pool, result);
    }

    fn release_buffer(&mut self, pool: Handle, image: ImageId) {
        let Some(index) = self.position(pool) else {
            trace!("Release of {} on retired pool {}", image, pool);
            return;
        };
        let result = self.pools[index].release_buffer(image);
        self.handle_pool_result(pool, result);
    }

    fn handle_pool_result(&mut self, pool: Handle, result: Result<Option<PoolEvent>>) {
        match result {
            Ok(None) => {}
            Ok(Some(PoolEvent::Frame(frame))) => self.deliver(pool, frame),
            Ok(Some(PoolEvent::Closed)) => self.retire(pool),
            Ok(Some(PoolEvent::RecreateRequested(state))) => {
                // A superseded pool carries stale geometry and is closing anyway
                if self.pools.back().map(|p| p.id()) != Some(pool) {
                    debug!(
                        "Ignoring {} fallback from superseded pool {}",
                        state.format, pool
                    );
                    return;
                }
                self.shared.stats.record_format_fallback();
                self.recreate_pool(state);
            }
            Err(e) if e.is_fatal() => self.fail(e),
            Err(e) => warn!("Pool {} error: {}", pool, e),
        }
    }

    fn deliver(&mut self, pool: Handle, frame: Frame) {
        if self.shared.is_destroyed() {
            // Dropping the frame posts its release; the pool is gone by then
            self.shared.stats.record_dropped();
            return;
        }

        self.close_pools_before(pool);

        match frame {
            Frame::Rgba(frame) => {
                self.shared.stats.record_rgba();
                self.consumer.on_rgba_frame(frame);
            }
            Frame::I420(frame) => {
                self.shared.stats.record_i420();
                self.consumer.on_i420_frame(frame);
            }
        }
    }

    /// Ask every pool older than `pool` to close once drained
    fn close_pools_before(&mut self, pool: Handle) {
        let Some(index) = self.position(pool) else {
            return;
        };
        for i in (0..index).rev() {
            if let Some(PoolEvent::Closed) = self.pools[i].close() {
                if let Some(closed) = self.pools.remove(i) {
                    self.record_closed(closed.id());
                }
            }
        }
    }

    fn retire(&mut self, pool: Handle) {
        if let Some(index) = self.position(pool) {
            self.pools.remove(index);
            self.record_closed(pool);
        }
    }

    fn record_closed(&self, pool: Handle) {
        debug!("Pool {} retired", pool);
        self.shared.stats.record_pool_closed();
        self.shared.emit(SessionEvent::PoolClosed { pool });
    }

    /// Switch to a pool for `state`, unless the newest already matches
    fn recreate_pool(&mut self, state: CaptureState) {
        if self.torn_down || self.shared.is_destroyed() {
            return;
        }
        let Some(previous) = self.pools.back().map(|p| p.capture_state()) else {
            warn!("Recreate requested before the first pool exists");
            return;
        };
        if previous == state {
            debug!("Pool already matches {}, skipping recreate", state);
            return;
        }
        if self.display.is_none() {
            warn!("Recreate requested without a display sink");
            return;
        }

        let pool = match self.create_pool(state) {
            Ok(pool) => pool,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        if let Some(display) = self.display.as_mut() {
            display.resize(state.width, state.height, state.dpi);
            display.set_surface(pool.surface());
        }

        info!("Capture reconfigured: {} -> {}", previous, state);
        self.shared.stats.record_recreation();
        self.shared.emit(SessionEvent::PoolCreated {
            pool: pool.id(),
            state,
        });
        self.shared.emit(SessionEvent::Recreated {
            from: previous,
            to: state,
        });
        self.pools.push_back(pool);
    }

    fn latest_dpi(&self, fallback: u32) -> u32 {
        let context = *self.shared.context.read();
        context.map(|c| c.density_dpi).unwrap_or(fallback)
    }

    fn on_configuration_changed(&mut self) {
        let Some(current) = self.pools.back().map(|p| p.capture_state()) else {
            return;
        };
        let dpi = self.latest_dpi(current.dpi);
        self.recreate_pool(current.with_dpi(dpi));
    }

    fn on_content_resize(&mut self, width: u32, height: u32) {
        let Some(current) = self.pools.back().map(|p| p.capture_state()) else {
            return;
        };
        debug!("Captured content resized to {}x{}", width, height);
        let dpi = self.latest_dpi(current.dpi);
        self.recreate_pool(CaptureState::new(width, height, dpi, current.format));
    }

    fn on_projection_stopped(&mut self) {
        if self.shared.is_destroyed() {
            return;
        }
        info!("Projection stopped by the platform");
        self.consumer.on_stop();
        self.shared.emit(SessionEvent::ProjectionStopped);
    }

    /// Release the projection, every pool and the display sink
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(mut projection) = self.projection.take() {
            projection.stop();
        }

        // Closing removes entries, so walk from the back
        for i in (0..self.pools.len()).rev() {
            if let Some(PoolEvent::Closed) = self.pools[i].close_now() {
                if let Some(closed) = self.pools.remove(i) {
                    self.record_closed(closed.id());
                }
            }
        }

        if let Some(mut display) = self.display.take() {
            display.release();
        }
        debug!("Session {} torn down", self.shared.session);
    }

    fn fail(&mut self, err: CaptureError) {
        error!("Capture session {} failed: {}", self.shared.session, err);
        let first = self.shared.mark_destroyed();
        if first {
            self.shared.unregister_observer();
            self.consumer.on_error(&err);
            self.shared.emit(SessionEvent::Failed(err.to_string()));
        }
        self.teardown();
        if first {
            self.shared.emit(SessionEvent::Destroyed);
        }
    }

    fn snapshot(&self) -> Vec<PoolSnapshot> {
        self.pools
            .iter()
            .map(|p| PoolSnapshot {
                id: p.id(),
                state: p.capture_state(),
                lifecycle: p.lifecycle(),
                acquired: p.acquired_count(),
            })
            .collect()
    }
}

/// Capture session controller
///
/// All pool work happens on a dedicated dispatch thread; the methods here
/// either post to it or wait for it.
pub struct CaptureSession {
    config: CaptureConfig,
    shared: Arc<Shared>,
    projections: Arc<dyn ProjectionManager>,
    grants: Arc<GrantSlot>,
    service_gate: Arc<ServiceReadyGate>,
    queue: DispatchQueue<CaptureEngine>,
}

impl CaptureSession {
    /// Create an idle session and its dispatch thread
    pub fn new(config: CaptureConfig, deps: SessionDeps) -> Result<Self> {
        config.validate_strict().map_err(CaptureError::Config)?;
        for warning in config.validate() {
            warn!("{}", warning);
        }

        let (events, _) = broadcast::channel(config.event_capacity);
        let shared = Arc::new(Shared {
            session: Handle::new(),
            state: Mutex::new(SessionState::Idle),
            destroyed: AtomicBool::new(false),
            context: RwLock::new(None),
            host: deps.host,
            observer: Mutex::new(None),
            stats: SessionStats::new(),
            events,
        });

        let engine = CaptureEngine {
            config: config.clone(),
            shared: shared.clone(),
            sources: deps.sources,
            consumer: deps.consumer,
            queue: None,
            projection: None,
            display: None,
            pools: VecDeque::new(),
            torn_down: false,
        };

        let queue = DispatchQueue::spawn(config.dispatch_thread_name.clone(), engine)?;
        let handle = queue.handle();
        queue.post(move |engine| engine.queue = Some(handle));

        debug!("Capture session {} created", shared.session);

        Ok(Self {
            config,
            shared,
            projections: deps.projections,
            grants: deps.grants,
            service_gate: deps.service_gate,
            queue,
        })
    }

    pub fn id(&self) -> Handle {
        self.shared.session
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Last resolved host window context
    pub fn window_context(&self) -> Option<WindowContext> {
        *self.shared.context.read()
    }

    /// Start capturing
    ///
    /// Consumes the pending grant and blocks until the service gate opens.
    /// On failure the session stays `Idle` and keeps nothing from the
    /// attempt; callers should abandon it.
    pub fn start_capture(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                SessionState::Idle => *state = SessionState::Starting,
                SessionState::Starting | SessionState::Active => {
                    return Err(CaptureError::SessionAlreadyStarted);
                }
                SessionState::Destroyed => return Err(CaptureError::SessionDestroyed),
            }
        }

        match self.try_start() {
            Ok(initial) => {
                let mut state = self.shared.state.lock();
                if *state == SessionState::Starting {
                    *state = SessionState::Active;
                }
                drop(state);
                info!("Capture session {} started at {}", self.id(), initial);
                self.shared.emit(SessionEvent::Started(initial));
                Ok(())
            }
            Err(e) => {
                warn!("Capture session {} failed to start: {}", self.id(), e);
                let mut state = self.shared.state.lock();
                if *state == SessionState::Starting {
                    *state = SessionState::Idle;
                }
                Err(e)
            }
        }
    }

    fn try_start(&self) -> Result<CaptureState> {
        let grant = self.grants.take().ok_or(CaptureError::NoGrant)?;

        match self.config.service_ready_timeout() {
            None => self.service_gate.wait(),
            Some(timeout) => {
                if !self.service_gate.wait_timeout(timeout) {
                    return Err(CaptureError::ServiceNotReady(
                        self.config.service_ready_timeout_ms,
                    ));
                }
            }
        }

        let context = self
            .shared
            .host
            .window_context()
            .ok_or(CaptureError::NoWindowContext)?;
        *self.shared.context.write() = Some(context);

        // Registered before anything else so no change during setup is missed
        let observer = Arc::new(SessionObserver {
            shared: Arc::downgrade(&self.shared),
            queue: self.queue.handle(),
        });
        if let Err(e) = self.shared.register_observer(observer) {
            *self.shared.context.write() = None;
            return Err(e);
        }

        let result = self.projections.projection_for(grant).and_then(|projection| {
            let initial = CaptureState::new(
                context.max_bounds.0,
                context.max_bounds.1,
                context.density_dpi,
                self.config.default_format,
            );
            self.queue
                .sync(move |engine| engine.start(projection, initial))?
                .map(|()| initial)
        });

        if result.is_err() {
            self.shared.unregister_observer();
            *self.shared.context.write() = None;
        }
        result
    }

    /// Switch to a pool for `state` unless the newest pool already matches
    pub fn recreate_pool(&self, state: CaptureState) -> Result<()> {
        self.ensure_alive()?;
        self.queue.sync(move |engine| engine.recreate_pool(state))
    }

    /// Snapshot of the pool queue, oldest first
    pub fn pools(&self) -> Result<Vec<PoolSnapshot>> {
        self.queue.sync(|engine| engine.snapshot())
    }

    pub fn pool_count(&self) -> Result<usize> {
        self.queue.sync(|engine| engine.pools.len())
    }

    /// Configuration of the newest pool
    pub fn current_state(&self) -> Result<Option<CaptureState>> {
        self.queue
            .sync(|engine| engine.pools.back().map(|p| p.capture_state()))
    }

    /// Wait until every task posted so far has run
    pub fn flush(&self) -> Result<()> {
        self.queue.sync(|_| ())
    }

    /// Tear the session down; safe to call any number of times
    pub fn destroy(&self) {
        if !self.shared.mark_destroyed() {
            trace!("Capture session {} already destroyed", self.id());
            return;
        }
        info!("Destroying capture session {}", self.id());

        self.shared.unregister_observer();

        if self.queue.is_worker_thread() {
            self.queue.post(|engine| engine.teardown());
        } else if let Err(e) = self.queue.sync(|engine| engine.teardown()) {
            error!("Teardown of session {} failed: {}", self.id(), e);
        }

        *self.shared.context.write() = None;
        self.shared.emit(SessionEvent::Destroyed);
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.shared.is_destroyed() {
            return Err(CaptureError::SessionDestroyed);
        }
        Ok(())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.destroy();
        self.queue.shutdown();
    }
}
