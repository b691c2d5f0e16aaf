//! Simulate command - run a capture session on the in-memory platform

use anyhow::{Context, Result};
use clap::Args;
use framecast_core::capture::{
    CaptureSession, Frame, GrantSlot, I420Frame, RgbaFrame, ServiceReadyGate, SessionDeps,
    SessionEvent, SessionState,
};
use framecast_core::config::{CaptureConfig, ConfigFile};
use framecast_core::error::CaptureError;
use framecast_core::platform::FrameConsumer;
use framecast_core::platform::sim::{SimHost, SimPlatform};
use framecast_core::types::{CaptureGrant, CaptureState, PixelFormat, WindowContext};
use framecast_core::StatsSnapshot;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Arguments for the simulate command
#[derive(Args)]
pub struct SimulateArgs {
    /// Window width (defaults to the config file)
    #[arg(long)]
    width: Option<u32>,

    /// Window height (defaults to the config file)
    #[arg(long)]
    height: Option<u32>,

    /// Display density (defaults to the config file)
    #[arg(long)]
    dpi: Option<u32>,

    /// Initial pixel format (rgba, yuv420)
    #[arg(short, long)]
    format: Option<String>,

    /// Frames to render
    #[arg(short = 'n', long, default_value = "120")]
    frames: u64,

    /// Frames per second (defaults to the config file)
    #[arg(long)]
    fps: Option<u32>,

    /// Resize the captured content before rendering this frame
    #[arg(long)]
    resize_at: Option<u64>,

    /// Size to resize to, as WxH
    #[arg(long, default_value = "1280x720")]
    resize: String,

    /// Frames the consumer keeps before releasing the oldest
    #[arg(long, default_value = "0")]
    hold: usize,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

/// Consumer that optionally keeps a few frames checked out
struct SimulateConsumer {
    hold: usize,
    held: Mutex<VecDeque<Frame>>,
    bytes: AtomicU64,
    last_timestamp_ns: AtomicI64,
    stopped: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl SimulateConsumer {
    fn new(hold: usize) -> Self {
        Self {
            hold,
            held: Mutex::new(VecDeque::new()),
            bytes: AtomicU64::new(0),
            last_timestamp_ns: AtomicI64::new(0),
            stopped: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    fn keep(&self, frame: Frame, bytes: usize) {
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_timestamp_ns
            .store(frame.timestamp_ns(), Ordering::Relaxed);

        if self.hold == 0 {
            frame.release();
            return;
        }

        let evicted = {
            let mut held = self.held.lock();
            held.push_back(frame);
            if held.len() > self.hold {
                held.pop_front()
            } else {
                None
            }
        };
        if let Some(oldest) = evicted {
            oldest.release();
        }
    }

    fn release_all(&self) -> usize {
        let frames: Vec<Frame> = self.held.lock().drain(..).collect();
        let count = frames.len();
        for frame in frames {
            frame.release();
        }
        count
    }
}

impl FrameConsumer for SimulateConsumer {
    fn on_rgba_frame(&self, frame: RgbaFrame) {
        let bytes = frame.data.len();
        self.keep(Frame::Rgba(frame), bytes);
    }

    fn on_i420_frame(&self, frame: I420Frame) {
        let bytes = frame.y.len() + frame.u.len() + frame.v.len();
        self.keep(Frame::I420(frame), bytes);
    }

    fn on_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn on_error(&self, error: &CaptureError) {
        *self.failure.lock() = Some(error.to_string());
    }
}

/// Result of a simulated run
#[derive(Serialize)]
struct SimulateSummary {
    session: u64,
    initial: CaptureState,
    current: Option<CaptureState>,
    frames_rendered: u64,
    bytes_delivered: u64,
    last_timestamp_ns: i64,
    projection_stopped: bool,
    failure: Option<String>,
    elapsed_ms: u64,
    stats: StatsSnapshot,
}

fn parse_size(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow::anyhow!("Invalid size '{}', expected WxH", s))?;
    let width = w.trim().parse().with_context(|| format!("Invalid width in '{}'", s))?;
    let height = h.trim().parse().with_context(|| format!("Invalid height in '{}'", s))?;
    Ok((width, height))
}

/// Run a capture session against the simulated platform
pub async fn simulate(args: SimulateArgs) -> Result<()> {
    let file = ConfigFile::load_or_default();
    let mut config = CaptureConfig::from_file(&file);
    if let Some(format) = &args.format {
        let format: PixelFormat = format.parse().map_err(anyhow::Error::msg)?;
        config = config.with_default_format(format);
    }

    let width = args.width.unwrap_or(file.simulate.width);
    let height = args.height.unwrap_or(file.simulate.height);
    let dpi = args.dpi.unwrap_or(file.simulate.dpi);
    let fps = args.fps.unwrap_or(file.simulate.fps).max(1);
    let resize = parse_size(&args.resize)?;

    if args.hold >= config.max_images {
        warn!(
            "Holding {} frames with max_images {}; the pool will stall",
            args.hold, config.max_images
        );
    }

    let platform = SimPlatform::new();
    let host = Arc::new(SimHost::new(Some(WindowContext::new(dpi, (width, height)))));
    let consumer = Arc::new(SimulateConsumer::new(args.hold));
    let grants = Arc::new(GrantSlot::new());
    let gate = Arc::new(ServiceReadyGate::new());

    let deps = SessionDeps {
        sources: Arc::new(platform.clone()),
        projections: Arc::new(platform.clone()),
        host: host.clone(),
        consumer: consumer.clone(),
        grants: grants.clone(),
        service_gate: gate.clone(),
    };
    let session = CaptureSession::new(config, deps).context("Failed to create capture session")?;

    let mut events = session.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Recreated { from, to }) => info!("Reconfigured {} -> {}", from, to),
                Ok(SessionEvent::Failed(reason)) => warn!("Session failed: {}", reason),
                Ok(event) => debug!("Session event: {:?}", event),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} session events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // The simulated picker grants immediately and the service is up
    grants.publish(CaptureGrant::new(-1));
    gate.set_ready();

    if let Err(e) = session.start_capture() {
        if let Some(hint) = e.user_hint() {
            eprintln!("Hint: {}", hint);
        }
        return Err(e).context("Failed to start capture");
    }
    let initial = session
        .current_state()?
        .context("Session started without a pool")?;

    if !args.json {
        println!("framecast - Simulated Capture\n");
        println!("  Session:    {}", session.id());
        println!("  Initial:    {}", initial);
        println!("  Frames:     {} @ {} fps", args.frames, fps);
        if let Some(at) = args.resize_at {
            println!("  Resize:     {}x{} before frame {}", resize.0, resize.1, at);
        }
        println!("\nPress Ctrl+C to stop early...\n");
    }

    let started = Instant::now();
    let mut rendered = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));

    let run = async {
        for index in 0..args.frames {
            ticker.tick().await;
            if args.resize_at == Some(index) {
                platform.resize_content(resize.0, resize.1);
            }
            if !platform.render_frame() {
                warn!("No surface bound after {} frames, stopping", index);
                break;
            }
            rendered += 1;
        }
    };

    tokio::select! {
        _ = run => {}
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            if !args.json {
                println!("\nReceived interrupt signal...");
            }
        }
    }

    if session.state() != SessionState::Destroyed {
        session.flush()?;
        let released = consumer.release_all();
        debug!("Released {} held frame(s)", released);
        session.flush()?;
    }

    let summary = SimulateSummary {
        session: session.id().as_u64(),
        initial,
        current: session.current_state().unwrap_or(None),
        frames_rendered: rendered,
        bytes_delivered: consumer.bytes.load(Ordering::Relaxed),
        last_timestamp_ns: consumer.last_timestamp_ns.load(Ordering::Relaxed),
        projection_stopped: consumer.stopped.load(Ordering::SeqCst),
        failure: consumer.failure.lock().clone(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        stats: session.stats(),
    };

    session.destroy();
    drop(session);
    event_log.abort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Capture finished in {} ms", summary.elapsed_ms);
        println!("  Rendered:   {}", summary.frames_rendered);
        println!("  Stats:      {}", summary.stats.format_summary());
        println!("  Bytes:      {}", summary.bytes_delivered);
        if let Some(current) = summary.current {
            println!("  Final:      {}", current);
        }
        if let Some(failure) = &summary.failure {
            println!("  Failure:    {}", failure);
        }
    }

    if let Some(failure) = summary.failure {
        anyhow::bail!("Capture session failed: {}", failure);
    }

    Ok(())
}
