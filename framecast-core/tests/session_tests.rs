//! Integration tests for the capture session against the simulated platform

mod mocks;

use framecast_core::capture::{PoolState, SessionEvent, SessionState};
use framecast_core::config::CaptureConfig;
use framecast_core::error::CaptureError;
use framecast_core::types::{CaptureState, CropRect, PixelFormat, WindowContext};
use mocks::{drain_events, Harness, RecordingConsumer};
use std::time::Duration;

fn initial() -> CaptureState {
    CaptureState::new(1920, 1080, 320, PixelFormat::Rgba8888)
}

#[test]
fn test_start_binds_first_pool() {
    let h = Harness::new(RecordingConsumer::holding());
    let session = h.session(CaptureConfig::default());
    let mut rx = session.subscribe();
    assert_eq!(session.state(), SessionState::Idle);

    h.make_ready();
    session.start_capture().unwrap();

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.current_state().unwrap(), Some(initial()));
    assert_eq!(
        session.window_context(),
        Some(WindowContext::new(320, (1920, 1080)))
    );
    assert_eq!(h.host.observer_count(), 1);
    assert_eq!(h.host.ui_sync_tasks_run(), 1);
    assert!(!h.grants.is_pending());

    let display = h.platform.display().unwrap();
    assert_eq!(display.name, "framecast-display");
    assert_eq!((display.width, display.height, display.dpi), (1920, 1080, 320));
    assert!(display.surface.is_some());
    assert_eq!(h.platform.created_states(), vec![initial()]);

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], SessionEvent::PoolCreated { state, .. } if state == initial()));
    assert_eq!(events[1], SessionEvent::Started(initial()));
}

#[test]
fn test_end_to_end_resize() {
    let h = Harness::new(RecordingConsumer::holding());
    let session = h.started(CaptureConfig::default());
    let mut rx = session.subscribe();

    assert!(h.render(&session));
    let first = &h.consumer.delivered()[0];
    assert_eq!(first.format, PixelFormat::Rgba8888);
    assert_eq!((first.width, first.height), (1920, 1080));
    assert_eq!(first.crop, CropRect::full(1920, 1080));
    assert_eq!(first.bytes, 1920 * 1080 * 4);
    let old_pool = first.pool;

    assert!(h.platform.resize_content(1280, 720));
    session.flush().unwrap();

    let resized = CaptureState::new(1280, 720, 320, PixelFormat::Rgba8888);
    assert_eq!(session.current_state().unwrap(), Some(resized));
    let display = h.platform.display().unwrap();
    assert_eq!(display.resizes, vec![(1280, 720, 320)]);
    assert_eq!(display.rebinds, 1);

    assert!(h.render(&session));
    let second = &h.consumer.delivered()[1];
    assert_ne!(second.pool, old_pool);
    assert_eq!((second.width, second.height), (1280, 720));
    assert_eq!(second.crop, CropRect::full(1280, 720));

    // Old pool waits for its outstanding buffer
    let pools = session.pools().unwrap();
    assert_eq!(pools.len(), 2);
    assert_eq!(pools[0].id, old_pool);
    assert_eq!(pools[0].lifecycle, PoolState::Closing);
    assert_eq!(pools[1].lifecycle, PoolState::Open);

    assert!(h.consumer.release_oldest());
    session.flush().unwrap();
    assert_eq!(session.pool_count().unwrap(), 1);

    let events = drain_events(&mut rx);
    assert!(events.contains(&SessionEvent::Recreated {
        from: initial(),
        to: resized
    }));
    assert!(events.contains(&SessionEvent::PoolClosed { pool: old_pool }));

    let stats = session.stats();
    assert_eq!(stats.recreations, 1);
    assert_eq!(stats.pools_created, 2);
    assert_eq!(stats.pools_closed, 1);
    assert_eq!(stats.rgba_frames, 2);
}

#[test]
fn test_old_pool_stays_open_until_new_pool_delivers() {
    let h = Harness::new(RecordingConsumer::holding());
    let session = h.started(CaptureConfig::default());

    h.render(&session);
    h.platform.resize_content(800, 600);
    session.flush().unwrap();

    // Give the old buffer back before the new pool has produced anything
    h.consumer.release_all();
    session.flush().unwrap();

    let pools = session.pools().unwrap();
    assert_eq!(pools.len(), 2);
    assert_eq!(pools[0].lifecycle, PoolState::Open);
    assert_eq!(pools[0].acquired, 0);

    h.render(&session);
    let pools = session.pools().unwrap();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0].state.width, 800);
}

#[test]
fn test_first_frame_of_newest_pool_closes_all_older_pools() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.started(CaptureConfig::default());

    h.platform.resize_content(1280, 720);
    h.platform.resize_content(640, 480);
    session.flush().unwrap();
    assert_eq!(session.pool_count().unwrap(), 3);

    h.render(&session);
    assert_eq!(session.pool_count().unwrap(), 1);
    assert_eq!(h.platform.live_sources(), 1);
    assert_eq!(session.stats().pools_closed, 2);
}

#[test]
fn test_acquire_release_balance() {
    let h = Harness::new(RecordingConsumer::holding());
    let session = h.started(CaptureConfig::default().with_max_images(2));

    for _ in 0..3 {
        h.render(&session);
    }
    assert_eq!(h.consumer.delivered_count(), 2);
    assert_eq!(h.platform.outstanding_buffers(), 2);
    assert_eq!(session.pools().unwrap()[0].acquired, 2);

    // Returning one buffer lets the waiting frame through
    h.consumer.release_oldest();
    session.flush().unwrap();
    assert_eq!(h.consumer.delivered_count(), 3);
    assert_eq!(h.platform.outstanding_buffers(), 2);

    assert_eq!(h.consumer.release_all(), 2);
    session.flush().unwrap();
    assert_eq!(h.platform.outstanding_buffers(), 0);
    assert_eq!(session.pools().unwrap()[0].acquired, 0);
}

#[test]
fn test_release_from_another_thread() {
    let h = Harness::new(RecordingConsumer::holding());
    let session = h.started(CaptureConfig::default());
    h.render(&session);
    h.render(&session);

    let consumer = h.consumer.clone();
    std::thread::spawn(move || consumer.release_all())
        .join()
        .unwrap();
    session.flush().unwrap();

    assert_eq!(h.platform.outstanding_buffers(), 0);
}

#[test]
fn test_dropping_frame_releases_buffer() {
    let h = Harness::new(RecordingConsumer::holding());
    let session = h.started(CaptureConfig::default());
    h.render(&session);
    assert_eq!(h.platform.outstanding_buffers(), 1);

    h.consumer.drop_all();
    session.flush().unwrap();
    assert_eq!(h.platform.outstanding_buffers(), 0);
}

#[test]
fn test_destroy_is_idempotent() {
    let h = Harness::new(RecordingConsumer::holding());
    let session = h.started(CaptureConfig::default());
    let mut rx = session.subscribe();
    h.render(&session);

    session.destroy();
    session.destroy();

    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(h.platform.projection_stop_calls(), 1);
    let display = h.platform.display().unwrap();
    assert_eq!(display.release_calls, 1);
    assert_eq!(display.surface, None);
    assert_eq!(h.platform.live_sources(), 0);
    assert_eq!(h.host.observer_count(), 0);
    assert_eq!(session.window_context(), None);

    let destroyed = drain_events(&mut rx)
        .into_iter()
        .filter(|e| *e == SessionEvent::Destroyed)
        .count();
    assert_eq!(destroyed, 1);

    // Late release of a frame from a torn-down pool is harmless
    h.consumer.release_all();
    session.flush().unwrap();

    assert!(!h.platform.render_frame());
    assert!(matches!(
        session.start_capture(),
        Err(CaptureError::SessionDestroyed)
    ));
    assert!(matches!(
        session.recreate_pool(initial().with_dpi(160)),
        Err(CaptureError::SessionDestroyed)
    ));
}

#[test]
fn test_drop_tears_down() {
    let h = Harness::new(RecordingConsumer::holding());
    let session = h.started(CaptureConfig::default());
    h.render(&session);

    drop(session);

    assert_eq!(h.platform.projection_stop_calls(), 1);
    assert_eq!(h.platform.display().unwrap().release_calls, 1);
    assert_eq!(h.platform.live_sources(), 0);

    // Release after the queue is gone
    assert_eq!(h.consumer.release_all(), 1);
}

#[test]
fn test_format_fallback_to_yuv() {
    let h = Harness::new(RecordingConsumer::releasing());
    h.platform.set_producer_format(Some(PixelFormat::Yuv420));
    let session = h.started(CaptureConfig::default());
    let mut rx = session.subscribe();

    h.render(&session);
    assert_eq!(h.consumer.delivered_count(), 0);
    let yuv = initial().with_format(PixelFormat::Yuv420);
    assert_eq!(session.current_state().unwrap(), Some(yuv));

    h.render(&session);
    let delivered = h.consumer.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].format, PixelFormat::Yuv420);
    assert_eq!(delivered[0].bytes, 1920 * 1080 + 2 * 960 * 540);
    assert_eq!(session.pool_count().unwrap(), 1);

    let stats = session.stats();
    assert_eq!(stats.format_fallbacks, 1);
    assert_eq!(stats.i420_frames, 1);
    assert!(drain_events(&mut rx).contains(&SessionEvent::Recreated {
        from: initial(),
        to: yuv
    }));
    assert_eq!(session.state(), SessionState::Active);
}

#[test]
fn test_format_fallback_happens_once() {
    let h = Harness::new(RecordingConsumer::releasing());
    h.platform.set_producer_format(Some(PixelFormat::Private));
    let session = h.started(CaptureConfig::default());
    let mut rx = session.subscribe();

    h.render(&session);
    h.render(&session);

    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(h.platform.sources_created(), 2);
    assert_eq!(h.platform.live_sources(), 0);
    assert_eq!(h.platform.projection_stop_calls(), 1);
    assert_eq!(h.platform.display().unwrap().release_calls, 1);
    assert_eq!(h.host.observer_count(), 0);

    let errors = h.consumer.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("No fallback pixel format"));

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Failed(_))));
    assert_eq!(
        events.iter().filter(|e| **e == SessionEvent::Destroyed).count(),
        1
    );

    // Destroying afterwards adds nothing
    session.destroy();
    assert!(drain_events(&mut rx).is_empty());
    assert!(!h.platform.render_frame());
}

#[test]
fn test_fallback_from_superseded_pool_keeps_resize() {
    let h = Harness::new(RecordingConsumer::holding());
    let session = h.started(CaptureConfig::default());

    // Fill the first pool, then leave a mismatched frame pending in it
    h.render(&session);
    h.render(&session);
    h.platform.set_producer_format(Some(PixelFormat::Yuv420));
    h.render(&session);
    h.platform.set_producer_format(None);

    h.platform.resize_content(800, 600);
    session.flush().unwrap();

    // Freed slot lets the old pool read the mismatched frame
    h.consumer.release_oldest();
    session.flush().unwrap();

    let resized = CaptureState::new(800, 600, 320, PixelFormat::Rgba8888);
    assert_eq!(session.current_state().unwrap(), Some(resized));
    assert_eq!(h.platform.display().unwrap().resizes, vec![(800, 600, 320)]);
    assert_eq!(h.platform.sources_created(), 2);
    assert_eq!(session.stats().format_fallbacks, 0);

    h.render(&session);
    let last = h.consumer.delivered().pop().unwrap();
    assert_eq!((last.width, last.height), (800, 600));
    assert_eq!(last.format, PixelFormat::Rgba8888);

    h.consumer.release_all();
    session.flush().unwrap();
    assert_eq!(session.pool_count().unwrap(), 1);
    assert_eq!(session.state(), SessionState::Active);
}

#[test]
fn test_yuv_start_without_fallback_fails() {
    let h = Harness::new(RecordingConsumer::releasing());
    h.platform.set_producer_format(Some(PixelFormat::Rgba8888));
    let config = CaptureConfig::default().with_default_format(PixelFormat::Yuv420);
    let session = h.started(config);

    h.render(&session);

    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(h.platform.sources_created(), 1);
    assert_eq!(h.consumer.delivered_count(), 0);
}

#[test]
fn test_no_redundant_recreation() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.started(CaptureConfig::default());
    let mut rx = session.subscribe();

    session.recreate_pool(initial()).unwrap();
    h.host.fire_configuration_changed();
    h.host.fire_window_changed();
    session.flush().unwrap();

    assert_eq!(h.platform.sources_created(), 1);
    assert!(h.platform.display().unwrap().resizes.is_empty());
    assert!(drain_events(&mut rx).is_empty());

    // A resize to the current size is a no-op as well
    h.platform.resize_content(1920, 1080);
    session.flush().unwrap();
    assert_eq!(h.platform.sources_created(), 1);
}

#[test]
fn test_density_change_recreates_pool() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.started(CaptureConfig::default());

    h.host.set_context(Some(WindowContext::new(480, (1920, 1080))));
    h.host.fire_configuration_changed();
    session.flush().unwrap();

    assert_eq!(session.current_state().unwrap(), Some(initial().with_dpi(480)));
    assert_eq!(
        h.platform.display().unwrap().resizes,
        vec![(1920, 1080, 480)]
    );

    // Same density again changes nothing
    h.host.fire_configuration_changed();
    session.flush().unwrap();
    assert_eq!(h.platform.sources_created(), 2);

    // Later content resizes keep the new density
    h.platform.resize_content(1000, 500);
    session.flush().unwrap();
    assert_eq!(
        session.current_state().unwrap(),
        Some(CaptureState::new(1000, 500, 480, PixelFormat::Rgba8888))
    );
}

#[test]
fn test_lost_context_keeps_last_density() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.started(CaptureConfig::default());

    h.host.set_context(None);
    h.host.fire_window_changed();
    session.flush().unwrap();

    assert_eq!(session.current_state().unwrap(), Some(initial()));
    assert_eq!(
        session.window_context(),
        Some(WindowContext::new(320, (1920, 1080)))
    );
}

#[test]
fn test_explicit_recreate() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.started(CaptureConfig::default());

    let target = CaptureState::new(1280, 720, 240, PixelFormat::Rgba8888);
    session.recreate_pool(target).unwrap();

    assert_eq!(session.current_state().unwrap(), Some(target));
    assert_eq!(h.platform.display().unwrap().resizes, vec![(1280, 720, 240)]);
    assert_eq!(session.stats().recreations, 1);
}

#[test]
fn test_projection_stopped() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.started(CaptureConfig::default());
    let mut rx = session.subscribe();

    assert!(h.platform.stop_projection());
    session.flush().unwrap();

    assert_eq!(h.consumer.stop_count(), 1);
    assert_eq!(drain_events(&mut rx), vec![SessionEvent::ProjectionStopped]);
    assert_eq!(session.state(), SessionState::Active);
}

#[test]
fn test_start_without_grant() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.session(CaptureConfig::default());
    h.gate.set_ready();

    let err = session.start_capture().unwrap_err();
    assert!(matches!(err, CaptureError::NoGrant));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(h.host.observer_count(), 0);
    assert!(h.platform.granted().is_none());
}

#[test]
fn test_start_without_window_context() {
    let h = Harness::with_context(RecordingConsumer::releasing(), None);
    let session = h.session(CaptureConfig::default());
    h.make_ready();

    let err = session.start_capture().unwrap_err();
    assert!(matches!(err, CaptureError::NoWindowContext));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(h.host.observer_count(), 0);
}

#[test]
fn test_start_with_rejected_grant() {
    let h = Harness::new(RecordingConsumer::releasing());
    h.platform.set_deny_projection(true);
    let session = h.session(CaptureConfig::default());
    h.make_ready();

    let err = session.start_capture().unwrap_err();
    assert!(matches!(err, CaptureError::NoProjection(_)));
    assert!(err.user_hint().is_some());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(h.host.observer_count(), 0);
    // Registered and removed on the UI thread
    assert_eq!(h.host.ui_sync_tasks_run(), 1);
    assert_eq!(h.host.ui_tasks_run(), 1);
    assert_eq!(session.window_context(), None);
    assert_eq!(h.platform.sources_created(), 0);
}

#[test]
fn test_start_with_allocation_failure() {
    let h = Harness::new(RecordingConsumer::releasing());
    h.platform.set_fail_allocation(true);
    let session = h.session(CaptureConfig::default());
    h.make_ready();

    let err = session.start_capture().unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("Allocation failed"));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(h.platform.projection_stop_calls(), 1);
    assert!(h.platform.display().is_none());
    assert_eq!(h.host.observer_count(), 0);
}

#[test]
fn test_start_times_out_waiting_for_service() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.session(CaptureConfig::default().with_service_ready_timeout_ms(50));
    h.grants.publish(framecast_core::types::CaptureGrant::new(-1));

    let err = session.start_capture().unwrap_err();
    assert!(matches!(err, CaptureError::ServiceNotReady(50)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_start_waits_for_service() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.session(CaptureConfig::default());
    h.grants.publish(framecast_core::types::CaptureGrant::new(-1));

    let gate = h.gate.clone();
    let opener = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        gate.set_ready();
    });

    session.start_capture().unwrap();
    opener.join().unwrap();
    assert_eq!(session.state(), SessionState::Active);
}

#[test]
fn test_start_twice() {
    let h = Harness::new(RecordingConsumer::releasing());
    let session = h.started(CaptureConfig::default());
    h.make_ready();

    assert!(matches!(
        session.start_capture(),
        Err(CaptureError::SessionAlreadyStarted)
    ));
    assert_eq!(h.platform.sources_created(), 1);
}

#[test]
fn test_invalid_config_rejected() {
    let h = Harness::new(RecordingConsumer::releasing());
    let result = framecast_core::CaptureSession::new(
        CaptureConfig::default().with_max_images(0),
        h.deps(),
    );
    assert!(matches!(result, Err(CaptureError::Config(_))));
}
