//! End-to-end bridge tests: protocol-side requests flowing through the
//! dispatcher into the synchronizer, with notifications fanned back out.

use lamco_rail_bridge::bridge::{Bridge, BridgeHandle};
use lamco_rail_bridge::dispatch::WindowOp;
use lamco_rail_bridge::layout::{MonitorDescriptor, OutputId, Rect};
use lamco_rail_bridge::notify::{BridgeEvent, EventStream};
use lamco_rail_bridge::window::{OpOrigin, TransitionKind, WindowHandle};
use lamco_rail_bridge::Config;

fn bridge() -> (Bridge, BridgeHandle) {
    Bridge::new(&Config::default())
}

fn single_monitor() -> Vec<MonitorDescriptor> {
    vec![MonitorDescriptor {
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
        scale_percent: 100,
        is_primary: true,
        workarea: None,
    }]
}

fn drain(stream: &mut EventStream) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = stream.rx.try_recv() {
        events.push(event);
    }
    events
}

fn window_event(events: &[BridgeEvent], kind: TransitionKind) -> Option<(u32, Rect)> {
    events.iter().find_map(|e| match e {
        BridgeEvent::Window(w) if w.kind == kind => Some((w.window_id, w.geometry)),
        _ => None,
    })
}

/// Map one window through the bridge and return its peer-visible ID.
fn map_window(bridge: &mut Bridge, remote: &mut EventStream, geometry: Rect) -> (WindowHandle, u32) {
    let handle = bridge
        .handle_window_created("app".into(), geometry, OutputId(0), None)
        .unwrap();
    bridge.handle_window_committed(handle).unwrap();
    let events = drain(remote);
    let (window_id, _) = window_event(&events, TransitionKind::Mapped).expect("mapped event");
    (handle, window_id)
}

#[test]
fn test_snap_and_restore_round_trip() {
    let (mut bridge, handle) = bridge();
    let mut remote = handle.subscribe(OpOrigin::Remote);
    let mut local = handle.subscribe(OpOrigin::Local);

    let session = handle.create_session().unwrap();
    assert!(bridge.step()); // initial window sync (nothing mapped yet)
    assert!(drain(&mut remote).is_empty());

    handle.dispatch_set_layout(&session, single_monitor()).unwrap();
    assert!(bridge.step());
    assert!(drain(&mut remote)
        .iter()
        .any(|e| matches!(e, BridgeEvent::LayoutAccepted { .. })));

    let (_, window_id) = map_window(&mut bridge, &mut remote, Rect::new(0, 0, 800, 600));
    drain(&mut local);

    // Peer snaps the window to the left half.
    handle
        .dispatch_window_op(&session, window_id, WindowOp::Snap { rect: Rect::new(0, 0, 400, 600) })
        .unwrap();
    assert!(bridge.step());

    // The local shell hears about it; the requesting peer does not.
    let events = drain(&mut local);
    let (_, geometry) = window_event(&events, TransitionKind::Snapped).expect("snapped event");
    assert_eq!(geometry, Rect::new(0, 0, 400, 600));
    assert!(window_event(&drain(&mut remote), TransitionKind::Snapped).is_none());

    // Restore recovers the pre-snap geometry exactly.
    handle
        .dispatch_window_op(&session, window_id, WindowOp::Restore)
        .unwrap();
    assert!(bridge.step());
    let events = drain(&mut local);
    let (_, geometry) = window_event(&events, TransitionKind::Restored).expect("restored event");
    assert_eq!(geometry, Rect::new(0, 0, 800, 600));
}

#[test]
fn test_unknown_window_id_is_nacked() {
    let (mut bridge, handle) = bridge();
    let mut remote = handle.subscribe(OpOrigin::Remote);

    let session = handle.create_session().unwrap();
    handle.dispatch_set_layout(&session, single_monitor()).unwrap();
    bridge.step();
    bridge.step();
    drain(&mut remote);

    handle
        .dispatch_window_op(&session, 0xDEAD, WindowOp::Minimize)
        .unwrap();
    assert!(bridge.step());

    let events = drain(&mut remote);
    assert!(events
        .iter()
        .any(|e| matches!(e, BridgeEvent::Nack { window_id: Some(0xDEAD), .. })));
}

#[test]
fn test_session_teardown_resolves_queued_ops_without_running_them() {
    let (mut bridge, handle) = bridge();
    let mut remote = handle.subscribe(OpOrigin::Remote);
    let mut local = handle.subscribe(OpOrigin::Local);

    let session = handle.create_session().unwrap();
    handle.dispatch_set_layout(&session, single_monitor()).unwrap();
    bridge.step();
    bridge.step();
    let (window, window_id) = map_window(&mut bridge, &mut remote, Rect::new(0, 0, 800, 600));
    drain(&mut local);

    // Minimize is queued, then the peer disconnects before it runs.
    handle
        .dispatch_window_op(&session, window_id, WindowOp::Minimize)
        .unwrap();
    handle.close_session(&session);
    bridge.step(); // queued minimize resolves free-only
    bridge.step(); // teardown

    // No compositor state was touched and nothing was announced.
    assert!(window_event(&drain(&mut local), TransitionKind::Minimized).is_none());
    assert!(!bridge.window_manager().window(window).unwrap().flags().minimized);

    // The session is gone for further dispatch.
    assert!(handle
        .dispatch_window_op(&session, window_id, WindowOp::Close)
        .is_err());
}

#[test]
fn test_late_session_receives_initial_window_sync() {
    let (mut bridge, handle) = bridge();
    let mut remote = handle.subscribe(OpOrigin::Remote);

    let first = handle.create_session().unwrap();
    handle.dispatch_set_layout(&first, single_monitor()).unwrap();
    bridge.step();
    bridge.step();
    let (_, first_id) = map_window(&mut bridge, &mut remote, Rect::new(10, 10, 640, 480));

    // A second peer connects after the window was mapped.
    handle.create_session().unwrap();
    assert!(bridge.step());

    let events = drain(&mut remote);
    let (synced_id, geometry) =
        window_event(&events, TransitionKind::Mapped).expect("sync mapped event");
    assert_eq!(geometry, Rect::new(10, 10, 640, 480));
    // IDs are per session; both tables start from the bottom of the range.
    assert_eq!(synced_id, first_id);
}

#[test]
fn test_scaled_layout_converts_geometry_both_ways() {
    let (mut bridge, handle) = bridge();
    let mut remote = handle.subscribe(OpOrigin::Remote);
    let mut local = handle.subscribe(OpOrigin::Local);

    let session = handle.create_session().unwrap();
    let monitors = vec![MonitorDescriptor {
        x: 0,
        y: 0,
        width: 3840,
        height: 2160,
        scale_percent: 200,
        is_primary: true,
        workarea: None,
    }];
    handle.dispatch_set_layout(&session, monitors).unwrap();
    bridge.step();
    bridge.step();

    // Window occupies 800x600 logical pixels; the peer sees it doubled.
    let (handle_w, window_id) = map_window(&mut bridge, &mut remote, Rect::new(100, 50, 800, 600));
    let window = bridge.window_manager().window(handle_w).unwrap();
    assert_eq!(window.geometry, Rect::new(100, 50, 800, 600));

    // The peer moves the window in its own coordinate space.
    handle
        .dispatch_window_op(&session, window_id, WindowOp::Move { rect: Rect::new(400, 200, 1600, 1200) })
        .unwrap();
    assert!(bridge.step());

    let events = drain(&mut local);
    let (_, remote_geometry) = window_event(&events, TransitionKind::Moved).expect("moved event");
    // Notification geometry is client-space, round-tripped through the layout.
    assert_eq!(remote_geometry, Rect::new(400, 200, 1600, 1200));
    // Compositor-side geometry landed halved.
    assert_eq!(
        bridge.window_manager().window(handle_w).unwrap().geometry,
        Rect::new(200, 100, 800, 600)
    );
}

#[test]
fn test_geometry_op_defers_until_layout_is_published() {
    let (mut bridge, handle) = bridge();
    let mut remote = handle.subscribe(OpOrigin::Remote);
    let mut local = handle.subscribe(OpOrigin::Local);

    let session = handle.create_session().unwrap();
    bridge.step();
    let (window, window_id) = map_window(&mut bridge, &mut remote, Rect::new(0, 0, 800, 600));
    drain(&mut local);

    // No layout yet: the move is requeued, not executed and not rejected.
    handle
        .dispatch_window_op(&session, window_id, WindowOp::Move { rect: Rect::new(50, 50, 100, 100) })
        .unwrap();
    assert!(bridge.step());
    assert!(drain(&mut local).is_empty());
    assert!(drain(&mut remote).is_empty());
    assert_eq!(
        bridge.window_manager().window(window).unwrap().geometry,
        Rect::new(0, 0, 800, 600)
    );

    // Once a layout lands, the deferred move runs on a later cycle.
    handle.dispatch_set_layout(&session, single_monitor()).unwrap();
    bridge.step();
    bridge.step(); // repaint tick retries the deferred task

    let events = drain(&mut local);
    let (_, geometry) = window_event(&events, TransitionKind::Moved).expect("deferred move ran");
    assert_eq!(geometry, Rect::new(50, 50, 100, 100));
}

#[test]
fn test_set_output_rejects_unknown_output_from_either_origin() {
    let (mut bridge, handle) = bridge();
    let mut remote = handle.subscribe(OpOrigin::Remote);

    let session = handle.create_session().unwrap();
    handle.dispatch_set_layout(&session, single_monitor()).unwrap();
    bridge.step();
    bridge.step();
    let (window, window_id) = map_window(&mut bridge, &mut remote, Rect::new(0, 0, 800, 600));

    // Local shell policy names an output the layout doesn't have.
    let err = bridge
        .apply_local_op(window, WindowOp::SetOutput { output: OutputId(99) })
        .unwrap_err();
    assert!(matches!(err, lamco_rail_bridge::BridgeError::NotFound { .. }));
    assert_eq!(bridge.window_manager().window(window).unwrap().output, OutputId(0));

    // The remote peer gets the same treatment, as a nack.
    handle
        .dispatch_window_op(&session, window_id, WindowOp::SetOutput { output: OutputId(99) })
        .unwrap();
    assert!(bridge.step());
    assert!(drain(&mut remote)
        .iter()
        .any(|e| matches!(e, BridgeEvent::Nack { .. })));
    assert_eq!(bridge.window_manager().window(window).unwrap().output, OutputId(0));

    // A known output is accepted on both paths.
    bridge
        .apply_local_op(window, WindowOp::SetOutput { output: OutputId(0) })
        .unwrap();
}

#[test]
fn test_zorder_update_is_coalesced_onto_repaint_tick() {
    let (mut bridge, handle) = bridge();
    let mut remote = handle.subscribe(OpOrigin::Remote);

    let session = handle.create_session().unwrap();
    handle.dispatch_set_layout(&session, single_monitor()).unwrap();
    bridge.step();
    bridge.step();
    let (_, a) = map_window(&mut bridge, &mut remote, Rect::new(0, 0, 100, 100));
    let (_, b) = map_window(&mut bridge, &mut remote, Rect::new(0, 0, 100, 100));

    // No wakeup pending: step times out into the repaint tick and flushes
    // one coalesced stacking update, topmost first.
    assert!(bridge.step());
    let events = drain(&mut remote);
    let orders: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BridgeEvent::ZOrder { window_ids, .. } => Some(window_ids.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(orders, vec![vec![b, a]]);
}
