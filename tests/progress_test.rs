mod common;

use anyhow::Result;
use common::{recording_progress, Harness};
use wvbridge::runtime::listeners::ProgressFanout;
use wvbridge::LocalListener;

#[test]
fn raw_progress_is_clamped_before_delivery() -> Result<()> {
    let h = Harness::new();
    let handle = h.create();
    let view = h.view_id(handle);
    let (seen, listener) = recording_progress();
    h.bridge.set_progress_listener(handle, Some(listener))?;

    let ui = h.bridge.ui().expect("loop started");
    let ws = h.ws.clone();
    ui.run_sync(move || {
        for raw in [-0.5, 0.3, 1.5, f64::NAN, f64::NEG_INFINITY] {
            ws.emit_progress(view, raw).expect("view alive");
        }
    })?;

    assert_eq!(*seen.lock(), vec![0.0, 0.3, 1.0, 0.0, 0.0]);
    assert!(seen.lock().iter().all(|p| (0.0..=1.0).contains(p)));
    Ok(())
}

#[test]
fn every_listener_call_detaches_what_it_attached() -> Result<()> {
    let h = Harness::new();
    let handle = h.create();
    let (seen, listener) = recording_progress();
    h.bridge.set_progress_listener(handle, Some(listener))?;
    h.bridge.navigate(handle, Some("https://example.com"))?;
    h.settle();

    assert_eq!(seen.lock().len(), 5);
    assert!(h.runtime.attach_count() >= 5);
    assert_eq!(h.runtime.attach_count(), h.runtime.detach_count());
    Ok(())
}

#[test]
fn failing_listener_only_loses_its_update() -> Result<()> {
    let h = Harness::new();
    let handle = h.create();
    h.bridge.set_progress_listener(
        handle,
        Some(LocalListener::consumer(|_| panic!("progress listener bug"))),
    )?;
    h.bridge.navigate(handle, Some("https://example.com"))?;
    h.settle();

    let snapshot = h.bridge.inspect(handle)?.expect("view alive");
    assert!(snapshot.progress_listener);
    h.bridge.close(handle)?;
    Ok(())
}

#[test]
fn new_load_supersedes_pending_progress() -> Result<()> {
    let h = Harness::new();
    let handle = h.create();
    let (seen, listener) = recording_progress();
    h.bridge.set_progress_listener(handle, Some(listener))?;

    // Both loads start within one ui task so no tick of the first runs
    // in between.
    let ui = h.bridge.ui().expect("loop started");
    let bridge = h.bridge.clone();
    ui.run_sync(move || {
        bridge.navigate(handle, Some("https://one.example"))?;
        bridge.navigate(handle, Some("https://two.example"))
    })??;
    h.settle();

    let values = seen.lock().clone();
    assert_eq!(values.last().copied(), Some(1.0));
    assert_eq!(values.iter().filter(|p| **p == 1.0).count(), 1);
    Ok(())
}

#[test]
fn fanout_shares_one_registration() -> Result<()> {
    let h = Harness::new();
    let handle = h.create();
    let fanout = ProgressFanout::new();
    let (a, b) = (
        std::sync::Arc::new(parking_lot::Mutex::new(Vec::new())),
        std::sync::Arc::new(parking_lot::Mutex::new(Vec::new())),
    );
    let (sink_a, sink_b) = (a.clone(), b.clone());
    fanout.subscribe(move |p| sink_a.lock().push(p));
    fanout.subscribe(move |p| sink_b.lock().push(p));
    h.bridge
        .set_progress_listener(handle, Some(fanout.into_listener()))?;

    h.bridge.navigate(handle, Some("https://example.com"))?;
    h.settle();

    assert_eq!(a.lock().last().copied(), Some(1.0));
    assert_eq!(*a.lock(), *b.lock());
    Ok(())
}
