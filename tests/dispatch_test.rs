mod common;

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use common::{serial, test_config};
use parking_lot::Mutex;
use wvbridge::{DispatchError, UiLoop};

#[test]
fn start_is_idempotent_and_names_the_thread() -> Result<()> {
    let _serial = serial();
    let first = UiLoop::start(&test_config())?;
    let second = UiLoop::start(&test_config())?;
    assert!(first.is_ready() && second.is_ready());

    let a = first.run_sync(|| thread::current().id())?;
    let b = second.run_sync(|| thread::current().id())?;
    assert_eq!(a, b);
    let name = first.run_sync(|| thread::current().name().map(str::to_string))?;
    assert_eq!(name.as_deref(), Some("wvbridge-test-ui"));
    assert!(!first.is_loop_thread());

    first.stop();
    second.stop();
    assert!(!first.is_running());
    Ok(())
}

#[test]
fn loop_restarts_after_stop() -> Result<()> {
    let _serial = serial();
    UiLoop::shutdown();
    UiLoop::shutdown();

    let ui = UiLoop::start(&test_config())?;
    ui.stop();
    assert!(UiLoop::current().is_none());
    assert_eq!(ui.run_sync(|| 1), Err(DispatchError::NotRunning));
    assert_eq!(ui.run_async(|| {}), Err(DispatchError::NotRunning));

    let again = UiLoop::start(&test_config())?;
    assert_eq!(again.run_sync(|| 2)?, 2);
    again.stop();
    Ok(())
}

#[test]
fn stopping_from_the_loop_keeps_it_registered_until_exit() -> Result<()> {
    let _serial = serial();
    let ui = UiLoop::start(&test_config())?;
    let inner = ui.clone();
    let (current_cleared, restart_refused) = ui.run_sync(move || {
        inner.stop();
        let restart = UiLoop::start(&test_config());
        (
            UiLoop::current().is_none(),
            matches!(restart, Err(wvbridge::BridgeError::Initialization(_))),
        )
    })?;
    assert!(current_cleared);
    assert!(restart_refused);

    let old_thread = ui.run_sync(|| thread::current().id());
    assert!(old_thread.is_err());
    let again = UiLoop::start(&test_config())?;
    assert!(!ui.is_running());
    assert!(again.is_ready());
    again.stop();
    Ok(())
}

#[test]
fn panicking_sync_task_releases_the_caller() -> Result<()> {
    let _serial = serial();
    let ui = UiLoop::start(&test_config())?;

    let err = ui.run_sync(|| -> u32 { panic!("task exploded") }).unwrap_err();
    assert_eq!(err, DispatchError::TaskPanicked("task exploded".into()));

    ui.run_async(|| panic!("async task exploded"))?;
    assert_eq!(ui.run_sync(|| "still running")?, "still running");
    ui.stop();
    Ok(())
}

#[test]
fn dispatch_from_the_loop_thread_runs_inline() -> Result<()> {
    let _serial = serial();
    let ui = UiLoop::start(&test_config())?;
    let inner = ui.clone();
    let nested = ui.run_sync(move || {
        assert!(inner.is_loop_thread());
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = order.clone();
        inner
            .run_async(move || log.lock().push("async"))
            .expect("inline async");
        order.lock().push("after");
        let value = inner.run_sync(|| 41 + 1).expect("inline sync");
        let snapshot = order.lock().clone();
        (value, snapshot)
    })?;
    assert_eq!(nested, (42, vec!["async", "after"]));
    ui.stop();
    Ok(())
}

#[test]
fn submissions_from_one_thread_keep_their_order() -> Result<()> {
    let _serial = serial();
    let ui = UiLoop::start(&test_config())?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..200 {
        let seen = seen.clone();
        ui.run_async(move || seen.lock().push(i))?;
    }
    let observed = {
        let seen = seen.clone();
        ui.run_sync(move || seen.lock().clone())?
    };
    assert_eq!(observed, (0..200).collect::<Vec<_>>());
    ui.stop();
    Ok(())
}

#[test]
fn drain_runs_deferred_work_on_the_loop_thread_only() -> Result<()> {
    let _serial = serial();
    let ui = UiLoop::start(&test_config())?;
    assert_eq!(ui.drain_pending(), 0);

    let inner = ui.clone();
    let (ran, order) = ui.run_sync(move || {
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second"] {
            let order = order.clone();
            inner
                .defer(move || order.lock().push(label))
                .expect("loop running");
        }
        let ran = inner.drain_pending();
        let order = order.lock().clone();
        (ran, order)
    })?;
    assert_eq!(ran, 2);
    assert_eq!(order, vec!["first", "second"]);
    ui.stop();
    Ok(())
}

#[test]
fn deferred_work_from_other_threads_wakes_the_loop() -> Result<()> {
    let _serial = serial();
    let ui = UiLoop::start(&test_config())?;
    let (tx, rx) = std::sync::mpsc::channel();
    ui.defer(move || {
        let _ = tx.send(thread::current().name().map(str::to_string));
    })?;
    let name = rx.recv_timeout(std::time::Duration::from_secs(5))?;
    assert_eq!(name.as_deref(), Some("wvbridge-test-ui"));
    ui.stop();
    Ok(())
}
