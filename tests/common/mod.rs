#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use wvbridge::platform::{ViewId, WindowSystem};
use wvbridge::{
    Bridge, BridgeConfig, HeadlessWindowSystem, LocalListener, LocalRuntime, ManagedValue, Size,
    UiLoop, ViewHandle, WindowId,
};

static SERIAL: Mutex<()> = parking_lot::const_mutex(());

/// The ui loop is process-wide; tests that start it run one at a time.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        thread_name: "wvbridge-test-ui".to_string(),
        ..BridgeConfig::default()
    }
}

pub struct Harness {
    pub ws: Arc<HeadlessWindowSystem>,
    pub runtime: Arc<LocalRuntime>,
    pub bridge: Arc<Bridge<LocalRuntime>>,
    pub parent: WindowId,
    _serial: MutexGuard<'static, ()>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_window_system(HeadlessWindowSystem::new())
    }

    pub fn with_window_system(ws: Arc<HeadlessWindowSystem>) -> Self {
        let guard = serial();
        UiLoop::shutdown();
        let runtime = Arc::new(LocalRuntime::new());
        let factory_ws = ws.clone();
        let bridge = Arc::new(Bridge::new(test_config(), runtime.clone(), move || {
            Ok(factory_ws.clone() as Arc<dyn WindowSystem>)
        }));
        let parent = ws.create_foreign_window(Size::new(640, 480));
        Self {
            ws,
            runtime,
            bridge,
            parent,
            _serial: guard,
        }
    }

    pub fn create(&self) -> ViewHandle {
        self.bridge
            .create(self.parent.get())
            .expect("view should embed")
    }

    /// Runs queued and deferred ui work until nothing is left.
    pub fn settle(&self) -> usize {
        let Some(ui) = self.bridge.ui() else {
            return 0;
        };
        let drain = ui.clone();
        ui.run_sync(move || drain.drain_pending())
            .expect("ui loop should accept work")
    }

    pub fn view_id(&self, handle: ViewHandle) -> ViewId {
        self.bridge
            .inspect(handle)
            .expect("valid handle")
            .and_then(|snapshot| snapshot.view)
            .expect("view should be open")
    }

    pub fn child(&self, handle: ViewHandle) -> WindowId {
        self.bridge
            .inspect(handle)
            .expect("valid handle")
            .and_then(|snapshot| snapshot.child)
            .expect("view should be open")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.bridge.shutdown();
    }
}

/// A progress listener that records every delivered value.
pub fn recording_progress() -> (Arc<Mutex<Vec<f32>>>, LocalListener) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = LocalListener::consumer(move |value| {
        if let ManagedValue::Float(progress) = value {
            sink.lock().push(progress);
        }
    });
    (seen, listener)
}

/// A navigation listener that records urls and answers with `answer`.
pub fn answering_navigation(answer: ManagedValue) -> (Arc<Mutex<Vec<String>>>, LocalListener) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = LocalListener::function(move |value| {
        if let ManagedValue::Str(url) = value {
            sink.lock().push(url);
        }
        answer.clone()
    });
    (seen, listener)
}
