//! In-memory window system.
//!
//! Keeps a window tree, simulates page loads (a navigation policy request
//! followed by deferred progress ticks) and lets callers inject the failures
//! a real display server produces.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{
    DisplayBackend, NavigationRequest, NavigationSignal, PlatformError, PolicyDecision,
    ProgressSignal, SignalId, Size, SurfaceId, ViewId, WindowId, WindowSystem,
};
use crate::event_loop::UiLoop;

const PROGRESS_STEPS: &[f64] = &[0.1, 0.25, 0.5, 0.8, 1.0];
const ROOT_WINDOW: WindowId = WindowId(NonZeroU64::MIN);

type NavigationHandler = Arc<dyn Fn(&NavigationRequest) -> Option<PolicyDecision> + Send + Sync>;
type ProgressHandler = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub parent: Option<WindowId>,
    pub size: Size,
    pub mapped: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewInfo {
    pub uri: Option<String>,
    pub history: Vec<String>,
    pub blocked: Vec<String>,
    pub progress: Vec<f64>,
    pub resize_requests: u32,
    pub signals: usize,
}

struct WindowRecord {
    parent: Option<WindowId>,
    size: Size,
    mapped: bool,
    geometry_fails: bool,
}

struct SurfaceRecord {
    window: Option<WindowId>,
    view: Option<ViewId>,
}

struct ViewRecord {
    info: ViewInfo,
    load_generation: u64,
    navigation: BTreeMap<SignalId, NavigationHandler>,
    progress: BTreeMap<SignalId, ProgressHandler>,
}

struct State {
    next_id: NonZeroU64,
    backend: DisplayBackend,
    fail_realize: bool,
    flushes: u64,
    windows: HashMap<WindowId, WindowRecord>,
    surfaces: HashMap<SurfaceId, SurfaceRecord>,
    views: HashMap<ViewId, ViewRecord>,
}

impl State {
    fn next_id(&mut self) -> NonZeroU64 {
        self.next_id = self.next_id.saturating_add(1);
        self.next_id
    }

    fn window_mut(&mut self, window: WindowId) -> Result<&mut WindowRecord, PlatformError> {
        self.windows
            .get_mut(&window)
            .ok_or(PlatformError::BadWindow(window))
    }

    fn view_mut(&mut self, view: ViewId) -> Result<&mut ViewRecord, PlatformError> {
        self.views.get_mut(&view).ok_or_else(|| PlatformError::Failed {
            op: "view lookup",
            reason: format!("no view {}", view.0),
        })
    }

    fn remove_window_tree(&mut self, window: WindowId) {
        let children: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, record)| record.parent == Some(window))
            .map(|(id, _)| *id)
            .collect();
        for child in children {
            self.remove_window_tree(child);
        }
        self.windows.remove(&window);
    }
}

pub struct HeadlessWindowSystem {
    me: Weak<HeadlessWindowSystem>,
    state: Mutex<State>,
}

impl HeadlessWindowSystem {
    pub fn new() -> Arc<Self> {
        Self::with_backend(DisplayBackend::Headless)
    }

    pub fn with_backend(backend: DisplayBackend) -> Arc<Self> {
        let mut windows = HashMap::new();
        windows.insert(
            ROOT_WINDOW,
            WindowRecord {
                parent: None,
                size: Size::new(1920, 1080),
                mapped: true,
                geometry_fails: false,
            },
        );
        Arc::new_cyclic(|me| HeadlessWindowSystem {
            me: me.clone(),
            state: Mutex::new(State {
                next_id: ROOT_WINDOW.0,
                backend,
                fail_realize: false,
                flushes: 0,
                windows,
                surfaces: HashMap::new(),
                views: HashMap::new(),
            }),
        })
    }

    /// Creates a window owned by "someone else", mapped under the root.
    pub fn create_foreign_window(&self, size: Size) -> WindowId {
        let mut state = self.state.lock();
        let window = WindowId(state.next_id());
        state.windows.insert(
            window,
            WindowRecord {
                parent: Some(ROOT_WINDOW),
                size,
                mapped: true,
                geometry_fails: false,
            },
        );
        window
    }

    /// Destroys a window and everything parented inside it.
    pub fn destroy_window(&self, window: WindowId) {
        self.state.lock().remove_window_tree(window);
    }

    pub fn set_geometry(&self, window: WindowId, size: Size) {
        if let Some(record) = self.state.lock().windows.get_mut(&window) {
            record.size = size;
        }
    }

    pub fn fail_geometry(&self, window: WindowId, fail: bool) {
        if let Some(record) = self.state.lock().windows.get_mut(&window) {
            record.geometry_fails = fail;
        }
    }

    pub fn fail_realize(&self, fail: bool) {
        self.state.lock().fail_realize = fail;
    }

    pub fn window_info(&self, window: WindowId) -> Option<WindowInfo> {
        self.state.lock().windows.get(&window).map(|record| WindowInfo {
            parent: record.parent,
            size: record.size,
            mapped: record.mapped,
        })
    }

    pub fn view_info(&self, view: ViewId) -> Option<ViewInfo> {
        self.state.lock().views.get(&view).map(|record| {
            let mut info = record.info.clone();
            info.signals = record.navigation.len() + record.progress.len();
            info
        })
    }

    pub fn live_surfaces(&self) -> usize {
        self.state.lock().surfaces.len()
    }

    pub fn live_views(&self) -> usize {
        self.state.lock().views.len()
    }

    pub fn flushes(&self) -> u64 {
        self.state.lock().flushes
    }

    /// Emits a policy request as if the page asked for it. Call on the ui loop.
    pub fn request_policy(
        &self,
        view: ViewId,
        request: &NavigationRequest,
    ) -> Result<PolicyDecision, PlatformError> {
        let handlers: Vec<NavigationHandler> = {
            let mut state = self.state.lock();
            state.view_mut(view)?.navigation.values().cloned().collect()
        };
        let decision = handlers
            .iter()
            .find_map(|handler| handler(request))
            .unwrap_or(PolicyDecision::Use);
        Ok(decision)
    }

    /// Emits a raw progress value. Call on the ui loop.
    pub fn emit_progress(&self, view: ViewId, value: f64) -> Result<(), PlatformError> {
        let handlers: Vec<ProgressHandler> = {
            let mut state = self.state.lock();
            let record = state.view_mut(view)?;
            record.info.progress.push(value);
            record.progress.values().cloned().collect()
        };
        for handler in handlers {
            handler(value);
        }
        Ok(())
    }

    fn schedule_progress(&self, view: ViewId, generation: u64, step: usize) {
        let Some(ui) = UiLoop::current() else {
            tracing::debug!(target = "headless", "no ui loop; progress not simulated");
            return;
        };
        let me = self.me.clone();
        let scheduled = ui.defer(move || {
            if let Some(ws) = me.upgrade() {
                ws.progress_tick(view, generation, step);
            }
        });
        if let Err(err) = scheduled {
            tracing::debug!(target = "headless", error = %err, "progress tick dropped");
        }
    }

    fn progress_tick(&self, view: ViewId, generation: u64, step: usize) {
        let current = self
            .state
            .lock()
            .views
            .get(&view)
            .map(|record| record.load_generation);
        if current != Some(generation) {
            return;
        }
        if self.emit_progress(view, PROGRESS_STEPS[step]).is_err() {
            return;
        }
        if step + 1 < PROGRESS_STEPS.len() {
            self.schedule_progress(view, generation, step + 1);
        }
    }
}

impl WindowSystem for HeadlessWindowSystem {
    fn open_display(&self) -> Result<DisplayBackend, PlatformError> {
        let backend = self.state.lock().backend;
        if backend.supports_embedding() {
            Ok(backend)
        } else {
            Err(PlatformError::Unsupported(format!("{backend:?}")))
        }
    }

    fn window_geometry(&self, window: WindowId) -> Result<Size, PlatformError> {
        let mut state = self.state.lock();
        let record = state.window_mut(window)?;
        if record.geometry_fails {
            return Err(PlatformError::GeometryUnavailable);
        }
        Ok(record.size)
    }

    fn root_window(&self) -> WindowId {
        ROOT_WINDOW
    }

    fn create_surface(&self, size: Size) -> Result<SurfaceId, PlatformError> {
        if size.width == 0 || size.height == 0 {
            return Err(PlatformError::Failed {
                op: "create surface",
                reason: format!("zero-sized surface {}x{}", size.width, size.height),
            });
        }
        let mut state = self.state.lock();
        let surface = SurfaceId(state.next_id().get());
        state.surfaces.insert(
            surface,
            SurfaceRecord {
                window: None,
                view: None,
            },
        );
        Ok(surface)
    }

    fn create_view(&self, surface: SurfaceId) -> Result<ViewId, PlatformError> {
        let mut state = self.state.lock();
        if !state.surfaces.contains_key(&surface) {
            return Err(PlatformError::Failed {
                op: "create view",
                reason: format!("no surface {}", surface.0),
            });
        }
        let view = ViewId(state.next_id().get());
        state.views.insert(
            view,
            ViewRecord {
                info: ViewInfo::default(),
                load_generation: 0,
                navigation: BTreeMap::new(),
                progress: BTreeMap::new(),
            },
        );
        if let Some(record) = state.surfaces.get_mut(&surface) {
            record.view = Some(view);
        }
        Ok(view)
    }

    fn realize_surface(&self, surface: SurfaceId) -> Result<WindowId, PlatformError> {
        let mut state = self.state.lock();
        if state.fail_realize {
            return Err(PlatformError::Failed {
                op: "realize",
                reason: "surface has no native window".to_string(),
            });
        }
        if let Some(window) = state.surfaces.get(&surface).and_then(|record| record.window) {
            return Ok(window);
        }
        let window = WindowId(state.next_id());
        let record = state
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| PlatformError::Failed {
                op: "realize",
                reason: format!("no surface {}", surface.0),
            })?;
        record.window = Some(window);
        state.windows.insert(
            window,
            WindowRecord {
                parent: Some(ROOT_WINDOW),
                size: Size::MIN,
                mapped: false,
                geometry_fails: false,
            },
        );
        Ok(window)
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        let mut state = self.state.lock();
        let Some(record) = state.surfaces.remove(&surface) else {
            return;
        };
        if let Some(view) = record.view {
            state.views.remove(&view);
        }
        if let Some(window) = record.window {
            state.remove_window_tree(window);
        }
    }

    fn reparent(&self, child: WindowId, parent: WindowId) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if !state.windows.contains_key(&parent) {
            return Err(PlatformError::BadWindow(parent));
        }
        state.window_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn move_resize(&self, window: WindowId, size: Size) -> Result<(), PlatformError> {
        self.state.lock().window_mut(window)?.size = size;
        Ok(())
    }

    fn map_raised(&self, window: WindowId) -> Result<(), PlatformError> {
        self.state.lock().window_mut(window)?.mapped = true;
        Ok(())
    }

    fn unmap(&self, window: WindowId) -> Result<(), PlatformError> {
        self.state.lock().window_mut(window)?.mapped = false;
        Ok(())
    }

    fn flush(&self) {
        self.state.lock().flushes += 1;
    }

    fn queue_view_resize(&self, view: ViewId) {
        if let Some(record) = self.state.lock().views.get_mut(&view) {
            record.info.resize_requests += 1;
        }
    }

    fn load_uri(&self, view: ViewId, uri: &str) -> Result<(), PlatformError> {
        let request = NavigationRequest::navigation(uri);
        if self.request_policy(view, &request)? == PolicyDecision::Ignore {
            let mut state = self.state.lock();
            state.view_mut(view)?.info.blocked.push(uri.to_string());
            tracing::debug!(target = "headless", uri, "navigation ignored");
            return Ok(());
        }

        let generation = {
            let mut state = self.state.lock();
            let record = state.view_mut(view)?;
            record.info.uri = Some(uri.to_string());
            record.info.history.push(uri.to_string());
            record.load_generation += 1;
            record.load_generation
        };
        self.schedule_progress(view, generation, 0);
        Ok(())
    }

    fn connect_navigation(
        &self,
        view: ViewId,
        handler: NavigationSignal,
    ) -> Result<SignalId, PlatformError> {
        let mut state = self.state.lock();
        let signal = SignalId(state.next_id().get());
        state
            .view_mut(view)?
            .navigation
            .insert(signal, Arc::from(handler));
        Ok(signal)
    }

    fn connect_progress(
        &self,
        view: ViewId,
        handler: ProgressSignal,
    ) -> Result<SignalId, PlatformError> {
        let mut state = self.state.lock();
        let signal = SignalId(state.next_id().get());
        state
            .view_mut(view)?
            .progress
            .insert(signal, Arc::from(handler));
        Ok(signal)
    }

    fn disconnect(&self, view: ViewId, signal: SignalId) {
        if let Some(record) = self.state.lock().views.get_mut(&view) {
            record.navigation.remove(&signal);
            record.progress.remove(&signal);
        }
    }
}
