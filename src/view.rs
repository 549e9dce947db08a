//! The embedded view context.
//!
//! Everything behind [`NativeView`] is touched only on the ui loop thread.
//! The [`Lifecycle`] flag is the one field read from any thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::BridgeError;
use crate::event_loop::UiLoop;
use crate::gateway::{NavigationGateway, ProgressGateway};
use crate::platform::{
    DisplayBackend, PlatformError, Size, SurfaceId, ViewId, WindowId, WindowSystem,
};
use crate::runtime::ManagedRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Open,
            1 => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }
}

/// `Open -> Closing -> Closed`, never backwards.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    closed: Mutex<()>,
    closed_signal: Condvar,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Open as u8),
            closed: Mutex::new(()),
            closed_signal: Condvar::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_closing(&self) -> bool {
        self.state() != LifecycleState::Open
    }

    /// Moves to `Closing`. Only the first caller gets `true`.
    pub fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(
                LifecycleState::Open as u8,
                LifecycleState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn finish_close(&self) {
        let _guard = self.closed.lock();
        self.state
            .store(LifecycleState::Closed as u8, Ordering::Release);
        self.closed_signal.notify_all();
    }

    /// Blocks until [`Lifecycle::finish_close`] has run.
    pub fn wait_closed(&self) {
        let mut guard = self.closed.lock();
        while self.state() != LifecycleState::Closed {
            self.closed_signal.wait(&mut guard);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

struct NativeView {
    parent: WindowId,
    child: Option<WindowId>,
    backend: DisplayBackend,
    surface: Option<SurfaceId>,
    view: Option<ViewId>,
}

/// Read-only copy of a view's native state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub parent: WindowId,
    pub child: Option<WindowId>,
    pub backend: DisplayBackend,
    pub surface: Option<SurfaceId>,
    pub view: Option<ViewId>,
    pub state: LifecycleState,
    pub navigation_listener: bool,
    pub progress_listener: bool,
}

pub struct EmbeddedView<R: ManagedRuntime> {
    lifecycle: Arc<Lifecycle>,
    native: Mutex<NativeView>,
    navigation: Arc<NavigationGateway<R>>,
    progress: Arc<ProgressGateway<R>>,
}

impl<R: ManagedRuntime> EmbeddedView<R> {
    /// Builds the native surface inside `parent`. Runs on the ui loop.
    ///
    /// Nothing is left behind when this fails.
    pub fn build(
        ws: &dyn WindowSystem,
        parent: WindowId,
        runtime: Arc<R>,
    ) -> Result<Arc<Self>, BridgeError> {
        let backend = ws.open_display().map_err(|err| match err {
            PlatformError::Unsupported(name) => BridgeError::Capability(name),
            other => BridgeError::Initialization(format!("display unavailable: {other}")),
        })?;

        let size = ws
            .window_geometry(parent)
            .map(Size::at_least_min)
            .unwrap_or_else(|err| {
                tracing::debug!(target = "view", %parent, error = %err, "parent geometry unavailable");
                Size::MIN
            });

        let surface = ws
            .create_surface(size)
            .map_err(|err| BridgeError::Initialization(format!("surface: {err}")))?;

        let lifecycle = Arc::new(Lifecycle::new());
        let navigation = NavigationGateway::new(runtime.clone(), lifecycle.clone());
        let progress = ProgressGateway::new(runtime, lifecycle.clone());

        let embedded = embed(ws, parent, surface, size).and_then(|(view, child)| {
            navigation.install(ws, view)?;
            progress.install(ws, view)?;
            Ok((view, child))
        });
        let (view, child) = match embedded {
            Ok(built) => built,
            Err(err) => {
                navigation.uninstall(ws);
                progress.uninstall(ws);
                ws.destroy_surface(surface);
                return Err(BridgeError::Initialization(format!(
                    "embedding into {parent} failed: {err}"
                )));
            }
        };

        tracing::info!(target = "view", %parent, %child, width = size.width, height = size.height, "view embedded");
        Ok(Arc::new(Self {
            lifecycle,
            native: Mutex::new(NativeView {
                parent,
                child: Some(child),
                backend,
                surface: Some(surface),
                view: Some(view),
            }),
            navigation,
            progress,
        }))
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Resizes the child to the parent's current geometry. Runs on the ui
    /// loop; returns the applied size, or `None` once closing.
    pub fn resize(&self, ws: &dyn WindowSystem, width: i32, height: i32) -> Option<Size> {
        if self.lifecycle.is_closing() {
            return None;
        }
        let requested = Size::clamped(width, height);
        let (parent, child, view) = {
            let native = self.native.lock();
            (native.parent, native.child?, native.view?)
        };
        let size = match ws.window_geometry(parent) {
            Ok(actual) => actual.at_least_min(),
            Err(err) => {
                tracing::debug!(target = "view", %parent, error = %err, "using requested size");
                requested
            }
        };
        ws.queue_view_resize(view);
        if let Err(err) = tolerate_race(ws.move_resize(child, size)) {
            tracing::warn!(target = "view", %child, error = %err, "resize failed");
        }
        ws.flush();
        Some(size)
    }

    /// Loads `url`. Runs on the ui loop; a no-op once closing.
    pub fn navigate(&self, ws: &dyn WindowSystem, url: &str) {
        if self.lifecycle.is_closing() {
            return;
        }
        let Some(view) = self.native.lock().view else {
            return;
        };
        if let Err(err) = ws.load_uri(view, url) {
            tracing::warn!(target = "view", url, error = %err, "load failed");
        }
    }

    pub fn set_navigation_listener(&self, listener: Option<R::Listener>) {
        if self.lifecycle.is_closing() {
            return;
        }
        self.navigation.set_listener(listener);
    }

    pub fn set_progress_listener(&self, listener: Option<R::Listener>) {
        if self.lifecycle.is_closing() {
            return;
        }
        self.progress.set_listener(listener);
    }

    /// Releases every native resource. Runs on the ui loop after the
    /// lifecycle moved to `Closing`.
    pub fn teardown(&self, ws: &dyn WindowSystem, ui: &UiLoop) {
        self.navigation.uninstall(ws);
        self.progress.uninstall(ws);
        self.navigation.clear_listener();
        self.progress.clear_listener();

        let (child, surface) = {
            let mut native = self.native.lock();
            native.view = None;
            (native.child.take(), native.surface.take())
        };

        if let Some(child) = child {
            let root = ws.root_window();
            if let Err(err) = tolerate_race(ws.reparent(child, root)) {
                tracing::debug!(target = "view", %child, error = %err, "detach failed");
            }
            if let Err(err) = tolerate_race(ws.unmap(child)) {
                tracing::debug!(target = "view", %child, error = %err, "unmap failed");
            }
            ws.flush();
        }
        if let Some(surface) = surface {
            ws.destroy_surface(surface);
        }

        let drained = ui.drain_pending();
        tracing::debug!(target = "view", drained, "view torn down");
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let native = self.native.lock();
        ViewSnapshot {
            parent: native.parent,
            child: native.child,
            backend: native.backend,
            surface: native.surface,
            view: native.view,
            state: self.lifecycle.state(),
            navigation_listener: self.navigation.has_listener(),
            progress_listener: self.progress.has_listener(),
        }
    }
}

fn embed(
    ws: &dyn WindowSystem,
    parent: WindowId,
    surface: SurfaceId,
    size: Size,
) -> Result<(ViewId, WindowId), PlatformError> {
    let view = ws.create_view(surface)?;
    let child = ws.realize_surface(surface)?;
    tolerate_race(ws.reparent(child, parent))?;
    tolerate_race(ws.move_resize(child, size))?;
    tolerate_race(ws.map_raised(child))?;
    ws.flush();
    Ok((view, child))
}

/// A foreign window may vanish at any time; that is not an error here.
fn tolerate_race(result: Result<(), PlatformError>) -> Result<(), PlatformError> {
    match result {
        Err(PlatformError::BadWindow(window)) => {
            tracing::debug!(target = "view", %window, "window vanished");
            Ok(())
        }
        other => other,
    }
}
