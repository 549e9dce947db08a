//! Entry points called by the managed side.
//!
//! Every call may arrive on any thread. Native work is marshalled onto the
//! ui loop; views are addressed by generation-checked handles so a stale
//! handle resolves to nothing instead of a freed view.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use raw_window_handle::RawWindowHandle;
use slotmap::{Key, KeyData, SlotMap};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::event_loop::UiLoop;
use crate::platform::{PlatformError, WindowId, WindowSystem};
use crate::runtime::{ManagedRuntime, RuntimeBinding};
use crate::view::{EmbeddedView, ViewSnapshot};

slotmap::new_key_type! {
    pub struct ViewKey;
}

/// Opaque view handle handed to the managed side. Zero is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewHandle(u64);

impl ViewHandle {
    pub const NULL: ViewHandle = ViewHandle(0);

    pub fn from_raw(raw: u64) -> Self {
        ViewHandle(raw)
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn from_key(key: ViewKey) -> Self {
        ViewHandle(key.data().as_ffi())
    }

    fn key(self) -> Result<ViewKey, BridgeError> {
        if self.is_null() {
            return Err(BridgeError::InvalidHandle);
        }
        Ok(KeyData::from_ffi(self.0).into())
    }
}

pub type WindowSystemFactory =
    Arc<dyn Fn() -> Result<Arc<dyn WindowSystem>, PlatformError> + Send + Sync>;

#[derive(Clone)]
struct Started {
    ui: UiLoop,
    ws: Arc<dyn WindowSystem>,
}

pub struct Bridge<R: ManagedRuntime> {
    config: BridgeConfig,
    runtime: Arc<R>,
    factory: WindowSystemFactory,
    started: Mutex<Option<Started>>,
    starting: Mutex<()>,
    views: RwLock<SlotMap<ViewKey, Arc<EmbeddedView<R>>>>,
}

impl<R: ManagedRuntime> Bridge<R> {
    /// Creates the bridge. The ui loop starts with the first view.
    pub fn new<F>(config: BridgeConfig, runtime: Arc<R>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn WindowSystem>, PlatformError> + Send + Sync + 'static,
    {
        Self {
            config,
            runtime,
            factory: Arc::new(factory),
            started: Mutex::new(None),
            starting: Mutex::new(()),
            views: RwLock::new(SlotMap::with_key()),
        }
    }

    /// Like [`Bridge::new`], with the configuration from `$WVBRIDGE_CONFIG`
    /// or the per-user config directory.
    pub fn from_env<F>(runtime: Arc<R>, factory: F) -> Result<Self, BridgeError>
    where
        F: Fn() -> Result<Arc<dyn WindowSystem>, PlatformError> + Send + Sync + 'static,
    {
        Ok(Self::new(BridgeConfig::from_env()?, runtime, factory))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// The ui loop, once a view has been created.
    pub fn ui(&self) -> Option<UiLoop> {
        self.running().map(|started| started.ui)
    }

    pub fn live_views(&self) -> usize {
        self.views.read().len()
    }

    /// Embeds a new view inside the foreign window `parent`.
    pub fn create(&self, parent: u64) -> Result<ViewHandle, BridgeError> {
        let parent = WindowId::new(parent).ok_or(BridgeError::InvalidHandle)?;
        self.create_in(parent)
    }

    pub fn create_for(&self, parent: RawWindowHandle) -> Result<ViewHandle, BridgeError> {
        let parent = WindowId::try_from(parent).map_err(|err| match err {
            PlatformError::Unsupported(name) => BridgeError::Capability(name),
            other => BridgeError::Platform(other),
        })?;
        self.create_in(parent)
    }

    fn create_in(&self, parent: WindowId) -> Result<ViewHandle, BridgeError> {
        let Started { ui, ws } = self.ensure_started()?;
        let runtime = self.runtime.clone();
        let view = ui.run_sync(move || EmbeddedView::build(&*ws, parent, runtime))??;
        let key = self.views.write().insert(view);
        let handle = ViewHandle::from_key(key);
        tracing::debug!(target = "bridge", handle = handle.into_raw(), %parent, "view created");
        Ok(handle)
    }

    pub fn resize(&self, handle: ViewHandle, width: i32, height: i32) -> Result<(), BridgeError> {
        let Some((view, Started { ui, ws })) = self.resolve(handle)? else {
            return Ok(());
        };
        if let Err(err) = ui.run_sync(move || view.resize(&*ws, width, height)) {
            tracing::warn!(target = "bridge", error = %err, "resize dropped");
        }
        Ok(())
    }

    /// Same as [`Bridge::resize`]; the child always sits at the parent's
    /// origin, so `x` and `y` are not used.
    pub fn update(
        &self,
        handle: ViewHandle,
        width: i32,
        height: i32,
        _x: i32,
        _y: i32,
    ) -> Result<(), BridgeError> {
        self.resize(handle, width, height)
    }

    /// Loads `url`, or the blank page when it is absent or empty.
    pub fn navigate(&self, handle: ViewHandle, url: Option<&str>) -> Result<(), BridgeError> {
        let url = match url {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => self.config.blank_url.clone(),
        };
        let Some((view, Started { ui, ws })) = self.resolve(handle)? else {
            return Ok(());
        };
        if let Err(err) = ui.run_sync(move || view.navigate(&*ws, &url)) {
            tracing::warn!(target = "bridge", error = %err, "navigation dropped");
        }
        Ok(())
    }

    pub fn set_navigation_handler(
        &self,
        handle: ViewHandle,
        listener: Option<R::Listener>,
    ) -> Result<(), BridgeError> {
        if let Some(view) = self.lookup(handle)? {
            view.set_navigation_listener(listener);
        }
        Ok(())
    }

    pub fn set_progress_listener(
        &self,
        handle: ViewHandle,
        listener: Option<R::Listener>,
    ) -> Result<(), BridgeError> {
        if let Some(view) = self.lookup(handle)? {
            view.set_progress_listener(listener);
        }
        Ok(())
    }

    /// Tears the view down. Idempotent; returns once native resources are
    /// gone, after which the handle resolves to nothing.
    ///
    /// A second closer waits for the first to finish, unless it runs on the
    /// ui loop, where the first closer's teardown may be queued behind it.
    pub fn close(&self, handle: ViewHandle) -> Result<(), BridgeError> {
        let key = handle.key()?;
        let Some(view) = self.views.read().get(key).cloned() else {
            return Ok(());
        };
        let started = self.running();
        if !view.lifecycle().begin_close() {
            let on_loop = started.as_ref().is_some_and(|s| s.ui.is_loop_thread());
            if !on_loop {
                view.lifecycle().wait_closed();
            }
            return Ok(());
        }

        if let Some(Started { ui, ws }) = started {
            let closing = view.clone();
            let loop_handle = ui.clone();
            if let Err(err) = ui.run_sync(move || closing.teardown(&*ws, &loop_handle)) {
                tracing::warn!(target = "bridge", error = %err, "teardown did not complete");
            }
        }
        self.views.write().remove(key);
        view.lifecycle().finish_close();
        tracing::debug!(target = "bridge", handle = handle.into_raw(), "view closed");
        Ok(())
    }

    pub fn inspect(&self, handle: ViewHandle) -> Result<Option<ViewSnapshot>, BridgeError> {
        let Some((view, Started { ui, .. })) = self.resolve(handle)? else {
            return Ok(None);
        };
        Ok(Some(ui.run_sync(move || view.snapshot())?))
    }

    pub fn close_all(&self) {
        let handles: Vec<ViewHandle> = self
            .views
            .read()
            .keys()
            .map(ViewHandle::from_key)
            .collect();
        for handle in handles {
            if let Err(err) = self.close(handle) {
                tracing::warn!(target = "bridge", error = %err, "close failed");
            }
        }
    }

    /// Closes every view and stops the ui loop.
    pub fn shutdown(&self) {
        self.close_all();
        let started = self.started.lock().take();
        if let Some(started) = started {
            started.ui.stop();
        }
    }

    /// Raises `err` in the managed runtime as a typed exception.
    pub fn report(&self, err: &BridgeError) {
        match RuntimeBinding::acquire(&*self.runtime) {
            Ok(binding) => binding.raise(err.exception_class(), &err.to_string()),
            Err(bind_err) => {
                tracing::warn!(target = "bridge", error = %err, cause = %bind_err, "could not raise")
            }
        }
    }

    fn lookup(&self, handle: ViewHandle) -> Result<Option<Arc<EmbeddedView<R>>>, BridgeError> {
        let key = handle.key()?;
        Ok(self.views.read().get(key).cloned())
    }

    fn resolve(
        &self,
        handle: ViewHandle,
    ) -> Result<Option<(Arc<EmbeddedView<R>>, Started)>, BridgeError> {
        let Some(view) = self.lookup(handle)? else {
            return Ok(None);
        };
        Ok(self.running().map(|started| (view, started)))
    }

    fn running(&self) -> Option<Started> {
        self.started
            .lock()
            .as_ref()
            .filter(|started| started.ui.is_running())
            .cloned()
    }

    fn ensure_started(&self) -> Result<Started, BridgeError> {
        if let Some(started) = self.running() {
            return Ok(started);
        }
        // Racing first creates share one window system.
        let _starting = self.starting.lock();
        if let Some(started) = self.running() {
            return Ok(started);
        }
        let ui = UiLoop::start(&self.config)?;
        let factory = self.factory.clone();
        let ws = ui
            .run_sync(move || factory())?
            .map_err(|err| BridgeError::Initialization(format!("window system: {err}")))?;

        let started = Started { ui, ws };
        *self.started.lock() = Some(started.clone());
        Ok(started)
    }
}
