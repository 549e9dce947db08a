use std::sync::{Arc, Weak};

use super::SignalBinding;
use crate::platform::{PlatformError, ViewId, WindowSystem};
use crate::runtime::{ManagedRuntime, ManagedValue, RuntimeBinding};
use crate::view::Lifecycle;

/// Clamps a load-progress fraction into `[0, 1]`. NaN becomes 0.
pub fn clamp_progress(value: f64) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0) as f32
    }
}

/// Forwards load progress to the caller's progress listener.
pub struct ProgressGateway<R: ManagedRuntime> {
    binding: SignalBinding<R>,
}

impl<R: ManagedRuntime> ProgressGateway<R> {
    pub fn new(runtime: Arc<R>, lifecycle: Arc<Lifecycle>) -> Arc<Self> {
        Arc::new(Self {
            binding: SignalBinding::new(runtime, lifecycle),
        })
    }

    pub fn install(
        self: &Arc<Self>,
        ws: &dyn WindowSystem,
        view: ViewId,
    ) -> Result<(), PlatformError> {
        let gateway: Weak<Self> = Arc::downgrade(self);
        self.binding.connect(ws, view, || {
            ws.connect_progress(
                view,
                Box::new(move |value| {
                    if let Some(gateway) = gateway.upgrade() {
                        gateway.deliver(value);
                    }
                }),
            )
        })
    }

    pub fn uninstall(&self, ws: &dyn WindowSystem) {
        self.binding.disconnect(ws);
    }

    pub fn is_installed(&self) -> bool {
        self.binding.is_connected()
    }

    pub fn set_listener(&self, listener: Option<R::Listener>) {
        self.binding.set_listener(listener);
    }

    pub fn clear_listener(&self) {
        self.binding.slot().clear();
    }

    pub fn has_listener(&self) -> bool {
        self.binding.slot().is_set()
    }

    pub fn deliver(&self, value: f64) {
        if self.binding.is_closing() {
            return;
        }
        let Some(registration) = self.binding.slot().get() else {
            return;
        };
        let progress = clamp_progress(value);
        let binding = match RuntimeBinding::acquire(self.binding.runtime()) {
            Ok(binding) => binding,
            Err(err) => {
                tracing::debug!(target = "progress", error = %err, "progress update dropped");
                return;
            }
        };
        if let Err(err) = registration.call(&binding, ManagedValue::Float(progress)) {
            tracing::debug!(target = "progress", error = %err, progress, "progress update dropped");
        }
    }
}
