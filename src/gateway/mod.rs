//! Forwarding of native view signals to caller listeners.

pub mod navigation;
pub mod progress;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::platform::{PlatformError, SignalId, ViewId, WindowSystem};
use crate::runtime::{CallShape, ManagedRuntime, ManagedValue, RuntimeBinding, RuntimeError};
use crate::view::Lifecycle;

pub use navigation::NavigationGateway;
pub use progress::{clamp_progress, ProgressGateway};

/// A listener together with the call target resolved when it was registered.
pub(crate) struct Registration<R: ManagedRuntime> {
    listener: R::Listener,
    method: R::Method,
    shape: CallShape,
}

impl<R: ManagedRuntime> Registration<R> {
    pub(crate) fn call(
        &self,
        binding: &RuntimeBinding<'_, R>,
        arg: ManagedValue,
    ) -> Result<ManagedValue, RuntimeError> {
        binding.invoke(&self.listener, &self.method, arg)
    }

    pub(crate) fn shape(&self) -> CallShape {
        self.shape
    }
}

/// Holds at most one listener. Replacing or clearing releases the old one.
pub(crate) struct ListenerSlot<R: ManagedRuntime> {
    current: Mutex<Option<Arc<Registration<R>>>>,
}

impl<R: ManagedRuntime> ListenerSlot<R> {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Registers `listener`, trying the consumer shape before the function
    /// shape. A listener exposing neither is dropped.
    pub(crate) fn set(&self, runtime: &R, listener: Option<R::Listener>) {
        let previous = self.current.lock().take();
        drop(previous);

        let Some(listener) = listener else {
            return;
        };
        let binding = match RuntimeBinding::acquire(runtime) {
            Ok(binding) => binding,
            Err(err) => {
                tracing::debug!(target = "gateway", error = %err, "listener dropped");
                return;
            }
        };
        let resolved = [CallShape::Consumer, CallShape::Function]
            .into_iter()
            .find_map(|shape| binding.resolve(&listener, shape).map(|method| (method, shape)));
        match resolved {
            Some((method, shape)) => {
                *self.current.lock() = Some(Arc::new(Registration {
                    listener,
                    method,
                    shape,
                }));
            }
            None => {
                tracing::debug!(target = "gateway", "listener has no single-argument method");
            }
        }
    }

    pub(crate) fn clear(&self) {
        let previous = self.current.lock().take();
        drop(previous);
    }

    pub(crate) fn get(&self) -> Option<Arc<Registration<R>>> {
        self.current.lock().clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.current.lock().is_some()
    }
}

/// State shared by both gateways: one signal connection and one listener.
pub(crate) struct SignalBinding<R: ManagedRuntime> {
    runtime: Arc<R>,
    lifecycle: Arc<Lifecycle>,
    slot: ListenerSlot<R>,
    connection: Mutex<Option<(ViewId, SignalId)>>,
}

impl<R: ManagedRuntime> SignalBinding<R> {
    pub(crate) fn new(runtime: Arc<R>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            runtime,
            lifecycle,
            slot: ListenerSlot::new(),
            connection: Mutex::new(None),
        }
    }

    /// Drops any previous connection, then records the one `connect` makes.
    pub(crate) fn connect(
        &self,
        ws: &dyn WindowSystem,
        view: ViewId,
        connect: impl FnOnce() -> Result<SignalId, PlatformError>,
    ) -> Result<(), PlatformError> {
        self.disconnect(ws);
        let signal = connect()?;
        *self.connection.lock() = Some((view, signal));
        Ok(())
    }

    pub(crate) fn disconnect(&self, ws: &dyn WindowSystem) {
        let connection = self.connection.lock().take();
        if let Some((view, signal)) = connection {
            ws.disconnect(view, signal);
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    pub(crate) fn runtime(&self) -> &R {
        &self.runtime
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.lifecycle.is_closing()
    }

    pub(crate) fn slot(&self) -> &ListenerSlot<R> {
        &self.slot
    }

    pub(crate) fn set_listener(&self, listener: Option<R::Listener>) {
        self.slot.set(&self.runtime, listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::local::{LocalListener, LocalRuntime};

    #[test]
    fn prefers_consumer_then_function() {
        let runtime = LocalRuntime::new();
        let slot = ListenerSlot::<LocalRuntime>::new();
        slot.set(&runtime, Some(LocalListener::consumer(|_| {})));
        assert_eq!(slot.get().unwrap().shape(), CallShape::Consumer);
        slot.set(&runtime, Some(LocalListener::function(|v| v)));
        assert_eq!(slot.get().unwrap().shape(), CallShape::Function);
    }

    #[test]
    fn unresolvable_listener_clears_slot() {
        let runtime = LocalRuntime::new();
        let slot = ListenerSlot::<LocalRuntime>::new();
        slot.set(&runtime, Some(LocalListener::consumer(|_| {})));
        slot.set(&runtime, Some(LocalListener::Opaque));
        assert!(!slot.is_set());
    }

    #[test]
    fn replacing_releases_previous_listener() {
        let runtime = LocalRuntime::new();
        let slot = ListenerSlot::<LocalRuntime>::new();
        let token = Arc::new(());
        let held = token.clone();
        slot.set(
            &runtime,
            Some(LocalListener::consumer(move |_| {
                let _ = &held;
            })),
        );
        assert_eq!(Arc::strong_count(&token), 2);
        slot.set(&runtime, None);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn reconnecting_drops_the_old_signal() {
        use crate::platform::headless::HeadlessWindowSystem;
        use crate::platform::Size;

        let ws = HeadlessWindowSystem::new();
        let surface = ws.create_surface(Size::new(10, 10)).unwrap();
        let view = ws.create_view(surface).unwrap();
        let binding = SignalBinding::new(Arc::new(LocalRuntime::new()), Arc::new(Lifecycle::new()));

        for _ in 0..2 {
            binding
                .connect(&*ws, view, || ws.connect_progress(view, Box::new(|_| {})))
                .unwrap();
        }
        assert!(binding.is_connected());
        assert_eq!(ws.view_info(view).unwrap().signals, 1);

        binding.disconnect(&*ws);
        assert!(!binding.is_connected());
        assert_eq!(ws.view_info(view).unwrap().signals, 0);
    }
}
