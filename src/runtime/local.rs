//! An in-process managed runtime whose listeners are Rust closures.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::{CallShape, ManagedRuntime, ManagedValue, RuntimeBinding, RuntimeError};
use crate::event_loop::panic_message;

type ConsumerFn = Arc<dyn Fn(ManagedValue) + Send + Sync>;
type FunctionFn = Arc<dyn Fn(ManagedValue) -> ManagedValue + Send + Sync>;

#[derive(Clone)]
pub enum LocalListener {
    Consumer(ConsumerFn),
    Function(FunctionFn),
    /// Exposes no callable shape.
    Opaque,
}

impl LocalListener {
    pub fn consumer<F>(f: F) -> Self
    where
        F: Fn(ManagedValue) + Send + Sync + 'static,
    {
        LocalListener::Consumer(Arc::new(f))
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(ManagedValue) -> ManagedValue + Send + Sync + 'static,
    {
        LocalListener::Function(Arc::new(f))
    }
}

impl fmt::Debug for LocalListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalListener::Consumer(_) => f.write_str("LocalListener::Consumer"),
            LocalListener::Function(_) => f.write_str("LocalListener::Function"),
            LocalListener::Opaque => f.write_str("LocalListener::Opaque"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalMethod {
    Accept,
    Apply,
}

#[derive(Default)]
pub struct LocalRuntime {
    attached: Mutex<HashSet<ThreadId>>,
    pending: Mutex<HashMap<ThreadId, (String, String)>>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    invocations: AtomicUsize,
    fail_attach: AtomicBool,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Takes the `(class, message)` raised on the current thread, if any.
    pub fn take_pending_error(&self) -> Option<(String, String)> {
        self.pending.lock().remove(&thread::current().id())
    }
}

impl ManagedRuntime for LocalRuntime {
    type Listener = LocalListener;
    type Method = LocalMethod;

    fn is_current_thread_attached(&self) -> bool {
        self.attached.lock().contains(&thread::current().id())
    }

    fn attach_current_thread(&self) -> Result<(), RuntimeError> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(RuntimeError::AttachFailed("runtime refused thread".into()));
        }
        if self.attached.lock().insert(thread::current().id()) {
            self.attaches.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn detach_current_thread(&self) {
        if self.attached.lock().remove(&thread::current().id()) {
            self.detaches.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn resolve(
        &self,
        _binding: &RuntimeBinding<'_, Self>,
        listener: &LocalListener,
        shape: CallShape,
    ) -> Option<LocalMethod> {
        match (listener, shape) {
            (LocalListener::Consumer(_), CallShape::Consumer) => Some(LocalMethod::Accept),
            (LocalListener::Function(_), CallShape::Function) => Some(LocalMethod::Apply),
            _ => None,
        }
    }

    fn invoke(
        &self,
        _binding: &RuntimeBinding<'_, Self>,
        listener: &LocalListener,
        method: &LocalMethod,
        arg: ManagedValue,
    ) -> Result<ManagedValue, RuntimeError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let outcome = match (listener, method) {
            (LocalListener::Consumer(f), LocalMethod::Accept) => {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    f(arg);
                    ManagedValue::Null
                }))
            }
            (LocalListener::Function(f), LocalMethod::Apply) => {
                panic::catch_unwind(AssertUnwindSafe(|| f(arg)))
            }
            _ => {
                return Err(RuntimeError::Call(format!(
                    "{method:?} is not callable on {listener:?}"
                )))
            }
        };
        outcome.map_err(|payload| RuntimeError::Exception(panic_message(payload.as_ref())))
    }

    fn raise(&self, _binding: &RuntimeBinding<'_, Self>, class: &str, message: &str) {
        self.pending
            .lock()
            .entry(thread::current().id())
            .or_insert_with(|| (class.to_string(), message.to_string()));
    }
}
