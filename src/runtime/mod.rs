//! The managed-runtime boundary.
//!
//! Listener calls cross into the caller's runtime through a
//! [`RuntimeBinding`], which attaches the current thread when needed and
//! detaches it again on drop only if it did the attaching.

pub mod listeners;
pub mod local;

#[cfg(feature = "jni")]
pub mod jni;

use std::marker::PhantomData;

use thiserror::Error;

/// A value passed to or returned from a managed listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedValue {
    Null,
    Bool(bool),
    Float(f32),
    Str(String),
    /// Any other object the bridge does not interpret.
    Object,
}

/// Single-argument call shapes a listener may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Takes one argument, returns nothing.
    Consumer,
    /// Takes one argument, returns a value.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("managed runtime unavailable")]
    Unavailable,
    #[error("failed to attach thread: {0}")]
    AttachFailed(String),
    #[error("listener raised: {0}")]
    Exception(String),
    #[error("call failed: {0}")]
    Call(String),
}

pub trait ManagedRuntime: Sized + Send + Sync + 'static {
    type Listener: Send + Sync + 'static;
    type Method: Send + Sync + 'static;

    fn is_current_thread_attached(&self) -> bool;
    fn attach_current_thread(&self) -> Result<(), RuntimeError>;
    fn detach_current_thread(&self);

    /// Resolves the call target of `shape` on `listener`, if it has one.
    fn resolve(
        &self,
        binding: &RuntimeBinding<'_, Self>,
        listener: &Self::Listener,
        shape: CallShape,
    ) -> Option<Self::Method>;

    fn invoke(
        &self,
        binding: &RuntimeBinding<'_, Self>,
        listener: &Self::Listener,
        method: &Self::Method,
        arg: ManagedValue,
    ) -> Result<ManagedValue, RuntimeError>;

    /// Raises a typed error to the caller. Never replaces one already pending.
    fn raise(&self, binding: &RuntimeBinding<'_, Self>, class: &str, message: &str);
}

/// Scoped attachment of the current thread to the managed runtime.
///
/// Not `Send`: the attachment belongs to the thread that created it.
pub struct RuntimeBinding<'a, R: ManagedRuntime> {
    runtime: &'a R,
    attached_here: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a, R: ManagedRuntime> RuntimeBinding<'a, R> {
    pub fn acquire(runtime: &'a R) -> Result<Self, RuntimeError> {
        let attached_here = if runtime.is_current_thread_attached() {
            false
        } else {
            runtime.attach_current_thread()?;
            true
        };
        Ok(Self {
            runtime,
            attached_here,
            _thread_bound: PhantomData,
        })
    }

    pub fn attached_here(&self) -> bool {
        self.attached_here
    }

    pub fn resolve(&self, listener: &R::Listener, shape: CallShape) -> Option<R::Method> {
        self.runtime.resolve(self, listener, shape)
    }

    pub fn invoke(
        &self,
        listener: &R::Listener,
        method: &R::Method,
        arg: ManagedValue,
    ) -> Result<ManagedValue, RuntimeError> {
        self.runtime.invoke(self, listener, method, arg)
    }

    pub fn raise(&self, class: &str, message: &str) {
        self.runtime.raise(self, class, message)
    }
}

impl<R: ManagedRuntime> Drop for RuntimeBinding<'_, R> {
    fn drop(&mut self) {
        if self.attached_here {
            self.runtime.detach_current_thread();
        }
    }
}
