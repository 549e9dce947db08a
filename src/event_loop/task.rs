use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::oneshot;

use crate::error::DispatchError;

pub(crate) type Completion = oneshot::Sender<Result<(), DispatchError>>;

/// A unit of work queued for the ui loop.
///
/// Dropping a task without running it drops its completion sender, which
/// releases a synchronous waiter with [`DispatchError::LoopExited`].
pub(crate) struct PendingTask {
    work: Box<dyn FnOnce() + Send + 'static>,
    completion: Option<Completion>,
}

impl PendingTask {
    pub(crate) fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            work: Box::new(work),
            completion: None,
        }
    }

    pub(crate) fn with_completion<F>(work: F, completion: Completion) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            work: Box::new(work),
            completion: Some(completion),
        }
    }

    pub(crate) fn is_sync(&self) -> bool {
        self.completion.is_some()
    }

    /// Runs the work and signals completion, even when the work panicked.
    pub(crate) fn run(self) -> Result<(), DispatchError> {
        let PendingTask { work, completion } = self;
        let result = panic::catch_unwind(AssertUnwindSafe(work))
            .map_err(|payload| DispatchError::TaskPanicked(panic_message(payload.as_ref())));
        if let Some(completion) = completion {
            let _ = completion.send(result.clone());
        }
        result
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
