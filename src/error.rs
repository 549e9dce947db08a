use thiserror::Error;

use crate::config::ConfigError;
use crate::platform::PlatformError;

/// Failures of the UI-loop dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("ui loop is not running")]
    NotRunning,
    #[error("ui loop exited before the task ran")]
    LoopExited,
    #[error("task panicked on the ui loop: {0}")]
    TaskPanicked(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("unsupported windowing backend: {0}")]
    Capability(String),
    #[error("invalid view handle")]
    InvalidHandle,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Managed exception class raised for this error.
    pub fn exception_class(&self) -> &'static str {
        match self {
            BridgeError::InvalidHandle => "java/lang/NullPointerException",
            _ => "java/lang/RuntimeException",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_maps_to_null_pointer() {
        assert_eq!(
            BridgeError::InvalidHandle.exception_class(),
            "java/lang/NullPointerException"
        );
        assert_eq!(
            BridgeError::Capability("wayland".into()).exception_class(),
            "java/lang/RuntimeException"
        );
    }

    #[test]
    fn dispatch_errors_convert() {
        let err: BridgeError = DispatchError::LoopExited.into();
        assert!(matches!(err, BridgeError::Dispatch(DispatchError::LoopExited)));
        assert_eq!(err.to_string(), "ui loop exited before the task ran");
    }
}
