// Native ui-thread bridge for web views embedded in foreign windows.

pub mod bridge;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod gateway;
pub mod platform;
pub mod runtime;
pub mod view;

pub use bridge::{Bridge, ViewHandle};
pub use config::BridgeConfig;
pub use error::{BridgeError, DispatchError};
pub use event_loop::UiLoop;
pub use platform::headless::HeadlessWindowSystem;
pub use platform::{Size, WindowId, WindowSystem};
pub use runtime::local::{LocalListener, LocalRuntime};
pub use runtime::{ManagedRuntime, ManagedValue};
