//! The windowing collaborator.
//!
//! Every [`WindowSystem`] method is called on the ui loop thread. Signal
//! handlers may be invoked from inside `load_uri` and from deferred work, so
//! implementations must not hold internal locks while emitting.

pub mod headless;

use std::fmt;
use std::num::NonZeroU64;

use raw_window_handle::RawWindowHandle;
use thiserror::Error;

/// A native window handle. Zero is never a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(NonZeroU64);

impl WindowId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl TryFrom<RawWindowHandle> for WindowId {
    type Error = PlatformError;

    fn try_from(handle: RawWindowHandle) -> Result<Self, Self::Error> {
        let raw = match handle {
            RawWindowHandle::Xlib(h) => h.window as u64,
            RawWindowHandle::Xcb(h) => u64::from(h.window.get()),
            RawWindowHandle::Win32(h) => h.hwnd.get() as u64,
            RawWindowHandle::AppKit(h) => h.ns_view.as_ptr() as usize as u64,
            other => return Err(PlatformError::Unsupported(format!("{other:?}"))),
        };
        WindowId::new(raw).ok_or_else(|| PlatformError::Failed {
            op: "window handle",
            reason: "null window".to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const MIN: Size = Size {
        width: 1,
        height: 1,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Clamps caller dimensions so neither side is below one pixel.
    pub fn clamped(width: i32, height: i32) -> Self {
        Self {
            width: width.max(1) as u32,
            height: height.max(1) as u32,
        }
    }

    pub fn at_least_min(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayBackend {
    X11,
    Wayland,
    Win32,
    AppKit,
    Headless,
}

impl DisplayBackend {
    /// Whether foreign windows can be reparented on this backend.
    pub fn supports_embedding(self) -> bool {
        !matches!(self, DisplayBackend::Wayland)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Navigation,
    Response,
    NewWindow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    pub uri: Option<String>,
    pub kind: PolicyKind,
}

impl NavigationRequest {
    pub fn navigation(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            kind: PolicyKind::Navigation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Use,
    Ignore,
}

/// Returns `None` to leave the decision to the next handler or the default.
pub type NavigationSignal =
    Box<dyn Fn(&NavigationRequest) -> Option<PolicyDecision> + Send + Sync + 'static>;
pub type ProgressSignal = Box<dyn Fn(f64) + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("unsupported windowing backend: {0}")]
    Unsupported(String),
    #[error("window {0} no longer exists")]
    BadWindow(WindowId),
    #[error("window geometry unavailable")]
    GeometryUnavailable,
    #[error("{op} failed: {reason}")]
    Failed { op: &'static str, reason: String },
}

pub trait WindowSystem: Send + Sync {
    fn open_display(&self) -> Result<DisplayBackend, PlatformError>;
    fn window_geometry(&self, window: WindowId) -> Result<Size, PlatformError>;
    fn root_window(&self) -> WindowId;

    fn create_surface(&self, size: Size) -> Result<SurfaceId, PlatformError>;
    fn create_view(&self, surface: SurfaceId) -> Result<ViewId, PlatformError>;
    /// Realizes the surface and returns its native window.
    fn realize_surface(&self, surface: SurfaceId) -> Result<WindowId, PlatformError>;
    /// Destroys the surface together with the view it contains.
    fn destroy_surface(&self, surface: SurfaceId);

    fn reparent(&self, child: WindowId, parent: WindowId) -> Result<(), PlatformError>;
    fn move_resize(&self, window: WindowId, size: Size) -> Result<(), PlatformError>;
    fn map_raised(&self, window: WindowId) -> Result<(), PlatformError>;
    fn unmap(&self, window: WindowId) -> Result<(), PlatformError>;
    fn flush(&self);

    fn queue_view_resize(&self, view: ViewId);
    fn load_uri(&self, view: ViewId, uri: &str) -> Result<(), PlatformError>;

    fn connect_navigation(
        &self,
        view: ViewId,
        handler: NavigationSignal,
    ) -> Result<SignalId, PlatformError>;
    fn connect_progress(
        &self,
        view: ViewId,
        handler: ProgressSignal,
    ) -> Result<SignalId, PlatformError>;
    fn disconnect(&self, view: ViewId, signal: SignalId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandWindowHandle, XcbWindowHandle, XlibWindowHandle};
    use std::num::NonZeroU32;
    use std::ptr::NonNull;

    #[test]
    fn clamps_to_one_pixel() {
        assert_eq!(Size::clamped(0, -20), Size::MIN);
        assert_eq!(Size::clamped(800, 0), Size::new(800, 1));
    }

    #[test]
    fn converts_x11_handles() {
        let xlib = XlibWindowHandle::new(0x4a00007);
        assert_eq!(
            WindowId::try_from(RawWindowHandle::Xlib(xlib)).unwrap().get(),
            0x4a00007
        );
        let xcb = XcbWindowHandle::new(NonZeroU32::new(42).unwrap());
        assert_eq!(
            WindowId::try_from(RawWindowHandle::Xcb(xcb)).unwrap().get(),
            42
        );
        let null = XlibWindowHandle::new(0);
        assert!(WindowId::try_from(RawWindowHandle::Xlib(null)).is_err());
    }

    #[test]
    fn rejects_wayland_surfaces() {
        let mut surface = 7u8;
        let wayland = WaylandWindowHandle::new(NonNull::from(&mut surface).cast());
        let err = WindowId::try_from(RawWindowHandle::Wayland(wayland)).unwrap_err();
        assert!(matches!(err, PlatformError::Unsupported(_)));
    }
}
