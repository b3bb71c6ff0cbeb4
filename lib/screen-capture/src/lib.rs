mod capture;
mod cursor;
mod window_info;

pub use capture::*;
pub use cursor::*;
pub use window_info::*;

use serde::{Deserialize, Serialize};

/// X11 resource id of a window or pixmap.
pub type WindowId = u32;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScreenCaptureError {
    #[error(
        "{request} failed, code: {code}, major: {major}, minor: {minor}, sequence: {sequence}"
    )]
    Protocol {
        request: &'static str,
        code: u8,
        major: u8,
        minor: u16,
        sequence: u16,
    },

    #[error("windowing connection failed: {0}")]
    Connection(String),

    #[error("window {0:#x} no longer exists")]
    WindowGone(WindowId),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

impl ScreenCaptureError {
    /// Native error code carried by the failure, `0` when there is none.
    pub fn code(&self) -> i32 {
        match self {
            Self::Protocol { code, .. } => *code as i32,
            _ => 0,
        }
    }
}

/// Access to a windowing system: geometry queries, pixel capture,
/// off-screen redirection and cursor retrieval.
///
/// Implementations pick their capture transport once, when connecting, and
/// expose the same `capture_region` contract whichever one is in use.
pub trait WindowSource {
    fn root_window(&self) -> WindowId;

    /// Absolute position (relative to the root window) and size of `window`.
    fn geometry(&self, window: WindowId) -> Result<Rectangle, ScreenCaptureError>;

    /// Packed pixels of `region`, given in `drawable` coordinates.
    fn capture_region(
        &self,
        drawable: WindowId,
        region: Rectangle,
    ) -> Result<FrameBuffer, ScreenCaptureError>;

    /// Redirects `window` into an off-screen pixmap. `None` when compositing is
    /// not available, in which case the window is captured directly.
    fn redirect(&self, window: WindowId) -> Result<Option<CompositeHandle>, ScreenCaptureError>;

    /// Names the current backing pixmap of a redirected window. The server
    /// allocates a new one whenever the window is resized or mapped again, the
    /// previously named pixmap keeps the old contents.
    ///
    /// Returns `handle` unchanged when no new pixmap can be named yet.
    fn refresh(&self, handle: CompositeHandle) -> Result<CompositeHandle, ScreenCaptureError>;

    fn release(&self, handle: CompositeHandle) -> Result<(), ScreenCaptureError>;

    /// Current cursor, only when its hotspot lies inside `region` (absolute
    /// coordinates) and the cursor extension is present.
    fn cursor_image(&self, region: Rectangle) -> Option<CursorImage>;

    fn active_window(&self) -> Result<Option<WindowId>, ScreenCaptureError>;

    fn window_exists(&self, window: WindowId) -> bool;

    /// Whether `window` and all its ancestors are mapped.
    fn is_viewable(&self, window: WindowId) -> bool;

    /// Sticky transport failure observed by any earlier request.
    fn connection_error(&self) -> Option<ScreenCaptureError>;

    fn list_windows(&self) -> Result<Vec<WindowInfo>, ScreenCaptureError>;

    /// Top-level ancestor of `window` directly under the root, i.e. the
    /// window-manager frame holding the decorations.
    fn frame_window(&self, window: WindowId) -> Result<WindowId, ScreenCaptureError>;
}

/// Capture target produced by [`WindowSource::redirect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeHandle {
    pub window: WindowId,
    pub pixmap: WindowId,
}

impl CompositeHandle {
    pub fn drawable(&self) -> WindowId {
        self.pixmap
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(size: LogicalSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn origin(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub fn size(&self) -> LogicalSize {
        LogicalSize::new(self.width, self.height)
    }

    pub fn contains(&self, other: &Rectangle) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    pub fn intersect(&self, other: &Rectangle) -> Option<Rectangle> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right <= x || bottom <= y {
            return None;
        }

        Some(Rectangle::new(x, y, right - x, bottom - y))
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rectangle {
        Rectangle::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

impl From<Rectangle> for LogicalSize {
    fn from(value: Rectangle) -> Self {
        Self {
            width: value.width,
            height: value.height,
        }
    }
}

#[derive(Debug, Clone, Default, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSize {
    pub width: i32,
    pub height: i32,
}

impl LogicalSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_contains() {
        let window = Rectangle::new(0, 0, 800, 600);
        assert!(window.contains(&Rectangle::new(0, 0, 800, 600)));
        assert!(window.contains(&Rectangle::new(100, 100, 200, 200)));
        assert!(!window.contains(&Rectangle::new(700, 0, 200, 200)));
        assert!(!window.contains(&Rectangle::new(-1, 0, 10, 10)));
    }

    #[test]
    fn test_rectangle_intersect() {
        let a = Rectangle::new(0, 0, 100, 100);
        let b = Rectangle::new(50, 50, 100, 100);
        assert_eq!(a.intersect(&b), Some(Rectangle::new(50, 50, 50, 50)));

        let c = Rectangle::new(100, 0, 10, 10);
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_rectangle_contains_point() {
        let r = Rectangle::new(10, 10, 5, 5);
        assert!(r.contains_point(10, 10));
        assert!(r.contains_point(14, 14));
        assert!(!r.contains_point(15, 10));
        assert!(!r.contains_point(9, 12));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ScreenCaptureError::Protocol {
            request: "GetGeometry",
            code: 3,
            major: 14,
            minor: 0,
            sequence: 42,
        };

        assert_eq!(err.code(), 3);
        assert_eq!(
            err.to_string(),
            "GetGeometry failed, code: 3, major: 14, minor: 0, sequence: 42"
        );
    }
}
