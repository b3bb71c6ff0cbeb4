use crate::Position;

/// Cursor bitmap as reported by the windowing system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    /// Absolute hotspot position
    pub x: i32,
    pub y: i32,

    pub xhot: u16,
    pub yhot: u16,
    pub width: u16,
    pub height: u16,

    /// Premultiplied ARGB, one `u32` per pixel, row-major
    pub pixels: Vec<u32>,
}

impl CursorImage {
    /// Absolute position of the bitmap's top-left corner.
    pub fn origin(&self) -> Position {
        Position::new(self.x - self.xhot as i32, self.y - self.yhot as i32)
    }
}
