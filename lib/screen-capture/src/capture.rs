/// Captured pixel region.
///
/// Pixels are packed 32 bits each in host byte order with an unused `X`
/// channel (`BGRX` on little-endian hosts, `XRGB` on big-endian ones). Rows
/// may be padded, so `bytes_per_line` can exceed `width * 4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    pub depth: u8,

    /// Visual id describing the color planes of the pixels
    pub visual: u32,

    pub bits_per_pixel: u8,
    pub bytes_per_line: usize,
    pub pixel_data: Vec<u8>,
}

impl FrameBuffer {
    /// Builds a frame, deriving the stride from the actual buffer size when the
    /// backend returned more bytes than `width * height * bytes_per_pixel`.
    pub fn new(
        width: u32,
        height: u32,
        depth: u8,
        visual: u32,
        bits_per_pixel: u8,
        pixel_data: Vec<u8>,
    ) -> Self {
        let bytes_per_line = stride_from_size(width, height, bits_per_pixel, pixel_data.len());

        Self {
            width,
            height,
            depth,
            visual,
            bits_per_pixel,
            bytes_per_line,
            pixel_data,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize).div_ceil(8)
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.bytes_per_line;
        let end = (start + self.width as usize * self.bytes_per_pixel()).min(self.pixel_data.len());
        &self.pixel_data[start.min(end)..end]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.bytes_per_line;
        let end = (start + self.width as usize * self.bytes_per_pixel()).min(self.pixel_data.len());
        &mut self.pixel_data[start.min(end)..end]
    }

    /// Tightly packed RGBA copy, alpha forced opaque.
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);

        for y in 0..self.height {
            for px in self.row(y).chunks_exact(4) {
                let value = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                out.extend_from_slice(&[
                    ((value >> 16) & 0xff) as u8,
                    ((value >> 8) & 0xff) as u8,
                    (value & 0xff) as u8,
                    0xff,
                ]);
            }
        }

        out
    }
}

pub fn stride_from_size(width: u32, height: u32, bits_per_pixel: u8, size: usize) -> usize {
    let tight = width as usize * (bits_per_pixel as usize).div_ceil(8);

    if height > 0 && size > tight * height as usize {
        size / height as usize
    } else {
        tight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tight_stride() {
        let frame = FrameBuffer::new(4, 2, 24, 0x21, 32, vec![0; 4 * 2 * 4]);
        assert_eq!(frame.bytes_per_line, 16);
    }

    #[test]
    fn test_padded_stride_from_size() {
        // 10 pixels wide, rows padded to 64 bytes
        let frame = FrameBuffer::new(10, 3, 24, 0x21, 32, vec![0; 64 * 3]);
        assert_eq!(frame.bytes_per_line, 64);
        assert_eq!(frame.row(1).len(), 40);
    }

    #[test]
    fn test_to_rgba_honours_stride() {
        let mut data = vec![0u8; 8 * 2];
        data[0..4].copy_from_slice(&0x00112233u32.to_ne_bytes());
        data[8..12].copy_from_slice(&0x00445566u32.to_ne_bytes());

        let frame = FrameBuffer::new(1, 2, 24, 0x21, 32, data);
        assert_eq!(frame.bytes_per_line, 8);
        assert_eq!(
            frame.to_rgba(),
            vec![0x11, 0x22, 0x33, 0xff, 0x44, 0x55, 0x66, 0xff]
        );
    }
}
