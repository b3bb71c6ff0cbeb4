use screen_capture::{CursorImage, FrameBuffer, Position, Rectangle};

/// Blends `cursor` onto `frame`, whose top-left pixel sits at `region_origin`
/// in absolute screen coordinates.
///
/// Cursor pixels are premultiplied ARGB; frame pixels are native-endian
/// `0x00RRGGBB`. Parts of the cursor outside the frame are clipped. Returns
/// whether anything was drawn.
pub fn composite_cursor(frame: &mut FrameBuffer, cursor: &CursorImage, region_origin: Position) -> bool {
    if frame.bytes_per_pixel() != 4 || cursor.width == 0 || cursor.height == 0 {
        return false;
    }

    let origin = cursor.origin();
    let cursor_rect = Rectangle::new(
        origin.x - region_origin.x,
        origin.y - region_origin.y,
        cursor.width as i32,
        cursor.height as i32,
    );
    let frame_rect = Rectangle::new(0, 0, frame.width as i32, frame.height as i32);

    let Some(visible) = frame_rect.intersect(&cursor_rect) else {
        return false;
    };

    let mut drawn = false;
    for y in visible.y..visible.bottom() {
        let cy = (y - cursor_rect.y) as usize;
        let row = frame.row_mut(y as u32);

        for x in visible.x..visible.right() {
            let cx = (x - cursor_rect.x) as usize;
            let Some(&src) = cursor.pixels.get(cy * cursor.width as usize + cx) else {
                continue;
            };

            let offset = x as usize * 4;
            let Some(px) = row.get_mut(offset..offset + 4) else {
                break;
            };

            let dst = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
            let out = blend_premultiplied(src, dst);
            if out != dst {
                px.copy_from_slice(&out.to_ne_bytes());
                drawn = true;
            }
        }
    }

    drawn
}

/// `src over dst` with a premultiplied ARGB source and an opaque destination.
pub fn blend_premultiplied(src: u32, dst: u32) -> u32 {
    let alpha = src >> 24;
    match alpha {
        0 => dst,
        255 => src & 0x00ff_ffff,
        _ => {
            let inv = 255 - alpha;
            let channel = |shift: u32| {
                let s = (src >> shift) & 0xff;
                let d = (dst >> shift) & 0xff;
                ((s + (d * inv + 127) / 255).min(255)) << shift
            };

            channel(16) | channel(8) | channel(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, fill: u32) -> FrameBuffer {
        let data = (0..width * height).flat_map(|_| fill.to_ne_bytes()).collect();
        FrameBuffer::new(width, height, 24, 0x21, 32, data)
    }

    fn pixel(frame: &FrameBuffer, x: u32, y: u32) -> u32 {
        let px = &frame.row(y)[x as usize * 4..x as usize * 4 + 4];
        u32::from_ne_bytes([px[0], px[1], px[2], px[3]])
    }

    fn cursor(x: i32, y: i32, width: u16, height: u16, argb: u32) -> CursorImage {
        CursorImage {
            x,
            y,
            xhot: 0,
            yhot: 0,
            width,
            height,
            pixels: vec![argb; width as usize * height as usize],
        }
    }

    #[test]
    fn test_blend_premultiplied() {
        assert_eq!(blend_premultiplied(0x0000_0000, 0x0012_3456), 0x0012_3456);
        assert_eq!(blend_premultiplied(0xffff_0000, 0x0012_3456), 0x00ff_0000);
        // half transparent black darkens by half
        assert_eq!(blend_premultiplied(0x8000_0000, 0x00c8_c8c8), 0x0064_6464);
    }

    #[test]
    fn test_composite_inside_region() {
        let mut f = frame(8, 8, 0x0000_0000);
        let c = cursor(102, 203, 2, 2, 0xffff_ffff);

        assert!(composite_cursor(&mut f, &c, Position::new(100, 200)));
        assert_eq!(pixel(&f, 2, 3), 0x00ff_ffff);
        assert_eq!(pixel(&f, 3, 4), 0x00ff_ffff);
        assert_eq!(pixel(&f, 1, 3), 0);
        assert_eq!(pixel(&f, 4, 4), 0);
    }

    #[test]
    fn test_composite_clips_at_edges() {
        let mut f = frame(4, 4, 0);
        let c = cursor(-1, 2, 3, 4, 0xff00_ff00);

        assert!(composite_cursor(&mut f, &c, Position::new(0, 0)));
        assert_eq!(pixel(&f, 0, 2), 0x0000_ff00);
        assert_eq!(pixel(&f, 1, 3), 0x0000_ff00);
        assert_eq!(pixel(&f, 2, 2), 0);
    }

    #[test]
    fn test_composite_honors_hotspot() {
        let mut f = frame(4, 4, 0);
        let mut c = cursor(2, 2, 1, 1, 0xffff_0000);
        c.xhot = 1;
        c.yhot = 1;

        assert!(composite_cursor(&mut f, &c, Position::new(0, 0)));
        assert_eq!(pixel(&f, 1, 1), 0x00ff_0000);
        assert_eq!(pixel(&f, 2, 2), 0);
    }

    #[test]
    fn test_composite_outside_region() {
        let mut f = frame(4, 4, 0x0010_1010);
        let c = cursor(50, 50, 2, 2, 0xffff_ffff);

        assert!(!composite_cursor(&mut f, &c, Position::new(0, 0)));
        assert_eq!(pixel(&f, 0, 0), 0x0010_1010);
    }

    #[test]
    fn test_composite_padded_rows() {
        // 2x2 frame with rows padded to 12 bytes
        let mut f = FrameBuffer::new(2, 2, 24, 0x21, 32, vec![0; 24]);
        assert_eq!(f.bytes_per_line, 12);

        let c = cursor(1, 1, 1, 1, 0xff00_00ff);
        assert!(composite_cursor(&mut f, &c, Position::new(0, 0)));
        assert_eq!(pixel(&f, 1, 1), 0x0000_00ff);
        assert_eq!(&f.pixel_data[20..24], &[0; 4]);
    }
}
