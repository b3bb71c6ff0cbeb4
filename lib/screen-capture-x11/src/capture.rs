use crate::{Error, X11WindowSource, backend::CaptureBackend, band_rows};
use screen_capture::{FrameBuffer, Rectangle, WindowId};
use x11rb::{
    connection::RequestConnection,
    protocol::{
        shm,
        xproto::{ConnectionExt, ImageFormat},
    },
};

const ALL_PLANES: u32 = !0;

impl X11WindowSource {
    pub(crate) fn capture(
        &self,
        drawable: WindowId,
        region: Rectangle,
    ) -> Result<FrameBuffer, Error> {
        if region.is_empty() {
            return Err(Error::Other(format!("empty capture region {region:?}")));
        }

        if let CaptureBackend::Shm(segment) = &self.backend {
            let bpp = self.bits_per_pixel(self.root_depth) as usize;
            let needed = region.width as usize * region.height as usize * bpp.div_ceil(8);
            let segment = segment.lock().unwrap_or_else(|p| p.into_inner());

            if needed <= segment.size {
                let reply = shm::ConnectionExt::shm_get_image(
                    &self.conn,
                    drawable,
                    region.x as i16,
                    region.y as i16,
                    region.width as u16,
                    region.height as u16,
                    ALL_PLANES,
                    ImageFormat::Z_PIXMAP.into(),
                    segment.seg,
                    0,
                )?
                .reply()
                .map_err(Error::reply("ShmGetImage"))?;

                let size = (reply.size as usize).min(segment.size);
                return Ok(FrameBuffer::new(
                    region.width as u32,
                    region.height as u32,
                    reply.depth,
                    reply.visual,
                    self.bits_per_pixel(reply.depth),
                    segment.mmap[..size].to_vec(),
                ));
            }

            log::debug!(
                "region {region:?} needs {needed} bytes, shm segment has {}, use GetImage",
                segment.size
            );
        }

        self.capture_chunked(drawable, region)
    }

    /// Reads the region in row bands no larger than the maximum request length
    /// and joins them into one buffer.
    fn capture_chunked(
        &self,
        drawable: WindowId,
        region: Rectangle,
    ) -> Result<FrameBuffer, Error> {
        let height = region.height as u32;
        let pitch =
            region.width as usize * (self.bits_per_pixel(self.root_depth) as usize).div_ceil(8);
        let rows = band_rows(self.conn.maximum_request_bytes(), pitch, height);

        let mut data = Vec::with_capacity(pitch * height as usize);
        let (mut depth, mut visual) = (self.root_depth, 0);
        let mut y = 0;

        while y < height {
            let band = rows.min(height - y);
            let reply = self
                .conn
                .get_image(
                    ImageFormat::Z_PIXMAP,
                    drawable,
                    region.x as i16,
                    (region.y + y as i32) as i16,
                    region.width as u16,
                    band as u16,
                    ALL_PLANES,
                )?
                .reply()
                .map_err(Error::reply("GetImage"))?;

            depth = reply.depth;
            visual = reply.visual;
            data.extend_from_slice(&reply.data);
            y += band;
        }

        Ok(FrameBuffer::new(
            region.width as u32,
            height,
            depth,
            visual,
            self.bits_per_pixel(depth),
            data,
        ))
    }
}
