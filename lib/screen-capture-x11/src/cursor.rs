use crate::{Error, X11WindowSource};
use screen_capture::{CursorImage, Rectangle};
use x11rb::protocol::xfixes;

impl X11WindowSource {
    pub(crate) fn cursor(&self, region: Rectangle) -> Result<Option<CursorImage>, Error> {
        if !self.extensions.xfixes {
            return Ok(None);
        }

        let reply = xfixes::ConnectionExt::xfixes_get_cursor_image(&self.conn)?
            .reply()
            .map_err(Error::reply("XFixesGetCursorImage"))?;

        let (x, y) = (reply.x as i32, reply.y as i32);
        if !region.contains_point(x, y) {
            return Ok(None);
        }

        Ok(Some(CursorImage {
            x,
            y,
            xhot: reply.xhot,
            yhot: reply.yhot,
            width: reply.width,
            height: reply.height,
            pixels: reply.cursor_image,
        }))
    }
}
