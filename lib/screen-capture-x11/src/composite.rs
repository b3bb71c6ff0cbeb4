use crate::{Error, X11WindowSource};
use screen_capture::{CompositeHandle, WindowId};
use x11rb::{
    connection::Connection,
    protocol::{
        composite::{self, Redirect},
        xproto::ConnectionExt,
    },
};

impl X11WindowSource {
    /// Redirects `window` off-screen and names its backing pixmap.
    ///
    /// Protocol failures (e.g. an unmapped window) degrade to `None` so the
    /// caller captures the window directly.
    pub(crate) fn redirect_window(
        &self,
        window: WindowId,
    ) -> Result<Option<CompositeHandle>, Error> {
        if !self.extensions.composite {
            log::info!("composite extension not available, capture window directly");
            return Ok(None);
        }

        if let Err(e) = composite::ConnectionExt::composite_redirect_window(
            &self.conn,
            window,
            Redirect::AUTOMATIC,
        )?
        .check()
        .map_err(Error::reply("CompositeRedirectWindow"))
        {
            return degrade(e);
        }

        let pixmap = self
            .conn
            .generate_id()
            .map_err(Error::reply_or_id("CompositeNameWindowPixmap"))?;

        if let Err(e) =
            composite::ConnectionExt::composite_name_window_pixmap(&self.conn, window, pixmap)?
                .check()
                .map_err(Error::reply("CompositeNameWindowPixmap"))
        {
            composite::ConnectionExt::composite_unredirect_window(
                &self.conn,
                window,
                Redirect::AUTOMATIC,
            )?
            .ignore_error();
            return degrade(e);
        }

        log::info!("redirect window {window:#x} into pixmap {pixmap:#x}");
        Ok(Some(CompositeHandle { window, pixmap }))
    }

    /// Names the window's current pixmap and frees the previous one. An
    /// unmapped window has no pixmap to name, the old handle is kept then.
    pub(crate) fn refresh_window(&self, handle: CompositeHandle) -> Result<CompositeHandle, Error> {
        let pixmap = self
            .conn
            .generate_id()
            .map_err(Error::reply_or_id("CompositeNameWindowPixmap"))?;

        let named = composite::ConnectionExt::composite_name_window_pixmap(
            &self.conn,
            handle.window,
            pixmap,
        )?
        .check()
        .map_err(Error::reply("CompositeNameWindowPixmap"));

        match named {
            Ok(()) => {
                self.conn.free_pixmap(handle.pixmap)?.ignore_error();
                log::debug!(
                    "rename pixmap of window {:#x}: {:#x} -> {pixmap:#x}",
                    handle.window,
                    handle.pixmap
                );
                Ok(CompositeHandle {
                    window: handle.window,
                    pixmap,
                })
            }
            Err(e) if e.is_connection() => Err(e),
            Err(e) => {
                log::debug!("keep pixmap {:#x}: {e}", handle.pixmap);
                Ok(handle)
            }
        }
    }

    pub(crate) fn release_window(&self, handle: CompositeHandle) -> Result<(), Error> {
        self.conn.free_pixmap(handle.pixmap)?.ignore_error();

        composite::ConnectionExt::composite_unredirect_window(
            &self.conn,
            handle.window,
            Redirect::AUTOMATIC,
        )?
        .check()
        .map_err(Error::reply("CompositeUnredirectWindow"))?;

        log::info!("unredirect window {:#x}", handle.window);
        Ok(())
    }
}

fn degrade(e: Error) -> Result<Option<CompositeHandle>, Error> {
    if e.is_connection() {
        return Err(e);
    }

    log::warn!("composite redirection failed, capture window directly: {e}");
    Ok(None)
}
