//! X11 implementation of [`screen_capture::WindowSource`].
//!
//! Pixels are read with MIT-SHM when the server supports fd passing and with
//! banded `GetImage` requests otherwise. Obscured windows can be redirected
//! through Composite and the cursor is fetched with XFixes; missing
//! extensions only disable the matching feature.

mod backend;
mod capture;
mod composite;
mod cursor;
mod error;
mod window;

pub use backend::{BackendKind, Extensions, band_rows, segment_size};
pub use error::*;

use backend::CaptureBackend;
use screen_capture::{
    CompositeHandle, CursorImage, FrameBuffer, Rectangle, ScreenCaptureError, WindowId,
    WindowInfo, WindowSource,
};
use std::sync::Mutex;
use x11rb::{connection::Connection, protocol::xproto::MapState, rust_connection::RustConnection};

x11rb::atom_manager! {
    pub(crate) Atoms: AtomsCookie {
        _NET_ACTIVE_WINDOW,
        _NET_CLIENT_LIST,
        _NET_WM_NAME,
        UTF8_STRING,
    }
}

pub struct X11WindowSource {
    conn: RustConnection,
    root: WindowId,
    root_depth: u8,
    atoms: Atoms,
    extensions: Extensions,
    backend: CaptureBackend,

    /// (depth, bits per pixel) from the connection setup
    pixmap_formats: Vec<(u8, u8)>,

    broken: Mutex<Option<ScreenCaptureError>>,
}

impl X11WindowSource {
    /// Connects to `display` (or `$DISPLAY`) and picks the capture backend.
    pub fn connect(display: Option<&str>) -> Result<Self, Error> {
        Self::connect_with(display, true)
    }

    pub fn connect_with(display: Option<&str>, prefer_shm: bool) -> Result<Self, Error> {
        let (conn, screen_num) = x11rb::connect(display)?;

        let setup = conn.setup();
        let screen = setup
            .roots
            .get(screen_num)
            .ok_or(Error::NoScreen(screen_num))?
            .clone();

        let pixmap_formats = setup
            .pixmap_formats
            .iter()
            .map(|f| (f.depth, f.bits_per_pixel))
            .collect();

        let atoms = Atoms::new(&conn)?
            .reply()
            .map_err(Error::reply("InternAtom"))?;

        let extensions = Extensions::probe(&conn);
        log::info!(
            "X11 screen {screen_num}: {}x{} depth {}, extensions: {extensions:?}",
            screen.width_in_pixels,
            screen.height_in_pixels,
            screen.root_depth
        );

        let backend = CaptureBackend::choose(&conn, &screen, &extensions, prefer_shm);

        Ok(Self {
            root: screen.root,
            root_depth: screen.root_depth,
            conn,
            atoms,
            extensions,
            backend,
            pixmap_formats,
            broken: Mutex::new(None),
        })
    }

    pub fn extensions(&self) -> Extensions {
        self.extensions
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub(crate) fn bits_per_pixel(&self, depth: u8) -> u8 {
        self.pixmap_formats
            .iter()
            .find(|(d, _)| *d == depth)
            .map(|(_, bpp)| *bpp)
            .unwrap_or(32)
    }

    /// Converts a backend error for the caller, remembering transport
    /// failures so later `connection_error` calls report them.
    fn track<T>(&self, result: Result<T, Error>) -> Result<T, ScreenCaptureError> {
        result.map_err(|e| {
            let e = ScreenCaptureError::from(e);
            if let ScreenCaptureError::Connection(_) = e {
                let mut broken = self.broken.lock().unwrap_or_else(|p| p.into_inner());
                if broken.is_none() {
                    log::warn!("X connection reported an error: {e}");
                    *broken = Some(e.clone());
                }
            }
            e
        })
    }
}

impl Drop for X11WindowSource {
    fn drop(&mut self) {
        if let CaptureBackend::Shm(segment) = &self.backend {
            let segment = segment.lock().unwrap_or_else(|p| p.into_inner());
            segment.detach(&self.conn);
        }

        if let Err(e) = self.conn.flush() {
            log::warn!("flush X connection failed: {e}");
        }
    }
}

impl WindowSource for X11WindowSource {
    fn root_window(&self) -> WindowId {
        self.root
    }

    fn geometry(&self, window: WindowId) -> Result<Rectangle, ScreenCaptureError> {
        let result = self.window_geometry(window);

        match result {
            Err(e) if e.is_missing_window() => Err(ScreenCaptureError::WindowGone(window)),
            r => self.track(r),
        }
    }

    fn capture_region(
        &self,
        drawable: WindowId,
        region: Rectangle,
    ) -> Result<FrameBuffer, ScreenCaptureError> {
        let result = self.capture(drawable, region);
        self.track(result)
    }

    fn redirect(&self, window: WindowId) -> Result<Option<CompositeHandle>, ScreenCaptureError> {
        let result = self.redirect_window(window);
        self.track(result)
    }

    fn refresh(&self, handle: CompositeHandle) -> Result<CompositeHandle, ScreenCaptureError> {
        let result = self.refresh_window(handle);
        self.track(result)
    }

    fn release(&self, handle: CompositeHandle) -> Result<(), ScreenCaptureError> {
        let result = self.release_window(handle);
        self.track(result)
    }

    fn cursor_image(&self, region: Rectangle) -> Option<CursorImage> {
        match self.cursor(region) {
            Ok(cursor) => cursor,
            Err(e) => {
                log::debug!("get cursor image failed: {e}");
                let _ = self.track::<()>(Err(e));
                None
            }
        }
    }

    fn active_window(&self) -> Result<Option<WindowId>, ScreenCaptureError> {
        let result = self.net_active_window();
        self.track(result)
    }

    fn window_exists(&self, window: WindowId) -> bool {
        match self.window_map_state(window) {
            Ok(_) => true,
            Err(e) if e.is_missing_window() => false,
            Err(e) => self.track::<()>(Err(e)).is_ok(),
        }
    }

    fn is_viewable(&self, window: WindowId) -> bool {
        match self.window_map_state(window) {
            Ok(state) => state == MapState::VIEWABLE,
            Err(e) => {
                log::debug!("get map state of {window:#x} failed: {e}");
                let _ = self.track::<()>(Err(e));
                false
            }
        }
    }

    fn connection_error(&self) -> Option<ScreenCaptureError> {
        self.broken
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn list_windows(&self) -> Result<Vec<WindowInfo>, ScreenCaptureError> {
        let result = self.client_list();
        self.track(result)
    }

    fn frame_window(&self, window: WindowId) -> Result<WindowId, ScreenCaptureError> {
        let result = self.top_level_ancestor(window);
        self.track(result)
    }
}
