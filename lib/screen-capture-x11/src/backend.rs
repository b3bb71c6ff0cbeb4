use crate::Error;
use memmap2::Mmap;
use nix::sys::memfd;
use std::{os::fd::OwnedFd, sync::Mutex};
use x11rb::{
    connection::{Connection, RequestConnection},
    protocol::{composite, shm, xfixes, xproto::Screen},
    rust_connection::RustConnection,
};

const PAGE_SIZE: usize = 4096;

/// Extensions the capture path can take advantage of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extensions {
    pub shm: bool,
    pub composite: bool,
    pub xfixes: bool,
}

impl Extensions {
    pub fn probe(conn: &RustConnection) -> Self {
        let present = |name: &'static str| {
            matches!(conn.extension_information(name), Ok(Some(_)))
        };

        let shm = present(shm::X11_EXTENSION_NAME)
            && shm::ConnectionExt::shm_query_version(conn)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
                // fd passing needs 1.2
                .is_some_and(|v| (v.major_version, v.minor_version) >= (1, 2));

        let composite = present(composite::X11_EXTENSION_NAME)
            && composite::ConnectionExt::composite_query_version(conn, 0, 4)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
                // NameWindowPixmap needs 0.2
                .is_some_and(|v| (v.major_version, v.minor_version) >= (0, 2));

        let xfixes = present(xfixes::X11_EXTENSION_NAME)
            && xfixes::ConnectionExt::xfixes_query_version(conn, 4, 0)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
                .is_some_and(|v| v.major_version >= 1);

        Self {
            shm,
            composite,
            xfixes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Shm,
    Chunked,
}

/// Capture transport, chosen once when the connection is set up.
pub(crate) enum CaptureBackend {
    Shm(Mutex<ShmSegment>),
    Chunked,
}

impl CaptureBackend {
    pub fn choose(
        conn: &RustConnection,
        screen: &Screen,
        extensions: &Extensions,
        prefer_shm: bool,
    ) -> Self {
        if !prefer_shm || !extensions.shm {
            log::info!("capture backend: chunked GetImage");
            return CaptureBackend::Chunked;
        }

        let size = segment_size(
            screen.width_in_pixels as usize,
            screen.height_in_pixels as usize,
        );

        match ShmSegment::attach(conn, size) {
            Ok(segment) => {
                log::info!("capture backend: MIT-SHM, segment {size} bytes");
                CaptureBackend::Shm(Mutex::new(segment))
            }
            Err(e) => {
                log::warn!("attach shm segment failed, fall back to chunked GetImage: {e}");
                CaptureBackend::Chunked
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            CaptureBackend::Shm(_) => BackendKind::Shm,
            CaptureBackend::Chunked => BackendKind::Chunked,
        }
    }
}

pub(crate) struct ShmSegment {
    pub seg: shm::Seg,
    pub size: usize,
    pub mmap: Mmap,

    // Keeps the memory file alive for the lifetime of the mapping
    _memfd: OwnedFd,
}

impl ShmSegment {
    fn attach(conn: &RustConnection, size: usize) -> Result<Self, Error> {
        let memfd = memfd::memfd_create(c"wincap-shm", memfd::MFdFlags::MFD_CLOEXEC)
            .map_err(|e| Error::Shm(format!("memfd_create failed: {e}")))?;

        let file = std::fs::File::from(
            memfd
                .try_clone()
                .map_err(|e| Error::Shm(format!("dup memfd failed: {e}")))?,
        );
        file.set_len(size as u64)
            .map_err(|e| Error::Shm(format!("resize memfd failed: {e}")))?;

        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| Error::Shm(format!("mmap memfd failed: {e}")))?;

        let seg = conn
            .generate_id()
            .map_err(Error::reply_or_id("ShmAttachFd"))?;
        let server_fd = memfd
            .try_clone()
            .map_err(|e| Error::Shm(format!("dup memfd failed: {e}")))?;

        shm::ConnectionExt::shm_attach_fd(conn, seg, server_fd, false)?
            .check()
            .map_err(Error::reply("ShmAttachFd"))?;

        Ok(Self {
            seg,
            size,
            mmap,
            _memfd: memfd,
        })
    }

    pub fn detach(&self, conn: &RustConnection) {
        match shm::ConnectionExt::shm_detach(conn, self.seg) {
            Ok(cookie) => cookie.ignore_error(),
            Err(e) => log::warn!("shm detach failed: {e}"),
        }
    }
}

/// Segment size for a screen, rounded up to whole pages.
pub fn segment_size(width: usize, height: usize) -> usize {
    (width * height * 4).div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// Rows per GetImage band so that a band stays below the transport's
/// maximum request length.
pub fn band_rows(max_request_bytes: usize, pitch: usize, height: u32) -> u32 {
    // GetImage reply header
    const HEADER: usize = 32;

    if pitch == 0 {
        return height.max(1);
    }

    let rows = max_request_bytes.saturating_sub(HEADER) / pitch;
    (rows as u32).clamp(1, height.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_size_page_aligned() {
        assert_eq!(segment_size(1920, 1080), 1920 * 1080 * 4);
        assert_eq!(segment_size(3, 3), PAGE_SIZE);
        assert_eq!(segment_size(1025, 1) % PAGE_SIZE, 0);
    }

    #[test]
    fn test_band_rows() {
        // 16 MiB bigreq, 1920 px rows
        assert_eq!(band_rows(16 * 1024 * 1024, 1920 * 4, 1080), 1080);

        // 256 KiB classic limit
        let rows = band_rows(262_140, 1920 * 4, 1080);
        assert_eq!(rows, (262_140 - 32) / (1920 * 4));
        assert!(rows as usize * 1920 * 4 <= 262_140);
    }

    #[test]
    fn test_band_rows_never_zero() {
        assert_eq!(band_rows(100, 8000, 10), 1);
        assert_eq!(band_rows(100, 0, 10), 10);
        assert_eq!(band_rows(100, 4, 0), 1);
    }
}
