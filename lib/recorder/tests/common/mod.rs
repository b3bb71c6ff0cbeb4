#![allow(dead_code)]

use recorder::{FrameSink, RecorderError, SinkFactory, SinkStats, StreamClock, TimeBase};
use screen_capture::{
    CompositeHandle, CursorImage, FrameBuffer, Rectangle, ScreenCaptureError, WindowId,
    WindowInfo, WindowSource,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

pub const ROOT: WindowId = 0x100;
pub const WINDOW: WindowId = 0x3a00007;
pub const FRAME: WindowId = 0x1e00003;
pub const PIXMAP: WindowId = 0x4000001;

/// In-memory window with scripted changes keyed on the capture count.
pub struct MockWindowSource {
    pub geometry: Mutex<Rectangle>,
    pub active: Mutex<Option<WindowId>>,
    pub cursor: Mutex<Option<CursorImage>>,
    pub composite: bool,

    pub resize_after: Mutex<Option<(u64, Rectangle)>>,
    pub vanish_after: Option<u64>,
    pub break_after: Option<u64>,

    /// The capture that sees the resize fails like a `GetImage` racing it
    pub fail_on_resize: bool,

    pub exists: AtomicBool,
    pub viewable: AtomicBool,
    pub broken: AtomicBool,
    pub captures: AtomicU64,
    pub redirects: AtomicU64,
    pub releases: AtomicU64,
    pub refreshes: AtomicU64,
    pub released: Mutex<Vec<WindowId>>,
    pub drawables: Mutex<Vec<WindowId>>,
}

impl MockWindowSource {
    pub fn new(geometry: Rectangle) -> Self {
        Self {
            geometry: Mutex::new(geometry),
            active: Mutex::new(Some(WINDOW)),
            cursor: Mutex::new(None),
            composite: false,
            resize_after: Mutex::new(None),
            vanish_after: None,
            break_after: None,
            fail_on_resize: false,
            exists: AtomicBool::new(true),
            viewable: AtomicBool::new(true),
            broken: AtomicBool::new(false),
            captures: AtomicU64::new(0),
            redirects: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            released: Mutex::new(vec![]),
            drawables: Mutex::new(vec![]),
        }
    }

    pub fn with_resize(self, after: u64, to: Rectangle) -> Self {
        *self.resize_after.lock().unwrap() = Some((after, to));
        self
    }

    pub fn with_failing_resize(mut self) -> Self {
        self.fail_on_resize = true;
        self
    }

    pub fn with_vanish(mut self, after: u64) -> Self {
        self.vanish_after = Some(after);
        self
    }

    pub fn with_broken_connection(mut self, after: u64) -> Self {
        self.break_after = Some(after);
        self
    }

    pub fn with_composite(mut self) -> Self {
        self.composite = true;
        self
    }

    pub fn set_active(&self, window: Option<WindowId>) {
        *self.active.lock().unwrap() = window;
    }

    pub fn set_viewable(&self, viewable: bool) {
        self.viewable.store(viewable, Ordering::SeqCst);
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn set_cursor(&self, cursor: CursorImage) {
        *self.cursor.lock().unwrap() = Some(cursor);
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }
}

impl WindowSource for MockWindowSource {
    fn root_window(&self) -> WindowId {
        ROOT
    }

    fn geometry(&self, window: WindowId) -> Result<Rectangle, ScreenCaptureError> {
        if window != ROOT && !self.exists.load(Ordering::SeqCst) {
            return Err(ScreenCaptureError::WindowGone(window));
        }

        Ok(*self.geometry.lock().unwrap())
    }

    fn capture_region(
        &self,
        drawable: WindowId,
        region: Rectangle,
    ) -> Result<FrameBuffer, ScreenCaptureError> {
        self.drawables.lock().unwrap().push(drawable);
        let count = self.captures.fetch_add(1, Ordering::SeqCst) + 1;

        let mut resize = self.resize_after.lock().unwrap();
        if let Some((after, to)) = *resize
            && count >= after
        {
            *self.geometry.lock().unwrap() = to;
            *resize = None;

            if self.fail_on_resize {
                return Err(ScreenCaptureError::Protocol {
                    request: "ShmGetImage",
                    code: 8,
                    major: 130,
                    minor: 4,
                    sequence: count as u16,
                });
            }
        }

        if self.vanish_after.is_some_and(|after| count >= after) {
            self.exists.store(false, Ordering::SeqCst);
        }

        if self.break_after.is_some_and(|after| count >= after) {
            self.broken.store(true, Ordering::SeqCst);
        }

        let (w, h) = (region.width as u32, region.height as u32);
        Ok(FrameBuffer::new(w, h, 24, 0x21, 32, vec![0; (w * h * 4) as usize]))
    }

    fn redirect(&self, window: WindowId) -> Result<Option<CompositeHandle>, ScreenCaptureError> {
        if !self.composite {
            return Ok(None);
        }

        self.redirects.fetch_add(1, Ordering::SeqCst);
        Ok(Some(CompositeHandle {
            window,
            pixmap: PIXMAP,
        }))
    }

    fn refresh(&self, handle: CompositeHandle) -> Result<CompositeHandle, ScreenCaptureError> {
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CompositeHandle {
            window: handle.window,
            pixmap: PIXMAP + count as WindowId,
        })
    }

    fn release(&self, handle: CompositeHandle) -> Result<(), ScreenCaptureError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.released.lock().unwrap().push(handle.pixmap);
        Ok(())
    }

    fn cursor_image(&self, region: Rectangle) -> Option<CursorImage> {
        self.cursor
            .lock()
            .unwrap()
            .clone()
            .filter(|c| region.contains_point(c.x, c.y))
    }

    fn active_window(&self) -> Result<Option<WindowId>, ScreenCaptureError> {
        Ok(*self.active.lock().unwrap())
    }

    fn window_exists(&self, window: WindowId) -> bool {
        window == ROOT || self.exists.load(Ordering::SeqCst)
    }

    fn is_viewable(&self, window: WindowId) -> bool {
        window == ROOT || self.viewable.load(Ordering::SeqCst)
    }

    fn connection_error(&self) -> Option<ScreenCaptureError> {
        self.broken
            .load(Ordering::SeqCst)
            .then(|| ScreenCaptureError::Connection("broken pipe".to_string()))
    }

    fn list_windows(&self) -> Result<Vec<WindowInfo>, ScreenCaptureError> {
        Ok(vec![WindowInfo {
            id: WINDOW,
            title: "mock".to_string(),
            class: None,
        }])
    }

    fn frame_window(&self, _window: WindowId) -> Result<WindowId, ScreenCaptureError> {
        Ok(FRAME)
    }
}

/// What one opened sink received.
#[derive(Debug, Clone, Default)]
pub struct SinkRecord {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pts: Vec<i64>,
    pub frame_sizes: Vec<(u32, u32)>,

    /// Native-endian pixel at (5, 5) of every frame, when present
    pub probe: Vec<Option<u32>>,

    pub finished: bool,
}

/// Factory whose sinks log into shared records and create an empty output
/// file, the way a real container would.
#[derive(Clone)]
pub struct MockSinkFactory {
    pub fps: u32,
    pub records: Arc<Mutex<Vec<SinkRecord>>>,
}

impl MockSinkFactory {
    pub fn new(fps: u32) -> Self {
        Self {
            fps,
            records: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn frames_in(&self, index: usize) -> usize {
        self.records
            .lock()
            .unwrap()
            .get(index)
            .map(|r| r.pts.len())
            .unwrap_or(0)
    }
}

impl SinkFactory for MockSinkFactory {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn FrameSink>, RecorderError> {
        std::fs::File::create(path)?;

        let mut records = self.records.lock().unwrap();
        records.push(SinkRecord {
            path: path.to_path_buf(),
            width,
            height,
            ..Default::default()
        });

        Ok(Box::new(MockSink {
            index: records.len() - 1,
            records: self.records.clone(),
            clock: StreamClock::new(TimeBase::new(1, self.fps as i32)),
        }))
    }
}

struct MockSink {
    index: usize,
    records: Arc<Mutex<Vec<SinkRecord>>>,
    clock: StreamClock,
}

impl FrameSink for MockSink {
    fn encode(&mut self, frame: &FrameBuffer) -> Result<(), RecorderError> {
        let probe = (frame.width > 5 && frame.height > 5).then(|| {
            let px = &frame.row(5)[20..24];
            u32::from_ne_bytes([px[0], px[1], px[2], px[3]])
        });

        let mut records = self.records.lock().unwrap();
        let record = &mut records[self.index];
        record.pts.push(self.clock.advance(1));
        record.frame_sizes.push((frame.width, frame.height));
        record.probe.push(probe);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<SinkStats, RecorderError> {
        let mut records = self.records.lock().unwrap();
        let record = &mut records[self.index];
        record.finished = true;

        Ok(SinkStats {
            path: record.path.clone(),
            frames_encoded: record.pts.len() as u64,
            audio_samples_encoded: 0,
            packets_per_stream: vec![record.pts.len() as u64],
            ..Default::default()
        })
    }
}
