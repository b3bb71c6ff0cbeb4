use crate::{
    RecorderConfig, RecorderError,
    cursor_overlay::composite_cursor,
    encoder_session::{FrameSink, SinkFactory, SinkStats},
    recorder_config::unique_path,
};
use chrono::Local;
use crossbeam::channel::{Receiver, Sender, bounded};
use screen_capture::{
    CompositeHandle, LogicalSize, Rectangle, ScreenCaptureError, WindowId, WindowSource,
};
use spin_sleep::SpinSleeper;
use std::{
    fmt,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

const EVENT_CHANNEL_SIZE: usize = 64;
const FOCUS_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Capturing,
    Restarting,
    Stopping,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started { path: PathBuf, region: Rectangle },
    Restarted { path: PathBuf, region: Rectangle, reason: String },
    Stopped(SessionStats),
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub files: Vec<SinkStats>,
    pub frames_captured: u64,

    /// Ticks skipped while the window was not focused
    pub frames_skipped: u64,

    pub restarts: u32,
    pub duration: Duration,
}

impl SessionStats {
    pub fn audio_samples_encoded(&self) -> u64 {
        self.files.iter().map(|f| f.audio_samples_encoded).sum()
    }
}

/// Region to record inside `window`, relative to its origin: the configured
/// region clamped to the window bounds, or the whole window.
pub fn resolve_region(
    configured: Option<Rectangle>,
    window: Rectangle,
) -> Result<Rectangle, RecorderError> {
    let bounds = Rectangle::from_size(window.size());
    let region = configured.unwrap_or(bounds);

    bounds
        .intersect(&region)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| {
            RecorderError::InvalidConfig(format!(
                "region {region:?} is outside the {}x{} window",
                window.width, window.height
            ))
        })
}

/// Deadline of the capture after one taken at `last`. Falls back to `now`
/// when the loop is more than one period late, so missed ticks are dropped
/// instead of captured in a burst.
pub fn next_capture(last: Instant, now: Instant, interval: Duration) -> Instant {
    let next = last + interval;
    if now.saturating_duration_since(next) >= interval {
        now
    } else {
        next
    }
}

enum Outcome {
    Stop,
    Restart(String),
}

struct ActiveSession {
    target: WindowId,
    region: Rectangle,
    redirect: Option<CompositeHandle>,

    /// Window size and map state the redirected pixmap was named at
    size: LogicalSize,
    viewable: bool,

    sink: Box<dyn FrameSink>,
    path: PathBuf,
}

/// Records one window until stopped.
///
/// A dedicated thread runs the capture loop: it paces captures at the
/// configured frame rate, hands frames to the sink, restarts into a new file
/// when the window shrinks below the recorded region and stops on fatal
/// errors. Progress is published as [`SessionEvent`]s.
pub struct RecordingSession {
    config: RecorderConfig,
    stop_sig: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    event_sender: Sender<SessionEvent>,
    event_receiver: Receiver<SessionEvent>,
    frames_captured: Arc<AtomicU64>,
    handle: Option<JoinHandle<Result<SessionStats, RecorderError>>>,
}

impl RecordingSession {
    pub fn new(config: RecorderConfig) -> Self {
        let (event_sender, event_receiver) = bounded(EVENT_CHANNEL_SIZE);

        Self {
            config,
            stop_sig: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            event_sender,
            event_receiver,
            frames_captured: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    pub fn start<S, F>(&mut self, source: Arc<S>, sink_factory: F) -> Result<(), RecorderError>
    where
        S: WindowSource + Send + Sync + 'static,
        F: SinkFactory + 'static,
    {
        if self.handle.is_some() {
            return Err(RecorderError::Other("session already started".to_string()));
        }

        self.config.validate()?;

        let worker = CaptureWorker {
            config: self.config.clone(),
            source,
            sink_factory: Box::new(sink_factory),
            stop_sig: self.stop_sig.clone(),
            state: self.state.clone(),
            events: self.event_sender.clone(),
            frames_captured: self.frames_captured.clone(),
            stats: SessionStats::default(),
        };

        self.handle = Some(
            thread::Builder::new()
                .name("capture".to_string())
                .spawn(move || worker.run())?,
        );

        Ok(())
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn events(&self) -> Receiver<SessionEvent> {
        self.event_receiver.clone()
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.stop_sig.store(true, Ordering::Relaxed);
    }

    pub fn get_stop_sig(&self) -> Arc<AtomicBool> {
        self.stop_sig.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Blocks until the capture thread exits, after [`Self::stop`] or a
    /// fatal error.
    pub fn wait(mut self) -> Result<SessionStats, RecorderError> {
        let Some(handle) = self.handle.take() else {
            return Err(RecorderError::Other("session not started".to_string()));
        };

        handle
            .join()
            .map_err(|e| RecorderError::Other(format!("capture thread panicked: {e:?}")))?
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.stop();

        let deadline = Instant::now() + self.config.stop_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        if handle.is_finished() {
            if let Err(e) = handle.join() {
                log::warn!("join capture thread failed: {e:?}");
            }
        } else {
            // the thread keeps the stop flag and releases its handles when it exits
            log::warn!(
                "capture thread did not exit in {:?}, detach it",
                self.config.stop_timeout
            );
        }
    }
}

struct CaptureWorker<S> {
    config: RecorderConfig,
    source: Arc<S>,
    sink_factory: Box<dyn SinkFactory>,
    stop_sig: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    events: Sender<SessionEvent>,
    frames_captured: Arc<AtomicU64>,
    stats: SessionStats,
}

impl<S: WindowSource> CaptureWorker<S> {
    fn run(mut self) -> Result<SessionStats, RecorderError> {
        let started = Instant::now();
        let result = self.run_sessions();

        self.stats.duration = started.elapsed();
        self.set_state(SessionState::Stopped);

        log::info!(
            "session stopped after {:.2?}: {} frames captured, {} skipped, {} restarts, {} audio samples",
            self.stats.duration,
            self.stats.frames_captured,
            self.stats.frames_skipped,
            self.stats.restarts,
            self.stats.audio_samples_encoded(),
        );

        match result {
            Ok(()) => {
                self.emit(SessionEvent::Stopped(self.stats.clone()));
                Ok(self.stats)
            }
            Err(e) => {
                log::error!("session failed: {e}");
                self.emit(SessionEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn run_sessions(&mut self) -> Result<(), RecorderError> {
        let mut restart_reason: Option<String> = None;

        loop {
            self.set_state(SessionState::Starting);

            let Some(mut active) = self.start_session()? else {
                return Ok(());
            };

            match restart_reason.take() {
                Some(reason) => self.emit(SessionEvent::Restarted {
                    path: active.path.clone(),
                    region: active.region,
                    reason,
                }),
                None => self.emit(SessionEvent::Started {
                    path: active.path.clone(),
                    region: active.region,
                }),
            }

            self.set_state(SessionState::Capturing);

            match self.capture_loop(&mut active) {
                Ok(Outcome::Restart(reason)) => {
                    log::info!("restart session: {reason}");
                    self.set_state(SessionState::Restarting);
                    self.teardown(active)?;
                    self.stats.restarts += 1;
                    restart_reason = Some(reason);
                }
                Ok(Outcome::Stop) => {
                    self.set_state(SessionState::Stopping);
                    return self.teardown(active);
                }
                Err(e) => {
                    self.set_state(SessionState::Stopping);
                    if let Err(te) = self.teardown(active) {
                        log::warn!("teardown after failure failed: {te}");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// `None` when a stop was requested while waiting for focus.
    fn start_session(&mut self) -> Result<Option<ActiveSession>, RecorderError> {
        let window = self.config.window;
        let root = self.source.root_window();

        let target = if self.config.include_decorations && window != root {
            self.source
                .frame_window(window)
                .map_err(|e| RecorderError::from_capture(e, "QueryTree"))?
        } else {
            window
        };

        if self.config.focused_only && window != root && !self.wait_for_focus(target)? {
            return Ok(None);
        }

        let geometry = self
            .source
            .geometry(target)
            .map_err(|e| RecorderError::from_capture(e, "GetGeometry"))?;
        let region = resolve_region(self.config.region, geometry)?;

        let redirect = if self.config.composite && target != root {
            self.source
                .redirect(target)
                .map_err(|e| RecorderError::from_capture(e, "CompositeRedirectWindow"))?
        } else {
            None
        };

        let path = unique_path(&self.config.output_path(Local::now()));
        let sink = match self
            .sink_factory
            .open(&path, region.width as u32, region.height as u32)
        {
            Ok(sink) => sink,
            Err(e) => {
                self.release(redirect);
                return Err(e);
            }
        };

        log::info!(
            "session start: `{}`, window {target:#x}, region {region:?}, {} fps, redirected: {}",
            path.display(),
            self.config.fps,
            redirect.is_some()
        );

        Ok(Some(ActiveSession {
            target,
            region,
            redirect,
            size: geometry.size(),
            viewable: true,
            sink,
            path,
        }))
    }

    fn capture_loop(&mut self, active: &mut ActiveSession) -> Result<Outcome, RecorderError> {
        let interval = self.config.frame_interval();
        let root = self.source.root_window();
        let sleeper = SpinSleeper::default();
        let mut last_capture: Option<Instant> = None;

        loop {
            if self.stop_sig.load(Ordering::Relaxed) {
                return Ok(Outcome::Stop);
            }

            if let Some(e) = self.source.connection_error() {
                return Err(RecorderError::from_capture(e, "connection"));
            }

            let now = Instant::now();
            let due = last_capture.map(|last| next_capture(last, now, interval));
            if let Some(due) = due
                && now < due
            {
                sleeper.sleep(due - now);
                continue;
            }

            if active.target != root {
                if !self.source.window_exists(active.target) {
                    return Err(RecorderError::WindowGone(active.target));
                }

                if self.config.focused_only && !self.is_focused(active.target)? {
                    self.stats.frames_skipped += 1;
                    last_capture = Some(due.unwrap_or(now));
                    continue;
                }
            }

            last_capture = Some(due.unwrap_or(now));

            if let Some(outcome) = self.tick(active)? {
                return Ok(outcome);
            }
        }
    }

    /// Captures and encodes one frame, `Some` when the session has to end.
    fn tick(&mut self, active: &mut ActiveSession) -> Result<Option<Outcome>, RecorderError> {
        let geometry = self
            .source
            .geometry(active.target)
            .map_err(|e| RecorderError::from_capture(e, "GetGeometry"))?;

        if let Some(outcome) = shrunk(&geometry, active.region) {
            return Ok(Some(outcome));
        }

        self.refresh_redirect(active, geometry.size())?;

        let drawable = active.redirect.map(|h| h.drawable()).unwrap_or(active.target);
        let mut frame = match self.source.capture_region(drawable, active.region) {
            Ok(frame) => frame,
            Err(e @ ScreenCaptureError::Protocol { .. }) => {
                // the window may have shrunk after the geometry reply
                let geometry = self
                    .source
                    .geometry(active.target)
                    .map_err(|e| RecorderError::from_capture(e, "GetGeometry"))?;

                match shrunk(&geometry, active.region) {
                    Some(outcome) => return Ok(Some(outcome)),
                    None => return Err(RecorderError::from_capture(e, "GetImage")),
                }
            }
            Err(e) => return Err(RecorderError::from_capture(e, "GetImage")),
        };

        if self.config.include_cursor {
            let absolute = active.region.translate(geometry.x, geometry.y);
            if let Some(cursor) = self.source.cursor_image(absolute) {
                composite_cursor(&mut frame, &cursor, absolute.origin());
            }
        }

        active.sink.encode(&frame)?;

        self.stats.frames_captured += 1;
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Names the new backing pixmap after the window was resized or mapped
    /// again, the old one no longer receives updates.
    fn refresh_redirect(
        &self,
        active: &mut ActiveSession,
        size: LogicalSize,
    ) -> Result<(), RecorderError> {
        let Some(handle) = active.redirect else {
            return Ok(());
        };

        let viewable = self.source.is_viewable(active.target);
        let remapped = viewable && !active.viewable;

        if size == active.size && !remapped {
            active.viewable = viewable;
            return Ok(());
        }

        log::debug!(
            "window {:#x} now {}x{}, remapped: {remapped}, refresh pixmap",
            active.target,
            size.width,
            size.height
        );

        let refreshed = self
            .source
            .refresh(handle)
            .map_err(|e| RecorderError::from_capture(e, "CompositeNameWindowPixmap"))?;

        // retried on the next tick when nothing could be named
        if refreshed != handle {
            active.size = size;
            active.viewable = viewable;
        }
        active.redirect = Some(refreshed);
        Ok(())
    }

    /// Flushes and closes the sink, then releases the redirection.
    fn teardown(&mut self, active: ActiveSession) -> Result<(), RecorderError> {
        let result = active.sink.finish();
        self.release(active.redirect);

        let stats = result?;
        log::info!(
            "close `{}`: {} frames, {} audio samples, packets per stream {:?}, audio ticks {} (deferred {})",
            stats.path.display(),
            stats.frames_encoded,
            stats.audio_samples_encoded,
            stats.packets_per_stream,
            stats.audio_ticks,
            stats.audio_deferred
        );

        self.stats.files.push(stats);
        Ok(())
    }

    fn release(&self, redirect: Option<CompositeHandle>) {
        if let Some(handle) = redirect
            && let Err(e) = self.source.release(handle)
        {
            log::warn!("release redirection of {:#x} failed: {e}", handle.window);
        }
    }

    fn is_focused(&self, target: WindowId) -> Result<bool, RecorderError> {
        let active = self
            .source
            .active_window()
            .map_err(|e| RecorderError::from_capture(e, "GetProperty"))?;

        Ok(active.is_some_and(|w| w == target || w == self.config.window))
    }

    /// Waits for the window to get focus, starting anyway on timeout.
    /// Returns `false` when stopped meanwhile.
    fn wait_for_focus(&self, target: WindowId) -> Result<bool, RecorderError> {
        let deadline = Instant::now() + self.config.focus_timeout;

        loop {
            if self.stop_sig.load(Ordering::Relaxed) {
                return Ok(false);
            }

            if self.is_focused(target)? {
                return Ok(true);
            }

            if Instant::now() >= deadline {
                log::warn!(
                    "window {target:#x} not focused after {:?}, start anyway",
                    self.config.focus_timeout
                );
                return Ok(true);
            }

            thread::sleep(FOCUS_POLL_INTERVAL);
        }
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *current != state {
            log::debug!("session state: {current} -> {state}");
            *current = state;
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::debug!("drop session event: {e}");
        }
    }
}

/// Restart when `window` no longer contains the recorded `region`.
fn shrunk(window: &Rectangle, region: Rectangle) -> Option<Outcome> {
    if Rectangle::from_size(window.size()).contains(&region) {
        return None;
    }

    Some(Outcome::Restart(format!(
        "window resized to {}x{}, region {region:?} no longer fits",
        window.width, window.height
    )))
}
