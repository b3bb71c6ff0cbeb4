use screen_capture::{ScreenCaptureError, WindowId};
use std::{backtrace::Backtrace, fmt, sync::Arc};
use thiserror::Error;

/// Error types for recording operations.
///
/// Fatal failures of native calls (codec, container, windowing system) are
/// carried by [`NativeFailure`], which keeps the name of the failing call,
/// the native error code, a decoded message and the stack at the point of
/// failure.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("{0}")]
    Native(NativeFailure),

    #[error("Capture failed: {0}")]
    Capture(#[from] ScreenCaptureError),

    #[error("Audio source failed: {0}")]
    Audio(#[from] crate::audio_source::AudioSourceError),

    #[error("Target window {0:#x} disappeared")]
    WindowGone(WindowId),

    #[error("Windowing connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid configuration parameters: {0}")]
    InvalidConfig(String),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl RecorderError {
    /// Wraps an ffmpeg error returned by `func`.
    pub fn ffmpeg(func: &'static str) -> impl FnOnce(ffmpeg_next::Error) -> RecorderError {
        move |e| RecorderError::Native(NativeFailure::new(func, i32::from(e), e.to_string()))
    }

    /// Maps windowing errors to the session-fatal variants the scheduler
    /// reports.
    pub fn from_capture(e: ScreenCaptureError, func: &'static str) -> RecorderError {
        match e {
            ScreenCaptureError::WindowGone(window) => RecorderError::WindowGone(window),
            ScreenCaptureError::Connection(msg) => RecorderError::ConnectionLost(msg),
            ScreenCaptureError::Protocol { code, .. } => {
                let message = e.to_string();
                RecorderError::Native(NativeFailure::new(func, code as i32, message))
            }
            e => RecorderError::Capture(e),
        }
    }

    pub fn native(&self) -> Option<&NativeFailure> {
        match self {
            RecorderError::Native(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A failed native call: originating function, native code and its decoding.
#[derive(Clone)]
pub struct NativeFailure {
    pub func: &'static str,
    pub code: i32,
    pub message: String,
    pub backtrace: Arc<Backtrace>,
}

impl NativeFailure {
    pub fn new(func: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self {
            func,
            code,
            message: message.into(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }
}

impl fmt::Display for NativeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed, code: {}, error: {}",
            self.func, self.code, self.message
        )
    }
}

impl fmt::Debug for NativeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFailure")
            .field("func", &self.func)
            .field("code", &self.code)
            .field("message", &self.message)
            .finish()?;
        write!(f, "\n{}", self.backtrace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_failure_display() {
        let failure = NativeFailure::new("avcodec_open2", -22, "Invalid argument");
        assert_eq!(
            failure.to_string(),
            "avcodec_open2 failed, code: -22, error: Invalid argument"
        );

        let err = RecorderError::Native(failure);
        assert_eq!(err.native().map(|f| f.code), Some(-22));
    }

    #[test]
    fn test_ffmpeg_error_keeps_call_name() {
        let err = RecorderError::ffmpeg("avcodec_send_frame")(ffmpeg_next::Error::Eof);
        let failure = err.native().expect("native failure");
        assert_eq!(failure.func, "avcodec_send_frame");
        assert_eq!(failure.code, i32::from(ffmpeg_next::Error::Eof));
    }

    #[test]
    fn test_capture_errors_map_to_fatal_variants() {
        let err = RecorderError::from_capture(ScreenCaptureError::WindowGone(0x42), "geometry");
        assert!(matches!(err, RecorderError::WindowGone(0x42)));

        let err = RecorderError::from_capture(
            ScreenCaptureError::Connection("broken pipe".into()),
            "geometry",
        );
        assert!(matches!(err, RecorderError::ConnectionLost(_)));

        let err = RecorderError::from_capture(
            ScreenCaptureError::Protocol {
                request: "GetImage",
                code: 8,
                major: 73,
                minor: 0,
                sequence: 7,
            },
            "capture_region",
        );
        let failure = err.native().expect("native failure");
        assert_eq!(failure.func, "capture_region");
        assert_eq!(failure.code, 8);
    }
}
