use screen_capture::ScreenCaptureError;
use x11rb::{
    errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError},
    protocol::ErrorKind,
    x11_utils::X11Error,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to connect to the X server: {0}")]
    Connect(#[from] ConnectError),

    #[error("X connection broken: {0}")]
    Connection(#[from] ConnectionError),

    #[error("{request} failed: {error:?}")]
    Protocol {
        request: &'static str,
        error: X11Error,
    },

    #[error("X resource ids exhausted")]
    IdsExhausted,

    #[error("shared memory setup failed: {0}")]
    Shm(String),

    #[error("screen {0} not found")]
    NoScreen(usize),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Attaches the request name to a reply error.
    pub fn reply(request: &'static str) -> impl FnOnce(ReplyError) -> Error {
        move |e| match e {
            ReplyError::ConnectionError(e) => Error::Connection(e),
            ReplyError::X11Error(error) => Error::Protocol { request, error },
        }
    }

    pub fn reply_or_id(request: &'static str) -> impl FnOnce(ReplyOrIdError) -> Error {
        move |e| match e {
            ReplyOrIdError::IdsExhausted => Error::IdsExhausted,
            ReplyOrIdError::ConnectionError(e) => Error::Connection(e),
            ReplyOrIdError::X11Error(error) => Error::Protocol { request, error },
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Connect(_))
    }

    /// `BadWindow`/`BadDrawable`: the target went away.
    pub fn is_missing_window(&self) -> bool {
        matches!(
            self,
            Error::Protocol { error, .. }
                if matches!(error.error_kind, ErrorKind::Window | ErrorKind::Drawable)
        )
    }
}

impl From<Error> for ScreenCaptureError {
    fn from(value: Error) -> Self {
        match value {
            Error::Connect(e) => ScreenCaptureError::Connection(e.to_string()),
            Error::Connection(e) => ScreenCaptureError::Connection(e.to_string()),
            Error::Protocol { request, error } => ScreenCaptureError::Protocol {
                request,
                code: error.error_code,
                major: error.major_opcode,
                minor: error.minor_opcode,
                sequence: error.sequence,
            },
            Error::Unsupported(e) => ScreenCaptureError::Unsupported(e),
            e => ScreenCaptureError::Other(e.to_string()),
        }
    }
}
