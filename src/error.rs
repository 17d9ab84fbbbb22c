use std::{fmt, io};

/// The coarse error categories surfaced by this library.
///
/// Mirrors the classic UVC error codes so callers can react to negotiation
/// failures (`InvalidMode`), lifecycle misuse (`Busy`, `CallbackExists`) and
/// transport-level conditions (`NoDevice`, `Timeout`, ...) without string
/// matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Input/output error.
    Io,
    /// Invalid parameter, or operation invalid in the current state.
    InvalidParam,
    /// Access denied.
    Access,
    /// No such device (it may have been disconnected).
    NoDevice,
    /// Entity not found.
    NotFound,
    /// Resource busy.
    Busy,
    /// Operation timed out.
    Timeout,
    /// Overflow.
    Overflow,
    /// Pipe error (endpoint stall).
    Pipe,
    /// System call interrupted.
    Interrupted,
    /// Insufficient memory.
    NoMem,
    /// Operation not supported.
    NotSupported,
    /// Device is not UVC-compliant.
    InvalidDevice,
    /// Requested streaming mode not supported by the device.
    InvalidMode,
    /// Stream already has a callback worker attached; polling is unavailable.
    CallbackExists,
    /// Undefined error.
    Other,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Io => "input/output error",
            ErrorKind::InvalidParam => "invalid parameter",
            ErrorKind::Access => "access denied",
            ErrorKind::NoDevice => "no such device",
            ErrorKind::NotFound => "entity not found",
            ErrorKind::Busy => "resource busy",
            ErrorKind::Timeout => "operation timed out",
            ErrorKind::Overflow => "overflow",
            ErrorKind::Pipe => "pipe error",
            ErrorKind::Interrupted => "system call interrupted",
            ErrorKind::NoMem => "insufficient memory",
            ErrorKind::NotSupported => "operation not supported",
            ErrorKind::InvalidDevice => "device is not UVC-compliant",
            ErrorKind::InvalidMode => "mode not supported",
            ErrorKind::CallbackExists => "stream has a callback attached",
            ErrorKind::Other => "undefined error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Error {
    kind: ErrorKind,
    action: Option<Action>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            action: None,
            source: None,
        }
    }

    pub(crate) fn msg(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            action: None,
            source: Some(msg.into().into()),
        }
    }

    pub(crate) fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub(crate) fn is_usb_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(action) = &self.action {
            write!(f, "error while {}: ", action)?;
        }

        match &self.source {
            Some(source) => write!(f, "{}", source),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        let kind = match e {
            rusb::Error::Io => ErrorKind::Io,
            rusb::Error::InvalidParam => ErrorKind::InvalidParam,
            rusb::Error::Access => ErrorKind::Access,
            rusb::Error::NoDevice => ErrorKind::NoDevice,
            rusb::Error::NotFound => ErrorKind::NotFound,
            rusb::Error::Busy => ErrorKind::Busy,
            rusb::Error::Timeout => ErrorKind::Timeout,
            rusb::Error::Overflow => ErrorKind::Overflow,
            rusb::Error::Pipe => ErrorKind::Pipe,
            rusb::Error::Interrupted => ErrorKind::Interrupted,
            rusb::Error::NoMem => ErrorKind::NoMem,
            rusb::Error::NotSupported => ErrorKind::NotSupported,
            rusb::Error::BadDescriptor => ErrorKind::InvalidDevice,
            rusb::Error::Other => ErrorKind::Other,
        };
        Self {
            kind,
            action: None,
            source: Some(Box::new(e)),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            action: None,
            source: Some(Box::new(e)),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self {
            kind: ErrorKind::Other,
            action: None,
            source: Some(s.into()),
        }
    }
}

impl From<&'_ str> for Error {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

/// A list of actions during which this library might encounter errors.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Action {
    AccessingDeviceDescriptor,
    EnumeratingDevices,
    OpeningDevice,
    ReadingDeviceString,
    ReadingControl,
    WritingControl,
    StreamNegotiation,
    StartingStream,
    ReadingFrame,
    StoppingStream,
    SubmittingTransfer,
    SelectingAltSetting,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::AccessingDeviceDescriptor => "accessing device descriptor",
            Action::EnumeratingDevices => "enumerating USB devices",
            Action::OpeningDevice => "opening UVC device",
            Action::ReadingDeviceString => "reading device strings",
            Action::ReadingControl => "reading a device control",
            Action::WritingControl => "writing a device control",
            Action::StreamNegotiation => "negotiating stream parameters",
            Action::StartingStream => "starting the video stream",
            Action::ReadingFrame => "reading a stream frame",
            Action::StoppingStream => "stopping the video stream",
            Action::SubmittingTransfer => "submitting a stream transfer",
            Action::SelectingAltSetting => "selecting an alternate setting",
        };
        f.write_str(s)
    }
}

pub(crate) trait ResultExt<T> {
    fn during(self, action: Action) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    fn during(self, action: Action) -> Result<T, Error> {
        self.map_err(|e| e.into().action(action))
    }
}

pub(crate) fn err<T>(kind: ErrorKind, msg: impl Into<String>, action: Action) -> Result<T, Error> {
    Err(Error::msg(kind, msg).action(action))
}
