//! Error type and result aliases used throughout this crate.

use std::borrow::Cow;
use std::io::ErrorKind;

/// A result that may fail with `speckvol::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A result with no value, which may fail with `speckvol::Error`.
pub type UnitResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;

/// All errors the compression and decompression pipelines can produce.
#[derive(Debug)]
pub enum Error {
    /// A precondition was violated, or the stream contents are corrupt
    /// or insufficient.
    Invalid(Cow<'static, str>),

    /// A caller-supplied parameter is outside its valid range.
    InvalidParam(Cow<'static, str>),

    /// A buffer or bit sequence has an incompatible length.
    WrongSize(Cow<'static, str>),

    /// The underlying byte stream could not be read or written.
    Io(IoError),
}

impl Error {
    pub fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Invalid(message.into())
    }

    pub fn invalid_param(message: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidParam(message.into())
    }

    pub fn wrong_size(message: impl Into<Cow<'static, str>>) -> Self {
        Error::WrongSize(message.into())
    }
}

/// Enable using the `?` operator on `io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        if error.kind() == ErrorKind::UnexpectedEof {
            Error::invalid("content size")
        }
        else {
            Error::Io(error)
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Invalid(message) => write!(formatter, "invalid: {}", message),
            Error::InvalidParam(message) => write!(formatter, "invalid parameter: {}", message),
            Error::WrongSize(message) => write!(formatter, "wrong size: {}", message),
            Error::Io(error) => write!(formatter, "io error: {}", error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}
