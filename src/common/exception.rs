use std::fmt;
use std::io;
use thiserror::Error;

/// Operation that currently owns a session's single in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyOperation {
    Reading,
    Writing,
    Flushing,
    Seeking,
}

impl fmt::Display for BusyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BusyOperation::Reading => "reading",
            BusyOperation::Writing => "writing",
            BusyOperation::Flushing => "flushing",
            BusyOperation::Seeking => "seeking",
        };
        f.write_str(name)
    }
}

/// Errors surfaced to callers of file operations.
///
/// The `Display` text is the message half of the `(nil, message)` pair a
/// script receives, so it is kept short and lowercase.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("closed")]
    Closed,

    #[error("io busy {0}")]
    Busy(BusyOperation),

    #[error("operation not permitted")]
    OperationNotPermitted,

    #[error("task post failed")]
    TaskPostError,

    #[error("no memory")]
    OutOfMemory,

    #[error("{message}")]
    Os { code: i32, message: String },

    /// The durability sync failed after every buffered byte was written.
    #[error("{message}")]
    Sync { code: i32, message: String },

    #[error("short write")]
    ShortWrite { written: usize, expected: usize },

    #[error("{0}")]
    BadArgument(&'static str),

    #[error("no thread pool \"{0}\" found")]
    ThreadPoolNotFound(String),

    /// A task completion resumed an operation of another kind.
    #[error("unexpected completion of {0}")]
    UnexpectedCompletion(&'static str),
}

pub type FileResult<T> = Result<T, IoError>;

impl IoError {
    /// OS error code carried by the error, 0 when there is none.
    pub fn code(&self) -> i32 {
        match self {
            IoError::Os { code, .. } | IoError::Sync { code, .. } => *code,
            _ => 0,
        }
    }

    pub fn from_os_code(code: i32) -> Self {
        IoError::Os {
            code,
            message: os_error_message(code),
        }
    }

    pub(crate) fn os_failure(err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::OutOfMemory {
            return IoError::OutOfMemory;
        }
        let (code, message) = describe(err);
        IoError::Os { code, message }
    }

    pub(crate) fn sync_failure(err: &io::Error) -> Self {
        let (code, message) = describe(err);
        IoError::Sync { code, message }
    }
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        IoError::os_failure(&err)
    }
}

fn describe(err: &io::Error) -> (i32, String) {
    match err.raw_os_error() {
        Some(code) => (code, os_error_message(code)),
        None => (0, err.to_string().to_lowercase()),
    }
}

/// Lowercase strerror text for `code`, without std's "(os error N)" suffix.
pub fn os_error_message(code: i32) -> String {
    let text = io::Error::from_raw_os_error(code).to_string();
    let text = match text.rfind(" (os error ") {
        Some(idx) => &text[..idx],
        None => text.as_str(),
    };
    text.to_lowercase()
}
