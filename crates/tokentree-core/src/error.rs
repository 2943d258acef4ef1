//! Error types for scanning operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that end a resolve, scan or watch request as a whole.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The filesystem watcher could not be set up.
    #[error("Watcher error: {message}")]
    Watch { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Per-file failure. Never aborts a scan; stored on the record instead.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("File not found")]
    NotFound,

    #[error("File is busy or locked by another process")]
    Busy,

    #[error("Too many open files, try again later")]
    TooManyOpenFiles,

    /// Policy skip rather than a fault.
    #[error("File too large ({size} bytes, limit is {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("Could not read file: {0}")]
    Io(#[source] std::io::Error),
}

#[cfg(unix)]
const EBUSY: i32 = 16;
#[cfg(unix)]
const EMFILE: i32 = 24;
#[cfg(unix)]
const ENFILE: i32 = 23;

#[cfg(windows)]
const ERROR_TOO_MANY_OPEN_FILES: i32 = 4;
#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;

impl FileError {
    /// Classify an I/O error by kind and raw OS code.
    pub fn from_io(source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => return Self::PermissionDenied,
            std::io::ErrorKind::NotFound => return Self::NotFound,
            std::io::ErrorKind::ResourceBusy => return Self::Busy,
            _ => {}
        }

        match source.raw_os_error() {
            #[cfg(unix)]
            Some(EBUSY) => Self::Busy,
            #[cfg(unix)]
            Some(EMFILE) | Some(ENFILE) => Self::TooManyOpenFiles,
            #[cfg(windows)]
            Some(ERROR_SHARING_VIOLATION) => Self::Busy,
            #[cfg(windows)]
            Some(ERROR_TOO_MANY_OPEN_FILES) => Self::TooManyOpenFiles,
            _ => Self::Io(source),
        }
    }
}

impl From<std::io::Error> for FileError {
    fn from(source: std::io::Error) -> Self {
        Self::from_io(source)
    }
}

/// A relative path that cannot be resolved inside the scan root.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathValidationError {
    #[error("Path is empty")]
    Empty,

    #[error("Path is not under the scan root: {path}")]
    OutsideRoot { path: PathBuf },

    #[error("Path escapes the scan root: {path}")]
    EscapesRoot { path: PathBuf },
}
