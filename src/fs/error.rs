//! File Operation Error Types
//!
//! Defines error conditions that can occur in engine file primitives and in
//! the dispatch table built on top of them.

use crate::block::BlockError;
use core::fmt;

/// File-level error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// File or directory not found
    NotFound,
    /// Permission denied
    PermissionDenied,
    /// Is a directory (when file expected)
    IsDirectory,
    /// Not a directory (when directory expected)
    NotDirectory,
    /// File or directory already exists
    AlreadyExists,
    /// Directory is not empty
    NotEmpty,
    /// No space left on device
    NoSpace,
    /// I/O error occurred
    IoError,
    /// Invalid path, or a path without a device prefix
    InvalidPath,
    /// Invalid argument
    InvalidArgument,
    /// The device is not mounted (or was unmounted under an open handle)
    NoSuchDevice,
    /// Volume is mounted read-only
    ReadOnly,
    /// Source and destination are on different volumes
    CrossDevice,
    /// Handle was not opened for the requested access
    BadHandle,
    /// Allocation failure inside the engine
    OutOfMemory,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "no such file or directory"),
            FsError::PermissionDenied => write!(f, "permission denied"),
            FsError::IsDirectory => write!(f, "is a directory"),
            FsError::NotDirectory => write!(f, "not a directory"),
            FsError::AlreadyExists => write!(f, "file exists"),
            FsError::NotEmpty => write!(f, "directory not empty"),
            FsError::NoSpace => write!(f, "no space left on device"),
            FsError::IoError => write!(f, "I/O error"),
            FsError::InvalidPath => write!(f, "invalid path"),
            FsError::InvalidArgument => write!(f, "invalid argument"),
            FsError::NoSuchDevice => write!(f, "no such device"),
            FsError::ReadOnly => write!(f, "read-only file system"),
            FsError::CrossDevice => write!(f, "cross-device link"),
            FsError::BadHandle => write!(f, "bad file handle"),
            FsError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl From<BlockError> for FsError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::ReadOnly => FsError::ReadOnly,
            BlockError::OutOfBounds => FsError::NoSpace,
            _ => FsError::IoError,
        }
    }
}
