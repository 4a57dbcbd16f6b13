//! Mount Manager Error Types
//!
//! Defines the error conditions reported by mount, unmount and the volume
//! label operations. The volume classification variants come from the
//! engine's own judgement of why a mount failed and are kept distinct so a
//! caller can decide whether to retry with `recover` or `ignore_hiberfile`.

use crate::block::BlockError;
use crate::engine::VolumeError;
use crate::fs::FsError;
use core::fmt;

/// Mount manager error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountError {
    /// Empty name, unusable device geometry or otherwise invalid request
    InvalidArgument,
    /// An allocation failed while building the volume
    OutOfMemory,
    /// Name is already registered to a live volume
    AlreadyMounted,
    /// No free mount name left for a bulk mount
    AddressUnavailable,
    /// No volume is registered under the name
    NoSuchDevice,
    /// The device does not hold an NTFS volume
    NotANtfsVolume,
    /// The volume structures failed validation
    CorruptVolume,
    /// The volume holds a hibernation image
    HibernatedVolume,
    /// The volume was not cleanly unmounted
    UncleanUnmount,
    /// The mount critical section is held by a caller further up the stack
    Busy,
    /// The volume is mounted read-only
    ReadOnly,
    /// Device or engine I/O failed
    Io,
}

impl MountError {
    /// Numeric code for C-style call sites
    ///
    /// POSIX errno values where one exists; volume classification errors
    /// use a private range so each has its own code.
    pub fn code(&self) -> i32 {
        match self {
            MountError::InvalidArgument => 22,     // EINVAL
            MountError::OutOfMemory => 12,         // ENOMEM
            MountError::AlreadyMounted => 98,      // EADDRINUSE
            MountError::AddressUnavailable => 99,  // EADDRNOTAVAIL
            MountError::NoSuchDevice => 19,        // ENODEV
            MountError::Busy => 16,                // EBUSY
            MountError::ReadOnly => 30,            // EROFS
            MountError::Io => 5,                   // EIO
            MountError::NotANtfsVolume => 3001,
            MountError::CorruptVolume => 3002,
            MountError::HibernatedVolume => 3003,
            MountError::UncleanUnmount => 3004,
        }
    }
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountError::InvalidArgument => write!(f, "invalid argument"),
            MountError::OutOfMemory => write!(f, "out of memory"),
            MountError::AlreadyMounted => write!(f, "name already mounted"),
            MountError::AddressUnavailable => write!(f, "no free mount name"),
            MountError::NoSuchDevice => write!(f, "no such device"),
            MountError::NotANtfsVolume => write!(f, "not an NTFS volume"),
            MountError::CorruptVolume => write!(f, "volume is corrupt"),
            MountError::HibernatedVolume => write!(f, "volume is hibernated"),
            MountError::UncleanUnmount => write!(f, "volume was not cleanly unmounted"),
            MountError::Busy => write!(f, "mount in progress"),
            MountError::ReadOnly => write!(f, "volume is read-only"),
            MountError::Io => write!(f, "I/O error"),
        }
    }
}

impl From<VolumeError> for MountError {
    fn from(e: VolumeError) -> Self {
        match e {
            VolumeError::NotNtfs => MountError::NotANtfsVolume,
            VolumeError::Corrupt => MountError::CorruptVolume,
            VolumeError::Hibernated => MountError::HibernatedVolume,
            VolumeError::UncleanUnmount => MountError::UncleanUnmount,
            VolumeError::Io => MountError::Io,
            VolumeError::Other => MountError::InvalidArgument,
        }
    }
}

impl From<BlockError> for MountError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::ReadOnly => MountError::ReadOnly,
            BlockError::Busy => MountError::Busy,
            _ => MountError::Io,
        }
    }
}

impl From<FsError> for MountError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NoSuchDevice => MountError::NoSuchDevice,
            FsError::ReadOnly => MountError::ReadOnly,
            FsError::InvalidArgument | FsError::InvalidPath => MountError::InvalidArgument,
            FsError::OutOfMemory => MountError::OutOfMemory,
            _ => MountError::Io,
        }
    }
}
