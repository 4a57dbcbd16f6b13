//! Block Device Abstraction Layer
//!
//! Provides the platform-facing sector I/O interface the mount manager is
//! built on, together with the pieces that sit between it and the
//! filesystem engine:
//!
//! - [`BlockIo`]: sector-addressed platform storage (consumed)
//! - [`SectorIo`]: the byte-offset to sector translation adapter
//! - [`PageCache`]: optional write-through page cache under the adapter
//! - [`partition`]: discovery of NTFS volumes on a raw device
//! - [`RamDisk`]: an in-memory [`BlockIo`] implementation

use core::fmt;

pub mod cache;
pub mod partition;
pub mod ramdisk;
pub mod sector_io;

pub use cache::{CacheError, PageCache};
pub use partition::{find_partitions, Partition};
pub use ramdisk::RamDisk;
pub use sector_io::{Geometry, SectorIo};

/// Sector size declared by the adapter in the default configuration.
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// Generic sector-addressed block device interface
///
/// This is the only view of storage the platform offers: whole sectors,
/// addressed by logical block address. Buffers passed to `read_sectors` and
/// `write_sectors` must be a whole number of sectors long; the number of
/// sectors transferred is `buf.len() / sector_size()`.
pub trait BlockIo: Send + Sync {
    /// Read consecutive sectors starting at `lba` into `buf`
    ///
    /// # Errors
    /// Returns `BlockError::Misaligned` if `buf` is not a multiple of the sector size
    /// Returns `BlockError::OutOfBounds` if the range extends past `num_sectors()`
    /// Returns `BlockError::IoError` if the read operation fails
    fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Write consecutive sectors starting at `lba` from `buf`
    ///
    /// # Errors
    /// Returns `BlockError::ReadOnly` if the media is write protected
    /// Returns `BlockError::Misaligned` if `buf` is not a multiple of the sector size
    /// Returns `BlockError::OutOfBounds` if the range extends past `num_sectors()`
    fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), BlockError>;

    /// Native sector size in bytes
    fn sector_size(&self) -> usize;

    /// Total number of sectors on the device
    fn num_sectors(&self) -> u64;

    /// Whether the media is write protected
    fn is_read_only(&self) -> bool {
        false
    }

    /// Flush any cached writes to persistent storage
    fn flush(&self) -> Result<(), BlockError>;
}

/// Errors that can occur during block device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// I/O error occurred during operation
    IoError,
    /// Sector range is outside the device or volume extent
    OutOfBounds,
    /// Device is not open or not responding
    DeviceNotReady,
    /// Buffer length is not a whole number of sectors
    Misaligned,
    /// Write attempted on read-only media or a read-only open
    ReadOnly,
    /// Device is already open
    Busy,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::IoError => write!(f, "I/O error"),
            BlockError::OutOfBounds => write!(f, "sector out of bounds"),
            BlockError::DeviceNotReady => write!(f, "device not ready"),
            BlockError::Misaligned => write!(f, "buffer is not sector aligned"),
            BlockError::ReadOnly => write!(f, "device is read-only"),
            BlockError::Busy => write!(f, "device busy"),
        }
    }
}
