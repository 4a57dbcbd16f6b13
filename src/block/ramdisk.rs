//! In-memory block device
//!
//! Implements [`BlockIo`] over a heap buffer. Used as scratch storage and as
//! the backing device for the crate's tests; it counts transfers and can be
//! told to fail so error paths above it can be exercised.

use super::{BlockError, BlockIo, DEFAULT_SECTOR_SIZE};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

/// A block device backed by memory
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    sector_size: usize,
    read_only: bool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    sectors_read: AtomicU64,
    sectors_written: AtomicU64,
}

impl RamDisk {
    /// Create a zero-filled disk of `sectors` sectors of 512 bytes
    pub fn new(sectors: u64) -> Self {
        Self::with_sector_size(sectors, DEFAULT_SECTOR_SIZE)
    }

    /// Create a zero-filled disk with a custom sector size
    pub fn with_sector_size(sectors: u64, sector_size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; sectors as usize * sector_size]),
            sector_size,
            read_only: false,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            sectors_read: AtomicU64::new(0),
            sectors_written: AtomicU64::new(0),
        }
    }

    /// Mark the media as write protected
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Make every subsequent read fail with `BlockError::IoError`
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail with `BlockError::IoError`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of sectors transferred by `read_sectors` so far
    pub fn sectors_read(&self) -> u64 {
        self.sectors_read.load(Ordering::SeqCst)
    }

    /// Number of sectors transferred by `write_sectors` so far
    pub fn sectors_written(&self) -> u64 {
        self.sectors_written.load(Ordering::SeqCst)
    }

    /// Copy bytes out of the disk without going through the sector interface
    ///
    /// # Errors
    /// `BlockError::OutOfBounds` if the range runs past the end of the disk
    pub fn peek(&self, offset: usize, len: usize) -> Result<Vec<u8>, BlockError> {
        let data = self.data.lock();
        let range = Self::byte_range(data.len(), offset, len)?;
        Ok(data[range].to_vec())
    }

    /// Copy bytes into the disk without going through the sector interface
    ///
    /// # Errors
    /// `BlockError::OutOfBounds` if the range runs past the end of the disk
    pub fn poke(&self, offset: usize, bytes: &[u8]) -> Result<(), BlockError> {
        let mut data = self.data.lock();
        let range = Self::byte_range(data.len(), offset, bytes.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn byte_range(size: usize, offset: usize, len: usize) -> Result<core::ops::Range<usize>, BlockError> {
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(offset..end),
            _ => Err(BlockError::OutOfBounds),
        }
    }

    fn check_range(&self, lba: u64, len: usize) -> Result<usize, BlockError> {
        if len % self.sector_size != 0 {
            return Err(BlockError::Misaligned);
        }
        let count = (len / self.sector_size) as u64;
        match lba.checked_add(count) {
            Some(end) if end <= self.num_sectors() => Ok(lba as usize * self.sector_size),
            _ => Err(BlockError::OutOfBounds),
        }
    }
}

impl BlockIo for RamDisk {
    fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BlockError::IoError);
        }
        let start = self.check_range(lba, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[start..start + buf.len()]);
        self.sectors_read
            .fetch_add((buf.len() / self.sector_size) as u64, Ordering::SeqCst);
        Ok(())
    }

    fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), BlockError> {
        if self.read_only {
            return Err(BlockError::ReadOnly);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BlockError::IoError);
        }
        let start = self.check_range(lba, buf.len())?;
        self.data.lock()[start..start + buf.len()].copy_from_slice(buf);
        self.sectors_written
            .fetch_add((buf.len() / self.sector_size) as u64, Ordering::SeqCst);
        Ok(())
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn num_sectors(&self) -> u64 {
        (self.data.lock().len() / self.sector_size) as u64
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn flush(&self) -> Result<(), BlockError> {
        // Writes land in memory synchronously
        Ok(())
    }
}
