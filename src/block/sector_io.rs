//! Sector I/O Adapter
//!
//! Bridges the platform's sector-addressed [`BlockIo`] to the filesystem
//! engine's byte-addressed [`DeviceOps`] contract. Every engine byte offset
//! is translated to `start_sector + offset / sector_size` and routed to the
//! platform, optionally through a [`PageCache`]. The adapter never touches a
//! sector outside the volume extent it was built for and never reorders
//! requests: each engine call is serviced to completion in order.

use super::cache::{CacheError, PageCache};
use super::{BlockError, BlockIo, DEFAULT_SECTOR_SIZE};
use crate::engine::DeviceOps;
use crate::error::MountError;
use alloc::sync::Arc;
use alloc::vec;

/// Fixed layout of the volume an adapter serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// First device sector of the volume (partition base)
    pub start_sector: u64,
    /// Declared sector size in bytes
    pub sector_size: usize,
    /// Number of sectors in the volume
    pub sector_count: u64,
}

impl Geometry {
    /// Size of the volume in bytes
    pub fn size_bytes(&self) -> u64 {
        self.sector_count * self.sector_size as u64
    }
}

/// A volume-relative window onto a block device
///
/// Sector numbers passed in are relative to the volume start; anything past
/// the declared sector count is rejected before the device sees it.
pub(crate) struct Extent {
    device: Arc<dyn BlockIo>,
    start: u64,
    count: u64,
    sector_size: usize,
}

impl Extent {
    pub(crate) fn new(device: Arc<dyn BlockIo>, start: u64, count: u64, sector_size: usize) -> Self {
        Self {
            device,
            start,
            count,
            sector_size,
        }
    }

    pub(crate) fn sector_count(&self) -> u64 {
        self.count
    }

    fn check(&self, sector: u64, len: usize) -> Result<u64, BlockError> {
        if len % self.sector_size != 0 {
            return Err(BlockError::Misaligned);
        }
        let sectors = (len / self.sector_size) as u64;
        match sector.checked_add(sectors) {
            Some(end) if end <= self.count => Ok(self.start + sector),
            _ => Err(BlockError::OutOfBounds),
        }
    }

    pub(crate) fn read(&self, sector: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let lba = self.check(sector, buf.len())?;
        self.device.read_sectors(lba, buf)
    }

    pub(crate) fn write(&self, sector: u64, buf: &[u8]) -> Result<(), BlockError> {
        let lba = self.check(sector, buf.len())?;
        self.device.write_sectors(lba, buf)
    }

    pub(crate) fn flush(&self) -> Result<(), BlockError> {
        self.device.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenState {
    Closed,
    ReadOnly,
    ReadWrite,
}

/// Sector I/O adapter handed to the engine as its device back-end
pub struct SectorIo {
    extent: Extent,
    cache: Option<PageCache>,
    geometry: Geometry,
    state: OpenState,
}

impl SectorIo {
    /// Build an adapter declaring the default 512-byte sector size
    ///
    /// # Arguments
    /// * `device` - The platform block device
    /// * `start_sector` - First device sector of the volume
    /// * `sector_count` - Length of the volume, `None` to run to the device end
    /// * `cache_page_size` - Cache page size in bytes
    /// * `cache_page_count` - Number of cache pages, 0 disables caching
    pub fn new(
        device: Arc<dyn BlockIo>,
        start_sector: u64,
        sector_count: Option<u64>,
        cache_page_size: usize,
        cache_page_count: usize,
    ) -> Result<Self, MountError> {
        Self::with_sector_size(
            device,
            start_sector,
            sector_count,
            DEFAULT_SECTOR_SIZE,
            cache_page_size,
            cache_page_count,
        )
    }

    /// Build an adapter declaring a specific sector size
    ///
    /// The declared size must match what the device reports; a different
    /// sector size needs a new adapter rather than a mutated one. A
    /// `sector_count` reaching past the device end is clamped to it.
    ///
    /// # Errors
    /// * `MountError::InvalidArgument` - size mismatch, start sector past the
    ///   end of the device, zero sector count, or unusable cache geometry
    /// * `MountError::OutOfMemory` - cache pages could not be allocated
    pub fn with_sector_size(
        device: Arc<dyn BlockIo>,
        start_sector: u64,
        sector_count: Option<u64>,
        sector_size: usize,
        cache_page_size: usize,
        cache_page_count: usize,
    ) -> Result<Self, MountError> {
        if sector_size == 0 || device.sector_size() != sector_size {
            log::warn!(
                "sector_io: device sector size {} does not match declared {}",
                device.sector_size(),
                sector_size
            );
            return Err(MountError::InvalidArgument);
        }
        let total = device.num_sectors();
        if start_sector >= total {
            return Err(MountError::InvalidArgument);
        }

        let available = total - start_sector;
        let sector_count = match sector_count {
            Some(0) => return Err(MountError::InvalidArgument),
            Some(count) if count > available => {
                log::warn!(
                    "sector_io: volume at {} declares {} sectors, device has {} left",
                    start_sector,
                    count,
                    available
                );
                available
            }
            Some(count) => count,
            None => available,
        };

        let geometry = Geometry {
            start_sector,
            sector_size,
            sector_count,
        };

        let cache = if cache_page_count == 0 {
            None
        } else {
            Some(
                PageCache::new(cache_page_size, cache_page_count, sector_size).map_err(|e| match e {
                    CacheError::InvalidGeometry => MountError::InvalidArgument,
                    CacheError::OutOfMemory => MountError::OutOfMemory,
                })?,
            )
        };

        log::debug!(
            "sector_io: start={} sectors={} cache={}x{}",
            start_sector,
            geometry.sector_count,
            cache_page_count,
            cache_page_size
        );

        Ok(Self {
            extent: Extent::new(device, start_sector, geometry.sector_count, sector_size),
            cache,
            geometry,
            state: OpenState::Closed,
        })
    }

    /// The volume layout this adapter serves
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Whether the engine currently has the device open
    pub fn is_open(&self) -> bool {
        self.state != OpenState::Closed
    }

    fn read_whole(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        match self.cache.as_mut() {
            Some(cache) => cache.read(&self.extent, sector, buf),
            None => self.extent.read(sector, buf),
        }
    }

    fn write_whole(&mut self, sector: u64, buf: &[u8]) -> Result<(), BlockError> {
        match self.cache.as_mut() {
            Some(cache) => cache.write(&self.extent, sector, buf),
            None => self.extent.write(sector, buf),
        }
    }

    /// Clamp a byte range to the volume; returns the usable length
    fn clamp(&self, offset: u64, len: usize) -> usize {
        let size = self.geometry.size_bytes();
        if offset >= size {
            return 0;
        }
        core::cmp::min(len as u64, size - offset) as usize
    }
}

impl DeviceOps for SectorIo {
    fn open(&mut self, read_only: bool) -> Result<(), BlockError> {
        if self.is_open() {
            return Err(BlockError::Busy);
        }
        self.state = if read_only || self.extent.device.is_read_only() {
            OpenState::ReadOnly
        } else {
            OpenState::ReadWrite
        };
        Ok(())
    }

    fn close(&mut self) -> Result<(), BlockError> {
        if !self.is_open() {
            return Err(BlockError::DeviceNotReady);
        }
        let result = if self.state == OpenState::ReadWrite {
            self.extent.flush()
        } else {
            Ok(())
        };
        if let Some(cache) = self.cache.as_mut() {
            cache.invalidate();
        }
        self.state = OpenState::Closed;
        result
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, BlockError> {
        if !self.is_open() {
            return Err(BlockError::DeviceNotReady);
        }
        let len = self.clamp(offset, buf.len());
        if len == 0 {
            return Ok(0);
        }

        let ss = self.geometry.sector_size as u64;
        let end = offset + len as u64;
        let first = offset / ss;
        let head = (offset % ss) as usize;
        let mut done = 0usize;

        // Unaligned head: bounce through one sector
        if head != 0 {
            let mut bounce = vec![0u8; ss as usize];
            self.read_whole(first, &mut bounce)?;
            let n = core::cmp::min(len, ss as usize - head);
            buf[..n].copy_from_slice(&bounce[head..head + n]);
            done = n;
        }

        // Aligned middle: straight through
        let aligned = ((len - done) as u64 / ss) as usize * ss as usize;
        if aligned > 0 {
            let sector = (offset + done as u64) / ss;
            self.read_whole(sector, &mut buf[done..done + aligned])?;
            done += aligned;
        }

        // Unaligned tail
        if done < len {
            let sector = (offset + done as u64) / ss;
            let mut bounce = vec![0u8; ss as usize];
            self.read_whole(sector, &mut bounce)?;
            let n = (end - (offset + done as u64)) as usize;
            buf[done..done + n].copy_from_slice(&bounce[..n]);
            done += n;
        }

        Ok(done)
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize, BlockError> {
        match self.state {
            OpenState::Closed => return Err(BlockError::DeviceNotReady),
            OpenState::ReadOnly => return Err(BlockError::ReadOnly),
            OpenState::ReadWrite => {}
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let len = self.clamp(offset, buf.len());
        if len == 0 {
            return Err(BlockError::OutOfBounds);
        }

        let ss = self.geometry.sector_size as u64;
        let first = offset / ss;
        let head = (offset % ss) as usize;
        let mut done = 0usize;

        // Unaligned head: read-modify-write one sector
        if head != 0 {
            let mut bounce = vec![0u8; ss as usize];
            self.read_whole(first, &mut bounce)?;
            let n = core::cmp::min(len, ss as usize - head);
            bounce[head..head + n].copy_from_slice(&buf[..n]);
            self.write_whole(first, &bounce)?;
            done = n;
        }

        let aligned = ((len - done) as u64 / ss) as usize * ss as usize;
        if aligned > 0 {
            let sector = (offset + done as u64) / ss;
            self.write_whole(sector, &buf[done..done + aligned])?;
            done += aligned;
        }

        // Unaligned tail: read-modify-write one sector
        if done < len {
            let sector = (offset + done as u64) / ss;
            let mut bounce = vec![0u8; ss as usize];
            self.read_whole(sector, &mut bounce)?;
            let n = len - done;
            bounce[..n].copy_from_slice(&buf[done..len]);
            self.write_whole(sector, &bounce)?;
            done = len;
        }

        Ok(done)
    }
}
