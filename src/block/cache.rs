//! Sector page cache
//!
//! A small read cache sitting between the [`SectorIo`](super::SectorIo)
//! adapter and the platform device. Pages are runs of consecutive sectors
//! aligned to page boundaries relative to the volume start; the last page of
//! a volume may be short. Replacement is least-recently-used.
//!
//! Writes go through to the device before they return and update any page
//! already holding the sectors, so a cached page never differs from disk and
//! eviction never writes.

use super::sector_io::Extent;
use super::BlockError;
use alloc::vec::Vec;
use core::fmt;

/// Errors raised while building a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Page size is zero or not a multiple of the sector size, or no pages
    InvalidGeometry,
    /// Page buffers could not be allocated
    OutOfMemory,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidGeometry => write!(f, "invalid cache geometry"),
            CacheError::OutOfMemory => write!(f, "out of memory allocating cache pages"),
        }
    }
}

struct Page {
    /// First volume-relative sector held by this page, `None` when empty
    base: Option<u64>,
    /// Number of valid sectors (short for the final page of the extent)
    len: usize,
    data: Vec<u8>,
    last_used: u64,
}

/// LRU write-through page cache
pub struct PageCache {
    page_sectors: u64,
    sector_size: usize,
    pages: Vec<Page>,
    clock: u64,
}

impl PageCache {
    /// Allocate a cache of `page_count` pages of `page_size` bytes
    ///
    /// # Errors
    /// * `CacheError::InvalidGeometry` - zero pages, or a page size that is
    ///   zero or not a multiple of `sector_size`
    /// * `CacheError::OutOfMemory` - the total size overflows or a page
    ///   buffer cannot be reserved
    pub fn new(page_size: usize, page_count: usize, sector_size: usize) -> Result<Self, CacheError> {
        if sector_size == 0 || page_size == 0 || page_count == 0 || page_size % sector_size != 0 {
            return Err(CacheError::InvalidGeometry);
        }
        page_size
            .checked_mul(page_count)
            .ok_or(CacheError::OutOfMemory)?;

        let mut pages = Vec::new();
        pages
            .try_reserve_exact(page_count)
            .map_err(|_| CacheError::OutOfMemory)?;
        for _ in 0..page_count {
            let mut data = Vec::new();
            data.try_reserve_exact(page_size)
                .map_err(|_| CacheError::OutOfMemory)?;
            data.resize(page_size, 0);
            pages.push(Page {
                base: None,
                len: 0,
                data,
                last_used: 0,
            });
        }

        Ok(Self {
            page_sectors: (page_size / sector_size) as u64,
            sector_size,
            pages,
            clock: 0,
        })
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_sectors as usize * self.sector_size
    }

    /// Number of pages
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of pages currently holding sectors
    pub fn resident_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.base.is_some()).count()
    }

    /// Read whole sectors starting at volume-relative `sector`
    pub(crate) fn read(&mut self, extent: &Extent, sector: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let ss = self.sector_size;
        let total = buf.len() / ss;
        let mut done = 0usize;

        while done < total {
            let current = sector + done as u64;
            let base = current - current % self.page_sectors;
            let idx = self.page_for(extent, base)?;
            let page = &self.pages[idx];

            let off = (current - base) as usize;
            let n = core::cmp::min(total - done, page.len.saturating_sub(off));
            if n == 0 {
                return Err(BlockError::OutOfBounds);
            }
            buf[done * ss..(done + n) * ss].copy_from_slice(&page.data[off * ss..(off + n) * ss]);
            done += n;
        }
        Ok(())
    }

    /// Write whole sectors starting at volume-relative `sector`
    ///
    /// The sectors reach the device before this returns. Resident pages that
    /// hold any of them are updated in place; no page is loaded for a write.
    pub(crate) fn write(&mut self, extent: &Extent, sector: u64, buf: &[u8]) -> Result<(), BlockError> {
        extent.write(sector, buf)?;

        let ss = self.sector_size;
        let end = sector + (buf.len() / ss) as u64;
        for page in self.pages.iter_mut() {
            let base = match page.base {
                Some(base) => base,
                None => continue,
            };
            let from = core::cmp::max(base, sector);
            let to = core::cmp::min(base + page.len as u64, end);
            if from >= to {
                continue;
            }
            let src = (from - sector) as usize * ss;
            let dst = (from - base) as usize * ss;
            let n = (to - from) as usize * ss;
            page.data[dst..dst + n].copy_from_slice(&buf[src..src + n]);
        }
        Ok(())
    }

    /// Drop all cached pages
    pub fn invalidate(&mut self) {
        for page in self.pages.iter_mut() {
            page.base = None;
            page.len = 0;
        }
    }

    fn page_len(&self, extent: &Extent, base: u64) -> usize {
        core::cmp::min(self.page_sectors, extent.sector_count().saturating_sub(base)) as usize
    }

    /// Find or load the page starting at `base`, evicting the LRU page on a miss
    fn page_for(&mut self, extent: &Extent, base: u64) -> Result<usize, BlockError> {
        self.clock += 1;
        let now = self.clock;

        if let Some(idx) = self.pages.iter().position(|p| p.base == Some(base)) {
            self.pages[idx].last_used = now;
            return Ok(idx);
        }

        // Empty pages sort before occupied ones, then oldest first
        let victim = self
            .pages
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.base.is_some(), p.last_used))
            .map(|(idx, _)| idx)
            .ok_or(BlockError::DeviceNotReady)?;

        let len = self.page_len(extent, base);
        let ss = self.sector_size;
        let page = &mut self.pages[victim];
        page.base = None;
        page.len = 0;
        extent.read(base, &mut page.data[..len * ss])?;
        page.base = Some(base);
        page.len = len;
        page.last_used = now;
        Ok(victim)
    }
}
