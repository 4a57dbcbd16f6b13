//! NTFS partition discovery
//!
//! Walks the MBR (and any EBR chain behind an extended partition) looking
//! for volumes whose boot sector carries the NTFS OEM id. A device without
//! an MBR is treated as a superfloppy and its first sectors are probed
//! directly.

use super::{BlockError, BlockIo};
use alloc::vec;
use alloc::vec::Vec;

/// Most partitions reported for one device
pub const MAX_PARTITIONS: usize = 32;

/// Sectors probed on a device without a partition table
const SUPERFLOPPY_SCAN: u64 = 64;

/// Longest EBR chain followed before giving up
const MAX_EBR_LINKS: usize = 64;

const OEM_ID: &[u8; 8] = b"NTFS    ";
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;

const TYPE_EMPTY: u8 = 0x00;
const TYPE_EXTENDED: u8 = 0x05;
const TYPE_NTFS: u8 = 0x07;
const TYPE_EXTENDED_LBA: u8 = 0x0F;

/// An NTFS volume found on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// First device sector of the volume
    pub start_sector: u64,
    /// Length recorded in the partition table; `None` on an unpartitioned
    /// device, where the volume runs to the device end
    pub sector_count: Option<u64>,
}

/// One 16-byte partition table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartitionEntry {
    kind: u8,
    lba_start: u32,
    sector_count: u32,
}

impl PartitionEntry {
    fn parse(sector: &[u8], index: usize) -> Self {
        let base = PARTITION_TABLE_OFFSET + index * PARTITION_ENTRY_SIZE;
        let entry = &sector[base..base + PARTITION_ENTRY_SIZE];
        Self {
            kind: entry[4],
            lba_start: u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]),
            sector_count: u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]),
        }
    }

    /// Declared length, `None` when the entry leaves it blank
    fn length(&self) -> Option<u64> {
        match self.sector_count {
            0 => None,
            count => Some(u64::from(count)),
        }
    }
}

fn has_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && sector[510..512] == BOOT_SIGNATURE
}

fn is_ntfs_boot_sector(sector: &[u8]) -> bool {
    sector.len() >= 11 && &sector[3..11] == OEM_ID
}

struct Scanner<'a> {
    device: &'a dyn BlockIo,
    buf: Vec<u8>,
    found: Vec<Partition>,
}

impl<'a> Scanner<'a> {
    fn read(&mut self, lba: u64) -> Result<&[u8], BlockError> {
        self.device.read_sectors(lba, &mut self.buf)?;
        Ok(&self.buf)
    }

    fn is_full(&self) -> bool {
        self.found.len() >= MAX_PARTITIONS
    }

    /// Record `lba` if it holds an NTFS boot sector; unreadable sectors are skipped
    fn probe(&mut self, lba: u64, declared: u8, sector_count: Option<u64>) {
        if self.is_full() || self.found.iter().any(|p| p.start_sector == lba) {
            return;
        }
        let is_ntfs = match self.read(lba) {
            Ok(sector) => is_ntfs_boot_sector(sector),
            Err(e) => {
                log::debug!("partition: sector {} unreadable: {}", lba, e);
                return;
            }
        };
        if !is_ntfs {
            return;
        }
        if declared != TYPE_NTFS {
            log::warn!(
                "partition: NTFS boot sector at {} in partition of type {:#04x}",
                lba,
                declared
            );
        }
        self.found.push(Partition {
            start_sector: lba,
            sector_count,
        });
    }

    fn walk_extended(&mut self, extended_base: u64) {
        let mut ebr_lba = extended_base;
        for _ in 0..MAX_EBR_LINKS {
            if self.is_full() {
                return;
            }
            let (logical, next) = match self.read(ebr_lba) {
                Ok(sector) if has_signature(sector) => {
                    (PartitionEntry::parse(sector, 0), PartitionEntry::parse(sector, 1))
                }
                _ => return,
            };

            if logical.kind != TYPE_EMPTY && logical.lba_start != 0 {
                self.probe(ebr_lba + u64::from(logical.lba_start), logical.kind, logical.length());
            }

            if next.kind == TYPE_EMPTY || next.lba_start == 0 {
                return;
            }
            ebr_lba = extended_base + u64::from(next.lba_start);
        }
        log::warn!("partition: EBR chain longer than {} links, stopping", MAX_EBR_LINKS);
    }
}

/// Every NTFS volume on `device`, in table order
///
/// # Errors
/// Returns the device error if sector 0 cannot be read
pub fn find_partitions(device: &dyn BlockIo) -> Result<Vec<Partition>, BlockError> {
    let mut scanner = Scanner {
        device,
        buf: vec![0u8; device.sector_size()],
        found: Vec::new(),
    };

    let mbr = scanner.read(0)?;
    if !has_signature(mbr) || is_ntfs_boot_sector(mbr) {
        // Superfloppy: no partition table, volumes start anywhere near the front
        let limit = core::cmp::min(SUPERFLOPPY_SCAN, device.num_sectors());
        for lba in 0..limit {
            scanner.probe(lba, TYPE_NTFS, None);
        }
        return Ok(scanner.found);
    }

    let entries: Vec<PartitionEntry> = (0..4).map(|i| PartitionEntry::parse(mbr, i)).collect();
    for entry in entries {
        if scanner.is_full() {
            break;
        }
        let start = u64::from(entry.lba_start);
        match entry.kind {
            TYPE_EMPTY => {}
            TYPE_EXTENDED | TYPE_EXTENDED_LBA => scanner.walk_extended(start),
            kind => {
                log::debug!(
                    "partition: primary type {:#04x} at {} ({} sectors)",
                    kind,
                    start,
                    entry.sector_count
                );
                scanner.probe(start, kind, entry.length());
            }
        }
    }

    Ok(scanner.found)
}
