//! Mount Configuration
//!
//! Callers describe a mount with a raw [`MountFlags`] bitmask. It is decoded
//! once into [`MountOptions`], and the options the volume keeps for its
//! lifetime are frozen into a [`VolumePolicy`].

use crate::engine::EngineMountFlags;
use core::ops::BitOr;

/// Default cache page size in bytes
pub const DEFAULT_CACHE_PAGE_SIZE: usize = 64 * 1024;

/// Default number of cache pages
pub const DEFAULT_CACHE_PAGE_COUNT: usize = 8;

/// Raw caller mount flags
///
/// Bits without a named constant are carried but never acted on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountFlags(u32);

impl MountFlags {
    /// No flags
    pub const NONE: MountFlags = MountFlags(0);
    /// List entries with the hidden attribute
    pub const SHOW_HIDDEN_FILES: MountFlags = MountFlags(0x01);
    /// List entries with the system attribute
    pub const SHOW_SYSTEM_FILES: MountFlags = MountFlags(0x02);
    /// Reads update the on-disk access time
    pub const UPDATE_ACCESS_TIMES: MountFlags = MountFlags(0x04);
    /// Replay the journal of a dirty volume
    pub const RECOVER: MountFlags = MountFlags(0x08);
    /// Mount despite a hibernation image
    pub const IGNORE_HIBERFILE: MountFlags = MountFlags(0x10);
    /// Never write to the volume
    pub const READ_ONLY: MountFlags = MountFlags(0x20);
    /// Case-insensitive name lookups
    pub const IGNORE_CASE: MountFlags = MountFlags(0x40);

    /// Wrap a raw bitmask
    pub const fn from_bits(bits: u32) -> Self {
        MountFlags(bits)
    }

    /// The raw bitmask
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: MountFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MountFlags {
    type Output = MountFlags;

    fn bitor(self, rhs: MountFlags) -> MountFlags {
        MountFlags(self.0 | rhs.0)
    }
}

/// Decoded mount configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOptions {
    /// Forces a read-only mount
    pub read_only: bool,
    /// Attempt journal replay on dirty volumes
    pub recover: bool,
    /// Tolerate a hibernation image rather than refusing the mount
    pub ignore_hiberfile: bool,
    /// Case-insensitive name lookups
    pub ignore_case: bool,
    /// Directory enumeration shows hidden entries
    pub show_hidden_files: bool,
    /// Directory enumeration shows system entries
    pub show_system_files: bool,
    /// Reads update on-disk access times
    pub update_access_times: bool,
    /// Owner reported for every node
    pub uid: u32,
    /// Group reported for every node
    pub gid: u32,
    /// Permission bits removed from files
    pub fmask: u16,
    /// Permission bits removed from directories
    pub dmask: u16,
    /// Cache page size in bytes
    pub cache_page_size: usize,
    /// Number of cache pages, 0 disables the cache
    pub cache_page_count: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            recover: false,
            ignore_hiberfile: false,
            ignore_case: false,
            show_hidden_files: false,
            show_system_files: false,
            update_access_times: false,
            uid: 0,
            gid: 0,
            fmask: 0,
            dmask: 0,
            cache_page_size: DEFAULT_CACHE_PAGE_SIZE,
            cache_page_count: DEFAULT_CACHE_PAGE_COUNT,
        }
    }
}

impl MountOptions {
    /// Decode caller flags on top of the default ownership and cache tuning
    pub fn from_flags(flags: MountFlags) -> Self {
        Self {
            read_only: flags.contains(MountFlags::READ_ONLY),
            recover: flags.contains(MountFlags::RECOVER),
            ignore_hiberfile: flags.contains(MountFlags::IGNORE_HIBERFILE),
            ignore_case: flags.contains(MountFlags::IGNORE_CASE),
            show_hidden_files: flags.contains(MountFlags::SHOW_HIDDEN_FILES),
            show_system_files: flags.contains(MountFlags::SHOW_SYSTEM_FILES),
            update_access_times: flags.contains(MountFlags::UPDATE_ACCESS_TIMES),
            ..Self::default()
        }
    }

    /// Replace the cache tuning
    pub fn with_cache(mut self, page_size: usize, page_count: usize) -> Self {
        self.cache_page_size = page_size;
        self.cache_page_count = page_count;
        self
    }

    /// Flags handed to the engine's mount primitive
    pub fn engine_flags(&self) -> EngineMountFlags {
        EngineMountFlags {
            read_only: self.read_only,
            recover: self.recover,
            ignore_hiberfile: self.ignore_hiberfile,
        }
    }
}

/// Access-time update policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtimePolicy {
    Enabled,
    Disabled,
}

/// Policy a mounted volume applies for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumePolicy {
    pub uid: u32,
    pub gid: u32,
    pub fmask: u16,
    pub dmask: u16,
    pub atime: AtimePolicy,
    pub show_hidden_files: bool,
    pub show_system_files: bool,
    pub read_only: bool,
    pub recover: bool,
    pub ignore_hiberfile: bool,
    pub ignore_case: bool,
}

impl From<&MountOptions> for VolumePolicy {
    fn from(options: &MountOptions) -> Self {
        Self {
            uid: options.uid,
            gid: options.gid,
            fmask: options.fmask,
            dmask: options.dmask,
            atime: if options.update_access_times {
                AtimePolicy::Enabled
            } else {
                AtimePolicy::Disabled
            },
            show_hidden_files: options.show_hidden_files,
            show_system_files: options.show_system_files,
            read_only: options.read_only,
            recover: options.recover,
            ignore_hiberfile: options.ignore_hiberfile,
            ignore_case: options.ignore_case,
        }
    }
}

impl VolumePolicy {
    /// Whether an entry with these attributes is listed
    pub fn is_visible(&self, hidden: bool, system: bool) -> bool {
        (!hidden || self.show_hidden_files) && (!system || self.show_system_files)
    }

    /// Permission bits reported for a file
    pub fn file_mode(&self) -> u16 {
        0o777 & !self.fmask
    }

    /// Permission bits reported for a directory
    pub fn dir_mode(&self) -> u16 {
        0o777 & !self.dmask
    }
}
