//! Filesystem Engine Contract
//!
//! The engine understands the on-disk structures; this crate never does.
//! This module defines the two seams between them:
//!
//! - [`DeviceOps`]: what the engine calls for all persistent I/O, implemented
//!   by the [`SectorIo`](crate::block::SectorIo) adapter
//! - [`Engine`] / [`EngineVolume`]: what the mount manager and the dispatch
//!   table call into the engine for
//!
//! All engine-owned state is reached through `Box<dyn EngineVolume>`, so the
//! descriptor that owns the box owns the mounted engine volume.

use crate::block::{BlockError, Geometry};
use crate::error::MountError;
use crate::fs::FsError;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Device operations the engine issues against its back-end
///
/// Offsets and lengths are in bytes relative to the start of the volume.
pub trait DeviceOps: Send {
    /// Prepare the device for I/O
    fn open(&mut self, read_only: bool) -> Result<(), BlockError>;

    /// Flush outstanding writes and release the device
    fn close(&mut self) -> Result<(), BlockError>;

    /// Read up to `buf.len()` bytes at `offset`, returning the count read
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, BlockError>;

    /// Write up to `buf.len()` bytes at `offset`, returning the count written
    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize, BlockError>;
}

/// The engine-side device: a named back-end the engine mounts
pub struct EngineDevice {
    name: String,
    geometry: Geometry,
    ops: Box<dyn DeviceOps>,
}

impl EngineDevice {
    /// Wrap a device back-end for the engine
    ///
    /// # Errors
    /// Returns `MountError::OutOfMemory` if the name cannot be stored
    pub fn new(name: &str, geometry: Geometry, ops: Box<dyn DeviceOps>) -> Result<Self, MountError> {
        let mut owned = String::new();
        owned
            .try_reserve_exact(name.len())
            .map_err(|_| MountError::OutOfMemory)?;
        owned.push_str(name);

        Ok(Self {
            name: owned,
            geometry,
            ops,
        })
    }

    /// Name the device was created under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layout of the volume behind this device
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn open(&mut self, read_only: bool) -> Result<(), BlockError> {
        self.ops.open(read_only)
    }

    pub fn close(&mut self) -> Result<(), BlockError> {
        self.ops.close()
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, BlockError> {
        self.ops.read(offset, buf)
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize, BlockError> {
        self.ops.write(offset, buf)
    }
}

/// Flags the engine's mount primitive understands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMountFlags {
    /// Mount without writing to the volume
    pub read_only: bool,
    /// Replay the journal of a dirty volume instead of refusing it
    pub recover: bool,
    /// Mount despite a hibernation image
    pub ignore_hiberfile: bool,
}

/// The engine's classification of a failed mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeError {
    /// No NTFS boot sector
    NotNtfs,
    /// Boot sector or metadata failed validation
    Corrupt,
    /// Windows left a hibernation image on the volume
    Hibernated,
    /// The dirty flag is set and recovery was not requested
    UncleanUnmount,
    /// The device failed underneath the engine
    Io,
    /// Anything the engine does not classify
    Other,
}

impl fmt::Display for VolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeError::NotNtfs => write!(f, "not an NTFS volume"),
            VolumeError::Corrupt => write!(f, "corrupt volume"),
            VolumeError::Hibernated => write!(f, "hibernated volume"),
            VolumeError::UncleanUnmount => write!(f, "unclean unmount"),
            VolumeError::Io => write!(f, "device I/O failed"),
            VolumeError::Other => write!(f, "mount failed"),
        }
    }
}

/// Process-wide filesystem engine
pub trait Engine: Send + Sync {
    /// Set up process-wide engine state
    ///
    /// Called before the first mount of a live period.
    fn init(&self) {}

    /// Release process-wide engine state once no volume remains
    fn shutdown(&self) {}

    /// Mount the volume behind `device`
    ///
    /// The engine takes ownership of the device; on failure it is dropped
    /// together with the adapter behind it.
    fn mount(
        &self,
        device: EngineDevice,
        flags: EngineMountFlags,
    ) -> Result<Box<dyn EngineVolume>, VolumeError>;
}

/// Engine inode number
pub type InodeId = u64;

/// Attributes of the volume inode the manager edits directly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// The volume label, stored as UTF-16LE without a terminator
    VolumeName,
}

/// Handle to an open attribute, valid until `attr_close`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrId(pub u32);

/// Kind of filesystem node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Regular file
    File,
    /// Directory
    Directory,
}

/// What the engine reports about a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub ino: InodeId,
    pub kind: NodeKind,
    pub size: u64,
    pub links: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub hidden: bool,
    pub system: bool,
}

/// A directory entry as listed by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: InodeId,
    pub kind: NodeKind,
    pub hidden: bool,
    pub system: bool,
}

/// Volume-wide space accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeStats {
    /// Cluster size in bytes
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    /// Longest file name, in characters
    pub name_max: u32,
}

/// A mounted engine volume
///
/// Paths handed to the file primitives are absolute within the volume
/// (`"/dir/file"`), without the device prefix.
pub trait EngineVolume: Send {
    /// Switch name lookups to case-insensitive matching
    fn set_ignore_case(&mut self);

    /// Open an attribute of the volume inode, `None` if it does not exist
    fn attr_open(&mut self, kind: AttrKind) -> Result<Option<AttrId>, FsError>;

    /// Current length of an open attribute in bytes
    fn attr_size(&mut self, attr: AttrId) -> Result<u64, FsError>;

    /// Read from an open attribute
    fn attr_pread(&mut self, attr: AttrId, offset: u64, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Resize an open attribute
    fn attr_truncate(&mut self, attr: AttrId, len: u64) -> Result<(), FsError>;

    /// Write to an open attribute
    fn attr_pwrite(&mut self, attr: AttrId, offset: u64, data: &[u8]) -> Result<usize, FsError>;

    /// Create an attribute with initial contents
    fn attr_add(&mut self, kind: AttrKind, data: &[u8]) -> Result<(), FsError>;

    /// Close an attribute handle
    fn attr_close(&mut self, attr: AttrId);

    /// Write the volume inode back to the on-disk metadata
    fn sync_volume_inode(&mut self) -> Result<(), FsError>;

    /// Unmount, flushing metadata; `force` unmounts despite errors
    fn unmount(self: Box<Self>, force: bool) -> Result<(), FsError>;

    fn lookup(&mut self, path: &str) -> Result<InodeId, FsError>;

    fn create(&mut self, path: &str, kind: NodeKind) -> Result<InodeId, FsError>;

    fn stat(&mut self, ino: InodeId) -> Result<NodeInfo, FsError>;

    /// Read file data; `update_atime` asks the engine to touch the access time
    fn read(&mut self, ino: InodeId, offset: u64, buf: &mut [u8], update_atime: bool) -> Result<usize, FsError>;

    fn write(&mut self, ino: InodeId, offset: u64, data: &[u8]) -> Result<usize, FsError>;

    fn truncate(&mut self, ino: InodeId, len: u64) -> Result<(), FsError>;

    fn fsync(&mut self, ino: InodeId) -> Result<(), FsError>;

    fn link(&mut self, existing: &str, new_path: &str) -> Result<(), FsError>;

    fn unlink(&mut self, path: &str) -> Result<(), FsError>;

    fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), FsError>;

    fn read_dir(&mut self, ino: InodeId) -> Result<Vec<DirEntry>, FsError>;

    fn statvfs(&mut self) -> Result<VolumeStats, FsError>;
}
