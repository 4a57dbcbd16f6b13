//! Open file and directory handles
//!
//! Handles returned by the dispatch table. Each one keeps its volume alive
//! but not mounted: once the volume is unmounted every operation on the
//! handle fails with [`FsError::NoSuchDevice`](super::FsError::NoSuchDevice).

use crate::engine::{DirEntry, InodeId};
use crate::volume::Volume;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Open file flags (POSIX O_* flags)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// File is open for reading
    pub read: bool,
    /// File is open for writing
    pub write: bool,
    /// Writes append to end of file
    pub append: bool,
    /// Create file if it doesn't exist
    pub create: bool,
    /// Truncate file to zero length on open
    pub truncate: bool,
}

impl OpenFlags {
    /// O_RDONLY - Open for reading only
    pub const O_RDONLY: u32 = 0;
    /// O_WRONLY - Open for writing only
    pub const O_WRONLY: u32 = 1;
    /// O_RDWR - Open for reading and writing
    pub const O_RDWR: u32 = 2;
    /// O_CREAT - Create file if it doesn't exist
    pub const O_CREAT: u32 = 0x40;
    /// O_TRUNC - Truncate file to zero length
    pub const O_TRUNC: u32 = 0x200;
    /// O_APPEND - Append mode (writes go to end of file)
    pub const O_APPEND: u32 = 0x400;

    /// Parse POSIX open flags
    pub fn from_flags(flags: u32) -> Self {
        let access_mode = flags & 0x3;
        Self {
            read: access_mode == Self::O_RDONLY || access_mode == Self::O_RDWR,
            write: access_mode == Self::O_WRONLY || access_mode == Self::O_RDWR,
            append: (flags & Self::O_APPEND) != 0,
            create: (flags & Self::O_CREAT) != 0,
            truncate: (flags & Self::O_TRUNC) != 0,
        }
    }

    /// Whether opening with these flags can modify the volume
    pub fn modifies(&self) -> bool {
        self.write || self.create || self.truncate || self.append
    }
}

/// Seek origin for file positioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// Seek from start of file (absolute position)
    Start(u64),
    /// Seek from current position (relative)
    Current(i64),
    /// Seek from end of file (relative, usually negative)
    End(i64),
}

impl SeekFrom {
    /// Resolve to an absolute position, `None` if it would be negative
    pub(crate) fn resolve(self, position: u64, size: u64) -> Option<u64> {
        let (base, delta) = match self {
            SeekFrom::Start(offset) => return Some(offset),
            SeekFrom::Current(delta) => (position, delta),
            SeekFrom::End(delta) => (size, delta),
        };
        if delta >= 0 {
            base.checked_add(delta as u64)
        } else {
            base.checked_sub(delta.unsigned_abs())
        }
    }
}

/// File type bits of [`Stat::mode`]
pub const S_IFMT: u32 = 0o170000;
/// Directory
pub const S_IFDIR: u32 = 0o040000;
/// Regular file
pub const S_IFREG: u32 = 0o100000;

/// POSIX-style file status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Device identifier of the owning volume
    pub dev: u64,
    pub ino: u64,
    /// File type bits plus permission bits after the volume's masks
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blksize: u32,
    /// Size in 512-byte blocks
    pub blocks: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }
}

/// Read-only mount flag in [`StatVfs::flag`]
pub const ST_RDONLY: u64 = 1;

/// Volume statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatVfs {
    pub bsize: u32,
    pub frsize: u32,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u32,
}

/// An open file
pub struct FileHandle {
    pub(crate) volume: Arc<Volume>,
    pub(crate) ino: InodeId,
    pub(crate) flags: OpenFlags,
    pub(crate) position: u64,
}

impl FileHandle {
    /// Current file position
    pub fn tell(&self) -> u64 {
        self.position
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Name of the device the file lives on
    pub fn device(&self) -> &str {
        self.volume.name()
    }

    /// Check if file is open for reading
    pub fn can_read(&self) -> bool {
        self.flags.read
    }

    /// Check if file is open for writing
    pub fn can_write(&self) -> bool {
        self.flags.write
    }
}

/// An open directory
///
/// Holds a snapshot of the visible entries taken at open or reset.
pub struct DirHandle {
    pub(crate) volume: Arc<Volume>,
    pub(crate) ino: InodeId,
    pub(crate) entries: Vec<DirEntry>,
    pub(crate) index: usize,
}

impl DirHandle {
    /// Entries not yet returned by `dirnext`
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_from_posix() {
        let ro = OpenFlags::from_flags(OpenFlags::O_RDONLY);
        assert!(ro.read && !ro.write);
        assert!(!ro.modifies());

        let append = OpenFlags::from_flags(OpenFlags::O_WRONLY | OpenFlags::O_APPEND | OpenFlags::O_CREAT);
        assert!(!append.read && append.write && append.append && append.create);
        assert!(append.modifies());

        let trunc_only = OpenFlags::from_flags(OpenFlags::O_RDONLY | OpenFlags::O_TRUNC);
        assert!(trunc_only.modifies(), "O_TRUNC modifies the file even without write access");
    }

    #[test]
    fn test_seek_resolution() {
        assert_eq!(SeekFrom::Start(7).resolve(100, 10), Some(7));
        assert_eq!(SeekFrom::Current(-4).resolve(10, 0), Some(6));
        assert_eq!(SeekFrom::Current(-11).resolve(10, 0), None, "Seeking before the start fails");
        assert_eq!(SeekFrom::End(-2).resolve(0, 10), Some(8));
        assert_eq!(SeekFrom::End(5).resolve(0, 10), Some(15), "Seeking past the end is allowed");
    }

    #[test]
    fn test_stat_kind() {
        let stat = Stat {
            dev: 1,
            ino: 2,
            mode: S_IFDIR | 0o755,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 0,
            blksize: 4096,
            blocks: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        };
        assert!(stat.is_dir());
        assert!(!stat.is_file());
    }
}
