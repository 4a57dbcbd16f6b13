//! Device Operations Table
//!
//! The entry points generic file I/O call sites use. Paths name their
//! device explicitly (`"ntfs0:/dir/file"`); every entry resolves that name
//! through the manager's registry and then calls into the engine volume
//! under the volume's lock. Mutating entries are refused on read-only
//! volumes before the engine sees them.

use super::error::FsError;
use super::file::{DirHandle, FileHandle, OpenFlags, SeekFrom, Stat, StatVfs, S_IFDIR, S_IFREG, ST_RDONLY};
use crate::engine::{DirEntry, EngineVolume, NodeInfo, NodeKind};
use crate::volume::{AtimePolicy, Volume, VolumeManager};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Dispatch table over a manager's registered volumes
pub struct DevOps<'a> {
    manager: &'a VolumeManager,
}

/// Split `"device:/path"` into its device name and volume path
fn split_path(path: &str) -> Result<(&str, &str), FsError> {
    let (device, rest) = path.split_once(':').ok_or(FsError::InvalidPath)?;
    if device.is_empty() {
        return Err(FsError::InvalidPath);
    }
    match rest {
        "" => Ok((device, "/")),
        _ if rest.starts_with('/') => Ok((device, rest)),
        _ => Err(FsError::InvalidPath),
    }
}

fn make_stat(volume: &Volume, info: &NodeInfo) -> Stat {
    let policy = volume.policy();
    let mode = match info.kind {
        NodeKind::Directory => S_IFDIR | u32::from(policy.dir_mode()),
        NodeKind::File => S_IFREG | u32::from(policy.file_mode()),
    };
    Stat {
        dev: volume.id(),
        ino: info.ino,
        mode,
        nlink: info.links,
        uid: policy.uid,
        gid: policy.gid,
        size: info.size,
        blksize: volume.block_size(),
        blocks: info.size.div_ceil(512),
        atime: info.atime,
        mtime: info.mtime,
        ctime: info.ctime,
    }
}

fn check_writable(volume: &Volume) -> Result<(), FsError> {
    if volume.is_read_only() {
        return Err(FsError::ReadOnly);
    }
    Ok(())
}

fn visible_entries(volume: &Volume, engine: &mut dyn EngineVolume, ino: u64) -> Result<Vec<DirEntry>, FsError> {
    let policy = *volume.policy();
    let mut entries = engine.read_dir(ino)?;
    entries.retain(|entry| policy.is_visible(entry.hidden, entry.system));
    Ok(entries)
}

impl<'a> DevOps<'a> {
    pub(crate) fn new(manager: &'a VolumeManager) -> Self {
        Self { manager }
    }

    /// Resolve a device path to its volume and in-volume path
    fn resolve<'p>(&self, path: &'p str) -> Result<(Arc<Volume>, &'p str), FsError> {
        let (device, inner) = split_path(path)?;
        let volume = self.manager.lookup(device).ok_or(FsError::NoSuchDevice)?;
        Ok((volume, inner))
    }

    /// Resolve two paths that must live on the same volume
    fn resolve_pair<'p>(&self, from: &'p str, to: &'p str) -> Result<(Arc<Volume>, &'p str, &'p str), FsError> {
        let (from_device, from_inner) = split_path(from)?;
        let (to_device, to_inner) = split_path(to)?;
        if from_device != to_device {
            return Err(FsError::CrossDevice);
        }
        let volume = self.manager.lookup(from_device).ok_or(FsError::NoSuchDevice)?;
        Ok((volume, from_inner, to_inner))
    }

    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<FileHandle, FsError> {
        let (volume, inner) = self.resolve(path)?;
        if flags.modifies() {
            check_writable(&volume)?;
        }

        let ino = volume.with_engine(|engine| {
            let ino = match engine.lookup(inner) {
                Ok(ino) => ino,
                Err(FsError::NotFound) if flags.create => engine.create(inner, NodeKind::File)?,
                Err(e) => return Err(e),
            };
            if engine.stat(ino)?.kind == NodeKind::Directory {
                return Err(FsError::IsDirectory);
            }
            if flags.truncate {
                engine.truncate(ino, 0)?;
            }
            Ok(ino)
        })?;

        log::debug!("devops: open {} -> inode {}", path, ino);
        Ok(FileHandle {
            volume,
            ino,
            flags,
            position: 0,
        })
    }

    /// Close a file, flushing it if it was open for writing
    pub fn close(&self, handle: FileHandle) -> Result<(), FsError> {
        if handle.flags.write {
            handle.volume.with_engine(|engine| engine.fsync(handle.ino))
        } else if handle.volume.is_live() {
            Ok(())
        } else {
            Err(FsError::NoSuchDevice)
        }
    }

    pub fn read(&self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize, FsError> {
        if !handle.flags.read {
            return Err(FsError::BadHandle);
        }
        let policy = handle.volume.policy();
        let update_atime = policy.atime == AtimePolicy::Enabled && !policy.read_only;
        let (ino, position) = (handle.ino, handle.position);

        let n = handle
            .volume
            .with_engine(|engine| engine.read(ino, position, buf, update_atime))?;
        handle.position += n as u64;
        Ok(n)
    }

    pub fn write(&self, handle: &mut FileHandle, data: &[u8]) -> Result<usize, FsError> {
        if !handle.flags.write {
            return Err(FsError::BadHandle);
        }
        check_writable(&handle.volume)?;
        let (ino, append) = (handle.ino, handle.flags.append);
        let mut position = handle.position;

        let n = handle.volume.with_engine(|engine| {
            if append {
                position = engine.stat(ino)?.size;
            }
            engine.write(ino, position, data)
        })?;
        handle.position = position + n as u64;
        Ok(n)
    }

    /// Move the file position; returns the new absolute position
    pub fn seek(&self, handle: &mut FileHandle, whence: SeekFrom) -> Result<u64, FsError> {
        let ino = handle.ino;
        let size = handle.volume.with_engine(|engine| Ok(engine.stat(ino)?.size))?;
        let position = whence
            .resolve(handle.position, size)
            .ok_or(FsError::InvalidArgument)?;
        handle.position = position;
        Ok(position)
    }

    pub fn fstat(&self, handle: &FileHandle) -> Result<Stat, FsError> {
        let ino = handle.ino;
        let info = handle.volume.with_engine(|engine| engine.stat(ino))?;
        Ok(make_stat(&handle.volume, &info))
    }

    pub fn stat(&self, path: &str) -> Result<Stat, FsError> {
        let (volume, inner) = self.resolve(path)?;
        let info = volume.with_engine(|engine| {
            let ino = engine.lookup(inner)?;
            engine.stat(ino)
        })?;
        Ok(make_stat(&volume, &info))
    }

    /// Create a hard link `new_path` to `existing`
    pub fn link(&self, existing: &str, new_path: &str) -> Result<(), FsError> {
        let (volume, from, to) = self.resolve_pair(existing, new_path)?;
        check_writable(&volume)?;
        volume.with_engine(|engine| engine.link(from, to))
    }

    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        let (volume, inner) = self.resolve(path)?;
        check_writable(&volume)?;
        volume.with_engine(|engine| engine.unlink(inner))
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<(), FsError> {
        let (volume, from, to) = self.resolve_pair(old_path, new_path)?;
        check_writable(&volume)?;
        volume.with_engine(|engine| engine.rename(from, to))
    }

    pub fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let (volume, inner) = self.resolve(path)?;
        check_writable(&volume)?;
        volume.with_engine(|engine| engine.create(inner, NodeKind::Directory).map(|_| ()))
    }

    /// Open a directory for enumeration
    ///
    /// Hidden and system entries are left out unless the volume was mounted
    /// to show them.
    pub fn diropen(&self, path: &str) -> Result<DirHandle, FsError> {
        let (volume, inner) = self.resolve(path)?;
        let (ino, entries) = volume.with_engine(|engine| {
            let ino = engine.lookup(inner)?;
            if engine.stat(ino)?.kind != NodeKind::Directory {
                return Err(FsError::NotDirectory);
            }
            Ok((ino, visible_entries(&volume, engine, ino)?))
        })?;

        Ok(DirHandle {
            volume,
            ino,
            entries,
            index: 0,
        })
    }

    /// Next entry name and status, `None` at the end of the directory
    pub fn dirnext(&self, dir: &mut DirHandle) -> Result<Option<(String, Stat)>, FsError> {
        let entry = match dir.entries.get(dir.index) {
            Some(entry) => entry.clone(),
            None => {
                return if dir.volume.is_live() {
                    Ok(None)
                } else {
                    Err(FsError::NoSuchDevice)
                };
            }
        };
        let info = dir.volume.with_engine(|engine| engine.stat(entry.ino))?;
        dir.index += 1;
        Ok(Some((entry.name, make_stat(&dir.volume, &info))))
    }

    /// Restart enumeration, picking up entries added since open
    pub fn dirreset(&self, dir: &mut DirHandle) -> Result<(), FsError> {
        let ino = dir.ino;
        let volume = dir.volume.clone();
        dir.entries = volume.with_engine(|engine| visible_entries(&volume, engine, ino))?;
        dir.index = 0;
        Ok(())
    }

    pub fn dirclose(&self, dir: DirHandle) -> Result<(), FsError> {
        if dir.volume.is_live() {
            Ok(())
        } else {
            Err(FsError::NoSuchDevice)
        }
    }

    pub fn statvfs(&self, path: &str) -> Result<StatVfs, FsError> {
        let (volume, _) = self.resolve(path)?;
        let stats = volume.with_engine(|engine| engine.statvfs())?;
        Ok(StatVfs {
            bsize: stats.block_size,
            frsize: stats.block_size,
            blocks: stats.total_blocks,
            bfree: stats.free_blocks,
            bavail: stats.free_blocks,
            files: stats.total_inodes,
            ffree: stats.free_inodes,
            favail: stats.free_inodes,
            fsid: volume.id(),
            flag: if volume.is_read_only() { ST_RDONLY } else { 0 },
            namemax: stats.name_max,
        })
    }

    pub fn ftruncate(&self, handle: &mut FileHandle, len: u64) -> Result<(), FsError> {
        if !handle.flags.write {
            return Err(FsError::BadHandle);
        }
        check_writable(&handle.volume)?;
        let ino = handle.ino;
        handle.volume.with_engine(|engine| engine.truncate(ino, len))
    }

    pub fn fsync(&self, handle: &FileHandle) -> Result<(), FsError> {
        let ino = handle.ino;
        handle.volume.with_engine(|engine| engine.fsync(ino))
    }
}
