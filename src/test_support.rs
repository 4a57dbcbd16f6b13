//! Test doubles: an in-memory engine and disk layout helpers
//!
//! `MemEngine` validates a minimal boot sector through the device it is
//! given and keeps its volume label durable in the sector after it, so the
//! mount manager can be exercised end to end on a [`RamDisk`].

use crate::block::RamDisk;
use crate::engine::{
    AttrId, AttrKind, DirEntry, Engine, EngineDevice, EngineMountFlags, EngineVolume, InodeId,
    NodeInfo, NodeKind, VolumeError, VolumeStats,
};
use crate::fs::FsError;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub(crate) const OEM_ID: &[u8; 8] = b"NTFS    ";
/// Offset of the mock volume state byte in the boot sector
pub(crate) const STATE_OFFSET: usize = 0x1F0;
pub(crate) const STATE_HIBERNATED: u8 = 0x01;
pub(crate) const STATE_DIRTY: u8 = 0x02;

const SECTOR: usize = 512;
/// Volume-relative byte offset of the label sector
const LABEL_OFFSET: u64 = 512;
const ROOT_INO: InodeId = 5;
const CLUSTER: u32 = 4096;
const INODE_LIMIT: u64 = 1024;

// ---------------------------------------------------------------------------
// Disk layout helpers
// ---------------------------------------------------------------------------

/// Write an NTFS-looking boot sector at `start` and clear its label sector
pub(crate) fn format_volume(disk: &RamDisk, start: u64) {
    let mut boot = [0u8; SECTOR];
    boot[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    boot[3..11].copy_from_slice(OEM_ID);
    boot[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    boot[510] = 0x55;
    boot[511] = 0xAA;
    disk.poke(start as usize * SECTOR, &boot).unwrap();
    disk.poke((start as usize + 1) * SECTOR, &[0u8; SECTOR]).unwrap();
}

/// Set the mock state byte of the volume at `start`
pub(crate) fn set_volume_state(disk: &RamDisk, start: u64, state: u8) {
    disk.poke(start as usize * SECTOR + STATE_OFFSET, &[state]).unwrap();
}

/// Read the mock state byte of the volume at `start`
pub(crate) fn volume_state(disk: &RamDisk, start: u64) -> u8 {
    disk.peek(start as usize * SECTOR + STATE_OFFSET, 1).unwrap()[0]
}

/// Break the bytes-per-sector field so the boot sector fails validation
pub(crate) fn corrupt_volume(disk: &RamDisk, start: u64) {
    disk.poke(start as usize * SECTOR + 11, &[0, 0]).unwrap();
}

/// The label as durably recorded on disk, `None` if never written
pub(crate) fn disk_label(disk: &RamDisk, start: u64) -> Option<String> {
    let sector = disk.peek((start as usize + 1) * SECTOR, SECTOR).unwrap();
    decode_label_sector(&sector).map(|bytes| crate::volume::label::decode(&bytes))
}

/// Write an MBR with up to four `(type, lba_start, sector_count)` entries
pub(crate) fn write_mbr(disk: &RamDisk, entries: &[(u8, u32, u32)]) {
    let mut mbr = [0u8; SECTOR];
    for (i, (kind, start, count)) in entries.iter().enumerate().take(4) {
        let base = 446 + i * 16;
        mbr[base + 4] = *kind;
        mbr[base + 8..base + 12].copy_from_slice(&start.to_le_bytes());
        mbr[base + 12..base + 16].copy_from_slice(&count.to_le_bytes());
    }
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    disk.poke(0, &mbr).unwrap();
}

/// Write an EBR at `lba`: one logical partition at `lba + offset`, and an
/// optional link to the next EBR relative to the extended partition base
pub(crate) fn write_ebr(disk: &RamDisk, lba: u64, logical: (u8, u32), next: Option<u32>) {
    let mut ebr = [0u8; SECTOR];
    ebr[446 + 4] = logical.0;
    ebr[446 + 8..446 + 12].copy_from_slice(&logical.1.to_le_bytes());
    ebr[446 + 12..446 + 16].copy_from_slice(&100u32.to_le_bytes());
    if let Some(next) = next {
        ebr[462 + 4] = 0x05;
        ebr[462 + 8..462 + 12].copy_from_slice(&next.to_le_bytes());
        ebr[462 + 12..462 + 16].copy_from_slice(&100u32.to_le_bytes());
    }
    ebr[510] = 0x55;
    ebr[511] = 0xAA;
    disk.poke(lba as usize * SECTOR, &ebr).unwrap();
}

fn decode_label_sector(sector: &[u8]) -> Option<Vec<u8>> {
    if sector[0] != 1 {
        return None;
    }
    let len = core::cmp::min(u16::from_le_bytes([sector[2], sector[3]]) as usize, SECTOR - 4);
    Some(sector[4..4 + len].to_vec())
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Shared {
    inits: AtomicUsize,
    shutdowns: AtomicUsize,
    mounts: AtomicUsize,
    live: AtomicUsize,
    fail_statvfs: AtomicBool,
    fail_next_label_write: AtomicBool,
    fail_next_sync: AtomicBool,
}

/// Engine double; clones share counters and failure switches
#[derive(Clone, Default)]
pub(crate) struct MemEngine {
    shared: Arc<Shared>,
}

impl MemEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inits(&self) -> usize {
        self.shared.inits.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.shared.shutdowns.load(Ordering::SeqCst)
    }

    /// Successful engine mounts so far
    pub(crate) fn mounts(&self) -> usize {
        self.shared.mounts.load(Ordering::SeqCst)
    }

    /// Engine volumes currently alive
    pub(crate) fn live_volumes(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Make statvfs fail on every volume
    pub(crate) fn set_fail_statvfs(&self, fail: bool) {
        self.shared.fail_statvfs.store(fail, Ordering::SeqCst);
    }

    /// Make the next label attribute write fail
    pub(crate) fn fail_next_label_write(&self) {
        self.shared.fail_next_label_write.store(true, Ordering::SeqCst);
    }

    /// Make the next volume inode sync fail
    pub(crate) fn fail_next_sync(&self) {
        self.shared.fail_next_sync.store(true, Ordering::SeqCst);
    }
}

impl Engine for MemEngine {
    fn init(&self) {
        self.shared.inits.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.shared.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn mount(
        &self,
        mut device: EngineDevice,
        flags: EngineMountFlags,
    ) -> Result<Box<dyn EngineVolume>, VolumeError> {
        device.open(flags.read_only).map_err(|_| VolumeError::Io)?;
        match MemVolume::load(&mut device, flags) {
            Ok((label, clean_dirty)) => {
                if clean_dirty {
                    let mut state = [0u8; 1];
                    let _ = device.read_at(STATE_OFFSET as u64, &mut state);
                    state[0] &= !STATE_DIRTY;
                    let _ = device.write_at(STATE_OFFSET as u64, &state);
                }
                self.shared.mounts.fetch_add(1, Ordering::SeqCst);
                self.shared.live.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MemVolume::new(device, self.shared.clone(), flags.read_only, label)))
            }
            Err(e) => {
                let _ = device.close();
                Err(e)
            }
        }
    }
}

struct Node {
    kind: NodeKind,
    data: Vec<u8>,
    children: BTreeMap<String, InodeId>,
    links: u32,
    hidden: bool,
    system: bool,
    atime: u64,
    mtime: u64,
    ctime: u64,
}

impl Node {
    fn new(kind: NodeKind, name: &str, now: u64) -> Self {
        Self {
            kind,
            data: Vec::new(),
            children: BTreeMap::new(),
            links: 1,
            hidden: name.starts_with('.'),
            system: name.starts_with('$'),
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

/// Engine volume double
///
/// Names starting with `.` are hidden and names starting with `$` are
/// system entries.
struct MemVolume {
    device: EngineDevice,
    shared: Arc<Shared>,
    read_only: bool,
    ignore_case: bool,
    label: Option<Vec<u8>>,
    nodes: BTreeMap<InodeId, Node>,
    next_ino: InodeId,
    clock: u64,
}

impl MemVolume {
    /// Validate the boot sector; returns the stored label and whether the
    /// dirty bit should be cleared
    fn load(device: &mut EngineDevice, flags: EngineMountFlags) -> Result<(Option<Vec<u8>>, bool), VolumeError> {
        let mut boot = [0u8; SECTOR];
        match device.read_at(0, &mut boot) {
            Ok(SECTOR) => {}
            _ => return Err(VolumeError::Io),
        }
        if &boot[3..11] != OEM_ID {
            return Err(VolumeError::NotNtfs);
        }
        if u16::from_le_bytes([boot[11], boot[12]]) as usize != SECTOR {
            return Err(VolumeError::Corrupt);
        }

        let state = boot[STATE_OFFSET];
        if state & STATE_HIBERNATED != 0 && !flags.ignore_hiberfile {
            return Err(VolumeError::Hibernated);
        }
        if state & STATE_DIRTY != 0 && !flags.recover {
            return Err(VolumeError::UncleanUnmount);
        }

        let mut sector = [0u8; SECTOR];
        match device.read_at(LABEL_OFFSET, &mut sector) {
            Ok(SECTOR) => {}
            _ => return Err(VolumeError::Io),
        }
        let clean_dirty = state & STATE_DIRTY != 0 && !flags.read_only;
        Ok((decode_label_sector(&sector), clean_dirty))
    }

    fn new(device: EngineDevice, shared: Arc<Shared>, read_only: bool, label: Option<Vec<u8>>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_INO, Node::new(NodeKind::Directory, "", 0));
        Self {
            device,
            shared,
            read_only,
            ignore_case: false,
            label,
            nodes,
            next_ino: 64,
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn writable(&self) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        Ok(())
    }

    fn node(&self, ino: InodeId) -> Result<&Node, FsError> {
        self.nodes.get(&ino).ok_or(FsError::NotFound)
    }

    fn node_mut(&mut self, ino: InodeId) -> Result<&mut Node, FsError> {
        self.nodes.get_mut(&ino).ok_or(FsError::NotFound)
    }

    fn find_child(&self, dir: InodeId, name: &str) -> Result<Option<(String, InodeId)>, FsError> {
        let node = self.node(dir)?;
        if node.kind != NodeKind::Directory {
            return Err(FsError::NotDirectory);
        }
        let found = node.children.iter().find(|(child, _)| {
            if self.ignore_case {
                child.eq_ignore_ascii_case(name)
            } else {
                child.as_str() == name
            }
        });
        Ok(found.map(|(child, ino)| (child.clone(), *ino)))
    }

    fn resolve(&self, path: &str) -> Result<InodeId, FsError> {
        let mut current = ROOT_INO;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self
                .find_child(current, component)?
                .ok_or(FsError::NotFound)?
                .1;
        }
        Ok(current)
    }

    /// Parent directory and final component of `path`
    fn split<'p>(&self, path: &'p str) -> Result<(InodeId, &'p str), FsError> {
        let trimmed = path.trim_end_matches('/');
        let (parent, name) = trimmed.rsplit_once('/').ok_or(FsError::InvalidPath)?;
        if name.is_empty() {
            return Err(FsError::InvalidPath);
        }
        let parent = self.resolve(parent)?;
        if self.node(parent)?.kind != NodeKind::Directory {
            return Err(FsError::NotDirectory);
        }
        Ok((parent, name))
    }

    fn write_label_sector(&mut self) -> Result<(), FsError> {
        let mut sector = [0u8; SECTOR];
        if let Some(label) = &self.label {
            sector[0] = 1;
            sector[2..4].copy_from_slice(&(label.len() as u16).to_le_bytes());
            sector[4..4 + label.len()].copy_from_slice(label);
        }
        self.device.write_at(LABEL_OFFSET, &sector)?;
        Ok(())
    }

    fn label_mut(&mut self, attr: AttrId) -> Result<&mut Vec<u8>, FsError> {
        if attr != AttrId(1) {
            return Err(FsError::BadHandle);
        }
        self.label.as_mut().ok_or(FsError::NotFound)
    }
}

impl Drop for MemVolume {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EngineVolume for MemVolume {
    fn set_ignore_case(&mut self) {
        self.ignore_case = true;
    }

    fn attr_open(&mut self, kind: AttrKind) -> Result<Option<AttrId>, FsError> {
        match kind {
            AttrKind::VolumeName => Ok(self.label.as_ref().map(|_| AttrId(1))),
        }
    }

    fn attr_size(&mut self, attr: AttrId) -> Result<u64, FsError> {
        Ok(self.label_mut(attr)?.len() as u64)
    }

    fn attr_pread(&mut self, attr: AttrId, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let label = self.label_mut(attr)?;
        let start = core::cmp::min(offset as usize, label.len());
        let n = core::cmp::min(buf.len(), label.len() - start);
        buf[..n].copy_from_slice(&label[start..start + n]);
        Ok(n)
    }

    fn attr_truncate(&mut self, attr: AttrId, len: u64) -> Result<(), FsError> {
        self.writable()?;
        self.label_mut(attr)?.resize(len as usize, 0);
        Ok(())
    }

    fn attr_pwrite(&mut self, attr: AttrId, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        self.writable()?;
        if self.shared.fail_next_label_write.swap(false, Ordering::SeqCst) {
            return Err(FsError::IoError);
        }
        let label = self.label_mut(attr)?;
        let end = offset as usize + data.len();
        if label.len() < end {
            label.resize(end, 0);
        }
        label[offset as usize..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn attr_add(&mut self, kind: AttrKind, data: &[u8]) -> Result<(), FsError> {
        self.writable()?;
        match kind {
            AttrKind::VolumeName if self.label.is_some() => Err(FsError::AlreadyExists),
            AttrKind::VolumeName => {
                self.label = Some(data.to_vec());
                Ok(())
            }
        }
    }

    fn attr_close(&mut self, _attr: AttrId) {}

    fn sync_volume_inode(&mut self) -> Result<(), FsError> {
        self.writable()?;
        if self.shared.fail_next_sync.swap(false, Ordering::SeqCst) {
            return Err(FsError::IoError);
        }
        self.write_label_sector()
    }

    fn unmount(mut self: Box<Self>, force: bool) -> Result<(), FsError> {
        let closed = self.device.close().map_err(FsError::from);
        if force {
            Ok(())
        } else {
            closed
        }
    }

    fn lookup(&mut self, path: &str) -> Result<InodeId, FsError> {
        self.resolve(path)
    }

    fn create(&mut self, path: &str, kind: NodeKind) -> Result<InodeId, FsError> {
        self.writable()?;
        let (parent, name) = self.split(path)?;
        if self.find_child(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        let now = self.tick();
        self.nodes.insert(ino, Node::new(kind, name, now));
        self.node_mut(parent)?.children.insert(String::from(name), ino);
        Ok(ino)
    }

    fn stat(&mut self, ino: InodeId) -> Result<NodeInfo, FsError> {
        let node = self.node(ino)?;
        Ok(NodeInfo {
            ino,
            kind: node.kind,
            size: node.data.len() as u64,
            links: node.links,
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
            hidden: node.hidden,
            system: node.system,
        })
    }

    fn read(&mut self, ino: InodeId, offset: u64, buf: &mut [u8], update_atime: bool) -> Result<usize, FsError> {
        let now = self.tick();
        let read_only = self.read_only;
        let node = self.node_mut(ino)?;
        if node.kind == NodeKind::Directory {
            return Err(FsError::IsDirectory);
        }
        let start = core::cmp::min(offset as usize, node.data.len());
        let n = core::cmp::min(buf.len(), node.data.len() - start);
        buf[..n].copy_from_slice(&node.data[start..start + n]);
        if update_atime && !read_only {
            node.atime = now;
        }
        Ok(n)
    }

    fn write(&mut self, ino: InodeId, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        self.writable()?;
        let now = self.tick();
        let node = self.node_mut(ino)?;
        if node.kind == NodeKind::Directory {
            return Err(FsError::IsDirectory);
        }
        let end = offset as usize + data.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[offset as usize..end].copy_from_slice(data);
        node.mtime = now;
        Ok(data.len())
    }

    fn truncate(&mut self, ino: InodeId, len: u64) -> Result<(), FsError> {
        self.writable()?;
        let now = self.tick();
        let node = self.node_mut(ino)?;
        if node.kind == NodeKind::Directory {
            return Err(FsError::IsDirectory);
        }
        node.data.resize(len as usize, 0);
        node.mtime = now;
        Ok(())
    }

    fn fsync(&mut self, ino: InodeId) -> Result<(), FsError> {
        self.node(ino).map(|_| ())
    }

    fn link(&mut self, existing: &str, new_path: &str) -> Result<(), FsError> {
        self.writable()?;
        let ino = self.resolve(existing)?;
        if self.node(ino)?.kind == NodeKind::Directory {
            return Err(FsError::PermissionDenied);
        }
        let (parent, name) = self.split(new_path)?;
        if self.find_child(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        self.node_mut(parent)?.children.insert(String::from(name), ino);
        self.node_mut(ino)?.links += 1;
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        self.writable()?;
        let (parent, name) = self.split(path)?;
        let (stored, ino) = self.find_child(parent, name)?.ok_or(FsError::NotFound)?;
        let node = self.node(ino)?;
        if node.kind == NodeKind::Directory && !node.children.is_empty() {
            return Err(FsError::NotEmpty);
        }
        self.node_mut(parent)?.children.remove(&stored);
        let node = self.node_mut(ino)?;
        node.links -= 1;
        if node.links == 0 {
            self.nodes.remove(&ino);
        }
        Ok(())
    }

    fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), FsError> {
        self.writable()?;
        let (old_parent, old_name) = self.split(old_path)?;
        let (stored, ino) = self.find_child(old_parent, old_name)?.ok_or(FsError::NotFound)?;
        let (new_parent, new_name) = self.split(new_path)?;
        if self.find_child(new_parent, new_name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        self.node_mut(old_parent)?.children.remove(&stored);
        self.node_mut(new_parent)?.children.insert(String::from(new_name), ino);
        let now = self.tick();
        self.node_mut(ino)?.ctime = now;
        Ok(())
    }

    fn read_dir(&mut self, ino: InodeId) -> Result<Vec<DirEntry>, FsError> {
        let dir = self.node(ino)?;
        if dir.kind != NodeKind::Directory {
            return Err(FsError::NotDirectory);
        }
        dir.children
            .iter()
            .map(|(name, child)| {
                let node = self.node(*child)?;
                Ok(DirEntry {
                    name: name.clone(),
                    ino: *child,
                    kind: node.kind,
                    hidden: node.hidden,
                    system: node.system,
                })
            })
            .collect()
    }

    fn statvfs(&mut self) -> Result<VolumeStats, FsError> {
        if self.shared.fail_statvfs.load(Ordering::SeqCst) {
            return Err(FsError::IoError);
        }
        let total_blocks = self.device.geometry().size_bytes() / u64::from(CLUSTER);
        let used: u64 = self
            .nodes
            .values()
            .map(|node| (node.data.len() as u64).div_ceil(u64::from(CLUSTER)))
            .sum();
        Ok(VolumeStats {
            block_size: CLUSTER,
            total_blocks,
            free_blocks: total_blocks.saturating_sub(used),
            total_inodes: INODE_LIMIT,
            free_inodes: INODE_LIMIT.saturating_sub(self.nodes.len() as u64),
            name_max: 255,
        })
    }
}

