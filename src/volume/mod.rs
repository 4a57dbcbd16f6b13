//! Volume Layer
//!
//! A [`Volume`] is the descriptor of one mounted filesystem: its identity,
//! the policy it was mounted with, and exclusive ownership of the engine
//! volume (which in turn owns the sector adapter). The descriptor's state
//! mutex doubles as the per-volume lock that serializes label changes.
//!
//! The [`VolumeManager`] builds descriptors, publishes them through the
//! [`DeviceRegistry`] and tears them down again.

pub mod label;
pub mod lock;
pub mod manager;
pub mod options;
pub mod registry;

pub use label::MAX_LABEL_UNITS;
pub use lock::{LockError, MountGuard, MountLock};
pub use manager::{MountPoint, Mounted, VolumeManager, MAX_MOUNTS, MOUNT_PREFIX};
pub use options::{AtimePolicy, MountFlags, MountOptions, VolumePolicy};
pub use registry::{DeviceRegistry, RegistryError};

use crate::block::{BlockIo, Geometry};
use crate::engine::{AttrId, AttrKind, EngineVolume};
use crate::error::MountError;
use crate::fs::FsError;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use spin::Mutex;

/// Identity of the block device a volume was mounted from
///
/// The device's allocation address; it cannot be reused while a mounted
/// volume's adapter still holds the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeviceKey(usize);

impl DeviceKey {
    pub(crate) fn of(device: &Arc<dyn BlockIo>) -> Self {
        Self(Arc::as_ptr(device) as *const () as usize)
    }
}

/// State guarded by the per-volume lock
struct VolumeState {
    /// Engine volume, taken at teardown
    engine: Option<Box<dyn EngineVolume>>,
    /// Cached label, cleared whenever the label is rewritten
    label: Option<String>,
    /// Cluster size reported by the engine at init
    block_size: u32,
}

/// A mounted volume
pub struct Volume {
    name: String,
    id: u64,
    policy: VolumePolicy,
    geometry: Option<Geometry>,
    source: Option<DeviceKey>,
    state: Mutex<VolumeState>,
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Volume");
        out.field("name", &self.name)
            .field("id", &self.id)
            .field("geometry", &self.geometry)
            .field("read_only", &self.policy.read_only);
        // Formatting must not block behind a label update
        match self.state.try_lock() {
            Some(state) => out.field("live", &state.engine.is_some()),
            None => out.field("live", &format_args!("<locked>")),
        };
        out.finish()
    }
}

impl Volume {
    /// Allocate a descriptor with no engine volume attached yet
    ///
    /// # Errors
    /// `MountError::OutOfMemory` if the name cannot be stored
    pub fn new(name: &str, id: u64, policy: VolumePolicy) -> Result<Self, MountError> {
        let mut owned = String::new();
        owned
            .try_reserve_exact(name.len())
            .map_err(|_| MountError::OutOfMemory)?;
        owned.push_str(name);

        Ok(Self {
            name: owned,
            id,
            policy,
            geometry: None,
            source: None,
            state: Mutex::new(VolumeState {
                engine: None,
                label: None,
                block_size: 0,
            }),
        })
    }

    /// Hand the mounted engine volume to the descriptor
    ///
    /// From here on dropping the descriptor force-unmounts the engine volume.
    pub(crate) fn attach(&mut self, source: DeviceKey, geometry: Geometry, engine: Box<dyn EngineVolume>) {
        self.source = Some(source);
        self.geometry = Some(geometry);
        self.state.get_mut().engine = Some(engine);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device identifier, unique per manager
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn policy(&self) -> &VolumePolicy {
        &self.policy
    }

    pub fn is_read_only(&self) -> bool {
        self.policy.read_only
    }

    /// Layout of the volume on its device
    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    /// Whether this volume was mounted from `source` at `start_sector`
    pub(crate) fn is_mounted_from(&self, source: DeviceKey, start_sector: u64) -> bool {
        self.source == Some(source) && self.geometry.map(|g| g.start_sector) == Some(start_sector)
    }

    /// Cluster size captured at init
    pub fn block_size(&self) -> u32 {
        self.state.lock().block_size
    }

    /// Whether the engine volume is still attached
    pub fn is_live(&self) -> bool {
        self.state.lock().engine.is_some()
    }

    /// Volume-local initialization, run before the volume is published
    pub(crate) fn init(&self) -> Result<(), MountError> {
        let mut state = self.state.lock();
        state.label = None;
        let engine = state.engine.as_mut().ok_or(MountError::NoSuchDevice)?;
        let stats = engine.statvfs().map_err(|e| {
            log::warn!("volume {}: statvfs failed during init: {}", self.name, e);
            MountError::Io
        })?;
        state.block_size = stats.block_size;
        Ok(())
    }

    /// Release volume-local state and hand back the engine volume
    pub(crate) fn deinit(&self) -> Option<Box<dyn EngineVolume>> {
        let mut state = self.state.lock();
        state.label = None;
        state.engine.take()
    }

    /// Run `f` against the engine volume under the per-volume lock
    ///
    /// Fails with `FsError::NoSuchDevice` once the volume is unmounted.
    pub fn with_engine<T>(
        &self,
        f: impl FnOnce(&mut dyn EngineVolume) -> Result<T, FsError>,
    ) -> Result<T, FsError> {
        let mut state = self.state.lock();
        match state.engine.as_mut() {
            Some(engine) => f(engine.as_mut()),
            None => Err(FsError::NoSuchDevice),
        }
    }

    /// Current label, read from the volume-name attribute on a cache miss
    pub fn label(&self) -> Result<String, MountError> {
        let mut state = self.state.lock();
        let VolumeState { engine, label: cache, .. } = &mut *state;
        if let Some(cached) = cache.as_ref() {
            return Ok(cached.clone());
        }

        let engine = engine.as_mut().ok_or(MountError::NoSuchDevice)?;
        let current = match read_label_attr(engine.as_mut())? {
            Some(bytes) => label::decode(&bytes),
            None => String::new(),
        };
        *cache = Some(current.clone());
        Ok(current)
    }

    /// Replace the label
    ///
    /// Either the new label is fully written and synced, or the previous
    /// bytes are put back and an error returned.
    pub fn set_label(&self, new_label: &str) -> Result<(), MountError> {
        if self.policy.read_only {
            return Err(MountError::ReadOnly);
        }
        let bytes = label::encode(new_label)?;

        let mut state = self.state.lock();
        let VolumeState { engine, label: cache, .. } = &mut *state;
        let engine = engine.as_mut().ok_or(MountError::NoSuchDevice)?.as_mut();

        let previous = read_label_attr(engine)?;
        let result = write_label_attr(engine, &bytes).and_then(|()| {
            *cache = None;
            engine.sync_volume_inode().map_err(MountError::from)
        });

        if let Err(e) = result {
            log::warn!("volume {}: label update failed ({}), restoring previous label", self.name, e);
            *cache = None;
            if let Err(restore) = restore_label_attr(engine, previous.as_deref()) {
                log::warn!("volume {}: label restore failed: {}", self.name, restore);
            }
            return Err(e);
        }

        log::debug!("volume {}: label set to {:?}", self.name, new_label);
        Ok(())
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        if let Some(engine) = self.state.get_mut().engine.take() {
            log::warn!("volume {}: dropped while mounted, forcing unmount", self.name);
            if let Err(e) = engine.unmount(true) {
                log::warn!("volume {}: forced unmount failed: {}", self.name, e);
            }
        }
    }
}

/// Read the whole volume-name attribute, `None` if it does not exist
fn read_label_attr(engine: &mut dyn EngineVolume) -> Result<Option<Vec<u8>>, MountError> {
    let attr = match engine.attr_open(AttrKind::VolumeName)? {
        Some(attr) => attr,
        None => return Ok(None),
    };
    let result = read_open_attr(engine, attr);
    engine.attr_close(attr);
    result.map(Some)
}

fn read_open_attr(engine: &mut dyn EngineVolume, attr: AttrId) -> Result<Vec<u8>, MountError> {
    let size = engine.attr_size(attr)? as usize;
    let len = core::cmp::min(size, MAX_LABEL_UNITS * 2);
    let mut bytes = vec![0u8; len];
    let n = engine.attr_pread(attr, 0, &mut bytes)?;
    bytes.truncate(n);
    Ok(bytes)
}

/// Write `bytes` as the full volume-name attribute, creating it if absent
fn write_label_attr(engine: &mut dyn EngineVolume, bytes: &[u8]) -> Result<(), MountError> {
    match engine.attr_open(AttrKind::VolumeName)? {
        Some(attr) => {
            let result = overwrite_attr(engine, attr, bytes);
            engine.attr_close(attr);
            result
        }
        None => engine.attr_add(AttrKind::VolumeName, bytes).map_err(MountError::from),
    }
}

fn overwrite_attr(engine: &mut dyn EngineVolume, attr: AttrId, bytes: &[u8]) -> Result<(), MountError> {
    engine.attr_truncate(attr, bytes.len() as u64)?;
    let written = engine.attr_pwrite(attr, 0, bytes)?;
    if written != bytes.len() {
        return Err(MountError::Io);
    }
    Ok(())
}

/// Put the attribute back the way it was before a failed update
fn restore_label_attr(engine: &mut dyn EngineVolume, previous: Option<&[u8]>) -> Result<(), MountError> {
    match previous {
        Some(bytes) => write_label_attr(engine, bytes)?,
        None => {
            if let Some(attr) = engine.attr_open(AttrKind::VolumeName)? {
                let result = engine.attr_truncate(attr, 0);
                engine.attr_close(attr);
                result?;
            }
        }
    }
    engine.sync_volume_inode().map_err(MountError::from)
}
