//! Volume Mount Manager
//!
//! Owns the engine, the device registry and the mount lock, and drives the
//! mount and unmount sequences:
//!
//! ```text
//! mount:   descriptor -> adapter -> engine device -> engine mount
//!          -> ignore case -> volume init -> registry insert
//! unmount: registry remove -> volume deinit -> engine unmount
//! ```
//!
//! Every resource built during a mount is owned by the scope that built it,
//! so a failure at any step drops what exists so far in reverse order. A
//! descriptor only reaches the registry once it is fully initialized.

use super::lock::{LockError, MountGuard, MountLock};
use super::options::{MountOptions, VolumePolicy};
use super::registry::DeviceRegistry;
use super::{DeviceKey, Volume};
use crate::block::{find_partitions, BlockIo, Partition, SectorIo};
use crate::engine::{Engine, EngineDevice};
use crate::error::MountError;
use crate::fs::DevOps;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Prefix of names chosen by bulk mounts
pub const MOUNT_PREFIX: &str = "ntfs";

/// Number of names available to bulk mounts (`ntfs0` to `ntfs9`)
pub const MAX_MOUNTS: usize = 10;

/// Result of a successful mount
#[derive(Debug, Clone)]
pub enum Mounted {
    /// A new volume was mounted and registered
    Fresh(Arc<Volume>),
    /// The name was already registered; nothing was mounted
    Existing(Arc<Volume>),
}

impl Mounted {
    pub fn volume(&self) -> &Arc<Volume> {
        match self {
            Mounted::Fresh(volume) | Mounted::Existing(volume) => volume,
        }
    }

    pub fn into_volume(self) -> Arc<Volume> {
        match self {
            Mounted::Fresh(volume) | Mounted::Existing(volume) => volume,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Mounted::Fresh(_))
    }
}

/// A volume mounted by a bulk mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Name the volume was registered under
    pub name: String,
    /// First device sector of the volume
    pub start_sector: u64,
    /// Number of sectors the volume was mounted with
    pub sector_count: u64,
}

/// The mount manager context
pub struct VolumeManager {
    engine: Box<dyn Engine>,
    registry: DeviceRegistry,
    lock: MountLock,
    /// Engine initialized and not yet shut down; written only under `lock`
    engine_live: AtomicBool,
    next_id: AtomicU64,
}

impl VolumeManager {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            engine,
            registry: DeviceRegistry::new(),
            lock: MountLock::new(),
            engine_live: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enter the mount critical section
    ///
    /// Mount and unmount fail with `MountError::Busy` while the guard lives.
    pub fn try_lock_mount(&self) -> Result<MountGuard<'_>, LockError> {
        self.lock.try_acquire()
    }

    fn enter(&self) -> Result<MountGuard<'_>, MountError> {
        self.lock.try_acquire().map_err(|e| {
            log::debug!("mount manager: {}", e);
            MountError::Busy
        })
    }

    /// Mount the volume starting at `start_sector` on `device` as `name`
    ///
    /// The volume extends to the end of the device; use
    /// [`mount_partition`](Self::mount_partition) to bound it. If `name` is
    /// already registered the existing volume is returned as
    /// [`Mounted::Existing`] and `device` is left untouched.
    ///
    /// # Errors
    /// * `MountError::InvalidArgument` - empty name or unusable geometry
    /// * `MountError::OutOfMemory` - an allocation failed
    /// * `MountError::NotANtfsVolume`, `CorruptVolume`, `HibernatedVolume`,
    ///   `UncleanUnmount` - the engine refused the volume
    /// * `MountError::Busy` - called from inside the mount critical section
    ///
    /// On error nothing built by the call remains allocated.
    pub fn mount(
        &self,
        name: &str,
        device: Arc<dyn BlockIo>,
        start_sector: u64,
        options: &MountOptions,
    ) -> Result<Mounted, MountError> {
        let partition = Partition {
            start_sector,
            sector_count: None,
        };
        self.mount_partition(name, device, partition, options)
    }

    /// Mount `partition` of `device` as `name`
    ///
    /// A declared length running past the device end is clamped to it.
    /// Errors and duplicate names behave as for [`mount`](Self::mount).
    pub fn mount_partition(
        &self,
        name: &str,
        device: Arc<dyn BlockIo>,
        partition: Partition,
        options: &MountOptions,
    ) -> Result<Mounted, MountError> {
        let guard = self.enter()?;
        self.mount_locked(&guard, name, device, partition, options)
    }

    fn mount_locked(
        &self,
        guard: &MountGuard<'_>,
        name: &str,
        device: Arc<dyn BlockIo>,
        partition: Partition,
        options: &MountOptions,
    ) -> Result<Mounted, MountError> {
        debug_assert!(guard.is_for(&self.lock));
        if name.is_empty() {
            return Err(MountError::InvalidArgument);
        }

        let started = self.start_engine(guard);

        if let Some(existing) = self.registry.lookup(name) {
            log::info!("mount: {} is already mounted, returning existing volume", name);
            return Ok(Mounted::Existing(existing));
        }

        match self.build_volume(name, device, partition, options) {
            Ok(volume) => Ok(Mounted::Fresh(volume)),
            Err(e) => {
                log::warn!("mount: {} failed: {}", name, e);
                if started {
                    self.stop_engine_if_idle(guard);
                }
                Err(e)
            }
        }
    }

    fn build_volume(
        &self,
        name: &str,
        device: Arc<dyn BlockIo>,
        partition: Partition,
        options: &MountOptions,
    ) -> Result<Arc<Volume>, MountError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut volume = Volume::new(name, id, VolumePolicy::from(options))?;

        let source = DeviceKey::of(&device);
        let io = SectorIo::new(
            device,
            partition.start_sector,
            partition.sector_count,
            options.cache_page_size,
            options.cache_page_count,
        )?;
        let geometry = io.geometry();
        let engine_device = EngineDevice::new(name, geometry, Box::new(io))?;

        if options.read_only {
            log::info!("mount: mounting {} as read-only", name);
        }
        let mut engine_volume = self
            .engine
            .mount(engine_device, options.engine_flags())
            .map_err(|e| {
                log::debug!("mount: engine refused {}: {}", name, e);
                MountError::from(e)
            })?;
        log::debug!("mount: engine mounted {}", name);

        if options.ignore_case {
            engine_volume.set_ignore_case();
        }
        volume.attach(source, geometry, engine_volume);

        if let Err(e) = volume.init() {
            self.teardown(&volume, true);
            return Err(e);
        }

        let volume = Arc::new(volume);
        if let Err(e) = self.registry.insert(volume.clone()) {
            log::warn!("mount: registering {} failed: {}", name, e);
            self.teardown(&volume, true);
            return Err(MountError::AlreadyMounted);
        }

        log::info!(
            "mount: {} mounted (start sector {}, {} sectors)",
            name,
            geometry.start_sector,
            geometry.sector_count
        );
        Ok(volume)
    }

    /// Unmount `name`; an unregistered name is a no-op
    ///
    /// Engine errors during the final flush are logged, not returned; with
    /// `force` the engine unmounts despite them.
    ///
    /// # Errors
    /// `MountError::Busy` if called from inside the mount critical section
    pub fn unmount(&self, name: &str, force: bool) -> Result<(), MountError> {
        let guard = self.enter()?;
        self.unmount_locked(&guard, name, force);
        Ok(())
    }

    fn unmount_locked(&self, guard: &MountGuard<'_>, name: &str, force: bool) {
        let volume = match self.registry.remove(name) {
            Some(volume) => volume,
            None => return,
        };
        self.teardown(&volume, force);
        log::info!("unmount: {} unmounted", name);
        self.stop_engine_if_idle(guard);
    }

    fn teardown(&self, volume: &Volume, force: bool) {
        if let Some(engine_volume) = volume.deinit() {
            if let Err(e) = engine_volume.unmount(force) {
                log::warn!("unmount: engine reported {} while unmounting {}", e, volume.name());
            }
        }
    }

    /// Initialize the engine if it is not live; true if this call did it
    fn start_engine(&self, _guard: &MountGuard<'_>) -> bool {
        if self.engine_live.load(Ordering::Acquire) {
            return false;
        }
        self.engine.init();
        self.engine_live.store(true, Ordering::Release);
        log::debug!("mount manager: engine initialized");
        true
    }

    fn stop_engine_if_idle(&self, _guard: &MountGuard<'_>) {
        if self.registry.is_empty() && self.engine_live.swap(false, Ordering::AcqRel) {
            self.engine.shutdown();
            log::debug!("mount manager: engine shut down");
        }
    }

    /// Whether the engine is currently initialized
    pub fn engine_live(&self) -> bool {
        self.engine_live.load(Ordering::Acquire)
    }

    /// Label of the volume registered as `name`
    ///
    /// # Errors
    /// * `MountError::InvalidArgument` - empty name
    /// * `MountError::NoSuchDevice` - nothing registered under `name`
    pub fn get_volume_name(&self, name: &str) -> Result<String, MountError> {
        self.registered(name)?.label()
    }

    /// Replace the label of the volume registered as `name`
    ///
    /// Serialized against other label changes on the same volume. On error
    /// the previous label is still the one on disk.
    pub fn rename_volume(&self, name: &str, label: &str) -> Result<(), MountError> {
        self.registered(name)?.set_label(label)
    }

    fn registered(&self, name: &str) -> Result<Arc<Volume>, MountError> {
        if name.is_empty() {
            return Err(MountError::InvalidArgument);
        }
        self.registry.lookup(name).ok_or(MountError::NoSuchDevice)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Volume>> {
        self.registry.lookup(name)
    }

    pub fn is_mounted(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Number of registered volumes
    pub fn mount_count(&self) -> usize {
        self.registry.len()
    }

    /// Dispatch table over the registered volumes
    pub fn devops(&self) -> DevOps<'_> {
        DevOps::new(self)
    }

    /// Find and mount every NTFS volume on `device` under `ntfsN` names
    ///
    /// Each volume is bounded by its partition table length. Partitions
    /// whose mount fails are skipped, as are partitions of this device that
    /// are already registered, so calling this again mounts nothing twice.
    ///
    /// # Errors
    /// * `MountError::AddressUnavailable` - all names are taken; volumes
    ///   mounted before that point stay mounted
    /// * `MountError::Io` - the partition table cannot be read
    pub fn mount_device(&self, device: Arc<dyn BlockIo>, options: &MountOptions) -> Result<Vec<MountPoint>, MountError> {
        let guard = self.enter()?;
        let mut mounted = Vec::new();
        self.mount_partitions(&guard, device, options, &mut mounted)?;
        Ok(mounted)
    }

    /// [`mount_device`](Self::mount_device) over several devices
    ///
    /// A device whose partition table cannot be read is skipped.
    pub fn mount_all(&self, devices: &[Arc<dyn BlockIo>], options: &MountOptions) -> Result<Vec<MountPoint>, MountError> {
        let guard = self.enter()?;
        let mut mounted = Vec::new();
        for device in devices {
            match self.mount_partitions(&guard, device.clone(), options, &mut mounted) {
                Ok(()) => {}
                Err(MountError::AddressUnavailable) => return Err(MountError::AddressUnavailable),
                Err(e) => log::warn!("mount: skipping device: {}", e),
            }
        }
        Ok(mounted)
    }

    fn mount_partitions(
        &self,
        guard: &MountGuard<'_>,
        device: Arc<dyn BlockIo>,
        options: &MountOptions,
        mounted: &mut Vec<MountPoint>,
    ) -> Result<(), MountError> {
        let partitions = find_partitions(device.as_ref())?;
        log::debug!("mount: found {} NTFS partition(s)", partitions.len());

        let source = DeviceKey::of(&device);
        for partition in partitions {
            let start_sector = partition.start_sector;
            if let Some(existing) = self.registry.find(|v| v.is_mounted_from(source, start_sector)) {
                log::debug!("mount: partition at sector {} already mounted as {}", start_sector, existing.name());
                continue;
            }

            let name = self.next_free_name()?;
            match self.mount_locked(guard, &name, device.clone(), partition, options) {
                Ok(outcome) => {
                    let sector_count = outcome.volume().geometry().map_or(0, |g| g.sector_count);
                    mounted.push(MountPoint {
                        name,
                        start_sector,
                        sector_count,
                    });
                }
                Err(e) => log::warn!("mount: partition at sector {} skipped: {}", start_sector, e),
            }
        }
        Ok(())
    }

    fn next_free_name(&self) -> Result<String, MountError> {
        (0..MAX_MOUNTS)
            .map(|n| format!("{}{}", MOUNT_PREFIX, n))
            .find(|name| !self.registry.contains(name))
            .ok_or(MountError::AddressUnavailable)
    }
}

impl Drop for VolumeManager {
    fn drop(&mut self) {
        for volume in self.registry.drain() {
            self.teardown(&volume, false);
            log::info!("unmount: {} unmounted at shutdown", volume.name());
        }
        if self.engine_live.swap(false, Ordering::AcqRel) {
            self.engine.shutdown();
        }
    }
}
