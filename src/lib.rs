//! Volume Mount Manager
//!
//! Mounts a foreign on-disk filesystem, driven by an opaque filesystem
//! engine, on top of storage that is only reachable as raw sector-addressed
//! block devices, and republishes each mounted volume under a device name
//! that generic file I/O call sites can resolve.
//!
//! # Architecture
//!
//! ```text
//! Driver entry points / file I/O call sites
//!         |                     |
//!         v                     v
//!   VolumeManager  <----   DevOps dispatch table ("name:/path")
//!    |    |     |
//!    |    |     +--> DeviceRegistry (name -> Volume)
//!    |    +--------> MountLock (try-acquire, non-reentrant)
//!    v
//!  Engine::mount(EngineDevice)
//!         |
//!         v
//!     SectorIo  (byte offsets -> sectors, relative to the start sector)
//!         |
//!         v
//!     PageCache (optional, write-through)
//!         |
//!         v
//!     BlockIo   (platform sector I/O)
//! ```
//!
//! The engine that understands on-disk structures is consumed through the
//! traits in [`engine`]; this crate owns everything around it: resource
//! ownership and rollback during mount, error translation, the name registry
//! and the locking discipline.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod block;
pub mod engine;
pub mod error;
pub mod fs;
pub mod global;
pub mod volume;

#[cfg(test)]
mod test_support;

pub use block::{
    find_partitions, BlockError, BlockIo, Geometry, PageCache, Partition, RamDisk, SectorIo, DEFAULT_SECTOR_SIZE,
};
pub use engine::{DeviceOps, Engine, EngineDevice, EngineMountFlags, EngineVolume, VolumeError};
pub use error::MountError;
pub use fs::{DevOps, DirHandle, FileHandle, FsError, OpenFlags, SeekFrom, Stat, StatVfs};
pub use volume::{
    AtimePolicy, DeviceRegistry, LockError, MountFlags, MountGuard, MountLock, MountOptions, MountPoint,
    Mounted, Volume, VolumeManager, VolumePolicy,
};
