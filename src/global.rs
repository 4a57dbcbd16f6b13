//! Process-wide mount manager
//!
//! Driver entry points that are called by the platform without any context
//! of their own reach the manager through here. Everything else should hold
//! a [`VolumeManager`] directly.

use crate::engine::Engine;
use crate::volume::VolumeManager;
use alloc::boxed::Box;
use conquer_once::spin::OnceCell;
use core::fmt;

static MANAGER: OnceCell<VolumeManager> = OnceCell::uninit();

/// A manager was installed earlier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyInstalled;

impl fmt::Display for AlreadyInstalled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "volume manager already installed")
    }
}

/// Install the process-wide manager around `engine`
///
/// Only the first call succeeds; later engines are dropped unused.
pub fn install(engine: Box<dyn Engine>) -> Result<&'static VolumeManager, AlreadyInstalled> {
    MANAGER
        .try_init_once(|| VolumeManager::new(engine))
        .map_err(|_| AlreadyInstalled)?;
    log::info!("volume manager installed");
    MANAGER.try_get().map_err(|_| AlreadyInstalled)
}

/// The process-wide manager, if installed
pub fn manager() -> Option<&'static VolumeManager> {
    MANAGER.try_get().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockIo, RamDisk};
    use crate::test_support::{format_volume, MemEngine};
    use crate::volume::MountOptions;
    use alloc::sync::Arc;

    #[test]
    fn test_install_once() {
        let engine = MemEngine::new();
        let installed = install(Box::new(engine.clone())).expect("first install");
        assert_eq!(install(Box::new(MemEngine::new())).err(), Some(AlreadyInstalled));

        let global = manager().expect("manager installed");
        assert!(core::ptr::eq(installed, global));

        let disk = Arc::new(RamDisk::new(256));
        format_volume(&disk, 0);
        let device: Arc<dyn BlockIo> = disk;
        global
            .mount("global0", device, 0, &MountOptions::default())
            .expect("mount through the global manager");
        assert!(global.is_mounted("global0"));
        global.unmount("global0", false).unwrap();
        assert_eq!(engine.live_volumes(), 0);
    }
}
