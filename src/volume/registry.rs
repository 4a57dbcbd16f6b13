//! Device Registry
//!
//! Name to volume table used for dispatch and duplicate-mount detection.
//! Names are case-sensitive and unique. Only fully initialized volumes are
//! ever inserted.

use super::Volume;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// A volume is already registered under the name
    AlreadyPresent,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyPresent => write!(f, "device name already registered"),
        }
    }
}

/// Registered volumes, keyed by device name
pub struct DeviceRegistry {
    devices: Mutex<BTreeMap<String, Arc<Volume>>>,
}

impl DeviceRegistry {
    pub const fn new() -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Volume>> {
        self.devices.lock().get(name).cloned()
    }

    /// Register `volume` under its own name
    pub fn insert(&self, volume: Arc<Volume>) -> Result<(), RegistryError> {
        let mut devices = self.devices.lock();
        if devices.contains_key(volume.name()) {
            return Err(RegistryError::AlreadyPresent);
        }
        devices.insert(String::from(volume.name()), volume);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Volume>> {
        self.devices.lock().remove(name)
    }

    /// First registered volume matching `pred`
    pub fn find(&self, pred: impl Fn(&Volume) -> bool) -> Option<Arc<Volume>> {
        self.devices.lock().values().find(|v| pred(v)).cloned()
    }

    /// Remove every entry
    pub(crate) fn drain(&self) -> Vec<Arc<Volume>> {
        let devices = core::mem::take(&mut *self.devices.lock());
        devices.into_values().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{MountOptions, VolumePolicy};

    fn volume(name: &str, id: u64) -> Arc<Volume> {
        Arc::new(Volume::new(name, id, VolumePolicy::from(&MountOptions::default())).unwrap())
    }

    #[test]
    fn test_insert_lookup_remove() {
        let registry = DeviceRegistry::new();
        assert!(registry.lookup("ntfs0").is_none());

        registry.insert(volume("ntfs0", 1)).unwrap();
        assert_eq!(registry.lookup("ntfs0").map(|v| v.id()), Some(1));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove("ntfs0").expect("entry present");
        assert_eq!(removed.id(), 1);
        assert!(registry.lookup("ntfs0").is_none());
        assert!(registry.remove("ntfs0").is_none(), "Second remove finds nothing");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let registry = DeviceRegistry::new();
        registry.insert(volume("vol0", 1)).unwrap();
        assert_eq!(registry.insert(volume("vol0", 2)), Err(RegistryError::AlreadyPresent));
        assert_eq!(registry.lookup("vol0").map(|v| v.id()), Some(1), "Original entry must survive");
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let registry = DeviceRegistry::new();
        registry.insert(volume("vol0", 1)).unwrap();
        registry.insert(volume("VOL0", 2)).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains("Vol0"));
    }

    #[test]
    fn test_find_by_predicate() {
        let registry = DeviceRegistry::new();
        registry.insert(volume("a", 1)).unwrap();
        registry.insert(volume("b", 2)).unwrap();

        assert_eq!(registry.find(|v| v.id() == 2).map(|v| v.id()), Some(2));
        assert!(registry.find(|v| v.id() == 3).is_none());
    }
}
