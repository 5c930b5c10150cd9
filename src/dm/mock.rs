// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An in-memory `Mapper` that records every call it receives, for use
//! in tests that exercise the planner without a kernel underneath it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::dm::mapper::{default_dm_dir, DeviceInfo, Mapper, Target};
use crate::Result;

#[derive(Debug, Clone)]
struct Device {
    targets: Vec<Target>,
    suspended: bool,
}

pub struct MockMapper {
    dm_dir: PathBuf,
    devices: BTreeMap<String, Device>,
    calls: Vec<String>,
}

impl MockMapper {
    pub fn new() -> MockMapper {
        MockMapper {
            dm_dir: default_dm_dir(),
            devices: BTreeMap::new(),
            calls: Vec::new(),
        }
    }

    /// Every call made so far, in order, as `"<op> <name>"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.clone()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// The table currently loaded for `name`, if the device exists.
    pub fn table(&self, name: &str) -> Option<&[Target]> {
        self.devices.get(name).map(|d| d.targets.as_slice())
    }
}

impl Default for MockMapper {
    fn default() -> MockMapper {
        MockMapper::new()
    }
}

impl Mapper for MockMapper {
    fn dm_dir(&self) -> &Path {
        &self.dm_dir
    }

    fn info(&self, name: &str) -> Result<Option<DeviceInfo>> {
        Ok(self.devices.get(name).map(|d| DeviceInfo {
            exists: true,
            suspended: d.suspended,
            major: 253,
            minor: 0,
            open_count: 0,
        }))
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self.devices.keys().cloned().collect())
    }

    fn create(&mut self, name: &str, _targets: &[Target]) -> Result<()> {
        self.calls.push(format!("create {}", name));
        self.devices.entry(name.to_string()).or_insert(Device {
            targets: Vec::new(),
            suspended: false,
        });
        Ok(())
    }

    fn reload(&mut self, name: &str, targets: &[Target]) -> Result<()> {
        self.calls.push(format!("reload {}", name));
        let device = self
            .devices
            .get_mut(name)
            .ok_or_else(|| crate::Error::MissingDependency(name.to_string()))?;
        device.targets = targets.to_vec();
        Ok(())
    }

    fn suspend(&mut self, name: &str) -> Result<()> {
        self.calls.push(format!("suspend {}", name));
        let device = self
            .devices
            .get_mut(name)
            .ok_or_else(|| crate::Error::MissingDependency(name.to_string()))?;
        device.suspended = true;
        Ok(())
    }

    fn resume(&mut self, name: &str) -> Result<()> {
        self.calls.push(format!("resume {}", name));
        let device = self
            .devices
            .get_mut(name)
            .ok_or_else(|| crate::Error::MissingDependency(name.to_string()))?;
        device.suspended = false;
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        self.calls.push(format!("remove {}", name));
        self.devices.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_info_reflects_existence() {
        let mut mapper = MockMapper::new();
        assert!(mapper.info("vg0-lvol0").unwrap().is_none());
        mapper.create("vg0-lvol0", &[]).unwrap();
        assert!(mapper.info("vg0-lvol0").unwrap().unwrap().exists);
    }

    #[test]
    fn remove_clears_device() {
        let mut mapper = MockMapper::new();
        mapper.create("vg0-lvol0", &[]).unwrap();
        mapper.remove("vg0-lvol0").unwrap();
        assert!(mapper.info("vg0-lvol0").unwrap().is_none());
    }

    #[test]
    fn suspend_and_resume_toggle_state() {
        let mut mapper = MockMapper::new();
        mapper.create("vg0-lvol0", &[]).unwrap();
        mapper.suspend("vg0-lvol0").unwrap();
        assert!(mapper.info("vg0-lvol0").unwrap().unwrap().suspended);
        mapper.resume("vg0-lvol0").unwrap();
        assert!(!mapper.info("vg0-lvol0").unwrap().unwrap().suspended);
    }
}
