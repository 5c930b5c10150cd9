// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The real `Mapper`: a thin adapter over the `devicemapper` crate's
//! ioctl-backed `DM` handle.

use std::path::{Path, PathBuf};

use devicemapper::{DevId, DmFlags, DmName, DmOptions, DM};

use crate::dm::mapper::{default_dm_dir, DeviceInfo, Mapper, Target};
use crate::{Error, Result};

pub struct DmMapper {
    dm: DM,
    dm_dir: PathBuf,
}

impl DmMapper {
    pub fn new() -> Result<DmMapper> {
        Ok(DmMapper {
            dm: DM::new()?,
            dm_dir: default_dm_dir(),
        })
    }

    fn dm_name<'a>(name: &'a str) -> Result<&'a DmName> {
        DmName::new(name).map_err(|_| Error::Metadata(format!("invalid device name {}", name)))
    }

    fn table_rows(targets: &[Target]) -> Vec<(u64, u64, String, String)> {
        targets
            .iter()
            .map(|t| (t.start_sectors, t.length_sectors, t.ty.clone(), t.params.clone()))
            .collect()
    }
}

impl Mapper for DmMapper {
    fn dm_dir(&self) -> &Path {
        &self.dm_dir
    }

    fn info(&self, name: &str) -> Result<Option<DeviceInfo>> {
        let name = Self::dm_name(name)?;
        match self.dm.device_info(&DevId::Name(name)) {
            Ok(info) => Ok(Some(DeviceInfo {
                exists: true,
                suspended: info.flags().contains(DmFlags::DM_SUSPEND),
                major: info.device().major,
                minor: info.device().minor,
                open_count: info.open_count() as u32,
            })),
            Err(_) => Ok(None),
        }
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self
            .dm
            .list_devices()?
            .into_iter()
            .map(|(name, _, _)| name.to_string())
            .collect())
    }

    fn create(&mut self, name: &str, _targets: &[Target]) -> Result<()> {
        let name = Self::dm_name(name)?;
        self.dm.device_create(name, None, &DmOptions::new())?;
        Ok(())
    }

    fn reload(&mut self, name: &str, targets: &[Target]) -> Result<()> {
        let name = Self::dm_name(name)?;
        self.dm
            .table_load(&DevId::Name(name), &Self::table_rows(targets), &DmOptions::new())?;
        Ok(())
    }

    fn suspend(&mut self, name: &str) -> Result<()> {
        let name = Self::dm_name(name)?;
        self.dm.device_suspend(
            &DevId::Name(name),
            &DmOptions::new().set_flags(DmFlags::DM_SUSPEND),
        )?;
        Ok(())
    }

    fn resume(&mut self, name: &str) -> Result<()> {
        let name = Self::dm_name(name)?;
        self.dm.device_suspend(&DevId::Name(name), &DmOptions::new())?;
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let name = Self::dm_name(name)?;
        self.dm.device_remove(&DevId::Name(name), &DmOptions::new())?;
        Ok(())
    }
}
