// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Physical Volumes

use std::fs;
use std::path::PathBuf;

use devicemapper::Device;

use crate::parser::{flags_from_textmap, status_from_textmap, Entry, LvmTextMap, TextMapOps};
use crate::{Error, Result};

/// A Physical Volume: a block device contributing extents to a Volume Group.
#[derive(Debug, PartialEq, Clone)]
pub struct PV {
    /// Uuid.
    pub id: String,
    /// Major/minor of the underlying block device.
    pub device: Device,
    /// Status strings ("ALLOCATABLE", etc).
    pub status: Vec<String>,
    /// Flags.
    pub flags: Vec<String>,
    /// Size of the device, in 512-byte sectors.
    pub dev_size: u64,
    /// Sector at which the first extent begins.
    pub pe_start: u64,
    /// Number of extents available on this PV.
    pub pe_count: u64,
}

impl PV {
    /// Best-effort lookup of a `/dev` path for this PV's major:minor,
    /// via the `/sys/dev/block` symlink the kernel maintains for every
    /// block device.
    pub fn path(&self) -> Option<PathBuf> {
        let sys_path = format!(
            "/sys/dev/block/{}:{}",
            self.device.major, self.device.minor
        );
        let target = fs::read_link(&sys_path).ok()?;
        let name = target.file_name()?;
        Some(PathBuf::from("/dev").join(name))
    }
}

pub fn from_textmap(map: &LvmTextMap) -> Result<PV> {
    let err = || Error::Metadata("pv textmap parsing error".to_string());

    let id = map.string_from_textmap("id").ok_or_else(err)?.to_string();
    let device = device_from_textmap(map)?;
    let dev_size = map.i64_from_textmap("dev_size").ok_or_else(err)? as u64;
    let pe_start = map.i64_from_textmap("pe_start").ok_or_else(err)? as u64;
    let pe_count = map.i64_from_textmap("pe_count").ok_or_else(err)? as u64;
    let status = status_from_textmap(map).map_err(|_| err())?;
    let flags = flags_from_textmap(map).map_err(|_| err())?;

    Ok(PV {
        id,
        device,
        status,
        flags,
        dev_size,
        pe_start,
        pe_count,
    })
}

fn device_from_textmap(map: &LvmTextMap) -> Result<Device> {
    let err = || Error::Metadata("pv device field missing or malformed".to_string());
    match map.get("device") {
        Some(Entry::Number(x)) => Ok(Device::from(*x as u64)),
        Some(Entry::String(x)) => x
            .parse::<u64>()
            .map(Device::from)
            .map_err(|_| err()),
        _ => Err(err()),
    }
}

pub fn to_textmap(pv: &PV) -> LvmTextMap {
    let mut map = LvmTextMap::new();

    map.insert("id".to_string(), Entry::String(pv.id.clone()));
    map.insert(
        "device".to_string(),
        Entry::Number(u64::from(pv.device) as i64),
    );
    map.insert(
        "status".to_string(),
        Entry::List(pv.status.iter().map(|x| Entry::String(x.clone())).collect()),
    );
    map.insert(
        "flags".to_string(),
        Entry::List(pv.flags.iter().map(|x| Entry::String(x.clone())).collect()),
    );
    map.insert("dev_size".to_string(), Entry::Number(pv.dev_size as i64));
    map.insert("pe_start".to_string(), Entry::Number(pv.pe_start as i64));
    map.insert("pe_count".to_string(), Entry::Number(pv.pe_count as i64));

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pv() -> PV {
        PV {
            id: "pv-uuid".to_string(),
            device: Device::from(0x0800u64),
            status: vec!["ALLOCATABLE".to_string()],
            flags: Vec::new(),
            dev_size: 2_097_152,
            pe_start: 384,
            pe_count: 255,
        }
    }

    #[test]
    fn round_trips_through_textmap() {
        let pv = sample_pv();
        let map = to_textmap(&pv);
        let pv2 = from_textmap(&map).unwrap();
        assert_eq!(pv, pv2);
    }
}
