// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Volume Groups

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use devicemapper::Device;
use nix::sys::utsname::uname;
use time::now;

use crate::lv;
use crate::lv::{Segment, LV};
use crate::parser::{flags_from_textmap, status_from_textmap, Entry, LvmTextMap, TextMapOps};
use crate::pv;
use crate::pv::PV;
use crate::pvlabel::{PvHeader, SECTOR_SIZE};
use crate::util::{align_to, make_uuid};
use crate::{Error, Result};

const DEFAULT_EXTENT_SIZE: u64 = 8192; // 4MiB

/// A Volume Group allows multiple Physical Volumes to be treated as a
/// storage pool that can then be used to allocate Logical Volumes.
#[derive(Debug, PartialEq)]
pub struct VG {
    name: String,
    id: String,
    /// The generation of metadata this VG represents.
    seqno: u64,
    /// Always "lvm2".
    format: String,
    status: Vec<String>,
    flags: Vec<String>,
    /// Size of each extent, in 512-byte sectors.
    extent_size: u64,
    max_lv: u64,
    max_pv: u64,
    metadata_copies: u64,
    pvs: BTreeMap<Device, PV>,
    lvs: BTreeMap<String, LV>,
}

impl VG {
    /// Create a Volume Group from one or more PVs.
    pub fn create(name: &str, pv_paths: Vec<&Path>) -> Result<VG> {
        if pv_paths.is_empty() {
            return Err(Error::Metadata("one or more paths to PVs required".to_string()));
        }

        let pvhs: Vec<_> = pv_paths
            .iter()
            .map(|path| PvHeader::find_in_dev(path))
            .collect::<Result<_>>()?;

        let metadata_areas: usize = pvhs.iter().map(|x| x.metadata_areas.len()).sum();
        if metadata_areas == 0 {
            return Err(Error::Metadata(
                "PVs must have at least one metadata area".to_string(),
            ));
        }

        let mut vg = VG {
            name: name.to_string(),
            id: make_uuid(),
            seqno: 0,
            format: "lvm2".to_string(),
            status: vec![
                "READ".to_string(),
                "WRITE".to_string(),
                "RESIZEABLE".to_string(),
            ],
            flags: Vec::new(),
            extent_size: DEFAULT_EXTENT_SIZE,
            max_lv: 0,
            max_pv: 0,
            metadata_copies: 0,
            pvs: BTreeMap::new(),
            lvs: BTreeMap::new(),
        };

        for path in &pv_paths {
            vg.pv_add(path)?;
        }

        Ok(vg)
    }

    /// Construct a `VG` from its name and an `LvmTextMap`.
    pub fn from_textmap(name: &str, map: &LvmTextMap) -> Result<VG> {
        let err = || Error::Metadata("vg textmap parsing error".to_string());

        let id = map.string_from_textmap("id").ok_or_else(err)?;
        let seqno = map.i64_from_textmap("seqno").ok_or_else(err)?;
        let format = map.string_from_textmap("format").ok_or_else(err)?;
        let extent_size = map.i64_from_textmap("extent_size").ok_or_else(err)?;
        let max_lv = map.i64_from_textmap("max_lv").ok_or_else(err)?;
        let max_pv = map.i64_from_textmap("max_pv").ok_or_else(err)?;
        let metadata_copies = map.i64_from_textmap("metadata_copies").ok_or_else(err)?;

        let status = status_from_textmap(map).map_err(|_| err())?;
        let flags = flags_from_textmap(map).map_err(|_| err())?;

        // The textmap uses "pv0"-style names to link physical volume
        // definitions with LV segment stripes. We don't want to use these
        // internally (what if "pv0" is later removed from the VG?), so we
        // index PVs by Device once loaded, but let segment parsing use the
        // str-keyed map first to resolve "pv0" references to Devices.
        let str_to_pv = map
            .textmap_from_textmap("physical_volumes")
            .ok_or_else(err)
            .and_then(|tm| {
                let mut ret_map = BTreeMap::new();
                for (key, value) in tm {
                    match value {
                        Entry::TextMap(pv_dict) => {
                            ret_map.insert(key.to_string(), pv::from_textmap(pv_dict)?);
                        }
                        _ => return Err(Error::Metadata("expected PV textmap".to_string())),
                    };
                }
                Ok(ret_map)
            })?;

        let lvs = match map.textmap_from_textmap("logical_volumes") {
            Some(tm) => {
                let mut ret_map = BTreeMap::new();
                for (key, value) in tm {
                    match value {
                        Entry::TextMap(lv_dict) => {
                            ret_map.insert(
                                key.to_string(),
                                lv::from_textmap(key, name, lv_dict, &str_to_pv)?,
                            );
                        }
                        _ => return Err(Error::Metadata("expected LV textmap".to_string())),
                    }
                }
                ret_map
            }
            None => BTreeMap::new(),
        };

        let pvs = str_to_pv.into_iter().map(|(_, pv)| (pv.device, pv)).collect();

        Ok(VG {
            name: name.to_string(),
            id: id.to_string(),
            seqno: seqno as u64,
            format: format.to_string(),
            status,
            flags,
            extent_size: extent_size as u64,
            max_lv: max_lv as u64,
            max_pv: max_pv as u64,
            metadata_copies: metadata_copies as u64,
            pvs,
            lvs,
        })
    }

    /// Add a non-affiliated PV to this VG.
    pub fn pv_add(&mut self, path: &Path) -> Result<()> {
        let pvh = PvHeader::find_in_dev(path)?;

        let dev = Device::from_str(&path.to_string_lossy())
            .map_err(|_| Error::Metadata(format!("could not resolve device for {:?}", path)))?;

        if self.pvs.contains_key(&dev) {
            return Err(Error::Metadata("PV already in VG".to_string()));
        }

        if let Ok(metadata) = pvh.read_metadata() {
            let mut vg_name = Cow::Borrowed("<unknown>");
            for (key, value) in metadata {
                if let Entry::TextMap(_) = value {
                    vg_name = Cow::Owned(key);
                    break;
                }
            }
            return Err(Error::Metadata(format!("PV already in VG {}", vg_name)));
        }

        let da = pvh
            .data_areas
            .get(0)
            .ok_or_else(|| Error::Metadata("could not find data area in PV".to_string()))?;

        let dev_size_sectors = pvh.size / SECTOR_SIZE as u64;
        let pe_start_sectors = align_to(
            (da.offset / SECTOR_SIZE as u64) as usize,
            self.extent_size as usize,
        ) as u64;
        let mda1_size_sectors = match pvh.metadata_areas.get(1) {
            Some(area) => area.size / SECTOR_SIZE as u64,
            None => 0,
        };
        let area_size_sectors = dev_size_sectors - pe_start_sectors - mda1_size_sectors;
        let pe_count = area_size_sectors / self.extent_size;

        self.pvs.insert(
            dev,
            PV {
                id: pvh.uuid.clone(),
                device: dev,
                status: vec!["ALLOCATABLE".to_string()],
                flags: Vec::new(),
                dev_size: dev_size_sectors,
                pe_start: pe_start_sectors,
                pe_count,
            },
        );

        self.commit()
    }

    /// Remove a PV. It must be unused by any LVs.
    pub fn pv_remove(&mut self, pvh: &PvHeader) -> Result<()> {
        let dev = Device::from_str(&pvh.dev_path.to_string_lossy())
            .map_err(|_| Error::Metadata("could not resolve device".to_string()))?;

        for (lvname, lv) in &self.lvs {
            for seg in &lv.segments {
                if seg.pv_dependencies().contains(&dev) {
                    return Err(Error::Metadata(format!("PV in use by LV {}", lvname)));
                }
            }
        }

        self.pvs
            .remove(&dev)
            .ok_or_else(|| Error::Metadata("could not remove PV".to_string()))?;

        self.commit()
    }

    /// Create a new linear logical volume in the volume group. Does not
    /// touch the kernel; callers activate it afterwards via the
    /// `dm::manager` facade.
    pub fn lv_create_linear(&mut self, name: &str, extent_count: u64) -> Result<()> {
        if self.lvs.contains_key(name) {
            return Err(Error::Metadata("LV already exists".to_string()));
        }

        let (dev, area_start) = self
            .free_areas()
            .into_iter()
            .find_map(|(dev, areas)| {
                areas
                    .into_iter()
                    .find(|(_, len)| *len >= extent_count)
                    .map(|(start, _)| (dev, start))
            })
            .ok_or_else(|| Error::Metadata("no contiguous area for new LV".to_string()))?;

        let segment = Segment::Linear {
            start_extent: 0,
            extent_count,
            device: dev,
            pe: area_start,
        };

        let lv = LV {
            name: name.to_string(),
            id: make_uuid(),
            status: vec![
                "READ".to_string(),
                "WRITE".to_string(),
                "VISIBLE".to_string(),
            ],
            flags: Vec::new(),
            creation_host: uname().nodename().to_string(),
            creation_time: now().to_timespec().sec,
            segments: vec![segment],
            snapshot: None,
        };

        self.lvs.insert(name.to_string(), lv);

        self.commit()
    }

    /// Remove a logical volume's metadata entry. Does not touch the
    /// kernel; callers deactivate it first via the `dm::manager` facade.
    pub fn lv_remove(&mut self, name: &str) -> Result<()> {
        self.lvs
            .remove(name)
            .ok_or_else(|| Error::Metadata("LV not found in VG".to_string()))?;

        self.commit()
    }

    /// Is `name` the origin of some snapshot defined in this VG?
    pub fn lv_is_origin(&self, name: &str) -> bool {
        self.lvs
            .values()
            .any(|lv| lv.snapshot.as_ref().map(|s| s.origin.as_str()) == Some(name))
    }

    /// The total number of extents in use in the volume group.
    pub fn extents_in_use(&self) -> u64 {
        self.lvs.values().map(|x| x.used_extents()).sum()
    }

    /// The total number of free extents in the volume group.
    pub fn extents_free(&self) -> u64 {
        self.extents() - self.extents_in_use()
    }

    /// The total number of extents in the volume group.
    pub fn extents(&self) -> u64 {
        self.pvs.values().map(|x| x.pe_count).sum()
    }

    fn commit(&mut self) -> Result<()> {
        self.seqno += 1;

        let map: LvmTextMap = to_textmap(self);

        let mut disk_map = LvmTextMap::new();
        disk_map.insert(
            "contents".to_string(),
            Entry::String("Melvin Text Format Volume Group".to_string()),
        );
        disk_map.insert("version".to_string(), Entry::Number(1));
        disk_map.insert("description".to_string(), Entry::String(String::new()));
        disk_map.insert(
            "creation_host".to_string(),
            Entry::String(uname().nodename().to_string()),
        );
        disk_map.insert(
            "creation_time".to_string(),
            Entry::Number(now().to_timespec().sec),
        );
        disk_map.insert(self.name.clone(), Entry::TextMap(Box::new(map)));

        for pv in self.pvs.values() {
            if let Some(path) = pv.path() {
                let mut pvheader = PvHeader::find_in_dev(&path)?;
                pvheader.write_metadata(&disk_map)?;
            } else {
                log::warn!("could not resolve a /dev path for PV {}", pv.id);
            }
        }

        Ok(())
    }

    // Returns used areas in the format: {Device: {start: len} }
    //
    // e.g. with {<Device 3:1>: {0: 45, 47: 100, 147: 200} }
    // extents 0-44 (inclusive) are used, 45 and 46 are not, 47-146
    // are used, then 147-346 are used.
    //
    // Adjacent used areas are not merged.
    fn used_areas(&self) -> BTreeMap<Device, BTreeMap<u64, u64>> {
        let mut used_map = BTreeMap::new();

        for lv in self.lvs.values() {
            for (device, start, len) in lv::used_areas(lv) {
                used_map
                    .entry(device)
                    .or_insert_with(BTreeMap::new)
                    .insert(start, len);
            }
        }

        used_map
    }

    // Returns unused areas in the format: {Device: {start: len} }
    fn free_areas(&self) -> BTreeMap<Device, BTreeMap<u64, u64>> {
        let mut free_map = BTreeMap::new();

        for (dev, mut area_map) in self.used_areas() {
            let pv = self
                .pvs
                .get(&dev)
                .expect("area map name refers to nonexistent PV");
            area_map.insert(pv.pe_count, 0);

            area_map.iter().fold(0, |prev_end, (start, len)| {
                if prev_end < *start {
                    free_map
                        .entry(dev)
                        .or_insert_with(BTreeMap::new)
                        .insert(prev_end, start - prev_end);
                }
                start + len
            });
        }

        for (dev, pv) in &self.pvs {
            if !free_map.contains_key(dev) {
                let mut map = BTreeMap::new();
                map.insert(0, pv.pe_count);
                free_map.insert(*dev, map);
            }
        }

        free_map
    }

    pub fn pv_list(&self) -> Vec<Device> {
        self.pvs.keys().copied().collect()
    }

    pub fn pv_get(&self, dev: Device) -> Option<&PV> {
        self.pvs.get(&dev)
    }

    pub fn lv_list(&self) -> Vec<String> {
        self.lvs.keys().cloned().collect()
    }

    pub fn lv_get(&self, name: &str) -> Option<&LV> {
        self.lvs.get(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn extent_size(&self) -> u64 {
        self.extent_size
    }
}

fn to_textmap(vg: &VG) -> LvmTextMap {
    let mut map = LvmTextMap::new();

    map.insert("id".to_string(), Entry::String(vg.id.clone()));
    map.insert("seqno".to_string(), Entry::Number(vg.seqno as i64));
    map.insert("format".to_string(), Entry::String(vg.format.clone()));
    map.insert("max_pv".to_string(), Entry::Number(vg.max_pv as i64));
    map.insert("max_lv".to_string(), Entry::Number(vg.max_lv as i64));
    map.insert(
        "status".to_string(),
        Entry::List(vg.status.iter().map(|x| Entry::String(x.clone())).collect()),
    );
    map.insert(
        "flags".to_string(),
        Entry::List(vg.flags.iter().map(|x| Entry::String(x.clone())).collect()),
    );
    map.insert(
        "extent_size".to_string(),
        Entry::Number(vg.extent_size as i64),
    );
    map.insert(
        "metadata_copies".to_string(),
        Entry::Number(vg.metadata_copies as i64),
    );

    // Assign ordinals to the PV map so the textmap can use "pv0"-style
    // strings to link PVs with LV segment stripes (see from_textmap).
    let dev_to_idx: BTreeMap<Device, usize> = vg
        .pvs
        .values()
        .enumerate()
        .map(|(num, pv)| (pv.device, num))
        .collect();

    map.insert(
        "physical_volumes".to_string(),
        Entry::TextMap(Box::new(
            vg.pvs
                .iter()
                .map(|(k, v)| {
                    (
                        format!("pv{}", dev_to_idx.get(k).unwrap()),
                        Entry::TextMap(Box::new(pv::to_textmap(v))),
                    )
                })
                .collect(),
        )),
    );

    if !vg.lvs.is_empty() {
        map.insert(
            "logical_volumes".to_string(),
            Entry::TextMap(Box::new(
                vg.lvs
                    .iter()
                    .map(|(k, v)| (k.clone(), Entry::TextMap(Box::new(lv::to_textmap(v, &dev_to_idx)))))
                    .collect(),
            )),
        );
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_vg() -> VG {
        VG {
            name: "vg0".to_string(),
            id: "vg-uuid".to_string(),
            seqno: 0,
            format: "lvm2".to_string(),
            status: vec!["READ".to_string(), "WRITE".to_string()],
            flags: Vec::new(),
            extent_size: 8192,
            max_lv: 0,
            max_pv: 0,
            metadata_copies: 0,
            pvs: BTreeMap::new(),
            lvs: BTreeMap::new(),
        }
    }

    #[test]
    fn lv_is_origin_detects_snapshot_origin() {
        let mut vg = empty_vg();
        vg.lvs.insert(
            "orig".to_string(),
            LV {
                name: "orig".to_string(),
                id: "id1".to_string(),
                status: Vec::new(),
                flags: Vec::new(),
                creation_host: "h".to_string(),
                creation_time: 0,
                segments: Vec::new(),
                snapshot: None,
            },
        );
        assert!(!vg.lv_is_origin("orig"));

        vg.lvs.insert(
            "snap".to_string(),
            LV {
                name: "snap".to_string(),
                id: "id2".to_string(),
                status: Vec::new(),
                flags: Vec::new(),
                creation_host: "h".to_string(),
                creation_time: 0,
                segments: Vec::new(),
                snapshot: Some(lv::Snapshot {
                    origin: "orig".to_string(),
                    cow: "snap_cow".to_string(),
                    chunk_size: 16,
                }),
            },
        );
        assert!(vg.lv_is_origin("orig"));
        assert!(!vg.lv_is_origin("snap"));
    }

    #[test]
    fn extents_accounting() {
        let mut vg = empty_vg();
        vg.pvs.insert(
            Device::from(8u64),
            PV {
                id: "pv0".to_string(),
                device: Device::from(8u64),
                status: Vec::new(),
                flags: Vec::new(),
                dev_size: 0,
                pe_start: 0,
                pe_count: 100,
            },
        );
        assert_eq!(vg.extents(), 100);
        assert_eq!(vg.extents_in_use(), 0);
        assert_eq!(vg.extents_free(), 100);
    }
}
