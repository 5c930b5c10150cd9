// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Logical Volumes

pub mod segment;

use std::collections::BTreeMap;

use devicemapper::Device;

use crate::parser::{flags_from_textmap, status_from_textmap, Entry, LvmTextMap, TextMapOps};
use crate::pv::PV;
use crate::{Error, Result};

pub use segment::Segment;

/// A Logical Volume within a Volume Group.
#[derive(Debug, PartialEq, Clone)]
pub struct LV {
    pub name: String,
    pub id: String,
    pub status: Vec<String>,
    pub flags: Vec<String>,
    pub creation_host: String,
    pub creation_time: i64,
    pub segments: Vec<Segment>,
    /// Present if this LV is a snapshot of another LV.
    pub snapshot: Option<Snapshot>,
}

/// Links a snapshot LV back to the origin it tracks and the LV backing
/// its copy-on-write store.
#[derive(Debug, PartialEq, Clone)]
pub struct Snapshot {
    pub origin: String,
    pub cow: String,
    pub chunk_size: u64,
}

impl LV {
    pub fn used_extents(&self) -> u64 {
        self.segments.iter().map(|s| s.extent_count()).sum()
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// Every (device, start_extent, extent_count) triple this LV occupies.
pub fn used_areas(lv: &LV) -> Vec<(Device, u64, u64)> {
    let mut v = Vec::new();
    for seg in &lv.segments {
        match seg {
            Segment::Linear {
                device,
                pe,
                extent_count,
                ..
            } => v.push((*device, *pe, *extent_count)),
            Segment::Striped { areas, .. } => {
                let per_stripe = seg.extent_count() / areas.len().max(1) as u64;
                for (device, pe) in areas {
                    if let Some(device) = device {
                        v.push((*device, *pe, per_stripe));
                    }
                }
            }
            Segment::Error { .. } => {}
        }
    }
    v
}

/// `find_cow` per the snapshot interface: a snapshot LV carries its own
/// `Snapshot` descriptor directly.
pub fn find_cow(lv: &LV) -> Option<&Snapshot> {
    lv.snapshot.as_ref()
}

pub fn from_textmap(
    name: &str,
    _vg_name: &str,
    map: &LvmTextMap,
    str_to_pv: &BTreeMap<String, PV>,
) -> Result<LV> {
    let err = || Error::Metadata(format!("lv textmap parsing error in {}", name));

    let id = map.string_from_textmap("id").ok_or_else(err)?.to_string();
    let creation_host = map
        .string_from_textmap("creation_host")
        .unwrap_or("unknown")
        .to_string();
    let creation_time = map.i64_from_textmap("creation_time").unwrap_or(0);
    let status = status_from_textmap(map).map_err(|_| err())?;
    let flags = flags_from_textmap(map).map_err(|_| err())?;

    let snapshot = match map.textmap_from_textmap("snapshot") {
        Some(snap_map) => Some(Snapshot {
            origin: snap_map
                .string_from_textmap("origin")
                .ok_or_else(err)?
                .to_string(),
            cow: snap_map
                .string_from_textmap("cow_store")
                .ok_or_else(err)?
                .to_string(),
            chunk_size: snap_map.i64_from_textmap("chunk_size").ok_or_else(err)? as u64,
        }),
        None => None,
    };

    let segment_count = map.i64_from_textmap("segment_count").unwrap_or(0) as u64;
    let mut segments = Vec::new();
    for i in 0..segment_count {
        let seg_name = format!("segment{}", i + 1);
        let seg_map = map.textmap_from_textmap(&seg_name).ok_or_else(err)?;
        segments.push(segment::from_textmap(seg_map, str_to_pv)?);
    }

    Ok(LV {
        name: name.to_string(),
        id,
        status,
        flags,
        creation_host,
        creation_time,
        segments,
        snapshot,
    })
}

pub fn to_textmap(lv: &LV, dev_to_idx: &BTreeMap<Device, usize>) -> LvmTextMap {
    let mut map = LvmTextMap::new();

    map.insert("id".to_string(), Entry::String(lv.id.clone()));
    map.insert(
        "status".to_string(),
        Entry::List(lv.status.iter().map(|x| Entry::String(x.clone())).collect()),
    );
    map.insert(
        "flags".to_string(),
        Entry::List(lv.flags.iter().map(|x| Entry::String(x.clone())).collect()),
    );
    map.insert(
        "creation_host".to_string(),
        Entry::String(lv.creation_host.clone()),
    );
    map.insert(
        "creation_time".to_string(),
        Entry::Number(lv.creation_time),
    );

    if let Some(snap) = &lv.snapshot {
        let mut snap_map = LvmTextMap::new();
        snap_map.insert("origin".to_string(), Entry::String(snap.origin.clone()));
        snap_map.insert("cow_store".to_string(), Entry::String(snap.cow.clone()));
        snap_map.insert(
            "chunk_size".to_string(),
            Entry::Number(snap.chunk_size as i64),
        );
        map.insert("snapshot".to_string(), Entry::TextMap(Box::new(snap_map)));
    }

    map.insert(
        "segment_count".to_string(),
        Entry::Number(lv.segments.len() as i64),
    );
    for (i, seg) in lv.segments.iter().enumerate() {
        map.insert(
            format!("segment{}", i + 1),
            Entry::TextMap(Box::new(segment::to_textmap(seg, dev_to_idx))),
        );
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_extents_sums_segments() {
        let lv = LV {
            name: "lvol0".to_string(),
            id: "id".to_string(),
            status: Vec::new(),
            flags: Vec::new(),
            creation_host: "host".to_string(),
            creation_time: 0,
            segments: vec![
                Segment::Linear {
                    start_extent: 0,
                    extent_count: 10,
                    device: Device::from(8u64),
                    pe: 0,
                },
                Segment::Error {
                    start_extent: 10,
                    extent_count: 5,
                },
            ],
            snapshot: None,
        };
        assert_eq!(lv.used_extents(), 15);
        assert!(!lv.is_snapshot());
    }

    #[test]
    fn find_cow_reads_snapshot_field() {
        let mut lv = LV {
            name: "snap".to_string(),
            id: "id".to_string(),
            status: Vec::new(),
            flags: Vec::new(),
            creation_host: "host".to_string(),
            creation_time: 0,
            segments: Vec::new(),
            snapshot: None,
        };
        assert!(find_cow(&lv).is_none());
        lv.snapshot = Some(Snapshot {
            origin: "orig".to_string(),
            cow: "snap_cow".to_string(),
            chunk_size: 16,
        });
        assert_eq!(find_cow(&lv).unwrap().origin, "orig");
    }
}
