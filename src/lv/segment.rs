// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Logical Volume segments: the pieces from which an LV's address space
//! is assembled, each mapped onto one or more Physical Volumes.

use devicemapper::Device;

use crate::parser::{Entry, LvmTextMap, TextMapOps};
use crate::{Error, Result};

/// A contiguous range of an LV's logical extents, mapped onto one or
/// more PVs (or onto nothing, for `Error`).
#[derive(Debug, PartialEq, Clone)]
pub enum Segment {
    /// Mapped onto a single PV.
    Linear {
        start_extent: u64,
        extent_count: u64,
        device: Device,
        pe: u64,
    },
    /// Mapped across multiple PVs in round-robin stripes.
    Striped {
        start_extent: u64,
        extent_count: u64,
        stripe_size: u64,
        /// (device, starting extent on that device) per stripe. A `None`
        /// device marks a stripe with no backing PV (emitted as the
        /// `error` target at table-build time).
        areas: Vec<(Option<Device>, u64)>,
    },
    /// Backed by nothing; reads/writes fail.
    Error {
        start_extent: u64,
        extent_count: u64,
    },
}

impl Segment {
    pub fn start_extent(&self) -> u64 {
        match self {
            Segment::Linear { start_extent, .. } => *start_extent,
            Segment::Striped { start_extent, .. } => *start_extent,
            Segment::Error { start_extent, .. } => *start_extent,
        }
    }

    pub fn extent_count(&self) -> u64 {
        match self {
            Segment::Linear { extent_count, .. } => *extent_count,
            Segment::Striped { extent_count, .. } => *extent_count,
            Segment::Error { extent_count, .. } => *extent_count,
        }
    }

    /// Every PV this segment depends on (empty for `Error`).
    pub fn pv_dependencies(&self) -> Vec<Device> {
        match self {
            Segment::Linear { device, .. } => vec![*device],
            Segment::Striped { areas, .. } => areas.iter().filter_map(|(d, _)| *d).collect(),
            Segment::Error { .. } => Vec::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Segment::Linear { .. } => "striped",
            Segment::Striped { .. } => "striped",
            Segment::Error { .. } => "error",
        }
    }
}

pub fn from_textmap(map: &LvmTextMap, str_to_pv: &std::collections::BTreeMap<String, crate::pv::PV>) -> Result<Segment> {
    let err = || Error::Metadata("segment textmap parsing error".to_string());

    let start_extent = map.i64_from_textmap("start_extent").ok_or_else(err)? as u64;
    let extent_count = map.i64_from_textmap("extent_count").ok_or_else(err)? as u64;
    let ty = map.string_from_textmap("type").ok_or_else(err)?;

    if ty == "error" {
        return Ok(Segment::Error {
            start_extent,
            extent_count,
        });
    }

    let stripe_list = map.list_from_textmap("stripes").ok_or_else(err)?;
    let stripe_count = map.i64_from_textmap("stripe_count").ok_or_else(err)? as usize;
    let stripe_size = map.i64_from_textmap("stripe_size").unwrap_or(0) as u64;

    let mut areas = Vec::new();
    for chunk in stripe_list.chunks(2) {
        let pv_ref = match &chunk[0] {
            Entry::String(x) => x.clone(),
            _ => return Err(err()),
        };
        let pe = match chunk[1] {
            Entry::Number(x) => x as u64,
            _ => return Err(err()),
        };
        let device = str_to_pv.get(&pv_ref).map(|pv| pv.device);
        areas.push((device, pe));
    }

    if stripe_count <= 1 {
        let (device, pe) = areas
            .into_iter()
            .next()
            .ok_or_else(err)?;
        match device {
            Some(device) => Ok(Segment::Linear {
                start_extent,
                extent_count,
                device,
                pe,
            }),
            None => Ok(Segment::Error {
                start_extent,
                extent_count,
            }),
        }
    } else {
        Ok(Segment::Striped {
            start_extent,
            extent_count,
            stripe_size,
            areas,
        })
    }
}

pub fn to_textmap(
    seg: &Segment,
    dev_to_idx: &std::collections::BTreeMap<Device, usize>,
) -> LvmTextMap {
    let mut map = LvmTextMap::new();

    map.insert(
        "start_extent".to_string(),
        Entry::Number(seg.start_extent() as i64),
    );
    map.insert(
        "extent_count".to_string(),
        Entry::Number(seg.extent_count() as i64),
    );
    map.insert(
        "type".to_string(),
        Entry::String(seg.type_name().to_string()),
    );

    let areas: Vec<(Option<Device>, u64)> = match seg {
        Segment::Linear { device, pe, .. } => vec![(Some(*device), *pe)],
        Segment::Striped { areas, .. } => areas.clone(),
        Segment::Error { .. } => Vec::new(),
    };

    if let Segment::Striped { stripe_size, .. } = seg {
        map.insert("stripe_size".to_string(), Entry::Number(*stripe_size as i64));
    }

    map.insert("stripe_count".to_string(), Entry::Number(areas.len() as i64));

    let mut stripes = Vec::new();
    for (device, pe) in &areas {
        let pv_ref = match device {
            Some(d) => format!("pv{}", dev_to_idx.get(d).copied().unwrap_or(0)),
            None => "missing".to_string(),
        };
        stripes.push(Entry::String(pv_ref));
        stripes.push(Entry::Number(*pe as i64));
    }
    map.insert("stripes".to_string(), Entry::List(stripes));

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn linear_round_trips() {
        let dev = Device::from(0x0800u64);
        let seg = Segment::Linear {
            start_extent: 0,
            extent_count: 100,
            device: dev,
            pe: 5,
        };
        let mut dev_to_idx = BTreeMap::new();
        dev_to_idx.insert(dev, 0);
        let map = to_textmap(&seg, &dev_to_idx);
        assert_eq!(map.i64_from_textmap("extent_count"), Some(100));
        assert_eq!(seg.pv_dependencies(), vec![dev]);
    }

    #[test]
    fn error_segment_has_no_dependencies() {
        let seg = Segment::Error {
            start_extent: 0,
            extent_count: 10,
        };
        assert!(seg.pv_dependencies().is_empty());
        assert_eq!(seg.type_name(), "error");
    }
}
