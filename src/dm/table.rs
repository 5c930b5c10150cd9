// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Translates an LV's segments, or a snapshot/origin relationship, into
//! device-mapper target rows.

use crate::dm::layer::{Layer, Populate};
use crate::dm::mapper::Target;
use crate::dm::name;
use crate::lv::{Segment, LV};
use crate::pv::PV;
use crate::vg::VG;
use crate::{Error, Result};

use std::collections::BTreeMap;
use std::path::Path;

/// A device node has no parameter-string size limit here: we build
/// growable `String`s rather than the kernel's fixed on-wire buffers.
/// `DM_NAME_LEN`-class pathologically long device names are still
/// rejected defensively.
const MAX_PARAMS_LEN: usize = 4096;

fn devname(dm_dir: &std::path::Path, name: &str) -> String {
    dm_dir.join(name).to_string_lossy().into_owned()
}

fn pv_devnode(pv: &PV) -> String {
    pv.path()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/dev/ioerror".to_string())
}

fn check_len(name: &str, params: &str) -> Result<()> {
    if params.len() > MAX_PARAMS_LEN {
        return Err(Error::OutOfSpace(name.to_string()));
    }
    Ok(())
}

/// Build the target list for a vanilla (non-snapshot, non-origin) LV, or
/// for the hidden `-real`/`-cow` layers that back an origin or snapshot.
pub fn emit_segments(
    layer_name: &str,
    lv: &LV,
    vg: &VG,
) -> Result<Vec<Target>> {
    let pvs: BTreeMap<_, _> = vg.pv_list().into_iter().map(|d| (d, vg.pv_get(d).unwrap())).collect();
    let extent_size = vg.extent_size();
    let mut targets = Vec::new();

    for seg in &lv.segments {
        let start = extent_size * seg.start_extent();
        let length = extent_size * seg.extent_count();

        let target = match seg {
            Segment::Error { .. } => Target::new(start, length, "error", String::new()),
            Segment::Linear { device, pe, .. } => {
                let pv = pvs
                    .get(device)
                    .ok_or_else(|| Error::MissingDependency(layer_name.to_string()))?;
                let params = format!("{} {}", pv_devnode(pv), pv.pe_start + extent_size * pe);
                check_len(layer_name, &params)?;
                Target::new(start, length, "linear", params)
            }
            Segment::Striped {
                stripe_size, areas, ..
            } => {
                let mut parts = vec![areas.len().to_string(), stripe_size.to_string()];
                for (device, pe) in areas {
                    match device.and_then(|d| pvs.get(&d)) {
                        Some(pv) => {
                            parts.push(pv_devnode(pv));
                            parts.push((pv.pe_start + extent_size * pe).to_string());
                        }
                        None => {
                            parts.push("/dev/ioerror".to_string());
                            parts.push("0".to_string());
                        }
                    }
                }
                let params = parts.join(" ");
                check_len(layer_name, &params)?;
                Target::new(start, length, "striped", params)
            }
        };
        targets.push(target);
    }

    Ok(targets)
}

/// The single `snapshot-origin` target for an origin LV's visible top
/// layer, referencing its hidden `-real` layer.
pub fn emit_origin(dm_dir: &std::path::Path, lv: &LV, real_layer: &str, size_sectors: u64) -> Result<Vec<Target>> {
    let params = devname(dm_dir, real_layer);
    check_len(&lv.name, &params)?;
    Ok(vec![Target::new(0, size_sectors, "snapshot-origin", params)])
}

/// The single `snapshot` target for a snapshot LV's visible top layer,
/// referencing its origin's `-real` layer and its own `-cow` layer.
pub fn emit_snapshot(
    dm_dir: &std::path::Path,
    lv_name: &str,
    real_layer: &str,
    cow_layer: &str,
    chunk_size: u64,
    size_sectors: u64,
) -> Result<Vec<Target>> {
    let params = format!(
        "{} {} P {} 128",
        devname(dm_dir, real_layer),
        devname(dm_dir, cow_layer),
        chunk_size
    );
    check_len(lv_name, &params)?;
    Ok(vec![Target::new(0, size_sectors, "snapshot", params)])
}

pub fn size_sectors(lv: &LV, extent_size: u64) -> u64 {
    lv.used_extents() * extent_size
}

pub fn layer_name_for(vg: &str, lv: &str, layer: Option<&str>) -> String {
    name::encode(vg, lv, layer)
}

/// Build the table a layer's device should have, dispatching on how it
/// is populated.
pub fn targets_for(dm_dir: &Path, layer: &Layer, vg: &VG) -> Result<Vec<Target>> {
    match &layer.populate {
        Populate::Vanilla { source_lv } => {
            let lv = vg
                .lv_get(source_lv)
                .ok_or_else(|| Error::MissingDependency(layer.name.clone()))?;
            emit_segments(&layer.name, lv, vg)
        }
        Populate::Origin { real_layer } => {
            let lv_name = layer
                .lv_name
                .as_ref()
                .ok_or_else(|| Error::MissingDependency(layer.name.clone()))?;
            let lv = vg
                .lv_get(lv_name)
                .ok_or_else(|| Error::MissingDependency(layer.name.clone()))?;
            let size = size_sectors(lv, vg.extent_size());
            emit_origin(dm_dir, lv, real_layer, size)
        }
        Populate::Snapshot {
            real_layer,
            cow_layer,
            chunk_size,
        } => {
            let lv_name = layer
                .lv_name
                .as_ref()
                .ok_or_else(|| Error::MissingDependency(layer.name.clone()))?;
            let lv = vg
                .lv_get(lv_name)
                .ok_or_else(|| Error::MissingDependency(layer.name.clone()))?;
            let origin = vg
                .lv_get(&{
                    lv.snapshot
                        .as_ref()
                        .ok_or_else(|| Error::MissingDependency(layer.name.clone()))?
                        .origin
                        .clone()
                })
                .ok_or_else(|| Error::MissingDependency(layer.name.clone()))?;
            let size = size_sectors(origin, vg.extent_size());
            emit_snapshot(dm_dir, &layer.name, real_layer, cow_layer, *chunk_size, size)
        }
        Populate::Unclassified => Err(Error::MissingDependency(layer.name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::buf_to_textmap;

    // Mirrors the S1 scenario from the activation planner's test suite:
    // one linear segment on a single PV.
    fn vanilla_vg_textmap() -> VG {
        let buf = br#"
vg0 {
    id = "vg0-uuid"
    seqno = 1
    format = "lvm2"
    status = ["READ", "WRITE"]
    flags = []
    extent_size = 8192
    max_lv = 0
    max_pv = 0
    metadata_copies = 0
    physical_volumes {
        pv0 {
            id = "pv0-uuid"
            device = 2048
            status = ["ALLOCATABLE"]
            flags = []
            dev_size = 2097152
            pe_start = 384
            pe_count = 255
        }
    }
    logical_volumes {
        lvol0 {
            id = "lvol0-uuid"
            status = ["READ", "WRITE", "VISIBLE"]
            flags = []
            creation_host = "host"
            creation_time = 0
            segment_count = 1
            segment1 {
                start_extent = 0
                extent_count = 100
                type = "striped"
                stripe_count = 1
                stripe_size = 0
                stripes = ["pv0", 0]
            }
        }
    }
}
"#;
        let map = buf_to_textmap(buf).unwrap();
        let vg_map = map.get("vg0").unwrap();
        let inner = match vg_map {
            crate::parser::Entry::TextMap(m) => m,
            _ => panic!("expected textmap"),
        };
        VG::from_textmap("vg0", inner).unwrap()
    }

    #[test]
    fn layer_name_matches_codec() {
        assert_eq!(layer_name_for("vg0", "lvol0", None), "vg0-lvol0");
        assert_eq!(layer_name_for("vg0", "snap", Some("cow")), "vg0-snap-cow");
    }

    #[test]
    fn emits_linear_target_for_single_stripe_segment() {
        let vg = vanilla_vg_textmap();
        let lv = vg.lv_get("lvol0").unwrap();
        let targets = emit_segments("vg0-lvol0", lv, &vg).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].start_sectors, 0);
        assert_eq!(targets[0].length_sectors, 8192 * 100);
        assert_eq!(targets[0].ty, "linear");
        assert!(targets[0].params.ends_with("384"));
    }
}
