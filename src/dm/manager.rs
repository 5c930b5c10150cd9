// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `DevManager` is the activation planner's public face: given a `VG`
//! and a target LV name, it figures out the ideal layer graph, folds
//! in what the mapper already has, and drives the mapper through
//! whatever creates/reloads/removes are needed.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{info, warn};

use crate::dm::layer::Layer;
use crate::dm::mapper::{Mapper, Target};
use crate::dm::{exec, fs, graph, name, reconcile, table};
use crate::vg::VG;
use crate::Result;

pub struct DevManager<M: Mapper> {
    vg_name: String,
    mapper: M,
    layers: BTreeMap<String, Layer>,
    active_list: HashSet<String>,
    /// The table last successfully loaded for each layer, used to tell
    /// a dirty layer (table changed, needs reloading) from one that's
    /// merely caught up in a dependency's suspend/resume.
    synced_targets: HashMap<String, Vec<Target>>,
}

impl<M: Mapper> DevManager<M> {
    pub fn new(vg_name: &str, mapper: M) -> DevManager<M> {
        DevManager {
            vg_name: vg_name.to_string(),
            mapper,
            layers: BTreeMap::new(),
            active_list: HashSet::new(),
            synced_targets: HashMap::new(),
        }
    }

    /// The layer realizing `lv_name`'s visible top device, if this
    /// manager has computed one.
    pub fn info(&self, lv_name: &str) -> Option<&Layer> {
        self.layers.get(&name::encode(&self.vg_name, lv_name, None))
    }

    pub fn is_active(&self, lv_name: &str) -> bool {
        self.active_list.contains(lv_name)
    }

    /// Activate `lv_name`: compute the ideal layer graph for the
    /// current active set (including `lv_name`), reconcile it against
    /// the mapper's existing devices, and create/reload every layer
    /// the activation target depends on, bottom-up. Publishes
    /// `/dev/<vg>/<lv>` on success.
    pub fn activate(&mut self, vg: &VG, lv_name: &str) -> Result<()> {
        self.active_list.insert(lv_name.to_string());

        let mut index = BTreeMap::new();
        graph::expand_all(vg, &self.active_list, &mut index)?;
        reconcile::scan_existing(&self.mapper, &self.vg_name, &mut index)?;

        let root = name::encode(&self.vg_name, lv_name, None);
        let order = exec::topo_order(&index, &[root.clone()])?;

        let dm_dir = self.mapper.dm_dir().to_path_buf();
        exec::sync_ordered(&mut self.mapper, &order, &mut index, &mut self.synced_targets, |layer| {
            table::targets_for(&dm_dir, layer, vg)
        })?;

        if let Err(e) = fs::fs_add_lv(self.mapper.dm_dir(), &self.vg_name, lv_name) {
            warn!("could not publish /dev entry for {}: {}", lv_name, e);
        }

        info!("activated {}/{} ({} layers)", self.vg_name, lv_name, order.len());
        self.layers = index;
        Ok(())
    }

    /// Deactivate `lv_name`: retract its `/dev` entry, then tear down
    /// every layer that was reachable from it and is not needed by any
    /// LV still in the active set, dependents before dependencies.
    pub fn deactivate(&mut self, vg: &VG, lv_name: &str) -> Result<()> {
        let root = name::encode(&self.vg_name, lv_name, None);

        if let Err(e) = fs::fs_del_lv(&self.vg_name, lv_name) {
            warn!("could not retract /dev entry for {}: {}", lv_name, e);
        }

        let old_reachable = reconcile::reachable_from(&self.layers, &root)?;
        let old_order = exec::topo_order(&self.layers, &[root.clone()])?;

        self.active_list.remove(lv_name);

        let mut new_index = BTreeMap::new();
        graph::expand_all(vg, &self.active_list, &mut new_index)?;
        reconcile::scan_existing(&self.mapper, &self.vg_name, &mut new_index)?;

        // Reachability for the remaining active LVs is computed against the
        // *old* index, not the freshly expanded one: an origin's `-real`
        // split, once created because a snapshot was active, stays in place
        // until the origin itself is deactivated and reactivated, rather
        // than being silently collapsed back to a vanilla layer underneath
        // a table we haven't reloaded.
        let mut still_needed = HashSet::new();
        for other in &self.active_list {
            let other_root = name::encode(&self.vg_name, other, None);
            if let Ok(reach) = reconcile::reachable_from(&self.layers, &other_root) {
                still_needed.extend(reach);
            }
        }

        let mut to_remove: Vec<String> = old_reachable
            .into_iter()
            .filter(|n| !still_needed.contains(n))
            .collect();
        to_remove.sort_by_key(|n| {
            old_order
                .iter()
                .position(|x| x == n)
                .unwrap_or(old_order.len())
        });
        to_remove.reverse();

        for layer_name in &to_remove {
            exec::remove_layer(&mut self.mapper, layer_name)?;
            self.synced_targets.remove(layer_name);
        }

        let mut final_index = new_index;
        for n in &still_needed {
            if !final_index.contains_key(n) {
                if let Some(old_layer) = self.layers.get(n) {
                    final_index.insert(n.clone(), old_layer.clone());
                }
            }
        }

        info!(
            "deactivated {}/{} ({} layers removed)",
            self.vg_name,
            lv_name,
            to_remove.len()
        );
        self.layers = final_index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dm::mock::MockMapper;
    use crate::parser::{buf_to_textmap, Entry};

    fn vg_with_snapshot() -> VG {
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
        orig {
            id = "orig-uuid"
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
        snap_cow {
            id = "snap-cow-uuid"
            status = ["READ", "WRITE"]
            flags = []
            creation_host = "host"
            creation_time = 0
            segment_count = 1
            segment1 {
                start_extent = 0
                extent_count = 10
                type = "striped"
                stripe_count = 1
                stripe_size = 0
                stripes = ["pv0", 100]
            }
        }
        snap {
            id = "snap-uuid"
            status = ["READ", "WRITE"]
            flags = []
            creation_host = "host"
            creation_time = 0
            snapshot {
                origin = "orig"
                cow_store = "snap_cow"
                chunk_size = 16
            }
            segment_count = 0
        }
    }
}
"#;
        let map = buf_to_textmap(buf).unwrap();
        let vg_map = map.get("vg0").unwrap();
        let inner = match vg_map {
            Entry::TextMap(m) => m,
            _ => panic!("expected textmap"),
        };
        VG::from_textmap("vg0", inner).unwrap()
    }

    #[test]
    fn activate_vanilla_lv_creates_one_device() {
        let vg = vg_with_snapshot();
        let mut manager = DevManager::new("vg0", MockMapper::new());
        manager.activate(&vg, "orig").unwrap();

        assert!(manager.is_active("orig"));
        assert_eq!(
            manager.mapper.calls(),
            vec!["create vg0-orig", "reload vg0-orig", "resume vg0-orig"]
        );
    }

    #[test]
    fn activating_snapshot_creates_real_and_cow_layers_first() {
        let vg = vg_with_snapshot();
        let mut manager = DevManager::new("vg0", MockMapper::new());
        manager.activate(&vg, "orig").unwrap();
        manager.mapper.clear_calls();

        manager.activate(&vg, "snap").unwrap();

        let calls = manager.mapper.calls();
        let real_pos = calls.iter().position(|c| c.contains("vg0-orig-real")).unwrap();
        let cow_pos = calls.iter().position(|c| c.contains("vg0-snap-cow")).unwrap();
        let snap_pos = calls.iter().position(|c| c == "create vg0-snap").unwrap();
        assert!(real_pos < snap_pos);
        assert!(cow_pos < snap_pos);
    }

    #[test]
    fn deactivate_removes_layers_not_needed_elsewhere() {
        let vg = vg_with_snapshot();
        let mut manager = DevManager::new("vg0", MockMapper::new());
        manager.activate(&vg, "orig").unwrap();
        manager.activate(&vg, "snap").unwrap();
        manager.mapper.clear_calls();

        manager.deactivate(&vg, "snap").unwrap();

        assert!(manager.mapper.calls().iter().any(|c| c == "remove vg0-snap"));
        assert!(!manager.is_active("snap"));
        // orig is still active, so its -real layer must survive.
        assert!(manager.mapper.info("vg0-orig-real").unwrap().is_some());
    }

    #[test]
    fn reactivating_unchanged_lv_only_probes() {
        let vg = vg_with_snapshot();
        let mut manager = DevManager::new("vg0", MockMapper::new());
        manager.activate(&vg, "orig").unwrap();
        manager.mapper.clear_calls();

        manager.activate(&vg, "orig").unwrap();

        assert!(manager.mapper.calls().is_empty());
    }
}
