// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Walks a layer index in dependency order and drives the mapper
//! through the create/reload/suspend/resume/remove state machine.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::dm::layer::{Layer, LayerFlags};
use crate::dm::mapper::{Mapper, Target};
use crate::{Error, Result};

/// Order `roots` (and everything they transitively depend on via
/// `pre_create`) so that every layer appears after the layers it
/// depends on. Built from an explicit stack rather than recursive
/// calls so deep dependency chains can't overflow the call stack.
pub fn topo_order(index: &BTreeMap<String, Layer>, roots: &[String]) -> Result<Vec<String>> {
    let mut order = Vec::new();
    let mut done: HashSet<String> = HashSet::new();
    let mut on_stack: HashSet<String> = HashSet::new();

    for root in roots {
        if done.contains(root) {
            continue;
        }

        let mut work = vec![(root.clone(), 0usize)];
        on_stack.insert(root.clone());

        while let Some(&mut (ref name, ref mut child_idx)) = work.last_mut() {
            let layer = index
                .get(name)
                .ok_or_else(|| Error::MissingDependency(name.clone()))?;

            if *child_idx < layer.pre_create.len() {
                let dep = layer.pre_create[*child_idx].clone();
                *child_idx += 1;

                if done.contains(&dep) {
                    continue;
                }
                if !on_stack.insert(dep.clone()) {
                    return Err(Error::CircularDependency(dep));
                }
                work.push((dep, 0));
            } else {
                let (name, _) = work.pop().unwrap();
                on_stack.remove(&name);
                done.insert(name.clone());
                order.push(name);
            }
        }
    }

    Ok(order)
}

/// Suspend `name`'s device if it currently exists. A no-op for a
/// layer that hasn't been created yet.
pub fn suspend_if_exists(mapper: &mut dyn Mapper, name: &str) -> Result<()> {
    if let Some(info) = mapper.info(name)? {
        if info.exists {
            mapper.suspend(name)?;
        }
    }
    Ok(())
}

/// Reload (if the device exists) or create it (if it doesn't), then
/// resume it either way. Assumes any required suspend has already
/// happened.
pub fn reload_or_create(mapper: &mut dyn Mapper, name: &str, targets: &[Target]) -> Result<()> {
    match mapper.info(name)? {
        Some(info) if info.exists => {
            mapper.reload(name, targets)?;
            mapper.resume(name)?;
        }
        _ => {
            mapper.create(name, targets)?;
            mapper.reload(name, targets)?;
            mapper.resume(name)?;
        }
    }
    Ok(())
}

/// Bring a single layer's device in line with `targets`: create it if
/// it doesn't exist yet, otherwise suspend/reload/resume it in place.
pub fn sync_layer(mapper: &mut dyn Mapper, name: &str, targets: &[Target]) -> Result<()> {
    suspend_if_exists(mapper, name)?;
    reload_or_create(mapper, name, targets)
}

/// Tear a single layer's device down, if it's there at all. A
/// suspended device is resumed first — `remove` must never be issued
/// to a device still suspended from an earlier step.
pub fn remove_layer(mapper: &mut dyn Mapper, name: &str) -> Result<()> {
    if let Some(info) = mapper.info(name)? {
        if info.exists {
            if info.suspended {
                mapper.resume(name)?;
            }
            mapper.remove(name)?;
        }
    }
    Ok(())
}

/// Drive every layer in `order` (as produced by `topo_order`, so
/// dependencies precede their dependents) to match the table
/// `targets_for` computes for it, comparing against `synced` — the
/// tables actually loaded the last time this layer was synced — to
/// decide which layers are dirty.
///
/// A dirty layer's table changed (or the layer doesn't exist yet) and
/// must be reloaded. Any layer that depends, directly or
/// transitively, on a dirty one must still be suspended and resumed
/// around that reload even if its own table is unchanged — a device
/// has to be quiesced before a dependency underneath it is swapped out.
/// Layers touched by neither are left alone entirely: an unchanged
/// `activate` issues no suspend/reload/resume at all, only the `info`
/// probes `topo_order`/`reload_or_create` need to check existence.
///
/// Suspension happens top-down (dependents before dependencies, the
/// reverse of `order`) before any reload, and reload/resume happens
/// bottom-up (`order` itself), so every ancestor of a reloading layer
/// stays suspended for the whole time that layer's table is swapped.
pub fn sync_ordered<F>(
    mapper: &mut dyn Mapper,
    order: &[String],
    index: &mut BTreeMap<String, Layer>,
    synced: &mut HashMap<String, Vec<Target>>,
    mut targets_for: F,
) -> Result<()>
where
    F: FnMut(&Layer) -> Result<Vec<Target>>,
{
    let mut targets_by_name: HashMap<String, Vec<Target>> = HashMap::new();

    for name in order {
        let targets = {
            let layer = index
                .get(name)
                .ok_or_else(|| Error::MissingDependency(name.clone()))?;
            targets_for(layer)?
        };
        let exists = mapper.info(name)?.map(|i| i.exists).unwrap_or(false);
        let unchanged = synced.get(name).map(|t| t == &targets).unwrap_or(false);

        let layer = index.get_mut(name).expect("looked up above");
        layer.flags.set(LayerFlags::DIRTY, !exists || !unchanged);
        targets_by_name.insert(name.clone(), targets);
    }

    let mut touched: HashSet<String> = HashSet::new();
    for name in order {
        let layer = index
            .get(name)
            .ok_or_else(|| Error::MissingDependency(name.clone()))?;
        let depends_on_touched = layer.pre_create.iter().any(|d| touched.contains(d));
        if layer.flags.contains(LayerFlags::DIRTY) || depends_on_touched {
            touched.insert(name.clone());
        }
    }

    for name in order.iter().rev() {
        if touched.contains(name) {
            suspend_if_exists(mapper, name)?;
        }
    }

    for name in order {
        if !touched.contains(name) {
            continue;
        }
        let targets = &targets_by_name[name];
        if index[name].flags.contains(LayerFlags::DIRTY) {
            reload_or_create(mapper, name, targets)?;
        } else {
            mapper.resume(name)?;
        }
        synced.insert(name.clone(), targets.clone());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dm::layer::Populate;
    use crate::dm::mock::MockMapper;

    fn layer(name: &str, pre_create: &[&str]) -> Layer {
        let mut l = Layer::new(
            name.to_string(),
            Populate::Vanilla {
                source_lv: name.to_string(),
            },
        );
        l.pre_create = pre_create.iter().map(|s| s.to_string()).collect();
        l
    }

    #[test]
    fn topo_order_puts_dependencies_first() {
        let mut index = BTreeMap::new();
        index.insert("top".to_string(), layer("top", &["real", "cow"]));
        index.insert("real".to_string(), layer("real", &[]));
        index.insert("cow".to_string(), layer("cow", &[]));

        let order = topo_order(&index, &["top".to_string()]).unwrap();
        let top_pos = order.iter().position(|x| x == "top").unwrap();
        let real_pos = order.iter().position(|x| x == "real").unwrap();
        let cow_pos = order.iter().position(|x| x == "cow").unwrap();
        assert!(real_pos < top_pos);
        assert!(cow_pos < top_pos);
    }

    #[test]
    fn sync_layer_creates_when_absent() {
        let mut mapper = MockMapper::new();
        let targets = vec![Target::new(0, 100, "linear", "8:0 0".to_string())];
        sync_layer(&mut mapper, "vg0-lvol0", &targets).unwrap();
        assert_eq!(mapper.calls(), vec!["create vg0-lvol0", "reload vg0-lvol0", "resume vg0-lvol0"]);
    }

    #[test]
    fn sync_layer_reloads_when_present() {
        let mut mapper = MockMapper::new();
        let targets = vec![Target::new(0, 100, "linear", "8:0 0".to_string())];
        mapper.create("vg0-lvol0", &targets).unwrap();
        mapper.clear_calls();
        sync_layer(&mut mapper, "vg0-lvol0", &targets).unwrap();
        assert_eq!(
            mapper.calls(),
            vec!["suspend vg0-lvol0", "reload vg0-lvol0", "resume vg0-lvol0"]
        );
    }

    #[test]
    fn remove_layer_resumes_a_suspended_device_first() {
        let mut mapper = MockMapper::new();
        mapper.create("vg0-lvol0", &[]).unwrap();
        mapper.suspend("vg0-lvol0").unwrap();
        mapper.clear_calls();

        remove_layer(&mut mapper, "vg0-lvol0").unwrap();

        assert_eq!(mapper.calls(), vec!["resume vg0-lvol0", "remove vg0-lvol0"]);
    }

    #[test]
    fn remove_layer_skips_absent_device() {
        let mut mapper = MockMapper::new();
        remove_layer(&mut mapper, "vg0-lvol0").unwrap();
        assert!(mapper.calls().is_empty());
    }

    fn targets() -> Vec<Target> {
        vec![Target::new(0, 100, "linear", "8:0 0".to_string())]
    }

    #[test]
    fn sync_ordered_suspends_ancestor_before_reloading_dependency() {
        let mut index = BTreeMap::new();
        index.insert("top".to_string(), layer("top", &["bottom"]));
        index.insert("bottom".to_string(), layer("bottom", &[]));
        let order = vec!["bottom".to_string(), "top".to_string()];

        let mut mapper = MockMapper::new();
        mapper.create("top", &targets()).unwrap();
        mapper.create("bottom", &targets()).unwrap();
        mapper.clear_calls();

        let mut synced = HashMap::new();
        synced.insert("top".to_string(), targets());
        // "bottom"'s table differs from what's loaded, so it's dirty;
        // "top" depends on it and must be quiesced around the reload
        // even though its own table is unchanged.
        let different = vec![Target::new(0, 200, "linear", "8:0 0".to_string())];

        sync_ordered(&mut mapper, &order, &mut index, &mut synced, |l| {
            if l.name == "bottom" {
                Ok(different.clone())
            } else {
                Ok(targets())
            }
        })
        .unwrap();

        let calls = mapper.calls();
        let top_suspend = calls.iter().position(|c| c == "suspend top").unwrap();
        let bottom_reload = calls.iter().position(|c| c == "reload bottom").unwrap();
        let top_resume = calls.iter().position(|c| c == "resume top").unwrap();
        assert!(top_suspend < bottom_reload);
        assert!(bottom_reload < top_resume);
        assert!(!calls.contains(&"reload top".to_string()));
        assert!(index.get("bottom").unwrap().flags.contains(LayerFlags::DIRTY));
        assert!(!index.get("top").unwrap().flags.contains(LayerFlags::DIRTY));
    }

    #[test]
    fn sync_ordered_is_a_noop_when_nothing_changed() {
        let mut index = BTreeMap::new();
        index.insert("lone".to_string(), layer("lone", &[]));
        let order = vec!["lone".to_string()];

        let mut mapper = MockMapper::new();
        mapper.create("lone", &targets()).unwrap();
        mapper.clear_calls();

        let mut synced = HashMap::new();
        synced.insert("lone".to_string(), targets());

        sync_ordered(&mut mapper, &order, &mut index, &mut synced, |_| Ok(targets())).unwrap();

        assert!(mapper.calls().is_empty());
        assert!(!index.get("lone").unwrap().flags.contains(LayerFlags::DIRTY));
    }
}
