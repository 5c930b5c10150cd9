// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reconciles the ideal layer graph built by `graph` with what the
//! mapper already has on disk, and answers reachability questions
//! against the result.

use std::collections::{BTreeMap, HashSet};

use crate::dm::layer::{Layer, Populate};
use crate::dm::mapper::Mapper;
use crate::dm::name;
use crate::{Error, Result};

/// Ingest every mapper device belonging to `vg_name` into `index`.
/// Devices with no corresponding ideal layer are kept as
/// `Populate::Unclassified` placeholders so the mark/prune pass can
/// still see them; devices that do correspond to an ideal layer have
/// their observed `info` attached so the executor can tell whether a
/// create or a reload is needed.
pub fn scan_existing(mapper: &dyn Mapper, vg_name: &str, index: &mut BTreeMap<String, Layer>) -> Result<()> {
    for device_name in mapper.list_devices()? {
        if !name::belongs_to_vg(vg_name, &device_name) {
            continue;
        }

        if !index.contains_key(&device_name) {
            index.insert(
                device_name.clone(),
                Layer::new(device_name.clone(), Populate::Unclassified),
            );
        }

        let info = mapper.info(&device_name)?;
        if let Some(layer) = index.get_mut(&device_name) {
            layer.info = info;
        }
    }
    Ok(())
}

/// The set of layer names reachable from `root` by following
/// `pre_create` edges, detecting cycles along the way. Implemented as
/// an explicit worklist rather than native recursion so arbitrarily
/// deep dependency chains can't blow the call stack.
pub fn reachable_from(index: &BTreeMap<String, Layer>, root: &str) -> Result<HashSet<String>> {
    let mut marked = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut work = vec![(root.to_string(), 0usize)];
    on_stack.insert(root.to_string());

    while let Some(&mut (ref name, ref mut child_idx)) = work.last_mut() {
        let layer = index
            .get(name)
            .ok_or_else(|| Error::MissingDependency(name.clone()))?;

        if *child_idx < layer.pre_create.len() {
            let dep = layer.pre_create[*child_idx].clone();
            *child_idx += 1;

            if marked.contains(&dep) {
                continue;
            }
            if !on_stack.insert(dep.clone()) {
                return Err(Error::CircularDependency(dep));
            }
            work.push((dep, 0));
        } else {
            let (name, _) = work.pop().unwrap();
            on_stack.remove(&name);
            marked.insert(name);
        }
    }

    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dm::layer::LayerFlags;

    fn layer(name: &str, pre_create: &[&str]) -> Layer {
        let mut l = Layer::new(
            name.to_string(),
            Populate::Vanilla {
                source_lv: name.to_string(),
            },
        );
        l.pre_create = pre_create.iter().map(|s| s.to_string()).collect();
        l.flags.insert(LayerFlags::VISIBLE);
        l
    }

    #[test]
    fn reachable_from_follows_pre_create_chain() {
        let mut index = BTreeMap::new();
        index.insert("top".to_string(), layer("top", &["real", "cow"]));
        index.insert("real".to_string(), layer("real", &[]));
        index.insert("cow".to_string(), layer("cow", &[]));
        index.insert("unrelated".to_string(), layer("unrelated", &[]));

        let reached = reachable_from(&index, "top").unwrap();
        assert!(reached.contains("top"));
        assert!(reached.contains("real"));
        assert!(reached.contains("cow"));
        assert!(!reached.contains("unrelated"));
    }

    #[test]
    fn reachable_from_detects_cycle() {
        let mut index = BTreeMap::new();
        index.insert("a".to_string(), layer("a", &["b"]));
        index.insert("b".to_string(), layer("b", &["a"]));

        let err = reachable_from(&index, "a").unwrap_err();
        assert!(matches!(err, Error::CircularDependency(_)));
    }

    #[test]
    fn reachable_from_missing_dependency_errors() {
        let mut index = BTreeMap::new();
        index.insert("a".to_string(), layer("a", &["ghost"]));

        let err = reachable_from(&index, "a").unwrap_err();
        assert!(matches!(err, Error::MissingDependency(_)));
    }
}
