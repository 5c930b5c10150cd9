// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The in-memory node the planner works with: one mapper device, its
//! flags, and the names of the layers it depends on.

use bitflags::bitflags;

use crate::dm::mapper::DeviceInfo;

bitflags! {
    pub struct LayerFlags: u8 {
        /// Set during graph traversal to mark reachability from the
        /// activation target.
        const MARK    = 0b001;
        /// Set when an existing device's table must be reloaded.
        const DIRTY   = 0b010;
        /// Set on the one layer per LV that must be published to the
        /// filesystem.
        const VISIBLE = 0b100;
    }
}

/// How a layer's table is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Populate {
    /// Emit `source_lv`'s segment list directly. For a visible top layer
    /// `source_lv` is the layer's own LV; for a hidden `-real`/`-cow`
    /// layer it is the LV whose segments that layer exposes.
    Vanilla { source_lv: String },
    /// Emit a `snapshot-origin` target referencing the named `-real` layer.
    Origin { real_layer: String },
    /// Emit a `snapshot` target referencing the named `-real` and `-cow` layers.
    Snapshot {
        real_layer: String,
        cow_layer: String,
        chunk_size: u64,
    },
    /// A device found on the mapper that doesn't correspond to any LV in
    /// this VG's ideal graph; its table is never (re)computed by us.
    Unclassified,
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    /// The LV this layer realizes, if any (placeholder layers discovered
    /// during reconciliation may have none).
    pub lv_name: Option<String>,
    pub flags: LayerFlags,
    pub populate: Populate,
    /// Layers that must exist (and be loaded) before this one can be
    /// created or reloaded.
    pub pre_create: Vec<String>,
    /// Reserved: layers that must be resumed before this one may be
    /// resumed. Not yet produced by any expansion rule.
    pub pre_active: Vec<String>,
    /// The mapper's last-known state for this device, refreshed during
    /// reconciliation.
    pub info: Option<DeviceInfo>,
    /// Extension point for a future identity scheme; populated from the
    /// owning LV's id when known, unused by the mapper today.
    pub uuid: Option<String>,
}

impl Layer {
    pub fn new(name: String, populate: Populate) -> Layer {
        Layer {
            name,
            lv_name: None,
            flags: LayerFlags::empty(),
            populate,
            pre_create: Vec::new(),
            pre_active: Vec::new(),
            info: None,
            uuid: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.info.map(|i| i.exists).unwrap_or(false)
    }

    pub fn is_suspended(&self) -> bool {
        self.info.map(|i| i.suspended).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_layer_has_no_flags_set() {
        let layer = Layer::new(
            "vg0-lvol0".to_string(),
            Populate::Vanilla {
                source_lv: "lvol0".to_string(),
            },
        );
        assert!(!layer.flags.contains(LayerFlags::MARK));
        assert!(!layer.flags.contains(LayerFlags::VISIBLE));
        assert!(!layer.exists());
    }

    #[test]
    fn flags_compose() {
        let mut layer = Layer::new(
            "x".to_string(),
            Populate::Vanilla {
                source_lv: "x".to_string(),
            },
        );
        layer.flags.insert(LayerFlags::MARK | LayerFlags::VISIBLE);
        assert!(layer.flags.contains(LayerFlags::MARK));
        assert!(layer.flags.contains(LayerFlags::VISIBLE));
        assert!(!layer.flags.contains(LayerFlags::DIRTY));
    }
}
