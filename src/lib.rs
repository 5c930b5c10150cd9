// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A dependency-aware device-mapper activation planner for an
//! LVM-style volume manager.
//!
//! Given a `VG`'s parsed metadata and the LV you want active, `dm`
//! works out the ideal set of mapper layers (splitting origins and
//! snapshots into their hidden `-real`/`-cow` devices where needed),
//! reconciles that against what the mapper already has, and drives it
//! through however many creates, reloads, and removes are required —
//! in the right order, with the right suspend/resume discipline.

pub mod dm;
pub mod error;
pub mod flock;
pub mod lv;
pub mod parser;
pub mod pv;
pub mod pvlabel;
pub mod vg;

mod util;

pub use crate::error::{Error, Result};
