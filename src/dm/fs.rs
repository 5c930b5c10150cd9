// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Publishes and retracts the `/dev/<vg>/<lv>` symlinks userspace
//! tools expect to find pointing at a visible LV's mapper device.

use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};

use crate::dm::name;
use crate::Result;

fn lv_link_path(vg_name: &str, lv_name: &str) -> PathBuf {
    Path::new("/dev").join(vg_name).join(lv_name)
}

/// Create (or repoint) the `/dev/<vg>/<lv>` symlink to the mapper
/// device backing `lv_name`'s visible top layer.
pub fn fs_add_lv(dm_dir: &Path, vg_name: &str, lv_name: &str) -> Result<()> {
    let link = lv_link_path(vg_name, lv_name);
    fs::create_dir_all(link.parent().expect("link always has a parent"))?;

    let target = dm_dir.join(name::encode(vg_name, lv_name, None));

    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link)?;
    }
    unix_fs::symlink(&target, &link)?;
    Ok(())
}

/// Remove the `/dev/<vg>/<lv>` symlink, if it's there.
pub fn fs_del_lv(vg_name: &str, lv_name: &str) -> Result<()> {
    let link = lv_link_path(vg_name, lv_name);
    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lv_link_path_is_under_vg_dir() {
        let p = lv_link_path("vg0", "lvol0");
        assert_eq!(p, Path::new("/dev/vg0/lvol0"));
    }
}
