// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Encodes and decodes mapper device names of the form
//! `<vg>-<lv>[-<layer>]`, doubling every literal hyphen within a
//! component so the triple can be recovered unambiguously.

/// Build the mapper device name for `(vg, lv, layer)`. `layer` is `None`
/// for the user-visible top device.
pub fn encode(vg: &str, lv: &str, layer: Option<&str>) -> String {
    let mut s = format!("{}-{}", double_hyphens(vg), double_hyphens(lv));
    if let Some(layer) = layer {
        s.push('-');
        s.push_str(&double_hyphens(layer));
    }
    s
}

fn double_hyphens(s: &str) -> String {
    s.replace('-', "--")
}

/// Recover `(vg, lv, layer)` from an encoded name. Single hyphens are
/// component separators; doubled hyphens are literal hyphens within a
/// component.
pub fn decode(name: &str) -> Option<(String, String, Option<String>)> {
    let parts = split_on_single_hyphen(name);
    match parts.len() {
        2 => Some((parts[0].clone(), parts[1].clone(), None)),
        3 => Some((parts[0].clone(), parts[1].clone(), Some(parts[2].clone()))),
        _ => None,
    }
}

/// Does `name` belong to volume group `vg`? Decodes the name and compares
/// the decoded VG field exactly, rather than testing a string prefix,
/// which would misclassify devices whose VG names share a prefix or
/// contain hyphens.
pub fn belongs_to_vg(vg: &str, name: &str) -> bool {
    match decode(name) {
        Some((decoded_vg, _, _)) => decoded_vg == vg,
        None => false,
    }
}

fn split_on_single_hyphen(name: &str) -> Vec<String> {
    let bytes = name.as_bytes();
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'-' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'-' {
                cur.push('-');
                i += 2;
                continue;
            }
            parts.push(std::mem::take(&mut cur));
            i += 1;
            continue;
        }
        cur.push(bytes[i] as char);
        i += 1;
    }
    parts.push(cur);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_names() {
        let name = encode("vg0", "lvol0", None);
        assert_eq!(name, "vg0-lvol0");
        assert_eq!(decode(&name), Some(("vg0".to_string(), "lvol0".to_string(), None)));
    }

    #[test]
    fn round_trips_with_layer() {
        let name = encode("vg0", "snap", Some("cow"));
        assert_eq!(name, "vg0-snap-cow");
        assert_eq!(
            decode(&name),
            Some(("vg0".to_string(), "snap".to_string(), Some("cow".to_string())))
        );
    }

    #[test]
    fn round_trips_hyphenated_components() {
        let name = encode("a-b", "c-d", Some("e-f"));
        assert_eq!(name, "a--b-c--d-e--f");
        assert_eq!(
            decode(&name),
            Some(("a-b".to_string(), "c-d".to_string(), Some("e-f".to_string())))
        );
    }

    #[test]
    fn belongs_to_vg_is_exact_not_prefix() {
        // vg0 and vg00 share a prefix; a naive strncmp would conflate them.
        assert!(belongs_to_vg("vg0", "vg0-lvol0"));
        assert!(!belongs_to_vg("vg0", "vg00-lvol0"));
        assert!(!belongs_to_vg("vg0", "garbage"));
    }
}
