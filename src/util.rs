// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crc::crc32;
use uuid::Uuid;

const INITIAL_CRC: u32 = 0xf597a6cf;
const CRC_SEED: u32 = 0xedb88320;

pub fn align_to(num: usize, align_to: usize) -> usize {
    let agn = align_to - 1;

    (num + agn) & !agn
}

pub fn crc32_calc(buf: &[u8]) -> u32 {
    let table = crc32::make_table(CRC_SEED);

    // For some reason, we need to negate the initial CRC value
    // and the result, to match what LVM2 is generating.
    !crc32::update(!INITIAL_CRC, &table, buf)
}

/// Generate a fresh LVM-style UUID: 32 lowercase hex characters, no hyphens.
pub fn make_uuid() -> String {
    Uuid::new_v4().to_simple().to_string()
}

/// Turn a bare 32-character hex id (as found on-disk) into LVM2's
/// hyphenated display form: groups of 6,4,4,4,4,4,6 characters.
pub fn hyphenate_uuid(buf: &[u8]) -> String {
    let s = String::from_utf8_lossy(buf);
    let groups = [6, 4, 4, 4, 4, 4, 6];
    let mut out = String::with_capacity(s.len() + groups.len() - 1);
    let mut pos = 0;
    for (i, len) in groups.iter().enumerate() {
        if i > 0 {
            out.push('-');
        }
        out.push_str(&s[pos..pos + len]);
        pos += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_rounds_up() {
        assert_eq!(align_to(1, 8), 8);
        assert_eq!(align_to(8, 8), 8);
        assert_eq!(align_to(9, 8), 16);
    }

    #[test]
    fn hyphenate_uuid_has_expected_shape() {
        let raw = b"abcdef01234567890123456789abcdef";
        let hyph = hyphenate_uuid(raw);
        assert_eq!(hyph.len(), 32 + 6);
        assert_eq!(hyph.matches('-').count(), 6);
        assert!(hyph.starts_with("abcdef-"));
    }

    #[test]
    fn make_uuid_is_32_hex_chars() {
        let id = make_uuid();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
