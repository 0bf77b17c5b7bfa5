//! EDID identification helpers
//!
//! Only the bits needed to tell monitors apart are decoded here.

use sha2::{Digest, Sha256};

use crate::constants::edid::{BLOCK_LEN, HEADER_LEN, UNKNOWN_MANUFACTURER};

/// Decode `(manufacturer, model)` from a raw EDID block
///
/// Manufacturer is the three-letter PNP id. Model is the first printable run
/// in the descriptor area, or the product code digits when no name is present.
pub fn parse_edid(edid: &[u8]) -> (String, String) {
    if edid.len() < HEADER_LEN {
        return (UNKNOWN_MANUFACTURER.to_string(), String::new());
    }

    let brand = &edid[8..12];
    let packed = u16::from_be_bytes([brand[0], brand[1]]);
    let mut manufacturer = String::with_capacity(3);
    for shift in [10u16, 5, 0] {
        let c = (((packed >> shift) & 0x1f) as u8).wrapping_add(b'A' - 1);
        if !c.is_ascii_uppercase() {
            return (UNKNOWN_MANUFACTURER.to_string(), String::new());
        }
        manufacturer.push(c as char);
    }

    if edid.len() < BLOCK_LEN {
        return (manufacturer, String::new());
    }

    let model: String = edid[88..112]
        .iter()
        .skip_while(|b| !is_printable(**b))
        .take_while(|b| is_printable(**b))
        .map(|b| *b as char)
        .collect();
    if !model.is_empty() {
        return (manufacturer, model);
    }

    let model = format!("{}{}", brand[2], brand[3]);
    (manufacturer, model)
}

fn is_printable(b: u8) -> bool {
    (b'!'..=b'~').contains(&b)
}

/// Stable identity for the monitor behind an output
///
/// Output name alone when no full EDID block is available, otherwise the name
/// followed by a digest of the first block.
pub fn output_uuid(name: &str, edid: &[u8]) -> String {
    if edid.len() < BLOCK_LEN {
        return name.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(&edid[..BLOCK_LEN]);
    let digest = hasher.finalize();
    let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{name}{hex}")
}

#[cfg(test)]
pub(crate) fn sample_edid(vendor: &str, product: u16, model: &str) -> Vec<u8> {
    let mut edid = vec![0u8; BLOCK_LEN];
    edid[0..8].copy_from_slice(&[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00]);
    let v = vendor.as_bytes();
    let packed: u16 = ((v[0] - b'A' + 1) as u16) << 10
        | ((v[1] - b'A' + 1) as u16) << 5
        | (v[2] - b'A' + 1) as u16;
    edid[8..10].copy_from_slice(&packed.to_be_bytes());
    edid[10..12].copy_from_slice(&product.to_le_bytes());
    // display product name descriptor
    edid[72..77].copy_from_slice(&[0, 0, 0, 0xfc, 0]);
    for (i, b) in model.bytes().take(13).enumerate() {
        edid[90 + i] = b;
    }
    if model.len() < 13 {
        edid[90 + model.len()] = b'\n';
    }
    edid
}
