// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! EDID validity, identity and synthetic fallbacks.
//!
//! Full EDID parsing belongs to the display driver. The link layer only
//! needs three things from an EDID: whether it is usable at all, the
//! manufacturer/product identity that keys the quirk table, and a synthetic
//! replacement to hand out when a sink returns garbage.

use crate::address::Address;

const EDID_BLOCK_SIZE: usize = 128;
const EDID_HEADER: [u8; 8] = [0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00];

/// Manufacturer and product code from EDID bytes 8..12.
///
/// This pair keys the panel quirk table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdidIdentity {
    pub manufacturer: u16,
    pub product: u16,
}

/// Raw EDID with validity accessors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edid {
    data: Vec<u8>,
    patched: bool,
}

impl Edid {
    pub fn new(data: Vec<u8>) -> Self {
        Edid { data, patched: false }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_header_valid(&self) -> bool {
        self.data.len() >= EDID_BLOCK_SIZE && self.data[..8] == EDID_HEADER
    }

    /// Every 128-byte block must sum to zero modulo 256.
    pub fn is_checksum_valid(&self) -> bool {
        if self.data.is_empty() || self.data.len() % EDID_BLOCK_SIZE != 0 {
            return false;
        }
        self.data
            .chunks(EDID_BLOCK_SIZE)
            .all(|block| block.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)) == 0)
    }

    pub fn is_valid(&self) -> bool {
        self.is_header_valid() && self.is_checksum_valid()
    }

    /// Marks the EDID as patched by driver-side workarounds. A patched
    /// EDID always compares unequal to a freshly read one.
    pub fn set_patched(&mut self) {
        self.patched = true;
    }

    pub fn is_patched(&self) -> bool {
        self.patched
    }

    pub fn identity(&self) -> Option<EdidIdentity> {
        if self.data.len() < 12 {
            return None;
        }
        Some(EdidIdentity {
            manufacturer: u16::from_be_bytes([self.data[8], self.data[9]]),
            product: u16::from_le_bytes([self.data[10], self.data[11]]),
        })
    }
}

/// Which synthetic EDID to fall back to for an unreadable sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackKind {
    /// Digital sink behind a DP or TMDS port.
    Digital,
    /// VGA converter dongle. Gets an analog EDID so the driver does not
    /// offer modes the DAC cannot drive.
    Vga,
}

/// Builds a minimal valid single-block EDID advertising 640x480@60 only.
pub fn fallback_edid(kind: FallbackKind) -> Edid {
    let mut block = [0u8; EDID_BLOCK_SIZE];
    block[..8].copy_from_slice(&EDID_HEADER);

    // PNP id "DPL", product code 1
    block[8] = 0x12;
    block[9] = 0x0c;
    block[10] = 0x01;
    block[11] = 0x00;

    // EDID 1.3
    block[18] = 0x01;
    block[19] = 0x03;

    block[20] = match kind {
        FallbackKind::Digital => 0x80,
        FallbackKind::Vga => 0x00,
    };

    // Established timings: 640x480@60
    block[35] = 0x20;

    let sum = block[..EDID_BLOCK_SIZE - 1]
        .iter()
        .fold(0u8, |sum, b| sum.wrapping_add(*b));
    block[EDID_BLOCK_SIZE - 1] = 0u8.wrapping_sub(sum);

    let mut edid = Edid::new(block.to_vec());
    edid.set_patched();
    edid
}

/// EDID acquisition collaborator. For the root connector this is a DDC
/// read; for MST sinks the platform routes it over REMOTE_I2C sidebands.
pub trait EdidReader {
    /// Returns the raw EDID for the sink at `address`, or `None` when the
    /// read failed outright.
    fn read_edid(&mut self, address: &Address) -> Option<Vec<u8>>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fallback_edids_are_valid() {
        for kind in [FallbackKind::Digital, FallbackKind::Vga] {
            let edid = fallback_edid(kind);
            assert!(edid.is_valid(), "{kind:?}");
            assert!(edid.is_patched());
        }
        assert_ne!(fallback_edid(FallbackKind::Digital), fallback_edid(FallbackKind::Vga));
    }

    #[test]
    fn corruption_detection() {
        let mut data = fallback_edid(FallbackKind::Digital).bytes().to_vec();
        data[40] ^= 0xff;
        let edid = Edid::new(data);
        assert!(edid.is_header_valid());
        assert!(!edid.is_checksum_valid());
        assert!(!edid.is_valid());

        assert!(!Edid::new(vec![0u8; 64]).is_valid());
        assert!(!Edid::new(Vec::new()).is_valid());
    }

    #[test]
    fn identity_decoding() {
        let edid = fallback_edid(FallbackKind::Digital);
        let id = edid.identity().unwrap();
        assert_eq!(id.manufacturer, 0x120c);
        assert_eq!(id.product, 0x0001);
    }
}
