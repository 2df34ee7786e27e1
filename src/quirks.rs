// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Data-driven device workaround table.
//!
//! Known-misbehaving panels and branch devices are listed in
//! `src/data/quirks.json`, keyed by EDID identity or branch IEEE OUI. The
//! records expose behavior flags only; the hardware defect they compensate
//! for is opaque to this crate. Lookups happen at fixed extension points:
//! fallback-EDID selection, the FEC-enable decision, post-LT-adjust entry,
//! redundant-hotplug filtering and post-apply link re-assessment.

use bitflags::bitflags;
use include_dir::{include_dir, Dir};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::collections::HashMap;

use crate::edid::EdidIdentity;

pub(crate) static DATA_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/src/data");

bitflags! {
    /// Behavior overrides a quirk record can request.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct QuirkFlags: u32 {
        /// Re-run link assessment after the device's quirks are applied.
        const REASSESS_MAX_LINK = 1 << 0;
        /// Never enter the post-LT adjustment phase.
        const SKIP_POST_LT_ADJUST = 1 << 1;
        /// Write DPCD D0 before training even if D0 is already reported.
        const POWER_ON_BEFORE_LT = 1 << 2;
        /// Drop long-pulse notifications that arrive while already plugged.
        const IGNORE_REDUNDANT_HOTPLUG = 1 << 3;
        /// Enable FEC only after the settling delay, not during training.
        const DEFER_FEC_ENABLE = 1 << 4;
        /// Use the analog fallback EDID regardless of port type.
        const FORCE_VGA_FALLBACK_EDID = 1 << 5;
    }
}

/// Resolved overrides for one device. Empty for unlisted devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Quirks {
    pub flags: QuirkFlags,
    /// FEC settling delay after training, with `DEFER_FEC_ENABLE`.
    pub lt2_fec_latency_ms: u32,
}

impl Quirks {
    pub fn has(&self, flags: QuirkFlags) -> bool {
        self.flags.contains(flags)
    }
}

#[derive(Deserialize)]
struct PanelRecord {
    manufacturer: String,
    product: String,
    flags: Vec<String>,
    #[serde(default)]
    lt2_fec_latency_ms: u32,
}

#[derive(Deserialize)]
struct BranchRecord {
    oui: String,
    flags: Vec<String>,
    #[serde(default)]
    lt2_fec_latency_ms: u32,
}

#[derive(Deserialize)]
struct QuirkFile {
    panels: Vec<PanelRecord>,
    branches: Vec<BranchRecord>,
}

fn parse_hex(s: &str) -> u32 {
    u32::from_str_radix(s.trim_start_matches("0x"), 16).unwrap()
}

fn parse_flags(names: &[String]) -> QuirkFlags {
    let mut flags = QuirkFlags::empty();
    for name in names {
        flags |= match name.as_str() {
            "reassess-max-link" => QuirkFlags::REASSESS_MAX_LINK,
            "skip-post-lt-adjust" => QuirkFlags::SKIP_POST_LT_ADJUST,
            "power-on-before-lt" => QuirkFlags::POWER_ON_BEFORE_LT,
            "ignore-redundant-hotplug" => QuirkFlags::IGNORE_REDUNDANT_HOTPLUG,
            "defer-fec-enable" => QuirkFlags::DEFER_FEC_ENABLE,
            "force-vga-fallback-edid" => QuirkFlags::FORCE_VGA_FALLBACK_EDID,
            other => panic!("unknown quirk flag {other:?}"),
        };
    }
    flags
}

lazy_static! {
    static ref QUIRK_FILE: QuirkFile = serde_json::from_str(
        DATA_DIR
            .get_file("quirks.json")
            .unwrap()
            .contents_utf8()
            .unwrap()
    )
    .unwrap();

    static ref PANELS: HashMap<EdidIdentity, Quirks> = QUIRK_FILE
        .panels
        .iter()
        .map(|r| {
            let id = EdidIdentity {
                manufacturer: parse_hex(&r.manufacturer) as u16,
                product: parse_hex(&r.product) as u16,
            };
            let quirks = Quirks {
                flags: parse_flags(&r.flags),
                lt2_fec_latency_ms: r.lt2_fec_latency_ms,
            };
            (id, quirks)
        })
        .collect();

    static ref BRANCHES: HashMap<[u8; 3], Quirks> = QUIRK_FILE
        .branches
        .iter()
        .map(|r| {
            let oui = parse_hex(&r.oui);
            let oui = [(oui >> 16) as u8, (oui >> 8) as u8, oui as u8];
            let quirks = Quirks {
                flags: parse_flags(&r.flags),
                lt2_fec_latency_ms: r.lt2_fec_latency_ms,
            };
            (oui, quirks)
        })
        .collect();
}

/// Looks up overrides for a panel by EDID identity.
pub fn panel_quirks(id: &EdidIdentity) -> Quirks {
    PANELS.get(id).copied().unwrap_or_default()
}

/// Looks up overrides for a branch device by IEEE OUI.
pub fn branch_quirks(oui: [u8; 3]) -> Quirks {
    BRANCHES.get(&oui).copied().unwrap_or_default()
}
