// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! DPCD register constants and the register-level HAL interface.
//!
//! The AUX transaction transport itself is outside this crate; the connector
//! talks to the DPCD space through the [`DpcdHal`] trait, which a platform
//! implements on top of its AUX channel. All accesses are synchronous
//! request/response with explicit ACK/NAK/defer/timeout outcomes.

use bitflags::bitflags;

use crate::link::LinkRate;

pub const DPCD_REV: u32 = 0x000;
pub const MAX_LINK_RATE: u32 = 0x001;
pub const MAX_LANE_COUNT: u32 = 0x002;
pub const MSTM_CAP: u32 = 0x021;
pub const FEC_CAPABILITY: u32 = 0x090;
pub const LINK_BW_SET: u32 = 0x100;
pub const LANE_COUNT_SET: u32 = 0x101;
pub const TRAINING_PATTERN_SET: u32 = 0x102;
pub const TRAINING_LANE0_SET: u32 = 0x103;
pub const MSTM_CTRL: u32 = 0x111;
pub const PAYLOAD_ALLOCATE_SET: u32 = 0x1c0;
pub const PAYLOAD_ALLOCATE_START_TIME_SLOT: u32 = 0x1c1;
pub const PAYLOAD_ALLOCATE_TIME_SLOT_COUNT: u32 = 0x1c2;
pub const SINK_COUNT: u32 = 0x200;
pub const LANE0_1_STATUS: u32 = 0x202;
pub const LANE2_3_STATUS: u32 = 0x203;
pub const LANE_ALIGN_STATUS_UPDATED: u32 = 0x204;
pub const ADJUST_REQUEST_LANE0_1: u32 = 0x206;
pub const PAYLOAD_TABLE_UPDATE_STATUS: u32 = 0x2c0;
pub const SET_POWER: u32 = 0x600;

/// `MAX_LINK_RATE`/`LINK_BW_SET` encodings for 8b/10b rates.
pub const LINK_BW_1_62_GBPS: u8 = 0x06;
pub const LINK_BW_2_70_GBPS: u8 = 0x0a;
pub const LINK_BW_5_40_GBPS: u8 = 0x14;
pub const LINK_BW_8_10_GBPS: u8 = 0x1e;

/// Outcome of a single AUX transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuxStatus {
    /// Transaction completed.
    Ack,
    /// Receiver refused the transaction.
    Nack,
    /// Receiver asked for the transaction to be retried later.
    Defer,
    /// No reply within the AUX timeout.
    Timeout,
}

impl AuxStatus {
    /// Returns `true` when retrying the same transaction may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Defer | Self::Timeout)
    }
}

/// Sink power state as controlled through `SET_POWER`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    D0,
    D3,
}

bitflags! {
    /// Per-lane training status, one nibble of `LANE0_1_STATUS`/`LANE2_3_STATUS`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LaneStatus: u8 {
        const CLOCK_RECOVERY_DONE = 1 << 0;
        const CHANNEL_EQ_DONE = 1 << 1;
        const SYMBOL_LOCKED = 1 << 2;
    }
}

impl LaneStatus {
    /// Returns `true` when the lane is fully trained.
    pub fn is_trained(&self) -> bool {
        self.contains(LaneStatus::CLOCK_RECOVERY_DONE | LaneStatus::CHANNEL_EQ_DONE | LaneStatus::SYMBOL_LOCKED)
    }
}

/// Voltage-swing/pre-emphasis level requested by the sink for one lane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriveSetting {
    pub voltage_swing: u8,
    pub preemphasis: u8,
}

/// Register-level access to the sink's DPCD space.
///
/// Implemented by the platform on top of its AUX transport. Link-status
/// getters report the software cache, which is refreshed only by
/// [`refresh_link_status()`](Self::refresh_link_status) (typically in
/// response to an interrupt), never by the getters themselves.
pub trait DpcdHal {
    /// Returns `true` when the DPCD space is unreachable (cable gone).
    fn is_offline(&self) -> bool;

    /// DPCD revision as (major, minor).
    fn revision(&self) -> (u8, u8);

    fn max_link_rate(&self) -> LinkRate;
    fn max_lane_count(&self) -> u8;
    fn enhanced_framing(&self) -> bool;
    fn downspread_supported(&self) -> bool;

    /// Sink-side MST capability (`MSTM_CAP`).
    fn supports_multistream(&self) -> bool;
    fn supports_fec(&self) -> bool;

    /// Sink accepts setting the link configuration without a handshake.
    fn supports_no_handshake_training(&self) -> bool;
    /// eDP no-link-training capability.
    fn no_link_training(&self) -> bool;
    fn post_lt_adjust_request_supported(&self) -> bool;

    fn power_state(&self) -> PowerState;
    fn set_power_state(&mut self, state: PowerState) -> AuxStatus;

    /// Switches the sink between SST and MST mode (`MSTM_CTRL`).
    fn set_multistream(&mut self, enabled: bool) -> AuxStatus;

    /// Re-reads lane/align status registers into the software cache.
    fn refresh_link_status(&mut self);
    fn lane_status(&self, lane: u8) -> LaneStatus;
    fn interlane_align_done(&self) -> bool;

    /// Lane count and rate currently programmed in `LINK_BW_SET`/`LANE_COUNT_SET`.
    fn current_link(&self) -> (u8, LinkRate);

    /// Post-LT drive-setting change requested by the sink for `lane`, if any.
    fn adjust_request(&self, lane: u8) -> Option<DriveSetting>;
    /// Sink still wants the post-LT adjustment phase to continue.
    fn post_lt_adjust_in_progress(&self) -> bool;
    fn set_lane_drive(&mut self, lane: u8, setting: DriveSetting) -> AuxStatus;

    fn sink_count(&self) -> u8;

    /// Branch/sink IEEE OUI, if the device exposes one.
    fn oui(&self) -> Option<[u8; 3]>;
    fn set_source_oui(&mut self, oui: [u8; 3]) -> AuxStatus;

    /// Clears `PAYLOAD_TABLE_UPDATE_STATUS` ACT-handled state.
    fn payload_table_clear_act(&mut self);
    /// Programs one payload table entry. Count of zero frees the entry.
    fn payload_allocate(&mut self, stream: u8, begin: u8, count: u8) -> bool;
    /// Polls whether the sink acknowledged the last ACT.
    fn payload_act_received(&mut self) -> bool;
}

/// Decodes a `MAX_LINK_RATE`-style DPCD byte.
pub fn link_rate_from_dpcd(val: u8) -> Option<LinkRate> {
    match val {
        LINK_BW_1_62_GBPS => Some(LinkRate::Rbr),
        LINK_BW_2_70_GBPS => Some(LinkRate::Hbr),
        LINK_BW_5_40_GBPS => Some(LinkRate::Hbr2),
        LINK_BW_8_10_GBPS => Some(LinkRate::Hbr3),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lane_status_trained() {
        let mut status = LaneStatus::CLOCK_RECOVERY_DONE | LaneStatus::CHANNEL_EQ_DONE;
        assert!(!status.is_trained());
        status |= LaneStatus::SYMBOL_LOCKED;
        assert!(status.is_trained());
    }

    #[test]
    fn rate_decoding() {
        assert_eq!(link_rate_from_dpcd(0x06), Some(LinkRate::Rbr));
        assert_eq!(link_rate_from_dpcd(0x1e), Some(LinkRate::Hbr3));
        assert_eq!(link_rate_from_dpcd(0x00), None);
    }

    #[test]
    fn transient_outcomes() {
        assert!(AuxStatus::Defer.is_transient());
        assert!(AuxStatus::Timeout.is_transient());
        assert!(!AuxStatus::Ack.is_transient());
        assert!(!AuxStatus::Nack.is_transient());
    }
}
