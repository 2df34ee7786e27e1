// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! GPU main-link programming interface.
//!
//! Everything that touches source-side registers goes through [`MainLink`]:
//! executing the training handshake the connector decided on, programming
//! the source payload table, raising ACT, and reporting the source's own
//! capability limits. The connector never sees a GPU register.

use crate::link::{LinkConfiguration, LinkRate, Watermark};

/// Which training handshake to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainingKind {
    /// Full clock-recovery and channel-equalization handshake.
    Normal,
    /// Abbreviated handshake using cached drive settings.
    Fast,
    /// Program the link configuration without any handshake. Only valid
    /// when the sink advertises no-handshake support.
    NoHandshake,
}

/// Source-side link hardware collaborator.
pub trait MainLink {
    fn max_link_rate(&self) -> LinkRate;
    fn max_lane_count(&self) -> u8;

    /// Rate enumerated and not administratively disabled on this source.
    fn is_rate_supported(&self, rate: LinkRate) -> bool;

    fn supports_multistream(&self) -> bool;
    fn supports_dsc(&self) -> bool;
    fn supports_fec(&self) -> bool;

    /// Runs the requested handshake at `lc`. Returns `true` when the link
    /// came up at exactly `lc`; the caller owns fallback on `false`.
    fn train(&mut self, lc: &LinkConfiguration, kind: TrainingKind) -> bool;

    /// Drops the main link to its powered-down state.
    fn power_down_link(&mut self);

    /// Holds pixel data off the link while the payload table or link
    /// configuration changes underneath active heads.
    fn set_flush_mode(&mut self, enabled: bool);

    /// Programs one source payload table entry. A zero count clears it.
    fn configure_stream(&mut self, stream: u8, begin: u8, count: u8);

    /// Sends the allocation change trigger in the next MTP header.
    fn trigger_act(&mut self);

    /// Programs SST lane bookkeeping for the single stream.
    fn program_watermark(&mut self, wm: &Watermark);

    /// Bandwidth granted to this DP-IN adapter by the tunnel manager, in
    /// bytes per second. `None` when the connector is not tunneled.
    fn tunnel_capacity(&self) -> Option<u64>;
}
