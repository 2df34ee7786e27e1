// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Link configuration and bandwidth arithmetic.
//!
//! A [`LinkConfiguration`] is a lane count and a per-lane rate plus the
//! framing options negotiated with it. Two configurations matter to the
//! connector at any time: the highest assessed one (what training proved
//! possible) and the active one (what the link runs at right now).
//!
//! All MST bandwidth accounting is done in PBN, the Payload Bandwidth
//! Number unit of 54/64 MB/s. One MTP frame carries 64 timeslots of which
//! slot 0 is reserved, so a link offers 63 allocatable slots and each slot
//! is worth 1/64th of the link's total PBN.

use std::fmt::{self, Display};

use crate::util::div_round_up;

/// Usable payload timeslots per MTP frame. Slot 0 carries the MTP header.
pub const PAYLOAD_SLOTS: u8 = 63;

/// FEC parity overhead. With FEC enabled only 976 of every 1000 symbols
/// carry payload.
pub const FEC_PAYLOAD_NUM: u64 = 976;
pub const FEC_PAYLOAD_DEN: u64 = 1000;

/// Channel coding of the main link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelCoding {
    /// DP 1.x 8b/10b coding.
    Dp8b10b,
    /// DP 2.x 128b/132b coding (UHBR rates).
    Dp128b132b,
}

/// Per-lane main-link rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkRate {
    Rbr,
    Hbr,
    Hbr2,
    Hbr3,
    Uhbr10,
    Uhbr13_5,
    Uhbr20,
}

impl LinkRate {
    /// All rates, lowest first.
    pub const ALL: [LinkRate; 7] = [
        LinkRate::Rbr,
        LinkRate::Hbr,
        LinkRate::Hbr2,
        LinkRate::Hbr3,
        LinkRate::Uhbr10,
        LinkRate::Uhbr13_5,
        LinkRate::Uhbr20,
    ];

    /// Raw bit rate in Mb/s per lane.
    pub fn mbps(&self) -> u32 {
        match self {
            Self::Rbr => 1620,
            Self::Hbr => 2700,
            Self::Hbr2 => 5400,
            Self::Hbr3 => 8100,
            Self::Uhbr10 => 10000,
            Self::Uhbr13_5 => 13500,
            Self::Uhbr20 => 20000,
        }
    }

    pub fn channel_coding(&self) -> ChannelCoding {
        match self {
            Self::Rbr | Self::Hbr | Self::Hbr2 | Self::Hbr3 => ChannelCoding::Dp8b10b,
            _ => ChannelCoding::Dp128b132b,
        }
    }

    /// Effective data rate in bytes per second per lane, after channel
    /// coding overhead.
    pub fn data_rate(&self) -> u64 {
        let bps = self.mbps() as u64 * 1_000_000;
        match self.channel_coding() {
            // 8 payload bits in every 10 line bits
            ChannelCoding::Dp8b10b => bps / 10,
            // 128 payload bits in every 132 line bits
            ChannelCoding::Dp128b132b => bps * 16 / 132,
        }
    }
}

impl Display for LinkRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mbps = self.mbps();
        write!(f, "{}.{:02} Gb/s", mbps / 1000, mbps % 1000 / 10)
    }
}

/// Pixel encoding of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorFormat {
    Rgb,
    Yuv444,
    Yuv422,
    Yuv420,
}

/// Parameters of one stream being admitted or driven.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModesetInfo {
    pub pixel_clock_khz: u32,
    pub active_width: u32,
    pub active_height: u32,
    pub total_width: u32,
    pub total_height: u32,
    /// Effective bits per pixel on the wire (pre-DSC).
    pub bpp: u32,
    pub bits_per_component: u8,
    pub color_format: ColorFormat,
    pub audio_channels: u8,
    pub audio_freq_hz: u32,
}

impl Default for ColorFormat {
    fn default() -> Self {
        ColorFormat::Rgb
    }
}

impl ModesetInfo {
    /// Returns `true` when any parameter that must be non-zero is zero.
    pub fn has_zero_params(&self) -> bool {
        self.pixel_clock_khz == 0 || self.active_width == 0 || self.active_height == 0 || self.bpp == 0
    }

    /// Uncompressed stream bandwidth in bytes per second.
    pub fn data_rate_bytes_per_sec(&self) -> u64 {
        self.pixel_clock_khz as u64 * 1000 * self.bpp as u64 / 8
    }
}

/// SST lane bandwidth bookkeeping for one mode on one link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Watermark {
    pub tu_size: u32,
    pub water_mark: u32,
    pub hblank_symbols: u32,
    pub vblank_symbols: u32,
}

/// Transfer unit size in symbols for SST framing.
const TU_SIZE: u64 = 64;

/// Minimum usable horizontal blanking in link symbols per lane.
const MIN_HBLANK_SYMBOLS: u64 = 12;
/// Extra blanking symbols consumed by FEC parity insertion.
const FEC_HBLANK_SYMBOLS: u64 = 32;

/// One main link: lane count, per-lane rate and negotiated framing options.
///
/// `lanes == 0` is the canonical "no link" value produced by total training
/// failure and by [`LinkConfiguration::invalid()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkConfiguration {
    pub lanes: u8,
    pub peak_rate: LinkRate,
    pub enhanced_framing: bool,
    pub multistream: bool,
    pub fec_enabled: bool,
    pub downspread: bool,
}

impl LinkConfiguration {
    pub fn new(lanes: u8, peak_rate: LinkRate) -> Self {
        LinkConfiguration {
            lanes,
            peak_rate,
            enhanced_framing: true,
            multistream: false,
            fec_enabled: false,
            downspread: false,
        }
    }

    /// The "no link" configuration.
    pub fn invalid() -> Self {
        Self::new(0, LinkRate::Rbr)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.lanes, 1 | 2 | 4)
    }

    /// Raw link bandwidth in bytes per second across all lanes.
    pub fn total_data_rate(&self) -> u64 {
        self.lanes as u64 * self.peak_rate.data_rate()
    }

    /// Link bandwidth available to payload, after FEC overhead.
    pub fn usable_data_rate(&self) -> u64 {
        let total = self.total_data_rate();
        if self.fec_enabled {
            total * FEC_PAYLOAD_NUM / FEC_PAYLOAD_DEN
        } else {
            total
        }
    }

    /// Total PBN this link can carry. One PBN is 54/64 MB/s.
    pub fn pbn_total(&self) -> u32 {
        (self.usable_data_rate() * 64 / 54_000_000) as u32
    }

    /// PBN carried by a single timeslot (1/64th of the frame).
    pub fn pbn_per_slot(&self) -> u32 {
        self.pbn_total() / 64
    }

    /// Timeslots needed to carry `pbn` on this link. `None` when the link
    /// carries no bandwidth at all.
    pub fn slots_for_pbn(&self, pbn: u32) -> Option<u8> {
        let per_slot = self.pbn_per_slot();
        if per_slot == 0 {
            return None;
        }
        let slots = div_round_up(pbn as u64, per_slot as u64);
        if slots > PAYLOAD_SLOTS as u64 {
            return None;
        }
        Some(slots as u8)
    }

    /// Steps down to the next configuration with a strictly lower total
    /// data rate, staying within this configuration's lane count and rate.
    /// At equal data rates the wider link wins. Returns `None` from the
    /// bottom of the chain.
    pub fn fallback(&self) -> Option<LinkConfiguration> {
        let current = self.total_data_rate();
        let mut best: Option<(u64, u8, LinkRate)> = None;

        for lanes in [4u8, 2, 1] {
            if lanes > self.lanes {
                continue;
            }
            for rate in LinkRate::ALL {
                if rate > self.peak_rate {
                    continue;
                }
                let total = lanes as u64 * rate.data_rate();
                if total >= current {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((b, blanes, _)) => total > b || (total == b && lanes > blanes),
                };
                if better {
                    best = Some((total, lanes, rate));
                }
            }
        }

        best.map(|(_, lanes, peak_rate)| LinkConfiguration {
            lanes,
            peak_rate,
            ..*self
        })
    }

    /// Computes SST lane bookkeeping for `mi`, or `None` when the mode does
    /// not fit the link's payload bandwidth or blanking budget.
    pub fn watermark(&self, mi: &ModesetInfo) -> Option<Watermark> {
        if !self.is_valid() || mi.has_zero_params() {
            return None;
        }

        let link_bytes = self.usable_data_rate();
        let stream_bytes = mi.data_rate_bytes_per_sec();
        if stream_bytes >= link_bytes {
            return None;
        }

        // Average payload symbols per transfer unit, rounded up, plus a
        // small margin against pixel clock jitter.
        let payload = div_round_up(stream_bytes * TU_SIZE, link_bytes);
        let water_mark = (payload + 4).min(TU_SIZE - 1);

        let pixel_hz = mi.pixel_clock_khz as u64 * 1000;
        let symbols_per_lane = self.peak_rate.data_rate();
        let hblank = (mi.total_width - mi.active_width) as u64;
        let hblank_symbols = hblank * symbols_per_lane / pixel_hz;

        let mut min_hblank = MIN_HBLANK_SYMBOLS;
        if self.fec_enabled {
            min_hblank += FEC_HBLANK_SYMBOLS;
        }
        if hblank_symbols < min_hblank {
            return None;
        }

        let vblank_symbols = mi.total_width as u64 * symbols_per_lane / pixel_hz;

        Some(Watermark {
            tu_size: TU_SIZE as u32,
            water_mark: water_mark as u32,
            hblank_symbols: hblank_symbols as u32,
            vblank_symbols: vblank_symbols as u32,
        })
    }
}

impl Display for LinkConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "invalid");
        }
        write!(f, "{} x {}", self.lanes, self.peak_rate)?;
        if self.multistream {
            write!(f, " MST")?;
        }
        if self.fec_enabled {
            write!(f, " FEC")?;
        }
        Ok(())
    }
}

/// PBN needed for a stream of `bytes_per_sec`, including the 0.6% capacity
/// margin the payload bandwidth calculation mandates.
pub fn pbn_for_data_rate(bytes_per_sec: u64) -> u32 {
    div_round_up(bytes_per_sec * 64 * 1006, 54_000_000 * 1000) as u32
}

/// PBN needed for the uncompressed stream described by `mi`.
pub fn pbn_for_mode(mi: &ModesetInfo) -> u32 {
    pbn_for_data_rate(mi.data_rate_bytes_per_sec())
}
