// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Bandwidth admission control: the compound query.
//!
//! Before committing a modeset the driver opens a query session, attaches
//! every stream it intends to drive, and closes the session. Each attach
//! answers feasibility for its own stream; the aggregate verdict (can all
//! attached streams run together) is the session result returned by
//! `end_compound_query`. Only one session exists at a time and nothing
//! here touches hardware; admission is pure arithmetic over the assessed
//! link, the inferred per-hop capacities and the DSC solver.

use thiserror::Error;

use crate::connector::Connector;
use crate::dsc::{
    compressed_data_rate, DscError, DscOutput, DSC_DEFAULT_BPP_X16, DSC_MAX_COMPRESSION_BPP_X16,
};
use crate::link::{pbn_for_data_rate, pbn_for_mode, ColorFormat, LinkConfiguration, ModesetInfo, PAYLOAD_SLOTS};
use crate::topology::{DeviceId, HopBandwidth, QueryScratch};

/// Driver's DSC stance for one attach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DscMode {
    /// Never compress this stream.
    Never,
    /// Compress if the uncompressed stream does not fit.
    Allowed,
    /// The stream must be compressed; failure to solve is fatal.
    Forced,
}

/// Why an attach was rejected. Every rejection carries its specific
/// reason; the driver maps each to a different corrective action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("insufficient link bandwidth")]
    InsufficientBandwidth,
    #[error("insufficient link bandwidth even with compression")]
    InsufficientBandwidthDsc,
    #[error("watermark or blanking budget infeasible")]
    WatermarkBlanking,
    #[error("zero-valued or invalid parameter")]
    InvalidParameter,
    #[error("audio frequency above 48 kHz not enabled")]
    AudioFrequency,
    #[error("converter output bandwidth insufficient")]
    ConverterBandwidth,
    #[error("insufficient tunneling bandwidth")]
    InsufficientTunnelBandwidth,
    #[error(transparent)]
    Dsc(#[from] DscError),
}

/// Per-attach admission verdict details.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachInfo {
    /// PBN the stream will consume (post-compression when `dsc` is set).
    pub pbn: u32,
    /// Timeslots consumed on the root link. Zero for SST.
    pub slots: u8,
    pub dsc: Option<DscOutput>,
    /// SST only: the configuration admission assumed, when it differs
    /// from the assessed one (watermark erratum path).
    pub link: Option<LinkConfiguration>,
}

/// Accumulator alive between begin and end.
pub(crate) struct CompoundSession {
    pub(crate) attaches: u32,
    pub(crate) local_pbn: u32,
    pub(crate) tunnel_bytes: u64,
    pub(crate) failed: bool,
    pub(crate) link: LinkConfiguration,
}

impl Connector {
    /// Opens an admission session. Per-device scratch is initialized from
    /// the assessed link and the streams already running.
    pub fn begin_compound_query(&mut self) {
        debug_assert!(self.compound.is_none(), "compound query already open");

        let mut link = self.highest_assessed;
        link.multistream = self.multistream;
        self.compound = Some(CompoundSession {
            attaches: 0,
            local_pbn: 0,
            tunnel_bytes: 0,
            failed: false,
            link,
        });

        for id in self.topology.ids() {
            let depth_hop = self
                .topology
                .get(id)
                .map(|r| match r.max_link {
                    Some((lanes, rate)) if r.address.size() > 0 => {
                        let mut hop = LinkConfiguration::new(lanes, rate);
                        hop.multistream = true;
                        hop
                    }
                    _ => link,
                })
                .unwrap_or(link);
            if let Some(record) = self.topology.get_mut(id) {
                record.query = QueryScratch::default();
                record.hop = Some(HopBandwidth {
                    link: depth_hop,
                    total_pbn: depth_hop.pbn_total(),
                });
            }
        }

        // Streams already on the air occupy their slots on every hop of
        // their sinks' paths.
        let committed: Vec<(u8, Vec<DeviceId>)> = self
            .payload
            .groups()
            .iter()
            .filter(|g| g.has_slots())
            .map(|g| (g.count, g.devices.clone()))
            .collect();
        for (count, devices) in committed {
            let mut charged = Vec::new();
            for sink in devices {
                for hop in self.topology.path_to(sink) {
                    if charged.contains(&hop) {
                        continue;
                    }
                    charged.push(hop);
                    if let Some(record) = self.topology.get_mut(hop) {
                        record.query.slots = record.query.slots.saturating_add(count);
                    }
                }
            }
        }
    }

    /// Closes the session. `true` means every attach passed and the
    /// aggregate also fits the link.
    pub fn end_compound_query(&mut self) -> bool {
        debug_assert!(self.compound.is_some(), "unbalanced end_compound_query");
        match self.compound.take() {
            Some(session) => !session.failed,
            None => false,
        }
    }

    /// Admission check for one stream to `device`. The session keeps
    /// accumulating regardless of the verdict; a rejected attach marks
    /// the whole session failed.
    pub fn compound_query_attach(
        &mut self,
        device: DeviceId,
        mi: &ModesetInfo,
        dsc_mode: DscMode,
    ) -> Result<AttachInfo, QueryError> {
        debug_assert!(self.compound.is_some(), "attach outside compound query");

        let index = match self.compound.as_mut() {
            Some(session) => {
                debug_assert!(session.attaches < 64, "too many attaches in one session");
                let index = session.attaches;
                session.attaches += 1;
                index
            }
            None => return Err(QueryError::InvalidParameter),
        };

        let result = self.attach_inner(device, mi, dsc_mode, index);
        if let Some(session) = self.compound.as_mut() {
            match &result {
                Ok(info) => {
                    session.local_pbn += info.pbn;
                    if session.link.multistream && session.local_pbn > session.link.pbn_total() {
                        log::debug!(
                            "aggregate {} PBN exceeds link capacity {}",
                            session.local_pbn,
                            session.link.pbn_total()
                        );
                        session.failed = true;
                    }
                }
                Err(error) => {
                    log::debug!("attach for {device} rejected: {error}");
                    session.failed = true;
                }
            }
        }
        result
    }

    fn attach_inner(
        &mut self,
        device: DeviceId,
        mi: &ModesetInfo,
        dsc_mode: DscMode,
        index: u32,
    ) -> Result<AttachInfo, QueryError> {
        if mi.has_zero_params() {
            return Err(QueryError::InvalidParameter);
        }
        if mi.audio_freq_hz > 48_000 && !self.policy.enable_audio_beyond_48k {
            return Err(QueryError::AudioFrequency);
        }
        self.check_converter_clamp(device, mi)?;

        let info = if self.multistream {
            self.attach_mst(device, mi, dsc_mode, index)?
        } else {
            self.attach_sst(device, mi, dsc_mode)?
        };

        // Tunneled connectors additionally fit inside the granted budget.
        if let Some(capacity) = self.mainlink.tunnel_capacity() {
            let bytes = match &info.dsc {
                Some(dsc) => compressed_data_rate(mi, dsc.bits_per_pixel_x16),
                None => mi.data_rate_bytes_per_sec(),
            };
            if let Some(session) = self.compound.as_mut() {
                session.tunnel_bytes += bytes;
                if session.tunnel_bytes > capacity {
                    return Err(QueryError::InsufficientTunnelBandwidth);
                }
            }
        }

        Ok(info)
    }

    /// TMDS/analog converter dongles clamp at their own output clock, with
    /// the YCbCr 4:2:0 half-rate allowance.
    fn check_converter_clamp(&self, device: DeviceId, mi: &ModesetInfo) -> Result<(), QueryError> {
        let record = match self.topology.get(device) {
            Some(record) => record,
            None => return Err(QueryError::InvalidParameter),
        };
        if record.legacy && record.max_tmds_clock_khz > 0 {
            let mut clock = mi.pixel_clock_khz;
            if mi.color_format == ColorFormat::Yuv420 {
                clock /= 2;
            }
            if clock > record.max_tmds_clock_khz {
                return Err(QueryError::ConverterBandwidth);
            }
        }
        Ok(())
    }

    fn dsc_eligible(&self, device: DeviceId) -> bool {
        let record = match self.topology.get(device) {
            Some(record) => record,
            None => return false,
        };
        let decompressor = match record.dsc_decompression_device {
            Some(other) => self.topology.get(other).map(|r| r.dsc_caps.supported).unwrap_or(false),
            None => record.dsc_caps.supported,
        };
        decompressor
            && self.mainlink.supports_dsc()
            && self.mainlink.supports_fec()
            && record.fec_path_capable
    }

    fn solve_dsc(&mut self, device: DeviceId, mi: &ModesetInfo, target_x16: u32) -> Result<DscOutput, DscError> {
        let caps = match self.topology.get(device) {
            Some(record) => match record.dsc_decompression_device.and_then(|d| self.topology.get(d)) {
                Some(dec) => dec.dsc_caps,
                None => record.dsc_caps,
            },
            None => return Err(DscError::ColorFormat),
        };
        self.dsc_solver.solve(mi, &caps, target_x16)
    }

    fn attach_mst(
        &mut self,
        device: DeviceId,
        mi: &ModesetInfo,
        dsc_mode: DscMode,
        index: u32,
    ) -> Result<AttachInfo, QueryError> {
        let base_pbn = pbn_for_mode(mi);

        // DSC feasibility settles first; a passing bpp can still fail the
        // per-hop arithmetic below when the bottleneck is an intermediate
        // hop rather than the trained link.
        let mut dsc = None;
        if dsc_mode != DscMode::Never && mi.bits_per_component != 6 && self.dsc_eligible(device) {
            match self.solve_dsc(device, mi, DSC_DEFAULT_BPP_X16) {
                Ok(output) => dsc = Some(output),
                Err(_) => match self.solve_dsc(device, mi, DSC_MAX_COMPRESSION_BPP_X16) {
                    Ok(output) => dsc = Some(output),
                    Err(error) => {
                        if dsc_mode == DscMode::Forced {
                            return Err(QueryError::Dsc(error));
                        }
                    }
                },
            }
        } else if dsc_mode == DscMode::Forced {
            return Err(QueryError::Dsc(DscError::ColorFormat));
        }

        let pbn = match &dsc {
            Some(output) => pbn_for_data_rate(compressed_data_rate(mi, output.bits_per_pixel_x16)),
            None => base_pbn,
        };

        match self.charge_hops(device, pbn, index) {
            Ok(slots) => {
                return Ok(AttachInfo {
                    pbn,
                    slots,
                    dsc,
                    link: None,
                })
            }
            Err(_) => {
                // One lower-bpp retry of the generic check, when allowed
                // and there is still compression headroom.
                if self.policy.enable_lower_bpp_retry {
                    if let Some(output) = &dsc {
                        if output.bits_per_pixel_x16 > DSC_MAX_COMPRESSION_BPP_X16 {
                            if let Ok(retry) = self.solve_dsc(device, mi, DSC_MAX_COMPRESSION_BPP_X16) {
                                let pbn = pbn_for_data_rate(compressed_data_rate(mi, retry.bits_per_pixel_x16));
                                if let Ok(slots) = self.charge_hops(device, pbn, index) {
                                    return Ok(AttachInfo {
                                        pbn,
                                        slots,
                                        dsc: Some(retry),
                                        link: None,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }

        Err(if dsc.is_some() {
            QueryError::InsufficientBandwidthDsc
        } else {
            QueryError::InsufficientBandwidth
        })
    }

    /// Charges `pbn` to every hop on the path to `device` under attach
    /// `index`. Checked first, committed only when every hop fits, so a
    /// failed attach leaves the scratch untouched.
    fn charge_hops(&mut self, device: DeviceId, pbn: u32, index: u32) -> Result<u8, QueryError> {
        let path = self.topology.path_to(device);
        if path.is_empty() {
            return Err(QueryError::InvalidParameter);
        }
        let bit = 1u64 << (index % 64);

        let mut planned: Vec<(DeviceId, u8)> = Vec::with_capacity(path.len());
        let mut root_slots = 0;
        for (i, hop) in path.iter().enumerate() {
            let record = match self.topology.get(*hop) {
                Some(record) => record,
                None => return Err(QueryError::InvalidParameter),
            };
            let link = match record.hop {
                Some(hop_bw) => hop_bw.link,
                None => return Err(QueryError::InvalidParameter),
            };
            let slots = link.slots_for_pbn(pbn).ok_or(QueryError::InsufficientBandwidth)?;
            if i == 0 {
                root_slots = slots;
            }
            let already = record.query.attach_mask & bit != 0;
            let total = if already {
                record.query.slots
            } else {
                record.query.slots.saturating_add(slots)
            };
            if total > PAYLOAD_SLOTS {
                return Err(QueryError::InsufficientBandwidth);
            }
            if !already {
                planned.push((*hop, slots));
            }
        }

        for (hop, slots) in planned {
            if let Some(record) = self.topology.get_mut(hop) {
                record.query.slots += slots;
                record.query.attach_mask |= bit;
            }
        }
        Ok(root_slots)
    }

    fn attach_sst(&mut self, device: DeviceId, mi: &ModesetInfo, dsc_mode: DscMode) -> Result<AttachInfo, QueryError> {
        let link = match self.compound.as_ref() {
            Some(session) => session.link,
            None => return Err(QueryError::InvalidParameter),
        };
        let pbn = pbn_for_mode(mi);

        // Uncompressed, no FEC overhead, comes first.
        if let Some(wm) = link.watermark(mi) {
            self.sst_watermark = Some(wm);
            return Ok(AttachInfo {
                pbn,
                slots: 0,
                dsc: None,
                link: None,
            });
        }

        // Watermark erratum: a lower configuration without FEC may pass
        // the blanking budget the full-rate one fails.
        if self.policy.watermark_erratum_war {
            let mut candidate = link;
            candidate.fec_enabled = false;
            while let Some(next) = candidate.fallback() {
                candidate = next;
                if let Some(wm) = candidate.watermark(mi) {
                    self.sst_watermark = Some(wm);
                    return Ok(AttachInfo {
                        pbn,
                        slots: 0,
                        dsc: None,
                        link: Some(candidate),
                    });
                }
            }
        }

        if dsc_mode != DscMode::Never && mi.bits_per_component != 6 && self.dsc_eligible(device) {
            let output = self
                .solve_dsc(device, mi, DSC_DEFAULT_BPP_X16)
                .or_else(|_| self.solve_dsc(device, mi, DSC_MAX_COMPRESSION_BPP_X16))
                .map_err(QueryError::Dsc)?;

            // DSC transport requires FEC.
            let mut fec_link = link;
            fec_link.fec_enabled = true;
            let mut compressed = *mi;
            compressed.bpp = output.bits_per_pixel_x16 / 16;
            if let Some(wm) = fec_link.watermark(&compressed) {
                self.sst_watermark = Some(wm);
                return Ok(AttachInfo {
                    pbn: pbn_for_data_rate(compressed_data_rate(mi, output.bits_per_pixel_x16)),
                    slots: 0,
                    dsc: Some(output),
                    link: Some(fec_link),
                });
            }
            return Err(QueryError::InsufficientBandwidthDsc);
        }

        Err(QueryError::WatermarkBlanking)
    }
}
