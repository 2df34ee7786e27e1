// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Display Stream Compression capability plumbing.
//!
//! The PPS computation itself lives in an external codec library; this
//! module defines the capability snapshot handed to it, the solver trait
//! the connector calls through, and the error taxonomy admission control
//! reports back to the driver. Each error variant maps to a different
//! corrective action on the driver side, so they are never collapsed.

use thiserror::Error;

use crate::link::ModesetInfo;

/// Default DSC target of 10 bpp, in 1/16 bpp units.
pub const DSC_DEFAULT_BPP_X16: u32 = 160;

/// Maximum-compression retry target of 8 bpp, in 1/16 bpp units.
pub const DSC_MAX_COMPRESSION_BPP_X16: u32 = 128;

/// DSC capability snapshot for one decompression point.
///
/// Built from the sink's DSC capability DPCD range and, for a stream
/// decompressed at a branch, clamped by the branch's own limits.
#[derive(Clone, Copy, Debug, Default)]
pub struct DscCaps {
    pub supported: bool,
    pub version_major: u8,
    pub version_minor: u8,
    /// Highest slice count the decoder accepts.
    pub max_slice_count: u8,
    /// Decoder throughput in megapixels per second.
    pub throughput_mps: u32,
    /// Highest output bpp the decoder accepts, in 1/16 bpp units.
    pub max_bpp_x16: u32,
    /// Line buffer depth in bits.
    pub line_buffer_bit_depth: u8,
    /// Decoder accepts native YCbCr 4:2:0 input.
    pub native_420: bool,
    pub block_prediction: bool,
}

/// Result of a successful PPS computation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DscOutput {
    /// Achieved compressed rate in 1/16 bpp units.
    pub bits_per_pixel_x16: u32,
    pub slice_count: u8,
    pub slice_width: u32,
    /// Picture parameter set to splice into the stream.
    pub pps: [u8; 128],
}

/// Why the PPS computation rejected a mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DscError {
    #[error("color format not compressible by the decoder")]
    ColorFormat,
    #[error("no admissible slice count")]
    SliceCount,
    #[error("mode exceeds decoder throughput")]
    Throughput,
    #[error("horizontal blanking too small for compressed transport")]
    Hblank,
    #[error("target bpp not representable at the decoder's precision")]
    BppPrecision,
}

/// External PPS solver collaborator.
///
/// `target_bpp_x16` is the compressed rate to aim for; the solver may
/// settle below it but never above. Admission control first asks for
/// [`DSC_DEFAULT_BPP_X16`] and retries once at
/// [`DSC_MAX_COMPRESSION_BPP_X16`] before giving up.
pub trait DscSolver {
    fn solve(&self, mi: &ModesetInfo, caps: &DscCaps, target_bpp_x16: u32) -> Result<DscOutput, DscError>;
}

/// Compressed stream bandwidth in bytes per second at `bpp_x16`.
pub fn compressed_data_rate(mi: &ModesetInfo, bpp_x16: u32) -> u64 {
    mi.pixel_clock_khz as u64 * 1000 * bpp_x16 as u64 / 16 / 8
}
