// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Miscellaneous utility functions.

/// Similar to kernel's `GENMASK()` macro.
///
/// # Examples
/// ```
/// use dplink::genmask_t;
///
/// const LANE_STATUS_MASK: u8 = genmask_t!(u8, 2, 0);
/// const ADJUST_SWING_MASK: u8 = genmask_t!(u8, 1, 0);
/// ```
#[macro_export]
macro_rules! genmask_t {
    ($t:ty, $high:expr, $low:expr) => {{
        <$t>::MAX - (1 << $low) + 1 & (<$t>::MAX >> (<$t>::BITS - 1 - $high))
    }};
}

/// Integer ceiling division.
pub fn div_round_up(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Define a single bit within a register.
///
/// This type provides a compile time representation of how a given bit within
/// a register is to be parsed. The `get_bit()` and `set_bit()` methods operate
/// on an array slice that represents multiple consecutive bytes of DPCD space.
///
/// # Const Parameters
///
/// * `BYTE_OFFSET` - The index of the byte array at which the bit resides
/// * `BIT` - The bit offset within the byte
///
/// # Examples
/// ```
/// use dplink::util;
/// type InterlaneAlignDone = util::RegBit<0, 0>;
///
/// let mut raw = [0u8; 2];
/// InterlaneAlignDone::set_bit(&mut raw, true);
/// assert_eq!(raw[0], 1);
/// assert!(InterlaneAlignDone::get_bit(&raw));
/// ```
pub struct RegBit<const BYTE_OFFSET: usize, const BIT: u32>;

impl<const BYTE_OFFSET: usize, const BIT: u32> RegBit<BYTE_OFFSET, BIT> {
    const MASK: u8 = 1u8 << BIT;
    const SHIFT: u32 = BIT;

    pub fn get_bit(raw: &[u8]) -> bool {
        (raw[BYTE_OFFSET] & Self::MASK) >> Self::SHIFT != 0
    }

    pub fn set_bit(raw: &mut [u8], value: bool) {
        raw[BYTE_OFFSET] = (!Self::MASK & raw[BYTE_OFFSET]) | if value { Self::MASK } else { 0 };
    }
}

/// Define a field within a register.
///
/// See `RegBit` documentation for background.
///
/// # Const Parameters
///
/// * `BYTE_OFFSET` - The index of the byte array at which the field resides
/// * `HIGH` - The bit offset of the highest bit of the field
/// * `LOW` - The bit offset of the lowest bit of the field
pub struct RegField<const BYTE_OFFSET: usize, const HIGH: u32, const LOW: u32>;

impl<const BYTE_OFFSET: usize, const HIGH: u32, const LOW: u32> RegField<BYTE_OFFSET, HIGH, LOW> {
    const MASK: u8 = genmask_t!(u8, HIGH, LOW);
    const SHIFT: u32 = LOW;

    pub fn get_field(raw: &[u8]) -> u8 {
        (raw[BYTE_OFFSET] & Self::MASK) >> Self::SHIFT
    }

    pub fn set_field(raw: &mut [u8], value: u8) {
        raw[BYTE_OFFSET] = (!Self::MASK & raw[BYTE_OFFSET]) | (Self::MASK & (value << Self::SHIFT));
    }
}
