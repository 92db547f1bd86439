//! Fixed-width bit-vector values
//!
//! Every signal in the netlist stores a `u64` masked to its declared width,
//! so widths are limited to 1..=64 bits.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

use crate::error::{Result, SimError};

pub const MAX_WIDTH: u32 = 64;

#[inline(always)]
pub fn mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

pub fn check_width(name: &str, width: u32) -> Result<()> {
    if width == 0 || width > MAX_WIDTH {
        return Err(SimError::InvalidWidth { name: name.to_string(), width });
    }
    Ok(())
}

/// A value of a fixed bit width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bits {
    width: u32,
    value: u64,
}

impl Bits {
    /// Truncates `value` to `width` bits
    #[inline]
    pub fn new(width: u32, value: u64) -> Self {
        debug_assert!(width > 0 && width <= MAX_WIDTH, "invalid width {}", width);
        Self { width, value: value & mask(width) }
    }

    pub fn try_new(width: u32, value: u64) -> Result<Self> {
        check_width("Bits", width)?;
        Ok(Self::new(width, value))
    }

    pub fn zero(width: u32) -> Self {
        Self::new(width, 0)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn bit(&self, idx: u32) -> bool {
        idx < self.width && (self.value >> idx) & 1 == 1
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Bits `lo..hi` as a new value of width `hi - lo`
    pub fn slice(&self, lo: u32, hi: u32) -> Self {
        debug_assert!(lo < hi && hi <= self.width);
        Self::new(hi - lo, self.value >> lo)
    }

    /// `hi` in the upper bits, `lo` in the lower bits
    pub fn concat(hi: Bits, lo: Bits) -> Self {
        debug_assert!(
            hi.width + lo.width <= MAX_WIDTH,
            "concat of {} and {} bits exceeds {}",
            hi.width,
            lo.width,
            MAX_WIDTH
        );
        Self::new(hi.width + lo.width, hi.value.checked_shl(lo.width).unwrap_or(0) | lo.value)
    }

    pub fn try_concat(hi: Bits, lo: Bits) -> Result<Self> {
        let width = hi.width + lo.width;
        check_width("concat", width)?;
        Ok(Self::concat(hi, lo))
    }

    pub fn zext(&self, width: u32) -> Self {
        debug_assert!(width >= self.width);
        Self::new(width, self.value)
    }

    pub fn trunc(&self, width: u32) -> Self {
        debug_assert!(width <= self.width);
        Self::new(width, self.value)
    }
}

impl Add for Bits {
    type Output = Bits;

    fn add(self, rhs: Bits) -> Bits {
        Bits::new(self.width, self.value.wrapping_add(rhs.value))
    }
}

impl Add<u64> for Bits {
    type Output = Bits;

    fn add(self, rhs: u64) -> Bits {
        Bits::new(self.width, self.value.wrapping_add(rhs))
    }
}

impl Sub for Bits {
    type Output = Bits;

    fn sub(self, rhs: Bits) -> Bits {
        Bits::new(self.width, self.value.wrapping_sub(rhs.value))
    }
}

impl PartialOrd for Bits {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bits {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value).then(self.width.cmp(&other.width))
    }
}

impl PartialEq<u64> for Bits {
    fn eq(&self, other: &u64) -> bool {
        self.value == *other
    }
}

impl From<Bits> for u64 {
    fn from(b: Bits) -> u64 {
        b.value
    }
}

/// Zero-padded lowercase hex, one digit per nibble of width
impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.width.div_ceil(4) as usize;
        write!(f, "{:0digits$x}", self.value, digits = digits)
    }
}
