//! Fixed-point scalars.
//!
//! Every value the engine stores is a signed two's-complement integer with a
//! fixed binary point. `Fixed<BITS, FRAC>` keeps the raw integer in an `i32`
//! and interprets it as `raw / 2^FRAC`.
//!
//! Conversion to `f64` is exact: any `i32` fits in the 53-bit mantissa and the
//! scale is a power of two. Conversion from floating point rounds to nearest
//! (ties away from zero) and saturates at the representable range.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operations shared by every fixed-point format the engine uses.
pub trait FixedScalar:
    Copy + Default + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Total width including the sign bit.
    const TOTAL_BITS: u32;
    /// Bits after the binary point.
    const FRAC_BITS: u32;

    fn from_raw(raw: i32) -> Self;
    fn raw(self) -> i32;

    /// Exact floating value.
    fn to_f64(self) -> f64;

    /// Round and saturate; the flag reports whether the input was out of range
    /// (or NaN, which maps to zero).
    fn from_f64_saturating(value: f64) -> (Self, bool);

    fn from_f64(value: f64) -> Self {
        Self::from_f64_saturating(value).0
    }
}

/// Signed fixed-point value with `BITS` total bits, `FRAC` of them fractional.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fixed<const BITS: u32, const FRAC: u32>(i32);

impl<const BITS: u32, const FRAC: u32> Fixed<BITS, FRAC> {
    const FORMAT_OK: () = assert!(BITS >= 2 && BITS <= 32 && FRAC < BITS);

    /// Largest raw value.
    pub const RAW_MAX: i32 = ((1_i64 << (BITS - 1)) - 1) as i32;
    /// Smallest raw value.
    pub const RAW_MIN: i32 = (-(1_i64 << (BITS - 1))) as i32;

    pub const ZERO: Self = Self(0);

    /// Value of one least-significant bit.
    pub fn resolution() -> f64 {
        1.0 / scale(FRAC)
    }

    pub fn max_value() -> f64 {
        f64::from(Self::RAW_MAX) / scale(FRAC)
    }

    pub fn min_value() -> f64 {
        f64::from(Self::RAW_MIN) / scale(FRAC)
    }
}

fn scale(frac: u32) -> f64 {
    2.0_f64.powi(frac as i32)
}

impl<const BITS: u32, const FRAC: u32> FixedScalar for Fixed<BITS, FRAC> {
    const TOTAL_BITS: u32 = BITS;
    const FRAC_BITS: u32 = FRAC;

    fn from_raw(raw: i32) -> Self {
        let () = Self::FORMAT_OK;
        Self(raw.clamp(Self::RAW_MIN, Self::RAW_MAX))
    }

    fn raw(self) -> i32 {
        self.0
    }

    fn to_f64(self) -> f64 {
        f64::from(self.0) / scale(FRAC)
    }

    fn from_f64_saturating(value: f64) -> (Self, bool) {
        let () = Self::FORMAT_OK;
        if value.is_nan() {
            return (Self(0), true);
        }
        let scaled = (value * scale(FRAC)).round();
        if scaled > f64::from(Self::RAW_MAX) {
            (Self(Self::RAW_MAX), true)
        } else if scaled < f64::from(Self::RAW_MIN) {
            (Self(Self::RAW_MIN), true)
        } else {
            (Self(scaled as i32), false)
        }
    }
}

impl<const BITS: u32, const FRAC: u32> fmt::Debug for Fixed<BITS, FRAC> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}.{}({})", BITS - FRAC, FRAC, self.to_f64())
    }
}

impl<const BITS: u32, const FRAC: u32> fmt::Display for Fixed<BITS, FRAC> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_f64(), f)
    }
}

/// Feature-map values: activations, positional embedding, scratch.
pub type Activation = Fixed<32, 20>;
/// Input image pixels.
pub type Pixel = Fixed<24, 16>;
/// Projection and expert matrices.
pub type LinearWeight = Fixed<24, 20>;
/// Patch-embedding convolution kernel.
pub type PatchEmbedWeight = LinearWeight;
/// Generic bias vectors.
pub type Bias = Fixed<24, 16>;
/// Attention projection biases.
pub type AttnBias = Bias;
/// Layer-norm scale vectors.
pub type NormWeight = Fixed<24, 16>;

/// Convert a slice of `f32` into fixed-point, returning the number of
/// saturated elements.
///
/// # Panics
///
/// Panics if `src` and `dst` differ in length.
pub fn quantize_into<T: FixedScalar>(src: &[f32], dst: &mut [T]) -> usize {
    assert_eq!(src.len(), dst.len(), "quantize length mismatch");
    let mut saturated = 0;
    for (s, d) in src.iter().zip(dst.iter_mut()) {
        let (v, sat) = T::from_f64_saturating(f64::from(*s));
        *d = v;
        saturated += usize::from(sat);
    }
    saturated
}
