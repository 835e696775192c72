//! Fixed-point quantization arithmetic.
//!
//! # Quantization Contract
//!
//! An integer buffer of type `Q` is an affine encoding of floats in a
//! tracked `[min, max]` range. With `steps = 2^bits` and
//! `range_adjust = steps / (steps - 1)`:
//!
//! ```text
//! scale     = steps / ((max - min) * range_adjust)
//! quantized = round(value * scale) - round(min * scale) + Q::LOWEST
//! value     = min + (quantized - Q::LOWEST) / scale
//! ```
//!
//! Conversions clamp to the representable interval of `Q`. When a range
//! is degenerate (`min == max`) it is widened by `±1e-3` before scale
//! factors are derived; constant buffers (an all-zero bias, say) arise
//! from legitimate data and must keep the pipeline running with a finite,
//! well-defined result rather than abort.
//!
//! The product of two quantized operands lands in a wider accumulator
//! whose float range is derived analytically by
//! [`range_for_multiplication`]; [`quantize_down_and_shrink_range`] then
//! re-encodes the 32-bit accumulator to 8 bits using the *observed*
//! min/max, which is what lets chained quantized layers avoid
//! progressively losing precision to a static range estimate.

use crate::tensors::Float;

/// Epsilon used to widen degenerate ranges before deriving scales.
pub const RANGE_EPSILON: Float = 1e-3;

/// Fixed-width integer types usable as quantized encodings.
///
/// `LOWEST`/`HIGHEST` are the representable extremes as `i64` so range
/// math has room to detect overflow before clamping.
pub trait Quantized: Copy {
    /// Bit width of the encoding.
    const BITS: u32;
    /// Smallest representable value.
    const LOWEST: i64;
    /// Largest representable value.
    const HIGHEST: i64;

    /// Converts from a clamped `i64`.
    fn from_i64(v: i64) -> Self;
    /// Widens to `i64`.
    fn to_i64(self) -> i64;
}

impl Quantized for u8 {
    const BITS: u32 = 8;
    const LOWEST: i64 = u8::MIN as i64;
    const HIGHEST: i64 = u8::MAX as i64;

    fn from_i64(v: i64) -> Self {
        v as Self
    }

    fn to_i64(self) -> i64 {
        i64::from(self)
    }
}

impl Quantized for i32 {
    const BITS: u32 = 32;
    const LOWEST: i64 = i32::MIN as i64;
    const HIGHEST: i64 = i32::MAX as i64;

    fn from_i64(v: i64) -> Self {
        v as Self
    }

    fn to_i64(self) -> i64 {
        i64::from(self)
    }
}

/// Number of representable levels of `Q` as a float (`2^bits`).
fn steps<Q: Quantized>() -> f64 {
    (1u64 << Q::BITS) as f64
}

/// A tracked float interval an integer buffer encodes.
///
/// Invariant: `min <= max`. Construction widens a degenerate interval by
/// [`RANGE_EPSILON`] on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QRange {
    pub min: Float,
    pub max: Float,
}

impl QRange {
    /// Creates a range, widening `min == max` by [`RANGE_EPSILON`].
    ///
    /// # Panics
    /// Panics if `min > max`.
    #[must_use]
    pub fn new(min: Float, max: Float) -> Self {
        assert!(min <= max, "quantization range inverted: {min} > {max}");
        if min == max {
            Self {
                min: min - RANGE_EPSILON,
                max: max + RANGE_EPSILON,
            }
        } else {
            Self { min, max }
        }
    }

    /// Scans a buffer for its min/max. An empty buffer yields the
    /// (widened) zero range.
    #[must_use]
    pub fn of_slice(data: &[Float]) -> Self {
        let mut min = data.first().copied().unwrap_or(0.0);
        let mut max = min;
        for &v in data {
            min = min.min(v);
            max = max.max(v);
        }
        Self::new(min, max)
    }

    /// Like [`QRange::of_slice`] but always containing zero, the
    /// convention used for bias buffers.
    #[must_use]
    pub fn of_slice_with_zero(data: &[Float]) -> Self {
        let mut min: Float = 0.0;
        let mut max: Float = 0.0;
        for &v in data {
            min = min.min(v);
            max = max.max(v);
        }
        Self::new(min, max)
    }

    /// Width of the interval.
    #[must_use]
    pub fn span(&self) -> Float {
        self.max - self.min
    }

    /// Shifts both bounds, used when folding a bias range into an output
    /// range.
    #[must_use]
    pub fn offset(self, lo: Float, hi: Float) -> Self {
        Self {
            min: self.min + lo,
            max: self.max + hi,
        }
    }
}

/// Quantizes without clamping, in `i64` so overflow of narrower targets
/// is detectable by the caller.
#[must_use]
pub fn float_to_quantized_unclamped<Q: Quantized>(input: Float, range: QRange) -> i64 {
    let range_adjust = steps::<Q>() / (steps::<Q>() - 1.0);
    let span = f64::from(range.span()) * range_adjust;
    let range_scale = steps::<Q>() / span;
    let quantized = (f64::from(input) * range_scale).round() as i64
        - (f64::from(range.min) * range_scale).round() as i64;
    quantized + Q::LOWEST
}

/// Quantizes `input` into `Q`, saturating at the representable extremes.
#[must_use]
pub fn float_to_quantized<Q: Quantized>(input: Float, range: QRange) -> Q {
    let quantized = float_to_quantized_unclamped::<Q>(input, range);
    Q::from_i64(quantized.clamp(Q::LOWEST, Q::HIGHEST))
}

/// Recovers the float a quantized value encodes in `range`.
#[must_use]
pub fn quantized_to_float<Q: Quantized>(input: Q, range: QRange) -> Float {
    let range_adjust = steps::<Q>() / (steps::<Q>() - 1.0);
    let span = f64::from(range.span()) * range_adjust;
    let range_scale = span / steps::<Q>();
    let offset_input = (input.to_i64() - Q::LOWEST) as f64;
    (f64::from(range.min) + offset_input * range_scale) as Float
}

/// Float width of one quantization step of `Q` over `range`.
#[must_use]
pub fn float_for_one_quantized_level<Q: Quantized>(range: QRange) -> Float {
    range.span() / (Q::HIGHEST - Q::LOWEST) as Float
}

/// Analytic float range of a product accumulator.
///
/// Given operands encoded as `A` and `B` over the supplied ranges, the
/// product of one step of each scaled to the extremes of accumulator `C`
/// bounds every achievable accumulated value, so no legitimate int
/// accumulation overflows the derived range.
#[must_use]
pub fn range_for_multiplication<A: Quantized, B: Quantized, C: Quantized>(
    range_a: QRange,
    range_b: QRange,
) -> QRange {
    let a_level = float_for_one_quantized_level::<A>(range_a);
    let b_level = float_for_one_quantized_level::<B>(range_b);
    let c_level = a_level * b_level;
    QRange::new(
        c_level * C::LOWEST as Float,
        c_level * C::HIGHEST as Float,
    )
}

/// Quantizes a whole buffer into `Q` over `range`.
#[must_use]
pub fn quantize_slice<Q: Quantized>(data: &[Float], range: QRange) -> Vec<Q> {
    data.iter()
        .map(|&v| float_to_quantized::<Q>(v, range))
        .collect()
}

/// Dequantizes a whole buffer from `Q` over `range`.
#[must_use]
pub fn dequantize_slice<Q: Quantized>(data: &[Q], range: QRange) -> Vec<Float> {
    data.iter()
        .map(|&q| quantized_to_float::<Q>(q, range))
        .collect()
}

/// Re-encodes one value from its old range into a new one.
#[must_use]
pub fn requantize_in_new_range<I: Quantized, O: Quantized>(
    input: I,
    input_range: QRange,
    output_range: QRange,
) -> O {
    let as_float = quantized_to_float::<I>(input, input_range);
    float_to_quantized::<O>(as_float, output_range)
}

/// Requantizes a 32-bit accumulator down to 8 bits with a tightened range.
///
/// The new range is computed from the accumulator's *actual* min/max
/// (dequantized through `input_range`), with the minimum pinned at or
/// below zero so downstream integer kernels keep an exact zero point.
/// Returns the 8-bit buffer and the realized range. This second
/// requantization pass is what allows chaining quantized layers without
/// precision collapsing onto a static range estimate.
#[must_use]
pub fn quantize_down_and_shrink_range(input: &[i32], input_range: QRange) -> (Vec<u8>, QRange) {
    let mut actual_min = i32::MAX;
    let mut actual_max = i32::MIN;
    for &v in input {
        actual_min = actual_min.min(v);
        actual_max = actual_max.max(v);
    }
    if input.is_empty() {
        actual_min = 0;
        actual_max = 0;
    }

    let new_min = quantized_to_float::<i32>(actual_min, input_range).min(0.0);
    let new_max = quantized_to_float::<i32>(actual_max, input_range);
    let new_range = QRange::new(new_min, new_max.max(new_min));

    let output = input
        .iter()
        .map(|&v| requantize_in_new_range::<i32, u8>(v, input_range, new_range))
        .collect();
    (output, new_range)
}
