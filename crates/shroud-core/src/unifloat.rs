//! UniFloat: compact log-float wire encoding for exchange rates
//!
//! rates travel as a 32-bit unsigned integer whose numeric order equals the
//! order of the rates they encode, so a store can index requests by the raw
//! wire value and scan them in rate order. layout: 8-bit exponent biased by
//! 128 in the high bits, 24-bit mantissa fraction below it. wire value 0 is
//! reserved for rate 0.
//!
//! `decode(wire, step)` shifts by whole wire steps before decoding; scans use
//! it to compute the next representable rate in the scan direction.

/// width of the wire encoding in bits
pub const UNIFLOAT_BITS: u32 = 32;
/// width of the wire encoding in bytes
pub const UNIFLOAT_WIRE_BYTES: usize = 4;
/// largest encodable wire value
pub const UNIFLOAT_WIRE_MAX: u64 = (1u64 << UNIFLOAT_BITS) - 1;

const MANTISSA_BITS: u32 = 24;
const MANTISSA_MASK: u64 = (1 << MANTISSA_BITS) - 1;
const EXPONENT_BIAS: i32 = 128;

/// encode a positive rate, rounding to the nearest representable value.
/// non-positive rates encode as 0.
pub fn wire_encode(rate: f64) -> u64 {
    if !(rate > 0.0) || !rate.is_finite() {
        if rate > 0.0 {
            return UNIFLOAT_WIRE_MAX;
        }
        return 0;
    }

    // rate = (1 + frac) * 2^exp with frac in [0, 1)
    let exp = rate.log2().floor() as i32;
    let frac = rate / (exp as f64).exp2() - 1.0;
    let mut mantissa = (frac * (1u64 << MANTISSA_BITS) as f64).round() as u64;
    let mut biased = exp + EXPONENT_BIAS;

    if mantissa > MANTISSA_MASK {
        mantissa = 0;
        biased += 1;
    }
    if biased < 0 {
        return 0;
    }
    if biased > 0xff {
        return UNIFLOAT_WIRE_MAX;
    }
    ((biased as u64) << MANTISSA_BITS) | mantissa
}

/// decode a wire value back to a rate
pub fn wire_decode(wire: u64) -> f64 {
    wire_decode_step(wire, 0)
}

/// decode `wire` shifted by `step` wire positions, clamped to the encodable
/// range. a positive step yields the next representable rate above, a
/// negative step the next below.
pub fn wire_decode_step(wire: u64, step: i32) -> f64 {
    let shifted = (wire as i64 + step as i64).clamp(0, UNIFLOAT_WIRE_MAX as i64) as u64;
    if shifted == 0 {
        return 0.0;
    }
    let biased = (shifted >> MANTISSA_BITS) as i32;
    let mantissa = shifted & MANTISSA_MASK;
    let frac = mantissa as f64 / (1u64 << MANTISSA_BITS) as f64;
    (1.0 + frac) * ((biased - EXPONENT_BIAS) as f64).exp2()
}
