//! Deterministic fixed-point mathematics.
//!
//! Fluid volumes are integers; the fractional parameters that scale them
//! (densities, the diagonal seep modifier) are fixed-point so every platform
//! computes identical flows.

use fixed::types::I48F16;

/// Fixed-point number type used throughout the simulation.
///
/// Uses I48F16 format: 48 bits for the integer part, 16 bits for the fractional part.
pub type FixedNum = I48F16;

/// Scale an integer volume by a fixed-point factor, rounding toward zero.
///
/// Negative or overflowing results clamp to the `u32` range.
pub fn scale_volume(volume: u32, factor: FixedNum) -> u32 {
    let scaled = FixedNum::from_num(volume).saturating_mul(factor);
    if scaled <= FixedNum::ZERO {
        return 0;
    }
    scaled.saturating_to_num::<u32>()
}
