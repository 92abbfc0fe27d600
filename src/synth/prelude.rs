// Shared constants and fixed-point helpers

use rand::rngs::SmallRng;
use rand::SeedableRng;

pub use core::f32::consts::{FRAC_1_SQRT_2, PI};
pub use core::f64::consts::PI as PI_F64;

/// Frames per internal render chunk, and the length of every partial buffer.
pub const MAX_SAMPLE_OUTPUT: usize = 4096;
pub const MAX_PARTIALS_PER_POLY: usize = 4;
pub const MIDDLE_C: u32 = 60;

/// Sample rate the PCM ROM was recorded at.
pub const PCM_SAMPLE_RATE: f64 = 32000.0;

// Pitch, LFO and bend multipliers are 12-bit fixed point.
pub const FIXED_SHIFT: u32 = 12;
pub const FIXED_ONE: u32 = 1 << FIXED_SHIFT;

// Playback positions are 16.16.
pub const POS_SHIFT: u32 = 16;
pub const POS_ONE: u64 = 1 << POS_SHIFT;

/// Amplitude multipliers (volume curve, velocity, bias) are 10-bit.
pub const AMP_SHIFT: u32 = 10;
pub const AMP_ONE: u32 = 1 << AMP_SHIFT;

/// Multiplies two 12-bit fixed point values.
#[inline]
pub fn fixed_mul(a: u32, b: u32) -> u32 {
    ((a as u64 * b as u64) >> FIXED_SHIFT) as u32
}

#[inline]
pub fn saturate_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Seeded generator used wherever the synth needs noise or random spreads,
/// so renders are reproducible.
pub fn seeded_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}
