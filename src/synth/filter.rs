use crate::synth::prelude::{FRAC_1_SQRT_2, PI};

/// Cutoff steps in the coefficient table.
pub const FILTERGRAN: usize = 512;
/// Resonance settings 0..=30.
pub const RESONANCE_STEPS: usize = 31;
/// Two second-order sections of `[b0, b1, a1, a2]` each; `b2 == b0` for a lowpass.
pub const FILTER_COEFFS: usize = 8;

pub type FilterCoeffs = [f32; FILTER_COEFFS];

/// Lowest cutoff the table covers.
pub const MIN_CUTOFF_HZ: f32 = 20.0;

// Q of a 4-pole Butterworth split into two sections.
const BUTTERWORTH_Q1: f32 = 0.541_196_1;
const BUTTERWORTH_Q2: f32 = 1.306_563;

/// Highest cutoff the table covers for a given rate.
pub fn max_cutoff_hz(sample_rate: f32) -> f32 {
    sample_rate * 0.45
}

/// Octaves spanned by the cutoff table at `sample_rate`.
pub fn table_octaves(sample_rate: f32) -> f32 {
    (max_cutoff_hz(sample_rate) / MIN_CUTOFF_HZ).log2()
}

/// Cutoff frequency of table step `index`. Steps are evenly spaced in pitch.
pub fn cutoff_hz(index: usize, sample_rate: f32) -> f32 {
    let frac = index as f32 / (FILTERGRAN - 1) as f32;
    MIN_CUTOFF_HZ * 2f32.powf(frac * table_octaves(sample_rate))
}

/// Q multiplier applied to the resonant section for resonance 0..=30.
pub fn resonance_factor(resonance: usize) -> f32 {
    let r = resonance.min(RESONANCE_STEPS - 1) as f32 / (RESONANCE_STEPS - 1) as f32;
    1.0 + r * r * r * 7.0
}

/// RBJ cookbook lowpass section, normalised by a0.
fn lowpass_section(cutoff: f32, q: f32, sample_rate: f32) -> [f32; 4] {
    let cutoff = cutoff.max(1.0).min(sample_rate * 0.49);
    let q = q.max(FRAC_1_SQRT_2 * 0.5);

    let omega = 2.0 * PI * cutoff / sample_rate;
    let cos_omega = omega.cos();
    let alpha = omega.sin() / (2.0 * q);

    let a0 = 1.0 + alpha;
    let b0 = (1.0 - cos_omega) / 2.0 / a0;
    let b1 = (1.0 - cos_omega) / a0;
    let a1 = -2.0 * cos_omega / a0;
    let a2 = (1.0 - alpha) / a0;
    [b0, b1, a1, a2]
}

/// Coefficients of the 4-pole lowpass for one table cell. The first section
/// stays Butterworth; resonance raises the Q of the second.
pub fn design_lowpass(cutoff: f32, resonance: usize, sample_rate: f32) -> FilterCoeffs {
    let first = lowpass_section(cutoff, BUTTERWORTH_Q1, sample_rate);
    let second = lowpass_section(
        cutoff,
        BUTTERWORTH_Q2 * resonance_factor(resonance),
        sample_rate,
    );
    let mut out = [0.0; FILTER_COEFFS];
    out[..4].copy_from_slice(&first);
    out[4..].copy_from_slice(&second);
    out
}

/// Builds the whole `FILTERGRAN x 31` coefficient grid, flattened
/// cutoff-major.
pub fn build_coefficient_table(sample_rate: f32) -> Vec<FilterCoeffs> {
    let mut table = Vec::with_capacity(FILTERGRAN * RESONANCE_STEPS);
    for index in 0..FILTERGRAN {
        let cutoff = cutoff_hz(index, sample_rate);
        for res in 0..RESONANCE_STEPS {
            table.push(design_lowpass(cutoff, res, sample_rate));
        }
    }
    table
}

/// Running state of one partial's resonant filter.
#[derive(Clone, Debug, Default)]
pub struct ResonantFilter {
    // Direct form II delay elements, two per section.
    history: [f32; 4],
}

impl ResonantFilter {
    pub fn reset(&mut self) {
        self.history = [0.0; 4];
    }

    pub fn process(&mut self, input: f32, c: &FilterCoeffs) -> f32 {
        let mid = Self::section(&mut self.history[0..2], input, &c[0..4]);
        Self::section(&mut self.history[2..4], mid, &c[4..8])
    }

    #[inline]
    fn section(h: &mut [f32], input: f32, c: &[f32]) -> f32 {
        let w = input - c[2] * h[0] - c[3] * h[1];
        let out = c[0] * w + c[1] * h[0] + c[0] * h[1];
        h[1] = h[0];
        h[0] = w;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn settle(filter: &mut ResonantFilter, c: &FilterCoeffs, input: f32, n: usize) -> f32 {
        let mut out = 0.0;
        for _ in 0..n {
            out = filter.process(input, c);
        }
        out
    }

    #[test]
    fn test_dc_passes_with_unity_gain() {
        let c = design_lowpass(1000.0, 0, 32000.0);
        let mut f = ResonantFilter::default();
        assert_relative_eq!(settle(&mut f, &c, 1.0, 4000), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_nyquist_is_attenuated() {
        let c = design_lowpass(500.0, 0, 32000.0);
        let mut f = ResonantFilter::default();
        let mut peak: f32 = 0.0;
        for n in 0..4000 {
            let x = if n % 2 == 0 { 1.0 } else { -1.0 };
            let y = f.process(x, &c);
            if n > 2000 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 1e-3, "peak {peak}");
    }

    #[test]
    fn test_cutoff_steps_are_monotonic() {
        assert_relative_eq!(cutoff_hz(0, 32000.0), MIN_CUTOFF_HZ, epsilon = 1e-3);
        assert_relative_eq!(
            cutoff_hz(FILTERGRAN - 1, 32000.0),
            max_cutoff_hz(32000.0),
            max_relative = 1e-3
        );
        for i in 1..FILTERGRAN {
            assert!(cutoff_hz(i, 48000.0) > cutoff_hz(i - 1, 48000.0));
        }
    }

    #[test]
    fn test_resonance_factor_range() {
        assert_relative_eq!(resonance_factor(0), 1.0);
        assert_relative_eq!(resonance_factor(30), 8.0);
        assert_relative_eq!(resonance_factor(99), 8.0);
    }

    #[test]
    fn test_table_shape() {
        let table = build_coefficient_table(32000.0);
        assert_eq!(table.len(), FILTERGRAN * RESONANCE_STEPS);
        assert!(table.iter().flatten().all(|c| c.is_finite()));
    }
}
