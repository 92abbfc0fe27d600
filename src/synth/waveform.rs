use crate::synth::prelude::PI_F64;

/// Synthesized partial waveforms. PCM partials play ROM samples instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    #[default]
    Square,
    /// The LA chip's "sawtooth": the pulse wave multiplied by a cosine at the same pitch.
    Sawtooth,
}

impl Waveform {
    pub fn from_param(raw: u8) -> Self {
        if raw & 1 == 0 {
            Waveform::Square
        } else {
            Waveform::Sawtooth
        }
    }
}

/// Peak level of the generated sawtooth. The pulse is the difference of two
/// of these, which leaves headroom for filter resonance.
pub const WG_AMPLITUDE: f64 = 8192.0;

/// Table steps advanced per output sample at the note's nominal pitch.
pub const WG_OVERSAMPLE: f64 = 4.0;

/// Table length for one period of a note with the given frequency.
pub fn period_len(frequency: f64, sample_rate: f64) -> usize {
    ((sample_rate / frequency) * WG_OVERSAMPLE).round().max(8.0) as usize
}

/// Harmonics that fit below Nyquist for a note of the given frequency.
pub fn harmonic_limit(frequency: f64, sample_rate: f64) -> usize {
    ((sample_rate * 0.5 / frequency).floor() as usize).max(1)
}

/// One period of a band-limited sawtooth, `len` samples long with at most
/// `harmonics` partials.
///
/// Each sample is the running integral of the Dirichlet kernel
/// `sum(cos(k x))`, so the whole table costs O(len) instead of
/// O(len * harmonics).
pub fn bandlimited_saw(len: usize, harmonics: usize) -> Vec<i16> {
    let h = harmonics.max(1) as f64;
    let dx = 2.0 * PI_F64 / len as f64;
    let kernel = |x: f64| -> f64 {
        let denom = (x * 0.5).sin();
        if denom.abs() < 1e-12 {
            h
        } else {
            ((h + 0.5) * x).sin() / (2.0 * denom) - 0.5
        }
    };

    let mut integral = Vec::with_capacity(len + 1);
    let mut acc = 0.0;
    let mut prev = kernel(0.0);
    integral.push(0.0);
    for n in 1..=len {
        let cur = kernel(n as f64 * dx);
        acc += (prev + cur) * 0.5 * dx;
        integral.push(acc);
        prev = cur;
    }

    // One full period integrates to zero; remove the quadrature drift.
    let drift = integral[len];
    let scale = WG_AMPLITUDE * 2.0 / PI_F64;
    (0..len)
        .map(|n| {
            let v = integral[n] - drift * n as f64 / len as f64;
            (v * scale).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}

/// One period of a full-scale cosine, `len` samples long.
pub fn cosine(len: usize) -> Vec<i16> {
    (0..len)
        .map(|n| ((2.0 * PI_F64 * n as f64 / len as f64).cos() * i16::MAX as f64).round() as i16)
        .collect()
}

/// Offsets between the two sawtooth read heads for pulse widths 0..=100.
/// Width 0 is a square wave, 100 a narrow pulse.
pub fn pulse_offsets(len: usize) -> [u32; 101] {
    let mut offsets = [0u32; 101];
    for (pw, slot) in offsets.iter_mut().enumerate() {
        let duty = 0.5 - pw as f64 * 0.0046;
        *slot = (len as f64 * duty).round() as u32;
    }
    offsets
}
