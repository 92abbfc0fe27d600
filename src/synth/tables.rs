//! Lookup tables shared by every partial.
//!
//! Built once by [`Tables::init`] for a sample rate and master tune, then
//! read-only. The [`Synth`](super::Synth) owns them and only rebuilds them while
//! no partial is sounding.

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};
use crate::synth::config::{MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::synth::filter::{
    self, FilterCoeffs, FILTERGRAN, RESONANCE_STEPS,
};
use crate::synth::params::PcmWaveEntry;
use crate::synth::prelude::{
    seeded_rng, AMP_ONE, FIXED_ONE, MAX_SAMPLE_OUTPUT, PCM_SAMPLE_RATE, PI_F64, POS_ONE,
};
use crate::synth::waveform;

pub const NOTE_COUNT: usize = 128;
pub const SINTABLE_SIZE: usize = 65536;

/// Keyfollow ratios for parameter values 0..=16, 4096 = 1.0.
/// -1, -1/2, -1/4, 0, 1/8 ... 7/8, 1, 5/4, 3/2, 2, then the two stretch tunings.
pub const KEYFOLLOW: [i32; 17] = [
    -4096, -2048, -1024, 0, 512, 1024, 1536, 2048, 2560, 3072, 3584, 4096, 5120, 6144, 8192,
    4100, 4116,
];

/// Highest filter table step a partial may use.
pub const FILTER_INDEX_MAX: i32 = (FILTERGRAN * 15 / 16) as i32;

const NOISE_SEED: u64 = 0x4D54_3332;

/// Per-note synthesis data.
#[derive(Debug, Clone)]
pub struct NoteLookup {
    /// Length of one waveform period in table steps.
    pub div2: u32,
    /// 16.16 table steps per output sample for the synthesized waveforms.
    pub synth_delta: u32,
    /// 16.16 source samples per output sample, one per PCM wave.
    pub wav_table: Vec<u32>,
    /// Offset of the second sawtooth read head for each pulse width.
    pub saw_table: [u32; 101],
    /// One period of the band-limited sawtooth and of the cosine.
    pub waveforms: [Vec<i16>; 2],
}

impl NoteLookup {
    pub fn saw(&self) -> &[i16] {
        &self.waveforms[0]
    }

    pub fn cosine(&self) -> &[i16] {
        &self.waveforms[1]
    }
}

/// Per-key envelope keyfollow multipliers, 256 = 1.0.
#[derive(Debug, Clone, Copy)]
pub struct KeyLookup {
    pub env_time_mult: [u32; 5],
    pub env_depth_mult: [u32; 5],
}

#[derive(Debug, Clone)]
pub struct Tables {
    pub sample_rate: u32,
    pub master_tune_hz: f32,

    /// One LFO cycle, values 0..=100 around 50.
    pub sintable: Vec<u8>,
    /// `[depth][sine value]` pitch multiplier, 12-bit.
    pub lfo_shift: Vec<[u32; 101]>,
    /// `[depth 0..=10][level 0..=100]` pitch multiplier, 12-bit.
    pub pitch_env_val: Vec<[u32; 101]>,
    /// `[velocity][sensitivity]`, 10-bit.
    pub tva_velfollow_mult: Vec<[u32; 101]>,
    pub tvf_velfollow_mult: Vec<[u32; 101]>,
    /// `[attenuation 0..=12][key distance]`, 10-bit.
    pub tva_bias_mult: Vec<[u32; NOTE_COUNT]>,
    /// `[level 0..=14][key distance]`, cutoff offset in 1/256 parameter steps.
    pub tvf_bias_offset: Vec<[i32; NOTE_COUNT]>,
    /// `[follow 0..=4][velocity]` attack time multiplier, 256 = 1.0.
    pub env_time_velfollow_mult: Vec<[u32; NOTE_COUNT]>,
    /// `[sensitivity 0..=14][velocity]` pulse width offset.
    pub pw_velfollow_add: Vec<[i32; NOTE_COUNT]>,
    /// Level 0..=100 to a 10-bit amplitude multiplier.
    pub volume_mult: [u32; 101],
    /// 12-bit multiplier for each 1/256 of a semitone.
    pub fine_shift: [u32; 256],
    /// 12-bit multiplier for each semitone of an octave.
    pub semitone_mult: [u32; 12],
    /// Output gain compensation for each resonance setting.
    pub reson_inv: [f32; RESONANCE_STEPS],
    /// Modulator for ring structures with no partner partial.
    pub noise_buf: Vec<i16>,

    /// Envelope segment length in samples for a full-scale move, times 0..=100.
    pub env_time: [u32; 101],
    /// Release length in samples from full level, times 0..=100.
    pub env_decay_time: [u32; 101],
    /// LFO cycle length in samples, rates 0..=100.
    pub lfo_period: [u32; 101],
    /// `FILTERGRAN x RESONANCE_STEPS` coefficient grid.
    pub filt_coeff: Vec<FilterCoeffs>,
    /// Maps a cutoff in 1/256 parameter steps to a filter table step, 16.16.
    pub cutoff_index_scale: i64,

    pub note_lookups: Vec<NoteLookup>,
    pub key_lookups: Vec<KeyLookup>,
}

impl Tables {
    /// Builds every table. Fails on an unusable rate or tune, or on a PCM
    /// wave that does not fit inside `pcm_len` samples.
    pub fn init(
        pcm_waves: &[PcmWaveEntry],
        pcm_len: usize,
        sample_rate: u32,
        master_tune_hz: f32,
    ) -> Result<Self> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample rate {sample_rate} outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}"
            )));
        }
        if !master_tune_hz.is_finite() || master_tune_hz <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "master tune {master_tune_hz} Hz is not a usable frequency"
            )));
        }
        let fs = sample_rate as f64;

        let note_lookups = (0..NOTE_COUNT)
            .map(|note| Self::init_note(note, fs, master_tune_hz as f64, pcm_waves, pcm_len))
            .collect::<Result<Vec<_>>>()?;

        let octaves = filter::table_octaves(sample_rate as f32) as f64;
        let cutoff_index_scale =
            (((FILTERGRAN - 1) as f64 * 65536.0) / (2560.0 * octaves)).round() as i64;

        let tables = Self {
            sample_rate,
            master_tune_hz,
            sintable: build_sintable(),
            lfo_shift: build_lfo_shift(),
            pitch_env_val: build_pitch_env_val(),
            tva_velfollow_mult: build_velfollow(2.0),
            tvf_velfollow_mult: build_velfollow(1.0),
            tva_bias_mult: build_tva_bias(),
            tvf_bias_offset: build_tvf_bias(),
            env_time_velfollow_mult: build_env_time_velfollow(),
            pw_velfollow_add: build_pw_velfollow(),
            volume_mult: build_volume_mult(),
            fine_shift: std::array::from_fn(|i| {
                (FIXED_ONE as f64 * 2f64.powf(i as f64 / (256.0 * 12.0))).round() as u32
            }),
            semitone_mult: std::array::from_fn(|i| {
                (FIXED_ONE as f64 * 2f64.powf(i as f64 / 12.0)).round() as u32
            }),
            reson_inv: std::array::from_fn(|r| 1.0 / filter::resonance_factor(r).sqrt()),
            noise_buf: build_noise(),
            env_time: std::array::from_fn(|t| secs_to_samples(env_time_secs(t), fs)),
            env_decay_time: std::array::from_fn(|t| secs_to_samples(env_decay_secs(t), fs)),
            lfo_period: std::array::from_fn(|r| secs_to_samples(1.0 / lfo_rate_hz(r), fs)),
            filt_coeff: filter::build_coefficient_table(sample_rate as f32),
            cutoff_index_scale,
            note_lookups,
            key_lookups: (0..NOTE_COUNT).map(build_key_lookup).collect(),
        };
        debug!(
            sample_rate,
            master_tune_hz,
            pcm_waves = pcm_waves.len(),
            "lookup tables built"
        );
        Ok(tables)
    }

    /// Builds the lookup for one note: frequency from the master tune, one
    /// band-limited period of each synth waveform, and the playback step of
    /// every PCM wave.
    pub fn init_note(
        note: usize,
        sample_rate: f64,
        master_tune_hz: f64,
        pcm_waves: &[PcmWaveEntry],
        pcm_len: usize,
    ) -> Result<NoteLookup> {
        let freq = master_tune_hz * 2f64.powf((note as f64 - 69.0) / 12.0);
        let len = waveform::period_len(freq, sample_rate);
        let harmonics = waveform::harmonic_limit(freq, sample_rate);
        let synth_delta = (len as f64 * POS_ONE as f64 * freq / sample_rate).round() as u32;

        let tune_ratio = master_tune_hz / 440.0;
        let key_pitch = note as f64 * 4096.0 / 12.0;
        let mut wav_table = Vec::with_capacity(pcm_waves.len());
        for (index, wave) in pcm_waves.iter().enumerate() {
            wave.validate(index, pcm_len)?;
            let ratio = 2f64.powf((key_pitch - wave.pitch as f64) / 4096.0)
                * (PCM_SAMPLE_RATE / sample_rate)
                * tune_ratio;
            let delta = (ratio * POS_ONE as f64).round().clamp(1.0, (u32::MAX >> 4) as f64);
            wav_table.push(delta as u32);
        }

        Ok(NoteLookup {
            div2: len as u32,
            synth_delta: synth_delta.max(1),
            wav_table,
            saw_table: waveform::pulse_offsets(len),
            waveforms: [
                waveform::bandlimited_saw(len, harmonics),
                waveform::cosine(len),
            ],
        })
    }

    /// 12-bit multiplier for a pitch offset in 1/256 semitones.
    pub fn pitch_mult(&self, pitch: i32) -> u32 {
        let octave = pitch.div_euclid(12 * 256);
        let rem = pitch.rem_euclid(12 * 256) as usize;
        let mult =
            (self.semitone_mult[rem >> 8] as u64 * self.fine_shift[rem & 0xFF] as u64) >> 12;
        if octave >= 0 {
            (mult << octave.min(20)).min(u32::MAX as u64) as u32
        } else {
            (mult >> (-octave).min(40)) as u32
        }
    }

    pub fn filter_coeffs(&self, index: i32, resonance: usize) -> &FilterCoeffs {
        let index = index.clamp(0, FILTER_INDEX_MAX) as usize;
        &self.filt_coeff[index * RESONANCE_STEPS + resonance.min(RESONANCE_STEPS - 1)]
    }

    /// Filter table step for a cutoff in 1/256 parameter steps (100 params
    /// span 20 Hz to about 20 kHz, ten steps per octave).
    pub fn cutoff_index(&self, cutoff_p256: i32) -> i32 {
        ((cutoff_p256 as i64 * self.cutoff_index_scale) >> 16)
            .clamp(0, FILTER_INDEX_MAX as i64) as i32
    }

    pub fn note(&self, note: usize) -> &NoteLookup {
        &self.note_lookups[note.min(NOTE_COUNT - 1)]
    }

    pub fn key(&self, key: usize) -> &KeyLookup {
        &self.key_lookups[key.min(NOTE_COUNT - 1)]
    }
}

fn secs_to_samples(secs: f64, fs: f64) -> u32 {
    (secs * fs).round().max(1.0) as u32
}

fn env_time_secs(t: usize) -> f64 {
    if t == 0 {
        0.0
    } else {
        0.001 * 2f64.powf(t as f64 / 7.5)
    }
}

fn env_decay_secs(t: usize) -> f64 {
    0.002 * 2f64.powf(t as f64 / 8.0)
}

fn lfo_rate_hz(rate: usize) -> f64 {
    0.1 * 2f64.powf(rate as f64 / 13.1)
}

fn build_sintable() -> Vec<u8> {
    (0..SINTABLE_SIZE)
        .map(|i| {
            let s = (2.0 * PI_F64 * i as f64 / SINTABLE_SIZE as f64).sin();
            (50.0 + 50.0 * s).round() as u8
        })
        .collect()
}

// Depth 100 swings the pitch by 1.5 semitones either way.
fn build_lfo_shift() -> Vec<[u32; 101]> {
    (0..=100)
        .map(|depth| {
            std::array::from_fn(|val| {
                let semis = (val as f64 - 50.0) / 50.0 * depth as f64 / 100.0 * 1.5;
                (FIXED_ONE as f64 * 2f64.powf(semis / 12.0)).round() as u32
            })
        })
        .collect()
}

// Depth 10 reaches one octave at the level extremes.
fn build_pitch_env_val() -> Vec<[u32; 101]> {
    (0..=10)
        .map(|depth| {
            std::array::from_fn(|level| {
                let octaves = (level as f64 - 50.0) / 50.0 * depth as f64 / 10.0;
                (FIXED_ONE as f64 * 2f64.powf(octaves)).round() as u32
            })
        })
        .collect()
}

/// Velocity curves: sensitivity 100 applies `(vel/127)^curve`, 0 ignores velocity.
fn build_velfollow(curve: f64) -> Vec<[u32; 101]> {
    (0..NOTE_COUNT)
        .map(|vel| {
            std::array::from_fn(|sens| {
                let v = vel as f64 / 127.0;
                let exp = curve * sens as f64 / 100.0;
                (AMP_ONE as f64 * v.powf(exp)).round() as u32
            })
        })
        .collect()
}

fn build_tva_bias() -> Vec<[u32; NOTE_COUNT]> {
    (0..=12)
        .map(|amount| {
            std::array::from_fn(|dist| {
                let db = amount as f64 * dist as f64 / 12.0;
                (AMP_ONE as f64 * 10f64.powf(-db / 20.0)).round() as u32
            })
        })
        .collect()
}

// Full level moves the cutoff an octave per octave of key distance.
fn build_tvf_bias() -> Vec<[i32; NOTE_COUNT]> {
    (0..=14)
        .map(|level| {
            std::array::from_fn(|dist| (level as i32 - 7) * dist as i32 * 2560 / (7 * 12))
        })
        .collect()
}

fn build_env_time_velfollow() -> Vec<[u32; NOTE_COUNT]> {
    (0..5)
        .map(|follow| {
            std::array::from_fn(|vel| {
                let octaves = -(vel as f64 - 64.0) / 64.0 * follow as f64 / 2.0;
                (256.0 * 2f64.powf(octaves)).round() as u32
            })
        })
        .collect()
}

fn build_pw_velfollow() -> Vec<[i32; NOTE_COUNT]> {
    (0..15)
        .map(|sens| std::array::from_fn(|vel| (sens as i32 - 7) * (vel as i32 - 64) * 50 / (7 * 64)))
        .collect()
}

fn build_volume_mult() -> [u32; 101] {
    std::array::from_fn(|i| {
        if i == 0 {
            0
        } else {
            let db = (i as f64 - 100.0) * 0.45;
            (AMP_ONE as f64 * 10f64.powf(db / 20.0)).round() as u32
        }
    })
}

fn build_noise() -> Vec<i16> {
    let mut rng = seeded_rng(NOISE_SEED);
    let amp = waveform::WG_AMPLITUDE as i16;
    (0..MAX_SAMPLE_OUTPUT)
        .map(|_| rng.random_range(-amp..=amp))
        .collect()
}

fn build_key_lookup(key: usize) -> KeyLookup {
    let octaves_from_c = (key as f64 - 60.0) / 12.0;
    KeyLookup {
        env_time_mult: std::array::from_fn(|follow| {
            (256.0 * 2f64.powf(octaves_from_c * follow as f64 / 4.0)).round() as u32
        }),
        env_depth_mult: std::array::from_fn(|follow| {
            (256.0 * 2f64.powf(-octaves_from_c * follow as f64 / 4.0))
                .round()
                .min(1024.0) as u32
        }),
    }
}
