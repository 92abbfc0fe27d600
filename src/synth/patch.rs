//! Resolved, ready-to-play parameters for one timbre partial.

use super::params::{PartialParam, PatchTemp, TimbreParam};
use super::structure::{pair_position, pair_slot, MixType, Structure};
use super::tables::KEYFOLLOW;
use super::waveform::Waveform;

/// A bias point: a key and which side of it the bias applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BiasPoint {
    pub note: u32,
    pub above: bool,
}

impl BiasPoint {
    /// Decodes a 0..=127 bias point parameter: `<A1..<C7` then `>A1..>C7`.
    pub fn from_param(raw: u8) -> Self {
        Self {
            note: 33 + (raw & 0x3F) as u32,
            above: raw >= 64,
        }
    }

    /// Key distance past the point on the biased side, 0 otherwise.
    pub fn distance(&self, key: u32) -> usize {
        if self.above {
            key.saturating_sub(self.note) as usize
        } else {
            self.note.saturating_sub(key) as usize
        }
    }
}

/// Left/right gains in 0..=32767.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StereoVolume {
    pub left: i32,
    pub right: i32,
}

impl Default for StereoVolume {
    fn default() -> Self {
        Self::from_pan(64)
    }
}

impl StereoVolume {
    /// MIDI pan 0..=127, 64 is centre. The near side stays at full level.
    pub fn from_pan(pan: u8) -> Self {
        let pan = pan.min(127) as i32;
        match pan.cmp(&64) {
            std::cmp::Ordering::Less => Self {
                left: 32767,
                right: pan * 512,
            },
            std::cmp::Ordering::Equal => Self {
                left: 32767,
                right: 32767,
            },
            std::cmp::Ordering::Greater => Self {
                left: (127 - pan) * 520,
                right: 32767,
            },
        }
    }

    /// Panpot parameter 0..=14, 7 is centre.
    pub fn from_panpot(panpot: u8) -> Self {
        Self::from_pan(panpot_to_pan(panpot))
    }
}

/// Keyfollow parameter 0..=16 as a 12-bit ratio.
pub fn fix_keyfollow(raw: u8) -> i32 {
    KEYFOLLOW[raw.min(16) as usize]
}

/// Bias level parameter 0..=12 (panel -12..0) as attenuation steps, 12 = strongest.
pub fn fix_bias_level(raw: u8) -> usize {
    12 - raw.min(12) as usize
}

pub fn panpot_to_pan(panpot: u8) -> u8 {
    let panpot = panpot.min(14) as u32;
    if panpot == 7 {
        64
    } else {
        (panpot * 127 / 14) as u8
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatchCache {
    pub play_partial: bool,
    pub pcm_partial: bool,
    pub pcm: usize,
    pub waveform: Waveform,
    pub mix_type: MixType,
    /// 0 or 1 inside the pair.
    pub structure_position: usize,
    /// Timbre slot of the other half of the pair.
    pub structure_pair: usize,
    /// Partials the whole timbre plays.
    pub partial_count: usize,
    pub sustain: bool,
    pub reverb: bool,
    /// Pitch at key 60 in 1/256 semitones, expressed as a note number.
    pub pitch: i32,
    /// 4096 = one semitone per key.
    pub pitch_keyfollow: i32,
    /// Patch key shift and fine tune, 1/256 semitones.
    pub pitch_shift: i32,
    pub use_bender: bool,
    pub filt_keyfollow: i32,
    pub tvf_bias: BiasPoint,
    pub amp_bias: [BiasPoint; 2],
    /// Attenuation amount 0..=12 for each amp bias point.
    pub amp_bias_level: [usize; 2],
    /// Range-checked copy of the timbre's partial block.
    pub param: PartialParam,
    /// Fixed pan for drum notes; melodic notes follow the part.
    pub pan: Option<StereoVolume>,
    /// Set until the entry has been built from a timbre.
    pub dirty: bool,
}

impl PatchCache {
    pub fn empty() -> Self {
        Self {
            dirty: true,
            ..Self::default()
        }
    }

    /// Resolves timbre partial `slot` for playback with `patch` settings.
    pub fn from_timbre(timbre: &TimbreParam, slot: usize, patch: &PatchTemp) -> Self {
        let common = &timbre.common;
        let structure = Structure::for_slot(common, slot);
        let position = pair_position(slot);
        let param = sanitize(&timbre.partial[slot]);
        let wg = &param.wg;

        Self {
            play_partial: (common.pmute >> slot) & 1 == 1,
            pcm_partial: structure.is_pcm(position),
            pcm: wg.pcmwave as usize,
            waveform: Waveform::from_param(wg.waveform),
            mix_type: structure.mix_type(),
            structure_position: position,
            structure_pair: pair_slot(slot),
            partial_count: (common.pmute & 0x0F).count_ones() as usize,
            sustain: common.nosustain == 0,
            reverb: patch.patch.reverb_switch != 0,
            pitch: (wg.coarse as i32 + 24) * 256 + (wg.fine as i32 - 50) * 256 / 100,
            pitch_keyfollow: fix_keyfollow(wg.keyfollow),
            pitch_shift: (patch.patch.key_shift.min(48) as i32 - 24) * 256
                + (patch.patch.fine_tune.min(100) as i32 - 50) * 256 / 100,
            use_bender: wg.bender != 0,
            filt_keyfollow: fix_keyfollow(param.tvf.keyfollow),
            tvf_bias: BiasPoint::from_param(param.tvf.biaspoint),
            amp_bias: [
                BiasPoint::from_param(param.tva.biaspoint1),
                BiasPoint::from_param(param.tva.biaspoint2),
            ],
            amp_bias_level: [
                fix_bias_level(param.tva.biaslevel1),
                fix_bias_level(param.tva.biaslevel2),
            ],
            param,
            pan: None,
            dirty: false,
        }
    }
}

/// Clamps every field to its documented range so table lookups stay in bounds.
fn sanitize(p: &PartialParam) -> PartialParam {
    let mut p = *p;
    let wg = &mut p.wg;
    wg.coarse = wg.coarse.min(96);
    wg.fine = wg.fine.min(100);
    wg.keyfollow = wg.keyfollow.min(16);
    wg.pcmwave = wg.pcmwave.min(127);
    wg.pulsewid = wg.pulsewid.min(100);
    wg.pwvelo = wg.pwvelo.min(14);

    let env = &mut p.env;
    env.depth = env.depth.min(10);
    env.sensitivity = env.sensitivity.min(100);
    env.timekeyfollow = env.timekeyfollow.min(4);
    clamp_all(&mut env.time, 100);
    clamp_all(&mut env.level, 100);

    p.lfo.rate = p.lfo.rate.min(100);
    p.lfo.depth = p.lfo.depth.min(100);
    p.lfo.modsense = p.lfo.modsense.min(100);

    let tvf = &mut p.tvf;
    tvf.cutoff = tvf.cutoff.min(100);
    tvf.resonance = tvf.resonance.min(30);
    tvf.keyfollow = tvf.keyfollow.min(16);
    tvf.biaslevel = tvf.biaslevel.min(14);
    tvf.envdepth = tvf.envdepth.min(100);
    tvf.envsense = tvf.envsense.min(100);
    tvf.envdkf = tvf.envdkf.min(4);
    tvf.envtkf = tvf.envtkf.min(4);
    clamp_all(&mut tvf.envtime, 100);
    clamp_all(&mut tvf.envlevel, 100);

    let tva = &mut p.tva;
    tva.level = tva.level.min(100);
    tva.velosens = tva.velosens.min(100);
    tva.biaslevel1 = tva.biaslevel1.min(12);
    tva.biaslevel2 = tva.biaslevel2.min(12);
    tva.envtkf = tva.envtkf.min(4);
    tva.envvkf = tva.envvkf.min(4);
    clamp_all(&mut tva.envtime, 100);
    clamp_all(&mut tva.envlevel, 100);
    p
}

fn clamp_all(values: &mut [u8], max: u8) {
    for v in values {
        *v = (*v).min(max);
    }
}
