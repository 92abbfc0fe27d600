#![allow(dead_code)]

use mt32synth::synth::params::{PcmWaveEntry, RhythmTemp, TimbreParam, RHYTHM_FIRST_KEY};
use mt32synth::synth::prelude::MAX_SAMPLE_OUTPUT;
use mt32synth::synth::{SoundBank, Synth, SynthConfig};

pub const SINE_LEN: usize = 256;

/// Programs of the test bank.
pub const PROGRAM_SUSTAIN: u8 = 0;
pub const PROGRAM_NOSUSTAIN: u8 = 1;
pub const PROGRAM_RING: u8 = 2;
pub const PROGRAM_PCM: u8 = 3;
pub const PROGRAM_ONE_SHOT: u8 = 4;

/// Drum key mapped to memory timbre 0 (absolute 128).
pub const KICK_KEY: u8 = 36;
pub const KICK_DRUM: usize = (KICK_KEY as u32 - RHYTHM_FIRST_KEY) as usize;

pub fn sine_samples() -> Vec<i16> {
    (0..SINE_LEN)
        .map(|i| {
            let phase = i as f64 / SINE_LEN as f64 * std::f64::consts::TAU;
            (phase.sin() * 30000.0) as i16
        })
        .collect()
}

/// A single synthesized square partial with a fast attack.
pub fn sustain_timbre(name: &str) -> TimbreParam {
    let mut t = TimbreParam::silent(name);
    t.common.pmute = 0b0001;
    t.common.nosustain = 0;
    for p in t.partial.iter_mut() {
        p.wg.coarse = 36;
        p.wg.fine = 50;
        p.wg.keyfollow = 11;
        p.wg.bender = 1;
        p.wg.pulsewid = 50;
        p.env.level = [50; 5];
        p.lfo.rate = 50;
        p.lfo.modsense = 100;
        p.tvf.cutoff = 100;
        p.tvf.keyfollow = 3;
        p.tvf.biaslevel = 7;
        p.tva.level = 100;
        p.tva.biaslevel1 = 12;
        p.tva.biaslevel2 = 12;
        p.tva.envtime = [1, 1, 1, 1, 10];
        p.tva.envlevel = [100, 100, 100, 100];
    }
    t
}

pub fn nosustain_timbre() -> TimbreParam {
    let mut t = sustain_timbre("Pluck");
    t.common.nosustain = 1;
    t
}

/// Two synthesized partials ring-modulated together, plus an unpaired
/// ring partial in the second pair.
pub fn ring_timbre() -> TimbreParam {
    let mut t = sustain_timbre("Bell");
    t.common.pstruct12 = 9;
    t.common.pstruct34 = 9;
    t.common.pmute = 0b0111;
    t.partial[1].wg.coarse = 43;
    t
}

pub fn pcm_timbre() -> TimbreParam {
    let mut t = sustain_timbre("Sampled");
    // Both partials PCM, mixed.
    t.common.pstruct12 = 5;
    t.partial[0].wg.pcmwave = 0;
    t
}

/// A PCM partial on the non-looping wave.
pub fn one_shot_timbre() -> TimbreParam {
    let mut t = pcm_timbre();
    t.partial[0].wg.pcmwave = 1;
    t
}

pub fn test_bank() -> SoundBank {
    let wave = PcmWaveEntry {
        addr: 0,
        len: SINE_LEN,
        loop_wave: true,
        pitch: 60 * 4096 / 12,
    };
    let one_shot = PcmWaveEntry {
        loop_wave: false,
        ..wave
    };
    let mut bank = SoundBank::new(vec![wave, one_shot], sine_samples());
    bank.timbres[PROGRAM_SUSTAIN as usize] = sustain_timbre("Sustain");
    bank.timbres[PROGRAM_NOSUSTAIN as usize] = nosustain_timbre();
    bank.timbres[PROGRAM_RING as usize] = ring_timbre();
    bank.timbres[PROGRAM_PCM as usize] = pcm_timbre();
    bank.timbres[PROGRAM_ONE_SHOT as usize] = one_shot_timbre();
    bank.timbres[128] = nosustain_timbre();
    bank.rhythm_settings[KICK_DRUM] = RhythmTemp {
        timbre: 0,
        output_level: 100,
        panpot: 3,
        reverb_switch: 0,
    };
    bank
}

/// Reverb off so released notes end in exact silence.
pub fn dry_config() -> SynthConfig {
    SynthConfig {
        reverb_enabled: false,
        ..SynthConfig::default()
    }
}

pub fn open_synth(config: SynthConfig) -> Synth {
    Synth::open(config, test_bank()).unwrap()
}

pub fn render_frames(synth: &mut Synth, frames: usize) -> Vec<i16> {
    let mut out = vec![0i16; frames * 2];
    synth.render(&mut out);
    out
}

pub fn peak(samples: &[i16]) -> i32 {
    samples.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0)
}

/// Renders until no partial is active. Returns false if that takes more than
/// `max_blocks` blocks.
pub fn render_until_idle(synth: &mut Synth, max_blocks: usize) -> bool {
    for _ in 0..max_blocks {
        if synth.active_partial_count() == 0 {
            return true;
        }
        render_frames(synth, MAX_SAMPLE_OUTPUT);
    }
    synth.active_partial_count() == 0
}

/// Packs a three-byte short message.
pub fn msg(status: u8, data1: u8, data2: u8) -> u32 {
    status as u32 | (data1 as u32) << 8 | (data2 as u32) << 16
}
