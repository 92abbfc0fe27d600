use super::envelope::{EnvelopeStatus, EnvelopeType, ENVELOPE_TYPES};
use super::filter::ResonantFilter;
use super::params::PcmWaveEntry;
use super::patch::{BiasPoint, PatchCache, StereoVolume};
use super::prelude::{
    fixed_mul, saturate_i16, AMP_SHIFT, FIXED_ONE, FIXED_SHIFT, MAX_SAMPLE_OUTPUT, MIDDLE_C,
    POS_ONE, POS_SHIFT,
};
use super::rom::PcmData;
use super::tables::{Tables, NOTE_COUNT};
use super::waveform::Waveform;

/// Identifies the poly a partial plays for. `serial` is the poly's age stamp,
/// so a reused poly slot never matches partials from an earlier note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolyRef {
    pub part: usize,
    pub slot: usize,
    pub serial: u64,
}

/// Part-level controls a partial follows while it sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartControls {
    /// Combined part volume, 10-bit.
    pub volume: u32,
    pub pan: StereoVolume,
    /// -8192..=8191
    pub bend: i32,
    /// Semitones at full bend.
    pub bender_range: u32,
    /// 0..=127
    pub modulation: u32,
}

impl Default for PartControls {
    fn default() -> Self {
        Self {
            volume: 1 << AMP_SHIFT,
            pan: StereoVolume::default(),
            bend: 0,
            bender_range: 12,
            modulation: 0,
        }
    }
}

/// One synthesis unit: a PCM or synthesized waveform with its own pitch,
/// filter and amplitude envelopes.
#[derive(Debug, Clone)]
pub struct Partial {
    owner_part: Option<usize>,
    poly: Option<PolyRef>,
    /// Snapshot of the cache entry the note started with.
    cache: PatchCache,
    pub(crate) pair: Option<usize>,
    /// Ring structure with no partner: the noise buffer is the modulator.
    pub(crate) use_noise_pair: bool,
    pub(crate) buffer: Vec<i32>,
    pub(crate) already_outputted: bool,
    age: u64,
    play: bool,
    pedal_held: bool,

    key: u32,
    velocity: u32,
    note_val: usize,
    /// Remainder of the keyfollowed pitch below `note_val`, 1/256 semitones.
    pitch_frac: i32,
    fine_shift: u32,
    wave: Option<(usize, PcmWaveEntry)>,
    position: u64,
    pulse_width: usize,

    filt_val: i32,
    filt_env_depth: i32,
    amp_mult: u32,
    pitch_env_depth: usize,
    lfo_pos: u32,
    lfo_step: u32,
    lfo_depth: u32,
    bend_shift: i32,
    volume: u32,
    pan: StereoVolume,

    envs: [EnvelopeStatus; 3],
    filter: ResonantFilter,
}

impl Default for Partial {
    fn default() -> Self {
        Self::new()
    }
}

impl Partial {
    pub fn new() -> Self {
        Self {
            owner_part: None,
            poly: None,
            cache: PatchCache::empty(),
            pair: None,
            use_noise_pair: false,
            buffer: vec![0; MAX_SAMPLE_OUTPUT],
            already_outputted: false,
            age: 0,
            play: false,
            pedal_held: false,
            key: MIDDLE_C,
            velocity: 0,
            note_val: MIDDLE_C as usize,
            pitch_frac: 0,
            fine_shift: FIXED_ONE,
            wave: None,
            position: 0,
            pulse_width: 50,
            filt_val: 0,
            filt_env_depth: 0,
            amp_mult: 0,
            pitch_env_depth: 0,
            lfo_pos: 0,
            lfo_step: 0,
            lfo_depth: 0,
            bend_shift: 0,
            volume: 0,
            pan: StereoVolume::default(),
            envs: Default::default(),
            filter: ResonantFilter::default(),
        }
    }

    /// Claims this partial for `part`. The partial stays silent until started.
    pub fn activate(&mut self, part: usize) {
        self.owner_part = Some(part);
        self.poly = None;
        self.play = false;
        self.pedal_held = false;
        self.already_outputted = false;
        self.buffer.fill(0);
    }

    /// Returns the partial to the free pool. Pair links are cleared by the pool.
    pub fn deactivate(&mut self) {
        self.owner_part = None;
        self.poly = None;
        self.pair = None;
        self.use_noise_pair = false;
        self.play = false;
        self.pedal_held = false;
    }

    pub fn is_active(&self) -> bool {
        self.owner_part.is_some()
    }

    pub fn is_bound_to(&self, poly: PolyRef) -> bool {
        self.is_active() && self.poly == Some(poly)
    }

    pub fn owner_part(&self) -> Option<usize> {
        self.owner_part
    }

    pub fn poly(&self) -> Option<PolyRef> {
        self.poly
    }

    pub fn pair(&self) -> Option<usize> {
        self.pair
    }

    /// Key the partial's pitch follows.
    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn cache(&self) -> &PatchCache {
        &self.cache
    }

    /// Still producing sound (or about to, on its next block).
    pub fn is_playing(&self) -> bool {
        self.is_active() && self.play
    }

    pub fn should_reverb(&self) -> bool {
        self.is_active() && self.cache.reverb
    }

    /// In its release phase.
    pub fn is_decaying(&self) -> bool {
        self.envs[EnvelopeType::Amp as usize].decaying
    }

    pub fn is_pedal_held(&self) -> bool {
        self.pedal_held
    }

    pub fn set_pedal_held(&mut self, held: bool) {
        self.pedal_held = held;
    }

    /// Current amplitude envelope level, 0..=100.
    pub fn amp_level(&self) -> i32 {
        self.envs[EnvelopeType::Amp as usize].prev_level
    }

    /// Starts sounding `key` with the resolved parameters in `cache`.
    #[allow(clippy::too_many_arguments)]
    pub fn start_partial(
        &mut self,
        poly: PolyRef,
        cache: &PatchCache,
        key: u32,
        velocity: u32,
        pair: Option<usize>,
        controls: &PartControls,
        tables: &Tables,
        pcm: &PcmData,
        age: u64,
    ) {
        self.poly = Some(poly);
        self.cache = *cache;
        self.pair = pair;
        self.use_noise_pair = pair.is_none() && cache.mix_type.uses_ring();
        self.age = age;
        self.key = key.min(NOTE_COUNT as u32 - 1);
        self.velocity = velocity.min(127);
        self.already_outputted = false;
        self.pedal_held = false;
        self.position = 0;
        self.lfo_pos = 0;
        self.filter.reset();

        self.wave = if cache.pcm_partial {
            pcm.waves.get(cache.pcm).map(|w| (cache.pcm, *w))
        } else {
            None
        };
        // A PCM partial whose wave is missing from the bank stays silent.
        self.play = !cache.pcm_partial || self.wave.is_some();

        let param = &cache.param;
        let vel = self.velocity as usize;
        let key = self.key;
        let key_idx = key as usize;
        let key_dist = |bias: &BiasPoint| bias.distance(key).min(NOTE_COUNT - 1);

        self.pulse_width = (param.wg.pulsewid as i32
            + tables.pw_velfollow_add[param.wg.pwvelo as usize][vel])
            .clamp(0, 100) as usize;

        let mut amp = tables.tva_velfollow_mult[vel][param.tva.velosens as usize];
        for (bias, level) in cache.amp_bias.iter().zip(cache.amp_bias_level) {
            amp = (amp * tables.tva_bias_mult[level][key_dist(bias)]) >> AMP_SHIFT;
        }
        self.amp_mult = amp;

        let key_offset = key_idx as i32 - MIDDLE_C as i32;
        self.filt_val = param.tvf.cutoff as i32 * 256
            + ((key_offset * 2560 * cache.filt_keyfollow / 12) >> FIXED_SHIFT)
            + tables.tvf_bias_offset[param.tvf.biaslevel as usize][key_dist(&cache.tvf_bias)];
        let depth = param.tvf.envdepth as i64
            * 128
            * tables.tvf_velfollow_mult[vel][param.tvf.envsense as usize] as i64
            * tables.key(key_idx).env_depth_mult[param.tvf.envdkf as usize] as i64;
        self.filt_env_depth = (depth >> (AMP_SHIFT + 8)) as i32;

        let sens = param.env.sensitivity as usize;
        let scaled = param.env.depth as usize * (100 - sens + sens * vel / 127) / 100;
        self.pitch_env_depth = scaled.min(10);

        self.lfo_step = ((1u64 << 32) / tables.lfo_period[param.lfo.rate as usize] as u64)
            .min(u32::MAX as u64) as u32;

        self.volume = controls.volume;
        self.pan = cache.pan.unwrap_or(controls.pan);
        self.set_modulation(controls.modulation);
        self.set_bend(controls.bend, controls.bender_range, tables);

        for env in self.envs.iter_mut() {
            env.reset();
        }
        self.envs[EnvelopeType::Pitch as usize].reset_to(param.env.level[0] as i32);
    }

    /// Recomputes the note and fine pitch from key, keyfollow and bend.
    fn init_key_follow(&mut self, tables: &Tables) {
        let c = &self.cache;
        let key_offset = self.key as i32 - MIDDLE_C as i32;
        let pitch = ((key_offset * 256 * c.pitch_keyfollow) >> FIXED_SHIFT) + c.pitch + c.pitch_shift;
        self.note_val = (pitch >> 8).clamp(0, NOTE_COUNT as i32 - 1) as usize;
        self.pitch_frac = pitch - self.note_val as i32 * 256;
        self.fine_shift = tables.pitch_mult(self.pitch_frac + self.bend_shift);
    }

    /// Applies a pitch bend of `bend` (-8192..=8191) over `range` semitones.
    pub fn set_bend(&mut self, bend: i32, range: u32, tables: &Tables) {
        self.bend_shift = if self.cache.use_bender {
            bend.clamp(-8192, 8191) * range.min(24) as i32 * 256 / 8192
        } else {
            0
        };
        self.init_key_follow(tables);
    }

    /// Part volume, 10-bit.
    pub fn set_volume(&mut self, volume: u32) {
        self.volume = volume;
    }

    /// Drum partials keep their fixed pan.
    pub fn set_pan(&mut self, pan: StereoVolume) {
        if self.cache.pan.is_none() {
            self.pan = pan;
        }
    }

    pub fn set_modulation(&mut self, modulation: u32) {
        let lfo = &self.cache.param.lfo;
        let extra = lfo.modsense as u32 * modulation.min(127) / 127;
        self.lfo_depth = (lfo.depth as u32 + extra).min(100);
    }

    pub fn pan(&self) -> StereoVolume {
        self.pan
    }

    /// Moves one envelope into its release phase, starting from `start`.
    pub fn start_decay(&mut self, env_type: EnvelopeType, start: i32, tables: &Tables) {
        let param = self.cache.param;
        let key = self.key as usize;
        let env = &mut self.envs[env_type as usize];
        env.stat = 4;
        match env_type {
            EnvelopeType::Amp => {
                let base = tables.env_decay_time[param.tva.envtime[4] as usize];
                let size = key_scaled(base, tables, key, param.tva.envtkf)
                    * start.clamp(1, 100) as u32
                    / 100;
                env.begin_decay(start, 0, size);
            }
            EnvelopeType::Filter => {
                let base = tables.env_time[param.tvf.envtime[4] as usize];
                env.begin_decay(start, 0, key_scaled(base, tables, key, param.tvf.envtkf));
            }
            EnvelopeType::Pitch => {
                let base = tables.env_time[param.env.time[3] as usize];
                env.begin_decay(
                    start,
                    param.env.level[4] as i32,
                    key_scaled(base, tables, key, param.env.timekeyfollow),
                );
            }
        }
    }

    /// Releases every envelope from its current level.
    pub fn start_decay_all(&mut self, tables: &Tables) {
        for env_type in ENVELOPE_TYPES {
            if !self.envs[env_type as usize].decaying {
                let start = self.envs[env_type as usize].prev_level;
                self.start_decay(env_type, start, tables);
            }
        }
    }

    /// Renders `len` mono samples into the internal buffer. Returns false if
    /// the partial had already stopped; once it stops mid-block the rest of
    /// the block is silence.
    pub fn generate_samples(&mut self, len: usize, tables: &Tables, pcm: &PcmData) -> bool {
        let len = len.min(MAX_SAMPLE_OUTPUT);
        if !self.is_playing() {
            self.buffer[..len].fill(0);
            return false;
        }
        for i in 0..len {
            if !self.play {
                self.buffer[i..len].fill(0);
                break;
            }
            let amp_level = self.amp_envelope(tables);
            if !self.play {
                self.buffer[i..len].fill(0);
                break;
            }
            let pitch = self.pitch_multiplier(tables);
            let filt_level = self.filt_envelope(tables);

            let raw = match self.wave {
                Some((index, wave)) => match self.next_pcm_sample(index, wave, pitch, tables, pcm) {
                    Some(s) => s,
                    None => {
                        // Ran off the end of a one-shot wave.
                        self.play = false;
                        self.buffer[i..len].fill(0);
                        break;
                    }
                },
                None => self.next_synth_sample(pitch, filt_level, tables),
            };

            let tva_level = self.cache.param.tva.level as i32;
            let level = (amp_level * tva_level / 100).clamp(0, 100) as usize;
            let amp = (tables.volume_mult[level] * self.amp_mult) >> AMP_SHIFT;
            let amp = (amp * self.volume) >> AMP_SHIFT;
            self.buffer[i] = saturate_i16((raw * amp as i32) >> AMP_SHIFT) as i32;
        }
        true
    }

    fn amp_envelope(&mut self, tables: &Tables) -> i32 {
        let idx = EnvelopeType::Amp as usize;
        let env = &self.envs[idx];
        if env.segment_done() && !env.sustaining {
            if env.decaying {
                self.play = false;
                return 0;
            }
            let tva = self.cache.param.tva;
            let key = self.key as usize;
            let vel = self.velocity as usize;
            let sustain = self.cache.sustain;
            let env = &mut self.envs[idx];
            let next = env.stat + 1;
            if next < 4 {
                let stage = next as usize;
                let base = tables.env_time[tva.envtime[stage] as usize];
                let mut size = key_scaled(base, tables, key, tva.envtkf);
                if stage == 0 {
                    size = ((size as u64 * tables.env_time_velfollow_mult[tva.envvkf as usize][vel] as u64) >> 8) as u32;
                }
                env.stat = next;
                env.begin(env.prev_level, tva.envlevel[stage] as i32, size);
            } else if sustain {
                env.stat = 4;
                env.hold(tva.envlevel[3] as i32);
            } else {
                let start = env.prev_level;
                self.start_decay(EnvelopeType::Amp, start, tables);
            }
        }
        self.envs[idx].tick()
    }

    fn filt_envelope(&mut self, tables: &Tables) -> i32 {
        let idx = EnvelopeType::Filter as usize;
        let env = &mut self.envs[idx];
        if env.segment_done() && !env.sustaining && !env.decaying {
            let tvf = &self.cache.param.tvf;
            let next = env.stat + 1;
            if next < 4 {
                let stage = next as usize;
                let base = tables.env_time[tvf.envtime[stage] as usize];
                env.stat = next;
                env.begin(
                    env.prev_level,
                    tvf.envlevel[stage] as i32,
                    key_scaled(base, tables, self.key as usize, tvf.envtkf),
                );
            } else {
                env.stat = 4;
                env.hold(tvf.envlevel[3] as i32);
            }
        }
        env.tick()
    }

    /// Combined 12-bit pitch multiplier from fine pitch, pitch envelope and LFO.
    fn pitch_multiplier(&mut self, tables: &Tables) -> u32 {
        let idx = EnvelopeType::Pitch as usize;
        let env = &mut self.envs[idx];
        if env.segment_done() && !env.sustaining && !env.decaying {
            let p = &self.cache.param.env;
            let next = env.stat + 1;
            if next < 3 {
                let stage = next as usize;
                let base = tables.env_time[p.time[stage] as usize];
                env.stat = next;
                env.begin(
                    env.prev_level,
                    p.level[stage + 1] as i32,
                    key_scaled(base, tables, self.key as usize, p.timekeyfollow),
                );
            } else {
                env.stat = 3;
                env.hold(p.level[3] as i32);
            }
        }
        let level = env.tick().clamp(0, 100) as usize;
        let lfo_running = env.sustaining || env.decaying;

        let mut mult = fixed_mul(self.fine_shift, tables.pitch_env_val[self.pitch_env_depth][level]);
        if lfo_running {
            let sine = tables.sintable[(self.lfo_pos >> 16) as usize] as usize;
            mult = fixed_mul(mult, tables.lfo_shift[self.lfo_depth as usize][sine]);
            self.lfo_pos = self.lfo_pos.wrapping_add(self.lfo_step);
        }
        mult
    }

    fn next_synth_sample(&mut self, pitch: u32, filt_level: i32, tables: &Tables) -> i32 {
        let note = tables.note(self.note_val);
        let period = note.div2 as usize;
        let period_fixed = (period as u64) << POS_SHIFT;
        let p = (self.position >> POS_SHIFT) as usize % period;

        let saw = note.saw();
        let offset = note.saw_table[self.pulse_width] as usize;
        let pulse = saw[p] as i32 - saw[(p + offset) % period] as i32;
        let raw = match self.cache.waveform {
            Waveform::Square => pulse,
            Waveform::Sawtooth => (pulse * note.cosine()[p] as i32) >> 15,
        };

        let tvf = &self.cache.param.tvf;
        let cutoff = self.filt_val + filt_level * self.filt_env_depth / 100;
        let coeffs = tables.filter_coeffs(tables.cutoff_index(cutoff), tvf.resonance as usize);
        let filtered = self.filter.process(raw as f32, coeffs)
            * tables.reson_inv[tvf.resonance as usize];

        let delta = (note.synth_delta as u64 * pitch as u64) >> FIXED_SHIFT;
        self.position = (self.position + delta) % period_fixed.max(1);
        filtered as i32
    }

    /// Next PCM sample, or `None` past the end of a non-looping wave.
    fn next_pcm_sample(
        &mut self,
        index: usize,
        wave: PcmWaveEntry,
        pitch: u32,
        tables: &Tables,
        pcm: &PcmData,
    ) -> Option<i32> {
        let note = tables.note(self.note_val);
        let delta = (*note.wav_table.get(index)? as u64 * pitch as u64) >> FIXED_SHIFT;
        let end = (wave.len as u64) << POS_SHIFT;
        if self.position >= end {
            if !wave.loop_wave {
                return None;
            }
            self.position %= end;
        }

        let samples = pcm.samples.get(wave.addr..wave.addr + wave.len)?;
        let idx = (self.position >> POS_SHIFT) as usize;
        let sample = if delta <= POS_ONE {
            let next = if idx + 1 < wave.len {
                idx + 1
            } else if wave.loop_wave {
                0
            } else {
                idx
            };
            let frac = (self.position & (POS_ONE - 1)) as i64;
            let a = samples[idx] as i64;
            let b = samples[next] as i64;
            (a + (((b - a) * frac) >> POS_SHIFT)) as i32
        } else {
            // Faster than the source rate: average the samples skipped over.
            let span = ((delta >> POS_SHIFT) as usize).max(1);
            let stop = (idx + span).min(wave.len);
            let window = &samples[idx..stop];
            (window.iter().map(|&s| s as i64).sum::<i64>() / window.len().max(1) as i64) as i32
        };
        self.position += delta;
        // PCM is full scale; synthesized waveforms peak near half of it.
        Some(sample >> 1)
    }
}

/// Envelope segment length scaled by the key's time keyfollow.
fn key_scaled(base: u32, tables: &Tables, key: usize, follow: u8) -> u32 {
    let mult = tables.key(key).env_time_mult[(follow as usize).min(4)].max(1);
    ((base as u64 * 256 / mult as u64) as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::params::{PatchTemp, TimbreParam};

    fn tables() -> Tables {
        Tables::init(&[], 0, 32000, 440.0).unwrap()
    }

    fn synth_timbre(sustain: bool) -> TimbreParam {
        let mut t = TimbreParam::silent("Test");
        t.common.pmute = 0b0001;
        t.common.nosustain = u8::from(!sustain);
        let p = &mut t.partial[0];
        p.wg.coarse = 36;
        p.wg.fine = 50;
        p.wg.keyfollow = 11;
        p.wg.pulsewid = 50;
        p.env.level = [50; 5];
        p.tvf.cutoff = 100;
        p.tvf.keyfollow = 3;
        p.tvf.biaslevel = 7;
        p.tva.level = 100;
        p.tva.biaslevel1 = 12;
        p.tva.biaslevel2 = 12;
        p.tva.envtime = [1, 1, 1, 1, 10];
        p.tva.envlevel = [100, 100, 100, 100];
        t
    }

    fn started(timbre: &TimbreParam) -> (Partial, Tables, PcmData) {
        let tables = tables();
        let pcm = PcmData::default();
        let cache = PatchCache::from_timbre(timbre, 0, &PatchTemp::default());
        let mut partial = Partial::new();
        partial.activate(0);
        let poly = PolyRef { part: 0, slot: 0, serial: 1 };
        partial.start_partial(poly, &cache, 60, 100, None, &PartControls::default(), &tables, &pcm, 1);
        (partial, tables, pcm)
    }

    #[test]
    fn test_inactive_partial_is_inert() {
        let tables = tables();
        let mut partial = Partial::new();
        assert!(!partial.is_active());
        assert!(!partial.generate_samples(64, &tables, &PcmData::default()));
    }

    #[test]
    fn test_sustained_note_produces_sound() {
        let (mut partial, tables, pcm) = started(&synth_timbre(true));
        assert!(partial.generate_samples(2048, &tables, &pcm));
        assert!(partial.buffer[1024..2048].iter().any(|&s| s != 0));
        assert!(partial.is_playing());
    }

    #[test]
    fn test_release_stops_partial() {
        let (mut partial, tables, pcm) = started(&synth_timbre(true));
        partial.generate_samples(1024, &tables, &pcm);
        partial.start_decay_all(&tables);
        assert!(partial.is_decaying());
        for _ in 0..64 {
            partial.generate_samples(MAX_SAMPLE_OUTPUT, &tables, &pcm);
        }
        assert!(!partial.is_playing());
        assert!(partial.buffer.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_non_sustain_decays_on_its_own() {
        let (mut partial, tables, pcm) = started(&synth_timbre(false));
        for _ in 0..64 {
            partial.generate_samples(MAX_SAMPLE_OUTPUT, &tables, &pcm);
        }
        assert!(!partial.is_playing());
    }

    #[test]
    fn test_missing_pcm_wave_is_silent() {
        let mut timbre = synth_timbre(true);
        timbre.common.pstruct12 = 2; // first of the pair is PCM
        let (mut partial, tables, pcm) = started(&timbre);
        assert!(!partial.generate_samples(256, &tables, &pcm));
    }

    #[test]
    fn test_flat_pitch_envelope_keeps_pitch() {
        let mut timbre = synth_timbre(true);
        let env = &mut timbre.partial[0].env;
        env.depth = 10;
        env.level = [50; 5];
        env.time = [100; 4];
        let (mut partial, tables, _) = started(&timbre);
        for _ in 0..16 {
            assert_eq!(partial.pitch_multiplier(&tables), partial.fine_shift);
        }
    }

    #[test]
    fn test_pitch_envelope_starts_at_first_level() {
        let mut timbre = synth_timbre(true);
        let env = &mut timbre.partial[0].env;
        env.depth = 10;
        env.level = [0, 50, 50, 50, 50];
        env.time = [100; 4];
        let (mut partial, tables, _) = started(&timbre);
        // Level 0 at full depth is one octave down.
        assert_eq!(partial.pitch_multiplier(&tables), partial.fine_shift / 2);
    }

    #[test]
    fn test_bend_only_with_bender_enabled() {
        let mut timbre = synth_timbre(true);
        timbre.partial[0].wg.bender = 1;
        let (mut partial, tables, _) = started(&timbre);
        partial.set_bend(8191, 12, &tables);
        assert!(partial.fine_shift > (FIXED_ONE as f32 * 1.9) as u32);

        let (mut fixed, tables, _) = started(&synth_timbre(true));
        fixed.set_bend(8191, 12, &tables);
        assert_eq!(fixed.fine_shift, FIXED_ONE);
    }
}
