use std::io::{Read, Seek};

use tracing::{debug, info, warn};

use super::config::SynthConfig;
use super::context::{Memory, PartContext};
use super::event::{decode_short_message, ControlChange, PartEvent};
use super::params::{
    master_tune_hz, PatchParam, RhythmTemp, TimbreParam, PART_COUNT, PATCH_COUNT,
    RHYTHM_KEY_COUNT, RHYTHM_PART, TIMBRE_COUNT,
};
use super::part::Part;
use super::partial_manager::PartialManager;
use super::patch::panpot_to_pan;
use super::prelude::{saturate_i16, AMP_ONE, MAX_SAMPLE_OUTPUT};
use super::reverb::{Reverb, ReverbSettings};
use super::rom::{PcmData, SoundBank};
use super::tables::Tables;
use crate::error::Result;

/// The synthesizer: nine parts sharing one partial pool, a reverb and the
/// output mixer.
pub struct Synth {
    config: SynthConfig,
    tables: Tables,
    pcm: PcmData,
    memory: Memory,
    parts: Vec<Part>,
    partials: PartialManager,
    reverb: Reverb,
    dry: Vec<i32>,
    send: Vec<i32>,
    reverb_in: Vec<f32>,
    reverb_out: Vec<f32>,
    scratch: Vec<i16>,
    /// Master tune waiting for the partial pool to go idle.
    pending_tune: Option<u8>,
}

impl Synth {
    /// Builds the tables and every pool up front. Nothing allocates while
    /// rendering afterwards.
    pub fn open(config: SynthConfig, bank: SoundBank) -> Result<Self> {
        config.validate()?;
        let mut memory = Memory::from_bank(&bank);
        if let Some(tune) = config.master_tune {
            memory.system.master_tune = tune;
        }
        let tables = Tables::init(
            &bank.pcm.waves,
            bank.pcm.samples.len(),
            config.sample_rate,
            memory.system.master_tune_hz(),
        )?;
        let system = memory.system;
        let reverb = Reverb::new(
            config.sample_rate as f32,
            ReverbSettings::new(system.reverb_mode, system.reverb_time, system.reverb_level),
        );
        let block = MAX_SAMPLE_OUTPUT * 2;
        let mut synth = Self {
            parts: (0..PART_COUNT).map(|i| Part::new(i, config.max_poly)).collect(),
            partials: PartialManager::new(config.max_partials),
            tables,
            pcm: bank.pcm,
            memory,
            reverb,
            dry: vec![0; block],
            send: vec![0; block],
            reverb_in: vec![0.0; block],
            reverb_out: vec![0.0; block],
            scratch: vec![0; block],
            pending_tune: None,
            config,
        };

        for i in 0..PART_COUNT {
            let pan = panpot_to_pan(bank.panpot_settings[i]);
            let program = bank.program_settings[i];
            synth.with_part(i, |part, ctx| {
                part.refresh(ctx.memory);
                if !part.is_rhythm() {
                    part.set_program(ctx.memory, program);
                    part.set_pan(ctx, pan);
                }
                part.update_volume(ctx);
            });
        }
        info!(
            sample_rate = synth.config.sample_rate,
            partials = synth.config.max_partials,
            "synth opened"
        );
        Ok(synth)
    }

    /// Opens a synth straight from control and PCM ROM images.
    pub fn from_roms<C, P>(config: SynthConfig, control: C, pcm: P) -> Result<Self>
    where
        C: Read + Seek,
        P: Read + Seek,
    {
        Self::open(config, SoundBank::from_roms(control, pcm)?)
    }

    fn with_part<R>(
        &mut self,
        part: usize,
        f: impl FnOnce(&mut Part, &mut PartContext<'_>) -> R,
    ) -> Option<R> {
        let part = self.parts.get_mut(part)?;
        let mut ctx = PartContext {
            tables: &self.tables,
            pcm: &self.pcm,
            memory: &self.memory,
            partials: &mut self.partials,
        };
        Some(f(part, &mut ctx))
    }

    // --- Events ---

    pub fn play_event(&mut self, part: usize, event: PartEvent) {
        let handled = self.with_part(part, |part, ctx| match event {
            PartEvent::NoteOn { key, velocity } => {
                part.play_note(ctx, key as u32, velocity as u32)
            }
            PartEvent::NoteOff { key } => part.stop_note(ctx, key as u32),
            PartEvent::ProgramChange(program) => part.set_program(ctx.memory, program),
            PartEvent::PitchBend(value) => part.set_bend(ctx, value),
            PartEvent::Control(cc) => match cc {
                ControlChange::Modulation(v) => part.set_modulation(ctx, v),
                ControlChange::Volume(v) => part.set_volume(ctx, v),
                ControlChange::Pan(v) => part.set_pan(ctx, v),
                ControlChange::Expression(v) => part.set_expression(ctx, v),
                ControlChange::HoldPedal(on) => part.set_hold_pedal(ctx, on),
                ControlChange::RpnLsb(v) => part.set_rpn_lsb(v),
                ControlChange::RpnMsb(v) => part.set_rpn_msb(v),
                ControlChange::DataEntry(v) => part.data_entry(ctx, v),
                ControlChange::AllSoundOff => part.all_sound_off(ctx),
                ControlChange::ResetAllControllers => part.reset_all_controllers(ctx),
                ControlChange::AllNotesOff => part.all_notes_off(ctx),
            },
        });
        if handled.is_none() {
            warn!(part, ?event, "event for unknown part");
        }
    }

    /// Decodes a packed MIDI short message and plays it on every part
    /// assigned to its channel.
    pub fn play_msg(&mut self, msg: u32) {
        let Some((channel, event)) = decode_short_message(msg) else {
            debug!(msg = format_args!("{msg:#08x}"), "unsupported MIDI message");
            return;
        };
        let assign = self.memory.system.chan_assign;
        let mut routed = false;
        for part in (0..PART_COUNT).filter(|&p| assign[p] == channel) {
            self.play_event(part, event);
            routed = true;
        }
        if !routed {
            debug!(channel, "no part listens on channel");
        }
    }

    /// Sends a note on to `part`. Velocity 0 is a note off.
    pub fn note_on(&mut self, part: usize, key: u8, velocity: u8) {
        let event = if velocity == 0 {
            PartEvent::NoteOff { key }
        } else {
            PartEvent::NoteOn { key, velocity }
        };
        self.play_event(part, event);
    }

    pub fn note_off(&mut self, part: usize, key: u8) {
        self.play_event(part, PartEvent::NoteOff { key });
    }

    /// Silences every part immediately.
    pub fn all_sound_off(&mut self) {
        for part in 0..PART_COUNT {
            self.with_part(part, |part, ctx| part.all_sound_off(ctx));
        }
        self.partials.deactivate_all();
    }

    // --- Memory writes ---

    /// Stores a timbre and refreshes every part playing it.
    pub fn write_timbre(&mut self, abs: usize, timbre: TimbreParam) {
        if abs >= TIMBRE_COUNT {
            warn!(abs, "timbre number out of range");
            return;
        }
        self.memory.timbres[abs] = timbre;
        for part in self.parts.iter_mut() {
            part.refresh_timbre(&self.memory, abs);
        }
        debug!(abs, name = %timbre.common.name(), "timbre written");
    }

    /// Stores a patch. Parts keep their current patch until the next
    /// program change.
    pub fn write_patch(&mut self, num: usize, patch: PatchParam) {
        if num >= PATCH_COUNT {
            warn!(num, "patch number out of range");
            return;
        }
        self.memory.patches[num] = patch;
    }

    pub fn write_rhythm_key(&mut self, drum: usize, setting: RhythmTemp) {
        if drum >= RHYTHM_KEY_COUNT {
            warn!(drum, "rhythm key out of range");
            return;
        }
        self.memory.rhythm[drum] = setting;
        self.parts[RHYTHM_PART].refresh_drum(&self.memory, drum);
    }

    pub fn set_reverb(&mut self, mode: u8, time: u8, level: u8) {
        let settings = ReverbSettings::new(mode, time, level);
        let system = &mut self.memory.system;
        system.reverb_mode = mode & 3;
        system.reverb_time = settings.time;
        system.reverb_level = settings.level;
        self.reverb.set_settings(settings);
    }

    pub fn set_partial_reserve(&mut self, reserve: [u8; PART_COUNT]) {
        let total: usize = reserve.iter().map(|&r| r as usize).sum();
        if total > self.partials.len() {
            warn!(total, pool = self.partials.len(), "partial reserve exceeds pool");
        }
        self.memory.system.reserve_settings = reserve;
    }

    /// 0..=100.
    pub fn set_master_volume(&mut self, volume: u8) {
        self.memory.system.master_volume = volume.min(100);
    }

    /// Retunes the synth. The tables are rebuilt once no partial is sounding.
    pub fn set_master_tune(&mut self, tune: u8) {
        let tune = tune.min(127);
        self.memory.system.master_tune = tune;
        self.pending_tune = Some(tune);
        if self.partials.active_count() > 0 {
            debug!(tune, "master tune deferred until partials are idle");
        }
        self.apply_pending_tune();
    }

    /// MIDI channel 0..=15 for a part, 16 or above turns the part off.
    pub fn set_channel_assignment(&mut self, part: usize, channel: u8) {
        if let Some(slot) = self.memory.system.chan_assign.get_mut(part) {
            *slot = channel.min(16);
        }
    }

    fn apply_pending_tune(&mut self) {
        let Some(tune) = self.pending_tune else {
            return;
        };
        if self.partials.active_count() > 0 {
            return;
        }
        self.pending_tune = None;
        match Tables::init(
            &self.pcm.waves,
            self.pcm.samples.len(),
            self.config.sample_rate,
            master_tune_hz(tune),
        ) {
            Ok(tables) => {
                self.tables = tables;
                info!(tune, "tables rebuilt for master tune");
            }
            Err(err) => warn!(%err, "table rebuild failed, keeping previous tuning"),
        }
    }

    // --- Rendering ---

    /// Renders interleaved stereo frames.
    pub fn render(&mut self, out: &mut [i16]) {
        for chunk in out.chunks_mut(MAX_SAMPLE_OUTPUT * 2) {
            self.render_chunk(chunk);
        }
    }

    /// Same as [`render`](Self::render) scaled to -1.0..1.0.
    pub fn render_f32(&mut self, out: &mut [f32]) {
        let mut scratch = std::mem::take(&mut self.scratch);
        for chunk in out.chunks_mut(MAX_SAMPLE_OUTPUT * 2) {
            let buf = &mut scratch[..chunk.len()];
            self.render_chunk(buf);
            for (dst, &s) in chunk.iter_mut().zip(buf.iter()) {
                *dst = s as f32 / 32768.0;
            }
        }
        self.scratch = scratch;
    }

    fn render_chunk(&mut self, out: &mut [i16]) {
        let len = out.len() / 2 * 2;
        let dry = &mut self.dry[..len];
        let send = &mut self.send[..len];
        dry.fill(0);
        send.fill(0);

        let use_reverb = self.config.reverb_enabled;
        self.partials.clear_already_outputted();
        for i in 0..self.partials.len() {
            let bus = if use_reverb && self.partials.should_reverb(i) {
                &mut *send
            } else {
                &mut *dry
            };
            self.partials.produce_output(i, &self.tables, &self.pcm, bus);
        }

        let wet = use_reverb && self.reverb.settings().level > 0;
        if wet {
            for (dst, &s) in self.reverb_in[..len].iter_mut().zip(send.iter()) {
                *dst = s as f32 / 32768.0;
            }
            self.reverb
                .process(&self.reverb_in[..len], &mut self.reverb_out[..len]);
        }

        let master = self.memory.system.master_volume.min(100) as usize;
        let gain =
            self.tables.volume_mult[master] as f32 / AMP_ONE as f32 * self.config.output_gain;
        for (i, dst) in out[..len].iter_mut().enumerate() {
            let mut s = (dry[i] + send[i]) as f32;
            if wet {
                s += self.reverb_out[i] * 32768.0;
            }
            *dst = saturate_i16((s * gain) as i32);
        }
        out[len..].fill(0);

        for part in self.parts.iter_mut() {
            part.reap_polys(&self.partials);
        }
        self.apply_pending_tune();
    }

    // --- Introspection ---

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn part(&self, part: usize) -> Option<&Part> {
        self.parts.get(part)
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn partials(&self) -> &PartialManager {
        &self.partials
    }

    pub fn active_partial_count(&self) -> usize {
        self.partials.active_count()
    }

    pub fn per_part_usage(&self) -> [usize; PART_COUNT] {
        self.partials.per_part_usage()
    }

    pub fn reverb_settings(&self) -> ReverbSettings {
        self.reverb.settings()
    }

    pub fn has_pending_table_rebuild(&self) -> bool {
        self.pending_tune.is_some()
    }
}

impl std::fmt::Debug for Synth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synth")
            .field("config", &self.config)
            .field("active_partials", &self.partials.active_count())
            .field("pending_tune", &self.pending_tune)
            .finish_non_exhaustive()
    }
}
