//! Parts: the nine addressable instrument slots.
//!
//! Eight melodic parts play one timbre chosen by patch; the rhythm part maps
//! each key to its own drum timbre, pan, level and reverb switch.

use tracing::{debug, warn};

use super::context::{Memory, PartContext};
use super::params::{
    PatchParam, PatchTemp, TimbreParam, RHYTHM_FIRST_KEY, RHYTHM_KEY_COUNT, RHYTHM_PART,
    TIMBRE_COUNT,
};
use super::partial::{PartControls, Partial, PolyRef};
use super::partial_manager::PartialManager;
use super::patch::{PatchCache, StereoVolume};
use super::poly::{Poly, PolyState};
use super::prelude::{AMP_ONE, AMP_SHIFT, MAX_PARTIALS_PER_POLY, MIDDLE_C};
use super::rom::TIMBRE_GROUP_MEMORY;
use super::structure::pair_slot;
use super::tables::Tables;

pub const MAX_BENDER_RANGE: u8 = 24;

/// Melodic keys outside this range are folded in by octaves.
const LOWEST_MELODIC_KEY: u32 = 12;
const HIGHEST_MELODIC_KEY: u32 = 108;

const RPN_NULL: u8 = 127;

/// Per-drum state of the rhythm part.
#[derive(Debug, Clone)]
pub struct RhythmState {
    drum_cache: Vec<[PatchCache; MAX_PARTIALS_PER_POLY]>,
    drum_pan: Vec<StereoVolume>,
    /// Output level 0..=100.
    drum_volume: Vec<u8>,
}

impl Default for RhythmState {
    fn default() -> Self {
        Self {
            drum_cache: vec![[PatchCache::empty(); MAX_PARTIALS_PER_POLY]; RHYTHM_KEY_COUNT],
            drum_pan: vec![StereoVolume::default(); RHYTHM_KEY_COUNT],
            drum_volume: vec![100; RHYTHM_KEY_COUNT],
        }
    }
}

impl RhythmState {
    /// Absolute timbre number a mapped drum plays.
    fn drum_timbre(memory: &Memory, drum: usize) -> Option<usize> {
        let setting = memory.rhythm.get(drum)?;
        setting
            .is_mapped()
            .then_some(TIMBRE_GROUP_MEMORY + setting.timbre as usize)
    }

    fn cache_drum(&mut self, drum: usize, memory: &Memory) {
        if drum >= RHYTHM_KEY_COUNT {
            return;
        }
        let timbre = Self::drum_timbre(memory, drum).and_then(|abs| Some((abs, memory.timbres.get(abs)?)));
        let Some((abs, timbre)) = timbre else {
            self.drum_cache[drum] = [PatchCache::empty(); MAX_PARTIALS_PER_POLY];
            return;
        };
        let setting = memory.rhythm[drum];
        let patch = PatchTemp {
            patch: PatchParam {
                timbre_group: (abs / 64) as u8,
                timbre_num: (abs % 64) as u8,
                key_shift: 24,
                fine_tune: 50,
                bender_range: 0,
                assign_mode: 0,
                reverb_switch: setting.reverb_switch,
                dummy: 0,
            },
            output_level: setting.output_level,
            panpot: setting.panpot,
            dummy: [0; 6],
        };
        let pan = StereoVolume::from_panpot(setting.panpot);
        self.drum_cache[drum] = std::array::from_fn(|slot| PatchCache {
            pan: Some(pan),
            ..PatchCache::from_timbre(timbre, slot, &patch)
        });
        self.drum_pan[drum] = pan;
        self.drum_volume[drum] = setting.output_level.min(100);
    }

    pub fn drum_pan(&self, drum: usize) -> Option<StereoVolume> {
        self.drum_pan.get(drum).copied()
    }
}

/// Melodic or rhythm behaviour of a part.
#[derive(Debug, Clone)]
pub enum PartKind {
    Melodic,
    Rhythm(Box<RhythmState>),
}

#[derive(Debug, Clone)]
pub struct Part {
    num: usize,
    name: String,
    patch_temp: PatchTemp,
    timbre_temp: TimbreParam,
    patch_cache: [PatchCache; MAX_PARTIALS_PER_POLY],
    current_instr: String,
    hold_pedal: bool,
    expression: u8,
    /// MIDI pan 0..=127.
    pan: u8,
    /// -8192..=8191
    bend: i32,
    modulation: u8,
    /// Output level and expression combined, 10-bit.
    volume_mult: u32,
    rpn: (u8, u8),
    polys: Vec<Poly>,
    kind: PartKind,
}

impl Part {
    pub fn new(num: usize, max_poly: usize) -> Self {
        let (name, kind) = if num == RHYTHM_PART {
            ("Rhythm".to_string(), PartKind::Rhythm(Box::default()))
        } else {
            (format!("Part {}", num + 1), PartKind::Melodic)
        };
        Self {
            num,
            name,
            patch_temp: PatchTemp::default(),
            timbre_temp: TimbreParam::default(),
            patch_cache: [PatchCache::empty(); MAX_PARTIALS_PER_POLY],
            current_instr: String::new(),
            hold_pedal: false,
            expression: 127,
            pan: 64,
            bend: 0,
            modulation: 0,
            volume_mult: AMP_ONE,
            rpn: (RPN_NULL, RPN_NULL),
            polys: vec![Poly::default(); max_poly.max(1)],
            kind,
        }
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PartKind {
        &self.kind
    }

    pub fn is_rhythm(&self) -> bool {
        matches!(self.kind, PartKind::Rhythm(_))
    }

    pub fn patch_temp(&self) -> &PatchTemp {
        &self.patch_temp
    }

    pub fn timbre_temp(&self) -> &TimbreParam {
        &self.timbre_temp
    }

    pub fn patch_cache(&self) -> &[PatchCache; MAX_PARTIALS_PER_POLY] {
        &self.patch_cache
    }

    /// Name of the timbre the part plays.
    pub fn current_instr(&self) -> &str {
        &self.current_instr
    }

    pub fn polys(&self) -> &[Poly] {
        &self.polys
    }

    pub fn hold_pedal(&self) -> bool {
        self.hold_pedal
    }

    pub fn volume_mult(&self) -> u32 {
        self.volume_mult
    }

    pub fn pan(&self) -> u8 {
        self.pan
    }

    pub fn bend(&self) -> i32 {
        self.bend
    }

    pub fn modulation(&self) -> u8 {
        self.modulation
    }

    pub fn bender_range(&self) -> u32 {
        self.patch_temp.patch.bender_range.min(MAX_BENDER_RANGE) as u32
    }

    pub fn active_poly_count(&self) -> usize {
        self.polys.iter().filter(|p| p.is_active()).count()
    }

    /// Absolute timbre number in use, `None` for the rhythm part or an
    /// out-of-range patch.
    pub fn abs_timbre_num(&self) -> Option<usize> {
        match self.kind {
            PartKind::Rhythm(_) => None,
            PartKind::Melodic => {
                Some(self.patch_temp.patch.abs_timbre_num()).filter(|&n| n < TIMBRE_COUNT)
            }
        }
    }

    // --- Patch and timbre ---

    pub fn set_patch(&mut self, memory: &Memory, patch: &PatchParam) {
        if self.is_rhythm() {
            debug!(part = self.num, "rhythm part ignores patch changes");
            return;
        }
        self.patch_temp.patch = *patch;
        self.patch_temp.patch.bender_range = patch.bender_range.min(MAX_BENDER_RANGE);
        self.refresh(memory);
    }

    pub fn set_program(&mut self, memory: &Memory, program: u8) {
        if self.is_rhythm() {
            debug!(part = self.num, program, "rhythm part ignores program changes");
            return;
        }
        let Some(patch) = memory.patches.get(program as usize).copied() else {
            warn!(part = self.num, program, "program out of range");
            return;
        };
        self.set_patch(memory, &patch);
        debug!(part = self.num, program, instr = %self.current_instr, "program change");
    }

    /// Replaces the timbre without touching patch memory.
    pub fn set_timbre(&mut self, timbre: &TimbreParam) {
        if self.is_rhythm() {
            debug!(part = self.num, "rhythm part ignores timbre changes");
            return;
        }
        self.timbre_temp = *timbre;
        self.cache_timbre();
    }

    /// Reloads the timbre (or every drum) from memory. Sounding notes keep
    /// the parameters they started with.
    pub fn refresh(&mut self, memory: &Memory) {
        if let PartKind::Rhythm(state) = &mut self.kind {
            for drum in 0..RHYTHM_KEY_COUNT {
                state.cache_drum(drum, memory);
            }
            self.current_instr = self.name.clone();
            return;
        }
        let abs = self.patch_temp.patch.abs_timbre_num();
        let Some(timbre) = memory.timbres.get(abs) else {
            warn!(part = self.num, timbre = abs, "timbre out of range");
            return;
        };
        self.timbre_temp = *timbre;
        self.cache_timbre();
    }

    /// Refreshes the part if it plays timbre `abs`.
    pub fn refresh_timbre(&mut self, memory: &Memory, abs: usize) {
        if let PartKind::Rhythm(state) = &mut self.kind {
            for drum in 0..RHYTHM_KEY_COUNT {
                if RhythmState::drum_timbre(memory, drum) == Some(abs) {
                    state.cache_drum(drum, memory);
                }
            }
        } else if self.abs_timbre_num() == Some(abs) {
            self.refresh(memory);
        }
    }

    /// Rebuilds the cache of one drum key after its setup changed.
    pub fn refresh_drum(&mut self, memory: &Memory, drum: usize) {
        if let PartKind::Rhythm(state) = &mut self.kind {
            state.cache_drum(drum, memory);
        }
    }

    /// Resolves the timbre temp into the patch cache.
    pub fn cache_timbre(&mut self) {
        for (slot, entry) in self.patch_cache.iter_mut().enumerate() {
            *entry = PatchCache::from_timbre(&self.timbre_temp, slot, &self.patch_temp);
        }
        self.current_instr = self.timbre_temp.common.name();
    }

    // --- Notes ---

    pub fn play_note(&mut self, ctx: &mut PartContext<'_>, key: u32, velocity: u32) {
        if let PartKind::Rhythm(state) = &self.kind {
            let range = RHYTHM_FIRST_KEY..RHYTHM_FIRST_KEY + RHYTHM_KEY_COUNT as u32;
            if !range.contains(&key) {
                debug!(key, "rhythm key out of range");
                return;
            }
            let drum = (key - RHYTHM_FIRST_KEY) as usize;
            let caches = state.drum_cache[drum];
            if RhythmState::drum_timbre(ctx.memory, drum).is_none() || caches[0].dirty {
                debug!(key, "rhythm key unmapped");
                return;
            }
            self.release_key(ctx, key);
            self.play_poly(ctx, &caches, Some(drum), key, MIDDLE_C, velocity);
            return;
        }

        let mut pitch_key = key.min(127);
        while pitch_key < LOWEST_MELODIC_KEY {
            pitch_key += 12;
        }
        while pitch_key > HIGHEST_MELODIC_KEY {
            pitch_key -= 12;
        }
        // One sounding poly per key.
        self.release_key(ctx, key);
        let caches = self.patch_cache;
        self.play_poly(ctx, &caches, None, key, pitch_key, velocity);
    }

    /// Claims a poly slot and partials, stealing if needed, and starts the note.
    pub fn play_poly(
        &mut self,
        ctx: &mut PartContext<'_>,
        caches: &[PatchCache; MAX_PARTIALS_PER_POLY],
        drum: Option<usize>,
        key: u32,
        pitch_key: u32,
        velocity: u32,
    ) {
        let needed = caches.iter().filter(|c| c.play_partial && !c.dirty).count();
        if needed == 0 {
            debug!(part = self.num, key, "timbre plays no partials");
            return;
        }
        self.reap_polys(ctx.partials);

        let slot = match self.polys.iter().position(|p| !p.is_active()) {
            Some(slot) => slot,
            None => {
                let Some(victim) = (0..self.polys.len()).min_by_key(|&s| self.polys[s].steal_rank())
                else {
                    return;
                };
                debug!(part = self.num, key = self.polys[victim].key, "poly stolen");
                let me = self.polys[victim].poly_ref(self.num, victim);
                self.polys[victim].abort(me, ctx.partials);
                victim
            }
        };

        if ctx.partials.free_partial_count() < needed
            && !ctx
                .partials
                .free_partials(needed, self.num, &ctx.memory.system.reserve_settings)
        {
            debug!(part = self.num, key, needed, "no partials available, note dropped");
            return;
        }
        // Stealing may have ended other notes of this part.
        self.reap_polys(ctx.partials);

        let age = ctx.partials.next_age();
        let me = PolyRef {
            part: self.num,
            slot,
            serial: age,
        };
        let mut indices = [None; MAX_PARTIALS_PER_POLY];
        for (index, cache) in indices.iter_mut().zip(caches) {
            if cache.play_partial && !cache.dirty {
                *index = ctx.partials.alloc_partial(self.num);
            }
        }
        let controls = self.controls(ctx.tables, drum);
        for (slot, cache) in caches.iter().enumerate() {
            if let Some(i) = indices[slot] {
                let pair = indices[pair_slot(slot)];
                ctx.partials.start_partial(
                    i, me, cache, pitch_key, velocity, pair, &controls, ctx.tables, ctx.pcm, age,
                );
            }
        }
        self.polys[slot] = Poly {
            key,
            velocity,
            state: PolyState::Playing,
            partials: indices,
            sustain: caches[0].sustain,
            age,
            drum,
        };
    }

    fn controls(&self, tables: &Tables, drum: Option<usize>) -> PartControls {
        PartControls {
            volume: self.note_volume(tables, drum),
            pan: StereoVolume::from_pan(self.pan),
            bend: self.bend,
            bender_range: self.bender_range(),
            modulation: self.modulation as u32,
        }
    }

    fn note_volume(&self, tables: &Tables, drum: Option<usize>) -> u32 {
        match (&self.kind, drum) {
            (PartKind::Rhythm(state), Some(drum)) => {
                let level = state.drum_volume.get(drum).copied().unwrap_or(100) as usize;
                (self.volume_mult * tables.volume_mult[level.min(100)]) >> AMP_SHIFT
            }
            _ => self.volume_mult,
        }
    }

    /// Releases every note on `key` regardless of the pedal.
    fn release_key(&mut self, ctx: &mut PartContext<'_>, key: u32) {
        for slot in 0..self.polys.len() {
            let poly = &mut self.polys[slot];
            if poly.key == key && matches!(poly.state, PolyState::Playing | PolyState::Held) {
                let me = poly.poly_ref(self.num, slot);
                poly.start_decay(me, ctx.partials, ctx.tables);
            }
        }
    }

    pub fn stop_note(&mut self, ctx: &mut PartContext<'_>, key: u32) {
        for slot in 0..self.polys.len() {
            let poly = &mut self.polys[slot];
            if poly.state != PolyState::Playing || poly.key != key {
                continue;
            }
            let me = poly.poly_ref(self.num, slot);
            if self.hold_pedal {
                poly.hold(me, ctx.partials);
            } else {
                poly.start_decay(me, ctx.partials, ctx.tables);
            }
        }
    }

    /// Releases every note held only by the pedal.
    pub fn stop_pedal_hold(&mut self, ctx: &mut PartContext<'_>) {
        for slot in 0..self.polys.len() {
            let poly = &mut self.polys[slot];
            if poly.state == PolyState::Held {
                let me = poly.poly_ref(self.num, slot);
                poly.start_decay(me, ctx.partials, ctx.tables);
            }
        }
    }

    pub fn set_hold_pedal(&mut self, ctx: &mut PartContext<'_>, on: bool) {
        self.hold_pedal = on;
        if !on {
            self.stop_pedal_hold(ctx);
        }
    }

    /// Releases every note; the pedal still holds notes while it is down.
    pub fn all_notes_off(&mut self, ctx: &mut PartContext<'_>) {
        for slot in 0..self.polys.len() {
            let poly = &mut self.polys[slot];
            let me = poly.poly_ref(self.num, slot);
            match poly.state {
                PolyState::Playing if self.hold_pedal => poly.hold(me, ctx.partials),
                PolyState::Playing | PolyState::Held if !self.hold_pedal => {
                    poly.start_decay(me, ctx.partials, ctx.tables)
                }
                _ => {}
            }
        }
    }

    /// Silences every note at once.
    pub fn all_sound_off(&mut self, ctx: &mut PartContext<'_>) {
        for slot in 0..self.polys.len() {
            let me = self.polys[slot].poly_ref(self.num, slot);
            self.polys[slot].abort(me, ctx.partials);
        }
    }

    /// Frees polys whose partials have all finished. Returns how many.
    pub fn reap_polys(&mut self, partials: &PartialManager) -> usize {
        let mut reaped = 0;
        for slot in 0..self.polys.len() {
            let me = self.polys[slot].poly_ref(self.num, slot);
            if self.polys[slot].reap(me, partials) {
                reaped += 1;
            }
        }
        reaped
    }

    // --- Controllers ---

    fn for_each_partial(&self, partials: &mut PartialManager, mut f: impl FnMut(&Poly, &mut Partial)) {
        for (slot, poly) in self.polys.iter().enumerate().filter(|(_, p)| p.is_active()) {
            let me = poly.poly_ref(self.num, slot);
            for i in poly.partials.iter().flatten().copied() {
                if let Some(p) = partials.partial_mut(i).filter(|p| p.is_bound_to(me)) {
                    f(poly, p);
                }
            }
        }
    }

    /// MIDI volume 0..=127, stored as output level 0..=100.
    pub fn set_volume(&mut self, ctx: &mut PartContext<'_>, volume: u8) {
        self.patch_temp.output_level = (volume.min(127) as u32 * 100 / 127) as u8;
        self.update_volume(ctx);
    }

    pub fn set_expression(&mut self, ctx: &mut PartContext<'_>, expression: u8) {
        self.expression = expression.min(127);
        self.update_volume(ctx);
    }

    /// Recomputes the part volume and pushes it to every sounding partial.
    pub fn update_volume(&mut self, ctx: &mut PartContext<'_>) {
        let tables = ctx.tables;
        let level = self.patch_temp.output_level.min(100) as usize;
        let expression = self.expression as usize * 100 / 127;
        self.volume_mult = (tables.volume_mult[level] * tables.volume_mult[expression]) >> AMP_SHIFT;
        self.for_each_partial(ctx.partials, |poly, p| {
            p.set_volume(self.note_volume(tables, poly.drum));
        });
    }

    pub fn set_pan(&mut self, ctx: &mut PartContext<'_>, pan: u8) {
        if self.is_rhythm() {
            debug!(pan, "rhythm part ignores pan");
            return;
        }
        self.pan = pan.min(127);
        self.patch_temp.panpot = (self.pan as u32 * 14 / 127) as u8;
        let stereo = StereoVolume::from_pan(self.pan);
        self.for_each_partial(ctx.partials, |_, p| p.set_pan(stereo));
    }

    /// 14-bit bend, 8192 is centre.
    pub fn set_bend(&mut self, ctx: &mut PartContext<'_>, value: u16) {
        if self.is_rhythm() {
            debug!(value, "rhythm part ignores pitch bend");
            return;
        }
        self.bend = value.min(16383) as i32 - 8192;
        self.push_bend(ctx);
    }

    pub fn set_bender_range(&mut self, ctx: &mut PartContext<'_>, semitones: u8) {
        self.patch_temp.patch.bender_range = semitones.min(MAX_BENDER_RANGE);
        self.push_bend(ctx);
    }

    fn push_bend(&mut self, ctx: &mut PartContext<'_>) {
        let (bend, range, tables) = (self.bend, self.bender_range(), ctx.tables);
        self.for_each_partial(ctx.partials, |_, p| p.set_bend(bend, range, tables));
    }

    pub fn set_modulation(&mut self, ctx: &mut PartContext<'_>, modulation: u8) {
        if self.is_rhythm() {
            debug!(modulation, "rhythm part ignores modulation");
            return;
        }
        self.modulation = modulation.min(127);
        let m = self.modulation as u32;
        self.for_each_partial(ctx.partials, |_, p| p.set_modulation(m));
    }

    pub fn set_rpn_msb(&mut self, msb: u8) {
        self.rpn.0 = msb;
    }

    pub fn set_rpn_lsb(&mut self, lsb: u8) {
        self.rpn.1 = lsb;
    }

    /// Data entry for the selected RPN. Only pitch bend sensitivity is supported.
    pub fn data_entry(&mut self, ctx: &mut PartContext<'_>, value: u8) {
        if self.rpn == (0, 0) {
            self.set_bender_range(ctx, value);
        } else {
            debug!(part = self.num, rpn = ?self.rpn, "unsupported RPN");
        }
    }

    pub fn reset_all_controllers(&mut self, ctx: &mut PartContext<'_>) {
        self.modulation = 0;
        self.expression = 127;
        self.bend = 0;
        self.rpn = (RPN_NULL, RPN_NULL);
        self.set_hold_pedal(ctx, false);
        self.update_volume(ctx);
        self.push_bend(ctx);
        self.for_each_partial(ctx.partials, |_, p| p.set_modulation(0));
    }
}
