//! The shared partial pool.
//!
//! Every part draws its partials from one fixed pool. Partials refer to their
//! pair by pool index; both sides of a link are cleared together.

use tracing::debug;

use super::params::PART_COUNT;
use super::partial::{PartControls, Partial, PolyRef};
use super::patch::{PatchCache, StereoVolume};
use super::prelude::{saturate_i16, MAX_SAMPLE_OUTPUT};
use super::rom::PcmData;
use super::structure::MixType;
use super::tables::Tables;

#[derive(Debug, Clone)]
pub struct PartialManager {
    partials: Vec<Partial>,
    next_age: u64,
    /// Modulator for pairless ring partials.
    noise: Vec<i32>,
}

impl PartialManager {
    pub fn new(count: usize) -> Self {
        Self {
            partials: (0..count).map(|_| Partial::new()).collect(),
            next_age: 0,
            noise: vec![0; MAX_SAMPLE_OUTPUT],
        }
    }

    pub fn len(&self) -> usize {
        self.partials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    pub fn partial(&self, index: usize) -> Option<&Partial> {
        self.partials.get(index)
    }

    pub fn partial_mut(&mut self, index: usize) -> Option<&mut Partial> {
        self.partials.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partial> {
        self.partials.iter()
    }

    /// Monotonic stamp for a new note; older notes have smaller ages.
    pub fn next_age(&mut self) -> u64 {
        self.next_age += 1;
        self.next_age
    }

    /// Claims the first free partial for `part`.
    pub fn alloc_partial(&mut self, part: usize) -> Option<usize> {
        let index = self.partials.iter().position(|p| !p.is_active())?;
        self.partials[index].activate(part);
        Some(index)
    }

    pub fn free_partial_count(&self) -> usize {
        self.partials.iter().filter(|p| !p.is_active()).count()
    }

    pub fn active_count(&self) -> usize {
        self.partials.len() - self.free_partial_count()
    }

    /// Active partials owned by each part.
    pub fn per_part_usage(&self) -> [usize; PART_COUNT] {
        let mut usage = [0; PART_COUNT];
        for part in self.partials.iter().filter_map(Partial::owner_part) {
            if part < PART_COUNT {
                usage[part] += 1;
            }
        }
        usage
    }

    /// Frees one partial and unlinks its pair.
    pub fn deactivate(&mut self, index: usize) {
        let Some(partial) = self.partials.get_mut(index) else {
            return;
        };
        let pair = partial.pair.take();
        partial.deactivate();
        if let Some(pair) = pair {
            if let Some(other) = self.partials.get_mut(pair) {
                if other.pair == Some(index) {
                    other.pair = None;
                }
            }
        }
    }

    pub fn deactivate_all(&mut self) {
        for i in 0..self.partials.len() {
            self.deactivate(i);
        }
    }

    /// Frees every partial playing for `poly`. Returns how many were freed.
    pub fn deactivate_poly(&mut self, poly: PolyRef) -> usize {
        let mut freed = 0;
        for i in 0..self.partials.len() {
            if self.partials[i].is_bound_to(poly) {
                self.deactivate(i);
                freed += 1;
            }
        }
        freed
    }

    /// Steal rank of an active partial: releasing notes first, then notes
    /// held only by the pedal, then playing notes, oldest first within each.
    fn steal_rank(partial: &Partial) -> (u8, u64) {
        let class = if partial.is_decaying() {
            0
        } else if partial.is_pedal_held() {
            1
        } else {
            2
        };
        (class, partial.age())
    }

    /// The poly whose partials `part` should lose first.
    pub fn pick_victim(&self, part: usize) -> Option<PolyRef> {
        self.partials
            .iter()
            .filter(|p| p.owner_part() == Some(part))
            .filter_map(|p| p.poly().map(|poly| (Self::steal_rank(p), poly)))
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, poly)| poly)
    }

    /// Part furthest above its reserve. Ties go to the lowest part number.
    fn most_over_reserve(usage: &[usize; PART_COUNT], reserve: &[u8; PART_COUNT]) -> Option<usize> {
        (0..PART_COUNT)
            .filter(|&p| usage[p] > reserve[p] as usize)
            .max_by_key(|&p| (usage[p] - reserve[p] as usize, std::cmp::Reverse(p)))
    }

    /// Steals partials until `needed` are free.
    ///
    /// A part below its reserve takes from the part most over its reserve,
    /// and from itself only when no part is over. A part at or above its
    /// reserve recycles its own notes first. Returns false when nothing
    /// more can be stolen.
    pub fn free_partials(&mut self, needed: usize, part: usize, reserve: &[u8; PART_COUNT]) -> bool {
        if part >= PART_COUNT || needed > self.partials.len() {
            return false;
        }
        while self.free_partial_count() < needed {
            let usage = self.per_part_usage();
            let under_reserve = usage[part] < reserve[part] as usize;
            let own = || (usage[part] > 0).then_some(part);
            let victim_part = if under_reserve {
                Self::most_over_reserve(&usage, reserve).or_else(own)
            } else {
                own().or_else(|| Self::most_over_reserve(&usage, reserve))
            };
            let Some(victim) = victim_part.and_then(|p| self.pick_victim(p)) else {
                debug!(part, needed, "no partial to steal");
                return false;
            };
            let freed = self.deactivate_poly(victim);
            debug!(part, victim_part = victim.part, freed, "stole partials");
            if freed == 0 {
                return false;
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    pub fn start_partial(
        &mut self,
        index: usize,
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
        if let Some(partial) = self.partials.get_mut(index) {
            partial.start_partial(poly, cache, key, velocity, pair, controls, tables, pcm, age);
        }
    }

    pub fn clear_already_outputted(&mut self) {
        for p in self.partials.iter_mut() {
            p.already_outputted = false;
        }
    }

    pub fn should_reverb(&self, index: usize) -> bool {
        self.partials.get(index).is_some_and(Partial::should_reverb)
    }

    /// Renders partial `index` together with its pair and adds the panned
    /// stereo result to `out` (interleaved, `out.len() / 2` frames).
    ///
    /// Returns true only if something was written. The second partial of a
    /// pair is rendered by the first and returns false on its own turn.
    /// Partials that finished during this block are freed afterwards.
    pub fn produce_output(
        &mut self,
        index: usize,
        tables: &Tables,
        pcm: &PcmData,
        out: &mut [i32],
    ) -> bool {
        let frames = (out.len() / 2).min(MAX_SAMPLE_OUTPUT);
        let Some(me) = self.partials.get(index) else {
            return false;
        };
        if !me.is_active() || me.already_outputted {
            return false;
        }
        let mix_type = me.cache().mix_type;
        let noise = me.use_noise_pair;
        let (first, second) = match (me.cache().structure_position, me.pair) {
            (_, None) if noise => (Some(index), None),
            (0, pair) => (Some(index), pair),
            (_, pair) => (pair, Some(index)),
        };

        let mut rendered = [false; 2];
        for (slot, idx) in [first, second].into_iter().enumerate() {
            if let Some(i) = idx {
                let p = &mut self.partials[i];
                p.already_outputted = true;
                rendered[slot] = p.generate_samples(frames, tables, pcm);
            }
        }

        if noise {
            for (dst, &src) in self.noise.iter_mut().zip(&tables.noise_buf).take(frames) {
                *dst = src as i32;
            }
        }
        let a = first
            .filter(|_| rendered[0])
            .map(|i| (&self.partials[i].buffer[..frames], self.partials[i].pan()));
        let b = if noise {
            Some((&self.noise[..frames], StereoVolume::default()))
        } else {
            second
                .filter(|_| rendered[1])
                .map(|i| (&self.partials[i].buffer[..frames], self.partials[i].pan()))
        };
        let wrote = mix_pair(mix_type, a, b, &mut out[..frames * 2]);

        for i in [first, second].into_iter().flatten() {
            if !self.partials[i].is_playing() {
                self.deactivate(i);
            }
        }
        wrote
    }
}

type PartialOut<'a> = (&'a [i32], StereoVolume);

#[inline]
fn ring(a: i32, b: i32) -> i32 {
    saturate_i16((a * b) >> 14) as i32
}

/// Combines the two halves of a pair and pans the result into `out`.
fn mix_pair(
    mix: MixType,
    first: Option<PartialOut<'_>>,
    second: Option<PartialOut<'_>>,
    out: &mut [i32],
) -> bool {
    match (mix, first, second) {
        (MixType::Stereo, a, b) => {
            if a.is_none() && b.is_none() {
                return false;
            }
            for (i, frame) in out.chunks_exact_mut(2).enumerate() {
                if let Some((buf, pan)) = a {
                    frame[0] += (buf[i] * pan.left) >> 15;
                }
                if let Some((buf, pan)) = b {
                    frame[1] += (buf[i] * pan.right) >> 15;
                }
            }
            true
        }
        (MixType::Mix, Some((a, pan)), Some((b, _))) => {
            pan_into(out, pan, |i| a[i] + b[i]);
            true
        }
        (MixType::Mix, Some((buf, pan)), None) | (MixType::Mix, None, Some((buf, pan))) => {
            pan_into(out, pan, |i| buf[i]);
            true
        }
        (MixType::RingMix, Some((a, pan)), Some((b, _))) => {
            pan_into(out, pan, |i| a[i] + ring(a[i], b[i]));
            true
        }
        (MixType::RingMix, Some((a, pan)), None) => {
            pan_into(out, pan, |i| a[i]);
            true
        }
        (MixType::Ring, Some((a, pan)), Some((b, _))) => {
            pan_into(out, pan, |i| ring(a[i], b[i]));
            true
        }
        _ => false,
    }
}

#[inline]
fn pan_into(out: &mut [i32], pan: StereoVolume, sample: impl Fn(usize) -> i32) {
    for (i, frame) in out.chunks_exact_mut(2).enumerate() {
        let s = sample(i) as i64;
        frame[0] += ((s * pan.left as i64) >> 15) as i32;
        frame[1] += ((s * pan.right as i64) >> 15) as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(m: &mut PartialManager, part: usize, slot: usize) -> PolyRef {
        let age = m.next_age();
        PolyRef { part, slot, serial: age }
    }

    #[test]
    fn test_alloc_and_free() {
        let mut m = PartialManager::new(4);
        assert_eq!(m.free_partial_count(), 4);
        let a = m.alloc_partial(2).unwrap();
        let b = m.alloc_partial(2).unwrap();
        assert_ne!(a, b);
        assert_eq!(m.per_part_usage()[2], 2);
        m.deactivate(a);
        assert_eq!(m.free_partial_count(), 3);
        m.deactivate_all();
        assert_eq!(m.free_partial_count(), 4);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut m = PartialManager::new(2);
        assert!(m.alloc_partial(0).is_some());
        assert!(m.alloc_partial(0).is_some());
        assert!(m.alloc_partial(0).is_none());
    }

    #[test]
    fn test_deactivate_clears_both_pair_links() {
        let mut m = PartialManager::new(2);
        let a = m.alloc_partial(0).unwrap();
        let b = m.alloc_partial(0).unwrap();
        m.partials[a].pair = Some(b);
        m.partials[b].pair = Some(a);
        m.deactivate(b);
        assert_eq!(m.partials[a].pair, None);
        assert_eq!(m.partials[b].pair, None);
    }

    #[test]
    fn test_reserve_decides_victim_part() {
        let tables = Tables::init(&[], 0, 32000, 440.0).unwrap();
        let pcm = PcmData::default();
        let cache = PatchCache::default();
        let mut m = PartialManager::new(4);
        // Part 1 holds all four partials, two notes of two partials.
        for slot in 0..2 {
            let poly = stamp(&mut m, 1, slot);
            for _ in 0..2 {
                let i = m.alloc_partial(1).unwrap();
                m.start_partial(i, poly, &cache, 60, 100, None, &PartControls::default(), &tables, &pcm, poly.serial);
            }
        }
        let mut reserve = [0u8; PART_COUNT];
        reserve[0] = 2;
        assert!(m.free_partials(2, 0, &reserve));
        assert_eq!(m.per_part_usage()[1], 2);
        // The oldest note went first.
        assert!(m.iter().filter(|p| p.is_active()).all(|p| p.poly().unwrap().slot == 1));
    }

    #[test]
    fn test_nothing_to_steal() {
        let mut m = PartialManager::new(2);
        m.alloc_partial(3);
        m.alloc_partial(3);
        // Part 0 has no reserve, owns nothing, and part 3 is within its reserve.
        let mut reserve = [0u8; PART_COUNT];
        reserve[3] = 2;
        assert!(!m.free_partials(1, 0, &reserve));
        assert!(!m.free_partials(3, 0, &reserve));
    }

    #[test]
    fn test_ring_of_silence_writes_nothing() {
        let mut out = [0i32; 8];
        assert!(!mix_pair(MixType::Ring, None, None, &mut out));
        let buf = [100i32; 4];
        assert!(!mix_pair(MixType::Ring, Some((&buf, StereoVolume::default())), None, &mut out));
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_stereo_splits_channels() {
        let a = [1000i32; 2];
        let b = [2000i32; 2];
        let mut out = [0i32; 4];
        let centre = StereoVolume::from_pan(64);
        assert!(mix_pair(MixType::Stereo, Some((&a, centre)), Some((&b, centre)), &mut out));
        assert_eq!(out[0], (1000 * 32767) >> 15);
        assert_eq!(out[1], (2000 * 32767) >> 15);
    }
}
