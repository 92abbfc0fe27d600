use super::partial::PolyRef;
use super::partial_manager::PartialManager;
use super::prelude::MAX_PARTIALS_PER_POLY;
use super::tables::Tables;

/// Lifecycle of one note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolyState {
    #[default]
    Inactive,
    Playing,
    /// Key released while the hold pedal is down.
    Held,
    Releasing,
}

/// One sounding note: up to four partials from the shared pool.
#[derive(Debug, Clone, Default)]
pub struct Poly {
    pub key: u32,
    pub velocity: u32,
    pub state: PolyState,
    /// Pool index of the partial started for each timbre slot.
    pub partials: [Option<usize>; MAX_PARTIALS_PER_POLY],
    pub sustain: bool,
    /// Stamp shared with its partials. Smaller is older.
    pub age: u64,
    /// Drum slot for rhythm notes.
    pub drum: Option<usize>,
}

impl Poly {
    pub fn is_active(&self) -> bool {
        self.state != PolyState::Inactive
    }

    pub fn poly_ref(&self, part: usize, slot: usize) -> PolyRef {
        PolyRef {
            part,
            slot,
            serial: self.age,
        }
    }

    /// Pool indices of partials still playing for this note.
    pub fn bound_partials<'a>(
        &'a self,
        me: PolyRef,
        partials: &'a PartialManager,
    ) -> impl Iterator<Item = usize> + 'a {
        self.partials
            .iter()
            .flatten()
            .copied()
            .filter(move |&i| partials.partial(i).is_some_and(|p| p.is_bound_to(me)))
    }

    /// Marks the poly inactive once none of its partials is left. Returns
    /// true if it just became inactive.
    pub fn reap(&mut self, me: PolyRef, partials: &PartialManager) -> bool {
        if !self.is_active() || self.bound_partials(me, partials).next().is_some() {
            return false;
        }
        *self = Self::default();
        true
    }

    /// Note-off: releases every partial of the note.
    pub fn start_decay(&mut self, me: PolyRef, partials: &mut PartialManager, tables: &Tables) {
        if !self.is_active() {
            return;
        }
        self.state = PolyState::Releasing;
        for i in self.partials.iter().flatten().copied() {
            if let Some(p) = partials.partial_mut(i).filter(|p| p.is_bound_to(me)) {
                p.set_pedal_held(false);
                p.start_decay_all(tables);
            }
        }
    }

    /// Key released under the hold pedal. The note keeps sounding.
    pub fn hold(&mut self, me: PolyRef, partials: &mut PartialManager) {
        if self.state != PolyState::Playing {
            return;
        }
        self.state = PolyState::Held;
        for i in self.partials.iter().flatten().copied() {
            if let Some(p) = partials.partial_mut(i).filter(|p| p.is_bound_to(me)) {
                p.set_pedal_held(true);
            }
        }
    }

    /// Silences the note immediately and frees its partials.
    pub fn abort(&mut self, me: PolyRef, partials: &mut PartialManager) {
        if self.is_active() {
            partials.deactivate_poly(me);
        }
        *self = Self::default();
    }

    /// Order in which polys are stolen: releasing, then pedal-held, then
    /// playing; oldest first within each.
    pub fn steal_rank(&self) -> (u8, u64) {
        let class = match self.state {
            PolyState::Releasing | PolyState::Inactive => 0,
            PolyState::Held => 1,
            PolyState::Playing => 2,
        };
        (class, self.age)
    }
}
