//! Partial structures: how the two partials of a pair are generated and combined.
//!
//! A timbre has two structure numbers, one for partials 1 & 2 and one for 3 & 4.
//! Each of the 13 structures fixes which side of the pair is a PCM partial and
//! how the pair's outputs are mixed.

use super::params::CommonParam;

pub const STRUCTURE_COUNT: usize = 13;

/// Bit 1: first partial of the pair is PCM. Bit 0: second partial is PCM.
const PCM_FLAGS: [u8; STRUCTURE_COUNT] = [0, 0, 2, 2, 1, 3, 3, 0, 3, 0, 2, 1, 3];

const MIX_TYPES: [MixType; STRUCTURE_COUNT] = [
    MixType::Mix,
    MixType::RingMix,
    MixType::Mix,
    MixType::RingMix,
    MixType::RingMix,
    MixType::Mix,
    MixType::RingMix,
    MixType::Stereo,
    MixType::Stereo,
    MixType::Ring,
    MixType::Ring,
    MixType::Ring,
    MixType::Ring,
];

/// How a partial pair combines into one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixType {
    /// Plain sum of both partials.
    #[default]
    Mix,
    /// First partial plus the ring product of both.
    RingMix,
    /// Ring product only.
    Ring,
    /// First partial to the left channel, second to the right.
    Stereo,
}

impl MixType {
    /// Ring structures need a modulator; without a partner partial they ring with noise.
    pub fn uses_ring(self) -> bool {
        matches!(self, MixType::RingMix | MixType::Ring)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Structure {
    index: usize,
}

impl Structure {
    /// Out-of-range values fold to the last structure, as the hardware's
    /// parameter clamp does.
    pub fn new(raw: u8) -> Self {
        Self {
            index: (raw as usize).min(STRUCTURE_COUNT - 1),
        }
    }

    /// Structure governing timbre partial `slot` (0..4).
    pub fn for_slot(common: &CommonParam, slot: usize) -> Self {
        if slot < 2 {
            Self::new(common.pstruct12)
        } else {
            Self::new(common.pstruct34)
        }
    }

    /// 1-based structure number, as shown on the hardware.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    /// Whether the partial at pair position `position` (0 or 1) plays PCM.
    pub fn is_pcm(&self, position: usize) -> bool {
        (PCM_FLAGS[self.index] >> (1 - (position & 1))) & 1 != 0
    }

    pub fn mix_type(&self) -> MixType {
        MIX_TYPES[self.index]
    }
}

/// Position of timbre slot `slot` inside its pair.
pub fn pair_position(slot: usize) -> usize {
    slot & 1
}

/// Slot of the other half of `slot`'s pair.
pub fn pair_slot(slot: usize) -> usize {
    slot ^ 1
}
