use super::params::{
    PatchParam, RhythmTemp, SystemParams, TimbreParam, PATCH_COUNT, RHYTHM_KEY_COUNT,
    TIMBRE_COUNT,
};
use super::partial_manager::PartialManager;
use super::rom::{PcmData, SoundBank};
use super::tables::Tables;

/// The synth's parameter memory.
#[derive(Debug, Clone)]
pub struct Memory {
    /// Groups A, B, memory and rhythm, 64 each.
    pub timbres: Vec<TimbreParam>,
    pub patches: Vec<PatchParam>,
    pub rhythm: Vec<RhythmTemp>,
    pub system: SystemParams,
}

impl Memory {
    /// Power-on memory: ROM timbres and rhythm setup, factory patches.
    pub fn from_bank(bank: &SoundBank) -> Self {
        let mut timbres = bank.timbres.clone();
        timbres.resize(TIMBRE_COUNT, TimbreParam::silent(""));
        let mut rhythm = bank.rhythm_settings.clone();
        rhythm.resize(RHYTHM_KEY_COUNT, RhythmTemp::default());
        Self {
            timbres,
            patches: (0..PATCH_COUNT).map(PatchParam::factory).collect(),
            rhythm,
            system: SystemParams {
                reserve_settings: bank.reserve_settings,
                ..SystemParams::default()
            },
        }
    }
}

/// Shared state a part needs to start and steer notes.
pub struct PartContext<'a> {
    pub tables: &'a Tables,
    pub pcm: &'a PcmData,
    pub memory: &'a Memory,
    pub partials: &'a mut PartialManager,
}
