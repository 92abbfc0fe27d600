//! Control and PCM ROM loading.
//!
//! The control ROM holds the factory timbres, rhythm setup, PCM wave table and
//! power-on defaults at version-specific offsets. The PCM ROM holds
//! bit-scrambled, log-encoded samples.

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::synth::params::{
    PcmWaveEntry, RhythmTemp, TimbreParam, DEFAULT_RESERVE_SETTINGS, PART_COUNT,
    PCM_WAVE_STRUCT_SIZE, RHYTHM_KEY_COUNT, RHYTHM_TEMP_SIZE, TIMBRE_COUNT, TIMBRE_PARAM_SIZE,
};

pub const CONTROL_ROM_SIZE: usize = 0x10000;

/// First absolute timbre number of each group.
pub const TIMBRE_GROUP_A: usize = 0;
pub const TIMBRE_GROUP_B: usize = 64;
pub const TIMBRE_GROUP_MEMORY: usize = 128;
pub const TIMBRE_GROUP_RHYTHM: usize = 192;

/// Bit order of a scrambled PCM ROM word.
const PCM_BIT_ORDER: [usize; 16] = [0, 9, 1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13, 14, 15, 8];

/// Where everything lives in one control ROM version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRomMap {
    pub id_pos: usize,
    pub id: &'static [u8],
    pub pcm_table: usize,
    pub pcm_count: usize,
    pub timbre_a_map: usize,
    pub timbre_a_offset: usize,
    pub timbre_b_map: usize,
    pub timbre_b_offset: usize,
    pub timbre_r_map: usize,
    pub timbre_r_count: usize,
    pub rhythm_settings: usize,
    pub rhythm_settings_count: usize,
    pub reserve_settings: usize,
    pub panpot_settings: usize,
    pub program_settings: usize,
}

pub static CONTROL_ROM_MAPS: [ControlRomMap; 4] = [
    // MT-32 1.04
    ControlRomMap {
        id_pos: 0x4014,
        id: b"\0 ver1.04 14 July 87 ",
        pcm_table: 0x3000,
        pcm_count: 128,
        timbre_a_map: 0x8000,
        timbre_a_offset: 0x0000,
        timbre_b_map: 0xC000,
        timbre_b_offset: 0x4000,
        timbre_r_map: 0x3200,
        timbre_r_count: 30,
        rhythm_settings: 0x73A6,
        rhythm_settings_count: 85,
        reserve_settings: 0x57C7,
        panpot_settings: 0x57E2,
        program_settings: 0x57D0,
    },
    // MT-32 1.05
    ControlRomMap {
        id_pos: 0x4014,
        id: b"\0 ver1.05 06 Aug, 87 ",
        pcm_table: 0x3000,
        pcm_count: 128,
        timbre_a_map: 0x8000,
        timbre_a_offset: 0x0000,
        timbre_b_map: 0xC000,
        timbre_b_offset: 0x4000,
        timbre_r_map: 0x3200,
        timbre_r_count: 30,
        rhythm_settings: 0x7414,
        rhythm_settings_count: 85,
        reserve_settings: 0x57C7,
        panpot_settings: 0x57E2,
        program_settings: 0x57D0,
    },
    // MT-32 1.06
    ControlRomMap {
        id_pos: 0x4014,
        id: b"\0 ver1.06 31 Aug, 87 ",
        pcm_table: 0x3000,
        pcm_count: 128,
        timbre_a_map: 0x8000,
        timbre_a_offset: 0x0000,
        timbre_b_map: 0xC000,
        timbre_b_offset: 0x4000,
        timbre_r_map: 0x3200,
        timbre_r_count: 30,
        rhythm_settings: 0x7414,
        rhythm_settings_count: 85,
        reserve_settings: 0x57D9,
        panpot_settings: 0x57F4,
        program_settings: 0x57E2,
    },
    // MT-32 1.07
    ControlRomMap {
        id_pos: 0x4010,
        id: b"\0 ver1.07 10 Oct, 87 ",
        pcm_table: 0x3000,
        pcm_count: 128,
        timbre_a_map: 0x8000,
        timbre_a_offset: 0x0000,
        timbre_b_map: 0xC000,
        timbre_b_offset: 0x4000,
        timbre_r_map: 0x3200,
        timbre_r_count: 30,
        rhythm_settings: 0x73FE,
        rhythm_settings_count: 85,
        reserve_settings: 0x57B1,
        panpot_settings: 0x57CC,
        program_settings: 0x57BA,
    },
];

impl ControlRomMap {
    /// Finds the map whose identification string matches `data`.
    pub fn identify(data: &[u8]) -> Option<&'static ControlRomMap> {
        CONTROL_ROM_MAPS.iter().find(|map| {
            data.get(map.id_pos..map.id_pos + map.id.len()) == Some(map.id)
        })
    }

    pub fn version(&self) -> String {
        String::from_utf8_lossy(self.id)
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string()
    }
}

/// Decoded PCM ROM: the wave table and the linear samples it points into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcmData {
    pub waves: Vec<PcmWaveEntry>,
    pub samples: Vec<i16>,
}

/// Everything the synth needs from the ROMs.
#[derive(Debug, Clone)]
pub struct SoundBank {
    pub pcm: PcmData,
    /// Groups A, B, memory and rhythm, 64 each.
    pub timbres: Vec<TimbreParam>,
    pub rhythm_settings: Vec<RhythmTemp>,
    pub reserve_settings: [u8; PART_COUNT],
    /// Power-on panpot for each part, 0..=14.
    pub panpot_settings: [u8; PART_COUNT],
    /// Power-on program for each part.
    pub program_settings: [u8; PART_COUNT],
}

impl SoundBank {
    /// A bank with the given PCM data and silent timbres everywhere. Hosts
    /// fill in timbres and rhythm keys themselves.
    pub fn new(waves: Vec<PcmWaveEntry>, samples: Vec<i16>) -> Self {
        Self {
            pcm: PcmData { waves, samples },
            timbres: (0..TIMBRE_COUNT)
                .map(|i| TimbreParam::silent(&format!("Blank {i:03}")))
                .collect(),
            rhythm_settings: vec![RhythmTemp::default(); RHYTHM_KEY_COUNT],
            reserve_settings: DEFAULT_RESERVE_SETTINGS,
            panpot_settings: [7; PART_COUNT],
            program_settings: [0; PART_COUNT],
        }
    }

    pub fn from_roms<C, P>(control: C, pcm: P) -> Result<Self>
    where
        C: Read + Seek,
        P: Read + Seek,
    {
        let control = load_control_rom(control)?;
        let samples = load_pcm_rom(pcm)?;
        control.into_bank(samples)
    }
}

/// A control ROM image and the map that describes it.
#[derive(Debug, Clone)]
pub struct ControlRom {
    pub map: &'static ControlRomMap,
    pub data: Vec<u8>,
}

impl ControlRom {
    fn slice(&self, start: usize, len: usize, what: &str) -> Result<&[u8]> {
        self.data.get(start..start + len).ok_or_else(|| {
            Error::Rom(format!(
                "{what} at {start:#06x}+{len} lies outside the control ROM"
            ))
        })
    }

    /// Decodes the PCM wave table.
    pub fn pcm_waves(&self) -> Result<Vec<PcmWaveEntry>> {
        (0..self.map.pcm_count)
            .map(|i| {
                let at = self.map.pcm_table + i * PCM_WAVE_STRUCT_SIZE;
                PcmWaveEntry::from_rom_struct(self.slice(at, PCM_WAVE_STRUCT_SIZE, "pcm wave")?)
            })
            .collect()
    }

    fn timbre_address(&self, map: usize, index: usize, offset: usize) -> Result<usize> {
        let ptr = self.slice(map + index * 2, 2, "timbre pointer")?;
        Ok(u16::from_le_bytes([ptr[0], ptr[1]]) as usize + offset)
    }

    /// Reads `count` timbres through the pointer table at `map` into
    /// `timbres[start..]`.
    fn read_timbres(
        &self,
        timbres: &mut [TimbreParam],
        map: usize,
        offset: usize,
        count: usize,
        start: usize,
        compressed: bool,
    ) -> Result<()> {
        for i in 0..count {
            let addr = self.timbre_address(map, i, offset)?;
            let timbre = if compressed {
                let rest = self.data.get(addr..).ok_or_else(|| {
                    Error::Rom(format!("timbre {} pointer {addr:#06x} out of range", start + i))
                })?;
                TimbreParam::from_compressed(rest)?.0
            } else {
                TimbreParam::from_bytes(self.slice(addr, TIMBRE_PARAM_SIZE, "timbre")?)?
            };
            timbres[start + i] = timbre;
        }
        Ok(())
    }

    fn settings(&self, at: usize, what: &str) -> Result<[u8; PART_COUNT]> {
        let mut out = [0u8; PART_COUNT];
        out.copy_from_slice(self.slice(at, PART_COUNT, what)?);
        Ok(out)
    }

    /// Builds a [`SoundBank`] from this ROM and decoded PCM samples.
    pub fn into_bank(self, samples: Vec<i16>) -> Result<SoundBank> {
        let map = self.map;
        let waves = self.pcm_waves()?;
        for (index, wave) in waves.iter().enumerate() {
            wave.validate(index, samples.len())?;
        }

        let mut bank = SoundBank::new(waves, samples);
        let timbres = &mut bank.timbres;
        self.read_timbres(timbres, map.timbre_a_map, map.timbre_a_offset, 64, TIMBRE_GROUP_A, false)?;
        self.read_timbres(timbres, map.timbre_b_map, map.timbre_b_offset, 64, TIMBRE_GROUP_B, false)?;
        // Rhythm timbres are stored compressed.
        let count = map.timbre_r_count.min(TIMBRE_COUNT - TIMBRE_GROUP_RHYTHM);
        self.read_timbres(timbres, map.timbre_r_map, 0, count, TIMBRE_GROUP_RHYTHM, true)?;

        bank.rhythm_settings = (0..map.rhythm_settings_count.min(RHYTHM_KEY_COUNT))
            .map(|i| {
                let at = map.rhythm_settings + i * RHYTHM_TEMP_SIZE;
                RhythmTemp::from_bytes(self.slice(at, RHYTHM_TEMP_SIZE, "rhythm setting")?)
            })
            .collect::<Result<_>>()?;
        bank.rhythm_settings.resize(RHYTHM_KEY_COUNT, RhythmTemp::default());

        bank.reserve_settings = self.settings(map.reserve_settings, "reserve settings")?;
        bank.panpot_settings = self.settings(map.panpot_settings, "panpot settings")?;
        bank.program_settings = self.settings(map.program_settings, "program settings")?;
        debug!(
            timbres = bank.timbres.len(),
            waves = bank.pcm.waves.len(),
            "sound bank loaded"
        );
        Ok(bank)
    }
}

fn read_all<R: Read + Seek>(mut reader: R) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(data)
}

/// Reads and identifies a control ROM image.
pub fn load_control_rom<R: Read + Seek>(reader: R) -> Result<ControlRom> {
    let data = read_all(reader)?;
    if data.len() != CONTROL_ROM_SIZE {
        return Err(Error::Rom(format!(
            "control ROM must be {CONTROL_ROM_SIZE} bytes, got {}",
            data.len()
        )));
    }
    let map = ControlRomMap::identify(&data)
        .ok_or_else(|| Error::Rom("unrecognised control ROM version".into()))?;
    info!(version = %map.version(), "control ROM identified");
    Ok(ControlRom { map, data })
}

/// Reads a PCM ROM image and decodes it to linear samples.
pub fn load_pcm_rom<R: Read + Seek>(reader: R) -> Result<Vec<i16>> {
    let data = read_all(reader)?;
    if data.is_empty() || data.len() % 2 != 0 {
        return Err(Error::Rom(format!(
            "PCM ROM length {} is not a whole number of words",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .map(|w| decode_pcm_word(descramble_pcm_word(w[0], w[1])))
        .collect())
}

/// Reorders the address-line scrambled bits of one PCM ROM word.
pub fn descramble_pcm_word(hi: u8, lo: u8) -> u16 {
    let mut word = 0u16;
    for (u, &src) in PCM_BIT_ORDER.iter().take(15).enumerate() {
        let bit = if src < 8 {
            (hi >> (7 - src)) & 1
        } else {
            (lo >> (7 - (src - 8))) & 1
        };
        word |= (bit as u16) << (15 - u);
    }
    word
}

/// Log-encoded word to a linear sample. Bit 15 is the sign, the rest is
/// attenuation in 1/4096 octave steps.
pub fn decode_pcm_word(word: u16) -> i16 {
    let magnitude = (word & 0x7FFF) as f64;
    let linear = (32767.0 * 2f64.powf(-magnitude / 4096.0)).round() as i16;
    if word & 0x8000 != 0 {
        -linear
    } else {
        linear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_word_is_full_scale() {
        assert_eq!(decode_pcm_word(0), 32767);
        assert_eq!(decode_pcm_word(0x8000), -32767);
        assert_eq!(decode_pcm_word(4096), 16384);
    }

    #[test]
    fn test_descramble_moves_bits() {
        assert_eq!(descramble_pcm_word(0, 0), 0);
        // Source bit 0 (MSB of the first byte) lands in the sign bit.
        assert_eq!(descramble_pcm_word(0x80, 0), 0x8000);
        // Source bit 9 lands next to it.
        assert_eq!(descramble_pcm_word(0, 0x40), 0x4000);
        // Source bit 8 is the dropped sixteenth position.
        assert_eq!(descramble_pcm_word(0, 0x80), 0);
    }

    #[test]
    fn test_identify_each_version() {
        for map in &CONTROL_ROM_MAPS {
            let mut data = vec![0u8; CONTROL_ROM_SIZE];
            data[map.id_pos..map.id_pos + map.id.len()].copy_from_slice(map.id);
            assert_eq!(ControlRomMap::identify(&data), Some(map));
        }
        assert_eq!(ControlRomMap::identify(&[0u8; 16]), None);
    }
}
