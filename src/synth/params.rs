//! Byte-exact MT-32 memory and ROM parameter layouts.
//!
//! Every struct here mirrors a block of the hardware's parameter memory and
//! parses from/serialises to exactly the bytes the ROM and SysEx dumps use.

use crate::error::{Error, Result};

pub const TIMBRE_NAME_LEN: usize = 10;
pub const COMMON_PARAM_SIZE: usize = 14;
pub const PARTIAL_PARAM_SIZE: usize = 58;
pub const TIMBRE_PARAM_SIZE: usize = COMMON_PARAM_SIZE + 4 * PARTIAL_PARAM_SIZE;
pub const PATCH_PARAM_SIZE: usize = 8;
pub const PATCH_TEMP_SIZE: usize = 16;
pub const RHYTHM_TEMP_SIZE: usize = 4;
pub const SYSTEM_PARAM_SIZE: usize = 23;
pub const PCM_WAVE_STRUCT_SIZE: usize = 4;

/// Number of addressable parts (8 melodic + rhythm).
pub const PART_COUNT: usize = 9;
/// Index of the rhythm part.
pub const RHYTHM_PART: usize = 8;
pub const TIMBRE_COUNT: usize = 256;
pub const PATCH_COUNT: usize = 128;
pub const PCM_WAVE_COUNT: usize = 128;
/// Drum keys 24..=108.
pub const RHYTHM_KEY_COUNT: usize = 85;
pub const RHYTHM_FIRST_KEY: u32 = 24;

fn check_len(what: &str, bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() < expected {
        return Err(Error::Rom(format!(
            "{what}: need {expected} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommonParam {
    pub name: [u8; TIMBRE_NAME_LEN],
    /// Structure of partials 1 & 2, 0..=12.
    pub pstruct12: u8,
    /// Structure of partials 3 & 4, 0..=12.
    pub pstruct34: u8,
    /// Bit `n` set means partial `n` plays.
    pub pmute: u8,
    pub nosustain: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WgParam {
    pub coarse: u8,
    pub fine: u8,
    pub keyfollow: u8,
    pub bender: u8,
    /// Bit 0: 0 = square, 1 = sawtooth. Ignored for PCM partials.
    pub waveform: u8,
    pub pcmwave: u8,
    pub pulsewid: u8,
    pub pwvelo: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PitchEnvParam {
    pub depth: u8,
    pub sensitivity: u8,
    pub timekeyfollow: u8,
    pub time: [u8; 4],
    /// L0, L1, L2, sustain, end. 50 is no deviation.
    pub level: [u8; 5],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LfoParam {
    pub rate: u8,
    pub depth: u8,
    pub modsense: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TvfParam {
    pub cutoff: u8,
    pub resonance: u8,
    pub keyfollow: u8,
    pub biaspoint: u8,
    pub biaslevel: u8,
    pub envdepth: u8,
    pub envsense: u8,
    pub envdkf: u8,
    pub envtkf: u8,
    pub envtime: [u8; 5],
    pub envlevel: [u8; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TvaParam {
    pub level: u8,
    pub velosens: u8,
    pub biaspoint1: u8,
    pub biaslevel1: u8,
    pub biaspoint2: u8,
    pub biaslevel2: u8,
    pub envtkf: u8,
    pub envvkf: u8,
    pub envtime: [u8; 5],
    pub envlevel: [u8; 4],
}

/// Parameters of one partial inside a timbre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartialParam {
    pub wg: WgParam,
    pub env: PitchEnvParam,
    pub lfo: LfoParam,
    pub tvf: TvfParam,
    pub tva: TvaParam,
}

/// A complete timbre: common block plus four partials, 246 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimbreParam {
    pub common: CommonParam,
    pub partial: [PartialParam; 4],
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let b = self.bytes[self.pos];
        self.pos += 1;
        b
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}

impl CommonParam {
    /// Name with trailing spaces and NULs removed.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.name)
            .trim_end_matches(['\0', ' '])
            .to_string()
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [b' '; TIMBRE_NAME_LEN];
        for (dst, src) in self.name.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
    }

    fn read(r: &mut ByteReader<'_>) -> Self {
        Self {
            name: r.array(),
            pstruct12: r.u8(),
            pstruct34: r.u8(),
            pmute: r.u8(),
            nosustain: r.u8(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&[self.pstruct12, self.pstruct34, self.pmute, self.nosustain]);
    }
}

impl PartialParam {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len("partial param", bytes, PARTIAL_PARAM_SIZE)?;
        Ok(Self::read(&mut ByteReader::new(bytes)))
    }

    fn read(r: &mut ByteReader<'_>) -> Self {
        let wg = WgParam {
            coarse: r.u8(),
            fine: r.u8(),
            keyfollow: r.u8(),
            bender: r.u8(),
            waveform: r.u8(),
            pcmwave: r.u8(),
            pulsewid: r.u8(),
            pwvelo: r.u8(),
        };
        let env = PitchEnvParam {
            depth: r.u8(),
            sensitivity: r.u8(),
            timekeyfollow: r.u8(),
            time: r.array(),
            level: r.array(),
        };
        let lfo = LfoParam {
            rate: r.u8(),
            depth: r.u8(),
            modsense: r.u8(),
        };
        let tvf = TvfParam {
            cutoff: r.u8(),
            resonance: r.u8(),
            keyfollow: r.u8(),
            biaspoint: r.u8(),
            biaslevel: r.u8(),
            envdepth: r.u8(),
            envsense: r.u8(),
            envdkf: r.u8(),
            envtkf: r.u8(),
            envtime: r.array(),
            envlevel: r.array(),
        };
        let tva = TvaParam {
            level: r.u8(),
            velosens: r.u8(),
            biaspoint1: r.u8(),
            biaslevel1: r.u8(),
            biaspoint2: r.u8(),
            biaslevel2: r.u8(),
            envtkf: r.u8(),
            envvkf: r.u8(),
            envtime: r.array(),
            envlevel: r.array(),
        };
        Self {
            wg,
            env,
            lfo,
            tvf,
            tva,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        let wg = &self.wg;
        out.extend_from_slice(&[
            wg.coarse,
            wg.fine,
            wg.keyfollow,
            wg.bender,
            wg.waveform,
            wg.pcmwave,
            wg.pulsewid,
            wg.pwvelo,
        ]);
        let env = &self.env;
        out.extend_from_slice(&[env.depth, env.sensitivity, env.timekeyfollow]);
        out.extend_from_slice(&env.time);
        out.extend_from_slice(&env.level);
        out.extend_from_slice(&[self.lfo.rate, self.lfo.depth, self.lfo.modsense]);
        let tvf = &self.tvf;
        out.extend_from_slice(&[
            tvf.cutoff,
            tvf.resonance,
            tvf.keyfollow,
            tvf.biaspoint,
            tvf.biaslevel,
            tvf.envdepth,
            tvf.envsense,
            tvf.envdkf,
            tvf.envtkf,
        ]);
        out.extend_from_slice(&tvf.envtime);
        out.extend_from_slice(&tvf.envlevel);
        let tva = &self.tva;
        out.extend_from_slice(&[
            tva.level,
            tva.velosens,
            tva.biaspoint1,
            tva.biaslevel1,
            tva.biaspoint2,
            tva.biaslevel2,
            tva.envtkf,
            tva.envvkf,
        ]);
        out.extend_from_slice(&tva.envtime);
        out.extend_from_slice(&tva.envlevel);
    }
}

impl TimbreParam {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len("timbre", bytes, TIMBRE_PARAM_SIZE)?;
        let mut r = ByteReader::new(bytes);
        let common = CommonParam::read(&mut r);
        let partial = [
            PartialParam::read(&mut r),
            PartialParam::read(&mut r),
            PartialParam::read(&mut r),
            PartialParam::read(&mut r),
        ];
        Ok(Self { common, partial })
    }

    /// Parses the ROM's compressed form, where muted partials after the
    /// first are omitted and repeat the previously stored partial.
    /// Returns the timbre and the number of bytes consumed.
    pub fn from_compressed(bytes: &[u8]) -> Result<(Self, usize)> {
        check_len("compressed timbre", bytes, COMMON_PARAM_SIZE)?;
        let common = CommonParam::read(&mut ByteReader::new(bytes));
        let mut src = COMMON_PARAM_SIZE;
        let mut partial = [PartialParam::default(); 4];
        for (t, slot) in partial.iter_mut().enumerate() {
            if t != 0 && (common.pmute >> t) & 1 == 0 {
                src -= PARTIAL_PARAM_SIZE;
            }
            let end = src + PARTIAL_PARAM_SIZE;
            if end > bytes.len() {
                return Err(Error::Rom(format!(
                    "compressed timbre partial {t} runs past the end of ROM"
                )));
            }
            *slot = PartialParam::from_bytes(&bytes[src..end])?;
            src = end;
        }
        Ok((Self { common, partial }, src))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TIMBRE_PARAM_SIZE);
        self.common.write(&mut out);
        for p in &self.partial {
            p.write(&mut out);
        }
        out
    }

    /// A timbre with every partial muted. Plays nothing.
    pub fn silent(name: &str) -> Self {
        let mut timbre = Self::default();
        timbre.common.set_name(name);
        timbre
    }
}

/// Patch memory entry: which timbre to use and how to play it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchParam {
    /// 0 = A, 1 = B, 2 = memory, 3 = rhythm.
    pub timbre_group: u8,
    pub timbre_num: u8,
    /// 0..=48, 24 is no shift.
    pub key_shift: u8,
    /// 0..=100, 50 is no detune.
    pub fine_tune: u8,
    pub bender_range: u8,
    pub assign_mode: u8,
    pub reverb_switch: u8,
    pub dummy: u8,
}

impl PatchParam {
    /// Factory patch `num`: timbre `num` of group A or B, neutral tuning.
    pub fn factory(num: usize) -> Self {
        Self {
            timbre_group: (num / 64) as u8,
            timbre_num: (num % 64) as u8,
            key_shift: 24,
            fine_tune: 50,
            bender_range: 12,
            assign_mode: 0,
            reverb_switch: 1,
            dummy: 0,
        }
    }

    pub fn abs_timbre_num(&self) -> usize {
        self.timbre_group as usize * 64 + self.timbre_num as usize
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len("patch", bytes, PATCH_PARAM_SIZE)?;
        Ok(Self {
            timbre_group: bytes[0],
            timbre_num: bytes[1],
            key_shift: bytes[2],
            fine_tune: bytes[3],
            bender_range: bytes[4],
            assign_mode: bytes[5],
            reverb_switch: bytes[6],
            dummy: bytes[7],
        })
    }

    pub fn to_bytes(&self) -> [u8; PATCH_PARAM_SIZE] {
        [
            self.timbre_group,
            self.timbre_num,
            self.key_shift,
            self.fine_tune,
            self.bender_range,
            self.assign_mode,
            self.reverb_switch,
            self.dummy,
        ]
    }
}

/// Live per-part patch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchTemp {
    pub patch: PatchParam,
    pub output_level: u8,
    /// 0..=14, 7 is centre.
    pub panpot: u8,
    pub dummy: [u8; 6],
}

impl Default for PatchTemp {
    fn default() -> Self {
        Self {
            patch: PatchParam::factory(0),
            output_level: 80,
            panpot: 7,
            dummy: [0; 6],
        }
    }
}

impl PatchTemp {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len("patch temp", bytes, PATCH_TEMP_SIZE)?;
        let mut dummy = [0u8; 6];
        dummy.copy_from_slice(&bytes[10..16]);
        Ok(Self {
            patch: PatchParam::from_bytes(&bytes[..PATCH_PARAM_SIZE])?,
            output_level: bytes[8],
            panpot: bytes[9],
            dummy,
        })
    }

    pub fn to_bytes(&self) -> [u8; PATCH_TEMP_SIZE] {
        let mut out = [0u8; PATCH_TEMP_SIZE];
        out[..PATCH_PARAM_SIZE].copy_from_slice(&self.patch.to_bytes());
        out[8] = self.output_level;
        out[9] = self.panpot;
        out[10..].copy_from_slice(&self.dummy);
        out
    }
}

/// Per-drum-key rhythm setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhythmTemp {
    /// Rhythm-group timbre, 0..=93. Larger values leave the key unmapped.
    pub timbre: u8,
    pub output_level: u8,
    pub panpot: u8,
    pub reverb_switch: u8,
}

impl Default for RhythmTemp {
    fn default() -> Self {
        Self {
            timbre: RHYTHM_TIMBRE_UNMAPPED,
            output_level: 100,
            panpot: 7,
            reverb_switch: 1,
        }
    }
}

/// Smallest rhythm timbre value that leaves a drum key unmapped.
pub const RHYTHM_TIMBRE_UNMAPPED: u8 = 94;

impl RhythmTemp {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len("rhythm temp", bytes, RHYTHM_TEMP_SIZE)?;
        Ok(Self {
            timbre: bytes[0],
            output_level: bytes[1],
            panpot: bytes[2],
            reverb_switch: bytes[3],
        })
    }

    pub fn to_bytes(&self) -> [u8; RHYTHM_TEMP_SIZE] {
        [
            self.timbre,
            self.output_level,
            self.panpot,
            self.reverb_switch,
        ]
    }

    pub fn is_mapped(&self) -> bool {
        self.timbre < RHYTHM_TIMBRE_UNMAPPED
    }
}

/// System area: tuning, reverb, partial reserve and channel routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemParams {
    pub master_tune: u8,
    pub reverb_mode: u8,
    pub reverb_time: u8,
    pub reverb_level: u8,
    pub reserve_settings: [u8; PART_COUNT],
    /// MIDI channel (0..=15) for each part, 16 = off.
    pub chan_assign: [u8; PART_COUNT],
    pub master_volume: u8,
}

pub const DEFAULT_RESERVE_SETTINGS: [u8; PART_COUNT] = [3, 10, 6, 4, 3, 0, 0, 0, 6];

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            master_tune: 64,
            reverb_mode: 0,
            reverb_time: 5,
            reverb_level: 3,
            reserve_settings: DEFAULT_RESERVE_SETTINGS,
            chan_assign: [1, 2, 3, 4, 5, 6, 7, 8, 9],
            master_volume: 100,
        }
    }
}

impl SystemParams {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len("system", bytes, SYSTEM_PARAM_SIZE)?;
        let mut r = ByteReader::new(bytes);
        Ok(Self {
            master_tune: r.u8(),
            reverb_mode: r.u8(),
            reverb_time: r.u8(),
            reverb_level: r.u8(),
            reserve_settings: r.array(),
            chan_assign: r.array(),
            master_volume: r.u8(),
        })
    }

    pub fn to_bytes(&self) -> [u8; SYSTEM_PARAM_SIZE] {
        let mut out = [0u8; SYSTEM_PARAM_SIZE];
        out[0] = self.master_tune;
        out[1] = self.reverb_mode;
        out[2] = self.reverb_time;
        out[3] = self.reverb_level;
        out[4..13].copy_from_slice(&self.reserve_settings);
        out[13..22].copy_from_slice(&self.chan_assign);
        out[22] = self.master_volume;
        out
    }

    /// Master tune as a reference frequency for A4.
    pub fn master_tune_hz(&self) -> f32 {
        master_tune_hz(self.master_tune)
    }
}

/// 64 is A440; the full range spans roughly ±50 cents.
pub fn master_tune_hz(master_tune: u8) -> f32 {
    440.0 * 2f32.powf((master_tune.min(127) as f32 - 64.0) / (128.0 * 12.0))
}

/// One entry of the control ROM PCM wave table, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmWaveEntry {
    /// Sample offset into the decoded PCM data.
    pub addr: usize,
    /// Length in samples.
    pub len: usize,
    pub loop_wave: bool,
    /// Root pitch in 1/4096 octave steps above MIDI note 0.
    pub pitch: u32,
}

impl PcmWaveEntry {
    /// Decodes the 4-byte `{pos, len, pitch_lsb, pitch_msb}` ROM struct.
    pub fn from_rom_struct(bytes: &[u8]) -> Result<Self> {
        check_len("pcm wave struct", bytes, PCM_WAVE_STRUCT_SIZE)?;
        let len_exp = (bytes[1] & 0x70) >> 4;
        Ok(Self {
            addr: bytes[0] as usize * 0x800,
            len: 0x800 << len_exp,
            loop_wave: bytes[1] & 0x80 != 0,
            pitch: (bytes[3] as u32) << 8 | bytes[2] as u32,
        })
    }

    pub fn validate(&self, index: usize, pcm_len: usize) -> Result<()> {
        let malformed = |reason: String| Error::MalformedPcm { index, reason };
        if self.len == 0 {
            return Err(malformed("zero length".into()));
        }
        if self.addr + self.len > pcm_len {
            return Err(malformed(format!(
                "samples {}..{} exceed PCM data of {} samples",
                self.addr,
                self.addr + self.len,
                pcm_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_timbre() -> TimbreParam {
        let mut timbre = TimbreParam::silent("Piano 1");
        timbre.common.pstruct12 = 2;
        timbre.common.pmute = 0b0101;
        for (i, p) in timbre.partial.iter_mut().enumerate() {
            p.wg.coarse = 36 + i as u8;
            p.env.level = [50, 60, 70, 50, 40];
            p.tvf.envtime = [1, 2, 3, 4, 5];
            p.tva.envlevel = [100, 90, 80, 70];
        }
        timbre
    }

    #[test]
    fn test_timbre_layout_size() {
        let bytes = sample_timbre().to_bytes();
        assert_eq!(bytes.len(), TIMBRE_PARAM_SIZE);
        assert_eq!(TIMBRE_PARAM_SIZE, 246);
        assert_eq!(&bytes[..7], b"Piano 1");
        assert_eq!(bytes[COMMON_PARAM_SIZE], 36);
        assert_eq!(bytes[COMMON_PARAM_SIZE + PARTIAL_PARAM_SIZE], 37);
    }

    #[test]
    fn test_timbre_bytes_round_trip() {
        let timbre = sample_timbre();
        let parsed = TimbreParam::from_bytes(&timbre.to_bytes()).unwrap();
        assert_eq!(parsed, timbre);
        assert_eq!(parsed.common.name(), "Piano 1");
    }

    #[test]
    fn test_compressed_timbre_repeats_previous_partial() {
        let timbre = sample_timbre();
        let full = timbre.to_bytes();
        // Partials 0 and 2 are stored; 1 and 3 are muted and omitted.
        let mut rom = full[..COMMON_PARAM_SIZE + PARTIAL_PARAM_SIZE].to_vec();
        let p2 = COMMON_PARAM_SIZE + 2 * PARTIAL_PARAM_SIZE;
        rom.extend_from_slice(&full[p2..p2 + PARTIAL_PARAM_SIZE]);

        let (parsed, used) = TimbreParam::from_compressed(&rom).unwrap();
        assert_eq!(used, rom.len());
        assert_eq!(parsed.partial[0], timbre.partial[0]);
        assert_eq!(parsed.partial[1], timbre.partial[0]);
        assert_eq!(parsed.partial[2], timbre.partial[2]);
        assert_eq!(parsed.partial[3], timbre.partial[2]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        assert!(matches!(
            TimbreParam::from_bytes(&[0u8; 100]),
            Err(Error::Rom(_))
        ));
    }

    #[test]
    fn test_system_layout() {
        let sys = SystemParams::default();
        let bytes = sys.to_bytes();
        assert_eq!(bytes[4..13], DEFAULT_RESERVE_SETTINGS);
        assert_eq!(SystemParams::from_bytes(&bytes).unwrap(), sys);
    }

    #[test]
    fn test_pcm_struct_decoding() {
        let entry = PcmWaveEntry::from_rom_struct(&[3, 0x80 | 0x20, 0x00, 0x50]).unwrap();
        assert_eq!(entry.addr, 3 * 0x800);
        assert_eq!(entry.len, 0x800 << 2);
        assert!(entry.loop_wave);
        assert_eq!(entry.pitch, 0x5000);
    }

    #[test]
    fn test_pcm_entry_out_of_bounds() {
        let entry = PcmWaveEntry {
            addr: 100,
            len: 50,
            loop_wave: false,
            pitch: 0,
        };
        assert!(entry.validate(7, 150).is_ok());
        assert!(matches!(
            entry.validate(7, 149),
            Err(Error::MalformedPcm { index: 7, .. })
        ));
    }

    #[test]
    fn test_master_tune_centre_is_a440() {
        assert!((master_tune_hz(64) - 440.0).abs() < 1e-3);
        assert!(master_tune_hz(127) > 440.0 && master_tune_hz(0) < 440.0);
    }
}
