use core::fmt;
use rand::rngs::SmallRng;
use rand::Rng;

use crate::synth::prelude::seeded_rng;

const REVERB_SEED: u64 = 0x5245_5642;
const FDN_CHANNELS: usize = 8;

// --- Settings ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReverbMode {
    #[default]
    Room,
    Hall,
    Plate,
    TapDelay,
}

impl ReverbMode {
    pub fn from_param(raw: u8) -> Self {
        match raw & 3 {
            0 => ReverbMode::Room,
            1 => ReverbMode::Hall,
            2 => ReverbMode::Plate,
            _ => ReverbMode::TapDelay,
        }
    }
}

/// The three reverb system parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverbSettings {
    pub mode: ReverbMode,
    /// 0..=7
    pub time: u8,
    /// 0..=7
    pub level: u8,
}

impl ReverbSettings {
    pub fn new(mode: u8, time: u8, level: u8) -> Self {
        Self {
            mode: ReverbMode::from_param(mode),
            time: time.min(7),
            level: level.min(7),
        }
    }

    pub fn wet_gain(&self) -> f32 {
        self.level as f32 / 7.0 * 0.8
    }
}

// --- DSP Primitives ---

/// Integer delay line over a power-of-two ring buffer.
#[derive(Clone, Debug)]
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    mask: usize,
}

impl DelayLine {
    fn new(max_delay_samples: usize) -> Self {
        let size = (max_delay_samples + 1).next_power_of_two();
        Self {
            buffer: vec![0.0; size],
            write_pos: 0,
            mask: size - 1,
        }
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    #[inline]
    fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) & self.mask;
    }

    #[inline]
    fn read(&self, delay_samples: usize) -> f32 {
        let read_pos = self
            .write_pos
            .wrapping_sub(delay_samples)
            .wrapping_sub(1)
            & self.mask;
        self.buffer[read_pos]
    }
}

fn random_in_range(rng: &mut SmallRng, low: f32, high: f32) -> f32 {
    if low >= high {
        return low;
    }
    rng.random_range(low..high)
}

fn generate_householder(order: usize, rng: &mut SmallRng) -> Vec<Vec<f32>> {
    if order == 1 {
        return vec![vec![-1.0]];
    }
    let mut v = vec![0.0; order];
    let mut v_norm_sq = 0.0;
    while v_norm_sq < 1e-9 {
        v_norm_sq = 0.0;
        for x in v.iter_mut() {
            *x = rng.random_range(-1.0..1.0);
            v_norm_sq += *x * *x;
        }
    }
    let factor = -2.0 / v_norm_sq;
    let mut h = vec![vec![0.0; order]; order];
    for r in 0..order {
        for c in 0..order {
            h[r][c] = factor * v[r] * v[c];
        }
        h[r][r] += 1.0;
    }
    h
}

/// Unnormalised fast Walsh-Hadamard transform; `data.len()` must be a power of two.
fn hadamard_in_place(data: &mut [f32]) {
    let n = data.len();
    let mut h = 1;
    while h < n {
        for i in (0..n).step_by(h * 2) {
            for j in 0..h {
                let x = data[i + j];
                let y = data[i + j + h];
                data[i + j] = x + y;
                data[i + j + h] = x - y;
            }
        }
        h *= 2;
    }
    let scale = 1.0 / (n as f32).sqrt();
    for x in data.iter_mut() {
        *x *= scale;
    }
}

// --- Reverb Components ---

#[derive(Clone, Debug)]
struct DiffusionStep {
    delay_samples: [usize; FDN_CHANNELS],
    delays: Vec<DelayLine>,
    flip_polarity: [bool; FDN_CHANNELS],
    temp: [f32; FDN_CHANNELS],
}

impl DiffusionStep {
    fn new(delay_ms_range: f32, sample_rate: f32, rng: &mut SmallRng) -> Self {
        let range = delay_ms_range * 0.001 * sample_rate;
        let mut delay_samples = [0usize; FDN_CHANNELS];
        let mut flip_polarity = [false; FDN_CHANNELS];
        for c in 0..FDN_CHANNELS {
            let low = range * c as f32 / FDN_CHANNELS as f32;
            let high = range * (c + 1) as f32 / FDN_CHANNELS as f32;
            delay_samples[c] = random_in_range(rng, low, high).round().max(0.0) as usize;
            flip_polarity[c] = rng.random::<bool>();
        }
        let max_delay = delay_samples.iter().copied().max().unwrap_or(0);
        Self {
            delay_samples,
            delays: (0..FDN_CHANNELS).map(|_| DelayLine::new(max_delay)).collect(),
            flip_polarity,
            temp: [0.0; FDN_CHANNELS],
        }
    }

    fn reset(&mut self) {
        self.delays.iter_mut().for_each(DelayLine::reset);
    }

    #[inline]
    fn process(&mut self, buffer: &mut [f32; FDN_CHANNELS]) {
        for c in 0..FDN_CHANNELS {
            self.delays[c].write(buffer[c]);
            self.temp[c] = self.delays[c].read(self.delay_samples[c]);
        }
        hadamard_in_place(&mut self.temp);
        for c in 0..FDN_CHANNELS {
            buffer[c] = if self.flip_polarity[c] {
                -self.temp[c]
            } else {
                self.temp[c]
            };
        }
    }
}

#[derive(Clone, Debug)]
struct FeedbackLoop {
    delay_samples: [usize; FDN_CHANNELS],
    delays: Vec<DelayLine>,
    feedback_matrix: Vec<Vec<f32>>,
    decay_gain: f32,
    delayed: [f32; FDN_CHANNELS],
}

impl FeedbackLoop {
    fn new(delay_ms: f32, sample_rate: f32, rng: &mut SmallRng) -> Self {
        let base = delay_ms * 0.001 * sample_rate;
        let delay_samples: [usize; FDN_CHANNELS] = std::array::from_fn(|c| {
            let r = c as f32 / FDN_CHANNELS as f32;
            (2f32.powf(r) * base).round().max(1.0) as usize
        });
        let max_delay = delay_samples.iter().copied().max().unwrap_or(1);
        Self {
            delay_samples,
            delays: (0..FDN_CHANNELS).map(|_| DelayLine::new(max_delay)).collect(),
            feedback_matrix: generate_householder(FDN_CHANNELS, rng),
            decay_gain: 0.0,
            delayed: [0.0; FDN_CHANNELS],
        }
    }

    fn reset(&mut self) {
        self.delays.iter_mut().for_each(DelayLine::reset);
        self.delayed = [0.0; FDN_CHANNELS];
    }

    /// Writes `input` into the loop and returns the signals read before the write.
    #[inline]
    fn process(&mut self, input: &[f32; FDN_CHANNELS]) -> &[f32; FDN_CHANNELS] {
        for c in 0..FDN_CHANNELS {
            self.delayed[c] = self.delays[c].read(self.delay_samples[c]);
        }
        for (c, row) in self.feedback_matrix.iter().enumerate() {
            let mixed: f32 = row.iter().zip(&self.delayed).map(|(m, d)| m * d).sum();
            let value = input[c] + mixed * self.decay_gain;
            self.delays[c].write(if value.is_finite() { value } else { 0.0 });
        }
        &self.delayed
    }
}

// --- ReverbState ---

pub trait ReverbState: fmt::Debug {
    fn reset(&mut self);
    /// Processes one stereo frame and returns the wet signal only.
    fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32);
    fn set_time(&mut self, time: u8);
}

/// Diffuser plus Householder feedback network, used for room, hall and plate.
#[derive(Clone, Debug)]
pub struct FdnReverb {
    room_size_ms: f32,
    rt60_base: f32,
    rt60_step: f32,
    diffuser: Vec<DiffusionStep>,
    feedback_loop: FeedbackLoop,
    channels: [f32; FDN_CHANNELS],
}

impl FdnReverb {
    fn new(mode: ReverbMode, sample_rate: f32) -> Self {
        let (room_size_ms, steps, rt60_base, rt60_step) = match mode {
            ReverbMode::Hall => (90.0, 4, 0.8, 0.5),
            ReverbMode::Plate => (25.0, 5, 0.5, 0.35),
            _ => (40.0, 4, 0.3, 0.25),
        };
        let mut rng = seeded_rng(REVERB_SEED);
        let mut diffusion_ms = room_size_ms;
        let diffuser = (0..steps)
            .map(|_| {
                diffusion_ms *= 0.5;
                DiffusionStep::new(diffusion_ms, sample_rate, &mut rng)
            })
            .collect();
        Self {
            room_size_ms,
            rt60_base,
            rt60_step,
            diffuser,
            feedback_loop: FeedbackLoop::new(room_size_ms, sample_rate, &mut rng),
            channels: [0.0; FDN_CHANNELS],
        }
    }

    fn set_rt60(&mut self, rt60_seconds: f32) {
        let loop_secs = self.room_size_ms * 1.5 * 0.001;
        let loops_per_rt60 = rt60_seconds / loop_secs;
        self.feedback_loop.decay_gain = if loops_per_rt60 <= 1e-6 {
            0.0
        } else {
            10f32.powf(-60.0 / loops_per_rt60 * 0.05).clamp(0.0, 1.0)
        };
    }
}

impl ReverbState for FdnReverb {
    fn reset(&mut self) {
        self.diffuser.iter_mut().for_each(DiffusionStep::reset);
        self.feedback_loop.reset();
        self.channels = [0.0; FDN_CHANNELS];
    }

    #[inline]
    fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        for (c, ch) in self.channels.iter_mut().enumerate() {
            *ch = if c % 2 == 0 { left } else { right };
        }
        for step in self.diffuser.iter_mut() {
            step.process(&mut self.channels);
        }
        let out = self.feedback_loop.process(&self.channels);
        (out[0], out[1])
    }

    fn set_time(&mut self, time: u8) {
        self.set_rt60(self.rt60_base + self.rt60_step * time.min(7) as f32);
    }
}

/// Stereo tap delay with cross feedback.
#[derive(Clone, Debug)]
pub struct TapDelay {
    sample_rate: f32,
    left: DelayLine,
    right: DelayLine,
    delay_samples: usize,
    feedback: f32,
}

const TAP_MAX_MS: f32 = 400.0;

impl TapDelay {
    fn new(sample_rate: f32) -> Self {
        let max = (TAP_MAX_MS * 0.001 * sample_rate) as usize;
        Self {
            sample_rate,
            left: DelayLine::new(max),
            right: DelayLine::new(max),
            delay_samples: 1,
            feedback: 0.35,
        }
    }
}

impl ReverbState for TapDelay {
    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    #[inline]
    fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let d = self.delay_samples;
        let out_l = self.left.read(d) + 0.5 * self.right.read(d / 2);
        let out_r = self.right.read(d) + 0.5 * self.left.read(d / 2);
        self.left.write(left + self.right.read(d) * self.feedback);
        self.right.write(right + self.left.read(d) * self.feedback);
        (out_l, out_r)
    }

    fn set_time(&mut self, time: u8) {
        let ms = 50.0 * (time.min(7) as f32 + 1.0);
        self.delay_samples = ((ms * 0.001 * self.sample_rate) as usize).max(1);
    }
}

// --- Top-level wrapper ---

#[derive(Clone, Debug)]
pub enum ReverbEngine {
    Fdn(FdnReverb),
    TapDelay(TapDelay),
}

impl ReverbEngine {
    fn new(mode: ReverbMode, sample_rate: f32) -> Self {
        match mode {
            ReverbMode::TapDelay => ReverbEngine::TapDelay(TapDelay::new(sample_rate)),
            _ => ReverbEngine::Fdn(FdnReverb::new(mode, sample_rate)),
        }
    }

    fn state(&mut self) -> &mut dyn ReverbState {
        match self {
            ReverbEngine::Fdn(s) => s,
            ReverbEngine::TapDelay(s) => s,
        }
    }
}

/// The reverb stage fed by the partials whose reverb switch is on.
#[derive(Clone, Debug)]
pub struct Reverb {
    sample_rate: f32,
    settings: ReverbSettings,
    engine: ReverbEngine,
}

impl Reverb {
    pub fn new(sample_rate: f32, settings: ReverbSettings) -> Self {
        let mut engine = ReverbEngine::new(settings.mode, sample_rate);
        engine.state().set_time(settings.time);
        Self {
            sample_rate,
            settings,
            engine,
        }
    }

    pub fn settings(&self) -> ReverbSettings {
        self.settings
    }

    /// Applies new settings. A mode change rebuilds the network and drops its tail.
    pub fn set_settings(&mut self, settings: ReverbSettings) {
        if settings.mode != self.settings.mode {
            self.engine = ReverbEngine::new(settings.mode, self.sample_rate);
        }
        self.engine.state().set_time(settings.time);
        self.settings = settings;
    }

    pub fn reset(&mut self) {
        self.engine.state().reset();
    }

    /// Processes interleaved stereo `input` into interleaved wet `output`.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let gain = self.settings.wet_gain();
        let state = self.engine.state();
        for (inp, out) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let (l, r) = state.process_frame(inp[0], inp[1]);
            out[0] = l * gain;
            out[1] = r * gain;
        }
    }
}
