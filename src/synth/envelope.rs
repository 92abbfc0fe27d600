/// Which of a partial's three envelopes an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeType {
    Amp = 0,
    Filter = 1,
    Pitch = 2,
}

pub const ENVELOPE_TYPES: [EnvelopeType; 3] =
    [EnvelopeType::Amp, EnvelopeType::Filter, EnvelopeType::Pitch];

/// Progress of one segmented envelope.
///
/// Levels are integers on the 0..=100 parameter scale. A segment moves from
/// `base` to `base + dist` over `size` samples; `stat` is the index of the
/// current attack segment, -1 before the first one starts. Once the last
/// attack segment ends the envelope either holds (`sustaining`) or releases
/// (`decaying`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeStatus {
    pub pos: u32,
    pub stat: i32,
    pub base: i32,
    pub dist: i32,
    pub size: u32,
    pub sustaining: bool,
    pub decaying: bool,
    /// Most recent output level; releases start here so they never jump.
    pub prev_level: i32,
    /// Samples per level step of the current segment.
    pub counter: u32,
    /// Samples left before the level is recomputed.
    pub count: i32,
}

impl Default for EnvelopeStatus {
    fn default() -> Self {
        Self {
            pos: 0,
            stat: -1,
            base: 0,
            dist: 0,
            size: 1,
            sustaining: false,
            decaying: false,
            prev_level: 0,
            counter: 1,
            count: 0,
        }
    }
}

impl EnvelopeStatus {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Resets and seeds a one-sample segment at `level`, so the first
    /// attack segment starts from it.
    pub fn reset_to(&mut self, level: i32) {
        self.reset();
        self.begin(level, level, 1);
        self.prev_level = level;
    }

    pub fn is_started(&self) -> bool {
        self.stat >= 0
    }

    /// True once the current segment has run its full length.
    pub fn segment_done(&self) -> bool {
        self.pos >= self.size
    }

    /// Starts a segment from `from` to `to` lasting `size` samples.
    pub fn begin(&mut self, from: i32, to: i32, size: u32) {
        self.pos = 0;
        self.base = from;
        self.dist = to - from;
        self.size = size.max(1);
        self.counter = (self.size / self.dist.unsigned_abs().max(1)).max(1);
        self.count = 0;
    }

    /// Holds `level` until released.
    pub fn hold(&mut self, level: i32) {
        self.sustaining = true;
        self.begin(level, level, 1);
    }

    /// Switches to the release segment, from `from` to `to`.
    pub fn begin_decay(&mut self, from: i32, to: i32, size: u32) {
        self.sustaining = false;
        self.decaying = true;
        self.begin(from, to, size);
    }

    fn interpolate(&self) -> i32 {
        if self.pos >= self.size {
            self.base + self.dist
        } else {
            self.base + (self.dist as i64 * self.pos as i64 / self.size as i64) as i32
        }
    }

    /// Returns the level for this sample and advances one sample.
    pub fn tick(&mut self) -> i32 {
        if self.count <= 0 || self.pos + 1 >= self.size {
            self.prev_level = self.interpolate();
            self.count = self.counter as i32;
        }
        self.count -= 1;
        self.pos = self.pos.saturating_add(1);
        self.prev_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_reaches_target() {
        let mut env = EnvelopeStatus::default();
        env.begin(0, 100, 200);
        let mut last = 0;
        while !env.segment_done() {
            let level = env.tick();
            assert!(level >= last, "segment must be monotonic");
            last = level;
        }
        assert_eq!(env.tick(), 100);
    }

    #[test]
    fn test_hold_keeps_level() {
        let mut env = EnvelopeStatus::default();
        env.hold(42);
        for _ in 0..1000 {
            assert_eq!(env.tick(), 42);
        }
        assert!(env.sustaining);
    }

    #[test]
    fn test_decay_starts_from_given_level() {
        let mut env = EnvelopeStatus::default();
        env.begin(0, 80, 10);
        for _ in 0..5 {
            env.tick();
        }
        let from = env.prev_level;
        env.begin_decay(from, 0, 50);
        assert!(env.decaying && !env.sustaining);
        assert_eq!(env.tick(), from);
    }

    #[test]
    fn test_reset_to_seeds_start_level() {
        let mut env = EnvelopeStatus::default();
        env.reset_to(50);
        assert!(!env.is_started());
        assert_eq!(env.tick(), 50);
        assert!(env.segment_done());
        env.begin(env.prev_level, 80, 30);
        assert_eq!(env.tick(), 50);
    }

    #[test]
    fn test_unstarted_envelope() {
        let env = EnvelopeStatus::default();
        assert!(!env.is_started());
        assert_eq!(env.prev_level, 0);
    }
}
