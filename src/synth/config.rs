use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Native sample rate of the MT-32's output stage.
pub const DEFAULT_SAMPLE_RATE: u32 = 32000;
/// Size of the shared partial pool on the hardware.
pub const DEFAULT_MAX_PARTIALS: usize = 32;
/// Per-part poly pool capacity.
pub const DEFAULT_MAX_POLY: usize = 32;

pub const MIN_SAMPLE_RATE: u32 = 8000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Startup configuration for a [`Synth`](super::Synth).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub sample_rate: u32,
    pub max_partials: usize,
    pub max_poly: usize,
    pub reverb_enabled: bool,
    /// Overrides the master tune system parameter (0..=127, 64 = A440).
    pub master_tune: Option<u8>,
    /// Linear gain applied after the master volume, before saturation.
    pub output_gain: f32,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_partials: DEFAULT_MAX_PARTIALS,
            max_poly: DEFAULT_MAX_POLY,
            reverb_enabled: true,
            master_tune: None,
            output_gain: 1.0,
        }
    }
}

impl SynthConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SynthConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample rate {} outside {}..={}",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        if self.max_partials == 0 {
            return Err(Error::InvalidConfig("max_partials must be non-zero".into()));
        }
        if self.max_poly == 0 {
            return Err(Error::InvalidConfig("max_poly must be non-zero".into()));
        }
        if let Some(tune) = self.master_tune {
            if tune > 127 {
                return Err(Error::InvalidConfig(format!("master tune {tune} > 127")));
            }
        }
        if !self.output_gain.is_finite() || self.output_gain < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "output gain {} must be finite and non-negative",
                self.output_gain
            )));
        }
        Ok(())
    }
}
