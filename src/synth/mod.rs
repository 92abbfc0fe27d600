pub mod config;
pub mod context;
pub mod core;
pub mod envelope;
pub mod event;
pub mod filter;
pub mod params;
pub mod part;
pub mod partial;
pub mod partial_manager;
pub mod patch;
pub mod poly;
pub mod prelude;
pub mod reverb;
pub mod rom;
pub mod structure;
pub mod tables;
pub mod waveform;

pub use self::config::SynthConfig;
pub use self::context::Memory;
pub use self::core::Synth;
pub use self::event::{decode_short_message, ControlChange, PartEvent};
pub use self::params::{PatchParam, PcmWaveEntry, RhythmTemp, SystemParams, TimbreParam};
pub use self::part::{Part, PartKind};
pub use self::poly::PolyState;
pub use self::reverb::{ReverbMode, ReverbSettings};
pub use self::rom::{ControlRom, PcmData, SoundBank};
