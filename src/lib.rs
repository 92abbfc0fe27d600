//! Roland MT-32 LA synthesis core.
//!
//! The [`synth::Synth`] owns every lookup table, the shared partial pool and
//! the nine parts. Feed it events with [`synth::Synth::play_event`] or raw
//! MIDI short messages with [`synth::Synth::play_msg`], then pull interleaved
//! stereo blocks with [`synth::Synth::render`].

pub mod error;
pub mod synth;

#[cfg(feature = "native")]
pub mod audio;
#[cfg(feature = "native")]
pub mod input;
#[cfg(feature = "native")]
pub mod runtime;

pub use error::{Error, Result};
pub use synth::{Synth, SynthConfig};
