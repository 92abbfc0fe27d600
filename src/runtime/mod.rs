pub mod native;
pub use native::{run, HostOptions, NativeSynth};
