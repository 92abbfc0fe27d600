mod midi;
pub use self::midi::MidiHandler;
