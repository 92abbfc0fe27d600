//! MIDI short messages mapped to part events.

/// Controller changes a part responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlChange {
    Modulation(u8),
    Volume(u8),
    Pan(u8),
    Expression(u8),
    HoldPedal(bool),
    RpnLsb(u8),
    RpnMsb(u8),
    DataEntry(u8),
    AllSoundOff,
    ResetAllControllers,
    /// CC 123 and the mode messages 124..=127, which also end all notes.
    AllNotesOff,
}

impl ControlChange {
    pub fn from_midi(controller: u8, value: u8) -> Option<Self> {
        let cc = match controller {
            1 => Self::Modulation(value),
            6 => Self::DataEntry(value),
            7 => Self::Volume(value),
            10 => Self::Pan(value),
            11 => Self::Expression(value),
            64 => Self::HoldPedal(value >= 64),
            100 => Self::RpnLsb(value),
            101 => Self::RpnMsb(value),
            120 => Self::AllSoundOff,
            121 => Self::ResetAllControllers,
            123..=127 => Self::AllNotesOff,
            _ => return None,
        };
        Some(cc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartEvent {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8 },
    ProgramChange(u8),
    Control(ControlChange),
    /// 14-bit value, 8192 is centre.
    PitchBend(u16),
}

/// Decodes a packed short message (status in the low byte, then data1 and
/// data2) into its channel and event. Unsupported messages yield `None`.
pub fn decode_short_message(msg: u32) -> Option<(u8, PartEvent)> {
    let status = (msg & 0xFF) as u8;
    let data1 = ((msg >> 8) & 0x7F) as u8;
    let data2 = ((msg >> 16) & 0x7F) as u8;
    if status < 0x80 {
        return None;
    }
    let channel = status & 0x0F;
    let event = match status & 0xF0 {
        0x80 => PartEvent::NoteOff { key: data1 },
        0x90 if data2 == 0 => PartEvent::NoteOff { key: data1 },
        0x90 => PartEvent::NoteOn {
            key: data1,
            velocity: data2,
        },
        0xB0 => PartEvent::Control(ControlChange::from_midi(data1, data2)?),
        0xC0 => PartEvent::ProgramChange(data1),
        0xE0 => PartEvent::PitchBend(((data2 as u16) << 7) | data1 as u16),
        _ => return None,
    };
    Some((channel, event))
}

/// Packs raw message bytes the way [`decode_short_message`] expects.
pub fn pack_short_message(bytes: &[u8]) -> Option<u32> {
    let (&status, data) = bytes.split_first()?;
    let data1 = data.first().copied().unwrap_or(0);
    let data2 = data.get(1).copied().unwrap_or(0);
    Some(status as u32 | (data1 as u32) << 8 | (data2 as u32) << 16)
}
