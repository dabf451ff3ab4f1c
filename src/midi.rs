//! Timestamped MIDI events for block processing

/// The subset of MIDI the engine responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ControlChange { controller: u8, value: u8 },
}

/// A MIDI message stamped with its sample position inside the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub sample_offset: usize,
    pub message: MidiMessage,
}

impl MidiEvent {
    pub fn note_on(sample_offset: usize, note: u8, velocity: u8) -> Self {
        Self {
            sample_offset,
            message: MidiMessage::NoteOn { note, velocity },
        }
    }

    pub fn note_off(sample_offset: usize, note: u8) -> Self {
        Self {
            sample_offset,
            message: MidiMessage::NoteOff { note },
        }
    }

    pub fn control_change(sample_offset: usize, controller: u8, value: u8) -> Self {
        Self {
            sample_offset,
            message: MidiMessage::ControlChange { controller, value },
        }
    }
}
