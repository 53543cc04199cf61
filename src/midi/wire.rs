// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Encoding of logical MIDI actions into serial wire bytes.
//!
//! The status byte is the message type nibble OR'd with the channel nibble. Every
//! data byte is masked to 7 bits.

use midly::{live::LiveEvent, MidiMessage};

/// Note off status nibble.
pub const NOTE_OFF: u8 = 0x80;
/// Note on status nibble.
pub const NOTE_ON: u8 = 0x90;
/// Control change status nibble.
pub const CONTROL_CHANGE: u8 = 0xB0;
/// Program change status nibble.
pub const PROGRAM_CHANGE: u8 = 0xC0;
/// Channel pressure status nibble.
pub const CHANNEL_PRESSURE: u8 = 0xD0;
/// Pitch bend status nibble.
pub const PITCH_BEND: u8 = 0xE0;

/// The "all notes off" channel mode controller.
pub const ALL_NOTES_OFF: u8 = 123;

/// Pitch bend is always sent on this channel.
pub const PITCH_BEND_CHANNEL: u8 = 0;

/// The centre (no bend) pitch bend value.
pub const PITCH_BEND_CENTER: u16 = 8192;

const DATA_MASK: u8 = 0x7F;
const CHANNEL_MASK: u8 = 0x0F;
const PITCH_BEND_MAX: u16 = 0x3FFF;

/// A logical MIDI action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// A 14 bit bend, always sent on [PITCH_BEND_CHANNEL].
    PitchBend { value: u16 },
}

impl Message {
    /// Creates an all notes off control change for the given channel.
    pub fn all_notes_off(channel: u8) -> Message {
        Message::ControlChange {
            channel,
            controller: ALL_NOTES_OFF,
            value: 0,
        }
    }

    /// Creates a pitch bend reset to centre.
    pub fn pitch_bend_center() -> Message {
        Message::PitchBend {
            value: PITCH_BEND_CENTER,
        }
    }

    /// Encodes the message into its exact wire representation.
    pub fn encode(&self) -> WireBytes {
        match *self {
            Message::NoteOn {
                channel,
                key,
                velocity,
            } => WireBytes::new(status(NOTE_ON, channel), key, velocity),
            Message::NoteOff {
                channel,
                key,
                velocity,
            } => WireBytes::new(status(NOTE_OFF, channel), key, velocity),
            Message::ControlChange {
                channel,
                controller,
                value,
            } => WireBytes::new(status(CONTROL_CHANGE, channel), controller, value),
            Message::ProgramChange { channel, program } => {
                WireBytes::new(status(PROGRAM_CHANGE, channel), program, 0)
            }
            Message::PitchBend { value } => {
                let value = value.min(PITCH_BEND_MAX);
                WireBytes::new(
                    status(PITCH_BEND, PITCH_BEND_CHANNEL),
                    (value & 0x7F) as u8,
                    (value >> 7) as u8,
                )
            }
        }
    }

    /// Decodes a wire message. Returns None for anything that isn't one of the
    /// channel messages this controller produces.
    pub fn parse(bytes: &[u8]) -> Option<Message> {
        let (channel, message) = match LiveEvent::parse(bytes).ok()? {
            LiveEvent::Midi { channel, message } => (channel.as_int(), message),
            _ => return None,
        };

        match message {
            MidiMessage::NoteOn { key, vel } => Some(Message::NoteOn {
                channel,
                key: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::NoteOff { key, vel } => Some(Message::NoteOff {
                channel,
                key: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::Controller { controller, value } => Some(Message::ControlChange {
                channel,
                controller: controller.as_int(),
                value: value.as_int(),
            }),
            MidiMessage::ProgramChange { program } => Some(Message::ProgramChange {
                channel,
                program: program.as_int(),
            }),
            MidiMessage::PitchBend { bend } => Some(Message::PitchBend {
                value: bend.0.as_int(),
            }),
            _ => None,
        }
    }
}

/// Combines a message type nibble with a channel.
fn status(kind: u8, channel: u8) -> u8 {
    kind | (channel & CHANNEL_MASK)
}

/// Returns the number of wire bytes for a message with the given status byte.
pub fn message_len(status: u8) -> usize {
    match status & 0xF0 {
        PROGRAM_CHANGE | CHANNEL_PRESSURE => 2,
        _ => 3,
    }
}

/// The wire form of one message: a status byte followed by one or two data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireBytes {
    bytes: [u8; 3],
    len: usize,
}

impl WireBytes {
    /// Builds wire bytes from raw fields. The length is derived from the status byte
    /// and the data bytes are masked to 7 bits.
    pub fn new(status: u8, data1: u8, data2: u8) -> WireBytes {
        let len = message_len(status);
        let data2 = if len == 2 { 0 } else { data2 & DATA_MASK };
        WireBytes {
            bytes: [status, data1 & DATA_MASK, data2],
            len,
        }
    }

    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    pub fn data1(&self) -> u8 {
        self.bytes[1]
    }

    /// The second data byte, zero for two byte messages.
    pub fn data2(&self) -> u8 {
        self.bytes[2]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}
