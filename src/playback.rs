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
use std::time::Instant;

use tracing::{debug, info};

use crate::{
    midi::wire::{ALL_NOTES_OFF, CONTROL_CHANGE, NOTE_OFF, NOTE_ON},
    recorder::{EventLog, RecordedEvent},
};

/// Requests the engine refuses to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("there is nothing to play back")]
    EmptyLog,
}

/// Position of an active playback within its log.
struct Cursor {
    started_at: Instant,
    next_index: usize,
}

/// Notes that playback has turned on and not yet off, one bit per key per channel.
#[derive(Default)]
struct SoundingNotes {
    keys: [u128; 16],
}

impl SoundingNotes {
    /// Updates the set from an event that was just played.
    fn observe(&mut self, event: &RecordedEvent) {
        let channel = usize::from(event.status & 0x0F);
        let key = 1u128 << (event.data1 & 0x7F);
        match event.status & 0xF0 {
            NOTE_ON if event.data2 > 0 => self.keys[channel] |= key,
            NOTE_ON | NOTE_OFF => self.keys[channel] &= !key,
            CONTROL_CHANGE if event.data1 == ALL_NOTES_OFF => self.keys[channel] = 0,
            _ => {}
        }
    }

    /// Empties the set, producing a note-off at the given offset for every note in it.
    fn release<F>(&mut self, offset_millis: u32, mut emit: F)
    where
        F: FnMut(&RecordedEvent),
    {
        for (channel, keys) in self.keys.iter_mut().enumerate() {
            for key in 0..128u8 {
                if *keys & (1u128 << key) != 0 {
                    emit(&RecordedEvent {
                        offset_millis,
                        status: NOTE_OFF | channel as u8,
                        data1: key,
                        data2: 0,
                    });
                }
            }
            *keys = 0;
        }
    }

    fn count(&self) -> usize {
        self.keys.iter().map(|keys| keys.count_ones() as usize).sum()
    }
}

/// Replays an event log against the clock, emitting every event once its offset is due.
/// Notes the log leaves sounding are turned off when the end is reached.
pub struct Playback {
    cursor: Option<Cursor>,
    sounding: SoundingNotes,
}

impl Playback {
    pub fn new() -> Playback {
        Playback {
            cursor: None,
            sounding: SoundingNotes::default(),
        }
    }

    /// Rewinds to the start of the log and begins playing.
    pub fn start(&mut self, log: &EventLog, now: Instant) -> Result<(), Rejected> {
        if log.is_empty() {
            return Err(Rejected::EmptyLog);
        }

        info!(
            events = log.len(),
            duration = ?log.duration(),
            "Playback started."
        );
        self.cursor = Some(Cursor {
            started_at: now,
            next_index: 0,
        });
        self.sounding = SoundingNotes::default();
        Ok(())
    }

    /// Emits every event that has come due, in log order. Returns true if this call
    /// emitted the final event and playback stopped, in which case note-offs for any
    /// notes still sounding from the log follow the final event.
    pub fn tick<F>(&mut self, now: Instant, log: &EventLog, mut emit: F) -> bool
    where
        F: FnMut(&RecordedEvent),
    {
        let Some(cursor) = self.cursor.as_mut() else {
            return false;
        };

        let elapsed = now.saturating_duration_since(cursor.started_at);
        while let Some(event) = log.get(cursor.next_index) {
            if event.offset() > elapsed {
                break;
            }
            emit(event);
            self.sounding.observe(event);
            cursor.next_index += 1;
        }

        if cursor.next_index < log.len() {
            return false;
        }

        debug!(
            events = cursor.next_index,
            sounding = self.sounding.count(),
            "Playback reached the end of the log."
        );
        self.cursor = None;
        self.sounding.release(log.duration_millis(), emit);
        true
    }

    /// Stops playing. Returns true if playback was active.
    pub fn stop(&mut self) -> bool {
        match self.cursor.take() {
            Some(cursor) => {
                info!(position = cursor.next_index, "Playback stopped.");
                self.sounding = SoundingNotes::default();
                true
            }
            None => false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.cursor.is_some()
    }

    /// Index of the next event to be played.
    pub fn position(&self) -> Option<usize> {
        self.cursor.as_ref().map(|cursor| cursor.next_index)
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}
