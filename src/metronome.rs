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

//! A fixed-interval beat, independent of everything else the engine plays.
//!
//! Each beat is a note-on at a fixed percussive pitch followed, after a short gap,
//! by its note-off. The note-off is scheduled and emitted by a later tick rather
//! than waited for.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::midi::Message;

pub const MIN_BPM: u16 = 30;
pub const MAX_BPM: u16 = 300;
pub const DEFAULT_BPM: u16 = 120;
pub const DEFAULT_VOLUME: u8 = 100;

/// General MIDI percussion channel.
pub const METRONOME_CHANNEL: u8 = 9;
/// Side stick.
pub const METRONOME_NOTE: u8 = 37;
/// How long the beat note sounds.
pub const METRONOME_GAP: Duration = Duration::from_millis(20);

pub struct Metronome {
    enabled: bool,
    bpm: u16,
    beat_interval_millis: u64,
    volume: u8,
    last_beat_at: Option<Instant>,
    /// When the note-off for the last beat is due.
    pending_off: Option<Instant>,
}

impl Metronome {
    /// Creates a disabled metronome.
    pub fn new(bpm: u16, volume: u8) -> Metronome {
        let mut metronome = Metronome {
            enabled: false,
            bpm: DEFAULT_BPM,
            beat_interval_millis: beat_interval_millis(DEFAULT_BPM),
            volume: volume & 0x7F,
            last_beat_at: None,
            pending_off: None,
        };
        metronome.set_tempo(bpm);
        metronome
    }

    /// Sets the tempo, clamped to [MIN_BPM, MAX_BPM].
    pub fn set_tempo(&mut self, bpm: u16) {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.beat_interval_millis = beat_interval_millis(self.bpm);
        debug!(
            bpm = self.bpm,
            interval_millis = self.beat_interval_millis,
            "Tempo set."
        );
    }

    /// Enables or disables the beat. Enabling starts counting the interval from now.
    pub fn set_enabled(&mut self, enabled: bool, now: Instant) {
        if enabled && !self.enabled {
            self.last_beat_at = Some(now);
        }
        self.enabled = enabled;
        info!(enabled, bpm = self.bpm, "Metronome toggled.");
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume & 0x7F;
    }

    /// Emits a due note-off and, if the interval has elapsed, a new beat. Returns true
    /// if a beat was emitted.
    pub fn tick<F>(&mut self, now: Instant, mut emit: F) -> bool
    where
        F: FnMut(Message),
    {
        if self.pending_off.is_some_and(|off_at| now >= off_at) {
            self.pending_off = None;
            emit(beat_off());
        }

        if !self.enabled {
            return false;
        }

        let last_beat_at = *self.last_beat_at.get_or_insert(now);
        let interval = Duration::from_millis(self.beat_interval_millis);
        if now.saturating_duration_since(last_beat_at) < interval {
            return false;
        }

        // Drift is accepted: the next interval counts from this tick, not from the
        // nominal beat time.
        self.last_beat_at = Some(now);
        if self.pending_off.take().is_some() {
            emit(beat_off());
        }
        emit(Message::NoteOn {
            channel: METRONOME_CHANNEL,
            key: METRONOME_NOTE,
            velocity: self.volume,
        });
        self.pending_off = Some(now + METRONOME_GAP);
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    pub fn beat_interval_millis(&self) -> u64 {
        self.beat_interval_millis
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }
}

impl Default for Metronome {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, DEFAULT_VOLUME)
    }
}

fn beat_interval_millis(bpm: u16) -> u64 {
    60_000 / u64::from(bpm)
}

fn beat_off() -> Message {
    Message::NoteOff {
        channel: METRONOME_CHANNEL,
        key: METRONOME_NOTE,
        velocity: 0,
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use crate::midi::Message;

    use super::*;

    #[test]
    fn test_tempo() {
        let mut metronome = Metronome::default();
        metronome.set_tempo(120);
        assert_eq!(500, metronome.beat_interval_millis());
        metronome.set_tempo(60);
        assert_eq!(1000, metronome.beat_interval_millis());

        metronome.set_tempo(1);
        assert_eq!(MIN_BPM, metronome.bpm());
        metronome.set_tempo(1000);
        assert_eq!(MAX_BPM, metronome.bpm());
        assert_eq!(200, metronome.beat_interval_millis());
    }

    #[test]
    fn test_disabled_is_silent() {
        let mut metronome = Metronome::default();
        let start = Instant::now();
        let mut emitted = Vec::new();
        for i in 0..10 {
            metronome.tick(start + Duration::from_secs(i), |m| emitted.push(m));
        }
        assert!(emitted.is_empty());
    }

    #[test]
    fn test_beats_on_interval() {
        let mut metronome = Metronome::new(120, 90);
        let start = Instant::now();
        metronome.set_enabled(true, start);

        let mut beats = 0;
        let mut emitted = Vec::new();
        let mut tick = |metronome: &mut Metronome, millis: u64| {
            if metronome.tick(start + Duration::from_millis(millis), |m| emitted.push(m)) {
                beats += 1;
            }
        };

        tick(&mut metronome, 200);
        tick(&mut metronome, 500);
        tick(&mut metronome, 700);
        tick(&mut metronome, 1000);
        assert_eq!(2, beats);

        assert_eq!(
            vec![
                Message::NoteOn {
                    channel: METRONOME_CHANNEL,
                    key: METRONOME_NOTE,
                    velocity: 90,
                },
                Message::NoteOff {
                    channel: METRONOME_CHANNEL,
                    key: METRONOME_NOTE,
                    velocity: 0,
                },
                Message::NoteOn {
                    channel: METRONOME_CHANNEL,
                    key: METRONOME_NOTE,
                    velocity: 90,
                },
            ],
            emitted
        );
    }

    #[test]
    fn test_short_gap_produces_no_beat() {
        let mut metronome = Metronome::new(120, 90);
        let start = Instant::now();
        metronome.set_enabled(true, start);

        assert!(metronome.tick(start + Duration::from_millis(500), |_| {}));
        assert!(!metronome.tick(start + Duration::from_millis(700), |_| {}));
        // The interval counts from the tick that fired.
        assert!(!metronome.tick(start + Duration::from_millis(999), |_| {}));
        assert!(metronome.tick(start + Duration::from_millis(1000), |_| {}));
    }

    #[test]
    fn test_note_off_after_gap() {
        let mut metronome = Metronome::new(120, 90);
        let start = Instant::now();
        metronome.set_enabled(true, start);

        let mut emitted = Vec::new();
        metronome.tick(start + Duration::from_millis(500), |m| emitted.push(m));
        metronome.tick(start + Duration::from_millis(510), |m| emitted.push(m));
        assert_eq!(1, emitted.len());

        // Disabling doesn't strand the sounding beat.
        metronome.set_enabled(false, start + Duration::from_millis(515));
        metronome.tick(start + Duration::from_millis(520), |m| emitted.push(m));
        assert_eq!(2, emitted.len());
        assert!(matches!(emitted[1], Message::NoteOff { .. }));
    }
}
