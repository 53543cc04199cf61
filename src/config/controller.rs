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
use std::{path::PathBuf, time::Duration};

use duration_string::DurationString;
use serde::Deserialize;

use super::{error::ConfigError, metronome::Metronome};

const DEFAULT_RECORDINGS: &str = "recordings";
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1);
const DEFAULT_CHANNEL: u8 = 1;
const DEFAULT_VELOCITY: u8 = 100;
const DEFAULT_OCTAVE: i8 = 4;

/// The lowest and highest octaves a note can be played in.
pub const MIN_OCTAVE: i8 = -1;
pub const MAX_OCTAVE: i8 = 9;

/// A YAML representation of the controller configuration.
#[derive(Deserialize, Clone)]
pub struct Controller {
    /// The MIDI output device. Names starting with "mock" select a mock device.
    midi_device: String,

    /// The directory recordings are saved to and loaded from.
    recordings: Option<String>,

    /// How often the polling loop runs.
    tick_interval: Option<String>,

    /// The MIDI channel notes are played on, 1-16.
    channel: Option<u8>,

    /// The initial note velocity.
    velocity: Option<u8>,

    /// The initial octave.
    octave: Option<i8>,

    /// The metronome configuration.
    metronome: Option<Metronome>,
}

impl Controller {
    /// Returns the MIDI device name.
    pub fn midi_device(&self) -> &str {
        &self.midi_device
    }

    /// Returns the recordings directory.
    pub fn recordings(&self) -> PathBuf {
        PathBuf::from(
            self.recordings
                .as_deref()
                .unwrap_or(DEFAULT_RECORDINGS),
        )
    }

    /// Returns the polling interval.
    pub fn tick_interval(&self) -> Result<Duration, ConfigError> {
        match &self.tick_interval {
            Some(tick_interval) => Ok(DurationString::from_string(tick_interval.clone())
                .map_err(|e| ConfigError::TickInterval(tick_interval.clone(), e.to_string()))?
                .into()),
            None => Ok(DEFAULT_TICK_INTERVAL),
        }
    }

    /// Returns the zero based wire channel.
    pub fn channel(&self) -> Result<u8, ConfigError> {
        let channel = self.channel.unwrap_or(DEFAULT_CHANNEL);
        if !(1..=16).contains(&channel) {
            return Err(ConfigError::Channel(channel));
        }
        Ok(channel - 1)
    }

    pub fn velocity(&self) -> u8 {
        self.velocity.unwrap_or(DEFAULT_VELOCITY).clamp(1, 127)
    }

    pub fn octave(&self) -> i8 {
        self.octave
            .unwrap_or(DEFAULT_OCTAVE)
            .clamp(MIN_OCTAVE, MAX_OCTAVE)
    }

    pub fn metronome(&self) -> Metronome {
        self.metronome.clone().unwrap_or_default()
    }
}
