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
use serde::Deserialize;

use crate::metronome::{DEFAULT_BPM, DEFAULT_VOLUME};

/// A YAML representation of the metronome configuration.
#[derive(Deserialize, Clone, Default)]
pub struct Metronome {
    /// Whether the metronome ticks from startup.
    enabled: Option<bool>,

    /// The tempo in beats per minute. Clamped to the supported range.
    bpm: Option<u16>,

    /// The beat velocity.
    volume: Option<u8>,
}

impl Metronome {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn bpm(&self) -> u16 {
        self.bpm.unwrap_or(DEFAULT_BPM)
    }

    pub fn volume(&self) -> u8 {
        self.volume.unwrap_or(DEFAULT_VOLUME)
    }

    /// Builds a (disabled) metronome from the configuration.
    pub fn to_metronome(&self) -> crate::metronome::Metronome {
        crate::metronome::Metronome::new(self.bpm(), self.volume())
    }
}
