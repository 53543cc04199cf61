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

//! A real-time keyboard to MIDI controller: sounding notes are tracked in fixed
//! voice pools and released on a timer, outgoing traffic can be recorded and played
//! back, and a metronome ticks alongside. Everything is driven by a single polling
//! loop.

pub mod config;
pub mod controller;
pub mod engine;
pub mod metronome;
pub mod midi;
pub mod playback;
pub mod recorder;
pub mod recordings;
mod thread_priority;
pub mod util;
pub mod voices;

#[cfg(test)]
mod test;
