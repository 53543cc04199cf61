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

//! The polling orchestrator.
//!
//! The engine owns the voice pools, the recorder, the playback cursor and the
//! metronome. Every mutation happens through `&mut Engine`, so a caller that
//! shares an engine between threads has to serialize access to it as a whole.
//! Nothing in here blocks: [Engine::tick] is meant to be called on a fixed cadence
//! with one clock reading per cycle.

use std::{fmt, sync::Arc, time::Instant};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

pub use crate::playback::Rejected;

use crate::{
    metronome::Metronome,
    midi::{self, Message, WireBytes},
    playback::Playback,
    recorder::{EventLog, PersistRequest, Recorder},
    util::duration_minutes_seconds,
    voices::{Voice, VoiceHandle, VoiceKind, VoiceTracker},
};

/// A note-on request from an input collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteRequest {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    /// Latched notes go to the sustained pool.
    pub latch: bool,
}

/// Requests that input collaborators send to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Note(NoteRequest),
    /// Sends a non-note message, such as a control or program change.
    Send(Message),
    /// Silences everything.
    Panic,
    StartRecording,
    StopRecording,
    ToggleRecording,
    StartPlayback,
    StopPlayback,
    TogglePlayback,
    /// Replaces the last recorded or loaded log.
    Load(EventLog),
    SetTempo(u16),
    SetMetronome(bool),
    ToggleMetronome,
    SetMetronomeVolume(u8),
}

/// A read-only snapshot of the engine for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub recording: bool,
    pub playing: bool,
    pub event_count: usize,
    pub recording_name: Option<String>,
    pub metronome_enabled: bool,
    pub bpm: u16,
    pub transient_voices: usize,
    pub sustained_voices: usize,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.recording {
            "recording"
        } else if self.playing {
            "playing"
        } else {
            "idle"
        };
        write!(
            f,
            "{} | events: {} | metronome: {} ({} bpm) | voices: {}/{}",
            state,
            self.event_count,
            if self.metronome_enabled { "on" } else { "off" },
            self.bpm,
            self.transient_voices,
            self.sustained_voices,
        )
    }
}

/// Sends wire bytes to the device, capturing them if recording.
struct Output<'a> {
    device: &'a dyn midi::Device,
    recorder: &'a mut Recorder,
}

impl Output<'_> {
    fn send(&mut self, wire: WireBytes, now: Instant) {
        send(self.device, &wire);
        self.recorder.capture(now, &wire);
    }
}

/// Sends wire bytes to the device. Failures are logged and otherwise ignored.
fn send(device: &dyn midi::Device, wire: &WireBytes) {
    if let Err(e) = device.send(wire.as_slice()) {
        error!(
            device = device.name(),
            err = e.as_ref(),
            "Error sending MIDI message."
        );
    }
}

fn note_off(voice: Voice) -> WireBytes {
    Message::NoteOff {
        channel: voice.channel,
        key: voice.note,
        velocity: 0,
    }
    .encode()
}

pub struct Engine {
    device: Arc<dyn midi::Device>,
    voices: VoiceTracker,
    recorder: Recorder,
    playback: Playback,
    metronome: Metronome,
    /// Finished recordings are handed to storage through here.
    persist_tx: Option<Sender<PersistRequest>>,
}

impl Engine {
    /// Creates a new engine sending through the given device.
    pub fn new(
        device: Arc<dyn midi::Device>,
        metronome: Metronome,
        persist_tx: Option<Sender<PersistRequest>>,
    ) -> Engine {
        Engine {
            device,
            voices: VoiceTracker::new(),
            recorder: Recorder::new(),
            playback: Playback::new(),
            metronome,
            persist_tx,
        }
    }

    /// Carries out a request.
    pub fn handle(&mut self, request: Request, now: Instant) -> Result<(), Rejected> {
        match request {
            Request::Note(note) => {
                self.note_on(note, now);
            }
            Request::Send(message) => self.send(message, now),
            Request::Panic => self.all_notes_off(now),
            Request::StartRecording => {
                self.start_recording(now);
            }
            Request::StopRecording => self.stop_recording(),
            Request::ToggleRecording => {
                if self.recorder.is_recording() {
                    self.stop_recording();
                } else {
                    self.start_recording(now);
                }
            }
            Request::StartPlayback => self.start_playback(now)?,
            Request::StopPlayback => self.stop_playback(now),
            Request::TogglePlayback => {
                if self.playback.is_playing() {
                    self.stop_playback(now);
                } else {
                    self.start_playback(now)?;
                }
            }
            Request::Load(log) => {
                self.load(log, now);
            }
            Request::SetTempo(bpm) => self.metronome.set_tempo(bpm),
            Request::SetMetronome(enabled) => self.metronome.set_enabled(enabled, now),
            Request::ToggleMetronome => {
                let enabled = !self.metronome.is_enabled();
                self.metronome.set_enabled(enabled, now);
            }
            Request::SetMetronomeVolume(volume) => self.metronome.set_volume(volume),
        }
        Ok(())
    }

    /// Starts a note in the pool selected by the latch flag. If the pool is full the
    /// note is dropped and nothing is sent.
    pub fn note_on(&mut self, request: NoteRequest, now: Instant) -> Option<VoiceHandle> {
        let kind = VoiceKind::from_latch(request.latch);
        let Some(handle) = self
            .voices
            .start(kind, request.channel, request.note, now)
        else {
            debug!(
                note = request.note,
                kind = ?kind,
                "Voice pool is full, dropping note."
            );
            return None;
        };

        let wire = Message::NoteOn {
            channel: request.channel,
            key: request.note,
            velocity: request.velocity,
        }
        .encode();
        Output {
            device: self.device.as_ref(),
            recorder: &mut self.recorder,
        }
        .send(wire, now);
        Some(handle)
    }

    /// Sends an arbitrary message, capturing it if recording.
    pub fn send(&mut self, message: Message, now: Instant) {
        Output {
            device: self.device.as_ref(),
            recorder: &mut self.recorder,
        }
        .send(message.encode(), now);
    }

    /// Releases every voice in both pools, then sends all notes off on every channel
    /// and recentres pitch bend.
    pub fn all_notes_off(&mut self, now: Instant) {
        let mut output = Output {
            device: self.device.as_ref(),
            recorder: &mut self.recorder,
        };
        self.voices
            .clear(|voice| output.send(note_off(voice), now));
        for channel in 0..16 {
            output.send(Message::all_notes_off(channel).encode(), now);
        }
        output.send(Message::pitch_bend_center().encode(), now);
    }

    /// Starts recording, stopping playback first. Returns the session name.
    pub fn start_recording(&mut self, now: Instant) -> String {
        self.stop_playback(now);
        self.stop_recording();
        self.recorder.start(now)
    }

    /// Stops recording and hands anything captured to storage.
    pub fn stop_recording(&mut self) {
        let Some(request) = self.recorder.stop() else {
            return;
        };

        match &self.persist_tx {
            Some(persist_tx) => {
                if let Err(e) = persist_tx.try_send(request) {
                    error!(err = %e, "Unable to hand recording to storage.");
                }
            }
            None => debug!(name = request.name, "No storage configured, recording kept in memory."),
        }
    }

    /// Starts playing the last recorded or loaded log from the top, stopping recording
    /// first.
    pub fn start_playback(&mut self, now: Instant) -> Result<(), Rejected> {
        if self.recorder.log().is_empty() {
            warn!("Nothing to play back.");
            return Err(Rejected::EmptyLog);
        }

        self.stop_recording();
        self.playback.stop();
        self.all_notes_off(now);
        self.playback.start(self.recorder.log(), now)
    }

    /// Stops playback and silences everything. Does nothing if not playing.
    pub fn stop_playback(&mut self, now: Instant) {
        if self.playback.stop() {
            self.all_notes_off(now);
        }
    }

    /// Replaces the last recorded or loaded log. Ignored while recording.
    pub fn load(&mut self, log: EventLog, now: Instant) -> bool {
        if self.recorder.is_recording() {
            warn!("Can't load a recording while recording.");
            return false;
        }

        self.stop_playback(now);
        info!(
            events = log.len(),
            duration = duration_minutes_seconds(log.duration()),
            "Recording loaded."
        );
        self.recorder.replace(log)
    }

    /// Advances note expiry, playback and the metronome.
    pub fn tick(&mut self, now: Instant) {
        let mut output = Output {
            device: self.device.as_ref(),
            recorder: &mut self.recorder,
        };
        self.voices
            .expire(now, |voice| output.send(note_off(voice), now));

        // Playback releases its own notes at the end of the log. Live voices are
        // left alone.
        let device = self.device.as_ref();
        if self
            .playback
            .tick(now, self.recorder.log(), |event| send(device, &event.wire()))
        {
            info!("Playback finished.");
        }

        // Beats are a side channel and are never recorded.
        self.metronome
            .tick(now, |message| send(device, &message.encode()));
    }

    /// Ends any recording or playback and silences everything.
    pub fn shutdown(&mut self, now: Instant) {
        self.stop_recording();
        self.playback.stop();
        self.all_notes_off(now);
    }

    pub fn status(&self) -> Status {
        Status {
            recording: self.recorder.is_recording(),
            playing: self.playback.is_playing(),
            event_count: self.recorder.log().len(),
            recording_name: self.recorder.name().map(str::to_string),
            metronome_enabled: self.metronome.is_enabled(),
            bpm: self.metronome.bpm(),
            transient_voices: self.voices.active(VoiceKind::Transient),
            sustained_voices: self.voices.active(VoiceKind::Sustained),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn log(&self) -> &EventLog {
        self.recorder.log()
    }
}
