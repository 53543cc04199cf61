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

//! Capture of outgoing MIDI traffic into a bounded, timestamp-relative log.

use std::{
    slice,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tracing::{info, warn};

use crate::midi::WireBytes;

/// The maximum number of events a log holds. Anything past this is dropped.
pub const MAX_EVENTS: usize = 2048;

/// One outbound MIDI message, relative to the start of its recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEvent {
    pub offset_millis: u32,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl RecordedEvent {
    /// Creates an event from captured wire bytes.
    pub fn new(offset_millis: u32, wire: &WireBytes) -> RecordedEvent {
        RecordedEvent {
            offset_millis,
            status: wire.status(),
            data1: wire.data1(),
            data2: wire.data2(),
        }
    }

    /// The wire bytes to send when replaying this event.
    pub fn wire(&self) -> WireBytes {
        WireBytes::new(self.status, self.data1, self.data2)
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_millis.into())
    }
}

/// A bounded sequence of recorded events in capture order. The backing storage is
/// allocated once and never grows past [MAX_EVENTS].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    events: Vec<RecordedEvent>,
}

impl EventLog {
    pub fn new() -> EventLog {
        EventLog {
            events: Vec::with_capacity(MAX_EVENTS),
        }
    }

    /// Appends an event. Returns false, leaving the log untouched, if it's full.
    pub fn push(&mut self, event: RecordedEvent) -> bool {
        if self.is_full() {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn get(&self, index: usize) -> Option<&RecordedEvent> {
        self.events.get(index)
    }

    pub fn iter(&self) -> slice::Iter<'_, RecordedEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= MAX_EVENTS
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// The offset of the last event.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_millis().into())
    }

    pub fn duration_millis(&self) -> u32 {
        self.events
            .last()
            .map(|event| event.offset_millis)
            .unwrap_or_default()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a RecordedEvent;
    type IntoIter = slice::Iter<'a, RecordedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Hands a finished recording to the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistRequest {
    pub name: String,
    pub log: EventLog,
}

struct Session {
    started_at: Instant,
    name: String,
    truncated: bool,
}

/// Captures emitted MIDI while a recording session is active. Outside of a session
/// the log holds the last recorded or loaded sequence.
pub struct Recorder {
    session: Option<Session>,
    log: EventLog,
}

impl Recorder {
    pub fn new() -> Recorder {
        Recorder {
            session: None,
            log: EventLog::new(),
        }
    }

    /// Starts a new session, discarding the current log. Returns the session name.
    pub fn start(&mut self, now: Instant) -> String {
        let name = session_name();
        self.log.clear();
        self.session = Some(Session {
            started_at: now,
            name: name.clone(),
            truncated: false,
        });
        info!(name, "Recording started.");
        name
    }

    /// Appends the message to the log if a session is active and the log has room.
    pub fn capture(&mut self, now: Instant, wire: &WireBytes) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let offset = now.saturating_duration_since(session.started_at).as_millis();
        let offset_millis = u32::try_from(offset).unwrap_or(u32::MAX);
        if !self.log.push(RecordedEvent::new(offset_millis, wire)) && !session.truncated {
            session.truncated = true;
            warn!(
                name = session.name,
                max_events = MAX_EVENTS,
                "Recording is full, further events are dropped."
            );
        }
    }

    /// Ends the session. Returns a persist request if anything was captured.
    pub fn stop(&mut self) -> Option<PersistRequest> {
        let session = self.session.take()?;
        info!(
            name = session.name,
            events = self.log.len(),
            "Recording stopped."
        );

        if self.log.is_empty() {
            return None;
        }

        Some(PersistRequest {
            name: session.name,
            log: self.log.clone(),
        })
    }

    /// Replaces the log with a loaded one. Ignored while recording.
    pub fn replace(&mut self, log: EventLog) -> bool {
        if self.is_recording() {
            return false;
        }
        self.log = log;
        true
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// The name of the active session.
    pub fn name(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.name.as_str())
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates a time based session name.
fn session_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("rec_{}", millis)
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use crate::midi::{Message, WireBytes};

    use super::{EventLog, RecordedEvent, Recorder, MAX_EVENTS};

    fn note_on(key: u8) -> WireBytes {
        Message::NoteOn {
            channel: 0,
            key,
            velocity: 100,
        }
        .encode()
    }

    #[test]
    fn test_capture_requires_session() {
        let mut recorder = Recorder::new();
        recorder.capture(Instant::now(), &note_on(60));
        assert!(recorder.log().is_empty());
        assert!(recorder.stop().is_none());
    }

    #[test]
    fn test_capture_offsets() {
        let mut recorder = Recorder::new();
        let start = Instant::now();
        let name = recorder.start(start);
        assert!(name.starts_with("rec_"));
        assert_eq!(Some(name.as_str()), recorder.name());

        recorder.capture(start, &note_on(60));
        recorder.capture(start + Duration::from_millis(250), &note_on(62));
        recorder.capture(start + Duration::from_millis(1250), &note_on(64));

        let offsets: Vec<u32> = recorder.log().iter().map(|e| e.offset_millis).collect();
        assert_eq!(vec![0, 250, 1250], offsets);
        assert_eq!(
            RecordedEvent {
                offset_millis: 250,
                status: 0x90,
                data1: 62,
                data2: 100,
            },
            *recorder.log().get(1).expect("event should exist")
        );

        let request = recorder.stop().expect("expected a persist request");
        assert_eq!(name, request.name);
        assert_eq!(3, request.log.len());
        assert!(!recorder.is_recording());

        // The log survives the session for playback.
        assert_eq!(3, recorder.log().len());
        assert_eq!(Duration::from_millis(1250), recorder.log().duration());
    }

    #[test]
    fn test_empty_recording_is_not_persisted() {
        let mut recorder = Recorder::new();
        recorder.start(Instant::now());
        assert!(recorder.stop().is_none());
    }

    #[test]
    fn test_start_resets_log() {
        let mut recorder = Recorder::new();
        let start = Instant::now();
        recorder.start(start);
        recorder.capture(start, &note_on(60));
        recorder.stop();

        recorder.start(start + Duration::from_secs(1));
        assert!(recorder.log().is_empty());
    }

    #[test]
    fn test_full_log_truncates() {
        let mut recorder = Recorder::new();
        let start = Instant::now();
        recorder.start(start);
        for i in 0..MAX_EVENTS + 10 {
            recorder.capture(start + Duration::from_millis(i as u64), &note_on(60));
        }
        assert_eq!(MAX_EVENTS, recorder.log().len());
        assert!(recorder.log().is_full());
        assert_eq!(
            Some((MAX_EVENTS - 1) as u32),
            recorder.log().iter().last().map(|e| e.offset_millis)
        );

        let request = recorder.stop().expect("expected a persist request");
        assert_eq!(MAX_EVENTS, request.log.len());
    }

    #[test]
    fn test_replace_ignored_while_recording() {
        let mut recorder = Recorder::new();
        let mut log = EventLog::new();
        log.push(RecordedEvent::new(10, &note_on(70)));

        recorder.start(Instant::now());
        assert!(!recorder.replace(log.clone()));
        assert!(recorder.log().is_empty());

        recorder.stop();
        assert!(recorder.replace(log));
        assert_eq!(1, recorder.log().len());
    }

    #[test]
    fn test_two_byte_event_round_trip() {
        let wire = Message::ProgramChange {
            channel: 3,
            program: 9,
        }
        .encode();
        let event = RecordedEvent::new(0, &wire);
        assert_eq!(0, event.data2);
        assert_eq!(wire, event.wire());
    }
}
