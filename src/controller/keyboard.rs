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

//! A line based keyboard driver. Each line read from stdin is one command: a note
//! name plays that note in the current octave, everything else adjusts the driver or
//! is passed to the engine.

use std::io;

use tokio::{
    sync::{mpsc::Sender, watch},
    task::JoinHandle,
};
use tracing::{info, span, warn, Level};

use crate::{
    config::{MAX_OCTAVE, MIN_OCTAVE},
    engine::{NoteRequest, Request, Status},
    midi::Message,
    recordings::Store,
};

const NOTE: &str = "n";
const LATCH: &str = "latch";
const OCTAVE: &str = "octave";
const VELOCITY: &str = "vel";
const CHANNEL: &str = "ch";
const CONTROL_CHANGE: &str = "cc";
const PROGRAM_CHANGE: &str = "pc";
const BEND: &str = "bend";
const PANIC: &str = "panic";
const RECORD: &str = "rec";
const PLAY: &str = "play";
const STOP: &str = "stop";
const METRONOME: &str = "metro";
const TEMPO: &str = "tempo";
const CLICK: &str = "click";
const LOAD: &str = "load";
const STATUS: &str = "status";
const QUIT: &str = "quit";

const VELOCITY_STEP: u8 = 10;

/// Note name to semitone above C.
const NOTE_NAMES: [(&str, u8); 17] = [
    ("c", 0),
    ("c#", 1),
    ("db", 1),
    ("d", 2),
    ("d#", 3),
    ("eb", 3),
    ("e", 4),
    ("f", 5),
    ("f#", 6),
    ("gb", 6),
    ("g", 7),
    ("g#", 8),
    ("ab", 8),
    ("a", 9),
    ("a#", 10),
    ("bb", 10),
    ("b", 11),
];

/// Performance state kept by the driver between commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Zero based channel.
    pub channel: u8,
    pub velocity: u8,
    pub octave: i8,
    pub latch: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            channel: 0,
            velocity: 100,
            octave: 4,
            latch: false,
        }
    }
}

impl Settings {
    /// The MIDI note for a semitone in the current octave, with C4 as 60.
    fn note(&self, semitone: u8) -> Option<u8> {
        let note = (i16::from(self.octave) + 1) * 12 + i16::from(semitone);
        u8::try_from(note).ok().filter(|note| *note <= 0x7F)
    }

    fn note_request(&self, note: u8) -> Request {
        Request::Note(NoteRequest {
            channel: self.channel,
            note,
            velocity: self.velocity,
            latch: self.latch,
        })
    }
}

/// What a line of input asks for.
#[derive(Debug, PartialEq)]
enum Command {
    /// Forward to the engine.
    Request(Request),
    /// Load the named recording from the store.
    Load(String),
    /// Print the engine status.
    Status,
    /// Only the driver settings changed.
    Settings,
    Quit,
    Unrecognized,
}

/// A controller that plays notes and drives the engine using the keyboard.
pub struct Driver {
    settings: Settings,
    store: Store,
}

impl Driver {
    pub fn new(settings: Settings, store: Store) -> Driver {
        Driver { settings, store }
    }

    /// Reads and carries out one command. Returns false once input is exhausted or
    /// the user quits.
    fn monitor_io<R, W>(
        settings: &mut Settings,
        store: &Store,
        requests_tx: &Sender<Request>,
        status_rx: &watch::Receiver<Status>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "[oct {} vel {} ch {}{}] > ",
            settings.octave,
            settings.velocity,
            settings.channel + 1,
            if settings.latch { " latch" } else { "" },
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }

        let request = match parse_command(settings, &input) {
            Command::Request(request) => request,
            Command::Load(name) => match store.load(&name) {
                Ok(log) => Request::Load(log),
                Err(e) => {
                    warn!(name, err = %e, "Unable to load recording.");
                    writeln!(writer, "Unable to load {}: {}", name, e)?;
                    return Ok(true);
                }
            },
            Command::Status => {
                writeln!(writer, "{}", *status_rx.borrow())?;
                return Ok(true);
            }
            Command::Settings => return Ok(true),
            Command::Quit => return Ok(false),
            Command::Unrecognized => {
                warn!(input = input.trim(), "Unrecognized input");
                return Ok(true);
            }
        };

        requests_tx
            .blocking_send(request)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(true)
    }
}

/// Parses one line of input, updating the settings it touches.
fn parse_command(settings: &mut Settings, input: &str) -> Command {
    let input = input.trim().to_lowercase();
    let mut args = input.split_whitespace();
    let Some(command) = args.next() else {
        return Command::Unrecognized;
    };
    let arg = args.next();
    let arg2 = args.next();

    if let Some((_, semitone)) = NOTE_NAMES.iter().find(|(name, _)| *name == command) {
        return match settings.note(*semitone) {
            Some(note) => Command::Request(settings.note_request(note)),
            None => Command::Unrecognized,
        };
    }

    match (command, arg, arg2) {
        (NOTE, Some(note), None) => match note.parse::<u8>() {
            Ok(note) if note <= 0x7F => Command::Request(settings.note_request(note)),
            _ => Command::Unrecognized,
        },
        (LATCH, None, None) => {
            settings.latch = !settings.latch;
            Command::Settings
        }
        (OCTAVE, Some(arg), None) => {
            let Some(octave) = adjust(i16::from(settings.octave), arg, 1) else {
                return Command::Unrecognized;
            };
            settings.octave = octave.clamp(i16::from(MIN_OCTAVE), i16::from(MAX_OCTAVE)) as i8;
            Command::Settings
        }
        (VELOCITY, Some(arg), None) => {
            let Some(velocity) = adjust(i16::from(settings.velocity), arg, VELOCITY_STEP.into())
            else {
                return Command::Unrecognized;
            };
            settings.velocity = velocity.clamp(1, 127) as u8;
            Command::Settings
        }
        (CHANNEL, Some(arg), None) => match arg.parse::<u8>() {
            Ok(channel) if (1..=16).contains(&channel) => {
                settings.channel = channel - 1;
                Command::Settings
            }
            _ => Command::Unrecognized,
        },
        (CONTROL_CHANGE, Some(controller), Some(value)) => {
            match (controller.parse::<u8>(), value.parse::<u8>()) {
                (Ok(controller), Ok(value)) => Command::Request(Request::Send(
                    Message::ControlChange {
                        channel: settings.channel,
                        controller,
                        value,
                    },
                )),
                _ => Command::Unrecognized,
            }
        }
        (PROGRAM_CHANGE, Some(program), None) => match program.parse::<u8>() {
            Ok(program) => Command::Request(Request::Send(Message::ProgramChange {
                channel: settings.channel,
                program,
            })),
            Err(_) => Command::Unrecognized,
        },
        (BEND, Some(value), None) => match value.parse::<u16>() {
            Ok(value) => Command::Request(Request::Send(Message::PitchBend { value })),
            Err(_) => Command::Unrecognized,
        },
        (PANIC, None, None) => Command::Request(Request::Panic),
        (RECORD, None, None) => Command::Request(Request::ToggleRecording),
        (PLAY, None, None) => Command::Request(Request::TogglePlayback),
        (STOP, None, None) => Command::Request(Request::StopPlayback),
        (METRONOME, None, None) => Command::Request(Request::ToggleMetronome),
        (TEMPO, Some(bpm), None) => match bpm.parse::<u16>() {
            Ok(bpm) => Command::Request(Request::SetTempo(bpm)),
            Err(_) => Command::Unrecognized,
        },
        (CLICK, Some(volume), None) => match volume.parse::<u8>() {
            Ok(volume) => Command::Request(Request::SetMetronomeVolume(volume)),
            Err(_) => Command::Unrecognized,
        },
        (LOAD, Some(name), None) => Command::Load(name.to_string()),
        (STATUS, None, None) => Command::Status,
        (QUIT, None, None) => Command::Quit,
        _ => Command::Unrecognized,
    }
}

/// Applies "+", "-" or an absolute value to the current value.
fn adjust(current: i16, arg: &str, step: i16) -> Option<i16> {
    match arg {
        "+" => Some(current + step),
        "-" => Some(current - step),
        value => value.parse::<i16>().ok(),
    }
}

impl super::Driver for Driver {
    fn monitor_requests(
        &self,
        requests_tx: Sender<Request>,
        status_rx: watch::Receiver<Status>,
    ) -> JoinHandle<Result<(), io::Error>> {
        let mut settings = self.settings;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(
                &mut settings,
                &store,
                &requests_tx,
                &status_rx,
                io::stdin().lock(),
                io::stdout(),
            )? {}

            info!("Keyboard driver finished.");
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use std::{
        error::Error,
        io::{self, BufReader, BufWriter},
        path::Path,
    };

    use tokio::sync::{mpsc, watch};

    use crate::{
        engine::{NoteRequest, Request, Status},
        midi::Message,
        recorder::{EventLog, PersistRequest, RecordedEvent},
        recordings::Store,
    };

    use super::{Driver, Settings};

    /// Runs one line through the driver, returning whether it continues and the
    /// request it sent, if any.
    fn get_request(
        settings: &mut Settings,
        store: &Store,
        line: &str,
    ) -> Result<(bool, Option<Request>), io::Error> {
        let (sender, mut receiver) = mpsc::channel::<Request>(1);
        let (_status_tx, status_rx) = watch::channel(Status::default());

        let reader = BufReader::new(line.as_bytes());
        let writer = BufWriter::new(Vec::new());
        let keep_going = Driver::monitor_io(settings, store, &sender, &status_rx, reader, writer)?;

        // Force the sender to close.
        drop(sender);
        Ok((keep_going, receiver.blocking_recv()))
    }

    fn request(settings: &mut Settings, line: &str) -> Option<Request> {
        let store = Store::new(Path::new("nonexistent"));
        get_request(settings, &store, line)
            .expect("monitor_io failed")
            .1
    }

    fn note(note: u8, latch: bool) -> Option<Request> {
        Some(Request::Note(NoteRequest {
            channel: 0,
            note,
            velocity: 100,
            latch,
        }))
    }

    #[test]
    fn test_note_names() {
        let mut settings = Settings::default();
        assert_eq!(note(60, false), request(&mut settings, "c"));
        assert_eq!(note(61, false), request(&mut settings, "C#"));
        assert_eq!(note(70, false), request(&mut settings, "bb"));
        assert_eq!(note(71, false), request(&mut settings, "b\n"));
        assert_eq!(note(72, false), request(&mut settings, "n 72"));
        assert_eq!(None, request(&mut settings, "n 128"));
        assert_eq!(None, request(&mut settings, "h"));
    }

    #[test]
    fn test_octave_and_latch() {
        let mut settings = Settings::default();
        assert_eq!(None, request(&mut settings, "octave +"));
        assert_eq!(note(72, false), request(&mut settings, "c"));
        assert_eq!(None, request(&mut settings, "octave 2"));
        assert_eq!(note(36, false), request(&mut settings, "c"));

        assert_eq!(None, request(&mut settings, "latch"));
        assert!(settings.latch);
        assert_eq!(note(38, true), request(&mut settings, "d"));

        // Octave 9 only reaches G.
        assert_eq!(None, request(&mut settings, "octave 12"));
        assert_eq!(9, settings.octave);
        assert_eq!(note(127, true), request(&mut settings, "g"));
        assert_eq!(None, request(&mut settings, "a"));
    }

    #[test]
    fn test_velocity_and_channel() {
        let mut settings = Settings::default();
        request(&mut settings, "vel -");
        assert_eq!(90, settings.velocity);
        request(&mut settings, "vel 500");
        assert_eq!(127, settings.velocity);
        request(&mut settings, "ch 10");
        assert_eq!(9, settings.channel);
        request(&mut settings, "ch 17");
        assert_eq!(9, settings.channel);

        assert_eq!(
            Some(Request::Note(NoteRequest {
                channel: 9,
                note: 60,
                velocity: 127,
                latch: false,
            })),
            request(&mut settings, "c")
        );
        assert_eq!(
            Some(Request::Send(Message::ControlChange {
                channel: 9,
                controller: 64,
                value: 127,
            })),
            request(&mut settings, "cc 64 127")
        );
        assert_eq!(
            Some(Request::Send(Message::ProgramChange {
                channel: 9,
                program: 5,
            })),
            request(&mut settings, "pc 5")
        );
    }

    #[test]
    fn test_engine_commands() {
        let mut settings = Settings::default();
        assert_eq!(Some(Request::Panic), request(&mut settings, "panic"));
        assert_eq!(
            Some(Request::ToggleRecording),
            request(&mut settings, "rec")
        );
        assert_eq!(
            Some(Request::TogglePlayback),
            request(&mut settings, "play")
        );
        assert_eq!(Some(Request::StopPlayback), request(&mut settings, "stop"));
        assert_eq!(
            Some(Request::ToggleMetronome),
            request(&mut settings, "metro")
        );
        assert_eq!(
            Some(Request::SetTempo(90)),
            request(&mut settings, "tempo 90")
        );
        assert_eq!(
            Some(Request::SetMetronomeVolume(40)),
            request(&mut settings, "click 40")
        );
        assert_eq!(
            Some(Request::Send(Message::PitchBend { value: 12000 })),
            request(&mut settings, "bend 12000")
        );
        assert_eq!(None, request(&mut settings, "unrecognized"));
        assert_eq!(None, request(&mut settings, "tempo fast"));
    }

    #[test]
    fn test_quit_and_end_of_input() -> Result<(), io::Error> {
        let mut settings = Settings::default();
        let store = Store::new(Path::new("nonexistent"));
        assert_eq!((false, None), get_request(&mut settings, &store, "quit")?);
        assert_eq!((false, None), get_request(&mut settings, &store, "")?);
        assert_eq!((true, None), get_request(&mut settings, &store, "status")?);
        Ok(())
    }

    #[test]
    fn test_load() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(dir.path());
        let mut log = EventLog::new();
        log.push(RecordedEvent {
            offset_millis: 0,
            status: 0x90,
            data1: 60,
            data2: 100,
        });
        store.save(&PersistRequest {
            name: "rec_1".to_string(),
            log: log.clone(),
        })?;

        let mut settings = Settings::default();
        assert_eq!(
            (true, Some(Request::Load(log))),
            get_request(&mut settings, &store, "load rec_1")?
        );
        assert_eq!(
            (true, None),
            get_request(&mut settings, &store, "load missing")?
        );

        // Names can't reach outside the store directory.
        let nested = Store::new(&dir.path().join("nested"));
        assert_eq!(
            (true, None),
            get_request(&mut settings, &nested, "load ../rec_1")?
        );
        Ok(())
    }
}
