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

//! On-disk storage of recorded event logs.
//!
//! A recording is a text file:
//!
//! ```text
//! KEYMIDI-REC 1
//! 3
//! 0,144,60,100
//! 250,128,60,0
//! 1000,192,4,0
//! ```
//!
//! The first line identifies the format, the second holds the event count and every
//! following line is one `offset,status,data1,data2` event.

use std::{
    error::Error,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    thread,
};

use crossbeam_channel::Receiver;
use thiserror::Error;
use tracing::{error, info, span, warn, Level};

use crate::recorder::{EventLog, PersistRequest, RecordedEvent, MAX_EVENTS};

/// The first line of every recording file.
pub const HEADER: &str = "KEYMIDI-REC 1";

/// The extension recordings are stored with.
pub const EXTENSION: &str = "rec";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unknown recording header: {0:?}")]
    UnknownHeader(String),

    #[error("invalid recording name: {0:?}")]
    InvalidName(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Writes the log in the recording format.
pub fn write_log<W: Write>(writer: &mut W, log: &EventLog) -> io::Result<()> {
    writeln!(writer, "{}", HEADER)?;
    writeln!(writer, "{}", log.len())?;
    for event in log {
        writeln!(
            writer,
            "{},{},{},{}",
            event.offset_millis, event.status, event.data1, event.data2
        )?;
    }
    writer.flush()
}

/// Reads a log in the recording format. Malformed event lines are skipped, and
/// anything past the declared count or [MAX_EVENTS] is ignored.
pub fn read_log<R: BufRead>(reader: R) -> Result<EventLog, FormatError> {
    let mut lines = reader.lines();

    let header = lines.next().transpose()?.unwrap_or_default();
    if header.trim() != HEADER {
        return Err(FormatError::UnknownHeader(header));
    }

    let count_line = lines.next().transpose()?.unwrap_or_default();
    let count = match count_line.trim().parse::<usize>() {
        Ok(count) => count.min(MAX_EVENTS),
        Err(_) => {
            warn!(
                line = count_line,
                "Invalid event count, reading as many events as fit."
            );
            MAX_EVENTS
        }
    };

    let mut log = EventLog::new();
    let mut last_offset = 0;
    for (number, line) in lines.enumerate() {
        if log.len() >= count {
            break;
        }

        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(mut event) = parse_event(line) else {
            warn!(line_number = number + 3, line, "Skipping malformed event.");
            continue;
        };

        // Offsets never go backwards during playback.
        event.offset_millis = event.offset_millis.max(last_offset);
        last_offset = event.offset_millis;
        log.push(event);
    }

    Ok(log)
}

fn parse_event(line: &str) -> Option<RecordedEvent> {
    let mut fields = line.split(',').map(str::trim);
    let offset_millis = fields.next()?.parse::<u32>().ok()?;
    let status = fields.next()?.parse::<u8>().ok()?;
    let data1 = fields.next()?.parse::<u8>().ok()?;
    let data2 = fields.next()?.parse::<u8>().ok()?;
    // Channel messages only. System bytes have different lengths on the wire.
    if fields.next().is_some() || !(0x80..=0xEF).contains(&status) {
        return None;
    }

    Some(RecordedEvent {
        offset_millis,
        status,
        data1: data1 & 0x7F,
        data2: data2 & 0x7F,
    })
}

/// Loads a recording from the given file.
pub fn load_file(path: &Path) -> Result<EventLog, FormatError> {
    let log = read_log(BufReader::new(File::open(path)?))?;
    info!(
        path = path.display().to_string(),
        events = log.len(),
        "Loaded recording."
    );
    Ok(log)
}

/// A directory of recordings.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: &Path) -> Store {
        Store {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file a recording with the given name lives in.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, EXTENSION))
    }

    /// Writes the recording to the store, creating the directory if needed.
    pub fn save(&self, request: &PersistRequest) -> Result<PathBuf, Box<dyn Error>> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&request.name);
        let mut writer = BufWriter::new(File::create(&path)?);
        write_log(&mut writer, &request.log)?;
        info!(
            path = path.display().to_string(),
            events = request.log.len(),
            "Saved recording."
        );
        Ok(path)
    }

    /// Loads the recording with the given name. Names are plain file stems; anything
    /// that would reach outside the store is rejected.
    pub fn load(&self, name: &str) -> Result<EventLog, FormatError> {
        if !is_valid_name(name) {
            return Err(FormatError::InvalidName(name.to_string()));
        }
        load_file(&self.path_for(name))
    }

    /// Lists the names of every stored recording, sorted.
    pub fn list(&self) -> Result<Vec<String>, Box<dyn Error>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Saves every persist request received on the channel until it's closed.
pub fn spawn_writer(store: Store, persist_rx: Receiver<PersistRequest>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let span = span!(Level::INFO, "recording writer");
        let _enter = span.enter();

        for request in persist_rx.iter() {
            if let Err(e) = store.save(&request) {
                error!(
                    name = request.name,
                    err = e.as_ref(),
                    "Error saving recording."
                );
            }
        }
        info!("Recording writer finished.");
    })
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, io::Cursor};

    use crate::recorder::{EventLog, PersistRequest, RecordedEvent, MAX_EVENTS};

    use super::{read_log, spawn_writer, write_log, FormatError, Store};

    fn event(offset_millis: u32, status: u8, data1: u8, data2: u8) -> RecordedEvent {
        RecordedEvent {
            offset_millis,
            status,
            data1,
            data2,
        }
    }

    fn sample_log() -> EventLog {
        let mut log = EventLog::new();
        log.push(event(0, 0x90, 60, 100));
        log.push(event(250, 0x80, 60, 0));
        log.push(event(1000, 0xC0, 4, 0));
        log
    }

    #[test]
    fn test_write_format() -> Result<(), Box<dyn Error>> {
        let mut buf = Vec::new();
        write_log(&mut buf, &sample_log())?;
        assert_eq!(
            "KEYMIDI-REC 1\n3\n0,144,60,100\n250,128,60,0\n1000,192,4,0\n",
            String::from_utf8(buf)?
        );
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(&dir.path().join("recordings"));
        assert!(store.list()?.is_empty());

        let path = store.save(&PersistRequest {
            name: "rec_2".to_string(),
            log: sample_log(),
        })?;
        assert_eq!(store.path_for("rec_2"), path);
        store.save(&PersistRequest {
            name: "rec_1".to_string(),
            log: sample_log(),
        })?;
        fs::write(store.dir().join("notes.txt"), "not a recording")?;

        assert_eq!(vec!["rec_1", "rec_2"], store.list()?);
        assert_eq!(sample_log(), store.load("rec_2")?);
        Ok(())
    }

    #[test]
    fn test_malformed_lines_are_skipped() -> Result<(), Box<dyn Error>> {
        let input = "KEYMIDI-REC 1\n6\n0,144,60,100\nnonsense\n10,144\n20,12,1,1\n\n\
                     30,240,1,2\n40,248,0,0\n50,255,0,0\n300,128,60,0\n";
        let log = read_log(Cursor::new(input))?;
        assert_eq!(
            vec![event(0, 0x90, 60, 100), event(300, 0x80, 60, 0)],
            log.iter().copied().collect::<Vec<RecordedEvent>>()
        );
        Ok(())
    }

    #[test]
    fn test_count_limits_events() -> Result<(), Box<dyn Error>> {
        let input = "KEYMIDI-REC 1\n1\n0,144,60,100\n5,128,60,0\n";
        let log = read_log(Cursor::new(input))?;
        assert_eq!(1, log.len());
        Ok(())
    }

    #[test]
    fn test_oversized_recording_is_clamped() -> Result<(), Box<dyn Error>> {
        let mut input = format!("KEYMIDI-REC 1\n{}\n", MAX_EVENTS + 100);
        for i in 0..MAX_EVENTS + 100 {
            input.push_str(&format!("{},144,60,100\n", i));
        }
        let log = read_log(Cursor::new(input))?;
        assert_eq!(MAX_EVENTS, log.len());
        Ok(())
    }

    #[test]
    fn test_bad_count_reads_everything() -> Result<(), Box<dyn Error>> {
        let input = "KEYMIDI-REC 1\nlots\n0,144,60,100\n5,128,60,0\n";
        let log = read_log(Cursor::new(input))?;
        assert_eq!(2, log.len());
        Ok(())
    }

    #[test]
    fn test_offsets_never_go_backwards() -> Result<(), Box<dyn Error>> {
        let input = "KEYMIDI-REC 1\n3\n100,144,60,100\n50,128,60,0\n200,144,62,100\n";
        let log = read_log(Cursor::new(input))?;
        let offsets: Vec<u32> = log.iter().map(|e| e.offset_millis).collect();
        assert_eq!(vec![100, 100, 200], offsets);
        Ok(())
    }

    #[test]
    fn test_names_stay_inside_the_store() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(&dir.path().join("recordings"));
        fs::create_dir_all(store.dir())?;
        let mut outside = Vec::new();
        write_log(&mut outside, &sample_log())?;
        fs::write(dir.path().join("outside.rec"), outside)?;

        for name in ["../outside", "..", ".", "", "sub/rec_1", "sub\\rec_1"] {
            assert!(
                matches!(store.load(name), Err(FormatError::InvalidName(_))),
                "{:?} should be rejected",
                name
            );
        }
        Ok(())
    }

    #[test]
    fn test_unknown_header() {
        let result = read_log(Cursor::new("MIDI 2\n1\n0,144,60,100\n"));
        assert!(matches!(result, Err(FormatError::UnknownHeader(h)) if h == "MIDI 2"));

        let result = read_log(Cursor::new(""));
        assert!(matches!(result, Err(FormatError::UnknownHeader(_))));
    }

    #[test]
    fn test_writer_saves_requests() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(dir.path());
        let (persist_tx, persist_rx) = crossbeam_channel::unbounded();
        let writer = spawn_writer(store.clone(), persist_rx);

        persist_tx.send(PersistRequest {
            name: "rec_10".to_string(),
            log: sample_log(),
        })?;
        drop(persist_tx);
        writer.join().expect("writer thread panicked");

        assert_eq!(vec!["rec_10"], store.list()?);
        Ok(())
    }
}
