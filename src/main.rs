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
use std::error::Error;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{crate_version, Parser, Subcommand};
use keymidi::engine::Engine;
use keymidi::metronome::Metronome;
use keymidi::recordings::{self, Store};
use keymidi::util::duration_minutes_seconds;
use keymidi::{config, midi};
use tracing_subscriber::EnvFilter;

/// How often the engine is polled when playing a single recording.
const PLAY_TICK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A keyboard to MIDI controller."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available MIDI output devices.
    MidiDevices {},
    /// Lists the recordings in the given directory.
    Recordings {
        /// The path to the recordings directory.
        path: String,
    },
    /// Plays a recording through a MIDI device.
    Play {
        /// The MIDI device name to play through.
        device_name: String,
        /// The path to the recording.
        path: String,
    },
    /// Start will start the controller, reading commands from the keyboard.
    Start {
        /// The path to the controller config.
        config_path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Recordings { path } => {
            let store = Store::new(&PathBuf::from(&path));
            let names = store.list()?;

            if names.is_empty() {
                println!("No recordings found in {}.", path.as_str());
                return Ok(());
            }

            println!("Recordings (count: {}):", names.len());
            for name in names {
                match store.load(&name) {
                    Ok(log) => println!(
                        "- {} (events: {}, duration: {})",
                        name,
                        log.len(),
                        duration_minutes_seconds(log.duration())
                    ),
                    Err(e) => println!("- {} (unreadable: {})", name, e),
                }
            }
        }
        Commands::Play { device_name, path } => {
            let device = midi::get_device(&device_name)?;
            let log = recordings::load_file(&PathBuf::from(&path))?;
            println!(
                "Playing {} through {} (events: {}, duration: {})",
                path,
                device,
                log.len(),
                duration_minutes_seconds(log.duration())
            );

            let mut engine = Engine::new(device, Metronome::default(), None);
            let now = Instant::now();
            engine.load(log, now);
            engine.start_playback(now)?;

            tokio::task::spawn_blocking(move || {
                while engine.is_playing() {
                    engine.tick(Instant::now());
                    spin_sleep::sleep(PLAY_TICK_INTERVAL);
                }
            })
            .await?;
        }
        Commands::Start { config_path } => {
            let mut controller = config::init_controller(&PathBuf::from(&config_path))?;
            controller.join().await?;
        }
    };

    Ok(())
}
