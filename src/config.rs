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
use std::{error::Error, path::Path, sync::Arc, time::Instant};

use config::{Config, File};
use tracing::info;

use crate::{
    controller::keyboard,
    engine::{Engine, Request},
    midi,
    recordings::{self, Store},
};

mod controller;
mod error;
mod metronome;

pub use self::controller::{Controller, MAX_OCTAVE, MIN_OCTAVE};
pub use self::error::ConfigError;
pub use self::metronome::Metronome;

/// Loads the controller configuration from a file. The format is taken from the
/// file extension.
pub fn load(path: &Path) -> Result<Controller, ConfigError> {
    Ok(Config::builder()
        .add_source(File::from(path))
        .build()?
        .try_deserialize()?)
}

/// Initializes the engine and its collaborators from the given config file and
/// returns the controller hosting it. The controller runs until the keyboard driver
/// quits.
pub fn init_controller(path: &Path) -> Result<crate::controller::Controller, Box<dyn Error>> {
    let config = load(path)?;
    let device = midi::get_device(config.midi_device())?;
    let tick_interval = config.tick_interval()?;
    let store = Store::new(&config.recordings());

    let (persist_tx, persist_rx) = crossbeam_channel::unbounded();
    let writer = recordings::spawn_writer(store.clone(), persist_rx);

    let metronome = config.metronome();
    let mut engine = Engine::new(device.clone(), metronome.to_metronome(), Some(persist_tx));
    if metronome.enabled() {
        engine.handle(Request::SetMetronome(true), Instant::now())?;
    }

    let driver = Arc::new(keyboard::Driver::new(
        keyboard::Settings {
            channel: config.channel()?,
            velocity: config.velocity(),
            octave: config.octave(),
            latch: false,
        },
        store.clone(),
    ));

    info!(
        device = device.name(),
        recordings = store.dir().display().to_string(),
        tick_interval = ?tick_interval,
        "Controller configured."
    );
    Ok(crate::controller::Controller::new(engine, driver, tick_interval).with_writer(writer))
}
