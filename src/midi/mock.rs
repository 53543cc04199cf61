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
use std::{
    error::Error,
    fmt,
    sync::{Arc, Mutex},
};

use tracing::debug;

use super::Message;

/// A mock device. Doesn't actually send anything, but remembers everything it was given.
#[derive(Clone)]
pub struct Device {
    name: String,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Gets every raw message sent so far, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().expect("unable to get sent lock").clone()
    }

    /// Gets every message sent so far, decoded. Undecodable messages are skipped.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent()
            .iter()
            .filter_map(|bytes| Message::parse(bytes))
            .collect()
    }

    /// Forgets everything sent so far.
    pub fn reset(&self) {
        self.sent.lock().expect("unable to get sent lock").clear();
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send(&self, bytes: &[u8]) -> Result<(), Box<dyn Error>> {
        debug!(device = self.name, bytes = ?bytes, "Mock send.");
        self.sent
            .lock()
            .expect("unable to get sent lock")
            .push(bytes.to_vec());
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
