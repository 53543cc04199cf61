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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Overrides the polling thread priority (0-99).
pub const PRIORITY_ENV: &str = "KEYMIDI_THREAD_PRIORITY";

/// Default priority for the polling thread when KEYMIDI_THREAD_PRIORITY is unset.
const DEFAULT_POLLING_THREAD_PRIORITY: u8 = 70;

/// Parses a priority value, accepting 0-99.
fn parse_priority(value: &str) -> Option<u8> {
    value.trim().parse::<u8>().ok().filter(|n| *n < 100)
}

/// Reads KEYMIDI_THREAD_PRIORITY, falling back to the default.
pub fn polling_thread_priority() -> u8 {
    std::env::var(PRIORITY_ENV)
        .ok()
        .and_then(|v| parse_priority(&v))
        .unwrap_or(DEFAULT_POLLING_THREAD_PRIORITY)
}

/// Raises the priority of the calling thread. Failures are logged and otherwise ignored.
pub fn configure_polling_thread_priority() {
    let priority = polling_thread_priority();
    let Ok(value) = ThreadPriorityValue::try_from(priority) else {
        return;
    };

    match set_current_thread_priority(ThreadPriority::Crossplatform(value)) {
        Ok(()) => info!(priority, "Set polling thread priority."),
        Err(e) => warn!(priority, err = ?e, "Unable to set polling thread priority."),
    }
}

#[cfg(test)]
mod test {
    use super::parse_priority;

    #[test]
    fn test_parse_priority() {
        assert_eq!(Some(0), parse_priority("0"));
        assert_eq!(Some(99), parse_priority(" 99 "));
        assert!(parse_priority("100").is_none());
        assert!(parse_priority("high").is_none());
    }
}
