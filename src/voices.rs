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

//! Tracking of sounding notes.
//!
//! Every note-on occupies a slot in one of two fixed-size pools until it is
//! released, either because its pool's duration elapsed or because of a panic.
//! Pools never grow: a note-on that finds no free slot is dropped.

use std::time::{Duration, Instant};

/// Number of slots in the transient pool.
pub const TRANSIENT_VOICES: usize = 8;
/// Number of slots in the sustained pool.
pub const SUSTAINED_VOICES: usize = 16;

/// How long a transient note sounds before it's released.
pub const TRANSIENT_DURATION: Duration = Duration::from_millis(250);
/// How long a sustained (latched) note sounds before it's released.
pub const SUSTAINED_DURATION: Duration = Duration::from_millis(4000);

/// Selects the pool a voice lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceKind {
    Transient,
    Sustained,
}

impl VoiceKind {
    /// Latched notes are sustained, everything else is transient.
    pub fn from_latch(latch: bool) -> VoiceKind {
        if latch {
            VoiceKind::Sustained
        } else {
            VoiceKind::Transient
        }
    }
}

/// One currently sounding note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub channel: u8,
    pub note: u8,
    pub started_at: Instant,
}

/// Identifies the slot a voice was allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceHandle {
    pub kind: VoiceKind,
    pub slot: usize,
}

/// A fixed-capacity slot table of voices that all share one release duration.
pub struct VoicePool<const N: usize> {
    slots: [Option<Voice>; N],
    duration: Duration,
}

impl<const N: usize> VoicePool<N> {
    /// Creates an empty pool whose voices are released after the given duration.
    pub fn new(duration: Duration) -> VoicePool<N> {
        VoicePool {
            slots: [None; N],
            duration,
        }
    }

    /// Takes the first free slot for the note. Returns None if the pool is full.
    pub fn allocate(&mut self, channel: u8, note: u8, now: Instant) -> Option<usize> {
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(Voice {
            channel: channel & 0x0F,
            note: note & 0x7F,
            started_at: now,
        });
        Some(slot)
    }

    /// Frees every voice that has sounded longer than the pool duration, handing each
    /// to `release`.
    pub fn expire<F>(&mut self, now: Instant, mut release: F)
    where
        F: FnMut(Voice),
    {
        let duration = self.duration;
        for slot in self.slots.iter_mut() {
            let expired = slot
                .is_some_and(|voice| now.saturating_duration_since(voice.started_at) > duration);
            if expired {
                if let Some(voice) = slot.take() {
                    release(voice);
                }
            }
        }
    }

    /// Frees every voice regardless of age.
    pub fn clear<F>(&mut self, mut release: F)
    where
        F: FnMut(Voice),
    {
        for slot in self.slots.iter_mut() {
            if let Some(voice) = slot.take() {
                release(voice);
            }
        }
    }

    /// Gets the voice in the given slot, if any.
    pub fn get(&self, slot: usize) -> Option<&Voice> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// The transient and sustained pools. The two never interact: the same pitch may
/// sound in both at once.
pub struct VoiceTracker {
    transient: VoicePool<TRANSIENT_VOICES>,
    sustained: VoicePool<SUSTAINED_VOICES>,
}

impl VoiceTracker {
    pub fn new() -> VoiceTracker {
        VoiceTracker {
            transient: VoicePool::new(TRANSIENT_DURATION),
            sustained: VoicePool::new(SUSTAINED_DURATION),
        }
    }

    /// Allocates a voice in the pool for the given kind.
    pub fn start(
        &mut self,
        kind: VoiceKind,
        channel: u8,
        note: u8,
        now: Instant,
    ) -> Option<VoiceHandle> {
        let slot = match kind {
            VoiceKind::Transient => self.transient.allocate(channel, note, now),
            VoiceKind::Sustained => self.sustained.allocate(channel, note, now),
        }?;
        Some(VoiceHandle { kind, slot })
    }

    /// Releases expired voices from both pools.
    pub fn expire<F>(&mut self, now: Instant, mut release: F)
    where
        F: FnMut(Voice),
    {
        self.transient.expire(now, &mut release);
        self.sustained.expire(now, &mut release);
    }

    /// Releases every voice in both pools, sustained first.
    pub fn clear<F>(&mut self, mut release: F)
    where
        F: FnMut(Voice),
    {
        self.sustained.clear(&mut release);
        self.transient.clear(&mut release);
    }

    pub fn get(&self, handle: VoiceHandle) -> Option<&Voice> {
        match handle.kind {
            VoiceKind::Transient => self.transient.get(handle.slot),
            VoiceKind::Sustained => self.sustained.get(handle.slot),
        }
    }

    pub fn active(&self, kind: VoiceKind) -> usize {
        match kind {
            VoiceKind::Transient => self.transient.active_count(),
            VoiceKind::Sustained => self.sustained.active_count(),
        }
    }
}

impl Default for VoiceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VoiceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceTracker")
            .field("transient", &self.transient.active_count())
            .field("sustained", &self.sustained.active_count())
            .finish()
    }
}
