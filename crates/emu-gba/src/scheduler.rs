//! Cycle-timestamped event scheduler.
//!
//! Every hardware unit that acts at a future cycle (line timing, timer
//! overflow, audio) books an event here instead of counting down on every
//! cycle. Each event kind has at most one pending instance; booking a kind
//! again replaces it. Due events fire in (timestamp, booking order) order.

use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};

/// Things that happen at a scheduled cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Cycle 960 of a line: the visible part ends and the line is drawn.
    HdrawEnd,
    /// Cycle 1006: the H-Blank flag and interrupt.
    Hblank,
    /// Cycle 1232: VCOUNT advances.
    LineEnd,
    TimerOverflow(u8),
    /// 512 Hz frame sequencer for length, envelope and sweep.
    ApuSequencer,
    /// One audio output sample.
    ApuSample,
}

impl EventKind {
    pub const COUNT: usize = 9;

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::HdrawEnd => 0,
            Self::Hblank => 1,
            Self::LineEnd => 2,
            Self::TimerOverflow(n) => 3 + (n as usize & 3),
            Self::ApuSequencer => 7,
            Self::ApuSample => 8,
        }
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::HdrawEnd),
            1 => Some(Self::Hblank),
            2 => Some(Self::LineEnd),
            3..=6 => Some(Self::TimerOverflow((index - 3) as u8)),
            7 => Some(Self::ApuSequencer),
            8 => Some(Self::ApuSample),
            _ => None,
        }
    }
}

/// Latest cycle a restored clock may read; about two thousand years of
/// emulated time, leaving headroom for every `now + delay` sum.
pub const MAX_CYCLE: u64 = 1 << 60;

/// Furthest ahead of `now` any unit books an event.
pub const MAX_EVENT_DELAY: u64 = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    at: u64,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    now: u64,
    next_seq: u64,
    slots: [Option<Slot>; EventKind::COUNT],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            slots: [None; EventKind::COUNT],
        }
    }

    /// Current cycle.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Book `kind` at absolute cycle `at`, replacing any pending instance.
    pub fn schedule(&mut self, kind: EventKind, at: u64) {
        self.slots[kind.index()] = Some(Slot { at, seq: self.next_seq });
        self.next_seq += 1;
    }

    /// Book `kind` `delay` cycles from now.
    pub fn schedule_in(&mut self, kind: EventKind, delay: u64) {
        self.schedule(kind, self.now + delay);
    }

    pub fn cancel(&mut self, kind: EventKind) {
        self.slots[kind.index()] = None;
    }

    /// Cycle at which `kind` is due, if booked.
    #[must_use]
    pub fn due_at(&self, kind: EventKind) -> Option<u64> {
        self.slots[kind.index()].map(|slot| slot.at)
    }

    /// Earliest pending timestamp.
    #[must_use]
    pub fn next_event_at(&self) -> Option<u64> {
        self.slots.iter().flatten().map(|slot| slot.at).min()
    }

    /// Remove and return the earliest event due at or before `limit`, moving
    /// the clock to its timestamp.
    pub fn pop_due(&mut self, limit: u64) -> Option<(EventKind, u64)> {
        let (index, slot) = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|s| (i, s)))
            .filter(|(_, s)| s.at <= limit)
            .min_by_key(|(_, s)| (s.at, s.seq))?;
        self.slots[index] = None;
        self.now = self.now.max(slot.at);
        EventKind::from_index(index).map(|kind| (kind, slot.at))
    }

    /// Move the clock forward to `target` (never backwards).
    pub fn advance_to(&mut self, target: u64) {
        self.now = self.now.max(target);
    }
}

impl Snapshot for Scheduler {
    fn write_to(&self, w: &mut StateWriter) {
        w.u64(self.now);
        w.u64(self.next_seq);
        for slot in &self.slots {
            match slot {
                Some(slot) => {
                    w.bool(true);
                    w.u64(slot.at);
                    w.u64(slot.seq);
                }
                None => w.bool(false),
            }
        }
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.now = r.u64()?;
        self.next_seq = r.u64()?;
        if self.now > MAX_CYCLE || self.next_seq > MAX_CYCLE {
            return Err(SnapshotError::Invalid("scheduler clock out of range"));
        }
        for slot in &mut self.slots {
            *slot = if r.bool()? {
                let slot = Slot { at: r.u64()?, seq: r.u64()? };
                if slot.at > self.now + MAX_EVENT_DELAY || slot.seq >= self.next_seq {
                    return Err(SnapshotError::Invalid("scheduled event out of range"));
                }
                Some(slot)
            } else {
                None
            };
        }
        Ok(())
    }
}
