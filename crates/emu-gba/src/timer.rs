//! The four 16-bit timers.
//!
//! A running timer does not tick per cycle. Its counter is derived from the
//! cycle it was (re)started at, and its overflow is booked in the scheduler
//! for the exact cycle the counter wraps. Count-up timers advance only when
//! the timer below them overflows.

use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};
use crate::scheduler::{EventKind, Scheduler};

/// log2 of the prescaler for TMxCNT_H bits 0-1: 1, 64, 256, 1024 cycles.
const PRESCALE_SHIFT: [u32; 4] = [0, 6, 8, 10];

const CONTROL_COUNT_UP: u16 = 1 << 2;
const CONTROL_IRQ: u16 = 1 << 6;
const CONTROL_ENABLE: u16 = 1 << 7;
const CONTROL_MASK: u16 = 0x00C7;

#[derive(Debug, Clone, Copy, Default)]
struct Timer {
    reload: u16,
    control: u16,
    /// Counter value at `started_at`.
    counter: u16,
    started_at: u64,
}

impl Timer {
    fn enabled(&self) -> bool {
        self.control & CONTROL_ENABLE != 0
    }

    fn shift(&self) -> u32 {
        PRESCALE_SHIFT[(self.control & 3) as usize]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Timers {
    timers: [Timer; 4],
}

impl Timers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count-up mode applies to timers 1-3 only.
    fn counts_up(&self, n: usize) -> bool {
        n > 0 && self.timers[n].control & CONTROL_COUNT_UP != 0
    }

    fn free_running(&self, n: usize) -> bool {
        self.timers[n].enabled() && !self.counts_up(n)
    }

    /// Current counter value (TMxCNT_L read).
    #[must_use]
    pub fn counter(&self, n: usize, now: u64) -> u16 {
        let t = &self.timers[n];
        if self.free_running(n) {
            let ticks = (now.saturating_sub(t.started_at)) >> t.shift();
            (u64::from(t.counter) + ticks) as u16
        } else {
            t.counter
        }
    }

    #[must_use]
    pub fn control(&self, n: usize) -> u16 {
        self.timers[n].control
    }

    #[must_use]
    pub fn irq_enabled(&self, n: usize) -> bool {
        self.timers[n].control & CONTROL_IRQ != 0
    }

    /// TMxCNT_L write: sets the reload value used at the next start or overflow.
    pub fn write_reload(&mut self, n: usize, value: u16, mask: u16) {
        let t = &mut self.timers[n];
        t.reload = (t.reload & !mask) | (value & mask);
    }

    /// TMxCNT_H write.
    pub fn write_control(&mut self, n: usize, value: u16, mask: u16, scheduler: &mut Scheduler) {
        let now = scheduler.now();
        // Freeze the count at the old settings before changing them.
        let current = self.counter(n, now);
        let was_enabled = self.timers[n].enabled();

        let t = &mut self.timers[n];
        t.counter = current;
        t.started_at = now;
        t.control = ((t.control & !mask) | (value & mask)) & CONTROL_MASK;
        if !was_enabled && t.enabled() {
            t.counter = t.reload;
        }

        self.book_overflow(n, scheduler);
    }

    fn book_overflow(&self, n: usize, scheduler: &mut Scheduler) {
        let kind = EventKind::TimerOverflow(n as u8);
        if self.free_running(n) {
            let t = &self.timers[n];
            let ticks = 0x1_0000 - u64::from(t.counter);
            scheduler.schedule(kind, t.started_at + (ticks << t.shift()));
        } else {
            scheduler.cancel(kind);
        }
    }

    /// Timer `n` overflowed at cycle `at`. Reloads it, books its next
    /// overflow and clocks any count-up timers above it. Returns a bitmask
    /// of every timer that overflowed.
    pub fn overflow(&mut self, n: usize, at: u64, scheduler: &mut Scheduler) -> u8 {
        let mut overflowed = 0u8;
        let mut i = n;
        loop {
            overflowed |= 1 << i;
            let t = &mut self.timers[i];
            t.counter = t.reload;
            t.started_at = at;
            self.book_overflow(i, scheduler);

            let next = i + 1;
            if next >= 4 || !self.timers[next].enabled() || !self.counts_up(next) {
                break;
            }
            let up = &mut self.timers[next];
            up.counter = up.counter.wrapping_add(1);
            if up.counter != 0 {
                break;
            }
            i = next;
        }
        overflowed
    }
}

impl Timers {
    /// A restored timer must have started no later than the restored clock.
    pub fn check_restored(&self, now: u64) -> Result<(), SnapshotError> {
        if self.timers.iter().any(|t| t.started_at > now) {
            return Err(SnapshotError::Invalid("timer start time is in the future"));
        }
        Ok(())
    }
}

impl Snapshot for Timers {
    fn write_to(&self, w: &mut StateWriter) {
        for t in &self.timers {
            w.u16(t.reload);
            w.u16(t.control);
            w.u16(t.counter);
            w.u64(t.started_at);
        }
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        for t in &mut self.timers {
            t.reload = r.u16()?;
            t.control = r.u16()?;
            t.counter = r.u16()?;
            t.started_at = r.u64()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_loads_reload_and_books_exact_overflow() {
        let mut sched = Scheduler::new();
        sched.advance_to(100);
        let mut timers = Timers::new();
        timers.write_reload(0, 0xFFF0, 0xFFFF);
        timers.write_control(0, CONTROL_ENABLE | CONTROL_IRQ, 0xFFFF, &mut sched);
        assert_eq!(timers.counter(0, 100), 0xFFF0);
        assert_eq!(timers.counter(0, 105), 0xFFF5);
        assert_eq!(sched.due_at(EventKind::TimerOverflow(0)), Some(116));
    }

    #[test]
    fn prescaler_scales_overflow_time() {
        let mut sched = Scheduler::new();
        let mut timers = Timers::new();
        timers.write_reload(1, 0xFFFE, 0xFFFF);
        timers.write_control(1, CONTROL_ENABLE | 1, 0xFFFF, &mut sched);
        assert_eq!(sched.due_at(EventKind::TimerOverflow(1)), Some(2 * 64));
        assert_eq!(timers.counter(1, 63), 0xFFFE);
        assert_eq!(timers.counter(1, 64), 0xFFFF);
    }

    #[test]
    fn overflow_reloads_and_rebooks() {
        let mut sched = Scheduler::new();
        let mut timers = Timers::new();
        timers.write_reload(0, 0xFF00, 0xFFFF);
        timers.write_control(0, CONTROL_ENABLE, 0xFFFF, &mut sched);
        let (kind, at) = sched.pop_due(u64::MAX).expect("booked");
        assert_eq!((kind, at), (EventKind::TimerOverflow(0), 256));
        assert_eq!(timers.overflow(0, at, &mut sched), 0b0001);
        assert_eq!(timers.counter(0, 256), 0xFF00);
        assert_eq!(sched.due_at(EventKind::TimerOverflow(0)), Some(512));
    }

    #[test]
    fn reload_write_waits_for_next_overflow() {
        let mut sched = Scheduler::new();
        let mut timers = Timers::new();
        timers.write_reload(0, 0xFF00, 0xFFFF);
        timers.write_control(0, CONTROL_ENABLE, 0xFFFF, &mut sched);
        timers.write_reload(0, 0x0000, 0xFFFF);
        assert_eq!(timers.counter(0, 10), 0xFF0A, "running count unaffected");
        timers.overflow(0, 256, &mut sched);
        assert_eq!(timers.counter(0, 256), 0x0000);
    }

    #[test]
    fn cascade_counts_overflows_of_previous_timer() {
        let mut sched = Scheduler::new();
        let mut timers = Timers::new();
        timers.write_reload(1, 0xFFFF, 0xFFFF);
        timers.write_control(1, CONTROL_ENABLE | CONTROL_COUNT_UP, 0xFFFF, &mut sched);
        assert_eq!(sched.due_at(EventKind::TimerOverflow(1)), None, "count-up timers never self-schedule");
        timers.write_control(0, CONTROL_ENABLE, 0xFFFF, &mut sched);
        let mask = timers.overflow(0, 0x1_0000, &mut sched);
        assert_eq!(mask, 0b0011, "timer 1 wrapped from 0xFFFF");
        assert_eq!(timers.counter(1, 0x1_0000), 0xFFFF, "reloaded");
    }

    #[test]
    fn disabling_freezes_counter() {
        let mut sched = Scheduler::new();
        let mut timers = Timers::new();
        timers.write_control(2, CONTROL_ENABLE, 0xFFFF, &mut sched);
        sched.advance_to(50);
        timers.write_control(2, 0, 0xFFFF, &mut sched);
        assert_eq!(timers.counter(2, 5000), 50);
        assert_eq!(sched.due_at(EventKind::TimerOverflow(2)), None);
    }

    #[test]
    fn restored_start_time_must_not_pass_the_clock() {
        let mut sched = Scheduler::new();
        sched.advance_to(500);
        let mut timers = Timers::new();
        timers.write_control(3, CONTROL_ENABLE | 3, 0xFFFF, &mut sched);
        let mut w = StateWriter::new();
        timers.write_to(&mut w);
        let data = w.into_inner();

        let mut restored = Timers::new();
        restored.read_from(&mut StateReader::new(&data)).expect("parses");
        assert_eq!(restored.check_restored(500), Ok(()));
        assert!(matches!(restored.check_restored(499), Err(SnapshotError::Invalid(_))));

        let mut corrupt = data;
        let last = corrupt.len() - 8;
        corrupt[last..].copy_from_slice(&u64::MAX.to_le_bytes());
        restored.read_from(&mut StateReader::new(&corrupt)).expect("parses");
        assert!(matches!(restored.check_restored(u64::MAX - 1), Err(SnapshotError::Invalid(_))));
    }
}
