//! Four-channel DMA controller.
//!
//! This module holds the register file and the per-channel transfer
//! cursors. The transfers themselves go through the bus (see
//! `GbaBus::run_dma`), which asks for the highest-priority active channel
//! before every unit.

use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};

/// When a channel starts once enabled (DMAxCNT_H bits 12-13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaTiming {
    Immediate,
    VBlank,
    HBlank,
    /// Sound FIFO for DMA1/2, video capture for DMA3.
    Special,
}

impl DmaTiming {
    const fn from_control(control: u16) -> Self {
        match (control >> 12) & 3 {
            0 => Self::Immediate,
            1 => Self::VBlank,
            2 => Self::HBlank,
            _ => Self::Special,
        }
    }
}

/// Address step after each unit (bits 5-6 for the destination, 7-8 for
/// the source).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressControl {
    Increment,
    Decrement,
    Fixed,
    IncrementReload,
}

impl AddressControl {
    const fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            _ => Self::IncrementReload,
        }
    }

    fn step(self, unit: u32) -> u32 {
        match self {
            Self::Increment | Self::IncrementReload => unit,
            Self::Decrement => unit.wrapping_neg(),
            Self::Fixed => 0,
        }
    }
}

const CONTROL_REPEAT: u16 = 1 << 9;
const CONTROL_WORD: u16 = 1 << 10;
const CONTROL_IRQ: u16 = 1 << 14;
const CONTROL_ENABLE: u16 = 1 << 15;

const SOURCE_MASK: [u32; 4] = [0x07FF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF];
const DEST_MASK: [u32; 4] = [0x07FF_FFFF, 0x07FF_FFFF, 0x07FF_FFFF, 0x0FFF_FFFF];

/// Number of words moved per sound FIFO request.
const FIFO_UNITS: u32 = 4;

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    source: u32,
    dest: u32,
    count: u16,
    control: u16,

    cur_source: u32,
    cur_dest: u32,
    remaining: u32,
    /// Triggered and not finished.
    active: bool,
    /// The next unit is the first of a burst (non-sequential).
    first_unit: bool,
    fifo: bool,
}

/// One unit of transfer, as worked out by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaUnit {
    pub channel: usize,
    pub source: u32,
    pub dest: u32,
    pub word: bool,
    pub first: bool,
}

/// What finishing a unit means for the rest of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitDone {
    /// The channel completed its block and asks for an interrupt.
    pub irq: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Dma {
    channels: [Channel; 4],
}

impl Dma {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn control(&self, n: usize) -> u16 {
        self.channels[n].control
    }

    /// DMA3 block length as written, for EEPROM size detection.
    #[must_use]
    pub fn word_count(&self, n: usize) -> u16 {
        self.channels[n].count
    }

    /// Source and destination registers as written.
    #[must_use]
    pub fn addresses(&self, n: usize) -> (u32, u32) {
        (self.channels[n].source, self.channels[n].dest)
    }

    pub fn write_source(&mut self, n: usize, value: u32, mask: u32) {
        let ch = &mut self.channels[n];
        ch.source = ((ch.source & !mask) | (value & mask)) & SOURCE_MASK[n];
    }

    pub fn write_dest(&mut self, n: usize, value: u32, mask: u32) {
        let ch = &mut self.channels[n];
        ch.dest = ((ch.dest & !mask) | (value & mask)) & DEST_MASK[n];
    }

    pub fn write_count(&mut self, n: usize, value: u16, mask: u16) {
        let ch = &mut self.channels[n];
        ch.count = (ch.count & !mask) | (value & mask);
    }

    /// DMAxCNT_H write. Returns true when this write enabled the channel.
    pub fn write_control(&mut self, n: usize, value: u16, mask: u16) -> bool {
        let ch = &mut self.channels[n];
        let was_enabled = ch.control & CONTROL_ENABLE != 0;
        let valid = if n == 3 { 0xFFE0 } else { 0xF7E0 };
        ch.control = ((ch.control & !mask) | (value & mask)) & valid;
        let enabled = ch.control & CONTROL_ENABLE != 0;

        if !enabled {
            ch.active = false;
            return false;
        }
        if was_enabled {
            return false;
        }

        ch.cur_source = ch.source;
        ch.cur_dest = ch.dest;
        ch.fifo = (n == 1 || n == 2) && DmaTiming::from_control(ch.control) == DmaTiming::Special;
        self.load_count(n);
        if DmaTiming::from_control(self.channels[n].control) == DmaTiming::Immediate {
            self.activate(n);
        }
        true
    }

    fn load_count(&mut self, n: usize) {
        let ch = &mut self.channels[n];
        ch.remaining = if ch.fifo {
            FIFO_UNITS
        } else if ch.count == 0 {
            if n == 3 { 0x1_0000 } else { 0x4000 }
        } else if n == 3 {
            u32::from(ch.count)
        } else {
            u32::from(ch.count & 0x3FFF)
        };
    }

    fn activate(&mut self, n: usize) {
        let ch = &mut self.channels[n];
        ch.active = true;
        ch.first_unit = true;
        // Lower-priority transfers it interrupts restart with a
        // non-sequential access.
        for ch in self.channels[n + 1..].iter_mut().filter(|ch| ch.active) {
            ch.first_unit = true;
        }
    }

    /// Start every enabled channel waiting for `timing`.
    /// Special timing only starts through [`Dma::request_fifo`]; video
    /// capture is never requested.
    pub fn trigger(&mut self, timing: DmaTiming) {
        if timing == DmaTiming::Special {
            return;
        }
        for n in 0..4 {
            let ch = &self.channels[n];
            if ch.control & CONTROL_ENABLE != 0
                && !ch.active
                && DmaTiming::from_control(ch.control) == timing
            {
                self.activate(n);
            }
        }
    }

    /// A direct-sound FIFO wants refilling from the channel pointed at
    /// `fifo_address`.
    pub fn request_fifo(&mut self, fifo_address: u32) {
        for n in 1..=2 {
            let ch = &self.channels[n];
            if ch.control & CONTROL_ENABLE != 0 && ch.fifo && !ch.active && ch.dest == fifo_address {
                self.activate(n);
            }
        }
    }

    #[must_use]
    pub fn any_active(&self) -> bool {
        self.channels.iter().any(|ch| ch.active)
    }

    /// The unit the highest-priority active channel moves next.
    #[must_use]
    pub fn next_unit(&self) -> Option<DmaUnit> {
        let channel = self.channels.iter().position(|ch| ch.active)?;
        let ch = &self.channels[channel];
        let word = ch.fifo || ch.control & CONTROL_WORD != 0;
        let align = if word { !3 } else { !1 };
        Some(DmaUnit {
            channel,
            source: ch.cur_source & align,
            dest: ch.cur_dest & align,
            word,
            first: ch.first_unit,
        })
    }

    /// Step the cursors of channel `n` past the unit just moved.
    pub fn complete_unit(&mut self, n: usize) -> UnitDone {
        let ch = &mut self.channels[n];
        let unit = if ch.fifo || ch.control & CONTROL_WORD != 0 { 4 } else { 2 };
        let src_ctrl = AddressControl::from_bits(ch.control >> 7);
        let dst_ctrl = if ch.fifo {
            AddressControl::Fixed
        } else {
            AddressControl::from_bits(ch.control >> 5)
        };
        // Source "reload" is a prohibited setting and behaves as increment.
        ch.cur_source = ch.cur_source.wrapping_add(src_ctrl.step(unit));
        ch.cur_dest = ch.cur_dest.wrapping_add(dst_ctrl.step(unit));
        ch.first_unit = false;
        ch.remaining -= 1;
        if ch.remaining > 0 {
            return UnitDone::default();
        }

        let irq = ch.control & CONTROL_IRQ != 0;
        ch.active = false;
        let timing = DmaTiming::from_control(ch.control);
        if ch.control & CONTROL_REPEAT != 0 && timing != DmaTiming::Immediate {
            if dst_ctrl == AddressControl::IncrementReload {
                ch.cur_dest = ch.dest;
            }
            self.load_count(n);
        } else {
            ch.control &= !CONTROL_ENABLE;
        }
        UnitDone { irq }
    }
}

impl Snapshot for Dma {
    fn write_to(&self, w: &mut StateWriter) {
        for ch in &self.channels {
            w.u32(ch.source);
            w.u32(ch.dest);
            w.u16(ch.count);
            w.u16(ch.control);
            w.u32(ch.cur_source);
            w.u32(ch.cur_dest);
            w.u32(ch.remaining);
            w.bool(ch.active);
            w.bool(ch.first_unit);
            w.bool(ch.fifo);
        }
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        for ch in &mut self.channels {
            ch.source = r.u32()?;
            ch.dest = r.u32()?;
            ch.count = r.u16()?;
            ch.control = r.u16()?;
            ch.cur_source = r.u32()?;
            ch.cur_dest = r.u32()?;
            ch.remaining = r.u32()?;
            if ch.remaining > 0x1_0000 {
                return Err(SnapshotError::Invalid("DMA count out of range"));
            }
            ch.active = r.bool()?;
            ch.first_unit = r.bool()?;
            ch.fifo = r.bool()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enable(dma: &mut Dma, n: usize, src: u32, dst: u32, count: u16, control: u16) {
        dma.write_source(n, src, u32::MAX);
        dma.write_dest(n, dst, u32::MAX);
        dma.write_count(n, count, 0xFFFF);
        dma.write_control(n, control | CONTROL_ENABLE, 0xFFFF);
    }

    fn drain(dma: &mut Dma) -> Vec<DmaUnit> {
        let mut units = Vec::new();
        while let Some(unit) = dma.next_unit() {
            units.push(unit);
            dma.complete_unit(unit.channel);
        }
        units
    }

    #[test]
    fn immediate_transfer_increments_both_addresses() {
        let mut dma = Dma::new();
        enable(&mut dma, 3, 0x0200_0000, 0x0300_0000, 3, CONTROL_WORD);
        let units = drain(&mut dma);
        assert_eq!(units.len(), 3);
        assert!(units[0].first && !units[1].first);
        assert_eq!(units[2].source, 0x0200_0008);
        assert_eq!(units[2].dest, 0x0300_0008);
        assert_eq!(dma.control(3) & CONTROL_ENABLE, 0, "non-repeating channel disables itself");
    }

    #[test]
    fn vblank_channel_waits_for_trigger_and_repeats() {
        let mut dma = Dma::new();
        // Destination increment/reload, repeat, V-Blank timing.
        enable(&mut dma, 0, 0x0200_0000, 0x0500_0000, 2, CONTROL_REPEAT | (3 << 5) | (1 << 12));
        assert!(dma.next_unit().is_none());
        dma.trigger(DmaTiming::VBlank);
        assert_eq!(drain(&mut dma).len(), 2);
        assert_ne!(dma.control(0) & CONTROL_ENABLE, 0, "repeat keeps the channel armed");

        dma.trigger(DmaTiming::VBlank);
        let again = drain(&mut dma);
        assert_eq!(again[0].dest, 0x0500_0000, "destination reloaded");
        assert_eq!(again[0].source, 0x0200_0004, "source keeps going");
    }

    #[test]
    fn zero_count_means_maximum() {
        let mut dma = Dma::new();
        enable(&mut dma, 1, 0x0200_0000, 0x0300_0000, 0, 0);
        assert_eq!(drain(&mut dma).len(), 0x4000);
    }

    #[test]
    fn higher_priority_channel_interleaves() {
        let mut dma = Dma::new();
        enable(&mut dma, 3, 0x0200_0000, 0x0300_0000, 4, 0);
        let first = dma.next_unit().expect("dma3 active");
        dma.complete_unit(first.channel);
        enable(&mut dma, 1, 0x0200_1000, 0x0300_1000, 1, 0);
        assert_eq!(dma.next_unit().map(|u| u.channel), Some(1));
        dma.complete_unit(1);
        let resumed = dma.next_unit().expect("dma3 resumes");
        assert_eq!(resumed.channel, 3);
        assert_eq!(resumed.source, 0x0200_0002);
        assert!(resumed.first, "resuming after preemption is non-sequential");
        dma.complete_unit(3);
        assert_eq!(dma.next_unit().map(|u| u.first), Some(false));
    }

    #[test]
    fn lower_priority_trigger_leaves_running_burst_sequential() {
        let mut dma = Dma::new();
        enable(&mut dma, 0, 0x0200_0000, 0x0300_0000, 3, 0);
        let first = dma.next_unit().expect("dma0 active");
        dma.complete_unit(first.channel);
        enable(&mut dma, 2, 0x0200_1000, 0x0300_1000, 1, 0);
        let units = drain(&mut dma);
        let firsts: Vec<_> = units.iter().map(|u| (u.channel, u.first)).collect();
        assert_eq!(firsts, [(0, false), (0, false), (2, true)]);
    }

    #[test]
    fn fifo_request_moves_four_words_to_fixed_address() {
        let mut dma = Dma::new();
        enable(&mut dma, 1, 0x0200_0000, 0x0400_00A0, 0, CONTROL_REPEAT | (3 << 12));
        dma.trigger(DmaTiming::Special);
        assert!(dma.next_unit().is_none(), "special timing waits for the FIFO");
        dma.request_fifo(0x0400_00A4);
        assert!(dma.next_unit().is_none(), "other FIFO");
        dma.request_fifo(0x0400_00A0);
        let units = drain(&mut dma);
        assert_eq!(units.len(), 4);
        assert!(units.iter().all(|u| u.word && u.dest == 0x0400_00A0));
        assert_eq!(units[3].source, 0x0200_000C);
    }

    #[test]
    fn irq_reported_on_completion() {
        let mut dma = Dma::new();
        enable(&mut dma, 2, 0x0200_0000, 0x0300_0000, 1, CONTROL_IRQ);
        assert_eq!(dma.complete_unit(2), UnitDone { irq: true });
    }
}
