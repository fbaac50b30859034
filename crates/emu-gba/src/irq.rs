//! Interrupt controller (IE, IF, IME).
//!
//! Sources latch their bit in IF; the guest acknowledges by writing 1s to
//! IF. Simultaneous requests all stay pending, so none can be lost; which
//! one the guest services first is the guest handler's choice.

use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};

/// Interrupt sources, as IE/IF bit positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0,
    HBlank = 1,
    VCount = 2,
    Timer0 = 3,
    Timer1 = 4,
    Timer2 = 5,
    Timer3 = 6,
    Serial = 7,
    Dma0 = 8,
    Dma1 = 9,
    Dma2 = 10,
    Dma3 = 11,
    Keypad = 12,
    GamePak = 13,
}

impl Interrupt {
    #[must_use]
    pub const fn mask(self) -> u16 {
        1 << self as u16
    }

    #[must_use]
    pub const fn timer(n: usize) -> Self {
        match n {
            0 => Self::Timer0,
            1 => Self::Timer1,
            2 => Self::Timer2,
            _ => Self::Timer3,
        }
    }

    #[must_use]
    pub const fn dma(n: usize) -> Self {
        match n {
            0 => Self::Dma0,
            1 => Self::Dma1,
            2 => Self::Dma2,
            _ => Self::Dma3,
        }
    }
}

const VALID_BITS: u16 = 0x3FFF;

#[derive(Debug, Clone, Default)]
pub struct InterruptController {
    enable: u16,
    flags: u16,
    master_enable: bool,
}

impl InterruptController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self, source: Interrupt) {
        self.flags |= source.mask();
    }

    /// The CPU's IRQ input: IME set and some enabled source pending.
    #[must_use]
    pub fn line(&self) -> bool {
        self.master_enable && self.pending()
    }

    /// Enabled and pending, regardless of IME (what wakes a halted CPU).
    #[must_use]
    pub fn pending(&self) -> bool {
        self.enable & self.flags != 0
    }

    #[must_use]
    pub fn ie(&self) -> u16 {
        self.enable
    }

    #[must_use]
    pub fn iflags(&self) -> u16 {
        self.flags
    }

    #[must_use]
    pub fn ime(&self) -> bool {
        self.master_enable
    }

    pub fn write_ie(&mut self, value: u16, mask: u16) {
        self.enable = ((self.enable & !mask) | (value & mask)) & VALID_BITS;
    }

    /// Writing 1 to a bit acknowledges it.
    pub fn acknowledge(&mut self, value: u16, mask: u16) {
        self.flags &= !(value & mask);
    }

    pub fn write_ime(&mut self, value: u16, mask: u16) {
        if mask & 1 != 0 {
            self.master_enable = value & 1 != 0;
        }
    }
}

impl Snapshot for InterruptController {
    fn write_to(&self, w: &mut StateWriter) {
        w.u16(self.enable);
        w.u16(self.flags);
        w.bool(self.master_enable);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.enable = r.u16()?;
        self.flags = r.u16()?;
        self.master_enable = r.bool()?;
        Ok(())
    }
}
