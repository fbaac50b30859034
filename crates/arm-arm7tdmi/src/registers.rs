//! ARM7TDMI register file.
//!
//! - r0-r12: general purpose (r8-r12 banked in FIQ mode)
//! - r13 (SP), r14 (LR): banked per exception mode
//! - r15 (PC): reads as the executing instruction + 8 (ARM) or + 4 (Thumb)
//! - CPSR: flags, control bits and mode
//! - SPSR: one per exception mode, holds the CPSR at exception entry
//!
//! The active registers live in `r`. Banked copies for inactive modes are
//! stored in fixed arrays indexed by [`Mode::bank`] and exchanged by
//! [`Registers::switch_mode`], which is the only place banking happens.

use crate::flags::{self, Mode};

/// Number of register banks (usr/sys, fiq, irq, svc, abt, und).
pub const BANKS: usize = 6;

/// ARM7TDMI register set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Active view of r0-r15.
    pub r: [u32; 16],
    /// Current program status register.
    pub cpsr: u32,
    /// Saved r13/r14 for each bank while that bank is inactive.
    pub banked_sp_lr: [[u32; 2]; BANKS],
    /// r8-r12 of every non-FIQ mode, saved while FIQ is active.
    pub usr_r8_r12: [u32; 5],
    /// FIQ's private r8-r12, saved while another mode is active.
    pub fiq_r8_r12: [u32; 5],
    /// Saved program status registers, indexed by bank (entry 0 unused).
    pub spsr: [u32; BANKS],
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Registers in reset state: Supervisor mode, IRQ and FIQ disabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            r: [0; 16],
            cpsr: flags::I | flags::F | 0x13,
            banked_sp_lr: [[0; 2]; BANKS],
            usr_r8_r12: [0; 5],
            fiq_r8_r12: [0; 5],
            spsr: [0; BANKS],
        }
    }

    /// Current processor mode. Reserved encodings behave as User.
    #[must_use]
    pub fn mode(&self) -> Mode {
        Mode::from_bits(self.cpsr).unwrap_or(Mode::User)
    }

    #[must_use]
    pub fn is_thumb(&self) -> bool {
        self.cpsr & flags::T != 0
    }

    #[must_use]
    pub fn pc(&self) -> u32 {
        self.r[15]
    }

    /// Change mode, exchanging banked registers. Flags and control bits
    /// other than the mode field are left alone.
    pub fn switch_mode(&mut self, new: Mode) {
        let old = self.mode();
        let (old_bank, new_bank) = (old.bank(), new.bank());

        if old_bank != new_bank {
            self.banked_sp_lr[old_bank] = [self.r[13], self.r[14]];
            if old == Mode::Fiq {
                self.fiq_r8_r12.copy_from_slice(&self.r[8..13]);
                self.r[8..13].copy_from_slice(&self.usr_r8_r12);
            }
            if new == Mode::Fiq {
                self.usr_r8_r12.copy_from_slice(&self.r[8..13]);
                self.r[8..13].copy_from_slice(&self.fiq_r8_r12);
            }
            [self.r[13], self.r[14]] = self.banked_sp_lr[new_bank];
        }

        self.cpsr = (self.cpsr & !flags::MODE_MASK) | new.bits();
    }

    /// Write a whole PSR value into the CPSR, banking if the mode changes.
    /// A reserved mode encoding keeps the current mode.
    pub fn set_cpsr(&mut self, value: u32) {
        if let Some(mode) = Mode::from_bits(value) {
            self.switch_mode(mode);
            self.cpsr = value;
        } else {
            self.cpsr = (value & !flags::MODE_MASK) | (self.cpsr & flags::MODE_MASK);
        }
    }

    /// SPSR of the current mode. User and System have none and read the CPSR.
    #[must_use]
    pub fn spsr(&self) -> u32 {
        let mode = self.mode();
        if mode.has_spsr() { self.spsr[mode.bank()] } else { self.cpsr }
    }

    /// Write the SPSR of the current mode. Ignored in User and System.
    pub fn set_spsr(&mut self, value: u32) {
        let mode = self.mode();
        if mode.has_spsr() {
            self.spsr[mode.bank()] = value;
        }
    }

    /// Restore CPSR from SPSR (exception return).
    pub fn restore_cpsr_from_spsr(&mut self) {
        if self.mode().has_spsr() {
            let spsr = self.spsr();
            self.set_cpsr(spsr);
        }
    }

    /// Read a User-bank register regardless of the current mode
    /// (LDM/STM with the S bit).
    #[must_use]
    pub fn user_reg(&self, n: usize) -> u32 {
        let mode = self.mode();
        match n {
            8..=12 if mode == Mode::Fiq => self.usr_r8_r12[n - 8],
            13 | 14 if mode.bank() != 0 => self.banked_sp_lr[0][n - 13],
            _ => self.r[n],
        }
    }

    /// Write a User-bank register regardless of the current mode.
    pub fn set_user_reg(&mut self, n: usize, value: u32) {
        let mode = self.mode();
        match n {
            8..=12 if mode == Mode::Fiq => self.usr_r8_r12[n - 8] = value,
            13 | 14 if mode.bank() != 0 => self.banked_sp_lr[0][n - 13] = value,
            _ => self.r[n] = value,
        }
    }

    /// Stack pointer of a given mode, whether or not it is active.
    #[must_use]
    pub fn sp_of(&self, mode: Mode) -> u32 {
        if mode.bank() == self.mode().bank() {
            self.r[13]
        } else {
            self.banked_sp_lr[mode.bank()][0]
        }
    }

    /// Set the stack pointer of a given mode.
    pub fn set_sp_of(&mut self, mode: Mode, value: u32) {
        if mode.bank() == self.mode().bank() {
            self.r[13] = value;
        } else {
            self.banked_sp_lr[mode.bank()][0] = value;
        }
    }

    #[must_use]
    pub fn flag(&self, mask: u32) -> bool {
        self.cpsr & mask != 0
    }
}
