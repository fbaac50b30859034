//! Keypad registers: KEYINPUT (0x04000130) and KEYCNT (0x04000132).
//!
//! Host button changes land in a pending set. They reach KEYINPUT only when
//! the machine latches them at the start of a frame, so a guest sees the
//! same keys for a whole frame.

use crate::input::Button;
use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};

const KEY_MASK: u16 = 0x03FF;
const KEYCNT_IRQ: u16 = 1 << 14;
const KEYCNT_AND: u16 = 1 << 15;

#[derive(Debug, Clone, Default)]
pub struct Keypad {
    /// Pressed keys waiting for the next latch (1 = pressed).
    pending: u16,
    /// Pressed keys the guest sees (1 = pressed).
    latched: u16,
    control: u16,
}

impl Keypad {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pending(&mut self, button: Button, pressed: bool) {
        let bit = 1 << button.bit();
        if pressed {
            self.pending |= bit;
        } else {
            self.pending &= !bit;
        }
    }

    /// Apply the pending keys. Returns true when the KEYCNT condition holds
    /// and its interrupt is enabled.
    pub fn latch(&mut self) -> bool {
        self.latched = self.pending;
        self.irq_condition()
    }

    fn irq_condition(&self) -> bool {
        if self.control & KEYCNT_IRQ == 0 {
            return false;
        }
        let selected = self.control & KEY_MASK;
        if self.control & KEYCNT_AND != 0 {
            selected != 0 && self.latched & selected == selected
        } else {
            self.latched & selected != 0
        }
    }

    /// KEYINPUT: active-low.
    #[must_use]
    pub fn keyinput(&self) -> u16 {
        !self.latched & KEY_MASK
    }

    #[must_use]
    pub fn keycnt(&self) -> u16 {
        self.control
    }

    pub fn write_keycnt(&mut self, value: u16, mask: u16) {
        self.control = ((self.control & !mask) | (value & mask)) & (KEY_MASK | KEYCNT_IRQ | KEYCNT_AND);
    }
}

impl Snapshot for Keypad {
    fn write_to(&self, w: &mut StateWriter) {
        w.u16(self.pending);
        w.u16(self.latched);
        w.u16(self.control);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.pending = r.u16()? & KEY_MASK;
        self.latched = r.u16()? & KEY_MASK;
        self.control = r.u16()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_pressed_reads_all_ones() {
        assert_eq!(Keypad::new().keyinput(), 0x03FF);
    }

    #[test]
    fn pending_keys_invisible_until_latched() {
        let mut keypad = Keypad::new();
        keypad.set_pending(Button::Start, true);
        assert_eq!(keypad.keyinput(), 0x03FF);
        keypad.latch();
        assert_eq!(keypad.keyinput(), 0x03FF & !(1 << 3));
    }

    #[test]
    fn keycnt_or_condition() {
        let mut keypad = Keypad::new();
        keypad.write_keycnt(KEYCNT_IRQ | 0b11, 0xFFFF);
        keypad.set_pending(Button::B, true);
        assert!(keypad.latch());
    }

    #[test]
    fn keycnt_and_condition_needs_every_selected_key() {
        let mut keypad = Keypad::new();
        keypad.write_keycnt(KEYCNT_IRQ | KEYCNT_AND | 0b11, 0xFFFF);
        keypad.set_pending(Button::A, true);
        assert!(!keypad.latch());
        keypad.set_pending(Button::B, true);
        assert!(keypad.latch());
    }

    #[test]
    fn disabled_keycnt_never_fires() {
        let mut keypad = Keypad::new();
        keypad.write_keycnt(0x03FF, 0xFFFF);
        keypad.set_pending(Button::L, true);
        assert!(!keypad.latch());
    }
}
