//! Input handling for the GBA.
//!
//! Two layers:
//! 1. `Button`: logical button names mapped to KEYINPUT bit positions.
//! 2. `InputQueue`: timed button events for scripted sequences.

use std::collections::VecDeque;

use crate::error::{GbaError, Result};
use crate::keypad::Keypad;

/// A button on the GBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
    R,
    L,
}

impl Button {
    /// Every button, in KEYINPUT bit order.
    pub const ALL: [Self; 10] = [
        Self::A,
        Self::B,
        Self::Select,
        Self::Start,
        Self::Right,
        Self::Left,
        Self::Up,
        Self::Down,
        Self::R,
        Self::L,
    ];

    /// KEYINPUT bit position.
    #[must_use]
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Map a raw host index (the KEYINPUT bit number) to a button.
    ///
    /// # Errors
    ///
    /// `InvalidButtonOrPlayerIndex` for indices past `L` (9).
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| GbaError::InvalidButtonOrPlayerIndex(format!("button {index}")))
    }
}

/// A timed button event.
#[derive(Debug, Clone)]
pub struct InputEvent {
    /// Frame number at which this event fires.
    pub frame: u64,
    pub button: Button,
    /// True = press, false = release.
    pub pressed: bool,
}

/// Timed input queue for scripted button sequences.
///
/// Events are sorted by frame number and latched at the start of each frame.
#[derive(Debug, Clone, Default)]
pub struct InputQueue {
    events: VecDeque<InputEvent>,
}

impl InputQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw input event.
    pub fn push(&mut self, event: InputEvent) {
        let pos = self
            .events
            .iter()
            .position(|e| e.frame > event.frame)
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
    }

    /// Enqueue a button press and release.
    pub fn enqueue_button(&mut self, button: Button, at_frame: u64, hold_frames: u64) {
        self.push(InputEvent {
            frame: at_frame,
            button,
            pressed: true,
        });
        self.push(InputEvent {
            frame: at_frame + hold_frames,
            button,
            pressed: false,
        });
    }

    /// Latch every event due by `frame` into the keypad's pending state.
    pub fn process(&mut self, frame: u64, keypad: &mut Keypad) {
        while self.events.front().is_some_and(|e| e.frame <= frame) {
            if let Some(event) = self.events.pop_front() {
                keypad.set_pending(event.button, event.pressed);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_index_maps_keyinput_order() {
        assert_eq!(Button::from_index(0).ok(), Some(Button::A));
        assert_eq!(Button::from_index(4).ok(), Some(Button::Right));
        assert_eq!(Button::from_index(9).ok(), Some(Button::L));
        assert!(matches!(
            Button::from_index(10),
            Err(GbaError::InvalidButtonOrPlayerIndex(_))
        ));
    }

    #[test]
    fn bits_match_keyinput_layout() {
        for (i, button) in Button::ALL.iter().enumerate() {
            assert_eq!(usize::from(button.bit()), i, "{button:?}");
        }
    }

    #[test]
    fn enqueue_button_creates_press_and_release() {
        let mut queue = InputQueue::new();
        queue.enqueue_button(Button::Start, 10, 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn process_latches_due_events_only() {
        let mut queue = InputQueue::new();
        let mut keypad = Keypad::new();
        queue.enqueue_button(Button::A, 5, 3);

        queue.process(4, &mut keypad);
        keypad.latch();
        assert_eq!(keypad.keyinput() & 1, 1, "A released (active-low)");

        queue.process(5, &mut keypad);
        keypad.latch();
        assert_eq!(keypad.keyinput() & 1, 0, "A pressed");

        queue.process(8, &mut keypad);
        keypad.latch();
        assert_eq!(keypad.keyinput() & 1, 1, "A released again");
        assert!(queue.is_empty());
    }
}
