//! Core traits and types for cycle-counted emulation.
//!
//! Everything is measured in cycles of the system's master clock. The CPU
//! reports what each instruction cost, and every other unit is advanced by
//! exactly that amount.

mod bus;
mod clock;
mod cpu;
mod observable;
mod ticks;

pub use bus::{AccessKind, AccessWidth, Bus, BusResult};
pub use clock::MasterClock;
pub use cpu::Cpu;
pub use observable::{Observable, Value};
pub use ticks::Ticks;
