//! ARM7TDMI CPU interpreter.
//!
//! Executes both instruction sets (32-bit ARM and 16-bit Thumb) with a
//! two-stage prefetch pipeline, banked registers per processor mode and
//! exception entry. Each `step` reports the cycles the instruction took,
//! summed from the bus costs of its accesses plus internal cycles.

pub mod alu;
mod arm;
pub mod bus;
pub mod cpu;
pub mod flags;
pub mod registers;
mod thumb;

pub use bus::{ArmBus, SwiOutcome};
pub use cpu::{Arm7tdmi, CpuSnapshot, Exception};
pub use flags::Mode;
pub use registers::Registers;
