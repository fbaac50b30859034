//! CPU core trait.

use crate::Bus;

/// A CPU core.
///
/// CPUs execute instructions and access memory through a bus. The bus is
/// passed in, not owned, so the machine can hand the same bus to DMA and
/// other masters between instructions.
///
/// CPUs expose their internal state for observation and debugging.
pub trait Cpu<B: Bus + ?Sized> {
    /// The type used for register inspection.
    type Registers;

    /// Execute one instruction (or take one exception) and return the
    /// number of cycles it consumed.
    fn step(&mut self, bus: &mut B) -> u32;

    /// Returns the address of the next instruction to execute.
    ///
    /// Returns `u32` to support all CPU address widths: 16-bit (6502, Z80),
    /// 24-bit (68000), and 32-bit (ARM7TDMI). Narrower CPUs zero-extend.
    fn pc(&self) -> u32;

    /// Returns a snapshot of all registers for inspection.
    fn registers(&self) -> Self::Registers;

    /// Reset the CPU to its initial state and refill the pipeline.
    fn reset(&mut self, bus: &mut B);
}
