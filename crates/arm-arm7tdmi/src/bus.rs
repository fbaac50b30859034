//! Bus interface seen by the ARM7TDMI.

use emu_core::Bus;

use crate::registers::Registers;

/// What the bus did with a software interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwiOutcome {
    /// Take the SWI exception through the vector at 0x08.
    Exception,
    /// Serviced by the host; continue with the next instruction.
    Handled { cycles: u32 },
    /// Serviced by the host, which moved r15 (and possibly the T bit);
    /// refill the pipeline from there.
    Branch { cycles: u32 },
    /// Not complete yet: re-execute the same SWI on the next step.
    Retry { cycles: u32 },
}

/// Memory bus plus the CPU's side-band signals.
pub trait ArmBus: Bus {
    /// Level of the IRQ input. Sampled once per instruction boundary.
    fn irq_line(&self) -> bool;

    /// Called when an SWI executes. `comment` is the 8-bit function number
    /// (bits 16-23 of an ARM SWI, bits 0-7 of a Thumb SWI).
    fn software_interrupt(&mut self, _comment: u8, _regs: &mut Registers) -> SwiOutcome {
        SwiOutcome::Exception
    }
}
