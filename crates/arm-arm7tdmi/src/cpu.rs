//! ARM7TDMI core: pipeline, stepping and exception entry.

use emu_core::{AccessKind, AccessWidth, Cpu, Observable, Value};

use crate::bus::ArmBus;
use crate::flags::{self, Mode};
use crate::registers::Registers;
use crate::{arm, thumb};

/// Exception kinds, in the order of their vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Reset,
    Undefined,
    SoftwareInterrupt,
    PrefetchAbort,
    DataAbort,
    Irq,
    Fiq,
}

impl Exception {
    #[must_use]
    pub const fn vector(self) -> u32 {
        match self {
            Self::Reset => 0x00,
            Self::Undefined => 0x04,
            Self::SoftwareInterrupt => 0x08,
            Self::PrefetchAbort => 0x0C,
            Self::DataAbort => 0x10,
            Self::Irq => 0x18,
            Self::Fiq => 0x1C,
        }
    }

    #[must_use]
    pub const fn mode(self) -> Mode {
        match self {
            Self::Reset | Self::SoftwareInterrupt => Mode::Supervisor,
            Self::Undefined => Mode::Undefined,
            Self::PrefetchAbort | Self::DataAbort => Mode::Abort,
            Self::Irq => Mode::Irq,
            Self::Fiq => Mode::Fiq,
        }
    }
}

/// Everything needed to resume the CPU exactly where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSnapshot {
    pub regs: Registers,
    pub pipeline: [u32; 2],
    pub next_fetch_sequential: bool,
}

/// The ARM7TDMI.
///
/// `r15` always holds the address of the next fetch, two instructions ahead
/// of the one executing. `pipeline[0]` is the next instruction to execute,
/// `pipeline[1]` the one after it.
#[derive(Debug, Clone)]
pub struct Arm7tdmi {
    pub regs: Registers,
    pipeline: [u32; 2],
    next_fetch: AccessKind,
    /// Cycles consumed by the current step.
    cycles: u32,
    /// Set when the executing instruction refilled the pipeline.
    flushed: bool,
}

impl Default for Arm7tdmi {
    fn default() -> Self {
        Self::new()
    }
}

impl Arm7tdmi {
    /// A CPU in reset state with an empty pipeline. Call [`Cpu::reset`] or
    /// [`Arm7tdmi::jump`] before stepping.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            pipeline: [0; 2],
            next_fetch: AccessKind::NonSequential,
            cycles: 0,
            flushed: false,
        }
    }

    /// Execute one instruction, or enter the IRQ exception if the line is
    /// asserted and unmasked. Returns the cycles consumed.
    pub fn step<B: ArmBus>(&mut self, bus: &mut B) -> u32 {
        self.cycles = 0;
        self.flushed = false;

        if bus.irq_line() && !self.regs.flag(flags::I) {
            let return_address = if self.regs.is_thumb() {
                self.regs.r[15]
            } else {
                self.regs.r[15].wrapping_sub(4)
            };
            self.enter_exception(bus, Exception::Irq, return_address);
            return self.cycles;
        }

        let instruction = self.pipeline[0];
        self.pipeline[0] = self.pipeline[1];

        if self.regs.is_thumb() {
            self.pipeline[1] = self.fetch(bus, AccessWidth::Half);
            thumb::execute(self, bus, instruction as u16);
            if !self.flushed {
                self.regs.r[15] = self.regs.r[15].wrapping_add(2);
            }
        } else {
            self.pipeline[1] = self.fetch(bus, AccessWidth::Word);
            arm::execute(self, bus, instruction);
            if !self.flushed {
                self.regs.r[15] = self.regs.r[15].wrapping_add(4);
            }
        }

        self.cycles
    }

    /// Set the program counter and refill the pipeline, in the current
    /// instruction set state.
    pub fn jump<B: ArmBus>(&mut self, bus: &mut B, address: u32) {
        self.regs.r[15] = address;
        self.flush(bus);
    }

    /// Address of the next instruction to execute.
    #[must_use]
    pub fn next_instruction_address(&self) -> u32 {
        let size = if self.regs.is_thumb() { 4 } else { 8 };
        self.regs.r[15].wrapping_sub(size)
    }

    #[must_use]
    pub fn pipeline(&self) -> [u32; 2] {
        self.pipeline
    }

    #[must_use]
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            regs: self.regs,
            pipeline: self.pipeline,
            next_fetch_sequential: self.next_fetch == AccessKind::Sequential,
        }
    }

    pub fn restore(&mut self, snapshot: &CpuSnapshot) {
        self.regs = snapshot.regs;
        self.pipeline = snapshot.pipeline;
        self.next_fetch = if snapshot.next_fetch_sequential {
            AccessKind::Sequential
        } else {
            AccessKind::NonSequential
        };
    }

    /// Switch mode, save the CPSR and return address, mask interrupts and
    /// jump to the exception vector in ARM state.
    pub fn enter_exception<B: ArmBus>(&mut self, bus: &mut B, exception: Exception, return_address: u32) {
        let old_cpsr = self.regs.cpsr;
        self.regs.switch_mode(exception.mode());
        self.regs.set_spsr(old_cpsr);
        self.regs.r[14] = return_address;

        let mut cpsr = (self.regs.cpsr & !flags::T) | flags::I;
        if matches!(exception, Exception::Reset | Exception::Fiq) {
            cpsr |= flags::F;
        }
        self.regs.cpsr = cpsr;
        self.regs.r[15] = exception.vector();
        self.flush(bus);
    }

    // --- helpers shared by the ARM and Thumb decoders ---

    fn fetch<B: ArmBus>(&mut self, bus: &mut B, width: AccessWidth) -> u32 {
        let result = bus.fetch(self.regs.r[15], width, self.next_fetch);
        self.next_fetch = AccessKind::Sequential;
        self.cycles += result.cycles;
        result.data
    }

    /// Refill the pipeline from `r15` (aligned for the current state).
    pub(crate) fn flush<B: ArmBus>(&mut self, bus: &mut B) {
        self.next_fetch = AccessKind::NonSequential;
        if self.regs.is_thumb() {
            self.regs.r[15] &= !1;
            self.pipeline[0] = self.fetch(bus, AccessWidth::Half);
            self.regs.r[15] = self.regs.r[15].wrapping_add(2);
            self.pipeline[1] = self.fetch(bus, AccessWidth::Half);
            self.regs.r[15] = self.regs.r[15].wrapping_add(2);
        } else {
            self.regs.r[15] &= !3;
            self.pipeline[0] = self.fetch(bus, AccessWidth::Word);
            self.regs.r[15] = self.regs.r[15].wrapping_add(4);
            self.pipeline[1] = self.fetch(bus, AccessWidth::Word);
            self.regs.r[15] = self.regs.r[15].wrapping_add(4);
        }
        self.flushed = true;
    }

    /// Write r15 and refill the pipeline.
    pub(crate) fn write_pc<B: ArmBus>(&mut self, bus: &mut B, value: u32) {
        self.regs.r[15] = value;
        self.flush(bus);
    }

    /// Write any register; r15 branches.
    pub(crate) fn set_reg<B: ArmBus>(&mut self, bus: &mut B, n: usize, value: u32) {
        if n == 15 {
            self.write_pc(bus, value);
        } else {
            self.regs.r[n] = value;
        }
    }

    pub(crate) fn idle<B: ArmBus>(&mut self, bus: &mut B) {
        self.cycles += bus.idle();
    }

    pub(crate) fn add_cycles(&mut self, cycles: u32) {
        self.cycles += cycles;
    }

    /// Mark the next opcode fetch as non-sequential (after a data access).
    pub(crate) fn end_data_access(&mut self) {
        self.next_fetch = AccessKind::NonSequential;
    }

    pub(crate) fn read<B: ArmBus>(&mut self, bus: &mut B, address: u32, width: AccessWidth, kind: AccessKind) -> u32 {
        let result = bus.read(address, width, kind);
        self.cycles += result.cycles;
        result.data
    }

    pub(crate) fn write<B: ArmBus>(
        &mut self,
        bus: &mut B,
        address: u32,
        width: AccessWidth,
        kind: AccessKind,
        value: u32,
    ) {
        self.cycles += bus.write(address, width, kind, value);
    }

    /// LDR semantics: misaligned addresses rotate the aligned word.
    pub(crate) fn load_word<B: ArmBus>(&mut self, bus: &mut B, address: u32, kind: AccessKind) -> u32 {
        let value = self.read(bus, address & !3, AccessWidth::Word, kind);
        value.rotate_right((address & 3) * 8)
    }

    /// LDRH semantics: an odd address rotates the halfword by 8.
    pub(crate) fn load_half<B: ArmBus>(&mut self, bus: &mut B, address: u32, kind: AccessKind) -> u32 {
        let value = self.read(bus, address & !1, AccessWidth::Half, kind);
        if address & 1 != 0 { value.rotate_right(8) } else { value }
    }

    pub(crate) fn load_signed_byte<B: ArmBus>(&mut self, bus: &mut B, address: u32, kind: AccessKind) -> u32 {
        let value = self.read(bus, address, AccessWidth::Byte, kind);
        value as u8 as i8 as i32 as u32
    }

    /// LDRSH semantics: an odd address loads a sign-extended byte.
    pub(crate) fn load_signed_half<B: ArmBus>(&mut self, bus: &mut B, address: u32, kind: AccessKind) -> u32 {
        if address & 1 != 0 {
            return self.load_signed_byte(bus, address, kind);
        }
        let value = self.read(bus, address, AccessWidth::Half, kind);
        value as u16 as i16 as i32 as u32
    }
}

impl<B: ArmBus> Cpu<B> for Arm7tdmi {
    type Registers = Registers;

    fn step(&mut self, bus: &mut B) -> u32 {
        Arm7tdmi::step(self, bus)
    }

    fn pc(&self) -> u32 {
        self.next_instruction_address()
    }

    fn registers(&self) -> Registers {
        self.regs
    }

    fn reset(&mut self, bus: &mut B) {
        self.regs = Registers::new();
        self.regs.r[15] = Exception::Reset.vector();
        self.flush(bus);
    }
}

const QUERY_PATHS: &[&str] = &[
    "pc", "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp",
    "lr", "r15", "cpsr", "spsr", "mode", "thumb", "flags.n", "flags.z", "flags.c", "flags.v",
    "flags.i", "flags.f",
];

impl Observable for Arm7tdmi {
    fn query(&self, path: &str) -> Option<Value> {
        let regs = &self.regs;
        let value = match path {
            "pc" => self.next_instruction_address().into(),
            "sp" => regs.r[13].into(),
            "lr" => regs.r[14].into(),
            "cpsr" => regs.cpsr.into(),
            "spsr" => regs.spsr().into(),
            "mode" => regs.mode().name().into(),
            "thumb" => regs.is_thumb().into(),
            "flags.n" => regs.flag(flags::N).into(),
            "flags.z" => regs.flag(flags::Z).into(),
            "flags.c" => regs.flag(flags::C).into(),
            "flags.v" => regs.flag(flags::V).into(),
            "flags.i" => regs.flag(flags::I).into(),
            "flags.f" => regs.flag(flags::F).into(),
            _ => {
                let n: usize = path.strip_prefix('r')?.parse().ok()?;
                return regs.r.get(n).map(|&v| v.into());
            }
        };
        Some(value)
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}
