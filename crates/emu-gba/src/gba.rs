//! Top-level GBA system.
//!
//! The master clock is the 16.78 MHz CPU clock. One frame is
//! 228 lines x 1232 cycles = 280,896 cycles. Each unit of work between
//! instruction boundaries (a CPU step, a DMA burst, a halted stretch)
//! reports its cycles, and the bus brings the scheduler up to exactly that
//! point before the next one starts.

#![allow(clippy::cast_possible_truncation)]

use arm_arm7tdmi::{Arm7tdmi, CpuSnapshot, Mode, Registers};
use emu_core::{Cpu, MasterClock, Observable, Ticks, Value};

use crate::bios;
use crate::bus::GbaBus;
use crate::cartridge::{Backup, Cartridge, CartridgeInfo};
use crate::config::GbaConfig;
use crate::error::{GbaError, Result};
use crate::input::{Button, InputQueue};
use crate::irq::Interrupt;
use crate::memory::BIOS_SIZE;
use crate::ppu::{self, CYCLES_PER_FRAME};
use crate::savestate::{self, Snapshot, SnapshotError, StateReader, StateWriter};
use crate::scheduler::MAX_CYCLE;

/// Where the cycles of a stretch of emulation went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleLedger {
    /// Sum of the cycle counts CPU steps reported.
    pub cpu: u64,
    /// Cycles spent in DMA transfers between instructions.
    pub dma: u64,
    /// Cycles skipped while halted.
    pub halted: u64,
}

impl CycleLedger {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.cpu + self.dma + self.halted
    }
}

/// GBA system.
#[derive(Debug, Clone)]
pub struct Gba {
    cpu: Arm7tdmi,
    bus: GbaBus,
    /// Completed frame counter.
    frame_count: u64,
    /// Cycle at which the current frame ends.
    next_frame_at: u64,
    /// Timed input event queue.
    input_queue: InputQueue,
}

impl Gba {
    /// Create a GBA at power-on with `cartridge` inserted.
    ///
    /// # Errors
    ///
    /// `InvalidBios` if the configured BIOS image is not 16 KiB.
    pub fn new(config: &GbaConfig, cartridge: Cartridge) -> Result<Self> {
        let (image, hle) = match &config.bios {
            Some(image) if image.len() != BIOS_SIZE => return Err(GbaError::InvalidBios(image.len())),
            Some(image) => (image.clone(), false),
            None => (bios::hle_image(), true),
        };
        let mut bus = GbaBus::new(&image, hle, cartridge, config.sample_rate);
        let mut cpu = Arm7tdmi::new();

        if config.boots_cartridge_directly() {
            bus.skip_boot();
            cpu.regs = bios::boot_registers(bios::CARTRIDGE_ENTRY);
            cpu.jump(&mut bus, bios::CARTRIDGE_ENTRY);
        } else {
            Cpu::reset(&mut cpu, &mut bus);
        }
        // Pipeline fill.
        bus.finish_step(0);

        Ok(Self {
            cpu,
            bus,
            frame_count: 0,
            next_frame_at: CYCLES_PER_FRAME,
            input_queue: InputQueue::new(),
        })
    }

    /// Run one complete frame.
    ///
    /// Latches the pending buttons into KEYINPUT first (the frame's input
    /// sampling point), then runs until the frame's last cycle has passed.
    /// Returns where the frame's cycles went.
    pub fn run_frame(&mut self) -> CycleLedger {
        self.input_queue.process(self.frame_count, &mut self.bus.keypad);
        if self.bus.keypad.latch() {
            self.bus.irq.raise(Interrupt::Keypad);
        }

        let mut ledger = CycleLedger::default();
        while self.bus.now() < self.next_frame_at {
            self.step_into(&mut ledger);
        }
        self.next_frame_at += CYCLES_PER_FRAME;
        self.frame_count += 1;
        ledger
    }

    /// Run one unit of work: a CPU instruction, a DMA burst or a halted
    /// stretch up to the end of the frame.
    pub fn step(&mut self) -> CycleLedger {
        let mut ledger = CycleLedger::default();
        self.step_into(&mut ledger);
        ledger
    }

    fn step_into(&mut self, ledger: &mut CycleLedger) {
        if self.bus.dma.any_active() {
            ledger.dma += self.bus.run_dma();
        } else if self.bus.halted {
            ledger.halted += self.bus.run_halted(self.next_frame_at);
        } else {
            let cycles = self.cpu.step(&mut self.bus);
            self.bus.finish_step(cycles);
            ledger.cpu += u64::from(cycles);
        }
    }

    /// The last completed frame (ARGB8888, 240x160).
    #[must_use]
    pub fn framebuffer(&self) -> &[u32] {
        self.bus.ppu.framebuffer()
    }

    #[must_use]
    pub fn framebuffer_width(&self) -> u32 {
        ppu::SCREEN_WIDTH as u32
    }

    #[must_use]
    pub fn framebuffer_height(&self) -> u32 {
        ppu::SCREEN_HEIGHT as u32
    }

    #[must_use]
    pub fn cpu(&self) -> &Arm7tdmi {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Arm7tdmi {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &GbaBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut GbaBus {
        &mut self.bus
    }

    /// Frames per second of emulated time (about 59.73).
    #[must_use]
    pub fn nominal_frame_rate(&self) -> f64 {
        MasterClock::GBA.frames_per_second(Ticks::new(CYCLES_PER_FRAME))
    }

    /// Master clock cycle count.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.bus.now()
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[must_use]
    pub fn cartridge_info(&self) -> &CartridgeInfo {
        self.bus.cartridge.info()
    }

    #[must_use]
    pub fn backup(&self) -> &Backup {
        &self.bus.cartridge.backup
    }

    pub fn backup_mut(&mut self) -> &mut Backup {
        &mut self.bus.cartridge.backup
    }

    pub fn input_queue(&mut self) -> &mut InputQueue {
        &mut self.input_queue
    }

    /// Change a button's pending state; the guest sees it from the next
    /// frame on.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.bus.keypad.set_pending(button, pressed);
    }

    /// Drain the interleaved stereo samples produced so far.
    pub fn take_audio_samples(&mut self) -> Vec<i16> {
        self.bus.apu.take_samples()
    }

    /// Serialize the whole machine.
    #[must_use]
    pub fn capture(&self) -> Vec<u8> {
        let mut w = StateWriter::new();
        let info = self.cartridge_info();
        w.u32(info.crc32);
        w.vec(info.game_code.as_bytes());
        write_cpu(&self.cpu.snapshot(), &mut w);
        w.u64(self.frame_count);
        w.u64(self.next_frame_at);
        self.bus.write_to(&mut w);
        savestate::encode(&w.into_inner())
    }

    /// Restore a state produced by [`Gba::capture`]. The machine is left
    /// untouched unless the whole state parses.
    ///
    /// # Errors
    ///
    /// `SaveStateVersionMismatch`, `SaveStateTruncated` or
    /// `SaveStateCorrupt` for a bad stream; `SaveStateCartridgeMismatch` for
    /// a state captured with another ROM.
    pub fn restore(&mut self, data: &[u8]) -> Result<()> {
        let payload = savestate::decode(data)?;
        let mut r = StateReader::new(payload);
        let crc = r.u32()?;
        let code = String::from_utf8_lossy(&r.vec()?).into_owned();
        let info = self.cartridge_info();
        if crc != info.crc32 {
            return Err(GbaError::SaveStateCartridgeMismatch(format!(
                "state is for {code} ({crc:08x}), inserted is {} ({:08x})",
                info.game_code, info.crc32
            )));
        }

        let mut next = self.clone();
        let snapshot = read_cpu(&mut r)?;
        next.cpu.restore(&snapshot);
        next.frame_count = r.u64()?;
        next.next_frame_at = r.u64()?;
        next.bus.read_from(&mut r)?;
        if next.frame_count > MAX_CYCLE || next.next_frame_at > next.bus.now() + CYCLES_PER_FRAME {
            return Err(SnapshotError::Invalid("frame timing out of range").into());
        }
        *self = next;
        log::info!("restored state at frame {}", self.frame_count);
        Ok(())
    }
}

fn write_cpu(snapshot: &CpuSnapshot, w: &mut StateWriter) {
    let regs = &snapshot.regs;
    for &r in &regs.r {
        w.u32(r);
    }
    w.u32(regs.cpsr);
    for bank in &regs.banked_sp_lr {
        w.u32(bank[0]);
        w.u32(bank[1]);
    }
    for &r in regs.usr_r8_r12.iter().chain(&regs.fiq_r8_r12).chain(&regs.spsr) {
        w.u32(r);
    }
    w.u32(snapshot.pipeline[0]);
    w.u32(snapshot.pipeline[1]);
    w.bool(snapshot.next_fetch_sequential);
}

fn read_cpu(r: &mut StateReader<'_>) -> std::result::Result<CpuSnapshot, SnapshotError> {
    let mut regs = Registers::new();
    for reg in &mut regs.r {
        *reg = r.u32()?;
    }
    regs.cpsr = r.u32()?;
    if Mode::from_bits(regs.cpsr).is_none() {
        return Err(SnapshotError::Invalid("cpu mode"));
    }
    for bank in &mut regs.banked_sp_lr {
        bank[0] = r.u32()?;
        bank[1] = r.u32()?;
    }
    for reg in regs
        .usr_r8_r12
        .iter_mut()
        .chain(regs.fiq_r8_r12.iter_mut())
        .chain(regs.spsr.iter_mut())
    {
        *reg = r.u32()?;
    }
    let pipeline = [r.u32()?, r.u32()?];
    let next_fetch_sequential = r.bool()?;
    Ok(CpuSnapshot { regs, pipeline, next_fetch_sequential })
}

const QUERY_PATHS: &[&str] = &[
    "cpu.<reg>",
    "ppu.vcount",
    "ppu.dispcnt",
    "ppu.dispstat",
    "irq.ie",
    "irq.if",
    "irq.ime",
    "timer<n>.counter",
    "timer<n>.control",
    "dma<n>.control",
    "scheduler.now",
    "halted",
    "frame_count",
];

impl Observable for Gba {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("cpu.") {
            return self.cpu.query(rest);
        }
        if let Some(rest) = path.strip_prefix("timer") {
            let (n, field) = rest.split_once('.')?;
            let n: usize = n.parse().ok().filter(|&n| n < 4)?;
            return match field {
                "counter" => Some(self.bus.timers.counter(n, self.bus.scheduler.now()).into()),
                "control" => Some(self.bus.timers.control(n).into()),
                _ => None,
            };
        }
        if let Some(rest) = path.strip_prefix("dma") {
            let (n, field) = rest.split_once('.')?;
            let n: usize = n.parse().ok().filter(|&n| n < 4)?;
            return (field == "control").then(|| self.bus.dma.control(n).into());
        }
        let value = match path {
            "ppu.vcount" => self.bus.ppu.vcount().into(),
            "ppu.dispcnt" => self.bus.ppu.regs.dispcnt.into(),
            "ppu.dispstat" => self.bus.ppu.dispstat().into(),
            "irq.ie" => self.bus.irq.ie().into(),
            "irq.if" => self.bus.irq.iflags().into(),
            "irq.ime" => self.bus.irq.ime().into(),
            "scheduler.now" => self.bus.now().into(),
            "halted" => self.bus.halted.into(),
            "frame_count" => self.frame_count.into(),
            _ => return None,
        };
        Some(value)
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}
