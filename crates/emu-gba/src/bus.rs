//! GBA bus: address decoding, wait states and peripheral timing.
//!
//! Every access charges its region's wait states to `pending`, the cycles
//! the current instruction has used that the scheduler has not seen yet.
//! Accesses to I/O and video memory first bring the scheduler up to date,
//! so a register read observes the hardware at the exact cycle it happens.

#![allow(clippy::cast_possible_truncation)]

use arm_arm7tdmi::{ArmBus, Registers, SwiOutcome};
use emu_core::{AccessKind, AccessWidth, Bus, BusResult};

use crate::apu::Apu;
use crate::bios;
use crate::cartridge::{Backup, Cartridge};
use crate::dma::{Dma, DmaTiming};
use crate::irq::{Interrupt, InterruptController};
use crate::keypad::Keypad;
use crate::memory::{self, Memory, WaitControl};
use crate::ppu::{self, Ppu};
use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};
use crate::scheduler::{EventKind, MAX_EVENT_DELAY, Scheduler};
use crate::timer::Timers;

/// Serial and link registers 0x04000120-0x0400015F, kept as plain storage.
pub const SERIAL_BASE: u32 = 0x120;
pub const SERIAL_HALVES: usize = 0x20;

/// Opcode the BIOS leaves on the bus after handing over to the cartridge.
const BIOS_LATCH_AFTER_BOOT: u32 = 0xE129_F000;

#[derive(Clone)]
pub struct GbaBus {
    pub mem: Memory,
    pub wait: WaitControl,
    pub scheduler: Scheduler,
    pub irq: InterruptController,
    pub timers: Timers,
    pub dma: Dma,
    pub ppu: Ppu,
    pub apu: Apu,
    pub keypad: Keypad,
    pub cartridge: Cartridge,
    /// POSTFLG (0x04000300).
    pub postflg: u8,
    /// Serial port register file; no link partner is ever attached.
    pub serial: [u16; SERIAL_HALVES],
    /// CPU stopped by HALTCNT until an enabled interrupt is pending.
    pub halted: bool,
    /// Inside an IntrWait serviced by the built-in BIOS.
    pub(crate) intr_wait: bool,
    /// SWIs are serviced in the host rather than by BIOS code.
    hle_bios: bool,
    /// Last prefetched opcode (Thumb opcodes doubled into both halves).
    open_bus: u32,
    /// Last word fetched from BIOS, returned to reads from outside it.
    bios_latch: u32,
    executing_bios: bool,
    /// Cycles charged but not yet applied to the scheduler.
    pending: u64,
    /// Cycles charged through bus accesses during the current CPU step.
    charged: u64,
}

impl std::fmt::Debug for GbaBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GbaBus")
            .field("now", &self.scheduler.now())
            .field("halted", &self.halted)
            .field("open_bus", &format_args!("{:#010X}", self.open_bus))
            .finish_non_exhaustive()
    }
}

impl GbaBus {
    /// A bus at power-on with the display timing and audio events booked.
    /// `bios` is the 16 KiB image to map; `hle_bios` routes SWIs to the host.
    #[must_use]
    pub fn new(bios: &[u8], hle_bios: bool, cartridge: Cartridge, sample_rate: u32) -> Self {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(EventKind::HdrawEnd, ppu::HDRAW_CYCLES);
        scheduler.schedule(EventKind::Hblank, ppu::HBLANK_FLAG_CYCLE);
        scheduler.schedule(EventKind::LineEnd, ppu::CYCLES_PER_LINE);
        let mut apu = Apu::new(sample_rate);
        apu.start(&mut scheduler);

        Self {
            mem: Memory::new(bios),
            wait: WaitControl::new(),
            scheduler,
            irq: InterruptController::new(),
            timers: Timers::new(),
            dma: Dma::new(),
            ppu: Ppu::new(),
            apu,
            keypad: Keypad::new(),
            cartridge,
            postflg: 0,
            serial: [0; SERIAL_HALVES],
            halted: false,
            intr_wait: false,
            hle_bios,
            open_bus: 0,
            bios_latch: 0,
            executing_bios: true,
            pending: 0,
            charged: 0,
        }
    }

    /// State the BIOS leaves behind when it jumps to the cartridge.
    pub fn skip_boot(&mut self) {
        self.postflg = 1;
        self.bios_latch = BIOS_LATCH_AFTER_BOOT;
        self.executing_bios = false;
    }

    /// Current cycle including charges not yet applied.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.scheduler.now() + self.pending
    }

    #[must_use]
    pub fn hle_bios(&self) -> bool {
        self.hle_bios
    }

    fn charge(&mut self, cycles: u32) {
        self.pending += u64::from(cycles);
        self.charged += u64::from(cycles);
    }

    /// Apply pending cycles to the scheduler, firing every event due.
    pub fn sync(&mut self) {
        if self.pending == 0 {
            return;
        }
        let target = self.scheduler.now() + self.pending;
        self.pending = 0;
        self.run_until(target);
    }

    /// Close the books on a CPU step that reported `cycles`. Cycles the CPU
    /// counted itself (host-serviced SWIs) are charged here.
    pub fn finish_step(&mut self, cycles: u32) {
        let uncounted = u64::from(cycles).saturating_sub(self.charged);
        self.pending += uncounted;
        self.charged = 0;
        self.sync();
    }

    fn run_until(&mut self, target: u64) {
        while let Some((kind, at)) = self.scheduler.pop_due(target) {
            self.dispatch(kind, at);
        }
        self.scheduler.advance_to(target);
    }

    fn dispatch(&mut self, kind: EventKind, at: u64) {
        match kind {
            EventKind::HdrawEnd => {
                self.ppu.hdraw_end(&self.mem);
                self.scheduler.schedule(kind, at + ppu::CYCLES_PER_LINE);
            }
            EventKind::Hblank => {
                let signals = self.ppu.hblank();
                if signals.hblank_irq {
                    self.irq.raise(Interrupt::HBlank);
                }
                if signals.hblank_dma {
                    self.dma.trigger(DmaTiming::HBlank);
                }
                self.scheduler.schedule(kind, at + ppu::CYCLES_PER_LINE);
            }
            EventKind::LineEnd => {
                let signals = self.ppu.line_end();
                if signals.vblank_irq {
                    self.irq.raise(Interrupt::VBlank);
                }
                if signals.vcount_irq {
                    self.irq.raise(Interrupt::VCount);
                }
                if signals.vblank_start {
                    self.dma.trigger(DmaTiming::VBlank);
                }
                self.scheduler.schedule(kind, at + ppu::CYCLES_PER_LINE);
            }
            EventKind::TimerOverflow(n) => {
                let overflowed = self.timers.overflow(usize::from(n), at, &mut self.scheduler);
                for timer in (0..4).filter(|t| overflowed & (1 << t) != 0) {
                    if self.timers.irq_enabled(timer) {
                        self.irq.raise(Interrupt::timer(timer));
                    }
                    if timer < 2 {
                        for fifo in self.apu.timer_overflow(timer).into_iter().flatten() {
                            self.dma.request_fifo(fifo);
                        }
                    }
                }
            }
            EventKind::ApuSequencer => self.apu.sequencer(at, &mut self.scheduler),
            EventKind::ApuSample => self.apu.sample(at, &mut self.scheduler),
        }
    }

    /// Run active DMA channels until none is left, highest priority first.
    /// Returns the cycles the transfers took.
    pub fn run_dma(&mut self) -> u64 {
        let mut total = 0u64;
        while let Some(unit) = self.dma.next_unit() {
            let mut cycles = 0u32;
            let kind = if unit.first {
                self.charge(2);
                cycles += 2;
                AccessKind::NonSequential
            } else {
                AccessKind::Sequential
            };
            let width = if unit.word { AccessWidth::Word } else { AccessWidth::Half };
            let read = self.read(unit.source, width, kind);
            cycles += read.cycles;
            cycles += self.write(unit.dest, width, kind, read.data);
            if self.dma.complete_unit(unit.channel).irq {
                self.irq.raise(Interrupt::dma(unit.channel));
            }
            self.charged = 0;
            self.sync();
            total += u64::from(cycles);
        }
        total
    }

    /// Fast-forward a halted CPU, event by event, until an enabled interrupt
    /// is pending or `limit` is reached. Returns the cycles skipped.
    pub fn run_halted(&mut self, limit: u64) -> u64 {
        let start = self.scheduler.now();
        while self.halted {
            if self.irq.pending() {
                self.halted = false;
                break;
            }
            let now = self.scheduler.now();
            if now >= limit || self.dma.any_active() {
                break;
            }
            let next = self
                .scheduler
                .next_event_at()
                .unwrap_or(limit)
                .clamp(now + 1, limit);
            self.run_until(next);
        }
        self.scheduler.now() - start
    }

    fn open_bus_value(&self, address: u32, width: AccessWidth) -> u32 {
        let lane = self.open_bus >> ((address & 3) * 8);
        match width {
            AccessWidth::Byte => lane & 0xFF,
            AccessWidth::Half => lane & 0xFFFF,
            AccessWidth::Word => self.open_bus,
        }
    }

    fn read_bios(&self, address: u32, width: AccessWidth) -> u32 {
        if self.executing_bios {
            return memory::load(&self.mem.bios, address as usize, width);
        }
        let lane = self.bios_latch >> ((address & 3) * 8);
        match width {
            AccessWidth::Byte => lane & 0xFF,
            AccessWidth::Half => lane & 0xFFFF,
            AccessWidth::Word => self.bios_latch,
        }
    }

    fn read_rom(&mut self, address: u32, width: AccessWidth) -> u32 {
        if self.cartridge.is_eeprom_address(address) {
            if let Backup::Eeprom(eeprom) = &mut self.cartridge.backup {
                return u32::from(eeprom.read());
            }
        }
        let offset = address & 0x01FF_FFFF;
        match width {
            AccessWidth::Byte => {
                let half = self.cartridge.read_rom_half(offset & !1);
                u32::from(half >> ((offset & 1) * 8)) & 0xFF
            }
            AccessWidth::Half => u32::from(self.cartridge.read_rom_half(offset)),
            AccessWidth::Word => {
                let lo = self.cartridge.read_rom_half(offset & !3);
                let hi = self.cartridge.read_rom_half((offset & !3) + 2);
                u32::from(lo) | (u32::from(hi) << 16)
            }
        }
    }

    fn read_io(&self, address: u32, width: AccessWidth) -> u32 {
        let offset = address & 0x00FF_FFFF;
        if offset >= 0x400 {
            return self.open_bus_value(address, width);
        }
        // Write-only and unused registers read as open bus.
        let half = |bus: &Self, at: u32| {
            bus.io_read(at)
                .unwrap_or_else(|| bus.open_bus_value(at, AccessWidth::Half) as u16)
        };
        match width {
            AccessWidth::Byte => u32::from(half(self, offset & !1) >> ((offset & 1) * 8)) & 0xFF,
            AccessWidth::Half => u32::from(half(self, offset & !1)),
            AccessWidth::Word => {
                let base = offset & !3;
                u32::from(half(self, base)) | (u32::from(half(self, base + 2)) << 16)
            }
        }
    }

    /// Decode and read without charging cycles.
    fn read_data(&mut self, address: u32, width: AccessWidth) -> u32 {
        let address = address & !(width.bytes() - 1);
        match address >> 24 {
            0x00 if (address as usize) < memory::BIOS_SIZE => self.read_bios(address, width),
            0x02 => memory::load(&self.mem.ewram, address as usize & (memory::EWRAM_SIZE - 1), width),
            0x03 => memory::load(&self.mem.iwram, address as usize & (memory::IWRAM_SIZE - 1), width),
            0x04 => {
                self.sync();
                self.read_io(address, width)
            }
            0x05 => {
                self.sync();
                memory::load(&self.mem.palette, address as usize & (memory::PALETTE_SIZE - 1), width)
            }
            0x06 => {
                self.sync();
                memory::load(&self.mem.vram, memory::vram_offset(address), width)
            }
            0x07 => {
                self.sync();
                memory::load(&self.mem.oam, address as usize & (memory::OAM_SIZE - 1), width)
            }
            0x08..=0x0D => self.read_rom(address, width),
            0x0E | 0x0F => {
                let byte = u32::from(self.cartridge.backup.read_byte(address & 0xFFFF));
                match width {
                    AccessWidth::Byte => byte,
                    AccessWidth::Half => byte * 0x0101,
                    AccessWidth::Word => byte * 0x0101_0101,
                }
            }
            _ => self.open_bus_value(address, width),
        }
    }

    fn write_io(&mut self, address: u32, width: AccessWidth, value: u32) {
        let offset = address & 0x00FF_FFFF;
        if offset >= 0x400 {
            return;
        }
        match width {
            AccessWidth::Byte => {
                let shift = (offset & 1) * 8;
                self.io_write(offset & !1, (value as u16 & 0xFF) << shift, 0xFF << shift);
            }
            AccessWidth::Half => self.io_write(offset & !1, value as u16, 0xFFFF),
            AccessWidth::Word => {
                let base = offset & !3;
                self.io_write(base, value as u16, 0xFFFF);
                self.io_write(base + 2, (value >> 16) as u16, 0xFFFF);
            }
        }
    }

    fn write_vram(&mut self, address: u32, width: AccessWidth, value: u32) {
        let offset = memory::vram_offset(address);
        if width == AccessWidth::Byte {
            // Byte writes land in both halves of the halfword in the BG
            // area and are dropped in the OBJ area.
            let bitmap_mode = self.ppu.regs.dispcnt & 7 >= 3;
            let obj_base = if bitmap_mode { memory::VRAM_OBJ_BITMAP } else { memory::VRAM_OBJ_TILED };
            if offset >= obj_base {
                return;
            }
            let byte = value & 0xFF;
            memory::store(&mut self.mem.vram, offset & !1, AccessWidth::Half, byte * 0x0101);
            self.ppu.vram_written(offset & !1, 2);
            return;
        }
        memory::store(&mut self.mem.vram, offset, width, value);
        self.ppu.vram_written(offset, width.bytes() as usize);
    }

    fn write_rom(&mut self, address: u32, width: AccessWidth, value: u32) {
        if self.cartridge.is_eeprom_address(address) {
            if let Backup::Eeprom(eeprom) = &mut self.cartridge.backup {
                eeprom.write(value as u16);
            }
            return;
        }
        let offset = address & 0x01FF_FFFF;
        match width {
            AccessWidth::Byte => {}
            AccessWidth::Half => self.cartridge.write_rom_half(offset, value as u16),
            AccessWidth::Word => {
                self.cartridge.write_rom_half(offset, value as u16);
                self.cartridge.write_rom_half(offset + 2, (value >> 16) as u16);
            }
        }
    }

    /// Decode and write without charging cycles.
    fn write_data(&mut self, address: u32, width: AccessWidth, value: u32) {
        // The 8-bit backup bus picks the byte lane from the unaligned address.
        if matches!(address >> 24, 0x0E | 0x0F) {
            let byte = (value >> ((address & 3) * 8)) as u8;
            self.cartridge.backup.write_byte(address & 0xFFFF, byte);
            return;
        }
        let address = address & !(width.bytes() - 1);
        match address >> 24 {
            0x02 => memory::store(&mut self.mem.ewram, address as usize & (memory::EWRAM_SIZE - 1), width, value),
            0x03 => memory::store(&mut self.mem.iwram, address as usize & (memory::IWRAM_SIZE - 1), width, value),
            0x04 => {
                self.sync();
                self.write_io(address, width, value);
            }
            0x05 => {
                self.sync();
                let at = address as usize & (memory::PALETTE_SIZE - 1);
                if width == AccessWidth::Byte {
                    memory::store(&mut self.mem.palette, at & !1, AccessWidth::Half, (value & 0xFF) * 0x0101);
                } else {
                    memory::store(&mut self.mem.palette, at, width, value);
                }
            }
            0x06 => {
                self.sync();
                self.write_vram(address, width, value);
            }
            0x07 => {
                self.sync();
                if width != AccessWidth::Byte {
                    memory::store(&mut self.mem.oam, address as usize & (memory::OAM_SIZE - 1), width, value);
                }
            }
            0x08..=0x0D => self.write_rom(address, width, value),
            _ => log::trace!("dropped write {value:#X} to {address:#010X}"),
        }
    }

    /// Read with no cycle cost (host-serviced BIOS calls, debuggers).
    pub fn peek(&mut self, address: u32, width: AccessWidth) -> u32 {
        self.read_data(address, width)
    }

    /// Write with no cycle cost.
    pub fn poke(&mut self, address: u32, width: AccessWidth, value: u32) {
        self.write_data(address, width, value);
    }

    /// DMA3 enabled towards or from EEPROM: its length tells the part size.
    pub(crate) fn dma_enabled(&mut self, channel: usize) {
        if channel != 3 {
            return;
        }
        let count = self.dma.word_count(3);
        let (source, dest) = self.dma.addresses(3);
        if self.cartridge.is_eeprom_address(source) || self.cartridge.is_eeprom_address(dest) {
            if let Backup::Eeprom(eeprom) = &mut self.cartridge.backup {
                eeprom.size_hint(count);
            }
        }
    }
}

impl Bus for GbaBus {
    fn read(&mut self, address: u32, width: AccessWidth, kind: AccessKind) -> BusResult {
        let cycles = self.wait.cycles(address, width, kind);
        let data = self.read_data(address, width);
        self.charge(cycles);
        BusResult::new(data, cycles)
    }

    fn write(&mut self, address: u32, width: AccessWidth, kind: AccessKind, value: u32) -> u32 {
        let cycles = self.wait.cycles(address, width, kind);
        self.write_data(address, width, value);
        self.charge(cycles);
        cycles
    }

    fn fetch(&mut self, address: u32, width: AccessWidth, kind: AccessKind) -> BusResult {
        self.executing_bios = (address as usize) < memory::BIOS_SIZE;
        let result = self.read(address, width, kind);
        self.open_bus = match width {
            AccessWidth::Half => (result.data & 0xFFFF) * 0x0001_0001,
            _ => result.data,
        };
        if self.executing_bios {
            self.bios_latch = memory::load(&self.mem.bios, address as usize & !3, AccessWidth::Word);
        }
        result
    }

    fn idle(&mut self) -> u32 {
        self.charge(1);
        1
    }
}

impl ArmBus for GbaBus {
    fn irq_line(&self) -> bool {
        self.irq.line()
    }

    fn software_interrupt(&mut self, comment: u8, regs: &mut Registers) -> SwiOutcome {
        if self.hle_bios {
            bios::call(self, comment, regs)
        } else {
            SwiOutcome::Exception
        }
    }
}

impl Snapshot for GbaBus {
    fn write_to(&self, w: &mut StateWriter) {
        self.mem.write_to(w);
        self.wait.write_to(w);
        self.scheduler.write_to(w);
        self.irq.write_to(w);
        self.timers.write_to(w);
        self.dma.write_to(w);
        self.ppu.write_to(w);
        self.apu.write_to(w);
        self.keypad.write_to(w);
        self.cartridge.write_to(w);
        w.u8(self.postflg);
        for &half in &self.serial {
            w.u16(half);
        }
        w.bool(self.halted);
        w.bool(self.intr_wait);
        w.u32(self.open_bus);
        w.u32(self.bios_latch);
        w.bool(self.executing_bios);
        w.u64(self.pending);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.mem.read_from(r)?;
        self.wait.read_from(r)?;
        self.scheduler.read_from(r)?;
        self.irq.read_from(r)?;
        self.timers.read_from(r)?;
        self.timers.check_restored(self.scheduler.now())?;
        self.dma.read_from(r)?;
        self.ppu.read_from(r)?;
        self.apu.read_from(r)?;
        self.keypad.read_from(r)?;
        self.cartridge.read_from(r)?;
        self.postflg = r.u8()?;
        for half in &mut self.serial {
            *half = r.u16()?;
        }
        self.halted = r.bool()?;
        self.intr_wait = r.bool()?;
        self.open_bus = r.u32()?;
        self.bios_latch = r.u32()?;
        self.executing_bios = r.bool()?;
        self.pending = r.u64()?;
        if self.pending > MAX_EVENT_DELAY {
            return Err(SnapshotError::Invalid("pending cycles out of range"));
        }
        self.charged = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GbaConfig;
    use AccessKind::NonSequential as N;
    use AccessWidth::{Byte, Half, Word};

    fn test_bus() -> GbaBus {
        let mut rom = vec![0u8; 0x400];
        rom[0xB2] = 0x96;
        for (i, b) in rom.iter_mut().enumerate().skip(0x200) {
            *b = i as u8;
        }
        let cartridge = Cartridge::from_image(&rom, &GbaConfig::default()).expect("valid rom");
        let mut bus = GbaBus::new(&bios::hle_image(), true, cartridge, 32_768);
        bus.skip_boot();
        bus
    }

    #[test]
    fn work_ram_mirrors() {
        let mut bus = test_bus();
        bus.write(0x0200_0010, Word, N, 0xDEAD_BEEF);
        assert_eq!(bus.read(0x0204_0010, Word, N).data, 0xDEAD_BEEF);
        bus.write(0x0300_0000, Half, N, 0x1234);
        assert_eq!(bus.read(0x0300_8000, Half, N).data, 0x1234);
    }

    #[test]
    fn access_costs_follow_region() {
        let mut bus = test_bus();
        assert_eq!(bus.read(0x0200_0000, Word, N).cycles, 6);
        assert_eq!(bus.read(0x0300_0000, Word, N).cycles, 1);
        assert_eq!(bus.read(0x0800_0000, Half, N).cycles, 5);
        assert_eq!(bus.now(), 12);
    }

    #[test]
    fn unmapped_read_returns_last_opcode() {
        let mut bus = test_bus();
        bus.write(0x0300_0000, Word, N, 0xE3A0_0001);
        bus.fetch(0x0300_0000, Word, N);
        assert_eq!(bus.read(0x1000_0000, Word, N).data, 0xE3A0_0001);
        assert_eq!(bus.read(0x0100_0002, Half, N).data, 0xE3A0);

        bus.write(0x0300_0010, Half, N, 0x2001);
        bus.fetch(0x0300_0010, Half, N);
        assert_eq!(bus.read(0x1000_0000, Word, N).data, 0x2001_2001, "Thumb opcode doubled");
    }

    #[test]
    fn bios_reads_protected_outside_bios() {
        let mut bus = test_bus();
        assert_eq!(bus.read(0x0000_0000, Word, N).data, BIOS_LATCH_AFTER_BOOT);
        bus.fetch(0x0000_0008, Word, N);
        let first = memory::load(&bus.mem.bios, 0, Word);
        assert_eq!(bus.read(0x0000_0000, Word, N).data, first);
    }

    #[test]
    fn rom_is_read_only_and_open_past_end() {
        let mut bus = test_bus();
        let before = bus.read(0x0800_0200, Word, N).data;
        bus.write(0x0800_0200, Word, N, 0);
        assert_eq!(bus.read(0x0800_0200, Word, N).data, before);
        assert_eq!(bus.read(0x0800_1000, Half, N).data, 0x0800);
    }

    #[test]
    fn byte_write_rules_for_video_memory() {
        let mut bus = test_bus();
        bus.write(0x0500_0001, Byte, N, 0x7C);
        assert_eq!(bus.read(0x0500_0000, Half, N).data, 0x7C7C);
        bus.write(0x0600_0000, Byte, N, 0x11);
        assert_eq!(bus.read(0x0600_0000, Half, N).data, 0x1111);
        bus.write(0x0601_0000, Byte, N, 0x22);
        assert_eq!(bus.read(0x0601_0000, Half, N).data, 0, "OBJ area ignores bytes");
        bus.write(0x0700_0000, Byte, N, 0x33);
        assert_eq!(bus.read(0x0700_0000, Half, N).data, 0, "OAM ignores bytes");
    }

    #[test]
    fn io_access_syncs_scheduler_first() {
        let mut bus = test_bus();
        for _ in 0..(ppu::CYCLES_PER_LINE / 6) + 1 {
            bus.read(0x0200_0000, Word, N);
        }
        assert_eq!(bus.scheduler.now(), 0, "plain RAM does not sync");
        assert_eq!(bus.read(0x0400_0006, Half, N).data, 1, "VCOUNT sees the elapsed line");
    }

    #[test]
    fn halted_bus_wakes_on_interrupt() {
        let mut bus = test_bus();
        bus.irq.write_ie(Interrupt::HBlank.mask(), 0xFFFF);
        bus.ppu.write_dispstat(1 << 4, 0xFFFF);
        bus.halted = true;
        let skipped = bus.run_halted(ppu::CYCLES_PER_FRAME);
        assert!(!bus.halted);
        assert_eq!(skipped, ppu::HBLANK_FLAG_CYCLE);
    }
}
