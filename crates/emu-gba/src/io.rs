//! I/O register table (0x04000000-0x040003FF).
//!
//! Each halfword register is declared once with its name and its read and
//! write hooks. The bus splits byte and word accesses into halfword
//! accesses with a byte-lane mask and dispatches through the table; no
//! register behaviour lives anywhere else.

use std::sync::OnceLock;

use crate::bus::{GbaBus, SERIAL_BASE};

type ReadHook = fn(&GbaBus) -> u16;
type WriteHook = fn(&mut GbaBus, u16, u16);

/// One halfword I/O register.
#[derive(Clone, Copy)]
pub struct IoRegister {
    pub offset: u32,
    pub name: &'static str,
    /// `None`: write-only, reads as open bus.
    pub read: Option<ReadHook>,
    /// `None`: read-only, writes are dropped.
    pub write: Option<WriteHook>,
}

impl IoRegister {
    fn rw(offset: u32, name: &'static str, read: ReadHook, write: WriteHook) -> Self {
        Self { offset, name, read: Some(read), write: Some(write) }
    }

    fn read_only(offset: u32, name: &'static str, read: ReadHook) -> Self {
        Self { offset, name, read: Some(read), write: None }
    }

    fn write_only(offset: u32, name: &'static str, write: WriteHook) -> Self {
        Self { offset, name, read: None, write: Some(write) }
    }

    /// Unused halfword that reads as zero.
    fn zero(offset: u32, name: &'static str) -> Self {
        Self { offset, name, read: Some(|_| 0), write: Some(|_, _, _| {}) }
    }
}

const IO_HALVES: usize = 0x200;

struct IoTable {
    registers: Vec<IoRegister>,
    /// Halfword offset / 2 -> index into `registers`.
    index: [Option<u16>; IO_HALVES],
}

fn merge(reg: &mut u16, value: u16, mask: u16) {
    *reg = (*reg & !mask) | (value & mask);
}

/// Apply a halfword write to half `upper` of a 32-bit register.
fn merge_wide(value: u16, mask: u16, upper: bool) -> (u32, u32) {
    let shift = if upper { 16 } else { 0 };
    (u32::from(value) << shift, u32::from(mask) << shift)
}

fn affine_write(bus: &mut GbaBus, bg: usize, param: usize, value: u16, mask: u16) {
    let mut raw = bus.ppu.regs.bg_affine[bg][param] as u16;
    merge(&mut raw, value, mask);
    bus.ppu.regs.bg_affine[bg][param] = raw as i16;
}

fn ref_write(bus: &mut GbaBus, bg: usize, axis: usize, upper: bool, value: u16, mask: u16) {
    let (value, mask) = merge_wide(value, mask, upper);
    bus.ppu.write_bg_ref(bg, axis, value, mask);
}

fn dma_control_write(bus: &mut GbaBus, n: usize, value: u16, mask: u16) {
    if bus.dma.write_control(n, value, mask) {
        bus.dma_enabled(n);
    }
}

fn halt_write(bus: &mut GbaBus, value: u16, mask: u16) {
    if mask & 0x00FF != 0 {
        bus.postflg = (value & 1) as u8;
    }
    if mask & 0xFF00 != 0 {
        if value & 0x8000 != 0 {
            log::debug!("STOP requested; treated as halt");
        }
        bus.halted = true;
    }
}

fn serial_read(bus: &GbaBus, offset: u32) -> u16 {
    bus.serial[((offset - SERIAL_BASE) / 2) as usize]
}

fn serial_write(bus: &mut GbaBus, offset: u32, value: u16, mask: u16) {
    merge(&mut bus.serial[((offset - SERIAL_BASE) / 2) as usize], value, mask);
}

macro_rules! serial_registers {
    ($($offset:literal $name:literal),* $(,)?) => {
        [$(IoRegister::rw(
            $offset,
            $name,
            |b| serial_read(b, $offset),
            |b, v, m| serial_write(b, $offset, v, m),
        )),*]
    };
}

macro_rules! bg_registers {
    ($($n:literal),*) => {
        [$(
            IoRegister::rw(
                0x008 + 2 * $n,
                concat!("BG", $n, "CNT"),
                |b| b.ppu.regs.bgcnt[$n],
                |b, v, m| {
                    // BG0/BG1 have no wraparound bit.
                    let valid = if $n < 2 { 0xDFFF } else { 0xFFFF };
                    merge(&mut b.ppu.regs.bgcnt[$n], v & valid, m);
                },
            ),
            IoRegister::write_only(
                0x010 + 4 * $n,
                concat!("BG", $n, "HOFS"),
                |b, v, m| merge(&mut b.ppu.regs.bghofs[$n], v & 0x1FF, m),
            ),
            IoRegister::write_only(
                0x012 + 4 * $n,
                concat!("BG", $n, "VOFS"),
                |b, v, m| merge(&mut b.ppu.regs.bgvofs[$n], v & 0x1FF, m),
            ),
        )*]
    };
}

macro_rules! affine_registers {
    ($($bg:literal $base:literal $num:literal),*) => {
        [$(
            IoRegister::write_only($base, concat!("BG", $num, "PA"), |b, v, m| affine_write(b, $bg, 0, v, m)),
            IoRegister::write_only($base + 2, concat!("BG", $num, "PB"), |b, v, m| affine_write(b, $bg, 1, v, m)),
            IoRegister::write_only($base + 4, concat!("BG", $num, "PC"), |b, v, m| affine_write(b, $bg, 2, v, m)),
            IoRegister::write_only($base + 6, concat!("BG", $num, "PD"), |b, v, m| affine_write(b, $bg, 3, v, m)),
            IoRegister::write_only($base + 8, concat!("BG", $num, "X_L"), |b, v, m| ref_write(b, $bg, 0, false, v, m)),
            IoRegister::write_only($base + 10, concat!("BG", $num, "X_H"), |b, v, m| ref_write(b, $bg, 0, true, v, m)),
            IoRegister::write_only($base + 12, concat!("BG", $num, "Y_L"), |b, v, m| ref_write(b, $bg, 1, false, v, m)),
            IoRegister::write_only($base + 14, concat!("BG", $num, "Y_H"), |b, v, m| ref_write(b, $bg, 1, true, v, m)),
        )*]
    };
}

macro_rules! sound_registers {
    ($($offset:literal $name:literal),* $(,)?) => {
        [$(IoRegister::rw(
            $offset,
            $name,
            |b| b.apu.read($offset),
            |b, v, m| {
                let now = b.scheduler.now();
                b.apu.write($offset, v, m, now);
            },
        )),*]
    };
}

macro_rules! dma_registers {
    ($($n:literal),*) => {
        [$(
            IoRegister::write_only(0x0B0 + 12 * $n, concat!("DMA", $n, "SAD_L"), |b, v, m| {
                let (v, m) = merge_wide(v, m, false);
                b.dma.write_source($n, v, m);
            }),
            IoRegister::write_only(0x0B2 + 12 * $n, concat!("DMA", $n, "SAD_H"), |b, v, m| {
                let (v, m) = merge_wide(v, m, true);
                b.dma.write_source($n, v, m);
            }),
            IoRegister::write_only(0x0B4 + 12 * $n, concat!("DMA", $n, "DAD_L"), |b, v, m| {
                let (v, m) = merge_wide(v, m, false);
                b.dma.write_dest($n, v, m);
            }),
            IoRegister::write_only(0x0B6 + 12 * $n, concat!("DMA", $n, "DAD_H"), |b, v, m| {
                let (v, m) = merge_wide(v, m, true);
                b.dma.write_dest($n, v, m);
            }),
            IoRegister {
                offset: 0x0B8 + 12 * $n,
                name: concat!("DMA", $n, "CNT_L"),
                read: Some(|_| 0),
                write: Some(|b, v, m| b.dma.write_count($n, v, m)),
            },
            IoRegister::rw(
                0x0BA + 12 * $n,
                concat!("DMA", $n, "CNT_H"),
                |b| b.dma.control($n),
                |b, v, m| dma_control_write(b, $n, v, m),
            ),
        )*]
    };
}

macro_rules! timer_registers {
    ($($n:literal),*) => {
        [$(
            IoRegister::rw(
                0x100 + 4 * $n,
                concat!("TM", $n, "CNT_L"),
                |b| b.timers.counter($n, b.scheduler.now()),
                |b, v, m| b.timers.write_reload($n, v, m),
            ),
            IoRegister::rw(
                0x102 + 4 * $n,
                concat!("TM", $n, "CNT_H"),
                |b| b.timers.control($n),
                |b, v, m| b.timers.write_control($n, v, m, &mut b.scheduler),
            ),
        )*]
    };
}

fn build() -> IoTable {
    let mut registers = vec![
        IoRegister::rw(0x000, "DISPCNT", |b| b.ppu.regs.dispcnt, |b, v, m| merge(&mut b.ppu.regs.dispcnt, v, m)),
        IoRegister::rw(0x002, "GREENSWP", |b| b.ppu.regs.green_swap, |b, v, m| merge(&mut b.ppu.regs.green_swap, v & 1, m)),
        IoRegister::rw(0x004, "DISPSTAT", |b| b.ppu.dispstat(), |b, v, m| b.ppu.write_dispstat(v, m)),
        IoRegister::read_only(0x006, "VCOUNT", |b| b.ppu.vcount()),
    ];
    registers.extend(bg_registers!(0, 1, 2, 3));
    registers.extend(affine_registers!(0 0x020 2, 1 0x030 3));
    registers.extend([
        IoRegister::write_only(0x040, "WIN0H", |b, v, m| merge(&mut b.ppu.regs.winh[0], v, m)),
        IoRegister::write_only(0x042, "WIN1H", |b, v, m| merge(&mut b.ppu.regs.winh[1], v, m)),
        IoRegister::write_only(0x044, "WIN0V", |b, v, m| merge(&mut b.ppu.regs.winv[0], v, m)),
        IoRegister::write_only(0x046, "WIN1V", |b, v, m| merge(&mut b.ppu.regs.winv[1], v, m)),
        IoRegister::rw(0x048, "WININ", |b| b.ppu.regs.winin, |b, v, m| merge(&mut b.ppu.regs.winin, v & 0x3F3F, m)),
        IoRegister::rw(0x04A, "WINOUT", |b| b.ppu.regs.winout, |b, v, m| merge(&mut b.ppu.regs.winout, v & 0x3F3F, m)),
        IoRegister::write_only(0x04C, "MOSAIC", |b, v, m| merge(&mut b.ppu.regs.mosaic, v, m)),
        IoRegister::rw(0x050, "BLDCNT", |b| b.ppu.regs.bldcnt, |b, v, m| merge(&mut b.ppu.regs.bldcnt, v & 0x3FFF, m)),
        IoRegister::rw(0x052, "BLDALPHA", |b| b.ppu.regs.bldalpha, |b, v, m| merge(&mut b.ppu.regs.bldalpha, v & 0x1F1F, m)),
        IoRegister::write_only(0x054, "BLDY", |b, v, m| merge(&mut b.ppu.regs.bldy, v & 0x1F, m)),
    ]);
    registers.extend(sound_registers!(
        0x060 "SOUND1CNT_L", 0x062 "SOUND1CNT_H", 0x064 "SOUND1CNT_X",
        0x068 "SOUND2CNT_L", 0x06C "SOUND2CNT_H",
        0x070 "SOUND3CNT_L", 0x072 "SOUND3CNT_H", 0x074 "SOUND3CNT_X",
        0x078 "SOUND4CNT_L", 0x07C "SOUND4CNT_H",
        0x080 "SOUNDCNT_L", 0x082 "SOUNDCNT_H", 0x084 "SOUNDCNT_X", 0x088 "SOUNDBIAS",
        0x090 "WAVE_RAM0_L", 0x092 "WAVE_RAM0_H", 0x094 "WAVE_RAM1_L", 0x096 "WAVE_RAM1_H",
        0x098 "WAVE_RAM2_L", 0x09A "WAVE_RAM2_H", 0x09C "WAVE_RAM3_L", 0x09E "WAVE_RAM3_H",
    ));
    registers.extend([
        IoRegister::zero(0x066, "SOUND1CNT_X_H"),
        IoRegister::zero(0x06A, "SOUND2CNT_L_H"),
        IoRegister::zero(0x06E, "SOUND2CNT_H_H"),
        IoRegister::zero(0x076, "SOUND3CNT_X_H"),
        IoRegister::zero(0x07A, "SOUND4CNT_L_H"),
        IoRegister::zero(0x07E, "SOUND4CNT_H_H"),
        IoRegister::zero(0x086, "SOUNDCNT_X_H"),
        IoRegister::zero(0x08A, "SOUNDBIAS_H"),
        IoRegister::write_only(0x0A0, "FIFO_A_L", |b, v, m| b.apu.write_fifo(0, v, m)),
        IoRegister::write_only(0x0A2, "FIFO_A_H", |b, v, m| b.apu.write_fifo(0, v, m)),
        IoRegister::write_only(0x0A4, "FIFO_B_L", |b, v, m| b.apu.write_fifo(1, v, m)),
        IoRegister::write_only(0x0A6, "FIFO_B_H", |b, v, m| b.apu.write_fifo(1, v, m)),
    ]);
    registers.extend(dma_registers!(0, 1, 2, 3));
    registers.extend(timer_registers!(0, 1, 2, 3));
    registers.extend(serial_registers!(
        0x120 "SIOMULTI0", 0x122 "SIOMULTI1", 0x124 "SIOMULTI2", 0x126 "SIOMULTI3",
        0x128 "SIOCNT", 0x12A "SIOMLT_SEND", 0x134 "RCNT", 0x140 "JOYCNT",
        0x150 "JOY_RECV_L", 0x152 "JOY_RECV_H", 0x154 "JOY_TRANS_L", 0x156 "JOY_TRANS_H",
        0x158 "JOYSTAT",
    ));
    registers.extend([
        IoRegister::read_only(0x130, "KEYINPUT", |b| b.keypad.keyinput()),
        IoRegister::rw(0x132, "KEYCNT", |b| b.keypad.keycnt(), |b, v, m| b.keypad.write_keycnt(v, m)),
        IoRegister::rw(0x200, "IE", |b| b.irq.ie(), |b, v, m| b.irq.write_ie(v, m)),
        IoRegister::rw(0x202, "IF", |b| b.irq.iflags(), |b, v, m| b.irq.acknowledge(v, m)),
        IoRegister::rw(0x204, "WAITCNT", |b| b.wait.waitcnt(), |b, v, m| b.wait.write_waitcnt(v, m)),
        IoRegister::zero(0x206, "WAITCNT_H"),
        IoRegister::rw(0x208, "IME", |b| u16::from(b.irq.ime()), |b, v, m| b.irq.write_ime(v, m)),
        IoRegister::zero(0x20A, "IME_H"),
        IoRegister::rw(0x300, "POSTFLG_HALTCNT", |b| u16::from(b.postflg), halt_write),
    ]);
    debug_assert!(registers.iter().all(|r| (r.offset as usize) < IO_HALVES * 2));

    let mut index = [None; IO_HALVES];
    for (i, reg) in registers.iter().enumerate() {
        index[(reg.offset / 2) as usize] = Some(i as u16);
    }
    IoTable { registers, index }
}

fn table() -> &'static IoTable {
    static TABLE: OnceLock<IoTable> = OnceLock::new();
    TABLE.get_or_init(build)
}

/// The register declared at a halfword offset.
#[must_use]
pub fn register(offset: u32) -> Option<&'static IoRegister> {
    let table = table();
    let i = table.index.get((offset / 2) as usize).copied().flatten()?;
    table.registers.get(usize::from(i))
}

impl GbaBus {
    /// Halfword register read; `None` for write-only or unused offsets.
    pub(crate) fn io_read(&self, offset: u32) -> Option<u16> {
        register(offset)?.read.map(|read| read(self))
    }

    /// Halfword register write under a byte-lane mask.
    pub(crate) fn io_write(&mut self, offset: u32, value: u16, mask: u16) {
        match register(offset) {
            Some(IoRegister { write: Some(write), .. }) => write(self, value, mask),
            Some(reg) => log::debug!("write {value:#06X} to read-only {}", reg.name),
            None => log::debug!("write {value:#06X} to unused I/O {:#05X}", offset),
        }
    }
}
