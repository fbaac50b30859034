//! High-level BIOS.
//!
//! When no BIOS image is supplied the machine maps a small built-in image
//! holding the exception vectors and the IRQ dispatcher, and services SWIs
//! in the host. Memory traffic of a serviced call goes through
//! [`GbaBus::peek`]/[`GbaBus::poke`]; the call is charged a fixed estimate.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use arm_arm7tdmi::{Mode, Registers, SwiOutcome};
use emu_core::AccessWidth::{self, Byte, Half, Word};

use crate::bus::GbaBus;
use crate::memory::BIOS_SIZE;

/// Where BIOS-aware IRQ handlers flag the interrupts they serviced.
const INTR_CHECK: u32 = 0x0300_7FF8;
/// IWRAM area cleared by SoftReset.
const RESET_AREA: std::ops::Range<u32> = 0x0300_7E00..0x0300_8000;
/// Non-zero selects the EWRAM entry point on SoftReset.
const RESET_TARGET_FLAG: u32 = 0x0300_7FFA;

pub const SP_SVC: u32 = 0x0300_7FE0;
pub const SP_IRQ: u32 = 0x0300_7FA0;
pub const SP_SYS: u32 = 0x0300_7F00;
pub const CARTRIDGE_ENTRY: u32 = 0x0800_0000;
const EWRAM_ENTRY: u32 = 0x0200_0000;

/// Value GetBiosChecksum returns on retail hardware.
pub const BIOS_CHECKSUM: u32 = 0xBAAE_187F;

/// Cost charged for any serviced call before its per-unit work.
const CALL_CYCLES: u32 = 12;

/// Exception vectors and IRQ dispatcher.
const HLE_CODE: [u32; 15] = [
    0xE59F_F030, // 0x00 reset: ldr pc, [pc, #0x30]
    0xE1B0_F00E, // 0x04 undefined: movs pc, lr
    0xE1B0_F00E, // 0x08 swi: movs pc, lr
    0xE25E_F004, // 0x0C prefetch abort: subs pc, lr, #4
    0xE25E_F008, // 0x10 data abort: subs pc, lr, #8
    0xEAFF_FFFE, // 0x14 reserved: b .
    0xEA00_0000, // 0x18 irq: b 0x20
    0xE25E_F004, // 0x1C fiq: subs pc, lr, #4
    0xE92D_500F, // 0x20 stmfd sp!, {r0-r3, r12, lr}
    0xE3A0_0301, // 0x24 mov r0, #0x04000000
    0xE28F_E000, // 0x28 add lr, pc, #0
    0xE510_F004, // 0x2C ldr pc, [r0, #-4]
    0xE8BD_500F, // 0x30 ldmfd sp!, {r0-r3, r12, lr}
    0xE25E_F004, // 0x34 subs pc, lr, #4
    CARTRIDGE_ENTRY, // 0x38 reset literal
];

/// The built-in 16 KiB BIOS image.
#[must_use]
pub fn hle_image() -> Vec<u8> {
    let mut image = vec![0u8; BIOS_SIZE];
    for (slot, word) in image.chunks_exact_mut(4).zip(HLE_CODE) {
        slot.copy_from_slice(&word.to_le_bytes());
    }
    image
}

/// Registers as the BIOS leaves them when it jumps to `entry`.
#[must_use]
pub fn boot_registers(entry: u32) -> Registers {
    let mut regs = Registers::new();
    regs.set_sp_of(Mode::Supervisor, SP_SVC);
    regs.set_sp_of(Mode::Irq, SP_IRQ);
    regs.set_cpsr(Mode::System.bits());
    regs.r[13] = SP_SYS;
    regs.r[15] = entry;
    regs
}

/// Service SWI `comment`.
pub fn call(bus: &mut GbaBus, comment: u8, regs: &mut Registers) -> SwiOutcome {
    log::trace!("swi {comment:#04X} r0={:#010X} r1={:#010X} r2={:#010X}", regs.r[0], regs.r[1], regs.r[2]);
    match comment {
        0x00 => soft_reset(bus, regs),
        0x01 => register_ram_reset(bus, regs.r[0]),
        0x02 | 0x03 => {
            bus.halted = true;
            handled(0)
        }
        0x04 => {
            let discard = regs.r[0] != 0;
            intr_wait(bus, discard, regs.r[1] as u16)
        }
        0x05 => {
            regs.r[0] = 1;
            regs.r[1] = 1;
            intr_wait(bus, true, 1)
        }
        0x06 => div(regs, regs.r[0] as i32, regs.r[1] as i32),
        0x07 => div(regs, regs.r[1] as i32, regs.r[0] as i32),
        0x08 => {
            regs.r[0] = regs.r[0].isqrt();
            handled(20)
        }
        0x09 => {
            let (result, r1, r3) = arctan(regs.r[0] as i32);
            regs.r[0] = result as u32;
            regs.r[1] = r1 as u32;
            regs.r[3] = r3 as u32;
            handled(30)
        }
        0x0A => {
            regs.r[0] = u32::from(arctan2(regs.r[0] as i16, regs.r[1] as i16));
            handled(40)
        }
        0x0B => cpu_set(bus, regs.r[0], regs.r[1], regs.r[2]),
        0x0C => cpu_fast_set(bus, regs.r[0], regs.r[1], regs.r[2]),
        0x0D => {
            regs.r[0] = BIOS_CHECKSUM;
            handled(0)
        }
        0x0E => bg_affine_set(bus, regs.r[0], regs.r[1], regs.r[2]),
        0x0F => obj_affine_set(bus, regs.r[0], regs.r[1], regs.r[2], regs.r[3]),
        0x10 => bit_unpack(bus, regs.r[0], regs.r[1], regs.r[2]),
        0x11 => lz77(bus, regs.r[0], regs.r[1], Byte),
        0x12 => lz77(bus, regs.r[0], regs.r[1], Half),
        0x13 => {
            log::warn!("HuffUnComp is not supported by the built-in BIOS");
            handled(0)
        }
        0x14 => run_length(bus, regs.r[0], regs.r[1], Byte),
        0x15 => run_length(bus, regs.r[0], regs.r[1], Half),
        0x16 => diff8(bus, regs.r[0], regs.r[1], Byte),
        0x17 => diff8(bus, regs.r[0], regs.r[1], Half),
        0x18 => diff16(bus, regs.r[0], regs.r[1]),
        0x19 => {
            let level = if regs.r[0] == 0 { 0x000 } else { 0x200 };
            let now = bus.now();
            bus.apu.write(0x88, level, 0x03FE, now);
            handled(0)
        }
        0x1F => {
            let base = f64::from(bus.peek(regs.r[0].wrapping_add(4), Word));
            let semitones = 180.0 - f64::from(regs.r[1]) - f64::from(regs.r[2] & 0xFF) / 256.0;
            regs.r[0] = (base / (semitones / 12.0).exp2()) as u32;
            handled(30)
        }
        _ => {
            log::warn!("unimplemented SWI {comment:#04X}");
            handled(0)
        }
    }
}

fn handled(extra: u32) -> SwiOutcome {
    SwiOutcome::Handled { cycles: CALL_CYCLES + extra }
}

fn soft_reset(bus: &mut GbaBus, regs: &mut Registers) -> SwiOutcome {
    let entry = if bus.peek(RESET_TARGET_FLAG, Byte) == 0 { CARTRIDGE_ENTRY } else { EWRAM_ENTRY };
    for address in RESET_AREA.step_by(4) {
        bus.poke(address, Word, 0);
    }
    *regs = boot_registers(entry);
    log::debug!("SoftReset to {entry:#010X}");
    SwiOutcome::Branch { cycles: CALL_CYCLES + 128 }
}

/// Clears the memories selected by `flags`. Only the display, DMA and
/// interrupt registers are reset for bit 7.
fn register_ram_reset(bus: &mut GbaBus, flags: u32) -> SwiOutcome {
    bus.ppu.regs.dispcnt = 0x0080;
    if flags & 0x01 != 0 {
        bus.mem.ewram.fill(0);
    }
    if flags & 0x02 != 0 {
        let keep = bus.mem.iwram.len() - 0x200;
        bus.mem.iwram[..keep].fill(0);
    }
    if flags & 0x04 != 0 {
        bus.mem.palette.fill(0);
    }
    if flags & 0x08 != 0 {
        bus.mem.vram.fill(0);
        let len = bus.mem.vram.len();
        bus.ppu.vram_written(0, len);
    }
    if flags & 0x10 != 0 {
        bus.mem.oam.fill(0);
    }
    if flags & 0x20 != 0 {
        bus.serial.fill(0);
    }
    if flags & 0x40 != 0 {
        let now = bus.now();
        bus.apu.write(0x84, 0, 0xFFFF, now);
    }
    if flags & 0x80 != 0 {
        let regs = &mut bus.ppu.regs;
        *regs = crate::ppu::PpuRegisters {
            dispcnt: regs.dispcnt,
            bg_affine: [[0x100, 0, 0, 0x100]; 2],
            ..Default::default()
        };
        bus.dma = crate::dma::Dma::new();
        bus.irq.write_ie(0, 0xFFFF);
        bus.irq.write_ime(0, 0xFFFF);
    }
    handled(256)
}

/// Halt until one of `mask` is flagged at [`INTR_CHECK`]. The SWI is
/// re-executed after every interrupt until the flag shows up.
fn intr_wait(bus: &mut GbaBus, discard: bool, mask: u16) -> SwiOutcome {
    bus.irq.write_ime(1, 1);
    let mut flags = bus.peek(INTR_CHECK, Half) as u16;
    if discard && !bus.intr_wait {
        flags &= !mask;
        bus.poke(INTR_CHECK, Half, u32::from(flags));
    } else if flags & mask != 0 {
        bus.poke(INTR_CHECK, Half, u32::from(flags & !mask));
        bus.intr_wait = false;
        return handled(0);
    }
    bus.intr_wait = true;
    bus.halted = true;
    SwiOutcome::Retry { cycles: CALL_CYCLES }
}

fn div(regs: &mut Registers, numerator: i32, denominator: i32) -> SwiOutcome {
    let (quotient, remainder) = if denominator == 0 {
        (if numerator < 0 { -1 } else { 1 }, numerator)
    } else {
        (numerator.wrapping_div(denominator), numerator.wrapping_rem(denominator))
    };
    regs.r[0] = quotient as u32;
    regs.r[1] = remainder as u32;
    regs.r[3] = quotient.unsigned_abs();
    handled(40)
}

/// Returns (angle, r1, r3) as the BIOS leaves them.
fn arctan(x: i32) -> (i32, i32, i32) {
    let a = -(x.wrapping_mul(x) >> 14);
    let mut b = (0xA9_i32.wrapping_mul(a) >> 14) + 0x390;
    for k in [0x91C, 0xFB6, 0x16AA, 0x2081, 0x3651, 0xA2F9] {
        b = (b.wrapping_mul(a) >> 14) + k;
    }
    (x.wrapping_mul(b) >> 16, a, b)
}

/// Angle of (x, y), 0x0000-0xFFFF for a full turn. The BIOS only looks at
/// the low halfword of each operand.
fn arctan2(x: i16, y: i16) -> u16 {
    let (x, y) = (i32::from(x), i32::from(y));
    let towards = |n: i32, d: i32| arctan(n.wrapping_shl(14).wrapping_div(d)).0;
    let angle = if y == 0 {
        if x >= 0 { 0 } else { 0x8000 }
    } else if x == 0 {
        if y >= 0 { 0x4000 } else { 0xC000 }
    } else if y >= 0 {
        if x >= 0 && x >= y {
            towards(y, x)
        } else if x < 0 && -x >= y {
            towards(y, x) + 0x8000
        } else {
            0x4000 - towards(x, y)
        }
    } else if x <= 0 && -x > -y {
        towards(y, x) + 0x8000
    } else if x > 0 && x >= -y {
        towards(y, x) + 0x1_0000
    } else {
        0xC000 - towards(x, y)
    };
    angle as u16
}

fn cpu_set(bus: &mut GbaBus, source: u32, dest: u32, control: u32) -> SwiOutcome {
    let count = control & 0x001F_FFFF;
    let fill = control & (1 << 24) != 0;
    let width = if control & (1 << 26) != 0 { Word } else { Half };
    let step = width.bytes();
    let (source, dest) = (source & !(step - 1), dest & !(step - 1));
    let value = bus.peek(source, width);
    for i in 0..count {
        let data = if fill { value } else { bus.peek(source.wrapping_add(i * step), width) };
        bus.poke(dest.wrapping_add(i * step), width, data);
    }
    handled(2 * count)
}

fn cpu_fast_set(bus: &mut GbaBus, source: u32, dest: u32, control: u32) -> SwiOutcome {
    let count = (control & 0x001F_FFFF).next_multiple_of(8);
    let fill = control & (1 << 24) != 0;
    let (source, dest) = (source & !3, dest & !3);
    let value = bus.peek(source, Word);
    for i in 0..count {
        let data = if fill { value } else { bus.peek(source.wrapping_add(i * 4), Word) };
        bus.poke(dest.wrapping_add(i * 4), Word, data);
    }
    handled(count)
}

/// Rotation by the high byte of `angle` (256 steps per turn), as (cos, sin).
fn rotation(angle: u32) -> (f64, f64) {
    let theta = f64::from((angle & 0xFFFF) >> 8) / 128.0 * std::f64::consts::PI;
    (theta.cos(), theta.sin())
}

fn fixed(value: f64) -> u32 {
    (value * 256.0) as i32 as u32
}

fn bg_affine_set(bus: &mut GbaBus, mut source: u32, mut dest: u32, count: u32) -> SwiOutcome {
    for _ in 0..count {
        let ox = f64::from(bus.peek(source, Word) as i32) / 256.0;
        let oy = f64::from(bus.peek(source + 4, Word) as i32) / 256.0;
        let cx = f64::from(bus.peek(source + 8, Half) as i16);
        let cy = f64::from(bus.peek(source + 10, Half) as i16);
        let sx = f64::from(bus.peek(source + 12, Half) as i16) / 256.0;
        let sy = f64::from(bus.peek(source + 14, Half) as i16) / 256.0;
        let (cos, sin) = rotation(bus.peek(source + 16, Half));
        source = source.wrapping_add(20);

        let (a, b, c, d) = (cos * sx, -sin * sx, sin * sy, cos * sy);
        let rx = ox - (a * cx + b * cy);
        let ry = oy - (c * cx + d * cy);
        bus.poke(dest, Half, fixed(a));
        bus.poke(dest + 2, Half, fixed(b));
        bus.poke(dest + 4, Half, fixed(c));
        bus.poke(dest + 6, Half, fixed(d));
        bus.poke(dest + 8, Word, fixed(rx));
        bus.poke(dest + 12, Word, fixed(ry));
        dest = dest.wrapping_add(16);
    }
    handled(40 * count)
}

fn obj_affine_set(bus: &mut GbaBus, mut source: u32, mut dest: u32, count: u32, stride: u32) -> SwiOutcome {
    for _ in 0..count {
        let sx = f64::from(bus.peek(source, Half) as i16) / 256.0;
        let sy = f64::from(bus.peek(source + 2, Half) as i16) / 256.0;
        let (cos, sin) = rotation(bus.peek(source + 4, Half));
        source = source.wrapping_add(8);

        for (i, value) in [cos * sx, -sin * sx, sin * sy, cos * sy].into_iter().enumerate() {
            bus.poke(dest.wrapping_add(stride.wrapping_mul(i as u32)), Half, fixed(value));
        }
        dest = dest.wrapping_add(stride.wrapping_mul(4));
    }
    handled(30 * count)
}

fn bit_unpack(bus: &mut GbaBus, mut source: u32, mut dest: u32, info: u32) -> SwiOutcome {
    let length = bus.peek(info, Half);
    let source_bits = bus.peek(info + 2, Byte);
    let dest_bits = bus.peek(info + 3, Byte);
    let offset_word = bus.peek(info + 4, Word);
    if !matches!(source_bits, 1 | 2 | 4 | 8) || !matches!(dest_bits, 1 | 2 | 4 | 8 | 16 | 32) {
        log::warn!("BitUnPack with unit widths {source_bits}/{dest_bits}");
        return handled(0);
    }
    let data_offset = offset_word & 0x7FFF_FFFF;
    let offset_zero = offset_word & 0x8000_0000 != 0;
    let source_mask = (1u32 << source_bits) - 1;
    let dest_mask = if dest_bits == 32 { u32::MAX } else { (1u32 << dest_bits) - 1 };

    let (mut word, mut filled) = (0u32, 0u32);
    for _ in 0..length {
        let byte = bus.peek(source, Byte);
        source = source.wrapping_add(1);
        for shift in (0..8).step_by(source_bits as usize) {
            let mut unit = (byte >> shift) & source_mask;
            if unit != 0 || offset_zero {
                unit = unit.wrapping_add(data_offset);
            }
            word |= (unit & dest_mask).wrapping_shl(filled);
            filled += dest_bits;
            if filled == 32 {
                bus.poke(dest, Word, word);
                dest = dest.wrapping_add(4);
                word = 0;
                filled = 0;
            }
        }
    }
    handled(8 * length)
}

/// Reads the 4-byte header of a compressed stream: (type nibble, size).
fn stream_header(bus: &mut GbaBus, source: u32) -> (u32, usize) {
    let header = bus.peek(source & !3, Word);
    ((header >> 4) & 0xF, (header >> 8) as usize)
}

/// Write decoded bytes, byte by byte for WRAM or halfword by halfword for
/// VRAM (where byte writes would be mirrored).
fn write_out(bus: &mut GbaBus, dest: u32, data: &[u8], unit: AccessWidth) -> SwiOutcome {
    if unit == Byte {
        for (i, &byte) in data.iter().enumerate() {
            bus.poke(dest.wrapping_add(i as u32), Byte, u32::from(byte));
        }
    } else {
        for (i, pair) in data.chunks(2).enumerate() {
            let half = u32::from(pair[0]) | (u32::from(pair.get(1).copied().unwrap_or(0)) << 8);
            bus.poke(dest.wrapping_add(2 * i as u32), Half, half);
        }
    }
    handled(data.len() as u32)
}

fn lz77(bus: &mut GbaBus, source: u32, dest: u32, unit: AccessWidth) -> SwiOutcome {
    let (kind, size) = stream_header(bus, source);
    if kind != 1 {
        log::warn!("LZ77UnComp on a stream of type {kind}");
    }
    let mut at = (source & !3) + 4;
    let mut next = |bus: &mut GbaBus| {
        let byte = bus.peek(at, Byte) as u8;
        at = at.wrapping_add(1);
        byte
    };

    let mut out = Vec::with_capacity(size);
    while out.len() < size {
        let flags = next(bus);
        for bit in (0..8).rev() {
            if out.len() >= size {
                break;
            }
            if flags & (1 << bit) == 0 {
                out.push(next(bus));
                continue;
            }
            let (hi, lo) = (next(bus), next(bus));
            let length = usize::from(hi >> 4) + 3;
            let distance = ((usize::from(hi & 0xF) << 8) | usize::from(lo)) + 1;
            for _ in 0..length.min(size - out.len()) {
                let byte = out.len().checked_sub(distance).and_then(|i| out.get(i).copied()).unwrap_or(0);
                out.push(byte);
            }
        }
    }
    write_out(bus, dest, &out, unit)
}

fn run_length(bus: &mut GbaBus, source: u32, dest: u32, unit: AccessWidth) -> SwiOutcome {
    let (kind, size) = stream_header(bus, source);
    if kind != 3 {
        log::warn!("RLUnComp on a stream of type {kind}");
    }
    let mut at = (source & !3) + 4;
    let mut out = Vec::with_capacity(size);
    while out.len() < size {
        let flag = bus.peek(at, Byte);
        at = at.wrapping_add(1);
        let remaining = size - out.len();
        if flag & 0x80 != 0 {
            let length = (flag as usize & 0x7F) + 3;
            let byte = bus.peek(at, Byte) as u8;
            at = at.wrapping_add(1);
            out.extend(std::iter::repeat_n(byte, length.min(remaining)));
        } else {
            let length = (flag as usize & 0x7F) + 1;
            for _ in 0..length.min(remaining) {
                out.push(bus.peek(at, Byte) as u8);
                at = at.wrapping_add(1);
            }
        }
    }
    write_out(bus, dest, &out, unit)
}

fn diff8(bus: &mut GbaBus, source: u32, dest: u32, unit: AccessWidth) -> SwiOutcome {
    let (_, size) = stream_header(bus, source);
    let at = (source & !3) + 4;
    let mut out = Vec::with_capacity(size);
    let mut current = 0u8;
    for i in 0..size {
        current = current.wrapping_add(bus.peek(at.wrapping_add(i as u32), Byte) as u8);
        out.push(current);
    }
    write_out(bus, dest, &out, unit)
}

fn diff16(bus: &mut GbaBus, source: u32, dest: u32) -> SwiOutcome {
    let (_, size) = stream_header(bus, source);
    let at = (source & !3) + 4;
    let mut current = 0u16;
    for i in 0..(size / 2) as u32 {
        current = current.wrapping_add(bus.peek(at.wrapping_add(2 * i), Half) as u16);
        bus.poke(dest.wrapping_add(2 * i), Half, u32::from(current));
    }
    handled(size as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use crate::config::GbaConfig;

    fn test_bus() -> GbaBus {
        let mut rom = vec![0u8; 0x200];
        rom[0xB2] = 0x96;
        let cartridge = Cartridge::from_image(&rom, &GbaConfig::default()).expect("valid rom");
        let mut bus = GbaBus::new(&hle_image(), true, cartridge, 32_768);
        bus.skip_boot();
        bus
    }

    fn load(bus: &mut GbaBus, at: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            bus.poke(at + i as u32, Byte, u32::from(b));
        }
    }

    fn dump(bus: &mut GbaBus, at: u32, len: u32) -> Vec<u8> {
        (0..len).map(|i| bus.peek(at + i, Byte) as u8).collect()
    }

    fn swi(bus: &mut GbaBus, comment: u8, args: &[u32]) -> (Registers, SwiOutcome) {
        let mut regs = boot_registers(CARTRIDGE_ENTRY);
        regs.r[..args.len()].copy_from_slice(args);
        let outcome = call(bus, comment, &mut regs);
        (regs, outcome)
    }

    #[test]
    fn image_has_vectors_and_dispatcher() {
        let image = hle_image();
        assert_eq!(image.len(), BIOS_SIZE);
        let word = |at: usize| u32::from_le_bytes([image[at], image[at + 1], image[at + 2], image[at + 3]]);
        assert_eq!(word(0x18), 0xEA00_0000);
        assert_eq!(word(0x34), 0xE25E_F004);
        assert_eq!(word(0x38), CARTRIDGE_ENTRY);
    }

    #[test]
    fn boot_registers_match_cartridge_entry() {
        let regs = boot_registers(CARTRIDGE_ENTRY);
        assert_eq!(regs.mode(), Mode::System);
        assert_eq!(regs.r[13], SP_SYS);
        assert_eq!(regs.sp_of(Mode::Supervisor), SP_SVC);
        assert_eq!(regs.sp_of(Mode::Irq), SP_IRQ);
        assert!(!regs.is_thumb());
    }

    #[test]
    fn div_returns_quotient_remainder_and_abs() {
        let mut bus = test_bus();
        let (regs, _) = swi(&mut bus, 0x06, &[(-7i32) as u32, 2]);
        assert_eq!(regs.r[0] as i32, -3);
        assert_eq!(regs.r[1] as i32, -1);
        assert_eq!(regs.r[3], 3);

        let (regs, _) = swi(&mut bus, 0x07, &[2, 9]);
        assert_eq!(regs.r[0], 4, "DivArm swaps the operands");
    }

    #[test]
    fn div_by_zero_is_deterministic() {
        let mut bus = test_bus();
        let (regs, outcome) = swi(&mut bus, 0x06, &[(-5i32) as u32, 0]);
        assert_eq!(regs.r[0] as i32, -1);
        assert_eq!(regs.r[1] as i32, -5);
        assert_eq!(regs.r[3], 1);
        assert!(matches!(outcome, SwiOutcome::Handled { .. }));

        let (regs, _) = swi(&mut bus, 0x06, &[0, 0]);
        assert_eq!(regs.r[0], 1, "zero dividend counts as positive");
        let (regs, _) = swi(&mut bus, 0x06, &[i32::MIN as u32, (-1i32) as u32]);
        assert_eq!(regs.r[0], 0x8000_0000, "overflow wraps");
    }

    #[test]
    fn sqrt_truncates() {
        let mut bus = test_bus();
        assert_eq!(swi(&mut bus, 0x08, &[1_000_000]).0.r[0], 1000);
        assert_eq!(swi(&mut bus, 0x08, &[99]).0.r[0], 9);
        assert_eq!(swi(&mut bus, 0x08, &[u32::MAX]).0.r[0], 0xFFFF);
    }

    #[test]
    fn arctan2_covers_the_quadrants() {
        assert_eq!(arctan2(0x100, 0), 0x0000);
        assert_eq!(arctan2(0, 0x100), 0x4000);
        assert_eq!(arctan2(-0x100, 0), 0x8000);
        assert_eq!(arctan2(0, -0x100), 0xC000);
        let diagonal = arctan2(0x100, 0x100);
        assert!((0x1FF0..=0x2010).contains(&diagonal), "45 degrees, got {diagonal:#06X}");
        let third = arctan2(-0x100, -0x100);
        assert!((0x9FF0..=0xA010).contains(&third), "225 degrees, got {third:#06X}");
    }

    #[test]
    fn arctan2_extreme_operands_stay_in_range() {
        assert_eq!(arctan2(i16::MIN, 0), 0x8000);
        assert_eq!(arctan2(0, i16::MIN), 0xC000);
        let corner = arctan2(i16::MIN, i16::MIN);
        assert!((0x9FF0..=0xA010).contains(&corner), "225 degrees, got {corner:#06X}");
        arctan2(i16::MAX, i16::MIN);
        arctan2(i16::MIN, i16::MAX);

        let mut bus = test_bus();
        let (regs, _) = swi(&mut bus, 0x0A, &[0x8000_0000, 1]);
        assert_eq!(regs.r[0], 0x4000, "upper halfword ignored: x = 0, y = 1");
        let (regs, _) = swi(&mut bus, 0x0A, &[0xFFFF_8000, 0x8000_0000]);
        assert_eq!(regs.r[0], 0x8000);
    }

    #[test]
    fn div_extreme_operands_wrap() {
        let mut bus = test_bus();
        let (regs, _) = swi(&mut bus, 0x06, &[i32::MIN as u32, (-1i32) as u32]);
        assert_eq!(regs.r[0], i32::MIN as u32);
        assert_eq!(regs.r[1], 0);
        assert_eq!(regs.r[3], 0x8000_0000);
        let (regs, _) = swi(&mut bus, 0x06, &[i32::MIN as u32, 0]);
        assert_eq!(regs.r[0] as i32, -1, "division by zero");
        assert_eq!(regs.r[1], i32::MIN as u32);
    }

    #[test]
    fn cpu_set_copies_and_fills() {
        let mut bus = test_bus();
        load(&mut bus, 0x0200_0000, &[1, 2, 3, 4, 5, 6, 7, 8]);
        swi(&mut bus, 0x0B, &[0x0200_0000, 0x0200_0100, 4]);
        assert_eq!(dump(&mut bus, 0x0200_0100, 8), [1, 2, 3, 4, 5, 6, 7, 8]);

        swi(&mut bus, 0x0B, &[0x0200_0000, 0x0300_0000, 3 | 1 << 24 | 1 << 26]);
        assert_eq!(bus.peek(0x0300_0008, Word), 0x0403_0201);
        assert_eq!(bus.peek(0x0300_000C, Word), 0, "count respected");
    }

    #[test]
    fn cpu_fast_set_rounds_up_to_eight_words() {
        let mut bus = test_bus();
        bus.poke(0x0200_0000, Word, 0xAABB_CCDD);
        swi(&mut bus, 0x0C, &[0x0200_0000, 0x0300_0000, 1 | 1 << 24]);
        assert_eq!(bus.peek(0x0300_001C, Word), 0xAABB_CCDD);
        assert_eq!(bus.peek(0x0300_0020, Word), 0);
    }

    #[test]
    fn lz77_expands_back_references() {
        let mut bus = test_bus();
        load(&mut bus, 0x0200_0000, &[0x10, 0x08, 0x00, 0x00, 0x20, b'A', b'B', 0x30, 0x01]);
        swi(&mut bus, 0x11, &[0x0200_0000, 0x0300_0000]);
        assert_eq!(dump(&mut bus, 0x0300_0000, 9), b"ABABABAB\0");

        swi(&mut bus, 0x12, &[0x0200_0000, 0x0600_0000]);
        assert_eq!(dump(&mut bus, 0x0600_0000, 8), b"ABABABAB", "VRAM variant writes halfwords");
    }

    #[test]
    fn run_length_expands_runs_and_literals() {
        let mut bus = test_bus();
        load(&mut bus, 0x0200_0000, &[0x30, 0x06, 0x00, 0x00, 0x82, b'A', 0x00, b'B']);
        swi(&mut bus, 0x14, &[0x0200_0000, 0x0300_0000]);
        assert_eq!(dump(&mut bus, 0x0300_0000, 6), b"AAAAAB");
    }

    #[test]
    fn diff_filters_accumulate() {
        let mut bus = test_bus();
        load(&mut bus, 0x0200_0000, &[0x81, 0x04, 0x00, 0x00, 10, 1, 1, 0xFF]);
        swi(&mut bus, 0x16, &[0x0200_0000, 0x0300_0000]);
        assert_eq!(dump(&mut bus, 0x0300_0000, 4), [10, 11, 12, 11]);
    }

    #[test]
    fn bit_unpack_widens_units() {
        let mut bus = test_bus();
        load(&mut bus, 0x0200_0000, &[0b1001_0110]);
        // 1 byte of 1-bit units to 4-bit units, offset 2 for non-zero units.
        load(&mut bus, 0x0200_0100, &[1, 0, 1, 4, 2, 0, 0, 0]);
        swi(&mut bus, 0x10, &[0x0200_0000, 0x0300_0000, 0x0200_0100]);
        assert_eq!(bus.peek(0x0300_0000, Word), 0x3003_0330);
    }

    #[test]
    fn obj_affine_set_identity() {
        let mut bus = test_bus();
        load(&mut bus, 0x0200_0000, &[0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);
        swi(&mut bus, 0x0F, &[0x0200_0000, 0x0300_0000, 1, 2]);
        let params: Vec<u32> = (0..4).map(|i| bus.peek(0x0300_0000 + 2 * i, Half)).collect();
        assert_eq!(params, [0x100, 0, 0, 0x100]);
    }

    #[test]
    fn checksum_and_unknown_calls() {
        let mut bus = test_bus();
        assert_eq!(swi(&mut bus, 0x0D, &[]).0.r[0], BIOS_CHECKSUM);
        assert!(matches!(swi(&mut bus, 0x2A, &[]).1, SwiOutcome::Handled { .. }));
    }

    #[test]
    fn intr_wait_retries_until_flagged() {
        let mut bus = test_bus();
        let (_, outcome) = swi(&mut bus, 0x05, &[]);
        assert!(matches!(outcome, SwiOutcome::Retry { .. }));
        assert!(bus.halted);
        assert!(bus.irq.ime());

        // Re-executed without the handler having flagged V-Blank.
        bus.halted = false;
        assert!(matches!(swi(&mut bus, 0x05, &[]).1, SwiOutcome::Retry { .. }));

        bus.halted = false;
        bus.poke(INTR_CHECK, Half, 0x0001);
        assert!(matches!(swi(&mut bus, 0x05, &[]).1, SwiOutcome::Handled { .. }));
        assert_eq!(bus.peek(INTR_CHECK, Half), 0, "flag consumed");
        assert!(!bus.halted);
    }

    #[test]
    fn soft_reset_clears_stack_area_and_branches() {
        let mut bus = test_bus();
        bus.poke(0x0300_7F00, Word, 0x1234_5678);
        let (regs, outcome) = swi(&mut bus, 0x00, &[]);
        assert!(matches!(outcome, SwiOutcome::Branch { .. }));
        assert_eq!(regs.r[15], CARTRIDGE_ENTRY);
        assert_eq!(bus.peek(0x0300_7F00, Word), 0);
    }
}
