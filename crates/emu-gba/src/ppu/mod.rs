//! GBA PPU: scanline renderer and display timing.
//!
//! Line-based rendering. The scheduler calls in at three points per line;
//! the whole visible line is composited at the end of H-Draw.
//!
//! ## Line layout (1232 cycles)
//! - 0-959: H-Draw
//! - 960: line rendered into the back buffer
//! - 1006: H-Blank flag and IRQ
//! - 1232: next line
//!
//! ## Frame layout (228 lines)
//! - 0-159: visible
//! - 160-226: V-Blank (flag set); buffers swap on entry
//! - 227: V-Blank flag clear

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]

mod color;
mod render;
mod tiles;

pub use color::to_argb;

use crate::memory::Memory;
use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};
use tiles::TileCache;

pub const SCREEN_WIDTH: usize = 240;
pub const SCREEN_HEIGHT: usize = 160;

pub const CYCLES_PER_LINE: u64 = 1232;
pub const HDRAW_CYCLES: u64 = 960;
pub const HBLANK_FLAG_CYCLE: u64 = 1006;
pub const LINES_PER_FRAME: u16 = 228;
pub const CYCLES_PER_FRAME: u64 = CYCLES_PER_LINE * LINES_PER_FRAME as u64;

const VBLANK_START: u16 = 160;
const VBLANK_END: u16 = 227;

const STAT_VBLANK: u16 = 1 << 0;
const STAT_HBLANK: u16 = 1 << 1;
const STAT_VCOUNT: u16 = 1 << 2;
const STAT_VBLANK_IRQ: u16 = 1 << 3;
const STAT_HBLANK_IRQ: u16 = 1 << 4;
const STAT_VCOUNT_IRQ: u16 = 1 << 5;
const STAT_WRITABLE: u16 = 0xFF38;

/// Written reference points are 28-bit signed.
const REF_RANGE: core::ops::RangeInclusive<i32> = -(1 << 27)..=(1 << 27) - 1;
/// The running reference also carries up to one frame of PB/PD steps.
const INTERNAL_REF_RANGE: core::ops::RangeInclusive<i32> =
    -(1 << 27) - SCREEN_HEIGHT as i32 * 0x8000..=(1 << 27) - 1 + SCREEN_HEIGHT as i32 * 0x7FFF;

/// What a timing event asks of the rest of the machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineSignals {
    pub vblank_irq: bool,
    pub hblank_irq: bool,
    pub vcount_irq: bool,
    /// V-Blank started: trigger V-Blank DMA.
    pub vblank_start: bool,
    /// H-Blank of a visible line: trigger H-Blank DMA.
    pub hblank_dma: bool,
}

/// Display registers (0x04000000-0x04000054).
#[derive(Debug, Clone, Default)]
pub struct PpuRegisters {
    pub dispcnt: u16,
    pub green_swap: u16,
    pub bgcnt: [u16; 4],
    pub bghofs: [u16; 4],
    pub bgvofs: [u16; 4],
    /// BG2/BG3 affine parameters PA, PB, PC, PD (8.8 fixed point).
    pub bg_affine: [[i16; 4]; 2],
    /// BG2/BG3 reference point as written (20.8 fixed point).
    pub bg_ref: [[i32; 2]; 2],
    pub winh: [u16; 2],
    pub winv: [u16; 2],
    pub winin: u16,
    pub winout: u16,
    pub mosaic: u16,
    pub bldcnt: u16,
    pub bldalpha: u16,
    pub bldy: u16,
}

#[derive(Clone)]
pub struct Ppu {
    pub regs: PpuRegisters,
    dispstat: u16,
    vcount: u16,
    /// BG2/BG3 reference point as it advances down the frame.
    internal_ref: [[i32; 2]; 2],
    back: Vec<u32>,
    front: Vec<u32>,
    tiles: TileCache,
}

impl std::fmt::Debug for Ppu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ppu")
            .field("dispcnt", &self.regs.dispcnt)
            .field("dispstat", &self.dispstat)
            .field("vcount", &self.vcount)
            .finish_non_exhaustive()
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl Ppu {
    #[must_use]
    pub fn new() -> Self {
        let blank = vec![0xFF00_0000; SCREEN_WIDTH * SCREEN_HEIGHT];
        let mut regs = PpuRegisters::default();
        // Identity transform.
        regs.bg_affine = [[0x100, 0, 0, 0x100]; 2];
        Self {
            regs,
            dispstat: 0,
            vcount: 0,
            internal_ref: [[0; 2]; 2],
            back: blank.clone(),
            front: blank,
            tiles: TileCache::new(),
        }
    }

    /// The last completed frame, 240x160 ARGB8888.
    #[must_use]
    pub fn framebuffer(&self) -> &[u32] {
        &self.front
    }

    #[must_use]
    pub fn vcount(&self) -> u16 {
        self.vcount
    }

    #[must_use]
    pub fn dispstat(&self) -> u16 {
        self.dispstat
    }

    pub fn write_dispstat(&mut self, value: u16, mask: u16) {
        let mask = mask & STAT_WRITABLE;
        self.dispstat = (self.dispstat & !mask) | (value & mask);
    }

    /// BG2X/BG2Y/BG3X/BG3Y write; also reloads the running reference.
    /// `bg` is 0 for BG2, 1 for BG3; `axis` 0 for X, 1 for Y.
    pub fn write_bg_ref(&mut self, bg: usize, axis: usize, value: u32, mask: u32) {
        let current = self.regs.bg_ref[bg][axis] as u32;
        let raw = ((current & !mask) | (value & mask)) & 0x0FFF_FFFF;
        // Sign-extend from 28 bits.
        let signed = ((raw << 4) as i32) >> 4;
        self.regs.bg_ref[bg][axis] = signed;
        self.internal_ref[bg][axis] = signed;
    }

    /// A VRAM write at `offset` of `len` bytes.
    pub fn vram_written(&mut self, offset: usize, len: usize) {
        self.tiles.invalidate(offset, len);
    }

    /// Cycle 960: composite the current line if it is visible.
    pub fn hdraw_end(&mut self, mem: &Memory) {
        if usize::from(self.vcount) >= SCREEN_HEIGHT {
            return;
        }
        let y = usize::from(self.vcount);
        let mut line = [0u32; SCREEN_WIDTH];
        self.render_line(mem, y, &mut line);
        self.back[y * SCREEN_WIDTH..(y + 1) * SCREEN_WIDTH].copy_from_slice(&line);

        for bg in 0..2 {
            let [_, pb, _, pd] = self.regs.bg_affine[bg];
            self.internal_ref[bg][0] += i32::from(pb);
            self.internal_ref[bg][1] += i32::from(pd);
        }
    }

    /// Cycle 1006: H-Blank begins.
    pub fn hblank(&mut self) -> LineSignals {
        self.dispstat |= STAT_HBLANK;
        LineSignals {
            hblank_irq: self.dispstat & STAT_HBLANK_IRQ != 0,
            hblank_dma: self.vcount < VBLANK_START,
            ..LineSignals::default()
        }
    }

    /// Cycle 1232: advance to the next line.
    pub fn line_end(&mut self) -> LineSignals {
        let mut signals = LineSignals::default();
        self.dispstat &= !STAT_HBLANK;
        self.vcount = (self.vcount + 1) % LINES_PER_FRAME;

        match self.vcount {
            VBLANK_START => {
                self.dispstat |= STAT_VBLANK;
                signals.vblank_start = true;
                signals.vblank_irq = self.dispstat & STAT_VBLANK_IRQ != 0;
                std::mem::swap(&mut self.back, &mut self.front);
                self.internal_ref = self.regs.bg_ref;
            }
            VBLANK_END => self.dispstat &= !STAT_VBLANK,
            _ => {}
        }

        let target = self.dispstat >> 8;
        if self.vcount == target {
            self.dispstat |= STAT_VCOUNT;
            signals.vcount_irq = self.dispstat & STAT_VCOUNT_IRQ != 0;
        } else {
            self.dispstat &= !STAT_VCOUNT;
        }
        signals
    }
}

fn write_frame(w: &mut StateWriter, frame: &[u32]) {
    for &px in frame {
        w.u32(px);
    }
}

fn read_frame(r: &mut StateReader<'_>, frame: &mut [u32]) -> Result<(), SnapshotError> {
    for px in frame {
        *px = r.u32()?;
    }
    Ok(())
}

impl Snapshot for Ppu {
    fn write_to(&self, w: &mut StateWriter) {
        let regs = &self.regs;
        w.u16(regs.dispcnt);
        w.u16(regs.green_swap);
        for bg in 0..4 {
            w.u16(regs.bgcnt[bg]);
            w.u16(regs.bghofs[bg]);
            w.u16(regs.bgvofs[bg]);
        }
        for bg in 0..2 {
            for p in regs.bg_affine[bg] {
                w.u16(p as u16);
            }
            for axis in 0..2 {
                w.i32(regs.bg_ref[bg][axis]);
                w.i32(self.internal_ref[bg][axis]);
            }
        }
        for i in 0..2 {
            w.u16(regs.winh[i]);
            w.u16(regs.winv[i]);
        }
        w.u16(regs.winin);
        w.u16(regs.winout);
        w.u16(regs.mosaic);
        w.u16(regs.bldcnt);
        w.u16(regs.bldalpha);
        w.u16(regs.bldy);
        w.u16(self.dispstat);
        w.u16(self.vcount);
        write_frame(w, &self.back);
        write_frame(w, &self.front);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        let regs = &mut self.regs;
        regs.dispcnt = r.u16()?;
        regs.green_swap = r.u16()?;
        for bg in 0..4 {
            regs.bgcnt[bg] = r.u16()?;
            regs.bghofs[bg] = r.u16()?;
            regs.bgvofs[bg] = r.u16()?;
        }
        for bg in 0..2 {
            for p in &mut regs.bg_affine[bg] {
                *p = r.u16()? as i16;
            }
            for axis in 0..2 {
                regs.bg_ref[bg][axis] = r.i32()?;
                self.internal_ref[bg][axis] = r.i32()?;
                if !REF_RANGE.contains(&regs.bg_ref[bg][axis])
                    || !INTERNAL_REF_RANGE.contains(&self.internal_ref[bg][axis])
                {
                    return Err(SnapshotError::Invalid("affine reference point out of range"));
                }
            }
        }
        for i in 0..2 {
            regs.winh[i] = r.u16()?;
            regs.winv[i] = r.u16()?;
        }
        regs.winin = r.u16()?;
        regs.winout = r.u16()?;
        regs.mosaic = r.u16()?;
        regs.bldcnt = r.u16()?;
        regs.bldalpha = r.u16()?;
        regs.bldy = r.u16()?;
        self.dispstat = r.u16()?;
        self.vcount = r.u16()?;
        if self.vcount >= LINES_PER_FRAME {
            return Err(SnapshotError::Invalid("VCOUNT out of range"));
        }
        read_frame(r, &mut self.back)?;
        read_frame(r, &mut self.front)?;
        self.tiles.invalidate_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_lines(ppu: &mut Ppu, mem: &Memory, lines: usize) -> Vec<LineSignals> {
        let mut out = Vec::new();
        for _ in 0..lines {
            ppu.hdraw_end(mem);
            out.push(ppu.hblank());
            out.push(ppu.line_end());
        }
        out
    }

    #[test]
    fn frame_is_280896_cycles() {
        assert_eq!(CYCLES_PER_FRAME, 280_896);
    }

    #[test]
    fn vblank_flag_spans_lines_160_to_226() {
        let mem = Memory::new(&[]);
        let mut ppu = Ppu::new();
        run_lines(&mut ppu, &mem, 160);
        assert_eq!(ppu.vcount(), 160);
        assert_ne!(ppu.dispstat() & STAT_VBLANK, 0);
        run_lines(&mut ppu, &mem, 67);
        assert_eq!(ppu.vcount(), 227);
        assert_eq!(ppu.dispstat() & STAT_VBLANK, 0);
        run_lines(&mut ppu, &mem, 1);
        assert_eq!(ppu.vcount(), 0);
    }

    #[test]
    fn irqs_follow_enable_bits() {
        let mem = Memory::new(&[]);
        let mut ppu = Ppu::new();
        ppu.write_dispstat(STAT_VBLANK_IRQ | STAT_VCOUNT_IRQ | (5 << 8), 0xFFFF);
        let signals = run_lines(&mut ppu, &mem, 160);
        assert_eq!(signals.iter().filter(|s| s.vcount_irq).count(), 1);
        assert_eq!(signals.iter().filter(|s| s.hblank_irq).count(), 0);
        let last = signals.last().copied().unwrap_or_default();
        assert!(last.vblank_irq && last.vblank_start);
    }

    #[test]
    fn hblank_dma_only_on_visible_lines() {
        let mem = Memory::new(&[]);
        let mut ppu = Ppu::new();
        let signals = run_lines(&mut ppu, &mem, 228);
        assert_eq!(signals.iter().filter(|s| s.hblank_dma).count(), 160);
    }

    #[test]
    fn status_flags_are_read_only() {
        let mut ppu = Ppu::new();
        ppu.write_dispstat(0x0007, 0xFFFF);
        assert_eq!(ppu.dispstat() & 7, 0);
    }

    #[test]
    fn reference_point_sign_extends() {
        let mut ppu = Ppu::new();
        ppu.write_bg_ref(0, 0, 0x0FFF_FF00, u32::MAX);
        assert_eq!(ppu.regs.bg_ref[0][0], -256);
    }

    fn snapshot(ppu: &Ppu) -> Vec<u8> {
        let mut w = StateWriter::new();
        ppu.write_to(&mut w);
        w.into_inner()
    }

    #[test]
    fn snapshot_keeps_extreme_reference_points() {
        let mem = Memory::new(&[]);
        let mut ppu = Ppu::new();
        ppu.regs.bg_affine[0] = [0x100, -0x8000, 0, 0x7FFF];
        ppu.write_bg_ref(0, 0, 0x0800_0000, u32::MAX);
        ppu.write_bg_ref(0, 1, 0x07FF_FFFF, u32::MAX);
        run_lines(&mut ppu, &mem, 159);

        let data = snapshot(&ppu);
        let mut restored = Ppu::new();
        restored.read_from(&mut StateReader::new(&data)).expect("in range");
        assert_eq!(restored.regs.bg_ref[0], [-(1 << 27), (1 << 27) - 1]);
        assert_eq!(snapshot(&restored), data);
    }

    #[test]
    fn snapshot_rejects_reference_point_beyond_28_bits() {
        let mut ppu = Ppu::new();
        ppu.regs.bg_ref[1][0] = i32::MAX;
        let data = snapshot(&ppu);
        let mut restored = Ppu::new();
        assert!(matches!(
            restored.read_from(&mut StateReader::new(&data)),
            Err(SnapshotError::Invalid(_))
        ));

        let mut ppu = Ppu::new();
        ppu.internal_ref[0][1] = i32::MIN;
        let data = snapshot(&ppu);
        assert!(matches!(
            restored.read_from(&mut StateReader::new(&data)),
            Err(SnapshotError::Invalid(_))
        ));
    }
}
