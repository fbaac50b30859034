//! Internal memories and the region wait-state table.

use emu_core::{AccessKind, AccessWidth};

use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};

pub const BIOS_SIZE: usize = 0x4000;
pub const EWRAM_SIZE: usize = 0x4_0000;
pub const IWRAM_SIZE: usize = 0x8000;
pub const PALETTE_SIZE: usize = 0x400;
pub const VRAM_SIZE: usize = 0x1_8000;
pub const OAM_SIZE: usize = 0x400;

/// Base of the OBJ tile area in VRAM for bitmap modes 3-5.
pub const VRAM_OBJ_BITMAP: usize = 0x1_4000;
/// Base of the OBJ tile area in VRAM for tiled modes 0-2.
pub const VRAM_OBJ_TILED: usize = 0x1_0000;

/// Read `width` bytes little-endian from `mem` at `at` (already aligned
/// and in range).
#[must_use]
pub fn load(mem: &[u8], at: usize, width: AccessWidth) -> u32 {
    match width {
        AccessWidth::Byte => u32::from(mem[at]),
        AccessWidth::Half => u32::from(u16::from_le_bytes([mem[at], mem[at + 1]])),
        AccessWidth::Word => u32::from_le_bytes([mem[at], mem[at + 1], mem[at + 2], mem[at + 3]]),
    }
}

pub fn store(mem: &mut [u8], at: usize, width: AccessWidth, value: u32) {
    match width {
        AccessWidth::Byte => mem[at] = value as u8,
        AccessWidth::Half => mem[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes()),
        AccessWidth::Word => mem[at..at + 4].copy_from_slice(&value.to_le_bytes()),
    }
}

/// Offset into VRAM: the 96 KiB sit in a 128 KiB window whose last 32 KiB
/// mirror the OBJ area.
#[must_use]
pub fn vram_offset(address: u32) -> usize {
    let offset = address as usize & 0x1_FFFF;
    if offset >= VRAM_SIZE { offset - 0x8000 } else { offset }
}

#[derive(Debug, Clone)]
pub struct Memory {
    pub bios: Box<[u8]>,
    pub ewram: Box<[u8]>,
    pub iwram: Box<[u8]>,
    pub palette: Box<[u8]>,
    pub vram: Box<[u8]>,
    pub oam: Box<[u8]>,
}

impl Memory {
    #[must_use]
    pub fn new(bios: &[u8]) -> Self {
        let mut image = vec![0u8; BIOS_SIZE];
        let len = bios.len().min(BIOS_SIZE);
        image[..len].copy_from_slice(&bios[..len]);
        Self {
            bios: image.into_boxed_slice(),
            ewram: vec![0; EWRAM_SIZE].into_boxed_slice(),
            iwram: vec![0; IWRAM_SIZE].into_boxed_slice(),
            palette: vec![0; PALETTE_SIZE].into_boxed_slice(),
            vram: vec![0; VRAM_SIZE].into_boxed_slice(),
            oam: vec![0; OAM_SIZE].into_boxed_slice(),
        }
    }
}

impl Snapshot for Memory {
    fn write_to(&self, w: &mut StateWriter) {
        w.bytes(&self.ewram);
        w.bytes(&self.iwram);
        w.bytes(&self.palette);
        w.bytes(&self.vram);
        w.bytes(&self.oam);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        r.bytes_into(&mut self.ewram)?;
        r.bytes_into(&mut self.iwram)?;
        r.bytes_into(&mut self.palette)?;
        r.bytes_into(&mut self.vram)?;
        r.bytes_into(&mut self.oam)?;
        Ok(())
    }
}

/// Non-sequential first-access waits selectable in WAITCNT.
const ROM_N_WAITS: [u32; 4] = [4, 3, 2, 8];
/// Sequential waits for WS0, WS1, WS2 by the S bit.
const ROM_S_WAITS: [[u32; 2]; 3] = [[2, 1], [4, 1], [8, 1]];

/// Access cost per region (address bits 24-27), recomputed on WAITCNT
/// writes.
#[derive(Debug, Clone)]
pub struct WaitControl {
    waitcnt: u16,
    /// [kind][width] cycles, width index 0 = 8/16-bit, 1 = 32-bit.
    table: [[[u32; 2]; 2]; 16],
}

impl Default for WaitControl {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitControl {
    #[must_use]
    pub fn new() -> Self {
        let mut wait = Self {
            waitcnt: 0,
            table: [[[1; 2]; 2]; 16],
        };
        wait.rebuild();
        wait
    }

    #[must_use]
    pub fn waitcnt(&self) -> u16 {
        self.waitcnt
    }

    pub fn write_waitcnt(&mut self, value: u16, mask: u16) {
        // Bit 15 (cartridge type) is read-only.
        self.waitcnt = ((self.waitcnt & !mask) | (value & mask)) & 0x5FFF;
        self.rebuild();
    }

    fn set(&mut self, region: usize, n16: u32, s16: u32, n32: u32, s32: u32) {
        self.table[region] = [[n16, n32], [s16, s32]];
    }

    fn rebuild(&mut self) {
        let w = self.waitcnt;
        for region in 0..16 {
            self.set(region, 1, 1, 1, 1);
        }
        self.set(0x2, 3, 3, 6, 6);
        self.set(0x5, 1, 1, 2, 2);
        self.set(0x6, 1, 1, 2, 2);

        for ws in 0..3 {
            let n_bits = (w >> (2 + ws * 3)) & 3;
            let s_bit = (w >> (4 + ws * 3)) & 1;
            let n = 1 + ROM_N_WAITS[n_bits as usize];
            let s = 1 + ROM_S_WAITS[ws as usize][s_bit as usize];
            let region = 0x8 + ws as usize * 2;
            for r in [region, region + 1] {
                self.set(r, n, s, n + s, 2 * s);
            }
        }

        let sram = 1 + ROM_N_WAITS[(w & 3) as usize];
        for r in [0xE, 0xF] {
            self.set(r, sram, sram, sram, sram);
        }
    }

    /// Cycles for one access.
    #[must_use]
    pub fn cycles(&self, address: u32, width: AccessWidth, kind: AccessKind) -> u32 {
        let region = ((address >> 24) & 0xF) as usize;
        let k = usize::from(kind == AccessKind::Sequential);
        let wide = usize::from(width == AccessWidth::Word);
        self.table[region][k][wide]
    }
}

impl Snapshot for WaitControl {
    fn write_to(&self, w: &mut StateWriter) {
        w.u16(self.waitcnt);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.waitcnt = r.u16()? & 0x5FFF;
        self.rebuild();
        Ok(())
    }
}
