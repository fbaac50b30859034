//! Decoded tile-row cache.
//!
//! Each 8-pixel tile row is decoded from packed 4bpp or 8bpp VRAM into one
//! palette index per pixel the first time it is drawn. A VRAM write drops
//! every cached row of the tile(s) it touched.

use crate::memory::VRAM_SIZE;

const TILES_4BPP: usize = VRAM_SIZE / 32;
const TILES_8BPP: usize = VRAM_SIZE / 64;

#[derive(Debug, Clone)]
pub struct TileCache {
    rows4: Vec<[u8; 8]>,
    valid4: Vec<u8>,
    rows8: Vec<[u8; 8]>,
    valid8: Vec<u8>,
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows4: vec![[0; 8]; TILES_4BPP * 8],
            valid4: vec![0; TILES_4BPP],
            rows8: vec![[0; 8]; TILES_8BPP * 8],
            valid8: vec![0; TILES_8BPP],
        }
    }

    /// Forget the tiles overlapping `len` bytes written at VRAM `offset`.
    pub fn invalidate(&mut self, offset: usize, len: usize) {
        if offset >= VRAM_SIZE || len == 0 {
            return;
        }
        let last = (offset + len - 1).min(VRAM_SIZE - 1);
        for at in [offset, last] {
            self.valid4[at / 32] = 0;
            self.valid8[at / 64] = 0;
        }
    }

    pub fn invalidate_all(&mut self) {
        self.valid4.fill(0);
        self.valid8.fill(0);
    }

    /// Palette indices (0-15) of row `row` of the 4bpp tile starting at VRAM
    /// byte `base`.
    pub fn row_4bpp(&mut self, vram: &[u8], base: usize, row: usize) -> [u8; 8] {
        let tile = (base / 32) % TILES_4BPP;
        let slot = tile * 8 + row;
        if self.valid4[tile] & (1 << row) == 0 {
            let at = tile * 32 + row * 4;
            let mut out = [0u8; 8];
            for (i, &byte) in vram[at..at + 4].iter().enumerate() {
                out[i * 2] = byte & 0xF;
                out[i * 2 + 1] = byte >> 4;
            }
            self.rows4[slot] = out;
            self.valid4[tile] |= 1 << row;
        }
        self.rows4[slot]
    }

    /// Palette indices (0-255) of row `row` of the 8bpp tile starting at VRAM
    /// byte `base`.
    pub fn row_8bpp(&mut self, vram: &[u8], base: usize, row: usize) -> [u8; 8] {
        if base % 64 != 0 {
            // OBJ tiles are numbered in 32-byte units, so an odd 8bpp tile
            // straddles two cache slots; read it directly.
            let at = (base + row * 8) % VRAM_SIZE;
            let mut out = [0u8; 8];
            out.copy_from_slice(&vram[at..at + 8]);
            return out;
        }
        let tile = (base / 64) % TILES_8BPP;
        let slot = tile * 8 + row;
        if self.valid8[tile] & (1 << row) == 0 {
            let at = tile * 64 + row * 8;
            let mut out = [0u8; 8];
            out.copy_from_slice(&vram[at..at + 8]);
            self.rows8[slot] = out;
            self.valid8[tile] |= 1 << row;
        }
        self.rows8[slot]
    }
}
