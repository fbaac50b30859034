//! Test ROMs assembled in code.

#![allow(dead_code)]

use emu_gba::{Cartridge, Gba, GbaConfig};

/// `b .`
pub const SPIN: u32 = 0xEAFF_FFFE;
/// `mov r0, r0`
pub const NOP: u32 = 0xE1A0_0000;

/// A cartridge image with `code` at the entry point, a valid header and
/// `game_code` in the header.
pub fn rom_with_code(code: &[u32], game_code: &[u8; 4]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x1000];
    for (slot, word) in rom.chunks_exact_mut(4).zip(code) {
        slot.copy_from_slice(&word.to_le_bytes());
    }
    rom[0xA0..0xAC].copy_from_slice(b"TEST ROM\0\0\0\0");
    rom[0xAC..0xB0].copy_from_slice(game_code);
    rom[0xB0..0xB2].copy_from_slice(b"01");
    rom[0xB2] = 0x96;
    let sum = rom[0xA0..=0xBC].iter().fold(0u8, |acc, &b| acc.wrapping_sub(b));
    rom[0xBD] = sum.wrapping_sub(0x19);
    rom
}

pub fn rom(code: &[u32]) -> Vec<u8> {
    rom_with_code(code, b"ATST")
}

/// Place `words` at byte `offset` of `rom`.
pub fn patch(rom: &mut [u8], offset: usize, words: &[u32]) {
    for (i, word) in words.iter().enumerate() {
        let at = offset + i * 4;
        rom[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }
}

pub fn machine(image: &[u8]) -> Gba {
    let config = GbaConfig::default();
    let cartridge = Cartridge::from_image(image, &config).expect("valid test rom");
    Gba::new(&config, cartridge).expect("machine")
}

/// Increments the word at 0x03000000 forever.
pub fn counter_rom() -> Vec<u8> {
    rom(&[
        0xE3A0_0403, // mov r0, #0x03000000
        0xE590_1000, // loop: ldr r1, [r0]
        0xE281_1001, //       add r1, r1, #1
        0xE580_1000, //       str r1, [r0]
        0xEAFF_FFFB, //       b loop
    ])
}
