//! Cycle-counted Game Boy Advance emulator.
//!
//! The master clock is the ARM7TDMI's 16,777,216 Hz. Every subsystem is
//! expressed in those cycles: a scanline is 1232 cycles (960 draw + 272
//! blank), a frame is 228 lines = 280,896 cycles, and the audio mixer
//! emits one stereo sample every 512 cycles.
//!
//! [`Gba`] is the bare machine; [`Emulator`] wraps it with a cartridge
//! slot, a run/pause/stop lifecycle and persisted save memory.

mod apu;
mod bios;
mod bus;
mod cartridge;
mod config;
mod dma;
mod emulator;
mod error;
mod frame;
mod gba;
pub mod input;
pub mod io;
mod irq;
mod keypad;
mod memory;
mod ppu;
mod savestate;
mod scheduler;
mod storage;
mod timer;

pub use bus::GbaBus;
pub use cartridge::{Backup, BackupKind, Cartridge, CartridgeInfo};
pub use config::GbaConfig;
pub use emulator::{Emulator, RunState};
pub use error::{GbaError, Result};
pub use frame::{FrameFilter, FramebufferView, NearestFilter};
pub use gba::{CycleLedger, Gba};
pub use input::{Button, InputQueue};
pub use ppu::{CYCLES_PER_FRAME, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use storage::{DirectoryStorage, MemoryStorage, SaveStorage};
