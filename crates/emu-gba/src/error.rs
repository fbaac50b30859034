//! Host-facing errors.
//!
//! Guest-visible anomalies (unmapped reads, misaligned access, undefined
//! opcodes) never show up here; they are emulated. These are failures of
//! the host's inputs: images, save states and arguments.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GbaError {
    #[error("malformed cartridge: {0}")]
    MalformedCartridge(String),
    #[error("unsupported cartridge: {0}")]
    UnsupportedMapperOrRegion(String),
    #[error("save state version {found} is not supported (expected {expected})")]
    SaveStateVersionMismatch { found: u32, expected: u32 },
    #[error("save state truncated: needed {needed} bytes, {available} available")]
    SaveStateTruncated { needed: usize, available: usize },
    #[error("save state corrupt: {0}")]
    SaveStateCorrupt(String),
    #[error("save state belongs to another cartridge ({0})")]
    SaveStateCartridgeMismatch(String),
    #[error("invalid button or player index: {0}")]
    InvalidButtonOrPlayerIndex(String),
    #[error("BIOS image must be 16384 bytes, got {0}")]
    InvalidBios(usize),
    #[error("no cartridge inserted")]
    NoCartridge,
    #[error(transparent)]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GbaError>;
