//! JEDEC-style flash backup (64 KiB single bank or 128 KiB in two banks).

use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};

const BANK_SIZE: usize = 0x1_0000;
const SECTOR_SIZE: usize = 0x1000;

/// Panasonic MN63F805MNP.
const ID_64K: [u8; 2] = [0x32, 0x1B];
/// Sanyo LE26FV10N1TS.
const ID_128K: [u8; 2] = [0x62, 0x13];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Ready,
    /// Got 0xAA at 0x5555.
    Unlock1,
    /// Got 0x55 at 0x2AAA; the next write at 0x5555 is a command.
    Unlock2,
    /// The next write programs one byte.
    Program,
    /// The next write to 0x0000 selects the bank.
    BankSelect,
}

impl Mode {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Unlock1 => 1,
            Self::Unlock2 => 2,
            Self::Program => 3,
            Self::BankSelect => 4,
        }
    }

    const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Ready),
            1 => Some(Self::Unlock1),
            2 => Some(Self::Unlock2),
            3 => Some(Self::Program),
            4 => Some(Self::BankSelect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Flash {
    data: Vec<u8>,
    bank: usize,
    mode: Mode,
    id_mode: bool,
    erase_armed: bool,
    dirty: bool,
}

impl Flash {
    #[must_use]
    pub fn new_64k() -> Self {
        Self::with_size(BANK_SIZE)
    }

    #[must_use]
    pub fn new_128k() -> Self {
        Self::with_size(2 * BANK_SIZE)
    }

    fn with_size(size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
            bank: 0,
            mode: Mode::Ready,
            id_mode: false,
            erase_armed: false,
            dirty: false,
        }
    }

    #[must_use]
    pub fn is_128k(&self) -> bool {
        self.data.len() > BANK_SIZE
    }

    fn id(&self) -> [u8; 2] {
        if self.is_128k() { ID_128K } else { ID_64K }
    }

    #[must_use]
    pub fn read(&self, offset: u32) -> u8 {
        let offset = offset as usize & 0xFFFF;
        if self.id_mode && offset < 2 {
            return self.id()[offset];
        }
        self.data[self.bank * BANK_SIZE + offset]
    }

    pub fn write(&mut self, offset: u32, value: u8) {
        let offset = offset as usize & 0xFFFF;
        match self.mode {
            Mode::Program => {
                self.data[self.bank * BANK_SIZE + offset] = value;
                self.dirty = true;
                self.mode = Mode::Ready;
            }
            Mode::BankSelect => {
                if offset == 0 && self.is_128k() {
                    self.bank = usize::from(value & 1);
                }
                self.mode = Mode::Ready;
            }
            Mode::Ready => {
                if offset == 0x5555 && value == 0xAA {
                    self.mode = Mode::Unlock1;
                } else if value == 0xF0 {
                    self.id_mode = false;
                }
            }
            Mode::Unlock1 => {
                self.mode = if offset == 0x2AAA && value == 0x55 {
                    Mode::Unlock2
                } else {
                    Mode::Ready
                };
            }
            Mode::Unlock2 => {
                self.mode = Mode::Ready;
                self.command(offset, value);
            }
        }
    }

    fn command(&mut self, offset: usize, value: u8) {
        match (offset, value) {
            (0x5555, 0x90) => self.id_mode = true,
            (0x5555, 0xF0) => self.id_mode = false,
            (0x5555, 0x80) => self.erase_armed = true,
            (0x5555, 0x10) if self.erase_armed => {
                self.data.fill(0xFF);
                self.erase_armed = false;
                self.dirty = true;
            }
            (_, 0x30) if self.erase_armed => {
                let start = self.bank * BANK_SIZE + (offset & !(SECTOR_SIZE - 1));
                self.data[start..start + SECTOR_SIZE].fill(0xFF);
                self.erase_armed = false;
                self.dirty = true;
            }
            (0x5555, 0xA0) => self.mode = Mode::Program,
            (0x5555, 0xB0) if self.is_128k() => self.mode = Mode::BankSelect,
            _ => log::debug!("flash: ignored command {value:#04X} at {offset:#06X}"),
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn load(&mut self, image: &[u8]) -> bool {
        if image.len() != self.data.len() {
            return false;
        }
        self.data.copy_from_slice(image);
        true
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl Snapshot for Flash {
    fn write_to(&self, w: &mut StateWriter) {
        w.bytes(&self.data);
        w.u8(self.bank as u8);
        w.u8(self.mode.to_u8());
        w.bool(self.id_mode);
        w.bool(self.erase_armed);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        r.bytes_into(&mut self.data)?;
        self.bank = usize::from(r.u8()? & 1);
        if !self.is_128k() {
            self.bank = 0;
        }
        self.mode = Mode::from_u8(r.u8()?).ok_or(SnapshotError::Invalid("flash mode"))?;
        self.id_mode = r.bool()?;
        self.erase_armed = r.bool()?;
        Ok(())
    }
}
