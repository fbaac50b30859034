//! GamePak: ROM image, header metadata, backup memory and GPIO.

mod eeprom;
mod flash;
mod rtc;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::GbaConfig;
use crate::error::{GbaError, Result};
use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};

pub use eeprom::{Eeprom, EepromSize};
pub use flash::Flash;
pub use rtc::{Gpio, Rtc};

/// Largest ROM the GamePak address space can map.
pub const MAX_ROM_SIZE: usize = 32 * 1024 * 1024;

/// Header is 0xC0 bytes; the fixed value at 0xB2 must be 0x96.
const HEADER_SIZE: usize = 0xC0;
const FIXED_VALUE_OFFSET: usize = 0xB2;
const FIXED_VALUE: u8 = 0x96;
const CHECKSUM_OFFSET: usize = 0xBD;

const SRAM_SIZE: usize = 0x8000;

/// Save memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    None,
    /// 32 KiB battery-backed SRAM.
    Sram,
    /// 64 KiB flash (Panasonic ID).
    Flash64K,
    /// 128 KiB flash in two banks (Sanyo ID).
    Flash128K,
    /// EEPROM whose size is detected from the first DMA3 request.
    Eeprom,
    /// 4 Kbit (512 byte) EEPROM.
    Eeprom4K,
    /// 64 Kbit (8 KiB) EEPROM.
    Eeprom64K,
}

impl BackupKind {
    /// Size of the backing store in bytes (auto-sized EEPROM reserves the
    /// larger size).
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Sram => SRAM_SIZE,
            Self::Flash64K => 0x1_0000,
            Self::Flash128K => 0x2_0000,
            Self::Eeprom4K => 0x200,
            Self::Eeprom | Self::Eeprom64K => 0x2000,
        }
    }

    /// Detect from the library ID strings linked into the ROM.
    #[must_use]
    pub fn detect(rom: &[u8]) -> Self {
        const IDS: [(&[u8], BackupKind); 6] = [
            (b"EEPROM_V", BackupKind::Eeprom),
            (b"SRAM_F_V", BackupKind::Sram),
            (b"SRAM_V", BackupKind::Sram),
            (b"FLASH1M_V", BackupKind::Flash128K),
            (b"FLASH512_V", BackupKind::Flash64K),
            (b"FLASH_V", BackupKind::Flash64K),
        ];
        IDS.iter()
            .find(|(id, _)| contains(rom, id))
            .map_or(Self::None, |&(_, kind)| kind)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    // The ID strings are word aligned in every SDK build.
    (0..haystack.len())
        .step_by(4)
        .any(|i| haystack[i..].starts_with(needle))
}

/// Metadata read from the cartridge header and contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeInfo {
    pub title: String,
    /// Four-character game code, e.g. "AXVE".
    pub game_code: String,
    pub maker_code: String,
    pub version: u8,
    pub header_checksum_valid: bool,
    pub backup: BackupKind,
    pub backup_size: usize,
    pub has_rtc: bool,
    pub rom_size: usize,
    /// CRC-32 of the whole image.
    pub crc32: u32,
}

impl CartridgeInfo {
    /// Key under which persisted save memory is stored.
    #[must_use]
    pub fn save_key(&self) -> String {
        let code = if self.game_code.is_empty() { "NONE" } else { &self.game_code };
        format!("{code}-{:08x}", self.crc32)
    }
}

/// Save memory attached to the cartridge.
#[derive(Debug, Clone)]
pub enum Backup {
    None,
    Sram { data: Vec<u8>, dirty: bool },
    Flash(Flash),
    Eeprom(Eeprom),
}

impl Backup {
    fn new(kind: BackupKind) -> Self {
        match kind {
            BackupKind::None => Self::None,
            BackupKind::Sram => Self::Sram {
                data: vec![0xFF; SRAM_SIZE],
                dirty: false,
            },
            BackupKind::Flash64K => Self::Flash(Flash::new_64k()),
            BackupKind::Flash128K => Self::Flash(Flash::new_128k()),
            BackupKind::Eeprom => Self::Eeprom(Eeprom::new(None)),
            BackupKind::Eeprom4K => Self::Eeprom(Eeprom::new(Some(EepromSize::Small))),
            BackupKind::Eeprom64K => Self::Eeprom(Eeprom::new(Some(EepromSize::Large))),
        }
    }

    /// Byte read in the 0x0E000000 window.
    pub fn read_byte(&self, offset: u32) -> u8 {
        match self {
            Self::Sram { data, .. } => data[offset as usize & (SRAM_SIZE - 1)],
            Self::Flash(flash) => flash.read(offset),
            Self::None | Self::Eeprom(_) => 0xFF,
        }
    }

    /// Byte write in the 0x0E000000 window.
    pub fn write_byte(&mut self, offset: u32, value: u8) {
        match self {
            Self::Sram { data, dirty } => {
                data[offset as usize & (SRAM_SIZE - 1)] = value;
                *dirty = true;
            }
            Self::Flash(flash) => flash.write(offset, value),
            Self::None | Self::Eeprom(_) => {}
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::Sram { data, .. } => data,
            Self::Flash(flash) => flash.data(),
            Self::Eeprom(eeprom) => eeprom.data(),
        }
    }

    /// Replace the contents with persisted save memory. Images of the wrong
    /// size are ignored with a warning.
    pub fn load_data(&mut self, image: &[u8]) {
        let accepted = match self {
            Self::None => false,
            Self::Sram { data, .. } => copy_exact(data, image),
            Self::Flash(flash) => flash.load(image),
            Self::Eeprom(eeprom) => eeprom.load(image),
        };
        if !accepted {
            log::warn!("ignoring {} byte save image for {:?}", image.len(), self.kind());
        }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        match self {
            Self::None => false,
            Self::Sram { dirty, .. } => *dirty,
            Self::Flash(flash) => flash.is_dirty(),
            Self::Eeprom(eeprom) => eeprom.is_dirty(),
        }
    }

    pub fn clear_dirty(&mut self) {
        match self {
            Self::None => {}
            Self::Sram { dirty, .. } => *dirty = false,
            Self::Flash(flash) => flash.clear_dirty(),
            Self::Eeprom(eeprom) => eeprom.clear_dirty(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> BackupKind {
        match self {
            Self::None => BackupKind::None,
            Self::Sram { .. } => BackupKind::Sram,
            Self::Flash(flash) if flash.is_128k() => BackupKind::Flash128K,
            Self::Flash(_) => BackupKind::Flash64K,
            Self::Eeprom(eeprom) => match eeprom.size() {
                None => BackupKind::Eeprom,
                Some(EepromSize::Small) => BackupKind::Eeprom4K,
                Some(EepromSize::Large) => BackupKind::Eeprom64K,
            },
        }
    }
}

fn copy_exact(dst: &mut [u8], src: &[u8]) -> bool {
    if dst.len() != src.len() {
        return false;
    }
    dst.copy_from_slice(src);
    true
}

impl Snapshot for Backup {
    fn write_to(&self, w: &mut StateWriter) {
        match self {
            Self::None => {}
            Self::Sram { data, .. } => w.bytes(data),
            Self::Flash(flash) => flash.write_to(w),
            Self::Eeprom(eeprom) => eeprom.write_to(w),
        }
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> std::result::Result<(), SnapshotError> {
        match self {
            Self::None => Ok(()),
            Self::Sram { data, .. } => r.bytes_into(data),
            Self::Flash(flash) => flash.read_from(r),
            Self::Eeprom(eeprom) => eeprom.read_from(r),
        }
    }
}

/// A GamePak: immutable ROM shared for the session, plus its save memory
/// and GPIO port.
#[derive(Debug, Clone)]
pub struct Cartridge {
    rom: Arc<[u8]>,
    info: CartridgeInfo,
    pub backup: Backup,
    pub gpio: Option<Gpio>,
}

impl Cartridge {
    /// Parse and validate a ROM image.
    ///
    /// # Errors
    ///
    /// `MalformedCartridge` if the image is shorter than the header or the
    /// header's fixed byte is wrong; `UnsupportedMapperOrRegion` if it is
    /// larger than the GamePak address space.
    pub fn from_image(image: &[u8], config: &GbaConfig) -> Result<Self> {
        if image.len() < HEADER_SIZE {
            return Err(GbaError::MalformedCartridge(format!(
                "image is {} bytes, smaller than the {HEADER_SIZE}-byte header",
                image.len()
            )));
        }
        if image.len() > MAX_ROM_SIZE {
            return Err(GbaError::UnsupportedMapperOrRegion(format!(
                "image is {} bytes; the GamePak bus maps at most {MAX_ROM_SIZE}",
                image.len()
            )));
        }
        if image[FIXED_VALUE_OFFSET] != FIXED_VALUE {
            return Err(GbaError::MalformedCartridge(format!(
                "header byte 0xB2 is {:#04X}, expected 0x96",
                image[FIXED_VALUE_OFFSET]
            )));
        }

        let expected = header_checksum(image);
        let header_checksum_valid = image[CHECKSUM_OFFSET] == expected;
        let title = header_text(&image[0xA0..0xAC]);
        if !header_checksum_valid {
            log::warn!(
                "{title}: header checksum {:#04X} does not match computed {expected:#04X}",
                image[CHECKSUM_OFFSET]
            );
        }

        let backup = config.backup.unwrap_or_else(|| BackupKind::detect(image));
        let has_rtc = config.rtc.unwrap_or_else(|| contains(image, b"SIIRTC_V"));
        let info = CartridgeInfo {
            title,
            game_code: header_text(&image[0xAC..0xB0]),
            maker_code: header_text(&image[0xB0..0xB2]),
            version: image[0xBC],
            header_checksum_valid,
            backup,
            backup_size: backup.size(),
            has_rtc,
            rom_size: image.len(),
            crc32: crc32(image),
        };
        log::info!(
            "cartridge \"{}\" ({}), {} KiB, backup {:?}, rtc {}",
            info.title,
            info.game_code,
            info.rom_size / 1024,
            info.backup,
            info.has_rtc
        );

        Ok(Self {
            rom: Arc::from(image),
            info,
            backup: Backup::new(backup),
            gpio: has_rtc.then(|| Gpio::new(Rtc::new())),
        })
    }

    #[must_use]
    pub fn info(&self) -> &CartridgeInfo {
        &self.info
    }

    /// The same GamePak after a power cycle: save memory keeps its
    /// contents, every chip state machine starts over.
    #[must_use]
    pub fn power_cycled(&self) -> Self {
        let mut backup = Backup::new(self.backup.kind());
        if !self.backup.data().is_empty() {
            backup.load_data(self.backup.data());
        }
        Self {
            rom: Arc::clone(&self.rom),
            info: self.info.clone(),
            backup,
            gpio: self.info.has_rtc.then(|| Gpio::new(Rtc::new())),
        }
    }

    #[must_use]
    pub fn rom(&self) -> &Arc<[u8]> {
        &self.rom
    }

    /// Halfword of ROM at `offset` (within the 32 MiB window). Past the end
    /// of the image the GamePak bus returns the low address bits.
    #[must_use]
    pub fn read_rom_half(&self, offset: u32) -> u16 {
        let offset = offset & 0x01FF_FFFE;
        if let Some(gpio) = &self.gpio {
            if let Some(value) = gpio.read(offset) {
                return value;
            }
        }
        let at = offset as usize;
        match self.rom.get(at..at + 2) {
            Some(bytes) => u16::from_le_bytes([bytes[0], bytes[1]]),
            None => (offset >> 1) as u16,
        }
    }

    /// A write into ROM space: reaches the GPIO port, dropped otherwise.
    pub fn write_rom_half(&mut self, offset: u32, value: u16) {
        if let Some(gpio) = &mut self.gpio {
            gpio.write(offset & 0x01FF_FFFE, value);
        }
    }

    /// EEPROM is mapped at 0x0D000000, or only at its top 256 bytes for
    /// 32 MiB ROMs.
    #[must_use]
    pub fn is_eeprom_address(&self, address: u32) -> bool {
        matches!(self.backup, Backup::Eeprom(_))
            && (address >> 24) == 0x0D
            && (self.rom.len() <= 16 * 1024 * 1024 || address & 0x00FF_FF00 == 0x00FF_FF00)
    }
}

impl Snapshot for Cartridge {
    fn write_to(&self, w: &mut StateWriter) {
        self.backup.write_to(w);
        w.bool(self.gpio.is_some());
        if let Some(gpio) = &self.gpio {
            gpio.write_to(w);
        }
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> std::result::Result<(), SnapshotError> {
        self.backup.read_from(r)?;
        let has_gpio = r.bool()?;
        match (&mut self.gpio, has_gpio) {
            (Some(gpio), true) => gpio.read_from(r),
            (None, false) => Ok(()),
            _ => Err(SnapshotError::Invalid("GPIO presence differs")),
        }
    }
}

/// Header complement check over 0xA0..=0xBC.
#[must_use]
pub fn header_checksum(image: &[u8]) -> u8 {
    let sum = image[0xA0..=0xBC]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_sub(b));
    sum.wrapping_sub(0x19)
}

fn header_text(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { char::from(b) } else { '?' })
        .collect::<String>()
        .trim_end()
        .to_string()
}

const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
};

/// CRC-32 (IEEE 802.3).
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(!0u32, |crc, &b| {
        CRC_TABLE[((crc ^ u32::from(b)) & 0xFF) as usize] ^ (crc >> 8)
    })
}
