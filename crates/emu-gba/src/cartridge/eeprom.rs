//! Serial EEPROM backup, driven one bit per halfword access (normally by
//! DMA3).
//!
//! Requests start with two command bits (`11` read, `10` write) followed by
//! a 6-bit (4 Kbit part) or 14-bit (64 Kbit part) block address, MSB first.
//! A read request ends with a stop bit, after which the chip sends four
//! dummy bits and 64 data bits. A write request carries the 64 data bits
//! and then the stop bit.

use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromSize {
    /// 4 Kbit: 64 blocks, 6 address bits.
    Small,
    /// 64 Kbit: 1024 blocks, 14 address bits.
    Large,
}

impl EepromSize {
    const fn address_bits(self) -> u32 {
        match self {
            Self::Small => 6,
            Self::Large => 14,
        }
    }

    const fn bytes(self) -> usize {
        match self {
            Self::Small => 0x200,
            Self::Large => 0x2000,
        }
    }

    /// Infer the part from a DMA block length: read requests are 9 or 17
    /// bits long, write requests 73 or 81.
    #[must_use]
    pub const fn from_transfer_length(units: u16) -> Option<Self> {
        match units {
            9 | 73 => Some(Self::Small),
            17 | 81 => Some(Self::Large),
            _ => None,
        }
    }
}

const DUMMY_BITS: u32 = 4;
const DATA_BITS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Receiving,
    Sending { block: usize, bit: u32 },
}

#[derive(Debug, Clone)]
pub struct Eeprom {
    data: Vec<u8>,
    size: Option<EepromSize>,
    state: State,
    bits: u32,
    command: u8,
    address: usize,
    value: u64,
    dirty: bool,
}

impl Eeprom {
    /// `None` sizes the part on the first DMA request.
    #[must_use]
    pub fn new(size: Option<EepromSize>) -> Self {
        Self {
            data: vec![0xFF; size.unwrap_or(EepromSize::Large).bytes()],
            size,
            state: State::Receiving,
            bits: 0,
            command: 0,
            address: 0,
            value: 0,
            dirty: false,
        }
    }

    #[must_use]
    pub fn size(&self) -> Option<EepromSize> {
        self.size
    }

    /// Fix the part size from a DMA3 block length, if still unknown.
    pub fn size_hint(&mut self, units: u16) {
        if self.size.is_some() {
            return;
        }
        if let Some(size) = EepromSize::from_transfer_length(units) {
            log::info!("eeprom: detected {size:?} part from {units}-unit transfer");
            self.set_size(size);
        }
    }

    fn set_size(&mut self, size: EepromSize) {
        self.size = Some(size);
        self.data.resize(size.bytes(), 0xFF);
        // A read begun against the default large part keeps streaming from
        // the block it wraps to on the smaller one.
        if let State::Sending { block, bit } = self.state {
            self.state = State::Sending { block: block & self.block_mask(), bit };
        }
    }

    fn effective_size(&self) -> EepromSize {
        self.size.unwrap_or(EepromSize::Large)
    }

    fn block_mask(&self) -> usize {
        self.effective_size().bytes() / 8 - 1
    }

    fn reset_request(&mut self) {
        self.bits = 0;
        self.command = 0;
        self.address = 0;
        self.value = 0;
    }

    pub fn write(&mut self, value: u16) {
        if let State::Sending { .. } = self.state {
            self.state = State::Receiving;
            self.reset_request();
        }
        let bit = value & 1;
        self.bits += 1;
        let address_end = 2 + self.effective_size().address_bits();

        if self.bits <= 2 {
            self.command = (self.command << 1) | bit as u8;
            if self.bits == 2 && self.command & 0b10 == 0 {
                self.reset_request();
            }
        } else if self.bits <= address_end {
            self.address = (self.address << 1) | usize::from(bit);
        } else if self.command == 0b11 {
            // Stop bit of a read request.
            self.state = State::Sending {
                block: self.address & self.block_mask(),
                bit: 0,
            };
            self.reset_request();
        } else if self.bits <= address_end + DATA_BITS {
            self.value = (self.value << 1) | u64::from(bit);
        } else {
            let at = (self.address & self.block_mask()) * 8;
            self.data[at..at + 8].copy_from_slice(&self.value.to_be_bytes());
            self.dirty = true;
            self.reset_request();
        }
    }

    pub fn read(&mut self) -> u16 {
        match self.state {
            State::Receiving => 1,
            State::Sending { block, bit } => {
                let out = if bit < DUMMY_BITS {
                    0
                } else {
                    let n = bit - DUMMY_BITS;
                    let byte = self.data[block * 8 + (n / 8) as usize];
                    u16::from((byte >> (7 - n % 8)) & 1)
                };
                self.state = if bit + 1 == DUMMY_BITS + DATA_BITS {
                    State::Receiving
                } else {
                    State::Sending { block, bit: bit + 1 }
                };
                out
            }
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Accepts either part size while the size is undetermined.
    pub fn load(&mut self, image: &[u8]) -> bool {
        if self.size.is_none() {
            if image.len() == EepromSize::Small.bytes() {
                self.set_size(EepromSize::Small);
            } else if image.len() == EepromSize::Large.bytes() {
                self.set_size(EepromSize::Large);
            }
        }
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

impl Snapshot for Eeprom {
    fn write_to(&self, w: &mut StateWriter) {
        w.u8(match self.size {
            None => 0,
            Some(EepromSize::Small) => 1,
            Some(EepromSize::Large) => 2,
        });
        w.vec(&self.data);
        match self.state {
            State::Receiving => w.bool(false),
            State::Sending { block, bit } => {
                w.bool(true);
                w.u32(block as u32);
                w.u32(bit);
            }
        }
        w.u32(self.bits);
        w.u8(self.command);
        w.u32(self.address as u32);
        w.u64(self.value);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        let size = match r.u8()? {
            0 => None,
            1 => Some(EepromSize::Small),
            2 => Some(EepromSize::Large),
            _ => return Err(SnapshotError::Invalid("eeprom size")),
        };
        let data = r.vec()?;
        if data.len() != size.unwrap_or(EepromSize::Large).bytes() {
            return Err(SnapshotError::Invalid("eeprom data length"));
        }
        self.size = size;
        self.data = data;
        self.state = if r.bool()? {
            let block = r.u32()? as usize;
            let bit = r.u32()?;
            if block > self.block_mask() || bit >= DUMMY_BITS + DATA_BITS {
                return Err(SnapshotError::Invalid("eeprom transfer cursor"));
            }
            State::Sending { block, bit }
        } else {
            State::Receiving
        };
        self.bits = r.u32()?;
        self.command = r.u8()?;
        self.address = r.u32()? as usize;
        self.value = r.u64()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_bits(eeprom: &mut Eeprom, value: u64, count: u32) {
        for i in (0..count).rev() {
            eeprom.write(((value >> i) & 1) as u16);
        }
    }

    fn write_block(eeprom: &mut Eeprom, address_bits: u32, block: u64, data: u64) {
        send_bits(eeprom, 0b10, 2);
        send_bits(eeprom, block, address_bits);
        send_bits(eeprom, data, 64);
        send_bits(eeprom, 0, 1);
    }

    fn read_block(eeprom: &mut Eeprom, address_bits: u32, block: u64) -> u64 {
        send_bits(eeprom, 0b11, 2);
        send_bits(eeprom, block, address_bits);
        send_bits(eeprom, 0, 1);
        for _ in 0..4 {
            assert_eq!(eeprom.read(), 0, "dummy bits");
        }
        (0..64).fold(0u64, |acc, _| (acc << 1) | u64::from(eeprom.read()))
    }

    #[test]
    fn write_then_read_small_part() {
        let mut eeprom = Eeprom::new(Some(EepromSize::Small));
        write_block(&mut eeprom, 6, 5, 0x0123_4567_89AB_CDEF);
        assert!(eeprom.is_dirty());
        assert_eq!(eeprom.read(), 1, "ready after write");
        assert_eq!(read_block(&mut eeprom, 6, 5), 0x0123_4567_89AB_CDEF);
        assert_eq!(&eeprom.data()[40..42], &[0x01, 0x23]);
    }

    #[test]
    fn large_part_uses_fourteen_address_bits() {
        let mut eeprom = Eeprom::new(Some(EepromSize::Large));
        write_block(&mut eeprom, 14, 0x3FF, 0xFEED_FACE_0000_0001);
        assert_eq!(read_block(&mut eeprom, 14, 0x3FF), 0xFEED_FACE_0000_0001);
    }

    #[test]
    fn size_detected_from_transfer_length() {
        let mut eeprom = Eeprom::new(None);
        eeprom.size_hint(9);
        assert_eq!(eeprom.size(), Some(EepromSize::Small));
        assert_eq!(eeprom.data().len(), 0x200);
        eeprom.size_hint(81);
        assert_eq!(eeprom.size(), Some(EepromSize::Small), "first detection sticks");
    }

    #[test]
    fn persisted_image_sizes_unknown_part() {
        let mut eeprom = Eeprom::new(None);
        assert!(eeprom.load(&[0u8; 0x200]));
        assert_eq!(eeprom.size(), Some(EepromSize::Small));
        assert!(!eeprom.load(&[0u8; 0x100]));
    }

    #[test]
    fn shrinking_during_a_read_stays_in_bounds() {
        let mut eeprom = Eeprom::new(None);
        write_block(&mut eeprom, 14, 0x3C5, 0xAAAA_5555_AAAA_5555);
        send_bits(&mut eeprom, 0b11, 2);
        send_bits(&mut eeprom, 0x3C5, 14);
        send_bits(&mut eeprom, 0, 1);
        for _ in 0..4 {
            assert_eq!(eeprom.read(), 0, "dummy bits");
        }

        eeprom.size_hint(9);
        assert_eq!(eeprom.data().len(), 0x200);
        // Block 0x3C5 wraps to 0x05 on a 64-block part, still erased.
        let value = (0..64).fold(0u64, |acc, _| (acc << 1) | u64::from(eeprom.read()));
        assert_eq!(value, u64::MAX);
        assert_eq!(eeprom.read(), 1, "ready after the transfer");
    }
}
