//! Cartridge GPIO port with an S-3511 compatible real-time clock.
//!
//! The port lives in ROM space at 0x080000C4 (data), 0xC6 (direction) and
//! 0xC8 (control; bit 0 makes the port readable). The RTC hangs off three
//! pins: SCK (bit 0), SIO (bit 1) and CS (bit 2). Bits are clocked on the
//! rising edge of SCK while CS is high, LSB first.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};

const PIN_SCK: u8 = 1 << 0;
const PIN_SIO: u8 = 1 << 1;
const PIN_CS: u8 = 1 << 2;

const REG_DATA: u32 = 0xC4;
const REG_DIRECTION: u32 = 0xC6;
const REG_CONTROL: u32 = 0xC8;

/// Status register bit: 24-hour mode.
const STATUS_24H: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reset,
    DateTime,
    ForceIrq,
    Status,
    Time,
    Unknown,
}

impl Command {
    const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Reset,
            2 => Self::DateTime,
            3 => Self::ForceIrq,
            4 => Self::Status,
            6 => Self::Time,
            _ => Self::Unknown,
        }
    }

    const fn data_bytes(self) -> usize {
        match self {
            Self::Reset | Self::ForceIrq | Self::Unknown => 0,
            Self::Status => 1,
            Self::Time => 3,
            Self::DateTime => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Idle,
    /// Shifting in the command byte.
    Command,
    /// Shifting in register data from the GBA.
    Receive,
    /// Shifting register data out to the GBA.
    Send,
}

/// Seconds since the Unix epoch, read when the guest asks for the time.
pub type Clock = fn() -> u64;

fn host_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[derive(Debug, Clone)]
pub struct Rtc {
    transfer: Transfer,
    command: Command,
    shift: u8,
    bit: u32,
    buffer: [u8; 7],
    byte: usize,
    status: u8,
    sio_out: bool,
    clock: Clock,
}

impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}

impl Rtc {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(host_clock)
    }

    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            transfer: Transfer::Idle,
            command: Command::Unknown,
            shift: 0,
            bit: 0,
            buffer: [0; 7],
            byte: 0,
            status: STATUS_24H,
            sio_out: true,
            clock,
        }
    }

    /// Drive the pins. `pins` holds the levels the GBA outputs, `previous`
    /// the levels before this write.
    fn update(&mut self, previous: u8, pins: u8) {
        if pins & PIN_CS == 0 {
            self.transfer = Transfer::Idle;
            return;
        }
        if previous & PIN_CS == 0 {
            self.transfer = Transfer::Command;
            self.shift = 0;
            self.bit = 0;
        }
        let rising = previous & PIN_SCK == 0 && pins & PIN_SCK != 0;
        if !rising {
            return;
        }
        match self.transfer {
            Transfer::Idle => {}
            Transfer::Command | Transfer::Receive => {
                if pins & PIN_SIO != 0 {
                    self.shift |= 1 << self.bit;
                }
                self.bit += 1;
                if self.bit == 8 {
                    let byte = self.shift;
                    self.shift = 0;
                    self.bit = 0;
                    if self.transfer == Transfer::Command {
                        self.begin_command(byte);
                    } else {
                        self.receive_byte(byte);
                    }
                }
            }
            Transfer::Send => {
                let byte = self.buffer[self.byte];
                self.sio_out = (byte >> self.bit) & 1 != 0;
                self.bit += 1;
                if self.bit == 8 {
                    self.bit = 0;
                    self.byte += 1;
                    if self.byte >= self.command.data_bytes() {
                        self.transfer = Transfer::Idle;
                    }
                }
            }
        }
    }

    fn begin_command(&mut self, byte: u8) {
        // Low nibble is the fixed code 0110; bits 4-6 the register; bit 7
        // the direction (1 = read).
        if byte & 0x0F != 0x06 {
            log::debug!("rtc: bad command byte {byte:#04X}");
            self.transfer = Transfer::Idle;
            return;
        }
        self.command = Command::from_bits((byte >> 4) & 7);
        let reading = byte & 0x80 != 0;
        self.byte = 0;
        match self.command {
            Command::Reset => {
                self.status = STATUS_24H;
                self.transfer = Transfer::Idle;
            }
            Command::ForceIrq | Command::Unknown => self.transfer = Transfer::Idle,
            _ if reading => {
                self.fill_buffer();
                self.transfer = Transfer::Send;
            }
            _ => self.transfer = Transfer::Receive,
        }
    }

    fn receive_byte(&mut self, byte: u8) {
        if self.command == Command::Status && self.byte == 0 {
            self.status = byte & 0x6A;
        }
        // Writes to the clock itself are accepted and dropped; the time
        // always follows the host.
        self.byte += 1;
        if self.byte >= self.command.data_bytes() {
            self.transfer = Transfer::Idle;
        }
    }

    fn fill_buffer(&mut self) {
        match self.command {
            Command::Status => self.buffer[0] = self.status,
            Command::DateTime => self.buffer = self.date_time(),
            Command::Time => {
                let dt = self.date_time();
                self.buffer[..3].copy_from_slice(&dt[4..7]);
            }
            _ => {}
        }
    }

    /// Year, month, day, weekday, hour, minute, second in BCD.
    fn date_time(&self) -> [u8; 7] {
        let secs = (self.clock)();
        let days = (secs / 86_400) as i64;
        let rem = secs % 86_400;
        let (year, month, day) = civil_from_days(days);
        // 1970-01-01 was a Thursday; the RTC counts Sunday as 0.
        let weekday = ((days + 4).rem_euclid(7)) as u8;
        let hour = (rem / 3600) as u8;
        let hour_reg = if self.status & STATUS_24H != 0 {
            bcd(hour)
        } else {
            bcd(hour % 12) | if hour >= 12 { 0x80 } else { 0 }
        };
        [
            bcd((year.rem_euclid(100)) as u8),
            bcd(month),
            bcd(day),
            bcd(weekday),
            hour_reg,
            bcd(((rem / 60) % 60) as u8),
            bcd((rem % 60) as u8),
        ]
    }
}

fn bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// Gregorian date from days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// The GPIO port registers.
#[derive(Debug, Clone)]
pub struct Gpio {
    data: u8,
    direction: u8,
    readable: bool,
    rtc: Rtc,
}

impl Gpio {
    #[must_use]
    pub fn new(rtc: Rtc) -> Self {
        Self {
            data: 0,
            direction: 0,
            readable: false,
            rtc,
        }
    }

    /// A read of ROM offset `offset`. `None` when the port is write-only or
    /// the offset is not a port register, so the ROM shows through.
    #[must_use]
    pub fn read(&self, offset: u32) -> Option<u16> {
        if !self.readable {
            return None;
        }
        match offset {
            REG_DATA => {
                let mut pins = self.data & self.direction;
                if self.direction & PIN_SIO == 0 && self.rtc.sio_out {
                    pins |= PIN_SIO;
                }
                Some(u16::from(pins))
            }
            REG_DIRECTION => Some(u16::from(self.direction)),
            REG_CONTROL => Some(u16::from(self.readable)),
            _ => None,
        }
    }

    pub fn write(&mut self, offset: u32, value: u16) {
        let value = (value & 0xF) as u8;
        match offset {
            REG_DATA => {
                let previous = self.data;
                self.data = (self.data & !self.direction) | (value & self.direction);
                self.rtc.update(previous, self.data);
            }
            REG_DIRECTION => self.direction = value,
            REG_CONTROL => self.readable = value & 1 != 0,
            _ => {}
        }
    }
}

impl Snapshot for Gpio {
    fn write_to(&self, w: &mut StateWriter) {
        w.u8(self.data);
        w.u8(self.direction);
        w.bool(self.readable);
        let rtc = &self.rtc;
        w.u8(match rtc.transfer {
            Transfer::Idle => 0,
            Transfer::Command => 1,
            Transfer::Receive => 2,
            Transfer::Send => 3,
        });
        w.u8(match rtc.command {
            Command::Reset => 0,
            Command::DateTime => 2,
            Command::ForceIrq => 3,
            Command::Status => 4,
            Command::Time => 6,
            Command::Unknown => 7,
        });
        w.u8(rtc.shift);
        w.u32(rtc.bit);
        w.bytes(&rtc.buffer);
        w.u8(rtc.byte as u8);
        w.u8(rtc.status);
        w.bool(rtc.sio_out);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.data = r.u8()? & 0xF;
        self.direction = r.u8()? & 0xF;
        self.readable = r.bool()?;
        let rtc = &mut self.rtc;
        rtc.transfer = match r.u8()? {
            0 => Transfer::Idle,
            1 => Transfer::Command,
            2 => Transfer::Receive,
            3 => Transfer::Send,
            _ => return Err(SnapshotError::Invalid("rtc transfer state")),
        };
        rtc.command = Command::from_bits(r.u8()? & 7);
        rtc.shift = r.u8()?;
        rtc.bit = r.u32()? & 7;
        r.bytes_into(&mut rtc.buffer)?;
        rtc.byte = usize::from(r.u8()?).min(7);
        if rtc.transfer == Transfer::Send && rtc.byte >= rtc.command.data_bytes() {
            return Err(SnapshotError::Invalid("rtc transfer cursor"));
        }
        rtc.status = r.u8()?;
        rtc.sio_out = r.bool()?;
        Ok(())
    }
}
