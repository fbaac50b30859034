//! The four PSG channels.

#![allow(clippy::cast_possible_truncation)]

use crate::savestate::{SnapshotError, StateReader, StateWriter};

const DUTY: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

/// Volume envelope (NRx2-style register bits 8-15).
#[derive(Debug, Clone, Copy, Default)]
pub struct Envelope {
    pub volume: u8,
    timer: u8,
}

impl Envelope {
    fn trigger(&mut self, reg: u16) {
        self.volume = (reg >> 12) as u8;
        self.timer = ((reg >> 8) & 7) as u8;
    }

    fn clock(&mut self, reg: u16) {
        let period = ((reg >> 8) & 7) as u8;
        if period == 0 {
            return;
        }
        if self.timer > 1 {
            self.timer -= 1;
            return;
        }
        self.timer = period;
        if reg & 0x0800 != 0 {
            if self.volume < 15 {
                self.volume += 1;
            }
        } else if self.volume > 0 {
            self.volume -= 1;
        }
    }

    /// A register with zero initial volume and decrease mode turns the DAC off.
    fn dac_on(reg: u16) -> bool {
        reg & 0xF800 != 0
    }

    fn save(&self, w: &mut StateWriter) {
        w.u8(self.volume);
        w.u8(self.timer);
    }

    fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.volume = r.u8()? & 0xF;
        self.timer = r.u8()?;
        Ok(())
    }
}

/// Square channel 1 (with sweep) or 2.
#[derive(Debug, Clone, Default)]
pub struct Square {
    pub has_sweep: bool,
    pub sweep_reg: u16,
    pub duty_reg: u16,
    pub freq_reg: u16,
    pub enabled: bool,
    length: u16,
    envelope: Envelope,
    step: u8,
    countdown: u32,
    sweep_timer: u8,
    sweep_freq: u16,
    sweep_on: bool,
}

impl Square {
    #[must_use]
    pub fn new(has_sweep: bool) -> Self {
        Self {
            has_sweep,
            ..Self::default()
        }
    }

    fn period(&self) -> u32 {
        16 * (2048 - u32::from(self.freq_reg & 0x7FF))
    }

    pub fn write_duty(&mut self, value: u16, reload_length: bool) {
        self.duty_reg = value;
        if reload_length {
            self.length = 64 - (value & 0x3F);
        }
        if !Envelope::dac_on(value) {
            self.enabled = false;
        }
    }

    pub fn write_freq(&mut self, value: u16) {
        self.freq_reg = value & 0x47FF;
        if value & 0x8000 != 0 {
            self.trigger();
        }
    }

    fn trigger(&mut self) {
        self.enabled = Envelope::dac_on(self.duty_reg);
        if self.length == 0 {
            self.length = 64;
        }
        self.envelope.trigger(self.duty_reg);
        self.countdown = self.period();
        if self.has_sweep {
            self.sweep_freq = self.freq_reg & 0x7FF;
            let period = ((self.sweep_reg >> 4) & 7) as u8;
            self.sweep_timer = if period == 0 { 8 } else { period };
            self.sweep_on = period != 0 || self.sweep_reg & 7 != 0;
            if self.sweep_reg & 7 != 0 && self.sweep_target() > 2047 {
                self.enabled = false;
            }
        }
    }

    fn sweep_target(&self) -> u16 {
        let delta = self.sweep_freq >> (self.sweep_reg & 7);
        if self.sweep_reg & 0x8 != 0 {
            self.sweep_freq.saturating_sub(delta)
        } else {
            self.sweep_freq + delta
        }
    }

    pub fn clock_length(&mut self) {
        if self.freq_reg & 0x4000 != 0 && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock(self.duty_reg);
    }

    pub fn clock_sweep(&mut self) {
        if !self.has_sweep || !self.sweep_on {
            return;
        }
        if self.sweep_timer > 1 {
            self.sweep_timer -= 1;
            return;
        }
        let period = ((self.sweep_reg >> 4) & 7) as u8;
        self.sweep_timer = if period == 0 { 8 } else { period };
        if period == 0 {
            return;
        }
        let target = self.sweep_target();
        if target > 2047 {
            self.enabled = false;
        } else if self.sweep_reg & 7 != 0 {
            self.sweep_freq = target;
            self.freq_reg = (self.freq_reg & !0x7FF) | target;
            if self.sweep_target() > 2047 {
                self.enabled = false;
            }
        }
    }

    pub fn advance(&mut self, mut cycles: u32) {
        while cycles >= self.countdown {
            cycles -= self.countdown;
            self.countdown = self.period();
            self.step = (self.step + 1) & 7;
        }
        self.countdown -= cycles;
    }

    /// Current output level, 0-15.
    #[must_use]
    pub fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        DUTY[usize::from((self.duty_reg >> 6) & 3)][usize::from(self.step)] * self.envelope.volume
    }

    pub fn save(&self, w: &mut StateWriter) {
        w.u16(self.sweep_reg);
        w.u16(self.duty_reg);
        w.u16(self.freq_reg);
        w.bool(self.enabled);
        w.u16(self.length);
        self.envelope.save(w);
        w.u8(self.step);
        w.u32(self.countdown);
        w.u8(self.sweep_timer);
        w.u16(self.sweep_freq);
        w.bool(self.sweep_on);
    }

    pub fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.sweep_reg = r.u16()?;
        self.duty_reg = r.u16()?;
        self.freq_reg = r.u16()?;
        self.enabled = r.bool()?;
        self.length = r.u16()?;
        self.envelope.load(r)?;
        self.step = r.u8()? & 7;
        self.countdown = r.u32()?.max(1);
        self.sweep_timer = r.u8()?;
        self.sweep_freq = r.u16()? & 0x7FF;
        self.sweep_on = r.bool()?;
        Ok(())
    }
}

/// Wave channel 3: two 32-sample 4-bit banks.
#[derive(Debug, Clone, Default)]
pub struct Wave {
    pub control: u16,
    pub length_reg: u16,
    pub freq_reg: u16,
    pub enabled: bool,
    /// Both banks, 16 bytes each.
    pub ram: [u8; 32],
    length: u16,
    position: u8,
    countdown: u32,
}

impl Wave {
    /// A silent channel holding `ram` (wave RAM survives a power-off).
    #[must_use]
    pub fn with_ram(ram: [u8; 32]) -> Self {
        Self { ram, ..Self::default() }
    }

    fn period(&self) -> u32 {
        8 * (2048 - u32::from(self.freq_reg & 0x7FF))
    }

    /// The bank the CPU sees at 0x04000090 is the one not selected for
    /// playback.
    fn cpu_bank(&self) -> usize {
        if self.control & 0x40 != 0 { 0 } else { 16 }
    }

    #[must_use]
    pub fn read_ram(&self, offset: usize) -> u8 {
        self.ram[self.cpu_bank() + (offset & 15)]
    }

    pub fn write_ram(&mut self, offset: usize, value: u8) {
        let bank = self.cpu_bank();
        self.ram[bank + (offset & 15)] = value;
    }

    pub fn write_control(&mut self, value: u16) {
        self.control = value & 0xE0;
        if value & 0x80 == 0 {
            self.enabled = false;
        }
    }

    pub fn write_length(&mut self, value: u16, reload_length: bool) {
        self.length_reg = value & 0xE0FF;
        if reload_length {
            self.length = 256 - (value & 0xFF);
        }
    }

    pub fn write_freq(&mut self, value: u16) {
        self.freq_reg = value & 0x47FF;
        if value & 0x8000 != 0 {
            self.enabled = self.control & 0x80 != 0;
            if self.length == 0 {
                self.length = 256;
            }
            self.position = 0;
            self.countdown = self.period();
        }
    }

    pub fn clock_length(&mut self) {
        if self.freq_reg & 0x4000 != 0 && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    pub fn advance(&mut self, mut cycles: u32) {
        let samples = if self.control & 0x20 != 0 { 64 } else { 32 };
        while cycles >= self.countdown {
            cycles -= self.countdown;
            self.countdown = self.period();
            self.position = (self.position + 1) % samples;
        }
        self.countdown -= cycles;
    }

    /// Current output level, 0-15 after the volume shift.
    #[must_use]
    pub fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        let play_bank = if self.control & 0x40 != 0 { 16 } else { 0 };
        let index = usize::from(self.position);
        // 64-sample mode plays the selected bank then the other one.
        let byte_at = (play_bank + index / 2) % 32;
        let byte = self.ram[byte_at];
        let sample = if index % 2 == 0 { byte >> 4 } else { byte & 0xF };
        if self.length_reg & 0x8000 != 0 {
            return sample * 3 / 4;
        }
        match (self.length_reg >> 13) & 3 {
            0 => 0,
            1 => sample,
            2 => sample >> 1,
            _ => sample >> 2,
        }
    }

    pub fn save(&self, w: &mut StateWriter) {
        w.u16(self.control);
        w.u16(self.length_reg);
        w.u16(self.freq_reg);
        w.bool(self.enabled);
        w.bytes(&self.ram);
        w.u16(self.length);
        w.u8(self.position);
        w.u32(self.countdown);
    }

    pub fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.control = r.u16()?;
        self.length_reg = r.u16()?;
        self.freq_reg = r.u16()?;
        self.enabled = r.bool()?;
        r.bytes_into(&mut self.ram)?;
        self.length = r.u16()?;
        self.position = r.u8()? % 64;
        self.countdown = r.u32()?.max(1);
        Ok(())
    }
}

/// Noise channel 4: 15- or 7-bit LFSR.
#[derive(Debug, Clone)]
pub struct Noise {
    pub envelope_reg: u16,
    pub control: u16,
    pub enabled: bool,
    length: u16,
    envelope: Envelope,
    lfsr: u16,
    countdown: u32,
}

impl Default for Noise {
    fn default() -> Self {
        Self {
            envelope_reg: 0,
            control: 0,
            enabled: false,
            length: 0,
            envelope: Envelope::default(),
            lfsr: 0x7FFF,
            countdown: 16,
        }
    }
}

impl Noise {
    fn period(&self) -> u32 {
        let ratio = u32::from(self.control & 7);
        let base = if ratio == 0 { 16 } else { 32 * ratio };
        base << (((self.control >> 4) & 0xF) + 1)
    }

    pub fn write_envelope(&mut self, value: u16, reload_length: bool) {
        self.envelope_reg = value & 0xFF3F;
        if reload_length {
            self.length = 64 - (value & 0x3F);
        }
        if !Envelope::dac_on(value) {
            self.enabled = false;
        }
    }

    pub fn write_control(&mut self, value: u16) {
        self.control = value & 0x40FF;
        if value & 0x8000 != 0 {
            self.enabled = Envelope::dac_on(self.envelope_reg);
            if self.length == 0 {
                self.length = 64;
            }
            self.envelope.trigger(self.envelope_reg);
            self.lfsr = if self.control & 0x8 != 0 { 0x7F } else { 0x7FFF };
            self.countdown = self.period();
        }
    }

    pub fn clock_length(&mut self) {
        if self.control & 0x4000 != 0 && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock(self.envelope_reg);
    }

    pub fn advance(&mut self, mut cycles: u32) {
        while cycles >= self.countdown {
            cycles -= self.countdown;
            self.countdown = self.period();
            let carry = self.lfsr & 1;
            self.lfsr >>= 1;
            if carry != 0 {
                self.lfsr ^= if self.control & 0x8 != 0 { 0x60 } else { 0x6000 };
            }
        }
        self.countdown -= cycles;
    }

    #[must_use]
    pub fn output(&self) -> u8 {
        if !self.enabled || self.lfsr & 1 == 0 {
            return 0;
        }
        self.envelope.volume
    }

    pub fn save(&self, w: &mut StateWriter) {
        w.u16(self.envelope_reg);
        w.u16(self.control);
        w.bool(self.enabled);
        w.u16(self.length);
        self.envelope.save(w);
        w.u16(self.lfsr);
        w.u32(self.countdown);
    }

    pub fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.envelope_reg = r.u16()?;
        self.control = r.u16()?;
        self.enabled = r.bool()?;
        self.length = r.u16()?;
        self.envelope.load(r)?;
        self.lfsr = r.u16()?;
        self.countdown = r.u32()?.max(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_steps_through_duty_cycle() {
        let mut sq = Square::new(false);
        sq.write_duty(0xF080, true); // volume 15, 50% duty
        sq.write_freq(0x8000 | 2047); // period 16 cycles per step
        let mut levels = Vec::new();
        for _ in 0..8 {
            levels.push(sq.output());
            sq.advance(16);
        }
        assert_eq!(levels, vec![15, 0, 0, 0, 0, 15, 15, 15]);
    }

    #[test]
    fn length_counter_silences() {
        let mut sq = Square::new(false);
        sq.write_duty(0xF03F, true); // length 1
        sq.write_freq(0xC000);
        assert!(sq.enabled);
        sq.clock_length();
        assert!(!sq.enabled);
    }

    #[test]
    fn zero_volume_decrease_is_dac_off() {
        let mut noise = Noise::default();
        noise.write_envelope(0x0000, true);
        noise.write_control(0x8000);
        assert!(!noise.enabled);
    }

    #[test]
    fn envelope_decays() {
        let mut sq = Square::new(false);
        sq.write_duty(0x2100, true); // volume 2, decrease, period 1
        sq.write_freq(0x8000);
        sq.clock_envelope();
        assert_eq!(sq.envelope.volume, 1);
        sq.clock_envelope();
        sq.clock_envelope();
        assert_eq!(sq.envelope.volume, 0);
    }

    #[test]
    fn sweep_overflow_disables() {
        let mut sq = Square::new(true);
        sq.sweep_reg = 0x0011; // period 1, shift 1, increase
        sq.write_duty(0xF000, true);
        sq.write_freq(0x8000 | 1200);
        assert!(sq.enabled);
        sq.clock_sweep();
        assert_eq!(sq.freq_reg & 0x7FF, 1800);
        assert!(!sq.enabled, "next step 1800 + 900 overflows");
    }

    #[test]
    fn wave_ram_banking() {
        let mut wave = Wave::default();
        wave.write_control(0x0000); // playing bank 0, CPU sees bank 1
        wave.write_ram(0, 0xAB);
        assert_eq!(wave.ram[16], 0xAB);
        wave.write_control(0x0040);
        assert_eq!(wave.read_ram(0), 0x00, "now CPU sees bank 0");
    }

    #[test]
    fn noise_lfsr_short_mode() {
        let mut noise = Noise::default();
        noise.write_envelope(0xF000, true);
        noise.write_control(0x8008);
        let period = noise.period();
        let mut ones = 0;
        for _ in 0..127 {
            if noise.output() != 0 {
                ones += 1;
            }
            noise.advance(period);
        }
        assert_eq!(ones, 64, "7-bit maximal sequence");
    }
}
