//! Sound: four PSG channels plus the two 8-bit DMA FIFOs.
//!
//! Channels are advanced lazily, by the cycles elapsed since the last
//! register write or output sample. Two scheduler events drive the rest: the
//! 512 Hz frame sequencer and one event per output sample.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

mod channels;

use channels::{Noise, Square, Wave};

use emu_core::MasterClock;

use crate::savestate::{Snapshot, SnapshotError, StateReader, StateWriter};
use crate::scheduler::{EventKind, Scheduler};

const CLOCK_HZ: u64 = MasterClock::GBA.frequency_hz;
const SEQUENCER_PERIOD: u64 = CLOCK_HZ / 512;
const FIFO_CAPACITY: usize = 32;
/// A FIFO asks for DMA once this many bytes or fewer remain.
const FIFO_REFILL_LEVEL: usize = 16;
/// Stereo samples kept when the host is not draining (about two seconds).
const MAX_BUFFERED: usize = 2 * 2 * 48_000;

pub const FIFO_A_ADDRESS: u32 = 0x0400_00A0;
pub const FIFO_B_ADDRESS: u32 = 0x0400_00A4;

#[derive(Debug, Clone, Copy, Default)]
struct Fifo {
    data: [i8; FIFO_CAPACITY],
    read: usize,
    len: usize,
    /// Sample currently being output.
    current: i8,
}

impl Fifo {
    fn push(&mut self, byte: u8) {
        if self.len == FIFO_CAPACITY {
            return;
        }
        self.data[(self.read + self.len) % FIFO_CAPACITY] = byte as i8;
        self.len += 1;
    }

    fn pop(&mut self) {
        if self.len > 0 {
            self.current = self.data[self.read];
            self.read = (self.read + 1) % FIFO_CAPACITY;
            self.len -= 1;
        }
    }

    fn reset(&mut self) {
        self.read = 0;
        self.len = 0;
    }
}

#[derive(Debug, Clone)]
pub struct Apu {
    square1: Square,
    square2: Square,
    wave: Wave,
    noise: Noise,
    soundcnt_l: u16,
    soundcnt_h: u16,
    master_enable: bool,
    soundbias: u16,
    fifos: [Fifo; 2],
    last_advance: u64,
    sequencer_step: u8,
    sample_rate: u32,
    sample_remainder: u64,
    samples: Vec<i16>,
}

impl Apu {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            square1: Square::new(true),
            square2: Square::new(false),
            wave: Wave::default(),
            noise: Noise::default(),
            soundcnt_l: 0,
            soundcnt_h: 0,
            master_enable: false,
            soundbias: 0x200,
            fifos: [Fifo::default(); 2],
            last_advance: 0,
            sequencer_step: 0,
            sample_rate: sample_rate.max(1),
            sample_remainder: 0,
            samples: Vec::new(),
        }
    }

    /// Book the sequencer and the first output sample.
    pub fn start(&mut self, scheduler: &mut Scheduler) {
        self.last_advance = scheduler.now();
        scheduler.schedule_in(EventKind::ApuSequencer, SEQUENCER_PERIOD);
        let delay = self.next_sample_delay();
        scheduler.schedule_in(EventKind::ApuSample, delay);
    }

    fn next_sample_delay(&mut self) -> u64 {
        let rate = u64::from(self.sample_rate);
        let total = CLOCK_HZ + self.sample_remainder;
        self.sample_remainder = total % rate;
        total / rate
    }

    fn catch_up(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_advance);
        self.last_advance = now;
        if !self.master_enable || elapsed == 0 {
            return;
        }
        let cycles = u32::try_from(elapsed).unwrap_or(u32::MAX);
        self.square1.advance(cycles);
        self.square2.advance(cycles);
        self.wave.advance(cycles);
        self.noise.advance(cycles);
    }

    /// Register read; `offset` is relative to 0x04000000.
    #[must_use]
    pub fn read(&self, offset: u32) -> u16 {
        match offset {
            0x60 => self.square1.sweep_reg & 0x7F,
            0x62 => self.square1.duty_reg & 0xFFC0,
            0x64 => self.square1.freq_reg & 0x4000,
            0x68 => self.square2.duty_reg & 0xFFC0,
            0x6C => self.square2.freq_reg & 0x4000,
            0x70 => self.wave.control & 0xE0,
            0x72 => self.wave.length_reg & 0xE000,
            0x74 => self.wave.freq_reg & 0x4000,
            0x78 => self.noise.envelope_reg & 0xFF00,
            0x7C => self.noise.control & 0x40FF,
            0x80 => self.soundcnt_l & 0xFF77,
            0x82 => self.soundcnt_h & 0x770F,
            0x84 => self.soundcnt_x(),
            0x88 => self.soundbias,
            0x90..=0x9F => {
                let i = (offset - 0x90) as usize;
                u16::from_le_bytes([self.wave.read_ram(i), self.wave.read_ram(i + 1)])
            }
            _ => 0,
        }
    }

    fn soundcnt_x(&self) -> u16 {
        let mut value = u16::from(self.master_enable) << 7;
        for (bit, on) in [
            self.square1.enabled,
            self.square2.enabled,
            self.wave.enabled,
            self.noise.enabled,
        ]
        .into_iter()
        .enumerate()
        {
            value |= u16::from(on) << bit;
        }
        value
    }

    /// Register write under a byte-lane mask, at cycle `now`.
    pub fn write(&mut self, offset: u32, value: u16, mask: u16, now: u64) {
        self.catch_up(now);
        let merge = |old: u16| (old & !mask) | (value & mask);
        let length_written = mask & 0x00FF != 0;

        // With the master switch off the PSG registers ignore writes.
        if !self.master_enable && (0x60..0x84).contains(&offset) {
            return;
        }

        match offset {
            0x60 => self.square1.sweep_reg = merge(self.square1.sweep_reg) & 0x7F,
            0x62 => {
                let v = merge(self.square1.duty_reg);
                self.square1.write_duty(v, length_written);
            }
            0x64 => {
                let v = merge(self.square1.freq_reg);
                self.square1.write_freq(v);
            }
            0x68 => {
                let v = merge(self.square2.duty_reg);
                self.square2.write_duty(v, length_written);
            }
            0x6C => {
                let v = merge(self.square2.freq_reg);
                self.square2.write_freq(v);
            }
            0x70 => {
                let v = merge(self.wave.control);
                self.wave.write_control(v);
            }
            0x72 => {
                let v = merge(self.wave.length_reg);
                self.wave.write_length(v, length_written);
            }
            0x74 => {
                let v = merge(self.wave.freq_reg);
                self.wave.write_freq(v);
            }
            0x78 => {
                let v = merge(self.noise.envelope_reg);
                self.noise.write_envelope(v, length_written);
            }
            0x7C => {
                let v = merge(self.noise.control);
                self.noise.write_control(v);
            }
            0x80 => self.soundcnt_l = merge(self.soundcnt_l) & 0xFF77,
            0x82 => {
                let v = merge(self.soundcnt_h);
                self.soundcnt_h = v & 0x770F;
                if v & 0x0800 != 0 {
                    self.fifos[0].reset();
                }
                if v & 0x8000 != 0 {
                    self.fifos[1].reset();
                }
            }
            0x84 => {
                if mask & 0x00FF != 0 {
                    self.set_master_enable(value & 0x80 != 0);
                }
            }
            0x88 => self.soundbias = merge(self.soundbias) & 0xC3FE,
            0x90..=0x9F => {
                let i = (offset - 0x90) as usize;
                let [lo, hi] = value.to_le_bytes();
                if mask & 0x00FF != 0 {
                    self.wave.write_ram(i, lo);
                }
                if mask & 0xFF00 != 0 {
                    self.wave.write_ram(i + 1, hi);
                }
            }
            _ => {}
        }
    }

    fn set_master_enable(&mut self, on: bool) {
        if self.master_enable && !on {
            let ram = self.wave.ram;
            self.square1 = Square::new(true);
            self.square2 = Square::new(false);
            self.wave = Wave::with_ram(ram);
            self.noise = Noise::default();
            self.soundcnt_l = 0;
            self.fifos = [Fifo::default(); 2];
        }
        self.master_enable = on;
    }

    /// Push the written bytes of a FIFO halfword.
    pub fn write_fifo(&mut self, fifo: usize, value: u16, mask: u16) {
        let [lo, hi] = value.to_le_bytes();
        if mask & 0x00FF != 0 {
            self.fifos[fifo].push(lo);
        }
        if mask & 0xFF00 != 0 {
            self.fifos[fifo].push(hi);
        }
    }

    /// Number of bytes queued in a FIFO.
    #[must_use]
    pub fn fifo_len(&self, fifo: usize) -> usize {
        self.fifos[fifo].len
    }

    /// Timer `timer` overflowed: each FIFO clocked by it takes its next
    /// sample. Returns the FIFO addresses that now need a DMA refill.
    pub fn timer_overflow(&mut self, timer: usize) -> [Option<u32>; 2] {
        let mut refill = [None; 2];
        if self.master_enable {
            for (i, address) in [FIFO_A_ADDRESS, FIFO_B_ADDRESS].into_iter().enumerate() {
                let select = (self.soundcnt_h >> (10 + 4 * i)) & 1;
                if usize::from(select) != timer {
                    continue;
                }
                self.fifos[i].pop();
                if self.fifos[i].len <= FIFO_REFILL_LEVEL {
                    refill[i] = Some(address);
                }
            }
        }
        refill
    }

    /// 512 Hz step: length at 256 Hz, sweep at 128 Hz, envelope at 64 Hz.
    pub fn sequencer(&mut self, at: u64, scheduler: &mut Scheduler) {
        self.catch_up(at);
        if self.master_enable {
            let step = self.sequencer_step;
            if step % 2 == 0 {
                self.square1.clock_length();
                self.square2.clock_length();
                self.wave.clock_length();
                self.noise.clock_length();
            }
            if step == 2 || step == 6 {
                self.square1.clock_sweep();
            }
            if step == 7 {
                self.square1.clock_envelope();
                self.square2.clock_envelope();
                self.noise.clock_envelope();
            }
        }
        self.sequencer_step = (self.sequencer_step + 1) & 7;
        scheduler.schedule(EventKind::ApuSequencer, at + SEQUENCER_PERIOD);
    }

    /// Mix one stereo output sample.
    pub fn sample(&mut self, at: u64, scheduler: &mut Scheduler) {
        self.catch_up(at);
        let (left, right) = self.mix();
        if self.samples.len() + 2 <= MAX_BUFFERED {
            self.samples.push(left);
            self.samples.push(right);
        }
        let delay = self.next_sample_delay();
        scheduler.schedule(EventKind::ApuSample, at + delay);
    }

    fn mix(&self) -> (i16, i16) {
        if !self.master_enable {
            return (0, 0);
        }
        let levels = [
            i32::from(self.square1.output()),
            i32::from(self.square2.output()),
            i32::from(self.wave.output()),
            i32::from(self.noise.output()),
        ];
        let psg_shift = match self.soundcnt_h & 3 {
            0 => 2,
            1 => 1,
            _ => 0,
        };
        let mut out = [0i32; 2];
        for (side, total) in out.iter_mut().enumerate() {
            // side 0 = left, 1 = right
            let enables = if side == 0 { self.soundcnt_l >> 12 } else { self.soundcnt_l >> 8 };
            let volume = if side == 0 { (self.soundcnt_l >> 4) & 7 } else { self.soundcnt_l & 7 };
            let psg: i32 = levels
                .iter()
                .enumerate()
                .filter(|(ch, _)| enables & (1 << ch) != 0)
                .map(|(_, level)| level)
                .sum();
            *total = (psg * (i32::from(volume) + 1)) >> psg_shift;

            for (fifo, state) in self.fifos.iter().enumerate() {
                let routing = self.soundcnt_h >> (8 + 4 * fifo);
                let routed = if side == 0 { routing & 2 != 0 } else { routing & 1 != 0 };
                if routed {
                    let full = self.soundcnt_h & (1 << (2 + fifo)) != 0;
                    *total += i32::from(state.current) * if full { 4 } else { 2 };
                }
            }
        }
        let bias = i32::from(self.soundbias & 0x3FE);
        let convert = |v: i32| (((v + bias).clamp(0, 0x3FF) - 0x200) * 64) as i16;
        (convert(out[0]), convert(out[1]))
    }

    /// Drain interleaved stereo samples produced so far.
    pub fn take_samples(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.samples)
    }
}

impl Snapshot for Apu {
    fn write_to(&self, w: &mut StateWriter) {
        self.square1.save(w);
        self.square2.save(w);
        self.wave.save(w);
        self.noise.save(w);
        w.u16(self.soundcnt_l);
        w.u16(self.soundcnt_h);
        w.bool(self.master_enable);
        w.u16(self.soundbias);
        for fifo in &self.fifos {
            for &b in &fifo.data {
                w.u8(b as u8);
            }
            w.u8(fifo.read as u8);
            w.u8(fifo.len as u8);
            w.u8(fifo.current as u8);
        }
        w.u64(self.last_advance);
        w.u8(self.sequencer_step);
        w.u64(self.sample_remainder);
    }

    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError> {
        self.square1.load(r)?;
        self.square2.load(r)?;
        self.wave.load(r)?;
        self.noise.load(r)?;
        self.soundcnt_l = r.u16()?;
        self.soundcnt_h = r.u16()?;
        self.master_enable = r.bool()?;
        self.soundbias = r.u16()?;
        for fifo in &mut self.fifos {
            for b in &mut fifo.data {
                *b = r.u8()? as i8;
            }
            fifo.read = usize::from(r.u8()?) % FIFO_CAPACITY;
            fifo.len = usize::from(r.u8()?);
            if fifo.len > FIFO_CAPACITY {
                return Err(SnapshotError::Invalid("audio FIFO length"));
            }
            fifo.current = r.u8()? as i8;
        }
        self.last_advance = r.u64()?;
        self.sequencer_step = r.u8()? & 7;
        self.sample_remainder = r.u64()?;
        if self.sample_remainder >= u64::from(self.sample_rate) {
            return Err(SnapshotError::Invalid("audio sample phase out of range"));
        }
        self.samples.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_apu() -> Apu {
        let mut apu = Apu::new(32_768);
        apu.write(0x84, 0x0080, 0xFFFF, 0);
        apu
    }

    #[test]
    fn psg_writes_ignored_while_master_off() {
        let mut apu = Apu::new(32_768);
        apu.write(0x80, 0x1177, 0xFFFF, 0);
        assert_eq!(apu.read(0x80), 0);
        apu.write(0x84, 0x0080, 0xFFFF, 0);
        apu.write(0x80, 0x1177, 0xFFFF, 0);
        assert_eq!(apu.read(0x80), 0x1177);
    }

    #[test]
    fn master_off_resets_channels_but_keeps_wave_ram() {
        let mut apu = enabled_apu();
        apu.write(0x90, 0xABCD, 0xFFFF, 0);
        apu.write(0x62, 0xF080, 0xFFFF, 0);
        apu.write(0x80, 0x1177, 0xFFFF, 0);
        apu.write(0x84, 0x0000, 0xFFFF, 0);
        apu.write(0x84, 0x0080, 0xFFFF, 0);
        assert_eq!(apu.read(0x90), 0xABCD, "wave RAM survives power-off");
        assert_eq!(apu.read(0x62), 0);
        assert_eq!(apu.read(0x80), 0);
    }

    #[test]
    fn status_bits_follow_channels() {
        let mut apu = enabled_apu();
        apu.write(0x62, 0xF000, 0xFFFF, 0);
        apu.write(0x64, 0x8000, 0xFFFF, 0);
        assert_eq!(apu.read(0x84), 0x0081);
    }

    #[test]
    fn fifo_pops_on_selected_timer_and_requests_refill() {
        let mut apu = enabled_apu();
        apu.write(0x82, 0x4000, 0xFFFF, 0); // FIFO A on timer 0, B on timer 1
        for _ in 0..10 {
            apu.write_fifo(0, 0x0201, 0xFFFF);
        }
        assert_eq!(apu.fifo_len(0), 20);
        assert_eq!(apu.timer_overflow(1), [None, Some(FIFO_B_ADDRESS)]);
        assert_eq!(apu.fifo_len(0), 20, "timer 1 does not clock FIFO A");
        for _ in 0..3 {
            assert_eq!(apu.timer_overflow(0), [None, None]);
        }
        assert_eq!(apu.fifo_len(0), 17);
        assert_eq!(apu.timer_overflow(0), [Some(FIFO_A_ADDRESS), None]);
        assert_eq!(apu.fifo_len(0), 16);
    }

    #[test]
    fn fifo_reset_bit_empties() {
        let mut apu = enabled_apu();
        apu.write_fifo(1, 0x1234, 0xFFFF);
        apu.write(0x82, 0x8000, 0xFFFF, 0);
        assert_eq!(apu.fifo_len(1), 0);
        assert_eq!(apu.read(0x82) & 0x8000, 0, "reset bit is not stored");
    }

    #[test]
    fn sample_events_at_exact_spacing() {
        let mut sched = Scheduler::new();
        let mut apu = Apu::new(32_768);
        apu.start(&mut sched);
        assert_eq!(sched.due_at(EventKind::ApuSample), Some(512));
        apu.sample(512, &mut sched);
        assert_eq!(sched.due_at(EventKind::ApuSample), Some(1024));
        assert_eq!(apu.take_samples(), vec![0, 0]);
        assert!(apu.take_samples().is_empty());
    }

    #[test]
    fn fractional_sample_rate_keeps_long_run_exact() {
        let mut sched = Scheduler::new();
        let mut apu = Apu::new(48_000);
        apu.start(&mut sched);
        let mut at = sched.due_at(EventKind::ApuSample).expect("booked");
        for _ in 1..48_000 {
            apu.sample(at, &mut sched);
            at = sched.due_at(EventKind::ApuSample).expect("booked");
        }
        // 48000 samples span exactly one second of the 16.78 MHz clock.
        assert_eq!(at, CLOCK_HZ);
    }

    #[test]
    fn fifo_sample_reaches_output() {
        let mut sched = Scheduler::new();
        let mut apu = enabled_apu();
        apu.write(0x82, 0x0304 | 0x0002, 0xFFFF, 0); // A full volume, both sides
        apu.write_fifo(0, 0x0040, 0x00FF);
        apu.timer_overflow(0);
        apu.sample(0, &mut sched);
        let samples = apu.take_samples();
        assert_eq!(samples, vec![64 * 4 * 64, 64 * 4 * 64]);
    }

    #[test]
    fn snapshot_round_trip_keeps_fifo() {
        let mut apu = enabled_apu();
        apu.write_fifo(0, 0x7F80, 0xFFFF);
        let mut w = StateWriter::new();
        apu.write_to(&mut w);
        let data = w.into_inner();
        let mut other = Apu::new(32_768);
        other.read_from(&mut StateReader::new(&data)).expect("restore");
        assert_eq!(other.fifo_len(0), 2);
        assert_eq!(other.read(0x84), 0x0080);
    }
}
