//! Master clock configuration.

use std::time::Duration;

use crate::Ticks;

/// Master clock configuration for a system.
///
/// Each system has a master crystal that drives all timing. Components may
/// run at divided rates, but everything derives from this frequency.
#[derive(Debug, Clone, Copy)]
pub struct MasterClock {
    /// Crystal frequency in Hz (e.g., `16_777_216` for the GBA).
    pub frequency_hz: u64,
}

impl MasterClock {
    /// The GBA system clock: 2^24 Hz.
    pub const GBA: Self = Self::new(16_777_216);

    #[must_use]
    pub const fn new(frequency_hz: u64) -> Self {
        Self { frequency_hz }
    }

    /// Ticks between two output samples at `sample_rate` Hz (integer division).
    #[must_use]
    pub const fn ticks_per_sample(&self, sample_rate: u64) -> Ticks {
        Ticks::new(self.frequency_hz / sample_rate)
    }

    /// Nominal frame rate for a frame of `ticks_per_frame` ticks.
    #[must_use]
    pub fn frames_per_second(&self, ticks_per_frame: Ticks) -> f64 {
        if ticks_per_frame.get() == 0 {
            return 0.0;
        }
        self.frequency_hz as f64 / ticks_per_frame.get() as f64
    }

    /// Real time that `ticks` represents at this frequency.
    #[must_use]
    pub fn duration_of(&self, ticks: Ticks) -> Duration {
        Duration::from_secs_f64(ticks.get() as f64 / self.frequency_hz as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gba_frame_rate_is_about_59_73() {
        let fps = MasterClock::GBA.frames_per_second(Ticks::new(280_896));
        assert!((fps - 59.7275).abs() < 0.001, "got {fps}");
    }

    #[test]
    fn sample_period_at_32768_hz() {
        assert_eq!(MasterClock::GBA.ticks_per_sample(32_768), Ticks::new(512));
    }
}
