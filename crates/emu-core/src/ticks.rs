//! Master clock cycle counts.

use core::ops::{Add, AddAssign, Sub};

/// A count of master clock ticks. On a GBA one tick is one 16.78 MHz CPU
/// cycle; every other unit is a multiple of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(pub u64);

impl Ticks {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whole periods of `period` ticks elapsed, e.g. prescaler steps.
    #[must_use]
    pub const fn periods(self, period: u64) -> u64 {
        if period == 0 { 0 } else { self.0 / period }
    }
}

impl Add for Ticks {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Ticks {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

/// Saturates at zero: an elapsed time is never negative.
impl Sub for Ticks {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl From<u32> for Ticks {
    fn from(cycles: u32) -> Self {
        Self(u64::from(cycles))
    }
}
