//! Program status register layout and condition codes.
//!
//! The CPSR is 32 bits:
//! - Bit 31: N (negative)
//! - Bit 30: Z (zero)
//! - Bit 29: C (carry / not borrow)
//! - Bit 28: V (overflow)
//! - Bits 8-27: Reserved
//! - Bit 7: I (IRQ disable)
//! - Bit 6: F (FIQ disable)
//! - Bit 5: T (Thumb state)
//! - Bits 0-4: Processor mode

/// Negative flag.
pub const N: u32 = 1 << 31;
/// Zero flag.
pub const Z: u32 = 1 << 30;
/// Carry flag.
pub const C: u32 = 1 << 29;
/// Overflow flag.
pub const V: u32 = 1 << 28;
/// IRQ disable.
pub const I: u32 = 1 << 7;
/// FIQ disable.
pub const F: u32 = 1 << 6;
/// Thumb state.
pub const T: u32 = 1 << 5;

/// Condition flag bits (N, Z, C, V).
pub const FLAGS_MASK: u32 = 0xF000_0000;
/// Control bits (I, F, T and mode).
pub const CONTROL_MASK: u32 = 0x0000_00FF;
/// Mode field.
pub const MODE_MASK: u32 = 0x1F;

/// Processor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    User,
    Fiq,
    Irq,
    Supervisor,
    Abort,
    Undefined,
    System,
}

impl Mode {
    /// Decode the CPSR mode field. Returns `None` for reserved encodings.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits & MODE_MASK {
            0x10 => Some(Self::User),
            0x11 => Some(Self::Fiq),
            0x12 => Some(Self::Irq),
            0x13 => Some(Self::Supervisor),
            0x17 => Some(Self::Abort),
            0x1B => Some(Self::Undefined),
            0x1F => Some(Self::System),
            _ => None,
        }
    }

    /// The CPSR mode field for this mode.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::User => 0x10,
            Self::Fiq => 0x11,
            Self::Irq => 0x12,
            Self::Supervisor => 0x13,
            Self::Abort => 0x17,
            Self::Undefined => 0x1B,
            Self::System => 0x1F,
        }
    }

    /// Register bank used by this mode. User and System share bank 0.
    #[must_use]
    pub const fn bank(self) -> usize {
        match self {
            Self::User | Self::System => 0,
            Self::Fiq => 1,
            Self::Irq => 2,
            Self::Supervisor => 3,
            Self::Abort => 4,
            Self::Undefined => 5,
        }
    }

    /// True for every mode except User.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        !matches!(self, Self::User)
    }

    /// True for modes that own an SPSR.
    #[must_use]
    pub const fn has_spsr(self) -> bool {
        !matches!(self, Self::User | Self::System)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::User => "usr",
            Self::Fiq => "fiq",
            Self::Irq => "irq",
            Self::Supervisor => "svc",
            Self::Abort => "abt",
            Self::Undefined => "und",
            Self::System => "sys",
        }
    }
}

/// Evaluate a 4-bit condition field against the CPSR flags.
#[must_use]
pub fn condition_passed(cond: u32, cpsr: u32) -> bool {
    let n = cpsr & N != 0;
    let z = cpsr & Z != 0;
    let c = cpsr & C != 0;
    let v = cpsr & V != 0;
    match cond & 0xF {
        0x0 => z,
        0x1 => !z,
        0x2 => c,
        0x3 => !c,
        0x4 => n,
        0x5 => !n,
        0x6 => v,
        0x7 => !v,
        0x8 => c && !z,
        0x9 => !c || z,
        0xA => n == v,
        0xB => n != v,
        0xC => !z && n == v,
        0xD => z || n != v,
        0xE => true,
        // NV: never on ARMv4
        _ => false,
    }
}

/// Set N and Z from a 32-bit result, leaving C and V alone.
#[must_use]
pub const fn with_nz(cpsr: u32, value: u32) -> u32 {
    let mut out = cpsr & !(N | Z);
    if value == 0 {
        out |= Z;
    }
    if value & 0x8000_0000 != 0 {
        out |= N;
    }
    out
}

/// Replace the C flag.
#[must_use]
pub const fn with_c(cpsr: u32, carry: bool) -> u32 {
    if carry { cpsr | C } else { cpsr & !C }
}

/// Replace the V flag.
#[must_use]
pub const fn with_v(cpsr: u32, overflow: bool) -> u32 {
    if overflow { cpsr | V } else { cpsr & !V }
}
