//! Barrel shifter and flag-setting arithmetic.

/// Shift type field (bits 5-6 of a register operand).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl Shift {
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

/// Shift by an immediate amount (0-31) with the encodings' special cases:
/// LSR #0 and ASR #0 mean #32, ROR #0 means RRX.
#[must_use]
pub fn shift_immediate(shift: Shift, value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match (shift, amount) {
        (Shift::Lsl, 0) => (value, carry_in),
        (Shift::Lsr, 0) => (0, value & 0x8000_0000 != 0),
        (Shift::Asr, 0) => {
            let fill = value & 0x8000_0000 != 0;
            (if fill { u32::MAX } else { 0 }, fill)
        }
        (Shift::Ror, 0) => {
            let out = (u32::from(carry_in) << 31) | (value >> 1);
            (out, value & 1 != 0)
        }
        _ => shift_by_register(shift, value, amount, carry_in),
    }
}

/// Shift by a register amount (bottom byte of Rs). Amount 0 passes the value
/// and carry through unchanged; amounts of 32 and above saturate.
#[must_use]
pub fn shift_by_register(shift: Shift, value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    let amount = amount & 0xFF;
    if amount == 0 {
        return (value, carry_in);
    }
    match shift {
        Shift::Lsl => match amount {
            1..=31 => (value << amount, (value >> (32 - amount)) & 1 != 0),
            32 => (0, value & 1 != 0),
            _ => (0, false),
        },
        Shift::Lsr => match amount {
            1..=31 => (value >> amount, (value >> (amount - 1)) & 1 != 0),
            32 => (0, value & 0x8000_0000 != 0),
            _ => (0, false),
        },
        Shift::Asr => {
            if amount < 32 {
                (((value as i32) >> amount) as u32, ((value as i32) >> (amount - 1)) & 1 != 0)
            } else {
                let fill = value & 0x8000_0000 != 0;
                (if fill { u32::MAX } else { 0 }, fill)
            }
        }
        Shift::Ror => {
            let rot = amount & 31;
            if rot == 0 {
                (value, value & 0x8000_0000 != 0)
            } else {
                let out = value.rotate_right(rot);
                (out, out & 0x8000_0000 != 0)
            }
        }
    }
}

/// `a + b + carry`, returning (result, carry out, overflow).
#[must_use]
pub fn add_with_carry(a: u32, b: u32, carry: bool) -> (u32, bool, bool) {
    let wide = u64::from(a) + u64::from(b) + u64::from(carry);
    let result = wide as u32;
    let carry_out = wide > u64::from(u32::MAX);
    let overflow = (!(a ^ b) & (a ^ result)) & 0x8000_0000 != 0;
    (result, carry_out, overflow)
}

/// `a - b - !carry` (ARM carry is "not borrow").
#[must_use]
pub fn sub_with_carry(a: u32, b: u32, carry: bool) -> (u32, bool, bool) {
    add_with_carry(a, !b, carry)
}

/// Internal cycles a multiply takes, from the magnitude of the multiplier.
/// Signed multiplies terminate early on leading ones as well as zeros.
#[must_use]
pub fn multiply_cycles(rs: u32, signed: bool) -> u32 {
    let m = if signed && rs & 0x8000_0000 != 0 { !rs } else { rs };
    if m & 0xFFFF_FF00 == 0 {
        1
    } else if m & 0xFFFF_0000 == 0 {
        2
    } else if m & 0xFF00_0000 == 0 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsr_zero_means_thirty_two() {
        assert_eq!(shift_immediate(Shift::Lsr, 0x8000_0000, 0, false), (0, true));
    }

    #[test]
    fn asr_zero_fills_with_sign() {
        assert_eq!(
            shift_immediate(Shift::Asr, 0x8000_0000, 0, false),
            (0xFFFF_FFFF, true)
        );
        assert_eq!(shift_immediate(Shift::Asr, 0x7FFF_FFFF, 0, true), (0, false));
    }

    #[test]
    fn ror_zero_is_rrx() {
        assert_eq!(shift_immediate(Shift::Ror, 0x0000_0003, 0, true), (0x8000_0001, true));
    }

    #[test]
    fn register_shift_saturates() {
        assert_eq!(shift_by_register(Shift::Lsl, 1, 32, false), (0, true));
        assert_eq!(shift_by_register(Shift::Lsl, 1, 33, true), (0, false));
        assert_eq!(shift_by_register(Shift::Lsr, 0x8000_0000, 32, false), (0, true));
        assert_eq!(shift_by_register(Shift::Ror, 0x8000_0000, 32, false), (0x8000_0000, true));
        assert_eq!(shift_by_register(Shift::Lsl, 5, 0x100, true), (5, true), "only low byte counts");
    }

    #[test]
    fn subtraction_carry_is_not_borrow() {
        assert_eq!(sub_with_carry(5, 3, true), (2, true, false));
        assert_eq!(sub_with_carry(3, 5, true), (0xFFFF_FFFE, false, false));
        assert_eq!(sub_with_carry(0x8000_0000, 1, true), (0x7FFF_FFFF, true, true));
    }

    #[test]
    fn addition_overflow() {
        assert_eq!(add_with_carry(0x7FFF_FFFF, 1, false), (0x8000_0000, false, true));
        assert_eq!(add_with_carry(u32::MAX, 1, false), (0, true, false));
    }

    #[test]
    fn multiply_timing_by_magnitude() {
        assert_eq!(multiply_cycles(0xFF, false), 1);
        assert_eq!(multiply_cycles(0xFFFF, false), 2);
        assert_eq!(multiply_cycles(0x00FF_FFFF, false), 3);
        assert_eq!(multiply_cycles(0xFFFF_FFFF, false), 4);
        assert_eq!(multiply_cycles(0xFFFF_FFFF, true), 1, "leading ones end early");
    }
}
