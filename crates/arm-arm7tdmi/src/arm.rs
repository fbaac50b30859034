//! ARM (32-bit) instruction set.

use emu_core::{AccessKind, AccessWidth};

use crate::alu::{self, Shift};
use crate::bus::{ArmBus, SwiOutcome};
use crate::cpu::{Arm7tdmi, Exception};
use crate::flags::{self, condition_passed};

pub(crate) fn execute<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    if !condition_passed(instr >> 28, cpu.regs.cpsr) {
        return;
    }

    match (instr >> 25) & 7 {
        0b000 => {
            if instr & 0x0FFF_FFF0 == 0x012F_FF10 {
                branch_exchange(cpu, bus, instr);
            } else if instr & 0x0FB0_0FF0 == 0x0100_0090 {
                swap(cpu, bus, instr);
            } else if instr & 0x0FC0_00F0 == 0x0000_0090 {
                multiply(cpu, bus, instr);
            } else if instr & 0x0F80_00F0 == 0x0080_0090 {
                multiply_long(cpu, bus, instr);
            } else if instr & 0x0E00_0090 == 0x0000_0090 && instr & 0x60 != 0 {
                halfword_transfer(cpu, bus, instr);
            } else if instr & 0x0FBF_0FFF == 0x010F_0000 {
                mrs(cpu, instr);
            } else if instr & 0x0DB0_F000 == 0x0120_F000 {
                msr(cpu, instr);
            } else {
                data_processing(cpu, bus, instr);
            }
        }
        0b001 => {
            if instr & 0x0FB0_F000 == 0x0320_F000 {
                msr(cpu, instr);
            } else {
                data_processing(cpu, bus, instr);
            }
        }
        0b010 => single_transfer(cpu, bus, instr),
        0b011 => {
            if instr & 0x10 != 0 {
                undefined(cpu, bus);
            } else {
                single_transfer(cpu, bus, instr);
            }
        }
        0b100 => block_transfer(cpu, bus, instr),
        0b101 => branch(cpu, bus, instr),
        0b110 => undefined(cpu, bus),
        _ => {
            if instr & (1 << 24) != 0 {
                software_interrupt(cpu, bus, instr);
            } else {
                undefined(cpu, bus);
            }
        }
    }
}

fn undefined<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B) {
    let return_address = cpu.regs.r[15].wrapping_sub(4);
    cpu.enter_exception(bus, Exception::Undefined, return_address);
}

fn software_interrupt<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let comment = (instr >> 16) as u8;
    match bus.software_interrupt(comment, &mut cpu.regs) {
        SwiOutcome::Exception => {
            let return_address = cpu.regs.r[15].wrapping_sub(4);
            cpu.enter_exception(bus, Exception::SoftwareInterrupt, return_address);
        }
        SwiOutcome::Handled { cycles } => cpu.add_cycles(cycles),
        SwiOutcome::Branch { cycles } => {
            cpu.add_cycles(cycles);
            cpu.flush(bus);
        }
        SwiOutcome::Retry { cycles } => {
            cpu.add_cycles(cycles);
            let swi_address = cpu.regs.r[15].wrapping_sub(8);
            cpu.write_pc(bus, swi_address);
        }
    }
}

fn branch<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let offset = (((instr & 0x00FF_FFFF) << 8) as i32 >> 6) as u32;
    let pc = cpu.regs.r[15];
    if instr & (1 << 24) != 0 {
        cpu.regs.r[14] = pc.wrapping_sub(4);
    }
    cpu.write_pc(bus, pc.wrapping_add(offset));
}

fn branch_exchange<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let target = cpu.regs.r[(instr & 0xF) as usize];
    if target & 1 != 0 {
        cpu.regs.cpsr |= flags::T;
    } else {
        cpu.regs.cpsr &= !flags::T;
    }
    cpu.write_pc(bus, target);
}

/// Second operand of a data-processing instruction: (value, shifter carry).
fn operand2<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) -> (u32, bool) {
    let carry = cpu.regs.flag(flags::C);
    if instr & (1 << 25) != 0 {
        let imm = instr & 0xFF;
        let rotate = ((instr >> 8) & 0xF) * 2;
        let value = imm.rotate_right(rotate);
        let carry_out = if rotate == 0 { carry } else { value & 0x8000_0000 != 0 };
        return (value, carry_out);
    }

    let rm = (instr & 0xF) as usize;
    let shift = Shift::from_bits(instr >> 5);
    if instr & 0x10 != 0 {
        // Register-specified shift: one internal cycle, r15 reads 4 further on.
        let rs = ((instr >> 8) & 0xF) as usize;
        let amount = cpu.regs.r[rs] & 0xFF;
        cpu.idle(bus);
        let value = if rm == 15 { cpu.regs.r[15].wrapping_add(4) } else { cpu.regs.r[rm] };
        alu::shift_by_register(shift, value, amount, carry)
    } else {
        let amount = (instr >> 7) & 0x1F;
        alu::shift_immediate(shift, cpu.regs.r[rm], amount, carry)
    }
}

fn data_processing<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let opcode = (instr >> 21) & 0xF;
    let set_flags = instr & (1 << 20) != 0;
    let rn = ((instr >> 16) & 0xF) as usize;
    let rd = ((instr >> 12) & 0xF) as usize;
    let register_shift = instr & (1 << 25) == 0 && instr & 0x10 != 0;

    let (op2, shifter_carry) = operand2(cpu, bus, instr);
    let op1 = if rn == 15 && register_shift {
        cpu.regs.r[15].wrapping_add(4)
    } else {
        cpu.regs.r[rn]
    };
    let carry = cpu.regs.flag(flags::C);

    // (result, Some((carry, overflow)) for arithmetic, None for logical)
    let (result, arith) = match opcode {
        0x0 | 0x8 => (op1 & op2, None),
        0x1 | 0x9 => (op1 ^ op2, None),
        0x2 | 0xA => {
            let (r, c, v) = alu::sub_with_carry(op1, op2, true);
            (r, Some((c, v)))
        }
        0x3 => {
            let (r, c, v) = alu::sub_with_carry(op2, op1, true);
            (r, Some((c, v)))
        }
        0x4 | 0xB => {
            let (r, c, v) = alu::add_with_carry(op1, op2, false);
            (r, Some((c, v)))
        }
        0x5 => {
            let (r, c, v) = alu::add_with_carry(op1, op2, carry);
            (r, Some((c, v)))
        }
        0x6 => {
            let (r, c, v) = alu::sub_with_carry(op1, op2, carry);
            (r, Some((c, v)))
        }
        0x7 => {
            let (r, c, v) = alu::sub_with_carry(op2, op1, carry);
            (r, Some((c, v)))
        }
        0xC => (op1 | op2, None),
        0xD => (op2, None),
        0xE => (op1 & !op2, None),
        _ => (!op2, None),
    };

    let writes_result = !(0x8..=0xB).contains(&opcode);

    if set_flags {
        if rd == 15 {
            // Exception return: SPSR -> CPSR, then branch in the restored state.
            cpu.regs.restore_cpsr_from_spsr();
        } else {
            let mut cpsr = flags::with_nz(cpu.regs.cpsr, result);
            cpsr = match arith {
                Some((c, v)) => flags::with_v(flags::with_c(cpsr, c), v),
                None => flags::with_c(cpsr, shifter_carry),
            };
            cpu.regs.cpsr = cpsr;
        }
    }

    if writes_result {
        cpu.set_reg(bus, rd, result);
    }
}

fn mrs(cpu: &mut Arm7tdmi, instr: u32) {
    let rd = ((instr >> 12) & 0xF) as usize;
    let use_spsr = instr & (1 << 22) != 0;
    cpu.regs.r[rd] = if use_spsr { cpu.regs.spsr() } else { cpu.regs.cpsr };
}

fn msr(cpu: &mut Arm7tdmi, instr: u32) {
    let value = if instr & (1 << 25) != 0 {
        (instr & 0xFF).rotate_right(((instr >> 8) & 0xF) * 2)
    } else {
        cpu.regs.r[(instr & 0xF) as usize]
    };

    let mut mask = 0u32;
    if instr & (1 << 19) != 0 {
        mask |= 0xFF00_0000;
    }
    if instr & (1 << 18) != 0 {
        mask |= 0x00FF_0000;
    }
    if instr & (1 << 17) != 0 {
        mask |= 0x0000_FF00;
    }
    if instr & (1 << 16) != 0 {
        mask |= 0x0000_00FF;
    }

    if instr & (1 << 22) != 0 {
        let spsr = cpu.regs.spsr();
        cpu.regs.set_spsr((spsr & !mask) | (value & mask));
    } else {
        if !cpu.regs.mode().is_privileged() {
            mask &= flags::FLAGS_MASK;
        }
        // The T bit is not writable through MSR.
        mask &= !flags::T;
        let cpsr = (cpu.regs.cpsr & !mask) | (value & mask);
        cpu.regs.set_cpsr(cpsr);
    }
}

fn multiply<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let rd = ((instr >> 16) & 0xF) as usize;
    let rn = ((instr >> 12) & 0xF) as usize;
    let rs = ((instr >> 8) & 0xF) as usize;
    let rm = (instr & 0xF) as usize;
    let accumulate = instr & (1 << 21) != 0;

    let multiplier = cpu.regs.r[rs];
    let mut result = cpu.regs.r[rm].wrapping_mul(multiplier);
    for _ in 0..alu::multiply_cycles(multiplier, true) {
        cpu.idle(bus);
    }
    if accumulate {
        result = result.wrapping_add(cpu.regs.r[rn]);
        cpu.idle(bus);
    }

    if instr & (1 << 20) != 0 {
        cpu.regs.cpsr = flags::with_nz(cpu.regs.cpsr, result);
    }
    cpu.set_reg(bus, rd, result);
}

fn multiply_long<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let rd_hi = ((instr >> 16) & 0xF) as usize;
    let rd_lo = ((instr >> 12) & 0xF) as usize;
    let rs = ((instr >> 8) & 0xF) as usize;
    let rm = (instr & 0xF) as usize;
    let signed = instr & (1 << 22) != 0;
    let accumulate = instr & (1 << 21) != 0;

    let multiplier = cpu.regs.r[rs];
    let mut result = if signed {
        (i64::from(cpu.regs.r[rm] as i32) * i64::from(multiplier as i32)) as u64
    } else {
        u64::from(cpu.regs.r[rm]) * u64::from(multiplier)
    };

    for _ in 0..=alu::multiply_cycles(multiplier, signed) {
        cpu.idle(bus);
    }
    if accumulate {
        let acc = (u64::from(cpu.regs.r[rd_hi]) << 32) | u64::from(cpu.regs.r[rd_lo]);
        result = result.wrapping_add(acc);
        cpu.idle(bus);
    }

    if instr & (1 << 20) != 0 {
        let mut cpsr = cpu.regs.cpsr & !(flags::N | flags::Z);
        if result == 0 {
            cpsr |= flags::Z;
        }
        if result & (1 << 63) != 0 {
            cpsr |= flags::N;
        }
        cpu.regs.cpsr = cpsr;
    }
    cpu.set_reg(bus, rd_lo, result as u32);
    cpu.set_reg(bus, rd_hi, (result >> 32) as u32);
}

fn swap<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let rn = ((instr >> 16) & 0xF) as usize;
    let rd = ((instr >> 12) & 0xF) as usize;
    let rm = (instr & 0xF) as usize;
    let address = cpu.regs.r[rn];
    let source = cpu.regs.r[rm];

    let old = if instr & (1 << 22) != 0 {
        let value = cpu.read(bus, address, AccessWidth::Byte, AccessKind::NonSequential);
        cpu.write(bus, address, AccessWidth::Byte, AccessKind::NonSequential, source & 0xFF);
        value
    } else {
        let value = cpu.load_word(bus, address, AccessKind::NonSequential);
        cpu.write(bus, address & !3, AccessWidth::Word, AccessKind::NonSequential, source);
        value
    };
    cpu.idle(bus);
    cpu.end_data_access();
    cpu.set_reg(bus, rd, old);
}

fn halfword_transfer<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let pre = instr & (1 << 24) != 0;
    let up = instr & (1 << 23) != 0;
    let immediate = instr & (1 << 22) != 0;
    let write_back = instr & (1 << 21) != 0;
    let load = instr & (1 << 20) != 0;
    let rn = ((instr >> 16) & 0xF) as usize;
    let rd = ((instr >> 12) & 0xF) as usize;
    let op = (instr >> 5) & 3;

    let offset = if immediate {
        ((instr >> 4) & 0xF0) | (instr & 0xF)
    } else {
        cpu.regs.r[(instr & 0xF) as usize]
    };

    let base = cpu.regs.r[rn];
    let offset_address = if up { base.wrapping_add(offset) } else { base.wrapping_sub(offset) };
    let address = if pre { offset_address } else { base };
    let writes_back = !pre || write_back;

    if load {
        let value = match op {
            1 => cpu.load_half(bus, address, AccessKind::NonSequential),
            2 => cpu.load_signed_byte(bus, address, AccessKind::NonSequential),
            _ => cpu.load_signed_half(bus, address, AccessKind::NonSequential),
        };
        if writes_back {
            cpu.regs.r[rn] = offset_address;
        }
        cpu.idle(bus);
        cpu.end_data_access();
        cpu.set_reg(bus, rd, value);
    } else {
        // Only STRH exists on ARMv4; the signed store encodings do nothing.
        if op == 1 {
            let value = if rd == 15 { cpu.regs.r[15].wrapping_add(4) } else { cpu.regs.r[rd] };
            cpu.write(bus, address & !1, AccessWidth::Half, AccessKind::NonSequential, value & 0xFFFF);
        }
        if writes_back {
            cpu.set_reg(bus, rn, offset_address);
        }
        cpu.end_data_access();
    }
}

fn single_transfer<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let register_offset = instr & (1 << 25) != 0;
    let pre = instr & (1 << 24) != 0;
    let up = instr & (1 << 23) != 0;
    let byte = instr & (1 << 22) != 0;
    let write_back = instr & (1 << 21) != 0;
    let load = instr & (1 << 20) != 0;
    let rn = ((instr >> 16) & 0xF) as usize;
    let rd = ((instr >> 12) & 0xF) as usize;

    let offset = if register_offset {
        let rm = (instr & 0xF) as usize;
        let amount = (instr >> 7) & 0x1F;
        let shift = Shift::from_bits(instr >> 5);
        alu::shift_immediate(shift, cpu.regs.r[rm], amount, cpu.regs.flag(flags::C)).0
    } else {
        instr & 0xFFF
    };

    let base = cpu.regs.r[rn];
    let offset_address = if up { base.wrapping_add(offset) } else { base.wrapping_sub(offset) };
    let address = if pre { offset_address } else { base };
    let writes_back = !pre || write_back;

    if load {
        let value = if byte {
            cpu.read(bus, address, AccessWidth::Byte, AccessKind::NonSequential)
        } else {
            cpu.load_word(bus, address, AccessKind::NonSequential)
        };
        if writes_back {
            cpu.regs.r[rn] = offset_address;
        }
        cpu.idle(bus);
        cpu.end_data_access();
        cpu.set_reg(bus, rd, value);
    } else {
        let value = if rd == 15 { cpu.regs.r[15].wrapping_add(4) } else { cpu.regs.r[rd] };
        if byte {
            cpu.write(bus, address, AccessWidth::Byte, AccessKind::NonSequential, value & 0xFF);
        } else {
            cpu.write(bus, address & !3, AccessWidth::Word, AccessKind::NonSequential, value);
        }
        if writes_back {
            cpu.set_reg(bus, rn, offset_address);
        }
        cpu.end_data_access();
    }
}

fn block_transfer<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let pre = instr & (1 << 24) != 0;
    let up = instr & (1 << 23) != 0;
    let psr_or_user = instr & (1 << 22) != 0;
    let write_back = instr & (1 << 21) != 0;
    let load = instr & (1 << 20) != 0;
    let rn = ((instr >> 16) & 0xF) as usize;
    let mut list = instr & 0xFFFF;

    // An empty list transfers r15 and moves the base by 0x40.
    let span = if list == 0 {
        list = 1 << 15;
        0x40
    } else {
        list.count_ones() * 4
    };

    let base = cpu.regs.r[rn];
    let (mut address, final_base) = if up {
        (if pre { base.wrapping_add(4) } else { base }, base.wrapping_add(span))
    } else {
        let bottom = base.wrapping_sub(span);
        (if pre { bottom } else { bottom.wrapping_add(4) }, bottom)
    };

    let includes_pc = list & (1 << 15) != 0;
    let user_bank = psr_or_user && !(load && includes_pc);
    let mut kind = AccessKind::NonSequential;
    let mut first = true;

    if load {
        for reg in (0..16).filter(|r| list & (1 << r) != 0) {
            let value = cpu.read(bus, address, AccessWidth::Word, kind);
            if first && write_back {
                cpu.regs.r[rn] = final_base;
            }
            if reg == 15 {
                cpu.regs.r[15] = value;
            } else if user_bank {
                cpu.regs.set_user_reg(reg, value);
            } else {
                cpu.regs.r[reg] = value;
            }
            address = address.wrapping_add(4);
            kind = AccessKind::Sequential;
            first = false;
        }
        cpu.idle(bus);
        cpu.end_data_access();
        if includes_pc {
            if psr_or_user {
                cpu.regs.restore_cpsr_from_spsr();
            }
            let target = cpu.regs.r[15];
            cpu.write_pc(bus, target);
        }
    } else {
        for reg in (0..16).filter(|r| list & (1 << r) != 0) {
            let value = if reg == 15 {
                cpu.regs.r[15].wrapping_add(4)
            } else if user_bank {
                cpu.regs.user_reg(reg)
            } else {
                cpu.regs.r[reg]
            };
            cpu.write(bus, address, AccessWidth::Word, kind, value);
            // Base write-back lands after the first store, so a base that is
            // not the lowest listed register is stored already updated.
            if first && write_back {
                cpu.regs.r[rn] = final_base;
            }
            address = address.wrapping_add(4);
            kind = AccessKind::Sequential;
            first = false;
        }
        cpu.end_data_access();
    }
}
