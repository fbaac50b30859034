//! Thumb (16-bit) instruction set.

use emu_core::{AccessKind, AccessWidth};

use crate::alu::{self, Shift};
use crate::bus::{ArmBus, SwiOutcome};
use crate::cpu::{Arm7tdmi, Exception};
use crate::flags::{self, condition_passed};

pub(crate) fn execute<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u16) {
    let instr = u32::from(instr);
    match instr >> 11 {
        0b00011 => add_subtract(cpu, instr),
        0b00000..=0b00010 => move_shifted(cpu, instr),
        0b00100..=0b00111 => immediate_op(cpu, instr),
        0b01000 => {
            if instr & (1 << 10) == 0 {
                alu_op(cpu, bus, instr);
            } else {
                hi_register_op(cpu, bus, instr);
            }
        }
        0b01001 => pc_relative_load(cpu, bus, instr),
        0b01010 | 0b01011 => {
            if instr & (1 << 9) == 0 {
                register_offset_transfer(cpu, bus, instr);
            } else {
                sign_extended_transfer(cpu, bus, instr);
            }
        }
        0b01100..=0b01111 => immediate_offset_transfer(cpu, bus, instr),
        0b10000 | 0b10001 => halfword_transfer(cpu, bus, instr),
        0b10010 | 0b10011 => sp_relative_transfer(cpu, bus, instr),
        0b10100 | 0b10101 => load_address(cpu, instr),
        0b10110 | 0b10111 => {
            if instr & 0x0F00 == 0x0000 {
                adjust_sp(cpu, instr);
            } else if instr & 0x0600 == 0x0400 {
                push_pop(cpu, bus, instr);
            } else {
                undefined(cpu, bus);
            }
        }
        0b11000 | 0b11001 => multiple_transfer(cpu, bus, instr),
        0b11010 | 0b11011 => conditional_branch(cpu, bus, instr),
        0b11100 => {
            let offset = ((instr & 0x7FF) << 21) as i32 >> 20;
            let target = cpu.regs.r[15].wrapping_add(offset as u32);
            cpu.write_pc(bus, target);
        }
        0b11110 => {
            // Long branch with link, first half: LR = PC + (offset << 12).
            let offset = ((instr & 0x7FF) << 21) as i32 >> 9;
            cpu.regs.r[14] = cpu.regs.r[15].wrapping_add(offset as u32);
        }
        0b11111 => {
            let next = cpu.regs.r[15].wrapping_sub(2);
            let target = cpu.regs.r[14].wrapping_add((instr & 0x7FF) << 1);
            cpu.regs.r[14] = next | 1;
            cpu.write_pc(bus, target);
        }
        _ => undefined(cpu, bus),
    }
}

fn undefined<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B) {
    let return_address = cpu.regs.r[15].wrapping_sub(2);
    cpu.enter_exception(bus, Exception::Undefined, return_address);
}

fn set_nz(cpu: &mut Arm7tdmi, value: u32) {
    cpu.regs.cpsr = flags::with_nz(cpu.regs.cpsr, value);
}

fn set_nzcv(cpu: &mut Arm7tdmi, (value, carry, overflow): (u32, bool, bool)) -> u32 {
    let cpsr = flags::with_nz(cpu.regs.cpsr, value);
    cpu.regs.cpsr = flags::with_v(flags::with_c(cpsr, carry), overflow);
    value
}

fn move_shifted(cpu: &mut Arm7tdmi, instr: u32) {
    let shift = Shift::from_bits(instr >> 11);
    let amount = (instr >> 6) & 0x1F;
    let rs = ((instr >> 3) & 7) as usize;
    let rd = (instr & 7) as usize;
    let (value, carry) = alu::shift_immediate(shift, cpu.regs.r[rs], amount, cpu.regs.flag(flags::C));
    cpu.regs.r[rd] = value;
    cpu.regs.cpsr = flags::with_c(flags::with_nz(cpu.regs.cpsr, value), carry);
}

fn add_subtract(cpu: &mut Arm7tdmi, instr: u32) {
    let immediate = instr & (1 << 10) != 0;
    let subtract = instr & (1 << 9) != 0;
    let field = (instr >> 6) & 7;
    let rs = ((instr >> 3) & 7) as usize;
    let rd = (instr & 7) as usize;
    let operand = if immediate { field } else { cpu.regs.r[field as usize] };
    let a = cpu.regs.r[rs];
    let result = if subtract {
        alu::sub_with_carry(a, operand, true)
    } else {
        alu::add_with_carry(a, operand, false)
    };
    cpu.regs.r[rd] = set_nzcv(cpu, result);
}

fn immediate_op(cpu: &mut Arm7tdmi, instr: u32) {
    let rd = ((instr >> 8) & 7) as usize;
    let imm = instr & 0xFF;
    let a = cpu.regs.r[rd];
    match (instr >> 11) & 3 {
        0 => {
            cpu.regs.r[rd] = imm;
            set_nz(cpu, imm);
        }
        1 => {
            set_nzcv(cpu, alu::sub_with_carry(a, imm, true));
        }
        2 => cpu.regs.r[rd] = set_nzcv(cpu, alu::add_with_carry(a, imm, false)),
        _ => cpu.regs.r[rd] = set_nzcv(cpu, alu::sub_with_carry(a, imm, true)),
    }
}

fn alu_op<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let rs = ((instr >> 3) & 7) as usize;
    let rd = (instr & 7) as usize;
    let a = cpu.regs.r[rd];
    let b = cpu.regs.r[rs];
    let carry = cpu.regs.flag(flags::C);

    match (instr >> 6) & 0xF {
        0x0 => {
            cpu.regs.r[rd] = a & b;
            set_nz(cpu, a & b);
        }
        0x1 => {
            cpu.regs.r[rd] = a ^ b;
            set_nz(cpu, a ^ b);
        }
        op @ (0x2 | 0x3 | 0x4 | 0x7) => {
            let shift = match op {
                0x2 => Shift::Lsl,
                0x3 => Shift::Lsr,
                0x4 => Shift::Asr,
                _ => Shift::Ror,
            };
            cpu.idle(bus);
            let (value, c) = alu::shift_by_register(shift, a, b & 0xFF, carry);
            cpu.regs.r[rd] = value;
            cpu.regs.cpsr = flags::with_c(flags::with_nz(cpu.regs.cpsr, value), c);
        }
        0x5 => cpu.regs.r[rd] = set_nzcv(cpu, alu::add_with_carry(a, b, carry)),
        0x6 => cpu.regs.r[rd] = set_nzcv(cpu, alu::sub_with_carry(a, b, carry)),
        0x8 => set_nz(cpu, a & b),
        0x9 => cpu.regs.r[rd] = set_nzcv(cpu, alu::sub_with_carry(0, b, true)),
        0xA => {
            set_nzcv(cpu, alu::sub_with_carry(a, b, true));
        }
        0xB => {
            set_nzcv(cpu, alu::add_with_carry(a, b, false));
        }
        0xC => {
            cpu.regs.r[rd] = a | b;
            set_nz(cpu, a | b);
        }
        0xD => {
            // MUL: the multiplier is the original Rd.
            for _ in 0..alu::multiply_cycles(a, true) {
                cpu.idle(bus);
            }
            let value = a.wrapping_mul(b);
            cpu.regs.r[rd] = value;
            set_nz(cpu, value);
        }
        0xE => {
            cpu.regs.r[rd] = a & !b;
            set_nz(cpu, a & !b);
        }
        _ => {
            cpu.regs.r[rd] = !b;
            set_nz(cpu, !b);
        }
    }
}

fn hi_register_op<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let rs = ((instr >> 3) & 0xF) as usize;
    let rd = ((instr & 7) | ((instr >> 4) & 8)) as usize;
    let value = cpu.regs.r[rs];

    match (instr >> 8) & 3 {
        0 => {
            let result = cpu.regs.r[rd].wrapping_add(value);
            cpu.set_reg(bus, rd, result);
        }
        1 => {
            set_nzcv(cpu, alu::sub_with_carry(cpu.regs.r[rd], value, true));
        }
        2 => cpu.set_reg(bus, rd, value),
        _ => {
            if value & 1 == 0 {
                cpu.regs.cpsr &= !flags::T;
            }
            cpu.write_pc(bus, value);
        }
    }
}

fn pc_relative_load<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let rd = ((instr >> 8) & 7) as usize;
    let address = (cpu.regs.r[15] & !2).wrapping_add((instr & 0xFF) << 2);
    let value = cpu.read(bus, address, AccessWidth::Word, AccessKind::NonSequential);
    cpu.idle(bus);
    cpu.end_data_access();
    cpu.regs.r[rd] = value;
}

fn register_offset_transfer<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let load = instr & (1 << 11) != 0;
    let byte = instr & (1 << 10) != 0;
    let ro = ((instr >> 6) & 7) as usize;
    let rb = ((instr >> 3) & 7) as usize;
    let rd = (instr & 7) as usize;
    let address = cpu.regs.r[rb].wrapping_add(cpu.regs.r[ro]);

    match (load, byte) {
        (false, false) => {
            let value = cpu.regs.r[rd];
            cpu.write(bus, address & !3, AccessWidth::Word, AccessKind::NonSequential, value);
        }
        (false, true) => {
            let value = cpu.regs.r[rd] & 0xFF;
            cpu.write(bus, address, AccessWidth::Byte, AccessKind::NonSequential, value);
        }
        (true, false) => {
            cpu.regs.r[rd] = cpu.load_word(bus, address, AccessKind::NonSequential);
            cpu.idle(bus);
        }
        (true, true) => {
            cpu.regs.r[rd] = cpu.read(bus, address, AccessWidth::Byte, AccessKind::NonSequential);
            cpu.idle(bus);
        }
    }
    cpu.end_data_access();
}

fn sign_extended_transfer<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let ro = ((instr >> 6) & 7) as usize;
    let rb = ((instr >> 3) & 7) as usize;
    let rd = (instr & 7) as usize;
    let address = cpu.regs.r[rb].wrapping_add(cpu.regs.r[ro]);

    match (instr >> 10) & 3 {
        0 => {
            let value = cpu.regs.r[rd] & 0xFFFF;
            cpu.write(bus, address & !1, AccessWidth::Half, AccessKind::NonSequential, value);
        }
        1 => {
            cpu.regs.r[rd] = cpu.load_signed_byte(bus, address, AccessKind::NonSequential);
            cpu.idle(bus);
        }
        2 => {
            cpu.regs.r[rd] = cpu.load_half(bus, address, AccessKind::NonSequential);
            cpu.idle(bus);
        }
        _ => {
            cpu.regs.r[rd] = cpu.load_signed_half(bus, address, AccessKind::NonSequential);
            cpu.idle(bus);
        }
    }
    cpu.end_data_access();
}

fn immediate_offset_transfer<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let byte = instr & (1 << 12) != 0;
    let load = instr & (1 << 11) != 0;
    let offset = (instr >> 6) & 0x1F;
    let rb = ((instr >> 3) & 7) as usize;
    let rd = (instr & 7) as usize;
    let base = cpu.regs.r[rb];

    if byte {
        let address = base.wrapping_add(offset);
        if load {
            cpu.regs.r[rd] = cpu.read(bus, address, AccessWidth::Byte, AccessKind::NonSequential);
            cpu.idle(bus);
        } else {
            let value = cpu.regs.r[rd] & 0xFF;
            cpu.write(bus, address, AccessWidth::Byte, AccessKind::NonSequential, value);
        }
    } else {
        let address = base.wrapping_add(offset << 2);
        if load {
            cpu.regs.r[rd] = cpu.load_word(bus, address, AccessKind::NonSequential);
            cpu.idle(bus);
        } else {
            let value = cpu.regs.r[rd];
            cpu.write(bus, address & !3, AccessWidth::Word, AccessKind::NonSequential, value);
        }
    }
    cpu.end_data_access();
}

fn halfword_transfer<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let load = instr & (1 << 11) != 0;
    let offset = ((instr >> 6) & 0x1F) << 1;
    let rb = ((instr >> 3) & 7) as usize;
    let rd = (instr & 7) as usize;
    let address = cpu.regs.r[rb].wrapping_add(offset);

    if load {
        cpu.regs.r[rd] = cpu.load_half(bus, address, AccessKind::NonSequential);
        cpu.idle(bus);
    } else {
        let value = cpu.regs.r[rd] & 0xFFFF;
        cpu.write(bus, address & !1, AccessWidth::Half, AccessKind::NonSequential, value);
    }
    cpu.end_data_access();
}

fn sp_relative_transfer<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let load = instr & (1 << 11) != 0;
    let rd = ((instr >> 8) & 7) as usize;
    let address = cpu.regs.r[13].wrapping_add((instr & 0xFF) << 2);

    if load {
        cpu.regs.r[rd] = cpu.load_word(bus, address, AccessKind::NonSequential);
        cpu.idle(bus);
    } else {
        let value = cpu.regs.r[rd];
        cpu.write(bus, address & !3, AccessWidth::Word, AccessKind::NonSequential, value);
    }
    cpu.end_data_access();
}

fn load_address(cpu: &mut Arm7tdmi, instr: u32) {
    let rd = ((instr >> 8) & 7) as usize;
    let offset = (instr & 0xFF) << 2;
    let base = if instr & (1 << 11) != 0 {
        cpu.regs.r[13]
    } else {
        cpu.regs.r[15] & !2
    };
    cpu.regs.r[rd] = base.wrapping_add(offset);
}

fn adjust_sp(cpu: &mut Arm7tdmi, instr: u32) {
    let offset = (instr & 0x7F) << 2;
    cpu.regs.r[13] = if instr & (1 << 7) != 0 {
        cpu.regs.r[13].wrapping_sub(offset)
    } else {
        cpu.regs.r[13].wrapping_add(offset)
    };
}

fn push_pop<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let pop = instr & (1 << 11) != 0;
    let extra = instr & (1 << 8) != 0;
    let list = instr & 0xFF;
    let mut kind = AccessKind::NonSequential;

    if pop {
        let mut address = cpu.regs.r[13];
        for reg in (0..8).filter(|r| list & (1 << r) != 0) {
            cpu.regs.r[reg] = cpu.read(bus, address, AccessWidth::Word, kind);
            address = address.wrapping_add(4);
            kind = AccessKind::Sequential;
        }
        if extra || list == 0 {
            let pc = cpu.read(bus, address, AccessWidth::Word, kind);
            address = address.wrapping_add(if list == 0 && !extra { 0x40 } else { 4 });
            cpu.regs.r[13] = address;
            cpu.idle(bus);
            cpu.end_data_access();
            cpu.write_pc(bus, pc);
            return;
        }
        cpu.regs.r[13] = address;
        cpu.idle(bus);
    } else {
        let count = list.count_ones() + u32::from(extra);
        let span = if count == 0 { 0x40 } else { count * 4 };
        let mut address = cpu.regs.r[13].wrapping_sub(span);
        cpu.regs.r[13] = address;
        for reg in (0..8).filter(|r| list & (1 << r) != 0) {
            let value = cpu.regs.r[reg];
            cpu.write(bus, address, AccessWidth::Word, kind, value);
            address = address.wrapping_add(4);
            kind = AccessKind::Sequential;
        }
        if extra {
            let lr = cpu.regs.r[14];
            cpu.write(bus, address, AccessWidth::Word, kind, lr);
        } else if count == 0 {
            let pc = cpu.regs.r[15].wrapping_add(2);
            cpu.write(bus, address, AccessWidth::Word, kind, pc);
        }
    }
    cpu.end_data_access();
}

fn multiple_transfer<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let load = instr & (1 << 11) != 0;
    let rb = ((instr >> 8) & 7) as usize;
    let list = instr & 0xFF;
    let base = cpu.regs.r[rb];
    let mut kind = AccessKind::NonSequential;

    if list == 0 {
        // Empty list: r15 is transferred and the base moves by 0x40.
        cpu.regs.r[rb] = base.wrapping_add(0x40);
        if load {
            let pc = cpu.read(bus, base, AccessWidth::Word, kind);
            cpu.idle(bus);
            cpu.end_data_access();
            cpu.write_pc(bus, pc);
        } else {
            let pc = cpu.regs.r[15].wrapping_add(2);
            cpu.write(bus, base, AccessWidth::Word, kind, pc);
            cpu.end_data_access();
        }
        return;
    }

    let final_base = base.wrapping_add(list.count_ones() * 4);
    let mut address = base;
    let mut first = true;

    for reg in (0..8).filter(|r| list & (1 << r) != 0) {
        if load {
            cpu.regs.r[reg] = cpu.read(bus, address, AccessWidth::Word, kind);
        } else {
            let value = cpu.regs.r[reg];
            cpu.write(bus, address, AccessWidth::Word, kind, value);
            if first {
                cpu.regs.r[rb] = final_base;
            }
        }
        address = address.wrapping_add(4);
        kind = AccessKind::Sequential;
        first = false;
    }

    if load {
        // A loaded base wins over write-back.
        if list & (1 << rb) == 0 {
            cpu.regs.r[rb] = final_base;
        }
        cpu.idle(bus);
    }
    cpu.end_data_access();
}

fn conditional_branch<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let cond = (instr >> 8) & 0xF;
    match cond {
        0xF => software_interrupt(cpu, bus, instr),
        0xE => undefined(cpu, bus),
        _ => {
            if condition_passed(cond, cpu.regs.cpsr) {
                let offset = ((instr & 0xFF) << 24) as i32 >> 23;
                let target = cpu.regs.r[15].wrapping_add(offset as u32);
                cpu.write_pc(bus, target);
            }
        }
    }
}

fn software_interrupt<B: ArmBus>(cpu: &mut Arm7tdmi, bus: &mut B, instr: u32) {
    let comment = instr as u8;
    match bus.software_interrupt(comment, &mut cpu.regs) {
        SwiOutcome::Exception => {
            let return_address = cpu.regs.r[15].wrapping_sub(2);
            cpu.enter_exception(bus, Exception::SoftwareInterrupt, return_address);
        }
        SwiOutcome::Handled { cycles } => cpu.add_cycles(cycles),
        SwiOutcome::Branch { cycles } => {
            cpu.add_cycles(cycles);
            cpu.flush(bus);
        }
        SwiOutcome::Retry { cycles } => {
            cpu.add_cycles(cycles);
            let swi_address = cpu.regs.r[15].wrapping_sub(4);
            cpu.write_pc(bus, swi_address);
        }
    }
}
