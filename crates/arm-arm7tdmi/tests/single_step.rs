//! Data-driven single-instruction tests.
//!
//! Each case in `tests/data/single_step.json` gives the register file before
//! and after one instruction. `r15` is the address of the instruction in the
//! initial state and of the next instruction in the final state.

use arm_arm7tdmi::{Arm7tdmi, ArmBus};
use emu_core::{AccessKind, AccessWidth, Bus, BusResult};
use serde::Deserialize;

struct FlatBus {
    ram: Vec<u8>,
}

impl Bus for FlatBus {
    fn read(&mut self, address: u32, width: AccessWidth, _kind: AccessKind) -> BusResult {
        let at = (address & 0xFFF) as usize;
        let mut data = 0u32;
        for i in 0..width.bytes() as usize {
            data |= u32::from(self.ram[at + i]) << (8 * i);
        }
        BusResult::new(data, 1)
    }

    fn write(&mut self, address: u32, width: AccessWidth, _kind: AccessKind, value: u32) -> u32 {
        let at = (address & 0xFFF) as usize;
        for i in 0..width.bytes() as usize {
            self.ram[at + i] = (value >> (8 * i)) as u8;
        }
        1
    }
}

impl ArmBus for FlatBus {
    fn irq_line(&self) -> bool {
        false
    }
}

#[derive(Deserialize)]
struct State {
    r: [u32; 16],
    cpsr: u32,
}

#[derive(Deserialize)]
struct TestCase {
    name: String,
    thumb: bool,
    opcode: u32,
    initial: State,
    #[serde(rename = "final")]
    final_state: State,
}

fn run_case(case: &TestCase) {
    let mut bus = FlatBus { ram: vec![0; 0x1000] };
    let pc = case.initial.r[15];
    let at = (pc & 0xFFF) as usize;
    if case.thumb {
        bus.ram[at..at + 2].copy_from_slice(&(case.opcode as u16).to_le_bytes());
    } else {
        bus.ram[at..at + 4].copy_from_slice(&case.opcode.to_le_bytes());
    }

    let mut cpu = Arm7tdmi::new();
    cpu.regs.set_cpsr(case.initial.cpsr);
    cpu.regs.r = case.initial.r;
    cpu.jump(&mut bus, pc);
    cpu.step(&mut bus);

    for n in 0..15 {
        assert_eq!(
            cpu.regs.r[n], case.final_state.r[n],
            "{}: r{n} = {:#010X}",
            case.name, cpu.regs.r[n]
        );
    }
    assert_eq!(
        cpu.next_instruction_address(),
        case.final_state.r[15],
        "{}: next pc",
        case.name
    );
    assert_eq!(
        cpu.regs.cpsr, case.final_state.cpsr,
        "{}: cpsr = {:#010X}",
        case.name, cpu.regs.cpsr
    );
}

#[test]
fn single_step_vectors() {
    let data = include_str!("data/single_step.json");
    let cases: Vec<TestCase> = serde_json::from_str(data).expect("parse vectors");
    assert!(!cases.is_empty());
    for case in &cases {
        run_case(case);
    }
}
