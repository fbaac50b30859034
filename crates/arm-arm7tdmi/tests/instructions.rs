//! Instruction-level tests for the ARM7TDMI.
//!
//! Programs are assembled by hand into a flat 64 KB RAM bus with one cycle
//! per access, so cycle counts can be asserted exactly.

use arm_arm7tdmi::{Arm7tdmi, ArmBus, Mode, Registers, SwiOutcome};
use arm_arm7tdmi::flags;
use emu_core::{AccessKind, AccessWidth, Bus, BusResult};

struct TestBus {
    ram: Vec<u8>,
    irq: bool,
    swi: Option<fn(u8, &mut Registers) -> SwiOutcome>,
}

impl TestBus {
    fn new() -> Self {
        Self {
            ram: vec![0; 0x1_0000],
            irq: false,
            swi: None,
        }
    }

    fn load_arm(&mut self, address: u32, program: &[u32]) {
        for (i, word) in program.iter().enumerate() {
            let at = address as usize + i * 4;
            self.ram[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
    }

    fn load_thumb(&mut self, address: u32, program: &[u16]) {
        for (i, half) in program.iter().enumerate() {
            let at = address as usize + i * 2;
            self.ram[at..at + 2].copy_from_slice(&half.to_le_bytes());
        }
    }

    fn peek32(&self, address: u32) -> u32 {
        let at = address as usize;
        u32::from_le_bytes([self.ram[at], self.ram[at + 1], self.ram[at + 2], self.ram[at + 3]])
    }
}

impl Bus for TestBus {
    fn read(&mut self, address: u32, width: AccessWidth, _kind: AccessKind) -> BusResult {
        let at = (address & 0xFFFF) as usize;
        let data = match width {
            AccessWidth::Byte => u32::from(self.ram[at]),
            AccessWidth::Half => u32::from(u16::from_le_bytes([self.ram[at], self.ram[at + 1]])),
            AccessWidth::Word => self.peek32(address & 0xFFFF),
        };
        BusResult::new(data, 1)
    }

    fn write(&mut self, address: u32, width: AccessWidth, _kind: AccessKind, value: u32) -> u32 {
        let at = (address & 0xFFFF) as usize;
        let bytes = value.to_le_bytes();
        let len = width.bytes() as usize;
        self.ram[at..at + len].copy_from_slice(&bytes[..len]);
        1
    }
}

impl ArmBus for TestBus {
    fn irq_line(&self) -> bool {
        self.irq
    }

    fn software_interrupt(&mut self, comment: u8, regs: &mut Registers) -> SwiOutcome {
        match self.swi {
            Some(handler) => handler(comment, regs),
            None => SwiOutcome::Exception,
        }
    }
}

/// CPU in System mode with interrupts enabled, about to execute `pc`.
fn setup_arm(bus: &mut TestBus, pc: u32, program: &[u32]) -> Arm7tdmi {
    bus.load_arm(pc, program);
    let mut cpu = Arm7tdmi::new();
    cpu.regs.switch_mode(Mode::System);
    cpu.regs.cpsr = 0x1F;
    cpu.jump(bus, pc);
    cpu
}

fn setup_thumb(bus: &mut TestBus, pc: u32, program: &[u16]) -> Arm7tdmi {
    bus.load_thumb(pc, program);
    let mut cpu = Arm7tdmi::new();
    cpu.regs.switch_mode(Mode::System);
    cpu.regs.cpsr = 0x1F | flags::T;
    cpu.jump(bus, pc);
    cpu
}

fn run(cpu: &mut Arm7tdmi, bus: &mut TestBus, steps: usize) -> u32 {
    (0..steps).map(|_| cpu.step(bus)).sum()
}

#[test]
fn data_processing_sets_flags() {
    let mut bus = TestBus::new();
    let mut cpu = setup_arm(
        &mut bus,
        0x100,
        &[
            0xE3A0_0005, // mov r0, #5
            0xE3A0_1003, // mov r1, #3
            0xE051_2000, // subs r2, r1, r0
        ],
    );
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.regs.r[2], 0xFFFF_FFFE);
    assert!(cpu.regs.flag(flags::N), "negative result");
    assert!(!cpu.regs.flag(flags::C), "borrow clears carry");
    assert!(!cpu.regs.flag(flags::Z));

    bus.load_arm(0x10C, &[0xE090_3001]); // adds r3, r0, r1
    run(&mut cpu, &mut bus, 1);
    assert_eq!(cpu.regs.r[3], 8);
    assert!(!cpu.regs.flag(flags::N));
}

#[test]
fn countdown_loop() {
    let mut bus = TestBus::new();
    let mut cpu = setup_arm(
        &mut bus,
        0x100,
        &[
            0xE3A0_0000, // mov r0, #0
            0xE3A0_100A, // mov r1, #10
            0xE280_0002, // add r0, r0, #2
            0xE251_1001, // subs r1, r1, #1
            0x1AFF_FFFC, // bne 0x108
            0xEAFF_FFFE, // b .
        ],
    );
    for _ in 0..100 {
        if cpu.next_instruction_address() == 0x114 {
            break;
        }
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.next_instruction_address(), 0x114, "loop should exit");
    assert_eq!(cpu.regs.r[0], 20);
    assert!(cpu.regs.flag(flags::Z));
}

#[test]
fn branch_with_link_and_return() {
    let mut bus = TestBus::new();
    let mut cpu = setup_arm(
        &mut bus,
        0x100,
        &[
            0xEB00_0002, // bl 0x110
            0xE3A0_2007, // mov r2, #7
            0xEAFF_FFFE, // b .
        ],
    );
    bus.load_arm(0x110, &[0xE3A0_1001, 0xE1A0_F00E]); // mov r1, #1; mov pc, lr
    run(&mut cpu, &mut bus, 4);
    assert_eq!(cpu.regs.r[14], 0x104, "link register holds the return address");
    assert_eq!(cpu.regs.r[1], 1);
    assert_eq!(cpu.regs.r[2], 7);
}

#[test]
fn misaligned_loads_rotate() {
    let mut bus = TestBus::new();
    bus.load_arm(0x200, &[0x1122_F344]);
    let mut cpu = setup_arm(
        &mut bus,
        0x100,
        &[
            0xE590_1000, // ldr r1, [r0]
            0xE5D0_2000, // ldrb r2, [r0]
            0xE1D0_30B0, // ldrh r3, [r0]
            0xE1D0_40F0, // ldrsh r4, [r0]
        ],
    );
    cpu.regs.r[0] = 0x201;
    run(&mut cpu, &mut bus, 4);
    assert_eq!(cpu.regs.r[1], 0x4411_22F3, "word load rotates by the byte offset");
    assert_eq!(cpu.regs.r[2], 0xF3);
    assert_eq!(cpu.regs.r[3], 0x4400_00F3, "odd halfword load rotates by 8");
    assert_eq!(cpu.regs.r[4], 0xFFFF_FFF3, "odd LDRSH loads a signed byte");
}

#[test]
fn block_transfer_push_pop() {
    let mut bus = TestBus::new();
    let mut cpu = setup_arm(
        &mut bus,
        0x100,
        &[
            0xE92D_0007, // stmfd sp!, {r0-r2}
            0xE3A0_0000, // mov r0, #0
            0xE3A0_1000, // mov r1, #0
            0xE3A0_2000, // mov r2, #0
            0xE8BD_0007, // ldmfd sp!, {r0-r2}
        ],
    );
    cpu.regs.r[13] = 0x1000;
    cpu.regs.r[0] = 1;
    cpu.regs.r[1] = 2;
    cpu.regs.r[2] = 3;
    run(&mut cpu, &mut bus, 1);
    assert_eq!(cpu.regs.r[13], 0xFF4);
    assert_eq!(bus.peek32(0xFF4), 1);
    assert_eq!(bus.peek32(0xFFC), 3);
    run(&mut cpu, &mut bus, 4);
    assert_eq!(&cpu.regs.r[0..3], &[1, 2, 3]);
    assert_eq!(cpu.regs.r[13], 0x1000);
}

#[test]
fn bx_switches_to_thumb() {
    let mut bus = TestBus::new();
    let mut cpu = setup_arm(
        &mut bus,
        0x100,
        &[
            0xE28F_0001, // add r0, pc, #1
            0xE12F_FF10, // bx r0
        ],
    );
    bus.load_thumb(0x108, &[0x212A, 0x3108, 0xE7FE]); // mov r1, #42; add r1, #8; b .
    run(&mut cpu, &mut bus, 4);
    assert!(cpu.regs.is_thumb());
    assert_eq!(cpu.regs.r[1], 50);
    assert_eq!(cpu.next_instruction_address(), 0x10C);
}

#[test]
fn swi_enters_supervisor_and_returns() {
    let mut bus = TestBus::new();
    bus.load_arm(0x08, &[0xE1B0_F00E]); // movs pc, lr
    let mut cpu = setup_arm(&mut bus, 0x100, &[0xEF10_0000, 0xE3A0_0001]);
    cpu.regs.cpsr = 0x8000_001F;

    run(&mut cpu, &mut bus, 1);
    assert_eq!(cpu.regs.mode(), Mode::Supervisor);
    assert_eq!(cpu.regs.spsr(), 0x8000_001F, "SPSR holds the caller's CPSR");
    assert_eq!(cpu.regs.r[14], 0x104, "LR is the instruction after the SWI");
    assert!(cpu.regs.flag(flags::I));
    assert_eq!(cpu.next_instruction_address(), 0x08);

    run(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.regs.mode(), Mode::System);
    assert_eq!(cpu.regs.cpsr, 0x8000_001F);
    assert_eq!(cpu.regs.r[0], 1);
}

#[test]
fn irq_entry_and_return() {
    let mut bus = TestBus::new();
    bus.load_arm(0x18, &[0xE25E_F004]); // subs pc, lr, #4
    let mut cpu = setup_arm(&mut bus, 0x100, &[0xE3A0_0001, 0xE3A0_1002]);

    bus.irq = true;
    run(&mut cpu, &mut bus, 1);
    assert_eq!(cpu.regs.mode(), Mode::Irq);
    assert_eq!(cpu.regs.r[14], 0x104, "LR is the interrupted instruction + 4");
    assert_eq!(cpu.regs.spsr(), 0x1F);
    assert_eq!(cpu.regs.r[0], 0, "interrupted instruction not executed yet");

    bus.irq = false;
    run(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.regs.mode(), Mode::System);
    assert_eq!(cpu.regs.r[0], 1, "execution resumes at the interrupted instruction");
}

#[test]
fn masked_irq_is_ignored() {
    let mut bus = TestBus::new();
    let mut cpu = setup_arm(&mut bus, 0x100, &[0xE3A0_0001]);
    cpu.regs.cpsr |= flags::I;
    bus.irq = true;
    run(&mut cpu, &mut bus, 1);
    assert_eq!(cpu.regs.mode(), Mode::System);
    assert_eq!(cpu.regs.r[0], 1);
}

#[test]
fn undefined_instruction_trap() {
    let mut bus = TestBus::new();
    bus.load_arm(0x04, &[0xE1B0_F00E]);
    let mut cpu = setup_arm(&mut bus, 0x100, &[0xE7F0_00F0]);
    run(&mut cpu, &mut bus, 1);
    assert_eq!(cpu.regs.mode(), Mode::Undefined);
    assert_eq!(cpu.regs.r[14], 0x104);
}

#[test]
fn long_multiplies() {
    let mut bus = TestBus::new();
    let mut cpu = setup_arm(
        &mut bus,
        0x100,
        &[
            0xE083_2190, // umull r2, r3, r0, r1
            0xE0C5_4190, // smull r4, r5, r0, r1
        ],
    );
    cpu.regs.r[0] = 0xFFFF_FFFF;
    cpu.regs.r[1] = 2;
    run(&mut cpu, &mut bus, 2);
    assert_eq!((cpu.regs.r[2], cpu.regs.r[3]), (0xFFFF_FFFE, 1));
    assert_eq!((cpu.regs.r[4], cpu.regs.r[5]), (0xFFFF_FFFE, 0xFFFF_FFFF));
}

#[test]
fn thumb_long_branch_with_link() {
    let mut bus = TestBus::new();
    let mut cpu = setup_thumb(&mut bus, 0x100, &[0xF000, 0xF87E, 0x2001]);
    bus.load_thumb(0x200, &[0x2109, 0x4770]); // mov r1, #9; bx lr
    run(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.next_instruction_address(), 0x200);
    assert_eq!(cpu.regs.r[14], 0x105, "LR has the Thumb bit set");
    run(&mut cpu, &mut bus, 3);
    assert!(cpu.regs.is_thumb());
    assert_eq!(cpu.regs.r[1], 9);
    assert_eq!(cpu.regs.r[0], 1);
}

#[test]
fn thumb_push_pop() {
    let mut bus = TestBus::new();
    let mut cpu = setup_thumb(&mut bus, 0x100, &[0xB503, 0x2000, 0x2100, 0xBC03]);
    cpu.regs.r[13] = 0x1000;
    cpu.regs.r[0] = 7;
    cpu.regs.r[1] = 8;
    cpu.regs.r[14] = 0x111;
    run(&mut cpu, &mut bus, 4);
    assert_eq!((cpu.regs.r[0], cpu.regs.r[1]), (7, 8));
    assert_eq!(cpu.regs.r[13], 0xFFC);
    assert_eq!(bus.peek32(0xFFC), 0x111, "LR pushed above the low registers");
}

#[test]
fn cycle_costs_per_instruction_class() {
    let mut bus = TestBus::new();
    let mut cpu = setup_arm(
        &mut bus,
        0x100,
        &[
            0xE3A0_0080, // mov r0, #0x80
            0xE590_1000, // ldr r1, [r0]
            0xE002_0090, // mul r2, r0, r0
            0xEAFF_FFFE, // b .
        ],
    );
    assert_eq!(cpu.step(&mut bus), 1, "data processing: one fetch");
    assert_eq!(cpu.step(&mut bus), 3, "load: fetch, read, internal");
    assert_eq!(cpu.step(&mut bus), 2, "multiply by a small value: one internal cycle");
    assert_eq!(cpu.step(&mut bus), 3, "branch: fetch plus pipeline refill");
}

#[test]
fn msr_switches_banked_stack() {
    let mut bus = TestBus::new();
    let mut cpu = setup_arm(
        &mut bus,
        0x100,
        &[
            0xE321_F012, // msr cpsr_c, #0x12
            0xE3A0_DB01, // mov sp, #0x400
            0xE321_F01F, // msr cpsr_c, #0x1f
        ],
    );
    cpu.regs.r[13] = 0x0300_7F00;
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.regs.mode(), Mode::System);
    assert_eq!(cpu.regs.r[13], 0x0300_7F00);
    assert_eq!(cpu.regs.sp_of(Mode::Irq), 0x400);
}

#[test]
fn host_serviced_swi() {
    let mut bus = TestBus::new();
    bus.swi = Some(|comment, regs| {
        regs.r[0] = u32::from(comment) + 0x40;
        SwiOutcome::Handled { cycles: 5 }
    });
    let mut cpu = setup_thumb(&mut bus, 0x100, &[0xDF02, 0x2101]); // swi 2; mov r1, #1
    assert_eq!(cpu.step(&mut bus), 6, "fetch plus the host's reported cycles");
    assert_eq!(cpu.regs.r[0], 0x42);
    assert_eq!(cpu.regs.mode(), Mode::System, "no exception taken");
    cpu.step(&mut bus);
    assert_eq!(cpu.regs.r[1], 1);
}

#[test]
fn retried_swi_executes_again() {
    let mut bus = TestBus::new();
    bus.swi = Some(|_, regs| {
        regs.r[2] += 1;
        if regs.r[2] < 3 {
            SwiOutcome::Retry { cycles: 0 }
        } else {
            SwiOutcome::Handled { cycles: 0 }
        }
    });
    let mut cpu = setup_arm(&mut bus, 0x100, &[0xEF05_0000, 0xE3A0_1001]);
    run(&mut cpu, &mut bus, 1);
    assert_eq!(cpu.next_instruction_address(), 0x100, "PC rewound to the SWI");
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.regs.r[2], 3);
    assert_eq!(cpu.regs.r[1], 1);
}
