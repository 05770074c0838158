use pretty_assertions::assert_eq;
use thumb_rs::asm::DiagnosticKind;
use thumb_rs::sim::SimError;
use thumb_rs::{Access, BusFault, Halt, Reg, SimConfig, Simulator, Trap};

const HEAD: &str = ".cpu cortex-m0\n.thumb\n.syntax unified\n.fpu softvfp\n.global main\n";

// startup at 0x08000300: movs / subs / bne / bkpt
const COUNTDOWN: &str = "startup:\n    movs r0, #3\nloop:\n    subs r0, #1\n    bne loop\n    bkpt #1\n";

fn sim(body: &str) -> Simulator {
    let mut sim = Simulator::new(SimConfig::default()).unwrap();
    let a = sim.assemble(&format!("{HEAD}{body}"));
    assert!(a.ok, "{:?}", a.diagnostics);
    sim
}

#[test]
fn reset_state() {
    let sim = sim(COUNTDOWN);
    assert_eq!(sim.cpu.read(Reg::PC), 0x0800_0300);
    assert_eq!(sim.cpu.read(Reg::SP), 0x2000_2000);
    assert_eq!(sim.cpu.read(Reg::LR), 0xFFFF_FFFF);
    assert_eq!(sim.line_of(0x0800_0302), Some(9));
}

#[test]
fn reset_clears_ticks_and_keeps_memory() {
    let mut sim = sim(COUNTDOWN);
    sim.run_until_halt(1000);
    assert!(sim.cpu.ticks > 0);
    sim.write_memory(0x2000_0010, Access::Word, 0xCAFE).unwrap();

    sim.reset().unwrap();
    assert_eq!(sim.cpu.ticks, 0);
    assert_eq!(sim.cpu.read(Reg::PC), 0x0800_0300);
    assert_eq!(sim.read_memory(0x2000_0010, Access::Word).unwrap(), 0xCAFE);

    let a = sim.assemble(&format!("{HEAD}{COUNTDOWN}"));
    assert!(a.ok);
    assert_eq!(sim.read_memory(0x2000_0010, Access::Word).unwrap(), 0);
}

#[test]
fn runs_to_bkpt() {
    let mut sim = sim(COUNTDOWN);
    let halt = sim.run_until_halt(1000);
    assert_eq!(halt, Halt::Trap(Trap::Breakpoint { pc: 0x0800_0306, imm: 1 }));
    assert_eq!(sim.cpu.regs[0], 0);
    assert_eq!(sim.cpu.read(Reg::PC), 0x0800_0306);
    assert!(!sim.is_running());
}

#[test]
fn breakpoint_stops_once_per_visit() {
    let mut sim = sim(COUNTDOWN);
    assert_eq!(sim.set_breakpoint_line(9).unwrap(), 0x0800_0302);
    assert_eq!(sim.set_breakpoint_line(8), Err(SimError::NoInstruction(8)));

    assert_eq!(sim.run_until_halt(100), Halt::Breakpoint { pc: 0x0800_0302 });
    assert_eq!(sim.cpu.regs[0], 3);
    assert_eq!(sim.run_until_halt(100), Halt::Breakpoint { pc: 0x0800_0302 });
    assert_eq!(sim.cpu.regs[0], 2);

    sim.clear_breakpoint(0x0800_0302);
    assert_eq!(sim.breakpoints().count(), 0);
    assert!(matches!(sim.run_until_halt(100), Halt::Trap(Trap::Breakpoint { .. })));
}

#[test]
fn manual_step_ignores_breakpoints() {
    let mut sim = sim(COUNTDOWN);
    sim.set_breakpoint(0x0800_0300);
    let r = sim.step();
    assert_eq!(r.pc, 0x0800_0300);
    assert_eq!(r.text, "movs    r0, #3");
    assert_eq!(r.trap, None);
    assert_eq!(r.snapshot.regs[0], 3);
    let r = sim.step();
    let r2 = sim.step();
    assert_eq!(r.text, "subs    r0, #1");
    assert_eq!(r2.text, "bne     loop");
}

#[test]
fn tick_runs_in_batches() {
    let cfg = SimConfig { batch_size: 2, ..SimConfig::default() };
    let mut sim = Simulator::new(cfg).unwrap();
    assert!(sim.assemble(&format!("{HEAD}startup: b startup\n")).ok);
    assert_eq!(sim.tick(), None);
    assert_eq!(sim.cpu.ticks, 0);

    sim.run();
    assert_eq!(sim.tick(), None);
    assert_eq!(sim.cpu.ticks, 2);
    assert!(sim.is_running());
    sim.stop();
    assert_eq!(sim.tick(), None);
    assert_eq!(sim.cpu.ticks, 2);
}

#[test]
fn step_limit() {
    let mut sim = sim("startup: b startup\n");
    assert_eq!(sim.run_until_halt(10), Halt::StepLimit);
    assert_eq!(sim.cpu.ticks, 10);
}

#[test]
fn missing_entry_label() {
    let mut sim = Simulator::new(SimConfig::default()).unwrap();
    let a = sim.assemble(&format!("{HEAD}main: nop\n"));
    assert!(!a.ok);
    let d = a.diagnostics.last().unwrap();
    assert_eq!(d.message, "Undefined reference to \"startup\"");
    assert_eq!(d.kind, DiagnosticKind::Layout);
    assert_eq!(sim.cpu.read(Reg::PC), 0xFFFF_FFFE);

    let r = sim.step();
    assert_eq!(r.trap, Some(Trap::HardFault { pc: 0xFFFF_FFFE, addr: 0xFFFF_FFFE, align: 0 }));
}

#[test]
fn failed_assembly_reports_line() {
    let mut sim = Simulator::new(SimConfig::default()).unwrap();
    let a = sim.assemble(&format!("{HEAD}startup: frob r0\n"));
    assert!(!a.ok);
    assert!(a.segments.is_empty());
    assert_eq!(a.diagnostics.len(), 1);
    assert_eq!(a.diagnostics[0].line, 6);
}

#[test]
fn goto_and_registers() {
    let mut sim = sim(COUNTDOWN);
    assert_eq!(sim.goto("loop").unwrap(), 0x0800_0302);
    assert_eq!(sim.goto("0x08000306").unwrap(), 0x0800_0306);
    assert_eq!(sim.goto("$08000301").unwrap(), 0x0800_0300);
    assert_eq!(sim.goto("nowhere!"), Err(SimError::BadTarget("nowhere!".into())));

    sim.set_register("r3", 7).unwrap();
    assert_eq!(sim.register("R3").unwrap(), 7);
    sim.set_register("apsr", 0x6000_0000).unwrap();
    assert_eq!(sim.register("apsr").unwrap(), 0x6000_0000);
    assert!(sim.cpu.z() && sim.cpu.c());
    assert_eq!(sim.register("r99"), Err(SimError::UnknownRegister("r99".into())));
}

#[test]
fn memory_access_goes_through_the_bus() {
    let mut sim = sim(COUNTDOWN);
    sim.write_memory(0x2000_0000, Access::Word, 0xCAFE_BABE).unwrap();
    assert_eq!(sim.read_memory(0x2000_0001, Access::Byte).unwrap(), 0xBA);
    assert_eq!(
        sim.read_memory(0x2000_0002, Access::Word),
        Err(SimError::Bus(BusFault::unaligned(0x2000_0002, 4)))
    );
    assert!(sim.write_memory(0x0800_0300, Access::Half, 0).is_err());
    assert!(sim.hexdump(0x2000_0000, 4).starts_with("20000000: be ba fe ca"));
}

#[test]
fn disassembly_uses_program_labels() {
    let mut sim = sim(COUNTDOWN);
    let texts: Vec<String> = sim.disassemble(0x0800_0300, 8).into_iter().map(|l| l.text).collect();
    assert_eq!(texts, vec!["movs    r0, #3", "subs    r0, #1", "bne     loop", "bkpt    #1"]);
}

#[test]
fn sums_a_data_table() {
    let mut sim = sim(concat!(
        "startup:\n",
        "    ldr r1, =table\n",
        "    movs r0, #0\n",
        "    movs r2, #4\n",
        "sum:\n",
        "    ldrb r3, [r1]\n",
        "    adds r0, r0, r3\n",
        "    adds r1, #1\n",
        "    subs r2, #1\n",
        "    bne sum\n",
        "    bl double\n",
        "    bkpt #0\n",
        "double:\n",
        "    push {lr}\n",
        "    lsls r0, r0, #1\n",
        "    pop {pc}\n",
        ".data\n",
        "table: .byte 1, 2, 3, 4\n",
    ));
    let halt = sim.run_until_halt(1000);
    assert!(matches!(halt, Halt::Trap(Trap::Breakpoint { imm: 0, .. })));
    assert_eq!(sim.cpu.regs[0], 20);
    assert_eq!(sim.cpu.read(Reg::SP), 0x2000_2000);
    assert_eq!(sim.snapshot().to_string().lines().count(), 5);
}
