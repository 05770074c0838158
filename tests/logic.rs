use thumb_rs::exec::ThumbExecutor;
use thumb_rs::isa::thumb::ThumbDecoder;
use thumb_rs::{Bus, Cpu, MemoryMap, MemoryMapConfig, Reg};

const CODE: u32 = 0x2000_0000;

fn load(code: &[u16]) -> (Cpu, MemoryMap) {
    let mut mem = MemoryMap::new(&MemoryMapConfig::default()).unwrap();
    for (i, &hw) in code.iter().enumerate() {
        mem.write_u16(CODE + 2 * i as u32, hw).unwrap();
    }
    let mut cpu = Cpu::new();
    cpu.reset(0x2000_2000, CODE);
    (cpu, mem)
}

fn run(cpu: &mut Cpu, mem: &mut MemoryMap, n: usize) {
    let dec = ThumbDecoder::new();
    let exec = ThumbExecutor::new();
    for _ in 0..n {
        cpu.step(mem, &dec, &exec).unwrap();
    }
}

fn dp(op: u32, rdn: u32, rm: u32) -> u16 {
    (0x4000 | op << 6 | rm << 3 | rdn) as u16
}

#[test]
fn movs_sets_nz() {
    // MOVS r0, #5
    let (mut cpu, mut mem) = load(&[0x2005]);
    cpu.set_nzcv(0, true, true);
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[0], 5);
    assert!(!cpu.n() && !cpu.z());
    // C and V untouched
    assert!(cpu.c() && cpu.v());
    assert_eq!(cpu.read(Reg::PC), CODE + 2);
    assert_eq!(cpu.ticks, 1);
}

#[test]
fn adds_wraps_to_zero() {
    // ADDS r0, r0, #1
    let (mut cpu, mut mem) = load(&[0x1C40]);
    cpu.regs[0] = 0xFFFF_FFFF;
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[0], 0);
    assert!(cpu.z() && cpu.c() && !cpu.n() && !cpu.v());
}

#[test]
fn adds_register_overflow() {
    // ADDS r2, r0, r1
    let (mut cpu, mut mem) = load(&[0x1842]);
    cpu.regs[0] = 0x7FFF_FFFF;
    cpu.regs[1] = 1;
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[2], 0x8000_0000);
    assert!(cpu.n() && cpu.v() && !cpu.c() && !cpu.z());
}

#[test]
fn subs_and_cmp() {
    // SUBS r0, #1 ; CMP r1, #5
    let (mut cpu, mut mem) = load(&[0x3801, 0x2905]);
    cpu.regs[1] = 5;
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[0], 0xFFFF_FFFF);
    assert!(cpu.n() && !cpu.c());
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[1], 5);
    assert!(cpu.z() && cpu.c() && !cpu.n());
}

#[test]
fn bitwise_group() {
    let (mut cpu, mut mem) = load(&[
        dp(0, 0, 1),  // ANDS r0, r1
        dp(12, 2, 1), // ORRS r2, r1
        dp(14, 3, 1), // BICS r3, r1
        dp(15, 4, 5), // MVNS r4, r5
    ]);
    cpu.regs[0] = 0xF0F0;
    cpu.regs[1] = 0xFF00;
    cpu.regs[2] = 0x000F;
    cpu.regs[3] = 0xFFFF;
    run(&mut cpu, &mut mem, 4);
    assert_eq!(cpu.regs[0], 0xF000);
    assert_eq!(cpu.regs[2], 0xFF0F);
    assert_eq!(cpu.regs[3], 0x00FF);
    assert_eq!(cpu.regs[4], 0xFFFF_FFFF);
    assert!(cpu.n());
}

#[test]
fn tst_only_sets_flags() {
    // TST r0, r1
    let (mut cpu, mut mem) = load(&[dp(8, 0, 1)]);
    cpu.regs[0] = 0xF0;
    cpu.regs[1] = 0x0F;
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[0], 0xF0);
    assert!(cpu.z());
}

#[test]
fn register_shift_uses_bottom_byte() {
    // LSLS r0, r1 with r1 = 0x100: amount 0, value and carry unchanged
    let (mut cpu, mut mem) = load(&[dp(2, 0, 1), dp(4, 2, 3)]);
    cpu.regs[0] = 0x8000_0001;
    cpu.regs[1] = 0x100;
    cpu.set_nzcv(0, true, false);
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[0], 0x8000_0001);
    assert!(cpu.c() && cpu.n() && !cpu.z());

    // ASRS r2, r3 by 40
    cpu.regs[2] = 0x8000_0000;
    cpu.regs[3] = 40;
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[2], 0xFFFF_FFFF);
    assert!(cpu.c());
}

#[test]
fn lsrs_immediate_zero_means_32() {
    // LSRS r0, r0, #32
    let (mut cpu, mut mem) = load(&[0x0800]);
    cpu.regs[0] = 0x8000_0000;
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[0], 0);
    assert!(cpu.z() && cpu.c());
}

#[test]
fn muls_negs_adcs() {
    let (mut cpu, mut mem) = load(&[
        dp(13, 0, 1), // MULS r0, r1
        dp(9, 2, 3),  // RSBS r2, r3, #0
        dp(5, 4, 5),  // ADCS r4, r5
    ]);
    cpu.regs[0] = 6;
    cpu.regs[1] = 7;
    cpu.regs[3] = 5;
    cpu.regs[4] = 1;
    cpu.regs[5] = 2;
    run(&mut cpu, &mut mem, 2);
    assert_eq!(cpu.regs[0], 42);
    assert_eq!(cpu.regs[2], (-5i32) as u32);
    assert!(cpu.n() && !cpu.c());

    cpu.set_nzcv(0, true, false);
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[4], 4);
}

#[test]
fn extends_and_reverses() {
    let (mut cpu, mut mem) = load(&[
        0xB248, // SXTB r0, r1
        0xB28A, // UXTH r2, r1
        0xBA1B, // REV r3, r3
        0xBA64, // REV16 r4, r4
        0xBAED, // REVSH r5, r5
    ]);
    cpu.regs[1] = 0x1234_8080;
    cpu.regs[3] = 0x1234_5678;
    cpu.regs[4] = 0x1234_5678;
    cpu.regs[5] = 0x0000_0080;
    run(&mut cpu, &mut mem, 5);
    assert_eq!(cpu.regs[0], 0xFFFF_FF80);
    assert_eq!(cpu.regs[2], 0x8080);
    assert_eq!(cpu.regs[3], 0x7856_3412);
    assert_eq!(cpu.regs[4], 0x3412_7856);
    assert_eq!(cpu.regs[5], 0xFFFF_8000);
}

#[test]
fn high_register_moves_leave_flags() {
    // MOV r8, r0 ; ADD r8, r1 ; CMP r8, r1
    let (mut cpu, mut mem) = load(&[0x4680, 0x4488, 0x4588]);
    cpu.regs[0] = 3;
    cpu.regs[1] = 4;
    run(&mut cpu, &mut mem, 2);
    assert_eq!(cpu.regs[8], 7);
    assert_eq!(cpu.status(), 0);
    run(&mut cpu, &mut mem, 1);
    assert!(cpu.c() && !cpu.z());
}

#[test]
fn pc_operand_reads_ahead() {
    // MOV r0, pc at CODE reads CODE + 4
    let (mut cpu, mut mem) = load(&[0x4678]);
    run(&mut cpu, &mut mem, 1);
    assert_eq!(cpu.regs[0], CODE + 4);
}

#[test]
fn cps_toggles_primask() {
    // CPSID i ; CPSIE i
    let (mut cpu, mut mem) = load(&[0xB672, 0xB662]);
    run(&mut cpu, &mut mem, 1);
    assert!(cpu.primask);
    run(&mut cpu, &mut mem, 1);
    assert!(!cpu.primask);
}
