use thumb_rs::exec::ThumbExecutor;
use thumb_rs::isa::thumb::ThumbDecoder;
use thumb_rs::{Bus, Cpu, MemoryMap, MemoryMapConfig, Reg, Trap};

const CODE: u32 = 0x2000_0000;
const DATA: u32 = 0x2000_0100;

fn load(code: &[u16]) -> (Cpu, MemoryMap) {
    let mut mem = MemoryMap::new(&MemoryMapConfig::default()).unwrap();
    for (i, &hw) in code.iter().enumerate() {
        mem.write_u16(CODE + 2 * i as u32, hw).unwrap();
    }
    let mut cpu = Cpu::new();
    cpu.reset(0x2000_2000, CODE);
    (cpu, mem)
}

fn step(cpu: &mut Cpu, mem: &mut MemoryMap) -> Result<(), Trap> {
    cpu.step(mem, &ThumbDecoder::new(), &ThumbExecutor::new()).map(|_| ())
}

#[test]
fn word_byte_half_immediate_offsets() {
    let (mut cpu, mut mem) = load(&[
        0x6048, // str r0, [r1, #4]
        0x684A, // ldr r2, [r1, #4]
        0x7048, // strb r0, [r1, #1]
        0x888B, // ldrh r3, [r1, #4]
    ]);
    cpu.regs[0] = 0xA1B2_C3D4;
    cpu.regs[1] = DATA;
    for _ in 0..4 {
        step(&mut cpu, &mut mem).unwrap();
    }
    assert_eq!(mem.read_u32(DATA + 4).unwrap(), 0xA1B2_C3D4);
    assert_eq!(cpu.regs[2], 0xA1B2_C3D4);
    assert_eq!(mem.read_u8(DATA + 1).unwrap(), 0xD4);
    assert_eq!(cpu.regs[3], 0xC3D4);
}

#[test]
fn register_offset_sign_extends() {
    let (mut cpu, mut mem) = load(&[
        0x568C, // ldrsb r4, [r1, r2]
        0x5E8D, // ldrsh r5, [r1, r2]
        0x5C8E, // ldrb r6, [r1, r2]
    ]);
    mem.write_u16(DATA + 2, 0x8081).unwrap();
    cpu.regs[1] = DATA;
    cpu.regs[2] = 2;
    for _ in 0..3 {
        step(&mut cpu, &mut mem).unwrap();
    }
    assert_eq!(cpu.regs[4], 0xFFFF_FF81);
    assert_eq!(cpu.regs[5], 0xFFFF_8081);
    assert_eq!(cpu.regs[6], 0x81);
}

#[test]
fn literal_base_is_word_aligned() {
    // nop ; ldr r0, [pc, #4] ; adr r1, #8 ; nop ; .word
    let (mut cpu, mut mem) = load(&[0xBF00, 0x4801, 0xA102, 0xBF00]);
    mem.write_u32(CODE + 8, 0x1234_5678).unwrap();
    for _ in 0..3 {
        step(&mut cpu, &mut mem).unwrap();
    }
    // the load at CODE+2 is based on align(CODE+6) = CODE+4
    assert_eq!(cpu.regs[0], 0x1234_5678);
    assert_eq!(cpu.regs[1], CODE + 16);
}

#[test]
fn sp_relative_forms() {
    let (mut cpu, mut mem) = load(&[
        0xB082, // sub sp, #8
        0x9001, // str r0, [sp, #4]
        0x9901, // ldr r1, [sp, #4]
        0xAA01, // add r2, sp, #4
        0xB002, // add sp, #8
    ]);
    cpu.regs[0] = 99;
    for _ in 0..5 {
        step(&mut cpu, &mut mem).unwrap();
    }
    assert_eq!(cpu.regs[1], 99);
    assert_eq!(cpu.regs[2], 0x2000_1FFC);
    assert_eq!(cpu.read(Reg::SP), 0x2000_2000);
    assert_eq!(mem.read_u32(0x2000_1FFC).unwrap(), 99);
}

#[test]
fn misaligned_load_faults_and_rolls_back() {
    // ldr r2, [r1, #0]
    let (mut cpu, mut mem) = load(&[0x680A]);
    cpu.regs[1] = DATA + 2;
    cpu.regs[2] = 7;
    let trap = step(&mut cpu, &mut mem).unwrap_err();
    assert_eq!(trap, Trap::HardFault { pc: CODE, addr: DATA + 2, align: 4 });
    assert_eq!(
        trap.to_string(),
        "HardFault at PC 0x20000000: address 0x20000102 was not aligned on a 4-byte boundary"
    );
    assert_eq!(cpu.read(Reg::PC), CODE);
    assert_eq!(cpu.regs[2], 7);
}

#[test]
fn stores_to_rom_and_unmapped_fault() {
    // str r0, [r1, #0]
    let (mut cpu, mut mem) = load(&[0x6008]);
    cpu.regs[1] = 0x0800_0000;
    assert_eq!(
        step(&mut cpu, &mut mem),
        Err(Trap::HardFault { pc: CODE, addr: 0x0800_0000, align: 0 })
    );
    cpu.regs[1] = 0x1000_0000;
    let trap = step(&mut cpu, &mut mem).unwrap_err();
    assert_eq!(trap.to_string(), "HardFault at PC 0x20000000: address 0x10000000 was not mapped");
}

#[test]
fn fetch_from_unmapped_faults() {
    let (mut cpu, mut mem) = load(&[]);
    cpu.write(Reg::PC, 0xFFFF_FFFE);
    assert_eq!(
        step(&mut cpu, &mut mem),
        Err(Trap::HardFault { pc: 0xFFFF_FFFE, addr: 0xFFFF_FFFE, align: 0 })
    );
}

#[test]
fn io_store_is_logged() {
    // strb r0, [r1, #0]
    let (mut cpu, mut mem) = load(&[0x7008]);
    cpu.regs[0] = 0x41;
    cpu.regs[1] = 0x4000_0010;
    step(&mut cpu, &mut mem).unwrap();
    let log = mem.take_io_writes();
    assert_eq!(log.len(), 1);
    assert_eq!((log[0].addr, log[0].value, log[0].display), (0x4000_0010, 0x41, true));
}
