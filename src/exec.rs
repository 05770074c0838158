use crate::alu::{add_with_carry, align_down, asr_c, lsl_c, lsr_c, ror_c, sign_extend, sub_with_carry};
use crate::cpu::{Cpu, Reg, Trap};
use crate::decoder::{Decoded, DpOp, ExtendOp, Hint, Instr, MemImmOp, MemRegOp, RevOp};
use crate::memory::{Bus, BusFault};

pub trait Executor {
    fn exec<B: Bus>(&self, cpu: &mut Cpu, bus: &mut B, d: &Decoded) -> Result<(), Trap>;
}

/// Executes [`Instr`] against the register file and a [`Bus`]. Entered with
/// PC already advanced past the instruction.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThumbExecutor;

impl ThumbExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// Operand read; the PC reads as the instruction address plus 4.
fn get(cpu: &Cpu, r: Reg, here: u32) -> u32 {
    if r == Reg::PC {
        here.wrapping_add(4)
    } else {
        cpu.read(r)
    }
}

/// Word-aligned PC base used by literal loads and ADR.
fn literal_base(here: u32) -> u32 {
    align_down(here.wrapping_add(4), 4)
}

fn branch(cpu: &mut Cpu, here: u32, disp: u32) {
    cpu.write(Reg::PC, here.wrapping_add(4).wrapping_add(disp));
}

impl Executor for ThumbExecutor {
    fn exec<B: Bus>(&self, cpu: &mut Cpu, bus: &mut B, d: &Decoded) -> Result<(), Trap> {
        let here = cpu.peek(Reg::PC).wrapping_sub(d.width as u32);
        let fault = |f: BusFault| Trap::hard_fault(here, f);

        match d.instr {
            Instr::LslImm { rd, rm, imm5 } => {
                let (res, c) = lsl_c(cpu.read(rm), imm5 as u32, cpu.c());
                cpu.write(rd, res);
                cpu.set_nzc(res, c);
            }
            Instr::LsrImm { rd, rm, imm5 } => {
                let amount = if imm5 == 0 { 32 } else { imm5 as u32 };
                let (res, c) = lsr_c(cpu.read(rm), amount, cpu.c());
                cpu.write(rd, res);
                cpu.set_nzc(res, c);
            }
            Instr::AsrImm { rd, rm, imm5 } => {
                let amount = if imm5 == 0 { 32 } else { imm5 as u32 };
                let (res, c) = asr_c(cpu.read(rm), amount, cpu.c());
                cpu.write(rd, res);
                cpu.set_nzc(res, c);
            }
            Instr::AddReg { rd, rn, rm } => {
                let (res, c, v) = add_with_carry(cpu.read(rn), cpu.read(rm), false);
                cpu.write(rd, res);
                cpu.set_nzcv(res, c, v);
            }
            Instr::SubReg { rd, rn, rm } => {
                let (res, c, v) = sub_with_carry(cpu.read(rn), cpu.read(rm), true);
                cpu.write(rd, res);
                cpu.set_nzcv(res, c, v);
            }
            Instr::AddImm3 { rd, rn, imm3 } => {
                let (res, c, v) = add_with_carry(cpu.read(rn), imm3 as u32, false);
                cpu.write(rd, res);
                cpu.set_nzcv(res, c, v);
            }
            Instr::SubImm3 { rd, rn, imm3 } => {
                let (res, c, v) = sub_with_carry(cpu.read(rn), imm3 as u32, true);
                cpu.write(rd, res);
                cpu.set_nzcv(res, c, v);
            }
            Instr::MovImm { rd, imm8 } => {
                cpu.write(rd, imm8 as u32);
                cpu.set_nz(imm8 as u32);
            }
            Instr::CmpImm { rn, imm8 } => {
                let (res, c, v) = sub_with_carry(cpu.read(rn), imm8 as u32, true);
                cpu.set_nzcv(res, c, v);
            }
            Instr::AddImm8 { rdn, imm8 } => {
                let (res, c, v) = add_with_carry(cpu.read(rdn), imm8 as u32, false);
                cpu.write(rdn, res);
                cpu.set_nzcv(res, c, v);
            }
            Instr::SubImm8 { rdn, imm8 } => {
                let (res, c, v) = sub_with_carry(cpu.read(rdn), imm8 as u32, true);
                cpu.write(rdn, res);
                cpu.set_nzcv(res, c, v);
            }
            Instr::DataProc { op, rdn, rm } => data_proc(cpu, op, rdn, rm),
            Instr::AddHi { rdn, rm } => {
                let res = get(cpu, rdn, here).wrapping_add(get(cpu, rm, here));
                cpu.write(rdn, res);
            }
            Instr::CmpHi { rn, rm } => {
                let (res, c, v) = sub_with_carry(get(cpu, rn, here), get(cpu, rm, here), true);
                cpu.set_nzcv(res, c, v);
            }
            Instr::MovHi { rd, rm } => {
                let value = get(cpu, rm, here);
                cpu.write(rd, value);
            }
            Instr::Bx { rm } => {
                let target = get(cpu, rm, here);
                cpu.write(Reg::PC, target);
            }
            Instr::Blx { rm } => {
                let target = get(cpu, rm, here);
                cpu.write(Reg::LR, here.wrapping_add(2));
                cpu.write(Reg::PC, target);
            }
            Instr::LdrLit { rt, imm8 } => {
                let addr = literal_base(here).wrapping_add(imm8 as u32 * 4);
                let value = bus.read_u32(addr).map_err(fault)?;
                cpu.write(rt, value);
            }
            Instr::MemReg { op, rt, rn, rm } => {
                let addr = cpu.read(rn).wrapping_add(cpu.read(rm));
                match op {
                    MemRegOp::Str => bus.write_u32(addr, cpu.read(rt)).map_err(fault)?,
                    MemRegOp::Strh => bus.write_u16(addr, cpu.read(rt) as u16).map_err(fault)?,
                    MemRegOp::Strb => bus.write_u8(addr, cpu.read(rt) as u8).map_err(fault)?,
                    MemRegOp::Ldr => {
                        let v = bus.read_u32(addr).map_err(fault)?;
                        cpu.write(rt, v);
                    }
                    MemRegOp::Ldrh => {
                        let v = bus.read_u16(addr).map_err(fault)?;
                        cpu.write(rt, v as u32);
                    }
                    MemRegOp::Ldrb => {
                        let v = bus.read_u8(addr).map_err(fault)?;
                        cpu.write(rt, v as u32);
                    }
                    MemRegOp::Ldrsh => {
                        let v = bus.read_u16(addr).map_err(fault)?;
                        cpu.write(rt, v as i16 as i32 as u32);
                    }
                    MemRegOp::Ldrsb => {
                        let v = bus.read_u8(addr).map_err(fault)?;
                        cpu.write(rt, v as i8 as i32 as u32);
                    }
                }
            }
            Instr::MemImm { op, rt, rn, imm5 } => {
                let addr = cpu.read(rn).wrapping_add(imm5 as u32 * op.scale());
                match op {
                    MemImmOp::Str => bus.write_u32(addr, cpu.read(rt)).map_err(fault)?,
                    MemImmOp::Strh => bus.write_u16(addr, cpu.read(rt) as u16).map_err(fault)?,
                    MemImmOp::Strb => bus.write_u8(addr, cpu.read(rt) as u8).map_err(fault)?,
                    MemImmOp::Ldr => {
                        let v = bus.read_u32(addr).map_err(fault)?;
                        cpu.write(rt, v);
                    }
                    MemImmOp::Ldrh => {
                        let v = bus.read_u16(addr).map_err(fault)?;
                        cpu.write(rt, v as u32);
                    }
                    MemImmOp::Ldrb => {
                        let v = bus.read_u8(addr).map_err(fault)?;
                        cpu.write(rt, v as u32);
                    }
                }
            }
            Instr::StrSp { rt, imm8 } => {
                let addr = cpu.read(Reg::SP).wrapping_add(imm8 as u32 * 4);
                bus.write_u32(addr, cpu.read(rt)).map_err(fault)?;
            }
            Instr::LdrSp { rt, imm8 } => {
                let addr = cpu.read(Reg::SP).wrapping_add(imm8 as u32 * 4);
                let v = bus.read_u32(addr).map_err(fault)?;
                cpu.write(rt, v);
            }
            Instr::Adr { rd, imm8 } => {
                cpu.write(rd, literal_base(here).wrapping_add(imm8 as u32 * 4));
            }
            Instr::AddSpImm { rd, imm8 } => {
                let v = cpu.read(Reg::SP).wrapping_add(imm8 as u32 * 4);
                cpu.write(rd, v);
            }
            Instr::AddSp { imm7 } => {
                let v = cpu.read(Reg::SP).wrapping_add(imm7 as u32 * 4);
                cpu.write(Reg::SP, v);
            }
            Instr::SubSp { imm7 } => {
                let v = cpu.read(Reg::SP).wrapping_sub(imm7 as u32 * 4);
                cpu.write(Reg::SP, v);
            }
            Instr::Extend { op, rd, rm } => {
                let v = cpu.read(rm);
                let res = match op {
                    ExtendOp::Sxth => sign_extend(v & 0xFFFF, 16),
                    ExtendOp::Sxtb => sign_extend(v & 0xFF, 8),
                    ExtendOp::Uxth => v & 0xFFFF,
                    ExtendOp::Uxtb => v & 0xFF,
                };
                cpu.write(rd, res);
            }
            Instr::Rev { op, rd, rm } => {
                let v = cpu.read(rm);
                let res = match op {
                    RevOp::Rev => v.swap_bytes(),
                    RevOp::Rev16 => ((v & 0x00FF_00FF) << 8) | ((v >> 8) & 0x00FF_00FF),
                    RevOp::Revsh => sign_extend((v as u16).swap_bytes() as u32, 16),
                };
                cpu.write(rd, res);
            }
            Instr::Push { list } => {
                let count = list.count_ones();
                let base = cpu.read(Reg::SP).wrapping_sub(4 * count);
                check_block(bus, base, list).map_err(fault)?;
                let mut addr = base;
                for reg in registers(list) {
                    bus.write_u32(addr, cpu.read(reg)).map_err(fault)?;
                    addr = addr.wrapping_add(4);
                    cpu.tick();
                }
                cpu.write(Reg::SP, base);
            }
            Instr::Pop { list } => {
                let sp = cpu.read(Reg::SP);
                let values = read_block(bus, sp, list).map_err(fault)?;
                for (reg, v) in registers(list).zip(values) {
                    cpu.write(reg, v);
                    cpu.tick();
                }
                // SP is not in the list, so the final write is safe after a PC load
                cpu.write(Reg::SP, sp.wrapping_add(4 * list.count_ones()));
            }
            Instr::Stm { rn, list } => {
                let mut addr = cpu.read(rn);
                check_block(bus, addr, list as u16).map_err(fault)?;
                for reg in registers(list as u16) {
                    bus.write_u32(addr, cpu.read(reg)).map_err(fault)?;
                    addr = addr.wrapping_add(4);
                    cpu.tick();
                }
                cpu.write(rn, addr);
            }
            Instr::Ldm { rn, list } => {
                let base = cpu.read(rn);
                let values = read_block(bus, base, list as u16).map_err(fault)?;
                for (reg, v) in registers(list as u16).zip(values) {
                    cpu.write(reg, v);
                    cpu.tick();
                }
                if list & (1 << rn.0) == 0 {
                    cpu.write(rn, base.wrapping_add(4 * list.count_ones()));
                }
            }
            Instr::Cps { disable } => cpu.primask = disable,
            Instr::Bkpt { imm8 } => return Err(Trap::Breakpoint { pc: here, imm: imm8 }),
            Instr::Hint(h) => match h {
                Hint::Wfe | Hint::Wfi => return Err(Trap::Sleep { pc: here, hint: h.mnemonic() }),
                Hint::Nop | Hint::Yield | Hint::Sev => {}
            },
            Instr::BCond { cond, imm8 } => {
                if cond.holds(cpu.apsr) {
                    branch(cpu, here, sign_extend(imm8 as u32, 8) << 1);
                }
            }
            Instr::B { imm11 } => branch(cpu, here, sign_extend(imm11 as u32, 11) << 1),
            Instr::Bl { offset } => {
                cpu.write(Reg::LR, here.wrapping_add(4));
                // offset is relative to the address of the following instruction
                cpu.write(Reg::PC, here.wrapping_add(4).wrapping_add(offset as u32));
            }
            Instr::Undefined => return Err(Trap::Undefined { pc: here, raw: d.raw }),
        }
        Ok(())
    }
}

fn data_proc(cpu: &mut Cpu, op: DpOp, rdn: Reg, rm: Reg) {
    let a = cpu.read(rdn);
    let b = cpu.read(rm);
    match op {
        DpOp::And | DpOp::Eor | DpOp::Orr | DpOp::Bic | DpOp::Mvn | DpOp::Mul => {
            let res = match op {
                DpOp::And => a & b,
                DpOp::Eor => a ^ b,
                DpOp::Orr => a | b,
                DpOp::Bic => a & !b,
                DpOp::Mvn => !b,
                _ => a.wrapping_mul(b),
            };
            cpu.write(rdn, res);
            cpu.set_nz(res);
        }
        DpOp::Tst => cpu.set_nz(a & b),
        DpOp::Lsl | DpOp::Lsr | DpOp::Asr | DpOp::Ror => {
            let amount = b & 0xFF;
            let (res, c) = match op {
                DpOp::Lsl => lsl_c(a, amount, cpu.c()),
                DpOp::Lsr => lsr_c(a, amount, cpu.c()),
                DpOp::Asr => asr_c(a, amount, cpu.c()),
                _ => ror_c(a, amount, cpu.c()),
            };
            cpu.write(rdn, res);
            cpu.set_nzc(res, c);
        }
        DpOp::Adc | DpOp::Sbc | DpOp::Rsb => {
            let (res, c, v) = match op {
                DpOp::Adc => add_with_carry(a, b, cpu.c()),
                DpOp::Sbc => sub_with_carry(a, b, cpu.c()),
                _ => sub_with_carry(0, b, true),
            };
            cpu.write(rdn, res);
            cpu.set_nzcv(res, c, v);
        }
        DpOp::Cmp => {
            let (res, c, v) = sub_with_carry(a, b, true);
            cpu.set_nzcv(res, c, v);
        }
        DpOp::Cmn => {
            let (res, c, v) = add_with_carry(a, b, false);
            cpu.set_nzcv(res, c, v);
        }
    }
}

/// Registers named by a list mask, lowest first.
pub fn registers(list: u16) -> impl Iterator<Item = Reg> {
    (0..16u8).filter(move |i| list & (1 << i) != 0).map(Reg)
}

/// Checks every word a block store would touch before any is written.
fn check_block<B: Bus>(bus: &B, base: u32, list: u16) -> Result<(), BusFault> {
    (0..list.count_ones()).try_for_each(|i| bus.check_write(base.wrapping_add(4 * i), 4))
}

/// Reads one word per listed register; nothing is committed on a fault.
fn read_block<B: Bus>(bus: &mut B, base: u32, list: u16) -> Result<Vec<u32>, BusFault> {
    let mut addr = base;
    let mut out = Vec::with_capacity(list.count_ones() as usize);
    for _ in 0..list.count_ones() {
        out.push(bus.read_u32(addr)?);
        addr = addr.wrapping_add(4);
    }
    Ok(out)
}
