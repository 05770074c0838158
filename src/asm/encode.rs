//! Operand-shape matching and range validation: mnemonic + operands → [`Instr`].

use super::operand::{Expr, MemOffset, Operand};
use super::AsmErrorKind;
use crate::alu::align_down;
use crate::cpu::Reg;
use crate::decoder::{Cond, DpOp, ExtendOp, Hint, Instr, MemImmOp, MemRegOp, RevOp};
use crate::instructions;

/// Encoding context of one source line.
pub struct Ctx<'a> {
    /// Address the instruction will occupy.
    pub addr: u32,
    /// When false, undefined symbols resolve to placeholders (index pass).
    pub strict: bool,
    pub lookup: &'a dyn Fn(&str) -> Option<i64>,
}

impl Ctx<'_> {
    pub fn value(&self, e: &Expr) -> Result<i64, AsmErrorKind> {
        match e.eval(self.lookup) {
            Err(AsmErrorKind::UndefinedSymbol(_)) if !self.strict => Ok(0),
            r => r,
        }
    }

    /// Absolute target address; unresolved targets fall on the next
    /// instruction, giving a zero displacement.
    pub fn target(&self, e: &Expr) -> Result<u32, AsmErrorKind> {
        match e.eval(self.lookup) {
            Ok(v) => Ok(v as u32),
            Err(AsmErrorKind::UndefinedSymbol(_)) if !self.strict => Ok(self.addr.wrapping_add(4)),
            Err(e) => Err(e),
        }
    }

    fn pc_base(&self) -> u32 {
        align_down(self.addr.wrapping_add(4), 4)
    }
}

fn low(r: Reg) -> Result<Reg, AsmErrorKind> {
    if r.is_low() {
        Ok(r)
    } else {
        Err(AsmErrorKind::HighRegister(r))
    }
}

fn range(value: i64, min: i64, max: i64) -> Result<u32, AsmErrorKind> {
    if value < min || value > max {
        return Err(AsmErrorKind::ImmediateRange { value, min, max });
    }
    Ok(value as u32)
}

/// Byte offset that must be a multiple of `scale`; returns it in units.
fn scaled(value: i64, scale: u32, max_units: u32) -> Result<u32, AsmErrorKind> {
    if value % scale as i64 != 0 {
        return Err(AsmErrorKind::Misaligned { value, align: scale });
    }
    range(value, 0, (max_units * scale) as i64).map(|v| v / scale)
}

fn branch(ctx: &Ctx, e: &Expr, min: i64, max: i64) -> Result<i64, AsmErrorKind> {
    let target = ctx.target(e)?;
    if target & 1 != 0 {
        return Err(AsmErrorKind::MisalignedTarget(target));
    }
    let disp = target as i64 - (ctx.addr as i64 + 4);
    if disp < min || disp > max {
        return Err(AsmErrorKind::BranchRange { disp, min, max });
    }
    Ok(disp)
}

/// Offset from the aligned PC to a word-aligned target, for LDR/ADR.
fn pc_relative(ctx: &Ctx, target: u32) -> Result<u8, AsmErrorKind> {
    let offset = target as i64 - ctx.pc_base() as i64;
    Ok(scaled(offset, 4, 255)? as u8)
}

fn mem_offset(ctx: &Ctx, off: &MemOffset) -> Result<i64, AsmErrorKind> {
    match off {
        MemOffset::None => Ok(0),
        MemOffset::Imm(e) => ctx.value(e),
        MemOffset::Reg(_) => Ok(0),
    }
}

fn check_list(list: u16, extra: Option<Reg>) -> Result<(), AsmErrorKind> {
    if list == 0 {
        return Err(AsmErrorKind::BadOperands("empty register list".into()));
    }
    for i in 8..16u8 {
        if list & (1 << i) != 0 && Some(Reg(i)) != extra {
            return Err(AsmErrorKind::RegisterNotAllowed(Reg(i)));
        }
    }
    Ok(())
}

fn mismatch(mnemonic: &str) -> AsmErrorKind {
    let expected = instructions::lookup(mnemonic)
        .map(|d| d.usage.join(" | "))
        .unwrap_or_default();
    AsmErrorKind::OperandMismatch { mnemonic: mnemonic.to_string(), expected }
}

fn shift_imm(m: &str, rd: Reg, rm: Reg, amount: i64) -> Result<Instr, AsmErrorKind> {
    let (rd, rm) = (low(rd)?, low(rm)?);
    Ok(match m {
        "lsls" => Instr::LslImm { rd, rm, imm5: range(amount, 0, 31)? as u8 },
        // 32 is encoded as 0
        "lsrs" => Instr::LsrImm { rd, rm, imm5: (range(amount, 1, 32)? & 31) as u8 },
        _ => Instr::AsrImm { rd, rm, imm5: (range(amount, 1, 32)? & 31) as u8 },
    })
}

fn data_proc(op: DpOp, rdn: Reg, rm: Reg) -> Result<Instr, AsmErrorKind> {
    Ok(Instr::DataProc { op, rdn: low(rdn)?, rm: low(rm)? })
}

fn add_sub(m: &str, rd: Reg, rn: Reg, src: &Operand, ctx: &Ctx) -> Result<Instr, AsmErrorKind> {
    let add = m == "adds";
    let (rd, rn) = (low(rd)?, low(rn)?);
    match src {
        Operand::Reg(rm) => {
            let rm = low(*rm)?;
            Ok(if add { Instr::AddReg { rd, rn, rm } } else { Instr::SubReg { rd, rn, rm } })
        }
        Operand::Imm(e) => {
            let v = ctx.value(e)?;
            if (0..=7).contains(&v) {
                let imm3 = v as u8;
                Ok(if add { Instr::AddImm3 { rd, rn, imm3 } } else { Instr::SubImm3 { rd, rn, imm3 } })
            } else if rd == rn {
                // degrade to the two-operand 8-bit form
                let imm8 = range(v, 0, 255)? as u8;
                Ok(if add { Instr::AddImm8 { rdn: rd, imm8 } } else { Instr::SubImm8 { rdn: rd, imm8 } })
            } else {
                Err(AsmErrorKind::ImmediateRange { value: v, min: 0, max: 7 })
            }
        }
        _ => Err(mismatch(m)),
    }
}

fn mem_imm(op: MemImmOp, rt: Reg, base: Reg, off: &MemOffset, ctx: &Ctx) -> Result<Instr, AsmErrorKind> {
    let (rt, rn) = (low(rt)?, low(base)?);
    let imm5 = scaled(mem_offset(ctx, off)?, op.scale(), 31)? as u8;
    Ok(Instr::MemImm { op, rt, rn, imm5 })
}

fn mem_reg(op: MemRegOp, rt: Reg, rn: Reg, rm: Reg) -> Result<Instr, AsmErrorKind> {
    Ok(Instr::MemReg { op, rt: low(rt)?, rn: low(rn)?, rm: low(rm)? })
}

fn load_store(m: &str, ops: &[Operand], ctx: &Ctx) -> Result<Instr, AsmErrorKind> {
    let load = m.starts_with("ld");
    let imm_op = MemImmOp::from_mnemonic(m);
    let reg_op = MemRegOp::from_mnemonic(m).ok_or_else(|| mismatch(m))?;
    match ops {
        [Operand::Reg(rt), Operand::Mem { base, offset: MemOffset::Reg(rm) }] => mem_reg(reg_op, *rt, *base, *rm),
        [Operand::Reg(rt), Operand::Mem { base: Reg::PC, offset }] if m == "ldr" => {
            let off = mem_offset(ctx, offset)?;
            Ok(Instr::LdrLit { rt: low(*rt)?, imm8: scaled(off, 4, 255)? as u8 })
        }
        [Operand::Reg(rt), Operand::Mem { base: Reg::SP, offset }] if m == "ldr" || m == "str" => {
            let rt = low(*rt)?;
            let imm8 = scaled(mem_offset(ctx, offset)?, 4, 255)? as u8;
            Ok(if load { Instr::LdrSp { rt, imm8 } } else { Instr::StrSp { rt, imm8 } })
        }
        [Operand::Reg(rt), Operand::Mem { base, offset }] => match imm_op {
            Some(op) => mem_imm(op, *rt, *base, offset, ctx),
            None => Err(mismatch(m)),
        },
        [Operand::Reg(rt), Operand::Expr(e)] if m == "ldr" => {
            let target = match e.eval(ctx.lookup) {
                Ok(v) => v as u32,
                Err(AsmErrorKind::UndefinedSymbol(_)) if !ctx.strict => ctx.pc_base(),
                Err(err) => return Err(err),
            };
            let offset = target as i64 - ctx.pc_base() as i64;
            if offset < 0 || offset > 1020 {
                return Err(AsmErrorKind::LiteralRange { offset });
            }
            Ok(Instr::LdrLit { rt: low(*rt)?, imm8: pc_relative(ctx, target)? })
        }
        // `=expr` is rewritten before the final pass; size it as a literal load
        [Operand::Reg(rt), Operand::Literal(..)] if m == "ldr" && !ctx.strict => {
            Ok(Instr::LdrLit { rt: low(*rt)?, imm8: 0 })
        }
        _ => Err(mismatch(m)),
    }
}

/// Encodes one instruction. `mnemonic` may be in any case.
pub fn encode(mnemonic: &str, ops: &[Operand], ctx: &Ctx) -> Result<Instr, AsmErrorKind> {
    let m = mnemonic.to_ascii_lowercase();
    let m = m.as_str();
    use Operand::{Expr as E, Imm, List, Reg as R, Writeback};

    match (m, ops) {
        ("movs", [R(rd), Imm(e)]) => Ok(Instr::MovImm { rd: low(*rd)?, imm8: range(ctx.value(e)?, 0, 255)? as u8 }),
        ("movs", [R(rd), R(rm)]) => Ok(Instr::LslImm { rd: low(*rd)?, rm: low(*rm)?, imm5: 0 }),
        ("mov", [R(rd), R(rm)]) => Ok(Instr::MovHi { rd: *rd, rm: *rm }),
        ("mov", [R(rd), Imm(e)]) => Ok(Instr::MovImm { rd: low(*rd)?, imm8: range(ctx.value(e)?, 0, 255)? as u8 }),

        ("lsls" | "lsrs" | "asrs", [R(rd), R(rm), Imm(e)]) => shift_imm(m, *rd, *rm, ctx.value(e)?),
        ("lsls" | "lsrs" | "asrs" | "rors", [R(rdn), R(rm)]) => data_proc(DpOp::from_mnemonic(m).ok_or_else(|| mismatch(m))?, *rdn, *rm),
        ("lsls" | "lsrs" | "asrs" | "rors", [R(rd), R(rn), R(rm)]) if rd == rn => {
            data_proc(DpOp::from_mnemonic(m).ok_or_else(|| mismatch(m))?, *rd, *rm)
        }

        ("adds" | "subs", [R(rd), R(rn), src @ (R(_) | Imm(_))]) => add_sub(m, *rd, *rn, src, ctx),
        ("adds" | "subs", [R(rdn), Imm(e)]) => {
            let rdn = low(*rdn)?;
            let imm8 = range(ctx.value(e)?, 0, 255)? as u8;
            Ok(if m == "adds" { Instr::AddImm8 { rdn, imm8 } } else { Instr::SubImm8 { rdn, imm8 } })
        }
        ("adds" | "subs", [R(rdn), src @ R(_)]) => add_sub(m, *rdn, *rdn, src, ctx),

        ("add", [R(Reg::SP), R(Reg::SP), Imm(e)]) | ("add", [R(Reg::SP), Imm(e)]) => {
            Ok(Instr::AddSp { imm7: scaled(ctx.value(e)?, 4, 127)? as u8 })
        }
        ("sub", [R(Reg::SP), R(Reg::SP), Imm(e)]) | ("sub", [R(Reg::SP), Imm(e)]) => {
            Ok(Instr::SubSp { imm7: scaled(ctx.value(e)?, 4, 127)? as u8 })
        }
        ("add", [R(rd), R(Reg::SP), Imm(e)]) => Ok(Instr::AddSpImm { rd: low(*rd)?, imm8: scaled(ctx.value(e)?, 4, 255)? as u8 }),
        ("add", [R(rd), R(Reg::PC), Imm(e)]) => Ok(Instr::Adr { rd: low(*rd)?, imm8: scaled(ctx.value(e)?, 4, 255)? as u8 }),
        ("add", [R(rdn), R(rm)]) => Ok(Instr::AddHi { rdn: *rdn, rm: *rm }),
        ("add", [R(rd), R(rn), R(rm)]) if rd == rn => Ok(Instr::AddHi { rdn: *rd, rm: *rm }),

        ("cmp", [R(rn), Imm(e)]) => Ok(Instr::CmpImm { rn: low(*rn)?, imm8: range(ctx.value(e)?, 0, 255)? as u8 }),
        ("cmp", [R(rn), R(rm)]) if rn.is_low() && rm.is_low() => data_proc(DpOp::Cmp, *rn, *rm),
        ("cmp", [R(rn), R(rm)]) => Ok(Instr::CmpHi { rn: *rn, rm: *rm }),

        ("rsbs", [R(rd), R(rn), Imm(e)]) => {
            range(ctx.value(e)?, 0, 0)?;
            data_proc(DpOp::Rsb, *rd, *rn)
        }
        ("negs", [R(rd), R(rn)]) => data_proc(DpOp::Rsb, *rd, *rn),
        ("muls", [R(rdm), R(rn)]) => data_proc(DpOp::Mul, *rdm, *rn),
        ("muls", [R(rd), R(rn), R(rm)]) if rd == rm => data_proc(DpOp::Mul, *rd, *rn),
        ("muls", [R(rd), R(rn), R(rm)]) if rd == rn => data_proc(DpOp::Mul, *rd, *rm),
        ("ands" | "eors" | "adcs" | "sbcs" | "orrs" | "bics" | "mvns" | "cmn" | "tst", [R(rdn), R(rm)]) => {
            data_proc(DpOp::from_mnemonic(m).ok_or_else(|| mismatch(m))?, *rdn, *rm)
        }
        ("ands" | "eors" | "adcs" | "sbcs" | "orrs" | "bics", [R(rd), R(rn), R(rm)]) if rd == rn => {
            data_proc(DpOp::from_mnemonic(m).ok_or_else(|| mismatch(m))?, *rd, *rm)
        }

        ("bx", [R(rm)]) => Ok(Instr::Bx { rm: *rm }),
        ("blx", [R(rm)]) => Ok(Instr::Blx { rm: *rm }),

        ("ldr" | "str" | "ldrb" | "strb" | "ldrh" | "strh" | "ldrsb" | "ldrsh", _) => load_store(m, ops, ctx),
        ("adr", [R(rd), E(e)]) => {
            let target = match e.eval(ctx.lookup) {
                Ok(v) => v as u32,
                Err(AsmErrorKind::UndefinedSymbol(_)) if !ctx.strict => ctx.pc_base(),
                Err(err) => return Err(err),
            };
            Ok(Instr::Adr { rd: low(*rd)?, imm8: pc_relative(ctx, target)? })
        }

        ("sxth" | "sxtb" | "uxth" | "uxtb", [R(rd), R(rm)]) => {
            let op = match m {
                "sxth" => ExtendOp::Sxth,
                "sxtb" => ExtendOp::Sxtb,
                "uxth" => ExtendOp::Uxth,
                _ => ExtendOp::Uxtb,
            };
            Ok(Instr::Extend { op, rd: low(*rd)?, rm: low(*rm)? })
        }
        ("rev" | "rev16" | "revsh", [R(rd), R(rm)]) => {
            let op = match m {
                "rev" => RevOp::Rev,
                "rev16" => RevOp::Rev16,
                _ => RevOp::Revsh,
            };
            Ok(Instr::Rev { op, rd: low(*rd)?, rm: low(*rm)? })
        }

        ("push", [List(list)]) => {
            check_list(*list, Some(Reg::LR))?;
            Ok(Instr::Push { list: *list })
        }
        ("pop", [List(list)]) => {
            check_list(*list, Some(Reg::PC))?;
            Ok(Instr::Pop { list: *list })
        }
        ("stm" | "stmia" | "stmea", [Writeback(rn), List(list)]) => {
            check_list(*list, None)?;
            Ok(Instr::Stm { rn: low(*rn)?, list: *list as u8 })
        }
        ("ldm" | "ldmia" | "ldmfd", [Writeback(rn), List(list)]) if list & (1 << rn.0) == 0 => {
            check_list(*list, None)?;
            Ok(Instr::Ldm { rn: low(*rn)?, list: *list as u8 })
        }
        ("ldm" | "ldmia" | "ldmfd", [R(rn), List(list)]) if list & (1 << rn.0) != 0 => {
            check_list(*list, None)?;
            Ok(Instr::Ldm { rn: low(*rn)?, list: *list as u8 })
        }

        ("cpsid" | "cpsie", [E(e)]) if e.as_symbol().is_some_and(|s| s.eq_ignore_ascii_case("i")) => {
            Ok(Instr::Cps { disable: m == "cpsid" })
        }
        ("bkpt", []) => Ok(Instr::Bkpt { imm8: 0 }),
        ("bkpt", [Imm(e)]) => Ok(Instr::Bkpt { imm8: range(ctx.value(e)?, 0, 255)? as u8 }),
        ("nop", []) => Ok(Instr::Hint(Hint::Nop)),
        ("yield", []) => Ok(Instr::Hint(Hint::Yield)),
        ("wfe", []) => Ok(Instr::Hint(Hint::Wfe)),
        ("wfi", []) => Ok(Instr::Hint(Hint::Wfi)),
        ("sev", []) => Ok(Instr::Hint(Hint::Sev)),

        ("b" | "bal", [E(e)]) => {
            let disp = branch(ctx, e, -2048, 2046)?;
            Ok(Instr::B { imm11: ((disp >> 1) & 0x7FF) as u16 })
        }
        ("bl", [E(e)]) => {
            let disp = branch(ctx, e, -16_777_216, 16_777_214)?;
            Ok(Instr::Bl { offset: disp as i32 })
        }
        (_, [E(e)]) if m.len() == 3 && m.starts_with('b') && Cond::from_suffix(&m[1..]).is_some() => {
            let cond = Cond::from_suffix(&m[1..]).ok_or_else(|| mismatch(m))?;
            let disp = branch(ctx, e, -256, 254)?;
            Ok(Instr::BCond { cond, imm8: ((disp >> 1) & 0xFF) as u8 })
        }

        _ if instructions::lookup(m).is_some() => Err(mismatch(m)),
        _ => Err(AsmErrorKind::UnknownMnemonic(mnemonic.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::tokenize;
    use crate::asm::operand::parse_operands;

    fn enc(line: &str, addr: u32) -> Result<u32, AsmErrorKind> {
        let toks = tokenize(line).unwrap();
        let (mn, rest) = match &toks[0].0 {
            crate::asm::lexer::Token::Ident(m) => (m.clone(), &toks[1..]),
            _ => panic!("no mnemonic"),
        };
        let ops = parse_operands(rest)?;
        let lookup = |s: &str| match s {
            "target" => Some(0x0800_0310),
            "far" => Some(0x0800_1300),
            _ => None,
        };
        let ctx = Ctx { addr, strict: true, lookup: &lookup };
        encode(&mn, &ops, &ctx).map(|i| i.encode())
    }

    #[test]
    fn aliases_pick_the_short_form() {
        assert_eq!(enc("movs r0, #5", 0), Ok(0x2005));
        assert_eq!(enc("adds r1, r1, #200", 0), Ok(0x3100 | 200));
        assert_eq!(enc("adds r1, r2, #3", 0), Ok(0x1C00 | 3 << 6 | 2 << 3 | 1));
        assert_eq!(enc("negs r0, r1", 0), Ok(0x4248));
        assert_eq!(enc("MOVS r2, r3", 0), Ok(0x001A));
    }

    #[test]
    fn range_and_register_class() {
        assert!(matches!(enc("movs r0, #256", 0), Err(AsmErrorKind::ImmediateRange { .. })));
        assert!(matches!(enc("movs r8, #1", 0), Err(AsmErrorKind::HighRegister(Reg(8)))));
        assert!(matches!(enc("ldr r0, [r1, #3]", 0), Err(AsmErrorKind::Misaligned { align: 4, .. })));
        assert!(matches!(enc("push {r8}", 0), Err(AsmErrorKind::RegisterNotAllowed(Reg(8)))));
        assert!(matches!(enc("frob r0", 0), Err(AsmErrorKind::UnknownMnemonic(_))));
        assert!(matches!(enc("lsls r0", 0), Err(AsmErrorKind::OperandMismatch { .. })));
    }

    #[test]
    fn branches_measure_from_pc_plus_four() {
        // target 0x0800_0310 from 0x0800_0300: disp 12
        assert_eq!(enc("b target", 0x0800_0300), Ok(0xE006));
        assert_eq!(enc("beq target", 0x0800_0300), Ok(0xD006));
        assert!(matches!(enc("beq far", 0x0800_0300), Err(AsmErrorKind::BranchRange { .. })));
        assert!(matches!(enc("b missing", 0x0800_0300), Err(AsmErrorKind::UndefinedSymbol(_))));
    }
}
