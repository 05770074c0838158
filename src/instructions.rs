use crate::cpu::Reg;
use crate::decoder::{Cond, ExtendOp, Hint, Instr, RevOp};

/// Assembler-facing description of a mnemonic: its encoded width and the
/// operand shapes it accepts (used in diagnostics).
#[derive(Debug, Clone, Copy)]
pub struct InstrDesc {
    pub mnemonic: &'static str,
    pub width: u8,
    pub usage: &'static [&'static str],
}

const fn desc(mnemonic: &'static str, usage: &'static [&'static str]) -> InstrDesc {
    InstrDesc { mnemonic, width: 2, usage }
}

pub const TABLE: &[InstrDesc] = &[
    desc("lsls", &["rd, rm, #imm5", "rdn, rm"]),
    desc("lsrs", &["rd, rm, #imm5", "rdn, rm"]),
    desc("asrs", &["rd, rm, #imm5", "rdn, rm"]),
    desc("adds", &["rd, rn, rm", "rd, rn, #imm3", "rdn, #imm8"]),
    desc("subs", &["rd, rn, rm", "rd, rn, #imm3", "rdn, #imm8"]),
    desc("movs", &["rd, #imm8", "rd, rm"]),
    desc("mov", &["rd, rm"]),
    desc("cmp", &["rn, #imm8", "rn, rm"]),
    desc("cmn", &["rn, rm"]),
    desc("tst", &["rn, rm"]),
    desc("add", &["rdn, rm", "rd, sp, #imm8", "sp, sp, #imm7", "sp, #imm7", "rd, pc, #imm8"]),
    desc("sub", &["sp, sp, #imm7", "sp, #imm7"]),
    desc("ands", &["rdn, rm"]),
    desc("eors", &["rdn, rm"]),
    desc("adcs", &["rdn, rm"]),
    desc("sbcs", &["rdn, rm"]),
    desc("rors", &["rdn, rm"]),
    desc("orrs", &["rdn, rm"]),
    desc("bics", &["rdn, rm"]),
    desc("mvns", &["rd, rm"]),
    desc("muls", &["rdm, rn", "rd, rn, rdm"]),
    desc("rsbs", &["rd, rn, #0"]),
    desc("negs", &["rd, rn"]),
    desc("bx", &["rm"]),
    desc("blx", &["rm"]),
    desc("ldr", &["rt, [rn, #imm5]", "rt, [rn, rm]", "rt, [sp, #imm8]", "rt, [pc, #imm8]", "rt, label", "rt, =expr"]),
    desc("str", &["rt, [rn, #imm5]", "rt, [rn, rm]", "rt, [sp, #imm8]"]),
    desc("ldrb", &["rt, [rn, #imm5]", "rt, [rn, rm]"]),
    desc("strb", &["rt, [rn, #imm5]", "rt, [rn, rm]"]),
    desc("ldrh", &["rt, [rn, #imm5]", "rt, [rn, rm]"]),
    desc("strh", &["rt, [rn, #imm5]", "rt, [rn, rm]"]),
    desc("ldrsb", &["rt, [rn, rm]"]),
    desc("ldrsh", &["rt, [rn, rm]"]),
    desc("adr", &["rd, label"]),
    desc("sxth", &["rd, rm"]),
    desc("sxtb", &["rd, rm"]),
    desc("uxth", &["rd, rm"]),
    desc("uxtb", &["rd, rm"]),
    desc("rev", &["rd, rm"]),
    desc("rev16", &["rd, rm"]),
    desc("revsh", &["rd, rm"]),
    desc("push", &["{reglist}"]),
    desc("pop", &["{reglist}"]),
    desc("stmia", &["rn!, {reglist}"]),
    desc("stm", &["rn!, {reglist}"]),
    desc("stmea", &["rn!, {reglist}"]),
    desc("ldmia", &["rn!, {reglist}", "rn, {reglist}"]),
    desc("ldm", &["rn!, {reglist}", "rn, {reglist}"]),
    desc("ldmfd", &["rn!, {reglist}", "rn, {reglist}"]),
    desc("cpsid", &["i"]),
    desc("cpsie", &["i"]),
    desc("bkpt", &["#imm8"]),
    desc("nop", &[""]),
    desc("yield", &[""]),
    desc("wfe", &[""]),
    desc("wfi", &[""]),
    desc("sev", &[""]),
    desc("b", &["label"]),
    desc("b<c>", &["label"]),
    InstrDesc { mnemonic: "bl", width: 4, usage: &["label"] },
];

/// Case-insensitive lookup; conditional branches resolve to `b<c>` and
/// `bal` to `b`.
pub fn lookup(mnemonic: &str) -> Option<&'static InstrDesc> {
    let mut m = mnemonic.to_ascii_lowercase();
    if m == "bal" {
        m.truncate(1);
    }
    if let Some(d) = TABLE.iter().find(|d| d.mnemonic == m) {
        return Some(d);
    }
    m.strip_prefix('b').and_then(Cond::from_suffix)?;
    TABLE.iter().find(|d| d.mnemonic == "b<c>")
}

impl Instr {
    pub fn width(&self) -> u8 {
        match self {
            Instr::Bl { .. } => 4,
            _ => 2,
        }
    }

    /// Machine encoding. For the 32-bit BL the first halfword is in the low
    /// 16 bits, matching the order in which it is fetched.
    pub fn encode(&self) -> u32 {
        let lo = |r: Reg| (r.0 & 7) as u32;
        match *self {
            Instr::LslImm { rd, rm, imm5 } => (imm5 as u32) << 6 | lo(rm) << 3 | lo(rd),
            Instr::LsrImm { rd, rm, imm5 } => 0x0800 | (imm5 as u32) << 6 | lo(rm) << 3 | lo(rd),
            Instr::AsrImm { rd, rm, imm5 } => 0x1000 | (imm5 as u32) << 6 | lo(rm) << 3 | lo(rd),
            Instr::AddReg { rd, rn, rm } => 0x1800 | lo(rm) << 6 | lo(rn) << 3 | lo(rd),
            Instr::SubReg { rd, rn, rm } => 0x1A00 | lo(rm) << 6 | lo(rn) << 3 | lo(rd),
            Instr::AddImm3 { rd, rn, imm3 } => 0x1C00 | (imm3 as u32 & 7) << 6 | lo(rn) << 3 | lo(rd),
            Instr::SubImm3 { rd, rn, imm3 } => 0x1E00 | (imm3 as u32 & 7) << 6 | lo(rn) << 3 | lo(rd),
            Instr::MovImm { rd, imm8 } => 0x2000 | lo(rd) << 8 | imm8 as u32,
            Instr::CmpImm { rn, imm8 } => 0x2800 | lo(rn) << 8 | imm8 as u32,
            Instr::AddImm8 { rdn, imm8 } => 0x3000 | lo(rdn) << 8 | imm8 as u32,
            Instr::SubImm8 { rdn, imm8 } => 0x3800 | lo(rdn) << 8 | imm8 as u32,
            Instr::DataProc { op, rdn, rm } => 0x4000 | op.bits() << 6 | lo(rm) << 3 | lo(rdn),
            Instr::AddHi { rdn, rm } => 0x4400 | hi(rdn, rm),
            Instr::CmpHi { rn, rm } => 0x4500 | hi(rn, rm),
            Instr::MovHi { rd, rm } => 0x4600 | hi(rd, rm),
            Instr::Bx { rm } => 0x4700 | (rm.0 as u32 & 0xF) << 3,
            Instr::Blx { rm } => 0x4780 | (rm.0 as u32 & 0xF) << 3,
            Instr::LdrLit { rt, imm8 } => 0x4800 | lo(rt) << 8 | imm8 as u32,
            Instr::MemReg { op, rt, rn, rm } => 0x5000 | op.bits() << 9 | lo(rm) << 6 | lo(rn) << 3 | lo(rt),
            Instr::MemImm { op, rt, rn, imm5 } => op.base() | (imm5 as u32 & 0x1F) << 6 | lo(rn) << 3 | lo(rt),
            Instr::StrSp { rt, imm8 } => 0x9000 | lo(rt) << 8 | imm8 as u32,
            Instr::LdrSp { rt, imm8 } => 0x9800 | lo(rt) << 8 | imm8 as u32,
            Instr::Adr { rd, imm8 } => 0xA000 | lo(rd) << 8 | imm8 as u32,
            Instr::AddSpImm { rd, imm8 } => 0xA800 | lo(rd) << 8 | imm8 as u32,
            Instr::AddSp { imm7 } => 0xB000 | (imm7 as u32 & 0x7F),
            Instr::SubSp { imm7 } => 0xB080 | (imm7 as u32 & 0x7F),
            Instr::Extend { op, rd, rm } => {
                let bits = match op {
                    ExtendOp::Sxth => 0,
                    ExtendOp::Sxtb => 1,
                    ExtendOp::Uxth => 2,
                    ExtendOp::Uxtb => 3,
                };
                0xB200 | bits << 6 | lo(rm) << 3 | lo(rd)
            }
            Instr::Rev { op, rd, rm } => {
                let base = match op {
                    RevOp::Rev => 0xBA00,
                    RevOp::Rev16 => 0xBA40,
                    RevOp::Revsh => 0xBAC0,
                };
                base | lo(rm) << 3 | lo(rd)
            }
            Instr::Push { list } => 0xB400 | ((list as u32 >> 14) & 1) << 8 | (list as u32 & 0xFF),
            Instr::Pop { list } => 0xBC00 | ((list as u32 >> 15) & 1) << 8 | (list as u32 & 0xFF),
            Instr::Stm { rn, list } => 0xC000 | lo(rn) << 8 | list as u32,
            Instr::Ldm { rn, list } => 0xC800 | lo(rn) << 8 | list as u32,
            Instr::Cps { disable } => 0xB662 | (disable as u32) << 4,
            Instr::Bkpt { imm8 } => 0xBE00 | imm8 as u32,
            Instr::Hint(h) => {
                let n = match h {
                    Hint::Nop => 0,
                    Hint::Yield => 1,
                    Hint::Wfe => 2,
                    Hint::Wfi => 3,
                    Hint::Sev => 4,
                };
                0xBF00 | n << 4
            }
            Instr::BCond { cond, imm8 } => 0xD000 | cond.bits() << 8 | imm8 as u32,
            Instr::B { imm11 } => 0xE000 | (imm11 as u32 & 0x7FF),
            Instr::Bl { offset } => encode_bl(offset),
            // permanently undefined (UDF #0)
            Instr::Undefined => 0xDE00,
        }
    }

    /// Text mnemonic as rendered by the disassembler.
    pub fn mnemonic(&self) -> String {
        let m = match self {
            Instr::LslImm { imm5: 0, .. } => "movs",
            Instr::LslImm { .. } => "lsls",
            Instr::LsrImm { .. } => "lsrs",
            Instr::AsrImm { .. } => "asrs",
            Instr::AddReg { .. } | Instr::AddImm3 { .. } | Instr::AddImm8 { .. } => "adds",
            Instr::SubReg { .. } | Instr::SubImm3 { .. } | Instr::SubImm8 { .. } => "subs",
            Instr::MovImm { .. } => "movs",
            Instr::CmpImm { .. } | Instr::CmpHi { .. } => "cmp",
            Instr::DataProc { op, .. } => op.mnemonic(),
            Instr::AddHi { .. } | Instr::AddSpImm { .. } | Instr::AddSp { .. } => "add",
            Instr::SubSp { .. } => "sub",
            Instr::MovHi { .. } => "mov",
            Instr::Bx { .. } => "bx",
            Instr::Blx { .. } => "blx",
            Instr::LdrLit { .. } | Instr::LdrSp { .. } => "ldr",
            Instr::StrSp { .. } => "str",
            Instr::MemReg { op, .. } => op.mnemonic(),
            Instr::MemImm { op, .. } => op.mnemonic(),
            Instr::Adr { .. } => "adr",
            Instr::Extend { op, .. } => op.mnemonic(),
            Instr::Rev { op, .. } => op.mnemonic(),
            Instr::Push { .. } => "push",
            Instr::Pop { .. } => "pop",
            Instr::Stm { .. } => "stmia",
            Instr::Ldm { .. } => "ldmia",
            Instr::Cps { disable: true } => "cpsid",
            Instr::Cps { disable: false } => "cpsie",
            Instr::Bkpt { .. } => "bkpt",
            Instr::Hint(h) => h.mnemonic(),
            Instr::BCond { cond, .. } => return format!("b{}", cond.name()),
            Instr::B { .. } => "b",
            Instr::Bl { .. } => "bl",
            Instr::Undefined => "????",
        };
        m.to_string()
    }
}

fn hi(rdn: Reg, rm: Reg) -> u32 {
    let d = rdn.0 as u32 & 0xF;
    ((d & 8) << 4) | (rm.0 as u32 & 0xF) << 3 | (d & 7)
}

fn encode_bl(offset: i32) -> u32 {
    let off = offset as u32;
    let s = (off >> 24) & 1;
    let i1 = (off >> 23) & 1;
    let i2 = (off >> 22) & 1;
    let j1 = !(i1 ^ s) & 1;
    let j2 = !(i2 ^ s) & 1;
    let first = 0xF000 | s << 10 | ((off >> 12) & 0x3FF);
    let second = 0xD000 | j1 << 13 | j2 << 11 | ((off >> 1) & 0x7FF);
    first | second << 16
}
