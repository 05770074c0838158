use crate::alu::{align_down, sign_extend};
use crate::cpu::Reg;
use crate::decoder::{Decoded, Decoder, DpOp, Instr};
use crate::labels::LabelTable;
use crate::memory::Bus;
use serde::Serialize;
use std::fmt;

/// One rendered instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisasmLine {
    pub addr: u32,
    pub hex: String,
    pub text: String,
    pub width: u8,
}

impl fmt::Display for DisasmLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10}{}", self.hex, self.text)
    }
}

/// Halfwords in fetch order: `2005` or `f000 f802`.
pub fn hex_of(d: &Decoded) -> String {
    if d.width == 4 {
        format!("{:04x} {:04x}", d.raw & 0xFFFF, d.raw >> 16)
    } else {
        format!("{:04x}", d.raw & 0xFFFF)
    }
}

/// `{r0-r2,r4,lr}`: runs of two or more consecutive registers collapse.
pub fn reglist(list: u16) -> String {
    let mut parts = Vec::new();
    let mut i = 0u8;
    while i < 16 {
        if list & (1 << i) == 0 {
            i += 1;
            continue;
        }
        let start = i;
        while i + 1 < 16 && list & (1 << (i + 1)) != 0 {
            i += 1;
        }
        if start == i {
            parts.push(Reg(start).to_string());
        } else {
            parts.push(format!("{}-{}", Reg(start), Reg(i)));
        }
        i += 1;
    }
    format!("{{{}}}", parts.join(","))
}

fn relative(addr: u32, target: u32, labels: Option<&LabelTable>) -> String {
    if let Some(name) = labels.and_then(|l| l.name_at(target)) {
        return name.to_string();
    }
    let disp = target.wrapping_sub(addr) as i32;
    if disp < 0 {
        format!("pc - {} ; {:08x}", disp.unsigned_abs(), target)
    } else {
        format!("pc + {} ; {:08x}", disp, target)
    }
}

/// Branch or literal target of an instruction at `addr`, if it has one.
pub fn target_of(instr: &Instr, addr: u32) -> Option<u32> {
    let next = addr.wrapping_add(4);
    match *instr {
        Instr::B { imm11 } => Some(next.wrapping_add(sign_extend(imm11 as u32, 11) << 1)),
        Instr::BCond { imm8, .. } => Some(next.wrapping_add(sign_extend(imm8 as u32, 8) << 1)),
        Instr::Bl { offset } => Some(next.wrapping_add(offset as u32)),
        Instr::LdrLit { imm8, .. } | Instr::Adr { imm8, .. } => {
            Some(align_down(next, 4).wrapping_add(imm8 as u32 * 4))
        }
        _ => None,
    }
}

/// Mnemonic column (8 wide) followed by operands.
pub fn fmt_decoded(d: &Decoded, addr: u32, labels: Option<&LabelTable>) -> String {
    let label_at = |t: Option<u32>| t.and_then(|t| labels.and_then(|l| l.name_at(t)));
    let (mn, ops): (String, String) = match d.instr {
        Instr::LslImm { rd, rm, imm5: 0 } => ("movs".into(), format!("{rd}, {rm}")),
        Instr::LslImm { rd, rm, imm5 } => ("lsls".into(), format!("{rd}, {rm}, #{imm5}")),
        Instr::LsrImm { rd, rm, imm5 } | Instr::AsrImm { rd, rm, imm5 } => {
            let amount = if imm5 == 0 { 32 } else { imm5 as u32 };
            (d.instr.mnemonic(), format!("{rd}, {rm}, #{amount}"))
        }
        Instr::AddReg { rd, rn, rm } | Instr::SubReg { rd, rn, rm } => {
            (d.instr.mnemonic(), format!("{rd}, {rn}, {rm}"))
        }
        Instr::AddImm3 { rd, rn, imm3 } | Instr::SubImm3 { rd, rn, imm3 } => {
            (d.instr.mnemonic(), format!("{rd}, {rn}, #{imm3}"))
        }
        Instr::MovImm { rd: r, imm8 }
        | Instr::CmpImm { rn: r, imm8 }
        | Instr::AddImm8 { rdn: r, imm8 }
        | Instr::SubImm8 { rdn: r, imm8 } => (d.instr.mnemonic(), format!("{r}, #{imm8}")),
        Instr::DataProc { op: DpOp::Rsb, rdn, rm } => ("rsbs".into(), format!("{rdn}, {rm}, #0")),
        Instr::DataProc { op, rdn, rm } => (op.mnemonic().into(), format!("{rdn}, {rm}")),
        Instr::AddHi { rdn: a, rm: b } | Instr::CmpHi { rn: a, rm: b } | Instr::MovHi { rd: a, rm: b } => {
            (d.instr.mnemonic(), format!("{a}, {b}"))
        }
        Instr::Bx { rm } | Instr::Blx { rm } => (d.instr.mnemonic(), rm.to_string()),
        Instr::LdrLit { rt, imm8 } => match label_at(target_of(&d.instr, addr)) {
            Some(name) => ("ldr".into(), format!("{rt}, {name}")),
            None => ("ldr".into(), format!("{rt}, [pc, #{}]", imm8 as u32 * 4)),
        },
        Instr::MemReg { op, rt, rn, rm } => (op.mnemonic().into(), format!("{rt}, [{rn}, {rm}]")),
        Instr::MemImm { op, rt, rn, imm5 } => (
            op.mnemonic().into(),
            format!("{rt}, [{rn}, #{}]", imm5 as u32 * op.scale()),
        ),
        Instr::StrSp { rt, imm8 } | Instr::LdrSp { rt, imm8 } => {
            (d.instr.mnemonic(), format!("{rt}, [sp, #{}]", imm8 as u32 * 4))
        }
        Instr::Adr { rd, imm8 } => match label_at(target_of(&d.instr, addr)) {
            Some(name) => ("adr".into(), format!("{rd}, {name}")),
            None => ("add".into(), format!("{rd}, pc, #{}", imm8 as u32 * 4)),
        },
        Instr::AddSpImm { rd, imm8 } => ("add".into(), format!("{rd}, sp, #{}", imm8 as u32 * 4)),
        Instr::AddSp { imm7 } | Instr::SubSp { imm7 } => {
            (d.instr.mnemonic(), format!("sp, sp, #{}", imm7 as u32 * 4))
        }
        Instr::Extend { rd, rm, .. } | Instr::Rev { rd, rm, .. } => {
            (d.instr.mnemonic(), format!("{rd}, {rm}"))
        }
        Instr::Push { list } | Instr::Pop { list } => (d.instr.mnemonic(), reglist(list)),
        Instr::Stm { rn, list } => ("stmia".into(), format!("{rn}!, {}", reglist(list as u16))),
        Instr::Ldm { rn, list } => {
            let wb = if list & (1 << rn.0) == 0 { "!" } else { "" };
            ("ldmia".into(), format!("{rn}{wb}, {}", reglist(list as u16)))
        }
        Instr::Cps { .. } => (d.instr.mnemonic(), "i".into()),
        Instr::Bkpt { imm8 } => ("bkpt".into(), format!("#{imm8}")),
        Instr::B { .. } | Instr::BCond { .. } => {
            let target = target_of(&d.instr, addr).unwrap_or(addr);
            (d.instr.mnemonic(), relative(addr, target, labels))
        }
        Instr::Bl { .. } => {
            let target = target_of(&d.instr, addr).unwrap_or(addr);
            let ops = match label_at(Some(target)) {
                Some(name) => name.to_string(),
                None => format!("#{target:08x}"),
            };
            ("bl".into(), ops)
        }
        Instr::Hint(_) | Instr::Undefined => return d.instr.mnemonic(),
    };
    format!("{mn:<8}{ops}")
}

/// Decode `len` bytes from `start`. Stops early at the first unreadable
/// halfword; a wide instruction straddling the end is still decoded whole.
pub fn decode_range<B: Bus, D: Decoder>(bus: &mut B, dec: &D, start: u32, len: u32) -> Vec<(u32, Decoded)> {
    let end = start as u64 + len as u64;
    let mut out = Vec::new();
    let mut addr = start;
    while (addr as u64) < end {
        let Ok(first) = bus.read_u16(addr) else { break };
        let mut raw = first as u32;
        if dec.is_wide(first) {
            match bus.read_u16(addr.wrapping_add(2)) {
                Ok(second) => raw |= (second as u32) << 16,
                Err(_) => break,
            }
        }
        let d = dec.decode(raw);
        out.push((addr, d));
        addr = addr.wrapping_add(d.width as u32);
    }
    out
}

pub fn disassemble<B: Bus, D: Decoder>(
    bus: &mut B,
    dec: &D,
    start: u32,
    len: u32,
    labels: Option<&LabelTable>,
) -> Vec<DisasmLine> {
    decode_range(bus, dec, start, len)
        .into_iter()
        .map(|(addr, d)| DisasmLine { addr, hex: hex_of(&d), text: fmt_decoded(&d, addr, labels), width: d.width })
        .collect()
}
