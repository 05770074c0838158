use crate::alu::sign_extend;
use crate::cpu::Reg;
use crate::decoder::{
    Cond, Decoded, Decoder, DpOp, ExtendOp, Hint, Instr, MemImmOp, MemRegOp, RevOp,
};

/// ARMv6-M Thumb decoder: the 16-bit encodings plus the 32-bit BL.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThumbDecoder;

impl ThumbDecoder {
    pub fn new() -> Self {
        Self
    }
}

fn r(v: u32, shift: u32) -> Reg {
    Reg(((v >> shift) & 7) as u8)
}

fn imm(v: u32, shift: u32, bits: u32) -> u32 {
    (v >> shift) & ((1 << bits) - 1)
}

impl Decoder for ThumbDecoder {
    fn is_wide(&self, first: u16) -> bool {
        // 0b11101, 0b11110 and 0b11111 prefixes; 0b11100 is the 16-bit B
        (first & 0xE000) == 0xE000 && (first & 0x1800) != 0
    }

    fn decode(&self, raw32: u32) -> Decoded {
        let first = raw32 & 0xFFFF;
        if self.is_wide(first as u16) {
            return Decoded { instr: decode_wide(raw32), raw: raw32, width: 4 };
        }
        let instr = match first >> 10 {
            0b000000..=0b001111 => shift_add_move_compare(first),
            0b010000 => Instr::DataProc {
                op: DpOp::from_bits(first >> 6),
                rdn: r(first, 0),
                rm: r(first, 3),
            },
            0b010001 => special(first),
            0b010010 | 0b010011 => Instr::LdrLit { rt: r(first, 8), imm8: imm(first, 0, 8) as u8 },
            0b010100..=0b100111 => load_store(first),
            0b101000 | 0b101001 => Instr::Adr { rd: r(first, 8), imm8: imm(first, 0, 8) as u8 },
            0b101010 | 0b101011 => Instr::AddSpImm { rd: r(first, 8), imm8: imm(first, 0, 8) as u8 },
            0b101100..=0b101111 => misc(first),
            0b110000 | 0b110001 => Instr::Stm { rn: r(first, 8), list: imm(first, 0, 8) as u8 },
            0b110010 | 0b110011 => Instr::Ldm { rn: r(first, 8), list: imm(first, 0, 8) as u8 },
            0b110100..=0b110111 => match Cond::from_bits(imm(first, 8, 4)) {
                Some(cond) => Instr::BCond { cond, imm8: imm(first, 0, 8) as u8 },
                // 0b1110 is permanently undefined, 0b1111 is SVC
                None => Instr::Undefined,
            },
            0b111000 | 0b111001 => Instr::B { imm11: imm(first, 0, 11) as u16 },
            _ => Instr::Undefined,
        };
        Decoded { instr, raw: first, width: 2 }
    }
}

fn shift_add_move_compare(v: u32) -> Instr {
    let (rd, rm, imm5) = (r(v, 0), r(v, 3), imm(v, 6, 5) as u8);
    match imm(v, 9, 5) {
        0b00000..=0b00011 => Instr::LslImm { rd, rm, imm5 },
        0b00100..=0b00111 => Instr::LsrImm { rd, rm, imm5 },
        0b01000..=0b01011 => Instr::AsrImm { rd, rm, imm5 },
        0b01100 => Instr::AddReg { rd, rn: r(v, 3), rm: r(v, 6) },
        0b01101 => Instr::SubReg { rd, rn: r(v, 3), rm: r(v, 6) },
        0b01110 => Instr::AddImm3 { rd, rn: r(v, 3), imm3: imm(v, 6, 3) as u8 },
        0b01111 => Instr::SubImm3 { rd, rn: r(v, 3), imm3: imm(v, 6, 3) as u8 },
        op => {
            let (reg, imm8) = (r(v, 8), imm(v, 0, 8) as u8);
            match op >> 2 {
                0b100 => Instr::MovImm { rd: reg, imm8 },
                0b101 => Instr::CmpImm { rn: reg, imm8 },
                0b110 => Instr::AddImm8 { rdn: reg, imm8 },
                _ => Instr::SubImm8 { rdn: reg, imm8 },
            }
        }
    }
}

/// 0x4400 group: high-register add/cmp/mov and branch-exchange.
fn special(v: u32) -> Instr {
    let rdn = Reg((((v >> 4) & 8) | (v & 7)) as u8);
    let rm = Reg(imm(v, 3, 4) as u8);
    match imm(v, 8, 2) {
        0b00 => Instr::AddHi { rdn, rm },
        0b01 => Instr::CmpHi { rn: rdn, rm },
        0b10 => Instr::MovHi { rd: rdn, rm },
        _ => {
            if v & 7 != 0 {
                Instr::Undefined
            } else if v & 0x80 != 0 {
                Instr::Blx { rm }
            } else {
                Instr::Bx { rm }
            }
        }
    }
}

fn load_store(v: u32) -> Instr {
    let (rt, rn) = (r(v, 0), r(v, 3));
    match v >> 12 {
        0b0101 => Instr::MemReg { op: MemRegOp::from_bits(v >> 9), rt, rn, rm: r(v, 6) },
        0b1001 => {
            let (rt, imm8) = (r(v, 8), imm(v, 0, 8) as u8);
            if v & 0x0800 != 0 {
                Instr::LdrSp { rt, imm8 }
            } else {
                Instr::StrSp { rt, imm8 }
            }
        }
        group => {
            let load = v & 0x0800 != 0;
            let op = match (group, load) {
                (0b0110, false) => MemImmOp::Str,
                (0b0110, true) => MemImmOp::Ldr,
                (0b0111, false) => MemImmOp::Strb,
                (0b0111, true) => MemImmOp::Ldrb,
                (_, false) => MemImmOp::Strh,
                (_, true) => MemImmOp::Ldrh,
            };
            Instr::MemImm { op, rt, rn, imm5: imm(v, 6, 5) as u8 }
        }
    }
}

/// 0xb000 group: SP adjust, extends, push/pop, reverses, CPS, BKPT, hints.
fn misc(v: u32) -> Instr {
    let (rd, rm) = (r(v, 0), r(v, 3));
    match imm(v, 8, 4) {
        0b0000 => {
            let imm7 = imm(v, 0, 7) as u8;
            if v & 0x80 != 0 {
                Instr::SubSp { imm7 }
            } else {
                Instr::AddSp { imm7 }
            }
        }
        0b0010 => {
            let op = match imm(v, 6, 2) {
                0b00 => ExtendOp::Sxth,
                0b01 => ExtendOp::Sxtb,
                0b10 => ExtendOp::Uxth,
                _ => ExtendOp::Uxtb,
            };
            Instr::Extend { op, rd, rm }
        }
        0b0100 | 0b0101 => Instr::Push { list: (v & 0xFF) as u16 | (((v >> 8) & 1) << 14) as u16 },
        0b1100 | 0b1101 => Instr::Pop { list: (v & 0xFF) as u16 | (((v >> 8) & 1) << 15) as u16 },
        0b0110 if v & 0xFFEF == 0xB662 => Instr::Cps { disable: v & 0x10 != 0 },
        0b1010 => match imm(v, 6, 2) {
            0b00 => Instr::Rev { op: RevOp::Rev, rd, rm },
            0b01 => Instr::Rev { op: RevOp::Rev16, rd, rm },
            0b11 => Instr::Rev { op: RevOp::Revsh, rd, rm },
            _ => Instr::Undefined,
        },
        0b1110 => Instr::Bkpt { imm8: imm(v, 0, 8) as u8 },
        0b1111 if v & 0xF == 0 => Instr::Hint(match imm(v, 4, 4) {
            1 => Hint::Yield,
            2 => Hint::Wfe,
            3 => Hint::Wfi,
            4 => Hint::Sev,
            // unallocated hints execute as NOP
            _ => Hint::Nop,
        }),
        _ => Instr::Undefined,
    }
}

fn decode_wide(raw32: u32) -> Instr {
    let (hw1, hw2) = (raw32 & 0xFFFF, raw32 >> 16);
    if hw1 & 0xF800 != 0xF000 || hw2 & 0xD000 != 0xD000 {
        return Instr::Undefined;
    }
    let s = (hw1 >> 10) & 1;
    let j1 = (hw2 >> 13) & 1;
    let j2 = (hw2 >> 11) & 1;
    let i1 = !(j1 ^ s) & 1;
    let i2 = !(j2 ^ s) & 1;
    let packed = (s << 24) | (i1 << 23) | (i2 << 22) | ((hw1 & 0x3FF) << 12) | ((hw2 & 0x7FF) << 1);
    Instr::Bl { offset: sign_extend(packed, 25) as i32 }
}
