use crate::cpu::{Apsr, Reg};
use serde::{Deserialize, Serialize};

/// Branch conditions, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cond {
    Eq,
    Ne,
    Cs,
    Cc,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
}

impl Cond {
    const ALL: [Cond; 14] = [
        Cond::Eq,
        Cond::Ne,
        Cond::Cs,
        Cond::Cc,
        Cond::Mi,
        Cond::Pl,
        Cond::Vs,
        Cond::Vc,
        Cond::Hi,
        Cond::Ls,
        Cond::Ge,
        Cond::Lt,
        Cond::Gt,
        Cond::Le,
    ];

    /// 0b1110 (always) and 0b1111 (SVC) are not conditions here.
    pub fn from_bits(bits: u32) -> Option<Cond> {
        Self::ALL.get(bits as usize).copied()
    }

    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Cs => "cs",
            Cond::Cc => "cc",
            Cond::Mi => "mi",
            Cond::Pl => "pl",
            Cond::Vs => "vs",
            Cond::Vc => "vc",
            Cond::Hi => "hi",
            Cond::Ls => "ls",
            Cond::Ge => "ge",
            Cond::Lt => "lt",
            Cond::Gt => "gt",
            Cond::Le => "le",
        }
    }

    /// Parses a suffix such as `eq`; `hs`/`lo` are accepted as `cs`/`cc`.
    pub fn from_suffix(s: &str) -> Option<Cond> {
        match s {
            "hs" => Some(Cond::Cs),
            "lo" => Some(Cond::Cc),
            _ => Self::ALL.iter().copied().find(|c| c.name() == s),
        }
    }

    pub fn holds(self, f: Apsr) -> bool {
        let (n, z, c, v) = (
            f.contains(Apsr::N),
            f.contains(Apsr::Z),
            f.contains(Apsr::C),
            f.contains(Apsr::V),
        );
        match self {
            Cond::Eq => z,
            Cond::Ne => !z,
            Cond::Cs => c,
            Cond::Cc => !c,
            Cond::Mi => n,
            Cond::Pl => !n,
            Cond::Vs => v,
            Cond::Vc => !v,
            Cond::Hi => c && !z,
            Cond::Ls => !c || z,
            Cond::Ge => n == v,
            Cond::Lt => n != v,
            Cond::Gt => !z && n == v,
            Cond::Le => z || n != v,
        }
    }
}

/// Register-register data processing group (0x4000), in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DpOp {
    And,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Adc,
    Sbc,
    Ror,
    Tst,
    Rsb,
    Cmp,
    Cmn,
    Orr,
    Mul,
    Bic,
    Mvn,
}

impl DpOp {
    const ALL: [DpOp; 16] = [
        DpOp::And,
        DpOp::Eor,
        DpOp::Lsl,
        DpOp::Lsr,
        DpOp::Asr,
        DpOp::Adc,
        DpOp::Sbc,
        DpOp::Ror,
        DpOp::Tst,
        DpOp::Rsb,
        DpOp::Cmp,
        DpOp::Cmn,
        DpOp::Orr,
        DpOp::Mul,
        DpOp::Bic,
        DpOp::Mvn,
    ];

    pub fn from_bits(bits: u32) -> DpOp {
        Self::ALL[(bits & 0xF) as usize]
    }

    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            DpOp::And => "ands",
            DpOp::Eor => "eors",
            DpOp::Lsl => "lsls",
            DpOp::Lsr => "lsrs",
            DpOp::Asr => "asrs",
            DpOp::Adc => "adcs",
            DpOp::Sbc => "sbcs",
            DpOp::Ror => "rors",
            DpOp::Tst => "tst",
            DpOp::Rsb => "rsbs",
            DpOp::Cmp => "cmp",
            DpOp::Cmn => "cmn",
            DpOp::Orr => "orrs",
            DpOp::Mul => "muls",
            DpOp::Bic => "bics",
            DpOp::Mvn => "mvns",
        }
    }

    pub fn from_mnemonic(m: &str) -> Option<DpOp> {
        Self::ALL.iter().copied().find(|op| op.mnemonic() == m)
    }
}

/// Register-offset loads and stores (0x5000), in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemRegOp {
    Str,
    Strh,
    Strb,
    Ldrsb,
    Ldr,
    Ldrh,
    Ldrb,
    Ldrsh,
}

impl MemRegOp {
    const ALL: [MemRegOp; 8] = [
        MemRegOp::Str,
        MemRegOp::Strh,
        MemRegOp::Strb,
        MemRegOp::Ldrsb,
        MemRegOp::Ldr,
        MemRegOp::Ldrh,
        MemRegOp::Ldrb,
        MemRegOp::Ldrsh,
    ];

    pub fn from_bits(bits: u32) -> MemRegOp {
        Self::ALL[(bits & 7) as usize]
    }

    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            MemRegOp::Str => "str",
            MemRegOp::Strh => "strh",
            MemRegOp::Strb => "strb",
            MemRegOp::Ldrsb => "ldrsb",
            MemRegOp::Ldr => "ldr",
            MemRegOp::Ldrh => "ldrh",
            MemRegOp::Ldrb => "ldrb",
            MemRegOp::Ldrsh => "ldrsh",
        }
    }

    pub fn from_mnemonic(m: &str) -> Option<MemRegOp> {
        Self::ALL.iter().copied().find(|op| op.mnemonic() == m)
    }
}

/// Immediate-offset loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemImmOp {
    Str,
    Ldr,
    Strb,
    Ldrb,
    Strh,
    Ldrh,
}

impl MemImmOp {
    /// Opcode base; bit 11 selects load.
    pub fn base(self) -> u32 {
        match self {
            MemImmOp::Str => 0x6000,
            MemImmOp::Ldr => 0x6800,
            MemImmOp::Strb => 0x7000,
            MemImmOp::Ldrb => 0x7800,
            MemImmOp::Strh => 0x8000,
            MemImmOp::Ldrh => 0x8800,
        }
    }

    /// Bytes per unit of the 5-bit offset field.
    pub fn scale(self) -> u32 {
        match self {
            MemImmOp::Str | MemImmOp::Ldr => 4,
            MemImmOp::Strb | MemImmOp::Ldrb => 1,
            MemImmOp::Strh | MemImmOp::Ldrh => 2,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            MemImmOp::Str => "str",
            MemImmOp::Ldr => "ldr",
            MemImmOp::Strb => "strb",
            MemImmOp::Ldrb => "ldrb",
            MemImmOp::Strh => "strh",
            MemImmOp::Ldrh => "ldrh",
        }
    }

    pub fn from_mnemonic(m: &str) -> Option<MemImmOp> {
        [
            MemImmOp::Str,
            MemImmOp::Ldr,
            MemImmOp::Strb,
            MemImmOp::Ldrb,
            MemImmOp::Strh,
            MemImmOp::Ldrh,
        ]
        .into_iter()
        .find(|op| op.mnemonic() == m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtendOp {
    Sxth,
    Sxtb,
    Uxth,
    Uxtb,
}

impl ExtendOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ExtendOp::Sxth => "sxth",
            ExtendOp::Sxtb => "sxtb",
            ExtendOp::Uxth => "uxth",
            ExtendOp::Uxtb => "uxtb",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevOp {
    Rev,
    Rev16,
    Revsh,
}

impl RevOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            RevOp::Rev => "rev",
            RevOp::Rev16 => "rev16",
            RevOp::Revsh => "revsh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hint {
    Nop,
    Yield,
    Wfe,
    Wfi,
    Sev,
}

impl Hint {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Hint::Nop => "nop",
            Hint::Yield => "yield",
            Hint::Wfe => "wfe",
            Hint::Wfi => "wfi",
            Hint::Sev => "sev",
        }
    }
}

/// The closed instruction catalog. Register-list masks are indexed by
/// register number (bit 14 = lr, bit 15 = pc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instr {
    LslImm { rd: Reg, rm: Reg, imm5: u8 },
    LsrImm { rd: Reg, rm: Reg, imm5: u8 },
    AsrImm { rd: Reg, rm: Reg, imm5: u8 },
    AddReg { rd: Reg, rn: Reg, rm: Reg },
    SubReg { rd: Reg, rn: Reg, rm: Reg },
    AddImm3 { rd: Reg, rn: Reg, imm3: u8 },
    SubImm3 { rd: Reg, rn: Reg, imm3: u8 },
    MovImm { rd: Reg, imm8: u8 },
    CmpImm { rn: Reg, imm8: u8 },
    AddImm8 { rdn: Reg, imm8: u8 },
    SubImm8 { rdn: Reg, imm8: u8 },
    DataProc { op: DpOp, rdn: Reg, rm: Reg },
    AddHi { rdn: Reg, rm: Reg },
    CmpHi { rn: Reg, rm: Reg },
    MovHi { rd: Reg, rm: Reg },
    Bx { rm: Reg },
    Blx { rm: Reg },
    LdrLit { rt: Reg, imm8: u8 },
    MemReg { op: MemRegOp, rt: Reg, rn: Reg, rm: Reg },
    MemImm { op: MemImmOp, rt: Reg, rn: Reg, imm5: u8 },
    StrSp { rt: Reg, imm8: u8 },
    LdrSp { rt: Reg, imm8: u8 },
    Adr { rd: Reg, imm8: u8 },
    AddSpImm { rd: Reg, imm8: u8 },
    AddSp { imm7: u8 },
    SubSp { imm7: u8 },
    Extend { op: ExtendOp, rd: Reg, rm: Reg },
    Rev { op: RevOp, rd: Reg, rm: Reg },
    Push { list: u16 },
    Pop { list: u16 },
    Stm { rn: Reg, list: u8 },
    Ldm { rn: Reg, list: u8 },
    Cps { disable: bool },
    Bkpt { imm8: u8 },
    Hint(Hint),
    BCond { cond: Cond, imm8: u8 },
    B { imm11: u16 },
    Bl { offset: i32 },
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoded {
    pub instr: Instr,
    pub raw: u32,
    pub width: u8, // 2 or 4
}

pub trait Decoder {
    /// Whether a first halfword starts a 32-bit encoding.
    fn is_wide(&self, first: u16) -> bool;
    /// `raw32` carries the first halfword in bits 0..16 and, for wide
    /// encodings, the second in bits 16..32.
    fn decode(&self, raw32: u32) -> Decoded;
}
