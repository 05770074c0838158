use crate::decoder::{Decoded, Decoder};
use crate::exec::Executor;
use crate::memory::{describe_alignment, Bus, BusFault};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Register index. 0..=12 are general purpose, 13..=15 are SP, LR and PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reg(pub u8);

impl Reg {
    pub const SP: Reg = Reg(13);
    pub const LR: Reg = Reg(14);
    pub const PC: Reg = Reg(15);

    pub fn index(self) -> usize {
        (self.0 & 0xF) as usize
    }

    /// r0..r7, encodable in a 3-bit field.
    pub fn is_low(self) -> bool {
        self.0 < 8
    }

    pub fn from_name(name: &str) -> Option<Reg> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "sp" => return Some(Reg::SP),
            "lr" => return Some(Reg::LR),
            "pc" => return Some(Reg::PC),
            _ => {}
        }
        let n = lower.strip_prefix('r')?.parse::<u8>().ok()?;
        // reject "r01" style spellings
        if n > 15 || lower.len() != n.to_string().len() + 1 {
            return None;
        }
        Some(Reg(n))
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            13 => f.write_str("sp"),
            14 => f.write_str("lr"),
            15 => f.write_str("pc"),
            n => write!(f, "r{n}"),
        }
    }
}

bitflags! {
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apsr: u32 {
const N = 1 << 31; // Negative
const Z = 1 << 30; // Zero
const C = 1 << 29; // Carry / not borrow
const V = 1 << 28; // Overflow
}
}

impl fmt::Display for Apsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, ch) in [(Apsr::N, 'N'), (Apsr::Z, 'Z'), (Apsr::C, 'C'), (Apsr::V, 'V')] {
            let c = if self.contains(flag) { ch } else { '-' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Trap {
    #[error("HardFault at PC {pc:#010x}: address {addr:#010x} {}", describe_alignment(*.align))]
    HardFault { pc: u32, addr: u32, align: u32 },
    #[error("Undefined instruction {raw:#06x} at {pc:#010x}")]
    Undefined { pc: u32, raw: u32 },
    #[error("BKPT #{imm} at {pc:#010x}")]
    Breakpoint { pc: u32, imm: u8 },
    #[error("{hint} at {pc:#010x}: waiting for an event")]
    Sleep { pc: u32, hint: &'static str },
}

impl Trap {
    pub fn hard_fault(pc: u32, fault: BusFault) -> Self {
        Trap::HardFault { pc, addr: fault.addr, align: fault.align }
    }

    pub fn pc(&self) -> u32 {
        match *self {
            Trap::HardFault { pc, .. }
            | Trap::Undefined { pc, .. }
            | Trap::Breakpoint { pc, .. }
            | Trap::Sleep { pc, .. } => pc,
        }
    }

    /// Faults abort the run; breakpoints and wait hints are orderly halts.
    pub fn is_fault(&self) -> bool {
        matches!(self, Trap::HardFault { .. } | Trap::Undefined { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cpu {
    pub regs: [u32; 16],
    pub apsr: Apsr,
    pub primask: bool,
    pub ticks: u64,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            regs: [0; 16],
            apsr: Apsr::empty(),
            primask: false,
            ticks: 0,
        }
    }

    /// r0-r12, flags and the tick count cleared, SP/LR/PC set through the
    /// write masks.
    pub fn reset(&mut self, sp: u32, pc: u32) {
        self.regs[..13].fill(0);
        self.ticks = 0;
        self.write(Reg::SP, sp);
        self.write(Reg::LR, 0xFFFF_FFFF);
        self.write(Reg::PC, pc);
        self.apsr = Apsr::empty();
        self.primask = false;
    }

    pub fn read(&self, r: Reg) -> u32 {
        let v = self.regs[r.index()];
        trace!(reg = %r, value = v, "read");
        v
    }

    pub fn peek(&self, r: Reg) -> u32 {
        self.regs[r.index()]
    }

    pub fn write(&mut self, r: Reg, value: u32) {
        let v = match r {
            Reg::SP => value & 0xFFFF_FFFC,
            Reg::LR => value | 1,
            Reg::PC => value & !1,
            _ => value,
        };
        self.regs[r.index()] = v;
    }

    pub fn tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    pub fn n(&self) -> bool {
        self.apsr.contains(Apsr::N)
    }
    pub fn z(&self) -> bool {
        self.apsr.contains(Apsr::Z)
    }
    pub fn c(&self) -> bool {
        self.apsr.contains(Apsr::C)
    }
    pub fn v(&self) -> bool {
        self.apsr.contains(Apsr::V)
    }

    pub fn set_nz(&mut self, result: u32) {
        self.apsr.set(Apsr::N, result & 0x8000_0000 != 0);
        self.apsr.set(Apsr::Z, result == 0);
    }

    pub fn set_nzc(&mut self, result: u32, carry: bool) {
        self.set_nz(result);
        self.apsr.set(Apsr::C, carry);
    }

    pub fn set_nzcv(&mut self, result: u32, carry: bool, overflow: bool) {
        self.set_nzc(result, carry);
        self.apsr.set(Apsr::V, overflow);
    }

    /// Aggregate status value: N=31, Z=30, C=29, V=28.
    pub fn status(&self) -> u32 {
        self.apsr.bits()
    }

    pub fn set_status(&mut self, value: u32) {
        self.apsr = Apsr::from_bits_truncate(value);
    }

    /// Fetch, decode and execute one instruction. On a trap the PC is rolled
    /// back to the instruction that raised it, so a retry re-faults.
    pub fn step<B: Bus, D: Decoder, X: Executor>(
        &mut self,
        bus: &mut B,
        dec: &D,
        exec: &X,
    ) -> Result<Decoded, Trap> {
        let pc = self.peek(Reg::PC);
        let first = bus.read_u16(pc).map_err(|f| Trap::hard_fault(pc, f))?;
        let mut raw32 = first as u32;
        if dec.is_wide(first) {
            let second = bus
                .read_u16(pc.wrapping_add(2))
                .map_err(|f| Trap::hard_fault(pc, f))?;
            raw32 |= (second as u32) << 16;
        }
        let d = dec.decode(raw32);
        self.write(Reg::PC, pc.wrapping_add(d.width as u32));
        self.tick();
        trace!(pc, raw = raw32, instr = ?d.instr, "step");
        if let Err(trap) = exec.exec(self, bus, &d) {
            self.regs[Reg::PC.index()] = pc;
            return Err(trap);
        }
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names_round_trip() {
        for n in 0..16u8 {
            let r = Reg(n);
            assert_eq!(Reg::from_name(&r.to_string()), Some(r));
        }
        assert_eq!(Reg::from_name("R7"), Some(Reg(7)));
        assert_eq!(Reg::from_name("r15"), Some(Reg::PC));
        assert_eq!(Reg::from_name("r16"), None);
        assert_eq!(Reg::from_name("r01"), None);
        assert_eq!(Reg::from_name("label"), None);
    }

    #[test]
    fn flag_string() {
        let mut cpu = Cpu::new();
        cpu.set_nzcv(0, true, false);
        assert_eq!(cpu.apsr.to_string(), "-ZC-");
    }
}
