pub mod alu;
pub mod asm;
pub mod cpu;
pub mod decoder;
pub mod disasm;
pub mod exec;
pub mod instructions;
pub mod labels;
pub mod memory;
pub mod sim;

pub mod isa {
    pub mod thumb; // ARMv6-M Thumb subset
}

pub use asm::{assemble, assemble_with, AsmError, AsmLayout, Diagnostic, Program};
pub use cpu::{Apsr, Cpu, Reg, Trap};
pub use memory::{Access, Bus, BusFault, MemoryMap, MemoryMapConfig, Segment};
pub use sim::{Halt, SimConfig, Simulator};
