//! Simulator context: CPU, memory, the last assembled program and the
//! run/step/breakpoint controls a front end drives.

use crate::asm::{self, AsmLayout, Diagnostic, DiagnosticKind, Severity};
use crate::cpu::{Apsr, Cpu, Reg, Trap};
use crate::disasm::{self, DisasmLine};
use crate::exec::ThumbExecutor;
use crate::isa::thumb::ThumbDecoder;
use crate::labels::LabelTable;
use crate::memory::{Access, BusFault, LoadError, MemoryMap, MemoryMapConfig, RegionKind, Segment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub memory: MemoryMapConfig,
    /// Instructions per [`Simulator::tick`].
    pub batch_size: u32,
    pub entry_label: String,
    pub text_start: u32,
    pub data_start: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            memory: MemoryMapConfig::default(),
            batch_size: 97,
            entry_label: "startup".to_string(),
            text_start: asm::TEXT_START,
            data_start: asm::DATA_START,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Bus(#[from] BusFault),
    #[error("Undefined reference to \"{0}\"")]
    NoEntry(String),
    #[error("\"{0}\" is neither a label nor a hex address")]
    BadTarget(String),
    #[error("no instruction on line {0}")]
    NoInstruction(usize),
    #[error("unknown register \"{0}\"")]
    UnknownRegister(String),
}

/// Register file state after a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub regs: [u32; 16],
    pub apsr: Apsr,
    pub primask: bool,
    pub ticks: u64,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.regs.iter().enumerate() {
            let sep = if i % 4 == 3 { "\n" } else { "  " };
            write!(f, "{:>4}: {v:08x}{sep}", Reg(i as u8).to_string())?;
        }
        write!(f, "apsr: {}  primask: {}  ticks: {}", self.apsr, self.primask as u8, self.ticks)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Address of the instruction stepped.
    pub pc: u32,
    pub text: String,
    pub trap: Option<Trap>,
    pub snapshot: Snapshot,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Halt {
    Breakpoint { pc: u32 },
    Trap(Trap),
    Stopped,
    StepLimit,
}

/// Result of [`Simulator::assemble`].
#[derive(Debug, Clone, Serialize)]
pub struct Assembly {
    pub ok: bool,
    pub segments: Vec<Segment>,
    pub labels: LabelTable,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Simulator {
    pub cpu: Cpu,
    pub mem: MemoryMap,
    cfg: SimConfig,
    dec: ThumbDecoder,
    exec: ThumbExecutor,
    labels: LabelTable,
    line_map: BTreeMap<u32, usize>,
    breakpoints: BTreeSet<u32>,
    /// Breakpoint already reported at this PC; the next run executes it.
    serviced: Option<u32>,
    running: bool,
}

impl Simulator {
    pub fn new(cfg: SimConfig) -> Result<Self, SimError> {
        let mem = MemoryMap::new(&cfg.memory)?;
        Ok(Self {
            cpu: Cpu::new(),
            mem,
            cfg,
            dec: ThumbDecoder::new(),
            exec: ThumbExecutor::new(),
            labels: LabelTable::new(),
            line_map: BTreeMap::new(),
            breakpoints: BTreeSet::new(),
            serviced: None,
            running: false,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Source line of the instruction at `addr`.
    pub fn line_of(&self, addr: u32) -> Option<usize> {
        self.line_map.get(&addr).copied()
    }

    /// Assembles, loads and resets. On failure memory is left cleared and
    /// the diagnostics say why.
    pub fn assemble(&mut self, src: &str) -> Assembly {
        self.stop();
        self.mem.clear();
        self.labels = LabelTable::new();
        self.line_map.clear();
        self.breakpoints.clear();
        let layout = AsmLayout { text_start: self.cfg.text_start, data_start: self.cfg.data_start };
        let program = match asm::assemble_with(src, &layout) {
            Ok(p) => p,
            Err(e) => {
                warn!(%e, "assembly failed");
                return Assembly {
                    ok: false,
                    segments: Vec::new(),
                    labels: LabelTable::new(),
                    diagnostics: vec![e.diagnostic()],
                };
            }
        };
        let mut diagnostics = program.diagnostics.clone();
        let mut ok = program.is_complete();
        if let Err(e) = self.load(&program.segments) {
            diagnostics.push(link_error(e.to_string()));
            ok = false;
        }
        self.labels = program.labels.clone();
        self.line_map = program.line_map.clone();
        if let Err(e) = self.reset() {
            diagnostics.push(link_error(e.to_string()));
            ok = false;
        }
        Assembly { ok, segments: program.segments, labels: program.labels, diagnostics }
    }

    pub fn load(&mut self, segments: &[Segment]) -> Result<(), SimError> {
        self.mem.load(segments)?;
        Ok(())
    }

    /// r0-r12 and the tick count zeroed, SP at the top of SRAM, LR all ones,
    /// PC at the entry label. Memory is left alone so loaded `.data`
    /// survives; `assemble` is what starts from cleared memory. Without the
    /// label PC is left unusable and an error returned.
    pub fn reset(&mut self) -> Result<(), SimError> {
        self.stop();
        self.serviced = None;
        let sp = self
            .mem
            .regions()
            .iter()
            .find(|r| r.kind == RegionKind::Sram)
            .map_or(0, |r| r.end() as u32);
        match self.labels.addr_of(&self.cfg.entry_label) {
            Some(pc) => {
                self.cpu.reset(sp, pc);
                Ok(())
            }
            None => {
                self.cpu.reset(sp, 0xFFFF_FFFF);
                Err(SimError::NoEntry(self.cfg.entry_label.clone()))
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot { regs: self.cpu.regs, apsr: self.cpu.apsr, primask: self.cpu.primask, ticks: self.cpu.ticks }
    }

    /// Executes exactly one instruction, breakpoints notwithstanding.
    pub fn step(&mut self) -> StepReport {
        let pc = self.cpu.peek(Reg::PC);
        self.serviced = None;
        let (text, trap) = match self.cpu.step(&mut self.mem, &self.dec, &self.exec) {
            Ok(d) => (disasm::fmt_decoded(&d, pc, Some(&self.labels)), None),
            Err(t) => {
                report(&t);
                (t.to_string(), Some(t))
            }
        };
        trace!(pc, %text, "step");
        StepReport { pc, text, trap, snapshot: self.snapshot() }
    }

    pub fn run(&mut self) {
        if !self.running {
            info!(pc = self.cpu.peek(Reg::PC), "run");
        }
        self.running = true;
    }

    pub fn stop(&mut self) {
        if self.running {
            info!(pc = self.cpu.peek(Reg::PC), ticks = self.cpu.ticks, "stop");
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// One instruction under run mode: stops at a breakpoint once, then
    /// executes it on the next call.
    fn run_one(&mut self) -> Option<Halt> {
        let pc = self.cpu.peek(Reg::PC);
        if self.breakpoints.contains(&pc) && self.serviced != Some(pc) {
            self.serviced = Some(pc);
            info!(pc, line = self.line_of(pc), "breakpoint");
            return Some(Halt::Breakpoint { pc });
        }
        self.serviced = None;
        match self.cpu.step(&mut self.mem, &self.dec, &self.exec) {
            Ok(_) => None,
            Err(t) => {
                report(&t);
                Some(Halt::Trap(t))
            }
        }
    }

    /// One batch of run mode. Returns why the run ended, if it did.
    pub fn tick(&mut self) -> Option<Halt> {
        if !self.running {
            return None;
        }
        for _ in 0..self.cfg.batch_size {
            if let Some(halt) = self.run_one() {
                self.stop();
                return Some(halt);
            }
        }
        None
    }

    /// Runs until a breakpoint, a trap or `max_steps` instructions.
    pub fn run_until_halt(&mut self, max_steps: u64) -> Halt {
        self.run();
        for _ in 0..max_steps {
            if let Some(halt) = self.run_one() {
                self.stop();
                return halt;
            }
        }
        self.stop();
        Halt::StepLimit
    }

    pub fn set_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr & !1);
    }

    /// Breakpoint on the first instruction assembled from `line`.
    pub fn set_breakpoint_line(&mut self, line: usize) -> Result<u32, SimError> {
        let addr = self
            .line_map
            .iter()
            .find(|(_, &l)| l == line)
            .map(|(&a, _)| a)
            .ok_or(SimError::NoInstruction(line))?;
        self.set_breakpoint(addr);
        Ok(addr)
    }

    pub fn clear_breakpoint(&mut self, addr: u32) -> bool {
        self.breakpoints.remove(&(addr & !1))
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = u32> + '_ {
        self.breakpoints.iter().copied()
    }

    pub fn disassemble(&mut self, start: u32, len: u32) -> Vec<DisasmLine> {
        disasm::disassemble(&mut self.mem, &self.dec, start, len, Some(&self.labels))
    }

    pub fn read_memory(&mut self, addr: u32, width: Access) -> Result<u32, SimError> {
        Ok(width.read(&mut self.mem, addr)?)
    }

    pub fn write_memory(&mut self, addr: u32, width: Access, value: u32) -> Result<(), SimError> {
        Ok(width.write(&mut self.mem, addr, value)?)
    }

    pub fn hexdump(&self, start: u32, len: u32) -> String {
        self.mem.format(start, len)
    }

    /// Moves PC to a label or a hex address (`0x100`, `$100`, `100`).
    pub fn goto(&mut self, target: &str) -> Result<u32, SimError> {
        let target = target.trim();
        let addr = match self.labels.addr_of(target) {
            Some(a) => a,
            None => {
                let digits = target
                    .strip_prefix("0x")
                    .or_else(|| target.strip_prefix("0X"))
                    .or_else(|| target.strip_prefix('$'))
                    .unwrap_or(target);
                u32::from_str_radix(digits, 16).map_err(|_| SimError::BadTarget(target.to_string()))?
            }
        };
        self.serviced = None;
        self.cpu.write(Reg::PC, addr);
        Ok(self.cpu.peek(Reg::PC))
    }

    /// `r0`..`r15`, `sp`, `lr`, `pc` or `apsr`.
    pub fn register(&self, name: &str) -> Result<u32, SimError> {
        if name.eq_ignore_ascii_case("apsr") {
            return Ok(self.cpu.status());
        }
        let r = Reg::from_name(name).ok_or_else(|| SimError::UnknownRegister(name.to_string()))?;
        Ok(self.cpu.peek(r))
    }

    pub fn set_register(&mut self, name: &str, value: u32) -> Result<(), SimError> {
        if name.eq_ignore_ascii_case("apsr") {
            self.cpu.set_status(value);
            return Ok(());
        }
        let r = Reg::from_name(name).ok_or_else(|| SimError::UnknownRegister(name.to_string()))?;
        self.cpu.write(r, value);
        Ok(())
    }
}

fn link_error(message: String) -> Diagnostic {
    Diagnostic { line: 0, message, severity: Severity::Error, kind: DiagnosticKind::Layout }
}

fn report(t: &Trap) {
    if t.is_fault() {
        warn!(pc = t.pc(), "{t}");
    } else {
        info!(pc = t.pc(), "{t}");
    }
}
