//! Thumb assembler.
//!
//! Source is preprocessed (comments, header directives, `name = value`
//! constants), then walked three times:
//!
//! 1. index: every line is sized with a lenient encoder so labels get
//!    addresses; forward references resolve to placeholders,
//! 2. literal pool: `ldr rt, =expr` lines get a pool slot after the highest
//!    code address and are rewritten to `ldr rt, [pc, #offset]`,
//! 3. emit: lines are encoded for real; anything unresolved is fatal.

pub mod directive;
pub mod encode;
pub mod lexer;
pub mod operand;
pub mod pool;

use crate::cpu::Reg;
use crate::instructions;
use crate::labels::{LabelTable, SymbolTable};
use crate::memory::{Segment, SegmentKind};
use bitflags::bitflags;
use directive::Layout;
use encode::Ctx;
use lexer::{LexErr, Spanned, Token};
use operand::Operand;
use pool::{Literal, Pending};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use tracing::{debug, warn};

pub const TEXT_START: u32 = 0x0800_0300;
pub const DATA_START: u32 = 0x2000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Unknown mnemonic or directive, malformed operands.
    Syntax,
    /// Immediate out of range, misaligned offset, wrong register class.
    Range,
    BranchRange,
    /// Duplicate or undefined labels and constants.
    Label,
    /// Missing header directive.
    Directive,
    /// Segment placement.
    Layout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmErrorKind {
    #[error("{0}")]
    Lex(#[from] LexErr),
    #[error("unknown instruction \"{0}\"")]
    UnknownMnemonic(String),
    #[error("bad operands: {0}")]
    BadOperands(String),
    #[error("operands do not match {mnemonic}, expected: {expected}")]
    OperandMismatch { mnemonic: String, expected: String },
    #[error("unknown directive .{0}")]
    UnknownDirective(String),
    #[error("{0}")]
    BadDirective(String),

    #[error("value {value} out of range [{min}, {max}]")]
    ImmediateRange { value: i64, min: i64, max: i64 },
    #[error("value {value} is not a multiple of {align}")]
    Misaligned { value: i64, align: u32 },
    #[error("{0} is not a low register (r0-r7)")]
    HighRegister(Reg),
    #[error("{0} is not allowed in this register list")]
    RegisterNotAllowed(Reg),
    #[error("literal pool out of reach (offset {offset})")]
    LiteralRange { offset: i64 },

    #[error("branch displacement {disp} out of range [{min}, {max}]")]
    BranchRange { disp: i64, min: i64, max: i64 },
    #[error("branch target {0:#010x} is not halfword aligned")]
    MisalignedTarget(u32),

    #[error("label \"{name}\" already defined on line {first_line}")]
    DuplicateLabel { name: String, first_line: usize },
    #[error("label \"{0}\" clashes with a constant of the same name")]
    LabelShadowsSymbol(String),
    #[error("undefined symbol \"{0}\"")]
    UndefinedSymbol(String),
    #[error("\"{name}\" redefined, previous value {old}")]
    SymbolRedefined { name: String, old: i64 },

    #[error("{0}")]
    MissingHeader(&'static str),

    #[error("label \"{name}\" moved from {from:#010x} to {to:#010x}")]
    LabelMoved { name: String, from: u32, to: u32 },
    #[error("literal pool moved from {expected:#010x} to {actual:#010x}")]
    PoolMoved { expected: u32, actual: u32 },
    #[error("segment at {a:#010x} overlaps segment at {b:#010x}")]
    SegmentOverlap { a: u32, b: u32 },
    #[error("No code to run.")]
    NoCode,
}

impl AsmErrorKind {
    pub fn category(&self) -> DiagnosticKind {
        use AsmErrorKind::*;
        match self {
            Lex(_) | UnknownMnemonic(_) | BadOperands(_) | OperandMismatch { .. } | UnknownDirective(_)
            | BadDirective(_) => DiagnosticKind::Syntax,
            ImmediateRange { .. } | Misaligned { .. } | HighRegister(_) | RegisterNotAllowed(_)
            | LiteralRange { .. } => DiagnosticKind::Range,
            BranchRange { .. } | MisalignedTarget(_) => DiagnosticKind::BranchRange,
            DuplicateLabel { .. } | LabelShadowsSymbol(_) | UndefinedSymbol(_) | SymbolRedefined { .. } => {
                DiagnosticKind::Label
            }
            MissingHeader(_) => DiagnosticKind::Directive,
            LabelMoved { .. } | PoolMoved { .. } | SegmentOverlap { .. } | NoCode => DiagnosticKind::Layout,
        }
    }
}

fn line_prefix(line: usize) -> String {
    if line == 0 {
        String::new()
    } else {
        format!("line {line}: ")
    }
}

/// A fatal assembler error. `line` is 1-based; 0 means the program as a whole.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{}{kind}", line_prefix(*.line))]
pub struct AsmError {
    pub line: usize,
    pub kind: AsmErrorKind,
}

impl AsmError {
    pub fn new(line: usize, kind: AsmErrorKind) -> Self {
        Self { line, kind }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.line, &self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
    pub severity: Severity,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn error(line: usize, kind: &AsmErrorKind) -> Self {
        Self { line, message: kind.to_string(), severity: Severity::Error, kind: kind.category() }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}{sev}: {}", line_prefix(self.line), self.message)
    }
}

bitflags! {
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers: u8 {
const CPU = 1 << 0;
const THUMB = 1 << 1;
const SYNTAX = 1 << 2;
const FPU = 1 << 3;
const MAIN = 1 << 4;
}
}

/// Mandatory header lines, their flag and the message when missing.
const HEADERS: [(&str, Headers, &str); 6] = [
    (".cpu cortex-m0", Headers::CPU, "CPU type not specified"),
    (".thumb", Headers::THUMB, "Instruction set not specified"),
    (".syntax unified", Headers::SYNTAX, "Syntax format not specified"),
    (".fpu softvfp", Headers::FPU, "FPU type not specified"),
    (".global main", Headers::MAIN, "Undefined reference to \"main\""),
    (".globl main", Headers::MAIN, "Undefined reference to \"main\""),
];

/// Where `.text` and `.data` start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsmLayout {
    pub text_start: u32,
    pub data_start: u32,
}

impl Default for AsmLayout {
    fn default() -> Self {
        Self { text_start: TEXT_START, data_start: DATA_START }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingLine {
    pub addr: u32,
    pub bytes: Vec<u8>,
    pub line: usize,
    pub source: String,
}

/// Output of a successful assembly.
#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub segments: Vec<Segment>,
    pub labels: LabelTable,
    pub symbols: SymbolTable,
    pub literals: Vec<Literal>,
    /// Instruction address → 1-based source line.
    pub line_map: BTreeMap<u32, usize>,
    pub listing: Vec<ListingLine>,
    pub diagnostics: Vec<Diagnostic>,
    pub headers: Headers,
    pub globals: Vec<String>,
}

impl Program {
    /// Bytes were emitted and no error-level diagnostic was raised.
    pub fn is_complete(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    /// Address of the first instruction emitted for `line`.
    pub fn addr_of_line(&self, line: usize) -> Option<u32> {
        self.line_map.iter().find(|(_, &l)| l == line).map(|(&a, _)| a)
    }

    pub fn render_listing(&self) -> String {
        let mut out = String::new();
        for l in &self.listing {
            let hex: Vec<String> = l.bytes.iter().take(8).map(|b| format!("{b:02x}")).collect();
            let more = if l.bytes.len() > 8 { "+" } else { "" };
            let _ = writeln!(out, "{:08x}  {:<24}{more:<2}{:>5}  {}", l.addr, hex.join(" "), l.line, l.source.trim_end());
        }
        out
    }
}

#[derive(Debug, Clone)]
enum Body {
    Empty,
    Instr { mnemonic: String, ops: Vec<Operand> },
    Directive { name: String, args: Vec<Spanned> },
}

#[derive(Debug, Clone)]
struct Stmt {
    line: usize,
    /// Comment-stripped text; token spans index into it.
    text: String,
    label: Option<String>,
    body: Result<Body, AsmErrorKind>,
}

fn parse_body(toks: &[Spanned]) -> Result<Body, AsmErrorKind> {
    match toks {
        [] => Ok(Body::Empty),
        [(Token::Directive(name), _), args @ ..] => Ok(Body::Directive { name: name.clone(), args: args.to_vec() }),
        [(Token::Ident(m), _), ops @ ..] => Ok(Body::Instr { mnemonic: m.clone(), ops: operand::parse_operands(ops)? }),
        _ => Err(AsmErrorKind::BadOperands("expected a label, instruction or directive".into())),
    }
}

/// Splits off a leading `label:`; the body is parsed separately so a label
/// on a broken line is still defined.
fn parse_stmt(line: usize, text: String) -> Stmt {
    let toks = match lexer::tokenize(&text) {
        Ok(t) => t,
        Err((e, _)) => return Stmt { line, text, label: None, body: Err(e.into()) },
    };
    let (label, rest) = match toks.as_slice() {
        [(Token::Ident(n), _), (Token::Colon, _), rest @ ..] => (Some(n.clone()), rest),
        [(Token::Directive(n), _), (Token::Colon, _), rest @ ..] => (Some(format!(".{n}")), rest),
        rest => (None, rest),
    };
    let body = parse_body(rest);
    Stmt { line, text, label, body }
}

fn header(text: &str) -> Option<Headers> {
    let norm = text.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
    HEADERS.iter().find(|(line, ..)| *line == norm).map(|&(_, h, _)| h)
}

/// `NAME = expr`, evaluated against constants defined so far.
fn constant_def(text: &str, symbols: &SymbolTable) -> Result<Option<(String, i64)>, AsmErrorKind> {
    let Ok(toks) = lexer::tokenize(text) else { return Ok(None) };
    match toks.as_slice() {
        [(Token::Ident(name), _), (Token::Equals, _), rest @ ..] if !rest.is_empty() => {
            let value = operand::parse_expr(rest)?.eval(&|s| symbols.get(s))?;
            Ok(Some((name.clone(), value)))
        }
        _ => Ok(None),
    }
}

struct Source {
    stmts: Vec<Stmt>,
    headers: Headers,
    symbols: SymbolTable,
}

fn preprocess(src: &str) -> Result<Source, AsmError> {
    let mut stmts = Vec::new();
    let mut headers = Headers::empty();
    let mut symbols = SymbolTable::new();
    for (i, raw) in src.lines().enumerate() {
        let line = i + 1;
        let text = lexer::strip_comment(raw).trim();
        if let Some(h) = header(text) {
            headers |= h;
            stmts.push(parse_stmt(line, String::new()));
            continue;
        }
        if let Some((name, value)) = constant_def(text, &symbols).map_err(|k| AsmError::new(line, k))? {
            symbols
                .define(&name, value)
                .map_err(|old| AsmError::new(line, AsmErrorKind::SymbolRedefined { name, old }))?;
            stmts.push(parse_stmt(line, String::new()));
            continue;
        }
        stmts.push(parse_stmt(line, text.to_string()));
    }
    Ok(Source { stmts, headers, symbols })
}

fn resolve(symbols: &SymbolTable, labels: &LabelTable, name: &str) -> Option<i64> {
    symbols.get(name).or_else(|| labels.addr_of(name).map(i64::from))
}

/// Pass 1: label addresses and instruction addresses.
fn index(
    stmts: &[Stmt],
    symbols: &mut SymbolTable,
    labels: &mut LabelTable,
    cfg: &AsmLayout,
) -> Result<(Vec<Option<u32>>, u32), AsmError> {
    let mut layout = Layout::new(cfg.text_start, cfg.data_start);
    let mut addrs = vec![None; stmts.len()];
    for (i, st) in stmts.iter().enumerate() {
        let err = |kind| AsmError::new(st.line, kind);
        if let Some(name) = &st.label {
            if symbols.contains(name) {
                return Err(err(AsmErrorKind::LabelShadowsSymbol(name.clone())));
            }
            labels
                .define(name, layout.pc(), st.line, 1)
                .map_err(|first_line| err(AsmErrorKind::DuplicateLabel { name: name.clone(), first_line }))?;
        }
        let Ok(body) = &st.body else { continue };
        match body {
            Body::Empty => {}
            Body::Instr { mnemonic, ops } => {
                let addr = layout.pc();
                let lookup = |s: &str| resolve(&*symbols, &*labels, s);
                let ctx = Ctx { addr, strict: false, lookup: &lookup };
                let width = match encode::encode(mnemonic, ops, &ctx) {
                    Ok(instr) => instr.width(),
                    Err(_) => instructions::lookup(mnemonic).map_or(2, |d| d.width),
                };
                addrs[i] = Some(addr);
                layout.emit(&vec![0; width as usize]);
            }
            Body::Directive { name, args } => {
                let def = {
                    let lookup = |s: &str| resolve(&*symbols, &*labels, s);
                    let ctx = Ctx { addr: layout.pc(), strict: false, lookup: &lookup };
                    directive::apply(name, args, &mut layout, &ctx)
                };
                // sizing errors resurface in the emit pass
                if let Ok(Some((sym, value))) = def {
                    symbols
                        .define(&sym, value)
                        .map_err(|old| err(AsmErrorKind::SymbolRedefined { name: sym, old }))?;
                }
            }
        }
    }
    Ok((addrs, layout.code_end()))
}

/// Pass 2: assigns pool slots and rewrites `=expr` loads in place.
fn place_literals(stmts: &mut [Stmt], addrs: &[Option<u32>], pool_base: u32) -> Result<Vec<Pending>, AsmError> {
    let mut pending = Vec::new();
    for (st, addr) in stmts.iter_mut().zip(addrs) {
        let (Some(addr), Ok(Body::Instr { mnemonic, ops })) = (*addr, &st.body) else { continue };
        let Some((expr, span)) = pool::literal_operand(mnemonic, ops) else { continue };
        let line = st.line;
        let slot = pool_base.wrapping_add(4 * pending.len() as u32);
        let offset = pool::offset(addr, slot).map_err(|k| AsmError::new(line, k))?;
        let expr = expr.clone();
        let text = pool::rewrite(&st.text, span, offset);
        *st = parse_stmt(line, text);
        pending.push(Pending { slot, expr, line });
    }
    Ok(pending)
}

fn check_overlap(segments: &[Segment]) -> Result<(), AsmError> {
    let mut sorted: Vec<&Segment> = segments.iter().collect();
    sorted.sort_by_key(|s| s.origin);
    for pair in sorted.windows(2) {
        if pair[0].end() > pair[1].origin as u64 {
            return Err(AsmError::new(0, AsmErrorKind::SegmentOverlap { a: pair[0].origin, b: pair[1].origin }));
        }
    }
    Ok(())
}

pub fn assemble(src: &str) -> Result<Program, AsmError> {
    assemble_with(src, &AsmLayout::default())
}

pub fn assemble_with(src: &str, cfg: &AsmLayout) -> Result<Program, AsmError> {
    let Source { mut stmts, headers, mut symbols } = preprocess(src)?;
    let sources: Vec<&str> = src.lines().collect();
    let mut labels = LabelTable::new();

    let (addrs, code_end) = index(&stmts, &mut symbols, &mut labels, cfg)?;
    debug!(lines = stmts.len(), labels = labels.len(), code_end, "index pass");

    let pool_base = pool::base(code_end);
    let pending = place_literals(&mut stmts, &addrs, pool_base)?;
    debug!(literals = pending.len(), pool_base, "literal pass");

    let mut layout = Layout::new(cfg.text_start, cfg.data_start);
    let mut line_map = BTreeMap::new();
    let mut listing = Vec::new();
    let mut globals = Vec::new();
    if headers.contains(Headers::MAIN) {
        globals.push("main".to_string());
    }
    for st in &stmts {
        let err = |kind| AsmError::new(st.line, kind);
        if let Some(name) = &st.label {
            let pc = layout.pc();
            match labels.update(name, pc, 3) {
                Some(from) if from != pc => {
                    return Err(err(AsmErrorKind::LabelMoved { name: name.clone(), from, to: pc }))
                }
                _ => {}
            }
        }
        let body = st.body.as_ref().map_err(|k| err(k.clone()))?;
        let addr = layout.pc();
        let mark = layout.mark();
        match body {
            Body::Empty => continue,
            Body::Instr { mnemonic, ops } => {
                let lookup = |s: &str| resolve(&symbols, &labels, s);
                let ctx = Ctx { addr, strict: true, lookup: &lookup };
                let instr = encode::encode(mnemonic, ops, &ctx).map_err(err)?;
                let raw = instr.encode();
                let mut bytes = (raw as u16).to_le_bytes().to_vec();
                if instr.width() == 4 {
                    bytes.extend_from_slice(&((raw >> 16) as u16).to_le_bytes());
                }
                layout.emit(&bytes);
                line_map.insert(addr, st.line);
            }
            Body::Directive { name, args } => {
                let def = {
                    let lookup = |s: &str| resolve(&symbols, &labels, s);
                    let ctx = Ctx { addr, strict: true, lookup: &lookup };
                    directive::apply(name, args, &mut layout, &ctx).map_err(err)?
                };
                if let Some((sym, value)) = def {
                    symbols.set(&sym, value);
                }
                if matches!(name.to_ascii_lowercase().as_str(), "global" | "globl") {
                    if let [(Token::Ident(g), _)] = args.as_slice() {
                        globals.push(g.clone());
                    }
                }
            }
        }
        let bytes = layout.since(mark);
        if !bytes.is_empty() {
            let source = sources.get(st.line - 1).copied().unwrap_or_default().to_string();
            listing.push(ListingLine { addr, bytes: bytes.to_vec(), line: st.line, source });
        }
    }

    if !pending.is_empty() && pool::base(layout.code_end()) != pool_base {
        let actual = pool::base(layout.code_end());
        return Err(AsmError::new(0, AsmErrorKind::PoolMoved { expected: pool_base, actual }));
    }
    let (pool_seg, literals) = {
        let lookup = |s: &str| resolve(&symbols, &labels, s);
        pool::emit(&pending, &lookup)?
    };
    let mut segments = layout.into_segments();
    segments.extend(pool_seg);
    if !segments.iter().any(|s| s.kind == SegmentKind::Code) {
        return Err(AsmError::new(0, AsmErrorKind::NoCode));
    }
    check_overlap(&segments)?;
    debug!(segments = segments.len(), labels = labels.len(), "emit pass");

    let mut diagnostics = Vec::new();
    for &(_, flag, message) in HEADERS.iter().take(5) {
        if !headers.contains(flag) {
            warn!("{message}");
            diagnostics.push(Diagnostic::error(0, &AsmErrorKind::MissingHeader(message)));
        }
    }

    Ok(Program { segments, labels, symbols, literals, line_map, listing, diagnostics, headers, globals })
}
