//! Section/segment layout and the data directives that write into it.

use super::encode::Ctx;
use super::lexer::{Spanned, Token};
use super::operand::{parse_expr, split_top_level};
use super::AsmErrorKind;
use crate::memory::{Segment, SegmentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Text,
    Data,
}

/// Segments of one section; `active` receives emitted bytes.
#[derive(Debug, Clone)]
struct SectionState {
    kind: SegmentKind,
    segments: Vec<Segment>,
    active: usize,
}

impl SectionState {
    fn new(kind: SegmentKind, origin: u32) -> Self {
        Self { kind, segments: vec![Segment { origin, kind, bytes: Vec::new() }], active: 0 }
    }

    fn pc(&self) -> u32 {
        let s = &self.segments[self.active];
        s.origin.wrapping_add(s.bytes.len() as u32)
    }

    /// Switch to the segment at `origin`, resuming at its end when it
    /// already exists.
    fn org(&mut self, origin: u32) {
        match self.segments.iter().position(|s| s.origin == origin) {
            Some(i) => self.active = i,
            None => {
                self.segments.push(Segment { origin, kind: self.kind, bytes: Vec::new() });
                self.active = self.segments.len() - 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    section: Section,
    active: usize,
    len: usize,
}

/// Location counters for `.text` and `.data`.
#[derive(Debug, Clone)]
pub struct Layout {
    text: SectionState,
    data: SectionState,
    current: Section,
}

impl Layout {
    pub fn new(text_start: u32, data_start: u32) -> Self {
        Self {
            text: SectionState::new(SegmentKind::Code, text_start),
            data: SectionState::new(SegmentKind::Data, data_start),
            current: Section::Text,
        }
    }

    fn state(&self) -> &SectionState {
        match self.current {
            Section::Text => &self.text,
            Section::Data => &self.data,
        }
    }

    fn state_mut(&mut self) -> &mut SectionState {
        match self.current {
            Section::Text => &mut self.text,
            Section::Data => &mut self.data,
        }
    }

    pub fn section(&self) -> Section {
        self.current
    }

    pub fn select(&mut self, section: Section) {
        self.current = section;
    }

    pub fn pc(&self) -> u32 {
        self.state().pc()
    }

    pub fn org(&mut self, origin: u32) {
        self.state_mut().org(origin);
    }

    pub fn emit(&mut self, bytes: &[u8]) {
        let st = self.state_mut();
        let active = st.active;
        st.segments[active].bytes.extend_from_slice(bytes);
    }

    /// Position of the location counter, for [`Layout::since`].
    pub fn mark(&self) -> Mark {
        let st = self.state();
        Mark { section: self.current, active: st.active, len: st.segments[st.active].bytes.len() }
    }

    /// Bytes emitted since `mark`, if the active segment is unchanged.
    pub fn since(&self, mark: Mark) -> &[u8] {
        let st = self.state();
        if mark.section != self.current || mark.active != st.active {
            return &[];
        }
        st.segments[st.active].bytes.get(mark.len..).unwrap_or(&[])
    }

    /// Highest end address over all code segments.
    pub fn code_end(&self) -> u32 {
        self.text.segments.iter().map(|s| s.end() as u32).max().unwrap_or(0)
    }

    /// Non-empty segments, code first.
    pub fn into_segments(self) -> Vec<Segment> {
        self.text
            .segments
            .into_iter()
            .chain(self.data.segments)
            .filter(|s| !s.bytes.is_empty())
            .collect()
    }
}

fn bad(msg: impl Into<String>) -> AsmErrorKind {
    AsmErrorKind::BadDirective(msg.into())
}

fn exprs(args: &[Spanned], ctx: &Ctx) -> Result<Vec<i64>, AsmErrorKind> {
    if args.is_empty() {
        return Err(bad("missing value"));
    }
    split_top_level(args)
        .into_iter()
        .map(|g| parse_expr(g).and_then(|e| ctx.value(&e)))
        .collect()
}

/// A single constant argument. Sizes must be known in the index pass, so
/// this always evaluates strictly.
fn constant(name: &str, args: &[Spanned], ctx: &Ctx) -> Result<i64, AsmErrorKind> {
    match split_top_level(args).as_slice() {
        [one] => parse_expr(one)?.eval(ctx.lookup),
        _ => Err(bad(format!(".{name} takes a single value"))),
    }
}

fn strings(args: &[Spanned]) -> Result<Vec<Vec<u8>>, AsmErrorKind> {
    let groups = split_top_level(args);
    if groups.is_empty() {
        return Err(bad("missing string"));
    }
    groups
        .into_iter()
        .map(|g| match g {
            [(Token::Str(s), _)] => Ok(s.clone()),
            _ => Err(bad("expected a quoted string")),
        })
        .collect()
}

fn fits(value: i64, bits: u32) -> Result<i64, AsmErrorKind> {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << bits) - 1;
    if value < min || value > max {
        return Err(AsmErrorKind::ImmediateRange { value, min, max });
    }
    Ok(value)
}

/// Applies a directive. Returns a `(name, value)` constant when the
/// directive defines one (`.equ`/`.set`).
pub fn apply(
    name: &str,
    args: &[Spanned],
    layout: &mut Layout,
    ctx: &Ctx,
) -> Result<Option<(String, i64)>, AsmErrorKind> {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "global" | "globl" => match args {
            [(Token::Ident(_), _)] => {}
            _ => return Err(bad("Specify a single label with .global")),
        },
        "text" => layout.select(Section::Text),
        "data" => layout.select(Section::Data),
        "space" | "skip" => {
            let parts = split_top_level(args);
            let (size, fill) = match parts.as_slice() {
                [n] => (parse_expr(n)?.eval(ctx.lookup)?, 0),
                [n, f] => (parse_expr(n)?.eval(ctx.lookup)?, fits(ctx.value(&parse_expr(f)?)?, 8)?),
                _ => return Err(bad(".space takes a size and an optional fill byte")),
            };
            if !(0..=0x0100_0000).contains(&size) {
                return Err(bad(format!("bad .space size {size}")));
            }
            layout.emit(&vec![fill as u8; size as usize]);
        }
        "byte" => {
            for v in exprs(args, ctx)? {
                layout.emit(&[fits(v, 8)? as u8]);
            }
        }
        "hword" | "short" | "half" => {
            for v in exprs(args, ctx)? {
                layout.emit(&(fits(v, 16)? as u16).to_le_bytes());
            }
        }
        "word" | "long" => {
            for v in exprs(args, ctx)? {
                layout.emit(&(fits(v, 32)? as u32).to_le_bytes());
            }
        }
        "string" | "asciz" | "ascii" => {
            for mut s in strings(args)? {
                if lower != "ascii" {
                    s.push(0);
                }
                layout.emit(&s);
            }
        }
        "align" | "balign" => {
            let n = constant(&lower, args, ctx)?;
            if !(1..=4096).contains(&n) {
                return Err(bad(format!("bad alignment {n}")));
            }
            let pad = (n as u32 - layout.pc() % n as u32) % n as u32;
            layout.emit(&vec![0; pad as usize]);
        }
        "equ" | "set" => {
            let parts = split_top_level(args);
            let (sym, value) = match parts.as_slice() {
                [[(Token::Ident(sym), _)], value] => (sym.clone(), parse_expr(value)?),
                _ => return Err(bad(format!(".{lower} expects a name and a value"))),
            };
            return Ok(Some((sym, ctx.value(&value)?)));
        }
        "org" => {
            let origin = constant("org", args, ctx)?;
            if !(0..=u32::MAX as i64).contains(&origin) {
                return Err(bad(format!("bad origin {origin}")));
            }
            layout.org(origin as u32);
        }
        // header lines are consumed by the preprocessor; repeats are harmless
        "cpu" | "thumb" | "syntax" | "fpu" => {}
        _ => return Err(AsmErrorKind::UnknownDirective(name.to_string())),
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::tokenize;

    fn run(layout: &mut Layout, line: &str) -> Result<Option<(String, i64)>, AsmErrorKind> {
        let toks = tokenize(line).unwrap();
        let name = match &toks[0].0 {
            Token::Directive(d) => d.clone(),
            _ => panic!("not a directive"),
        };
        let lookup = |s: &str| (s == "N").then_some(3);
        let ctx = Ctx { addr: layout.pc(), strict: true, lookup: &lookup };
        apply(&name, &toks[1..], layout, &ctx)
    }

    #[test]
    fn data_directives_emit_little_endian() {
        let mut l = Layout::new(0x0800_0300, 0x2000_0000);
        l.select(Section::Data);
        run(&mut l, ".word 0x12345678").unwrap();
        run(&mut l, ".hword 0xBEEF, -1").unwrap();
        run(&mut l, ".byte N * 2").unwrap();
        run(&mut l, ".string \"ok\"").unwrap();
        run(&mut l, ".align 4").unwrap();
        let segs = l.into_segments();
        assert_eq!(
            segs[0].bytes,
            vec![0x78, 0x56, 0x34, 0x12, 0xEF, 0xBE, 0xFF, 0xFF, 6, b'o', b'k', 0]
        );
    }

    #[test]
    fn org_resumes_existing_segment() {
        let mut l = Layout::new(0x0800_0300, 0x2000_0000);
        l.emit(&[1, 2]);
        run(&mut l, ".org 0x08000400").unwrap();
        l.emit(&[3]);
        run(&mut l, ".org 0x08000300").unwrap();
        assert_eq!(l.pc(), 0x0800_0302);
        assert_eq!(l.code_end(), 0x0800_0401);
    }

    #[test]
    fn equ_returns_definition() {
        let mut l = Layout::new(0, 0);
        assert_eq!(run(&mut l, ".equ SIZE, N + 1").unwrap(), Some(("SIZE".into(), 4)));
        assert!(matches!(run(&mut l, ".frob 1"), Err(AsmErrorKind::UnknownDirective(_))));
        assert!(matches!(run(&mut l, ".byte 256"), Err(AsmErrorKind::ImmediateRange { .. })));
    }
}
