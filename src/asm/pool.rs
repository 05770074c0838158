//! Literal pool: `ldr rt, =expr` becomes a PC-relative load from a word
//! placed after the highest code address.

use super::operand::{Expr, Operand};
use super::{AsmError, AsmErrorKind};
use crate::alu::align_down;
use crate::memory::{Segment, SegmentKind};
use serde::Serialize;
use std::ops::Range;

/// Largest `ldr rt, [pc, #imm8*4]` displacement.
pub const MAX_OFFSET: i64 = 1020;

/// A placed literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Literal {
    pub slot: u32,
    pub value: u32,
    /// 1-based source line of the `=expr` load.
    pub line: usize,
}

/// A literal whose value is known only after labels are final.
#[derive(Debug, Clone)]
pub struct Pending {
    pub slot: u32,
    pub expr: Expr,
    pub line: usize,
}

/// First slot of the pool: the highest code address rounded up to a word.
pub fn base(code_end: u32) -> u32 {
    align_down(code_end.wrapping_add(3), 4)
}

/// Offset of `slot` from the aligned PC seen by a load at `addr`.
pub fn offset(addr: u32, slot: u32) -> Result<i64, AsmErrorKind> {
    let offset = slot as i64 - align_down(addr.wrapping_add(4), 4) as i64;
    if !(0..=MAX_OFFSET).contains(&offset) {
        return Err(AsmErrorKind::LiteralRange { offset });
    }
    Ok(offset)
}

/// The `=expr` operand of an `ldr`, if the instruction has one.
pub fn literal_operand<'a>(mnemonic: &str, ops: &'a [Operand]) -> Option<(&'a Expr, Range<usize>)> {
    if !mnemonic.eq_ignore_ascii_case("ldr") {
        return None;
    }
    match ops {
        [Operand::Reg(_), Operand::Literal(e, span)] => Some((e, span.clone())),
        _ => None,
    }
}

/// Replaces the `=expr` span of `text` with an explicit `[pc, #offset]`.
pub fn rewrite(text: &str, span: Range<usize>, offset: i64) -> String {
    format!("{}[pc, #{offset}]{}", &text[..span.start], &text[span.end..])
}

/// Resolves every pending literal and lays them out as one segment.
pub fn emit(
    pending: &[Pending],
    lookup: &dyn Fn(&str) -> Option<i64>,
) -> Result<(Option<Segment>, Vec<Literal>), AsmError> {
    let Some(first) = pending.first() else {
        return Ok((None, Vec::new()));
    };
    let mut bytes = Vec::with_capacity(pending.len() * 4);
    let mut literals = Vec::with_capacity(pending.len());
    for p in pending {
        let value = p
            .expr
            .eval(lookup)
            .and_then(|v| {
                if !(i32::MIN as i64..=u32::MAX as i64).contains(&v) {
                    return Err(AsmErrorKind::ImmediateRange { value: v, min: i32::MIN as i64, max: u32::MAX as i64 });
                }
                Ok(v as u32)
            })
            .map_err(|kind| AsmError { line: p.line, kind })?;
        bytes.extend_from_slice(&value.to_le_bytes());
        literals.push(Literal { slot: p.slot, value, line: p.line });
    }
    let seg = Segment { origin: first.slot, kind: SegmentKind::Literal, bytes };
    Ok((Some(seg), literals))
}
