//! Operand grammar: registers, `#imm`, `[base, offset]`, `{reglist}`,
//! `=literal` and bare expressions.

use super::lexer::{Spanned, Token};
use super::AsmErrorKind;
use crate::cpu::Reg;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Num(i64),
    Sym(String),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluates with `lookup` resolving symbols and labels.
    pub fn eval(&self, lookup: &dyn Fn(&str) -> Option<i64>) -> Result<i64, AsmErrorKind> {
        Ok(match self {
            Expr::Num(n) => *n,
            Expr::Sym(s) => lookup(s).ok_or_else(|| AsmErrorKind::UndefinedSymbol(s.clone()))?,
            Expr::Neg(e) => e.eval(lookup)?.wrapping_neg(),
            Expr::Bin(op, a, b) => {
                let (a, b) = (a.eval(lookup)?, b.eval(lookup)?);
                match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                }
            }
        })
    }

    /// The label name if the expression is a single symbol.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expr::Sym(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemOffset {
    None,
    Imm(Expr),
    Reg(Reg),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    /// `rn!`
    Writeback(Reg),
    /// `#expr`
    Imm(Expr),
    Mem { base: Reg, offset: MemOffset },
    /// Register mask indexed by register number.
    List(u16),
    /// `=expr`, with the byte span of the whole operand in the line.
    Literal(Expr, Range<usize>),
    /// Label or bare number.
    Expr(Expr),
}

/// Recursive-descent expression parser over a token slice.
struct ExprParser<'a> {
    toks: &'a [Spanned],
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn sum(&mut self) -> Result<Expr, AsmErrorKind> {
        let mut lhs = self.product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.product()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn product(&mut self) -> Result<Expr, AsmErrorKind> {
        let mut lhs = self.unary()?;
        while let Some(Token::Star) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Bin(BinOp::Mul, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, AsmErrorKind> {
        let tok = self.peek().ok_or_else(|| bad("expected an expression"))?;
        self.pos += 1;
        match tok {
            Token::Minus => Ok(Expr::Neg(Box::new(self.unary()?))),
            Token::Plus => self.unary(),
            Token::Number(n) => Ok(Expr::Num(*n)),
            Token::Ident(s) => Ok(Expr::Sym(s.clone())),
            Token::Directive(s) => Ok(Expr::Sym(format!(".{s}"))),
            Token::LParen => {
                let e = self.sum()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(e)
                    }
                    _ => Err(bad("missing ')'")),
                }
            }
            other => Err(bad(&format!("unexpected {other:?} in expression"))),
        }
    }
}

fn bad(msg: &str) -> AsmErrorKind {
    AsmErrorKind::BadOperands(msg.to_string())
}

/// Parses a complete expression; trailing tokens are an error.
pub fn parse_expr(toks: &[Spanned]) -> Result<Expr, AsmErrorKind> {
    let mut p = ExprParser { toks, pos: 0 };
    let e = p.sum()?;
    if p.pos != toks.len() {
        return Err(bad("unexpected tokens after expression"));
    }
    Ok(e)
}

fn as_reg(tok: &Token) -> Option<Reg> {
    match tok {
        Token::Ident(s) => Reg::from_name(s),
        _ => None,
    }
}

/// Splits at commas outside brackets and braces.
pub fn split_top_level(toks: &[Spanned]) -> Vec<&[Spanned]> {
    let mut groups = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, (t, _)) in toks.iter().enumerate() {
        match t {
            Token::LBracket | Token::LBrace | Token::LParen => depth += 1,
            Token::RBracket | Token::RBrace | Token::RParen => depth -= 1,
            Token::Comma if depth == 0 => {
                groups.push(&toks[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !toks.is_empty() {
        groups.push(&toks[start..]);
    }
    groups
}

fn parse_list(inner: &[Spanned]) -> Result<u16, AsmErrorKind> {
    let mut mask = 0u16;
    for item in split_top_level(inner) {
        let regs: Vec<Reg> = match item {
            [(a, _)] => vec![as_reg(a).ok_or_else(|| bad("expected a register in list"))?],
            [(a, _), (Token::Minus, _), (b, _)] => {
                let (a, b) = match (as_reg(a), as_reg(b)) {
                    (Some(a), Some(b)) if a.0 <= b.0 => (a, b),
                    _ => return Err(bad("bad register range")),
                };
                (a.0..=b.0).map(Reg).collect()
            }
            _ => return Err(bad("bad register list")),
        };
        for r in regs {
            mask |= 1 << r.0;
        }
    }
    Ok(mask)
}

fn parse_mem(inner: &[Spanned]) -> Result<Operand, AsmErrorKind> {
    let parts = split_top_level(inner);
    let base = match parts.first().copied() {
        Some([(t, _)]) => as_reg(t).ok_or_else(|| bad("expected a base register"))?,
        _ => return Err(bad("expected a base register")),
    };
    let offset = match parts.get(1).copied() {
        None => MemOffset::None,
        Some([(Token::Hash, _), rest @ ..]) => MemOffset::Imm(parse_expr(rest)?),
        Some(rest) => match rest {
            [(t, _)] if as_reg(t).is_some() => as_reg(t).map_or(MemOffset::None, MemOffset::Reg),
            _ => MemOffset::Imm(parse_expr(rest)?),
        },
    };
    if parts.len() > 2 {
        return Err(bad("too many terms in address"));
    }
    Ok(Operand::Mem { base, offset })
}

/// Parses one comma-separated operand group.
pub fn parse_operand(group: &[Spanned]) -> Result<Operand, AsmErrorKind> {
    match group {
        [] => return Err(bad("empty operand")),
        [(t, _)] => {
            if let Some(r) = as_reg(t) {
                return Ok(Operand::Reg(r));
            }
        }
        [(t, _), (Token::Bang, _)] => {
            if let Some(r) = as_reg(t) {
                return Ok(Operand::Writeback(r));
            }
        }
        _ => {}
    }
    match group {
        [(Token::Hash, _), rest @ ..] => Ok(Operand::Imm(parse_expr(rest)?)),
        [(Token::Equals, first), rest @ ..] => {
            let end = rest.last().map_or(first.end, |(_, s)| s.end);
            Ok(Operand::Literal(parse_expr(rest)?, first.start..end))
        }
        [(Token::LBracket, _), inner @ .., (Token::RBracket, _)] => parse_mem(inner),
        [(Token::LBrace, _), inner @ .., (Token::RBrace, _)] => Ok(Operand::List(parse_list(inner)?)),
        _ => Ok(Operand::Expr(parse_expr(group)?)),
    }
}

pub fn parse_operands(toks: &[Spanned]) -> Result<Vec<Operand>, AsmErrorKind> {
    split_top_level(toks).into_iter().map(parse_operand).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::tokenize;

    fn ops(src: &str) -> Vec<Operand> {
        parse_operands(&tokenize(src).unwrap()).unwrap()
    }

    #[test]
    fn precedence_and_parens() {
        let e = parse_expr(&tokenize("2 + 3 * 4 - (1 + 1)").unwrap()).unwrap();
        assert_eq!(e.eval(&|_| None), Ok(12));
        let e = parse_expr(&tokenize("-SIZE * 2").unwrap()).unwrap();
        assert_eq!(e.eval(&|s| (s == "SIZE").then_some(4)), Ok(-8));
    }

    #[test]
    fn undefined_symbol_is_named() {
        let e = parse_expr(&tokenize("missing + 1").unwrap()).unwrap();
        assert_eq!(e.eval(&|_| None), Err(AsmErrorKind::UndefinedSymbol("missing".into())));
    }

    #[test]
    fn operand_shapes() {
        assert_eq!(
            ops("r0, [sp, #8], {r0-r2, lr}, r3!"),
            vec![
                Operand::Reg(Reg(0)),
                Operand::Mem { base: Reg::SP, offset: MemOffset::Imm(Expr::Num(8)) },
                Operand::List(0b0100_0000_0000_0111),
                Operand::Writeback(Reg(3)),
            ]
        );
        assert_eq!(
            ops("r1, [r2, r3]"),
            vec![Operand::Reg(Reg(1)), Operand::Mem { base: Reg(2), offset: MemOffset::Reg(Reg(3)) }]
        );
    }

    #[test]
    fn literal_keeps_span() {
        let line = "ldr r0, =0x1234";
        let toks = tokenize(line).unwrap();
        let all = parse_operands(&toks[1..]).unwrap();
        match &all[1] {
            Operand::Literal(Expr::Num(0x1234), span) => assert_eq!(&line[span.clone()], "=0x1234"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
