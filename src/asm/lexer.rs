//! Tokens of a single assembly source line.

use logos::{Lexer, Logos};
use std::ops::Range;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LexErr {
    #[error("numeric literal does not fit in 32 bits")]
    Overflow,
    #[error("invalid digit in numeric literal")]
    InvalidDigit,
    #[error("unclosed string literal")]
    UnclosedStr,
    #[error("bad escape sequence in string literal")]
    BadEscape,
    #[default]
    #[error("unrecognized character")]
    InvalidSymbol,
}

#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\f]+", error = LexErr)]
pub enum Token {
    #[regex(r"0[xX][0-9a-fA-F]+", lex_hex)]
    #[regex(r"0[bB][01]+", lex_bin)]
    #[regex(r"[0-9]+", lex_dec)]
    Number(i64),

    /// Mnemonic, register, label or symbol. Case is preserved.
    #[regex(r"[A-Za-z_$][A-Za-z0-9_$.]*", |lx| lx.slice().to_string())]
    Ident(String),

    /// `.word`, `.text`; also local labels such as `.L1` when followed by a colon.
    #[regex(r"\.[A-Za-z_][A-Za-z0-9_.$]*", |lx| lx.slice()[1..].to_string())]
    Directive(String),

    /// Raw bytes of a double-quoted string, escapes applied.
    #[token("\"", lex_str)]
    Str(Vec<u8>),

    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("#")]
    Hash,
    #[token("=")]
    Equals,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("!")]
    Bang,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

fn to_i64(v: u64) -> Result<i64, LexErr> {
    if v > u32::MAX as u64 {
        return Err(LexErr::Overflow);
    }
    Ok(v as i64)
}

fn radix(digits: &str, radix: u32) -> Result<i64, LexErr> {
    let v = u64::from_str_radix(digits, radix).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow => LexErr::Overflow,
        _ => LexErr::InvalidDigit,
    })?;
    to_i64(v)
}

fn lex_hex(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    radix(&lx.slice()[2..], 16)
}

fn lex_bin(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    radix(&lx.slice()[2..], 2)
}

/// Decimal, or octal with a leading zero (`017`).
fn lex_dec(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    let s = lx.slice();
    if s.len() > 1 && s.starts_with('0') {
        radix(&s[1..], 8)
    } else {
        radix(s, 10)
    }
}

fn lex_str(lx: &mut Lexer<'_, Token>) -> Result<Vec<u8>, LexErr> {
    let rem = lx.remainder().as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < rem.len() {
        match rem[i] {
            b'"' => {
                lx.bump(i + 1);
                return Ok(out);
            }
            b'\\' => {
                i += 1;
                let Some(&esc) = rem.get(i) else { break };
                match esc {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'\\' => out.push(b'\\'),
                    b'"' => out.push(b'"'),
                    b'\'' => out.push(b'\''),
                    b'0'..=b'7' => {
                        // up to three octal digits
                        let mut value = 0u32;
                        let mut n = 0;
                        while n < 3 && matches!(rem.get(i), Some(b'0'..=b'7')) {
                            value = value * 8 + (rem[i] - b'0') as u32;
                            i += 1;
                            n += 1;
                        }
                        out.push(value as u8);
                        continue;
                    }
                    _ => {
                        lx.bump(rem.len());
                        return Err(LexErr::BadEscape);
                    }
                }
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    lx.bump(rem.len());
    Err(LexErr::UnclosedStr)
}

pub type Spanned = (Token, Range<usize>);

/// Tokenize one line. Comments must already be stripped.
pub fn tokenize(line: &str) -> Result<Vec<Spanned>, (LexErr, Range<usize>)> {
    let mut out = Vec::new();
    let mut lx = Token::lexer(line);
    while let Some(tok) = lx.next() {
        match tok {
            Ok(t) => out.push((t, lx.span())),
            Err(e) => return Err((e, lx.span())),
        }
    }
    Ok(out)
}

/// Drop `;` and `//` comments, ignoring markers inside string literals.
pub fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut in_str = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_str => i += 1,
            b'"' => in_str = !in_str,
            b';' if !in_str => return &line[..i],
            b'/' if !in_str && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
        i += 1;
    }
    line
}
