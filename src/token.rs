//! The token provider contract (spec.md §4.1, §6). The tokenizer itself
//! is out of scope; this module defines the shape the core consumes and
//! a pure random-access cursor over it.

use crate::literal::Literal;
use crate::span::Location;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
  None,
  Eof,
  Ident,
  IntLit,
  FloatLit,
  StrLit,
  BoolLit,
  NullptrLit,

  // primitive-type keywords
  KwI8, KwI16, KwI32, KwI64,
  KwU8, KwU16, KwU32, KwU64,
  KwF32, KwF64,
  KwBool,
  KwVoid,
  KwAuto,

  // control keywords
  KwIf, KwElse, KwWhile, KwFor, KwSwitch, KwCase, KwDefault,
  KwReturn, KwBreak, KwContinue, KwFall,

  // compiler-order keywords (§6)
  KwInclude, KwTemplate, KwTypedef, KwDefine, KwConst, KwVolatile,
  KwExtern, KwExport, KwVaArg, KwDefer, KwRawC, KwRawIr,
  KwStruct, KwEnum, KwAs,

  // built-in operators/intrinsics (§4.2)
  KwSizeof, KwLen, KwCast, KwMake,

  // punctuation
  LParen, RParen, LBrace, RBrace, LBracket, RBracket,
  Comma, Semi, Colon, Dot, Arrow, Question,

  // operators
  Plus, Minus, Star, Slash, Percent,
  Shl, Shr,
  Lt, Le, Gt, Ge, EqEq, Ne,
  Amp, Caret, Pipe, AmpAmp, PipePipe, Bang, Tilde,

  Eq, PlusEq, MinusEq, StarEq, SlashEq, PercentEq,
}

#[derive(Clone, Debug)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub value: Option<Literal>,
  pub location: Location,
}

impl Token {
  #[must_use] pub fn none_at(location: Location) -> Self {
    Self { kind: TokenKind::None, text: String::new(), value: None, location }
  }

  #[must_use] pub fn sentinel() -> Self {
    Self { kind: TokenKind::None, text: String::new(), value: None, location: Location { line: u32::MAX, ..Location::NONE } }
  }
}

/// A pure random-access cursor over a token vector (spec.md §4.1): no
/// buffering, no diagnostics, never throws. Out-of-range `seek`/`pop`
/// returns a sentinel `NONE` token at line `-1` (encoded here as
/// `u32::MAX`, since `Location.line` is unsigned).
pub struct TokenStream {
  toks: Vec<Token>,
  pub pos: usize,
}

impl TokenStream {
  #[must_use] pub fn new(toks: Vec<Token>) -> Self { Self { toks, pos: 0 } }

  #[must_use] pub fn seek(&self, n: usize) -> Token {
    self.toks.get(self.pos + n).cloned().unwrap_or_else(Token::sentinel)
  }

  pub fn pop(&mut self) -> Token {
    let t = self.seek(0);
    if self.pos < self.toks.len() { self.pos += 1 }
    t
  }

  pub fn rewind(&mut self) {
    if self.pos > 0 { self.pos -= 1 }
  }

  #[must_use] pub fn can_pop(&self, n: usize) -> bool { self.pos + n <= self.toks.len() }

  /// True iff the next `kinds.len()` token kinds equal `kinds` exactly;
  /// never advances.
  #[must_use] pub fn is_match(&self, kinds: &[TokenKind]) -> bool {
    if !self.can_pop(kinds.len()) { return false }
    kinds.iter().enumerate().all(|(i, k)| self.toks[self.pos + i].kind == *k)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tok(kind: TokenKind) -> Token { Token { kind, text: String::new(), value: None, location: Location::NONE } }

  #[test]
  fn out_of_range_seek_is_sentinel_never_panics() {
    let ts = TokenStream::new(vec![tok(TokenKind::KwIf)]);
    let t = ts.seek(5);
    assert_eq!(t.kind, TokenKind::None);
    assert_eq!(t.location.line, u32::MAX);
  }

  #[test]
  fn match_does_not_advance() {
    let mut ts = TokenStream::new(vec![tok(TokenKind::KwIf), tok(TokenKind::LParen)]);
    assert!(ts.is_match(&[TokenKind::KwIf, TokenKind::LParen]));
    assert_eq!(ts.pos, 0);
    assert!(!ts.is_match(&[TokenKind::KwIf, TokenKind::KwElse]));
    let first = ts.pop();
    assert_eq!(first.kind, TokenKind::KwIf);
    assert_eq!(ts.pos, 1);
  }

  #[test]
  fn rewind_single_token() {
    let mut ts = TokenStream::new(vec![tok(TokenKind::KwIf), tok(TokenKind::LParen)]);
    ts.pop();
    ts.pop();
    ts.rewind();
    assert_eq!(ts.pos, 1);
    assert_eq!(ts.pop().kind, TokenKind::LParen);
  }
}
