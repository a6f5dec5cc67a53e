//! Test-only support code, compiled under `#[cfg(test)]` only.
//!
//! `lex` is a minimal hand-written [`crate::Lexer`] standing in for the
//! embedder-supplied tokenizer the core crate takes as out of scope
//! (spec.md §4.1). It covers exactly the surface syntax exercised by this
//! crate's own integration tests — no escape sequences beyond `\"` and
//! `\\`, no hex/octal literals, no comments spanning a string body — not a
//! general-purpose scanner.

use crate::diag::{codes, err, Diag};
use crate::literal::Literal;
use crate::span::{Location, SourceId};
use crate::token::{Token, TokenKind};
use crate::Lexer;

pub struct TestLexer;

impl Lexer for TestLexer {
  fn lex(&self, source: &str, file: SourceId) -> Result<Vec<Token>, Diag> {
    lex(source, file)
  }
}

fn keyword(word: &str) -> Option<TokenKind> {
  use TokenKind::*;
  Some(match word {
    "i8" => KwI8, "i16" => KwI16, "i32" => KwI32, "i64" => KwI64,
    "u8" => KwU8, "u16" => KwU16, "u32" => KwU32, "u64" => KwU64,
    "f32" => KwF32, "f64" => KwF64,
    "bool" => KwBool, "void" => KwVoid, "auto" => KwAuto,
    "if" => KwIf, "else" => KwElse, "while" => KwWhile, "for" => KwFor,
    "switch" => KwSwitch, "case" => KwCase, "default" => KwDefault,
    "return" => KwReturn, "break" => KwBreak, "continue" => KwContinue, "fall" => KwFall,
    "include" => KwInclude, "template" => KwTemplate, "typedef" => KwTypedef,
    "define" => KwDefine, "const" => KwConst, "volatile" => KwVolatile,
    "extern" => KwExtern, "export" => KwExport, "vaarg" => KwVaArg,
    "defer" => KwDefer, "rawc" => KwRawC, "rawir" => KwRawIr,
    "struct" => KwStruct, "enum" => KwEnum, "as" => KwAs,
    "sizeof" => KwSizeof, "len" => KwLen, "cast" => KwCast, "make" => KwMake,
    "true" => BoolLit, "false" => BoolLit, "nullptr" => NullptrLit,
    _ => return None,
  })
}

/// Tokenizes `source`, tagging every token's location with `file` and a
/// 1-based line/column (spec.md §3 `Location`).
pub fn lex(source: &str, file: SourceId) -> Result<Vec<Token>, Diag> {
  let bytes: Vec<char> = source.chars().collect();
  let mut i = 0usize;
  let mut line = 1u32;
  let mut col = 1u32;
  let mut out = Vec::new();

  macro_rules! here { () => { Location { file, line, col } } }

  let advance = |i: &mut usize, line: &mut u32, col: &mut u32, bytes: &[char]| {
    if bytes[*i] == '\n' { *line += 1; *col = 1; } else { *col += 1; }
    *i += 1;
  };

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_whitespace() {
      advance(&mut i, &mut line, &mut col, &bytes);
      continue;
    }
    if c == '/' && i + 1 < bytes.len() && bytes[i + 1] == '/' {
      while i < bytes.len() && bytes[i] != '\n' { advance(&mut i, &mut line, &mut col, &bytes); }
      continue;
    }
    let loc = here!();

    if c.is_ascii_digit() {
      let start = i;
      let mut is_float = false;
      while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == '.' || bytes[i] == '_') {
        if bytes[i] == '.' { is_float = true; }
        advance(&mut i, &mut line, &mut col, &bytes);
      }
      let text: String = bytes[start..i].iter().filter(|c| **c != '_').collect();
      let value = if is_float {
        text.parse::<f64>().map(Literal::Float)
      } else {
        text.parse::<i64>().map(Literal::Int)
      }.map_err(|_| err!(codes::MALFORMED_NUMBER, loc, "malformed number literal '{text}'"))?;
      let kind = if is_float { TokenKind::FloatLit } else { TokenKind::IntLit };
      out.push(Token { kind, text, value: Some(value), location: loc });
      continue;
    }

    if c.is_alphabetic() || c == '_' {
      let start = i;
      while i < bytes.len() && (bytes[i].is_alphanumeric() || bytes[i] == '_') {
        advance(&mut i, &mut line, &mut col, &bytes);
      }
      let text: String = bytes[start..i].iter().collect();
      if let Some(kind) = keyword(&text) {
        let value = match text.as_str() {
          "true" => Some(Literal::Bool(true)),
          "false" => Some(Literal::Bool(false)),
          "nullptr" => Some(Literal::Nullptr),
          _ => None,
        };
        out.push(Token { kind, text, value, location: loc });
      } else {
        out.push(Token { kind: TokenKind::Ident, text, value: None, location: loc });
      }
      continue;
    }

    if c == '"' {
      advance(&mut i, &mut line, &mut col, &bytes);
      let mut s = String::new();
      loop {
        if i >= bytes.len() { return Err(err!(codes::UNEXPECTED_EOF, loc, "unterminated string literal")) }
        match bytes[i] {
          '"' => { advance(&mut i, &mut line, &mut col, &bytes); break }
          '\\' => {
            advance(&mut i, &mut line, &mut col, &bytes);
            if i >= bytes.len() { return Err(err!(codes::UNEXPECTED_EOF, loc, "unterminated string literal")) }
            s.push(match bytes[i] { 'n' => '\n', 't' => '\t', other => other });
            advance(&mut i, &mut line, &mut col, &bytes);
          }
          other => { s.push(other); advance(&mut i, &mut line, &mut col, &bytes); }
        }
      }
      out.push(Token { kind: TokenKind::StrLit, text: s.clone(), value: Some(Literal::Str(s.into())), location: loc });
      continue;
    }

    macro_rules! two {
      ($second:expr, $two_kind:expr, $one_kind:expr) => {{
        advance(&mut i, &mut line, &mut col, &bytes);
        if i < bytes.len() && bytes[i] == $second {
          advance(&mut i, &mut line, &mut col, &bytes);
          out.push(Token { kind: $two_kind, text: String::new(), value: None, location: loc });
        } else {
          out.push(Token { kind: $one_kind, text: String::new(), value: None, location: loc });
        }
      }};
    }

    use TokenKind::*;
    match c {
      '(' => { out.push(Token { kind: LParen, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      ')' => { out.push(Token { kind: RParen, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      '{' => { out.push(Token { kind: LBrace, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      '}' => { out.push(Token { kind: RBrace, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      '[' => { out.push(Token { kind: LBracket, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      ']' => { out.push(Token { kind: RBracket, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      ',' => { out.push(Token { kind: Comma, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      ';' => { out.push(Token { kind: Semi, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      ':' => { out.push(Token { kind: Colon, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      '.' => { out.push(Token { kind: Dot, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      '?' => { out.push(Token { kind: Question, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      '~' => { out.push(Token { kind: Tilde, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      '+' => two!('=', PlusEq, Plus),
      '*' => two!('=', StarEq, Star),
      '%' => two!('=', PercentEq, Percent),
      '=' => two!('=', EqEq, Eq),
      '!' => two!('=', Ne, Bang),
      '&' => two!('&', AmpAmp, Amp),
      '|' => two!('|', PipePipe, Pipe),
      '^' => { out.push(Token { kind: Caret, text: String::new(), value: None, location: loc }); advance(&mut i, &mut line, &mut col, &bytes); }
      '-' => {
        advance(&mut i, &mut line, &mut col, &bytes);
        if i < bytes.len() && bytes[i] == '>' {
          advance(&mut i, &mut line, &mut col, &bytes);
          out.push(Token { kind: Arrow, text: String::new(), value: None, location: loc });
        } else if i < bytes.len() && bytes[i] == '=' {
          advance(&mut i, &mut line, &mut col, &bytes);
          out.push(Token { kind: MinusEq, text: String::new(), value: None, location: loc });
        } else {
          out.push(Token { kind: Minus, text: String::new(), value: None, location: loc });
        }
      }
      '/' => two!('=', SlashEq, Slash),
      '<' => {
        advance(&mut i, &mut line, &mut col, &bytes);
        if i < bytes.len() && bytes[i] == '<' {
          advance(&mut i, &mut line, &mut col, &bytes);
          out.push(Token { kind: Shl, text: String::new(), value: None, location: loc });
        } else if i < bytes.len() && bytes[i] == '=' {
          advance(&mut i, &mut line, &mut col, &bytes);
          out.push(Token { kind: Le, text: String::new(), value: None, location: loc });
        } else {
          out.push(Token { kind: Lt, text: String::new(), value: None, location: loc });
        }
      }
      '>' => {
        advance(&mut i, &mut line, &mut col, &bytes);
        if i < bytes.len() && bytes[i] == '>' {
          advance(&mut i, &mut line, &mut col, &bytes);
          out.push(Token { kind: Shr, text: String::new(), value: None, location: loc });
        } else if i < bytes.len() && bytes[i] == '=' {
          advance(&mut i, &mut line, &mut col, &bytes);
          out.push(Token { kind: Ge, text: String::new(), value: None, location: loc });
        } else {
          out.push(Token { kind: Gt, text: String::new(), value: None, location: loc });
        }
      }
      other => return Err(err!(codes::UNEXPECTED_TOKEN, loc, "unexpected character '{other}'")),
    }
  }

  out.push(Token { kind: TokenKind::Eof, text: String::new(), value: None, location: Location { file, line, col } });
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lexes_a_small_function() {
    let toks = lex("i32 Add(i32 a, i32 b) { return a + b; }", SourceId(0)).unwrap();
    let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
    assert_eq!(kinds.first(), Some(&TokenKind::KwI32));
    assert!(kinds.contains(&TokenKind::Plus));
    assert_eq!(kinds.last(), Some(&TokenKind::Eof));
  }

  #[test]
  fn distinguishes_shift_from_relational() {
    let toks = lex("a << b; c <= d;", SourceId(0)).unwrap();
    let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
    assert!(kinds.contains(&TokenKind::Shl));
    assert!(kinds.contains(&TokenKind::Le));
  }
}
