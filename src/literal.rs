//! The `Literal` value class (spec.md §3): a tagged union used both as the
//! runtime carrier of constant-folded values and as the value class of
//! literal tokens.

use std::fmt;
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum Literal {
  None,
  Nullptr,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(Rc<str>),
}

impl Literal {
  #[must_use] pub fn is_none(&self) -> bool { matches!(self, Literal::None) }

  #[must_use] pub fn as_bool(&self) -> Option<bool> {
    if let Literal::Bool(b) = *self { Some(b) } else { None }
  }

  #[must_use] pub fn as_int(&self) -> Option<i64> {
    if let Literal::Int(n) = *self { Some(n) } else { None }
  }

  #[must_use] pub fn as_float(&self) -> Option<f64> {
    if let Literal::Float(f) = *self { Some(f) } else { None }
  }

  #[must_use] pub fn as_str(&self) -> Option<&str> {
    if let Literal::Str(s) = self { Some(s) } else { None }
  }

  /// Size in bytes a folded literal would occupy if materialised directly,
  /// per the constant folder's `sizeof(literal)` rule (§4.3): 8 for
  /// int/float, `2 * arch` for string slices.
  #[must_use] pub fn fold_sizeof(&self, arch: u32) -> Option<i64> {
    match self {
      Literal::Int(_) | Literal::Float(_) => Some(8),
      Literal::Str(_) => Some(2 * i64::from(arch)),
      Literal::Bool(_) | Literal::Nullptr | Literal::None => None,
    }
  }
}

impl PartialEq for Literal {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Literal::None, Literal::None) | (Literal::Nullptr, Literal::Nullptr) => true,
      (Literal::Bool(a), Literal::Bool(b)) => a == b,
      (Literal::Int(a), Literal::Int(b)) => a == b,
      (Literal::Float(a), Literal::Float(b)) => a.to_bits() == b.to_bits(),
      (Literal::Str(a), Literal::Str(b)) => a == b,
      _ => false,
    }
  }
}

impl fmt::Display for Literal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Literal::None => write!(f, "<none>"),
      Literal::Nullptr => write!(f, "nullptr"),
      Literal::Bool(b) => write!(f, "{b}"),
      Literal::Int(n) => write!(f, "{n}"),
      Literal::Float(n) => write!(f, "{n}"),
      Literal::Str(s) => write!(f, "{s:?}"),
    }
  }
}
