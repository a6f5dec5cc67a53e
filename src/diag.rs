//! Stable diagnostics (spec.md §6-7): every error is a `Exxxx`-prefixed
//! code, a message, and a `path:line` suffix; the lone warning class is
//! the big-copy alert (`W0001`).
//!
//! A hand-rolled newtype with `From` impls for the handful of failure
//! sources, rather than `thiserror`/`anyhow`, since the crate has exactly
//! one error surface (a `Diag`) and no need for a derive macro to
//! assemble it.

use std::fmt;
use crate::span::{Location, SourceId};

/// A stable diagnostic code. Errors are `Exxxx`, warnings `Wxxxx`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Code(pub &'static str);

pub mod codes {
  use super::Code;
  // Lexical/syntactic (§7)
  pub const UNEXPECTED_TOKEN: Code = Code("E0401");
  pub const UNEXPECTED_EOF: Code = Code("E0402");
  pub const EXPECTED_IDENT: Code = Code("E0403");
  pub const MALFORMED_NUMBER: Code = Code("E0404");
  pub const DUPLICATE_DECL: Code = Code("E0405");
  // Reference
  pub const UNKNOWN_INCLUDE: Code = Code("E0701");
  pub const IMPORT_CYCLE: Code = Code("E0708");
  pub const UNKNOWN_NAME: Code = Code("E0710");
  pub const NOT_EXPORTED: Code = Code("E0711");
  pub const UNKNOWN_MEMBER: Code = Code("E0712");
  // Type
  pub const VOID_TYPE: Code = Code("E0901");
  pub const TYPE_MISMATCH: Code = Code("E0902");
  pub const NOT_LVALUE: Code = Code("E0903");
  pub const WRONG_ARITY: Code = Code("E0904");
  pub const BAD_OPERAND: Code = Code("E0905");
  pub const UNKNOWN_TYPE_NAME: Code = Code("E0906");
  // Constant evaluation
  pub const DIV_BY_ZERO: Code = Code("E1001");
  pub const SHIFT_RANGE: Code = Code("E1002");
  pub const INT_OVERFLOW: Code = Code("E1003");
  // Lowering
  pub const UNRESOLVED_SIZE: Code = Code("E1101");
  pub const BOUNDS_OUT_OF_RANGE: Code = Code("E1102");
  // Warnings
  pub const BIG_COPY_ALERT: Code = Code("W0001");
}

#[derive(Clone, Debug)]
pub struct Diag {
  pub code: Code,
  pub message: String,
  pub loc: Location,
}

impl Diag {
  #[must_use] pub fn new(code: Code, loc: Location, message: impl Into<String>) -> Self {
    Self { code, loc, message: message.into() }
  }

  #[must_use] pub fn is_warning(&self) -> bool { self.code.0.starts_with('W') }

  /// Render with the `path:line` suffix (§6). `path` is resolved by the
  /// caller from the location's `SourceId` (the `Diag` itself only knows
  /// the numeric id, not the module table).
  #[must_use] pub fn render(&self, path_of: impl Fn(SourceId) -> String) -> String {
    if self.loc.is_none() {
      format!("{} {}", self.code.0, self.message)
    } else {
      format!("{} {} {}:{}", self.code.0, self.message, path_of(self.loc.file), self.loc.line)
    }
  }
}

impl fmt::Display for Diag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.code.0, self.message)
  }
}

impl std::error::Error for Diag {}

/// Build a `Diag` at a stable code, analogous to the `make_prims!`
/// boilerplate-reduction macros in `entity.rs` but for diagnostic sites.
macro_rules! err {
  ($code:expr, $loc:expr, $($arg:tt)*) => {
    $crate::diag::Diag::new($code, $loc, format!($($arg)*))
  };
}
pub(crate) use err;

/// A bundle of warnings accumulated during a successful stage run (the
/// only warning class today is the A3 big-copy alert, spec.md §4.6).
#[derive(Default, Clone, Debug)]
pub struct Warnings(pub Vec<Diag>);

impl Warnings {
  pub fn push(&mut self, d: Diag) { self.0.push(d) }
}
