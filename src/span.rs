//! Source locations and the `Spanned<T>` wrapper used by every AST stage.

use std::fmt;

/// Identifies one source module within a compilation. Indexes into the
/// driver's module table; never persisted across a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

/// `(source_index, line)` per spec.md §3, extended with a column since the
/// token provider already carries one at no extra cost (SPEC_FULL §3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
  pub file: SourceId,
  pub line: u32,
  pub col: u32,
}

impl Location {
  pub const NONE: Location = Location { file: SourceId(u32::MAX), line: 0, col: 0 };

  #[must_use] pub fn new(file: SourceId, line: u32, col: u32) -> Self { Self { file, line, col } }

  #[must_use] pub fn is_none(&self) -> bool { self.file == SourceId(u32::MAX) }
}

impl Default for Location {
  fn default() -> Self { Location::NONE }
}

/// Renders as `path:line`, the suffix format diagnostics append (§6).
pub struct LocationDisplay<'a> {
  pub loc: Location,
  pub path: &'a str,
}

impl fmt::Display for LocationDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.loc.is_none() { write!(f, "{}", self.path) } else { write!(f, "{}:{}", self.path, self.loc.line) }
  }
}

/// Wraps a value with the location it was declared/written at. Used
/// throughout A1/A2/A3 for declarations the way `entity.rs`'s `Spanned<T>`
/// pairs a `FileSpan` with a typechecking-status payload.
#[derive(Clone, Debug)]
pub struct Spanned<T> {
  pub span: Location,
  pub k: T,
}

impl<T> Spanned<T> {
  #[must_use] pub fn new(span: Location, k: T) -> Self { Self { span, k } }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> { Spanned { span: self.span, k: f(self.k) } }
}
