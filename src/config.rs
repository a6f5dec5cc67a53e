//! Pipeline-wide configuration (SPEC_FULL §2 "Configuration"). Built
//! programmatically by an embedder or by tests; the compiler CLI that
//! would parse this from argv is out of scope (spec.md §1).

/// The target pointer size, in bytes. Fixes the size of `int`/`uint`,
/// pointers, and the two-word slice layout (`2 * arch`, spec.md §6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArchWidth {
  W32,
  W64,
}

impl ArchWidth {
  #[must_use] pub fn bytes(self) -> u32 {
    match self { ArchWidth::W32 => 4, ArchWidth::W64 => 8 }
  }
}

#[derive(Clone, Debug)]
pub struct Config {
  pub arch: ArchWidth,
  /// Any synthesised `memcpy`/`memset` at or above this many bytes emits
  /// `W0001` (spec.md §4.6 "Big-copy warning").
  pub big_copy_alert: u32,
}

impl Default for Config {
  fn default() -> Self {
    Self { arch: ArchWidth::W64, big_copy_alert: 64 }
  }
}
