//! Front-end and mid-level lowering pipeline for a small statically typed
//! systems language: `source text -> A1 (syntax) -> A1-Ext (templates) ->
//! A2 (semantics) -> A3 (lowered)`. See `DESIGN.md` for how each stage
//! maps onto this crate's modules.

pub mod a1ext;
pub mod a2_build;
pub mod config;
pub mod diag;
pub mod fold;
pub mod literal;
pub mod lower;
pub mod parse_a1;
pub mod provider;
pub mod span;
pub mod symbol;
pub mod token;
pub mod types;
#[cfg(test)]
pub mod testutil;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::diag::{codes, err, Diag};
use crate::parse_a1::Parser;
use crate::provider::FileProvider;
use crate::span::{Location, SourceId};
use crate::token::Token;
use crate::types::a1::Module;

/// The token-provider contract's other half: turns source text into a
/// token vector. Out of scope for this crate (spec.md §4.1 "the tokenizer
/// itself is out of scope") — an embedder supplies one; `testutil::lex`
/// provides a minimal stand-in for tests.
pub trait Lexer {
  fn lex(&self, source: &str, file: SourceId) -> Result<Vec<Token>, Diag>;
}

/// Owns every module compiled during one run, assigns `uname`s, and
/// resolves `include` recursively with cycle detection (spec.md §4.2
/// pass 1, §6). One `Driver` per compilation; modules are never shared
/// across drivers.
pub struct Driver<P, L> {
  pub provider: P,
  pub lexer: L,
  pub config: Config,
  pub sources: Vec<PathBuf>,
  pub modules: Vec<Module>,
  path_index: HashMap<PathBuf, usize>,
  in_progress: HashSet<PathBuf>,
  uname_counts: HashMap<String, u32>,
}

impl<P: FileProvider, L: Lexer> Driver<P, L> {
  #[must_use] pub fn new(provider: P, lexer: L, config: Config) -> Self {
    Self {
      provider, lexer, config,
      sources: Vec::new(),
      modules: Vec::new(),
      path_index: HashMap::new(),
      in_progress: HashSet::new(),
      uname_counts: HashMap::new(),
    }
  }

  /// Compiles the root module of a run.
  pub fn compile_root(&mut self, path: &Path) -> Result<String, Diag> {
    self.compile_module(path)
  }

  /// Compiles (or returns the already-finished) module at `path`,
  /// recursively compiling its `include`s along the way. Returns the
  /// module's `uname`. A module mid-compilation on the current path
  /// (a cycle) is `E0708`; a path the provider doesn't have is `E0701`.
  pub fn compile_module(&mut self, path: &Path) -> Result<String, Diag> {
    if let Some(&idx) = self.path_index.get(path) {
      return Ok(self.modules[idx].uname.clone());
    }
    if self.in_progress.contains(path) {
      return Err(err!(codes::IMPORT_CYCLE, Location::NONE, "include cycle detected at '{}'", path.display()));
    }
    if !self.provider.exists(path) {
      return Err(err!(codes::UNKNOWN_INCLUDE, Location::NONE, "cannot find included file '{}'", path.display()));
    }

    self.in_progress.insert(path.to_path_buf());
    let result = self.compile_module_inner(path);
    self.in_progress.remove(path);
    result
  }

  fn compile_module_inner(&mut self, path: &Path) -> Result<String, Diag> {
    let source = self.provider.read_to_string(path)
      .map_err(|e| err!(codes::UNKNOWN_INCLUDE, Location::NONE, "failed to read '{}': {e}", path.display()))?;
    let file = SourceId(u32::try_from(self.sources.len()).expect("too many source files"));
    self.sources.push(path.to_path_buf());
    let uname = self.fresh_uname(path);
    let toks = self.lexer.lex(&source, file)?;

    let parser = Parser::new(self, toks, path.to_path_buf(), uname.clone());
    let module = parser.parse()?;

    let idx = self.modules.len();
    self.path_index.insert(path.to_path_buf(), idx);
    self.modules.push(module);
    Ok(uname)
  }

  pub(crate) fn fresh_uname(&mut self, path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("module").to_owned();
    let count = self.uname_counts.entry(stem.clone()).or_insert(0);
    *count += 1;
    if *count == 1 { stem } else { format!("{stem}_{count}") }
  }

  /// Renders a `Diag` with its file path filled in from `sources`.
  #[must_use] pub fn render(&self, d: &Diag) -> String {
    d.render(|id| self.sources.get(id.0 as usize).map_or_else(|| "<unknown>".to_owned(), |p| p.display().to_string()))
  }
}

/// Runs every stage of the pipeline over a root module: A1 parsing (via
/// [`Driver::compile_root`]), template instantiation ([`a1ext::Ext`]),
/// semantic building ([`a2_build::Builder`]) and lowering
/// ([`lower::Lowerer`]), in that order. This is the one place all four
/// stages are threaded together; an embedder who only needs an earlier
/// stage's output (e.g. a language server that only wants A2 for
/// diagnostics) drives the stages directly instead.
pub fn compile<P: FileProvider, L: Lexer>(
  driver: &mut Driver<P, L>,
  root: &Path,
) -> Result<(Vec<types::a3::Module>, diag::Warnings), Diag> {
  driver.compile_root(root)?;

  let mut ext = a1ext::Ext::new(driver);
  ext.run()?;

  let arena = typed_arena::Arena::new();
  let pool = types::a2::TypePool::new(&arena);
  let arch = driver.config.arch.bytes();
  let builder = a2_build::Builder::new(&pool, arch, &driver.modules);
  let a2_modules = builder.build_all()?;

  let lowerer = lower::Lowerer::new(&driver.config, &a2_modules);
  lowerer.lower_all()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::provider::MapProvider;
  use crate::testutil::TestLexer;
  use crate::types::a1::Decl as A1Decl;
  use crate::types::a3::{Decl as A3Decl, StmtKind};

  fn driver(files: &[(&str, &str)]) -> Driver<MapProvider, TestLexer> {
    let mut map = std::collections::HashMap::new();
    for (path, src) in files { map.insert(PathBuf::from(path), (*src).to_owned()); }
    Driver::new(MapProvider(map), TestLexer, Config::default())
  }

  #[test]
  fn struct_members_get_aligned_offsets_and_rounded_size() {
    let src = "struct Pair { i8 a; i32 b; }";
    let mut d = driver(&[("m.nc", src)]);
    d.compile_root(Path::new("m.nc")).unwrap();
    let module = &d.modules[0];
    let Some(A1Decl::Struct(s)) = module.decls.iter().find(|decl| matches!(decl, A1Decl::Struct(_))) else {
      panic!("expected a struct decl");
    };
    assert_eq!(s.members[0].offset, 0);
    assert_eq!(s.members[1].offset, 4);
    assert_eq!(s.struct_align, 4);
    assert_eq!(s.struct_size, 8);
  }

  #[test]
  fn include_cycle_is_rejected() {
    let mut d = driver(&[
      ("a.nc", "include \"b.nc\";"),
      ("b.nc", "include \"a.nc\";"),
    ]);
    let err = d.compile_root(Path::new("a.nc")).unwrap_err();
    assert_eq!(err.code, codes::IMPORT_CYCLE);
  }

  #[test]
  fn unknown_include_is_reported() {
    let mut d = driver(&[("a.nc", "include \"missing.nc\";")]);
    let err = d.compile_root(Path::new("a.nc")).unwrap_err();
    assert_eq!(err.code, codes::UNKNOWN_INCLUDE);
  }

  #[test]
  fn full_pipeline_lowers_a_function_call_to_a_mangled_name() {
    let src = "i32 add(i32 a, i32 b) { return a + b; } export i32 Main() { return add(1, 2); }";
    let mut d = driver(&[("m.nc", src)]);
    let (modules, warnings) = compile(&mut d, Path::new("m.nc")).unwrap();
    assert!(warnings.0.is_empty());
    let module = &modules[0];
    let main = module.decls.iter().find_map(|decl| match decl {
      A3Decl::Func(f) if f.name.ends_with("Main") => Some(f),
      _ => None,
    }).expect("Main lowers to a function decl");
    assert!(main.exported);
    // The call inside Main's body should have lowered `add` to its mangled
    // cross-module-safe name, not the bare source identifier, and the
    // function should end with a jump into its epilogue rather than a
    // structured `return`.
    let body = &module.scopes[main.body.into_usize()].body;
    let calls_mangled_add = body.iter().any(|stmt| match &stmt.kind {
      StmtKind::Assign { rhs, .. } => matches!(&rhs.kind, crate::types::a3::ExprKind::Call { callee, .. }
        if matches!(&callee.kind, crate::types::a3::ExprKind::FuncName(n) if n.ends_with("add"))),
      _ => false,
    });
    assert!(calls_mangled_add, "expected a call to the mangled `add` function in {body:?}");
    assert!(matches!(body.last().map(|s| &s.kind), Some(StmtKind::Jump { .. })));
  }

  #[test]
  fn exported_names_must_start_uppercase() {
    assert!(parse_a1::is_exported_name("Main"));
    assert!(!parse_a1::is_exported_name("main"));
  }

  /// Drives the full pipeline with a `big_copy_alert` threshold low
  /// enough that an ordinary array assignment trips it, and installs a
  /// real logger so the `log::warn!` in `lower.rs` actually runs end to
  /// end (run with `--nocapture` to see the line), not just the
  /// returned `Diag` the assertion below checks.
  #[test]
  fn big_array_assignment_triggers_the_big_copy_alert() {
    use simplelog::{Config as LogConfig, LevelFilter, SimpleLogger};
    let _ = SimpleLogger::init(LevelFilter::Warn, LogConfig::default());

    let src = "export void Main() { i32[32] a; i32[32] b; a = b; }";
    let mut d = driver(&[("m.nc", src)]);
    d.config.big_copy_alert = 8;
    let (_, warnings) = compile(&mut d, Path::new("m.nc")).unwrap();
    assert!(warnings.0.iter().any(|w| w.code == codes::BIG_COPY_ALERT), "expected a big-copy warning, got {warnings:?}");
  }
}
