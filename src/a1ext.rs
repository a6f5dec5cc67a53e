//! A1-Ext: template instantiation (spec.md §4.4). Clones a template
//! module once per distinct, canonicalised argument list, threads the
//! chosen `uname` back onto the requesting `include`, and re-drives
//! struct-size completion on every clone until the whole module graph
//! reaches a fixed point — "iterate until no module changes", with
//! instantiations memoized in a table keyed by structural identity
//! (here `(path, canonical args)` rather than a type pointer).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::diag::{codes, err, Diag};
use crate::span::Location;
use crate::types::a1::*;
use crate::types::PrimKind;
use crate::Driver;

/// One realised instantiation: `path` is the template module's source
/// file, `canon_args` is the module-relative canonical argument list used
/// for equality (spec.md §4.4 "Argument canonicalisation"), `uname` is
/// the cloned module actually living in `Driver::modules`.
struct Instantiation {
  path: PathBuf,
  canon_args: Vec<A1Type>,
  uname: String,
}

pub struct Ext<'d, P, L> {
  driver: &'d mut Driver<P, L>,
  arch: u32,
  instantiations: Vec<Instantiation>,
}

impl<'d, P, L> Ext<'d, P, L> {
  #[must_use] pub fn new(driver: &'d mut Driver<P, L>) -> Self {
    let arch = driver.config.arch.bytes();
    Self { driver, arch, instantiations: Vec::new() }
  }

  /// Runs the instantiation loop to a fixed point (spec.md §4.4). Safe to
  /// call on a graph with no templates at all: the loop quiesces on its
  /// first iteration.
  pub fn run(&mut self) -> Result<(), Diag> {
    let mut round_no = 0u32;
    loop {
      let mut changed = false;
      let round = self.driver.modules.len();
      for mi in 0..round {
        if self.complete_module_includes(mi)? { changed = true; }
      }
      for mi in 0..self.driver.modules.len() {
        if self.retry_struct_sizes(mi)? { changed = true; }
      }
      log::debug!("template instantiation round {round_no}: changed={changed}, modules={}", self.driver.modules.len());
      round_no += 1;
      if !changed { break }
    }
    self.check_fully_resolved()
  }

  /// Pass over one module's `include<...>` forms: complete argument sizes,
  /// canonicalise, find-or-clone, and record the chosen target `uname`
  /// back onto the include. Returns whether anything changed.
  fn complete_module_includes(&mut self, mi: usize) -> Result<bool, Diag> {
    let pending: Vec<(DeclId, PathBuf, Vec<A1Type>, String)> = {
      let m = &self.driver.modules[mi];
      m.decls.iter().enumerate().filter_map(|(i, d)| {
        let Decl::Include(inc) = d else { return None };
        if inc.args.is_empty() { return None }
        let resolved_already = inc.target_uname.as_deref()
          .is_some_and(|u| self.instantiations.iter().any(|inst| inst.uname == u));
        if resolved_already { return None }
        let from_dir = m.path.parent().map(PathBuf::from).unwrap_or_default();
        let resolved = crate::provider::resolve_include(&from_dir, &inc.path);
        Some((DeclId(u32::try_from(i).expect("decl index")), resolved, inc.args.clone(), m.uname.clone()))
      }).collect()
    };

    let mut changed = false;
    for (decl_id, resolved_path, args, caller_uname) in pending {
      let mut sized = Vec::with_capacity(args.len());
      let mut all_sized = true;
      for a in &args {
        match self.complete_arg(mi, a)? {
          Some(t) => sized.push(t),
          None => { all_sized = false; break }
        }
      }
      if !all_sized { continue }

      let canon: Vec<A1Type> = sized.iter().map(|t| canonicalize(t, &caller_uname)).collect();
      let uname = self.find_or_clone(&resolved_path, &sized, &canon)?;
      let m = &mut self.driver.modules[mi];
      if let Decl::Include(inc) = &mut m.decls[decl_id] {
        if inc.target_uname.as_deref() != Some(uname.as_str()) {
          inc.target_uname = Some(uname);
          changed = true;
        }
      }
    }
    Ok(changed)
  }

  /// Resolves `(size, align)` for an instantiation argument, reading
  /// sizes out of the whole `Driver::modules` graph as it stands today
  /// (spec.md §4.4 step 1: "complete its argument types (recursively)").
  fn complete_arg(&self, home_idx: usize, ty: &A1Type) -> Result<Option<A1Type>, Diag> {
    let Some((size, align)) = self.type_size(home_idx, ty)? else { return Ok(None) };
    let mut out = ty.clone();
    out.type_size = size;
    out.type_align = align;
    if let Some(d) = &ty.direct {
      let Some(inner) = self.complete_arg(home_idx, d)? else { return Ok(None) };
      out.direct = Some(Box::new(inner));
    }
    Ok(Some(out))
  }

  fn type_size(&self, home_idx: usize, ty: &A1Type) -> Result<Option<(i32, i32)>, Diag> {
    match &ty.kind {
      A1TypeKind::Primitive(p) => {
        if *p == PrimKind::Void { return Err(err!(codes::VOID_TYPE, ty.location, "void is not a valid template argument")) }
        Ok(Some((p.size(self.arch) as i32, p.align(self.arch) as i32)))
      }
      A1TypeKind::Pointer | A1TypeKind::Function => Ok(Some((self.arch as i32, self.arch as i32))),
      A1TypeKind::Slice => Ok(Some(((2 * self.arch) as i32, self.arch as i32))),
      A1TypeKind::Array => {
        if ty.arr_len <= 0 { return Err(err!(codes::BAD_OPERAND, ty.location, "array length must be > 0")) }
        let direct = ty.direct.as_ref().expect("array has direct");
        let Some((esize, ealign)) = self.type_size(home_idx, direct)? else { return Ok(None) };
        Ok(Some((esize * i32::try_from(ty.arr_len).unwrap_or(0), ealign)))
      }
      A1TypeKind::Name => self.lookup_size(&self.driver.modules[home_idx], &ty.name),
      A1TypeKind::Foreign => {
        let Some(target) = find_include_target(&self.driver.modules[home_idx], &ty.inc_name) else { return Ok(None) };
        let Some(tmod) = self.driver.modules.iter().find(|m| m.uname == target) else { return Ok(None) };
        self.lookup_size(tmod, &ty.name)
      }
      A1TypeKind::TemplateRef => Ok(None),
      A1TypeKind::Auto | A1TypeKind::None => Ok(None),
    }
  }

  fn lookup_size(&self, module: &Module, name: &str) -> Result<Option<(i32, i32)>, Diag> {
    let Some(&id) = module.name_index.get(name) else { return Ok(None) };
    match &module.decls[id] {
      Decl::Struct(s) => Ok(if s.is_sized() { Some((s.struct_size, s.struct_align)) } else { None }),
      Decl::Enum(e) => Ok(e.enum_size.map(|sz| (i32::from(sz), i32::from(sz)))),
      Decl::Typedef(t) => {
        let home_idx = self.driver.modules.iter().position(|m| m.uname == module.uname).unwrap_or(usize::MAX);
        if home_idx == usize::MAX { Ok(None) } else { self.type_size(home_idx, &t.ty) }
      }
      _ => Ok(None),
    }
  }

  /// Finds an existing clone matching `(path, canon_args)`, or deep-clones
  /// the base template module, binds the supplied (concrete, sized)
  /// argument types to its `template` parameters, and recursively
  /// re-drives struct sizing on the clone (spec.md §4.4 step 2).
  fn find_or_clone(&mut self, path: &Path, args: &[A1Type], canon: &[A1Type]) -> Result<String, Diag> {
    if let Some(inst) = self.instantiations.iter().find(|inst| {
      inst.path == path && inst.canon_args.len() == canon.len()
        && inst.canon_args.iter().zip(canon).all(|(a, b)| a.structural_eq(b))
    }) {
      return Ok(inst.uname.clone());
    }

    let base_idx = self.driver.modules.iter().position(|m| m.path == path && m.tmp_args.is_none())
      .ok_or_else(|| err!(codes::UNKNOWN_INCLUDE, Location::NONE, "no template module found at '{}'", path.display()))?;

    let param_names: Vec<String> = self.driver.modules[base_idx].decls.iter()
      .filter_map(|d| if let Decl::TemplateParam(p) = d { Some((p.index, p.name.clone())) } else { None })
      .collect::<Vec<_>>().into_iter().map(|(_, n)| n).collect();
    if param_names.len() != args.len() {
      return Err(err!(codes::WRONG_ARITY, Location::NONE,
        "template '{}' expects {} argument(s), got {}", path.display(), param_names.len(), args.len()));
    }
    let subst: HashMap<String, A1Type> = param_names.into_iter().zip(args.iter().cloned()).collect();

    let mut clone = self.driver.modules[base_idx].clone();
    clone.tmp_args = Some(args.to_vec());
    clone.is_finished = false;
    for decl in &mut clone.decls { substitute_decl(decl, &subst); }
    for scope in &mut clone.scopes { substitute_scope(scope, &subst); }

    let uname = self.driver.fresh_uname(path);
    clone.uname = uname.clone();
    self.driver.modules.push(clone);
    self.instantiations.push(Instantiation { path: path.to_path_buf(), canon_args: canon.to_vec(), uname: uname.clone() });
    Ok(uname)
  }

  /// Re-runs struct-size completion (same layout algorithm as A1 pass 2,
  /// spec.md §4.2) on module `mi`, now that some of its member types may
  /// have become concrete through template substitution.
  fn retry_struct_sizes(&mut self, mi: usize) -> Result<bool, Diag> {
    let ids: Vec<DeclId> = (0..self.driver.modules[mi].decls.len() as u32).map(DeclId)
      .filter(|&id| matches!(self.driver.modules[mi].decls[id], Decl::Struct(_))).collect();
    let mut changed = false;
    for id in ids {
      if self.try_size_struct(mi, id)? { changed = true; }
    }
    Ok(changed)
  }

  fn try_size_struct(&mut self, mi: usize, id: DeclId) -> Result<bool, Diag> {
    let already = if let Decl::Struct(s) = &self.driver.modules[mi].decls[id] { s.is_sized() } else { return Ok(false) };
    if already { return Ok(false) }

    let members = if let Decl::Struct(s) = &self.driver.modules[mi].decls[id] { s.members.clone() } else { unreachable!() };
    let mut sized_members = Vec::with_capacity(members.len());
    for m in &members {
      let Some((size, align)) = self.type_size(mi, &m.ty)? else { return Ok(false) };
      let mut ty = m.ty.clone();
      ty.type_size = size;
      ty.type_align = align;
      sized_members.push(StructMember { name: m.name.clone(), ty, offset: -1 });
    }
    let mut offset = 0i32;
    let mut align_max = 1i32;
    for m in &mut sized_members {
      align_max = align_max.max(m.ty.type_align);
      offset = round_up(offset, m.ty.type_align);
      m.offset = offset;
      offset += m.ty.type_size;
    }
    let size = round_up(offset, align_max);
    if let Decl::Struct(s) = &mut self.driver.modules[mi].decls[id] {
      s.members = sized_members;
      s.struct_size = size;
      s.struct_align = align_max;
    }
    Ok(true)
  }

  fn check_fully_resolved(&self) -> Result<(), Diag> {
    for m in &self.driver.modules {
      for d in &m.decls {
        match d {
          Decl::Struct(s) if !s.is_sized() =>
            return Err(err!(codes::UNRESOLVED_SIZE, s.location, "struct '{}' in module '{}' never completes sizing", s.name, m.uname)),
          Decl::Include(inc) if !inc.args.is_empty() && inc.target_uname.is_none() =>
            return Err(err!(codes::UNRESOLVED_SIZE, inc.location, "template arguments for include '{}' never resolve", inc.path)),
          _ => {}
        }
      }
    }
    Ok(())
  }
}

fn find_include_target<'m>(module: &'m Module, inc_name: &str) -> Option<&'m str> {
  module.decls.iter().find_map(|d| match d {
    Decl::Include(inc) if inc.alias.as_deref() == Some(inc_name) => inc.target_uname.as_deref(),
    _ => None,
  })
}

fn round_up(n: i32, align: i32) -> i32 {
  if align <= 1 { return n }
  (n + align - 1) / align * align
}

/// Rewrites every local `name`/`foreign` node in `ty` to a module-relative
/// `template` reference (spec.md §3 invariants, §4.4 "Argument
/// canonicalisation"), so that two includes in different modules which
/// end up with the same canonical argument list share one instantiation.
fn canonicalize(ty: &A1Type, caller_uname: &str) -> A1Type {
  let mut out = ty.clone();
  match ty.kind {
    A1TypeKind::Name => {
      out.kind = A1TypeKind::TemplateRef;
      out.inc_name = caller_uname.to_owned();
    }
    A1TypeKind::Foreign => {
      out.kind = A1TypeKind::TemplateRef;
      out.inc_name = format!("{caller_uname}/{}", ty.inc_name);
    }
    _ => {}
  }
  if let Some(d) = &ty.direct { out.direct = Some(Box::new(canonicalize(d, caller_uname))); }
  out.indirect = ty.indirect.iter().map(|t| canonicalize(t, caller_uname)).collect();
  out
}

// ------------------------------------------------------- substitution --

/// Replaces every `name`-kind type node bound by `subst` with the
/// corresponding (already sized) argument type, recursing through
/// pointer/array/slice/function wrappers (spec.md §4.4 "bind its template
/// declarations to the supplied argument types").
fn substitute_type(ty: &mut A1Type, subst: &HashMap<String, A1Type>) {
  if ty.kind == A1TypeKind::Name {
    if let Some(bound) = subst.get(&ty.name) {
      let loc = ty.location;
      *ty = bound.clone();
      ty.location = loc;
      return;
    }
  }
  if let Some(d) = &mut ty.direct { substitute_type(d, subst); }
  for t in &mut ty.indirect { substitute_type(t, subst); }
}

fn substitute_decl(decl: &mut Decl, subst: &HashMap<String, A1Type>) {
  match decl {
    Decl::Var(v) => {
      substitute_type(&mut v.ty, subst);
      if let Some(e) = &mut v.init { substitute_expr(e, subst); }
    }
    Decl::Func(f) => {
      substitute_type(&mut f.ret, subst);
      for (_, t) in &mut f.params { substitute_type(t, subst); }
    }
    Decl::Struct(s) => { for m in &mut s.members { substitute_type(&mut m.ty, subst); } }
    Decl::Typedef(t) => substitute_type(&mut t.ty, subst),
    Decl::Include(inc) => { for a in &mut inc.args { substitute_type(a, subst); } }
    Decl::Enum(_) | Decl::TemplateParam(_) | Decl::RawC(_) | Decl::RawIr(_) => {}
  }
}

fn substitute_expr(e: &mut Expr, subst: &HashMap<String, A1Type>) {
  match &mut e.kind {
    ExprKind::Cast { ty, expr } => { substitute_type(ty, subst); substitute_expr(expr, subst); }
    ExprKind::Sizeof { ty, expr } => {
      if let Some(t) = ty { substitute_type(t, subst); }
      if let Some(x) = expr { substitute_expr(x, subst); }
    }
    ExprKind::Member { base, .. } | ExprKind::Len(base) => substitute_expr(base, subst),
    ExprKind::Index { base, index } => { substitute_expr(base, subst); substitute_expr(index, subst); }
    ExprKind::Slice { base, lo, hi } => {
      substitute_expr(base, subst);
      if let Some(l) = lo { substitute_expr(l, subst); }
      if let Some(h) = hi { substitute_expr(h, subst); }
    }
    ExprKind::Unary { operand, .. } => substitute_expr(operand, subst),
    ExprKind::Binary { lhs, rhs, .. } => { substitute_expr(lhs, subst); substitute_expr(rhs, subst); }
    ExprKind::Ternary { cond, t, f } => { substitute_expr(cond, subst); substitute_expr(t, subst); substitute_expr(f, subst); }
    ExprKind::Make { ptr, count } => { substitute_expr(ptr, subst); substitute_expr(count, subst); }
    ExprKind::Call { callee, args } => {
      substitute_expr(callee, subst);
      for a in args { substitute_expr(a, subst); }
    }
    ExprKind::LiteralData(d) => { for el in &mut d.elements { substitute_expr(el, subst); } }
    ExprKind::Literal(_) | ExprKind::Name(_) => {}
  }
}

fn substitute_stmt(stmt: &mut Stmt, subst: &HashMap<String, A1Type>) {
  match &mut stmt.kind {
    StmtKind::Expr(e) | StmtKind::Defer(e) => substitute_expr(e, subst),
    StmtKind::Assign { lhs, rhs, .. } => { substitute_expr(lhs, subst); substitute_expr(rhs, subst); }
    StmtKind::Return(Some(e)) | StmtKind::Break(_, Some(e)) => substitute_expr(e, subst),
    StmtKind::If { cond, .. } | StmtKind::While { cond, .. } | StmtKind::Switch { scrutinee: cond, .. } => substitute_expr(cond, subst),
    StmtKind::For { init, cond, step, .. } => {
      if let Some(i) = init { substitute_stmt(i, subst); }
      if let Some(c) = cond { substitute_expr(c, subst); }
      if let Some(s) = step { substitute_stmt(s, subst); }
    }
    StmtKind::RawC(_) | StmtKind::RawIr(_) | StmtKind::Decl(_) | StmtKind::Return(None)
      | StmtKind::Break(_, None) | StmtKind::Continue(_) | StmtKind::Fall | StmtKind::Scope(_) => {}
  }
}

fn substitute_scope(scope: &mut Scope, subst: &HashMap<String, A1Type>) {
  for stmt in &mut scope.body { substitute_stmt(stmt, subst); }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::provider::MapProvider;
  use crate::token::Token;
  use crate::Lexer;
  use crate::span::SourceId;

  struct NoopLexer;
  impl Lexer for NoopLexer {
    fn lex(&self, _source: &str, _file: SourceId) -> Result<Vec<Token>, Diag> { Ok(vec![]) }
  }

  #[test]
  fn canonicalize_rewrites_local_name() {
    let ty = A1Type { kind: A1TypeKind::Name, location: Location::NONE, name: "Foo".into(), inc_name: String::new(),
      direct: None, indirect: Vec::new(), arr_len: -1, type_size: 4, type_align: 4 };
    let canon = canonicalize(&ty, "caller");
    assert_eq!(canon.kind, A1TypeKind::TemplateRef);
    assert_eq!(canon.inc_name, "caller");
    assert_eq!(canon.name, "Foo");
  }

  #[test]
  fn two_identical_argument_lists_share_one_instantiation() {
    let mut driver = Driver::new(MapProvider::default(), NoopLexer, Config::default());
    let mut base = Module::new("list.nc".into(), "list".into());
    base.push_decl(ROOT_SCOPE, Decl::TemplateParam(TemplateParamDecl { name: "T".into(), index: 0, location: Location::NONE }));
    base.is_finished = true;
    driver.modules.push(base);

    let mut ext = Ext::new(&mut driver);
    let i32_ty = A1Type::primitive(PrimKind::I32, 8, Location::NONE);
    let u1 = ext.find_or_clone(Path::new("list.nc"), &[i32_ty.clone()], &[canonicalize(&i32_ty, "a")]).unwrap();
    let u2 = ext.find_or_clone(Path::new("list.nc"), &[i32_ty.clone()], &[canonicalize(&i32_ty, "a")]).unwrap();
    assert_eq!(u1, u2);
  }
}
