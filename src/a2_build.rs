//! The A2 builder (spec.md §4.5): name binding, operator elaboration,
//! method/call resolution, and canonical-type assignment. A context
//! object threads a dedup/intern table (here [`TypePool`]) through a
//! recursive walk that consumes one AST and produces another, keyed by
//! structural type equality rather than by source pointer, since A2
//! types must compare equal across modules (spec.md §3 invariants).
//!
//! Every module is built independently: a reference to another module's
//! declarations is resolved by reading that module's already-finished A1
//! info directly (struct/enum sizes, function signatures) rather than by
//! waiting on that module's own A2 build, so module build order doesn't
//! need to be topological.

use hashbrown::HashMap;
use if_chain::if_chain;

use crate::diag::{codes, err, Diag};
use crate::parse_a1::is_exported_name;
use crate::span::Location;
use crate::types::a1::{self, Decl as A1Decl, DeclId, Expr as A1Expr, ExprKind as A1ExprKind, Module as A1Module,
  ScopeId, Stmt as A1Stmt, StmtKind as A1StmtKind, VarFlags, A1Type, A1TypeKind};
use crate::types::a2::{self, A2Type, A2TypeKind, Decl, Expr, ExprKind, FuncDecl, Module, Param, Scope, Stmt,
  StmtKind, StructDecl, StructMember, TypePool, VarDecl};
use crate::types::{BinOp, PrimKind, UnOp};
use crate::literal::Literal;

pub struct Builder<'a, 'm> {
  pool: &'a TypePool<'a>,
  arch: u32,
  modules: &'m [A1Module],
}

impl<'a, 'm> Builder<'a, 'm> {
  #[must_use] pub fn new(pool: &'a TypePool<'a>, arch: u32, modules: &'m [A1Module]) -> Self {
    Self { pool, arch, modules }
  }

  /// Builds every module in the graph. Order doesn't matter: cross-module
  /// references are resolved against `self.modules` directly, never
  /// against a partially-built output vector.
  pub fn build_all(&self) -> Result<Vec<Module<'a>>, Diag> {
    self.modules.iter().map(|m| self.build_module(m)).collect()
  }

  fn module_by_uname(&self, uname: &str) -> Option<&'m A1Module> {
    self.modules.iter().find(|m| m.uname == uname)
  }

  fn build_module(&self, m: &'m A1Module) -> Result<Module<'a>, Diag> {
    ModuleBuilder::new(self, m).run()
  }

  /// Converts a syntactic (A1) type into a canonical, pool-interned A2
  /// type, following `Name`/`Foreign` references to their declaring
  /// module's already-finished struct/enum/typedef info (spec.md §4.5
  /// "Type pool").
  fn convert_type(&self, home: &'m A1Module, ty: &A1Type) -> Result<A2Type<'a>, Diag> {
    match &ty.kind {
      A1TypeKind::Primitive(p) => Ok(self.pool.primitive(*p, self.arch)),
      A1TypeKind::Pointer => {
        let pointee = self.convert_type(home, ty.direct.as_ref().expect("pointer has direct"))?;
        Ok(self.pool.pointer(pointee, self.arch))
      }
      A1TypeKind::Array => {
        let elem = self.convert_type(home, ty.direct.as_ref().expect("array has direct"))?;
        Ok(self.pool.array(elem, ty.arr_len, ty.type_size, ty.type_align))
      }
      A1TypeKind::Slice => {
        let elem = self.convert_type(home, ty.direct.as_ref().expect("slice has direct"))?;
        Ok(self.pool.slice(elem, self.arch))
      }
      A1TypeKind::Function => {
        let ret = self.convert_type(home, ty.direct.as_ref().expect("function has return type"))?;
        let params = ty.indirect.iter().map(|p| self.convert_type(home, p)).collect::<Result<Vec<_>, _>>()?;
        Ok(self.pool.function(ret, params, false, self.arch))
      }
      A1TypeKind::Name => self.resolve_named_type(home, &ty.name, ty.location),
      A1TypeKind::Foreign => {
        let target_uname = home.decls.iter().find_map(|d| match d {
          A1Decl::Include(inc) if inc.alias.as_deref() == Some(ty.inc_name.as_str()) => inc.target_uname.clone(),
          _ => None,
        }).ok_or_else(|| err!(codes::UNKNOWN_INCLUDE, ty.location, "unknown include alias '{}'", ty.inc_name))?;
        let target = self.module_by_uname(&target_uname)
          .ok_or_else(|| err!(codes::UNKNOWN_INCLUDE, ty.location, "include target '{target_uname}' not found"))?;
        self.resolve_named_type(target, &ty.name, ty.location)
      }
      A1TypeKind::TemplateRef => Err(err!(codes::UNKNOWN_TYPE_NAME, ty.location, "unresolved template reference '{}'", ty.name)),
      A1TypeKind::Auto => Err(err!(codes::UNKNOWN_TYPE_NAME, ty.location, "'auto' is only valid on a variable with an initializer")),
      A1TypeKind::None => Err(err!(codes::UNKNOWN_TYPE_NAME, ty.location, "incomplete type")),
    }
  }

  fn resolve_named_type(&self, home: &'m A1Module, name: &str, loc: Location) -> Result<A2Type<'a>, Diag> {
    let &id = home.name_index.get(name).ok_or_else(|| err!(codes::UNKNOWN_TYPE_NAME, loc, "'{name}' does not name a type"))?;
    match &home.decls[id] {
      A1Decl::Struct(s) => Ok(self.pool.structure(home.uname.clone(), s.name.clone(), s.struct_size, s.struct_align)),
      A1Decl::Enum(e) => Ok(self.pool.enumeration(home.uname.clone(), e.name.clone(), i32::from(e.enum_size.unwrap_or(4)), i32::from(e.enum_size.unwrap_or(4)))),
      A1Decl::Typedef(t) => self.convert_type(home, &t.ty),
      _ => Err(err!(codes::UNKNOWN_TYPE_NAME, loc, "'{name}' does not name a type")),
    }
  }

  fn struct_members(&self, mod_uname: &str, name: &str) -> Option<(&'m A1Module, &'m a1::StructDecl)> {
    let home = self.module_by_uname(mod_uname)?;
    let &id = home.name_index.get(name)?;
    if let A1Decl::Struct(s) = &home.decls[id] { Some((home, s)) } else { None }
  }

  fn enum_members(&self, mod_uname: &str, name: &str) -> Option<&'m a1::EnumDecl> {
    let home = self.module_by_uname(mod_uname)?;
    let &id = home.name_index.get(name)?;
    if let A1Decl::Enum(e) = &home.decls[id] { Some(e) } else { None }
  }

  fn find_method(&self, mod_uname: &str, struct_name: &str, method: &str) -> Option<(&'m A1Module, &'m a1::FuncDecl)> {
    let home = self.module_by_uname(mod_uname)?;
    home.decls.iter().find_map(|d| {
      if_chain! {
        if let A1Decl::Func(f) = d;
        if f.owner_struct.as_deref() == Some(struct_name);
        if f.name == method;
        then { Some((home, f)) } else { None }
      }
    })
  }
}

/// One loop or switch nesting level, used to resolve labelled/unlabelled
/// `break`/`continue` to the A2 scope they jump out of (spec.md §3
/// `Statement`: `break (Option<ScopeId>)`, resolved here instead of left
/// as a string label).
struct LoopCtx {
  label: Option<String>,
  break_target: ScopeId,
  continue_target: Option<ScopeId>,
}

struct ModuleBuilder<'b, 'a, 'm> {
  b: &'b Builder<'a, 'm>,
  home: &'m A1Module,
  decl_scope: HashMap<DeclId, ScopeId>,
  decls: Vec<Decl<'a>>,
  scopes: Vec<Scope<'a>>,
  loop_stack: Vec<LoopCtx>,
}

impl<'b, 'a, 'm> ModuleBuilder<'b, 'a, 'm> {
  fn new(b: &'b Builder<'a, 'm>, home: &'m A1Module) -> Self {
    let mut decl_scope = HashMap::new();
    for (si, scope) in home.scopes.iter().enumerate() {
      for stmt in &scope.body {
        match &stmt.kind {
          A1StmtKind::Decl(id) => { decl_scope.insert(*id, ScopeId(si as u32)); }
          // `for (init; ...)`'s init lives in the `For` statement's own
          // field, not in any scope's body list directly, so it's
          // invisible to the walk above unless handled specially here.
          A1StmtKind::For { init: Some(boxed), .. } => {
            if let A1StmtKind::Decl(id) = &boxed.kind { decl_scope.insert(*id, ScopeId(si as u32)); }
          }
          _ => {}
        }
      }
    }
    let scopes = home.scopes.iter().map(|s| Scope { parent: s.parent, body: Vec::new(), defers: Vec::new() }).collect();
    Self { b, home, decl_scope, decls: Vec::with_capacity(home.decls.len()), scopes, loop_stack: Vec::new() }
  }

  fn run(mut self) -> Result<Module<'a>, Diag> {
    self.build_shapes()?;
    self.build_bodies()?;

    let mut name_index = HashMap::new();
    for (i, d) in self.decls.iter().enumerate() {
      if let Some(name) = d.name() { name_index.insert(name.to_owned(), DeclId(i as u32)); }
    }
    let imports = self.home.decls.iter().filter_map(|d| {
      if let A1Decl::Include(inc) = d {
        let target = inc.target_uname.clone()?;
        Some((inc.alias.clone().unwrap_or_else(|| target.clone()), target))
      } else { None }
    }).collect();

    Ok(Module { path: self.home.path.clone(), uname: self.home.uname.clone(), decls: self.decls, scopes: self.scopes, name_index, imports })
  }

  // ------------------------------------------------------------- shapes --

  /// Builds every declaration's signature (struct layout, enum values,
  /// function params/return, variable type) without touching bodies or
  /// initializers, so forward references between toplevel declarations
  /// resolve regardless of source order (spec.md §9 "scope chain vs flat
  /// maps" — here realised as a two-pass build per module).
  fn build_shapes(&mut self) -> Result<(), Diag> {
    for d in &self.home.decls {
      let out = match d {
        A1Decl::Struct(s) => {
          let mut members = Vec::with_capacity(s.members.len());
          for m in &s.members {
            members.push(StructMember { name: m.name.clone(), ty: self.b.convert_type(self.home, &m.ty)?, offset: m.offset });
          }
          Decl::Struct(StructDecl { name: s.name.clone(), members, size: s.struct_size, align: s.struct_align, exported: s.exported, methods: HashMap::new() })
        }
        A1Decl::Enum(e) => {
          let members = e.members.iter().map(|m| (m.name.clone(), m.value.unwrap_or(0))).collect();
          Decl::Enum(a2::EnumDecl { name: e.name.clone(), members, size: e.enum_size.unwrap_or(4), exported: e.exported })
        }
        A1Decl::Func(f) => {
          let ret = self.b.convert_type(self.home, &f.ret)?;
          let params = f.params.iter().map(|(n, t)| Ok(Param { name: n.clone(), ty: self.b.convert_type(self.home, t)? })).collect::<Result<_, Diag>>()?;
          Decl::Func(FuncDecl { name: f.name.clone(), owner_struct: f.owner_struct.clone(), params, ret, is_vaarg: f.is_vaarg, exported: f.exported, body: f.body })
        }
        A1Decl::Var(v) => {
          let ty = if matches!(v.ty.kind, A1TypeKind::Auto) {
            // Resolved in `build_bodies` once the initializer is
            // elaborated (spec.md §1 non-goal: `auto` only, from an
            // initializer whose own type is already known).
            self.b.pool.primitive(PrimKind::Void, self.b.arch)
          } else {
            self.b.convert_type(self.home, &v.ty)?
          };
          Decl::Var(VarDecl {
            name: v.name.clone(), ty, init: None,
            is_define: v.flags.contains(VarFlags::DEFINE), is_const: v.flags.contains(VarFlags::CONST),
            is_volatile: v.flags.contains(VarFlags::VOLATILE), is_extern: v.flags.contains(VarFlags::EXTERN),
            is_param: v.flags.contains(VarFlags::PARAM), exported: v.flags.contains(VarFlags::EXPORTED),
          })
        }
        A1Decl::RawC(s) => Decl::RawC(s.clone()),
        A1Decl::RawIr(s) => Decl::RawIr(s.clone()),
        A1Decl::Include(_) | A1Decl::TemplateParam(_) | A1Decl::Typedef(_) => Decl::RawC(String::new()),
      };
      self.decls.push(out);
    }

    // Struct methods: link by name now that every function shape exists.
    for i in 0..self.decls.len() {
      let A1Decl::Func(f) = &self.home.decls[i] else { continue };
      let Some(owner) = &f.owner_struct else { continue };
      let Some(owner_id) = self.home.name_index.get(owner).copied() else { continue };
      if let Decl::Struct(s) = &mut self.decls[owner_id] {
        s.methods.insert(f.name.clone(), DeclId(i as u32));
      }
    }
    Ok(())
  }

  // -------------------------------------------------------------- bodies --

  fn build_bodies(&mut self) -> Result<(), Diag> {
    for i in 0..self.home.decls.len() {
      match &self.home.decls[i] {
        A1Decl::Var(v) => {
          if let Some(init) = &v.init {
            let scope = self.decl_scope.get(&DeclId(i as u32)).copied().unwrap_or(a1::ROOT_SCOPE);
            let expected = if matches!(v.ty.kind, A1TypeKind::Auto) { None } else {
              if let Decl::Var(vd) = &self.decls[i] { Some(vd.ty) } else { None }
            };
            let elaborated = self.elaborate_expr(scope, init, expected)?;
            if let Some(exp) = expected {
              if elaborated.ty != exp {
                return Err(err!(codes::TYPE_MISMATCH, elaborated.location, "initializer has type {}, expected {}", elaborated.ty, exp));
              }
            }
            if let Decl::Var(vd) = &mut self.decls[i] {
              if matches!(self.home_var_kind(i), A1TypeKind::Auto) { vd.ty = elaborated.ty; }
              vd.init = Some(elaborated);
            }
          }
        }
        A1Decl::Func(f) => {
          self.loop_stack.clear();
          self.elaborate_block(f.body)?;
        }
        _ => {}
      }
    }
    Ok(())
  }

  fn home_var_kind(&self, i: usize) -> &A1TypeKind {
    if let A1Decl::Var(v) = &self.home.decls[i] { &v.ty.kind } else { &A1TypeKind::None }
  }

  /// Elaborates every statement directly in `scope`'s body into
  /// `self.scopes[scope]`.
  fn elaborate_block(&mut self, scope: ScopeId) -> Result<(), Diag> {
    let body = self.home.scopes[scope].body.clone();
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
      if let Some(s) = self.elaborate_stmt(scope, &body[i], &body, &mut i)? { out.push(s); }
      i += 1;
    }
    self.scopes[scope].body = out;
    Ok(())
  }

  /// Elaborates one statement. `rest`/`idx` let `switch` case bodies
  /// inline the statements of a following case when the current one ends
  /// in `fall` (spec.md §3: A1 keeps `fall`, A2 has no such variant —
  /// fallthrough is resolved here by splicing, spec.md §4.5).
  fn elaborate_stmt(&mut self, scope: ScopeId, stmt: &A1Stmt, _rest: &[A1Stmt], _idx: &mut usize) -> Result<Option<Stmt<'a>>, Diag> {
    let loc = stmt.location;
    let kind = match &stmt.kind {
      A1StmtKind::RawC(s) => StmtKind::RawC(s.clone()),
      A1StmtKind::RawIr(s) => StmtKind::RawIr(s.clone()),
      A1StmtKind::Expr(e) => StmtKind::Expr(self.elaborate_expr(scope, e, None)?),
      A1StmtKind::Decl(id) => {
        // A local function's body isn't visited by `build_bodies`'s
        // decl-order pass (that pass only descends into toplevel
        // `Func` decls via their own loop iteration), so a nested
        // function needs its body elaborated here, at the point its
        // `Decl` statement is reached. A local `var`'s initializer was
        // already elaborated by `build_bodies` using `decl_scope`.
        if let A1Decl::Func(f) = &self.home.decls[*id] {
          let saved = std::mem::take(&mut self.loop_stack);
          self.elaborate_block(f.body)?;
          self.loop_stack = saved;
        }
        StmtKind::Decl(*id)
      }
      A1StmtKind::Assign { op, lhs, rhs } => {
        let l = self.elaborate_expr(scope, lhs, None)?;
        if !l.is_lvalue { return Err(err!(codes::NOT_LVALUE, loc, "left side of assignment is not an lvalue")) }
        let r = self.elaborate_expr(scope, rhs, Some(l.ty))?;
        StmtKind::Assign { op: *op, lhs: l, rhs: r }
      }
      A1StmtKind::Return(e) => StmtKind::Return(e.as_ref().map(|e| self.elaborate_expr(scope, e, None)).transpose()?),
      A1StmtKind::Defer(e) => {
        let elab = self.elaborate_expr(scope, e, None)?;
        self.scopes[scope].defers.push(elab);
        return Ok(None);
      }
      A1StmtKind::Break(label, e) => {
        let target = self.resolve_loop_target(label.as_deref(), loc, true)?;
        StmtKind::Break(target, e.as_ref().map(|e| self.elaborate_expr(scope, e, None)).transpose()?)
      }
      A1StmtKind::Continue(label) => StmtKind::Continue(self.resolve_loop_target(label.as_deref(), loc, false)?),
      A1StmtKind::Fall => return Ok(None), // consumed by the switch builder below
      A1StmtKind::Scope(child) => { self.elaborate_block(*child)?; StmtKind::Scope(*child) }
      A1StmtKind::If { cond, then, els } => {
        let c = self.elaborate_expr(scope, cond, None)?;
        if !c.ty.0.kind.eq(&A2TypeKind::Primitive(PrimKind::Bool)) { return Err(err!(codes::TYPE_MISMATCH, loc, "if condition must be bool")) }
        self.elaborate_block(*then)?;
        if let Some(e) = els { self.elaborate_block(*e)?; }
        StmtKind::If { cond: c, then: *then, els: *els }
      }
      A1StmtKind::While { label, cond, body } => {
        let c = self.elaborate_expr(scope, cond, None)?;
        self.loop_stack.push(LoopCtx { label: label.clone(), break_target: *body, continue_target: Some(*body) });
        self.elaborate_block(*body)?;
        self.loop_stack.pop();
        StmtKind::While { cond: c, body: *body }
      }
      A1StmtKind::For { label, init, cond, step, body } => {
        return self.elaborate_for(scope, label.clone(), init.as_deref(), cond.as_ref(), step.as_deref(), *body, loc).map(Some);
      }
      A1StmtKind::Switch { label, scrutinee, cases, default } => {
        // `break` inside a switch needs somewhere to jump to that means
        // "past the whole statement" — switch has no single body scope
        // of its own (each case is its own scope), so one is synthesised
        // here purely as a break target, the same trick `elaborate_for`
        // uses for its wrapper scope.
        let s = self.elaborate_expr(scope, scrutinee, None)?;
        let wrapper = self.new_scope(Some(scope));
        self.loop_stack.push(LoopCtx { label: label.clone(), break_target: wrapper, continue_target: None });
        let cases_out = self.elaborate_switch_cases(cases, *default)?;
        if let Some(d) = default { self.elaborate_block(*d)?; }
        self.loop_stack.pop();
        let switch_stmt = Stmt { kind: StmtKind::Switch { scrutinee: s, cases: cases_out, default: *default }, location: loc, uid: u64::from(loc.line), is_returnable: true };
        self.scopes[wrapper].body = vec![switch_stmt];
        StmtKind::Scope(wrapper)
      }
    };
    Ok(Some(Stmt { kind, location: loc, uid: u64::from(loc.line), is_returnable: true }))
  }

  /// Desugars `for (init; cond; step) body` into an equivalent `while`
  /// whose body scope runs the user body in its own nested scope
  /// followed by `step`, so an unlabelled `continue` (which targets the
  /// inner scope) still reaches `step` before the next condition check —
  /// spec.md §4.6's "loop scopes use state=0 to mean continue (run step,
  /// re-iterate)" depends on this split surviving into A3.
  fn elaborate_for(&mut self, scope: ScopeId, label: Option<String>, init: Option<&A1Stmt>, cond: Option<&A1Expr>,
    step: Option<&A1Stmt>, body: ScopeId, loc: Location) -> Result<Stmt<'a>, Diag> {
    let mut prelude = Vec::new();
    // The parser's `body` scope owns `init`'s declaration too (it's the
    // lexical scope `init`'s name is visible in), so `Module::push_decl`
    // already appended a `Decl` statement for it to `body`'s own body
    // list. Track its id so the duplicate can be dropped below instead of
    // re-running the initializer on every loop iteration.
    let init_decl_id = match init.map(|i| &i.kind) { Some(A1StmtKind::Decl(id)) => Some(*id), _ => None };
    if let Some(i) = init {
      let mut idx = 0;
      if let Some(s) = self.elaborate_stmt(scope, i, &[], &mut idx)? { prelude.push(s); }
    }
    let c = cond.map(|c| self.elaborate_expr(scope, c, None)).transpose()?
      .unwrap_or_else(|| Expr { kind: ExprKind::Literal(Literal::Bool(true)), location: loc, ty: self.b.pool.primitive(PrimKind::Bool, self.b.arch), is_lvalue: false, is_const: true });

    let inner = self.new_scope(Some(body));
    self.loop_stack.push(LoopCtx { label, break_target: body, continue_target: Some(inner) });
    // `body`'s own statements become the inner sub-scope's body.
    self.elaborate_block(body)?;
    if let Some(id) = init_decl_id {
      if let Some(pos) = self.scopes[body].body.iter().position(|s| matches!(s.kind, StmtKind::Decl(d) if d == id)) {
        self.scopes[body].body.remove(pos);
      }
    }
    self.scopes[inner].body = std::mem::take(&mut self.scopes[body].body);
    self.scopes[body].body.push(Stmt { kind: StmtKind::Scope(inner), location: loc, uid: u64::from(loc.line), is_returnable: true });
    if let Some(st) = step {
      let mut idx = 0;
      if let Some(s) = self.elaborate_stmt(scope, st, &[], &mut idx)? {
        self.scopes[body].body.push(s);
      }
    }
    self.loop_stack.pop();

    let while_stmt = Stmt { kind: StmtKind::While { cond: c, body }, location: loc, uid: u64::from(loc.line), is_returnable: true };
    prelude.push(while_stmt);
    let wrapper = self.new_scope(Some(scope));
    self.scopes[wrapper].body = prelude;
    Ok(Stmt { kind: StmtKind::Scope(wrapper), location: loc, uid: u64::from(loc.line), is_returnable: true })
  }

  fn elaborate_switch_cases(&mut self, cases: &[(Vec<Literal>, ScopeId)], _default: Option<ScopeId>) -> Result<Vec<(Vec<Literal>, ScopeId)>, Diag> {
    for (_, body) in cases { self.elaborate_block(*body)?; }
    // Inline fallthrough: a case whose last original statement is `fall`
    // gets the next case's (already-elaborated) body appended.
    for i in (0..cases.len().saturating_sub(1)).rev() {
      let (_, body) = cases[i];
      let falls = matches!(self.home.scopes[body].body.last(), Some(A1Stmt { kind: A1StmtKind::Fall, .. }));
      if falls {
        let next_body = cases[i + 1].1;
        let appended = self.scopes[next_body].body.clone();
        self.scopes[body].body.extend(appended);
      }
    }
    Ok(cases.to_vec())
  }

  fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
    self.scopes.push(Scope { parent, body: Vec::new(), defers: Vec::new() });
    ScopeId(u32::try_from(self.scopes.len() - 1).expect("too many scopes"))
  }

  fn resolve_loop_target(&self, label: Option<&str>, loc: Location, allow_switch: bool) -> Result<Option<ScopeId>, Diag> {
    if let Some(lbl) = label {
      for ctx in self.loop_stack.iter().rev() {
        if ctx.label.as_deref() == Some(lbl) {
          return Ok(if allow_switch { Some(ctx.break_target) } else { ctx.continue_target });
        }
      }
      return Err(err!(codes::UNKNOWN_NAME, loc, "no enclosing loop or switch labelled '{lbl}'"));
    }
    for ctx in self.loop_stack.iter().rev() {
      if allow_switch { return Ok(Some(ctx.break_target)) }
      if let Some(t) = ctx.continue_target { return Ok(Some(t)) }
    }
    Err(err!(codes::UNKNOWN_NAME, loc, "{} outside of a loop", if allow_switch { "break" } else { "continue" }))
  }

  // ------------------------------------------------------------- exprs --

  fn elaborate_expr(&self, scope: ScopeId, e: &A1Expr, expected: Option<A2Type<'a>>) -> Result<Expr<'a>, Diag> {
    let loc = e.location;
    match &e.kind {
      A1ExprKind::Literal(l) => self.elaborate_literal(l.clone(), loc, expected),
      A1ExprKind::LiteralData(d) => self.elaborate_literal_data(scope, d, loc, expected),
      A1ExprKind::Name(n) => self.elaborate_name(scope, n, loc),
      A1ExprKind::Member { base, field } => self.elaborate_member(scope, base, field, loc),
      A1ExprKind::Index { base, index } => {
        let b = self.elaborate_expr(scope, base, None)?;
        let idx = self.elaborate_expr(scope, index, None)?;
        if !idx.ty.is_integer() { return Err(err!(codes::BAD_OPERAND, loc, "index must be an integer")) }
        let elem = b.ty.elem().or_else(|| b.ty.pointee())
          .ok_or_else(|| err!(codes::TYPE_MISMATCH, loc, "cannot index a value of type {}", b.ty))?;
        Ok(Expr { kind: ExprKind::Index { base: Box::new(b), index: Box::new(idx) }, location: loc, ty: elem, is_lvalue: true, is_const: false })
      }
      A1ExprKind::Slice { base, lo, hi } => {
        let b = self.elaborate_expr(scope, base, None)?;
        let elem = b.ty.elem().or_else(|| b.ty.pointee())
          .ok_or_else(|| err!(codes::TYPE_MISMATCH, loc, "cannot slice a value of type {}", b.ty))?;
        let lo_e = lo.as_ref().map(|e| self.elaborate_expr(scope, e, None)).transpose()?.unwrap_or_else(|| self.zero(loc));
        let hi_e = match hi.as_ref().map(|e| self.elaborate_expr(scope, e, None)).transpose()? {
          Some(h) => h,
          // `a[lo:]` on an array/slice runs to its own length; a raw
          // pointer has no length to fall back on.
          None if b.ty.is_array() || b.ty.is_slice() => Expr {
            kind: ExprKind::Len(Box::new(b.clone())), location: loc,
            ty: self.b.pool.primitive(PrimKind::I32, self.b.arch), is_lvalue: false, is_const: false,
          },
          None => return Err(err!(codes::BAD_OPERAND, loc, "slicing a pointer requires an explicit upper bound")),
        };
        let ty = self.b.pool.slice(elem, self.b.arch);
        Ok(Expr { kind: ExprKind::Slice { base: Box::new(b), lo: Box::new(lo_e), hi: Box::new(hi_e) },
          location: loc, ty, is_lvalue: false, is_const: false })
      }
      A1ExprKind::Unary { op, operand } => self.elaborate_unary(scope, *op, operand, loc),
      A1ExprKind::Binary { op, lhs, rhs } => self.elaborate_binary(scope, *op, lhs, rhs, loc),
      A1ExprKind::Ternary { cond, t, f } => {
        let c = self.elaborate_expr(scope, cond, None)?;
        if !matches!(c.ty.0.kind, A2TypeKind::Primitive(PrimKind::Bool)) { return Err(err!(codes::TYPE_MISMATCH, loc, "ternary condition must be bool")) }
        let tv = self.elaborate_expr(scope, t, expected)?;
        let fv = self.elaborate_expr(scope, f, Some(tv.ty))?;
        if tv.ty != fv.ty { return Err(err!(codes::TYPE_MISMATCH, loc, "ternary branches have different types ({} vs {})", tv.ty, fv.ty)) }
        Ok(Expr { kind: ExprKind::Ternary { cond: Box::new(c), t: Box::new(tv), f: Box::new(fv) }, location: loc, ty: tv.ty, is_lvalue: false, is_const: false })
      }
      A1ExprKind::Sizeof { ty, expr } => {
        let t = if let Some(t) = ty { self.b.convert_type(self.home, t)? } else {
          self.elaborate_expr(scope, expr.as_ref().expect("sizeof has a type or expr"), None)?.ty
        };
        Ok(Expr { kind: ExprKind::Sizeof(t), location: loc, ty: self.b.pool.primitive(PrimKind::I32, self.b.arch), is_lvalue: false, is_const: true })
      }
      A1ExprKind::Len(inner) => {
        let i = self.elaborate_expr(scope, inner, None)?;
        if !i.ty.is_array() && !i.ty.is_slice() { return Err(err!(codes::BAD_OPERAND, loc, "len() requires an array or slice")) }
        Ok(Expr { kind: ExprKind::Len(Box::new(i)), location: loc, ty: self.b.pool.primitive(PrimKind::I32, self.b.arch), is_lvalue: false, is_const: false })
      }
      A1ExprKind::Cast { ty, expr } => {
        let t = self.b.convert_type(self.home, ty)?;
        let x = self.elaborate_expr(scope, expr, None)?;
        let ok = (t.is_numeric() && x.ty.is_numeric())
          || (t.is_pointer() && x.ty.is_pointer())
          || (t.is_pointer() && x.ty.is_integer())
          || (t.is_integer() && x.ty.is_pointer());
        if !ok { return Err(err!(codes::BAD_OPERAND, loc, "cannot cast {} to {}", x.ty, t)) }
        Ok(Expr { kind: ExprKind::Cast { ty: t, expr: Box::new(x) }, location: loc, ty: t, is_lvalue: false, is_const: false })
      }
      A1ExprKind::Make { ptr, count } => {
        let p = self.elaborate_expr(scope, ptr, None)?;
        let c = self.elaborate_expr(scope, count, None)?;
        let pointee = p.ty.pointee().ok_or_else(|| err!(codes::BAD_OPERAND, loc, "make() requires a non-void pointer"))?;
        if pointee.is_void() { return Err(err!(codes::VOID_TYPE, loc, "make() requires a non-void pointer")) }
        if !c.ty.is_integer() { return Err(err!(codes::BAD_OPERAND, loc, "make() count must be an integer")) }
        let ty = self.b.pool.slice(pointee, self.b.arch);
        Ok(Expr { kind: ExprKind::Make { ptr: Box::new(p), count: Box::new(c) }, location: loc, ty, is_lvalue: false, is_const: false })
      }
      A1ExprKind::Call { callee, args } => self.elaborate_call(scope, callee, args, loc),
    }
  }

  fn zero(&self, loc: Location) -> Expr<'a> {
    Expr { kind: ExprKind::Literal(Literal::Int(0)), location: loc, ty: self.b.pool.primitive(PrimKind::I32, self.b.arch), is_lvalue: false, is_const: true }
  }

  fn elaborate_literal(&self, l: Literal, loc: Location, expected: Option<A2Type<'a>>) -> Result<Expr<'a>, Diag> {
    let ty = match &l {
      Literal::Bool(_) => self.b.pool.primitive(PrimKind::Bool, self.b.arch),
      // A bare integer/float literal defaults to i64/f64, but when the
      // context expects a narrower numeric primitive and the value fits,
      // it's typed there directly instead — this is how `add(1, 2)` binds
      // `1`'s type to the declared `i32` parameter without a `cast`.
      Literal::Int(v) => match expected.map(|t| &t.0.kind) {
        Some(&A2TypeKind::Primitive(p)) if p.is_integer() && p.int_fits(*v) => self.b.pool.primitive(p, self.b.arch),
        _ => self.b.pool.primitive(PrimKind::I64, self.b.arch),
      },
      Literal::Float(_) => match expected.map(|t| &t.0.kind) {
        Some(&A2TypeKind::Primitive(p)) if p.is_float() => self.b.pool.primitive(p, self.b.arch),
        _ => self.b.pool.primitive(PrimKind::F64, self.b.arch),
      },
      // A string literal in slice position types as the expected slice;
      // elsewhere it stays a plain pointer-like literal (spec.md §4.6
      // "String literals" — A2 just records the eventual type, A3 does
      // the actual `make()` lowering).
      Literal::Str(_) => expected.filter(|t| t.is_slice()).unwrap_or_else(|| self.b.pool.slice(self.b.pool.primitive(PrimKind::U8, self.b.arch), self.b.arch)),
      Literal::Nullptr => expected.filter(|t| t.is_pointer()).unwrap_or_else(|| self.b.pool.pointer(self.b.pool.primitive(PrimKind::Void, self.b.arch), self.b.arch)),
      Literal::None => self.b.pool.primitive(PrimKind::Void, self.b.arch),
    };
    Ok(Expr { kind: ExprKind::Literal(l), location: loc, ty, is_lvalue: false, is_const: true })
  }

  fn elaborate_literal_data(&self, scope: ScopeId, d: &a1::LiteralData, loc: Location, expected: Option<A2Type<'a>>) -> Result<Expr<'a>, Diag> {
    let ty = expected.ok_or_else(|| err!(codes::TYPE_MISMATCH, loc, "aggregate literal needs a target type"))?;
    let elements = if let Some(elem_ty) = ty.elem() {
      d.elements.iter().map(|el| self.elaborate_expr(scope, el, Some(elem_ty))).collect::<Result<Vec<_>, _>>()?
    } else if ty.is_struct() {
      let A2TypeKind::Struct { mod_uname, name } = &ty.0.kind else { unreachable!() };
      let (_, sdecl) = self.b.struct_members(mod_uname, name).ok_or_else(|| err!(codes::UNKNOWN_TYPE_NAME, loc, "unknown struct '{name}'"))?;
      d.elements.iter().zip(sdecl.members.iter()).map(|(el, m)| {
        let mty = self.b.convert_type(self.b.module_by_uname(mod_uname).expect("struct module"), &m.ty)?;
        self.elaborate_expr(scope, el, Some(mty))
      }).collect::<Result<Vec<_>, _>>()?
    } else {
      return Err(err!(codes::TYPE_MISMATCH, loc, "aggregate literal target must be an array or struct type"));
    };
    Ok(Expr { kind: ExprKind::LiteralData(elements), location: loc, ty, is_lvalue: false, is_const: false })
  }

  fn elaborate_name(&self, scope: ScopeId, n: &str, loc: Location) -> Result<Expr<'a>, Diag> {
    if let Some(id) = self.home.lookup(scope, n) {
      return self.name_expr_for_decl(self.home, id, n, loc, false);
    }
    Err(err!(codes::UNKNOWN_NAME, loc, "undefined name '{n}'"))
  }

  fn name_expr_for_decl(&self, home: &'m A1Module, id: DeclId, name: &str, loc: Location, cross_module: bool) -> Result<Expr<'a>, Diag> {
    if cross_module && !is_exported_name(name) {
      return Err(err!(codes::NOT_EXPORTED, loc, "'{name}' is not exported from '{}'", home.uname));
    }
    match &home.decls[id] {
      A1Decl::Var(v) => {
        let ty = self.b.convert_type(home, &v.ty)?;
        Ok(Expr { kind: ExprKind::VarName(name.to_owned()), location: loc, ty, is_lvalue: !v.flags.contains(VarFlags::DEFINE), is_const: v.flags.contains(VarFlags::CONST) })
      }
      A1Decl::Func(f) => {
        let ret = self.b.convert_type(home, &f.ret)?;
        let params = f.params.iter().map(|(_, t)| self.b.convert_type(home, t)).collect::<Result<Vec<_>, _>>()?;
        let ty = self.b.pool.function(ret, params, f.is_vaarg, self.b.arch);
        Ok(Expr { kind: ExprKind::FuncName { mod_uname: home.uname.clone(), name: name.to_owned() }, location: loc, ty, is_lvalue: false, is_const: true })
      }
      A1Decl::Struct(s) => {
        let ty = self.b.pool.structure(home.uname.clone(), s.name.clone(), s.struct_size, s.struct_align);
        Ok(Expr { kind: ExprKind::StructName { mod_uname: home.uname.clone(), name: name.to_owned() }, location: loc, ty, is_lvalue: false, is_const: true })
      }
      A1Decl::Enum(e) => {
        let ty = self.b.pool.enumeration(home.uname.clone(), e.name.clone(), i32::from(e.enum_size.unwrap_or(4)), i32::from(e.enum_size.unwrap_or(4)));
        Ok(Expr { kind: ExprKind::EnumName { mod_uname: home.uname.clone(), name: name.to_owned() }, location: loc, ty, is_lvalue: false, is_const: true })
      }
      _ => Err(err!(codes::UNKNOWN_NAME, loc, "'{name}' does not name a value")),
    }
  }

  fn elaborate_member(&self, scope: ScopeId, base: &A1Expr, field: &str, loc: Location) -> Result<Expr<'a>, Diag> {
    // Module import: `alias.member`.
    if let A1ExprKind::Name(n) = &base.kind {
      if self.home.lookup(scope, n).is_none() {
        if let Some(target_uname) = self.home.decls.iter().find_map(|d| match d {
          A1Decl::Include(inc) if inc.alias.as_deref() == Some(n.as_str()) => inc.target_uname.clone(),
          _ => None,
        }) {
          let target = self.b.module_by_uname(&target_uname)
            .ok_or_else(|| err!(codes::UNKNOWN_INCLUDE, loc, "include target '{target_uname}' not found"))?;
          let &id = target.name_index.get(field).ok_or_else(|| err!(codes::UNKNOWN_MEMBER, loc, "'{field}' not found in '{n}'"))?;
          return self.name_expr_for_decl(target, id, field, loc, true);
        }
      }
    }

    let b = self.elaborate_expr(scope, base, None)?;
    match &b.kind {
      ExprKind::StructName { mod_uname, name } => {
        let (_, f) = self.b.find_method(mod_uname, name, field).ok_or_else(|| err!(codes::UNKNOWN_MEMBER, loc, "no method '{field}' on struct '{name}'"))?;
        let fm = self.b.module_by_uname(mod_uname).expect("struct module");
        let ret = self.b.convert_type(fm, &f.ret)?;
        let params = f.params.iter().map(|(_, t)| self.b.convert_type(fm, t)).collect::<Result<Vec<_>, _>>()?;
        let ty = self.b.pool.function(ret, params, f.is_vaarg, self.b.arch);
        Ok(Expr { kind: ExprKind::FuncName { mod_uname: mod_uname.clone(), name: format!("{name}.{field}") }, location: loc, ty, is_lvalue: false, is_const: true })
      }
      ExprKind::EnumName { mod_uname, name } => {
        let e = self.b.enum_members(mod_uname, name).ok_or_else(|| err!(codes::UNKNOWN_TYPE_NAME, loc, "unknown enum '{name}'"))?;
        let (_, value) = e.members.iter().find(|(mn, _)| mn == field).ok_or_else(|| err!(codes::UNKNOWN_MEMBER, loc, "enum '{name}' has no member '{field}'"))?;
        Ok(Expr { kind: ExprKind::Literal(Literal::Int(*value)), location: loc, ty: b.ty, is_lvalue: false, is_const: true })
      }
      _ if b.ty.is_struct() => {
        let A2TypeKind::Struct { mod_uname, name } = &b.ty.0.kind else { unreachable!() };
        let (home, s) = self.b.struct_members(mod_uname, name).ok_or_else(|| err!(codes::UNKNOWN_TYPE_NAME, loc, "unknown struct '{name}'"))?;
        let member = s.members.iter().find(|m| m.name == field).ok_or_else(|| err!(codes::UNKNOWN_MEMBER, loc, "struct '{name}' has no member '{field}'"))?;
        let ty = self.b.convert_type(home, &member.ty)?;
        let is_lvalue = b.is_lvalue;
        Ok(Expr { kind: ExprKind::Member { base: Box::new(b), field: field.to_owned(), arrow: false }, location: loc, ty, is_lvalue, is_const: false })
      }
      _ if b.ty.is_pointer() && b.ty.pointee().is_some_and(A2Type::is_struct) => {
        let pointee = b.ty.pointee().expect("checked above");
        let A2TypeKind::Struct { mod_uname, name } = &pointee.0.kind else { unreachable!() };
        let (home, s) = self.b.struct_members(mod_uname, name).ok_or_else(|| err!(codes::UNKNOWN_TYPE_NAME, loc, "unknown struct '{name}'"))?;
        let member = s.members.iter().find(|m| m.name == field).ok_or_else(|| err!(codes::UNKNOWN_MEMBER, loc, "struct '{name}' has no member '{field}'"))?;
        let ty = self.b.convert_type(home, &member.ty)?;
        Ok(Expr { kind: ExprKind::Member { base: Box::new(b), field: field.to_owned(), arrow: true }, location: loc, ty, is_lvalue: true, is_const: false })
      }
      _ => Err(err!(codes::TYPE_MISMATCH, loc, "'{}' has no member '{field}'", b.ty)),
    }
  }

  fn elaborate_unary(&self, scope: ScopeId, op: UnOp, operand: &A1Expr, loc: Location) -> Result<Expr<'a>, Diag> {
    let x = self.elaborate_expr(scope, operand, None)?;
    let (ty, is_lvalue) = match op {
      UnOp::Plus | UnOp::Neg => {
        if !x.ty.is_numeric() { return Err(err!(codes::BAD_OPERAND, loc, "unary {} requires a numeric operand", op.keyword())) }
        (x.ty, false)
      }
      UnOp::BitNot => {
        if !x.ty.is_integer() { return Err(err!(codes::BAD_OPERAND, loc, "~ requires an integer operand")) }
        (x.ty, false)
      }
      UnOp::Not => {
        if !matches!(x.ty.0.kind, A2TypeKind::Primitive(PrimKind::Bool)) { return Err(err!(codes::BAD_OPERAND, loc, "! requires a bool operand")) }
        (x.ty, false)
      }
      UnOp::Addr => {
        if !x.is_lvalue { return Err(err!(codes::NOT_LVALUE, loc, "& requires an lvalue")) }
        (self.b.pool.pointer(x.ty, self.b.arch), false)
      }
      UnOp::Deref => {
        let pointee = x.ty.pointee().ok_or_else(|| err!(codes::BAD_OPERAND, loc, "* requires a pointer operand"))?;
        if pointee.is_void() { return Err(err!(codes::VOID_TYPE, loc, "cannot dereference a void pointer")) }
        (pointee, true)
      }
    };
    Ok(Expr { kind: ExprKind::Unary { op, operand: Box::new(x) }, location: loc, ty, is_lvalue, is_const: false })
  }

  fn elaborate_binary(&self, scope: ScopeId, op: BinOp, lhs: &A1Expr, rhs: &A1Expr, loc: Location) -> Result<Expr<'a>, Diag> {
    let l = self.elaborate_expr(scope, lhs, None)?;
    let r = self.elaborate_expr(scope, rhs, Some(l.ty))?;
    let bool_ty = self.b.pool.primitive(PrimKind::Bool, self.b.arch);

    let ty = match op {
      BinOp::Add | BinOp::Sub => {
        if l.ty.is_pointer() && r.ty.is_integer() { l.ty }
        else if op == BinOp::Add && l.ty.is_integer() && r.ty.is_pointer() { r.ty }
        else if l.ty.is_numeric() && l.ty == r.ty { l.ty }
        else { return Err(err!(codes::BAD_OPERAND, loc, "{} accepts matching numeric operands, or (ptr, int)", op.keyword())) }
      }
      BinOp::Mul | BinOp::Div => {
        if l.ty.is_numeric() && l.ty == r.ty { l.ty } else { return Err(err!(codes::BAD_OPERAND, loc, "{} requires matching numeric operands", op.keyword())) }
      }
      BinOp::Mod => {
        if l.ty.is_integer() && l.ty == r.ty { l.ty } else { return Err(err!(codes::BAD_OPERAND, loc, "% requires matching integer operands")) }
      }
      BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitXor | BinOp::BitOr => {
        if l.ty.is_integer() && r.ty.is_integer() && l.ty == r.ty { l.ty } else { return Err(err!(codes::BAD_OPERAND, loc, "{} requires matching integer operands", op.keyword())) }
      }
      BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
        if l.ty.is_numeric() && l.ty == r.ty { bool_ty } else { return Err(err!(codes::BAD_OPERAND, loc, "{} requires matching numeric operands", op.keyword())) }
      }
      BinOp::Eq | BinOp::Ne => {
        if l.ty.is_array() || l.ty.is_slice() || l.ty.is_struct() { return Err(err!(codes::BAD_OPERAND, loc, "arrays, slices, and structs may not be compared")) }
        if l.ty == r.ty { bool_ty } else { return Err(err!(codes::TYPE_MISMATCH, loc, "{} requires matching operand types", op.keyword())) }
      }
      BinOp::And | BinOp::Or => {
        if matches!(l.ty.0.kind, A2TypeKind::Primitive(PrimKind::Bool)) && matches!(r.ty.0.kind, A2TypeKind::Primitive(PrimKind::Bool)) { bool_ty }
        else { return Err(err!(codes::BAD_OPERAND, loc, "{} requires bool operands", op.keyword())) }
      }
    };
    Ok(Expr { kind: ExprKind::Binary { op, lhs: Box::new(l), rhs: Box::new(r) }, location: loc, ty, is_lvalue: false, is_const: false })
  }

  fn elaborate_call(&self, scope: ScopeId, callee: &A1Expr, args: &[A1Expr], loc: Location) -> Result<Expr<'a>, Diag> {
    if let A1ExprKind::Member { base, field } = &callee.kind {
      // Distinguish `Struct.method(...)` (no implicit receiver) from
      // `instance.method(...)` (receiver auto-inserted) per spec.md §4.5
      // "Call resolution".
      let base_elab = self.elaborate_expr(scope, base, None)?;
      if let ExprKind::StructName { mod_uname, name } = &base_elab.kind {
        let (fm, f) = self.b.find_method(mod_uname, name, field).ok_or_else(|| err!(codes::UNKNOWN_MEMBER, loc, "no method '{field}' on struct '{name}'"))?;
        let params = f.params.iter().map(|(_, t)| self.b.convert_type(fm, t)).collect::<Result<Vec<_>, _>>()?;
        let ret = self.b.convert_type(fm, &f.ret)?;
        let arg_exprs = self.elaborate_args(scope, args, &params, f.is_vaarg, loc)?;
        let callee_expr = Expr { kind: ExprKind::FuncName { mod_uname: mod_uname.clone(), name: format!("{name}.{field}") }, location: loc,
          ty: self.b.pool.function(ret, params, f.is_vaarg, self.b.arch), is_lvalue: false, is_const: true };
        return Ok(Expr { kind: ExprKind::Call { callee: Box::new(callee_expr), args: arg_exprs, fptr: false }, location: loc, ty: ret, is_lvalue: false, is_const: false });
      }
      if base_elab.ty.is_struct() || (base_elab.ty.is_pointer() && base_elab.ty.pointee().is_some_and(A2Type::is_struct)) {
        let struct_ty = if base_elab.ty.is_struct() { base_elab.ty } else { base_elab.ty.pointee().expect("checked above") };
        let A2TypeKind::Struct { mod_uname, name } = &struct_ty.0.kind else { unreachable!() };
        let (fm, f) = self.b.find_method(mod_uname, name, field).ok_or_else(|| err!(codes::UNKNOWN_MEMBER, loc, "no method '{field}' on struct '{name}'"))?;
        let params = f.params.iter().map(|(_, t)| self.b.convert_type(fm, t)).collect::<Result<Vec<_>, _>>()?;
        let ret = self.b.convert_type(fm, &f.ret)?;
        let receiver = if base_elab.ty.is_struct() {
          if !base_elab.is_lvalue { return Err(err!(codes::NOT_LVALUE, loc, "method receiver must be an lvalue to take its address")) }
          let ptr_ty = self.b.pool.pointer(base_elab.ty, self.b.arch);
          Expr { kind: ExprKind::Unary { op: UnOp::Addr, operand: Box::new(base_elab) }, location: loc, ty: ptr_ty, is_lvalue: false, is_const: false }
        } else { base_elab };
        let rest = params.get(1..).unwrap_or(&[]);
        let mut arg_exprs = vec![receiver];
        arg_exprs.extend(self.elaborate_args(scope, args, rest, f.is_vaarg, loc)?);
        let callee_expr = Expr { kind: ExprKind::FuncName { mod_uname: mod_uname.clone(), name: format!("{name}.{field}") }, location: loc,
          ty: self.b.pool.function(ret, params, f.is_vaarg, self.b.arch), is_lvalue: false, is_const: true };
        return Ok(Expr { kind: ExprKind::Call { callee: Box::new(callee_expr), args: arg_exprs, fptr: false }, location: loc, ty: ret, is_lvalue: false, is_const: false });
      }
      // Fall through: cross-module `module.func(...)`.
      let member = self.elaborate_member(scope, base, field, loc)?;
      return self.finish_call(member, args, scope, loc);
    }

    let callee_expr = self.elaborate_expr(scope, callee, None)?;
    self.finish_call(callee_expr, args, scope, loc)
  }

  fn finish_call(&self, callee_expr: Expr<'a>, args: &[A1Expr], scope: ScopeId, loc: Location) -> Result<Expr<'a>, Diag> {
    let A2TypeKind::Function { ret, params, vararg } = &callee_expr.ty.0.kind else {
      return Err(err!(codes::TYPE_MISMATCH, loc, "callee is not a function"));
    };
    let (ret, params, vararg) = (*ret, params.clone(), *vararg);
    let fptr = !matches!(callee_expr.kind, ExprKind::FuncName { .. });
    let arg_exprs = self.elaborate_args(scope, args, &params, vararg, loc)?;
    Ok(Expr { kind: ExprKind::Call { callee: Box::new(callee_expr), args: arg_exprs, fptr }, location: loc, ty: ret, is_lvalue: false, is_const: false })
  }

  fn elaborate_args(&self, scope: ScopeId, args: &[A1Expr], params: &[A2Type<'a>], vararg: bool, loc: Location) -> Result<Vec<Expr<'a>>, Diag> {
    if vararg {
      if args.len() < params.len() { return Err(err!(codes::WRONG_ARITY, loc, "expected at least {} argument(s), got {}", params.len(), args.len())) }
    } else if args.len() != params.len() {
      return Err(err!(codes::WRONG_ARITY, loc, "expected {} argument(s), got {}", params.len(), args.len()));
    }
    // Fixed parameters are checked against their declared type; any trailing
    // variadic arguments (`EitherOrBoth::Left`) elaborate with no expectation.
    use itertools::{EitherOrBoth, Itertools};
    let mut out = Vec::with_capacity(args.len());
    for (i, pair) in args.iter().zip_longest(params.iter()).enumerate() {
      let (a, expected) = match pair {
        EitherOrBoth::Both(a, p) => (a, Some(*p)),
        EitherOrBoth::Left(a) => (a, None),
        EitherOrBoth::Right(_) => unreachable!("arity already checked above"),
      };
      let elab = self.elaborate_expr(scope, a, expected)?;
      if let Some(p) = expected {
        if elab.ty != p { return Err(err!(codes::TYPE_MISMATCH, loc, "argument {} has type {}, expected {}", i + 1, elab.ty, p)) }
      }
      out.push(elab);
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::provider::MapProvider;
  use crate::testutil::TestLexer;
  use crate::Driver;

  /// Parses, runs template instantiation, then A2-builds `src`, returning
  /// the first error. Most accept/reject rules are easiest to exercise as
  /// a single-module program that's otherwise well formed except for the
  /// one rule under test.
  fn build_err(src: &str) -> Diag {
    let mut map = std::collections::HashMap::new();
    map.insert(std::path::PathBuf::from("m.nc"), src.to_owned());
    let mut d = Driver::new(MapProvider(map), TestLexer, Config::default());
    d.compile_root(std::path::Path::new("m.nc")).unwrap();
    crate::a1ext::Ext::new(&mut d).run().unwrap();
    let arena = typed_arena::Arena::new();
    let pool = TypePool::new(&arena);
    let arch = d.config.arch.bytes();
    Builder::new(&pool, arch, &d.modules).build_all().unwrap_err()
  }

  #[test]
  fn calling_with_wrong_arity_is_rejected() {
    let src = "i32 add(i32 a, i32 b) { return a + b; } i32 main() { return add(1); }";
    assert_eq!(build_err(src).code, codes::WRONG_ARITY);
  }

  #[test]
  fn calling_an_undefined_function_is_rejected() {
    let src = "i32 main() { return missing(1, 2); }";
    assert_eq!(build_err(src).code, codes::UNKNOWN_NAME);
  }

  #[test]
  fn accessing_an_undeclared_struct_member_is_rejected() {
    let src = "struct S { i32 x; } i32 main() { S s; return s.nope; }";
    assert_eq!(build_err(src).code, codes::UNKNOWN_MEMBER);
  }

  #[test]
  fn if_condition_must_be_bool() {
    let src = "i32 main() { if (1) { return 0; } return 1; }";
    assert_eq!(build_err(src).code, codes::TYPE_MISMATCH);
  }

  #[test]
  fn argument_type_mismatch_is_rejected() {
    let src = "i32 takes_bool(bool b) { return 0; } i32 main() { return takes_bool(1); }";
    assert_eq!(build_err(src).code, codes::TYPE_MISMATCH);
  }

  #[test]
  fn struct_member_access_resolves_to_the_members_declared_type() {
    let src = "struct S { i32 x; bool y; } i32 main() { S s; return s.x; }";
    let mut map = std::collections::HashMap::new();
    map.insert(std::path::PathBuf::from("m.nc"), src.to_owned());
    let mut d = Driver::new(MapProvider(map), TestLexer, Config::default());
    d.compile_root(std::path::Path::new("m.nc")).unwrap();
    crate::a1ext::Ext::new(&mut d).run().unwrap();
    let arena = typed_arena::Arena::new();
    let pool = TypePool::new(&arena);
    let arch = d.config.arch.bytes();
    let modules = Builder::new(&pool, arch, &d.modules).build_all().unwrap();
    let main = modules[0].decls.iter().find_map(|decl| match decl {
      Decl::Func(f) if f.name == "main" => Some(f),
      _ => None,
    }).unwrap();
    let ret_stmt = modules[0].scopes[main.body.into_usize()].body.iter().find_map(|s| match &s.kind {
      StmtKind::Return(Some(e)) => Some(e),
      _ => None,
    }).unwrap();
    assert!(ret_stmt.ty.is_integer());
  }

  #[test]
  fn integer_literal_argument_elaborates_at_the_declared_parameter_type() {
    let src = "i32 add(i32 a, i32 b) { return a + b; } i32 main() { return add(1, 2); }";
    let mut map = std::collections::HashMap::new();
    map.insert(std::path::PathBuf::from("m.nc"), src.to_owned());
    let mut d = Driver::new(MapProvider(map), TestLexer, Config::default());
    d.compile_root(std::path::Path::new("m.nc")).unwrap();
    crate::a1ext::Ext::new(&mut d).run().unwrap();
    let arena = typed_arena::Arena::new();
    let pool = TypePool::new(&arena);
    let arch = d.config.arch.bytes();
    let modules = Builder::new(&pool, arch, &d.modules).build_all().unwrap();
    let main = modules[0].decls.iter().find_map(|decl| match decl {
      Decl::Func(f) if f.name == "main" => Some(f),
      _ => None,
    }).unwrap();
    let ret_stmt = modules[0].scopes[main.body.into_usize()].body.iter().find_map(|s| match &s.kind {
      StmtKind::Return(Some(e)) => Some(e),
      _ => None,
    }).unwrap();
    let ExprKind::Call { args, .. } = &ret_stmt.kind else { panic!("expected a call expression") };
    assert!(args.iter().all(|a| matches!(a.ty.0.kind, A2TypeKind::Primitive(PrimKind::I32))), "expected both arguments typed i32, got {args:?}");
  }

  #[test]
  fn narrow_integer_literal_initializer_is_accepted() {
    let src = "i32 main() { i8 x = 5; return x; }";
    let mut map = std::collections::HashMap::new();
    map.insert(std::path::PathBuf::from("m.nc"), src.to_owned());
    let mut d = Driver::new(MapProvider(map), TestLexer, Config::default());
    d.compile_root(std::path::Path::new("m.nc")).unwrap();
    crate::a1ext::Ext::new(&mut d).run().unwrap();
    let arena = typed_arena::Arena::new();
    let pool = TypePool::new(&arena);
    let arch = d.config.arch.bytes();
    Builder::new(&pool, arch, &d.modules).build_all().unwrap();
  }

  #[test]
  fn initializer_type_mismatch_is_rejected() {
    let src = "i32 main() { bool x = 5; return x; }";
    assert_eq!(build_err(src).code, codes::TYPE_MISMATCH);
  }
}
