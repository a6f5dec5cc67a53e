//! The syntactic AST (spec.md §3-4.2). Declarations and scopes live in
//! flat per-module arenas indexed by `DeclId`/`ScopeId` — the Rust
//! rendering of the original's parent-pointer node graph, using the same
//! index-newtype-over-`Vec` idiom a dense-index IR typically uses for its
//! id types. Arenas make "deep clone" (required by template
//! instantiation, spec.md §4.4) a plain `#[derive(Clone)]` instead of a
//! pointer-graph walk.

use std::ops::{Index, IndexMut};
use bitflags::bitflags;
use im::HashMap as PHashMap;
use smallvec::SmallVec;

use crate::literal::Literal;
use crate::span::Location;
use crate::types::{AssignOp, BinOp, Intrinsic, PrimKind, UnOp};

macro_rules! arena_id {
  ($name:ident) => {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct $name(pub u32);
    impl $name { #[must_use] pub fn into_usize(self) -> usize { self.0 as usize } }
  };
}

arena_id!(DeclId);
arena_id!(ScopeId);

impl<T> Index<DeclId> for Vec<T> {
  type Output = T;
  fn index(&self, i: DeclId) -> &T { &self[i.into_usize()] }
}
impl<T> Index<ScopeId> for Vec<T> {
  type Output = T;
  fn index(&self, i: ScopeId) -> &T { &self[i.into_usize()] }
}
impl<T> IndexMut<DeclId> for Vec<T> {
  fn index_mut(&mut self, i: DeclId) -> &mut T { &mut self[i.into_usize()] }
}
impl<T> IndexMut<ScopeId> for Vec<T> {
  fn index_mut(&mut self, i: ScopeId) -> &mut T { &mut self[i.into_usize()] }
}

/// Toplevel scope id, always the first entry of `Module::scopes`.
pub const ROOT_SCOPE: ScopeId = ScopeId(0);

// ---------------------------------------------------------------- types --

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum A1TypeKind {
  None,
  Auto,
  Primitive(PrimKind),
  Pointer,
  Array,
  Slice,
  Function,
  /// Struct/enum/template name local to the current module.
  Name,
  /// Imported struct/enum: `inc_name` carries the import alias.
  Foreign,
  /// A1-Ext only: a template parameter reference rewritten to a
  /// module-relative canonical form for instantiation-argument equality
  /// (spec.md §3 invariants, §4.4). `inc_name` is `callerUname` or
  /// `callerUname/originalIncName`.
  TemplateRef,
}

#[derive(Clone, Debug)]
pub struct A1Type {
  pub kind: A1TypeKind,
  pub location: Location,
  pub name: String,
  pub inc_name: String,
  pub direct: Option<Box<A1Type>>,
  pub indirect: Vec<A1Type>,
  pub arr_len: i64,
  pub type_size: i32,
  pub type_align: i32,
}

impl A1Type {
  #[must_use] pub fn none() -> Self {
    Self { kind: A1TypeKind::None, location: Location::NONE, name: String::new(), inc_name: String::new(),
      direct: None, indirect: Vec::new(), arr_len: -1, type_size: -1, type_align: -1 }
  }

  #[must_use] pub fn primitive(p: PrimKind, arch: u32, location: Location) -> Self {
    Self { kind: A1TypeKind::Primitive(p), location, name: p.keyword().to_owned(), inc_name: String::new(),
      direct: None, indirect: Vec::new(), arr_len: -1, type_size: p.size(arch) as i32, type_align: p.align(arch) as i32 }
  }

  #[must_use] pub fn is_void(&self) -> bool { matches!(self.kind, A1TypeKind::Primitive(PrimKind::Void)) }

  #[must_use] pub fn is_resolved(&self) -> bool { self.type_size >= 0 && self.type_align >= 0 }

  /// Structural equality independent of resolution state — used for
  /// canonical-argument comparisons in A1-Ext (spec.md §3 invariants).
  #[must_use] pub fn structural_eq(&self, other: &A1Type) -> bool {
    self.kind == other.kind
      && self.name == other.name
      && self.inc_name == other.inc_name
      && self.arr_len == other.arr_len
      && match (&self.direct, &other.direct) {
        (Some(a), Some(b)) => a.structural_eq(b),
        (None, None) => true,
        _ => false,
      }
      && self.indirect.len() == other.indirect.len()
      && self.indirect.iter().zip(&other.indirect).all(|(a, b)| a.structural_eq(b))
  }
}

impl std::fmt::Display for A1Type {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.kind {
      A1TypeKind::Primitive(_) | A1TypeKind::Name | A1TypeKind::None | A1TypeKind::Auto => write!(f, "{}", self.name),
      A1TypeKind::Foreign | A1TypeKind::TemplateRef => write!(f, "{}.{}", self.inc_name, self.name),
      A1TypeKind::Pointer => write!(f, "{}*", self.direct.as_ref().expect("pointer has direct")),
      A1TypeKind::Array => write!(f, "{}[{}]", self.direct.as_ref().expect("array has direct"), self.arr_len),
      A1TypeKind::Slice => write!(f, "{}[]", self.direct.as_ref().expect("slice has direct")),
      A1TypeKind::Function => {
        write!(f, "{}(", self.direct.as_ref().expect("function has return type"))?;
        for (i, p) in self.indirect.iter().enumerate() {
          if i > 0 { write!(f, ",")? }
          write!(f, "{p}")?;
        }
        write!(f, ")")
      }
    }
  }
}

// ------------------------------------------------------------ literals --

/// Aggregate literal data (array/struct literal), spec.md §3 `Expression`
/// `literal_data`. Index order matches source order; gaps are implicit
/// zero fill (consumed by A3's memset-then-fill lowering, §4.6).
#[derive(Clone, Debug)]
pub struct LiteralData {
  pub elements: Vec<Expr>,
}

// ------------------------------------------------------------- exprs --

#[derive(Clone, Debug)]
pub enum ExprKind {
  Literal(Literal),
  LiteralData(LiteralData),
  Name(String),
  Member { base: Box<Expr>, field: String },
  Index { base: Box<Expr>, index: Box<Expr> },
  Slice { base: Box<Expr>, lo: Option<Box<Expr>>, hi: Option<Box<Expr>> },
  Unary { op: UnOp, operand: Box<Expr> },
  Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
  Ternary { cond: Box<Expr>, t: Box<Expr>, f: Box<Expr> },
  Sizeof { ty: Option<A1Type>, expr: Option<Box<Expr>> },
  Len(Box<Expr>),
  Cast { ty: A1Type, expr: Box<Expr> },
  Make { ptr: Box<Expr>, count: Box<Expr> },
  Call { callee: Box<Expr>, args: Vec<Expr> },
}

#[derive(Clone, Debug)]
pub struct Expr {
  pub kind: ExprKind,
  pub location: Location,
}

impl Expr {
  #[must_use] pub fn new(kind: ExprKind, location: Location) -> Self { Self { kind, location } }

  #[must_use] pub fn lit(v: Literal, location: Location) -> Self { Self::new(ExprKind::Literal(v), location) }

  #[must_use] pub fn intrinsic_keyword(k: Intrinsic) -> &'static str { k.keyword() }
}

// --------------------------------------------------------------- stmts --

#[derive(Clone, Debug)]
pub enum StmtKind {
  RawC(String),
  RawIr(String),
  Expr(Expr),
  Decl(DeclId),
  Assign { op: AssignOp, lhs: Expr, rhs: Expr },
  Return(Option<Expr>),
  Defer(Expr),
  Break(Option<String>, Option<Expr>),
  Continue(Option<String>),
  Fall,
  Scope(ScopeId),
  If { cond: Expr, then: ScopeId, els: Option<ScopeId> },
  While { label: Option<String>, cond: Expr, body: ScopeId },
  For { label: Option<String>, init: Option<Box<Stmt>>, cond: Option<Expr>, step: Option<Box<Stmt>>, body: ScopeId },
  Switch { label: Option<String>, scrutinee: Expr, cases: Vec<(Vec<Literal>, ScopeId)>, default: Option<ScopeId> },
}

#[derive(Clone, Debug)]
pub struct Stmt {
  pub kind: StmtKind,
  pub location: Location,
}

/// A lexical scope: a parent link, the names declared directly within it
/// (for scope-chain lookup, design note §9), and its statement body.
#[derive(Clone, Debug, Default)]
pub struct Scope {
  pub parent: Option<ScopeId>,
  pub names: PHashMap<String, DeclId>,
  pub body: Vec<Stmt>,
  pub label: Option<String>,
}

// -------------------------------------------------------------- decls --

bitflags! {
  #[derive(Copy, Clone, Debug, PartialEq, Eq)]
  pub struct VarFlags: u16 {
    const DEFINE   = 1 << 0;
    const CONST    = 1 << 1;
    const VOLATILE = 1 << 2;
    const EXTERN   = 1 << 3;
    const PARAM    = 1 << 4;
    const EXPORTED = 1 << 5;
  }
}

#[derive(Clone, Debug)]
pub struct VarDecl {
  pub name: String,
  pub ty: A1Type,
  pub init: Option<Expr>,
  pub flags: VarFlags,
  pub location: Location,
}

#[derive(Clone, Debug)]
pub struct FuncDecl {
  pub name: String,
  pub owner_struct: Option<String>,
  pub params: SmallVec<[(String, A1Type); 4]>,
  pub ret: A1Type,
  pub is_vaarg: bool,
  pub exported: bool,
  /// Parameter declarations are inserted as synthetic `var` decls at the
  /// head of this scope's body during pass 3 (spec.md §4.2).
  pub body: ScopeId,
  pub location: Location,
}

#[derive(Clone, Debug)]
pub struct StructMember {
  pub name: String,
  pub ty: A1Type,
  pub offset: i32,
}

#[derive(Clone, Debug)]
pub struct StructDecl {
  pub name: String,
  pub members: Vec<StructMember>,
  pub struct_size: i32,
  pub struct_align: i32,
  pub exported: bool,
  pub location: Location,
}

impl StructDecl {
  #[must_use] pub fn is_sized(&self) -> bool { self.struct_size >= 0 }
}

#[derive(Clone, Debug)]
pub struct EnumMember {
  pub name: String,
  pub expr: Option<Expr>,
  pub value: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct EnumDecl {
  pub name: String,
  pub members: Vec<EnumMember>,
  pub enum_size: Option<u8>,
  pub exported: bool,
  pub location: Location,
}

#[derive(Clone, Debug)]
pub struct TemplateParamDecl {
  pub name: String,
  pub index: u32,
  pub location: Location,
}

#[derive(Clone, Debug)]
pub struct IncludeDecl {
  pub path: String,
  pub alias: Option<String>,
  pub args: Vec<A1Type>,
  /// Filled in once the referenced module is parsed (pass 1) or
  /// instantiated (A1-Ext): the target module's `uname`.
  pub target_uname: Option<String>,
  pub location: Location,
}

#[derive(Clone, Debug)]
pub struct TypedefDecl {
  pub name: String,
  pub ty: A1Type,
  pub exported: bool,
  pub location: Location,
}

#[derive(Clone, Debug)]
pub enum Decl {
  Include(IncludeDecl),
  TemplateParam(TemplateParamDecl),
  Typedef(TypedefDecl),
  Var(VarDecl),
  Func(FuncDecl),
  Struct(StructDecl),
  Enum(EnumDecl),
  RawC(String),
  RawIr(String),
}

impl Decl {
  #[must_use] pub fn name(&self) -> Option<&str> {
    match self {
      Decl::Include(d) => d.alias.as_deref(),
      Decl::TemplateParam(d) => Some(&d.name),
      Decl::Typedef(d) => Some(&d.name),
      Decl::Var(d) => Some(&d.name),
      Decl::Func(d) => Some(&d.name),
      Decl::Struct(d) => Some(&d.name),
      Decl::Enum(d) => Some(&d.name),
      Decl::RawC(_) | Decl::RawIr(_) => None,
    }
  }

  #[must_use] pub fn location(&self) -> Location {
    match self {
      Decl::Include(d) => d.location,
      Decl::TemplateParam(d) => d.location,
      Decl::Typedef(d) => d.location,
      Decl::Var(d) => d.location,
      Decl::Func(d) => d.location,
      Decl::Struct(d) => d.location,
      Decl::Enum(d) => d.location,
      Decl::RawC(_) | Decl::RawIr(_) => Location::NONE,
    }
  }
}

// ------------------------------------------------------------- module --

/// `Module` per spec.md §3: `{ path, uname, code, name->decl index,
/// tmpArgs?, tmpArgsCount, isFinished }`. Declarations and scopes are
/// arena-allocated (see module doc comment) rather than owned trees.
#[derive(Clone, Debug)]
pub struct Module {
  pub path: std::path::PathBuf,
  pub uname: String,
  pub decls: Vec<Decl>,
  pub scopes: Vec<Scope>,
  pub name_index: hashbrown::HashMap<String, DeclId>,
  /// Set once this module is a template instantiation clone (spec.md §4.4).
  pub tmp_args: Option<Vec<A1Type>>,
  pub is_finished: bool,
  /// Positions reserved by pass 1 for pass 3 to revisit (function/variable
  /// bodies skipped on the first pass, spec.md §4.2).
  pub reserved: Vec<ReservedDecl>,
}

/// A toplevel form pass 1 recognised the shape of but deferred parsing.
#[derive(Clone, Debug)]
pub struct ReservedDecl {
  pub token_pos: usize,
  pub is_func: bool,
}

impl Module {
  #[must_use] pub fn new(path: std::path::PathBuf, uname: String) -> Self {
    Self {
      path, uname,
      decls: Vec::new(),
      scopes: vec![Scope::default()],
      name_index: hashbrown::HashMap::new(),
      tmp_args: None,
      is_finished: false,
      reserved: Vec::new(),
    }
  }

  #[must_use] pub fn root(&self) -> ScopeId { ROOT_SCOPE }

  pub fn push_decl(&mut self, scope: ScopeId, decl: Decl) -> DeclId {
    let id = DeclId(u32::try_from(self.decls.len()).expect("too many declarations"));
    if let Some(name) = decl.name() {
      self.scopes[scope.into_usize()].names.insert(name.to_owned(), id);
      if scope == ROOT_SCOPE { self.name_index.insert(name.to_owned(), id); }
    }
    self.decls.push(decl);
    self.scopes[scope.into_usize()].body.push(Stmt { kind: StmtKind::Decl(id), location: self.decls[id.into_usize()].location() });
    id
  }

  pub fn new_scope(&mut self, parent: ScopeId, label: Option<String>) -> ScopeId {
    let id = ScopeId(u32::try_from(self.scopes.len()).expect("too many scopes"));
    self.scopes.push(Scope { parent: Some(parent), label, ..Scope::default() });
    id
  }

  /// Walk the scope chain from `from` outward, returning the first
  /// binding found (innermost shadows outermost, spec.md §5).
  #[must_use] pub fn lookup(&self, from: ScopeId, name: &str) -> Option<DeclId> {
    let mut cur = Some(from);
    while let Some(id) = cur {
      let scope = &self.scopes[id.into_usize()];
      if let Some(&decl) = scope.names.get(name) { return Some(decl) }
      cur = scope.parent;
    }
    None
  }
}
