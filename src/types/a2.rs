//! The canonical, name-resolved AST (spec.md §3-4.5). Types are pool
//! interned in a `typed_arena::Arena`, the usual arena-interning idiom for
//! hash-consed type references in a typed IR: here the interning lives in
//! [`TypePool`] and two structurally equal types resolve to the same
//! `&'a A2TypeData` (spec.md §3 invariant, §8 property 3).

use std::cell::RefCell;
use hashbrown::HashMap;
use smallvec::SmallVec;
use typed_arena::Arena;

use crate::literal::Literal;
use crate::span::Location;
use crate::types::{AssignOp, BinOp, PrimKind, UnOp};
use crate::types::a1::{DeclId, ScopeId};

// ------------------------------------------------------------ type pool --

#[derive(Copy, Clone, Debug)]
pub struct A2Type<'a>(pub &'a A2TypeData<'a>);

impl<'a> PartialEq for A2Type<'a> {
  fn eq(&self, other: &Self) -> bool { std::ptr::eq(self.0, other.0) }
}
impl<'a> Eq for A2Type<'a> {}
impl<'a> std::hash::Hash for A2Type<'a> {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) { (self.0 as *const A2TypeData<'a>).hash(state) }
}

#[derive(Debug)]
pub struct A2TypeData<'a> {
  pub kind: A2TypeKind<'a>,
  pub size: i32,
  pub align: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum A2TypeKind<'a> {
  Primitive(PrimKind),
  Pointer(A2Type<'a>),
  Array(A2Type<'a>, i64),
  Slice(A2Type<'a>),
  Function { ret: A2Type<'a>, params: Vec<A2Type<'a>>, vararg: bool },
  /// `(modUname, name)` per spec.md §3 invariants: struct/enum equality
  /// is the pair, not a local name alone.
  Struct { mod_uname: String, name: String },
  Enum { mod_uname: String, name: String },
}

impl<'a> A2Type<'a> {
  #[must_use] pub fn is_void(self) -> bool { matches!(self.0.kind, A2TypeKind::Primitive(PrimKind::Void)) }
  #[must_use] pub fn is_pointer(self) -> bool { matches!(self.0.kind, A2TypeKind::Pointer(_)) }
  #[must_use] pub fn is_array(self) -> bool { matches!(self.0.kind, A2TypeKind::Array(..)) }
  #[must_use] pub fn is_slice(self) -> bool { matches!(self.0.kind, A2TypeKind::Slice(_)) }
  #[must_use] pub fn is_struct(self) -> bool { matches!(self.0.kind, A2TypeKind::Struct { .. }) }

  #[must_use] pub fn is_numeric(self) -> bool {
    matches!(self.0.kind, A2TypeKind::Primitive(p) if p.is_numeric())
  }

  #[must_use] pub fn is_integer(self) -> bool {
    matches!(self.0.kind, A2TypeKind::Primitive(p) if p.is_integer())
  }

  #[must_use] pub fn is_float(self) -> bool {
    matches!(self.0.kind, A2TypeKind::Primitive(p) if p.is_float())
  }

  #[must_use] pub fn pointee(self) -> Option<A2Type<'a>> {
    if let A2TypeKind::Pointer(t) = self.0.kind { Some(t) } else { None }
  }

  #[must_use] pub fn elem(self) -> Option<A2Type<'a>> {
    match self.0.kind {
      A2TypeKind::Array(t, _) | A2TypeKind::Slice(t) => Some(t),
      _ => None,
    }
  }
}

impl std::fmt::Display for A2Type<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self.0.kind {
      A2TypeKind::Primitive(p) => write!(f, "{}", p.keyword()),
      A2TypeKind::Pointer(t) => write!(f, "{t}*"),
      A2TypeKind::Array(t, n) => write!(f, "{t}[{n}]"),
      A2TypeKind::Slice(t) => write!(f, "{t}[]"),
      A2TypeKind::Function { ret, params, .. } => {
        write!(f, "{ret}(")?;
        for (i, p) in params.iter().enumerate() {
          if i > 0 { write!(f, ",")? }
          write!(f, "{p}")?;
        }
        write!(f, ")")
      }
      A2TypeKind::Struct { mod_uname, name } | A2TypeKind::Enum { mod_uname, name } => write!(f, "{mod_uname}/{name}"),
    }
  }
}

/// Owns the arena backing every `A2Type` produced during one A2 build and
/// the dedup table that makes `find_or_intern` return a stable pointer
/// for structurally-equal kinds.
pub struct TypePool<'a> {
  arena: &'a Arena<A2TypeData<'a>>,
  interned: RefCell<HashMap<A2TypeKind<'a>, A2Type<'a>>>,
}

impl<'a> TypePool<'a> {
  #[must_use] pub fn new(arena: &'a Arena<A2TypeData<'a>>) -> Self {
    Self { arena, interned: RefCell::new(HashMap::new()) }
  }

  pub fn intern(&self, kind: A2TypeKind<'a>, size: i32, align: i32) -> A2Type<'a> {
    if let Some(&t) = self.interned.borrow().get(&kind) { return t }
    let data = self.arena.alloc(A2TypeData { kind: kind.clone(), size, align });
    let t = A2Type(data);
    self.interned.borrow_mut().insert(kind, t);
    t
  }

  pub fn primitive(&self, p: PrimKind, arch: u32) -> A2Type<'a> {
    self.intern(A2TypeKind::Primitive(p), p.size(arch) as i32, p.align(arch) as i32)
  }

  pub fn pointer(&self, pointee: A2Type<'a>, arch: u32) -> A2Type<'a> {
    self.intern(A2TypeKind::Pointer(pointee), arch as i32, arch as i32)
  }

  pub fn slice(&self, elem: A2Type<'a>, arch: u32) -> A2Type<'a> {
    self.intern(A2TypeKind::Slice(elem), (2 * arch) as i32, arch as i32)
  }

  /// `size`/`align` must already be resolved by the caller (array element
  /// size times length, struct alignment, ...); the pool never computes
  /// layout itself (spec.md §4.2's layout algorithm lives in the A1 pass,
  /// A2 only re-derives it for already-sized struct/enum declarations).
  pub fn array(&self, elem: A2Type<'a>, len: i64, size: i32, align: i32) -> A2Type<'a> {
    let _ = (elem, len);
    self.intern(A2TypeKind::Array(elem, len), size, align)
  }

  pub fn function(&self, ret: A2Type<'a>, params: Vec<A2Type<'a>>, vararg: bool, arch: u32) -> A2Type<'a> {
    self.intern(A2TypeKind::Function { ret, params, vararg }, arch as i32, arch as i32)
  }

  pub fn structure(&self, mod_uname: String, name: String, size: i32, align: i32) -> A2Type<'a> {
    self.intern(A2TypeKind::Struct { mod_uname, name }, size, align)
  }

  pub fn enumeration(&self, mod_uname: String, name: String, size: i32, align: i32) -> A2Type<'a> {
    self.intern(A2TypeKind::Enum { mod_uname, name }, size, align)
  }
}

// ------------------------------------------------------------- exprs --

#[derive(Clone, Debug)]
pub enum ExprKind<'a> {
  Literal(Literal),
  LiteralData(Vec<Expr<'a>>),
  /// A local/global variable reference (`var_name` in spec.md §3).
  VarName(String),
  /// A resolved function reference used as a value (function pointer) or
  /// as the callee of a direct call.
  FuncName { mod_uname: String, name: String },
  StructName { mod_uname: String, name: String },
  EnumName { mod_uname: String, name: String },
  Member { base: Box<Expr<'a>>, field: String, arrow: bool },
  Index { base: Box<Expr<'a>>, index: Box<Expr<'a>> },
  Slice { base: Box<Expr<'a>>, lo: Box<Expr<'a>>, hi: Box<Expr<'a>> },
  Unary { op: UnOp, operand: Box<Expr<'a>> },
  Binary { op: BinOp, lhs: Box<Expr<'a>>, rhs: Box<Expr<'a>> },
  Ternary { cond: Box<Expr<'a>>, t: Box<Expr<'a>>, f: Box<Expr<'a>> },
  Sizeof(A2Type<'a>),
  Len(Box<Expr<'a>>),
  Cast { ty: A2Type<'a>, expr: Box<Expr<'a>> },
  Make { ptr: Box<Expr<'a>>, count: Box<Expr<'a>> },
  /// A resolved call: method, named, or function-pointer (spec.md §4.5
  /// "Call resolution"); `fptr` distinguishes the third shape from the
  /// first two, which both end up calling a known `FuncName`.
  Call { callee: Box<Expr<'a>>, args: Vec<Expr<'a>>, fptr: bool },
}

#[derive(Clone, Debug)]
pub struct Expr<'a> {
  pub kind: ExprKind<'a>,
  pub location: Location,
  pub ty: A2Type<'a>,
  pub is_lvalue: bool,
  pub is_const: bool,
}

// --------------------------------------------------------------- stmts --

#[derive(Clone, Debug)]
pub enum StmtKind<'a> {
  RawC(String),
  RawIr(String),
  Expr(Expr<'a>),
  Decl(DeclId),
  Assign { op: AssignOp, lhs: Expr<'a>, rhs: Expr<'a> },
  Return(Option<Expr<'a>>),
  Break(Option<ScopeId>, Option<Expr<'a>>),
  Continue(Option<ScopeId>),
  Scope(ScopeId),
  If { cond: Expr<'a>, then: ScopeId, els: Option<ScopeId> },
  While { cond: Expr<'a>, body: ScopeId },
  Switch { scrutinee: Expr<'a>, cases: Vec<(Vec<Literal>, ScopeId)>, default: Option<ScopeId> },
}

#[derive(Clone, Debug)]
pub struct Stmt<'a> {
  pub kind: StmtKind<'a>,
  pub location: Location,
  pub uid: u64,
  /// Every path out of this statement ends in return/break/continue, or
  /// it is followed by reachable code — the `returnable` property used to
  /// validate function bodies (spec.md §3 invariants).
  pub is_returnable: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Scope<'a> {
  pub parent: Option<ScopeId>,
  pub body: Vec<Stmt<'a>>,
  /// Non-empty only for scopes that own `defer` expressions (spec.md §3).
  pub defers: Vec<Expr<'a>>,
}

// -------------------------------------------------------------- decls --

#[derive(Clone, Debug)]
pub struct StructMember<'a> {
  pub name: String,
  pub ty: A2Type<'a>,
  pub offset: i32,
}

#[derive(Clone, Debug)]
pub struct StructDecl<'a> {
  pub name: String,
  pub members: Vec<StructMember<'a>>,
  pub size: i32,
  pub align: i32,
  pub exported: bool,
  pub methods: HashMap<String, DeclId>,
}

#[derive(Clone, Debug)]
pub struct EnumDecl {
  pub name: String,
  pub members: Vec<(String, i64)>,
  pub size: u8,
  pub exported: bool,
}

#[derive(Clone, Debug)]
pub struct Param<'a> {
  pub name: String,
  pub ty: A2Type<'a>,
}

#[derive(Clone, Debug)]
pub struct FuncDecl<'a> {
  pub name: String,
  pub owner_struct: Option<String>,
  pub params: SmallVec<[Param<'a>; 4]>,
  pub ret: A2Type<'a>,
  pub is_vaarg: bool,
  pub exported: bool,
  pub body: ScopeId,
}

#[derive(Clone, Debug)]
pub struct VarDecl<'a> {
  pub name: String,
  pub ty: A2Type<'a>,
  pub init: Option<Expr<'a>>,
  pub is_define: bool,
  pub is_const: bool,
  pub is_volatile: bool,
  pub is_extern: bool,
  pub is_param: bool,
  pub exported: bool,
}

#[derive(Clone, Debug)]
pub enum Decl<'a> {
  Var(VarDecl<'a>),
  Func(FuncDecl<'a>),
  Struct(StructDecl<'a>),
  Enum(EnumDecl),
  RawC(String),
  RawIr(String),
}

impl<'a> Decl<'a> {
  #[must_use] pub fn name(&self) -> Option<&str> {
    match self {
      Decl::Var(d) => Some(&d.name),
      Decl::Func(d) => Some(&d.name),
      Decl::Struct(d) => Some(&d.name),
      Decl::Enum(d) => Some(&d.name),
      Decl::RawC(_) | Decl::RawIr(_) => None,
    }
  }

  #[must_use] pub fn is_exported(&self) -> bool {
    match self {
      Decl::Var(d) => d.exported,
      Decl::Func(d) => d.exported,
      Decl::Struct(d) => d.exported,
      Decl::Enum(d) => d.exported,
      Decl::RawC(_) | Decl::RawIr(_) => false,
    }
  }
}

/// `Module` per spec.md §3, A2 flavor: read-only once built (§3
/// "Lifecycle"), with the same arena layout as [`crate::types::a1::Module`].
#[derive(Clone, Debug)]
pub struct Module<'a> {
  pub path: std::path::PathBuf,
  pub uname: String,
  pub decls: Vec<Decl<'a>>,
  pub scopes: Vec<Scope<'a>>,
  pub name_index: HashMap<String, DeclId>,
  pub imports: HashMap<String, String>,
}

impl<'a> Module<'a> {
  #[must_use] pub fn find(&self, name: &str) -> Option<DeclId> { self.name_index.get(name).copied() }
}
