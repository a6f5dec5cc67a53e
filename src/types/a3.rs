//! The lowered, backend-facing tree (spec.md §3-4.6). Shapes mirror A2
//! but: enums collapse to their carrying primitive, structs carry only a
//! mangled name, array-returning functions gain a trailing destination
//! parameter, and control flow is jump/state-register based instead of
//! structured `break`/`continue`/`return`.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::literal::Literal;
use crate::span::Location;
use crate::types::{AssignOp, BinOp, PrimKind, UnOp};
use crate::types::a1::ScopeId;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
  Primitive(PrimKind),
  Pointer(Box<TyKind>),
  Array(Box<TyKind>, i64),
  Slice(Box<TyKind>),
  Function { ret: Box<TyKind>, params: Vec<TyKind>, vararg: bool },
  /// A stable mangled name (spec.md §3: "a struct carries only a stable
  /// mangled name" in A3, unlike A2's `(modUname, name)` pair).
  Struct(String),
}

#[derive(Clone, Debug)]
pub struct Ty {
  pub kind: TyKind,
  pub size: i32,
  pub align: i32,
}

impl Ty {
  #[must_use] pub fn is_void(&self) -> bool { matches!(self.kind, TyKind::Primitive(PrimKind::Void)) }
  #[must_use] pub fn is_array(&self) -> bool { matches!(self.kind, TyKind::Array(..)) }
}

/// Distinguishes pointer arithmetic from integer arithmetic once A3 has
/// committed to a representation (spec.md §3: A3 "additionally
/// distinguishes `B_PTR_ADD`/`B_PTR_SUB`").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PtrBinOp { Add, Sub }

#[derive(Clone, Debug)]
pub enum ExprKind {
  Literal(Literal),
  VarName(String),
  FuncName(String),
  Member { base: Box<Expr>, field: String, arrow: bool },
  Index { base: Box<Expr>, index: Box<Expr> },
  Unary { op: UnOp, operand: Box<Expr> },
  Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
  PtrBinary { op: PtrBinOp, ptr: Box<Expr>, int: Box<Expr> },
  Sizeof(Ty),
  Cast { ty: Ty, expr: Box<Expr> },
  /// `make(ptr, count)`, the sole surviving slice constructor after
  /// lowering (spec.md §4.6 "Slicing").
  Make { ptr: Box<Expr>, count: Box<Expr> },
  Call { callee: Box<Expr>, args: Vec<Expr> },
  FptrCall { callee: Box<Expr>, args: Vec<Expr> },
  /// `cond ? t : f` retained as an operator — only when neither branch can
  /// have a side effect (spec.md §4.6 "Ternary"); side-effecting branches
  /// lower to an `If` assigning a temporary instead.
  Ternary { cond: Box<Expr>, t: Box<Expr>, f: Box<Expr> },
}

#[derive(Clone, Debug)]
pub struct Expr {
  pub kind: ExprKind,
  pub location: Location,
  pub ty: Ty,
}

/// A statement materialised ahead of the expression that needed it — the
/// A3 lowerer's "buffer of pre-statements" (spec.md §4.6).
#[derive(Clone, Debug)]
pub enum StmtKind {
  RawC(String),
  RawIr(String),
  Expr(Expr),
  /// A local declaration, inlined directly into the statement stream
  /// rather than referenced by id — A3 is a single straight-line pass with
  /// no forward references to a local, unlike A1/A2's `DeclId` arena.
  Decl(VarDecl),
  /// `dst = src`, lowered further to `Memcpy` when `dst`'s type is an
  /// array (spec.md §3 invariants, §4.6 "Array assignments").
  Assign { lhs: Expr, rhs: Expr },
  Memcpy { dst: Expr, src: Expr, size_hint: i64 },
  Memset { dst: Expr, size_hint: i64 },
  /// Unconditional jump to the labelled scope `target`, carrying the new
  /// value of the per-function `state` register (spec.md §4.6 "Control
  /// jumps"). `None` state means "keep whatever is already there".
  Jump { target: ScopeId, state: Option<i32> },
  /// The per-scope defer trampoline (spec.md §4.6): placed at the tail of
  /// every scope that owns `defer`s, it always runs them when control
  /// reaches this point by falling off the end of the scope normally.
  /// Non-local exits (`return`/`break`/`continue`) instead inline the
  /// relevant enclosing scopes' defers directly at the `Jump` that skips
  /// over this point — the "sequence of goto labels inlined at each scope
  /// exit" alternative spec.md §9 calls out as equivalent. `parent` is
  /// kept for a backend that wants to fold this into a single relay chain
  /// instead.
  DeferTrampoline { defers: Vec<Expr>, parent: Option<ScopeId> },
  Scope(ScopeId),
  If { cond: Expr, then: ScopeId, els: Option<ScopeId> },
  While { cond: Expr, body: ScopeId },
  Switch { scrutinee: Expr, cases: Vec<(Vec<Literal>, ScopeId)>, default: Option<ScopeId> },
}

#[derive(Clone, Debug)]
pub struct Stmt {
  pub kind: StmtKind,
  pub location: Location,
}

#[derive(Clone, Debug, Default)]
pub struct Scope {
  pub parent: Option<ScopeId>,
  pub body: Vec<Stmt>,
  pub defers: Vec<Expr>,
  pub is_loop: bool,
}

#[derive(Clone, Debug)]
pub struct StructMember {
  pub name: String,
  pub ty: Ty,
  pub offset: i32,
}

#[derive(Clone, Debug)]
pub struct StructDecl {
  pub mangled_name: String,
  pub members: Vec<StructMember>,
  pub size: i32,
  pub align: i32,
}

#[derive(Clone, Debug)]
pub struct Param {
  pub name: String,
  pub ty: Ty,
}

#[derive(Clone, Debug)]
pub struct FuncDecl {
  pub name: String,
  pub params: SmallVec<[Param; 4]>,
  /// The trailing destination parameter injected when the A2 return type
  /// was an array (spec.md §3 invariant 4, §4.6 "Types").
  pub array_ret_param: Option<Param>,
  pub ret: Ty,
  pub is_vaarg: bool,
  pub exported: bool,
  pub body: ScopeId,
  /// Declared once per function: carries the non-local-exit depth
  /// (spec.md §4.6 "Control jumps", §9 "state register").
  pub state_var: String,
  /// Declared when the function has a non-void, non-array return.
  pub ret_var: Option<String>,
  pub epilogue: ScopeId,
}

#[derive(Clone, Debug)]
pub struct VarDecl {
  pub name: String,
  pub ty: Ty,
  pub init: Option<Expr>,
  pub is_const: bool,
  pub is_volatile: bool,
  pub is_extern: bool,
  pub exported: bool,
}

#[derive(Clone, Debug)]
pub enum Decl {
  Var(VarDecl),
  Func(FuncDecl),
  Struct(StructDecl),
  RawC(String),
  RawIr(String),
}

impl Decl {
  #[must_use] pub fn name(&self) -> Option<&str> {
    match self {
      Decl::Var(d) => Some(&d.name),
      Decl::Func(d) => Some(&d.name),
      Decl::Struct(d) => Some(&d.mangled_name),
      Decl::RawC(_) | Decl::RawIr(_) => None,
    }
  }
}

#[derive(Clone, Debug)]
pub struct Module {
  pub path: std::path::PathBuf,
  pub uname: String,
  pub decls: Vec<Decl>,
  pub scopes: Vec<Scope>,
  pub name_index: HashMap<String, usize>,
  /// Named temporaries synthesised during lowering, kept for diagnostics
  /// and tests (e.g. big-copy alert locations).
  pub temp_count: u32,
}
