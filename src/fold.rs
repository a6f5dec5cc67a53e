//! The constant folder (spec.md §4.3). Operates purely on A1 expression
//! trees and the enclosing module's declaration arena; never mutates the
//! tree itself — the A1 parser is the one that replaces a folded subtree
//! with a `literal` node (spec.md §4.2 "After parsing...").

use crate::diag::{codes, err, Diag};
use crate::literal::Literal;
use crate::span::Location;
use crate::types::a1::{Decl, EnumMember, Expr, ExprKind, Module, ScopeId};
use crate::types::{BinOp, UnOp};

/// Looks up a name that folds to a literal: either a `define`d constant
/// visible from `scope` (scope-chain lookup, spec.md §4.3) or an enum
/// member reached through `Enum.Member` (handled separately in
/// [`fold_member`] since it needs the base name too).
fn fold_defined_name(module: &Module, scope: ScopeId, name: &str, arch: u32) -> Option<Literal> {
  let decl_id = module.lookup(scope, name)?;
  match &module.decls[decl_id] {
    Decl::Var(v) if v.flags.contains(crate::types::a1::VarFlags::DEFINE) => {
      v.init.as_ref().and_then(|e| fold(module, scope, e, arch).ok().flatten())
    }
    _ => None,
  }
}

fn fold_member(module: &Module, scope: ScopeId, base: &str, field: &str) -> Option<i64> {
  let decl_id = module.lookup(scope, base)?;
  if let Decl::Enum(e) = &module.decls[decl_id] {
    e.members.iter().find(|m| m.name == field).and_then(|m| m.value)
  } else {
    None
  }
}

/// Attempts to fold `expr` to a [`Literal`]. Returns `Ok(None)` for an
/// unfoldable (but otherwise well-formed) subtree, and `Err` only for a
/// constant-evaluation error that must itself be reported (division by
/// zero, shift out of range, `MIN/-1` overflow — spec.md §4.3, §7).
pub fn fold(module: &Module, scope: ScopeId, expr: &Expr, arch: u32) -> Result<Option<Literal>, Diag> {
  match &expr.kind {
    ExprKind::Literal(l) => Ok(Some(l.clone())),

    ExprKind::Name(n) => Ok(fold_defined_name(module, scope, n, arch)),

    ExprKind::Member { base, field } => {
      if let ExprKind::Name(base_name) = &base.kind {
        Ok(fold_member(module, scope, base_name, field).map(Literal::Int))
      } else {
        Ok(None)
      }
    }

    ExprKind::Unary { op, operand } => {
      let Some(v) = fold(module, scope, operand, arch)? else { return Ok(None) };
      Ok(fold_unary(*op, &v))
    }

    ExprKind::Binary { op, lhs, rhs } => {
      let (Some(a), Some(b)) = (fold(module, scope, lhs, arch)?, fold(module, scope, rhs, arch)?) else { return Ok(None) };
      fold_binary(*op, &a, &b, expr.location)
    }

    ExprKind::Ternary { cond, t, f } => {
      let Some(c) = fold(module, scope, cond, arch)? else { return Ok(None) };
      let Some(cond_b) = c.as_bool() else { return Ok(None) };
      if cond_b { fold(module, scope, t, arch) } else { fold(module, scope, f, arch) }
    }

    ExprKind::Sizeof { ty, expr: sub } => {
      if let Some(ty) = ty {
        Ok(if ty.type_size > 0 { Some(Literal::Int(i64::from(ty.type_size))) } else { None })
      } else if let Some(sub) = sub {
        // `sizeof(literal)`: only reachable once the operand itself folds.
        Ok(fold(module, scope, sub, arch)?.and_then(|v| v.fold_sizeof(arch)).map(Literal::Int))
      } else {
        Ok(None)
      }
    }

    // Everything else (names bound to non-constants, function calls,
    // indexing, aggregate literals, `len`, `cast`, `make`) is never
    // foldable.
    _ => Ok(None),
  }
}

fn fold_unary(op: UnOp, v: &Literal) -> Option<Literal> {
  match (op, v) {
    (UnOp::Plus, Literal::Int(n)) => Some(Literal::Int(*n)),
    (UnOp::Plus, Literal::Float(n)) => Some(Literal::Float(*n)),
    (UnOp::Neg, Literal::Int(n)) => Some(Literal::Int(n.wrapping_neg())),
    // The open question in spec.md §9: `U_MINUS` on a float literal must
    // be reachable directly (the parser folds `-x` as `Neg(x)` and lets
    // the folder handle both int and float operands without coercion).
    (UnOp::Neg, Literal::Float(n)) => Some(Literal::Float(-n)),
    (UnOp::Not, Literal::Bool(b)) => Some(Literal::Bool(!b)),
    (UnOp::BitNot, Literal::Int(n)) => Some(Literal::Int(!n)),
    _ => None,
  }
}

fn fold_binary(op: BinOp, a: &Literal, b: &Literal, loc: Location) -> Result<Option<Literal>, Diag> {
  use BinOp::*;
  Ok(Some(match (op, a, b) {
    (And, Literal::Bool(x), Literal::Bool(y)) => Literal::Bool(*x && *y),
    (Or, Literal::Bool(x), Literal::Bool(y)) => Literal::Bool(*x || *y),

    (Mul, Literal::Int(x), Literal::Int(y)) => Literal::Int(x.wrapping_mul(*y)),
    (Add, Literal::Int(x), Literal::Int(y)) => Literal::Int(x.wrapping_add(*y)),
    (Sub, Literal::Int(x), Literal::Int(y)) => Literal::Int(x.wrapping_sub(*y)),

    (Div, Literal::Int(x), Literal::Int(y)) => {
      if *y == 0 { return Err(err!(codes::DIV_BY_ZERO, loc, "division by zero")) }
      if *x == i64::MIN && *y == -1 { return Err(err!(codes::INT_OVERFLOW, loc, "i64::MIN / -1 overflows")) }
      Literal::Int(x / y)
    }
    (Mod, Literal::Int(x), Literal::Int(y)) => {
      if *y == 0 { return Err(err!(codes::DIV_BY_ZERO, loc, "division by zero")) }
      if *x == i64::MIN && *y == -1 { return Err(err!(codes::INT_OVERFLOW, loc, "i64::MIN % -1 overflows")) }
      Literal::Int(x % y)
    }
    (Div, Literal::Float(x), Literal::Float(y)) => {
      if *y == 0.0 { return Err(err!(codes::DIV_BY_ZERO, loc, "division by zero")) }
      Literal::Float(x / y)
    }

    (Mul, Literal::Float(x), Literal::Float(y)) => Literal::Float(x * y),
    (Add, Literal::Float(x), Literal::Float(y)) => Literal::Float(x + y),
    (Sub, Literal::Float(x), Literal::Float(y)) => Literal::Float(x - y),

    (Shl, Literal::Int(x), Literal::Int(y)) => {
      if !(0..=63).contains(y) { return Err(err!(codes::SHIFT_RANGE, loc, "shift amount {y} out of range [0,63]")) }
      Literal::Int(x.wrapping_shl(*y as u32))
    }
    (Shr, Literal::Int(x), Literal::Int(y)) => {
      if !(0..=63).contains(y) { return Err(err!(codes::SHIFT_RANGE, loc, "shift amount {y} out of range [0,63]")) }
      Literal::Int(x.wrapping_shr(*y as u32))
    }

    (Lt, Literal::Int(x), Literal::Int(y)) => Literal::Bool(x < y),
    (Le, Literal::Int(x), Literal::Int(y)) => Literal::Bool(x <= y),
    (Gt, Literal::Int(x), Literal::Int(y)) => Literal::Bool(x > y),
    (Ge, Literal::Int(x), Literal::Int(y)) => Literal::Bool(x >= y),
    (Eq, Literal::Int(x), Literal::Int(y)) => Literal::Bool(x == y),
    (Ne, Literal::Int(x), Literal::Int(y)) => Literal::Bool(x != y),
    (Eq, Literal::Bool(x), Literal::Bool(y)) => Literal::Bool(x == y),
    (Ne, Literal::Bool(x), Literal::Bool(y)) => Literal::Bool(x != y),

    (Lt, Literal::Float(x), Literal::Float(y)) => Literal::Bool(x < y),
    (Le, Literal::Float(x), Literal::Float(y)) => Literal::Bool(x <= y),
    (Gt, Literal::Float(x), Literal::Float(y)) => Literal::Bool(x > y),
    (Ge, Literal::Float(x), Literal::Float(y)) => Literal::Bool(x >= y),
    (Eq, Literal::Float(x), Literal::Float(y)) => Literal::Bool(x == y),
    (Ne, Literal::Float(x), Literal::Float(y)) => Literal::Bool(x != y),

    (BitAnd, Literal::Int(x), Literal::Int(y)) => Literal::Int(x & y),
    (BitXor, Literal::Int(x), Literal::Int(y)) => Literal::Int(x ^ y),
    (BitOr, Literal::Int(x), Literal::Int(y)) => Literal::Int(x | y),

    _ => return Ok(None),
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::a1::{Decl, EnumDecl, Module, ROOT_SCOPE};

  fn lit_expr(v: Literal) -> Expr { Expr::new(ExprKind::Literal(v), Location::NONE) }

  #[test]
  fn folds_integer_arithmetic() {
    let m = Module::new("t.nc".into(), "t".into());
    let e = Expr::new(ExprKind::Binary {
      op: BinOp::Add,
      lhs: Box::new(lit_expr(Literal::Int(2))),
      rhs: Box::new(lit_expr(Literal::Int(3))),
    }, Location::NONE);
    assert_eq!(fold(&m, ROOT_SCOPE, &e, 8).unwrap(), Some(Literal::Int(5)));
  }

  #[test]
  fn division_by_zero_errors() {
    let m = Module::new("t.nc".into(), "t".into());
    let e = Expr::new(ExprKind::Binary {
      op: BinOp::Div,
      lhs: Box::new(lit_expr(Literal::Int(1))),
      rhs: Box::new(lit_expr(Literal::Int(0))),
    }, Location::NONE);
    let err = fold(&m, ROOT_SCOPE, &e, 8).unwrap_err();
    assert_eq!(err.code.0, "E1001");
  }

  #[test]
  fn min_div_neg_one_overflows() {
    let m = Module::new("t.nc".into(), "t".into());
    let e = Expr::new(ExprKind::Binary {
      op: BinOp::Div,
      lhs: Box::new(lit_expr(Literal::Int(i64::MIN))),
      rhs: Box::new(lit_expr(Literal::Int(-1))),
    }, Location::NONE);
    let err = fold(&m, ROOT_SCOPE, &e, 8).unwrap_err();
    assert_eq!(err.code.0, "E1003");
  }

  #[test]
  fn shift_out_of_range_errors() {
    let m = Module::new("t.nc".into(), "t".into());
    let e = Expr::new(ExprKind::Binary {
      op: BinOp::Shl,
      lhs: Box::new(lit_expr(Literal::Int(1))),
      rhs: Box::new(lit_expr(Literal::Int(64))),
    }, Location::NONE);
    let err = fold(&m, ROOT_SCOPE, &e, 8).unwrap_err();
    assert_eq!(err.code.0, "E1002");
  }

  #[test]
  fn enum_member_folds_to_declared_value() {
    let mut m = Module::new("t.nc".into(), "t".into());
    m.push_decl(ROOT_SCOPE, Decl::Enum(EnumDecl {
      name: "E".into(),
      members: vec![
        EnumMember { name: "A".into(), expr: None, value: Some(3) },
        EnumMember { name: "B".into(), expr: None, value: Some(4) },
      ],
      enum_size: Some(1),
      exported: false,
      location: Location::NONE,
    }));
    let e = Expr::new(ExprKind::Member {
      base: Box::new(Expr::new(ExprKind::Name("E".into()), Location::NONE)),
      field: "B".into(),
    }, Location::NONE);
    assert_eq!(fold(&m, ROOT_SCOPE, &e, 8).unwrap(), Some(Literal::Int(4)));
  }

  #[test]
  fn folds_float_comparisons() {
    let m = Module::new("t.nc".into(), "t".into());
    let lt = Expr::new(ExprKind::Binary {
      op: BinOp::Lt,
      lhs: Box::new(lit_expr(Literal::Float(1.0))),
      rhs: Box::new(lit_expr(Literal::Float(2.0))),
    }, Location::NONE);
    assert_eq!(fold(&m, ROOT_SCOPE, &lt, 8).unwrap(), Some(Literal::Bool(true)));
    let eq = Expr::new(ExprKind::Binary {
      op: BinOp::Eq,
      lhs: Box::new(lit_expr(Literal::Float(1.0))),
      rhs: Box::new(lit_expr(Literal::Float(1.0))),
    }, Location::NONE);
    assert_eq!(fold(&m, ROOT_SCOPE, &eq, 8).unwrap(), Some(Literal::Bool(true)));
  }

  #[test]
  fn folding_is_idempotent() {
    // §8 property 6: folding a folded tree returns the same Literal.
    let m = Module::new("t.nc".into(), "t".into());
    let once = lit_expr(Literal::Int(7));
    let v1 = fold(&m, ROOT_SCOPE, &once, 8).unwrap();
    let refolded = lit_expr(v1.clone().unwrap());
    let v2 = fold(&m, ROOT_SCOPE, &refolded, 8).unwrap();
    assert_eq!(v1, v2);
  }
}
