//! The peephole rule table.
//!
//! Every rule is a pure function of local structure: it inspects one node and either
//! returns a freshly constructed, detached replacement subtree or `None`. The driver
//! in the parent module performs the actual in-place [`replace`](IrArena::replace);
//! rules never mutate their input.
//!
//! Registration order matters — the first matching rule wins a round — and is part
//! of the engine's observable behavior, so new rules go at the position their
//! priority demands, not at the end.

use crate::{
    ir::{BinaryOp, ExprId, ExprKind, IrArena, UnaryOp},
    Result,
};

/// A single peephole rule.
pub type Rule = fn(&mut IrArena, ExprId) -> Result<Option<ExprId>>;

/// All rules, in registration order.
pub const RULES: &[Rule] = &[
    lower_sign_overflow,
    lower_not_carry,
    lower_carry,
    lower_below_or_equal,
    lower_above_or_equal,
    fold_constant_offsets,
    fold_zero_offset,
    cancel_address_of_deref,
    cancel_deref_of_address,
    commute_comparison_literal,
    demorgan,
    double_negation,
    negate_comparison,
    compare_zero_to_not,
    normalize_literal_sign,
    self_xor,
    self_and,
];

/// Width in bits a replacement node should use, derived from the operand it folds.
fn operand_width(ir: &IrArena, e: ExprId) -> u32 {
    match ir.expr(e) {
        ExprKind::Value { width, .. }
        | ExprKind::Reg { width, .. }
        | ExprKind::Deref { width, .. } => *width,
        ExprKind::Unary { operand, .. } => operand_width(ir, *operand),
        ExprKind::Binary { left, .. } => operand_width(ir, *left),
        _ => 32,
    }
}

fn as_unary(ir: &IrArena, e: ExprId, op: UnaryOp) -> Option<ExprId> {
    match ir.expr(e) {
        ExprKind::Unary { op: o, operand } if *o == op => Some(*operand),
        _ => None,
    }
}

fn as_binary(ir: &IrArena, e: ExprId, op: BinaryOp) -> Option<(ExprId, ExprId)> {
    match ir.expr(e) {
        ExprKind::Binary { op: o, left, right } if *o == op => Some((*left, *right)),
        _ => None,
    }
}

fn as_literal(ir: &IrArena, e: ExprId) -> Option<i64> {
    ir.expr(e).as_value()
}

/// `sign(x) != overflow(x)` lowers to a signed `<`, the `==` form to `>`.
///
/// When the shared operand is a subtraction `a - b`, the comparison is between `a`
/// and `b`; otherwise the operand is compared against zero.
fn lower_sign_overflow(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let (op, left, right) = match ir.expr(e) {
        ExprKind::Binary { op, left, right } if matches!(op, BinaryOp::Eq | BinaryOp::Neq) => {
            (*op, *left, *right)
        }
        _ => return Ok(None),
    };
    let (Some(sign_of), Some(overflow_of)) = (
        as_unary(ir, left, UnaryOp::Sign),
        as_unary(ir, right, UnaryOp::Overflow),
    ) else {
        return Ok(None);
    };
    if !ir.exprs_equal(sign_of, overflow_of) {
        return Ok(None);
    }
    let cmp = if op == BinaryOp::Neq {
        BinaryOp::Lt
    } else {
        BinaryOp::Gt
    };
    let replacement = match as_binary(ir, sign_of, BinaryOp::Sub) {
        Some((a, b)) => {
            let a = ir.copy_expr(a);
            let b = ir.copy_expr(b);
            ir.binary(cmp, a, b)?
        }
        None => {
            let x = ir.copy_expr(sign_of);
            let zero = ir.value(0, operand_width(ir, sign_of));
            ir.binary(cmp, x, zero)?
        }
    };
    Ok(Some(replacement))
}

/// `!carry(a - b)` lowers to an unsigned `>=`, `!carry(x)` to `x > 0`.
fn lower_not_carry(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some(inner) = as_unary(ir, e, UnaryOp::LogicalNot) else {
        return Ok(None);
    };
    let Some(x) = as_unary(ir, inner, UnaryOp::Carry) else {
        return Ok(None);
    };
    let replacement = match as_binary(ir, x, BinaryOp::Sub) {
        Some((a, b)) => {
            let a = ir.copy_expr(a);
            let b = ir.copy_expr(b);
            ir.binary(BinaryOp::AboveEq, a, b)?
        }
        None => {
            let x2 = ir.copy_expr(x);
            let zero = ir.value(0, operand_width(ir, x));
            ir.binary(BinaryOp::Gt, x2, zero)?
        }
    };
    Ok(Some(replacement))
}

/// `carry(a - b)` lowers to an unsigned `<`, bare `carry(x)` to `x < 0`.
fn lower_carry(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some(x) = as_unary(ir, e, UnaryOp::Carry) else {
        return Ok(None);
    };
    let replacement = match as_binary(ir, x, BinaryOp::Sub) {
        Some((a, b)) => {
            let a = ir.copy_expr(a);
            let b = ir.copy_expr(b);
            ir.binary(BinaryOp::Below, a, b)?
        }
        None => {
            let x2 = ir.copy_expr(x);
            let zero = ir.value(0, operand_width(ir, x));
            ir.binary(BinaryOp::Lt, x2, zero)?
        }
    };
    Ok(Some(replacement))
}

/// `!(a OP b) || (a <u b)` over the same operand pair collapses to `a <= b`.
fn lower_below_or_equal(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some((left, right)) = as_binary(ir, e, BinaryOp::LogicalOr) else {
        return Ok(None);
    };
    let Some(negated) = as_unary(ir, left, UnaryOp::LogicalNot) else {
        return Ok(None);
    };
    let Some((na, nb)) = binary_operands(ir, negated) else {
        return Ok(None);
    };
    let Some((ba, bb)) = as_binary(ir, right, BinaryOp::Below) else {
        return Ok(None);
    };
    if !ir.exprs_equal(na, ba) || !ir.exprs_equal(nb, bb) {
        return Ok(None);
    }
    let a = ir.copy_expr(ba);
    let b = ir.copy_expr(bb);
    Ok(Some(ir.binary(BinaryOp::Leq, a, b)?))
}

/// `(a OP b) && (a >=u b)` over the same operand pair collapses to `a >=u b`.
fn lower_above_or_equal(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some((left, right)) = as_binary(ir, e, BinaryOp::LogicalAnd) else {
        return Ok(None);
    };
    let Some((la, lb)) = binary_operands(ir, left) else {
        return Ok(None);
    };
    let Some((ra, rb)) = as_binary(ir, right, BinaryOp::AboveEq) else {
        return Ok(None);
    };
    if !ir.exprs_equal(la, ra) || !ir.exprs_equal(lb, rb) {
        return Ok(None);
    }
    let a = ir.copy_expr(ra);
    let b = ir.copy_expr(rb);
    Ok(Some(ir.binary(BinaryOp::AboveEq, a, b)?))
}

fn binary_operands(ir: &IrArena, e: ExprId) -> Option<(ExprId, ExprId)> {
    match ir.expr(e) {
        ExprKind::Binary { left, right, .. } => Some((*left, *right)),
        _ => None,
    }
}

/// `(a ± n1) ± n2` with literal offsets folds into a single offset.
fn fold_constant_offsets(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let (outer_op, left, right) = match ir.expr(e) {
        ExprKind::Binary { op, left, right } if matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
            (*op, *left, *right)
        }
        _ => return Ok(None),
    };
    let Some(n2) = as_literal(ir, right) else {
        return Ok(None);
    };
    let (inner_op, base, inner_lit) = match ir.expr(left) {
        ExprKind::Binary { op, left, right } if matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
            (*op, *left, *right)
        }
        _ => return Ok(None),
    };
    let Some(n1) = as_literal(ir, inner_lit) else {
        return Ok(None);
    };

    let inner = if inner_op == BinaryOp::Add { n1 } else { -n1 };
    let outer = if outer_op == BinaryOp::Add { n2 } else { -n2 };
    let total = inner + outer;
    let width = operand_width(ir, right);
    let base = ir.copy_expr(base);
    let replacement = if total == 0 {
        base
    } else if total > 0 {
        let lit = ir.value(total, width);
        ir.binary(BinaryOp::Add, base, lit)?
    } else {
        let lit = ir.value(-total, width);
        ir.binary(BinaryOp::Sub, base, lit)?
    };
    Ok(Some(replacement))
}

/// `a ± 0` folds to `a`.
fn fold_zero_offset(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let (left, right) = match ir.expr(e) {
        ExprKind::Binary { op, left, right } if matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
            (*left, *right)
        }
        _ => return Ok(None),
    };
    if as_literal(ir, right) != Some(0) {
        return Ok(None);
    }
    Ok(Some(ir.copy_expr(left)))
}

/// `&(*(x))` cancels to `x`.
fn cancel_address_of_deref(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some(inner) = as_unary(ir, e, UnaryOp::AddressOf) else {
        return Ok(None);
    };
    match ir.expr(inner) {
        ExprKind::Deref { addr, .. } => Ok(Some(ir.copy_expr(*addr))),
        _ => Ok(None),
    }
}

/// `*(&(x))` cancels to `x`.
fn cancel_deref_of_address(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let addr = match ir.expr(e) {
        ExprKind::Deref { addr, .. } => *addr,
        _ => return Ok(None),
    };
    match as_unary(ir, addr, UnaryOp::AddressOf) {
        Some(x) => Ok(Some(ir.copy_expr(x))),
        None => Ok(None),
    }
}

/// `(a ± n1) OP n2` folds the inner literal into the comparison target.
fn commute_comparison_literal(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let (cmp, left, right) = match ir.expr(e) {
        ExprKind::Binary { op, left, right } if op.is_comparison() => (*op, *left, *right),
        _ => return Ok(None),
    };
    let Some(n2) = as_literal(ir, right) else {
        return Ok(None);
    };
    let (inner_op, base, inner_lit) = match ir.expr(left) {
        ExprKind::Binary { op, left, right } if matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
            (*op, *left, *right)
        }
        _ => return Ok(None),
    };
    let Some(n1) = as_literal(ir, inner_lit) else {
        return Ok(None);
    };
    let target = if inner_op == BinaryOp::Sub { n2 + n1 } else { n2 - n1 };
    let width = operand_width(ir, right);
    let base = ir.copy_expr(base);
    let lit = ir.value(target, width);
    Ok(Some(ir.binary(cmp, base, lit)?))
}

/// De Morgan: `!(p && q)` → `!p || !q`, `!(p || q)` → `!p && !q`.
fn demorgan(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some(inner) = as_unary(ir, e, UnaryOp::LogicalNot) else {
        return Ok(None);
    };
    let (op, left, right) = match ir.expr(inner) {
        ExprKind::Binary { op, left, right }
            if matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) =>
        {
            (*op, *left, *right)
        }
        _ => return Ok(None),
    };
    let dual = if op == BinaryOp::LogicalAnd {
        BinaryOp::LogicalOr
    } else {
        BinaryOp::LogicalAnd
    };
    let l = ir.copy_expr(left);
    let r = ir.copy_expr(right);
    let nl = ir.unary(UnaryOp::LogicalNot, l)?;
    let nr = ir.unary(UnaryOp::LogicalNot, r)?;
    Ok(Some(ir.binary(dual, nl, nr)?))
}

/// `!!x` → `x`.
fn double_negation(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some(inner) = as_unary(ir, e, UnaryOp::LogicalNot) else {
        return Ok(None);
    };
    match as_unary(ir, inner, UnaryOp::LogicalNot) {
        Some(x) => Ok(Some(ir.copy_expr(x))),
        None => Ok(None),
    }
}

/// `!(a OP b)` for a comparison flips the operator: `!(a < b)` → `a >= b`.
fn negate_comparison(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some(inner) = as_unary(ir, e, UnaryOp::LogicalNot) else {
        return Ok(None);
    };
    let (op, left, right) = match ir.expr(inner) {
        ExprKind::Binary { op, left, right } => (*op, *left, *right),
        _ => return Ok(None),
    };
    let Some(flipped) = op.negated_comparison() else {
        return Ok(None);
    };
    let l = ir.copy_expr(left);
    let r = ir.copy_expr(right);
    Ok(Some(ir.binary(flipped, l, r)?))
}

/// `a == 0` → `!a`.
fn compare_zero_to_not(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some((left, right)) = as_binary(ir, e, BinaryOp::Eq) else {
        return Ok(None);
    };
    if as_literal(ir, right) != Some(0) {
        return Ok(None);
    }
    let a = ir.copy_expr(left);
    Ok(Some(ir.unary(UnaryOp::LogicalNot, a)?))
}

/// `a + (-n)` → `a - n` and `a - (-n)` → `a + n`.
fn normalize_literal_sign(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let (op, left, right) = match ir.expr(e) {
        ExprKind::Binary { op, left, right } if matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
            (*op, *left, *right)
        }
        _ => return Ok(None),
    };
    let Some(n) = as_literal(ir, right) else {
        return Ok(None);
    };
    if n >= 0 {
        return Ok(None);
    }
    let flipped = if op == BinaryOp::Add {
        BinaryOp::Sub
    } else {
        BinaryOp::Add
    };
    let width = operand_width(ir, right);
    let a = ir.copy_expr(left);
    let lit = ir.value(-n, width);
    Ok(Some(ir.binary(flipped, a, lit)?))
}

/// `x ^ x` → `0`.
fn self_xor(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some((left, right)) = as_binary(ir, e, BinaryOp::Xor) else {
        return Ok(None);
    };
    if !ir.exprs_equal(left, right) {
        return Ok(None);
    }
    let width = operand_width(ir, left);
    Ok(Some(ir.value(0, width)))
}

/// `x & x` → `x`.
fn self_and(ir: &mut IrArena, e: ExprId) -> Result<Option<ExprId>> {
    let Some((left, right)) = as_binary(ir, e, BinaryOp::And) else {
        return Ok(None);
    };
    if !ir.exprs_equal(left, right) {
        return Ok(None);
    }
    Ok(Some(ir.copy_expr(left)))
}
