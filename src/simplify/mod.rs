//! Fixed-point peephole simplification of expression trees.
//!
//! The engine applies a fixed table of local rewrite rules ([`rules::RULES`]) one
//! step at a time: [`once`] tries each rule against a node in registration order and
//! performs at most one replacement per round; [`run`] repeats until a round changes
//! nothing. With `deep` set, a round that finds no match on the node itself descends
//! one level into the direct operands, which gives the engine its bottom-up bias
//! while still letting parent rules fire after a child changed (every round restarts
//! from the top).
//!
//! Rules are pure functions of local structure only — no chain or flow context —
//! and each is independently testable with literal input/output trees. See
//! [`rules`] for the table and the individual patterns.

pub mod rules;

use tracing::warn;

use crate::{
    ir::{ExprId, IrArena},
    Result,
};

/// Defensive cap on simplification rounds for a single expression.
///
/// The rule table is terminating by construction, so hitting this cap is a bug in a
/// rule, not an expected condition; it is logged and the expression is left in its
/// current (still correct) state.
const MAX_ROUNDS: usize = 512;

/// Applies at most one rule to `expr` or (with `deep`) one of its operands.
///
/// Returns the id now occupying `expr`'s position: the replacement node if `expr`
/// itself was rewritten, `expr` unchanged if only a descendant was, or `None` if no
/// rule matched anywhere.
///
/// # Errors
///
/// Propagates arena invariant violations from rule replacements (always a bug in a
/// rule implementation).
pub fn once(ir: &mut IrArena, expr: ExprId, deep: bool) -> Result<Option<ExprId>> {
    for rule in rules::RULES {
        if let Some(replacement) = rule(ir, expr)? {
            ir.replace(expr, replacement)?;
            return Ok(Some(replacement));
        }
    }
    if deep {
        for child in ir.expr(expr).children() {
            if once(ir, child, true)?.is_some() {
                return Ok(Some(expr));
            }
        }
    }
    Ok(None)
}

/// Simplifies `expr` to fixed point, returning the id occupying its position.
///
/// # Errors
///
/// Propagates arena invariant violations from rule replacements.
pub fn run(ir: &mut IrArena, expr: ExprId, deep: bool) -> Result<ExprId> {
    let mut current = expr;
    for _ in 0..MAX_ROUNDS {
        match once(ir, current, deep)? {
            Some(now) => current = now,
            None => return Ok(current),
        }
    }
    warn!("simplification round cap hit, leaving expression partially simplified");
    Ok(current)
}
