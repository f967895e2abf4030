//! SSA version tagging over the flow graph.
//!
//! [`SsaTagger`] performs a single forward pass from the entry block, stamping a
//! unique version index on every register/variable/dereference definition and wiring
//! every use to the version that reaches it. It is a deliberate departure from
//! textbook SSA: instead of φ-functions at merge points, a synthetic copy-assignment
//! `external_version := incoming_version` is inserted along every incoming path that
//! disagrees with the version a merge requires. Downstream passes can then treat
//! "replace every use by its single reaching definition" uniformly, with no
//! φ-resolution step.
//!
//! # Pipeline preconditions
//!
//! At this stage control flow is still fully flattened: containers consist solely of
//! plain statements, `if` (holding a single `goto`, no else), `goto`, `return` and
//! jump-out statements. Anything else is an invariant violation and aborts the
//! function.
//!
//! # Version counters
//!
//! The version counter is owned by the tagger instance and scoped to one function's
//! run — taggers are created per function, never shared.

use std::collections::HashSet;

use crate::{
    error::invariant_error,
    flow::FlowGraph,
    ir::{ExprId, StmtId, StmtKind},
    Result,
};

/// One reaching-definition entry: the tagged operand and the statement defining it.
#[derive(Debug, Clone, Copy)]
struct CtxEntry {
    operand: ExprId,
    stmt: StmtId,
}

/// The reaching-definition context carried along one path.
type Context = Vec<CtxEntry>;

/// Stamps SSA version indices over one function's flow graph.
///
/// # Examples
///
/// ```rust,ignore
/// use pseudoscope::ssa::SsaTagger;
///
/// let mut flow = FlowGraph::build(entry, &arch)?;
/// flow.lower_to_ir(&arch)?;
/// SsaTagger::new().tag(&mut flow)?;
/// ```
#[derive(Debug, Default)]
pub struct SsaTagger {
    /// Monotonically increasing version counter, scoped to this instance.
    index: u32,
    /// Blocks whose own statements have been tagged.
    done: HashSet<u64>,
    /// `(external_version, incoming_version)` pairs a merge copy was inserted for.
    inserted_copies: HashSet<(u32, u32)>,
}

impl SsaTagger {
    /// Creates a tagger with a fresh version counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags the whole flow graph, starting at the entry block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) when a statement kind
    /// outside the flattened closed set is encountered.
    pub fn tag(&mut self, flow: &mut FlowGraph) -> Result<()> {
        let mut ctx = Context::new();
        self.tag_block(flow, flow.entry_ea, &mut ctx)
    }

    fn fresh_index(&mut self) -> u32 {
        let idx = self.index;
        self.index += 1;
        idx
    }

    fn ctx_find(flow: &FlowGraph, ctx: &Context, operand: ExprId) -> Option<CtxEntry> {
        ctx.iter()
            .rev()
            .find(|e| flow.ir.exprs_equal_no_index(e.operand, operand))
            .copied()
    }

    fn ctx_define(flow: &FlowGraph, ctx: &mut Context, operand: ExprId, stmt: StmtId) {
        ctx.retain(|e| !flow.ir.exprs_equal_no_index(e.operand, operand));
        ctx.push(CtxEntry { operand, stmt });
    }

    fn tag_block(&mut self, flow: &mut FlowGraph, ea: u64, ctx: &mut Context) -> Result<()> {
        self.process_externals(flow, ea, ctx)?;
        if !self.done.insert(ea) {
            return Ok(());
        }
        let stmts: Vec<StmtId> = match flow.block(ea) {
            Some(block) => flow.ir.container_stmts(block.container).to_vec(),
            None => return Ok(()),
        };
        for stmt in stmts {
            self.tag_statement(flow, stmt, ctx)?;
        }
        Ok(())
    }

    /// Computes the block's externals — locations used before any internal
    /// definition — and reconciles each with the incoming context, inserting merge
    /// copies where the arriving version disagrees with the version already stamped.
    fn process_externals(&mut self, flow: &mut FlowGraph, ea: u64, ctx: &mut Context) -> Result<()> {
        let Some(block) = flow.block(ea) else {
            return Ok(());
        };
        let stmts: Vec<StmtId> = flow.ir.container_stmts(block.container).to_vec();

        let mut defined: Vec<ExprId> = Vec::new();
        let mut externals: Vec<(ExprId, StmtId)> = Vec::new();
        for stmt in &stmts {
            for root in flow.ir.stmt(*stmt).exprs() {
                for op in flow.ir.post_order(root) {
                    if !flow.ir.is_assignable(op) {
                        continue;
                    }
                    if flow.ir.is_definition(op) {
                        defined.push(op);
                    } else if !defined
                        .iter()
                        .any(|d| flow.ir.exprs_equal_no_index(*d, op))
                        && !externals
                            .iter()
                            .any(|(e, _)| flow.ir.exprs_equal_no_index(*e, op))
                    {
                        externals.push((op, *stmt));
                    }
                }
            }
        }

        for (operand, stmt) in externals {
            let entry = Self::ctx_find(flow, ctx, operand);
            match (flow.ir.ssa_index(operand), entry) {
                (None, None) => {
                    // First sighting anywhere: a function argument or an
                    // uninitialized location materializes as a definition here.
                    let idx = self.fresh_index();
                    flow.ir.set_ssa_index(operand, Some(idx));
                    Self::ctx_define(flow, ctx, operand, stmt);
                }
                (None, Some(_)) => {
                    // First arrival at an untagged block: per-statement tagging
                    // will stamp this use from the context.
                }
                (Some(_), None) => {
                    // A path arrives carrying no definition for an already tagged
                    // external; there is no incoming version to copy from.
                }
                (Some(required), Some(incoming)) => {
                    let incoming_idx = flow.ir.ssa_index(incoming.operand);
                    if incoming_idx == Some(required) {
                        continue;
                    }
                    let key = (required, incoming_idx.unwrap_or(u32::MAX));
                    if !self.inserted_copies.insert(key) {
                        continue;
                    }
                    self.insert_merge_copy(flow, ctx, operand, required, incoming)?;
                }
            }
        }
        Ok(())
    }

    /// Inserts `external_version := incoming_version` adjacent to the incoming
    /// definition and registers the external version as the path's new definition.
    fn insert_merge_copy(
        &mut self,
        flow: &mut FlowGraph,
        ctx: &mut Context,
        external: ExprId,
        required: u32,
        incoming: CtxEntry,
    ) -> Result<()> {
        let ir = &mut flow.ir;
        let lhs = ir.copy_expr(external);
        ir.set_ssa_index(lhs, Some(required));
        ir.set_definition(lhs, false);
        let rhs = ir.copy_expr(incoming.operand);
        ir.set_definition(rhs, false);
        let copy_expr = ir.assign(lhs, rhs)?;
        let copy_stmt = ir.stmt_expr(copy_expr)?;

        let Some(container) = ir.stmt_container(incoming.stmt) else {
            return Err(invariant_error!(
                "incoming definition statement is no longer attached"
            ));
        };
        let Some(pos) = ir.stmt_index(incoming.stmt) else {
            return Err(invariant_error!(
                "incoming definition statement missing from its container"
            ));
        };
        // A definition made inside an `if` condition cannot be followed there;
        // the copy lands in front of the `if` instead.
        let at = if matches!(ir.stmt(incoming.stmt), StmtKind::If { .. }) {
            pos
        } else {
            pos + 1
        };
        ir.insert_stmt(container, at, copy_stmt)?;

        Self::ctx_define(flow, ctx, lhs, copy_stmt);
        Ok(())
    }

    fn tag_statement(&mut self, flow: &mut FlowGraph, stmt: StmtId, ctx: &mut Context) -> Result<()> {
        match flow.ir.stmt(stmt).clone() {
            StmtKind::Expr { expr } => self.tag_expression(flow, stmt, expr, ctx),
            StmtKind::Return { value } => match value {
                Some(v) => self.tag_expression(flow, stmt, v, ctx),
                None => Ok(()),
            },
            StmtKind::JumpOut { target } => self.tag_expression(flow, stmt, target, ctx),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                if else_body.is_some() {
                    return Err(invariant_error!(
                        "if statement carries an else branch before restructuring"
                    ));
                }
                self.tag_expression(flow, stmt, cond, ctx)?;
                let mut branch_ctx = ctx.clone();
                let body: Vec<StmtId> = flow.ir.container_stmts(then_body).to_vec();
                for s in body {
                    self.tag_statement(flow, s, &mut branch_ctx)?;
                }
                Ok(())
            }
            StmtKind::Goto { .. } => {
                if let Some(dest) = flow.ir.goto_target(stmt) {
                    if flow.contains_block(dest) {
                        let mut branch_ctx = ctx.clone();
                        self.tag_block(flow, dest, &mut branch_ctx)?;
                    }
                }
                Ok(())
            }
            other => Err(invariant_error!(
                "statement kind {other:?} is outside the flattened closed set"
            )),
        }
    }

    /// Stamps uses from the context first, then gives every definition a fresh
    /// version — so `x = x + 1` reads the old version and defines a new one.
    fn tag_expression(
        &mut self,
        flow: &mut FlowGraph,
        stmt: StmtId,
        root: ExprId,
        ctx: &mut Context,
    ) -> Result<()> {
        let operands = flow.ir.post_order(root);
        for op in &operands {
            if !flow.ir.is_assignable(*op) || flow.ir.is_definition(*op) {
                continue;
            }
            match Self::ctx_find(flow, ctx, *op) {
                Some(entry) => {
                    let idx = flow.ir.ssa_index(entry.operand);
                    flow.ir.set_ssa_index(*op, idx);
                }
                None => {
                    if flow.ir.ssa_index(*op).is_none() {
                        let idx = self.fresh_index();
                        flow.ir.set_ssa_index(*op, Some(idx));
                        Self::ctx_define(flow, ctx, *op, stmt);
                    }
                }
            }
        }
        for op in &operands {
            if !flow.ir.is_assignable(*op) || !flow.ir.is_definition(*op) {
                continue;
            }
            let idx = self.fresh_index();
            flow.ir.set_ssa_index(*op, Some(idx));
            Self::ctx_define(flow, ctx, *op, stmt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{lift, ScriptedArch};
    use crate::{flow::FlowGraph, ir::ExprKind};

    /// Straight-line code: every definition gets a distinct version, the use of
    /// `eax` in the second statement sees the first statement's version.
    #[test]
    fn test_straight_line_versions() {
        let mut arch = ScriptedArch::new();
        arch.instruction(0x1000, 1, |ir| lift::assign_reg_value(ir, "eax", 0, 1));
        arch.instruction(0x1001, 1, |ir| lift::assign_reg_reg(ir, "ebx", 1, "eax", 0));
        arch.ret(0x1002, 1);

        let mut flow = FlowGraph::build(0x1000, &arch).unwrap();
        flow.lower_to_ir(&arch).unwrap();
        SsaTagger::new().tag(&mut flow).unwrap();

        let container = flow.block(0x1000).unwrap().container;
        let stmts = flow.ir.container_stmts(container).to_vec();

        let mut defs = Vec::new();
        let mut uses = Vec::new();
        for s in &stmts {
            for root in flow.ir.stmt(*s).exprs() {
                for op in flow.ir.post_order(root) {
                    if matches!(flow.ir.expr(op), ExprKind::Reg { .. }) {
                        if flow.ir.is_definition(op) {
                            defs.push(op);
                        } else {
                            uses.push(op);
                        }
                    }
                }
            }
        }

        // Two definitions, each with a distinct version.
        assert_eq!(defs.len(), 2);
        let i0 = flow.ir.ssa_index(defs[0]).unwrap();
        let i1 = flow.ir.ssa_index(defs[1]).unwrap();
        assert_ne!(i0, i1);

        // The use of eax matches the eax definition's version.
        assert_eq!(uses.len(), 1);
        assert_eq!(flow.ir.ssa_index(uses[0]), Some(i0));
    }

    /// A use with no prior definition (a function argument) materializes as a
    /// definition at first use.
    #[test]
    fn test_argument_materializes_at_first_use() {
        let mut arch = ScriptedArch::new();
        arch.instruction(0x1000, 1, |ir| lift::assign_reg_reg(ir, "ebx", 1, "ecx", 2));
        arch.ret(0x1001, 1);

        let mut flow = FlowGraph::build(0x1000, &arch).unwrap();
        flow.lower_to_ir(&arch).unwrap();
        SsaTagger::new().tag(&mut flow).unwrap();

        let container = flow.block(0x1000).unwrap().container;
        let stmt = flow.ir.container_stmts(container)[0];
        for root in flow.ir.stmt(stmt).exprs() {
            for op in flow.ir.post_order(root) {
                if matches!(flow.ir.expr(op), ExprKind::Reg { .. }) {
                    assert!(flow.ir.ssa_index(op).is_some());
                }
            }
        }
    }
}
