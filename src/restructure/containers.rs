//! Container-level restructuring filters.

use crate::{
    ir::{ContainerId, StmtId, StmtKind, UnaryOp},
    restructure::Restructurer,
    simplify, Result,
};

impl Restructurer<'_> {
    /// Converts loop-exit gotos into `break`.
    ///
    /// Within a container shaped `[while|do-while, goto X]`, any `goto X` inside the
    /// loop body leaves the loop and becomes `break`. The search does not descend
    /// into nested loops — their exits belong to them.
    pub(crate) fn convert_break(&mut self, container: ContainerId) -> Result<bool> {
        let stmts: Vec<StmtId> = self.flow.ir.container_stmts(container).to_vec();
        for pair in stmts.windows(2) {
            let (loop_stmt, goto_stmt) = (pair[0], pair[1]);
            let body = match self.flow.ir.stmt(loop_stmt) {
                StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => *body,
                _ => continue,
            };
            let Some(exit_target) = self.flow.ir.goto_target(goto_stmt) else {
                continue;
            };
            if self.convert_break_in(body, exit_target)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn convert_break_in(&mut self, container: ContainerId, exit_target: u64) -> Result<bool> {
        let stmts: Vec<StmtId> = self.flow.ir.container_stmts(container).to_vec();
        let mut changed = false;
        for stmt in stmts {
            match self.flow.ir.stmt(stmt).clone() {
                StmtKind::Goto { .. } => {
                    if self.flow.ir.goto_target(stmt) == Some(exit_target) {
                        self.flow.ir.set_stmt_kind(stmt, StmtKind::Break)?;
                        changed = true;
                    }
                }
                StmtKind::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    changed |= self.convert_break_in(then_body, exit_target)?;
                    if let Some(e) = else_body {
                        changed |= self.convert_break_in(e, exit_target)?;
                    }
                }
                // Nested loops keep their own exits.
                StmtKind::While { .. } | StmtKind::DoWhile { .. } => {}
                _ => {}
            }
        }
        Ok(changed)
    }

    /// Builds an else-branch from the statements trailing a converging `if`.
    ///
    /// When an `if`'s then-branch ends with the same `goto` that terminates the
    /// container, the statements between the `if` and that final `goto` are only
    /// reachable on the false path: they move into a fresh else-branch, and the
    /// duplicated `goto` inside the then-branch is dropped.
    pub(crate) fn combine_else_tails(&mut self, container: ContainerId) -> Result<bool> {
        let stmts: Vec<StmtId> = self.flow.ir.container_stmts(container).to_vec();
        if stmts.len() < 2 {
            return Ok(false);
        }
        let final_goto = stmts[stmts.len() - 1];
        let Some(final_target) = self.flow.ir.goto_target(final_goto) else {
            return Ok(false);
        };

        for (i, stmt) in stmts.iter().enumerate().take(stmts.len() - 1) {
            let StmtKind::If {
                then_body,
                else_body: None,
                ..
            } = self.flow.ir.stmt(*stmt)
            else {
                continue;
            };
            let then_body = *then_body;
            let Some(&then_last) = self.flow.ir.container_stmts(then_body).last() else {
                continue;
            };
            if self.flow.ir.goto_target(then_last) != Some(final_target) {
                continue;
            }

            self.flow.ir.remove_stmt(then_last)?;
            // The dropped goto carried one of the duplicated edges to the
            // convergence target.
            if let Some(block_ea) = self.container_block(container) {
                self.flow.remove_edge(block_ea, final_target);
            }
            let between = &stmts[i + 1..stmts.len() - 1];
            if !between.is_empty() {
                let else_body = self.flow.ir.new_container();
                for moved in between {
                    self.flow.ir.remove_stmt(*moved)?;
                    self.flow.ir.push_stmt(else_body, *moved)?;
                }
                self.flow.ir.set_else_body(*stmt, Some(else_body))?;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Structural `if` cleanup: inverts an empty-then/else pair, deletes an `if`
    /// with two empty branches.
    pub(crate) fn combine_ifs(&mut self, container: ContainerId) -> Result<bool> {
        let stmts: Vec<StmtId> = self.flow.ir.container_stmts(container).to_vec();
        for stmt in stmts {
            let StmtKind::If {
                cond,
                then_body,
                else_body,
            } = self.flow.ir.stmt(stmt).clone()
            else {
                continue;
            };
            let then_empty = self.flow.ir.container_stmts(then_body).is_empty();
            let else_empty =
                else_body.is_none_or(|e| self.flow.ir.container_stmts(e).is_empty());

            if then_empty && else_empty {
                self.flow.ir.remove_stmt(stmt)?;
                return Ok(true);
            }
            if then_empty {
                let else_body = else_body.expect("non-empty else checked above");
                let old_cond = self.detach_expr(cond)?;
                let negated = self.flow.ir.unary(UnaryOp::LogicalNot, old_cond)?;
                self.flow.ir.set_stmt_kind(
                    stmt,
                    StmtKind::If {
                        cond: negated,
                        then_body: else_body,
                        else_body: None,
                    },
                )?;
                simplify::run(&mut self.flow.ir, negated, true)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Prefers `else if` chains over nested negations.
    ///
    /// An `if` whose then-branch is a single nested `if` while the else-branch holds
    /// real statements reads better inverted: the single `if` slides into the else
    /// position where it renders as `else if`.
    pub(crate) fn convert_elseif(&mut self, container: ContainerId) -> Result<bool> {
        let stmts: Vec<StmtId> = self.flow.ir.container_stmts(container).to_vec();
        for stmt in stmts {
            let StmtKind::If {
                cond,
                then_body,
                else_body: Some(else_body),
            } = self.flow.ir.stmt(stmt).clone()
            else {
                continue;
            };
            if !Self::is_single_if(&self.flow.ir, then_body) {
                continue;
            }
            if self.flow.ir.container_stmts(else_body).is_empty()
                || Self::is_single_if(&self.flow.ir, else_body)
            {
                continue;
            }

            let old_cond = self.detach_expr(cond)?;
            let negated = self.flow.ir.unary(UnaryOp::LogicalNot, old_cond)?;
            self.flow.ir.set_stmt_kind(
                stmt,
                StmtKind::If {
                    cond: negated,
                    then_body: else_body,
                    else_body: Some(then_body),
                },
            )?;
            simplify::run(&mut self.flow.ir, negated, true)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn is_single_if(ir: &crate::ir::IrArena, container: ContainerId) -> bool {
        let stmts = ir.container_stmts(container);
        stmts.len() == 1 && matches!(ir.stmt(stmts[0]), StmtKind::If { .. })
    }
}
