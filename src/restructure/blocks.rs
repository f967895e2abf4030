//! Block-level restructuring filters.

use crate::{
    ir::{BinaryOp, ExprKind, StmtKind, UnaryOp},
    restructure::Restructurer,
    simplify, Result,
};

impl Restructurer<'_> {
    /// Fuses two adjacent flattened branches into one boolean condition.
    ///
    /// When a branch block's successor is itself nothing but a branch (exactly the
    /// `if`+`goto` pair) with a single predecessor, and the two branches share a
    /// destination, the successor's condition folds into this block with `&&`/`||`
    /// (negating as needed so both conditions steer toward the shared target), and
    /// the successor block disappears from the graph.
    pub(crate) fn combine_conditions(&mut self, ea: u64) -> Result<bool> {
        let Some(first) = self.branch_shape(ea) else {
            return Ok(false);
        };

        for second_ea in [first.if_target, first.goto_target] {
            if second_ea == ea {
                continue;
            }
            let Some(second) = self.branch_shape(second_ea) else {
                continue;
            };
            // The successor must be exactly the two branch statements and reached
            // only from this block, or folding would change other paths.
            let Some(block2) = self.flow.block(second_ea) else {
                continue;
            };
            if self.flow.ir.container_stmts(block2.container).len() != 2 {
                continue;
            }
            if block2.jump_from != vec![ea] {
                continue;
            }

            // (combiner, negate_second, new_then_target, new_else_target)
            let plan = if second_ea == first.goto_target {
                // Reached when the first condition is false.
                if second.if_target == first.if_target {
                    Some((BinaryOp::LogicalOr, false, first.if_target, second.goto_target))
                } else if second.goto_target == first.if_target {
                    Some((BinaryOp::LogicalOr, true, first.if_target, second.if_target))
                } else {
                    None
                }
            } else {
                // second_ea == first.if_target: reached when the condition is true.
                if second.goto_target == first.goto_target {
                    Some((BinaryOp::LogicalAnd, false, second.if_target, first.goto_target))
                } else if second.if_target == first.goto_target {
                    Some((BinaryOp::LogicalAnd, true, second.goto_target, first.goto_target))
                } else {
                    None
                }
            };
            let Some((combiner, negate_second, then_target, else_target)) = plan else {
                continue;
            };

            // Rebuild this block's tail with the fused condition.
            let c1 = self.detach_expr(first.cond)?;
            let c2 = self.detach_expr(second.cond)?;
            let c2 = if negate_second {
                self.flow.ir.unary(UnaryOp::LogicalNot, c2)?
            } else {
                c2
            };
            let fused = self.flow.ir.binary(combiner, c1, c2)?;

            let container = self.flow.block(ea).expect("block exists").container;
            self.flow.ir.remove_stmt(first.if_stmt)?;
            self.flow.ir.remove_stmt(first.goto_stmt)?;
            let then_body = self.flow.ir.new_container();
            let then_goto = self.flow.ir.stmt_goto(then_target, 64)?;
            self.flow.ir.push_stmt(then_body, then_goto)?;
            let if_stmt = self.flow.ir.stmt_if(fused, then_body)?;
            self.flow.ir.push_stmt(container, if_stmt)?;
            let else_goto = self.flow.ir.stmt_goto(else_target, 64)?;
            self.flow.ir.push_stmt(container, else_goto)?;
            simplify::run(&mut self.flow.ir, fused, true)?;

            // Rewire: this block now targets the fused destinations directly.
            let old_targets = self.flow.block(ea).expect("block exists").jump_to.clone();
            for t in old_targets {
                self.flow.remove_edge(ea, t);
            }
            self.flow.remove_block(second_ea);
            self.flow.add_edge(ea, then_target);
            self.flow.add_edge(ea, else_target);
            return Ok(true);
        }
        Ok(false)
    }

    /// Drops the spurious trailing `goto` after a call to a non-returning function.
    pub(crate) fn combine_noreturns(&mut self, ea: u64) -> Result<bool> {
        let Some(block) = self.flow.block(ea) else {
            return Ok(false);
        };
        let ir = &self.flow.ir;
        let stmts = ir.container_stmts(block.container);
        if stmts.len() < 2 {
            return Ok(false);
        }
        let goto_stmt = stmts[stmts.len() - 1];
        let Some(goto_target) = ir.goto_target(goto_stmt) else {
            return Ok(false);
        };
        let StmtKind::Expr { expr } = ir.stmt(stmts[stmts.len() - 2]) else {
            return Ok(false);
        };
        let call = match ir.expr(*expr) {
            ExprKind::Call { .. } => *expr,
            ExprKind::Binary {
                op: BinaryOp::Assign,
                right,
                ..
            } if matches!(ir.expr(*right), ExprKind::Call { .. }) => *right,
            _ => return Ok(false),
        };
        let ExprKind::Call { target, .. } = ir.expr(call) else {
            return Ok(false);
        };
        let Some(callee) = ir.expr(*target).as_value() else {
            return Ok(false);
        };
        #[allow(clippy::cast_sign_loss)]
        let callee = callee as u64;
        if self.arch.function_returns(callee) {
            return Ok(false);
        }

        self.flow.ir.remove_stmt(goto_stmt)?;
        self.flow.remove_edge(ea, goto_target);
        Ok(true)
    }

    /// Absorbs a single-predecessor branch target into the `if`'s then-branch.
    ///
    /// A then-branch holding nothing but `goto T`, where `T` is reached from
    /// nowhere else, is the flattened remnant of an inlined then-arm: `T`'s
    /// statements move into the branch and `T` leaves the graph. This is what
    /// later lets [`combine_else_tails`](Self::combine_else_tails) observe both
    /// arms converging on one final `goto`. Blocks that are themselves canonical
    /// branch pairs are left for condition fusion and loop detection to consume.
    pub(crate) fn combine_if_tails(&mut self, ea: u64) -> Result<bool> {
        let Some(block) = self.flow.block(ea) else {
            return Ok(false);
        };
        let container = block.container;
        let stmts: Vec<_> = self.flow.ir.container_stmts(container).to_vec();
        for stmt in stmts {
            let StmtKind::If {
                then_body,
                else_body: None,
                ..
            } = self.flow.ir.stmt(stmt)
            else {
                continue;
            };
            let then_body = *then_body;
            let inner = self.flow.ir.container_stmts(then_body);
            if inner.len() != 1 {
                continue;
            }
            let goto_stmt = inner[0];
            let Some(target) = self.flow.ir.goto_target(goto_stmt) else {
                continue;
            };
            if target == ea || target == self.flow.entry_ea {
                continue;
            }
            if self.branch_shape(target).is_some() {
                continue;
            }
            let Some(target_block) = self.flow.block(target) else {
                continue;
            };
            if target_block.jump_from != vec![ea] {
                continue;
            }
            let ends_closed = self
                .flow
                .ir
                .container_stmts(target_block.container)
                .last()
                .is_some_and(|s| self.flow.ir.stmt(*s).is_terminator());
            if !ends_closed {
                continue;
            }

            let target_container = target_block.container;
            let target_succs = target_block.jump_to.clone();
            self.flow.ir.remove_stmt(goto_stmt)?;
            let moved = self.flow.ir.take_stmts(target_container);
            for s in moved {
                self.flow.ir.push_stmt(then_body, s)?;
            }
            self.flow.remove_block(target);
            for t in target_succs {
                self.flow.add_edge(ea, t);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Merges a block into its sole-predecessor `goto` destination.
    ///
    /// A terminal unconditional `goto` to a block with exactly one predecessor is
    /// pure fallthrough: the destination's statements and outgoing edges splice into
    /// this block and the destination leaves the graph.
    pub(crate) fn combine_block_tail(&mut self, ea: u64) -> Result<bool> {
        let Some(block) = self.flow.block(ea) else {
            return Ok(false);
        };
        let container = block.container;
        let ir = &self.flow.ir;
        let Some(&goto_stmt) = ir.container_stmts(container).last() else {
            return Ok(false);
        };
        let Some(dest) = ir.goto_target(goto_stmt) else {
            return Ok(false);
        };
        if dest == ea || dest == self.flow.entry_ea {
            return Ok(false);
        }
        let Some(dest_block) = self.flow.block(dest) else {
            return Ok(false);
        };
        if dest_block.jump_from != vec![ea] {
            return Ok(false);
        }
        let dest_container = dest_block.container;
        let dest_targets = dest_block.jump_to.clone();
        let dest_falls_into = dest_block.falls_into;

        self.flow.ir.remove_stmt(goto_stmt)?;
        let moved = self.flow.ir.take_stmts(dest_container);
        for stmt in moved {
            self.flow.ir.push_stmt(container, stmt)?;
        }
        self.flow.remove_block(dest);
        for t in dest_targets {
            self.flow.add_edge(ea, t);
        }
        if let Some(block) = self.flow.block_mut(ea) {
            block.falls_into = dest_falls_into;
        }
        if self.flow.return_blocks.contains(&ea) {
            // Already recorded.
        } else if self
            .flow
            .ir
            .container_stmts(container)
            .last()
            .is_some_and(|s| matches!(self.flow.ir.stmt(*s), StmtKind::Return { .. }))
        {
            self.flow.return_blocks.push(ea);
        }
        Ok(true)
    }
}
