//! Loop detection and materialization.
//!
//! Loops are found by path enumeration rather than dominator analysis: for a
//! candidate block, every finite goto-path leading back to the block is collected
//! with a bounded DFS that refuses to revisit a block already on the current path.
//! Nested sub-loops are materialized before their enclosing loop, the longest
//! recursive path becomes the loop's main body, and the boundary shape decides
//! between `while`, `do-while` and an unconditional loop.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::{
    ir::{ExprId, StmtId, StmtKind, UnaryOp},
    restructure::Restructurer,
    simplify, Result,
};

enum LoopKind {
    While,
    DoWhile,
}

impl Restructurer<'_> {
    /// Detects and materializes a loop rooted at `ea`, innermost loops first.
    pub(crate) fn combine_loops(&mut self, ea: u64) -> Result<bool> {
        let mut exclude = HashSet::new();
        self.combine_loops_excluding(ea, &mut exclude)
    }

    fn combine_loops_excluding(
        &mut self,
        ea: u64,
        exclude: &mut HashSet<u64>,
    ) -> Result<bool> {
        let paths = self.loop_paths(ea, exclude);
        if paths.is_empty() {
            return Ok(false);
        }

        // Resolve nested loops inside the body before the outer one.
        exclude.insert(ea);
        let members: BTreeSet<u64> = paths
            .iter()
            .flatten()
            .copied()
            .filter(|b| *b != ea)
            .collect();
        for member in &members {
            if self.combine_loops_excluding(*member, exclude)? {
                exclude.remove(&ea);
                return Ok(true);
            }
        }
        exclude.remove(&ea);

        let paths = self.loop_paths(ea, exclude);
        if paths.is_empty() {
            return Ok(false);
        }
        self.build_loop(ea, &paths)
    }

    /// Successors reachable through this block's terminal `goto` and the `goto`s
    /// inside its `if` statements — the only edges the loop search follows.
    fn can_jump_to(&self, ea: u64) -> Vec<u64> {
        let Some(block) = self.flow.block(ea) else {
            return Vec::new();
        };
        let ir = &self.flow.ir;
        let mut out = Vec::new();
        for stmt in ir.container_stmts(block.container) {
            match ir.stmt(*stmt) {
                StmtKind::Goto { .. } => {
                    if let Some(t) = ir.goto_target(*stmt) {
                        out.push(t);
                    }
                }
                StmtKind::If { then_body, .. } => {
                    for s in ir.container_stmts(*then_body) {
                        if let Some(t) = ir.goto_target(*s) {
                            out.push(t);
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Enumerates every finite path `origin → … → origin`.
    ///
    /// The DFS rejects blocks already on the current path, which bounds the search
    /// without restricting the loop shapes that can be found.
    fn loop_paths(&self, origin: u64, exclude: &HashSet<u64>) -> Vec<Vec<u64>> {
        let mut paths = Vec::new();
        let mut path = vec![origin];
        self.search_paths(origin, origin, exclude, &mut path, &mut paths);
        paths
    }

    fn search_paths(
        &self,
        current: u64,
        origin: u64,
        exclude: &HashSet<u64>,
        path: &mut Vec<u64>,
        out: &mut Vec<Vec<u64>>,
    ) {
        for succ in self.can_jump_to(current) {
            if succ == origin {
                out.push(path.clone());
                continue;
            }
            if path.contains(&succ) || exclude.contains(&succ) || !self.flow.contains_block(succ) {
                continue;
            }
            path.push(succ);
            self.search_paths(succ, origin, exclude, path, out);
            path.pop();
        }
    }

    /// Materializes the loop rooted at `origin` from its recursive path set.
    fn build_loop(&mut self, origin: u64, paths: &[Vec<u64>]) -> Result<bool> {
        let loop_set: HashSet<u64> = paths.iter().flatten().copied().collect();
        let main: Vec<u64> = paths
            .iter()
            .max_by_key(|p| p.len())
            .expect("paths checked non-empty")
            .clone();
        let last = *main.last().expect("paths contain at least the origin");

        let mut kind = LoopKind::While;
        let mut cond: Option<ExprId> = None;
        let mut exit: Option<u64> = None;
        let mut classified = false;

        // Bottom-tested: the back edge sits in a conditional branch pair whose other
        // side leaves the loop.
        if let Some(shape) = self.branch_shape(last) {
            if shape.if_target == origin && !loop_set.contains(&shape.goto_target) {
                let c = self.detach_expr(shape.cond)?;
                self.flow.ir.remove_stmt(shape.if_stmt)?;
                self.flow.ir.remove_stmt(shape.goto_stmt)?;
                kind = LoopKind::DoWhile;
                cond = Some(c);
                exit = Some(shape.goto_target);
                classified = true;
            } else if shape.goto_target == origin && !loop_set.contains(&shape.if_target) {
                let c = self.detach_expr(shape.cond)?;
                let negated = self.flow.ir.unary(UnaryOp::LogicalNot, c)?;
                self.flow.ir.remove_stmt(shape.if_stmt)?;
                self.flow.ir.remove_stmt(shape.goto_stmt)?;
                kind = LoopKind::DoWhile;
                cond = Some(negated);
                exit = Some(shape.if_target);
                classified = true;
            }
        }

        // Top-tested: unconditional back edge, condition (if any) at the origin.
        if !classified {
            let back_goto = {
                let block = self.flow.block(last).expect("loop block exists");
                let ir = &self.flow.ir;
                ir.container_stmts(block.container)
                    .last()
                    .copied()
                    .filter(|s| ir.goto_target(*s) == Some(origin))
            };
            let Some(back_goto) = back_goto else {
                // No recognizable back edge shape; leave the region alone.
                return Ok(false);
            };
            self.flow.ir.remove_stmt(back_goto)?;

            let origin_shape = self.branch_shape(origin).filter(|_| {
                let block = self.flow.block(origin).expect("origin exists");
                self.flow.ir.container_stmts(block.container).len() == 2
            });
            match origin_shape {
                Some(shape) if !loop_set.contains(&shape.if_target) => {
                    let c = self.detach_expr(shape.cond)?;
                    let negated = self.flow.ir.unary(UnaryOp::LogicalNot, c)?;
                    self.flow.ir.remove_stmt(shape.if_stmt)?;
                    self.flow.ir.remove_stmt(shape.goto_stmt)?;
                    cond = Some(negated);
                    exit = Some(shape.if_target);
                }
                Some(shape) if !loop_set.contains(&shape.goto_target) => {
                    let c = self.detach_expr(shape.cond)?;
                    self.flow.ir.remove_stmt(shape.if_stmt)?;
                    self.flow.ir.remove_stmt(shape.goto_stmt)?;
                    cond = Some(c);
                    exit = Some(shape.goto_target);
                }
                _ => {
                    // Unconditional loop; the exit, if any, is a heuristic pick.
                    exit = self.choose_exit_block(&loop_set);
                }
            }
        }

        // Merge the main path into one body container.
        let body = self.flow.ir.new_container();
        let origin_container = self.flow.block(origin).expect("origin exists").container;
        for stmt in self.flow.ir.take_stmts(origin_container) {
            self.flow.ir.push_stmt(body, stmt)?;
        }

        let mut merged: Vec<u64> = Vec::new();
        for (i, member) in main.iter().enumerate().skip(1) {
            let Some(block) = self.flow.block(*member) else {
                break;
            };
            if block.jump_from.len() != 1 {
                // Multi-entry blocks stay separate; continue conversion handles
                // their back edges.
                break;
            }
            let container = block.container;
            let next = main.get(i + 1).copied();
            for stmt in self.flow.ir.take_stmts(container) {
                // A goto that only reaches the next merged block is pure
                // fallthrough inside the body.
                if self.flow.ir.goto_target(stmt).is_some()
                    && self.flow.ir.goto_target(stmt) == next
                {
                    continue;
                }
                self.flow.ir.push_stmt(body, stmt)?;
            }
            merged.push(*member);
        }

        // Remaining references to the loop head become `continue`.
        self.convert_continue_in(body, origin)?;
        for member in &loop_set {
            if *member == origin || merged.contains(member) {
                continue;
            }
            if let Some(block) = self.flow.block(*member) {
                let container = block.container;
                self.convert_continue_in(container, origin)?;
                self.flow.remove_edge(*member, origin);
            }
        }

        // Wrap the body and rebuild the origin block around it.
        let cond = match cond {
            Some(c) => c,
            None => self.flow.ir.value(1, 1),
        };
        let loop_stmt = match kind {
            LoopKind::While => self.flow.ir.stmt_while(cond, body)?,
            LoopKind::DoWhile => self.flow.ir.stmt_do_while(cond, body)?,
        };
        self.flow.ir.push_stmt(origin_container, loop_stmt)?;
        simplify::run(&mut self.flow.ir, cond, true)?;
        if let Some(exit) = exit {
            let goto = self.flow.ir.stmt_goto(exit, 64)?;
            self.flow.ir.push_stmt(origin_container, goto)?;
        }

        let old_targets = self.flow.block(origin).expect("origin exists").jump_to.clone();
        for t in old_targets {
            self.flow.remove_edge(origin, t);
        }
        for member in merged {
            self.flow.remove_block(member);
        }
        if let Some(exit) = exit {
            self.flow.add_edge(origin, exit);
        }
        Ok(true)
    }

    fn convert_continue_in(&mut self, container: crate::ir::ContainerId, origin: u64) -> Result<bool> {
        let stmts: Vec<StmtId> = self.flow.ir.container_stmts(container).to_vec();
        let mut changed = false;
        for stmt in stmts {
            match self.flow.ir.stmt(stmt).clone() {
                StmtKind::Goto { .. } => {
                    if self.flow.ir.goto_target(stmt) == Some(origin) {
                        self.flow.ir.set_stmt_kind(stmt, StmtKind::Continue)?;
                        changed = true;
                    }
                }
                StmtKind::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    changed |= self.convert_continue_in(then_body, origin)?;
                    if let Some(e) = else_body {
                        changed |= self.convert_continue_in(e, origin)?;
                    }
                }
                // Nested loops target their own head.
                StmtKind::While { .. } | StmtKind::DoWhile { .. } => {}
                _ => {}
            }
        }
        Ok(changed)
    }

    /// Deterministic policy for a loop with no structurally obvious exit: the
    /// lowest-addressed block reachable by an edge leaving the loop set.
    fn choose_exit_block(&self, loop_set: &HashSet<u64>) -> Option<u64> {
        let mut candidates: BTreeSet<u64> = BTreeSet::new();
        for member in loop_set {
            for target in self.can_jump_to(*member) {
                if !loop_set.contains(&target) && self.flow.contains_block(target) {
                    candidates.insert(target);
                }
            }
        }
        for candidate in &candidates {
            debug!(candidate, "loop exit candidate");
        }
        candidates.first().copied()
    }
}
