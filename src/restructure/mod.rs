//! Goto elimination and structured control-flow recovery.
//!
//! The restructurer rewrites the flattened `if`+`goto` form produced by lifting and
//! SSA simplification into `if/else`, `while`, `do-while`, `break` and `continue`
//! shapes. It applies two filter families to fixed point:
//!
//! - **Block filters** operate on a whole block and its neighbors:
//!   condition fusion, loop materialization, no-return cleanup, tail merging.
//! - **Container filters** operate on a single statement container and are applied
//!   depth-first, nested containers before the containing one:
//!   break conversion, else-tail extraction, empty-if cleanup, else-if preference.
//!
//! The driver restarts the whole scan as soon as any single filter reports a change:
//! most rewrites invalidate block and container identities, so continuing a stale
//! scan is not worth the bookkeeping. The scan terminates when one complete pass
//! changes nothing.

mod blocks;
mod containers;
mod loops;

use tracing::warn;

use crate::{
    arch::Architecture,
    flow::FlowGraph,
    ir::{ContainerId, ExprId, StmtId, StmtKind},
    Result,
};

/// Defensive cap on full restart scans.
///
/// Every filter strictly reduces gotos or graph size, so the cap is unreachable in
/// practice; hitting it is logged as a bug.
const MAX_SCANS: usize = 4096;

/// The canonical flattened two-way branch at the end of a block:
/// `if (cond) goto if_target;` followed by `goto goto_target;`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BranchShape {
    pub if_stmt: StmtId,
    pub cond: ExprId,
    pub if_target: u64,
    pub goto_stmt: StmtId,
    pub goto_target: u64,
}

/// Rewrites one function's flow graph into structured pseudocode.
///
/// # Examples
///
/// ```rust,ignore
/// use pseudoscope::restructure::Restructurer;
///
/// Restructurer::new(&mut flow, &arch).run()?;
/// println!("{}", flow.to_pseudocode());
/// ```
pub struct Restructurer<'a> {
    flow: &'a mut FlowGraph,
    arch: &'a dyn Architecture,
}

impl<'a> Restructurer<'a> {
    /// Creates a restructurer over `flow`.
    pub fn new(flow: &'a mut FlowGraph, arch: &'a dyn Architecture) -> Self {
        Self { flow, arch }
    }

    /// Runs all filters to fixed point.
    ///
    /// # Errors
    ///
    /// Propagates arena invariant violations (always a bug in a filter).
    pub fn run(&mut self) -> Result<()> {
        for _ in 0..MAX_SCANS {
            if !self.run_once()? {
                return Ok(());
            }
        }
        warn!("restructuring scan cap hit, leaving flow partially structured");
        Ok(())
    }

    /// One scan over all blocks; true when any filter changed something.
    fn run_once(&mut self) -> Result<bool> {
        let order: Vec<u64> = self.flow.iter_blocks().collect();
        for ea in order {
            if !self.flow.contains_block(ea) {
                continue;
            }
            if self.combine_conditions(ea)? {
                return Ok(true);
            }
            if self.combine_loops(ea)? {
                return Ok(true);
            }
            if self.combine_noreturns(ea)? {
                return Ok(true);
            }
            if self.combine_block_tail(ea)? {
                return Ok(true);
            }
            if self.combine_if_tails(ea)? {
                return Ok(true);
            }
            let container = match self.flow.block(ea) {
                Some(block) => block.container,
                None => continue,
            };
            if self.apply_container_filters(container)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Applies container filters depth-first: nested containers before this one.
    fn apply_container_filters(&mut self, container: ContainerId) -> Result<bool> {
        let stmts: Vec<StmtId> = self.flow.ir.container_stmts(container).to_vec();
        for stmt in stmts {
            for nested in self.flow.ir.stmt(stmt).containers() {
                if self.apply_container_filters(nested)? {
                    return Ok(true);
                }
            }
        }
        if self.convert_break(container)? {
            return Ok(true);
        }
        if self.combine_else_tails(container)? {
            return Ok(true);
        }
        if self.combine_ifs(container)? {
            return Ok(true);
        }
        if self.convert_elseif(container)? {
            return Ok(true);
        }
        Ok(false)
    }

    /// Recognizes the flattened branch shape at the end of a block's container.
    pub(crate) fn branch_shape(&self, ea: u64) -> Option<BranchShape> {
        let block = self.flow.block(ea)?;
        let ir = &self.flow.ir;
        let stmts = ir.container_stmts(block.container);
        if stmts.len() < 2 {
            return None;
        }
        let goto_stmt = stmts[stmts.len() - 1];
        let goto_target = ir.goto_target(goto_stmt)?;
        let if_stmt = stmts[stmts.len() - 2];
        let StmtKind::If {
            cond,
            then_body,
            else_body: None,
        } = ir.stmt(if_stmt)
        else {
            return None;
        };
        let body = ir.container_stmts(*then_body);
        if body.len() != 1 {
            return None;
        }
        let if_target = ir.goto_target(body[0])?;
        Some(BranchShape {
            if_stmt,
            cond: *cond,
            if_target,
            goto_stmt,
            goto_target,
        })
    }

    /// Returns the block whose top-level container this is, if any.
    pub(crate) fn container_block(&self, container: ContainerId) -> Option<u64> {
        self.flow
            .block_addresses()
            .into_iter()
            .find(|ea| self.flow.block(*ea).is_some_and(|b| b.container == container))
    }

    /// Detaches an expression owned by a statement, leaving a zero literal behind.
    ///
    /// Used when a condition is about to be reused in a rebuilt statement while the
    /// original statement is removed.
    pub(crate) fn detach_expr(&mut self, expr: ExprId) -> Result<ExprId> {
        let dummy = self.flow.ir.value(0, 1);
        self.flow.ir.replace(expr, dummy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{BinaryOp, RegisterBank},
        test::ScriptedArch,
    };

    fn reg(flow: &mut FlowGraph, name: &str, number: u16) -> ExprId {
        flow.ir.reg(RegisterBank::General, number, 32, Some(name))
    }

    /// `ecx = ecx + 1;` as a statement.
    fn increment(flow: &mut FlowGraph) -> StmtId {
        let def = reg(flow, "ecx", 2);
        let src = reg(flow, "ecx", 2);
        let one = flow.ir.value(1, 32);
        let add = flow.ir.binary(BinaryOp::Add, src, one).unwrap();
        let assign = flow.ir.assign(def, add).unwrap();
        flow.ir.stmt_expr(assign).unwrap()
    }

    fn push_if_goto(flow: &mut FlowGraph, container: crate::ir::ContainerId, cond: ExprId, target: u64) {
        let body = flow.ir.new_container();
        let goto = flow.ir.stmt_goto(target, 64).unwrap();
        flow.ir.push_stmt(body, goto).unwrap();
        let stmt = flow.ir.stmt_if(cond, body).unwrap();
        flow.ir.push_stmt(container, stmt).unwrap();
    }

    fn push_goto(flow: &mut FlowGraph, container: crate::ir::ContainerId, target: u64) {
        let goto = flow.ir.stmt_goto(target, 64).unwrap();
        flow.ir.push_stmt(container, goto).unwrap();
    }

    /// The canonical three-block loop: A tests, B increments and jumps back, C is
    /// the exit. The loop pass must produce a single `while` in A, a trailing goto
    /// to C, and dissolve B.
    #[test]
    fn test_while_loop_classification() {
        let mut flow = FlowGraph::new(0x10);
        let a = flow.add_block(0x10);
        let b = flow.add_block(0x20);
        let _c = flow.add_block(0x30);

        let cond = reg(&mut flow, "eax", 0);
        push_if_goto(&mut flow, a, cond, 0x30);
        push_goto(&mut flow, a, 0x20);

        let inc = increment(&mut flow);
        flow.ir.push_stmt(b, inc).unwrap();
        push_goto(&mut flow, b, 0x10);

        let ret = flow.ir.stmt_return(None).unwrap();
        let c = flow.block(0x30).unwrap().container;
        flow.ir.push_stmt(c, ret).unwrap();

        flow.add_edge(0x10, 0x30);
        flow.add_edge(0x10, 0x20);
        flow.add_edge(0x20, 0x10);

        let arch = ScriptedArch::new();
        let mut restructurer = Restructurer::new(&mut flow, &arch);
        assert!(restructurer.combine_loops(0x10).unwrap());

        let a_stmts = restructurer.flow.ir.container_stmts(a).to_vec();
        assert_eq!(a_stmts.len(), 2);
        let StmtKind::While { cond, body } = restructurer.flow.ir.stmt(a_stmts[0]).clone() else {
            panic!("expected while loop");
        };
        // `if (eax) goto exit` loops while the condition is false.
        assert_eq!(restructurer.flow.ir.display_expr(cond).to_string(), "!eax");
        assert_eq!(restructurer.flow.ir.container_stmts(body).len(), 1);
        assert_eq!(restructurer.flow.ir.goto_target(a_stmts[1]), Some(0x30));

        assert!(!restructurer.flow.contains_block(0x20));
        assert!(restructurer.flow.contains_block(0x30));
    }

    /// A single block testing at the bottom becomes a do-while.
    #[test]
    fn test_do_while_classification() {
        let mut flow = FlowGraph::new(0x10);
        let a = flow.add_block(0x10);
        let c = flow.add_block(0x30);

        let inc = increment(&mut flow);
        flow.ir.push_stmt(a, inc).unwrap();
        let cond = reg(&mut flow, "eax", 0);
        push_if_goto(&mut flow, a, cond, 0x10);
        push_goto(&mut flow, a, 0x30);

        let ret = flow.ir.stmt_return(None).unwrap();
        flow.ir.push_stmt(c, ret).unwrap();

        flow.add_edge(0x10, 0x10);
        flow.add_edge(0x10, 0x30);

        let arch = ScriptedArch::new();
        let mut restructurer = Restructurer::new(&mut flow, &arch);
        assert!(restructurer.combine_loops(0x10).unwrap());

        let a_stmts = restructurer.flow.ir.container_stmts(a).to_vec();
        assert_eq!(a_stmts.len(), 2);
        let StmtKind::DoWhile { cond, body } = restructurer.flow.ir.stmt(a_stmts[0]).clone() else {
            panic!("expected do-while loop");
        };
        assert_eq!(restructurer.flow.ir.display_expr(cond).to_string(), "eax");
        assert_eq!(restructurer.flow.ir.container_stmts(body).len(), 1);
        assert_eq!(restructurer.flow.ir.goto_target(a_stmts[1]), Some(0x30));
    }

    /// A goto out of a loop body becomes `break`.
    #[test]
    fn test_convert_break() {
        let mut flow = FlowGraph::new(0x10);
        let a = flow.add_block(0x10);

        let body = flow.ir.new_container();
        push_goto(&mut flow, body, 0x30);
        let cond = reg(&mut flow, "eax", 0);
        let while_stmt = flow.ir.stmt_while(cond, body).unwrap();
        flow.ir.push_stmt(a, while_stmt).unwrap();
        push_goto(&mut flow, a, 0x30);

        let arch = ScriptedArch::new();
        let mut restructurer = Restructurer::new(&mut flow, &arch);
        assert!(restructurer.convert_break(a).unwrap());

        let body_stmts = restructurer.flow.ir.container_stmts(body).to_vec();
        assert!(matches!(
            restructurer.flow.ir.stmt(body_stmts[0]),
            StmtKind::Break
        ));
    }

    /// An unconditional goto to a single-predecessor block merges the two blocks.
    #[test]
    fn test_combine_block_tail() {
        let mut flow = FlowGraph::new(0x10);
        let a = flow.add_block(0x10);
        let b = flow.add_block(0x20);

        push_goto(&mut flow, a, 0x20);
        let ret = flow.ir.stmt_return(None).unwrap();
        flow.ir.push_stmt(b, ret).unwrap();
        flow.add_edge(0x10, 0x20);

        let arch = ScriptedArch::new();
        let mut restructurer = Restructurer::new(&mut flow, &arch);
        assert!(restructurer.combine_block_tail(0x10).unwrap());

        let a_stmts = restructurer.flow.ir.container_stmts(a).to_vec();
        assert_eq!(a_stmts.len(), 1);
        assert!(matches!(
            restructurer.flow.ir.stmt(a_stmts[0]),
            StmtKind::Return { .. }
        ));
        assert!(!restructurer.flow.contains_block(0x20));
    }

    /// Two chained branch blocks sharing a target fuse into one `||` condition.
    #[test]
    fn test_combine_conditions() {
        let mut flow = FlowGraph::new(0x10);
        let a = flow.add_block(0x10);
        let b = flow.add_block(0x20);
        let _t = flow.add_block(0x40);
        let _f = flow.add_block(0x50);

        let c1 = reg(&mut flow, "eax", 0);
        push_if_goto(&mut flow, a, c1, 0x40);
        push_goto(&mut flow, a, 0x20);

        let c2 = reg(&mut flow, "ebx", 1);
        push_if_goto(&mut flow, b, c2, 0x40);
        push_goto(&mut flow, b, 0x50);

        flow.add_edge(0x10, 0x40);
        flow.add_edge(0x10, 0x20);
        flow.add_edge(0x20, 0x40);
        flow.add_edge(0x20, 0x50);

        let arch = ScriptedArch::new();
        let mut restructurer = Restructurer::new(&mut flow, &arch);
        assert!(restructurer.combine_conditions(0x10).unwrap());

        assert!(!restructurer.flow.contains_block(0x20));
        let shape = restructurer.branch_shape(0x10).expect("fused branch shape");
        assert_eq!(shape.if_target, 0x40);
        assert_eq!(shape.goto_target, 0x50);
        assert_eq!(
            restructurer.flow.ir.display_expr(shape.cond).to_string(),
            "(eax || ebx)"
        );
    }

    /// Statements between a converging `if` and the final goto move into an else.
    #[test]
    fn test_combine_else_tails() {
        let mut flow = FlowGraph::new(0x10);
        let a = flow.add_block(0x10);

        let cond = reg(&mut flow, "eax", 0);
        let then_body = flow.ir.new_container();
        let x = reg(&mut flow, "ebx", 1);
        let one = flow.ir.value(1, 32);
        let assign = flow.ir.assign(x, one).unwrap();
        let s = flow.ir.stmt_expr(assign).unwrap();
        flow.ir.push_stmt(then_body, s).unwrap();
        push_goto(&mut flow, then_body, 0x40);
        let if_stmt = flow.ir.stmt_if(cond, then_body).unwrap();
        flow.ir.push_stmt(a, if_stmt).unwrap();

        let y = reg(&mut flow, "ecx", 2);
        let two = flow.ir.value(2, 32);
        let assign2 = flow.ir.assign(y, two).unwrap();
        let s2 = flow.ir.stmt_expr(assign2).unwrap();
        flow.ir.push_stmt(a, s2).unwrap();
        push_goto(&mut flow, a, 0x40);

        let arch = ScriptedArch::new();
        let mut restructurer = Restructurer::new(&mut flow, &arch);
        assert!(restructurer.combine_else_tails(a).unwrap());

        let a_stmts = restructurer.flow.ir.container_stmts(a).to_vec();
        assert_eq!(a_stmts.len(), 2, "if and final goto remain at top level");
        let StmtKind::If {
            then_body,
            else_body: Some(else_body),
            ..
        } = restructurer.flow.ir.stmt(a_stmts[0]).clone()
        else {
            panic!("expected if with else branch");
        };
        assert_eq!(restructurer.flow.ir.container_stmts(then_body).len(), 1);
        assert_eq!(restructurer.flow.ir.container_stmts(else_body).len(), 1);
    }

    /// An if with an empty then-branch and a populated else inverts.
    #[test]
    fn test_combine_ifs_inverts_empty_then() {
        let mut flow = FlowGraph::new(0x10);
        let a = flow.add_block(0x10);

        let cond = reg(&mut flow, "eax", 0);
        let then_body = flow.ir.new_container();
        let else_body = flow.ir.new_container();
        let x = reg(&mut flow, "ebx", 1);
        let one = flow.ir.value(1, 32);
        let assign = flow.ir.assign(x, one).unwrap();
        let s = flow.ir.stmt_expr(assign).unwrap();
        flow.ir.push_stmt(else_body, s).unwrap();
        let if_stmt = flow.ir.stmt_if(cond, then_body).unwrap();
        flow.ir.set_else_body(if_stmt, Some(else_body)).unwrap();
        flow.ir.push_stmt(a, if_stmt).unwrap();

        let arch = ScriptedArch::new();
        let mut restructurer = Restructurer::new(&mut flow, &arch);
        assert!(restructurer.combine_ifs(a).unwrap());

        let StmtKind::If {
            cond,
            then_body,
            else_body,
        } = restructurer.flow.ir.stmt(a_first(restructurer.flow, a)).clone()
        else {
            panic!("expected if statement");
        };
        assert_eq!(restructurer.flow.ir.display_expr(cond).to_string(), "!eax");
        assert_eq!(restructurer.flow.ir.container_stmts(then_body).len(), 1);
        assert!(else_body.is_none());
    }

    fn a_first(flow: &FlowGraph, container: crate::ir::ContainerId) -> StmtId {
        flow.ir.container_stmts(container)[0]
    }
}
