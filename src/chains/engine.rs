//! The chain-driven simplification passes.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::{
    arch::{Architecture, CallingConvention},
    chains::{Chain, ChainInstance, LocationFilter, PropagationFlags},
    flow::FlowGraph,
    ir::{BinaryOp, ContainerId, ExprId, ExprKind, IrArena, Parent, StmtId, StmtKind, UnaryOp},
    simplify, Result,
};

/// Defensive cap on fixed-point rounds of any chain pass.
///
/// Every pass terminates on its own ("no further safe transformation applies");
/// hitting the cap indicates a bug and is logged, never silently truncated.
const MAX_PASSES: usize = 256;

fn as_assign(ir: &IrArena, e: ExprId) -> Option<(ExprId, ExprId)> {
    match ir.expr(e) {
        ExprKind::Binary {
            op: BinaryOp::Assign,
            left,
            right,
        } => Some((*left, *right)),
        _ => None,
    }
}

/// Def-use chain collection plus the propagation/elimination passes over one flow.
///
/// The engine borrows the flow graph mutably for the duration of a pass sequence;
/// chains are re-collected from scratch after every structural change because
/// statement indices and operand identities are invalidated by most rewrites.
///
/// # Examples
///
/// ```rust,ignore
/// use pseudoscope::chains::{ChainEngine, LocationFilter, PropagationFlags};
///
/// let mut engine = ChainEngine::new(&mut flow, &arch);
/// engine.remove_unused_definitions(LocationFilter::FLAGS)?;
/// engine.propagate_expressions(PropagationFlags::STACK_LOCATIONS)?;
/// engine.glue_increments()?;
/// ```
pub struct ChainEngine<'a> {
    flow: &'a mut FlowGraph,
    arch: &'a dyn Architecture,
}

impl<'a> ChainEngine<'a> {
    /// Creates an engine over `flow` using `arch` for stack-location queries.
    pub fn new(flow: &'a mut FlowGraph, arch: &'a dyn Architecture) -> Self {
        Self { flow, arch }
    }

    // ------------------------------------------------------------------
    // Chain collection
    // ------------------------------------------------------------------

    /// Collects every chain matching `filter` reachable from the entry block.
    ///
    /// One forward traversal: blocks in [`FlowGraph::iter_blocks`] order, statements
    /// in container order, recursing into nested bodies. Operands are grouped by
    /// exact `(kind, which, version)` equality.
    #[must_use]
    pub fn collect_chains(&self, filter: LocationFilter) -> Vec<Chain> {
        self.collect_with_order(filter).0
    }

    /// Collects chains plus a statement → traversal-ordinal map.
    ///
    /// The ordinal generalizes "statement index" across containers and is what the
    /// propagation safety check uses to decide whether a redefinition lies between
    /// a definition and a use.
    fn collect_with_order(
        &self,
        filter: LocationFilter,
    ) -> (Vec<Chain>, HashMap<StmtId, usize>) {
        let mut chains: Vec<Chain> = Vec::new();
        let mut order = HashMap::new();
        let mut counter = 0usize;
        for ea in self.flow.iter_blocks() {
            let Some(block) = self.flow.block(ea) else {
                continue;
            };
            self.visit_container(block.container, ea, filter, &mut chains, &mut order, &mut counter);
        }
        (chains, order)
    }

    fn visit_container(
        &self,
        container: ContainerId,
        block: u64,
        filter: LocationFilter,
        chains: &mut Vec<Chain>,
        order: &mut HashMap<StmtId, usize>,
        counter: &mut usize,
    ) {
        let ir = &self.flow.ir;
        for stmt in ir.container_stmts(container) {
            order.insert(*stmt, *counter);
            *counter += 1;
            for root in ir.stmt(*stmt).exprs() {
                for op in ir.post_order(root) {
                    if !ir.is_assignable(op) || !filter.matches(ir.expr(op)) {
                        continue;
                    }
                    let instance = ChainInstance {
                        block,
                        stmt: *stmt,
                        operand: op,
                    };
                    match chains
                        .iter_mut()
                        .find(|c| ir.exprs_equal(c.template(), op))
                    {
                        Some(chain) => chain.instances.push(instance),
                        None => chains.push(Chain {
                            instances: vec![instance],
                        }),
                    }
                }
            }
            for nested in ir.stmt(*stmt).containers() {
                self.visit_container(nested, block, filter, chains, order, counter);
            }
        }
    }

    /// Returns the right-hand side of a definition operand, when it is the left
    /// side of a plain assignment.
    fn rhs_of_def(&self, operand: ExprId) -> Option<ExprId> {
        let ir = &self.flow.ir;
        match ir.parent(operand)? {
            Parent::Expr(p, 0) => {
                let (lhs, rhs) = as_assign(ir, p)?;
                (lhs == operand).then_some(rhs)
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Decides whether a chain's definition may be folded into its uses.
    ///
    /// The rules, in order:
    ///
    /// 1. The chain needs at least one use and one definition.
    /// 2. Multiple definitions are allowed only when all right-hand sides are
    ///    structurally identical (a value redefined identically on every path).
    /// 3. A call right-hand side never duplicates across multiple uses.
    /// 4. Plain-register definitions always propagate.
    /// 5. Anything else is gated by `flags`: multi-use propagation requires
    ///    [`PropagationFlags::SINGLE_USES`] to be absent, and the location kind must
    ///    be enabled by `ANY`, `STACK_LOCATIONS`, `REGISTERS` or `FLAGS`.
    #[must_use]
    pub fn can_propagate(&self, chain: &Chain, flags: PropagationFlags) -> bool {
        let ir = &self.flow.ir;
        let defines = chain.defines(ir);
        let uses = chain.uses(ir);
        if defines.is_empty() || uses.is_empty() {
            return false;
        }

        let Some(value) = self.rhs_of_def(defines[0].operand) else {
            return false;
        };
        if defines.len() > 1 {
            for d in &defines[1..] {
                let Some(other) = self.rhs_of_def(d.operand) else {
                    return false;
                };
                if !ir.exprs_equal(value, other) {
                    return false;
                }
            }
        }

        if matches!(ir.expr(value), ExprKind::Call { .. }) && uses.len() > 1 {
            return false;
        }

        let lhs = defines[0].operand;
        if ir.expr(lhs).is_general_register() {
            return true;
        }

        if uses.len() > 1 && flags.contains(PropagationFlags::SINGLE_USES) {
            return false;
        }
        flags.contains(PropagationFlags::ANY)
            || (flags.contains(PropagationFlags::STACK_LOCATIONS)
                && self.arch.is_stack_variable(ir, lhs))
            || (flags.contains(PropagationFlags::REGISTERS) && ir.expr(lhs).is_general_register())
            || (flags.contains(PropagationFlags::FLAGS) && ir.expr(lhs).is_flag_register())
    }

    /// Checks whether substituting `value` at `use_site` would read a location that
    /// was redefined between the definition and the use.
    fn propagation_blocked(
        &self,
        chains: &[Chain],
        def: &ChainInstance,
        use_site: &ChainInstance,
        value: ExprId,
        order: &HashMap<StmtId, usize>,
    ) -> bool {
        let ir = &self.flow.ir;
        let (Some(&def_ord), Some(&use_ord)) = (order.get(&def.stmt), order.get(&use_site.stmt))
        else {
            return true;
        };
        for fv in ir.post_order(value) {
            if !ir.is_assignable(fv) || ir.is_definition(fv) {
                continue;
            }
            let Some(chain) = chains.iter().find(|c| ir.exprs_equal(c.template(), fv)) else {
                continue;
            };
            for inst in &chain.instances {
                if !ir.is_definition(inst.operand) || inst.stmt == def.stmt {
                    continue;
                }
                let Some(&redef_ord) = order.get(&inst.stmt) else {
                    return true;
                };
                if def_ord < redef_ord && redef_ord < use_ord {
                    return true;
                }
            }
        }
        false
    }

    /// Substitutes a chain's defining value into its uses, returning the number of
    /// substitutions performed.
    ///
    /// Uses whose substitution would be unsafe are skipped individually. When every
    /// use was substituted the defining statements are removed as dead; statements
    /// that collapse to `x = x` are removed outright.
    fn propagate_chain(
        &mut self,
        chains: &[Chain],
        index: usize,
        order: &HashMap<StmtId, usize>,
    ) -> Result<usize> {
        let chain = &chains[index];
        let defines: Vec<ChainInstance> =
            chain.defines(&self.flow.ir).into_iter().copied().collect();
        let uses: Vec<ChainInstance> = chain.uses(&self.flow.ir).into_iter().copied().collect();
        let Some(value) = self.rhs_of_def(defines[0].operand) else {
            return Ok(0);
        };

        let mut substituted = 0usize;
        let mut skipped = 0usize;
        for u in &uses {
            // A prior substitution in the same statement may have rewritten this
            // operand away; the surviving use is picked up next round.
            if self.flow.ir.owning_stmt(u.operand).is_none() {
                skipped += 1;
                continue;
            }
            if self.propagation_blocked(chains, &defines[0], u, value, order) {
                skipped += 1;
                continue;
            }

            let copy = self.flow.ir.copy_expr(value);
            self.flow.ir.replace(u.operand, copy)?;
            for root in self.flow.ir.stmt(u.stmt).exprs() {
                simplify::run(&mut self.flow.ir, root, true)?;
            }
            self.collapse_self_assignment(u.stmt)?;
            substituted += 1;
        }

        if skipped == 0 && substituted > 0 {
            for d in &defines {
                if self.flow.ir.stmt_container(d.stmt).is_some() {
                    self.flow.ir.remove_stmt(d.stmt)?;
                }
            }
        }
        Ok(substituted)
    }

    /// Removes `stmt` if substitution collapsed it to `x = x`.
    fn collapse_self_assignment(&mut self, stmt: StmtId) -> Result<()> {
        let ir = &self.flow.ir;
        if ir.stmt_container(stmt).is_none() {
            return Ok(());
        }
        let StmtKind::Expr { expr } = ir.stmt(stmt) else {
            return Ok(());
        };
        let Some((lhs, rhs)) = as_assign(ir, *expr) else {
            return Ok(());
        };
        if ir.exprs_equal(lhs, rhs) {
            self.flow.ir.remove_stmt(stmt)?;
        }
        Ok(())
    }

    /// Runs expression propagation to fixed point.
    ///
    /// Each round re-collects chains, propagates the first eligible chain that makes
    /// progress, and restarts — structural rewrites invalidate the previous round's
    /// instances, so incremental updates are not worth their complexity.
    ///
    /// # Errors
    ///
    /// Propagates arena invariant violations (always a bug).
    pub fn propagate_expressions(&mut self, flags: PropagationFlags) -> Result<()> {
        for _ in 0..MAX_PASSES {
            let (chains, order) = self.collect_with_order(LocationFilter::all());
            let mut progressed = false;
            for index in 0..chains.len() {
                if !self.can_propagate(&chains[index], flags) {
                    continue;
                }
                if self.propagate_chain(&chains, index, &order)? > 0 {
                    progressed = true;
                    break;
                }
            }
            if !progressed {
                return Ok(());
            }
        }
        warn!("propagation round cap hit, leaving flow partially propagated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dead definition elimination
    // ------------------------------------------------------------------

    /// Removes definitions with no remaining uses, repeating until nothing changes.
    ///
    /// Calls survive: a bare call statement is never touched, and an unused
    /// `reg = call()` is weakened to a bare `call()`. Unused call-result assignments
    /// to non-register locations are left alone — a deliberate asymmetry carried
    /// over from the reference behavior.
    ///
    /// # Errors
    ///
    /// Propagates arena invariant violations (always a bug).
    pub fn remove_unused_definitions(&mut self, filter: LocationFilter) -> Result<()> {
        for _ in 0..MAX_PASSES {
            let chains = self.collect_chains(filter);
            let mut changed = false;
            for chain in &chains {
                if !chain.uses(&self.flow.ir).is_empty() {
                    continue;
                }
                let defines: Vec<ChainInstance> =
                    chain.defines(&self.flow.ir).into_iter().copied().collect();
                for d in defines {
                    if self.flow.ir.stmt_container(d.stmt).is_none() {
                        continue;
                    }
                    changed |= self.remove_dead_definition(&d)?;
                }
            }
            if !changed {
                return Ok(());
            }
        }
        warn!("dead-definition round cap hit");
        Ok(())
    }

    fn remove_dead_definition(&mut self, d: &ChainInstance) -> Result<bool> {
        let (lhs_is_def_op, rhs) = {
            let ir = &self.flow.ir;
            let StmtKind::Expr { expr } = ir.stmt(d.stmt) else {
                return Ok(false);
            };
            if matches!(ir.expr(*expr), ExprKind::Call { .. }) {
                // A bare call may have side effects even if its result is unused.
                return Ok(false);
            }
            match as_assign(ir, *expr) {
                Some((lhs, rhs)) => (lhs == d.operand, Some(rhs)),
                None => (false, None),
            }
        };

        if let (true, Some(rhs)) = (lhs_is_def_op, rhs) {
            if matches!(self.flow.ir.expr(rhs), ExprKind::Call { .. }) {
                let lhs_reg = {
                    let ir = &self.flow.ir;
                    ir.expr(d.operand).is_general_register()
                };
                if lhs_reg {
                    // Keep the call, drop the discarded assignment.
                    let dummy = self.flow.ir.value(0, 32);
                    let call = self.flow.ir.replace(rhs, dummy)?;
                    self.flow
                        .ir
                        .set_stmt_kind(d.stmt, StmtKind::Expr { expr: call })?;
                    return Ok(true);
                }
                return Ok(false);
            }
        }
        self.flow.ir.remove_stmt(d.stmt)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Restore elimination
    // ------------------------------------------------------------------

    /// Detects and removes callee-saved spill/restore pairs.
    ///
    /// Pattern: a chain with one definition `saved = Y` and uses that are all
    /// restores `Y' = saved` back into the same storage as `Y`, where `Y`'s own
    /// version is used nowhere else. The spill and every restore are dead; both are
    /// removed and `Y`'s un-versioned descriptor is reported.
    ///
    /// # Errors
    ///
    /// Propagates arena invariant violations (always a bug).
    pub fn eliminate_restores(&mut self) -> Result<Vec<ExprId>> {
        let chains = self.collect_chains(LocationFilter::all());
        let mut restored = Vec::new();

        for chain in &chains {
            let defines: Vec<ChainInstance> =
                chain.defines(&self.flow.ir).into_iter().copied().collect();
            let uses: Vec<ChainInstance> =
                chain.uses(&self.flow.ir).into_iter().copied().collect();
            if defines.len() != 1 || uses.is_empty() {
                continue;
            }
            let Some(saved_value) = self.rhs_of_def(defines[0].operand) else {
                continue;
            };
            if !self.flow.ir.is_assignable(saved_value) {
                continue;
            }

            // The saved location's version must be used exactly once: right here.
            let Some(value_chain) = chains
                .iter()
                .find(|c| self.flow.ir.exprs_equal(c.template(), saved_value))
            else {
                continue;
            };
            let value_uses = value_chain.uses(&self.flow.ir);
            if value_uses.len() != 1 || value_uses[0].operand != saved_value {
                continue;
            }

            // Every use must be a plain restore into the same storage.
            let ir = &self.flow.ir;
            let all_restores = uses.iter().all(|u| {
                let StmtKind::Expr { expr } = ir.stmt(u.stmt) else {
                    return false;
                };
                let Some((lhs, rhs)) = as_assign(ir, *expr) else {
                    return false;
                };
                rhs == u.operand && ir.exprs_equal_no_index(lhs, saved_value)
            });
            if !all_restores {
                continue;
            }

            if self.flow.ir.stmt_container(defines[0].stmt).is_some() {
                self.flow.ir.remove_stmt(defines[0].stmt)?;
            }
            for u in &uses {
                if self.flow.ir.stmt_container(u.stmt).is_some() {
                    self.flow.ir.remove_stmt(u.stmt)?;
                }
            }

            let descriptor = self.flow.ir.copy_expr(saved_value);
            self.flow.ir.set_ssa_index(descriptor, None);
            self.flow.ir.set_definition(descriptor, false);
            debug!(
                "restored location: {}",
                self.flow.ir.display_expr(descriptor)
            );
            restored.push(descriptor);
        }
        Ok(restored)
    }

    // ------------------------------------------------------------------
    // Increment gluing
    // ------------------------------------------------------------------

    /// Fuses isolated `v = v ± 1` statements into pre/post operators at an adjacent
    /// use, across every container of the flow.
    ///
    /// # Errors
    ///
    /// Propagates arena invariant violations (always a bug).
    pub fn glue_increments(&mut self) -> Result<()> {
        let containers = self.all_containers();
        for container in containers {
            self.glue_container(container)?;
        }
        Ok(())
    }

    fn all_containers(&self) -> Vec<ContainerId> {
        let mut out = Vec::new();
        for ea in self.flow.iter_blocks() {
            let Some(block) = self.flow.block(ea) else {
                continue;
            };
            self.nested_containers(block.container, &mut out);
        }
        out
    }

    fn nested_containers(&self, container: ContainerId, out: &mut Vec<ContainerId>) {
        out.push(container);
        for stmt in self.flow.ir.container_stmts(container) {
            for nested in self.flow.ir.stmt(*stmt).containers() {
                self.nested_containers(nested, out);
            }
        }
    }

    /// Returns `(lhs, delta)` when `stmt` is `v = v + 1` or `v = v - 1` over the
    /// same un-versioned storage with a literal one.
    fn as_increment(&self, stmt: StmtId) -> Option<(ExprId, i64)> {
        let ir = &self.flow.ir;
        let StmtKind::Expr { expr } = ir.stmt(stmt) else {
            return None;
        };
        let (lhs, rhs) = as_assign(ir, *expr)?;
        let (op, base, amount) = match ir.expr(rhs) {
            ExprKind::Binary { op, left, right }
                if matches!(op, BinaryOp::Add | BinaryOp::Sub) =>
            {
                (*op, *left, *right)
            }
            _ => return None,
        };
        if ir.expr(amount).as_value() != Some(1) {
            return None;
        }
        if !ir.exprs_equal_no_index(base, lhs) {
            return None;
        }
        let delta = if op == BinaryOp::Add { 1 } else { -1 };
        Some((lhs, delta))
    }

    fn glue_container(&mut self, container: ContainerId) -> Result<()> {
        // Locations that have at least one increment statement here.
        let stmts: Vec<StmtId> = self.flow.ir.container_stmts(container).to_vec();
        let mut templates: Vec<ExprId> = Vec::new();
        for stmt in &stmts {
            if let Some((lhs, _)) = self.as_increment(*stmt) {
                if !templates
                    .iter()
                    .any(|t| self.flow.ir.exprs_equal_no_index(*t, lhs))
                {
                    templates.push(lhs);
                }
            }
        }
        for template in templates {
            self.glue_location(container, template)?;
        }
        Ok(())
    }

    fn glue_location(&mut self, container: ContainerId, template: ExprId) -> Result<()> {
        #[derive(Clone, Copy)]
        enum Occurrence {
            Inc { stmt: StmtId, delta: i64 },
            Use { operand: ExprId },
        }

        let stmts: Vec<StmtId> = self.flow.ir.container_stmts(container).to_vec();
        let mut occurrences: Vec<Occurrence> = Vec::new();
        for stmt in &stmts {
            if let Some((lhs, delta)) = self.as_increment(*stmt) {
                if self.flow.ir.exprs_equal_no_index(lhs, template) {
                    occurrences.push(Occurrence::Inc { stmt: *stmt, delta });
                    continue;
                }
            }
            let ir = &self.flow.ir;
            for root in ir.stmt(*stmt).exprs() {
                if let Some(op) = ir.post_order(root).into_iter().find(|op| {
                    ir.is_assignable(*op)
                        && !ir.is_definition(*op)
                        && ir.exprs_equal_no_index(*op, template)
                }) {
                    occurrences.push(Occurrence::Use { operand: op });
                    break;
                }
            }
        }

        let eligible = |ir: &IrArena, op: ExprId| -> bool {
            if ir.owning_stmt(op).is_none() {
                return false;
            }
            // A candidate already wrapped by pre/post must not be wrapped again.
            match ir.parent(op) {
                Some(Parent::Expr(p, _)) => !matches!(
                    ir.expr(p),
                    ExprKind::Unary { op, .. } if op.is_inc_dec()
                ),
                _ => true,
            }
        };

        let mut i = 0usize;
        while i < occurrences.len() {
            let Occurrence::Inc { .. } = occurrences[i] else {
                i += 1;
                continue;
            };
            let mut j = i;
            while j + 1 < occurrences.len()
                && matches!(occurrences[j + 1], Occurrence::Inc { .. })
            {
                j += 1;
            }

            let mut front = i;
            let mut back = j;

            // Leading use absorbs the front increment as a post operator.
            if i > 0 && front <= back {
                if let Occurrence::Use { operand } = occurrences[i - 1] {
                    if eligible(&self.flow.ir, operand) {
                        let Occurrence::Inc { stmt, delta } = occurrences[front] else {
                            unreachable!()
                        };
                        let wrapper_op = if delta > 0 {
                            UnaryOp::PostInc
                        } else {
                            UnaryOp::PostDec
                        };
                        self.wrap_use(operand, wrapper_op)?;
                        self.flow.ir.remove_stmt(stmt)?;
                        front += 1;
                    }
                }
            }

            // Trailing use absorbs the back increment as a pre operator.
            if j + 1 < occurrences.len() && front <= back {
                if let Occurrence::Use { operand } = occurrences[j + 1] {
                    if eligible(&self.flow.ir, operand) {
                        let Occurrence::Inc { stmt, delta } = occurrences[back] else {
                            unreachable!()
                        };
                        let wrapper_op = if delta > 0 {
                            UnaryOp::PreInc
                        } else {
                            UnaryOp::PreDec
                        };
                        self.wrap_use(operand, wrapper_op)?;
                        self.flow.ir.remove_stmt(stmt)?;
                        if back > 0 {
                            back -= 1;
                        }
                    }
                }
            }

            i = j + 1;
        }
        Ok(())
    }

    fn wrap_use(&mut self, operand: ExprId, op: UnaryOp) -> Result<()> {
        let copy = self.flow.ir.copy_expr(operand);
        let wrapper = self.flow.ir.unary(op, copy)?;
        self.flow.ir.replace(operand, wrapper)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calling-convention argument collection
    // ------------------------------------------------------------------

    /// Hands the set of live, unconsumed definitions in front of every call
    /// statement to the calling convention's stack processor.
    ///
    /// A definition is live for a call when it lives in the same container, occurs
    /// strictly before the call, and has not been consumed by an earlier call.
    ///
    /// # Errors
    ///
    /// Propagates calling-convention failures.
    pub fn collect_argument_calls(&mut self, convention: &dyn CallingConvention) -> Result<()> {
        let (chains, order) = self.collect_with_order(LocationFilter::all());
        let mut consumed: HashSet<ExprId> = HashSet::new();

        let mut call_sites: Vec<(StmtId, ExprId)> = Vec::new();
        for ea in self.flow.iter_blocks() {
            let Some(block) = self.flow.block(ea) else {
                continue;
            };
            let ir = &self.flow.ir;
            for stmt in ir.container_stmts(block.container) {
                for root in ir.stmt(*stmt).exprs() {
                    if let Some(call) = ir
                        .post_order(root)
                        .into_iter()
                        .find(|e| matches!(ir.expr(*e), ExprKind::Call { .. }))
                    {
                        call_sites.push((*stmt, call));
                        break;
                    }
                }
            }
        }

        for (stmt, call) in call_sites {
            let Some(&call_ord) = order.get(&stmt) else {
                continue;
            };
            let container = self.flow.ir.stmt_container(stmt);
            let mut live: Vec<ExprId> = Vec::new();
            for chain in &chains {
                for d in chain.defines(&self.flow.ir) {
                    if self.flow.ir.stmt_container(d.stmt) != container {
                        continue;
                    }
                    let Some(&def_ord) = order.get(&d.stmt) else {
                        continue;
                    };
                    if def_ord < call_ord && !consumed.contains(&d.operand) {
                        live.push(d.operand);
                    }
                }
            }
            convention.process_stack(&mut self.flow.ir, stmt, call, &live)?;
            consumed.extend(live);
        }
        Ok(())
    }
}
