//! Renaming of raw storage locations into named variables and arguments.
//!
//! After propagation has folded the transient locations away, whatever storage
//! remains is what the pseudocode reader will see. The renamer wraps each distinct
//! surviving location into a [`Var`](crate::ir::ExprKind::Var) or
//! [`Arg`](crate::ir::ExprKind::Arg) node carrying a stable human name — `var0,
//! var1, …` for locals, `arg0, arg1, …` for caller-provided slots.
//!
//! Name counters are owned by the [`Renamer`] instance and scoped to one function,
//! so every function starts again at `var0`.

use crate::{
    arch::Architecture,
    flow::FlowGraph,
    ir::{ContainerId, ExprId, ExprKind},
    Result,
};

/// Assigns stable names to surviving storage locations of one function.
#[derive(Debug, Default)]
pub struct Renamer {
    var_counter: usize,
    arg_counter: usize,
    /// Detached location templates already assigned a name.
    named: Vec<(ExprId, String)>,
}

impl Renamer {
    /// Creates a renamer with fresh counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps every stack-frame location into a named variable or argument.
    ///
    /// Locations the backend classifies as caller-provided
    /// ([`Architecture::is_argument_location`]) become arguments, the rest become
    /// variables. All SSA versions of the same storage share one name; the version
    /// is preserved on the wrapped backing location.
    ///
    /// # Errors
    ///
    /// Propagates arena invariant violations (always a bug).
    pub fn rename_stack_variables(
        &mut self,
        flow: &mut FlowGraph,
        arch: &dyn Architecture,
    ) -> Result<()> {
        let operands = collect_operands(flow);
        for op in operands {
            if flow.ir.owning_stmt(op).is_none() {
                continue;
            }
            if !arch.is_stack_variable(&flow.ir, op) {
                continue;
            }
            if matches!(flow.ir.expr(op), ExprKind::Var { .. } | ExprKind::Arg { .. }) {
                continue;
            }
            let is_arg = arch.is_argument_location(&flow.ir, op);
            let name = self.name_for(&mut flow.ir, op, is_arg);
            wrap(flow, op, &name, is_arg)?;
        }
        Ok(())
    }

    /// Wraps every remaining general-purpose register into a named variable.
    ///
    /// Runs late, after restore elimination: what is left in registers at this point
    /// is a genuine local value.
    ///
    /// # Errors
    ///
    /// Propagates arena invariant violations (always a bug).
    pub fn rename_registers(&mut self, flow: &mut FlowGraph) -> Result<()> {
        let operands = collect_operands(flow);
        for op in operands {
            if flow.ir.owning_stmt(op).is_none() {
                continue;
            }
            if !flow.ir.expr(op).is_general_register() {
                continue;
            }
            let name = self.name_for(&mut flow.ir, op, false);
            wrap(flow, op, &name, false)?;
        }
        Ok(())
    }

    /// Finds or allocates the name for a location, ignoring SSA versions.
    fn name_for(&mut self, ir: &mut crate::ir::IrArena, op: ExprId, is_arg: bool) -> String {
        if let Some((_, name)) = self
            .named
            .iter()
            .find(|(t, _)| ir.exprs_equal_no_index(*t, op))
        {
            return name.clone();
        }
        let name = if is_arg {
            let n = self.arg_counter;
            self.arg_counter += 1;
            format!("arg{n}")
        } else {
            let n = self.var_counter;
            self.var_counter += 1;
            format!("var{n}")
        };
        let template = ir.copy_expr(op);
        self.named.push((template, name.clone()));
        name
    }
}

/// Every assignable operand in every reachable statement, snapshot up front.
fn collect_operands(flow: &FlowGraph) -> Vec<ExprId> {
    let mut out = Vec::new();
    for ea in flow.iter_blocks() {
        let Some(block) = flow.block(ea) else { continue };
        collect_container(flow, block.container, &mut out);
    }
    out
}

fn collect_container(flow: &FlowGraph, container: ContainerId, out: &mut Vec<ExprId>) {
    for stmt in flow.ir.container_stmts(container) {
        for root in flow.ir.stmt(*stmt).exprs() {
            for op in flow.ir.post_order(root) {
                if flow.ir.is_assignable(op) {
                    out.push(op);
                }
            }
        }
        for nested in flow.ir.stmt(*stmt).containers() {
            collect_container(flow, nested, out);
        }
    }
}

/// Replaces `op` with a `Var`/`Arg` wrapper owning the detached original.
fn wrap(flow: &mut FlowGraph, op: ExprId, name: &str, is_arg: bool) -> Result<()> {
    let placeholder = flow.ir.value(0, 1);
    let backing = flow.ir.replace(op, placeholder)?;
    let wrapper = if is_arg {
        flow.ir.arg(backing, name)?
    } else {
        flow.ir.var(backing, name)?
    };
    flow.ir.replace(placeholder, wrapper)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{BinaryOp, RegisterBank},
        test::{ScriptedArch, STACK_REG},
    };

    /// Two versions of the same stack slot share one name; a second slot gets the
    /// next counter value.
    #[test]
    fn test_stack_slots_share_names_across_versions() {
        let mut flow = FlowGraph::new(0x1000);
        let container = flow.add_block(0x1000);

        let slot = |flow: &mut FlowGraph, offset: i64, index: u32| {
            let esp = flow.ir.reg(RegisterBank::General, STACK_REG, 32, Some("esp"));
            let off = flow.ir.value(offset, 32);
            let addr = flow.ir.binary(BinaryOp::Sub, esp, off).unwrap();
            let deref = flow.ir.deref(addr, 32).unwrap();
            flow.ir.set_ssa_index(deref, Some(index));
            deref
        };

        let a = slot(&mut flow, 4, 1);
        let one = flow.ir.value(1, 32);
        let s1 = flow.ir.assign(a, one).unwrap();
        let s1 = flow.ir.stmt_expr(s1).unwrap();
        flow.ir.push_stmt(container, s1).unwrap();

        let b = slot(&mut flow, 4, 2);
        let two = flow.ir.value(2, 32);
        let s2 = flow.ir.assign(b, two).unwrap();
        let s2 = flow.ir.stmt_expr(s2).unwrap();
        flow.ir.push_stmt(container, s2).unwrap();

        let c = slot(&mut flow, 8, 3);
        let three = flow.ir.value(3, 32);
        let s3 = flow.ir.assign(c, three).unwrap();
        let s3 = flow.ir.stmt_expr(s3).unwrap();
        flow.ir.push_stmt(container, s3).unwrap();

        let arch = ScriptedArch::new();
        let mut renamer = Renamer::new();
        renamer.rename_stack_variables(&mut flow, &arch).unwrap();

        let rendered = flow.ir.display_container(container, 0);
        assert!(rendered.contains("(var0 = 1)"), "got: {rendered}");
        assert!(rendered.contains("(var0 = 2)"), "got: {rendered}");
        assert!(rendered.contains("(var1 = 3)"), "got: {rendered}");
    }

    /// Register renaming wraps surviving registers into variables.
    #[test]
    fn test_register_renaming() {
        let mut flow = FlowGraph::new(0x1000);
        let container = flow.add_block(0x1000);

        let eax = flow.ir.reg(RegisterBank::General, 0, 32, Some("eax"));
        let five = flow.ir.value(5, 32);
        let assign = flow.ir.assign(eax, five).unwrap();
        let stmt = flow.ir.stmt_expr(assign).unwrap();
        flow.ir.push_stmt(container, stmt).unwrap();

        let mut renamer = Renamer::new();
        renamer.rename_registers(&mut flow).unwrap();

        let rendered = flow.ir.display_container(container, 0);
        assert!(rendered.contains("(var0 = 5)"), "got: {rendered}");
    }
}
