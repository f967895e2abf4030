//! Contracts with the disassembler backend and calling-convention analyzers.
//!
//! The decompiler core is architecture-agnostic: everything it knows about raw
//! instructions comes through the [`Architecture`] trait. A backend wraps a concrete
//! disassembler (and its instruction-to-IR translation rules) and answers questions
//! per address: mnemonic, size, control-flow role, branch targets, and the IR
//! statements an instruction lowers to.
//!
//! Calling-convention knowledge lives behind [`CallingConvention`], which receives
//! the set of live definitions in front of a call site and mutates the call's
//! parameter list in place. Concrete ABI logic is out of scope for this crate; the
//! trait is the seam where it plugs in.

use std::collections::BTreeSet;

use crate::{
    ir::{ExprId, IrArena, StmtId},
    Result,
};

/// One branch destination reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTarget {
    /// A compile-time literal destination address.
    Literal(u64),
    /// A computed destination (register-indirect, table dispatch, ...).
    ///
    /// CFG discovery tolerates these: the edge is logged and skipped, never fatal.
    Computed,
}

/// One node produced by lifting a single instruction.
///
/// Backends may return bare expressions; [`FlowGraph::lower_to_ir`] wraps them into
/// plain statements before appending them to the block container.
///
/// [`FlowGraph::lower_to_ir`]: crate::flow::FlowGraph::lower_to_ir
#[derive(Debug, Clone, Copy)]
pub enum Lifted {
    /// A complete statement.
    Stmt(StmtId),
    /// A bare expression, to be wrapped into a plain statement.
    Expr(ExprId),
}

/// Disassembler backend contract.
///
/// One implementation per target architecture. All methods are keyed by effective
/// address (`ea`); the address space, instruction decoding and operand semantics are
/// entirely the backend's business.
pub trait Architecture {
    /// Returns the mnemonic of the instruction at `ea`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ea` does not decode to an instruction.
    fn mnemonic(&self, ea: u64) -> Result<String>;

    /// Returns the size in bytes of the instruction at `ea`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndecodableInstruction`](crate::Error::UndecodableInstruction)
    /// if the instruction cannot be decoded or has zero size.
    fn instruction_size(&self, ea: u64) -> Result<u32>;

    /// Returns true if the instruction at `ea` returns from the function.
    fn is_return(&self, ea: u64) -> bool;

    /// Returns true if the instruction at `ea` is a conditional or unconditional jump.
    fn has_jump(&self, ea: u64) -> bool;

    /// Returns every branch destination of the jump at `ea`.
    ///
    /// For a conditional jump this includes the fallthrough successor; for an
    /// unconditional jump only the taken destination.
    fn jump_branches(&self, ea: u64) -> Vec<BranchTarget>;

    /// Returns the address of the instruction following `ea`.
    ///
    /// # Errors
    ///
    /// Propagates [`instruction_size`](Self::instruction_size) failures.
    fn next_instruction_ea(&self, ea: u64) -> Result<u64> {
        Ok(ea + u64::from(self.instruction_size(ea)?))
    }

    /// Returns the ordered set of instruction addresses belonging to the function
    /// containing `ea`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ea` is not inside a known function.
    fn function_items(&self, ea: u64) -> Result<BTreeSet<u64>>;

    /// Returns false if the function at `ea` is known to never return.
    ///
    /// Used by the restructurer to drop spurious fallthrough gotos after calls to
    /// terminating functions.
    fn function_returns(&self, ea: u64) -> bool {
        let _ = ea;
        true
    }

    /// Lifts the single instruction at `ea` into zero or more IR nodes.
    ///
    /// The pointer width of the target, flag modeling and operand decoding are the
    /// backend's concern; the core only requires that the produced statements use
    /// the closed flattened set (plain, `if`+`goto`, `goto`, `return`, jump-out).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedInstruction`](crate::Error::UnsupportedInstruction)
    /// for a mnemonic with no translation rule — fatal for this function, catchable
    /// by batch callers.
    fn lift_instruction(&self, ir: &mut IrArena, ea: u64) -> Result<Vec<Lifted>>;

    /// Decodes operand `n` of the instruction at `ea` into an expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the operand does not exist or cannot be decoded.
    fn operand_expression(&self, ir: &mut IrArena, ea: u64, n: usize) -> Result<ExprId>;

    /// Builds the callee expression for the call instruction at `ea`, along with the
    /// registers the call spoils.
    ///
    /// # Errors
    ///
    /// Returns an error if `ea` is not a call instruction.
    fn call_expression(&self, ir: &mut IrArena, ea: u64) -> Result<(ExprId, Vec<ExprId>)>;

    /// Returns the string literal at `ea`, if any.
    fn string_at(&self, ea: u64) -> Option<String> {
        let _ = ea;
        None
    }

    /// Returns the symbolic name of `ea`, if any.
    fn name_at(&self, ea: u64) -> Option<String> {
        let _ = ea;
        None
    }

    /// Returns true if `expr` is a stack-frame location (a dereference of the stack
    /// or frame pointer plus a constant offset, in typical backends).
    fn is_stack_variable(&self, ir: &IrArena, expr: ExprId) -> bool;

    /// Returns true if `expr` is the stack or frame pointer register itself.
    fn is_stack_register(&self, ir: &IrArena, expr: ExprId) -> bool;

    /// Returns true if `expr` is a caller-provided argument slot (above the frame
    /// base, in typical backends). Defaults to false for backends that cannot tell.
    fn is_argument_location(&self, ir: &IrArena, expr: ExprId) -> bool {
        let _ = (ir, expr);
        false
    }
}

/// Calling-convention analyzer contract.
///
/// Both hooks receive a call expression plus context about live definitions and are
/// expected to mutate the call's `params` list in place.
pub trait CallingConvention {
    /// Populates the argument list of `call` from live register definitions.
    ///
    /// # Arguments
    ///
    /// * `ir` - The arena owning the call expression
    /// * `stmt` - The statement containing the call
    /// * `call` - The call expression whose `params` should be populated
    /// * `live_registers` - Register definitions live immediately before the call
    ///
    /// # Errors
    ///
    /// Implementations may fail when the live set contradicts the ABI.
    fn process(
        &self,
        ir: &mut IrArena,
        stmt: StmtId,
        call: ExprId,
        live_registers: &[ExprId],
    ) -> Result<()>;

    /// Populates the argument list of `call` from live stack-slot definitions.
    ///
    /// This is an explicitly unimplemented extension point for stack-based
    /// conventions; the default does nothing and succeeds.
    ///
    /// # Errors
    ///
    /// Implementations may fail when the live set contradicts the ABI.
    fn process_stack(
        &self,
        ir: &mut IrArena,
        stmt: StmtId,
        call: ExprId,
        live_definitions: &[ExprId],
    ) -> Result<()> {
        let _ = (ir, stmt, call, live_definitions);
        Ok(())
    }
}
