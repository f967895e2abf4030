//! Def-use chains and the propagation/elimination engine built on them.
//!
//! A [`Chain`] aggregates every appearance — definitions and uses — of one exact
//! versioned storage location (register, flag, variable, argument or memory
//! dereference) reachable from the entry block. Chains are collected by a single
//! forward traversal and rebuilt from scratch whenever a pass changes the tree:
//! they are cheap snapshots, not incrementally maintained indices.
//!
//! [`ChainEngine`] implements the simplification passes that consume chains:
//!
//! | Pass | Effect |
//! |------|--------|
//! | [`ChainEngine::propagate_expressions`] | Copy/expression propagation to fixed point |
//! | [`ChainEngine::remove_unused_definitions`] | Dead-definition elimination |
//! | [`ChainEngine::eliminate_restores`] | Callee-saved spill/restore removal |
//! | [`ChainEngine::glue_increments`] | Fuses `i = i + 1` into `i++`/`++i` at a use |
//! | [`ChainEngine::collect_argument_calls`] | Hands live definitions to the calling convention |
//!
//! None of these passes is allowed to change program semantics: an unsafe
//! transformation is silently skipped, never forced and never an error.

mod engine;

use bitflags::bitflags;

use crate::ir::{ExprId, ExprKind, IrArena, StmtId};

pub use engine::ChainEngine;

bitflags! {
    /// Selects which storage-location kinds a chain collection covers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LocationFilter: u8 {
        /// Plain general-purpose registers.
        const REGISTERS = 1 << 0;
        /// Architecture flag pseudo-registers.
        const FLAGS = 1 << 1;
        /// Renamed function arguments.
        const ARGUMENTS = 1 << 2;
        /// Renamed local variables.
        const VARIABLES = 1 << 3;
        /// Memory dereferences.
        const DEREFS = 1 << 4;
    }
}

bitflags! {
    /// Controls which definitions [`ChainEngine::propagate_expressions`] may fold away.
    ///
    /// Plain-register definitions always propagate; these flags gate everything else.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropagationFlags: u8 {
        /// Propagate regardless of the defined location's kind.
        const ANY = 1 << 0;
        /// Propagate register definitions.
        const REGISTERS = 1 << 1;
        /// Propagate stack-frame locations.
        const STACK_LOCATIONS = 1 << 2;
        /// Propagate flag pseudo-register definitions.
        const FLAGS = 1 << 3;
        /// Restrict non-register propagation to single-use chains.
        const SINGLE_USES = 1 << 4;
    }
}

impl LocationFilter {
    /// Returns true if the expression kind is selected by this filter.
    #[must_use]
    pub fn matches(self, kind: &ExprKind) -> bool {
        match kind {
            ExprKind::Reg { .. } if kind.is_general_register() => {
                self.contains(LocationFilter::REGISTERS)
            }
            ExprKind::Reg { .. } => self.contains(LocationFilter::FLAGS),
            ExprKind::Arg { .. } => self.contains(LocationFilter::ARGUMENTS),
            ExprKind::Var { .. } => self.contains(LocationFilter::VARIABLES),
            ExprKind::Deref { .. } => self.contains(LocationFilter::DEREFS),
            _ => false,
        }
    }
}

/// One appearance of a chain's storage location.
#[derive(Debug, Clone, Copy)]
pub struct ChainInstance {
    /// Address of the block the appearance lives in.
    pub block: u64,
    /// Statement containing the operand.
    pub stmt: StmtId,
    /// The operand itself.
    pub operand: ExprId,
}

/// Every appearance of one exact `(kind, which, version)` storage location.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    /// All appearances, in forward-traversal order.
    pub instances: Vec<ChainInstance>,
}

impl Chain {
    /// Returns a representative operand for equality checks against other operands.
    #[must_use]
    pub fn template(&self) -> ExprId {
        self.instances[0].operand
    }

    /// Returns the defining appearances (operands with the definition flag).
    #[must_use]
    pub fn defines<'a>(&'a self, ir: &'a IrArena) -> Vec<&'a ChainInstance> {
        self.instances
            .iter()
            .filter(|i| ir.is_definition(i.operand))
            .collect()
    }

    /// Returns the non-defining appearances.
    #[must_use]
    pub fn uses<'a>(&'a self, ir: &'a IrArena) -> Vec<&'a ChainInstance> {
        self.instances
            .iter()
            .filter(|i| !ir.is_definition(i.operand))
            .collect()
    }
}
