//! Statement and container types for the decompiler IR.
//!
//! A statement wraps at most one expression (`break`/`continue` wrap none) and lives
//! inside exactly one [`Container`] at a time. Containers are ordered, mutable
//! statement sequences; every mutation keeps the child statements' owner pointers
//! consistent. Control-flow statements (`if`, `while`, `do-while`) own nested
//! containers for their bodies.

use crate::ir::expression::ExprId;

/// Identifier of a statement inside an [`IrArena`](crate::ir::IrArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub(crate) u32);

impl StmtId {
    /// Returns the raw arena index of this id.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a statement container inside an [`IrArena`](crate::ir::IrArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub(crate) u32);

impl ContainerId {
    /// Returns the raw arena index of this id.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A statement.
///
/// Until control-flow restructuring runs, containers consist solely of plain
/// statements, `If` (with a single `Goto` body and no else branch), `Goto`,
/// `Return` and `JumpOut` — the canonical flattened form the SSA tagger relies on.
/// The restructurer introduces the remaining variants.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// A plain expression statement.
    Expr {
        /// The wrapped expression.
        expr: ExprId,
    },
    /// Two-way branch.
    If {
        /// Branch condition.
        cond: ExprId,
        /// Statements executed when the condition holds.
        then_body: ContainerId,
        /// Statements executed otherwise. Absent until restructuring builds it.
        else_body: Option<ContainerId>,
    },
    /// Pre-tested loop.
    While {
        /// Loop condition.
        cond: ExprId,
        /// Loop body.
        body: ContainerId,
    },
    /// Post-tested loop.
    DoWhile {
        /// Loop condition.
        cond: ExprId,
        /// Loop body.
        body: ContainerId,
    },
    /// Jump to a block inside the function. The target is a literal address value.
    Goto {
        /// Target address expression.
        target: ExprId,
    },
    /// Jump to a destination outside the function.
    JumpOut {
        /// Target expression.
        target: ExprId,
    },
    /// Return from the function.
    Return {
        /// Optional return value.
        value: Option<ExprId>,
    },
    /// Loop break.
    Break,
    /// Loop continue.
    Continue,
}

impl StmtKind {
    /// Returns the expressions directly owned by this statement, in slot order.
    #[must_use]
    pub fn exprs(&self) -> Vec<ExprId> {
        match self {
            StmtKind::Expr { expr } => vec![*expr],
            StmtKind::If { cond, .. }
            | StmtKind::While { cond, .. }
            | StmtKind::DoWhile { cond, .. } => vec![*cond],
            StmtKind::Goto { target } | StmtKind::JumpOut { target } => vec![*target],
            StmtKind::Return { value } => value.iter().copied().collect(),
            StmtKind::Break | StmtKind::Continue => Vec::new(),
        }
    }

    /// Returns the nested containers owned by this statement.
    #[must_use]
    pub fn containers(&self) -> Vec<ContainerId> {
        match self {
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                let mut out = vec![*then_body];
                out.extend(else_body.iter().copied());
                out
            }
            StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => vec![*body],
            _ => Vec::new(),
        }
    }

    /// Returns true for statements after which control never falls through.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            StmtKind::Goto { .. }
                | StmtKind::JumpOut { .. }
                | StmtKind::Return { .. }
                | StmtKind::Break
                | StmtKind::Continue
        )
    }
}

/// A statement node together with its owning container, if attached.
#[derive(Debug, Clone)]
pub(crate) struct StmtNode {
    pub(crate) kind: StmtKind,
    pub(crate) container: Option<ContainerId>,
}

/// An ordered, mutable sequence of statements.
#[derive(Debug, Clone, Default)]
pub(crate) struct Container {
    pub(crate) stmts: Vec<StmtId>,
}
