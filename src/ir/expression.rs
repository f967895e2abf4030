//! Expression node types for the decompiler IR.
//!
//! Expressions form a singly-owned tree stored in an [`IrArena`](crate::ir::IrArena).
//! Every node is addressed by an [`ExprId`] and caches its parent slot, which is what
//! makes in-place rewriting O(1) — see [`IrArena::replace`](crate::ir::IrArena::replace).
//!
//! The node set mirrors what instruction lifting produces: immediate values, register
//! and flag locations, memory dereferences, renamed variables/arguments, unary and
//! binary operators (including the architecture flag markers that later lower into
//! comparisons), conditional expressions, and calls.

use strum::Display;

use crate::ir::statement::StmtId;

/// Identifier of an expression node inside an [`IrArena`](crate::ir::IrArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

impl ExprId {
    /// Returns the raw arena index of this id.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The slot an expression occupies in its parent.
///
/// A node has at most one parent at any time; attaching a node that already has a
/// parent is an invariant violation. The slot index selects the child position within
/// the parent expression (`0` for unary operands, `0`/`1` for binary left/right, and
/// so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    /// Owned by another expression, at the given child slot.
    Expr(ExprId, usize),
    /// Owned directly by a statement (condition, jump target, return value, ...).
    Stmt(StmtId),
}

/// Register bank of a [`ExprKind::Reg`] location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterBank {
    /// A general-purpose physical register.
    General,
    /// An architecture flag pseudo-register (zero, sign, carry, ...).
    Flag,
}

/// Unary operators.
///
/// The last five variants are flag-semantics markers emitted by instruction lifting;
/// they only exist between lifting and the peephole pass that lowers them into human
/// comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnaryOp {
    /// Bitwise complement.
    #[strum(serialize = "~")]
    Not,
    /// Boolean negation.
    #[strum(serialize = "!")]
    LogicalNot,
    /// Address-of.
    #[strum(serialize = "&")]
    AddressOf,
    /// Arithmetic negation.
    #[strum(serialize = "-")]
    Negate,
    /// Pre-increment (`++x`).
    #[strum(serialize = "++")]
    PreInc,
    /// Pre-decrement (`--x`).
    #[strum(serialize = "--")]
    PreDec,
    /// Post-increment (`x++`).
    #[strum(serialize = "++")]
    PostInc,
    /// Post-decrement (`x--`).
    #[strum(serialize = "--")]
    PostDec,
    /// Sign flag of the wrapped computation.
    #[strum(serialize = "SIGN")]
    Sign,
    /// Overflow flag of the wrapped computation.
    #[strum(serialize = "OVERFLOW")]
    Overflow,
    /// Carry flag of the wrapped computation.
    #[strum(serialize = "CARRY")]
    Carry,
    /// Parity flag of the wrapped computation.
    #[strum(serialize = "PARITY")]
    Parity,
    /// Adjust flag of the wrapped computation.
    #[strum(serialize = "ADJUST")]
    Adjust,
}

impl UnaryOp {
    /// Returns true for the pre/post increment and decrement wrappers.
    #[must_use]
    pub fn is_inc_dec(self) -> bool {
        matches!(
            self,
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec
        )
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOp {
    /// Statement-sequencing pseudo-operator, used to build call argument lists.
    #[strum(serialize = ",")]
    Comma,
    /// Assignment. The left side must be an assignable location.
    #[strum(serialize = "=")]
    Assign,
    /// Addition.
    #[strum(serialize = "+")]
    Add,
    /// Subtraction.
    #[strum(serialize = "-")]
    Sub,
    /// Multiplication.
    #[strum(serialize = "*")]
    Mul,
    /// Division.
    #[strum(serialize = "/")]
    Div,
    /// Shift left.
    #[strum(serialize = "<<")]
    Shl,
    /// Shift right.
    #[strum(serialize = ">>")]
    Shr,
    /// Bitwise and.
    #[strum(serialize = "&")]
    And,
    /// Bitwise or.
    #[strum(serialize = "|")]
    Or,
    /// Bitwise xor.
    #[strum(serialize = "^")]
    Xor,
    /// Boolean and.
    #[strum(serialize = "&&")]
    LogicalAnd,
    /// Boolean or.
    #[strum(serialize = "||")]
    LogicalOr,
    /// Equality comparison.
    #[strum(serialize = "==")]
    Eq,
    /// Inequality comparison.
    #[strum(serialize = "!=")]
    Neq,
    /// Signed less-than.
    #[strum(serialize = "<")]
    Lt,
    /// Signed greater-than.
    #[strum(serialize = ">")]
    Gt,
    /// Signed less-or-equal.
    #[strum(serialize = "<=")]
    Leq,
    /// Signed greater-or-equal.
    #[strum(serialize = ">=")]
    Geq,
    /// Unsigned less-than, produced by carry-flag lowering.
    #[strum(serialize = "<")]
    Below,
    /// Unsigned greater-or-equal, produced by carry-flag lowering.
    #[strum(serialize = ">=")]
    AboveEq,
}

impl BinaryOp {
    /// Returns true for the six signed comparison operators.
    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Neq
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::Leq
                | BinaryOp::Geq
        )
    }

    /// Returns the comparison with swapped truth value, if this is a comparison.
    ///
    /// Used by negation normalization: `!(a < b)` becomes `a >= b`.
    #[must_use]
    pub fn negated_comparison(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::Neq),
            BinaryOp::Neq => Some(BinaryOp::Eq),
            BinaryOp::Lt => Some(BinaryOp::Geq),
            BinaryOp::Gt => Some(BinaryOp::Leq),
            BinaryOp::Leq => Some(BinaryOp::Gt),
            BinaryOp::Geq => Some(BinaryOp::Lt),
            BinaryOp::Below => Some(BinaryOp::AboveEq),
            BinaryOp::AboveEq => Some(BinaryOp::Below),
            _ => None,
        }
    }
}

/// An expression node.
///
/// Child expressions are held by [`ExprId`]; the arena keeps each child's cached
/// parent slot consistent with the id stored here. The `backing` of a [`Var`] or
/// [`Arg`] is *not* a child: it is a detached subtree owned by the wrapper, kept
/// only so later passes can still ask the architecture about the underlying storage.
///
/// [`Var`]: ExprKind::Var
/// [`Arg`]: ExprKind::Arg
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Immediate constant.
    Value {
        /// The literal value.
        value: i64,
        /// Width of the value in bits.
        width: u32,
    },
    /// Physical register or architecture flag reference. Assignable.
    ///
    /// Equality compares `(bank, number, index)`; the no-index comparison ignores
    /// `index` and matches "the same storage, any version".
    Reg {
        /// Register bank this location belongs to.
        bank: RegisterBank,
        /// Backend-defined register or flag number.
        number: u16,
        /// Width of the location in bits.
        width: u32,
        /// Optional display name supplied by the backend (`"eax"`, `"cf"`).
        name: Option<String>,
        /// SSA version index, stamped by the tagger.
        index: Option<u32>,
        /// True when this instance is the left side of an assignment.
        def: bool,
    },
    /// Renamed wrapper over a stack location or register. Assignable.
    ///
    /// Equality compares the name plus the backing location's SSA index.
    Var {
        /// The wrapped raw location (detached subtree, not a child).
        backing: ExprId,
        /// Human-readable name (`var0`, `var1`, ...).
        name: String,
        /// True when this instance is the left side of an assignment.
        def: bool,
    },
    /// Renamed wrapper over a function argument location. Assignable.
    Arg {
        /// The wrapped raw location (detached subtree, not a child).
        backing: ExprId,
        /// Human-readable name (`arg0`, `arg1`, ...).
        name: String,
        /// True when this instance is the left side of an assignment.
        def: bool,
    },
    /// Memory dereference. Assignable.
    Deref {
        /// Address being dereferenced.
        addr: ExprId,
        /// Width of the access in bits.
        width: u32,
        /// SSA version index, stamped by the tagger.
        index: Option<u32>,
        /// True when this instance is the left side of an assignment.
        def: bool,
    },
    /// Unary operator application.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: ExprId,
    },
    /// Binary operator application.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: ExprId,
        /// Right operand.
        right: ExprId,
    },
    /// Conditional expression (`cond ? then : otherwise`).
    Ternary {
        /// Condition operand.
        cond: ExprId,
        /// Value when the condition holds.
        then: ExprId,
        /// Value when the condition does not hold.
        otherwise: ExprId,
    },
    /// Function call.
    Call {
        /// Callee expression (literal address, register, ...).
        target: ExprId,
        /// Optional comma-list of arguments, filled in by calling-convention analysis.
        params: Option<ExprId>,
    },
}

impl ExprKind {
    /// Returns the parented children of this node, in slot order.
    ///
    /// `Var`/`Arg` backings are deliberately absent: they are detached subtrees, not
    /// part of the live tree.
    #[must_use]
    pub fn children(&self) -> Vec<ExprId> {
        match self {
            ExprKind::Value { .. }
            | ExprKind::Reg { .. }
            | ExprKind::Var { .. }
            | ExprKind::Arg { .. } => Vec::new(),
            ExprKind::Deref { addr, .. } => vec![*addr],
            ExprKind::Unary { operand, .. } => vec![*operand],
            ExprKind::Binary { left, right, .. } => vec![*left, *right],
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => vec![*cond, *then, *otherwise],
            ExprKind::Call { target, params } => match params {
                Some(p) => vec![*target, *p],
                None => vec![*target],
            },
        }
    }

    /// Returns a mutable reference to the child at `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not exist for this node kind. Callers always derive the
    /// slot from a recorded [`Parent`], so a miss is a corrupted-arena bug.
    pub(crate) fn child_mut(&mut self, slot: usize) -> &mut ExprId {
        match (self, slot) {
            (ExprKind::Deref { addr, .. }, 0) => addr,
            (ExprKind::Unary { operand, .. }, 0) => operand,
            (ExprKind::Binary { left, .. }, 0) => left,
            (ExprKind::Binary { right, .. }, 1) => right,
            (ExprKind::Ternary { cond, .. }, 0) => cond,
            (ExprKind::Ternary { then, .. }, 1) => then,
            (ExprKind::Ternary { otherwise, .. }, 2) => otherwise,
            (ExprKind::Call { target, .. }, 0) => target,
            (
                ExprKind::Call {
                    params: Some(params),
                    ..
                },
                1,
            ) => params,
            (kind, slot) => panic!("no child slot {slot} on {kind:?}"),
        }
    }

    /// Returns true if this node kind may appear on the left side of an assignment.
    #[must_use]
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            ExprKind::Reg { .. } | ExprKind::Var { .. } | ExprKind::Arg { .. } | ExprKind::Deref { .. }
        )
    }

    /// Returns true for a general-purpose (non-flag) register location.
    #[must_use]
    pub fn is_general_register(&self) -> bool {
        matches!(
            self,
            ExprKind::Reg {
                bank: RegisterBank::General,
                ..
            }
        )
    }

    /// Returns true for a flag pseudo-register location.
    #[must_use]
    pub fn is_flag_register(&self) -> bool {
        matches!(
            self,
            ExprKind::Reg {
                bank: RegisterBank::Flag,
                ..
            }
        )
    }

    /// Returns the literal value if this is a [`ExprKind::Value`].
    #[must_use]
    pub fn as_value(&self) -> Option<i64> {
        match self {
            ExprKind::Value { value, .. } => Some(*value),
            _ => None,
        }
    }
}

/// An expression node together with its cached parent slot.
#[derive(Debug, Clone)]
pub(crate) struct ExprNode {
    pub(crate) kind: ExprKind,
    pub(crate) parent: Option<Parent>,
}
