//! Index-based arena owning the expression/statement tree of one function.
//!
//! The arena owns three slabs — expressions, statements, containers — addressed by
//! the id newtypes from the sibling modules. Every expression caches its parent slot
//! and every statement caches its owning container, which gives the two contracts the
//! rewrite passes rely on:
//!
//! - [`replace`](IrArena::replace) is O(1) and never searches the tree: it rewrites
//!   the recorded parent slot, attaches the new node and detaches the old one.
//! - Double attachment is detected loudly: attaching a node that already has a parent
//!   is an [`Error::Invariant`](crate::Error::Invariant), not a silent aliasing bug.
//!
//! Nodes are destroyed only by detachment; detached subtrees simply become garbage
//! inside the slab, which is acceptable for the lifetime of one decompiled function.

use crate::{
    error::invariant_error,
    ir::{
        expression::{BinaryOp, ExprKind, ExprNode, Parent, RegisterBank, UnaryOp},
        statement::{Container, StmtKind, StmtNode},
        ContainerId, ExprId, StmtId,
    },
    Result,
};

/// Arena owning the IR of one function.
///
/// Create one per function, build expressions/statements through the typed
/// constructors, and hand it to the passes via [`FlowGraph`](crate::flow::FlowGraph)
/// which owns it for the rest of the pipeline.
///
/// # Examples
///
/// ```rust
/// use pseudoscope::ir::{IrArena, RegisterBank};
///
/// let mut ir = IrArena::new();
/// let eax = ir.reg(RegisterBank::General, 0, 32, Some("eax"));
/// let one = ir.value(1, 32);
/// let sum = ir.binary(pseudoscope::ir::BinaryOp::Add, eax, one)?;
/// assert_eq!(ir.post_order(sum).len(), 3);
/// # Ok::<(), pseudoscope::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct IrArena {
    exprs: Vec<ExprNode>,
    stmts: Vec<StmtNode>,
    containers: Vec<Container>,
}

impl IrArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, kind: ExprKind) -> ExprId {
        let id = ExprId(u32::try_from(self.exprs.len()).expect("arena overflow"));
        self.exprs.push(ExprNode { kind, parent: None });
        id
    }

    fn attach(&mut self, child: ExprId, parent: Parent) -> Result<()> {
        if self.exprs[child.index()].parent.is_some() {
            return Err(invariant_error!(
                "expression {child:?} is already attached; detach or copy it first"
            ));
        }
        self.exprs[child.index()].parent = Some(parent);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expression constructors
    // ------------------------------------------------------------------

    /// Creates an immediate value.
    pub fn value(&mut self, value: i64, width: u32) -> ExprId {
        self.alloc(ExprKind::Value { value, width })
    }

    /// Creates a register or flag location.
    pub fn reg(
        &mut self,
        bank: RegisterBank,
        number: u16,
        width: u32,
        name: Option<&str>,
    ) -> ExprId {
        self.alloc(ExprKind::Reg {
            bank,
            number,
            width,
            name: name.map(str::to_string),
            index: None,
            def: false,
        })
    }

    /// Creates a memory dereference of `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `addr` is already
    /// attached elsewhere.
    pub fn deref(&mut self, addr: ExprId, width: u32) -> Result<ExprId> {
        let id = self.alloc(ExprKind::Deref {
            addr,
            width,
            index: None,
            def: false,
        });
        self.attach(addr, Parent::Expr(id, 0))?;
        Ok(id)
    }

    /// Creates a unary operator application.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if the operand is already
    /// attached elsewhere.
    pub fn unary(&mut self, op: UnaryOp, operand: ExprId) -> Result<ExprId> {
        let id = self.alloc(ExprKind::Unary { op, operand });
        self.attach(operand, Parent::Expr(id, 0))?;
        Ok(id)
    }

    /// Creates a binary operator application.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if an operand is already
    /// attached elsewhere.
    pub fn binary(&mut self, op: BinaryOp, left: ExprId, right: ExprId) -> Result<ExprId> {
        let id = self.alloc(ExprKind::Binary { op, left, right });
        self.attach(left, Parent::Expr(id, 0))?;
        self.attach(right, Parent::Expr(id, 1))?;
        Ok(id)
    }

    /// Creates an assignment `lhs = rhs`, marking `lhs` as a definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `lhs` is not an
    /// assignable location or an operand is already attached elsewhere.
    pub fn assign(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId> {
        if !self.expr(lhs).is_assignable() {
            return Err(invariant_error!(
                "left side of assignment is not assignable: {:?}",
                self.expr(lhs)
            ));
        }
        self.set_definition(lhs, true);
        self.binary(BinaryOp::Assign, lhs, rhs)
    }

    /// Creates a conditional expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if an operand is already
    /// attached elsewhere.
    pub fn ternary(&mut self, cond: ExprId, then: ExprId, otherwise: ExprId) -> Result<ExprId> {
        let id = self.alloc(ExprKind::Ternary {
            cond,
            then,
            otherwise,
        });
        self.attach(cond, Parent::Expr(id, 0))?;
        self.attach(then, Parent::Expr(id, 1))?;
        self.attach(otherwise, Parent::Expr(id, 2))?;
        Ok(id)
    }

    /// Creates a call expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if an operand is already
    /// attached elsewhere.
    pub fn call(&mut self, target: ExprId, params: Option<ExprId>) -> Result<ExprId> {
        let id = self.alloc(ExprKind::Call { target, params });
        self.attach(target, Parent::Expr(id, 0))?;
        if let Some(p) = params {
            self.attach(p, Parent::Expr(id, 1))?;
        }
        Ok(id)
    }

    /// Creates a named variable wrapping the detached location `backing`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `backing` is still
    /// attached (the renamer detaches the raw location first, then wraps it).
    pub fn var(&mut self, backing: ExprId, name: &str) -> Result<ExprId> {
        if self.exprs[backing.index()].parent.is_some() {
            return Err(invariant_error!("var backing {backing:?} must be detached"));
        }
        let def = self.is_definition(backing);
        Ok(self.alloc(ExprKind::Var {
            backing,
            name: name.to_string(),
            def,
        }))
    }

    /// Creates a named argument wrapping the detached location `backing`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `backing` is still
    /// attached.
    pub fn arg(&mut self, backing: ExprId, name: &str) -> Result<ExprId> {
        if self.exprs[backing.index()].parent.is_some() {
            return Err(invariant_error!("arg backing {backing:?} must be detached"));
        }
        let def = self.is_definition(backing);
        Ok(self.alloc(ExprKind::Arg {
            backing,
            name: name.to_string(),
            def,
        }))
    }

    // ------------------------------------------------------------------
    // Expression accessors
    // ------------------------------------------------------------------

    /// Returns the node kind of `id`.
    #[must_use]
    pub fn expr(&self, id: ExprId) -> &ExprKind {
        &self.exprs[id.index()].kind
    }

    pub(crate) fn expr_mut(&mut self, id: ExprId) -> &mut ExprKind {
        &mut self.exprs[id.index()].kind
    }

    /// Returns the parent slot of `id`, or `None` for a detached node or tree root.
    #[must_use]
    pub fn parent(&self, id: ExprId) -> Option<Parent> {
        self.exprs[id.index()].parent
    }

    /// Returns the statement that transitively owns `id`, if the node is attached.
    #[must_use]
    pub fn owning_stmt(&self, id: ExprId) -> Option<StmtId> {
        let mut cur = id;
        loop {
            match self.exprs[cur.index()].parent? {
                Parent::Expr(p, _) => cur = p,
                Parent::Stmt(s) => return Some(s),
            }
        }
    }

    /// Returns true if `id` may appear on the left side of an assignment.
    #[must_use]
    pub fn is_assignable(&self, id: ExprId) -> bool {
        self.expr(id).is_assignable()
    }

    /// Returns the definition flag of an assignable operand (false for all others).
    #[must_use]
    pub fn is_definition(&self, id: ExprId) -> bool {
        match self.expr(id) {
            ExprKind::Reg { def, .. }
            | ExprKind::Var { def, .. }
            | ExprKind::Arg { def, .. }
            | ExprKind::Deref { def, .. } => *def,
            _ => false,
        }
    }

    /// Sets the definition flag on an assignable operand. No-op for other kinds.
    pub fn set_definition(&mut self, id: ExprId, value: bool) {
        match self.expr_mut(id) {
            ExprKind::Reg { def, .. }
            | ExprKind::Var { def, .. }
            | ExprKind::Arg { def, .. }
            | ExprKind::Deref { def, .. } => *def = value,
            _ => {}
        }
    }

    /// Returns the SSA version index of an assignable operand.
    ///
    /// `Var`/`Arg` wrappers report their backing location's index.
    #[must_use]
    pub fn ssa_index(&self, id: ExprId) -> Option<u32> {
        match self.expr(id) {
            ExprKind::Reg { index, .. } | ExprKind::Deref { index, .. } => *index,
            ExprKind::Var { backing, .. } | ExprKind::Arg { backing, .. } => {
                self.ssa_index(*backing)
            }
            _ => None,
        }
    }

    /// Stamps the SSA version index on an assignable operand.
    ///
    /// `Var`/`Arg` wrappers stamp their backing location.
    pub fn set_ssa_index(&mut self, id: ExprId, value: Option<u32>) {
        let backing = match self.expr(id) {
            ExprKind::Var { backing, .. } | ExprKind::Arg { backing, .. } => Some(*backing),
            _ => None,
        };
        if let Some(b) = backing {
            self.set_ssa_index(b, value);
            return;
        }
        match self.expr_mut(id) {
            ExprKind::Reg { index, .. } | ExprKind::Deref { index, .. } => *index = value,
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Tree operations
    // ------------------------------------------------------------------

    /// Installs `new` in `old`'s parent slot and detaches `old`, returning it.
    ///
    /// This is the single rewrite primitive every pass builds on. It is O(1): the
    /// recorded parent slot is rewritten directly, no tree search happens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `old` has no parent
    /// (nothing to replace) or `new` already has one (detach or copy it first).
    pub fn replace(&mut self, old: ExprId, new: ExprId) -> Result<ExprId> {
        let Some(parent) = self.exprs[old.index()].parent else {
            return Err(invariant_error!("replace on detached expression {old:?}"));
        };
        if self.exprs[new.index()].parent.is_some() {
            return Err(invariant_error!(
                "replacement {new:?} already has a parent; detach or copy it first"
            ));
        }
        match parent {
            Parent::Expr(p, slot) => {
                *self.exprs[p.index()].kind.child_mut(slot) = new;
            }
            Parent::Stmt(s) => self.stmt_swap_expr(s, old, new),
        }
        self.exprs[new.index()].parent = Some(parent);
        self.exprs[old.index()].parent = None;
        Ok(old)
    }

    /// Deep-copies the subtree rooted at `id`, returning a detached clone.
    ///
    /// `Var`/`Arg` backings are copied as well, so the clone shares no node with the
    /// original.
    pub fn copy_expr(&mut self, id: ExprId) -> ExprId {
        let kind = self.expr(id).clone();
        let copy = match kind {
            ExprKind::Value { .. } | ExprKind::Reg { .. } => self.alloc(kind),
            ExprKind::Var { backing, name, def } => {
                let b = self.copy_expr(backing);
                self.alloc(ExprKind::Var {
                    backing: b,
                    name,
                    def,
                })
            }
            ExprKind::Arg { backing, name, def } => {
                let b = self.copy_expr(backing);
                self.alloc(ExprKind::Arg {
                    backing: b,
                    name,
                    def,
                })
            }
            ExprKind::Deref {
                addr,
                width,
                index,
                def,
            } => {
                let a = self.copy_expr(addr);
                let id = self.alloc(ExprKind::Deref {
                    addr: a,
                    width,
                    index,
                    def,
                });
                self.exprs[a.index()].parent = Some(Parent::Expr(id, 0));
                id
            }
            ExprKind::Unary { op, operand } => {
                let o = self.copy_expr(operand);
                let id = self.alloc(ExprKind::Unary { op, operand: o });
                self.exprs[o.index()].parent = Some(Parent::Expr(id, 0));
                id
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.copy_expr(left);
                let r = self.copy_expr(right);
                let id = self.alloc(ExprKind::Binary {
                    op,
                    left: l,
                    right: r,
                });
                self.exprs[l.index()].parent = Some(Parent::Expr(id, 0));
                self.exprs[r.index()].parent = Some(Parent::Expr(id, 1));
                id
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let c = self.copy_expr(cond);
                let t = self.copy_expr(then);
                let o = self.copy_expr(otherwise);
                let id = self.alloc(ExprKind::Ternary {
                    cond: c,
                    then: t,
                    otherwise: o,
                });
                self.exprs[c.index()].parent = Some(Parent::Expr(id, 0));
                self.exprs[t.index()].parent = Some(Parent::Expr(id, 1));
                self.exprs[o.index()].parent = Some(Parent::Expr(id, 2));
                id
            }
            ExprKind::Call { target, params } => {
                let t = self.copy_expr(target);
                let p = params.map(|p| self.copy_expr(p));
                let id = self.alloc(ExprKind::Call { target: t, params: p });
                self.exprs[t.index()].parent = Some(Parent::Expr(id, 0));
                if let Some(p) = p {
                    self.exprs[p.index()].parent = Some(Parent::Expr(id, 1));
                }
                id
            }
        };
        copy
    }

    /// Returns every descendant operand of `id` followed by `id` itself.
    ///
    /// Depth-first, left-to-right, node last (post-order). The result is a snapshot:
    /// callers are free to mutate the tree while walking it, which every rewrite pass
    /// does.
    #[must_use]
    pub fn post_order(&self, id: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        self.collect_post_order(id, &mut out);
        out
    }

    fn collect_post_order(&self, id: ExprId, out: &mut Vec<ExprId>) {
        for child in self.expr(id).children() {
            self.collect_post_order(child, out);
        }
        out.push(id);
    }

    /// Structural equality, including SSA version indices.
    #[must_use]
    pub fn exprs_equal(&self, a: ExprId, b: ExprId) -> bool {
        self.eq_impl(a, b, true)
    }

    /// Structural equality ignoring SSA version indices.
    ///
    /// Matches "the same storage, any version" — the comparison the SSA tagger and
    /// the chain engine use to group locations across versions.
    #[must_use]
    pub fn exprs_equal_no_index(&self, a: ExprId, b: ExprId) -> bool {
        self.eq_impl(a, b, false)
    }

    fn eq_impl(&self, a: ExprId, b: ExprId, with_index: bool) -> bool {
        match (self.expr(a), self.expr(b)) {
            (ExprKind::Value { value: va, .. }, ExprKind::Value { value: vb, .. }) => va == vb,
            (
                ExprKind::Reg {
                    bank: ba,
                    number: na,
                    index: ia,
                    ..
                },
                ExprKind::Reg {
                    bank: bb,
                    number: nb,
                    index: ib,
                    ..
                },
            ) => ba == bb && na == nb && (!with_index || ia == ib),
            (ExprKind::Var { name: na, .. }, ExprKind::Var { name: nb, .. })
            | (ExprKind::Arg { name: na, .. }, ExprKind::Arg { name: nb, .. }) => {
                na == nb && (!with_index || self.ssa_index(a) == self.ssa_index(b))
            }
            (
                ExprKind::Deref {
                    addr: aa, index: ia, ..
                },
                ExprKind::Deref {
                    addr: ab, index: ib, ..
                },
            ) => self.eq_impl(*aa, *ab, with_index) && (!with_index || ia == ib),
            (ExprKind::Unary { op: oa, operand: a0 }, ExprKind::Unary { op: ob, operand: b0 }) => {
                oa == ob && self.eq_impl(*a0, *b0, with_index)
            }
            (
                ExprKind::Binary {
                    op: oa,
                    left: la,
                    right: ra,
                },
                ExprKind::Binary {
                    op: ob,
                    left: lb,
                    right: rb,
                },
            ) => oa == ob && self.eq_impl(*la, *lb, with_index) && self.eq_impl(*ra, *rb, with_index),
            (
                ExprKind::Ternary {
                    cond: ca,
                    then: ta,
                    otherwise: oa,
                },
                ExprKind::Ternary {
                    cond: cb,
                    then: tb,
                    otherwise: ob,
                },
            ) => {
                self.eq_impl(*ca, *cb, with_index)
                    && self.eq_impl(*ta, *tb, with_index)
                    && self.eq_impl(*oa, *ob, with_index)
            }
            (
                ExprKind::Call {
                    target: ta,
                    params: pa,
                },
                ExprKind::Call {
                    target: tb,
                    params: pb,
                },
            ) => {
                self.eq_impl(*ta, *tb, with_index)
                    && match (pa, pb) {
                        (None, None) => true,
                        (Some(x), Some(y)) => self.eq_impl(*x, *y, with_index),
                        _ => false,
                    }
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Statement constructors
    // ------------------------------------------------------------------

    fn alloc_stmt(&mut self, kind: StmtKind) -> Result<StmtId> {
        let id = StmtId(u32::try_from(self.stmts.len()).expect("arena overflow"));
        for e in kind.exprs() {
            self.attach(e, Parent::Stmt(id))?;
        }
        self.stmts.push(StmtNode {
            kind,
            container: None,
        });
        Ok(id)
    }

    /// Creates a plain expression statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `expr` is already
    /// attached.
    pub fn stmt_expr(&mut self, expr: ExprId) -> Result<StmtId> {
        self.alloc_stmt(StmtKind::Expr { expr })
    }

    /// Creates an `if` statement with an empty or prepared then-body and no else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `cond` is already
    /// attached.
    pub fn stmt_if(&mut self, cond: ExprId, then_body: ContainerId) -> Result<StmtId> {
        self.alloc_stmt(StmtKind::If {
            cond,
            then_body,
            else_body: None,
        })
    }

    /// Creates a `while` loop statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `cond` is already
    /// attached.
    pub fn stmt_while(&mut self, cond: ExprId, body: ContainerId) -> Result<StmtId> {
        self.alloc_stmt(StmtKind::While { cond, body })
    }

    /// Creates a `do-while` loop statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `cond` is already
    /// attached.
    pub fn stmt_do_while(&mut self, cond: ExprId, body: ContainerId) -> Result<StmtId> {
        self.alloc_stmt(StmtKind::DoWhile { cond, body })
    }

    /// Creates a `goto` to a literal block address.
    ///
    /// # Errors
    ///
    /// Propagates allocation invariant errors (never expected here).
    pub fn stmt_goto(&mut self, target_ea: u64, width: u32) -> Result<StmtId> {
        #[allow(clippy::cast_possible_wrap)]
        let target = self.value(target_ea as i64, width);
        self.alloc_stmt(StmtKind::Goto { target })
    }

    /// Creates a `goto` with an arbitrary target expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `target` is already
    /// attached.
    pub fn stmt_goto_expr(&mut self, target: ExprId) -> Result<StmtId> {
        self.alloc_stmt(StmtKind::Goto { target })
    }

    /// Creates a jump to a destination outside the function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `target` is already
    /// attached.
    pub fn stmt_jump_out(&mut self, target: ExprId) -> Result<StmtId> {
        self.alloc_stmt(StmtKind::JumpOut { target })
    }

    /// Creates a `return` statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `value` is already
    /// attached.
    pub fn stmt_return(&mut self, value: Option<ExprId>) -> Result<StmtId> {
        self.alloc_stmt(StmtKind::Return { value })
    }

    /// Creates a `break` statement.
    ///
    /// # Errors
    ///
    /// Never fails in practice; kept fallible for constructor uniformity.
    pub fn stmt_break(&mut self) -> Result<StmtId> {
        self.alloc_stmt(StmtKind::Break)
    }

    /// Creates a `continue` statement.
    ///
    /// # Errors
    ///
    /// Never fails in practice; kept fallible for constructor uniformity.
    pub fn stmt_continue(&mut self) -> Result<StmtId> {
        self.alloc_stmt(StmtKind::Continue)
    }

    // ------------------------------------------------------------------
    // Statement accessors and mutation
    // ------------------------------------------------------------------

    /// Returns the kind of a statement.
    #[must_use]
    pub fn stmt(&self, id: StmtId) -> &StmtKind {
        &self.stmts[id.index()].kind
    }

    /// Replaces a statement's kind in place.
    ///
    /// Expressions owned by the old kind are detached (they become garbage unless the
    /// caller kept them); expressions owned by the new kind must be detached and are
    /// attached to this statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if a new expression is
    /// already attached elsewhere.
    pub fn set_stmt_kind(&mut self, id: StmtId, kind: StmtKind) -> Result<()> {
        for e in self.stmts[id.index()].kind.exprs() {
            self.exprs[e.index()].parent = None;
        }
        for e in kind.exprs() {
            self.attach(e, Parent::Stmt(id))?;
        }
        self.stmts[id.index()].kind = kind;
        Ok(())
    }

    /// Sets the else-branch of an `if` statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if `id` is not an `if`.
    pub fn set_else_body(&mut self, id: StmtId, body: Option<ContainerId>) -> Result<()> {
        match &mut self.stmts[id.index()].kind {
            StmtKind::If { else_body, .. } => {
                *else_body = body;
                Ok(())
            }
            other => Err(invariant_error!("set_else_body on non-if statement {other:?}")),
        }
    }

    /// Returns the literal address targeted by a `goto` statement, if it is one.
    #[must_use]
    pub fn goto_target(&self, id: StmtId) -> Option<u64> {
        match self.stmt(id) {
            StmtKind::Goto { target } => {
                let value = self.expr(*target).as_value()?;
                #[allow(clippy::cast_sign_loss)]
                let ea = value as u64;
                Some(ea)
            }
            _ => None,
        }
    }

    fn stmt_swap_expr(&mut self, id: StmtId, old: ExprId, new: ExprId) {
        let kind = &mut self.stmts[id.index()].kind;
        let slot = match kind {
            StmtKind::Expr { expr } => expr,
            StmtKind::If { cond, .. }
            | StmtKind::While { cond, .. }
            | StmtKind::DoWhile { cond, .. } => cond,
            StmtKind::Goto { target } | StmtKind::JumpOut { target } => target,
            StmtKind::Return { value: Some(value) } => value,
            _ => panic!("statement {kind:?} owns no expression"),
        };
        assert!(*slot == old, "stale parent slot on {id:?}");
        *slot = new;
    }

    // ------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------

    /// Creates an empty statement container.
    pub fn new_container(&mut self) -> ContainerId {
        let id = ContainerId(u32::try_from(self.containers.len()).expect("arena overflow"));
        self.containers.push(Container::default());
        id
    }

    /// Returns the statements of a container, in order.
    #[must_use]
    pub fn container_stmts(&self, id: ContainerId) -> &[StmtId] {
        &self.containers[id.index()].stmts
    }

    /// Returns the container currently owning a statement.
    #[must_use]
    pub fn stmt_container(&self, id: StmtId) -> Option<ContainerId> {
        self.stmts[id.index()].container
    }

    /// Returns a statement's position inside its container.
    #[must_use]
    pub fn stmt_index(&self, id: StmtId) -> Option<usize> {
        let c = self.stmts[id.index()].container?;
        self.containers[c.index()].stmts.iter().position(|s| *s == id)
    }

    /// Appends a statement to a container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if the statement already
    /// lives in a container.
    pub fn push_stmt(&mut self, container: ContainerId, stmt: StmtId) -> Result<()> {
        self.insert_stmt(container, self.containers[container.index()].stmts.len(), stmt)
    }

    /// Inserts a statement into a container at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if the statement already
    /// lives in a container.
    pub fn insert_stmt(&mut self, container: ContainerId, index: usize, stmt: StmtId) -> Result<()> {
        if self.stmts[stmt.index()].container.is_some() {
            return Err(invariant_error!(
                "statement {stmt:?} is already owned by a container"
            ));
        }
        self.containers[container.index()].stmts.insert(index, stmt);
        self.stmts[stmt.index()].container = Some(container);
        Ok(())
    }

    /// Removes a statement from its container, returning it detached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`](crate::Error::Invariant) if the statement is not
    /// in a container.
    pub fn remove_stmt(&mut self, stmt: StmtId) -> Result<StmtId> {
        let Some(c) = self.stmts[stmt.index()].container else {
            return Err(invariant_error!("remove of unowned statement {stmt:?}"));
        };
        let stmts = &mut self.containers[c.index()].stmts;
        let Some(pos) = stmts.iter().position(|s| *s == stmt) else {
            return Err(invariant_error!("statement {stmt:?} missing from its container"));
        };
        stmts.remove(pos);
        self.stmts[stmt.index()].container = None;
        Ok(stmt)
    }

    /// Detaches and returns all statements of a container, in order.
    pub fn take_stmts(&mut self, container: ContainerId) -> Vec<StmtId> {
        let stmts = std::mem::take(&mut self.containers[container.index()].stmts);
        for s in &stmts {
            self.stmts[s.index()].container = None;
        }
        stmts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, RegisterBank, UnaryOp};

    fn eax(ir: &mut IrArena) -> ExprId {
        ir.reg(RegisterBank::General, 0, 32, Some("eax"))
    }

    #[test]
    fn test_replace_swaps_parent_slot() {
        let mut ir = IrArena::new();
        let a = eax(&mut ir);
        let one = ir.value(1, 32);
        let sum = ir.binary(BinaryOp::Add, a, one).unwrap();
        let two = ir.value(2, 32);

        let old = ir.replace(one, two).unwrap();

        assert_eq!(old, one);
        assert!(ir.parent(one).is_none());
        assert_eq!(ir.parent(two), Some(Parent::Expr(sum, 1)));
        assert_eq!(ir.expr(sum).children(), vec![a, two]);
    }

    #[test]
    fn test_replace_detached_node_fails() {
        let mut ir = IrArena::new();
        let a = eax(&mut ir);
        let b = ir.value(0, 32);
        assert!(ir.replace(a, b).is_err());
    }

    #[test]
    fn test_replace_twice_fails() {
        let mut ir = IrArena::new();
        let a = eax(&mut ir);
        let one = ir.value(1, 32);
        let _ = ir.binary(BinaryOp::Add, a, one).unwrap();
        let two = ir.value(2, 32);
        ir.replace(one, two).unwrap();

        // one is now detached; a second replace must fail loudly.
        let three = ir.value(3, 32);
        assert!(ir.replace(one, three).is_err());
    }

    #[test]
    fn test_double_attach_fails() {
        let mut ir = IrArena::new();
        let a = eax(&mut ir);
        let one = ir.value(1, 32);
        let _ = ir.binary(BinaryOp::Add, a, one).unwrap();

        // `one` already has a parent; attaching it again must fail.
        let b = eax(&mut ir);
        assert!(ir.binary(BinaryOp::Add, b, one).is_err());
    }

    #[test]
    fn test_post_order_is_children_then_self() {
        let mut ir = IrArena::new();
        let a = eax(&mut ir);
        let one = ir.value(1, 32);
        let sum = ir.binary(BinaryOp::Add, a, one).unwrap();
        let neg = ir.unary(UnaryOp::Negate, sum).unwrap();

        assert_eq!(ir.post_order(neg), vec![a, one, sum, neg]);
    }

    #[test]
    fn test_copy_is_deep_and_detached() {
        let mut ir = IrArena::new();
        let a = eax(&mut ir);
        let one = ir.value(1, 32);
        let sum = ir.binary(BinaryOp::Add, a, one).unwrap();

        let copy = ir.copy_expr(sum);
        assert_ne!(copy, sum);
        assert!(ir.parent(copy).is_none());
        assert!(ir.exprs_equal(copy, sum));
    }

    #[test]
    fn test_equality_with_and_without_index() {
        let mut ir = IrArena::new();
        let a = eax(&mut ir);
        let b = eax(&mut ir);
        ir.set_ssa_index(a, Some(1));
        ir.set_ssa_index(b, Some(2));

        assert!(!ir.exprs_equal(a, b));
        assert!(ir.exprs_equal_no_index(a, b));
    }

    #[test]
    fn test_assign_marks_definition() {
        let mut ir = IrArena::new();
        let a = eax(&mut ir);
        let one = ir.value(1, 32);
        let _ = ir.assign(a, one).unwrap();
        assert!(ir.is_definition(a));
    }

    #[test]
    fn test_container_ownership_is_consistent() {
        let mut ir = IrArena::new();
        let c = ir.new_container();
        let a = eax(&mut ir);
        let s = ir.stmt_expr(a).unwrap();
        ir.push_stmt(c, s).unwrap();

        assert_eq!(ir.stmt_container(s), Some(c));
        assert_eq!(ir.stmt_index(s), Some(0));

        // Pushing the same statement again must fail.
        let c2 = ir.new_container();
        assert!(ir.push_stmt(c2, s).is_err());

        ir.remove_stmt(s).unwrap();
        assert!(ir.stmt_container(s).is_none());
        assert!(ir.container_stmts(c).is_empty());
    }
}
