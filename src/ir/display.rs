//! Textual rendering of IR trees.
//!
//! This is the plain-text equivalent of a pretty-printer: enough to inspect
//! intermediate pipeline stages in tests and diagnostics. The real tokenizer/browser
//! front-end is a consumer of the IR tree, not part of this crate.

use std::fmt;

use crate::ir::{
    expression::{ExprKind, RegisterBank, UnaryOp},
    statement::StmtKind,
    ContainerId, ExprId, IrArena, StmtId,
};

/// Renders one expression subtree.
///
/// Obtained from [`IrArena::display_expr`].
pub struct ExprDisplay<'a> {
    ir: &'a IrArena,
    id: ExprId,
}

/// Renders one statement (recursively, with indentation).
///
/// Obtained from [`IrArena::display_stmt`].
pub struct StmtDisplay<'a> {
    ir: &'a IrArena,
    id: StmtId,
    indent: usize,
}

impl IrArena {
    /// Returns a displayable wrapper for an expression.
    #[must_use]
    pub fn display_expr(&self, id: ExprId) -> ExprDisplay<'_> {
        ExprDisplay { ir: self, id }
    }

    /// Returns a displayable wrapper for a statement.
    #[must_use]
    pub fn display_stmt(&self, id: StmtId) -> StmtDisplay<'_> {
        StmtDisplay {
            ir: self,
            id,
            indent: 0,
        }
    }

    /// Renders a container as indented pseudocode lines.
    #[must_use]
    pub fn display_container(&self, id: ContainerId, indent: usize) -> String {
        let mut out = String::new();
        for s in self.container_stmts(id) {
            let d = StmtDisplay {
                ir: self,
                id: *s,
                indent,
            };
            out.push_str(&d.to_string());
            out.push('\n');
        }
        out
    }
}

fn write_expr(f: &mut fmt::Formatter<'_>, ir: &IrArena, id: ExprId) -> fmt::Result {
    match ir.expr(id) {
        ExprKind::Value { value, .. } => {
            if value.unsigned_abs() >= 0x1000 {
                write!(f, "{value:#x}")
            } else {
                write!(f, "{value}")
            }
        }
        ExprKind::Reg {
            bank,
            number,
            name,
            index,
            ..
        } => {
            match name {
                Some(n) => write!(f, "{n}")?,
                None => match bank {
                    RegisterBank::General => write!(f, "r{number}")?,
                    RegisterBank::Flag => write!(f, "f{number}")?,
                },
            }
            if let Some(i) = index {
                write!(f, "@{i}")?;
            }
            Ok(())
        }
        ExprKind::Var { name, .. } | ExprKind::Arg { name, .. } => write!(f, "{name}"),
        ExprKind::Deref { addr, .. } => {
            write!(f, "*(")?;
            write_expr(f, ir, *addr)?;
            write!(f, ")")
        }
        ExprKind::Unary { op, operand } => match op {
            UnaryOp::PostInc | UnaryOp::PostDec => {
                write_expr(f, ir, *operand)?;
                write!(f, "{op}")
            }
            UnaryOp::Sign
            | UnaryOp::Overflow
            | UnaryOp::Carry
            | UnaryOp::Parity
            | UnaryOp::Adjust => {
                write!(f, "{op}(")?;
                write_expr(f, ir, *operand)?;
                write!(f, ")")
            }
            _ => {
                write!(f, "{op}")?;
                write_expr(f, ir, *operand)
            }
        },
        ExprKind::Binary { op, left, right } => {
            write!(f, "(")?;
            write_expr(f, ir, *left)?;
            write!(f, " {op} ")?;
            write_expr(f, ir, *right)?;
            write!(f, ")")
        }
        ExprKind::Ternary {
            cond,
            then,
            otherwise,
        } => {
            write!(f, "(")?;
            write_expr(f, ir, *cond)?;
            write!(f, " ? ")?;
            write_expr(f, ir, *then)?;
            write!(f, " : ")?;
            write_expr(f, ir, *otherwise)?;
            write!(f, ")")
        }
        ExprKind::Call { target, params } => {
            write_expr(f, ir, *target)?;
            write!(f, "(")?;
            if let Some(p) = params {
                write_expr(f, ir, *p)?;
            }
            write!(f, ")")
        }
    }
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, self.ir, self.id)
    }
}

fn write_stmt(f: &mut fmt::Formatter<'_>, ir: &IrArena, id: StmtId, indent: usize) -> fmt::Result {
    let pad = "    ".repeat(indent);
    match ir.stmt(id) {
        StmtKind::Expr { expr } => {
            write!(f, "{pad}")?;
            write_expr(f, ir, *expr)?;
            write!(f, ";")
        }
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            write!(f, "{pad}if (")?;
            write_expr(f, ir, *cond)?;
            writeln!(f, ") {{")?;
            write_body(f, ir, *then_body, indent + 1)?;
            match else_body {
                Some(e) => {
                    writeln!(f, "{pad}}} else {{")?;
                    write_body(f, ir, *e, indent + 1)?;
                    write!(f, "{pad}}}")
                }
                None => write!(f, "{pad}}}"),
            }
        }
        StmtKind::While { cond, body } => {
            write!(f, "{pad}while (")?;
            write_expr(f, ir, *cond)?;
            writeln!(f, ") {{")?;
            write_body(f, ir, *body, indent + 1)?;
            write!(f, "{pad}}}")
        }
        StmtKind::DoWhile { cond, body } => {
            writeln!(f, "{pad}do {{")?;
            write_body(f, ir, *body, indent + 1)?;
            write!(f, "{pad}}} while (")?;
            write_expr(f, ir, *cond)?;
            write!(f, ");")
        }
        StmtKind::Goto { target } => match ir.expr(*target).as_value() {
            #[allow(clippy::cast_sign_loss)]
            Some(ea) => write!(f, "{pad}goto loc_{:x};", ea as u64),
            None => {
                write!(f, "{pad}goto ")?;
                write_expr(f, ir, *target)?;
                write!(f, ";")
            }
        },
        StmtKind::JumpOut { target } => {
            write!(f, "{pad}goto *")?;
            write_expr(f, ir, *target)?;
            write!(f, ";")
        }
        StmtKind::Return { value } => match value {
            Some(v) => {
                write!(f, "{pad}return ")?;
                write_expr(f, ir, *v)?;
                write!(f, ";")
            }
            None => write!(f, "{pad}return;"),
        },
        StmtKind::Break => write!(f, "{pad}break;"),
        StmtKind::Continue => write!(f, "{pad}continue;"),
    }
}

fn write_body(
    f: &mut fmt::Formatter<'_>,
    ir: &IrArena,
    body: ContainerId,
    indent: usize,
) -> fmt::Result {
    for s in ir.container_stmts(body) {
        write_stmt(f, ir, *s, indent)?;
        writeln!(f)?;
    }
    Ok(())
}

impl fmt::Display for StmtDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self.ir, self.id, self.indent)
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BinaryOp, IrArena, RegisterBank, UnaryOp};

    #[test]
    fn test_expression_rendering() {
        let mut ir = IrArena::new();
        let eax = ir.reg(RegisterBank::General, 0, 32, Some("eax"));
        let one = ir.value(1, 32);
        let sum = ir.binary(BinaryOp::Add, eax, one).unwrap();
        assert_eq!(ir.display_expr(sum).to_string(), "(eax + 1)");
    }

    #[test]
    fn test_post_increment_rendering() {
        let mut ir = IrArena::new();
        let eax = ir.reg(RegisterBank::General, 0, 32, Some("eax"));
        let inc = ir.unary(UnaryOp::PostInc, eax).unwrap();
        assert_eq!(ir.display_expr(inc).to_string(), "eax++");
    }

    #[test]
    fn test_goto_rendering() {
        let mut ir = IrArena::new();
        let s = ir.stmt_goto(0x401000, 32).unwrap();
        assert_eq!(ir.display_stmt(s).to_string(), "goto loc_401000;");
    }
}
