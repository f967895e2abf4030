//! Shared test fixtures: a scripted disassembler backend and lifting factories.
//!
//! [`ScriptedArch`] implements [`Architecture`] from a per-address instruction
//! table, letting tests describe a synthetic function (straight-line code, branches,
//! loops) without any real disassembler. The [`lift`] module provides small
//! factories for the statement shapes tests build over and over.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::{
    arch::{Architecture, BranchTarget, Lifted},
    ir::{ExprId, ExprKind, IrArena, RegisterBank},
    Error, Result,
};

type LiftFn = Box<dyn Fn(&mut IrArena) -> Result<Vec<Lifted>>>;

/// One scripted instruction.
struct Instruction {
    size: u32,
    mnemonic: String,
    is_return: bool,
    branches: Vec<BranchTarget>,
    lift: LiftFn,
}

/// Table-driven [`Architecture`] double.
///
/// Every address registered through the builder methods becomes part of a single
/// synthetic function; `function_items` returns them all regardless of the queried
/// entry address.
#[derive(Default)]
pub(crate) struct ScriptedArch {
    instructions: BTreeMap<u64, Instruction>,
    noreturn_funcs: HashSet<u64>,
}

/// Register number the scripted backend treats as the stack pointer.
pub(crate) const STACK_REG: u16 = 100;

impl ScriptedArch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a plain instruction lowered by `lift`.
    pub(crate) fn instruction<F>(&mut self, ea: u64, size: u32, lift: F)
    where
        F: Fn(&mut IrArena) -> Result<Vec<Lifted>> + 'static,
    {
        self.instructions.insert(
            ea,
            Instruction {
                size,
                mnemonic: "insn".to_string(),
                is_return: false,
                branches: Vec::new(),
                lift: Box::new(lift),
            },
        );
    }

    /// Registers a return instruction.
    pub(crate) fn ret(&mut self, ea: u64, size: u32) {
        self.instructions.insert(
            ea,
            Instruction {
                size,
                mnemonic: "ret".to_string(),
                is_return: true,
                branches: Vec::new(),
                lift: Box::new(|ir| Ok(vec![Lifted::Stmt(ir.stmt_return(None)?)])),
            },
        );
    }

    /// Registers an unconditional jump to `target`.
    pub(crate) fn jmp(&mut self, ea: u64, size: u32, target: u64) {
        self.instructions.insert(
            ea,
            Instruction {
                size,
                mnemonic: "jmp".to_string(),
                is_return: false,
                branches: vec![BranchTarget::Literal(target)],
                lift: Box::new(move |ir| Ok(vec![Lifted::Stmt(ir.stmt_goto(target, 64)?)])),
            },
        );
    }

    /// Registers a conditional jump: taken to `target`, fallthrough to `ea + size`.
    ///
    /// The lifted form is the canonical flattened branch: `if (cond) goto target;`
    /// with the fallthrough goto appended by IR lowering.
    pub(crate) fn jcc<F>(&mut self, ea: u64, size: u32, target: u64, cond: F)
    where
        F: Fn(&mut IrArena) -> Result<ExprId> + 'static,
    {
        let fallthrough = ea + u64::from(size);
        self.instructions.insert(
            ea,
            Instruction {
                size,
                mnemonic: "jcc".to_string(),
                is_return: false,
                branches: vec![
                    BranchTarget::Literal(target),
                    BranchTarget::Literal(fallthrough),
                ],
                lift: Box::new(move |ir| {
                    let c = cond(ir)?;
                    let body = ir.new_container();
                    let goto = ir.stmt_goto(target, 64)?;
                    ir.push_stmt(body, goto)?;
                    Ok(vec![Lifted::Stmt(ir.stmt_if(c, body)?)])
                }),
            },
        );
    }

    /// Registers an indirect jump with no literal destination.
    pub(crate) fn jmp_computed(&mut self, ea: u64, size: u32, reg_name: &'static str, number: u16) {
        self.instructions.insert(
            ea,
            Instruction {
                size,
                mnemonic: "jmp".to_string(),
                is_return: false,
                branches: vec![BranchTarget::Computed],
                lift: Box::new(move |ir| {
                    let target = ir.reg(RegisterBank::General, number, 32, Some(reg_name));
                    Ok(vec![Lifted::Stmt(ir.stmt_jump_out(target)?)])
                }),
            },
        );
    }

    /// Marks the function at `ea` as never returning.
    pub(crate) fn mark_noreturn(&mut self, ea: u64) {
        self.noreturn_funcs.insert(ea);
    }
}

impl Architecture for ScriptedArch {
    fn mnemonic(&self, ea: u64) -> Result<String> {
        self.instructions
            .get(&ea)
            .map(|i| i.mnemonic.clone())
            .ok_or(Error::UndecodableInstruction(ea))
    }

    fn instruction_size(&self, ea: u64) -> Result<u32> {
        match self.instructions.get(&ea) {
            Some(i) if i.size > 0 => Ok(i.size),
            _ => Err(Error::UndecodableInstruction(ea)),
        }
    }

    fn is_return(&self, ea: u64) -> bool {
        self.instructions.get(&ea).is_some_and(|i| i.is_return)
    }

    fn has_jump(&self, ea: u64) -> bool {
        self.instructions
            .get(&ea)
            .is_some_and(|i| !i.branches.is_empty())
    }

    fn jump_branches(&self, ea: u64) -> Vec<BranchTarget> {
        self.instructions
            .get(&ea)
            .map(|i| i.branches.clone())
            .unwrap_or_default()
    }

    fn function_items(&self, _ea: u64) -> Result<BTreeSet<u64>> {
        Ok(self.instructions.keys().copied().collect())
    }

    fn function_returns(&self, ea: u64) -> bool {
        !self.noreturn_funcs.contains(&ea)
    }

    fn lift_instruction(&self, ir: &mut IrArena, ea: u64) -> Result<Vec<Lifted>> {
        match self.instructions.get(&ea) {
            Some(i) => (i.lift)(ir),
            None => Err(Error::UnsupportedInstruction {
                mnemonic: "?".to_string(),
                address: ea,
            }),
        }
    }

    fn operand_expression(&self, _ir: &mut IrArena, ea: u64, _n: usize) -> Result<ExprId> {
        Err(Error::Error(format!("no scripted operand at {ea:#x}")))
    }

    fn call_expression(&self, _ir: &mut IrArena, ea: u64) -> Result<(ExprId, Vec<ExprId>)> {
        Err(Error::Error(format!("no scripted call at {ea:#x}")))
    }

    fn is_stack_variable(&self, ir: &IrArena, expr: ExprId) -> bool {
        match ir.expr(expr) {
            ExprKind::Deref { addr, .. } => match ir.expr(*addr) {
                ExprKind::Reg { number, .. } => *number == STACK_REG,
                ExprKind::Binary { left, .. } => self.is_stack_register(ir, *left),
                _ => false,
            },
            _ => false,
        }
    }

    fn is_stack_register(&self, ir: &IrArena, expr: ExprId) -> bool {
        matches!(
            ir.expr(expr),
            ExprKind::Reg {
                bank: RegisterBank::General,
                number: STACK_REG,
                ..
            }
        )
    }
}

/// Factories for the statement shapes tests keep building.
pub(crate) mod lift {
    use crate::{
        arch::Lifted,
        ir::{BinaryOp, ExprId, IrArena, RegisterBank},
        Result,
    };

    /// Creates a general-purpose register reference.
    pub(crate) fn reg(ir: &mut IrArena, name: &str, number: u16) -> ExprId {
        ir.reg(RegisterBank::General, number, 32, Some(name))
    }

    /// Creates a flag pseudo-register reference.
    pub(crate) fn flag(ir: &mut IrArena, name: &str, number: u16) -> ExprId {
        ir.reg(RegisterBank::Flag, number, 1, Some(name))
    }

    /// `dst = value`
    pub(crate) fn assign_reg_value(
        ir: &mut IrArena,
        name: &str,
        number: u16,
        value: i64,
    ) -> Result<Vec<Lifted>> {
        let dst = reg(ir, name, number);
        let v = ir.value(value, 32);
        let assign = ir.assign(dst, v)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    }

    /// `dst = src`
    pub(crate) fn assign_reg_reg(
        ir: &mut IrArena,
        dst_name: &str,
        dst_number: u16,
        src_name: &str,
        src_number: u16,
    ) -> Result<Vec<Lifted>> {
        let dst = reg(ir, dst_name, dst_number);
        let src = reg(ir, src_name, src_number);
        let assign = ir.assign(dst, src)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    }

    /// `dst = dst + 1`
    pub(crate) fn increment_reg(
        ir: &mut IrArena,
        name: &str,
        number: u16,
    ) -> Result<Vec<Lifted>> {
        let dst = reg(ir, name, number);
        let src = reg(ir, name, number);
        let one = ir.value(1, 32);
        let add = ir.binary(BinaryOp::Add, src, one)?;
        let assign = ir.assign(dst, add)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    }

    /// `dst = call target`
    pub(crate) fn call_into_reg(
        ir: &mut IrArena,
        name: &str,
        number: u16,
        target: u64,
    ) -> Result<Vec<Lifted>> {
        let dst = reg(ir, name, number);
        #[allow(clippy::cast_possible_wrap)]
        let callee = ir.value(target as i64, 64);
        let call = ir.call(callee, None)?;
        let assign = ir.assign(dst, call)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    }

    /// Bare `call target` statement.
    pub(crate) fn call_stmt(ir: &mut IrArena, target: u64) -> Result<Vec<Lifted>> {
        #[allow(clippy::cast_possible_wrap)]
        let callee = ir.value(target as i64, 64);
        let call = ir.call(callee, None)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(call)?)])
    }
}
