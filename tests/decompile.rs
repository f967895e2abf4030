//! End-to-end pipeline tests over a small scripted backend.
//!
//! These drive the full driver — block discovery, lifting, SSA, chain
//! simplification, renaming, restructuring — and check the final pseudocode shape.

use std::collections::{BTreeMap, BTreeSet};

use pseudoscope::{
    arch::{Architecture, BranchTarget, Lifted},
    decompiler::{Decompiler, Stage},
    ir::{BinaryOp, ExprId, ExprKind, IrArena, RegisterBank},
    Error, Result,
};

type LiftFn = Box<dyn Fn(&mut IrArena) -> Result<Vec<Lifted>>>;

struct Insn {
    size: u32,
    is_return: bool,
    branches: Vec<BranchTarget>,
    lift: LiftFn,
}

/// Table-driven backend for one synthetic function.
#[derive(Default)]
struct TestArch {
    insns: BTreeMap<u64, Insn>,
}

impl TestArch {
    fn new() -> Self {
        Self::default()
    }

    fn insn<F>(&mut self, ea: u64, size: u32, lift: F)
    where
        F: Fn(&mut IrArena) -> Result<Vec<Lifted>> + 'static,
    {
        self.insns.insert(
            ea,
            Insn {
                size,
                is_return: false,
                branches: Vec::new(),
                lift: Box::new(lift),
            },
        );
    }

    fn jmp(&mut self, ea: u64, size: u32, target: u64) {
        self.insns.insert(
            ea,
            Insn {
                size,
                is_return: false,
                branches: vec![BranchTarget::Literal(target)],
                lift: Box::new(move |ir| Ok(vec![Lifted::Stmt(ir.stmt_goto(target, 64)?)])),
            },
        );
    }

    fn jcc<F>(&mut self, ea: u64, size: u32, target: u64, cond: F)
    where
        F: Fn(&mut IrArena) -> Result<ExprId> + 'static,
    {
        let fallthrough = ea + u64::from(size);
        self.insns.insert(
            ea,
            Insn {
                size,
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

    fn ret(&mut self, ea: u64, size: u32, value: Option<(&'static str, u16)>) {
        self.insns.insert(
            ea,
            Insn {
                size,
                is_return: true,
                branches: Vec::new(),
                lift: Box::new(move |ir| {
                    let v = value
                        .map(|(name, number)| {
                            ir.reg(RegisterBank::General, number, 32, Some(name))
                        });
                    Ok(vec![Lifted::Stmt(ir.stmt_return(v)?)])
                }),
            },
        );
    }
}

fn reg(ir: &mut IrArena, name: &str, number: u16) -> ExprId {
    ir.reg(RegisterBank::General, number, 32, Some(name))
}

impl Architecture for TestArch {
    fn mnemonic(&self, ea: u64) -> Result<String> {
        self.insns
            .get(&ea)
            .map(|_| "insn".to_string())
            .ok_or(Error::UndecodableInstruction(ea))
    }

    fn instruction_size(&self, ea: u64) -> Result<u32> {
        match self.insns.get(&ea) {
            Some(i) if i.size > 0 => Ok(i.size),
            _ => Err(Error::UndecodableInstruction(ea)),
        }
    }

    fn is_return(&self, ea: u64) -> bool {
        self.insns.get(&ea).is_some_and(|i| i.is_return)
    }

    fn has_jump(&self, ea: u64) -> bool {
        self.insns.get(&ea).is_some_and(|i| !i.branches.is_empty())
    }

    fn jump_branches(&self, ea: u64) -> Vec<BranchTarget> {
        self.insns
            .get(&ea)
            .map(|i| i.branches.clone())
            .unwrap_or_default()
    }

    fn function_items(&self, _ea: u64) -> Result<BTreeSet<u64>> {
        Ok(self.insns.keys().copied().collect())
    }

    fn lift_instruction(&self, ir: &mut IrArena, ea: u64) -> Result<Vec<Lifted>> {
        match self.insns.get(&ea) {
            Some(i) => (i.lift)(ir),
            None => Err(Error::UnsupportedInstruction {
                mnemonic: "?".to_string(),
                address: ea,
            }),
        }
    }

    fn operand_expression(&self, _ir: &mut IrArena, ea: u64, _n: usize) -> Result<ExprId> {
        Err(Error::Error(format!("no operand table for {ea:#x}")))
    }

    fn call_expression(&self, _ir: &mut IrArena, ea: u64) -> Result<(ExprId, Vec<ExprId>)> {
        Err(Error::Error(format!("no call table for {ea:#x}")))
    }

    fn is_stack_variable(&self, _ir: &IrArena, _expr: ExprId) -> bool {
        false
    }

    fn is_stack_register(&self, _ir: &IrArena, _expr: ExprId) -> bool {
        false
    }
}

/// A counting loop comes out as a single `while` with a renamed counter.
///
/// ```text
/// 0x1000  ecx = 0
/// 0x1001  if (ecx >= 10) goto 0x1005
/// 0x1002  ecx = ecx + 1
/// 0x1003  jmp 0x1001
/// 0x1005  ret
/// ```
#[test]
fn test_counting_loop_structures_into_while() {
    let mut arch = TestArch::new();
    arch.insn(0x1000, 1, |ir| {
        let dst = reg(ir, "ecx", 2);
        let zero = ir.value(0, 32);
        let assign = ir.assign(dst, zero)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    });
    arch.jcc(0x1001, 1, 0x1005, |ir| {
        let c = reg(ir, "ecx", 2);
        let ten = ir.value(10, 32);
        ir.binary(BinaryOp::Geq, c, ten)
    });
    arch.insn(0x1002, 1, |ir| {
        let dst = reg(ir, "ecx", 2);
        let src = reg(ir, "ecx", 2);
        let one = ir.value(1, 32);
        let add = ir.binary(BinaryOp::Add, src, one)?;
        let assign = ir.assign(dst, add)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    });
    arch.jmp(0x1003, 2, 0x1001);
    arch.ret(0x1005, 1, None);

    let mut decompiler = Decompiler::new(&arch, 0x1000);
    let flow = decompiler.run().unwrap();

    let rendered = flow.to_pseudocode();
    assert!(rendered.contains("while"), "got:\n{rendered}");
    assert!(rendered.contains("(var0 < 10)"), "got:\n{rendered}");
    assert!(rendered.contains("var0 = (var0 + 1)"), "got:\n{rendered}");
    assert!(!rendered.contains("goto"), "gotos survived:\n{rendered}");

    // Everything collapsed into the entry block.
    assert_eq!(flow.block_addresses(), vec![0x1000]);
}

/// A two-armed branch comes out as `if/else` with no gotos.
///
/// ```text
/// 0x1000  if (eax == 0) goto 0x1004
/// 0x1001  ebx = 1
/// 0x1002  jmp 0x1005
/// 0x1004  ebx = 2
/// 0x1005  ret ebx
/// ```
#[test]
fn test_diamond_structures_into_if_else() {
    let mut arch = TestArch::new();
    arch.jcc(0x1000, 1, 0x1004, |ir| {
        let a = reg(ir, "eax", 0);
        let zero = ir.value(0, 32);
        ir.binary(BinaryOp::Eq, a, zero)
    });
    arch.insn(0x1001, 1, |ir| {
        let dst = reg(ir, "ebx", 1);
        let one = ir.value(1, 32);
        let assign = ir.assign(dst, one)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    });
    arch.jmp(0x1002, 2, 0x1005);
    arch.insn(0x1004, 1, |ir| {
        let dst = reg(ir, "ebx", 1);
        let two = ir.value(2, 32);
        let assign = ir.assign(dst, two)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    });
    arch.ret(0x1005, 1, Some(("ebx", 1)));

    let mut decompiler = Decompiler::new(&arch, 0x1000);
    let flow = decompiler.run().unwrap();

    let rendered = flow.to_pseudocode();
    assert!(rendered.contains("if"), "got:\n{rendered}");
    assert!(rendered.contains("else"), "got:\n{rendered}");
    assert!(rendered.contains("return"), "got:\n{rendered}");
    assert!(!rendered.contains("goto"), "gotos survived:\n{rendered}");
}

/// Stepping the driver yields every stage exactly once, and the SSA stage leaves
/// every register use with a version that matches a reaching definition.
#[test]
fn test_stepwise_ssa_versions_are_consistent() {
    let mut arch = TestArch::new();
    arch.insn(0x1000, 1, |ir| {
        let dst = reg(ir, "eax", 0);
        let five = ir.value(5, 32);
        let assign = ir.assign(dst, five)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    });
    arch.insn(0x1001, 1, |ir| {
        let dst = reg(ir, "ebx", 1);
        let src = reg(ir, "eax", 0);
        let assign = ir.assign(dst, src)?;
        Ok(vec![Lifted::Stmt(ir.stmt_expr(assign)?)])
    });
    arch.ret(0x1002, 1, None);

    let mut decompiler = Decompiler::new(&arch, 0x1000);
    decompiler.run_until(Stage::Ssa).unwrap();

    let flow = decompiler.flow().unwrap();
    let container = flow.block(0x1000).unwrap().container;

    let mut def_versions = Vec::new();
    let mut use_versions = Vec::new();
    for stmt in flow.ir.container_stmts(container) {
        for root in flow.ir.stmt(*stmt).exprs() {
            for op in flow.ir.post_order(root) {
                if !matches!(flow.ir.expr(op), ExprKind::Reg { .. }) {
                    continue;
                }
                let version = flow.ir.ssa_index(op).expect("every operand is versioned");
                if flow.ir.is_definition(op) {
                    def_versions.push(version);
                } else {
                    use_versions.push(version);
                }
            }
        }
    }

    // No two definitions share a version; every use matches some definition.
    let mut sorted = def_versions.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), def_versions.len());
    for v in use_versions {
        assert!(def_versions.contains(&v));
    }
}
