use criterion::{criterion_group, criterion_main, Criterion};
use pseudoscope::{
    ir::{BinaryOp, ExprId, IrArena, RegisterBank, UnaryOp},
    simplify,
};

/// Builds a statement-attached expression that exercises several rule families:
/// flag lowering, literal folding and negation normalization.
fn build_corpus_expr(ir: &mut IrArena) -> ExprId {
    let a = ir.reg(RegisterBank::General, 0, 32, Some("eax"));
    let b = ir.reg(RegisterBank::General, 1, 32, Some("ebx"));
    let sub = ir.binary(BinaryOp::Sub, a, b).unwrap();
    let sub2 = ir.copy_expr(sub);
    let sign = ir.unary(UnaryOp::Sign, sub).unwrap();
    let overflow = ir.unary(UnaryOp::Overflow, sub2).unwrap();
    let cmp = ir.binary(BinaryOp::Neq, sign, overflow).unwrap();

    let x = ir.reg(RegisterBank::General, 2, 32, Some("ecx"));
    let two = ir.value(2, 32);
    let three = ir.value(3, 32);
    let inner = ir.binary(BinaryOp::Add, x, two).unwrap();
    let outer = ir.binary(BinaryOp::Add, inner, three).unwrap();
    let zero = ir.value(0, 32);
    let eq = ir.binary(BinaryOp::Eq, outer, zero).unwrap();

    let or = ir.binary(BinaryOp::LogicalOr, cmp, eq).unwrap();
    let not = ir.unary(UnaryOp::LogicalNot, or).unwrap();
    let root = not;
    let stmt = ir.stmt_expr(root).unwrap();
    let _ = stmt;
    root
}

fn bench_simplify(c: &mut Criterion) {
    c.bench_function("simplify_mixed_corpus", |bench| {
        bench.iter(|| {
            let mut ir = IrArena::new();
            let expr = build_corpus_expr(&mut ir);
            simplify::run(&mut ir, expr, true).unwrap()
        });
    });
}

criterion_group!(benches, bench_simplify);
criterion_main!(benches);
