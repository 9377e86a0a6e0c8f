//! Vectorization pass throughput on a representative kernel trace.

use criterion::{criterion_group, criterion_main, Criterion};
use ember_vector::machine::MachineDescriptor;
use ember_vector::trace::{
    AccessKind, ArrayDescriptor, IntBinOp, ResultKind, Trace, TraceBuilder,
};
use ember_vector::vectorize::{VectorizeConfig, Vectorizer};

/// a[i] = b[i] + c[i], the canonical vectorizable kernel.
fn kernel_trace() -> Trace {
    let mut b = TraceBuilder::new();
    let dst = b.live_in(ResultKind::Ref);
    let lhs = b.live_in(ResultKind::Ref);
    let rhs = b.live_in(ResultKind::Ref);
    let i = b.live_in(ResultKind::Int);
    let descr = ArrayDescriptor::primitive(8);
    let x = b.load(AccessKind::Raw, ResultKind::Int, lhs, i, descr);
    let y = b.load(AccessKind::Raw, ResultKind::Int, rhs, i, descr);
    let sum = b.int_op(IntBinOp::Add, x, y);
    b.store(AccessKind::Raw, dst, i, sum, descr);
    let eight = b.const_int(8);
    let next = b.int_op(IntBinOp::Add, i, eight);
    b.finish(&[dst, lhs, rhs, next])
}

fn bench_optimize(c: &mut Criterion) {
    let machine = MachineDescriptor::sse128();
    let vectorizer = Vectorizer::new(&machine, VectorizeConfig::default());
    let trace = kernel_trace();

    c.bench_function("vectorize_add_kernel", |bench| {
        bench.iter(|| {
            vectorizer
                .optimize(std::hint::black_box(&trace))
                .expect("kernel vectorizes")
        })
    });
}

criterion_group!(benches, bench_optimize);
criterion_main!(benches);
