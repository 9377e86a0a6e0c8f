//! SIMD auto-vectorization for the Ember tracing JIT.
//!
//! Given the linear recording of one hot-loop iteration, this crate
//! opportunistically rewrites groups of isomorphic scalar operations into
//! fixed-width vector operations, gated by a profitability estimate.
//! Traces that cannot or should not be vectorized are left untouched: the
//! pass reports one of exactly two recoverable bail-outs and the embedding
//! compiler proceeds with the scalar trace.
//!
//! # Pipeline
//!
//! 1. **Unroll** the body until one iteration fills a vector register
//! 2. **Dependency graph** with alias-aware memory edges
//! 3. **Pack discovery** from adjacent memory accesses outward
//! 4. **Scheduling** that fuses complete packs into vector operations
//! 5. **Cost gate** on a running savings counter
//! 6. **Guard strengthening** over affine index bounds
//!
//! # Example
//!
//! ```
//! use ember_vector::machine::MachineDescriptor;
//! use ember_vector::trace::{AccessKind, ArrayDescriptor, IntBinOp, ResultKind, TraceBuilder};
//! use ember_vector::vectorize::{VectorizeConfig, Vectorizer};
//!
//! // x = a[i]; a[i] = x + 1
//! let mut b = TraceBuilder::new();
//! let a = b.live_in(ResultKind::Ref);
//! let i = b.live_in(ResultKind::Int);
//! let descr = ArrayDescriptor::primitive(8);
//! let x = b.load(AccessKind::Raw, ResultKind::Int, a, i, descr);
//! let one = b.const_int(1);
//! let y = b.int_op(IntBinOp::Add, x, one);
//! b.store(AccessKind::Raw, a, i, y, descr);
//! let eight = b.const_int(8);
//! let next = b.int_op(IntBinOp::Add, i, eight);
//! let trace = b.finish(&[a, next]);
//!
//! let machine = MachineDescriptor::sse128();
//! let vectorized = Vectorizer::new(&machine, VectorizeConfig::default())
//!     .optimize(&trace)
//!     .expect("profitable");
//! assert!(vectorized.stats.ops_vectorized > 0);
//! ```

pub mod machine;
pub mod trace;
pub mod vectorize;

pub use machine::{MachineDescriptor, OpRestrict};
pub use vectorize::{
    StructuralReason, VectorizeBail, VectorizeConfig, VectorizeStats, VectorizedTrace, Vectorizer,
};
