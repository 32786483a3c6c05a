//! The numeric backend a layer wires its graph into.
//!
//! Layers and cells never compute anything: they ask the backend for new
//! symbolic tensors. A backend is handed to them at construction, there is no
//! process-wide current backend.
use crate::internal::*;
use downcast_rs::{DowncastSync, impl_downcast};
use std::fmt::Debug;

mod ops;
mod scan;
pub mod symbolic;

pub use ops::{Activation, BinOp, Initializer};
pub use scan::{InputMapping, OutputMapping, ScanOutput, ScanSpec};
pub use symbolic::SymbolicBackend;

pub trait Backend: Debug + DowncastSync {
    fn name(&self) -> &str;

    /// Default float type for synthesized tensors.
    fn floatx(&self) -> DatumType {
        DatumType::F32
    }

    /// Static shape of a tensor, `None` on undetermined axes.
    fn int_shape(&self, t: &Tensor) -> Shape {
        t.shape().clone()
    }

    /// Graph input, to be fed at run time.
    fn placeholder(&self, name: &str, fact: TensorFact) -> RecurResult<Tensor>;

    /// Trainable value. The shape must be fully known.
    fn variable(&self, name: &str, fact: TensorFact, init: Initializer) -> RecurResult<Tensor>;

    /// Zero-filled tensor. The shape must be fully known.
    fn zeros(&self, fact: TensorFact) -> RecurResult<Tensor>;

    fn zeros_like(&self, t: &Tensor) -> RecurResult<Tensor>;

    /// Sum over `axes`, dropping them unless `keep_dims`.
    fn sum(&self, t: &Tensor, axes: &[usize], keep_dims: bool) -> RecurResult<Tensor>;

    /// Insert a unit axis at `axis`.
    fn expand_dims(&self, t: &Tensor, axis: usize) -> RecurResult<Tensor>;

    /// Repeat the tensor `multiples[i]` times along axis `i`.
    fn tile(&self, t: &Tensor, multiples: &[usize]) -> RecurResult<Tensor>;

    /// Pick entry `index` along `axis`, removing the axis.
    fn take(&self, t: &Tensor, axis: usize, index: usize) -> RecurResult<Tensor>;

    /// Stack same-shaped tensors along a new axis.
    fn stack(&self, ts: &[Tensor], axis: usize) -> RecurResult<Tensor>;

    /// Elementwise `cond ? then : otherwise`, broadcasting.
    fn select(&self, cond: &Tensor, then: &Tensor, otherwise: &Tensor) -> RecurResult<Tensor>;

    /// Product over the last axis of `a` and the first axis of a rank 2 `b`.
    fn matmul(&self, a: &Tensor, b: &Tensor) -> RecurResult<Tensor>;

    fn binary(&self, op: BinOp, a: &Tensor, b: &Tensor) -> RecurResult<Tensor>;

    fn activation(&self, t: &Tensor, activation: Activation) -> RecurResult<Tensor>;

    /// Backend native loop. Returns one `ScanOutput` per output mapping.
    fn scan(&self, scan: ScanSpec) -> RecurResult<TVec<ScanOutput>>;

    fn add(&self, a: &Tensor, b: &Tensor) -> RecurResult<Tensor> {
        self.binary(BinOp::Add, a, b)
    }

    fn sub(&self, a: &Tensor, b: &Tensor) -> RecurResult<Tensor> {
        self.binary(BinOp::Sub, a, b)
    }

    fn mul(&self, a: &Tensor, b: &Tensor) -> RecurResult<Tensor> {
        self.binary(BinOp::Mul, a, b)
    }
}

impl_downcast!(sync Backend);
