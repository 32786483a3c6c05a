//! Handles on symbolic values produced by a backend.
use crate::internal::*;
use std::fmt;

/// Identifies one output of one node in a backend graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, new)]
pub struct OutletId {
    pub node: usize,
    pub slot: usize,
}

impl From<usize> for OutletId {
    fn from(node: usize) -> OutletId {
        OutletId::new(node, 0)
    }
}

/// A symbolic tensor: where it comes from in the backend graph, and what is
/// known of its type and shape.
///
/// The backend owns the value; layers and cells only hold handles to wire
/// them into new nodes, and only ever read the fact.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Tensor {
    outlet: OutletId,
    fact: TensorFact,
}

impl Tensor {
    /// Only meant to be called by `Backend` implementations.
    pub fn from_outlet(outlet: OutletId, fact: TensorFact) -> Tensor {
        Tensor { outlet, fact }
    }

    pub fn outlet(&self) -> OutletId {
        self.outlet
    }

    pub fn fact(&self) -> &TensorFact {
        &self.fact
    }

    pub fn shape(&self) -> &Shape {
        &self.fact.shape
    }

    pub fn datum_type(&self) -> DatumType {
        self.fact.datum_type
    }

    pub fn rank(&self) -> usize {
        self.fact.rank()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}/{} {:?}", self.outlet.node, self.outlet.slot, self.fact)
    }
}

/// Shapes of a list of tensors.
pub fn shapes_of(tensors: &[Tensor]) -> TVec<Shape> {
    tensors.iter().map(|t| t.shape().clone()).collect()
}
