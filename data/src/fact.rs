//! Type information attached to a symbolic tensor.
use crate::datum::DatumType;
use crate::shape_fact::Shape;
use std::fmt;

/// Element type and (partially known) shape of a tensor.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct TensorFact {
    /// tensor element type
    pub datum_type: DatumType,
    /// tensor shape
    pub shape: Shape,
}

impl TensorFact {
    pub fn dt_shape(datum_type: DatumType, shape: impl Into<Shape>) -> TensorFact {
        TensorFact { datum_type, shape: shape.into() }
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn with_shape(&self, shape: impl Into<Shape>) -> TensorFact {
        TensorFact { datum_type: self.datum_type, shape: shape.into() }
    }

    pub fn format_dt_shape(&self) -> String {
        format!("{}x{}", self.shape, self.datum_type)
    }
}

impl fmt::Debug for TensorFact {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.format_dt_shape())
    }
}

impl fmt::Display for TensorFact {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.format_dt_shape())
    }
}
