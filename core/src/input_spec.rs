//! Declarative constraints on the tensors a layer accepts.
use crate::internal::*;
use std::fmt;

/// Expected rank, element type and shape of one layer input.
///
/// A tensor satisfies the spec if every constraint that is set holds. Shape
/// axes left to `None` in the spec accept anything, and so do axes of the
/// tensor that are not known yet.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct InputSpec {
    pub datum_type: Option<DatumType>,
    pub ndim: Option<usize>,
    pub min_ndim: Option<usize>,
    pub shape: Option<Shape>,
}

impl InputSpec {
    pub fn with_ndim(ndim: usize) -> InputSpec {
        InputSpec { ndim: Some(ndim), ..InputSpec::default() }
    }

    pub fn with_min_ndim(min_ndim: usize) -> InputSpec {
        InputSpec { min_ndim: Some(min_ndim), ..InputSpec::default() }
    }

    /// Setting the shape also fixes the rank.
    pub fn with_shape(shape: impl Into<Shape>) -> InputSpec {
        let shape = shape.into();
        InputSpec { ndim: Some(shape.rank()), shape: Some(shape), ..InputSpec::default() }
    }

    /// `(?, size)`: the spec of one state tensor of a cell.
    pub fn last_axis(size: usize) -> InputSpec {
        InputSpec::with_shape(shape!(_, size))
    }

    /// Pin every axis of `shape` but the leading batch axis.
    pub fn batch_agnostic(shape: &Shape) -> InputSpec {
        let mut shape = shape.clone();
        if shape.rank() > 0 {
            shape.set(0, None);
        }
        InputSpec::with_shape(shape)
    }

    pub fn datum_type(self, dt: DatumType) -> InputSpec {
        InputSpec { datum_type: Some(dt), ..self }
    }

    /// Required size of the last axis, if the spec pins it.
    pub fn last_axis_size(&self) -> Option<usize> {
        self.shape.as_ref().and_then(|s| s.last())
    }

    /// Check a fact against the spec. `input` names the tensor in the error.
    pub fn check(&self, input: &str, fact: &TensorFact) -> RecurResult<()> {
        let violation = |detail: String| -> RecurResult<()> {
            bail!(RnnError::ShapeConstraint { input: input.to_string(), detail })
        };
        if let Some(ndim) = self.ndim {
            if fact.rank() != ndim {
                return violation(format!(
                    "expected ndim={}, found ndim={} ({:?})",
                    ndim,
                    fact.rank(),
                    fact
                ));
            }
        }
        if let Some(min_ndim) = self.min_ndim {
            if fact.rank() < min_ndim {
                return violation(format!(
                    "expected min_ndim={}, found ndim={} ({:?})",
                    min_ndim,
                    fact.rank(),
                    fact
                ));
            }
        }
        if let Some(dt) = self.datum_type {
            if fact.datum_type != dt {
                return violation(format!("expected dtype={}, found dtype={}", dt, fact.datum_type));
            }
        }
        if let Some(shape) = &self.shape {
            for (axis, (expected, found)) in shape.iter().zip(fact.shape.iter()).enumerate() {
                if let (Some(expected), Some(found)) = (expected, found) {
                    if expected != found {
                        return violation(format!(
                            "expected axis {} to have value {}, found shape {}",
                            axis, expected, fact.shape
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, fact: &TensorFact) -> bool {
        self.check("", fact).is_ok()
    }
}

impl fmt::Debug for InputSpec {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut parts = vec![];
        if let Some(dt) = self.datum_type {
            parts.push(format!("dtype={dt}"));
        }
        if let Some(shape) = &self.shape {
            parts.push(format!("shape={shape}"));
        } else if let Some(ndim) = self.ndim {
            parts.push(format!("ndim={ndim}"));
        }
        if let Some(min_ndim) = self.min_ndim {
            parts.push(format!("min_ndim={min_ndim}"));
        }
        write!(fmt, "InputSpec({})", parts.join(", "))
    }
}

/// Check a list of inputs against the layer's input specs, one spec per input.
pub fn assert_input_compatibility(
    layer: &str,
    specs: &[InputSpec],
    inputs: &[Tensor],
) -> RecurResult<()> {
    if specs.len() != inputs.len() {
        bail!(RnnError::ArgumentCount { what: "inputs", expected: specs.len(), got: inputs.len() })
    }
    for (ix, (spec, input)) in specs.iter().zip(inputs.iter()).enumerate() {
        spec.check(&format!("{ix} of layer {layer}"), input.fact())?;
    }
    Ok(())
}
