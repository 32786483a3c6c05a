//! Per-timestep computations a recurrent layer iterates over the time axis.
use crate::internal::*;
use downcast_rs::{Downcast, impl_downcast};
use dyn_clone::DynClone;
use std::fmt::Debug;

mod gru;
mod simple;

pub use gru::GruCell;
pub use simple::SimpleCell;

/// One step of a recurrence: consume one timestep of input and the previous
/// states, produce the step output and the next states.
pub trait Cell: Debug + DynClone + Downcast + Send + Sync {
    fn name(&self) -> Cow<'_, str>;

    /// Trailing dimension of each state tensor the cell carries. Empty for a
    /// stateless cell. Must not change once the cell is in use.
    fn state_size(&self) -> TVec<usize>;

    /// Width of the step output. `None` means the output has the width of
    /// the step input.
    fn output_size(&self) -> Option<usize> {
        self.state_size().first().copied()
    }

    /// Wire one step. `states` has one tensor per `state_size` entry and the
    /// returned states must match it in count and trailing dimensions.
    /// Without an implementation, the step passes its input and states
    /// through.
    fn step(
        &self,
        input: &Tensor,
        states: &[Tensor],
        _constants: &[Tensor],
    ) -> RecurResult<(Tensor, TVec<Tensor>)> {
        Ok((input.clone(), states.into()))
    }

    /// Cells owning weights must be built against the step input shape
    /// before their first step.
    fn as_buildable(&self) -> Option<&dyn BuildableCell> {
        None
    }

    fn as_buildable_mut(&mut self) -> Option<&mut dyn BuildableCell> {
        None
    }
}

dyn_clone::clone_trait_object!(Cell);
impl_downcast!(Cell);

/// Build lifecycle of a cell creating weights.
pub trait BuildableCell {
    fn built(&self) -> bool;

    /// `input_shapes[0]` is the step input shape `(batch, features...)`, the
    /// following ones are the shapes of the constants, if any.
    fn build(&mut self, input_shapes: &[Shape]) -> RecurResult<()>;
}

/// Size of the feature axis of a rank 2 step input, which dense cells need
/// to size their kernels.
pub(crate) fn step_features(cell: &str, shape: &Shape) -> RecurResult<usize> {
    match (shape.rank(), shape.last()) {
        (2, Some(features)) => Ok(features),
        _ => bail!(RnnError::ShapeConstraint {
            input: format!("step input of {cell}"),
            detail: format!("expected (batch, features) with known features, got {shape}"),
        }),
    }
}

pub(crate) fn check_state_count(cell: &dyn Cell, states: &[Tensor]) -> RecurResult<()> {
    let expected = cell.state_size().len();
    if states.len() != expected {
        bail!(RnnError::ArgumentCount { what: "cell states", expected, got: states.len() })
    }
    Ok(())
}
