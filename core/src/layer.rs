//! The generic layer contract a model builder wires layers through.
use crate::internal::*;
use std::fmt::Debug;

pub trait Layer: Debug {
    fn name(&self) -> Cow<'_, str>;

    fn built(&self) -> bool;

    /// Constraints on the layer inputs, checked before every call.
    fn input_spec(&self) -> TVec<InputSpec>;

    /// Called once, before the first call, with the shapes of the inputs.
    fn build(&mut self, input_shapes: &[Shape]) -> RecurResult<()>;

    /// Output shapes for the given input shapes, without touching any
    /// backend.
    fn compute_output_shape(&self, input_shapes: &[Shape]) -> RecurResult<TVec<Shape>>;

    /// One mask per output, from the inputs and their masks.
    fn compute_mask(&self, inputs: &[Tensor], masks: &[Option<Tensor>]) -> TVec<Option<Tensor>>;

    /// Wire the layer computation.
    fn call(
        &mut self,
        inputs: &[Tensor],
        masks: &[Option<Tensor>],
        training: Option<bool>,
    ) -> RecurResult<TVec<Tensor>>;

    /// Validate the inputs, build on first use, then call.
    fn apply(
        &mut self,
        inputs: &[Tensor],
        masks: &[Option<Tensor>],
        training: Option<bool>,
    ) -> RecurResult<TVec<Tensor>> {
        let name = self.name().into_owned();
        let specs = self.input_spec();
        if inputs.len() < specs.len() {
            bail!(RnnError::ArgumentCount {
                what: "inputs",
                expected: specs.len(),
                got: inputs.len()
            })
        }
        assert_input_compatibility(&name, &specs, &inputs[..specs.len()])?;
        if !self.built() {
            self.build(&shapes_of(inputs)).with_context(|| format!("Building {name}"))?;
        }
        self.call(inputs, masks, training).with_context(|| format!("Calling {name}"))
    }
}
