//! Description of a backend loop: a body traced once on placeholders, and
//! how each outer tensor feeds it.
use crate::internal::*;

/// How one outer tensor is presented to the body at each iteration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InputMapping {
    /// Sliced along `axis`, one index per iteration. A negative `chunk` walks
    /// the axis from the end.
    Scan { axis: usize, chunk: isize },
    /// Initial value of a loop-carried state. The n-th state input is fed
    /// back by the n-th output mapping marked `state`.
    State,
    /// Passed unchanged to every iteration.
    Full,
}

impl InputMapping {
    pub fn as_scan(&self) -> Option<(usize, isize)> {
        match self {
            InputMapping::Scan { axis, chunk } => Some((*axis, *chunk)),
            _ => None,
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(self, InputMapping::State)
    }
}

/// What the loop exposes of one body output.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, new)]
pub struct OutputMapping {
    /// Feeds the next iteration's matching `State` input.
    pub state: bool,
    /// Stack every iteration's value along this axis, in the order of the
    /// scanned input (whatever the iteration direction).
    pub full_axis: Option<usize>,
    /// Expose the value of the last iteration.
    pub last_value: bool,
}

/// A loop to wire, as handed to `Backend::scan`.
///
/// `body_inputs` are placeholders the body was traced on, matched one to one
/// with `outer_inputs` and `input_mapping`. `body_outputs` match
/// `output_mapping`.
#[derive(Clone, Debug, Default)]
pub struct ScanSpec {
    pub outer_inputs: TVec<Tensor>,
    pub body_inputs: TVec<Tensor>,
    pub input_mapping: TVec<InputMapping>,
    pub body_outputs: TVec<Tensor>,
    pub output_mapping: TVec<OutputMapping>,
}

impl ScanSpec {
    pub fn add_input(&mut self, outer: Tensor, body: Tensor, mapping: InputMapping) {
        self.outer_inputs.push(outer);
        self.body_inputs.push(body);
        self.input_mapping.push(mapping);
    }

    pub fn add_output(&mut self, body: Tensor, mapping: OutputMapping) {
        self.body_outputs.push(body);
        self.output_mapping.push(mapping);
    }

    /// Structural checks every backend wants before wiring the loop.
    pub fn validate(&self) -> RecurResult<()> {
        ensure!(
            self.outer_inputs.len() == self.body_inputs.len()
                && self.body_inputs.len() == self.input_mapping.len(),
            "Scan inputs mismatch: {} outer, {} body, {} mappings",
            self.outer_inputs.len(),
            self.body_inputs.len(),
            self.input_mapping.len()
        );
        ensure!(
            self.body_outputs.len() == self.output_mapping.len(),
            "Scan outputs mismatch: {} body outputs, {} mappings",
            self.body_outputs.len(),
            self.output_mapping.len()
        );
        let scanned = self.input_mapping.iter().filter(|m| m.as_scan().is_some()).count();
        ensure!(scanned > 0, "Scan needs at least one scanned input");
        let states_in = self.input_mapping.iter().filter(|m| m.is_state()).count();
        let states_out = self.output_mapping.iter().filter(|m| m.state).count();
        if states_in != states_out {
            bail!(RnnError::ArgumentCount {
                what: "loop states fed back by the body",
                expected: states_in,
                got: states_out
            })
        }
        let state_inputs =
            self.body_inputs.iter().zip(&self.input_mapping).filter(|(_, m)| m.is_state());
        let state_outputs =
            self.body_outputs.iter().zip(&self.output_mapping).filter(|(_, m)| m.state);
        for (ix, ((input, _), (output, _))) in state_inputs.zip(state_outputs).enumerate() {
            if !input.shape().is_compatible_with(output.shape()) {
                bail!(RnnError::ShapeConstraint {
                    input: format!("loop state {ix}"),
                    detail: format!(
                        "body turns a {} state into a {} one",
                        input.shape(),
                        output.shape()
                    ),
                })
            }
        }
        Ok(())
    }

    /// Length of the scanned axis of the first scanned input.
    pub fn iterations(&self) -> Option<usize> {
        self.outer_inputs
            .iter()
            .zip(&self.input_mapping)
            .find_map(|(t, m)| m.as_scan().map(|(axis, _)| t.shape().dim(axis)))
            .flatten()
    }
}

/// Outer tensors produced for one output mapping.
#[derive(Clone, Debug, Default)]
pub struct ScanOutput {
    pub full: Option<Tensor>,
    pub last: Option<Tensor>,
}
