//! Iterating a cell over the time axis, either unrolled at graph
//! construction or as a single backend scan.
use crate::internal::*;

/// What the time loop produced.
#[derive(Debug, Clone)]
pub(super) struct LoopOutputs {
    pub last_output: Tensor,
    pub sequence: Option<Tensor>,
    pub states: TVec<Tensor>,
}

pub(super) struct TimeLoop<'a> {
    pub name: &'a str,
    pub backend: &'a dyn Backend,
    pub cell: &'a dyn Cell,
    pub inputs: &'a Tensor,
    pub mask: Option<&'a Tensor>,
    pub constants: &'a [Tensor],
    pub go_backwards: bool,
    pub return_sequences: bool,
}

/// `(batch, dim)` zeros, batch taken from `inputs` at run time: zeros like
/// the input, summed down to `(batch, 1)`, then tiled.
pub(super) fn zero_state(
    backend: &dyn Backend,
    inputs: &Tensor,
    dims: &[usize],
) -> RecurResult<TVec<Tensor>> {
    if dims.is_empty() {
        return Ok(tvec!());
    }
    let zeros = backend.zeros_like(inputs)?;
    let axes = (1..backend.int_shape(inputs).rank()).collect::<TVec<_>>();
    let summed = backend.sum(&zeros, &axes, false)?;
    let column = backend.expand_dims(&summed, 1)?;
    dims.iter().map(|&dim| backend.tile(&column, &[1, dim])).collect()
}

impl TimeLoop<'_> {
    fn step(
        &self,
        input: &Tensor,
        states: &[Tensor],
        constants: &[Tensor],
    ) -> RecurResult<(Tensor, TVec<Tensor>)> {
        let (output, new_states) = self
            .cell
            .step(input, states, constants)
            .with_context(|| format!("Wiring step of {}", self.cell.name()))?;
        if new_states.len() != states.len() {
            bail!(RnnError::ArgumentCount {
                what: "states returned by the cell",
                expected: states.len(),
                got: new_states.len()
            })
        }
        Ok((output, new_states))
    }

    /// Keep `previous` where the step mask is off. `mask_t` is `(batch,)`.
    fn keep_masked(&self, mask_t: &Tensor, new: &Tensor, previous: &Tensor) -> RecurResult<Tensor> {
        let mut mask = mask_t.clone();
        while mask.rank() < new.rank() {
            mask = self.backend.expand_dims(&mask, mask.rank())?;
        }
        self.backend.select(&mask, new, previous)
    }

    /// One cell step per timestep, chained through the states.
    pub fn unrolled(&self, timesteps: usize, initial: TVec<Tensor>) -> RecurResult<LoopOutputs> {
        debug!("{}: unrolling {} steps", self.name, timesteps);
        let b = self.backend;
        let order: Vec<usize> = if self.go_backwards {
            (0..timesteps).rev().collect()
        } else {
            (0..timesteps).collect()
        };
        let mut states = initial;
        let mut outputs: Vec<Option<Tensor>> = vec![None; timesteps];
        let mut last: Option<Tensor> = None;
        for t in order {
            let x_t = b.take(self.inputs, 1, t)?;
            let (mut output, mut new_states) = self.step(&x_t, &states, self.constants)?;
            if let Some(mask) = self.mask {
                let mask_t = b.take(mask, 1, t)?;
                let previous = match &last {
                    Some(previous) => previous.clone(),
                    None => b.zeros_like(&output)?,
                };
                output = self.keep_masked(&mask_t, &output, &previous)?;
                new_states = new_states
                    .iter()
                    .zip(states.iter())
                    .map(|(new, old)| self.keep_masked(&mask_t, new, old))
                    .collect::<RecurResult<_>>()?;
            }
            outputs[t] = Some(output.clone());
            last = Some(output);
            states = new_states;
        }
        let Some(last_output) = last else {
            bail!(RnnError::config(format!("{} has no timestep to unroll", self.name)))
        };
        let sequence = if self.return_sequences {
            let outputs = outputs.into_iter().flatten().collect::<Vec<_>>();
            Some(b.stack(&outputs, 1)?)
        } else {
            None
        };
        Ok(LoopOutputs { last_output, sequence, states })
    }

    /// Trace the step once on placeholders and hand it to the backend loop.
    pub fn scanned(&self, initial: TVec<Tensor>) -> RecurResult<LoopOutputs> {
        debug!("{}: wiring scan over {}", self.name, self.inputs.shape());
        let b = self.backend;
        let chunk = if self.go_backwards { -1 } else { 1 };
        let mut scan = ScanSpec::default();

        let x_fact = self.inputs.fact().with_shape(self.inputs.shape().without_axis(1)?);
        let x_t = b.placeholder(&format!("{}.x_t", self.name), x_fact)?;
        scan.add_input(self.inputs.clone(), x_t.clone(), InputMapping::Scan { axis: 1, chunk });

        let mask_t = if let Some(mask) = self.mask {
            let fact = mask.fact().with_shape(mask.shape().without_axis(1)?);
            let mask_t = b.placeholder(&format!("{}.mask_t", self.name), fact)?;
            scan.add_input(mask.clone(), mask_t.clone(), InputMapping::Scan { axis: 1, chunk });
            Some(mask_t)
        } else {
            None
        };

        let mut states = tvec!();
        for (ix, state) in initial.iter().enumerate() {
            let h = b.placeholder(&format!("{}.state_{}", self.name, ix), state.fact().clone())?;
            scan.add_input(state.clone(), h.clone(), InputMapping::State);
            states.push(h);
        }

        let mut constants = tvec!();
        for (ix, constant) in self.constants.iter().enumerate() {
            let name = format!("{}.constant_{}", self.name, ix);
            let c = b.placeholder(&name, constant.fact().clone())?;
            scan.add_input(constant.clone(), c.clone(), InputMapping::Full);
            constants.push(c);
        }

        let (mut output, mut new_states) = self.step(&x_t, &states, &constants)?;

        // masked steps carry the previous output as an extra state
        let previous_output = if let Some(mask_t) = &mask_t {
            let width = match (output.rank(), output.shape().last()) {
                (2, Some(width)) => width,
                _ => bail!(RnnError::config(format!(
                    "{}: masking a scan needs (batch, width) step outputs, got {}",
                    self.name,
                    output.shape()
                ))),
            };
            let zeros = zero_state(b, self.inputs, &[width])?.remove(0);
            let name = format!("{}.previous_output", self.name);
            let previous = b.placeholder(&name, output.fact().clone())?;
            scan.add_input(zeros, previous.clone(), InputMapping::State);
            output = self.keep_masked(mask_t, &output, &previous)?;
            new_states = new_states
                .iter()
                .zip(states.iter())
                .map(|(new, old)| self.keep_masked(mask_t, new, old))
                .collect::<RecurResult<_>>()?;
            Some(output.clone())
        } else {
            None
        };

        let full_axis = if self.return_sequences { Some(1) } else { None };
        scan.add_output(output, OutputMapping::new(false, full_axis, true));
        for state in &new_states {
            scan.add_output(state.clone(), OutputMapping::new(true, None, true));
        }
        if let Some(previous) = previous_output {
            scan.add_output(previous, OutputMapping::new(true, None, false));
        }

        let mut wired =
            b.scan(scan).with_context(|| format!("Wiring scan of {}", self.name))?.into_iter();
        let main = wired.next().context("Scan lost its output")?;
        let states = wired
            .take(new_states.len())
            .map(|o| o.last.context("Scan lost a final state"))
            .collect::<RecurResult<TVec<_>>>()?;
        Ok(LoopOutputs {
            last_output: main.last.context("Scan lost its last output")?,
            sequence: main.full,
            states,
        })
    }
}
