//! The recurrent layer engine: drives a `Cell` over the time axis of its
//! input.
//!
//! The engine owns the bookkeeping around the cell: the step shape the cell is
//! built against, the specs of its states and constants, the state persisted
//! across calls in stateful mode, and the output and mask shapes.
use crate::internal::*;
use itertools::Itertools;

mod config;
mod gru;
mod stepping;

pub use config::RnnConfig;
pub use gru::Gru;
use stepping::{TimeLoop, zero_state};

#[derive(Debug, Clone)]
pub struct Rnn {
    backend: Arc<dyn Backend>,
    cell: Box<dyn Cell>,
    name: String,
    config: RnnConfig,
    input_spec: TVec<InputSpec>,
    state_spec: Option<TVec<InputSpec>>,
    constants_spec: Option<TVec<InputSpec>>,
    num_constants: Option<usize>,
    states: Option<TVec<Tensor>>,
    built: bool,
}

impl Rnn {
    pub fn new(backend: Arc<dyn Backend>, cell: impl Cell) -> Rnn {
        Rnn {
            backend,
            cell: Box::new(cell),
            name: "rnn".into(),
            config: RnnConfig::default(),
            input_spec: tvec!(InputSpec::with_min_ndim(3)),
            state_spec: None,
            constants_spec: None,
            num_constants: None,
            states: None,
            built: false,
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> Rnn {
        Rnn { name: name.into(), ..self }
    }

    /// Turning `stateful` off drops the persisted states.
    pub fn with_config(self, config: RnnConfig) -> Rnn {
        let states = if config.stateful { self.states } else { None };
        Rnn { config, states, ..self }
    }

    pub fn with_return_sequences(self, return_sequences: bool) -> Rnn {
        let config = self.config.with_return_sequences(return_sequences);
        self.with_config(config)
    }

    pub fn with_return_state(self, return_state: bool) -> Rnn {
        let config = self.config.with_return_state(return_state);
        self.with_config(config)
    }

    pub fn with_go_backwards(self, go_backwards: bool) -> Rnn {
        let config = self.config.with_go_backwards(go_backwards);
        self.with_config(config)
    }

    pub fn with_stateful(self, stateful: bool) -> Rnn {
        let config = self.config.with_stateful(stateful);
        self.with_config(config)
    }

    pub fn with_unroll(self, unroll: bool) -> Rnn {
        let config = self.config.with_unroll(unroll);
        self.with_config(config)
    }

    /// Fix the number of constants ahead of the first call. Needed when the
    /// layer is driven through `Layer::apply` with flattened inputs.
    pub fn with_num_constants(self, num_constants: usize) -> Rnn {
        Rnn { num_constants: Some(num_constants), ..self }
    }

    pub fn config(&self) -> RnnConfig {
        self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn cell(&self) -> &dyn Cell {
        &*self.cell
    }

    pub fn cell_mut(&mut self) -> &mut dyn Cell {
        &mut *self.cell
    }

    pub fn cell_as<C: Cell>(&self) -> Option<&C> {
        self.cell.downcast_ref::<C>()
    }

    pub fn cell_as_mut<C: Cell>(&mut self) -> Option<&mut C> {
        self.cell.downcast_mut::<C>()
    }

    pub fn num_constants(&self) -> Option<usize> {
        self.num_constants
    }

    pub fn state_spec(&self) -> Option<&[InputSpec]> {
        self.state_spec.as_deref()
    }

    pub fn constants_spec(&self) -> Option<&[InputSpec]> {
        self.constants_spec.as_deref()
    }

    /// One entry per state of the cell, `None` while nothing is persisted.
    pub fn states(&self) -> TVec<Option<Tensor>> {
        match &self.states {
            Some(states) => states.iter().cloned().map(Some).collect(),
            None => self.cell.state_size().iter().map(|_| None).collect(),
        }
    }

    /// Overwrite the persisted states. Stateful layers only.
    pub fn set_states(&mut self, values: &[Tensor]) -> RecurResult<()> {
        self.reset_states(Some(values))
    }

    /// Zero states, `(batch, size)` for each state of the cell, with the
    /// batch size taken from `inputs` at run time.
    pub fn get_initial_state(&self, inputs: &Tensor) -> RecurResult<TVec<Tensor>> {
        zero_state(&*self.backend, inputs, &self.cell.state_size())
    }

    /// Replace the persisted states by `values`, or by zeros.
    pub fn reset_states(&mut self, values: Option<&[Tensor]>) -> RecurResult<()> {
        if !self.config.stateful {
            bail!(RnnError::config(format!("{} must be stateful to reset its states", self.name)))
        }
        let spec = &self.input_spec[0];
        let Some(batch) = spec.shape.as_ref().and_then(|s| s.dim(0)) else {
            bail!(RnnError::config(format!(
                "{} is stateful and needs to know its batch size: build it with a known batch axis",
                self.name
            )))
        };
        let states: TVec<Tensor> = if let Some(values) = values {
            let state_size = self.cell.state_size();
            if values.len() != state_size.len() {
                bail!(RnnError::ArgumentCount {
                    what: "state values",
                    expected: state_size.len(),
                    got: values.len()
                })
            }
            for (ix, (value, &size)) in values.iter().zip(state_size.iter()).enumerate() {
                InputSpec::with_shape(shape!(batch, size))
                    .check(&format!("state {} of {}", ix, self.name), value.fact())?;
            }
            values.into()
        } else {
            self.zero_states(batch, spec.datum_type)?
        };
        debug!("{}: reset {} states", self.name, states.len());
        self.states = Some(states);
        Ok(())
    }

    /// Concrete `(batch, size)` zeros, typed like the input when it is known.
    fn zero_states(&self, batch: usize, dt: Option<DatumType>) -> RecurResult<TVec<Tensor>> {
        let dt = dt.unwrap_or_else(|| self.backend.floatx());
        self.cell
            .state_size()
            .iter()
            .map(|&size| self.backend.zeros(TensorFact::dt_shape(dt, shape!(batch, size))))
            .collect()
    }

    /// Wire the layer on `inputs`, `(batch, time, features...)`.
    ///
    /// The initial states are, by priority, `initial_state`, the persisted
    /// states of a stateful layer, or zeros. `mask` is a boolean
    /// `(batch, time)` tensor. Returns the output (the whole sequence or the
    /// last step), followed by the final states if `return_state` is set.
    ///
    /// A failing call leaves the layer as it found it.
    pub fn call(
        &mut self,
        inputs: &Tensor,
        mask: Option<&Tensor>,
        training: Option<bool>,
        initial_state: Option<&[Tensor]>,
        constants: Option<&[Tensor]>,
    ) -> RecurResult<TVec<Tensor>> {
        trace!("{}: call on {:?}, training: {:?}", self.name, inputs, training);
        assert_input_compatibility(&self.name, &self.input_spec, std::slice::from_ref(inputs))?;
        let input_shape = self.backend.int_shape(inputs);

        let constants = constants.unwrap_or(&[]);
        // a built layer without constants has a cell built without them
        let expected_constants = self.num_constants.or(self.built.then_some(0));
        if let Some(expected) = expected_constants {
            if constants.len() != expected {
                bail!(RnnError::ArgumentCount { what: "constants", expected, got: constants.len() })
            }
        }

        let state_size = self.cell.state_size();
        if let Some(states) = initial_state {
            if states.len() != state_size.len() {
                bail!(RnnError::ArgumentCount {
                    what: "initial states",
                    expected: state_size.len(),
                    got: states.len()
                })
            }
        }

        let unroll_steps = if self.config.unroll {
            match input_shape.dim(1) {
                Some(steps) if steps > 1 => Some(steps),
                other => bail!(RnnError::config(format!(
                    "{} can not unroll a time axis of length {}",
                    self.name,
                    other.map(|s| s.to_string()).unwrap_or_else(|| "?".into())
                ))),
            }
        } else {
            None
        };

        let pins = Pins {
            num_constants: if constants.is_empty() {
                self.num_constants
            } else {
                Some(constants.len())
            },
            constants_spec: match &self.constants_spec {
                None if !constants.is_empty() => Some(
                    constants.iter().map(|c| InputSpec::batch_agnostic(c.shape())).collect(),
                ),
                spec => spec.clone(),
            },
            state_spec: match (&self.state_spec, initial_state) {
                (None, Some(states)) if !self.built => {
                    Some(states.iter().map(|s| InputSpec::batch_agnostic(s.shape())).collect())
                }
                (spec, _) => spec.clone(),
            },
            datum_type: Some(inputs.datum_type()),
        };

        if let Some(specs) = &pins.constants_spec {
            for (ix, (spec, constant)) in specs.iter().zip(constants.iter()).enumerate() {
                spec.check(&format!("constant {} of {}", ix, self.name), constant.fact())?;
            }
        }
        if let (Some(specs), Some(states)) = (&pins.state_spec, initial_state) {
            for (ix, (spec, state)) in specs.iter().zip(states.iter()).enumerate() {
                spec.check(&format!("initial state {} of {}", ix, self.name), state.fact())?;
            }
        }
        if let Some(mask) = mask {
            let time_axes = Shape::from_dims([input_shape.dim(0), input_shape.dim(1)]);
            InputSpec::with_shape(time_axes)
                .datum_type(DatumType::Bool)
                .check(&format!("mask of {}", self.name), mask.fact())?;
        }

        if !self.built {
            let mut shapes = tvec!(input_shape.clone());
            shapes.extend(constants.iter().map(|c| c.shape().clone()));
            self.build_pinned(&shapes, pins).with_context(|| format!("Building {}", self.name))?;
        } else if self.constants_spec.is_none() {
            self.constants_spec = pins.constants_spec;
        }

        let initial: TVec<Tensor> = if let Some(states) = initial_state {
            trace!("{}: starting from explicit states", self.name);
            states.into()
        } else if self.config.stateful {
            if self.states.is_none() {
                self.reset_states(None)?;
            }
            trace!("{}: starting from persisted states", self.name);
            self.states.clone().context("Stateful layer lost its states")?
        } else {
            trace!("{}: starting from zero states", self.name);
            self.get_initial_state(inputs)?
        };
        if initial.len() != state_size.len() {
            bail!(RnnError::ArgumentCount {
                what: "states",
                expected: state_size.len(),
                got: initial.len()
            })
        }

        let time_loop = TimeLoop {
            name: &self.name,
            backend: &*self.backend,
            cell: &*self.cell,
            inputs,
            mask,
            constants,
            go_backwards: self.config.go_backwards,
            return_sequences: self.config.return_sequences,
        };
        let looped = match unroll_steps {
            Some(steps) => time_loop.unrolled(steps, initial)?,
            None => time_loop.scanned(initial)?,
        };

        if self.config.stateful {
            self.states = Some(looped.states.clone());
        }

        let mut outputs = tvec!();
        if self.config.return_sequences {
            outputs.push(looped.sequence.context("Time loop did not output the sequence")?);
        } else {
            outputs.push(looped.last_output);
        }
        if self.config.return_state {
            outputs.extend(looped.states);
        }
        Ok(outputs)
    }

    fn check_sequence_shape(&self, shape: &Shape) -> RecurResult<()> {
        if shape.rank() < 3 {
            bail!(RnnError::ShapeConstraint {
                input: format!("0 of layer {}", self.name),
                detail: format!("expected (batch, time, features...), got {shape}"),
            })
        }
        Ok(())
    }

    /// Build against `input_shapes` with the specs in `pins`. Nothing is
    /// written to the layer unless every step succeeds.
    fn build_pinned(&mut self, input_shapes: &[Shape], pins: Pins) -> RecurResult<()> {
        let Some(input) = input_shapes.first() else {
            bail!(RnnError::ArgumentCount { what: "input shapes", expected: 1, got: 0 })
        };
        self.check_sequence_shape(input)?;
        let num_constants = pins.num_constants.unwrap_or(0);
        if input_shapes.len() < 1 + num_constants {
            bail!(RnnError::ArgumentCount {
                what: "input shapes",
                expected: 1 + num_constants,
                got: input_shapes.len()
            })
        }

        let batch = if self.config.stateful { input.dim(0) } else { None };
        if self.config.stateful && batch.is_none() {
            bail!(RnnError::config(format!(
                "{} is stateful and needs to know its batch size, got input shape {}",
                self.name, input
            )))
        }

        let state_size = self.cell.state_size();
        let state_spec = match pins.state_spec {
            Some(specs) => {
                let mismatch = specs.len() != state_size.len()
                    || specs.iter().zip(state_size.iter()).any(|(spec, &size)| {
                        spec.last_axis_size().is_some_and(|last| last != size)
                    });
                if mismatch {
                    bail!(RnnError::config(format!(
                        "{}: state spec {:?} does not agree with cell state size [{}]",
                        self.name,
                        specs,
                        state_size.iter().join(", ")
                    )))
                }
                specs
            }
            None => state_size.iter().map(|&size| InputSpec::last_axis(size)).collect(),
        };

        let states = match batch {
            Some(batch) => Some(self.zero_states(batch, pins.datum_type)?),
            None => None,
        };

        let step_shape = input.without_axis(1)?;
        debug!("{}: building on {} with step shape {}", self.name, input, step_shape);
        let cell_name = self.cell.name().into_owned();
        if let Some(cell) = self.cell.as_buildable_mut() {
            if !cell.built() {
                let mut shapes = tvec!(step_shape);
                shapes.extend(input_shapes[input_shapes.len() - num_constants..].iter().cloned());
                cell.build(&shapes).with_context(|| format!("Building cell {cell_name}"))?;
            }
        }

        let mut pinned = Shape::unknown(input.rank());
        pinned.set(0, batch);
        pinned.set(input.rank() - 1, input.last());
        let mut input_spec = InputSpec::with_shape(pinned);
        input_spec.datum_type = pins.datum_type;
        self.input_spec = tvec!(input_spec);
        self.state_spec = Some(state_spec);
        self.num_constants = pins.num_constants;
        self.constants_spec = pins.constants_spec;
        if states.is_some() {
            debug!("{}: reset states at build", self.name);
            self.states = states;
        }
        self.built = true;
        Ok(())
    }
}

/// Specs a layer fixes on its first build. Staged here until the build
/// succeeds.
#[derive(Debug, Clone, Default)]
struct Pins {
    num_constants: Option<usize>,
    constants_spec: Option<TVec<InputSpec>>,
    state_spec: Option<TVec<InputSpec>>,
    datum_type: Option<DatumType>,
}

impl Layer for Rnn {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }

    fn built(&self) -> bool {
        self.built
    }

    fn input_spec(&self) -> TVec<InputSpec> {
        self.input_spec.clone()
    }

    /// `input_shapes[0]` is the sequence shape. When the layer has constants,
    /// their shapes are the last `num_constants` entries.
    fn build(&mut self, input_shapes: &[Shape]) -> RecurResult<()> {
        let pins = Pins {
            num_constants: self.num_constants,
            constants_spec: self.constants_spec.clone(),
            state_spec: self.state_spec.clone(),
            datum_type: self.input_spec.first().and_then(|spec| spec.datum_type),
        };
        self.build_pinned(input_shapes, pins)
    }

    fn compute_output_shape(&self, input_shapes: &[Shape]) -> RecurResult<TVec<Shape>> {
        let Some(input) = input_shapes.first() else {
            bail!(RnnError::ArgumentCount { what: "input shapes", expected: 1, got: 0 })
        };
        self.check_sequence_shape(input)?;
        let batch = input.dim(0);
        let mut output = match self.cell.output_size() {
            Some(width) => Shape::from_dims([batch, Some(width)]),
            None => input.without_axis(1)?,
        };
        if self.config.return_sequences {
            output.insert_axis(1, input.dim(1))?;
        }
        let mut shapes = tvec!(output);
        if self.config.return_state {
            let states = self.cell.state_size();
            shapes.extend(states.iter().map(|&s| Shape::from_dims([batch, Some(s)])));
        }
        Ok(shapes)
    }

    fn compute_mask(&self, _inputs: &[Tensor], masks: &[Option<Tensor>]) -> TVec<Option<Tensor>> {
        let output_mask =
            if self.config.return_sequences { masks.first().cloned().flatten() } else { None };
        let mut output_masks = tvec!(output_mask);
        if self.config.return_state {
            output_masks.extend(self.cell.state_size().iter().map(|_| None));
        }
        output_masks
    }

    /// `inputs` is `[x, initial states..., constants...]`. Initial states
    /// are optional as a group.
    fn call(
        &mut self,
        inputs: &[Tensor],
        masks: &[Option<Tensor>],
        training: Option<bool>,
    ) -> RecurResult<TVec<Tensor>> {
        let num_constants = self.num_constants.unwrap_or(0);
        let Some((x, rest)) = inputs.split_first() else {
            bail!(RnnError::ArgumentCount { what: "inputs", expected: 1, got: 0 })
        };
        if rest.len() < num_constants {
            bail!(RnnError::ArgumentCount {
                what: "inputs",
                expected: 1 + num_constants,
                got: inputs.len()
            })
        }
        let (states, constants) = rest.split_at(rest.len() - num_constants);
        let mask = masks.first().cloned().flatten();
        Rnn::call(
            self,
            x,
            mask.as_ref(),
            training,
            if states.is_empty() { None } else { Some(states) },
            if constants.is_empty() { None } else { Some(constants) },
        )
    }

    /// States and constants are checked by `call` against their own specs,
    /// and building waits for them to be known.
    fn apply(
        &mut self,
        inputs: &[Tensor],
        masks: &[Option<Tensor>],
        training: Option<bool>,
    ) -> RecurResult<TVec<Tensor>> {
        Layer::call(self, inputs, masks, training).with_context(|| format!("Calling {}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::symbolic::SymbolicOp;
    use crate::cell::test::PassThrough;
    use proptest::prelude::*;

    fn f32_input(backend: &SymbolicBackend, name: &str, shape: Shape) -> Tensor {
        backend.placeholder(name, TensorFact::dt_shape(DatumType::F32, shape)).unwrap()
    }

    fn simple(units: usize) -> (Arc<SymbolicBackend>, Rnn) {
        crate::setup_test_logger();
        let backend = Arc::new(SymbolicBackend::new());
        let rnn = Rnn::new(backend.clone(), SimpleCell::new(backend.clone(), units));
        (backend, rnn)
    }

    fn kind(err: &RecurError) -> RnnError {
        RnnError::kind_of(err).cloned().unwrap_or_else(|| panic!("untyped error: {err:?}"))
    }

    fn dims(batch: Option<usize>, rest: &[usize]) -> Shape {
        std::iter::once(batch).chain(rest.iter().map(|&d| Some(d))).collect()
    }

    proptest! {
        #[test]
        fn output_shape_is_batch_by_state(
            s in 1usize..64,
            batch in proptest::option::of(1usize..64),
            t in 1usize..32,
            f in 1usize..32,
        ) {
            let backend = Arc::new(SymbolicBackend::new());
            let rnn = Rnn::new(backend, PassThrough(tvec!(s)));
            let shapes = rnn.compute_output_shape(&[dims(batch, &[t, f])]).unwrap();
            prop_assert_eq!(shapes, tvec!(dims(batch, &[s])));
        }

        #[test]
        fn output_shape_with_sequences_and_states(
            s1 in 1usize..64,
            s2 in 1usize..64,
            batch in proptest::option::of(1usize..64),
            t in 1usize..32,
            f in 1usize..32,
        ) {
            let backend = Arc::new(SymbolicBackend::new());
            let rnn = Rnn::new(backend, PassThrough(tvec!(s1, s2)))
                .with_return_sequences(true)
                .with_return_state(true);
            let shapes = rnn.compute_output_shape(&[dims(batch, &[t, f])]).unwrap();
            prop_assert_eq!(
                shapes,
                tvec!(dims(batch, &[t, s1]), dims(batch, &[s1]), dims(batch, &[s2]))
            );
        }

        #[test]
        fn explicit_state_count_must_match(states in 0usize..4, given in 0usize..6) {
            prop_assume!(states != given);
            let backend = Arc::new(SymbolicBackend::new());
            let mut rnn = Rnn::new(backend.clone(), PassThrough(tvec!(4; states)));
            let x = f32_input(&backend, "x", shape!(2, 3, 4));
            let initial = (0..given)
                .map(|i| f32_input(&backend, &format!("h{i}"), shape!(2, 4)))
                .collect::<Vec<_>>();
            let err = rnn.call(&x, None, None, Some(&initial), None).unwrap_err();
            prop_assert!(kind(&err).is_argument_count());
            prop_assert!(rnn.states().iter().all(|s| s.is_none()));
        }

        #[test]
        fn unroll_needs_several_known_steps(
            time in prop_oneof![Just(None), Just(Some(1usize))],
            units in 1usize..8,
        ) {
            let backend = Arc::new(SymbolicBackend::new());
            let cell = SimpleCell::new(backend.clone(), units);
            let mut rnn = Rnn::new(backend.clone(), cell).with_unroll(true);
            let x = f32_input(&backend, "x", Shape::from_dims([Some(2), time, Some(3)]));
            let err = rnn.call(&x, None, None, None, None).unwrap_err();
            prop_assert!(kind(&err).is_configuration());
        }

        #[test]
        fn shape_and_mask_computations_are_pure(
            sequences in any::<bool>(),
            return_state in any::<bool>(),
            t in 2usize..8,
        ) {
            let backend = Arc::new(SymbolicBackend::new());
            let mut rnn = Rnn::new(backend.clone(), PassThrough(tvec!(4, 4)))
                .with_return_sequences(sequences)
                .with_return_state(return_state)
                .with_stateful(true);
            let x = f32_input(&backend, "x", shape!(2, t, 4));
            rnn.call(&x, None, None, None, None).unwrap();
            let states = rnn.states();
            let nodes = backend.len();
            let mask = backend
                .placeholder("mask", TensorFact::dt_shape(DatumType::Bool, shape!(2, t)))
                .unwrap();
            let masks = [Some(mask.clone())];
            let first = rnn.compute_mask(std::slice::from_ref(&x), &masks);
            let second = rnn.compute_mask(std::slice::from_ref(&x), &masks);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first[0].as_ref(), if sequences { Some(&mask) } else { None });
            prop_assert_eq!(first.len(), if return_state { 3 } else { 1 });
            prop_assert!(first[1..].iter().all(|m| m.is_none()));
            let shape = x.shape().clone();
            prop_assert_eq!(
                rnn.compute_output_shape(&[shape.clone()]).unwrap(),
                rnn.compute_output_shape(&[shape]).unwrap()
            );
            prop_assert_eq!(backend.len(), nodes + 1);
            prop_assert_eq!(rnn.states(), states);
        }
    }

    #[test]
    fn last_step_and_sequence_shapes() {
        for unroll in [false, true] {
            let (backend, rnn) = simple(4);
            let mut rnn = rnn.with_unroll(unroll);
            let x = f32_input(&backend, "x", shape!(32, 10, 8));
            let outputs = rnn.call(&x, None, None, None, None).unwrap();
            assert_eq!(outputs.len(), 1);
            assert_eq!(outputs[0].shape(), &shape!(32, 4));

            let (backend, rnn) = simple(4);
            let mut rnn = rnn.with_unroll(unroll).with_return_sequences(true);
            let x = f32_input(&backend, "x", shape!(32, 10, 8));
            let outputs = rnn.call(&x, None, None, None, None).unwrap();
            assert_eq!(outputs[0].shape(), &shape!(32, 10, 4));
        }
    }

    #[test]
    fn build_pins_step_shape_and_specs() {
        let (backend, mut rnn) = simple(4);
        let x = f32_input(&backend, "x", shape!(_, 10, 8));
        rnn.call(&x, None, None, None, None).unwrap();
        assert!(rnn.built());
        let cell = rnn.cell_as::<SimpleCell>().unwrap();
        assert_eq!(cell.kernel().unwrap().shape(), &shape!(8, 4));
        assert_eq!(rnn.input_spec()[0].shape, Some(shape!(_, _, 8)));
        assert_eq!(rnn.state_spec().unwrap(), &[InputSpec::last_axis(4)]);
        assert_eq!(rnn.num_constants(), None);

        let wider = f32_input(&backend, "wider", shape!(_, 10, 9));
        let err = rnn.call(&wider, None, None, None, None).unwrap_err();
        assert!(kind(&err).is_shape_constraint());
    }

    #[test]
    fn rank_two_inputs_are_rejected() {
        let (backend, mut rnn) = simple(4);
        let x = f32_input(&backend, "x", shape!(32, 8));
        let err = rnn.call(&x, None, None, None, None).unwrap_err();
        assert!(kind(&err).is_shape_constraint());
        assert!(rnn.compute_output_shape(&[shape!(32, 8)]).is_err());
    }

    #[test]
    fn zero_states_follow_input_batch() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_return_state(true);
        let x = f32_input(&backend, "x", shape!(_, 10, 8));
        let outputs = rnn.call(&x, None, None, None, None).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].shape(), &shape!(_, 4));
        let scan = backend.producer(&outputs[0]).unwrap();
        let h0 = scan.inputs[1];
        let tile = backend.node(h0.node).unwrap();
        assert_eq!(tile.op, SymbolicOp::Tile(tvec!(1, 4)));
        assert_eq!(rnn.states(), tvec!(None::<Tensor>));
    }

    #[test]
    fn stateful_round_trip() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_stateful(true);
        let x = f32_input(&backend, "x", shape!(32, 10, 8));
        Layer::build(&mut rnn, &[x.shape().clone()]).unwrap();
        let zeros = rnn.states();
        let zero = zeros[0].clone().unwrap();
        assert_eq!(zero.shape(), &shape!(32, 4));
        assert_eq!(backend.producer(&zero).unwrap().op, SymbolicOp::Zeros);
        assert_eq!(rnn.input_spec()[0].shape, Some(shape!(32, _, 8)));

        let first = rnn.call(&x, None, None, None, None).unwrap();
        let persisted = rnn.states()[0].clone().unwrap();
        assert_ne!(persisted, zero);
        let scan = backend.producer(&first[0]).unwrap();
        assert!(scan.inputs.contains(&zero.outlet()));
        assert_eq!(backend.producer(&persisted).unwrap().id, scan.id);

        let second = rnn.call(&x, None, None, None, None).unwrap();
        let scan = backend.producer(&second[0]).unwrap();
        assert!(scan.inputs.contains(&persisted.outlet()));
        assert!(!scan.inputs.contains(&zero.outlet()));

        rnn.reset_states(None).unwrap();
        let reset = rnn.states()[0].clone().unwrap();
        assert_eq!(backend.producer(&reset).unwrap().op, SymbolicOp::Zeros);
    }

    #[test]
    fn stateful_needs_batch_size() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_stateful(true);
        let x = f32_input(&backend, "x", shape!(_, 10, 8));
        let err = rnn.call(&x, None, None, None, None).unwrap_err();
        assert!(kind(&err).is_configuration());
        assert!(!rnn.built());
    }

    #[test]
    fn reset_states_needs_stateful() {
        let (_backend, mut rnn) = simple(4);
        let err = rnn.reset_states(None).unwrap_err();
        assert!(kind(&err).is_configuration());
        let err = rnn.set_states(&[]).unwrap_err();
        assert!(kind(&err).is_configuration());
    }

    #[test]
    fn set_states_validates_values() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_stateful(true);
        Layer::build(&mut rnn, &[shape!(2, 5, 3)]).unwrap();
        let before = rnn.states();

        let err = rnn.set_states(&[]).unwrap_err();
        assert!(kind(&err).is_argument_count());
        let wrong = f32_input(&backend, "wrong", shape!(3, 4));
        let err = rnn.set_states(&[wrong]).unwrap_err();
        assert!(kind(&err).is_shape_constraint());
        assert_eq!(rnn.states(), before);

        let h = f32_input(&backend, "h", shape!(2, 4));
        rnn.set_states(&[h.clone()]).unwrap();
        assert_eq!(rnn.states(), tvec!(Some(h)));
    }

    #[test]
    fn turning_stateful_off_drops_states() {
        let (_backend, rnn) = simple(4);
        let mut rnn = rnn.with_stateful(true);
        Layer::build(&mut rnn, &[shape!(2, 5, 3)]).unwrap();
        assert!(rnn.states()[0].is_some());
        let rnn = rnn.with_stateful(false);
        assert!(rnn.states()[0].is_none());
    }

    #[test]
    fn rejected_initial_state_leaves_layer_untouched() {
        let (backend, mut rnn) = simple(4);
        let x = f32_input(&backend, "x", shape!(_, 10, 8));
        let h = f32_input(&backend, "h", shape!(_, 5));
        let err = rnn.call(&x, None, None, Some(&[h]), None).unwrap_err();
        assert!(kind(&err).is_configuration());
        assert!(!rnn.built());
        assert!(rnn.state_spec().is_none());
        assert!(rnn.num_constants().is_none());

        let h = f32_input(&backend, "h", shape!(_, 4));
        rnn.call(&x, None, None, Some(&[h]), None).unwrap();
        assert_eq!(rnn.state_spec().unwrap()[0].shape, Some(shape!(_, 4)));
        let outputs = rnn.call(&x, None, None, None, None).unwrap();
        assert_eq!(outputs[0].shape(), &shape!(_, 4));
    }

    #[test]
    fn failed_stateful_call_does_not_fix_constants() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_stateful(true);
        let unknown_batch = f32_input(&backend, "x", shape!(_, 10, 8));
        let err = rnn.call(&unknown_batch, None, None, None, None).unwrap_err();
        assert!(kind(&err).is_configuration());
        assert!(rnn.num_constants().is_none());
        assert!(rnn.states()[0].is_none());

        let x = f32_input(&backend, "x2", shape!(2, 10, 8));
        let c = f32_input(&backend, "c", shape!(_, 6));
        rnn.call(&x, None, None, None, Some(&[c])).unwrap();
        assert_eq!(rnn.num_constants(), Some(1));
        assert_eq!(rnn.cell_as::<SimpleCell>().unwrap().num_constants(), 1);
    }

    #[test]
    fn rejected_constant_leaves_layer_untouched() {
        let (backend, mut rnn) = simple(4);
        let x = f32_input(&backend, "x", shape!(2, 10, 8));
        let c = f32_input(&backend, "c", shape!(_, 6));
        let short_mask = backend
            .placeholder("short", TensorFact::dt_shape(DatumType::Bool, shape!(2, 6)))
            .unwrap();
        let err = rnn.call(&x, Some(&short_mask), None, None, Some(&[c.clone()])).unwrap_err();
        assert!(kind(&err).is_shape_constraint());
        assert!(rnn.num_constants().is_none());
        assert!(rnn.constants_spec().is_none());
        assert!(!rnn.built());

        let wide = f32_input(&backend, "wide", shape!(_, 9));
        rnn.call(&x, None, None, None, Some(&[wide])).unwrap();
        assert_eq!(rnn.constants_spec().unwrap()[0].shape, Some(shape!(_, 9)));
    }

    /// Knows the length of every time axis, whatever the tensor facts say.
    #[derive(Debug)]
    struct KnownSteps(SymbolicBackend, usize);

    impl Backend for KnownSteps {
        fn name(&self) -> &str {
            "known-steps"
        }
        fn int_shape(&self, t: &Tensor) -> Shape {
            let mut shape = t.shape().clone();
            if shape.rank() > 1 && shape.dim(1).is_none() {
                shape.set(1, Some(self.1));
            }
            shape
        }
        fn placeholder(&self, name: &str, fact: TensorFact) -> RecurResult<Tensor> {
            self.0.placeholder(name, fact)
        }
        fn variable(&self, name: &str, fact: TensorFact, init: Initializer) -> RecurResult<Tensor> {
            self.0.variable(name, fact, init)
        }
        fn zeros(&self, fact: TensorFact) -> RecurResult<Tensor> {
            self.0.zeros(fact)
        }
        fn zeros_like(&self, t: &Tensor) -> RecurResult<Tensor> {
            self.0.zeros_like(t)
        }
        fn sum(&self, t: &Tensor, axes: &[usize], keep_dims: bool) -> RecurResult<Tensor> {
            self.0.sum(t, axes, keep_dims)
        }
        fn expand_dims(&self, t: &Tensor, axis: usize) -> RecurResult<Tensor> {
            self.0.expand_dims(t, axis)
        }
        fn tile(&self, t: &Tensor, multiples: &[usize]) -> RecurResult<Tensor> {
            self.0.tile(t, multiples)
        }
        fn take(&self, t: &Tensor, axis: usize, index: usize) -> RecurResult<Tensor> {
            self.0.take(t, axis, index)
        }
        fn stack(&self, ts: &[Tensor], axis: usize) -> RecurResult<Tensor> {
            self.0.stack(ts, axis)
        }
        fn select(&self, cond: &Tensor, then: &Tensor, otherwise: &Tensor) -> RecurResult<Tensor> {
            self.0.select(cond, then, otherwise)
        }
        fn matmul(&self, a: &Tensor, b: &Tensor) -> RecurResult<Tensor> {
            self.0.matmul(a, b)
        }
        fn binary(&self, op: BinOp, a: &Tensor, b: &Tensor) -> RecurResult<Tensor> {
            self.0.binary(op, a, b)
        }
        fn activation(&self, t: &Tensor, activation: Activation) -> RecurResult<Tensor> {
            self.0.activation(t, activation)
        }
        fn scan(&self, scan: ScanSpec) -> RecurResult<TVec<ScanOutput>> {
            self.0.scan(scan)
        }
    }

    #[test]
    fn time_axis_comes_from_backend_shape() {
        crate::setup_test_logger();
        let backend = Arc::new(KnownSteps(SymbolicBackend::new(), 3));
        let mut rnn =
            Rnn::new(backend.clone(), SimpleCell::new(backend.clone(), 4)).with_unroll(true);
        let x = backend
            .0
            .placeholder("x", TensorFact::dt_shape(DatumType::F32, shape!(2, _, 5)))
            .unwrap();
        let mask = backend
            .0
            .placeholder("mask", TensorFact::dt_shape(DatumType::Bool, shape!(2, 3)))
            .unwrap();
        let outputs = rnn.call(&x, Some(&mask), None, None, None).unwrap();
        assert_eq!(outputs[0].shape(), &shape!(2, 4));
        assert_eq!(backend.0.count_ops(|op| matches!(op, SymbolicOp::Take { axis: 1, .. })), 6);

        let long_mask = backend
            .0
            .placeholder("long", TensorFact::dt_shape(DatumType::Bool, shape!(2, 4)))
            .unwrap();
        let err = rnn.call(&x, Some(&long_mask), None, None, None).unwrap_err();
        assert!(kind(&err).is_shape_constraint());
    }

    #[test]
    fn stateful_zeros_follow_input_type() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_stateful(true);
        let x = backend
            .placeholder("x", TensorFact::dt_shape(DatumType::F64, shape!(2, 3, 4)))
            .unwrap();
        let ephemeral = rnn.get_initial_state(&x).unwrap();
        assert_eq!(ephemeral[0].datum_type(), DatumType::F64);
        rnn.call(&x, None, None, None, None).unwrap();
        assert_eq!(rnn.input_spec()[0].datum_type, Some(DatumType::F64));
        assert_eq!(rnn.states()[0].as_ref().unwrap().datum_type(), DatumType::F64);
        rnn.reset_states(None).unwrap();
        let zero = rnn.states()[0].clone().unwrap();
        assert_eq!(zero.datum_type(), DatumType::F64);
        assert_eq!(backend.producer(&zero).unwrap().op, SymbolicOp::Zeros);
    }

    #[test]
    fn explicit_state_is_wired_in() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_unroll(true);
        let x = f32_input(&backend, "x", shape!(_, 3, 8));
        let h = f32_input(&backend, "h", shape!(_, 4));
        rnn.call(&x, None, None, Some(&[h.clone()]), None).unwrap();
        assert_eq!(rnn.state_spec().unwrap()[0].shape, Some(shape!(_, 4)));
        let users = backend.nodes().into_iter().filter(|n| n.inputs.contains(&h.outlet())).count();
        assert_eq!(users, 1);
        assert_eq!(backend.count_ops(|op| *op == SymbolicOp::ZerosLike), 0);
    }

    #[test]
    fn unrolled_backwards_keeps_time_order() {
        let backend = Arc::new(SymbolicBackend::new());
        let mut rnn = Rnn::new(backend.clone(), PassThrough(tvec!()))
            .with_unroll(true)
            .with_go_backwards(true)
            .with_return_sequences(true);
        let x = f32_input(&backend, "x", shape!(2, 3, 5));
        let outputs = rnn.call(&x, None, None, None, None).unwrap();
        assert_eq!(outputs[0].shape(), &shape!(2, 3, 5));
        let stack = backend.producer(&outputs[0]).unwrap();
        let indices = stack
            .inputs
            .iter()
            .map(|i| backend.node(i.node).unwrap().op)
            .collect::<Vec<_>>();
        assert_eq!(
            indices,
            (0..3).map(|index| SymbolicOp::Take { axis: 1, index }).collect::<Vec<_>>()
        );
        let takes = backend
            .nodes()
            .into_iter()
            .filter_map(|n| match n.op {
                SymbolicOp::Take { index, .. } => Some(index),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(takes, vec!(2, 1, 0));
    }

    #[test]
    fn scan_walks_backwards() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_go_backwards(true).with_return_sequences(true);
        let x = f32_input(&backend, "x", shape!(_, 7, 8));
        let outputs = rnn.call(&x, None, None, None, None).unwrap();
        assert_eq!(outputs[0].shape(), &shape!(_, 7, 4));
        let node = backend.producer(&outputs[0]).unwrap();
        let scan = node.op.as_scan().unwrap();
        assert_eq!(scan.input_mapping[0], InputMapping::Scan { axis: 1, chunk: -1 });
        assert_eq!(scan.iterations, Some(7));
    }

    #[test]
    fn constants_are_fixed_on_first_call() {
        let (backend, mut rnn) = simple(4);
        let x = f32_input(&backend, "x", shape!(_, 10, 8));
        let c = f32_input(&backend, "c", shape!(_, 6));
        rnn.call(&x, None, None, None, Some(&[c])).unwrap();
        assert_eq!(rnn.num_constants(), Some(1));
        assert_eq!(rnn.cell_as::<SimpleCell>().unwrap().num_constants(), 1);
        assert_eq!(rnn.constants_spec().unwrap()[0].shape, Some(shape!(_, 6)));

        let err = rnn.call(&x, None, None, None, None).unwrap_err();
        assert!(kind(&err).is_argument_count());
        let narrow = f32_input(&backend, "narrow", shape!(_, 5));
        let err = rnn.call(&x, None, None, None, Some(&[narrow])).unwrap_err();
        assert!(kind(&err).is_shape_constraint());
    }

    #[test]
    fn constants_reach_every_unrolled_step() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_unroll(true);
        let x = f32_input(&backend, "x", shape!(_, 3, 8));
        let c = f32_input(&backend, "c", shape!(_, 6));
        rnn.call(&x, None, None, None, Some(&[c.clone()])).unwrap();
        let users = backend.nodes().into_iter().filter(|n| n.inputs.contains(&c.outlet())).count();
        assert_eq!(users, 3);
    }

    #[test]
    fn masked_unrolled_steps_select() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_unroll(true);
        let x = f32_input(&backend, "x", shape!(_, 3, 8));
        let mask = backend
            .placeholder("mask", TensorFact::dt_shape(DatumType::Bool, shape!(_, 3)))
            .unwrap();
        let outputs = rnn.call(&x, Some(&mask), None, None, None).unwrap();
        assert_eq!(outputs[0].shape(), &shape!(_, 4));
        assert_eq!(backend.producer(&outputs[0]).unwrap().op, SymbolicOp::Select);
        assert_eq!(backend.count_ops(|op| *op == SymbolicOp::Select), 6);
    }

    #[test]
    fn masked_scan_carries_previous_output() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_return_sequences(true);
        let x = f32_input(&backend, "x", shape!(_, 7, 8));
        let mask = backend
            .placeholder("mask", TensorFact::dt_shape(DatumType::Bool, shape!(_, 7)))
            .unwrap();
        let outputs = rnn.call(&x, Some(&mask), None, None, None).unwrap();
        let node = backend.producer(&outputs[0]).unwrap();
        let scan = node.op.as_scan().unwrap();
        assert_eq!(scan.input_mapping.iter().filter(|m| m.as_scan().is_some()).count(), 2);
        assert_eq!(scan.input_mapping.iter().filter(|m| m.is_state()).count(), 2);
        assert_eq!(rnn.compute_mask(&[x], &[Some(mask.clone())]), tvec!(Some(mask)));
    }

    #[test]
    fn mask_must_be_boolean_batch_by_time() {
        let (backend, mut rnn) = simple(4);
        let x = f32_input(&backend, "x", shape!(2, 7, 8));
        let float_mask = f32_input(&backend, "mask", shape!(2, 7));
        let err = rnn.call(&x, Some(&float_mask), None, None, None).unwrap_err();
        assert!(kind(&err).is_shape_constraint());
        let short_mask = backend
            .placeholder("short", TensorFact::dt_shape(DatumType::Bool, shape!(2, 6)))
            .unwrap();
        let err = rnn.call(&x, Some(&short_mask), None, None, None).unwrap_err();
        assert!(kind(&err).is_shape_constraint());
    }

    #[test]
    fn stateless_cell_outputs_input_width() {
        let backend = Arc::new(SymbolicBackend::new());
        let mut rnn = Rnn::new(backend.clone(), PassThrough(tvec!())).with_return_state(true);
        assert_eq!(rnn.compute_output_shape(&[shape!(_, 4, 6)]).unwrap(), tvec!(shape!(_, 6)));
        let x = f32_input(&backend, "x", shape!(_, 4, 6));
        let outputs = rnn.call(&x, None, None, None, None).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].shape(), &shape!(_, 6));
    }

    #[test]
    fn flattened_apply_splits_states_and_constants() {
        let (backend, rnn) = simple(4);
        let mut rnn = rnn.with_num_constants(1).with_return_state(true);
        let x = f32_input(&backend, "x", shape!(_, 5, 8));
        let h = f32_input(&backend, "h", shape!(_, 4));
        let c = f32_input(&backend, "c", shape!(_, 2));
        let outputs = rnn.apply(&[x.clone(), h, c], &[], Some(true)).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(rnn.cell_as::<SimpleCell>().unwrap().num_constants(), 1);
        assert_eq!(rnn.constants_spec().unwrap()[0].shape, Some(shape!(_, 2)));

        let err = rnn.apply(&[x], &[], None).unwrap_err();
        assert!(kind(&err).is_argument_count());
    }

    #[test]
    fn pinned_state_spec_is_checked_against_cell() {
        let backend = Arc::new(SymbolicBackend::new());
        let mut rnn = Rnn::new(backend.clone(), PassThrough(tvec!(3)));
        rnn.state_spec = Some(tvec!(InputSpec::last_axis(5)));
        let err = Layer::build(&mut rnn, &[shape!(_, 4, 3)]).unwrap_err();
        assert!(kind(&err).is_configuration());
        rnn.state_spec = Some(tvec!(InputSpec::last_axis(3)));
        Layer::build(&mut rnn, &[shape!(_, 4, 3)]).unwrap();
        assert!(rnn.built());
    }
}
