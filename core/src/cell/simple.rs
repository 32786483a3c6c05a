use super::{BuildableCell, Cell, check_state_count, step_features};
use crate::internal::*;

/// Fully connected recurrence: `h = act(x·W + h₋₁·U + b)`.
///
/// When the layer passes constants, each of them gets its own kernel and
/// contributes `cᵢ·Cᵢ` to every step.
#[derive(Debug, Clone)]
pub struct SimpleCell {
    backend: Arc<dyn Backend>,
    name: String,
    pub units: usize,
    pub activation: Activation,
    pub use_bias: bool,
    pub kernel_initializer: Initializer,
    pub recurrent_initializer: Initializer,
    pub bias_initializer: Initializer,
    weights: Option<SimpleWeights>,
}

#[derive(Debug, Clone)]
struct SimpleWeights {
    kernel: Tensor,
    recurrent_kernel: Tensor,
    bias: Option<Tensor>,
    constant_kernels: TVec<Tensor>,
}

impl SimpleCell {
    pub fn new(backend: Arc<dyn Backend>, units: usize) -> SimpleCell {
        SimpleCell {
            backend,
            name: "simple_cell".into(),
            units,
            activation: Activation::Tanh,
            use_bias: true,
            kernel_initializer: Initializer::GlorotUniform,
            recurrent_initializer: Initializer::Orthogonal,
            bias_initializer: Initializer::Zeros,
            weights: None,
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> SimpleCell {
        SimpleCell { name: name.into(), ..self }
    }

    pub fn with_activation(self, activation: Activation) -> SimpleCell {
        SimpleCell { activation, ..self }
    }

    pub fn with_use_bias(self, use_bias: bool) -> SimpleCell {
        SimpleCell { use_bias, ..self }
    }

    pub fn with_kernel_initializer(self, kernel_initializer: Initializer) -> SimpleCell {
        SimpleCell { kernel_initializer, ..self }
    }

    pub fn with_recurrent_initializer(self, recurrent_initializer: Initializer) -> SimpleCell {
        SimpleCell { recurrent_initializer, ..self }
    }

    pub fn kernel(&self) -> Option<&Tensor> {
        self.weights.as_ref().map(|w| &w.kernel)
    }

    pub fn recurrent_kernel(&self) -> Option<&Tensor> {
        self.weights.as_ref().map(|w| &w.recurrent_kernel)
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.weights.as_ref().and_then(|w| w.bias.as_ref())
    }

    /// Number of constants the cell was built to be conditioned on.
    pub fn num_constants(&self) -> usize {
        self.weights.as_ref().map(|w| w.constant_kernels.len()).unwrap_or(0)
    }

    fn weight(&self, suffix: &str, shape: Shape, init: Initializer) -> RecurResult<Tensor> {
        let fact = TensorFact::dt_shape(self.backend.floatx(), shape);
        self.backend.variable(&format!("{}.{}", self.name, suffix), fact, init)
    }
}

impl BuildableCell for SimpleCell {
    fn built(&self) -> bool {
        self.weights.is_some()
    }

    fn build(&mut self, input_shapes: &[Shape]) -> RecurResult<()> {
        let Some(step) = input_shapes.first() else {
            bail!("Building {} without a step input shape", self.name)
        };
        let features = step_features(&self.name, step)?;
        let units = self.units;
        let kernel = self.weight("kernel", shape!(features, units), self.kernel_initializer)?;
        let recurrent_kernel =
            self.weight("recurrent_kernel", shape!(units, units), self.recurrent_initializer)?;
        let bias = if self.use_bias {
            Some(self.weight("bias", shape!(units), self.bias_initializer)?)
        } else {
            None
        };
        let constant_kernels = input_shapes[1..]
            .iter()
            .enumerate()
            .map(|(ix, shape)| {
                let width = step_features(&format!("{} constant {}", self.name, ix), shape)?;
                self.weight(
                    &format!("constant_kernel_{ix}"),
                    shape!(width, units),
                    self.kernel_initializer,
                )
            })
            .collect::<RecurResult<TVec<_>>>()?;
        self.weights = Some(SimpleWeights { kernel, recurrent_kernel, bias, constant_kernels });
        Ok(())
    }
}

impl Cell for SimpleCell {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }

    fn state_size(&self) -> TVec<usize> {
        tvec!(self.units)
    }

    fn step(
        &self,
        input: &Tensor,
        states: &[Tensor],
        constants: &[Tensor],
    ) -> RecurResult<(Tensor, TVec<Tensor>)> {
        check_state_count(self, states)?;
        let Some(w) = &self.weights else {
            bail!(RnnError::config(format!("{} used before being built", self.name)))
        };
        if constants.len() != w.constant_kernels.len() {
            bail!(RnnError::ArgumentCount {
                what: "constants for the cell",
                expected: w.constant_kernels.len(),
                got: constants.len()
            })
        }
        let b = &*self.backend;
        let mut h = b.matmul(input, &w.kernel)?;
        if let Some(bias) = &w.bias {
            h = b.add(&h, bias)?;
        }
        let recurrent = b.matmul(&states[0], &w.recurrent_kernel)?;
        h = b.add(&h, &recurrent)?;
        for (c, k) in constants.iter().zip(&w.constant_kernels) {
            let conditioned = b.matmul(c, k)?;
            h = b.add(&h, &conditioned)?;
        }
        let h = b.activation(&h, self.activation)?;
        Ok((h.clone(), tvec!(h)))
    }

    fn as_buildable(&self) -> Option<&dyn BuildableCell> {
        Some(self)
    }

    fn as_buildable_mut(&mut self) -> Option<&mut dyn BuildableCell> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::symbolic::SymbolicOp;

    fn placeholder(b: &SymbolicBackend, name: &str, shape: Shape) -> Tensor {
        b.placeholder(name, TensorFact::dt_shape(DatumType::F32, shape)).unwrap()
    }

    #[test]
    fn build_creates_weights() {
        let backend = Arc::new(SymbolicBackend::new());
        let mut cell = SimpleCell::new(backend.clone(), 4);
        assert!(!cell.built());
        cell.build(&[shape!(_, 8)]).unwrap();
        assert!(cell.built());
        assert_eq!(cell.kernel().unwrap().shape(), &shape!(8, 4));
        assert_eq!(cell.recurrent_kernel().unwrap().shape(), &shape!(4, 4));
        assert_eq!(cell.bias().unwrap().shape(), &shape!(4));
        assert_eq!(backend.count_ops(|op| matches!(op, SymbolicOp::Variable(_))), 3);
    }

    #[test]
    fn step_shapes() {
        let backend = Arc::new(SymbolicBackend::new());
        let mut cell = SimpleCell::new(backend.clone(), 4).with_use_bias(false);
        cell.build(&[shape!(_, 8)]).unwrap();
        let x = placeholder(&backend, "x", shape!(_, 8));
        let h = placeholder(&backend, "h", shape!(_, 4));
        let (out, states) = cell.step(&x, &[h], &[]).unwrap();
        assert_eq!(out.shape(), &shape!(_, 4));
        assert_eq!(states.len(), 1);
        assert_eq!(states[0], out);
        assert!(cell.bias().is_none());
    }

    #[test]
    fn conditioned_on_constants() {
        let backend = Arc::new(SymbolicBackend::new());
        let mut cell = SimpleCell::new(backend.clone(), 4);
        cell.build(&[shape!(_, 8), shape!(_, 3)]).unwrap();
        assert_eq!(cell.num_constants(), 1);
        let x = placeholder(&backend, "x", shape!(_, 8));
        let h = placeholder(&backend, "h", shape!(_, 4));
        let c = placeholder(&backend, "c", shape!(_, 3));
        assert!(cell.step(&x, &[h.clone()], &[c.clone()]).is_ok());
        let err = cell.step(&x, &[h], &[]).unwrap_err();
        assert!(RnnError::kind_of(&err).unwrap().is_argument_count());
    }

    #[test]
    fn unknown_features_are_rejected() {
        let backend = Arc::new(SymbolicBackend::new());
        let mut cell = SimpleCell::new(backend, 4);
        let err = cell.build(&[shape!(_, _)]).unwrap_err();
        assert!(RnnError::kind_of(&err).unwrap().is_shape_constraint());
    }

    #[test]
    fn step_before_build_fails() {
        let backend = Arc::new(SymbolicBackend::new());
        let cell = SimpleCell::new(backend.clone(), 4);
        let x = placeholder(&backend, "x", shape!(_, 8));
        let h = placeholder(&backend, "h", shape!(_, 4));
        let err = cell.step(&x, &[h], &[]).unwrap_err();
        assert!(RnnError::kind_of(&err).unwrap().is_configuration());
    }
}
