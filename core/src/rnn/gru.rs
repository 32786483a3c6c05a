use super::{Rnn, RnnConfig};
use crate::internal::*;

/// Gated recurrent unit layer: a `Rnn` driving a `GruCell`.
///
/// Cell settings can only change before the layer is built.
#[derive(Debug, Clone)]
pub struct Gru {
    rnn: Rnn,
}

impl Gru {
    pub fn new(backend: Arc<dyn Backend>, units: usize) -> Gru {
        let cell = GruCell::new(backend.clone(), units);
        Gru { rnn: Rnn::new(backend, cell).with_name("gru") }
    }

    pub fn with_name(self, name: impl Into<String>) -> Gru {
        Gru { rnn: self.rnn.with_name(name) }
    }

    pub fn with_config(self, config: RnnConfig) -> Gru {
        Gru { rnn: self.rnn.with_config(config) }
    }

    fn map_cell(mut self, f: impl FnOnce(&mut GruCell)) -> RecurResult<Gru> {
        if self.rnn.built() {
            bail!(RnnError::config(format!("{} is already built", self.rnn.name())))
        }
        f(self.cell_mut()?);
        Ok(self)
    }

    pub fn with_activation(self, activation: Activation) -> RecurResult<Gru> {
        self.map_cell(|cell| cell.activation = activation)
    }

    pub fn with_recurrent_activation(self, recurrent_activation: Activation) -> RecurResult<Gru> {
        self.map_cell(|cell| cell.recurrent_activation = recurrent_activation)
    }

    pub fn with_use_bias(self, use_bias: bool) -> RecurResult<Gru> {
        self.map_cell(|cell| cell.use_bias = use_bias)
    }

    pub fn with_kernel_initializer(self, init: Initializer) -> RecurResult<Gru> {
        self.map_cell(|cell| cell.kernel_initializer = init)
    }

    pub fn with_recurrent_initializer(self, init: Initializer) -> RecurResult<Gru> {
        self.map_cell(|cell| cell.recurrent_initializer = init)
    }

    pub fn with_bias_initializer(self, init: Initializer) -> RecurResult<Gru> {
        self.map_cell(|cell| cell.bias_initializer = init)
    }

    pub fn cell(&self) -> RecurResult<&GruCell> {
        self.rnn.cell_as::<GruCell>().context("Gru layer without a GruCell")
    }

    fn cell_mut(&mut self) -> RecurResult<&mut GruCell> {
        self.rnn.cell_as_mut::<GruCell>().context("Gru layer without a GruCell")
    }

    pub fn units(&self) -> RecurResult<usize> {
        Ok(self.cell()?.units)
    }

    pub fn activation(&self) -> RecurResult<Activation> {
        Ok(self.cell()?.activation)
    }

    pub fn recurrent_activation(&self) -> RecurResult<Activation> {
        Ok(self.cell()?.recurrent_activation)
    }

    pub fn use_bias(&self) -> RecurResult<bool> {
        Ok(self.cell()?.use_bias)
    }

    pub fn kernel_initializer(&self) -> RecurResult<Initializer> {
        Ok(self.cell()?.kernel_initializer)
    }

    pub fn recurrent_initializer(&self) -> RecurResult<Initializer> {
        Ok(self.cell()?.recurrent_initializer)
    }

    pub fn bias_initializer(&self) -> RecurResult<Initializer> {
        Ok(self.cell()?.bias_initializer)
    }

    pub fn rnn(&self) -> &Rnn {
        &self.rnn
    }

    pub fn rnn_mut(&mut self) -> &mut Rnn {
        &mut self.rnn
    }

    /// See `Rnn::call`.
    pub fn call(
        &mut self,
        inputs: &Tensor,
        mask: Option<&Tensor>,
        training: Option<bool>,
        initial_state: Option<&[Tensor]>,
    ) -> RecurResult<TVec<Tensor>> {
        self.rnn.call(inputs, mask, training, initial_state, None)
    }

    pub fn states(&self) -> TVec<Option<Tensor>> {
        self.rnn.states()
    }

    pub fn reset_states(&mut self, values: Option<&[Tensor]>) -> RecurResult<()> {
        self.rnn.reset_states(values)
    }
}

impl Layer for Gru {
    fn name(&self) -> Cow<'_, str> {
        self.rnn.name()
    }

    fn built(&self) -> bool {
        self.rnn.built()
    }

    fn input_spec(&self) -> TVec<InputSpec> {
        self.rnn.input_spec()
    }

    fn build(&mut self, input_shapes: &[Shape]) -> RecurResult<()> {
        self.rnn.build(input_shapes)
    }

    fn compute_output_shape(&self, input_shapes: &[Shape]) -> RecurResult<TVec<Shape>> {
        self.rnn.compute_output_shape(input_shapes)
    }

    fn compute_mask(&self, inputs: &[Tensor], masks: &[Option<Tensor>]) -> TVec<Option<Tensor>> {
        self.rnn.compute_mask(inputs, masks)
    }

    fn call(
        &mut self,
        inputs: &[Tensor],
        masks: &[Option<Tensor>],
        training: Option<bool>,
    ) -> RecurResult<TVec<Tensor>> {
        Layer::call(&mut self.rnn, inputs, masks, training)
    }

    fn apply(
        &mut self,
        inputs: &[Tensor],
        masks: &[Option<Tensor>],
        training: Option<bool>,
    ) -> RecurResult<TVec<Tensor>> {
        self.rnn.apply(inputs, masks, training)
    }
}
