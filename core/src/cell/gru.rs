use super::{BuildableCell, Cell, check_state_count, step_features};
use crate::internal::*;

/// Gated recurrent unit (Cho et al., 2014).
///
/// ```text
/// z  = σ(x·Wz + h₋₁·Uz + bz)
/// r  = σ(x·Wr + h₋₁·Ur + br)
/// h̃  = act(x·Wh + (r ⊙ h₋₁)·Uh + bh)
/// h  = z ⊙ h₋₁ + (1 - z) ⊙ h̃
/// ```
///
/// `σ` is the recurrent activation (hard sigmoid by default). Each gate has
/// its own kernels.
#[derive(Debug, Clone)]
pub struct GruCell {
    backend: Arc<dyn Backend>,
    name: String,
    pub units: usize,
    pub activation: Activation,
    pub recurrent_activation: Activation,
    pub use_bias: bool,
    pub kernel_initializer: Initializer,
    pub recurrent_initializer: Initializer,
    pub bias_initializer: Initializer,
    gates: Option<[Gate; 3]>,
}

#[derive(Debug, Clone)]
struct Gate {
    kernel: Tensor,
    recurrent_kernel: Tensor,
    bias: Option<Tensor>,
}

const Z: usize = 0;
const R: usize = 1;
const H: usize = 2;

impl GruCell {
    pub fn new(backend: Arc<dyn Backend>, units: usize) -> GruCell {
        GruCell {
            backend,
            name: "gru_cell".into(),
            units,
            activation: Activation::Tanh,
            recurrent_activation: Activation::HardSigmoid,
            use_bias: true,
            kernel_initializer: Initializer::GlorotUniform,
            recurrent_initializer: Initializer::Orthogonal,
            bias_initializer: Initializer::Zeros,
            gates: None,
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> GruCell {
        GruCell { name: name.into(), ..self }
    }

    pub fn with_activation(self, activation: Activation) -> GruCell {
        GruCell { activation, ..self }
    }

    pub fn with_recurrent_activation(self, recurrent_activation: Activation) -> GruCell {
        GruCell { recurrent_activation, ..self }
    }

    pub fn with_use_bias(self, use_bias: bool) -> GruCell {
        GruCell { use_bias, ..self }
    }

    pub fn with_kernel_initializer(self, kernel_initializer: Initializer) -> GruCell {
        GruCell { kernel_initializer, ..self }
    }

    pub fn with_recurrent_initializer(self, recurrent_initializer: Initializer) -> GruCell {
        GruCell { recurrent_initializer, ..self }
    }

    pub fn with_bias_initializer(self, bias_initializer: Initializer) -> GruCell {
        GruCell { bias_initializer, ..self }
    }

    /// Every weight the cell created, kernels first.
    pub fn weights(&self) -> TVec<Tensor> {
        let Some(gates) = &self.gates else { return tvec!() };
        let mut weights: TVec<Tensor> = gates.iter().map(|g| g.kernel.clone()).collect();
        weights.extend(gates.iter().map(|g| g.recurrent_kernel.clone()));
        weights.extend(gates.iter().filter_map(|g| g.bias.clone()));
        weights
    }

    fn gate(&self, suffix: &str, features: usize) -> RecurResult<Gate> {
        let dt = self.backend.floatx();
        let units = self.units;
        let var = |what: &str, shape: Shape, init: Initializer| {
            let name = format!("{}.{}_{}", self.name, what, suffix);
            self.backend.variable(&name, TensorFact::dt_shape(dt, shape), init)
        };
        Ok(Gate {
            kernel: var("kernel", shape!(features, units), self.kernel_initializer)?,
            recurrent_kernel: var(
                "recurrent_kernel",
                shape!(units, units),
                self.recurrent_initializer,
            )?,
            bias: if self.use_bias {
                Some(var("bias", shape!(units), self.bias_initializer)?)
            } else {
                None
            },
        })
    }

    /// `x·W + b`, the input projection of a gate.
    fn project(&self, gate: &Gate, x: &Tensor) -> RecurResult<Tensor> {
        let b = &*self.backend;
        let projected = b.matmul(x, &gate.kernel)?;
        match &gate.bias {
            Some(bias) => b.add(&projected, bias),
            None => Ok(projected),
        }
    }
}

impl BuildableCell for GruCell {
    fn built(&self) -> bool {
        self.gates.is_some()
    }

    fn build(&mut self, input_shapes: &[Shape]) -> RecurResult<()> {
        let Some(step) = input_shapes.first() else {
            bail!("Building {} without a step input shape", self.name)
        };
        if input_shapes.len() > 1 {
            bail!(RnnError::config(format!("{} can not be conditioned on constants", self.name)))
        }
        let features = step_features(&self.name, step)?;
        self.gates = Some([
            self.gate("z", features)?,
            self.gate("r", features)?,
            self.gate("h", features)?,
        ]);
        Ok(())
    }
}

impl Cell for GruCell {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }

    fn state_size(&self) -> TVec<usize> {
        tvec!(self.units)
    }

    #[allow(non_snake_case)]
    fn step(
        &self,
        input: &Tensor,
        states: &[Tensor],
        constants: &[Tensor],
    ) -> RecurResult<(Tensor, TVec<Tensor>)> {
        check_state_count(self, states)?;
        if !constants.is_empty() {
            bail!(RnnError::config(format!("{} can not be conditioned on constants", self.name)))
        }
        let Some(gates) = &self.gates else {
            bail!(RnnError::config(format!("{} used before being built", self.name)))
        };
        let b = &*self.backend;
        let h_tm1 = &states[0];

        let x_z = self.project(&gates[Z], input)?;
        let h_Uz = b.matmul(h_tm1, &gates[Z].recurrent_kernel)?;
        let z = b.add(&x_z, &h_Uz)?;
        let z = b.activation(&z, self.recurrent_activation)?;

        let x_r = self.project(&gates[R], input)?;
        let h_Ur = b.matmul(h_tm1, &gates[R].recurrent_kernel)?;
        let r = b.add(&x_r, &h_Ur)?;
        let r = b.activation(&r, self.recurrent_activation)?;

        let x_h = self.project(&gates[H], input)?;
        let r_h = b.mul(&r, h_tm1)?;
        let rh_Uh = b.matmul(&r_h, &gates[H].recurrent_kernel)?;
        let hh = b.add(&x_h, &rh_Uh)?;
        let hh = b.activation(&hh, self.activation)?;

        // z ⊙ h₋₁ + (1 - z) ⊙ h̃  ==  h̃ + z ⊙ (h₋₁ - h̃)
        let delta = b.sub(h_tm1, &hh)?;
        let gated = b.mul(&z, &delta)?;
        let h = b.add(&hh, &gated)?;
        Ok((h.clone(), tvec!(h)))
    }

    fn as_buildable(&self) -> Option<&dyn BuildableCell> {
        Some(self)
    }

    fn as_buildable_mut(&mut self) -> Option<&mut dyn BuildableCell> {
        Some(self)
    }
}
