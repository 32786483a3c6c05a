//! # Recur
//!
//! Recurrent layers for symbolic neural network graph builders.
//!
//! A `Rnn` drives a `Cell` over the time axis of a sequence. It never computes
//! anything itself: every tensor it produces is requested from the `Backend`
//! it was built with, and the result is a graph fragment the backend owns.
//!
//! ```
//! use recur_core::prelude::*;
//! use std::sync::Arc;
//!
//! let backend = Arc::new(SymbolicBackend::new());
//! let x = backend
//!     .placeholder("x", TensorFact::dt_shape(DatumType::F32, shape!(32, 10, 8)))
//!     .unwrap();
//! let mut gru = Rnn::new(backend.clone(), GruCell::new(backend.clone(), 4));
//! let outputs = gru.call(&x, None, None, None, None).unwrap();
//! assert_eq!(outputs[0].shape(), &shape!(32, 4));
//! ```
#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

pub mod backend;
pub mod cell;
pub mod errors;
pub mod input_spec;
pub mod layer;
pub mod rnn;
pub mod tensor;

pub use recur_data;

pub mod prelude {
    pub use crate::backend::{Activation, Backend, Initializer, SymbolicBackend};
    pub use crate::cell::{BuildableCell, Cell, GruCell, SimpleCell};
    pub use crate::errors::RnnError;
    pub use crate::input_spec::InputSpec;
    pub use crate::layer::Layer;
    pub use crate::rnn::{Gru, Rnn, RnnConfig};
    pub use crate::tensor::Tensor;
    pub use recur_data::prelude::*;
}

pub mod internal {
    pub use crate::backend::{
        Activation, Backend, BinOp, InputMapping, Initializer, OutputMapping, ScanOutput, ScanSpec,
        SymbolicBackend,
    };
    pub use crate::cell::{BuildableCell, Cell, GruCell, SimpleCell};
    pub use crate::errors::RnnError;
    pub use crate::input_spec::{InputSpec, assert_input_compatibility};
    pub use crate::prelude::*;
    pub use crate::tensor::{OutletId, Tensor, shapes_of};
    pub use recur_data::internal::*;
    pub use std::borrow::Cow;
    pub use std::sync::Arc;
}

#[cfg(test)]
#[allow(dead_code)]
fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("RECUR_LOG").try_init();
}
