#[allow(unused_imports)]
#[macro_use]
extern crate itertools;

#[macro_use]
mod macros;

/// A Smallvec instantiation with 4 embeddable values.
///
/// Used about everywhere in recur, for layer inputs and outputs, state lists,
/// or tensor dimensions.
pub type TVec<T> = smallvec::SmallVec<[T; 4]>;

/// Result type of every fallible graph-construction operation.
pub type RecurResult<T> = anyhow::Result<T>;
pub type RecurError = anyhow::Error;

pub mod prelude {
    pub use crate::datum::DatumType;
    pub use crate::fact::TensorFact;
    pub use crate::shape_fact::Shape;
    pub use crate::{shape, tvec};
    pub use crate::{RecurError, RecurResult, TVec};
}

pub mod internal {
    pub use crate::prelude::*;
    pub use anyhow::{Context, bail, ensure, format_err};
}

pub use anyhow;

mod datum;
mod fact;
mod shape_fact;
