//! Error kinds raised while wiring a recurrent layer.
//!
//! Everything fallible returns a `RecurResult`. The failures a caller may want
//! to tell apart are raised as a `RnnError` inside the `anyhow::Error`, and can
//! be recovered with `RnnError::kind_of`.
use recur_data::RecurError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RnnError {
    /// The layer is set up in a way that can not work: unrolling an
    /// undefined or single step time axis, resetting the state of a non
    /// stateful layer, a pinned state spec disagreeing with the cell.
    Configuration(String),
    /// A list of tensors (initial states, constants, cell states) does not
    /// have the expected length.
    ArgumentCount { what: &'static str, expected: usize, got: usize },
    /// A tensor does not satisfy an `InputSpec`.
    ShapeConstraint { input: String, detail: String },
}

impl RnnError {
    pub fn config(msg: impl Into<String>) -> RnnError {
        RnnError::Configuration(msg.into())
    }

    /// Find the `RnnError` behind an error, looking through added context.
    pub fn kind_of(err: &RecurError) -> Option<&RnnError> {
        err.chain().find_map(|e| e.downcast_ref::<RnnError>())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, RnnError::Configuration(_))
    }

    pub fn is_argument_count(&self) -> bool {
        matches!(self, RnnError::ArgumentCount { .. })
    }

    pub fn is_shape_constraint(&self) -> bool {
        matches!(self, RnnError::ShapeConstraint { .. })
    }
}

impl fmt::Display for RnnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RnnError::Configuration(msg) => write!(f, "Invalid configuration: {msg}"),
            RnnError::ArgumentCount { what, expected, got } => {
                write!(f, "Expected {expected} {what}, got {got}")
            }
            RnnError::ShapeConstraint { input, detail } => {
                write!(f, "Input {input} is incompatible with the layer: {detail}")
            }
        }
    }
}

impl std::error::Error for RnnError {}

#[cfg(test)]
mod tests {
    use super::*;
    use recur_data::internal::*;

    fn fails() -> RecurResult<()> {
        bail!(RnnError::ArgumentCount { what: "initial states", expected: 2, got: 1 })
    }

    #[test]
    fn kind_survives_context() {
        let err = fails().context("Wiring gru").unwrap_err();
        let kind = RnnError::kind_of(&err).unwrap();
        assert!(kind.is_argument_count());
        assert_eq!(kind.to_string(), "Expected 2 initial states, got 1");
    }

    #[test]
    fn plain_errors_have_no_kind() {
        let err = format_err!("something else");
        assert!(RnnError::kind_of(&err).is_none());
    }
}
