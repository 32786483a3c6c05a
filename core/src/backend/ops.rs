use std::fmt;

/// Elementwise binary operators, broadcasting their operands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
}

/// Elementwise activations a cell can apply.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Activation {
    Linear,
    #[default]
    Tanh,
    Sigmoid,
    HardSigmoid,
    Relu,
}

/// How a backend fills a trainable variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Initializer {
    Zeros,
    Ones,
    GlorotUniform,
    Orthogonal,
}

impl fmt::Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, fmt)
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, fmt)
    }
}
