//! Element types a symbolic tensor can carry.
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Default)]
pub enum DatumType {
    Bool,
    I32,
    I64,
    F16,
    #[default]
    F32,
    F64,
}

impl DatumType {
    pub fn is_float(&self) -> bool {
        matches!(self, DatumType::F16 | DatumType::F32 | DatumType::F64)
    }

    #[inline]
    pub fn size_of(&self) -> usize {
        match self {
            DatumType::Bool => 1,
            DatumType::F16 => 2,
            DatumType::I32 | DatumType::F32 => 4,
            DatumType::I64 | DatumType::F64 => 8,
        }
    }

    /// Smallest float type able to hold both operands, for mixed float
    /// arithmetic. Non float pairs only combine with themselves.
    pub fn common_super_type(&self, rhs: DatumType) -> Option<DatumType> {
        if *self == rhs {
            Some(*self)
        } else if self.is_float() && rhs.is_float() {
            Some(if self.size_of() >= rhs.size_of() { *self } else { rhs })
        } else {
            None
        }
    }
}

impl fmt::Display for DatumType {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            DatumType::Bool => "bool",
            DatumType::I32 => "i32",
            DatumType::I64 => "i64",
            DatumType::F16 => "f16",
            DatumType::F32 => "f32",
            DatumType::F64 => "f64",
        };
        write!(fmt, "{s}")
    }
}

impl std::str::FromStr for DatumType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I32" | "i32" => Ok(DatumType::I32),
            "I64" | "i64" => Ok(DatumType::I64),
            "F16" | "f16" => Ok(DatumType::F16),
            "F32" | "f32" => Ok(DatumType::F32),
            "F64" | "f64" => Ok(DatumType::F64),
            "Bool" | "bool" => Ok(DatumType::Bool),
            _ => anyhow::bail!("Unknown type {}", s),
        }
    }
}
