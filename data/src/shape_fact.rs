//! Shapes known at graph construction time, where any axis may still be
//! undetermined.
use crate::TVec;
use anyhow::bail;
use itertools::Itertools;
use std::fmt;

/// Ordered list of axes, each one either a concrete size or `None` when the
/// size is not known while the graph is being built (typically the batch or
/// the time axis).
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(TVec<Option<usize>>);

impl Shape {
    pub fn from_dims(dims: impl IntoIterator<Item = Option<usize>>) -> Shape {
        Shape(dims.into_iter().collect())
    }

    /// Shape with `rank` undetermined axes.
    pub fn unknown(rank: usize) -> Shape {
        Shape(tvec!(None; rank))
    }

    /// Rank of the tensor.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Dimension of the i-th axis, `None` if the axis does not exist or is
    /// undetermined.
    pub fn dim(&self, i: usize) -> Option<usize> {
        self.0.get(i).copied().flatten()
    }

    /// Axis lookup with python-style negative indexing.
    pub fn get(&self, i: isize) -> Option<Option<usize>> {
        let ix = if i < 0 { self.rank() as isize + i } else { i };
        if ix < 0 { None } else { self.0.get(ix as usize).copied() }
    }

    /// Size of the last axis, if there is one and it is known.
    pub fn last(&self) -> Option<usize> {
        self.0.last().copied().flatten()
    }

    pub fn set(&mut self, i: usize, dim: Option<usize>) {
        self.0[i] = dim;
    }

    pub fn insert_axis(&mut self, axis: usize, dim: Option<usize>) -> anyhow::Result<()> {
        if axis > self.rank() {
            bail!("Can not insert axis {} in shape {:?}", axis, self);
        }
        self.0.insert(axis, dim);
        Ok(())
    }

    pub fn remove_axis(&mut self, axis: usize) -> anyhow::Result<Option<usize>> {
        if axis >= self.rank() {
            bail!("Can not remove axis {} from shape {:?}", axis, self);
        }
        Ok(self.0.remove(axis))
    }

    pub fn without_axis(&self, axis: usize) -> anyhow::Result<Shape> {
        let mut shape = self.clone();
        shape.remove_axis(axis)?;
        Ok(shape)
    }

    /// Every axis is known.
    pub fn is_concrete(&self) -> bool {
        self.0.iter().all(|d| d.is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<usize>> + '_ {
        self.0.iter().copied()
    }

    /// Two shapes are compatible if they have the same rank and no axis is
    /// known in both with different sizes.
    pub fn is_compatible_with(&self, other: &Shape) -> bool {
        self.rank() == other.rank()
            && self.iter().zip(other.iter()).all(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
    }

    /// Merge the knowledge of two shapes of the same tensor. Fails if an axis
    /// is fixed to two different sizes.
    pub fn unify(&self, other: &Shape) -> anyhow::Result<Shape> {
        if self.rank() != other.rank() {
            bail!("Rank mismatch unifying {:?} and {:?}", self, other);
        }
        self.iter()
            .zip(other.iter())
            .enumerate()
            .map(|(ix, (a, b))| match (a, b) {
                (Some(a), Some(b)) if a != b => {
                    bail!("Axis {} is {} in {:?} but {} in {:?}", ix, a, self, b, other)
                }
                (a, b) => Ok(a.or(b)),
            })
            .collect::<anyhow::Result<TVec<_>>>()
            .map(Shape)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, fmt)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.rank() == 0 {
            return write!(fmt, "()");
        }
        write!(
            fmt,
            "{}",
            self.iter().map(|d| d.map(|d| d.to_string()).unwrap_or_else(|| "?".into())).join("x")
        )
    }
}

impl From<&[usize]> for Shape {
    fn from(it: &[usize]) -> Shape {
        Shape::from_dims(it.iter().map(|&d| Some(d)))
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(it: [usize; N]) -> Shape {
        Shape::from(&it[..])
    }
}

impl From<&[Option<usize>]> for Shape {
    fn from(it: &[Option<usize>]) -> Shape {
        Shape::from_dims(it.iter().copied())
    }
}

impl From<Vec<Option<usize>>> for Shape {
    fn from(it: Vec<Option<usize>>) -> Shape {
        Shape::from_dims(it)
    }
}

impl FromIterator<Option<usize>> for Shape {
    fn from_iter<I: IntoIterator<Item = Option<usize>>>(iter: I) -> Shape {
        Shape::from_dims(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display() {
        assert_eq!(shape!(32, _, 8).to_string(), "32x?x8");
        assert_eq!(Shape::unknown(0).to_string(), "()");
    }

    #[test]
    fn negative_indexing() {
        let s = shape!(_, 10, 4);
        assert_eq!(s.get(-1), Some(Some(4)));
        assert_eq!(s.get(0), Some(None));
        assert_eq!(s.get(-4), None);
        assert_eq!(s.last(), Some(4));
    }

    #[test]
    fn remove_time_axis() {
        let s = shape!(32, 10, 8, 3);
        assert_eq!(s.without_axis(1).unwrap(), shape!(32, 8, 3));
        assert!(s.without_axis(4).is_err());
    }

    #[test]
    fn unify_fills_unknowns() {
        let a = shape!(_, 10, 4);
        let b = shape!(32, _, 4);
        assert_eq!(a.unify(&b).unwrap(), shape!(32, 10, 4));
    }

    #[test]
    fn unify_rejects_conflict() {
        assert!(shape!(32, 4).unify(&shape!(32, 5)).is_err());
        assert!(shape!(32, 4).unify(&shape!(32, 4, 1)).is_err());
    }

    fn dim() -> impl Strategy<Value = Option<usize>> {
        prop_oneof![Just(None), (1usize..64).prop_map(Some)]
    }

    proptest! {
        #[test]
        fn unify_is_compatible(dims in proptest::collection::vec(dim(), 0..5)) {
            let a = Shape::from(dims.clone());
            let b = Shape::unknown(dims.len());
            prop_assert!(a.is_compatible_with(&b));
            prop_assert_eq!(a.unify(&b).unwrap(), a.clone());
            prop_assert_eq!(b.unify(&a).unwrap(), a);
        }
    }
}
