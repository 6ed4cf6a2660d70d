use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered per-axis extents. Used for device hierarchies, tensor shapes and
/// time shapes alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    pub fn num_axes(&self) -> usize {
        self.0.len()
    }

    pub fn at(&self, axis: usize) -> usize {
        self.0[axis]
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Product of all extents; `1` for a scalar shape.
    pub fn elem_cnt(&self) -> usize {
        self.0.iter().product()
    }

    /// [`Self::elem_cnt`], or `None` if the product overflows.
    pub fn checked_elem_cnt(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}
