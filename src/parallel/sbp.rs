use std::fmt;

/// How a logical tensor is laid out along one hierarchy axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SbpParallel {
    /// Sharded along the given tensor axis.
    Split(usize),
    /// Every device holds the full tensor.
    Broadcast,
    /// Every device holds a full-shaped addend; the value is their sum.
    PartialSum,
}

impl SbpParallel {
    pub fn is_split(&self) -> bool {
        matches!(self, SbpParallel::Split(_))
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, SbpParallel::Broadcast)
    }

    pub fn is_partial_sum(&self) -> bool {
        matches!(self, SbpParallel::PartialSum)
    }

    pub fn split_axis(&self) -> Option<usize> {
        match self {
            SbpParallel::Split(axis) => Some(*axis),
            _ => None,
        }
    }
}

impl fmt::Display for SbpParallel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SbpParallel::Split(axis) => write!(f, "S({})", axis),
            SbpParallel::Broadcast => write!(f, "B"),
            SbpParallel::PartialSum => write!(f, "P"),
        }
    }
}

/// One [`SbpParallel`] per hierarchy axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ParallelDistribution(Vec<SbpParallel>);

impl ParallelDistribution {
    pub fn new(sbp_parallel: Vec<SbpParallel>) -> Self {
        Self(sbp_parallel)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sbp_parallel(&self, axis: usize) -> SbpParallel {
        self.0[axis]
    }

    pub fn as_slice(&self) -> &[SbpParallel] {
        &self.0
    }

    pub fn push(&mut self, sbp: SbpParallel) {
        self.0.push(sbp);
    }
}

impl From<Vec<SbpParallel>> for ParallelDistribution {
    fn from(sbp_parallel: Vec<SbpParallel>) -> Self {
        Self(sbp_parallel)
    }
}

impl fmt::Display for ParallelDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, sbp) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", sbp)?;
        }
        write!(f, "]")
    }
}
