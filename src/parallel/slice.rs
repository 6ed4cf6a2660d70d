//! Rectangular views into a logical tensor.

use super::sbp::SbpParallel;
use super::shape::Shape;
use crate::utils::error::{HierflowError, Result};
use std::fmt;
use std::ops::Range;

/// Splits `total` into `parts` contiguous ranges whose sizes differ by at
/// most one, larger ranges first.
#[derive(Debug, Clone, Copy)]
pub struct BalancedSplitter {
    total: usize,
    parts: usize,
}

impl BalancedSplitter {
    pub fn new(total: usize, parts: usize) -> Self {
        assert!(parts > 0, "cannot split into zero parts");
        Self { total, parts }
    }

    pub fn range(&self, index: usize) -> Range<usize> {
        let base = self.total / self.parts;
        let rem = self.total % self.parts;
        let start = index * base + index.min(rem);
        let size = base + usize::from(index < rem);
        start..start + size
    }
}

/// Per-axis half-open ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorSliceView(Vec<Range<usize>>);

impl TensorSliceView {
    pub fn new(ranges: Vec<Range<usize>>) -> Self {
        Self(ranges)
    }

    pub fn full(shape: &Shape) -> Self {
        Self(shape.dims().iter().map(|&d| 0..d).collect())
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().any(|r| r.is_empty())
    }

    pub fn elem_cnt(&self) -> usize {
        self.0.iter().map(|r| r.len()).product()
    }

    /// Overlap of two views of the same tensor; empty when disjoint.
    pub fn intersect(&self, other: &TensorSliceView) -> TensorSliceView {
        let ranges = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| {
                let start = a.start.max(b.start);
                let end = a.end.min(b.end).max(start);
                start..end
            })
            .collect();
        TensorSliceView(ranges)
    }
}

impl fmt::Display for TensorSliceView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, r) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", r.start, r.end)?;
        }
        write!(f, "]")
    }
}

/// The view each of `parallel_num` devices holds under `sbp`.
pub fn slice_views_for(
    parallel_num: usize,
    sbp: SbpParallel,
    shape: &Shape,
) -> Result<Vec<TensorSliceView>> {
    let full = TensorSliceView::full(shape);
    match sbp {
        SbpParallel::Split(axis) => {
            if axis >= shape.num_axes() {
                return Err(HierflowError::MalformedDescriptor(format!(
                    "split axis {} out of range for shape {}",
                    axis, shape
                )));
            }
            let splitter = BalancedSplitter::new(shape.at(axis), parallel_num);
            Ok((0..parallel_num)
                .map(|i| {
                    let mut ranges = full.0.clone();
                    ranges[axis] = splitter.range(i);
                    TensorSliceView(ranges)
                })
                .collect())
        }
        SbpParallel::Broadcast | SbpParallel::PartialSum => Ok(vec![full; parallel_num]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_splitter() {
        let splitter = BalancedSplitter::new(10, 4);
        let ranges: Vec<_> = (0..4).map(|i| splitter.range(i)).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..8, 8..10]);

        let splitter = BalancedSplitter::new(2, 4);
        assert_eq!(splitter.range(1), 1..2);
        assert!(splitter.range(3).is_empty());
    }

    #[test]
    fn test_intersect() {
        let a = TensorSliceView::new(vec![0..4, 0..8]);
        let b = TensorSliceView::new(vec![2..6, 4..8]);
        assert_eq!(a.intersect(&b), TensorSliceView::new(vec![2..4, 4..8]));

        let c = TensorSliceView::new(vec![4..8, 0..8]);
        assert!(a.intersect(&c).is_empty());
    }

    #[test]
    fn test_slice_views_for_split() -> Result<()> {
        let shape = Shape::new(vec![8, 6]);
        let views = slice_views_for(2, SbpParallel::Split(1), &shape)?;
        assert_eq!(views[1], TensorSliceView::new(vec![0..8, 3..6]));
        assert!(slice_views_for(2, SbpParallel::Split(2), &shape).is_err());

        let views = slice_views_for(3, SbpParallel::PartialSum, &shape)?;
        assert!(views.iter().all(|v| v.elem_cnt() == 48));
        Ok(())
    }
}
