//! Feature transforms applied to every utterance before batching.

use ndarray::{Array2, ArrayView2, s};

/// Pure mapping from raw frames to network input frames.
///
/// The frame count is preserved; only the feature dimension may change.
pub trait FeatureTransform: Send + Sync {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;
    fn transform(&self, frames: ArrayView2<'_, f32>) -> Array2<f32>;
}

/// Passes frames through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityTransform {
    dim: usize,
}

impl IdentityTransform {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl FeatureTransform for IdentityTransform {
    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn transform(&self, frames: ArrayView2<'_, f32>) -> Array2<f32> {
        frames.to_owned()
    }
}

/// Splices `left` past and `right` future frames onto every frame.
///
/// Edges are padded by repeating the first and last frame, so output row
/// `t` is `[x[t-left], .., x[t], .., x[t+right]]` with indices clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceTransform {
    dim: usize,
    left: usize,
    right: usize,
}

impl SpliceTransform {
    pub fn new(dim: usize, left: usize, right: usize) -> Self {
        Self { dim, left, right }
    }

    /// Number of spliced frames per output row.
    pub fn context(&self) -> usize {
        self.left + 1 + self.right
    }
}

impl FeatureTransform for SpliceTransform {
    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim * self.context()
    }

    fn transform(&self, frames: ArrayView2<'_, f32>) -> Array2<f32> {
        let rows = frames.nrows();
        let mut out = Array2::zeros((rows, self.output_dim()));
        if rows == 0 {
            return out;
        }
        let last = rows - 1;
        for t in 0..rows {
            for k in 0..self.context() {
                let src = (t + k).saturating_sub(self.left).min(last);
                out.slice_mut(s![t, k * self.dim..(k + 1) * self.dim])
                    .assign(&frames.row(src));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_identity() {
        let t = IdentityTransform::new(2);
        let x = array![[1.0f32, 2.0], [3.0, 4.0]];
        assert_eq!(t.transform(x.view()), x);
        assert_eq!(t.output_dim(), 2);
    }

    #[test]
    fn test_splice_dims() {
        let t = SpliceTransform::new(40, 5, 5);
        assert_eq!(t.context(), 11);
        assert_eq!(t.output_dim(), 440);
    }

    #[test]
    fn test_splice_replicates_edges() {
        let t = SpliceTransform::new(1, 1, 1);
        let x = array![[1.0f32], [2.0], [3.0]];
        let y = t.transform(x.view());
        assert_eq!(y, array![[1.0f32, 1.0, 2.0], [1.0, 2.0, 3.0], [2.0, 3.0, 3.0]]);
    }

    #[test]
    fn test_splice_asymmetric_context() {
        let t = SpliceTransform::new(2, 2, 0);
        let x = array![[1.0f32, 10.0], [2.0, 20.0]];
        let y = t.transform(x.view());
        assert_eq!(y.row(1).to_vec(), vec![1.0, 10.0, 1.0, 10.0, 2.0, 20.0]);
    }

    #[test]
    fn test_splice_empty_input() {
        let t = SpliceTransform::new(3, 1, 1);
        let y = t.transform(Array2::<f32>::zeros((0, 3)).view());
        assert_eq!(y.dim(), (0, 9));
    }
}
