//! Data types flowing through the loader pipeline.

use crate::io::ScpEntry;
use crate::labels::SparseLabels;
use crate::lattice::LatticeBatch;
use ndarray::{Array2, Array3, Array4};
use serde::Serialize;
use std::sync::Arc;

/// A fixed-width group of utterance references.
///
/// Features are not materialized here; a loader worker reads them when it
/// claims the package.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    /// Position in build order within the current store generation.
    pub index: usize,
    pub features: Vec<ScpEntry>,
    pub labels: Vec<Vec<i32>>,
    /// Lattice scp lines, one per stream, when lattices are in use.
    pub lattices: Option<Vec<String>>,
}

impl Package {
    /// Number of streams.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn utt_ids(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|e| e.utt_id.as_str())
    }
}

/// Feature tensor of one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Features {
    /// `[time, streams, dim]`
    Sequence(Array3<f32>),
    /// `[time * streams, context, base_dim, 1]`
    Conv(Array4<f32>),
}

impl Features {
    pub fn shape(&self) -> &[usize] {
        match self {
            Features::Sequence(a) => a.shape(),
            Features::Conv(a) => a.shape(),
        }
    }

    pub fn as_sequence(&self) -> Option<&Array3<f32>> {
        match self {
            Features::Sequence(a) => Some(a),
            Features::Conv(_) => None,
        }
    }

    pub fn as_conv(&self) -> Option<&Array4<f32>> {
        match self {
            Features::Conv(a) => Some(a),
            Features::Sequence(_) => None,
        }
    }
}

/// Label structure of one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Labels {
    /// `[streams, time]`, zero-padded.
    Dense(Array2<i32>),
    Sparse(SparseLabels),
}

impl Labels {
    pub fn as_dense(&self) -> Option<&Array2<i32>> {
        match self {
            Labels::Dense(a) => Some(a),
            Labels::Sparse(_) => None,
        }
    }

    pub fn as_sparse(&self) -> Option<&SparseLabels> {
        match self {
            Labels::Sparse(s) => Some(s),
            Labels::Dense(_) => None,
        }
    }
}

/// One unit handed to the training loop.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Index of the package this batch was shaped from.
    pub package: usize,
    /// Position of this batch among the package's slices.
    pub slice: usize,
    /// Number of batches the package produced.
    pub slices: usize,
    pub features: Features,
    pub labels: Labels,
    /// Valid frames per stream.
    pub lengths: Vec<usize>,
    pub lattice: Option<Arc<LatticeBatch>>,
}

impl Batch {
    pub fn streams(&self) -> usize {
        self.lengths.len()
    }

    /// Whether this is the final batch of its package.
    pub fn is_last_slice(&self) -> bool {
        self.slice + 1 == self.slices
    }
}

/// Input dimension the network sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureDim {
    Flat(usize),
    Conv { context: usize, base: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_accessors() {
        let package = Package {
            index: 0,
            features: vec![ScpEntry::new("a", "x.ark", 0), ScpEntry::new("b", "x.ark", 9)],
            labels: vec![vec![1], vec![2]],
            lattices: None,
        };
        assert_eq!(package.len(), 2);
        assert_eq!(package.utt_ids().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_features_shape() {
        let seq = Features::Sequence(Array3::zeros((4, 2, 3)));
        assert_eq!(seq.shape(), &[4, 2, 3]);
        assert!(seq.as_conv().is_none());

        let conv = Features::Conv(Array4::zeros((8, 3, 1, 1)));
        assert_eq!(conv.shape(), &[8, 3, 1, 1]);
    }

    #[test]
    fn test_batch_last_slice() {
        let batch = Batch {
            package: 0,
            slice: 2,
            slices: 3,
            features: Features::Sequence(Array3::zeros((1, 1, 1))),
            labels: Labels::Dense(Array2::zeros((1, 1))),
            lengths: vec![1],
            lattice: None,
        };
        assert!(batch.is_last_slice());
        assert_eq!(batch.streams(), 1);
    }
}
