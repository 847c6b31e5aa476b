//! Sparse label encoding for sequence-level objectives.

use serde::Serialize;

/// `(indices, values, dense_shape)` triple, one entry per label.
///
/// `indices[k] = [stream, position]`; `dense_shape = [streams, longest]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SparseLabels {
    pub indices: Vec<[i64; 2]>,
    pub values: Vec<i32>,
    pub dense_shape: [i64; 2],
}

impl SparseLabels {
    pub fn from_sequences(sequences: &[Vec<i32>]) -> Self {
        let total = sequences.iter().map(Vec::len).sum();
        let mut indices = Vec::with_capacity(total);
        let mut values = Vec::with_capacity(total);
        let mut longest = 0;

        for (stream, seq) in sequences.iter().enumerate() {
            longest = longest.max(seq.len());
            for (pos, &label) in seq.iter().enumerate() {
                indices.push([stream as i64, pos as i64]);
                values.push(label);
            }
        }

        Self {
            indices,
            values,
            dense_shape: [sequences.len() as i64, longest as i64],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Labels of one stream, in order.
    pub fn stream(&self, stream: usize) -> Vec<i32> {
        self.indices
            .iter()
            .zip(&self.values)
            .filter(|(idx, _)| idx[0] == stream as i64)
            .map(|(_, &v)| v)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sequences() {
        let sparse = SparseLabels::from_sequences(&[vec![3, 1], vec![], vec![7, 7, 2]]);
        assert_eq!(sparse.dense_shape, [3, 3]);
        assert_eq!(sparse.values, vec![3, 1, 7, 7, 2]);
        assert_eq!(
            sparse.indices,
            vec![[0, 0], [0, 1], [2, 0], [2, 1], [2, 2]]
        );
        assert_eq!(sparse.stream(2), vec![7, 7, 2]);
        assert!(sparse.stream(1).is_empty());
    }

    #[test]
    fn test_empty() {
        let sparse = SparseLabels::from_sequences(&[]);
        assert!(sparse.is_empty());
        assert_eq!(sparse.dense_shape, [0, 0]);
    }
}
